//! sparse.rs
//!
//! Compressed sparse column (CSC) storage for piano rolls, and its on-disk form.
//!
//! A roll is almost all zeros, so only the set cells are kept: for each pitch column,
//! the ticks at which it is 1. `indptr[c]..indptr[c + 1]` is the slice of `indices`
//! (row numbers, ascending) that belongs to column `c`.
//!
//! File layout, all little-endian:
//!
//! ```text
//! magic    "PRSC"
//! version  u8            (1)
//! rows     u64
//! cols     u32
//! nnz      u64
//! indptr   u64 x (cols + 1)
//! indices  u64 x nnz
//! data     u8  x nnz
//! ```

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tempfile::NamedTempFile;

use crate::pianoroll::{DEFAULT_MAX_TICKS, PITCHES, PianoRoll};

const MAGIC: &[u8; 4] = b"PRSC";
const VERSION: u8 = 1;

/// Don't trust header counts for preallocation.
const MAX_PREALLOC: usize = 1 << 20;

#[derive(thiserror::Error, Debug)]
pub enum SparseError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("not a sparse roll file")]
    BadMagic,
    #[error("unsupported sparse roll version {0}")]
    UnsupportedVersion(u8),
    #[error("corrupt sparse roll: {0}")]
    Corrupt(&'static str),
    #[error("expected 128 pitch columns, found {0}")]
    NotARoll(usize),
    #[error("{rows} rows is too many to expand, limit is {limit}")]
    TooManyRows { rows: usize, limit: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SparseMatrix {
    rows: usize,
    cols: usize,
    indptr: Vec<u64>,
    indices: Vec<u64>,
    data: Vec<u8>,
}

impl SparseMatrix {
    /// Collect the set cells of a roll, column by column.
    pub fn from_roll(roll: &PianoRoll) -> Self {
        let (rows, cols) = (roll.rows(), roll.cols());
        let mut indptr = Vec::with_capacity(cols + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();

        indptr.push(0);
        for pitch in 0..cols {
            for tick in 0..rows {
                let v = roll.get(tick, pitch);
                if v != 0 {
                    indices.push(tick as u64);
                    data.push(v);
                }
            }
            indptr.push(indices.len() as u64);
        }

        Self { rows, cols, indptr, indices, data }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Rows set in one column, `None` past the last column.
    pub fn column(&self, col: usize) -> Option<&[u64]> {
        let (a, b) = (*self.indptr.get(col)? as usize, *self.indptr.get(col + 1)? as usize);
        Some(&self.indices[a..b])
    }

    /// Expand back into a dense roll of at most `DEFAULT_MAX_TICKS` rows.
    pub fn to_dense(&self) -> Result<PianoRoll, SparseError> {
        self.to_dense_within(DEFAULT_MAX_TICKS)
    }

    /// Expand back into a dense roll, refusing anything longer than `max_rows`.
    ///
    /// The row count comes from the file header, so it is checked before allocating.
    pub fn to_dense_within(&self, max_rows: usize) -> Result<PianoRoll, SparseError> {
        if self.cols != PITCHES {
            return Err(SparseError::NotARoll(self.cols));
        }
        if self.rows > max_rows {
            return Err(SparseError::TooManyRows { rows: self.rows, limit: max_rows });
        }
        let mut cells = vec![0u8; self.rows * PITCHES];
        for col in 0..self.cols {
            let (a, b) = (self.indptr[col] as usize, self.indptr[col + 1] as usize);
            for (&row, &v) in self.indices[a..b].iter().zip(&self.data[a..b]) {
                cells[row as usize * PITCHES + col] = v;
            }
        }
        Ok(PianoRoll::from_cells(self.rows, cells))
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), SparseError> {
        w.write_all(MAGIC)?;
        w.write_u8(VERSION)?;
        w.write_u64::<LittleEndian>(self.rows as u64)?;
        w.write_u32::<LittleEndian>(self.cols as u32)?;
        w.write_u64::<LittleEndian>(self.data.len() as u64)?;
        for &p in &self.indptr {
            w.write_u64::<LittleEndian>(p)?;
        }
        for &i in &self.indices {
            w.write_u64::<LittleEndian>(i)?;
        }
        w.write_all(&self.data)?;
        Ok(())
    }

    /// Read and validate a matrix written by `write_to`.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, SparseError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(SparseError::BadMagic);
        }
        let version = r.read_u8()?;
        if version != VERSION {
            return Err(SparseError::UnsupportedVersion(version));
        }

        let rows = to_usize(r.read_u64::<LittleEndian>()?)?;
        let cols = r.read_u32::<LittleEndian>()? as usize;
        let nnz = to_usize(r.read_u64::<LittleEndian>()?)?;
        if rows.checked_mul(cols).is_none_or(|cells| nnz > cells) {
            return Err(SparseError::Corrupt("more entries than cells"));
        }

        let mut indptr = Vec::with_capacity((cols + 1).min(MAX_PREALLOC));
        for _ in 0..=cols {
            indptr.push(r.read_u64::<LittleEndian>()?);
        }
        if indptr[0] != 0 || indptr[cols] != nnz as u64 || indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(SparseError::Corrupt("bad column pointers"));
        }

        let mut indices = Vec::with_capacity(nnz.min(MAX_PREALLOC));
        for _ in 0..nnz {
            let i = r.read_u64::<LittleEndian>()?;
            if i >= rows as u64 {
                return Err(SparseError::Corrupt("row index out of range"));
            }
            indices.push(i);
        }

        let mut data = vec![0u8; nnz];
        r.read_exact(&mut data)?;

        Ok(Self { rows, cols, indptr, indices, data })
    }

    /// Write to `path` through a temporary file in the same directory.
    ///
    /// `path` only appears once the whole matrix is on disk; a failed write leaves
    /// nothing behind and an existing file is replaced in one rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SparseError> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let tmp = NamedTempFile::new_in(dir)?;
        let mut w = BufWriter::new(tmp);
        self.write_to(&mut w)?;
        let tmp = w.into_inner().map_err(|e| e.into_error())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SparseError> {
        let mut r = BufReader::new(File::open(path)?);
        Self::read_from(&mut r)
    }
}

fn to_usize(v: u64) -> Result<usize, SparseError> {
    usize::try_from(v).map_err(|_| SparseError::Corrupt("size does not fit in memory"))
}
