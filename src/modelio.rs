//! Saving and loading of named layer weights.
//!
//! # `.bplw` Weights Format
//!
//! A `.bplw` file stores named `f32` tensors, typically the output of
//! [`Sequential::weights`](crate::model::Sequential::weights), so that a
//! trained model can be rebuilt and re-populated later.
//!
//! ```text
//! ┌────────────┬──────────────────────────────────┐
//! │ Header     │ Entry N, Entry N+1 …             │
//! ├────────────┼──────────────────────────────────┤
//! │ "bplw"[4]  │ u32: name length, name (UTF-8)   │
//! │ u32: count │ u64: ndim, [u64; ndim] shape     │
//! │            │ [f32; prod(shape)] data          │
//! └────────────┴──────────────────────────────────┘
//! ```
//!
//! All integers and floats are little-endian. Entries are written in key
//! order, so saving the same weights twice yields identical files.
//!
//! # Example
//!
//! ```rust
//! use briny_layers::layers::Weights;
//! use briny_layers::modelio::{load_weights, save_weights};
//! use briny_layers::tensors::Tensor;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut weights = Weights::new();
//!     weights.insert("dense/bias".to_owned(), Tensor::new(vec![2], vec![0.5, -0.5]));
//!
//!     let path = std::env::temp_dir().join("doc_example.bplw");
//!     save_weights(&path, &weights)?;
//!     assert_eq!(load_weights(&path)?, weights);
//!     Ok(())
//! }
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use briny::prelude::*;
use log::info;

use crate::error::{LayerError, LayerResult};
use crate::layers::Weights;
use crate::tensors::Tensor;

const BPLW_MAGIC: &[u8; 4] = b"bplw";

/// Upper bound on a stored name, to reject garbage before allocating.
const MAX_NAME_LEN: usize = 4096;

/// Highest tensor rank a weights file may declare.
pub const MAX_RANK: usize = 8;

/// Shape of an entry as read from disk, before its data is read.
struct EntryHeader {
    shape: Vec<u64>,
}

impl EntryHeader {
    /// Number of `f32` values that follow the header.
    fn element_count(&self) -> Option<usize> {
        let count = self.shape.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d))?;
        let count = usize::try_from(count).ok()?;
        count.checked_mul(size_of::<f32>()).map(|_| count)
    }
}

impl Validate for EntryHeader {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.shape.len() > MAX_RANK || self.element_count().is_none() {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// Writes `weights` to `path`, replacing any existing file.
///
/// # Errors
/// [`LayerError::Io`] if the file cannot be created or written,
/// [`LayerError::InvalidConfiguration`] if there are more entries than the
/// format can count.
pub fn save_weights(path: impl AsRef<Path>, weights: &Weights) -> LayerResult<()> {
    let path = path.as_ref();
    let count = u32::try_from(weights.len()).map_err(|_| {
        LayerError::config(format!(
            "{} weight entries do not fit the file format",
            weights.len()
        ))
    })?;
    let mut file = BufWriter::new(File::create(path)?);

    file.write_all(BPLW_MAGIC)?;
    file.write_all(&count.to_le_bytes())?;

    for (name, tensor) in weights {
        file.write_all(&(name.len() as u32).to_le_bytes())?;
        file.write_all(name.as_bytes())?;

        file.write_all(&(tensor.shape.len() as u64).to_le_bytes())?;
        for &dim in &tensor.shape {
            file.write_all(&(dim as u64).to_le_bytes())?;
        }
        for &val in &tensor.data {
            file.write_all(&val.to_le_bytes())?;
        }
    }
    file.flush()?;

    info!("saved {} weight arrays to {}", weights.len(), path.display());
    Ok(())
}

/// Reads a `.bplw` file.
///
/// # Errors
/// [`LayerError::Io`] on read failures (including truncation),
/// [`LayerError::CorruptWeights`] if the header or a name is invalid, or a
/// shape has more than [`MAX_RANK`] axes or too many elements.
pub fn load_weights(path: impl AsRef<Path>) -> LayerResult<Weights> {
    let path = path.as_ref();
    let mut file = BufReader::new(File::open(path)?);
    let mut buf4 = [0u8; 4];
    let mut buf8 = [0u8; 8];

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if &magic != BPLW_MAGIC {
        return Err(LayerError::CorruptWeights("invalid magic header".to_owned()));
    }

    file.read_exact(&mut buf4)?;
    let count = u32::from_le_bytes(buf4) as usize;

    let mut weights = Weights::new();
    for _ in 0..count {
        file.read_exact(&mut buf4)?;
        let name_len = u32::from_le_bytes(buf4) as usize;
        if name_len > MAX_NAME_LEN {
            return Err(LayerError::CorruptWeights(format!(
                "name length {name_len} is implausible"
            )));
        }
        let mut name = vec![0u8; name_len];
        file.read_exact(&mut name)?;
        let name = String::from_utf8(name)
            .map_err(|_| LayerError::CorruptWeights("weight name is not valid UTF-8".to_owned()))?;

        file.read_exact(&mut buf8)?;
        let ndim = u64::from_le_bytes(buf8);
        if ndim > MAX_RANK as u64 {
            return Err(LayerError::CorruptWeights(format!(
                "entry `{name}` declares rank {ndim}, at most {MAX_RANK} is supported"
            )));
        }
        let mut shape = Vec::with_capacity(ndim as usize);
        for _ in 0..ndim {
            file.read_exact(&mut buf8)?;
            shape.push(u64::from_le_bytes(buf8));
        }

        let header = TrustedData::new(EntryHeader { shape })
            .map_err(|_| LayerError::CorruptWeights(format!("shape of `{name}` is invalid")))?
            .into_inner();
        let size = header.element_count().unwrap_or_default();

        let mut data = Vec::new();
        for _ in 0..size {
            file.read_exact(&mut buf4)?;
            data.push(f32::from_le_bytes(buf4));
        }

        let shape: Vec<usize> = header.shape.iter().map(|&d| d as usize).collect();
        if weights.insert(name.clone(), Tensor::try_new(shape, data)?).is_some() {
            return Err(LayerError::CorruptWeights(format!("duplicate entry `{name}`")));
        }
    }

    info!("loaded {} weight arrays from {}", weights.len(), path.display());
    Ok(weights)
}
