//! Checkpoint record layout and persistence.
//!
//! A checkpoint is a mapping with the key `"discriminator"` (required) and
//! `"pre_projection"` (present iff the pre-projection stage is enabled), each
//! holding named host-resident parameter arrays. Records are serialized as
//! JSON and written atomically so a failed training run can never clobber a
//! previously good checkpoint. A missing file is not an error: it signals
//! "train from scratch".

use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// One detached parameter tensor: shape plus flat row-major values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamArray {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl ParamArray {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        let expected: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected,
            "parameter array mismatch: shape {:?} needs {} values, got {}",
            shape,
            expected,
            data.len()
        );
        Self { shape, data }
    }
}

/// Named parameter tensors of one module.
pub type StateDict = BTreeMap<String, ParamArray>;

/// The persisted snapshot of a trained model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub discriminator: StateDict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_projection: Option<StateDict>,
}

/// Write a checkpoint record atomically.
///
/// The record is serialized next to the destination and renamed into place,
/// so readers either see the old complete file or the new complete file.
pub fn save_checkpoint(record: &CheckpointRecord, path: &Path) -> Result<(), Box<dyn Error>> {
    let encoded = serde_json::to_vec(record)?;

    let tmp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load a checkpoint record.
///
/// Returns `Ok(None)` when the file does not exist; any other read or parse
/// failure is an error.
pub fn load_checkpoint(path: &Path) -> Result<Option<CheckpointRecord>, Box<dyn Error>> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(Box::new(err)),
    };
    let record: CheckpointRecord = serde_json::from_slice(&contents)?;
    Ok(Some(record))
}
