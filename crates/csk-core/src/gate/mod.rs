//! Gate subsystem. Each gate writes its proof file (even on failure) and
//! returns a typed result; the slice pipeline folds over gates in the fixed
//! order scope → verify → review → e2e and stops at the first non-pass.

pub mod e2e;
pub mod ready;
pub mod review;
pub mod scope;
pub mod verify;

use crate::error::Result;
use crate::io;
use std::path::{Path, PathBuf};

/// Outcome common to every gate: whether it passed and where the proof was
/// written.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub passed: bool,
    pub proof_path: PathBuf,
}

pub(crate) fn write_proof<T: serde::Serialize>(
    slice_proof_dir: &Path,
    filename: &str,
    proof: &T,
) -> Result<PathBuf> {
    let path = slice_proof_dir.join(filename);
    io::write_json(&path, proof)?;
    Ok(path)
}
