use super::{write_proof, GateOutcome};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewProof {
    pub task_id: String,
    pub slice_id: String,
    pub reviewer: String,
    pub p0: u32,
    pub p1: u32,
    pub p2: u32,
    pub p3: u32,
    pub passed: bool,
    pub summary: String,
    pub recorded_at: DateTime<Utc>,
}

/// Record the executor's review counters. Passes only with zero P0 and P1;
/// all counters are stored for audit.
#[allow(clippy::too_many_arguments)]
pub fn record_review(
    task_id: &str,
    slice_id: &str,
    slice_proof_dir: &Path,
    reviewer: &str,
    p0: u32,
    p1: u32,
    p2: u32,
    p3: u32,
    summary: &str,
) -> Result<(ReviewProof, GateOutcome)> {
    let proof = ReviewProof {
        task_id: task_id.to_string(),
        slice_id: slice_id.to_string(),
        reviewer: reviewer.to_string(),
        p0,
        p1,
        p2,
        p3,
        passed: p0 == 0 && p1 == 0,
        summary: summary.to_string(),
        recorded_at: Utc::now(),
    };
    let proof_path = write_proof(slice_proof_dir, "review.json", &proof)?;
    let outcome = GateOutcome {
        passed: proof.passed,
        proof_path,
    };
    Ok((proof, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn zero_p0_p1_passes() {
        let dir = TempDir::new().unwrap();
        let (proof, _) =
            record_review("T-0001", "S-0001", dir.path(), "reviewer", 0, 0, 3, 1, "fine").unwrap();
        assert!(proof.passed);
        assert_eq!(proof.p2, 3);
    }

    #[test]
    fn any_p1_fails() {
        let dir = TempDir::new().unwrap();
        let (proof, outcome) =
            record_review("T-0001", "S-0001", dir.path(), "reviewer", 0, 1, 0, 0, "p1 found")
                .unwrap();
        assert!(!proof.passed);
        assert!(outcome.proof_path.exists());
    }
}
