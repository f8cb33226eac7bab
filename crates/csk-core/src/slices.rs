use crate::error::{CskError, Result};
use crate::io;
use crate::types::{slice_id, GateKind, SliceStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

// ---------------------------------------------------------------------------
// SliceSpec / SlicesDoc
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SliceSpec {
    pub slice_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub forbidden_paths: Vec<String>,
    pub required_gates: Vec<GateKind>,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub status: SliceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_commands: Option<Vec<Vec<String>>>,
    #[serde(default)]
    pub e2e_required: bool,
}

impl SliceSpec {
    pub fn stub(index: usize) -> Self {
        Self {
            slice_id: slice_id(index),
            title: format!("Slice {}", slice_id(index)),
            allowed_paths: Vec::new(),
            forbidden_paths: Vec::new(),
            required_gates: vec![GateKind::Scope, GateKind::Verify, GateKind::Review],
            deps: Vec::new(),
            status: SliceStatus::Pending,
            verify_commands: None,
            e2e_required: false,
        }
    }

    pub fn requires(&self, gate: GateKind) -> bool {
        self.required_gates.contains(&gate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlicesDoc {
    pub slices: Vec<SliceSpec>,
}

impl SlicesDoc {
    pub fn stub(slice_count: usize) -> Self {
        Self {
            slices: (1..=slice_count).map(SliceSpec::stub).collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let doc = Self::load_lenient(path)?;
        doc.validate_structure(path)?;
        Ok(doc)
    }

    /// Parse without the structural pass. Used by the critic, which reports
    /// structure problems as findings instead of schema errors.
    pub fn load_lenient(path: &Path) -> Result<Self> {
        io::read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        io::write_json(path, self)
    }

    pub fn slice(&self, slice_id: &str) -> Result<&SliceSpec> {
        self.slices
            .iter()
            .find(|s| s.slice_id == slice_id)
            .ok_or_else(|| CskError::SliceNotFound(slice_id.to_string()))
    }

    /// Structural checks that make the document usable at all: dense ids,
    /// no duplicates, deps defined and acyclic. Softer problems are the
    /// critic's business.
    pub fn validate_structure(&self, path: &Path) -> Result<()> {
        let violation = |reason: String| CskError::SchemaViolation {
            path: path.display().to_string(),
            reason,
        };

        if self.slices.is_empty() {
            return Err(violation("slices must not be empty".to_string()));
        }

        let mut seen = BTreeSet::new();
        for (index, slice) in self.slices.iter().enumerate() {
            let expected = slice_id(index + 1);
            if slice.slice_id != expected {
                return Err(violation(format!(
                    "slice ids must be dense: expected {expected}, found {}",
                    slice.slice_id
                )));
            }
            if !seen.insert(slice.slice_id.as_str()) {
                return Err(violation(format!("duplicate slice id {}", slice.slice_id)));
            }
        }
        for slice in &self.slices {
            for dep in &slice.deps {
                if dep == &slice.slice_id {
                    return Err(violation(format!(
                        "slice {} depends on itself",
                        slice.slice_id
                    )));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(violation(format!(
                        "slice {} depends on undefined {dep}",
                        slice.slice_id
                    )));
                }
            }
        }
        if self.find_cycle().is_some() {
            return Err(violation("slice deps contain a cycle".to_string()));
        }
        Ok(())
    }

    /// First slice id on a dependency cycle, if any.
    pub fn find_cycle(&self) -> Option<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let deps: BTreeMap<&str, &Vec<String>> = self
            .slices
            .iter()
            .map(|s| (s.slice_id.as_str(), &s.deps))
            .collect();

        fn visit<'a>(
            node: &'a str,
            deps: &BTreeMap<&'a str, &'a Vec<String>>,
            marks: &mut BTreeMap<&'a str, Mark>,
        ) -> Option<String> {
            match marks.get(node) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => return Some(node.to_string()),
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            if let Some(node_deps) = deps.get(node) {
                for dep in node_deps.iter() {
                    if deps.contains_key(dep.as_str()) {
                        if let Some(cycle) = visit(dep, deps, marks) {
                            return Some(cycle);
                        }
                    }
                }
            }
            marks.insert(node, Mark::Done);
            None
        }

        let mut marks = BTreeMap::new();
        for slice in &self.slices {
            if let Some(cycle) = visit(slice.slice_id.as_str(), &deps, &mut marks) {
                return Some(cycle);
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

/// The active slice: first (by lexical id) slice whose status is not `done`
/// and whose dependencies are all `done`. `statuses` maps slice id to its
/// current status from task state.
pub fn active_slice<'a>(
    doc: &'a SlicesDoc,
    statuses: &BTreeMap<String, SliceStatus>,
) -> Option<&'a SliceSpec> {
    let done: BTreeSet<&str> = statuses
        .iter()
        .filter(|(_, status)| **status == SliceStatus::Done)
        .map(|(id, _)| id.as_str())
        .collect();

    let mut candidates: Vec<&SliceSpec> = doc
        .slices
        .iter()
        .filter(|s| !done.contains(s.slice_id.as_str()))
        .filter(|s| s.deps.iter().all(|d| done.contains(d.as_str())))
        .collect();
    candidates.sort_by(|a, b| a.slice_id.cmp(&b.slice_id));
    candidates.into_iter().next()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_deps(deps: &[(&str, &[&str])]) -> SlicesDoc {
        let mut doc = SlicesDoc::stub(deps.len());
        for (i, (_, slice_deps)) in deps.iter().enumerate() {
            doc.slices[i].deps = slice_deps.iter().map(|s| s.to_string()).collect();
        }
        doc
    }

    #[test]
    fn stub_has_default_gates() {
        let doc = SlicesDoc::stub(2);
        assert_eq!(doc.slices.len(), 2);
        assert_eq!(doc.slices[0].slice_id, "S-0001");
        assert!(doc.slices[0].requires(GateKind::Scope));
        assert!(doc.slices[0].requires(GateKind::Verify));
        assert!(doc.slices[0].requires(GateKind::Review));
        assert!(!doc.slices[0].requires(GateKind::E2e));
    }

    #[test]
    fn validate_rejects_sparse_ids() {
        let mut doc = SlicesDoc::stub(2);
        doc.slices[1].slice_id = "S-0005".to_string();
        assert!(doc.validate_structure(Path::new("slices.json")).is_err());
    }

    #[test]
    fn validate_rejects_undefined_and_self_deps() {
        let doc = doc_with_deps(&[("S-0001", &["S-0009"])]);
        assert!(doc.validate_structure(Path::new("slices.json")).is_err());

        let doc = doc_with_deps(&[("S-0001", &["S-0001"])]);
        assert!(doc.validate_structure(Path::new("slices.json")).is_err());
    }

    #[test]
    fn validate_rejects_cycles() {
        let doc = doc_with_deps(&[("S-0001", &["S-0002"]), ("S-0002", &["S-0001"])]);
        assert!(doc.find_cycle().is_some());
        assert!(doc.validate_structure(Path::new("slices.json")).is_err());
    }

    #[test]
    fn acyclic_dag_passes() {
        let doc = doc_with_deps(&[("S-0001", &[]), ("S-0002", &["S-0001"]), ("S-0003", &["S-0001"])]);
        assert!(doc.find_cycle().is_none());
        assert!(doc.validate_structure(Path::new("slices.json")).is_ok());
    }

    #[test]
    fn active_slice_respects_deps_and_lexical_order() {
        let doc = doc_with_deps(&[("S-0001", &[]), ("S-0002", &["S-0001"]), ("S-0003", &[])]);
        let mut statuses = BTreeMap::new();

        // Nothing done: S-0001 and S-0003 are unblocked, lexical tie-break
        assert_eq!(active_slice(&doc, &statuses).unwrap().slice_id, "S-0001");

        statuses.insert("S-0001".to_string(), SliceStatus::Done);
        assert_eq!(active_slice(&doc, &statuses).unwrap().slice_id, "S-0002");

        statuses.insert("S-0002".to_string(), SliceStatus::Done);
        statuses.insert("S-0003".to_string(), SliceStatus::Done);
        assert!(active_slice(&doc, &statuses).is_none());
    }
}
