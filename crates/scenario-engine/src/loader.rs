//! C2: synchronous parsing of scenario files, tag-based selection.
//!
//! Loading never throws: a missing file or invalid JSON degrades to an
//! empty [`ScenarioFile`] with a descriptive reason, so a fleet of
//! scenario files with one broken fixture still runs everything else.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::schema::Scenario;

#[derive(Debug, Clone)]
pub struct ScenarioFile {
    pub provider: String,
    pub path: PathBuf,
    pub scenarios: Vec<Scenario>,
    /// Set when the file was missing or failed to parse; `scenarios` is
    /// empty in that case.
    pub load_note: Option<String>,
}

impl ScenarioFile {
    fn empty(provider: &str, path: PathBuf, note: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            path,
            scenarios: Vec::new(),
            load_note: Some(note.into()),
        }
    }
}

pub struct ScenarioLoader {
    scenarios_root: PathBuf,
}

impl ScenarioLoader {
    pub fn new(scenarios_root: impl Into<PathBuf>) -> Self {
        Self {
            scenarios_root: scenarios_root.into(),
        }
    }

    /// Reads `<scenarios_root>/<filename>` for `provider`. Never fails;
    /// a missing file or parse error becomes an empty set with
    /// `load_note` explaining why.
    pub fn load(&self, provider: &str, filename: &str) -> ScenarioFile {
        let path = self.scenarios_root.join(filename);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "scenario file missing or unreadable");
                return ScenarioFile::empty(provider, path, format!("file not found: {err}"));
            }
        };

        match serde_json::from_str::<Vec<Scenario>>(&raw) {
            Ok(scenarios) => ScenarioFile {
                provider: provider.to_string(),
                path,
                scenarios,
                load_note: None,
            },
            Err(err) => {
                warn!(path = %path.display(), error = %err, "scenario file failed to parse");
                ScenarioFile::empty(provider, path, format!("parse error: {err}"))
            }
        }
    }

    pub fn scenarios_root(&self) -> &Path {
        &self.scenarios_root
    }
}

/// `(id, name, scenario)` triples in source-file order, selected by tag.
pub fn filter<'a>(
    file: &'a ScenarioFile,
    tag_list: &[String],
    include_disabled: bool,
) -> Vec<(&'a str, &'a str, &'a Scenario)> {
    file.scenarios
        .iter()
        .filter(|s| include_disabled || s.enabled)
        .filter(|s| tag_list.is_empty() || s.tags.iter().any(|t| tag_list.contains(t)))
        .map(|s| (s.id.as_str(), s.name.as_str(), s))
        .collect()
}

/// Every scenario whose `enabled` is not explicitly false.
pub fn all_enabled(file: &ScenarioFile) -> Vec<(&str, &str, &Scenario)> {
    file.scenarios
        .iter()
        .filter(|s| s.enabled)
        .map(|s| (s.id.as_str(), s.name.as_str(), s))
        .collect()
}
