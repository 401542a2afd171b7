// src/domain/taxonomy.rs

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

pub const TYPE_MAPPINGS: &str = "type_mappings";
pub const SUBTYPE_MAPPINGS: &str = "subtype_mappings";

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("failed to read taxonomy file {path}: {message}")]
    Read { path: String, message: String },
    #[error("failed to parse taxonomy file {path}: {message}")]
    Parse { path: String, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaxonomyEntry {
    pub label: String,
    pub parent: Option<String>,
}

/// (category, remote id) -> local label. Loaded once and never mutated during a pass.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyMap {
    categories: HashMap<String, HashMap<String, TaxonomyEntry>>,
}

// File values are either "Label" or ["Label", parent_id].
#[derive(Deserialize)]
#[serde(untagged)]
enum FileEntry {
    Label(String),
    List(Vec<serde_json::Value>),
}

impl TaxonomyMap {
    /// Missing file means "no mappings": every id passes through as its own label.
    pub fn load(path: &Path) -> Result<Self, TaxonomyError> {
        if !path.exists() {
            warn!(path = %path.display(), "taxonomy file not found, ids will be used as labels");
            return Ok(Self::default());
        }

        let text = fs::read_to_string(path).map_err(|e| TaxonomyError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        Self::from_json(&text).map_err(|message| TaxonomyError::Parse {
            path: path.display().to_string(),
            message,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, String> {
        let raw: HashMap<String, HashMap<String, FileEntry>> =
            serde_json::from_str(text).map_err(|e| e.to_string())?;

        let mut categories = HashMap::new();
        for (category, entries) in raw {
            let mut mapped = HashMap::new();
            for (id, entry) in entries {
                let entry = match entry {
                    FileEntry::Label(label) => TaxonomyEntry {
                        label,
                        parent: None,
                    },
                    FileEntry::List(items) => {
                        let mut items = items.into_iter().map(value_text);
                        let label = items.next().flatten().ok_or_else(|| {
                            format!("{category}.{id}: list entry needs a label first")
                        })?;
                        TaxonomyEntry {
                            label,
                            parent: items.next().flatten(),
                        }
                    }
                };
                mapped.insert(id, entry);
            }
            categories.insert(category, mapped);
        }

        Ok(Self { categories })
    }

    pub fn insert(&mut self, category: &str, id: &str, label: &str, parent: Option<&str>) {
        self.categories
            .entry(category.to_string())
            .or_default()
            .insert(
                id.to_string(),
                TaxonomyEntry {
                    label: label.to_string(),
                    parent: parent.map(str::to_string),
                },
            );
    }

    pub fn get(&self, category: &str, id: &str) -> Option<&TaxonomyEntry> {
        self.categories.get(category).and_then(|c| c.get(id))
    }

    /// Entries of one category, sorted by id so seeding is deterministic.
    pub fn entries(&self, category: &str) -> Vec<(&str, &TaxonomyEntry)> {
        let mut out: Vec<_> = self
            .categories
            .get(category)
            .map(|c| c.iter().map(|(k, v)| (k.as_str(), v)).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }

    pub fn is_empty(&self) -> bool {
        self.categories.values().all(|c| c.is_empty())
    }
}

fn value_text(v: serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Resolves `id` within `category`. Unknown ids fall back to the id itself, flagged `false`.
pub fn map_id_to_value(taxonomy: &TaxonomyMap, category: &str, id: &str) -> (String, bool) {
    match taxonomy.get(category, id) {
        Some(entry) => (entry.label.clone(), true),
        None => (id.to_string(), false),
    }
}
