use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::params::ParamPair;

/// Opaque, time-derived script identifier (`script_<unix millis>`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptId(String);

impl ScriptId {
    pub fn from_millis(millis: i64) -> Self {
        Self(format!("script_{}", millis))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ScriptId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ScriptId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A saved script
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub url_pattern: String,
    #[serde(default)]
    pub params: Vec<ParamPair>,
    /// Unix milliseconds of the last save
    #[serde(default)]
    pub updated_at: i64,
}

/// Every stored script keyed by id, in insertion order
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptCollection(IndexMap<ScriptId, ScriptRecord>);

impl ScriptCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, id: &ScriptId) -> Option<&ScriptRecord> {
        self.0.get(id)
    }

    pub fn contains(&self, id: &ScriptId) -> bool {
        self.0.contains_key(id)
    }

    /// Insert or overwrite. An overwritten record keeps its position.
    pub fn upsert(&mut self, id: ScriptId, record: ScriptRecord) -> Option<ScriptRecord> {
        self.0.insert(id, record)
    }

    /// Remove a record leaving the order of the rest untouched.
    pub fn remove(&mut self, id: &ScriptId) -> Option<ScriptRecord> {
        self.0.shift_remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ScriptId, &ScriptRecord)> {
        self.0.iter()
    }

    pub fn find_by_name(&self, name: &str) -> Option<(&ScriptId, &ScriptRecord)> {
        self.0.iter().find(|(_, record)| record.name == name)
    }

    /// A `script_<millis>` id not yet present, starting from `now_millis`.
    pub fn fresh_id(&self, now_millis: i64) -> ScriptId {
        let mut millis = now_millis;
        loop {
            let id = ScriptId::from_millis(millis);
            if !self.contains(&id) {
                return id;
            }
            millis += 1;
        }
    }
}
