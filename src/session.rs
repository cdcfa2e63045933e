use crate::params::ParamPair;
use crate::script::{ScriptCollection, ScriptId, ScriptRecord};

/// Label of the selector entry that starts a new script.
pub const NEW_SCRIPT_LABEL: &str = "-- New Script --";

/// Contents of the editing form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptDraft {
    pub name: String,
    pub url_pattern: String,
    pub code: String,
    pub params: Vec<ParamPair>,
}

impl ScriptDraft {
    pub fn from_record(record: &ScriptRecord) -> Self {
        Self {
            name: record.name.clone(),
            url_pattern: record.url_pattern.clone(),
            code: record.code.clone(),
            params: record.params.clone(),
        }
    }

    pub fn add_param_row(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.push(ParamPair::new(key, value));
    }

    pub fn remove_param_row(&mut self, index: usize) -> Option<ParamPair> {
        (index < self.params.len()).then(|| self.params.remove(index))
    }
}

/// Entry in the script selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOption {
    /// `None` for the new-script entry
    pub id: Option<ScriptId>,
    pub label: String,
    pub selected: bool,
}

/// Mutable panel state, passed explicitly instead of living in globals.
#[derive(Debug, Clone, Default)]
pub struct PanelSession {
    pub scripts: ScriptCollection,
    pub current: Option<ScriptId>,
    pub draft: ScriptDraft,
}

impl PanelSession {
    pub fn new(scripts: ScriptCollection) -> Self {
        Self {
            scripts,
            ..Default::default()
        }
    }

    pub fn current_record(&self) -> Option<&ScriptRecord> {
        self.current.as_ref().and_then(|id| self.scripts.get(id))
    }

    /// Load a script into the form, or reset it for a new script.
    /// Returns false when `id` names no stored script.
    pub fn select(&mut self, id: Option<&ScriptId>) -> bool {
        match id {
            None => {
                self.current = None;
                self.draft = ScriptDraft::default();
                true
            }
            Some(id) => match self.scripts.get(id) {
                Some(record) => {
                    self.draft = ScriptDraft::from_record(record);
                    self.current = Some(id.clone());
                    true
                }
                None => false,
            },
        }
    }

    pub fn options(&self) -> Vec<ScriptOption> {
        let current = self
            .current
            .as_ref()
            .filter(|id| self.scripts.contains(id));

        let mut options = vec![ScriptOption {
            id: None,
            label: NEW_SCRIPT_LABEL.to_string(),
            selected: current.is_none(),
        }];
        options.extend(self.scripts.iter().map(|(id, record)| ScriptOption {
            id: Some(id.clone()),
            label: record.name.clone(),
            selected: current == Some(id),
        }));
        options
    }
}
