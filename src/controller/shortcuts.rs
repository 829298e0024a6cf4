//! Keyboard shortcuts

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Session action a shortcut can trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShortcutAction {
    StartRecording,
    StopRecording,
    Upload,
    CancelUpload,
}

/// A key together with its modifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPress {
    pub key: String,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub meta: bool,
}

impl KeyPress {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            alt: false,
            shift: false,
            ctrl: false,
            meta: false,
        }
    }

    pub fn alt_shift(key: &str) -> Self {
        Self {
            alt: true,
            shift: true,
            ..Self::new(key)
        }
    }

    /// Keys compare case-insensitively; Shift changes the reported case
    fn normalized(&self) -> Self {
        Self {
            key: self.key.to_lowercase(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShortcutMap {
    bindings: HashMap<KeyPress, ShortcutAction>,
}

impl Default for ShortcutMap {
    fn default() -> Self {
        let mut map = Self::empty();
        map.bind(KeyPress::alt_shift("r"), ShortcutAction::StartRecording);
        map.bind(KeyPress::alt_shift("s"), ShortcutAction::StopRecording);
        map.bind(KeyPress::alt_shift("u"), ShortcutAction::Upload);
        map.bind(KeyPress::alt_shift("c"), ShortcutAction::CancelUpload);
        map
    }
}

impl ShortcutMap {
    pub fn empty() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    /// Bind `key`, replacing any previous binding of the same combination
    pub fn bind(&mut self, key: KeyPress, action: ShortcutAction) {
        self.bindings.insert(key.normalized(), action);
    }

    pub fn resolve(&self, key: &KeyPress) -> Option<ShortcutAction> {
        self.bindings.get(&key.normalized()).copied()
    }
}
