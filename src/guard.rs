//! Navigation-away guard
//!
//! Armed while a recording or an upload is in flight. The host asks it
//! before the page unloads.

use crate::i18n::Translator;
use crate::recorder::state::SessionState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const LEAVE_WARNING: &str = "A recording is in progress. Leaving this page will discard it.";

#[derive(Debug, Clone, Default)]
pub struct NavigationGuard {
    armed: Arc<AtomicBool>,
}

impl NavigationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self) {
        if !self.armed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Navigation guard armed");
        }
    }

    pub fn disarm(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            tracing::debug!("Navigation guard disarmed");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Arm or disarm to match `state`
    pub fn follow(&self, state: &SessionState) {
        if state.is_in_flight() {
            self.arm();
        } else {
            self.disarm();
        }
    }

    /// Message to show when the user tries to leave, if leaving should be confirmed
    pub fn confirm_message(&self, translator: &Translator) -> Option<String> {
        self.is_armed()
            .then(|| translator.translate(LEAVE_WARNING).into_owned())
    }
}
