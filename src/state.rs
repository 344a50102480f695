//! Application-wide UI state
//!
//! Owned by the application root and handed to whoever needs it. Every update
//! is atomic on its own; no update spans more than one field.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug)]
pub struct AppStore {
    chat_enabled: AtomicBool,
    data_version: AtomicU64,
    last_steps: Mutex<Option<String>>,
}

/// Point-in-time copy of the store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSnapshot {
    pub chat_enabled: bool,
    pub data_version: u64,
    pub last_steps: Option<String>,
}

impl AppStore {
    pub fn new() -> Self {
        Self {
            chat_enabled: AtomicBool::new(true),
            data_version: AtomicU64::new(0),
            last_steps: Mutex::new(None),
        }
    }

    pub fn is_chat_enabled(&self) -> bool {
        self.chat_enabled.load(Ordering::SeqCst)
    }

    /// Flip the chat feature flag and return the new value
    pub fn toggle_chat_enabled(&self) -> bool {
        !self.chat_enabled.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn data_version(&self) -> u64 {
        self.data_version.load(Ordering::SeqCst)
    }

    /// Signal that dashboard data should be refetched
    pub fn increment_data_version(&self) -> u64 {
        self.data_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn set_last_steps(&self, steps: Option<String>) {
        *self.last_steps.lock().unwrap_or_else(|e| e.into_inner()) = steps;
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            chat_enabled: self.is_chat_enabled(),
            data_version: self.data_version(),
            last_steps: self
                .last_steps
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}

impl Default for AppStore {
    fn default() -> Self {
        Self::new()
    }
}
