//! Core AI engine components
//!
//! This module contains the central orchestration logic for the assistant.

mod chat;

pub use chat::{ChatEngine, ChatError, FrameStream};
