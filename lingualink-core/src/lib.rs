//! Core types shared by every Lingualink gateway crate.
//!
//! This crate carries the pieces the rest of the workspace agrees on:
//! the [`Error`] taxonomy surfaced to callers, the typed [`Settings`]
//! loaded at startup, the [`BackendConfig`] describing one upstream
//! inference endpoint, and the model-reply section parser.

mod config;
mod error;
mod response;

pub use config::{BackendConfig, Settings, STRATEGY_NAMES};
pub use error::{Error, Result};
pub use response::{parse_reply, RAW_TEXT_KEY};
