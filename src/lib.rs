pub mod accumulator;
pub mod api;
pub mod constants;
pub mod engine;
pub mod extract;
pub mod filename;
pub mod hardening;
pub mod health;
pub mod logging;
pub mod main_helper;
pub mod redaction_layer;
pub mod registry;
pub mod session;
pub mod speech;
pub mod str_utils;
pub mod streaming;
pub mod token;
pub mod types;

pub use types::*;

pub use main_helper::{AppState, Args};
