#![forbid(unsafe_code)]

//! Relay between a browser client and a coding-assistant CLI subprocess.
//!
//! The core is [`session::ProcessSession`], which owns one child-process
//! lifecycle and its newline-delimited JSON protocol; [`relay`] exposes it
//! over a WebSocket.

pub mod config;
pub mod errors;
pub mod relay;
pub mod session;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
