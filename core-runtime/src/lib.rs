//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the coaching platform core:
//! - Logging and tracing initialization
//! - Runtime error types
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the other core modules depend
//! on. It establishes the logging conventions used throughout the system;
//! every other crate emits structured `tracing` events and relies on the
//! subscriber configured here.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
