//! # lauscher-observability
//!
//! Structured Logging (Text oder JSON) via tracing-subscriber fuer
//! Lauscher-Anwendungen und Tests.

pub mod logging;

pub use logging::{filter_ausdruck, logging_initialisieren, log_level_gueltig, LogFormat};
