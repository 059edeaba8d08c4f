//! # Core Engine Module
//!
//! Shared configuration for the batching engine and its demo application.
//!
//! ## Organization
//!
//! - **Config**: engine, display-list and batching configuration
//! - **Foundation**: low-level utilities (math, handles, logging)

pub mod config;

// Re-export foundation modules for convenience
pub use crate::foundation;

// Re-export commonly used config types
pub use config::{
    ApplicationConfig,
    BatchingConfig,
    DisplayListConfig,
    EngineConfig,
    TransparencySortPolicy,
    Config,
    ConfigError,
};
