//! # Unified Configuration System
//!
//! All configuration structures of the batching engine in one place. Each
//! type is serializable (TOML, RON), has sensible defaults and a `validate`
//! method, and uses builder-style `with_*` setters.
//!
//! ## Configuration Categories
//!
//! - **Engine Config**: logging and debug behavior
//! - **Display List Config**: native display-list budget and context count
//! - **Batching Config**: transparency sorting and batch reordering policy
//! - **Application Config**: top level bundle loaded by applications

use serde::{Serialize, Deserialize};

// Re-export from the config module for convenience
pub use crate::config::{Config, ConfigError, ConfigFormat};

/// Upper bound on rendering contexts, fixed by the width of the context mask
pub const MAX_CONTEXTS: u8 = 64;

/// # Engine Configuration
///
/// Core engine behavior: logging and debug features.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Log filter for the engine (`env_logger` syntax)
    pub log_level: String,
    /// Whether to enable debug features
    pub debug_mode: bool,
}

impl EngineConfig {
    /// Create a new engine configuration
    pub fn new() -> Self {
        Self {
            log_level: "info".to_string(),
            debug_mode: cfg!(debug_assertions),
        }
    }

    /// Set log level
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Enable debug mode
    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug_mode = enabled;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// # Display List Configuration
///
/// Budget for native display-list identifiers and the number of rendering
/// contexts that may share batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayListConfig {
    /// Whether batches may compile display lists at all
    pub enabled: bool,
    /// Maximum number of display-list ids outstanding at once
    pub max_display_lists: u32,
    /// Number of rendering contexts (canvases) sharing the batches
    pub max_contexts: u8,
}

impl DisplayListConfig {
    /// Create a new display-list configuration
    pub fn new() -> Self {
        Self {
            enabled: true,
            max_display_lists: 4096,
            max_contexts: 1,
        }
    }

    /// Enable or disable display lists
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the display-list budget
    pub fn with_max_display_lists(mut self, max: u32) -> Self {
        self.max_display_lists = max;
        self
    }

    /// Set the number of rendering contexts
    pub fn with_max_contexts(mut self, contexts: u8) -> Self {
        self.max_contexts = contexts;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_contexts == 0 {
            return Err("At least one rendering context is required".to_string());
        }
        if self.max_contexts > MAX_CONTEXTS {
            return Err(format!("At most {} rendering contexts are supported", MAX_CONTEXTS));
        }
        if self.enabled && self.max_display_lists == 0 {
            return Err("Display lists are enabled but the budget is zero".to_string());
        }
        Ok(())
    }
}

impl Default for DisplayListConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// How transparent geometry is ordered at render time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransparencySortPolicy {
    /// Transparent batches render in global batch order
    None,
    /// Every transparent atom is depth-sorted individually
    Geometry,
}

impl Default for TransparencySortPolicy {
    fn default() -> Self {
        TransparencySortPolicy::None
    }
}

/// # Batching Configuration
///
/// Policies of the batching engine itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Display-list settings
    pub display_lists: DisplayListConfig,
    /// Transparency sorting policy
    pub transparency_sort: TransparencySortPolicy,
    /// Whether batches whose material changed search for an equivalent neighbor
    pub reorder_on_material_change: bool,
    /// Pre-allocated batch arena capacity
    pub initial_molecule_capacity: usize,
    /// Pre-allocated atom arena capacity
    pub initial_atom_capacity: usize,
}

impl BatchingConfig {
    /// Create a new batching configuration
    pub fn new() -> Self {
        Self {
            display_lists: DisplayListConfig::default(),
            transparency_sort: TransparencySortPolicy::default(),
            reorder_on_material_change: true,
            initial_molecule_capacity: 64,
            initial_atom_capacity: 256,
        }
    }

    /// Set display-list configuration
    pub fn with_display_lists(mut self, display_lists: DisplayListConfig) -> Self {
        self.display_lists = display_lists;
        self
    }

    /// Set the transparency sorting policy
    pub fn with_transparency_sort(mut self, policy: TransparencySortPolicy) -> Self {
        self.transparency_sort = policy;
        self
    }

    /// Enable or disable material-equivalence reordering
    pub fn with_reordering(mut self, enabled: bool) -> Self {
        self.reorder_on_material_change = enabled;
        self
    }

    /// Set arena capacities
    pub fn with_capacity(mut self, molecules: usize, atoms: usize) -> Self {
        self.initial_molecule_capacity = molecules;
        self.initial_atom_capacity = atoms;
        self
    }

    /// Whether transparent atoms are sorted individually
    pub fn sorts_geometry(&self) -> bool {
        self.transparency_sort == TransparencySortPolicy::Geometry
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        self.display_lists.validate()
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// # Complete Application Configuration
///
/// Top-level configuration that encompasses all engine subsystems.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Engine core configuration
    pub engine: EngineConfig,
    /// Batching system configuration
    pub batching: BatchingConfig,
}

impl ApplicationConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), String> {
        self.batching.validate()
    }
}

impl Config for ApplicationConfig {}
