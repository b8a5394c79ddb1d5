//! Corretora Settlement Engine - Main Library
//!
//! This crate provides the main library for the settlement engine binaries,
//! following Clean Architecture principles.
//!
//! ## Architecture
//!
//! - **bin_common**: Common utilities for binary executables (CLI, runners)
//! - **option_engine**: Core settlement logic (re-exported from workspace)
//!
//! ## Usage in Binaries
//!
//! ```rust
//! use corretora_engine::bin_common::{load_config_from_env, ConfigType};
//! use corretora_engine::option_engine::application::SettlementEngine;
//! ```

// Re-export workspace libraries for convenience
pub use option_engine;

// Binary common utilities
pub mod bin_common {
    //! Common utilities for binary executables
    //!
    //! Provides shared functionality for the presentation layer (binaries)
    //! following Clean Architecture principles.

    pub mod cli;
    pub mod runner;

    pub use cli::{load_config_from_env, parse_args, positional_args, resolve_config_path, ConfigType};
    pub use runner::{print_banner, print_shutdown, RunConfig};
}
