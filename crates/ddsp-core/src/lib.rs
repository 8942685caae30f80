//! Core types, traits, and configuration for the DDSP vocoder trainer.
//!
//! This crate provides the foundational abstractions used by the training
//! driver, including:
//!
//! - Collaborator traits for the model, loss, optimizer and data loader
//! - Configuration types and the closed model factory
//! - Common type definitions (Dtype, Device, ForwardMode, etc.)
//! - Error handling infrastructure
//! - A host-memory tensor for batch assembly and tests, plus an
//!   [`AudioTensor`] impl for `mlx_rs::Array` behind the `mlx` feature

#![warn(missing_docs)]

mod batch;
mod config;
mod error;
mod factory;
mod host;
#[cfg(feature = "mlx")]
mod mlx;
mod traits;
mod types;

pub use batch::Batch;
pub use config::*;
pub use error::*;
pub use factory::VocoderFactory;
pub use host::HostTensor;
pub use traits::*;
pub use types::*;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::batch::Batch;
    pub use crate::config::*;
    pub use crate::error::{DdspError, Result};
    pub use crate::factory::VocoderFactory;
    pub use crate::traits::*;
    pub use crate::types::*;
}
