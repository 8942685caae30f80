//! Training and evaluation loops for DDSP vocoders.
//!
//! This crate provides:
//! - The supervised training loop with periodic checkpointing and validation
//! - The validation pass with real-time-factor measurement
//! - The experiment directory logger ([`Saver`])
//! - Checkpoint save/restore
//! - MLX glue behind the `mlx` feature
//!
//! The loops are generic over the collaborator traits in [`ddsp_core`], so the
//! model, loss and data loader are supplied by the caller.

#![warn(missing_docs)]

pub mod checkpoint;
pub mod evaluation;
pub mod metrics;
#[cfg(feature = "mlx")]
pub mod mlx;
pub mod saver;
pub mod state;
pub mod training_loop;

pub use checkpoint::*;
pub use evaluation::*;
pub use metrics::*;
pub use saver::*;
pub use state::*;
pub use training_loop::*;

pub use ddsp_core::{DdspError, Result};
