//! Core types shared by every certpilot crate: service errors, the secret
//! codec used for encryption at rest, engine configuration and time aliases.

pub mod config;
pub mod encryption;
pub mod error;
pub mod types;

pub use config::*;
pub use encryption::*;
pub use error::*;
pub use types::*;

// Re-export commonly used external crates
pub use anyhow;
pub use async_trait;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tokio;
pub use tracing;
pub use uuid;
