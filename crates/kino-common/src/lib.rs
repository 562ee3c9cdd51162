//! Kino-Common: Shared types, constants, and utilities.
//!
//! This crate provides common functionality used across kino:
//!
//! - **Typed IDs**: [`SessionId`], a UUID wrapper for transcoding sessions
//! - **Core Types**: encode [`Profile`]s and the [`HardwareAccel`] backend
//! - **Path Utilities**: media-root confinement of client paths
//! - **Error Handling**: Common error types and result aliases
//!
//! # Examples
//!
//! ```
//! use kino_common::{Profile, SessionId};
//!
//! let id = SessionId::new();
//! assert_eq!(id.to_string().parse::<SessionId>().unwrap(), id);
//!
//! assert!(Profile::passthrough().is_passthrough());
//! ```

pub mod error;
pub mod ids;
pub mod paths;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
