//! Domain types
//!
//! - [`errors`] - Domain error taxonomy
//! - [`path`] - Pure local-to-remote path mapping

pub mod errors;
pub mod path;

pub use errors::DomainError;
pub use path::PathMapper;
