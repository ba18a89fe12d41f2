//! devsync Core - Domain logic, configuration and port definitions
//!
//! This crate contains the pieces shared by every other devsync crate:
//! - **Configuration** - `SyncTarget` entries, remote target parsing, JSON config files
//! - **Domain** - local-to-remote path mapping and domain errors
//! - **Ports** - `RemoteFileService` / `RemoteConnector`, the capability set
//!   that remote adapters (SFTP) implement
//!
//! # Architecture
//!
//! Same ports & adapters split as the rest of the workspace: the sync engine
//! depends only on the traits in [`ports`], the SFTP crate provides the
//! concrete implementation.

pub mod config;
pub mod domain;
pub mod ports;
