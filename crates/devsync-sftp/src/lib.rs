//! devsync SFTP - Remote file service over SSH
//!
//! Implements the `RemoteConnector` and `RemoteFileService` ports from
//! `devsync-core` on top of `russh` (SSH transport) and `russh-sftp`
//! (SFTP v3 client).
//!
//! ## Modules
//!
//! - [`auth`] - Login name and credential resolution, keyring storage
//! - [`client`] - SSH handshake and [`SftpConnector`]
//! - [`service`] - [`SftpService`] and error classification

pub mod auth;
pub mod client;
pub mod service;

pub use client::SftpConnector;
pub use service::SftpService;
