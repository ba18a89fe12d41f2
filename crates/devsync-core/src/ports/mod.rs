//! Port definitions (hexagonal architecture interfaces)
//!
//! - [`RemoteFileService`] - Primitive remote file operations
//! - [`RemoteConnector`] - Dials authenticated [`RemoteFileService`] sessions

pub mod remote;

pub use remote::{
    ConnectParams, Credential, DialError, RemoteConnector, RemoteEntry, RemoteError,
    RemoteFileService, RemoteStat, RemoteWriter,
};
