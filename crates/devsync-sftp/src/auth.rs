//! Login name and credential resolution
//!
//! ## Resolution order
//!
//! 1. Explicit password from the target
//! 2. Explicit private key file from the target
//! 3. Password stored in the system keyring (service `devsync`,
//!    account `user@host`)
//! 4. First existing default key: `~/.ssh/id_ed25519`, `~/.ssh/id_ecdsa`,
//!    `~/.ssh/id_rsa`
//!
//! If nothing applies the dial fails with `DialError::MissingCredential`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use devsync_core::ports::remote::{ConnectParams, Credential, DialError};
use tracing::{debug, info, warn};

/// Keyring service name for stored remote passwords
const KEYRING_SERVICE: &str = "devsync";

/// Default private key file names, in order of preference
const DEFAULT_KEYS: &[&str] = &["id_ed25519", "id_ecdsa", "id_rsa"];

/// How the SSH session will authenticate
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Password authentication
    Password(String),
    /// Public key authentication with the key stored at this path
    Key(PathBuf),
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Password(_) => f.write_str("Password(..)"),
            AuthMethod::Key(path) => f.debug_tuple("Key").field(path).finish(),
        }
    }
}

// ============================================================================
// KeyringPasswordStore
// ============================================================================

/// Stores remote passwords in the system keyring
///
/// Entries live under the service name "devsync" with `user@host` as the
/// account, so one password is kept per login and host.
pub struct KeyringPasswordStore;

impl KeyringPasswordStore {
    /// Stores a password for `account`
    pub fn store(account: &str, password: &str) -> Result<()> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, account)
            .context("Failed to create keyring entry")?;

        entry
            .set_password(password)
            .context("Failed to store password in keyring")?;

        debug!(account, "Stored password in keyring");
        Ok(())
    }

    /// Loads the password for `account`, `None` if nothing is stored
    pub fn load(account: &str) -> Result<Option<String>> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, account)
            .context("Failed to create keyring entry")?;

        match entry.get_password() {
            Ok(password) => {
                debug!(account, "Loaded password from keyring");
                Ok(Some(password))
            }
            Err(keyring::Error::NoEntry) => {
                debug!(account, "No password found in keyring");
                Ok(None)
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to read from keyring")),
        }
    }

    /// Removes the password for `account`; a missing entry is not an error
    pub fn clear(account: &str) -> Result<()> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, account)
            .context("Failed to create keyring entry")?;

        match entry.delete_credential() {
            Ok(()) => {
                info!(account, "Cleared password from keyring");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => {
                debug!(account, "No password to clear");
                Ok(())
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to delete from keyring")),
        }
    }
}

/// Keyring account name for a login on a host
pub fn keyring_account(user: &str, host: &str) -> String {
    format!("{user}@{host}")
}

// ============================================================================
// Resolution
// ============================================================================

/// Returns `user`, or the current OS user when it is empty
///
/// # Errors
/// `DialError::MissingCredential` if neither is available.
pub fn resolve_user(user: &str) -> Result<String, DialError> {
    resolve_user_with(user, |name| std::env::var(name).ok())
}

fn resolve_user_with(
    user: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, DialError> {
    if !user.is_empty() {
        return Ok(user.to_string());
    }
    ["USER", "USERNAME"]
        .iter()
        .filter_map(|name| lookup(name))
        .find(|value| !value.is_empty())
        .ok_or_else(|| {
            DialError::MissingCredential("no remote user given and no current user found".into())
        })
}

/// Picks the authentication method for a dial
///
/// # Errors
/// `DialError::MissingCredential` if no password or key can be found.
pub fn resolve_auth(params: &ConnectParams, user: &str) -> Result<AuthMethod, DialError> {
    match &params.credential {
        Credential::Password(password) => Ok(AuthMethod::Password(password.clone())),
        Credential::PrivateKey(path) => Ok(AuthMethod::Key(path.clone())),
        Credential::Auto => {
            let account = keyring_account(user, &params.host);
            match KeyringPasswordStore::load(&account) {
                Ok(Some(password)) => return Ok(AuthMethod::Password(password)),
                Ok(None) => {}
                Err(e) => warn!(account = %account, error = %e, "Keyring lookup failed"),
            }

            dirs::home_dir()
                .and_then(|home| default_identity(&home))
                .map(AuthMethod::Key)
                .ok_or_else(|| {
                    DialError::MissingCredential(format!(
                        "no password for {account} and no private key in ~/.ssh"
                    ))
                })
        }
    }
}

/// First existing default private key under `home/.ssh`
pub fn default_identity(home: &Path) -> Option<PathBuf> {
    let ssh_dir = home.join(".ssh");
    DEFAULT_KEYS
        .iter()
        .map(|name| ssh_dir.join(name))
        .find(|path| path.is_file())
}
