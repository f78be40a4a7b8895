//! Credential resolution
//!
//! Builds the ordered list of authentication methods offered to every host:
//! well-known private keys first, then the host's own password if it has one.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::keys::{PrivateKey, load_secret_key};
use tracing::debug;

use crate::host::Host;

/// Private key files tried under `~/.ssh`, in order
pub const DEFAULT_KEY_FILES: [&str; 3] = ["id_ecdsa", "id_rsa", "id_dsa"];

/// One authentication method offered during the handshake
#[derive(Clone)]
pub enum AuthMethod {
    /// Public-key auth with a loaded private key
    PublicKey {
        /// File the key was loaded from
        path: PathBuf,
        /// Decoded key
        key: Arc<PrivateKey>,
    },
    /// Password auth
    Password(String),
}

impl AuthMethod {
    /// Short method name as used on the wire
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::PublicKey { .. } => "publickey",
            AuthMethod::Password(_) => "password",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::PublicKey { path, .. } => {
                f.debug_tuple("PublicKey").field(&path.display()).finish()
            }
            AuthMethod::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

/// Ordered authentication methods
///
/// The base set is built once per run and shared read-only. Each host gets its
/// own copy via [`CredentialSet::for_host`] before a password is appended.
#[derive(Debug, Clone, Default)]
pub struct CredentialSet {
    methods: Vec<AuthMethod>,
}

impl CredentialSet {
    /// Empty set; hosts without a password will fail authentication
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the default key files from the user's home directory
    ///
    /// Missing home directory yields an empty set.
    #[must_use]
    pub fn discover() -> Self {
        match dirs::home_dir() {
            Some(home) => Self::from_dir(&home.join(".ssh")),
            None => {
                debug!("no home directory, skipping key discovery");
                Self::empty()
            }
        }
    }

    /// Load [`DEFAULT_KEY_FILES`] from `dir`, skipping missing or unparsable files
    #[must_use]
    pub fn from_dir(dir: &Path) -> Self {
        let paths = DEFAULT_KEY_FILES.iter().map(|name| dir.join(name));
        Self::from_key_files(paths)
    }

    /// Load the given key files in order, skipping any that fail
    pub fn from_key_files(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut methods = Vec::new();
        for path in paths {
            match load_key(&path) {
                Ok(key) => {
                    debug!(path = %path.display(), "loaded private key");
                    methods.push(AuthMethod::PublicKey {
                        path,
                        key: Arc::new(key),
                    });
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping private key");
                }
            }
        }
        Self { methods }
    }

    /// Append a method
    #[must_use]
    pub fn with_method(mut self, method: AuthMethod) -> Self {
        self.methods.push(method);
        self
    }

    /// Per-host copy with the host's password appended when declared
    #[must_use]
    pub fn for_host(&self, host: &Host) -> Self {
        let mut methods = self.methods.clone();
        if let Some(password) = &host.password {
            methods.push(AuthMethod::Password(password.clone()));
        }
        Self { methods }
    }

    /// Methods in offer order
    #[must_use]
    pub fn methods(&self) -> &[AuthMethod] {
        &self.methods
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Key loading errors, logged and never fatal
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key file not found")]
    NotFound,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to parse key: {0}")]
    Parse(String),
}

fn load_key(path: &Path) -> Result<PrivateKey, KeyError> {
    match std::fs::metadata(path) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(KeyError::NotFound),
        Err(e) => return Err(KeyError::Io(e)),
    }
    load_secret_key(path, None).map_err(|e| KeyError::Parse(e.to_string()))
}
