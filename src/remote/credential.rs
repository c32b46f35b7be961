//! Private key material and the login identity it authenticates.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::files;

/// Errors raised while loading a credential.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CredentialError {
    /// The key file could not be read.
    #[error("failed to read private key {path}: {message}")]
    Read {
        /// Path of the key file.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// The file does not look like PEM-encoded private key material.
    #[error("{path} does not contain a PEM-encoded private key")]
    NotPem {
        /// Path of the key file.
        path: Utf8PathBuf,
    },
}

/// Key material plus remote login identity. Read once, never mutated.
#[derive(Clone, Eq, PartialEq)]
pub struct Credential {
    user: String,
    private_key_pem: String,
}

impl Credential {
    /// Wraps PEM key material for `user`.
    #[must_use]
    pub fn new(user: impl Into<String>, private_key_pem: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            private_key_pem: private_key_pem.into(),
        }
    }

    /// Reads the PEM file at `path` for `user`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Read`] when the file cannot be read and
    /// [`CredentialError::NotPem`] when it holds no PEM private key block.
    pub fn load(user: impl Into<String>, path: &Utf8Path) -> Result<Self, CredentialError> {
        let pem = files::read_to_string(path).map_err(|err| CredentialError::Read {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        if !looks_like_pem_private_key(&pem) {
            return Err(CredentialError::NotPem {
                path: path.to_path_buf(),
            });
        }
        Ok(Self::new(user, pem))
    }

    /// Remote login name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// PEM-encoded private key.
    #[must_use]
    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

fn looks_like_pem_private_key(text: &str) -> bool {
    text.lines().any(|line| {
        let trimmed = line.trim();
        trimmed.starts_with("-----BEGIN ") && trimmed.ends_with("PRIVATE KEY-----")
    })
}
