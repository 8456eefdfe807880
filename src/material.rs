//! Certificate material loading for resumed runs.
//!
//! A run that fails after the identity step leaves the certificate PEM and
//! private key on disk (written by the operator from the run record's
//! guidance). Resuming reads the pair back. This module centralises the path
//! expansion, file loading, and PEM sanity checks so configuration and CLI
//! paths stay consistent over time.

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::remote::expand_tilde;

/// Errors raised while loading certificate material from disk.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum MaterialError {
    /// Raised when a configured path is empty or only whitespace.
    #[error("{field} path must not be empty")]
    PathEmpty {
        /// Configuration field holding the offending path.
        field: &'static str,
    },
    /// Raised when a file resolves to empty or only whitespace.
    #[error("certificate material file `{path}` must not be empty")]
    FileEmpty {
        /// Expanded path of the empty file.
        path: String,
    },
    /// Raised when a file does not look like PEM text.
    #[error("certificate material file `{path}` is not PEM encoded")]
    NotPem {
        /// Expanded path of the rejected file.
        path: String,
    },
    /// Raised when reading a file fails.
    #[error("failed to read certificate material file `{path}`: {message}")]
    FileRead {
        /// Expanded path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

/// Certificate PEM and private key PEM loaded as a pair.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificatePair {
    /// PEM-encoded certificate.
    pub certificate_pem: String,
    /// PEM-encoded private key.
    pub private_key_pem: String,
}

/// Loads a certificate and private key pair from the given paths.
///
/// Paths support tilde expansion. Both files must exist, be non-empty, and
/// carry a PEM header; the returned content preserves the files verbatim.
///
/// # Errors
///
/// Returns [`MaterialError`] when a path is empty, a file cannot be read, or
/// its content fails the PEM sanity check.
pub fn load_certificate_pair(
    pem_file: &str,
    key_file: &str,
) -> Result<CertificatePair, MaterialError> {
    let certificate_pem = load_pem(pem_file, "certificate_pem_file")?;
    let private_key_pem = load_pem(key_file, "private_key_file")?;
    Ok(CertificatePair {
        certificate_pem,
        private_key_pem,
    })
}

fn load_pem(path: &str, field: &'static str) -> Result<String, MaterialError> {
    if path.trim().is_empty() {
        return Err(MaterialError::PathEmpty { field });
    }

    let expanded = expand_tilde(path);
    let content = read_to_string_ambient(&expanded).map_err(|message| MaterialError::FileRead {
        path: expanded.clone(),
        message,
    })?;

    if content.trim().is_empty() {
        return Err(MaterialError::FileEmpty { path: expanded });
    }
    if !content.trim_start().starts_with("-----BEGIN ") {
        return Err(MaterialError::NotPem { path: expanded });
    }

    Ok(content)
}

fn read_to_string_ambient(path: &str) -> Result<String, String> {
    let path_buf = Utf8Path::new(path);

    let (dir_path, file_path) = if path_buf.is_absolute() {
        let parent = path_buf
            .parent()
            .ok_or_else(|| format!("path has no parent directory: {path_buf}"))?;
        let file_name = path_buf
            .file_name()
            .ok_or_else(|| format!("path has no file name: {path_buf}"))?;
        (parent, Utf8Path::new(file_name))
    } else {
        (Utf8Path::new("."), path_buf)
    };

    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_path).map_err(|err| err.to_string())
}
