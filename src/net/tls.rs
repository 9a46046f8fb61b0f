//! TLS configuration and certificate loading.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;

/// File names inside the certificates directory.
pub const KEY_FILE: &str = "privkey.pem";
pub const CERT_FILE: &str = "fullchain.pem";

/// Key and certificate chain used by every secure listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
}

impl TlsPaths {
    /// `privkey.pem` and `fullchain.pem` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            key_path: dir.join(KEY_FILE),
            cert_path: dir.join(CERT_FILE),
        }
    }
}

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("{kind} file not found: {path:?}")]
    NotFound { kind: &'static str, path: PathBuf },

    #[error("could not read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),

    #[error("invalid TLS material: {0}")]
    Rustls(#[source] std::io::Error),
}

/// Check that both files exist and hold usable PEM material.
pub fn check_tls_material(paths: &TlsPaths) -> Result<(), TlsError> {
    if !paths.cert_path.is_file() {
        return Err(TlsError::NotFound {
            kind: "Certificate",
            path: paths.cert_path.clone(),
        });
    }
    if !paths.key_path.is_file() {
        return Err(TlsError::NotFound {
            kind: "Private key",
            path: paths.key_path.clone(),
        });
    }

    let mut certs = open(&paths.cert_path)?;
    let count = rustls_pemfile::certs(&mut certs)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: paths.cert_path.clone(),
            source,
        })?
        .len();
    if count == 0 {
        return Err(TlsError::NoCertificates(paths.cert_path.clone()));
    }

    let mut key = open(&paths.key_path)?;
    rustls_pemfile::private_key(&mut key)
        .map_err(|source| TlsError::Read {
            path: paths.key_path.clone(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(paths.key_path.clone()))?;

    tracing::debug!(cert = ?paths.cert_path, certificates = count, "TLS material checked");
    Ok(())
}

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(paths: &TlsPaths) -> Result<RustlsConfig, TlsError> {
    check_tls_material(paths)?;
    RustlsConfig::from_pem_file(&paths.cert_path, &paths.key_path)
        .await
        .map_err(TlsError::Rustls)
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_certificate_dir_layout() {
        let paths = TlsPaths::in_dir("/etc/certs");
        assert_eq!(paths.key_path, PathBuf::from("/etc/certs/privkey.pem"));
        assert_eq!(paths.cert_path, PathBuf::from("/etc/certs/fullchain.pem"));
    }

    #[test]
    fn missing_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_tls_material(&TlsPaths::in_dir(dir.path())).unwrap_err();
        assert!(matches!(err, TlsError::NotFound { kind: "Certificate", .. }));
    }

    #[test]
    fn empty_chain_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CERT_FILE), "not a pem file\n").unwrap();
        std::fs::write(dir.path().join(KEY_FILE), "").unwrap();

        let err = check_tls_material(&TlsPaths::in_dir(dir.path())).unwrap_err();
        assert!(matches!(err, TlsError::NoCertificates(_)));
    }

    #[tokio::test]
    async fn load_fails_without_material() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_tls_config(&TlsPaths::in_dir(dir.path())).await.is_err());
    }
}
