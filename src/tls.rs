//! TLS configuration for the portal.
//!
//! Loads a PEM certificate chain and private key from disk and builds a rustls
//! server config. The portal sets session cookies, so it is expected to run
//! with TLS unless it sits behind a terminating proxy.

use anyhow::{anyhow, Context, Result};
use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct TlsPaths {
    cert: PathBuf,
    key: PathBuf,
}

impl TlsPaths {
    #[must_use]
    pub fn from_cli(cert: String, key: String) -> Self {
        Self {
            cert: PathBuf::from(cert),
            key: PathBuf::from(key),
        }
    }

    #[must_use]
    pub fn cert_path(&self) -> &Path {
        &self.cert
    }

    #[must_use]
    pub fn key_path(&self) -> &Path {
        &self.key
    }
}

/// Build the rustls server configuration.
///
/// # Errors
/// Returns an error if the certificate or key cannot be read or parsed, or do
/// not match.
pub fn load_server_config(paths: &TlsPaths) -> Result<ServerConfig> {
    let cert_chain = load_cert_chain(paths.cert_path())?;
    let key = load_private_key(paths.key_path())?;

    let mut config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .context("Failed to select TLS protocol versions")?
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .context("Failed to build TLS server config")?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(config)
}

fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open TLS certificate: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let certs = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read TLS certificate: {}", path.display()))?;
    if certs.is_empty() {
        return Err(anyhow!("TLS certificate is empty: {}", path.display()));
    }
    Ok(certs)
}

// PKCS#8, SEC1 and PKCS#1 keys are all accepted.
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open TLS key: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    private_key(&mut reader)
        .with_context(|| format!("Failed to read TLS key: {}", path.display()))?
        .ok_or_else(|| anyhow!("TLS private key not found: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_pair(dir: &TempDir) -> TlsPaths {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("self-signed certificate");
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        fs::write(&cert, certified.cert.pem()).expect("write cert");
        fs::write(&key, certified.key_pair.serialize_pem()).expect("write key");
        TlsPaths::from_cli(
            cert.display().to_string(),
            key.display().to_string(),
        )
    }

    #[test]
    fn loads_self_signed_pair() {
        let dir = TempDir::new().expect("tempdir");
        let config = load_server_config(&write_pair(&dir)).expect("config");
        assert_eq!(
            config.alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
    }

    #[test]
    fn missing_files_fail() {
        let dir = TempDir::new().expect("tempdir");
        let paths = TlsPaths::from_cli(
            dir.path().join("cert.pem").display().to_string(),
            dir.path().join("key.pem").display().to_string(),
        );
        assert!(load_server_config(&paths).is_err());
        assert!(load_private_key(paths.key_path()).is_err());
    }

    #[test]
    fn empty_certificate_fails() {
        let dir = TempDir::new().expect("tempdir");
        let cert = dir.path().join("cert.pem");
        fs::write(&cert, "").expect("write cert");
        let err = load_cert_chain(&cert).unwrap_err();
        assert!(err.to_string().contains("TLS certificate is empty"));
    }

    #[test]
    fn key_file_without_key_fails() {
        let dir = TempDir::new().expect("tempdir");
        let paths = write_pair(&dir);
        let err = load_private_key(paths.cert_path()).unwrap_err();
        assert!(err.to_string().contains("TLS private key not found"));
    }
}
