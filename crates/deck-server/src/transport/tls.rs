//! TLS setup for the gateway and control listeners.

use deck_core::{DeckError, DeckResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Load a PEM certificate chain and private key into a TLS acceptor.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> DeckResult<TlsAcceptor> {
    let config = load_tls_config(cert_path, key_path)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Load TLS certificate and key from PEM files, returning a rustls ServerConfig.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> DeckResult<rustls::ServerConfig> {
    let cert_pem = std::fs::read(cert_path).map_err(|e| {
        DeckError::Config(format!("cannot read cert {}: {e}", cert_path.display()))
    })?;
    let key_pem = std::fs::read(key_path)
        .map_err(|e| DeckError::Config(format!("cannot read key {}: {e}", key_path.display())))?;

    let certs: Vec<rustls::pki_types::CertificateDer<'static>> =
        rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DeckError::Config(format!("invalid certificate PEM: {e}")))?;
    if certs.is_empty() {
        return Err(DeckError::Config(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| DeckError::Config(format!("invalid key PEM: {e}")))?
        .ok_or_else(|| DeckError::Config("no private key found in PEM".into()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut tls_config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DeckError::Config(format!("TLS protocol setup failed: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| DeckError::Config(format!("TLS certificate rejected: {e}")))?;

    // Both listeners speak HTTP/1.1 (WebSocket upgrade and control requests).
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(tls_config)
}

/// Generate a self-signed certificate for development use under `dir`.
///
/// Returns the written `(cert, key)` paths.
pub fn generate_self_signed_cert(dir: &Path) -> DeckResult<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)?;

    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");

    let mut params = rcgen::CertificateParams::new(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ])
    .map_err(cert_error)?;
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "deck-server dev cert");

    let key_pair = rcgen::KeyPair::generate().map_err(cert_error)?;
    let cert = params.self_signed(&key_pair).map_err(cert_error)?;

    std::fs::write(&cert_path, cert.pem())?;
    std::fs::write(&key_path, key_pair.serialize_pem())?;

    Ok((cert_path, key_path))
}

fn cert_error(e: rcgen::Error) -> DeckError {
    DeckError::Config(format!("certificate generation failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_cert_loads() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = generate_self_signed_cert(dir.path()).unwrap();
        assert!(cert.exists());
        assert!(key.exists());

        let config = load_tls_config(&cert, &key).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn missing_files_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_tls_config(&dir.path().join("nope.pem"), &dir.path().join("nope.key"))
            .unwrap_err();
        assert!(matches!(err, DeckError::Config(_)));
    }

    #[test]
    fn empty_cert_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "").unwrap();
        std::fs::write(&key, "").unwrap();
        assert!(load_tls_config(&cert, &key).is_err());
    }
}
