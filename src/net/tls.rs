//! TLS identity loading for WebSocket servers

use tokio_native_tls::TlsAcceptor;
use tracing::info;

use crate::config::TlsConfig;
use crate::error::{NetframeError, Result};

/// Build an acceptor from a PKCS#12 archive on disk
pub fn load_acceptor(config: &TlsConfig) -> Result<TlsAcceptor> {
    let archive = std::fs::read(&config.certificate_path).map_err(|e| {
        NetframeError::Tls(format!(
            "failed to read certificate {}: {}",
            config.certificate_path.display(),
            e
        ))
    })?;
    let acceptor = acceptor_from_pkcs12(&archive, &config.certificate_password)?;
    info!(
        certificate = %config.certificate_path.display(),
        "TLS identity loaded"
    );
    Ok(acceptor)
}

/// Build an acceptor from PKCS#12 bytes
pub fn acceptor_from_pkcs12(archive: &[u8], password: &str) -> Result<TlsAcceptor> {
    let identity = native_tls::Identity::from_pkcs12(archive, password)
        .map_err(|e| NetframeError::Tls(format!("invalid PKCS#12 identity: {}", e)))?;
    let acceptor = native_tls::TlsAcceptor::new(identity)
        .map_err(|e| NetframeError::Tls(format!("failed to build TLS acceptor: {}", e)))?;
    Ok(TlsAcceptor::from(acceptor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_missing_certificate() {
        let config = TlsConfig {
            certificate_path: PathBuf::from("/nonexistent/netframe.p12"),
            certificate_password: String::new(),
        };
        assert!(matches!(load_acceptor(&config), Err(NetframeError::Tls(_))));
    }

    fn fixture(password: &str) -> TlsConfig {
        TlsConfig {
            certificate_path: PathBuf::from(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/tests/data/identity.p12"
            )),
            certificate_password: password.to_string(),
        }
    }

    #[test]
    fn test_load_identity() {
        assert!(load_acceptor(&fixture("netframe")).is_ok());
        assert!(matches!(
            load_acceptor(&fixture("wrong")),
            Err(NetframeError::Tls(_))
        ));
    }

    #[test]
    fn test_garbage_archive_rejected() {
        assert!(matches!(
            acceptor_from_pkcs12(b"not a pkcs12 archive", "secret"),
            Err(NetframeError::Tls(_))
        ));
    }
}
