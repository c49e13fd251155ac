// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use once_cell::sync::Lazy;
use rustls::{
    ClientConfig, RootCertStore, ServerConfig as RustlsServerConfig,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    pki_types::{CertificateDer, ServerName, UnixTime},
};
use thiserror::Error;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::cfg::{
    config::TlsConfig,
    enums::{TlsVerifyPolicy, TlsVerifySentinel},
};

/// `rustls` 0.23 requires a process-level default `CryptoProvider` before any
/// `ClientConfig`/`ServerConfig` builder runs; install it lazily the first
/// time this module is touched rather than pushing that ceremony onto every
/// caller.
static CRYPTO_PROVIDER: Lazy<()> = Lazy::new(|| {
    let _ = rustls::crypto::ring::default_provider().install_default();
});

#[derive(Debug, Error)]
pub enum TlsSetupError {
    #[error("failed to read certificate bundle at {path}: {source}")]
    ReadBundle {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no valid certificates found in bundle at {0}")]
    EmptyBundle(String),
    #[error("failed to build TLS client config: {0}")]
    Client(#[from] rustls::Error),
    #[error("certificate/key pair required for server TLS but missing from config")]
    MissingServerIdentity,
    #[error("failed to read private key at {0}")]
    InvalidKey(String),
}

/// Builds a `tokio_rustls::TlsConnector` from a `wss://` client's TLS
/// configuration, honoring the `"SYSTEM"` / `"NONE"` / path sentinel rules of
/// [`TlsVerifyPolicy`].
pub fn build_client_connector(cfg: Option<&TlsConfig>) -> Result<TlsConnector, TlsSetupError> {
    Lazy::force(&CRYPTO_PROVIDER);
    let policy = cfg.map(|c| &c.ca).cloned().unwrap_or_default();

    let client_config = match policy {
        TlsVerifyPolicy::Sentinel(TlsVerifySentinel::Disabled) => ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth(),
        TlsVerifyPolicy::Sentinel(TlsVerifySentinel::SystemDefault) => {
            let mut roots = RootCertStore::empty();
            for cert in rustls_native_certs::load_native_certs().certs {
                // Skip certificates the platform store could not decode
                // rather than failing the whole connector.
                let _ = roots.add(cert);
            }
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        }
        TlsVerifyPolicy::CustomBundle(path) => {
            let mut roots = RootCertStore::empty();
            let certs = load_certs(&path)?;
            if certs.is_empty() {
                return Err(TlsSetupError::EmptyBundle(path));
            }
            for cert in certs {
                roots
                    .add(cert)
                    .map_err(|_| TlsSetupError::EmptyBundle(path.clone()))?;
            }
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        }
    };

    Ok(TlsConnector::from(Arc::new(client_config)))
}

/// Builds a `tokio_rustls::TlsAcceptor` for `wss://`-serving listeners from
/// the server's certificate/key pair.
pub fn build_server_acceptor(cfg: &TlsConfig) -> Result<TlsAcceptor, TlsSetupError> {
    Lazy::force(&CRYPTO_PROVIDER);
    let cert_path = cfg
        .cert_file
        .as_ref()
        .ok_or(TlsSetupError::MissingServerIdentity)?;
    let key_path = cfg
        .key_file
        .as_ref()
        .ok_or(TlsSetupError::MissingServerIdentity)?;

    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let server_config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsSetupError> {
    let bytes = std::fs::read(path).map_err(|source| TlsSetupError::ReadBundle {
        path: path.to_string(),
        source,
    })?;
    let mut reader = std::io::BufReader::new(bytes.as_slice());
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsSetupError::ReadBundle {
            path: path.to_string(),
            source,
        })
}

fn load_key(
    path: &str,
) -> Result<rustls_pki_types::PrivateKeyDer<'static>, TlsSetupError> {
    let bytes = std::fs::read(path).map_err(|source| TlsSetupError::ReadBundle {
        path: path.to_string(),
        source,
    })?;
    let mut reader = std::io::BufReader::new(bytes.as_slice());
    rustls_pemfile::private_key(&mut reader)
        .map_err(|_| TlsSetupError::InvalidKey(path.to_string()))?
        .ok_or_else(|| TlsSetupError::InvalidKey(path.to_string()))
}

/// Backs [`TlsVerifySentinel::Disabled`]: accepts any certificate chain.
/// Only reachable when a config file explicitly opts out of verification —
/// never the default.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
