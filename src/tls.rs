//! TLS setup for the dispatcher listener and builder clients, loaded
//! from PEM files.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config::{TlsClientConfig, TlsServerConfig};

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no private key found in {path}")]
    MissingKey { path: PathBuf },
    #[error("no certificates found in {path}")]
    MissingCert { path: PathBuf },
    #[error("invalid server name {name}")]
    BadServerName { name: String },
    #[error(transparent)]
    Rustls(#[from] tokio_rustls::rustls::Error),
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::MissingCert {
            path: path.to_path_buf(),
        });
    }
    Ok(certs)
}

/// Build the acceptor for the dispatcher's listening socket.
pub fn server_acceptor(cfg: &TlsServerConfig) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(&cfg.cert_path)?;
    let key_file = File::open(&cfg.key_path).map_err(|source| TlsError::Read {
        path: cfg.key_path.clone(),
        source,
    })?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|source| TlsError::Read {
            path: cfg.key_path.clone(),
            source,
        })?
        .ok_or_else(|| TlsError::MissingKey {
            path: cfg.key_path.clone(),
        })?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build the connector a builder uses to reach the dispatcher, plus
/// the server name it must verify.
pub fn client_connector(
    cfg: &TlsClientConfig,
) -> Result<(TlsConnector, ServerName<'static>), TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(&cfg.ca_cert_path)? {
        roots.add(cert)?;
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let server_name =
        ServerName::try_from(cfg.server_name.clone()).map_err(|_| TlsError::BadServerName {
            name: cfg.server_name.clone(),
        })?;
    Ok((TlsConnector::from(Arc::new(config)), server_name))
}
