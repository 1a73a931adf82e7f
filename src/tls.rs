// Copyright 2026 the skiff authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! TLS context construction and session creation.
//!
//! The reactor drives sessions with `read_tls`/`write_tls` and the
//! `wants_read`/`wants_write` indicators; this module only builds the
//! client and server configurations and hands out per-connection sessions.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use log::error;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerConfig, ServerConnection};

use crate::config::Config;
use crate::error::{Error, Result};

const TEST_KEY_WARNING: &str = "\
***********************************************************\n\
* WARNING: A PRODUCTION PRIVATE KEY FILE WAS NOT FOUND!!! *\n\
*               !!!USING THROWAWAY PRIVATE KEY!!!         *\n\
***********************************************************";

/// Shared TLS configurations for every connection the reactor creates.
#[derive(Debug, Clone)]
pub struct TlsContext {
    server: Arc<ServerConfig>,
    client: Arc<ClientConfig>,
}

impl TlsContext {
    /// Builds client and server configurations from the named values.
    ///
    /// The server credentials come from `net_cert_file`/`net_key_file`;
    /// without them the test pair is loaded, and without that a throwaway
    /// self-signed pair is generated. Both fallbacks print and log a
    /// prominent warning. The client trusts the bundled web roots;
    /// verification policy beyond that stays inside the TLS library.
    pub fn from_config(cfg: &Config) -> Result<TlsContext> {
        let (certs, key) = match (&cfg.net_cert_file, &cfg.net_key_file) {
            (Some(cert_path), Some(key_path)) => load_pem_pair(cert_path, key_path)?,
            _ => {
                println!("{}", TEST_KEY_WARNING);
                error!("\n{}", TEST_KEY_WARNING);

                match (&cfg.net_cert_test_file, &cfg.net_key_test_file) {
                    (Some(cert_path), Some(key_path)) => load_pem_pair(cert_path, key_path)?,
                    _ => throwaway_pair()?,
                }
            }
        };

        let server = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let client = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(TlsContext {
            server: Arc::new(server),
            client: Arc::new(client),
        })
    }

    /// A context with an explicit client configuration, for callers that
    /// need their own trust policy (tests dial self-signed listeners this
    /// way).
    pub fn with_client_config(mut self, client: Arc<ClientConfig>) -> TlsContext {
        self.client = client;
        self
    }

    /// A context with an explicit server configuration.
    pub fn with_server_config(mut self, server: Arc<ServerConfig>) -> TlsContext {
        self.server = server;
        self
    }

    pub(crate) fn client_session(&self, hostname: &str) -> Result<ClientConnection> {
        let name = ServerName::try_from(hostname.to_string())
            .map_err(|_| Error::WrongParams)?;
        Ok(ClientConnection::new(self.client.clone(), name)?)
    }

    pub(crate) fn server_session(&self) -> Result<ServerConnection> {
        Ok(ServerConnection::new(self.server.clone())?)
    }
}

fn load_pem_pair(
    cert_path: &Path,
    key_path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let mut cert_reader = BufReader::new(File::open(cert_path)?);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        error!("no certificates in {}", cert_path.display());
        return Err(Error::WrongParams);
    }

    let mut key_reader = BufReader::new(File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?.ok_or_else(|| {
        error!("no private key in {}", key_path.display());
        Error::WrongParams
    })?;

    Ok((certs, key))
}

fn throwaway_pair() -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|_| Error::General)?;

    let cert = generated.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        generated.key_pair.serialize_der(),
    ));

    Ok((vec![cert], key))
}

#[cfg(test)]
mod test {
    use crate::config::Config;

    use super::TlsContext;

    #[test]
    fn context_without_credentials_generates_throwaway_pair() {
        let ctx = TlsContext::from_config(&Config::default()).unwrap();
        assert!(ctx.server_session().is_ok());
    }

    #[test]
    fn client_session_accepts_dns_and_ip_names() {
        let ctx = TlsContext::from_config(&Config::default()).unwrap();
        assert!(ctx.client_session("example.test").is_ok());
        assert!(ctx.client_session("127.0.0.1").is_ok());
    }
}
