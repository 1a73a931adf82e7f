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

//! Host records and name resolution glue.

use std::net::{SocketAddr, ToSocketAddrs};

use log::{debug, error};

use crate::error::{Error, Result};
use crate::parser::Message;

/// Default port for plain HTTP.
pub const HTTP_DEFAULT_PORT: u16 = 80;
/// Default port for HTTP over TLS.
pub const HTTP_DEFAULT_TLS_PORT: u16 = 443;

/// A named upstream: hostname, port, TLS mode, optional label, and the
/// current resolved address set.
#[derive(Debug, Clone)]
pub struct Host {
    /// Hostname or address literal.
    pub hostname: String,
    /// Port as a decimal string.
    pub port: String,
    /// Dial with TLS.
    pub use_tls: bool,
    /// Optional label for list lookup.
    pub label: Option<String>,
    addrs: Vec<SocketAddr>,
}

impl Host {
    /// A host record with no resolution yet.
    pub fn new(hostname: impl Into<String>, port: u16, use_tls: bool) -> Self {
        Host {
            hostname: hostname.into(),
            port: port.to_string(),
            use_tls,
            label: None,
            addrs: Vec::new(),
        }
    }

    /// Re-resolves the hostname, replacing the address set on success.
    ///
    /// Failure is logged and keeps the previous addresses, so the host
    /// stays usable if an earlier resolution exists.
    pub fn resolve(&mut self) -> Result<()> {
        let port: u16 = self.port.parse().map_err(|_| Error::WrongParams)?;

        match (self.hostname.as_str(), port).to_socket_addrs() {
            Ok(addrs) => {
                self.addrs = addrs.collect();
                debug!(
                    "resolved host:{}:{} addrs:{}",
                    self.hostname,
                    self.port,
                    self.addrs.len()
                );
                Ok(())
            }
            Err(e) => {
                error!("resolve failed host:{}:{} error:{}", self.hostname, self.port, e);
                Err(Error::Io(e))
            }
        }
    }

    /// The preferred resolved address.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.addrs.first().copied()
    }

    /// True once an address set is held.
    pub fn is_resolved(&self) -> bool {
        !self.addrs.is_empty()
    }

    /// Derives the upstream host a parsed message points at.
    ///
    /// CONNECT requests carry `host:port` in the target; other requests use
    /// the Host header, with the URL scheme overriding the TLS choice and
    /// an explicit `:port` suffix overriding the default port (80, or 443
    /// when TLS applies). The returned record is resolved once; resolution
    /// failure still yields the record.
    pub fn from_msg(msg: &Message<'_>, use_tls: bool) -> Result<Host> {
        let url = msg.url.ok_or(Error::WrongParams)?;
        if url.is_empty() {
            return Err(Error::WrongParams);
        }

        if !msg.is_connect_method && msg.host.map_or(true, str::is_empty) {
            return Err(Error::WrongParams);
        }
        if msg.is_connect_method && use_tls {
            return Err(Error::WrongParams);
        }

        let mut use_tls = use_tls;
        let mut port = if msg.is_connect_method {
            HTTP_DEFAULT_PORT
        } else if use_tls {
            HTTP_DEFAULT_TLS_PORT
        } else {
            HTTP_DEFAULT_PORT
        };

        if !msg.is_connect_method {
            if url.len() >= 7 && url[..7].eq_ignore_ascii_case("http://") {
                port = HTTP_DEFAULT_PORT;
                use_tls = false;
            } else if url.len() >= 8 && url[..8].eq_ignore_ascii_case("https://") {
                port = HTTP_DEFAULT_TLS_PORT;
                use_tls = true;
            }
        }

        let named = if msg.is_connect_method {
            url
        } else {
            msg.host.unwrap_or_default()
        };

        let (hostname, port) = match named.split_once(':') {
            Some((name, port_str)) => {
                let parsed: u16 = port_str.parse().map_err(|_| Error::WrongParams)?;
                if parsed == 0 {
                    return Err(Error::WrongParams);
                }
                (name, parsed)
            }
            None => (named, port),
        };

        if hostname.is_empty() {
            return Err(Error::WrongParams);
        }

        let mut host = Host::new(hostname, port, use_tls);
        let _ = host.resolve();
        Ok(host)
    }
}

/// Ordered list of host records, refreshed periodically by an application
/// timer.
#[derive(Debug, Default)]
pub struct HostList {
    hosts: Vec<Host>,
}

impl HostList {
    /// An empty list.
    pub fn new() -> Self {
        HostList { hosts: Vec::new() }
    }

    /// Appends a host.
    pub fn push(&mut self, host: Host) {
        self.hosts.push(host);
    }

    /// Case-insensitive lookup by label.
    pub fn get(&self, label: &str) -> Option<&Host> {
        self.hosts.iter().find(|host| {
            host.label
                .as_deref()
                .is_some_and(|l| l.eq_ignore_ascii_case(label))
        })
    }

    /// Re-resolves every host, logging failures and keeping stale address
    /// sets where the lookup fails.
    pub fn refresh(&mut self) {
        for host in &mut self.hosts {
            let _ = host.resolve();
        }
    }

    /// Iterates the records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Host> {
        self.hosts.iter()
    }
}
