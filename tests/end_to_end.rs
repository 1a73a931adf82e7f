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

//! End-to-end scenarios over loopback: one endpoint hosts both halves of
//! every exchange, so each test exercises the full reactor, transport,
//! parser and pipeline path.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flate2::write::GzEncoder;
use flate2::Compression;

use skiff::{
    CloseCode, Config, Endpoint, Handler, Host, HttpId, Message, MsgId, OwnedMessage,
    PostState, TlsContext,
};

fn endpoint(cfg: Config) -> Endpoint {
    Endpoint::new(cfg).unwrap()
}

fn loopback_host(ep: &Endpoint, listener: HttpId) -> Host {
    let port = ep.local_addr(listener).unwrap().port();
    let mut host = Host::new("127.0.0.1", port, false);
    host.resolve().unwrap();
    host
}

fn spin<H: Handler, F: FnMut(&H) -> bool>(ep: &mut Endpoint, handler: &mut H, mut done: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done(handler) {
        assert!(Instant::now() < deadline, "scenario timed out");
        ep.poll(handler).unwrap();
    }
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn chunked(data: &[u8], chunk: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for part in data.chunks(chunk) {
        out.extend_from_slice(format!("{:x}\r\n", part.len()).as_bytes());
        out.extend_from_slice(part);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

/// Scenario: plain GET round-trip with a closing response.
#[derive(Default)]
struct RoundTrip {
    client: Option<HttpId>,
    sent: bool,
    request_seen: Option<(String, String, String)>,
    response: Option<(u16, Vec<u8>, bool)>,
    closed: Vec<(HttpId, CloseCode)>,
}

impl Handler for RoundTrip {
    fn on_established(&mut self, ep: &mut Endpoint, conn: HttpId) {
        if Some(conn) == self.client && !self.sent {
            self.sent = true;
            let msg = OwnedMessage {
                url: Some("/x".to_string()),
                host: Some("example.test".to_string()),
                user_agent: Some("UA".to_string()),
                accept_encoding: Some("gzip".to_string()),
                ..Default::default()
            };
            ep.request(conn, &msg).unwrap();
        }
    }

    fn on_request(
        &mut self,
        ep: &mut Endpoint,
        conn: HttpId,
        msg_id: Option<MsgId>,
        msg: &Message<'_>,
    ) {
        self.request_seen = Some((
            msg.url.unwrap_or("").to_string(),
            msg.host.unwrap_or("").to_string(),
            msg.user_agent.unwrap_or("").to_string(),
        ));

        let reply = OwnedMessage {
            status_code: 200,
            raw_body: b"hello".to_vec(),
            connection_close: true,
            ..Default::default()
        };
        let state = ep.respond(conn, msg_id.unwrap(), &reply).unwrap();
        assert_eq!(PostState::SentClose, state);
    }

    fn on_response(&mut self, _ep: &mut Endpoint, _conn: HttpId, msg: &Message<'_>) {
        self.response = Some((msg.status_code, msg.payload().to_vec(), msg.connection_close));
    }

    fn on_close(&mut self, _ep: &mut Endpoint, conn: HttpId, code: CloseCode) {
        self.closed.push((conn, code));
    }
}

#[test]
fn client_get_round_trip() {
    let mut ep = endpoint(Config::default());
    let listener = ep.listen(0, false).unwrap();
    let host = loopback_host(&ep, listener);

    let mut driver = RoundTrip::default();
    driver.client = Some(ep.connect(&host).unwrap());

    spin(&mut ep, &mut driver, |d| d.response.is_some());

    let (url, req_host, user_agent) = driver.request_seen.clone().unwrap();
    assert_eq!("/x", url);
    assert_eq!("example.test", req_host);
    assert_eq!("UA", user_agent);

    let (status, body, close) = driver.response.clone().unwrap();
    assert_eq!(200, status);
    assert_eq!(b"hello".to_vec(), body);
    assert!(close);

    // the client tears down with an orderly close
    let client = driver.client.unwrap();
    spin(&mut ep, &mut driver, |d| {
        d.closed.iter().any(|(conn, _)| *conn == client)
    });
    let (_, code) = driver
        .closed
        .iter()
        .find(|(conn, _)| *conn == client)
        .unwrap();
    assert_eq!(CloseCode::Success, *code);
}

/// Scenario: three pipelined requests answered out of order are
/// transmitted in arrival order.
#[derive(Default)]
struct Pipelined {
    client: Option<HttpId>,
    sent: bool,
    pending: Vec<(HttpId, MsgId, String)>,
    responses: Vec<Vec<u8>>,
}

impl Handler for Pipelined {
    fn on_established(&mut self, ep: &mut Endpoint, conn: HttpId) {
        if Some(conn) == self.client && !self.sent {
            self.sent = true;
            for path in ["/r1", "/r2", "/r3"] {
                let msg = OwnedMessage {
                    url: Some(path.to_string()),
                    host: Some("example.test".to_string()),
                    ..Default::default()
                };
                ep.request(conn, &msg).unwrap();
            }
        }
    }

    fn on_request(
        &mut self,
        ep: &mut Endpoint,
        conn: HttpId,
        msg_id: Option<MsgId>,
        msg: &Message<'_>,
    ) {
        self.pending
            .push((conn, msg_id.unwrap(), msg.url.unwrap_or("").to_string()));

        if self.pending.len() == 3 {
            // answer in the order r2, r3, r1
            for ndx in [1usize, 2, 0] {
                let (conn, msg_id, url) = self.pending[ndx].clone();
                let reply = OwnedMessage {
                    status_code: 200,
                    raw_body: url.trim_start_matches('/').as_bytes().to_vec(),
                    ..Default::default()
                };
                let state = ep.respond(conn, msg_id, &reply).unwrap();
                // nothing reaches the wire until r1 resolves
                assert_eq!(PostState::Default, state);
            }
        }
    }

    fn on_response(&mut self, _ep: &mut Endpoint, _conn: HttpId, msg: &Message<'_>) {
        self.responses.push(msg.payload().to_vec());
    }
}

#[test]
fn pipelined_replies_keep_arrival_order() {
    let mut ep = endpoint(Config::default());
    let listener = ep.listen(0, false).unwrap();
    let host = loopback_host(&ep, listener);

    let mut driver = Pipelined::default();
    driver.client = Some(ep.connect(&host).unwrap());

    spin(&mut ep, &mut driver, |d| d.responses.len() == 3);

    assert_eq!(
        vec![b"r1".to_vec(), b"r2".to_vec(), b"r3".to_vec()],
        driver.responses
    );
}

/// Scenario: chunked transfer plus gzip content encoding decode together.
#[derive(Default)]
struct ChunkedGzip {
    client: Option<HttpId>,
    sent: bool,
    payload: Option<Vec<u8>>,
}

impl Handler for ChunkedGzip {
    fn on_established(&mut self, ep: &mut Endpoint, conn: HttpId) {
        if Some(conn) == self.client && !self.sent {
            self.sent = true;
            let msg = OwnedMessage {
                url: Some("/json".to_string()),
                host: Some("example.test".to_string()),
                accept_encoding: Some("gzip".to_string()),
                ..Default::default()
            };
            ep.request(conn, &msg).unwrap();
        }
    }

    fn on_request(
        &mut self,
        ep: &mut Endpoint,
        conn: HttpId,
        msg_id: Option<MsgId>,
        _msg: &Message<'_>,
    ) {
        let reply = OwnedMessage {
            status_code: 200,
            content_encoding: Some("gzip".to_string()),
            transfer_encoding: Some("chunked".to_string()),
            transfer_encoding_chunked: true,
            raw_body: chunked(&gzip(b"{\"k\":1}"), 5),
            ..Default::default()
        };
        ep.respond(conn, msg_id.unwrap(), &reply).unwrap();
    }

    fn on_response(&mut self, _ep: &mut Endpoint, _conn: HttpId, msg: &Message<'_>) {
        assert!(msg.transfer_encoding_chunked);
        self.payload = Some(msg.payload().to_vec());
    }
}

#[test]
fn chunked_gzip_response_decodes() {
    let mut ep = endpoint(Config::default());
    let listener = ep.listen(0, false).unwrap();
    let host = loopback_host(&ep, listener);

    let mut driver = ChunkedGzip::default();
    driver.client = Some(ep.connect(&host).unwrap());

    spin(&mut ep, &mut driver, |d| d.payload.is_some());

    let payload = driver.payload.unwrap();
    assert_eq!(b"{\"k\":1}".to_vec(), payload);
    assert_eq!(7, payload.len());
}

/// Scenario: CONNECT tunneling through a forward proxy, with an origin
/// server behind it, raw legs on both outer sides.
#[derive(Default)]
struct Tunnel {
    upstream_port: u16,
    raw_client: Option<HttpId>,
    sent_connect: bool,
    sent_get: bool,
    client_buf: Vec<u8>,
    client_closed: bool,
    // proxy server conn <-> upstream raw conn
    to_upstream: HashMap<HttpId, HttpId>,
    to_proxy: HashMap<HttpId, HttpId>,
    // upstream raw conn -> (proxy conn, queue slot) awaiting the 200
    awaiting: HashMap<HttpId, (HttpId, MsgId)>,
}

impl Handler for Tunnel {
    fn on_established(&mut self, ep: &mut Endpoint, conn: HttpId) {
        if Some(conn) == self.raw_client && !self.sent_connect {
            self.sent_connect = true;
            let connect = format!(
                "CONNECT 127.0.0.1:{port} HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\n\r\n",
                port = self.upstream_port
            );
            ep.send_raw(conn, connect.as_bytes()).unwrap();
            return;
        }

        if let Some((proxy_conn, msg_id)) = self.awaiting.remove(&conn) {
            // upstream dialed: answer the CONNECT and open the tunnel
            let reply = OwnedMessage {
                status_code: 200,
                ..Default::default()
            };
            let state = ep.respond(proxy_conn, msg_id, &reply).unwrap();
            assert_eq!(PostState::Tunneling, state);
            self.to_upstream.insert(proxy_conn, conn);
            self.to_proxy.insert(conn, proxy_conn);
        }
    }

    fn on_request(
        &mut self,
        ep: &mut Endpoint,
        conn: HttpId,
        msg_id: Option<MsgId>,
        msg: &Message<'_>,
    ) {
        if msg.is_connect_method {
            let host = Host::from_msg(msg, false).unwrap();
            let upstream = ep.connect_raw(&host).unwrap();
            self.awaiting.insert(upstream, (conn, msg_id.unwrap()));
        } else {
            // the origin server behind the tunnel
            let reply = OwnedMessage {
                status_code: 200,
                raw_body: b"hello".to_vec(),
                connection_close: true,
                ..Default::default()
            };
            ep.respond(conn, msg_id.unwrap(), &reply).unwrap();
        }
    }

    fn on_tunnel_data(&mut self, ep: &mut Endpoint, conn: HttpId, data: &[u8], closed: bool) {
        if Some(conn) == self.raw_client {
            self.client_buf.extend_from_slice(data);
            if !self.sent_get && self.client_buf.windows(4).any(|w| w == b"\r\n\r\n") {
                assert!(self.client_buf.starts_with(b"HTTP/1.1 200"));
                self.client_buf.clear();
                self.sent_get = true;
                ep.send_raw(conn, b"GET / HTTP/1.1\r\nHost: origin.test\r\n\r\n")
                    .unwrap();
            }
            return;
        }

        if let Some(&upstream) = self.to_upstream.get(&conn) {
            if !data.is_empty() {
                ep.send_raw(upstream, data).unwrap();
            }
            if closed {
                let _ = ep.shutdown(upstream, true);
            }
        } else if let Some(&proxy_conn) = self.to_proxy.get(&conn) {
            if !data.is_empty() {
                ep.send_raw(proxy_conn, data).unwrap();
            }
            if closed {
                let _ = ep.shutdown(proxy_conn, true);
            }
        }
    }

    fn on_close(&mut self, ep: &mut Endpoint, conn: HttpId, _code: CloseCode) {
        if Some(conn) == self.raw_client {
            self.client_closed = true;
            return;
        }
        if let Some(upstream) = self.to_upstream.remove(&conn) {
            self.to_proxy.remove(&upstream);
            let _ = ep.shutdown(upstream, true);
        }
        if let Some(proxy_conn) = self.to_proxy.remove(&conn) {
            self.to_upstream.remove(&proxy_conn);
            let _ = ep.shutdown(proxy_conn, true);
        }
    }
}

#[test]
fn connect_tunnel_relays_both_directions() {
    let mut ep = endpoint(Config::default());
    let proxy_listener = ep.listen(0, false).unwrap();
    let origin_listener = ep.listen(0, false).unwrap();

    let mut driver = Tunnel::default();
    driver.upstream_port = ep.local_addr(origin_listener).unwrap().port();

    let proxy_host = loopback_host(&ep, proxy_listener);
    driver.raw_client = Some(ep.connect_raw(&proxy_host).unwrap());

    spin(&mut ep, &mut driver, |d| {
        d.sent_get && d.client_buf.windows(5).any(|w| w == b"hello")
    });

    let text = String::from_utf8_lossy(&driver.client_buf).to_string();
    assert!(text.starts_with("HTTP/1.1 200 OK"), "got: {}", text);
    assert!(text.ends_with("hello"), "got: {}", text);

    // close on the origin side propagates through both halves
    spin(&mut ep, &mut driver, |d| d.client_closed);
}

/// Scenario: TLS round-trip against a self-signed listener.
#[derive(Default)]
struct TlsTrip {
    client: Option<HttpId>,
    sent: bool,
    response: Option<(u16, Vec<u8>)>,
}

impl Handler for TlsTrip {
    fn on_established(&mut self, ep: &mut Endpoint, conn: HttpId) {
        if Some(conn) == self.client && !self.sent {
            self.sent = true;
            let msg = OwnedMessage {
                url: Some("/secure".to_string()),
                host: Some("127.0.0.1".to_string()),
                ..Default::default()
            };
            ep.request(conn, &msg).unwrap();
        }
    }

    fn on_request(
        &mut self,
        ep: &mut Endpoint,
        conn: HttpId,
        msg_id: Option<MsgId>,
        _msg: &Message<'_>,
    ) {
        let reply = OwnedMessage {
            status_code: 200,
            raw_body: b"over tls".to_vec(),
            ..Default::default()
        };
        ep.respond(conn, msg_id.unwrap(), &reply).unwrap();
    }

    fn on_response(&mut self, _ep: &mut Endpoint, _conn: HttpId, msg: &Message<'_>) {
        self.response = Some((msg.status_code, msg.payload().to_vec()));
    }
}

#[test]
fn tls_round_trip_with_self_signed_pair() {
    let generated = rcgen::generate_simple_self_signed(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ])
    .unwrap();
    let cert = generated.cert.der().clone();
    let key = rustls::pki_types::PrivateKeyDer::Pkcs8(
        rustls::pki_types::PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der()),
    );

    let server = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert.clone()], key)
        .unwrap();

    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert).unwrap();
    let client = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let cfg = Config::default();
    let tls = TlsContext::from_config(&cfg)
        .unwrap()
        .with_server_config(Arc::new(server))
        .with_client_config(Arc::new(client));

    let mut ep = Endpoint::with_tls(cfg, tls).unwrap();
    let listener = ep.listen(0, true).unwrap();

    let port = ep.local_addr(listener).unwrap().port();
    let mut host = Host::new("127.0.0.1", port, true);
    host.resolve().unwrap();

    let mut driver = TlsTrip::default();
    driver.client = Some(ep.connect(&host).unwrap());

    spin(&mut ep, &mut driver, |d| d.response.is_some());

    let (status, body) = driver.response.unwrap();
    assert_eq!(200, status);
    assert_eq!(b"over tls".to_vec(), body);
}

/// Scenario: TLS establish deadline against a peer that never answers the
/// handshake.
#[derive(Default)]
struct TlsTimeout {
    client: Option<HttpId>,
    closed: Option<CloseCode>,
}

impl Handler for TlsTimeout {
    fn on_close(&mut self, _ep: &mut Endpoint, conn: HttpId, code: CloseCode) {
        if Some(conn) == self.client {
            self.closed = Some(code);
        }
    }
}

#[test]
fn tls_establish_timeout_reports_err_establish() {
    let mut cfg = Config::default();
    cfg.net_ssl_establish_timeout = Duration::from_millis(200);
    let mut ep = endpoint(cfg);

    // plain listener: accepts TCP, never answers the ClientHello
    let listener = ep.listen(0, false).unwrap();
    let port = ep.local_addr(listener).unwrap().port();
    let mut host = Host::new("127.0.0.1", port, true);
    host.resolve().unwrap();

    let mut driver = TlsTimeout::default();
    driver.client = Some(ep.connect(&host).unwrap());

    spin(&mut ep, &mut driver, |d| d.closed.is_some());
    assert_eq!(CloseCode::ErrEstablish, driver.closed.unwrap());
}

/// Scenario: the response watchdog tears down a connection whose pipeline
/// head is never answered.
#[derive(Default)]
struct Unanswered {
    client: Option<HttpId>,
    sent: bool,
    server_conn: Option<HttpId>,
    server_closed: bool,
    client_closed: bool,
}

impl Handler for Unanswered {
    fn on_established(&mut self, ep: &mut Endpoint, conn: HttpId) {
        if Some(conn) == self.client && !self.sent {
            self.sent = true;
            let msg = OwnedMessage {
                url: Some("/slow".to_string()),
                host: Some("example.test".to_string()),
                ..Default::default()
            };
            ep.request(conn, &msg).unwrap();
        }
    }

    fn on_request(
        &mut self,
        _ep: &mut Endpoint,
        conn: HttpId,
        _msg_id: Option<MsgId>,
        _msg: &Message<'_>,
    ) {
        // never answer
        self.server_conn = Some(conn);
    }

    fn on_close(&mut self, _ep: &mut Endpoint, conn: HttpId, _code: CloseCode) {
        if Some(conn) == self.client {
            self.client_closed = true;
        }
        if Some(conn) == self.server_conn {
            self.server_closed = true;
        }
    }
}

#[test]
fn response_watchdog_closes_unanswered_pipeline() {
    let mut cfg = Config::default();
    cfg.http_response_timeout = Duration::from_millis(300);
    cfg.http_check_messages_queue_interval = Duration::from_millis(100);
    let mut ep = endpoint(cfg);

    let listener = ep.listen(0, false).unwrap();
    let host = loopback_host(&ep, listener);

    let mut driver = Unanswered::default();
    driver.client = Some(ep.connect(&host).unwrap());

    spin(&mut ep, &mut driver, |d| d.server_closed && d.client_closed);
}
