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

//! Reference forward proxy.
//!
//! Listens for plain HTTP requests, dials the origin named by the request
//! (absolute-form targets are reduced to origin form), relays the
//! response, and switches to opaque tunneling after a successful CONNECT.
//!
//! Usage: `proxy [config:<path>] [port:<port>]`

use std::collections::HashMap;

use log::{error, info};
use skiff::{
    CloseCode, Config, Endpoint, Handler, Host, HttpId, Message, MsgId, OwnedMessage,
};

#[derive(Default)]
struct Proxy {
    /// Outstanding origin request legs: origin conn -> (client conn, slot,
    /// forwarded request, peer asked to close).
    outbound: HashMap<HttpId, Outbound>,
    /// Established CONNECT tunnels, both directions.
    tunnels: HashMap<HttpId, HttpId>,
    /// Raw upstream legs waiting for establishment.
    dialing: HashMap<HttpId, (HttpId, MsgId)>,
}

struct Outbound {
    client: HttpId,
    slot: MsgId,
    request: OwnedMessage,
    client_wants_close: bool,
    sent: bool,
}

impl Handler for Proxy {
    fn on_established(&mut self, ep: &mut Endpoint, conn: HttpId) {
        if let Some(outbound) = self.outbound.get_mut(&conn) {
            if !outbound.sent {
                outbound.sent = true;
                if let Err(e) = ep.request(conn, &outbound.request) {
                    error!("forwarding request failed: {}", e);
                    let client = outbound.client;
                    let slot = outbound.slot;
                    self.outbound.remove(&conn);
                    respond_error(ep, client, slot, 502);
                    let _ = ep.shutdown(conn, false);
                }
            }
            return;
        }

        if let Some((client, slot)) = self.dialing.remove(&conn) {
            let reply = OwnedMessage {
                status_code: 200,
                ..Default::default()
            };
            match ep.respond(client, slot, &reply) {
                Ok(_) => {
                    self.tunnels.insert(client, conn);
                    self.tunnels.insert(conn, client);
                }
                Err(e) => {
                    error!("CONNECT reply failed: {}", e);
                    let _ = ep.shutdown(conn, false);
                }
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
        let Some(msg_id) = msg_id else { return };

        if msg.is_connect_method {
            match Host::from_msg(msg, false) {
                Ok(host) if host.is_resolved() => match ep.connect_raw(&host) {
                    Ok(upstream) => {
                        self.dialing.insert(upstream, (conn, msg_id));
                    }
                    Err(e) => {
                        error!("CONNECT dial failed: {}", e);
                        respond_error(ep, conn, msg_id, 502);
                    }
                },
                _ => respond_error(ep, conn, msg_id, 502),
            }
            return;
        }

        let host = match Host::from_msg(msg, false) {
            Ok(host) if host.is_resolved() => host,
            _ => {
                respond_error(ep, conn, msg_id, 502);
                return;
            }
        };

        let mut request = msg.to_owned(true);
        request.connection_close = false;

        match ep.connect(&host) {
            Ok(origin) => {
                self.outbound.insert(
                    origin,
                    Outbound {
                        client: conn,
                        slot: msg_id,
                        request,
                        client_wants_close: msg.connection_close,
                        sent: false,
                    },
                );
            }
            Err(e) => {
                error!("origin dial failed host:{}: {}", host.hostname, e);
                respond_error(ep, conn, msg_id, 502);
            }
        }
    }

    fn on_response(&mut self, ep: &mut Endpoint, conn: HttpId, msg: &Message<'_>) {
        let Some(outbound) = self.outbound.remove(&conn) else {
            return;
        };

        let mut reply = msg.to_owned(false);
        reply.connection_close = outbound.client_wants_close;
        // the body is already decoded; re-frame it with a plain length
        if let Some(body) = reply.body.take() {
            reply.raw_body = body;
            reply.content_encoding = None;
            reply.transfer_encoding = None;
            reply.transfer_encoding_chunked = false;
        }

        if let Err(e) = ep.respond(outbound.client, outbound.slot, &reply) {
            error!("relaying response failed: {}", e);
            let _ = ep.shutdown(outbound.client, false);
        }

        let _ = ep.shutdown(conn, false);
    }

    fn on_tunnel_data(&mut self, ep: &mut Endpoint, conn: HttpId, data: &[u8], closed: bool) {
        if let Some(&other) = self.tunnels.get(&conn) {
            if !data.is_empty() {
                if ep.send_raw(other, data).is_err() {
                    let _ = ep.shutdown(conn, false);
                    return;
                }
            }
            if closed {
                let _ = ep.shutdown(other, true);
            }
        }
    }

    fn on_close(&mut self, ep: &mut Endpoint, conn: HttpId, code: CloseCode) {
        if let Some(outbound) = self.outbound.remove(&conn) {
            if code != CloseCode::Success {
                respond_error(ep, outbound.client, outbound.slot, 502);
            }
        }
        if let Some(other) = self.tunnels.remove(&conn) {
            self.tunnels.remove(&other);
            let _ = ep.shutdown(other, true);
        }
        self.dialing.remove(&conn);
    }
}

fn respond_error(ep: &mut Endpoint, conn: HttpId, slot: MsgId, status: u16) {
    let reply = OwnedMessage {
        status_code: status,
        connection_close: true,
        ..Default::default()
    };
    if ep.respond(conn, slot, &reply).is_err() {
        let _ = ep.shutdown(conn, false);
    }
}

fn main() -> skiff::Result<()> {
    env_logger::init();

    let mut cfg = Config::default();
    let mut port = 3128u16;

    for arg in std::env::args().skip(1) {
        if let Some(path) = arg.strip_prefix("config:") {
            cfg = Config::load(path)?;
        } else if let Some(value) = arg.strip_prefix("port:") {
            port = value.parse().expect("port:<port> wants a number");
        } else {
            eprintln!("usage: proxy [config:<path>] [port:<port>]");
            std::process::exit(1);
        }
    }

    let mut ep = Endpoint::new(cfg)?;
    ep.listen(port, false)?;
    info!("forward proxy listening on port {}", port);

    ep.run(&mut Proxy::default())
}
