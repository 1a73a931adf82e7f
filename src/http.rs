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

//! HTTP connection layer: client/server roles over the reactor, the
//! pipelined message queue, CONNECT tunneling, and the response watchdog.
//!
//! An [`Endpoint`] owns a reactor plus an arena of HTTP connections. The
//! application implements [`Handler`] and drives the endpoint with
//! [`poll`](Endpoint::poll) or [`run`](Endpoint::run); handler methods
//! receive `&mut Endpoint` back, so they can post replies, dial upstreams
//! and tear connections down from inside the event.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{debug, error};
use slab::Slab;

use crate::config::Config;
use crate::encode;
use crate::error::{CloseCode, Error, Result};
use crate::list::{List, NodeId};
use crate::parser::{FeedResult, Message, OwnedMessage, ReadState, Role};
use crate::reactor::{ConnId, NetEvent, NetState, Reactor};
use crate::resolver::Host;
use crate::timer::TimerId;
use crate::tls::TlsContext;

/// Stable handle to an HTTP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HttpId {
    slot: usize,
    gen: u64,
}

/// Handle to a pipeline queue element awaiting its response.
pub type MsgId = NodeId;

/// Outcome of posting a server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostState {
    /// The connection keeps serving requests.
    Default,
    /// A closing response went out; the connection is draining.
    SentClose,
    /// A CONNECT was answered; the connection is now a byte tunnel.
    Tunneling,
}

/// Coarse HTTP connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpState {
    /// Not (yet) usable.
    NotEstablished,
    /// Ready for requests/responses.
    Established,
    /// Draining towards close.
    FlushAndClose,
    /// A closing response was sent.
    SentClose,
    /// Tunneling opaque bytes after a CONNECT.
    Tunneling,
}

const WATCHDOG_UDATA: u64 = u64::MAX;

/// Application callbacks for HTTP connections.
///
/// Every method has a no-op default, so implementations only override what
/// their role needs. Handlers must not call [`Endpoint::poll`] or
/// [`Endpoint::run`] re-entrantly.
pub trait Handler {
    /// The connection is established and ready.
    fn on_established(&mut self, ep: &mut Endpoint, conn: HttpId) {
        let _ = (ep, conn);
    }

    /// A listener produced `conn`; install per-connection state here.
    ///
    /// The child is not visible to any other callback until this returns.
    fn on_accepted(&mut self, ep: &mut Endpoint, listener: HttpId, conn: HttpId) {
        let _ = (ep, listener, conn);
    }

    /// A complete request arrived on a server connection.
    ///
    /// `msg_id` names the pipeline slot to answer via
    /// [`Endpoint::respond`]; it is `None` when a closing response was
    /// already sent and no reply is expected.
    fn on_request(
        &mut self,
        ep: &mut Endpoint,
        conn: HttpId,
        msg_id: Option<MsgId>,
        msg: &Message<'_>,
    ) {
        let _ = (ep, conn, msg_id, msg);
    }

    /// A complete response arrived on a client connection.
    fn on_response(&mut self, ep: &mut Endpoint, conn: HttpId, msg: &Message<'_>) {
        let _ = (ep, conn, msg);
    }

    /// Opaque bytes arrived on a tunneling connection. `closed` reports
    /// the peer finishing its half.
    fn on_tunnel_data(&mut self, ep: &mut Endpoint, conn: HttpId, data: &[u8], closed: bool) {
        let _ = (ep, conn, data, closed);
    }

    /// A per-connection user timer fired.
    fn on_timer(&mut self, ep: &mut Endpoint, conn: HttpId, timer: TimerId, udata: u64) {
        let _ = (ep, conn, timer, udata);
    }

    /// A global user timer fired.
    fn on_global_timer(&mut self, ep: &mut Endpoint, timer: TimerId, udata: u64) {
        let _ = (ep, timer, udata);
    }

    /// The connection is gone; its handle is stale after this returns.
    fn on_close(&mut self, ep: &mut Endpoint, conn: HttpId, code: CloseCode) {
        let _ = (ep, conn, code);
    }
}

#[derive(Debug)]
struct QueueElt {
    sent: Instant,
    connection_close: bool,
    connect_method: bool,
    pending: Option<(Vec<u8>, Vec<u8>)>,
}

#[derive(Debug)]
struct HttpConn {
    gen: u64,
    conn: ConnId,
    role: Role,
    is_listener: bool,
    queue: List<QueueElt>,
    read: ReadState,
    sent_close: bool,
    got_connect: bool,
    tunneling: bool,
    messages_handled: u64,
}

/// HTTP endpoint: a reactor plus client, server and listener connections.
#[derive(Debug)]
pub struct Endpoint {
    reactor: Reactor,
    conns: Slab<HttpConn>,
    next_gen: u64,
    scratch: Vec<NetEvent>,
}

impl Endpoint {
    /// Creates an endpoint, building TLS contexts from the configuration.
    pub fn new(cfg: Config) -> Result<Endpoint> {
        let tls = TlsContext::from_config(&cfg)?;
        Endpoint::with_tls(cfg, tls)
    }

    /// Creates an endpoint with explicit TLS contexts.
    pub fn with_tls(cfg: Config, tls: TlsContext) -> Result<Endpoint> {
        Ok(Endpoint {
            reactor: Reactor::new(cfg, tls)?,
            conns: Slab::new(),
            next_gen: 1,
            scratch: Vec::new(),
        })
    }

    fn http(&self, id: HttpId) -> Result<&HttpConn> {
        self.conns
            .get(id.slot)
            .filter(|hc| hc.gen == id.gen)
            .ok_or(Error::WrongState)
    }

    fn http_mut(&mut self, id: HttpId) -> Result<&mut HttpConn> {
        self.conns
            .get_mut(id.slot)
            .filter(|hc| hc.gen == id.gen)
            .ok_or(Error::WrongState)
    }

    fn lookup(&self, conn: ConnId) -> Option<HttpId> {
        let slot = self.reactor.udata(conn).ok()? as usize;
        let hc = self.conns.get(slot)?;
        if hc.conn == conn {
            Some(HttpId { slot, gen: hc.gen })
        } else {
            None
        }
    }

    /// Opens a client connection to the host.
    pub fn connect(&mut self, host: &Host) -> Result<HttpId> {
        let gen = self.next_gen;
        self.next_gen += 1;

        let slot = self.conns.vacant_entry().key();
        let conn = self.reactor.connect(host, slot as u64)?;

        let inserted = self.conns.insert(HttpConn {
            gen,
            conn,
            role: Role::Client,
            is_listener: false,
            queue: List::new(),
            read: ReadState::new(Role::Client),
            sent_close: false,
            got_connect: false,
            tunneling: false,
            messages_handled: 0,
        });
        debug_assert_eq!(slot, inserted);

        Ok(HttpId { slot, gen })
    }

    /// Opens a raw byte-stream connection: no HTTP parsing ever runs on
    /// it. Inbound bytes surface via [`Handler::on_tunnel_data`] and
    /// outbound bytes go through [`Endpoint::send_raw`] — the upstream leg
    /// of a CONNECT tunnel.
    pub fn connect_raw(&mut self, host: &Host) -> Result<HttpId> {
        let gen = self.next_gen;
        self.next_gen += 1;

        let slot = self.conns.vacant_entry().key();
        let conn = self.reactor.connect(host, slot as u64)?;

        let inserted = self.conns.insert(HttpConn {
            gen,
            conn,
            role: Role::Server,
            is_listener: false,
            queue: List::new(),
            read: ReadState::new(Role::Server),
            sent_close: false,
            got_connect: false,
            tunneling: true,
            messages_handled: 0,
        });
        debug_assert_eq!(slot, inserted);

        Ok(HttpId { slot, gen })
    }

    /// Binds a server listener; children surface via
    /// [`Handler::on_accepted`].
    pub fn listen(&mut self, port: u16, use_tls: bool) -> Result<HttpId> {
        let gen = self.next_gen;
        self.next_gen += 1;

        let slot = self.conns.vacant_entry().key();
        let conn = self.reactor.listen(port, use_tls, slot as u64)?;

        let inserted = self.conns.insert(HttpConn {
            gen,
            conn,
            role: Role::Server,
            is_listener: true,
            queue: List::new(),
            read: ReadState::new(Role::Server),
            sent_close: false,
            got_connect: false,
            tunneling: false,
            messages_handled: 0,
        });
        debug_assert_eq!(slot, inserted);

        Ok(HttpId { slot, gen })
    }

    /// Locally bound address (listeners report the listen address).
    pub fn local_addr(&self, id: HttpId) -> Result<SocketAddr> {
        let conn = self.http(id)?.conn;
        self.reactor.local_addr(conn)
    }

    /// Coarse state of the connection.
    pub fn state(&self, id: HttpId) -> HttpState {
        match self.http(id) {
            Err(_) => HttpState::NotEstablished,
            Ok(hc) => {
                if hc.sent_close {
                    HttpState::SentClose
                } else if hc.tunneling {
                    HttpState::Tunneling
                } else {
                    match self.reactor.state(hc.conn) {
                        NetState::Established => HttpState::Established,
                        NetState::FlushAndClose => HttpState::FlushAndClose,
                        NetState::NotEstablished => HttpState::NotEstablished,
                    }
                }
            }
        }
    }

    /// Posts one request on a client connection and reserves its pipeline
    /// slot; responses pop slots in FIFO order.
    pub fn request(&mut self, id: HttpId, msg: &OwnedMessage) -> Result<()> {
        let now = self.reactor.now();

        let hc = self.http(id)?;
        if hc.role != Role::Client {
            return Err(Error::WrongConn);
        }
        if hc.sent_close || hc.tunneling {
            return Err(Error::WrongState);
        }

        if msg.status_code != 0
            || msg.url.as_deref().map_or(true, str::is_empty)
            || msg.host.as_deref().map_or(true, str::is_empty)
            || msg.content_encoding.is_some()
            || msg.transfer_encoding.is_some()
            || (!msg.raw_body.is_empty() && !msg.www_form.is_empty())
        {
            return Err(Error::WrongParams);
        }

        let (hdr, body) = encode::encode(Role::Client, msg)?;
        let conn = hc.conn;

        self.reactor.post(conn, &hdr, false)?;
        if !body.is_empty() {
            self.reactor.post(conn, &body, false)?;
        }

        let hc = self.http_mut(id)?;
        hc.queue.push_back(QueueElt {
            sent: now,
            connection_close: false,
            connect_method: false,
            pending: None,
        });

        Ok(())
    }

    /// Posts the response for the pipeline element `msg_id`.
    ///
    /// When the element is the queue head, its bytes go out immediately
    /// and buffered later replies drain behind it in arrival order.
    /// Otherwise the encoded bytes wait on the element. A closing reply
    /// flush-and-closes after transmission; a CONNECT reply switches the
    /// connection into tunneling mode.
    pub fn respond(&mut self, id: HttpId, msg_id: MsgId, msg: &OwnedMessage) -> Result<PostState> {
        let hc = self.http(id)?;
        if hc.role != Role::Server || hc.is_listener {
            return Err(Error::WrongConn);
        }
        if hc.sent_close || hc.tunneling {
            return Err(Error::WrongState);
        }

        if msg.url.is_some() || !msg.www_form.is_empty() || msg.accept_encoding.is_some() {
            return Err(Error::WrongParams);
        }

        let (hdr, body) = encode::encode(Role::Server, msg)?;
        let slot = id.slot;
        let conn = hc.conn;

        let hc = self.http_mut(id)?;
        let elt = hc.queue.get_mut(msg_id).ok_or(Error::WrongParams)?;
        if !elt.connection_close {
            elt.connection_close = msg.connection_close;
        }

        if hc.queue.front_id() != Some(msg_id) {
            // out of order: keep the bytes until earlier replies resolve
            let elt = hc.queue.get_mut(msg_id).ok_or(Error::WrongParams)?;
            elt.pending = Some((hdr, body));
            return Ok(PostState::Default);
        }

        let mut state = PostState::Default;
        let mut first = Some((hdr, body));

        loop {
            let Some(head_id) = self.conns[slot].queue.front_id() else {
                break;
            };
            let (close_flag, connect_flag) = {
                let elt = self.conns[slot]
                    .queue
                    .get(head_id)
                    .ok_or(Error::General)?;
                (elt.connection_close, elt.connect_method)
            };

            if state == PostState::Default {
                let payload = if head_id == msg_id {
                    first.take()
                } else {
                    self.conns[slot]
                        .queue
                        .get_mut(head_id)
                        .and_then(|elt| elt.pending.take())
                };
                let Some((hdr, body)) = payload else {
                    break;
                };

                let flush_hdr = body.is_empty() && close_flag;
                if let Err(e) = self.reactor.post(conn, &hdr, flush_hdr) {
                    self.conns[slot].queue.remove(head_id);
                    return Err(e);
                }
                if !body.is_empty() {
                    if let Err(e) = self.reactor.post(conn, &body, close_flag) {
                        self.conns[slot].queue.remove(head_id);
                        return Err(e);
                    }
                }

                if close_flag {
                    state = PostState::SentClose;
                    self.conns[slot].sent_close = true;
                } else if connect_flag {
                    state = PostState::Tunneling;
                    self.conns[slot].tunneling = true;
                }
            } else {
                error!(
                    "reply buffered behind a closing response dropped http:{}/{}",
                    slot, id.gen
                );
            }

            self.conns[slot].queue.remove(head_id);

            let next_has_pending = self.conns[slot]
                .queue
                .front()
                .map_or(false, |elt| elt.pending.is_some());
            if !next_has_pending {
                break;
            }
        }

        Ok(state)
    }

    /// Forwards opaque bytes on a tunneling server connection.
    pub fn send_raw(&mut self, id: HttpId, data: &[u8]) -> Result<()> {
        let hc = self.http(id)?;
        if hc.role != Role::Server || hc.is_listener {
            return Err(Error::WrongConn);
        }
        if hc.sent_close || !hc.tunneling {
            return Err(Error::WrongState);
        }
        if data.is_empty() {
            return Err(Error::WrongParams);
        }

        let conn = hc.conn;
        self.reactor.post(conn, data, false)
    }

    /// Tears the connection down, optionally draining queued writes first.
    pub fn shutdown(&mut self, id: HttpId, flush_and_close: bool) -> Result<()> {
        let hc = self.http(id)?;
        if hc.sent_close {
            return Err(Error::WrongState);
        }
        let conn = hc.conn;
        self.reactor.shutdown(conn, flush_and_close)
    }

    /// Arms a periodic user timer on the connection.
    pub fn add_timer(&mut self, id: HttpId, period: Duration, udata: u64) -> Result<TimerId> {
        if udata == WATCHDOG_UDATA {
            return Err(Error::WrongParams);
        }
        let hc = self.http(id)?;
        if hc.sent_close {
            return Err(Error::WrongState);
        }
        let conn = hc.conn;
        self.reactor.conn_timer(conn, period, udata)
    }

    /// Deletes a user timer on the connection.
    pub fn del_timer(&mut self, id: HttpId, timer: TimerId) -> Result<()> {
        let hc = self.http(id)?;
        if hc.sent_close {
            return Err(Error::WrongState);
        }
        let conn = hc.conn;
        self.reactor.del_conn_timer(conn, timer)
    }

    /// Arms a periodic global timer (host-list refresh and the like).
    pub fn global_timer(&mut self, period: Duration, udata: u64) -> Result<TimerId> {
        self.reactor.global_timer(period, udata)
    }

    /// Deletes a global timer.
    pub fn del_global_timer(&mut self, timer: TimerId) -> Result<()> {
        self.reactor.del_global_timer(timer)
    }

    /// One endpoint iteration: a reactor poll plus handler dispatch for
    /// everything it produced.
    pub fn poll<H: Handler>(&mut self, handler: &mut H) -> Result<()> {
        let mut events = std::mem::take(&mut self.scratch);
        events.clear();

        let polled = self.reactor.poll_once(&mut events);
        if let Err(e) = polled {
            self.scratch = events;
            return Err(Error::Io(e));
        }

        for ev in events.drain(..) {
            self.dispatch(ev, handler);
        }

        self.scratch = events;
        Ok(())
    }

    /// Runs the endpoint until an unrecoverable poll error.
    pub fn run<H: Handler>(&mut self, handler: &mut H) -> Result<()> {
        loop {
            self.poll(handler)?;
        }
    }

    fn dispatch<H: Handler>(&mut self, ev: NetEvent, handler: &mut H) {
        match ev {
            NetEvent::Established(conn) => {
                let Some(id) = self.lookup(conn) else { return };

                let interval = self.reactor.config().http_check_messages_queue_interval;
                if let Err(e) = self.reactor.conn_timer(conn, interval, WATCHDOG_UDATA) {
                    debug!("watchdog arm failed http:{}/{}: {}", id.slot, id.gen, e);
                }

                handler.on_established(self, id);
            }
            NetEvent::Accepted { listener, conn } => {
                let Some(listener_id) = self.lookup(listener) else {
                    let _ = self.reactor.shutdown(conn, false);
                    return;
                };

                let gen = self.next_gen;
                self.next_gen += 1;
                let slot = self.conns.vacant_entry().key();
                if self.reactor.set_udata(conn, slot as u64).is_err() {
                    return;
                }

                let inserted = self.conns.insert(HttpConn {
                    gen,
                    conn,
                    role: Role::Server,
                    is_listener: false,
                    queue: List::new(),
                    read: ReadState::new(Role::Server),
                    sent_close: false,
                    got_connect: false,
                    tunneling: false,
                    messages_handled: 0,
                });
                debug_assert_eq!(slot, inserted);

                handler.on_accepted(self, listener_id, HttpId { slot, gen });
            }
            NetEvent::Data { conn, closed } => {
                let Some(id) = self.lookup(conn) else { return };
                if self.conns[id.slot].tunneling {
                    self.tunnel_data(id, conn, closed, handler);
                } else {
                    self.parse_messages(id, conn, closed, handler);
                }
            }
            NetEvent::Timer { conn: Some(conn), timer, udata } => {
                let Some(id) = self.lookup(conn) else { return };
                if udata == WATCHDOG_UDATA {
                    self.check_queue(id, conn);
                } else {
                    handler.on_timer(self, id, timer, udata);
                }
            }
            NetEvent::Timer { conn: None, timer, udata } => {
                handler.on_global_timer(self, timer, udata);
            }
            NetEvent::Closed { conn, udata, code } => {
                let slot = udata as usize;
                let Some(hc) = self.conns.get(slot) else { return };
                if hc.conn != conn {
                    return;
                }
                let id = HttpId { slot, gen: hc.gen };
                debug!(
                    "http closed http:{}/{} code:{} messages_handled:{}",
                    slot, id.gen, code, hc.messages_handled
                );
                handler.on_close(self, id, code);
                self.conns.remove(slot);
            }
        }
    }

    fn tunnel_data<H: Handler>(&mut self, id: HttpId, conn: ConnId, closed: bool, handler: &mut H) {
        let Ok(buf) = self.reactor.take_read_buf(conn) else {
            return;
        };
        let consumed = buf.used();

        if consumed > 0 || closed {
            handler.on_tunnel_data(self, id, buf.filled(), closed);
        }

        self.reactor.restore_read_buf(conn, buf, consumed);
    }

    fn check_queue(&mut self, id: HttpId, conn: ConnId) {
        let now = self.reactor.now();
        let timeout = self.reactor.config().http_response_timeout;

        let Some(hc) = self.conns.get(id.slot) else { return };
        if let Some(head) = hc.queue.front() {
            if now.duration_since(head.sent) > timeout {
                error!(
                    "pipeline head response timeout http:{}/{} outstanding:{}",
                    id.slot,
                    id.gen,
                    hc.queue.len()
                );
                let _ = self.reactor.shutdown(conn, false);
            }
        }
    }

    fn parse_messages<H: Handler>(
        &mut self,
        id: HttpId,
        conn: ConnId,
        closed: bool,
        handler: &mut H,
    ) {
        let Ok(buf) = self.reactor.take_read_buf(conn) else {
            return;
        };
        let now = self.reactor.now();
        let mut nread = 0usize;

        loop {
            let Some(hc) = self
                .conns
                .get_mut(id.slot)
                .filter(|hc| hc.gen == id.gen && hc.conn == conn)
            else {
                break;
            };

            let data = &buf.filled()[nread..];
            if data.is_empty() {
                break;
            }

            if hc.got_connect {
                // bytes arrived behind a CONNECT before the tunnel opened
                error!("data after CONNECT request http:{}/{}", id.slot, id.gen);
                let _ = self.reactor.shutdown(conn, false);
                break;
            }

            let role = hc.role;
            match hc.read.feed(data, closed) {
                Err(e) => {
                    error!(
                        "parse error http:{}/{} stage:{} status:{} url:{} error:{}",
                        id.slot,
                        id.gen,
                        hc.read.stage(),
                        hc.read.status_code(),
                        hc.read.url(data).unwrap_or("-"),
                        e
                    );
                    let _ = self.reactor.shutdown(conn, false);
                    break;
                }
                Ok(FeedResult::NeedMore) => break,
                Ok(FeedResult::Complete(n)) => {
                    let read = std::mem::replace(&mut hc.read, ReadState::new(role));
                    let msg = match read.resolve(&data[..n]) {
                        Ok(msg) => msg,
                        Err(e) => {
                            error!(
                                "message resolve error http:{}/{} error:{}",
                                id.slot, id.gen, e
                            );
                            let _ = self.reactor.shutdown(conn, false);
                            break;
                        }
                    };

                    match role {
                        Role::Client => {
                            if hc.queue.pop_front().is_none() {
                                error!(
                                    "response without outstanding request http:{}/{}",
                                    id.slot, id.gen
                                );
                                let _ = self.reactor.shutdown(conn, false);
                                break;
                            }
                            hc.messages_handled += 1;
                            let close = msg.connection_close;

                            handler.on_response(self, id, &msg);

                            if close {
                                // may already be draining; stale handles
                                // are fine here
                                let _ = self.reactor.shutdown(conn, false);
                            }
                        }
                        Role::Server => {
                            let msg_id = if hc.sent_close {
                                None
                            } else {
                                Some(hc.queue.push_back(QueueElt {
                                    sent: now,
                                    connection_close: msg.connection_close,
                                    connect_method: msg.is_connect_method,
                                    pending: None,
                                }))
                            };
                            hc.got_connect = msg.is_connect_method;
                            hc.messages_handled += 1;

                            handler.on_request(self, id, msg_id, &msg);
                        }
                    }

                    nread += n;

                    match self.reactor.state(conn) {
                        NetState::Established | NetState::FlushAndClose => {}
                        NetState::NotEstablished => break,
                    }
                }
            }
        }

        self.reactor.restore_read_buf(conn, buf, nread);
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::config::Config;
    use crate::error::Error;
    use crate::parser::OwnedMessage;
    use crate::resolver::Host;

    use super::{Endpoint, HttpState};

    fn endpoint() -> Endpoint {
        Endpoint::new(Config::default()).unwrap()
    }

    #[test]
    fn request_on_server_listener_is_wrong_conn() {
        let mut ep = endpoint();
        let listener = ep.listen(0, false).unwrap();

        let msg = OwnedMessage {
            url: Some("/".to_string()),
            host: Some("h".to_string()),
            ..Default::default()
        };
        assert!(matches!(ep.request(listener, &msg), Err(Error::WrongConn)));
    }

    #[test]
    fn request_requires_url_and_host() {
        let mut ep = endpoint();
        let listener = ep.listen(0, false).unwrap();
        let port = ep.local_addr(listener).unwrap().port();
        let mut host = Host::new("127.0.0.1", port, false);
        host.resolve().unwrap();
        let client = ep.connect(&host).unwrap();

        let msg = OwnedMessage::default();
        assert!(matches!(ep.request(client, &msg), Err(Error::WrongParams)));

        let msg = OwnedMessage {
            url: Some("/".to_string()),
            ..Default::default()
        };
        assert!(matches!(ep.request(client, &msg), Err(Error::WrongParams)));
    }

    #[test]
    fn client_request_rejects_server_only_fields() {
        let mut ep = endpoint();
        let listener = ep.listen(0, false).unwrap();
        let port = ep.local_addr(listener).unwrap().port();
        let mut host = Host::new("127.0.0.1", port, false);
        host.resolve().unwrap();
        let client = ep.connect(&host).unwrap();

        let msg = OwnedMessage {
            url: Some("/".to_string()),
            host: Some("h".to_string()),
            content_encoding: Some("gzip".to_string()),
            ..Default::default()
        };
        assert!(matches!(ep.request(client, &msg), Err(Error::WrongParams)));

        let msg = OwnedMessage {
            url: Some("/".to_string()),
            host: Some("h".to_string()),
            status_code: 200,
            ..Default::default()
        };
        assert!(matches!(ep.request(client, &msg), Err(Error::WrongParams)));
    }

    #[test]
    fn reserved_timer_udata_is_rejected() {
        let mut ep = endpoint();
        let listener = ep.listen(0, false).unwrap();
        let port = ep.local_addr(listener).unwrap().port();
        let mut host = Host::new("127.0.0.1", port, false);
        host.resolve().unwrap();
        let client = ep.connect(&host).unwrap();

        assert!(matches!(
            ep.add_timer(client, Duration::from_secs(1), u64::MAX),
            Err(Error::WrongParams)
        ));
    }

    struct Nobody;

    impl super::Handler for Nobody {}

    #[test]
    fn stale_http_handle_reports_not_established() {
        let mut ep = endpoint();
        let listener = ep.listen(0, false).unwrap();
        assert_eq!(HttpState::Established, ep.state(listener));

        ep.shutdown(listener, false).unwrap();
        let mut nobody = Nobody;
        for _ in 0..5 {
            ep.poll(&mut nobody).unwrap();
        }
        assert_eq!(HttpState::NotEstablished, ep.state(listener));
    }

    #[test]
    fn send_raw_requires_tunneling_mode() {
        let mut ep = endpoint();
        let listener = ep.listen(0, false).unwrap();
        assert!(ep.send_raw(listener, b"x").is_err());
    }
}
