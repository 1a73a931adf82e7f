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

//! Single-threaded readiness reactor owning every socket.
//!
//! Connections live in a slab arena addressed by `(slot, generation)`
//! handles, so a reused slot can never be reached through a stale handle.
//! Each iteration first runs deferred teardowns and due timers (acting on
//! state the caller left behind while consuming the previous batch), then
//! waits up to 10 ms for readiness and walks the ready set once. User-level
//! outcomes surface as [`NetEvent`]s; the caller drains them after
//! `poll_once` returns.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::{Duration, Instant};

use log::{debug, error, trace, warn};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use slab::Slab;

use crate::buffer::{Buffer, READ_BUFFER_SIZE};
use crate::config::Config;
use crate::error::{CloseCode, Error, Result};
use crate::list::List;
use crate::resolver::Host;
use crate::timer::{TimerId, TimerKind, TimerList};
use crate::tls::TlsContext;

/// Readiness wait per iteration.
pub const WAIT_TIMEOUT: Duration = Duration::from_millis(10);

/// Attempts on one write buffer before the stuck-write watchdog logs.
pub const MAX_WRITE_TRIES: u32 = 1024;

/// Listen backlog.
pub const BACKLOG: u32 = 10;

const EVENTS_CAPACITY: usize = 1024;

/// Stable handle to a connection: arena slot plus generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId {
    slot: usize,
    gen: u64,
}

/// User-visible outcome of a reactor iteration.
#[derive(Debug)]
pub enum NetEvent {
    /// The connection reached its established state (TLS included).
    Established(ConnId),
    /// A listener produced a child connection.
    Accepted {
        /// The listening connection.
        listener: ConnId,
        /// The accepted child, already registered.
        conn: ConnId,
    },
    /// Bytes were appended to the connection's read buffer, and/or the
    /// peer finished its half of the stream.
    Data {
        /// The connection that became readable.
        conn: ConnId,
        /// The peer closed; no more bytes will arrive.
        closed: bool,
    },
    /// A user-level timer fired.
    Timer {
        /// Owning connection, or `None` for a global timer.
        conn: Option<ConnId>,
        /// The fired timer.
        timer: TimerId,
        /// Opaque value given at timer creation.
        udata: u64,
    },
    /// The connection was torn down; the handle is now stale.
    Closed {
        /// The connection that was destroyed.
        conn: ConnId,
        /// Its user data at teardown.
        udata: u64,
        /// Why it closed.
        code: CloseCode,
    },
}

/// Coarse connection state for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetState {
    /// Not connected (connecting, handshaking, closing, or gone).
    NotEstablished,
    /// Established and writable.
    Established,
    /// Established but draining towards close; no further writes.
    FlushAndClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Listening,
    Connecting,
    Established,
    TlsConnecting,
    TlsAccepting,
    TlsEstablished,
    TlsShutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Listen,
    Outgoing,
    Incoming,
}

#[derive(Debug)]
enum Sock {
    Listener(TcpListener),
    Stream(TcpStream),
}

impl Sock {
    fn source_mut(&mut self) -> &mut dyn mio::event::Source {
        match self {
            Sock::Listener(l) => l,
            Sock::Stream(s) => s,
        }
    }

    fn stream_mut(&mut self) -> &mut TcpStream {
        match self {
            Sock::Stream(s) => s,
            Sock::Listener(_) => unreachable!("listener has no stream"),
        }
    }
}

#[derive(Debug)]
struct WriteBuf {
    data: Vec<u8>,
    sent: usize,
    tries: u32,
}

#[derive(Debug)]
struct Conn {
    gen: u64,
    sock: Sock,
    tls: Option<rustls::Connection>,
    state: State,
    dirn: Direction,
    host: String,
    port: String,
    rb: Buffer,
    wq: List<WriteBuf>,
    timers: TimerList,
    state_timer: Option<TimerId>,
    udata: u64,
    interest: Interest,
    to_shutdown: Option<CloseCode>,
    flush_and_close: bool,
    shut_wr_done: bool,
    closed_emitted: bool,
    child_tls: bool,
}

impl Conn {
    fn id(&self, slot: usize) -> ConnId {
        ConnId {
            slot,
            gen: self.gen,
        }
    }
}

/// The reactor: poll, connection arena, global timers, and the shared TLS
/// contexts.
#[derive(Debug)]
pub struct Reactor {
    poll: Poll,
    events: Events,
    conns: Slab<Conn>,
    next_gen: u64,
    global_timers: TimerList,
    now: Instant,
    cfg: Config,
    tls: TlsContext,
    max_conns: usize,
}

impl Reactor {
    /// Creates a reactor from the named configuration and TLS contexts.
    pub fn new(cfg: Config, tls: TlsContext) -> Result<Reactor> {
        let max_conns = cfg.max_conns();
        Ok(Reactor {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENTS_CAPACITY),
            conns: Slab::with_capacity(max_conns.min(1024)),
            next_gen: 1,
            global_timers: TimerList::new(),
            now: Instant::now(),
            cfg,
            tls,
            max_conns,
        })
    }

    /// The reactor's cached notion of "now", refreshed every iteration.
    pub fn now(&self) -> Instant {
        self.now
    }

    /// The configuration this reactor runs with.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    fn alloc_gen(&mut self) -> u64 {
        let gen = self.next_gen;
        self.next_gen += 1;
        gen
    }

    fn conn(&self, id: ConnId) -> Result<&Conn> {
        self.conns
            .get(id.slot)
            .filter(|conn| conn.gen == id.gen)
            .ok_or(Error::WrongState)
    }

    fn conn_mut(&mut self, id: ConnId) -> Result<&mut Conn> {
        self.conns
            .get_mut(id.slot)
            .filter(|conn| conn.gen == id.gen)
            .ok_or(Error::WrongState)
    }

    /// True while the handle addresses a live connection.
    pub fn contains(&self, id: ConnId) -> bool {
        self.conn(id).is_ok()
    }

    /// The opaque user value attached to the connection.
    pub fn udata(&self, id: ConnId) -> Result<u64> {
        Ok(self.conn(id)?.udata)
    }

    /// Attaches an opaque user value to the connection.
    pub fn set_udata(&mut self, id: ConnId, udata: u64) -> Result<()> {
        self.conn_mut(id)?.udata = udata;
        Ok(())
    }

    /// Peer host and port strings cached on the connection.
    pub fn peer(&self, id: ConnId) -> Result<(&str, &str)> {
        let conn = self.conn(id)?;
        Ok((&conn.host, &conn.port))
    }

    /// Locally bound address (listeners report their listen address).
    pub fn local_addr(&self, id: ConnId) -> Result<SocketAddr> {
        match &self.conn(id)?.sock {
            Sock::Listener(l) => Ok(l.local_addr()?),
            Sock::Stream(s) => Ok(s.local_addr()?),
        }
    }

    /// Opens an outgoing connection to the host's resolved address.
    ///
    /// The connection surfaces as [`NetEvent::Established`] once TCP (and
    /// TLS, when the host asks for it) completes, bounded by the establish
    /// deadlines.
    pub fn connect(&mut self, host: &Host, udata: u64) -> Result<ConnId> {
        let addr = host.addr().ok_or(Error::WrongParams)?;
        if self.conns.len() >= self.max_conns {
            return Err(Error::ConnCapacity);
        }

        let stream = TcpStream::connect(addr)?;
        let tls = if host.use_tls {
            Some(rustls::Connection::Client(
                self.tls.client_session(&host.hostname)?,
            ))
        } else {
            None
        };

        let gen = self.alloc_gen();
        let now = self.now;
        let establish_timeout = self.cfg.net_establish_timeout;

        let mut conn = Conn {
            gen,
            sock: Sock::Stream(stream),
            tls,
            state: State::Connecting,
            dirn: Direction::Outgoing,
            host: host.hostname.clone(),
            port: host.port.clone(),
            rb: Buffer::with_capacity(READ_BUFFER_SIZE),
            wq: List::new(),
            timers: TimerList::new(),
            state_timer: None,
            udata,
            interest: Interest::READABLE.add(Interest::WRITABLE),
            to_shutdown: None,
            flush_and_close: false,
            shut_wr_done: false,
            closed_emitted: false,
            child_tls: false,
        };

        let timer = conn
            .timers
            .add(now, establish_timeout, TimerKind::Establish, 0)?;
        conn.state_timer = Some(timer);

        let entry = self.conns.vacant_entry();
        let slot = entry.key();
        let conn = entry.insert(conn);
        let interest = conn.interest;

        if let Err(e) =
            self.poll
                .registry()
                .register(conn.sock.source_mut(), Token(slot), interest)
        {
            self.conns.remove(slot);
            return Err(Error::Io(e));
        }

        debug!("connect id:{}/{} host:{}:{} tls:{}", slot, gen, host.hostname, host.port, host.use_tls);
        Ok(ConnId { slot, gen })
    }

    /// Binds a wildcard listener on `port` (0 picks an ephemeral port).
    ///
    /// Children inherit `use_tls` and surface as [`NetEvent::Accepted`]
    /// followed by their own establishment events.
    pub fn listen(&mut self, port: u16, use_tls: bool, udata: u64) -> Result<ConnId> {
        if self.conns.len() >= self.max_conns {
            return Err(Error::ConnCapacity);
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)?;

        let gen = self.alloc_gen();
        let conn = Conn {
            gen,
            sock: Sock::Listener(listener),
            tls: None,
            state: State::Listening,
            dirn: Direction::Listen,
            host: String::new(),
            port: port.to_string(),
            rb: Buffer::default(),
            wq: List::new(),
            timers: TimerList::new(),
            state_timer: None,
            udata,
            interest: Interest::READABLE,
            to_shutdown: None,
            flush_and_close: false,
            shut_wr_done: false,
            closed_emitted: false,
            child_tls: use_tls,
        };

        let entry = self.conns.vacant_entry();
        let slot = entry.key();
        let conn = entry.insert(conn);

        if let Err(e) = self.poll.registry().register(
            conn.sock.source_mut(),
            Token(slot),
            Interest::READABLE,
        ) {
            self.conns.remove(slot);
            return Err(Error::Io(e));
        }

        debug!("listen id:{}/{} port:{} tls:{}", slot, gen, port, use_tls);
        Ok(ConnId { slot, gen })
    }

    /// Queues bytes for transmission.
    ///
    /// With `flush_and_close` the connection drains its queue, shuts down
    /// its write half and closes, bounded by the flush deadline; no
    /// further posts or timers are accepted after that.
    pub fn post(&mut self, id: ConnId, data: &[u8], flush_and_close: bool) -> Result<()> {
        if data.is_empty() {
            return Err(Error::WrongParams);
        }

        let now = self.now;
        let flush_timeout = self.cfg.net_flush_and_close_timeout;

        let conn = self.conn_mut(id)?;
        if !matches!(conn.state, State::Established | State::TlsEstablished)
            || conn.to_shutdown.is_some()
            || conn.flush_and_close
        {
            return Err(Error::WrongState);
        }

        if flush_and_close {
            // no application timers matter past this point
            conn.timers.clear();
            let timer = conn
                .timers
                .add(now, flush_timeout, TimerKind::FlushClose, 0)?;
            conn.state_timer = Some(timer);
            conn.flush_and_close = true;
        }

        conn.wq.push_back(WriteBuf {
            data: data.to_vec(),
            sent: 0,
            tries: 0,
        });

        trace!("post id:{}/{} len:{} flush_and_close:{}", id.slot, id.gen, data.len(), flush_and_close);
        self.update_interest(id.slot);
        Ok(())
    }

    /// Requests teardown: immediate (deferred to the next iteration) or
    /// flush-and-close.
    pub fn shutdown(&mut self, id: ConnId, flush_and_close: bool) -> Result<()> {
        let now = self.now;
        let flush_timeout = self.cfg.net_flush_and_close_timeout;

        let conn = self.conn_mut(id)?;
        if conn.state == State::TlsShutdown
            || conn.to_shutdown.is_some()
            || conn.flush_and_close
        {
            return Err(Error::WrongState);
        }

        if flush_and_close {
            if !matches!(conn.state, State::Established | State::TlsEstablished) {
                return Err(Error::WrongState);
            }
            conn.timers.clear();
            let timer = conn
                .timers
                .add(now, flush_timeout, TimerKind::FlushClose, 0)?;
            conn.state_timer = Some(timer);
            conn.flush_and_close = true;

            if conn.wq.is_empty() && !tls_wants_write(conn) {
                self.drain_complete(id.slot);
            } else {
                self.update_interest(id.slot);
            }
        } else {
            conn.to_shutdown = Some(CloseCode::Success);
        }

        debug!("shutdown id:{}/{} flush_and_close:{}", id.slot, id.gen, flush_and_close);
        Ok(())
    }

    /// Coarse state for the handle.
    pub fn state(&self, id: ConnId) -> NetState {
        match self.conn(id) {
            Err(_) => NetState::NotEstablished,
            Ok(conn) => {
                if conn.to_shutdown.is_some() {
                    NetState::NotEstablished
                } else if matches!(
                    conn.state,
                    State::Established | State::TlsEstablished | State::Listening
                ) {
                    if conn.flush_and_close {
                        NetState::FlushAndClose
                    } else {
                        NetState::Established
                    }
                } else {
                    NetState::NotEstablished
                }
            }
        }
    }

    /// Arms a periodic user timer on the connection.
    pub fn conn_timer(&mut self, id: ConnId, shift: Duration, udata: u64) -> Result<TimerId> {
        let now = self.now;
        let conn = self.conn_mut(id)?;
        if matches!(
            conn.state,
            State::Listening | State::TlsShutdown | State::TlsAccepting
        ) || conn.to_shutdown.is_some()
            || conn.flush_and_close
        {
            return Err(Error::WrongState);
        }
        conn.timers.add(now, shift, TimerKind::User, udata)
    }

    /// Deletes a user timer on the connection.
    pub fn del_conn_timer(&mut self, id: ConnId, timer: TimerId) -> Result<()> {
        let conn = self.conn_mut(id)?;
        if matches!(
            conn.state,
            State::Listening | State::TlsShutdown | State::TlsAccepting
        ) || conn.to_shutdown.is_some()
            || conn.flush_and_close
        {
            return Err(Error::WrongState);
        }
        conn.timers.del(timer)
    }

    /// Arms a periodic global timer.
    pub fn global_timer(&mut self, shift: Duration, udata: u64) -> Result<TimerId> {
        let now = self.now;
        self.global_timers.add(now, shift, TimerKind::User, udata)
    }

    /// Deletes a global timer.
    pub fn del_global_timer(&mut self, timer: TimerId) -> Result<()> {
        self.global_timers.del(timer)
    }

    /// Moves the connection's read buffer out, so the caller can parse it
    /// while still operating on the reactor. Pair with
    /// [`restore_read_buf`](Reactor::restore_read_buf).
    pub fn take_read_buf(&mut self, id: ConnId) -> Result<Buffer> {
        let conn = self.conn_mut(id)?;
        Ok(std::mem::take(&mut conn.rb))
    }

    /// Puts the read buffer back after consuming `consumed` bytes. A stale
    /// handle drops the buffer (the connection died while parsing).
    pub fn restore_read_buf(&mut self, id: ConnId, mut buf: Buffer, consumed: usize) {
        if consumed > 0 {
            buf.consume(consumed);
        }
        if let Ok(conn) = self.conn_mut(id) {
            conn.rb = buf;
        }
    }

    /// One reactor iteration: deferred teardowns and timers first, then a
    /// bounded readiness wait and one dispatch per ready connection.
    /// Outcomes are appended to `out`.
    pub fn poll_once(&mut self, out: &mut Vec<NetEvent>) -> io::Result<()> {
        self.now = Instant::now();
        self.run_scheduled(out);

        match self.poll.poll(&mut self.events, Some(WAIT_TIMEOUT)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let ready: Vec<(usize, bool, bool)> = self
            .events
            .iter()
            .map(|ev| {
                let err = ev.is_error();
                (
                    ev.token().0,
                    ev.is_readable() || ev.is_read_closed() || err,
                    ev.is_writable() || ev.is_write_closed() || err,
                )
            })
            .collect();

        for (slot, readable, writable) in ready {
            self.dispatch(slot, readable, writable, out);
        }

        self.now = Instant::now();
        Ok(())
    }

    fn dispatch(&mut self, slot: usize, readable: bool, writable: bool, out: &mut Vec<NetEvent>) {
        let Some(conn) = self.conns.get(slot) else {
            return;
        };
        let gen = conn.gen;

        let mut skip = false;
        if readable && conn.to_shutdown.is_none() {
            skip = self.handle_read(slot, out);
        }

        // the read half may have destroyed or transitioned the connection
        let alive = self
            .conns
            .get(slot)
            .map_or(false, |c| c.gen == gen && c.to_shutdown.is_none());
        if writable && alive && !skip {
            self.handle_write(slot, out);
        }
    }

    fn handle_read(&mut self, slot: usize, out: &mut Vec<NetEvent>) -> bool {
        match self.conns[slot].state {
            State::Listening => {
                self.accept_loop(slot, out);
                true
            }
            State::Connecting => {
                self.check_connect(slot, out);
                true
            }
            State::Established => {
                self.plain_read(slot, out);
                false
            }
            State::TlsConnecting | State::TlsAccepting => {
                self.drive_handshake(slot, out);
                true
            }
            State::TlsEstablished => {
                self.tls_read(slot, out);
                false
            }
            State::TlsShutdown => {
                self.drive_tls_shutdown(slot, out);
                true
            }
        }
    }

    fn handle_write(&mut self, slot: usize, out: &mut Vec<NetEvent>) {
        match self.conns[slot].state {
            State::Listening => self.accept_loop(slot, out),
            State::Connecting => self.check_connect(slot, out),
            State::Established => self.plain_write(slot, out),
            State::TlsConnecting | State::TlsAccepting => self.drive_handshake(slot, out),
            State::TlsEstablished => self.tls_write(slot, out),
            State::TlsShutdown => self.drive_tls_shutdown(slot, out),
        }
    }

    fn accept_loop(&mut self, slot: usize, out: &mut Vec<NetEvent>) {
        loop {
            let listener = match &mut self.conns[slot].sock {
                Sock::Listener(l) => l,
                Sock::Stream(_) => unreachable!("accept on stream"),
            };

            match listener.accept() {
                Ok((stream, peer)) => self.create_accepted(slot, stream, peer, out),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(ref e) if is_transient_accept_error(e) => {
                    debug!("transient accept error on slot {}: {}", slot, e);
                }
                Err(e) => {
                    error!("accept failed on slot {}: {}", slot, e);
                    self.destroy(slot, CloseCode::ErrAccept, out);
                    return;
                }
            }
        }
    }

    fn create_accepted(
        &mut self,
        listener_slot: usize,
        stream: TcpStream,
        peer: SocketAddr,
        out: &mut Vec<NetEvent>,
    ) {
        if self.conns.len() >= self.max_conns {
            warn!("connection capacity reached, rejecting child from {}", peer);
            drop(stream);
            return;
        }

        let listener = &self.conns[listener_slot];
        let listener_id = listener.id(listener_slot);
        let child_tls = listener.child_tls;

        let tls = if child_tls {
            match self.tls.server_session() {
                Ok(session) => Some(rustls::Connection::Server(session)),
                Err(e) => {
                    error!("server session for child from {} failed: {}", peer, e);
                    return;
                }
            }
        } else {
            None
        };

        let gen = self.alloc_gen();
        let conn = Conn {
            gen,
            sock: Sock::Stream(stream),
            tls,
            state: State::Established,
            dirn: Direction::Incoming,
            host: peer.ip().to_string(),
            port: peer.port().to_string(),
            rb: Buffer::with_capacity(READ_BUFFER_SIZE),
            wq: List::new(),
            timers: TimerList::new(),
            state_timer: None,
            udata: 0,
            interest: Interest::READABLE.add(Interest::WRITABLE),
            to_shutdown: None,
            flush_and_close: false,
            shut_wr_done: false,
            closed_emitted: false,
            child_tls: false,
        };

        let entry = self.conns.vacant_entry();
        let slot = entry.key();
        let conn = entry.insert(conn);
        let interest = conn.interest;

        if let Err(e) =
            self.poll
                .registry()
                .register(conn.sock.source_mut(), Token(slot), interest)
        {
            error!("register child from {} failed: {}", peer, e);
            self.conns.remove(slot);
            return;
        }

        debug!("accepted id:{}/{} peer:{}", slot, gen, peer);
        out.push(NetEvent::Accepted {
            listener: listener_id,
            conn: ConnId { slot, gen },
        });

        if child_tls {
            let now = self.now;
            let accept_timeout = self.cfg.net_ssl_accept_timeout;
            let conn = &mut self.conns[slot];
            conn.state = State::TlsAccepting;
            match conn.timers.add(now, accept_timeout, TimerKind::TlsAccept, 0) {
                Ok(timer) => conn.state_timer = Some(timer),
                Err(_) => {
                    self.destroy(slot, CloseCode::ErrAccept, out);
                    return;
                }
            }
            self.update_interest(slot);
        } else {
            out.push(NetEvent::Established(ConnId { slot, gen }));
            self.update_interest(slot);
        }
    }

    fn check_connect(&mut self, slot: usize, out: &mut Vec<NetEvent>) {
        let conn = &mut self.conns[slot];
        let stream = conn.sock.stream_mut();

        match stream.take_error() {
            Ok(None) => {}
            Ok(Some(e)) => {
                error!(
                    "connect failed host:{}:{} error:{}",
                    conn.host, conn.port, e
                );
                self.destroy(slot, CloseCode::ErrEstablish, out);
                return;
            }
            Err(e) => {
                error!(
                    "connect state check failed host:{}:{} error:{}",
                    conn.host, conn.port, e
                );
                self.destroy(slot, CloseCode::ErrEstablish, out);
                return;
            }
        }

        match stream.peer_addr() {
            Ok(_) => self.established(slot, out),
            Err(ref e)
                if e.kind() == ErrorKind::NotConnected
                    || e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => {
                error!(
                    "connect failed host:{}:{} error:{}",
                    self.conns[slot].host, self.conns[slot].port, e
                );
                self.destroy(slot, CloseCode::ErrEstablish, out);
            }
        }
    }

    fn established(&mut self, slot: usize, out: &mut Vec<NetEvent>) {
        let now = self.now;
        let tls_timeout = self.cfg.net_ssl_establish_timeout;

        let conn = &mut self.conns[slot];
        if let Some(timer) = conn.state_timer.take() {
            let _ = conn.timers.del(timer);
        }

        if conn.tls.is_some() {
            debug!("tls connecting id:{}/{} host:{}:{}", slot, conn.gen, conn.host, conn.port);
            conn.state = State::TlsConnecting;
            match conn
                .timers
                .add(now, tls_timeout, TimerKind::TlsEstablish, 0)
            {
                Ok(timer) => conn.state_timer = Some(timer),
                Err(_) => {
                    self.destroy(slot, CloseCode::ErrEstablish, out);
                    return;
                }
            }
            self.drive_handshake(slot, out);
        } else {
            debug!("established id:{}/{} host:{}:{}", slot, conn.gen, conn.host, conn.port);
            conn.state = State::Established;
            out.push(NetEvent::Established(conn.id(slot)));
            self.update_interest(slot);
        }
    }

    fn drive_handshake(&mut self, slot: usize, out: &mut Vec<NetEvent>) {
        let fail_code = match self.conns[slot].dirn {
            Direction::Outgoing => CloseCode::ErrEstablish,
            _ => CloseCode::ErrAccept,
        };

        loop {
            let conn = &mut self.conns[slot];
            let Conn { sock, tls, .. } = conn;
            let tls = tls.as_mut().expect("handshake without session");
            let stream = sock.stream_mut();

            while tls.wants_write() {
                match tls.write_tls(stream) {
                    Ok(_) => {}
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        error!("handshake write failed id:{} error:{}", slot, e);
                        self.destroy(slot, fail_code, out);
                        return;
                    }
                }
            }

            if !tls.is_handshaking() {
                self.tls_established(slot, out);
                return;
            }

            if !tls.wants_read() {
                break;
            }

            match tls.read_tls(stream) {
                Ok(0) => {
                    debug!("peer closed during handshake id:{}", slot);
                    self.destroy(slot, fail_code, out);
                    return;
                }
                Ok(_) => match tls.process_new_packets() {
                    Ok(_) => continue,
                    Err(e) => {
                        error!("handshake failed id:{} error:{}", slot, e);
                        self.destroy(slot, fail_code, out);
                        return;
                    }
                },
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("handshake read failed id:{} error:{}", slot, e);
                    self.destroy(slot, fail_code, out);
                    return;
                }
            }
        }

        self.update_interest(slot);
    }

    fn tls_established(&mut self, slot: usize, out: &mut Vec<NetEvent>) {
        let conn = &mut self.conns[slot];
        if let Some(timer) = conn.state_timer.take() {
            let _ = conn.timers.del(timer);
        }
        conn.state = State::TlsEstablished;
        debug!("tls established id:{}/{} host:{}:{}", slot, conn.gen, conn.host, conn.port);
        out.push(NetEvent::Established(conn.id(slot)));

        // the final handshake flight may carry application data
        if self.drain_tls_plaintext(slot, out) {
            self.update_interest(slot);
        }
    }

    /// Moves decrypted bytes into the read buffer. Returns false when the
    /// connection was torn down.
    fn drain_tls_plaintext(&mut self, slot: usize, out: &mut Vec<NetEvent>) -> bool {
        let conn = &mut self.conns[slot];
        let id = conn.id(slot);
        let Conn { tls, rb, .. } = conn;
        let Some(tls) = tls.as_mut() else {
            return true;
        };

        let io_state = match tls.process_new_packets() {
            Ok(state) => state,
            Err(e) => {
                error!("tls error id:{} error:{}", slot, e);
                self.begin_close(slot, CloseCode::ErrRead, out);
                return false;
            }
        };

        let n = io_state.plaintext_bytes_to_read();
        let peer_closed = io_state.peer_has_closed();

        if n > 0 {
            while rb.remainder() < n {
                rb.grow(READ_BUFFER_SIZE);
            }
            if tls.reader().read_exact(&mut rb.space()[..n]).is_err() {
                self.begin_close(slot, CloseCode::ErrRead, out);
                return false;
            }
            rb.advance(n);
            if rb.needs_growth() {
                rb.grow(READ_BUFFER_SIZE);
            }
        }

        if n > 0 || peer_closed {
            out.push(NetEvent::Data {
                conn: id,
                closed: peer_closed,
            });
        }
        if peer_closed {
            self.conns[slot].to_shutdown = Some(CloseCode::Success);
        }
        true
    }

    fn plain_read(&mut self, slot: usize, out: &mut Vec<NetEvent>) {
        let id = self.conns[slot].id(slot);
        let mut closed = false;
        let mut got = 0usize;

        loop {
            let conn = &mut self.conns[slot];
            let Conn { sock, rb, .. } = conn;
            if rb.remainder() == 0 {
                rb.grow(READ_BUFFER_SIZE);
            }

            match sock.stream_mut().read(rb.space()) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => {
                    rb.advance(n);
                    got += n;
                    if rb.needs_growth() {
                        rb.grow(READ_BUFFER_SIZE);
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(
                        "read failed id:{} host:{}:{} error:{}",
                        slot, self.conns[slot].host, self.conns[slot].port, e
                    );
                    self.begin_close(slot, CloseCode::ErrRead, out);
                    return;
                }
            }
        }

        if got > 0 || closed {
            out.push(NetEvent::Data { conn: id, closed });
        }
        if closed {
            debug!("peer closed id:{}/{}", slot, id.gen);
            self.conns[slot].to_shutdown = Some(CloseCode::Success);
        }
    }

    fn tls_read(&mut self, slot: usize, out: &mut Vec<NetEvent>) {
        loop {
            let conn = &mut self.conns[slot];
            let Conn { sock, tls, .. } = conn;
            let Some(tls) = tls.as_mut() else {
                unreachable!("tls read without session")
            };

            match tls.read_tls(sock.stream_mut()) {
                Ok(0) => {
                    // peer dropped TCP without close_notify
                    let id = self.conns[slot].id(slot);
                    out.push(NetEvent::Data {
                        conn: id,
                        closed: true,
                    });
                    self.conns[slot].to_shutdown = Some(CloseCode::Success);
                    return;
                }
                Ok(_) => {
                    if !self.drain_tls_plaintext(slot, out) {
                        return;
                    }
                    if self
                        .conns
                        .get(slot)
                        .map_or(true, |c| c.to_shutdown.is_some())
                    {
                        return;
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("tls read failed id:{} error:{}", slot, e);
                    self.begin_close(slot, CloseCode::ErrRead, out);
                    return;
                }
            }
        }

        self.update_interest(slot);
    }

    fn plain_write(&mut self, slot: usize, out: &mut Vec<NetEvent>) {
        loop {
            let conn = &mut self.conns[slot];
            let Conn { sock, wq, .. } = conn;
            let Some(wbuf) = wq.front_mut() else {
                break;
            };

            wbuf.tries += 1;
            if wbuf.tries > MAX_WRITE_TRIES {
                error!(
                    "write buffer stuck id:{} sent:{} len:{} tries:{}",
                    slot,
                    wbuf.sent,
                    wbuf.data.len(),
                    wbuf.tries
                );
            }

            match sock.stream_mut().write(&wbuf.data[wbuf.sent..]) {
                Ok(n) => {
                    wbuf.sent += n;
                    if wbuf.sent == wbuf.data.len() {
                        wq.pop_front();
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(
                        "write failed id:{} host:{}:{} error:{}",
                        slot, self.conns[slot].host, self.conns[slot].port, e
                    );
                    self.begin_close(slot, CloseCode::ErrWrite, out);
                    return;
                }
            }
        }

        self.after_write(slot);
    }

    fn tls_write(&mut self, slot: usize, out: &mut Vec<NetEvent>) {
        // feed queued plaintext into the session, then flush its records
        loop {
            let conn = &mut self.conns[slot];
            let Conn { tls, wq, .. } = conn;
            let Some(tls) = tls.as_mut() else {
                unreachable!("tls write without session")
            };
            let Some(wbuf) = wq.front_mut() else {
                break;
            };

            wbuf.tries += 1;
            if wbuf.tries > MAX_WRITE_TRIES {
                error!(
                    "write buffer stuck id:{} sent:{} len:{} tries:{}",
                    slot,
                    wbuf.sent,
                    wbuf.data.len(),
                    wbuf.tries
                );
            }

            match tls.writer().write(&wbuf.data[wbuf.sent..]) {
                Ok(n) => {
                    wbuf.sent += n;
                    if wbuf.sent == wbuf.data.len() {
                        wq.pop_front();
                    }
                }
                Err(e) => {
                    error!("tls write failed id:{} error:{}", slot, e);
                    self.begin_close(slot, CloseCode::ErrWrite, out);
                    return;
                }
            }
        }

        if !self.flush_tls(slot, out) {
            return;
        }

        self.after_write(slot);
    }

    /// Writes pending TLS records to the socket. Returns false when the
    /// connection was torn down.
    fn flush_tls(&mut self, slot: usize, out: &mut Vec<NetEvent>) -> bool {
        loop {
            let conn = &mut self.conns[slot];
            let Conn { sock, tls, .. } = conn;
            let Some(tls) = tls.as_mut() else {
                return true;
            };
            if !tls.wants_write() {
                return true;
            }

            match tls.write_tls(sock.stream_mut()) {
                Ok(_) => {}
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return true,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("tls flush failed id:{} error:{}", slot, e);
                    self.begin_close(slot, CloseCode::ErrWrite, out);
                    return false;
                }
            }
        }
    }

    fn after_write(&mut self, slot: usize) {
        let conn = &self.conns[slot];
        let drained = conn.wq.is_empty() && !tls_wants_write(conn);

        if drained && conn.flush_and_close && !conn.shut_wr_done {
            self.drain_complete(slot);
        }
        if self.conns.contains(slot) {
            self.update_interest(slot);
        }
    }

    /// The flush-and-close queue has drained: send our FIN (plain) or
    /// close_notify (TLS) and keep reading until the peer closes or the
    /// deadline fires.
    fn drain_complete(&mut self, slot: usize) {
        let conn = &mut self.conns[slot];
        debug!("flush drained id:{}/{}", slot, conn.gen);

        match conn.tls {
            None => {
                if let Sock::Stream(s) = &conn.sock {
                    let _ = s.shutdown(Shutdown::Write);
                }
                conn.shut_wr_done = true;
            }
            Some(ref mut tls) => {
                tls.send_close_notify();
                conn.shut_wr_done = true;
                // records flushed by the write path
            }
        }
        self.update_interest(slot);
    }

    fn drive_tls_shutdown(&mut self, slot: usize, out: &mut Vec<NetEvent>) {
        if !self.flush_tls(slot, out) {
            return;
        }

        let conn = &mut self.conns[slot];
        let Some(tls) = conn.tls.as_mut() else {
            unreachable!("tls shutdown without session")
        };

        if tls.wants_write() {
            // close_notify not yet flushed
            self.update_interest(slot);
            return;
        }

        self.destroy(slot, CloseCode::Success, out);
    }

    /// Begins an orderly close. TLS-established connections transition to
    /// the shutdown state (the close event is emitted now, the close_notify
    /// drains under its own deadline); everything else is destroyed
    /// immediately.
    fn begin_close(&mut self, slot: usize, code: CloseCode, out: &mut Vec<NetEvent>) {
        let shutdown_timeout = self.cfg.net_ssl_shutdown_timeout;
        let now = self.now;

        let conn = &mut self.conns[slot];
        if conn.state == State::TlsEstablished {
            debug!("tls shutdown id:{}/{} code:{}", slot, conn.gen, code);
            conn.timers.clear();
            conn.state_timer = None;
            conn.state = State::TlsShutdown;

            if !conn.shut_wr_done {
                if let Some(tls) = conn.tls.as_mut() {
                    tls.send_close_notify();
                }
                conn.shut_wr_done = true;
            }

            match conn
                .timers
                .add(now, shutdown_timeout, TimerKind::TlsShutdown, 0)
            {
                Ok(timer) => conn.state_timer = Some(timer),
                Err(_) => {
                    self.destroy(slot, code, out);
                    return;
                }
            }

            if !conn.closed_emitted {
                conn.closed_emitted = true;
                out.push(NetEvent::Closed {
                    conn: conn.id(slot),
                    udata: conn.udata,
                    code,
                });
            }

            self.update_interest(slot);
        } else {
            self.destroy(slot, code, out);
        }
    }

    fn destroy(&mut self, slot: usize, code: CloseCode, out: &mut Vec<NetEvent>) {
        let mut conn = self.conns.remove(slot);
        debug!(
            "destroy id:{}/{} host:{}:{} code:{}",
            slot, conn.gen, conn.host, conn.port, code
        );

        let _ = self.poll.registry().deregister(conn.sock.source_mut());

        if let Sock::Stream(stream) = &conn.sock {
            let how = if conn.shut_wr_done {
                Shutdown::Read
            } else {
                Shutdown::Both
            };
            let _ = stream.shutdown(how);
        }

        if !conn.closed_emitted {
            out.push(NetEvent::Closed {
                conn: ConnId {
                    slot,
                    gen: conn.gen,
                },
                udata: conn.udata,
                code,
            });
        }
    }

    fn run_scheduled(&mut self, out: &mut Vec<NetEvent>) {
        let now = self.now;

        let slots: Vec<usize> = self.conns.iter().map(|(slot, _)| slot).collect();
        for slot in slots {
            let Some(conn) = self.conns.get_mut(slot) else {
                continue;
            };

            if let Some(code) = conn.to_shutdown.take() {
                self.begin_close(slot, code, out);
                continue;
            }

            let fired = conn.timers.due(now);
            for f in fired {
                let Some(conn) = self.conns.get_mut(slot) else {
                    break;
                };
                let id = conn.id(slot);

                match f.kind {
                    TimerKind::Establish | TimerKind::TlsEstablish => {
                        debug!("establish deadline id:{}/{}", slot, id.gen);
                        conn.to_shutdown = Some(CloseCode::ErrEstablish);
                    }
                    TimerKind::TlsAccept => {
                        debug!("accept deadline id:{}/{}", slot, id.gen);
                        conn.to_shutdown = Some(CloseCode::ErrAccept);
                    }
                    TimerKind::TlsShutdown => {
                        debug!("tls shutdown deadline id:{}/{}", slot, id.gen);
                        conn.to_shutdown = Some(CloseCode::ErrShutdown);
                    }
                    TimerKind::FlushClose => {
                        let code = if conn.wq.is_empty() && !tls_wants_write(conn) {
                            CloseCode::Success
                        } else {
                            CloseCode::ErrShutdown
                        };
                        debug!("flush deadline id:{}/{} code:{}", slot, id.gen, code);
                        conn.to_shutdown = Some(code);
                    }
                    TimerKind::User => {
                        out.push(NetEvent::Timer {
                            conn: Some(id),
                            timer: f.id,
                            udata: f.udata,
                        });
                    }
                }
            }

            // a deadline set during the batch closes the connection now
            if let Some(code) = self
                .conns
                .get_mut(slot)
                .and_then(|conn| conn.to_shutdown.take())
            {
                if self.conns[slot].state == State::TlsShutdown {
                    // the close event already went out at shutdown start
                    self.destroy(slot, code, out);
                } else {
                    self.begin_close(slot, code, out);
                }
            }
        }

        for f in self.global_timers.due(now) {
            if f.kind == TimerKind::User {
                out.push(NetEvent::Timer {
                    conn: None,
                    timer: f.id,
                    udata: f.udata,
                });
            }
        }
    }

    fn update_interest(&mut self, slot: usize) {
        let Some(conn) = self.conns.get_mut(slot) else {
            return;
        };

        let wants_write = match conn.state {
            State::Listening => false,
            State::Connecting => true,
            State::Established => !conn.wq.is_empty(),
            State::TlsConnecting | State::TlsAccepting => {
                conn.tls.as_ref().map_or(false, |t| t.wants_write())
            }
            State::TlsEstablished => {
                !conn.wq.is_empty()
                    || conn.tls.as_ref().map_or(false, |t| t.wants_write())
            }
            State::TlsShutdown => conn.tls.as_ref().map_or(false, |t| t.wants_write()),
        };

        let desired = if wants_write {
            Interest::READABLE.add(Interest::WRITABLE)
        } else {
            Interest::READABLE
        };

        if desired != conn.interest {
            conn.interest = desired;
            let interest = conn.interest;
            if let Err(e) =
                self.poll
                    .registry()
                    .reregister(conn.sock.source_mut(), Token(slot), interest)
            {
                error!("reregister failed id:{} error:{}", slot, e);
            }
        }
    }
}

fn tls_wants_write(conn: &Conn) -> bool {
    conn.tls.as_ref().map_or(false, |t| t.wants_write())
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::NetworkDown
            | ErrorKind::NetworkUnreachable
            | ErrorKind::HostUnreachable
            | ErrorKind::Unsupported
    )
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use crate::config::Config;
    use crate::error::CloseCode;
    use crate::resolver::Host;
    use crate::tls::TlsContext;

    use super::{NetEvent, NetState, Reactor};

    fn reactor() -> Reactor {
        let cfg = Config::default();
        let tls = TlsContext::from_config(&cfg).unwrap();
        Reactor::new(cfg, tls).unwrap()
    }

    fn spin<F>(reactor: &mut Reactor, out: &mut Vec<NetEvent>, mut done: F)
    where
        F: FnMut(&[NetEvent]) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(out.as_slice()) {
            assert!(Instant::now() < deadline, "reactor test timed out");
            reactor.poll_once(out).unwrap();
        }
    }

    fn local_host(reactor: &Reactor, id: super::ConnId) -> Host {
        let port = reactor.local_addr(id).unwrap().port();
        let mut host = Host::new("127.0.0.1", port, false);
        host.resolve().unwrap();
        host
    }

    #[test]
    fn connect_accept_and_exchange_bytes() {
        let mut r = reactor();
        let mut out = Vec::new();

        let listener = r.listen(0, false, 1).unwrap();
        let host = local_host(&r, listener);
        let client = r.connect(&host, 2).unwrap();

        spin(&mut r, &mut out, |evs| {
            evs.iter()
                .filter(|ev| matches!(ev, NetEvent::Established(_)))
                .count()
                >= 2
        });

        let accepted = out
            .iter()
            .find_map(|ev| match ev {
                NetEvent::Accepted { conn, .. } => Some(*conn),
                _ => None,
            })
            .expect("accepted event");

        r.post(client, b"ping", false).unwrap();
        out.clear();
        spin(&mut r, &mut out, |evs| {
            evs.iter().any(|ev| matches!(ev, NetEvent::Data { .. }))
        });

        let buf = r.take_read_buf(accepted).unwrap();
        assert_eq!(b"ping", buf.filled());
        let n = buf.used();
        r.restore_read_buf(accepted, buf, n);

        assert_eq!(NetState::Established, r.state(client));
        assert_eq!(NetState::Established, r.state(accepted));
    }

    #[test]
    fn shutdown_emits_closed_with_success() {
        let mut r = reactor();
        let mut out = Vec::new();

        let listener = r.listen(0, false, 1).unwrap();
        let host = local_host(&r, listener);
        let client = r.connect(&host, 2).unwrap();

        spin(&mut r, &mut out, |evs| {
            evs.iter()
                .filter(|ev| matches!(ev, NetEvent::Established(_)))
                .count()
                >= 2
        });

        r.shutdown(client, false).unwrap();
        out.clear();
        spin(&mut r, &mut out, |evs| {
            evs.iter()
                .any(|ev| matches!(ev, NetEvent::Closed { conn, .. } if *conn == client))
        });

        let code = out
            .iter()
            .find_map(|ev| match ev {
                NetEvent::Closed { conn, code, .. } if *conn == client => Some(*code),
                _ => None,
            })
            .unwrap();
        assert_eq!(CloseCode::Success, code);
        assert_eq!(NetState::NotEstablished, r.state(client));

        // the server side observes the close
        out.clear();
        spin(&mut r, &mut out, |evs| {
            evs.iter().any(|ev| {
                matches!(
                    ev,
                    NetEvent::Data { closed: true, .. } | NetEvent::Closed { .. }
                )
            })
        });
    }

    #[test]
    fn flush_and_close_drains_queued_bytes_first() {
        let mut r = reactor();
        let mut out = Vec::new();

        let listener = r.listen(0, false, 1).unwrap();
        let host = local_host(&r, listener);
        let client = r.connect(&host, 2).unwrap();

        spin(&mut r, &mut out, |evs| {
            evs.iter()
                .filter(|ev| matches!(ev, NetEvent::Established(_)))
                .count()
                >= 2
        });
        let accepted = out
            .iter()
            .find_map(|ev| match ev {
                NetEvent::Accepted { conn, .. } => Some(*conn),
                _ => None,
            })
            .unwrap();

        r.post(client, b"goodbye", true).unwrap();
        assert_eq!(NetState::FlushAndClose, r.state(client));
        // posting after flush-and-close is refused
        assert!(r.post(client, b"more", false).is_err());

        out.clear();
        spin(&mut r, &mut out, |evs| {
            evs.iter()
                .any(|ev| matches!(ev, NetEvent::Data { closed: true, .. }))
        });

        let buf = r.take_read_buf(accepted).unwrap();
        assert_eq!(b"goodbye", buf.filled());
        let n = buf.used();
        r.restore_read_buf(accepted, buf, n);
    }

    #[test]
    fn stale_handle_is_refused() {
        let mut r = reactor();
        let mut out = Vec::new();

        let listener = r.listen(0, false, 1).unwrap();
        let host = local_host(&r, listener);
        let client = r.connect(&host, 2).unwrap();

        spin(&mut r, &mut out, |evs| {
            evs.iter()
                .filter(|ev| matches!(ev, NetEvent::Established(_)))
                .count()
                >= 2
        });

        r.shutdown(client, false).unwrap();
        out.clear();
        spin(&mut r, &mut out, |evs| {
            evs.iter().any(|ev| matches!(ev, NetEvent::Closed { .. }))
        });

        assert!(r.post(client, b"x", false).is_err());
        assert!(r.shutdown(client, false).is_err());
        assert!(r.conn_timer(client, Duration::from_secs(1), 0).is_err());
        assert_eq!(NetState::NotEstablished, r.state(client));
    }

    #[test]
    fn connection_capacity_is_enforced() {
        let mut cfg = Config::default();
        cfg.high_fanout = false;
        let tls = TlsContext::from_config(&cfg).unwrap();
        let mut r = Reactor::new(cfg, tls).unwrap();

        let listener = r.listen(0, false, 1).unwrap();
        let host = local_host(&r, listener);

        let mut made = vec![];
        loop {
            match r.connect(&host, 0) {
                Ok(id) => made.push(id),
                Err(crate::error::Error::ConnCapacity) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
            assert!(made.len() <= crate::config::MAX_CONNS);
        }
        assert_eq!(crate::config::MAX_CONNS - 1, made.len());
    }

    #[test]
    fn global_timer_fires_periodically() {
        let mut r = reactor();
        let mut out = Vec::new();

        r.global_timer(Duration::from_millis(20), 42).unwrap();

        spin(&mut r, &mut out, |evs| {
            evs.iter()
                .filter(|ev| matches!(ev, NetEvent::Timer { udata: 42, .. }))
                .count()
                >= 3
        });
    }

    #[test]
    fn conn_timer_fires_and_can_be_deleted() {
        let mut r = reactor();
        let mut out = Vec::new();

        let listener = r.listen(0, false, 1).unwrap();
        let host = local_host(&r, listener);
        let client = r.connect(&host, 2).unwrap();

        spin(&mut r, &mut out, |evs| {
            evs.iter()
                .filter(|ev| matches!(ev, NetEvent::Established(_)))
                .count()
                >= 2
        });

        let timer = r.conn_timer(client, Duration::from_millis(20), 7).unwrap();
        out.clear();
        spin(&mut r, &mut out, |evs| {
            evs.iter().any(|ev| {
                matches!(ev, NetEvent::Timer { conn: Some(c), udata: 7, .. } if *c == client)
            })
        });

        r.del_conn_timer(client, timer).unwrap();
        out.clear();
        for _ in 0..10 {
            r.poll_once(&mut out).unwrap();
        }
        assert!(!out
            .iter()
            .any(|ev| matches!(ev, NetEvent::Timer { udata: 7, .. })));
    }

    #[test]
    fn establish_timeout_reports_err_establish() {
        let mut cfg = Config::default();
        cfg.net_establish_timeout = Duration::from_millis(50);
        let tls = TlsContext::from_config(&cfg).unwrap();
        let mut r = Reactor::new(cfg, tls).unwrap();
        let mut out = Vec::new();

        // a host that will not answer: reserved TEST-NET-1 address
        let mut host = Host::new("192.0.2.1", 81, false);
        host.resolve().unwrap();
        let client = r.connect(&host, 1).unwrap();

        spin(&mut r, &mut out, |evs| {
            evs.iter()
                .any(|ev| matches!(ev, NetEvent::Closed { conn, .. } if *conn == client))
        });

        let code = out
            .iter()
            .find_map(|ev| match ev {
                NetEvent::Closed { conn, code, .. } if *conn == client => Some(*code),
                _ => None,
            })
            .unwrap();
        assert_eq!(CloseCode::ErrEstablish, code);
    }

    #[test]
    fn tls_establish_timeout_against_silent_peer() {
        let mut cfg = Config::default();
        cfg.net_ssl_establish_timeout = Duration::from_millis(100);
        let tls = TlsContext::from_config(&cfg).unwrap();
        let mut r = Reactor::new(cfg, tls).unwrap();
        let mut out = Vec::new();

        // plain listener that accepts TCP but never speaks TLS
        let listener = r.listen(0, false, 1).unwrap();
        let port = r.local_addr(listener).unwrap().port();
        let mut host = Host::new("127.0.0.1", port, true);
        host.resolve().unwrap();
        let client = r.connect(&host, 2).unwrap();

        spin(&mut r, &mut out, |evs| {
            evs.iter()
                .any(|ev| matches!(ev, NetEvent::Closed { conn, .. } if *conn == client))
        });

        let code = out
            .iter()
            .find_map(|ev| match ev {
                NetEvent::Closed { conn, code, .. } if *conn == client => Some(*code),
                _ => None,
            })
            .unwrap();
        assert_eq!(CloseCode::ErrEstablish, code);
    }
}
