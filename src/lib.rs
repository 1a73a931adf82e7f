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

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! skiff is an event-driven HTTP/1.x networking core for building forward
//! proxies, application servers and HTTP clients.
//!
//! A single-threaded [`Reactor`] owns every socket and drives plain and
//! TLS transports through per-connection state machines. On top of it, an
//! [`Endpoint`] speaks HTTP/1.x: a streaming parser (chunked transfer and
//! gzip bodies included), a canonical encoder, a pipelined message queue
//! that preserves request order for server responses, and a CONNECT
//! tunnel mode for opaque forwarding. Applications implement [`Handler`]
//! and drive the endpoint loop:
//!
//! ```no_run
//! use skiff::{Config, Endpoint, Handler, HttpId, Message, OwnedMessage};
//!
//! struct Hello;
//!
//! impl Handler for Hello {
//!     fn on_request(
//!         &mut self,
//!         ep: &mut Endpoint,
//!         conn: HttpId,
//!         msg_id: Option<skiff::MsgId>,
//!         _msg: &Message<'_>,
//!     ) {
//!         if let Some(msg_id) = msg_id {
//!             let reply = OwnedMessage {
//!                 status_code: 200,
//!                 raw_body: b"hello".to_vec(),
//!                 ..Default::default()
//!             };
//!             let _ = ep.respond(conn, msg_id, &reply);
//!         }
//!     }
//! }
//!
//! fn main() -> skiff::Result<()> {
//!     let mut ep = Endpoint::new(Config::default())?;
//!     ep.listen(8080, false)?;
//!     ep.run(&mut Hello)
//! }
//! ```

pub mod buffer;
pub mod config;
mod encode;
pub mod error;
pub mod form;
pub mod http;
pub mod list;
pub mod parser;
pub mod reactor;
pub mod resolver;
pub mod table;
mod timer;
pub mod tls;

pub use config::Config;
pub use error::{CloseCode, Error, Result};
pub use http::{Endpoint, Handler, HttpId, HttpState, MsgId, PostState};
pub use parser::{Message, OwnedMessage, OwnedRawField, RawField};
pub use reactor::{ConnId, NetEvent, NetState, Reactor};
pub use resolver::{Host, HostList};
pub use timer::TimerId;
pub use tls::TlsContext;
