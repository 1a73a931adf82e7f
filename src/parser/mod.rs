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

//! Streaming HTTP/1.x message parser.
//!
//! The parser is fed the connection's accumulated read buffer and records
//! field locations as offsets. The read buffer may be reallocated between
//! feeds, so offsets are converted to borrowed slices only at
//! end-of-message by [`ReadState::resolve`], before any handler observes
//! the message.

mod chunked;
mod header;

use std::fmt::Display;
use std::io::Read;

use flate2::read::GzDecoder;

/// Maximum length of one header line.
pub const MAX_LINE_LEN: usize = 16384;
/// Maximum number of header lines per message.
pub const MAX_LINES: u32 = 128;
/// Maximum total header size in bytes.
pub const MAX_HDR_LEN: usize = 65536;

/// Lowest valid status code.
pub const STATUS_CODE_MIN: u16 = 100;
/// Highest valid status code.
pub const STATUS_CODE_MAX: u16 = 599;

pub(crate) fn is_printable_ascii(b: u8) -> bool {
    (32..=126).contains(&b)
}

/// Which side of the exchange this parser reads for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Reads responses (status lines).
    Client,
    /// Reads requests (request lines).
    Server,
}

/// Represents possible failures while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Invalid status line.
    Status,
    /// Invalid request line.
    Request,
    /// Invalid header field.
    Header,
    /// Continuation line without a preceding raw field.
    Fold,
    /// Invalid byte or CR/LF sequence.
    Line,
    /// A header line exceeds the line limit.
    LineTooLong,
    /// Too many header lines.
    TooManyLines,
    /// The header block exceeds the total size limit.
    HeaderTooLarge,
    /// The message has no usable body framing.
    Framing,
    /// Invalid chunk-size line.
    ChunkSize,
    /// Invalid chunk data terminator.
    ChunkData,
    /// Invalid chunked trailer.
    Trailer,
    /// The gzip-encoded body failed to inflate.
    Gzip,
}

impl ParseError {
    fn description_str(&self) -> &'static str {
        match *self {
            ParseError::Status => "invalid status line",
            ParseError::Request => "invalid request line",
            ParseError::Header => "invalid header field",
            ParseError::Fold => "invalid continuation line",
            ParseError::Line => "invalid byte in header",
            ParseError::LineTooLong => "header line too long",
            ParseError::TooManyLines => "too many header lines",
            ParseError::HeaderTooLarge => "header too large",
            ParseError::Framing => "missing body framing",
            ParseError::ChunkSize => "invalid chunk size",
            ParseError::ChunkData => "invalid chunk data",
            ParseError::Trailer => "invalid chunked trailer",
            ParseError::Gzip => "gzip inflate failed",
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description_str())
    }
}

impl std::error::Error for ParseError {}

/// Byte span into the read buffer, recorded while streaming.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Span {
    pub(crate) ndx: usize,
    pub(crate) len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChType {
    Ch,
    Cr,
    Lf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TopState {
    StatusLine,
    RequestLine,
    HeaderFields,
    Body,
    Eom,
}

#[derive(Debug)]
pub(crate) struct HdrState {
    pub(crate) last_ch_type: ChType,
    pub(crate) last_line_begin: usize,
    pub(crate) first_colon: Option<usize>,
    pub(crate) is_raw_field: bool,
    pub(crate) line_num: u32,
    pub(crate) is_http10: bool,
    pub(crate) no_content_length: bool,
    pub(crate) body_until_closed: bool,
    pub(crate) content_length_seen: bool,
    pub(crate) connection_seen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ChunkStage {
    #[default]
    Size,
    Data,
    Last,
}

#[derive(Debug, Default)]
pub(crate) struct ChunkState {
    pub(crate) stage: ChunkStage,
    pub(crate) last_ch_type: Option<ChType>,
    pub(crate) size_begin: Option<usize>,
    pub(crate) size_len: usize,
    pub(crate) size_val: usize,
    pub(crate) data_begin: Option<usize>,
    pub(crate) has_data: bool,
    pub(crate) trailer_line_begin: Option<usize>,
    pub(crate) trailer_line_len: usize,
}

#[derive(Debug)]
pub(crate) struct RawFieldSpan {
    pub(crate) key: Span,
    pub(crate) values: Vec<Span>,
}

/// Field locations and flags accumulated for the in-flight message.
#[derive(Debug, Default)]
pub(crate) struct Fields {
    pub(crate) status_code: u16,
    pub(crate) url: Option<Span>,
    pub(crate) host: Option<Span>,
    pub(crate) user_agent: Option<Span>,
    pub(crate) location: Option<Span>,
    pub(crate) accept_encoding: Option<Span>,
    pub(crate) content_encoding: Option<Span>,
    pub(crate) transfer_encoding: Option<Span>,
    pub(crate) raw_body_ndx: usize,
    pub(crate) raw_body_len: usize,
    pub(crate) is_options_method: bool,
    pub(crate) is_connect_method: bool,
    pub(crate) connection_close: bool,
    pub(crate) transfer_encoding_chunked: bool,
    pub(crate) raw_fields: Vec<RawFieldSpan>,
    pub(crate) body: Option<Vec<u8>>,
}

/// Outcome of one [`ReadState::feed`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum FeedResult {
    /// The message is still incomplete; feed more bytes later.
    NeedMore,
    /// A complete message ends after this many bytes of the buffer.
    Complete(usize),
}

/// Streaming parser state for one in-flight message.
#[derive(Debug)]
pub struct ReadState {
    role: Role,
    pub(crate) state: TopState,
    pub(crate) hdr: HdrState,
    pub(crate) chunked: ChunkState,
    pub(crate) fields: Fields,
    pub(crate) n: usize,
}

impl ReadState {
    /// Fresh parser state for one message in the given role.
    pub fn new(role: Role) -> Self {
        ReadState {
            role,
            state: match role {
                Role::Client => TopState::StatusLine,
                Role::Server => TopState::RequestLine,
            },
            hdr: HdrState {
                last_ch_type: ChType::Lf,
                last_line_begin: 0,
                first_colon: None,
                is_raw_field: false,
                line_num: 0,
                is_http10: false,
                no_content_length: role == Role::Client,
                body_until_closed: false,
                content_length_seen: false,
                connection_seen: false,
            },
            chunked: ChunkState::default(),
            fields: Fields::default(),
            n: 0,
        }
    }

    /// The parser's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current stage name, for diagnostics.
    pub fn stage(&self) -> &'static str {
        match self.state {
            TopState::StatusLine => "status-line",
            TopState::RequestLine => "request-line",
            TopState::HeaderFields => "header-fields",
            TopState::Body => "body",
            TopState::Eom => "end-of-message",
        }
    }

    /// Status code parsed so far, for diagnostics.
    pub fn status_code(&self) -> u16 {
        self.fields.status_code
    }

    /// Target parsed so far, resolved against `buf`, for diagnostics.
    pub fn url<'b>(&self, buf: &'b [u8]) -> Option<&'b str> {
        self.fields
            .url
            .filter(|s| s.ndx + s.len <= buf.len())
            .map(|s| span_str(buf, s))
    }

    /// Feeds the accumulated unconsumed bytes of the connection.
    ///
    /// `buf` always starts at the beginning of the in-flight message and
    /// only ever grows between calls; the parser resumes from its internal
    /// position. `is_closed` reports that the peer finished the stream,
    /// which terminates read-until-close bodies and is a protocol error in
    /// the middle of a framed request.
    pub fn feed(&mut self, buf: &[u8], is_closed: bool) -> Result<FeedResult, ParseError> {
        if matches!(
            self.state,
            TopState::StatusLine | TopState::RequestLine | TopState::HeaderFields
        ) {
            header::parse_hdr(self, buf)?;
        }

        debug_assert!(self.n <= buf.len());

        if self.state == TopState::Body && !self.hdr.body_until_closed {
            self.select_body_framing(is_closed)?;
        }

        if self.state == TopState::Body {
            if self.hdr.body_until_closed {
                self.parse_body_until_closed(buf, is_closed);
            } else if self.fields.transfer_encoding_chunked {
                chunked::parse_chunked_body(self, buf)?;
            } else {
                self.parse_body(buf)?;
            }
        }

        if self.state == TopState::Eom {
            if self.hdr.is_http10 {
                self.fields.connection_close = true;
            }
            return Ok(FeedResult::Complete(self.n));
        }

        Ok(FeedResult::NeedMore)
    }

    fn select_body_framing(&mut self, is_closed: bool) -> Result<(), ParseError> {
        let unframed =
            self.fields.raw_body_len == 0 && !self.fields.transfer_encoding_chunked;

        match self.role {
            Role::Server => {
                if is_closed {
                    // peer closed mid-request
                    return Err(ParseError::Framing);
                }
                if unframed {
                    self.state = TopState::Eom;
                }
            }
            Role::Client => {
                if unframed {
                    if self.hdr.no_content_length {
                        let code = self.fields.status_code;
                        if (100..=199).contains(&code) || code == 204 || code == 304 {
                            self.state = TopState::Eom;
                        } else if self.fields.connection_close {
                            self.hdr.body_until_closed = true;
                        } else {
                            return Err(ParseError::Framing);
                        }
                    } else {
                        self.state = TopState::Eom;
                    }
                }
            }
        }
        Ok(())
    }

    fn parse_body(&mut self, buf: &[u8]) -> Result<(), ParseError> {
        if self.n < buf.len() {
            if self.fields.raw_body_ndx == 0 {
                if self.n == 0 {
                    return Err(ParseError::Framing);
                }
                self.fields.raw_body_ndx = self.n;
            }

            if self.n + self.fields.raw_body_len <= buf.len() {
                self.n += self.fields.raw_body_len;
                self.state = TopState::Eom;
            }
        }
        Ok(())
    }

    fn parse_body_until_closed(&mut self, buf: &[u8], is_closed: bool) {
        if self.n < buf.len() {
            if self.fields.raw_body_ndx == 0 {
                self.fields.raw_body_ndx = self.n;
            }

            self.fields.raw_body_len = buf.len() - self.fields.raw_body_ndx;

            if is_closed {
                self.n = self.fields.raw_body_ndx + self.fields.raw_body_len;
                self.state = TopState::Eom;
            }
        }
    }

    /// Converts the recorded offsets into a borrowed message view and runs
    /// gzip inflation. `buf` must hold the same accumulated bytes the
    /// state was fed, up to at least the completed length.
    pub fn resolve(self, buf: &[u8]) -> Result<Message<'_>, ParseError> {
        let fields = self.fields;

        let raw_body = if fields.raw_body_ndx != 0 {
            let end = fields.raw_body_ndx + fields.raw_body_len;
            debug_assert!(end <= buf.len());
            &buf[fields.raw_body_ndx..end.min(buf.len())]
        } else {
            &buf[..0]
        };

        let content_encoding = fields.content_encoding.map(|s| span_str(buf, s));

        let mut body = fields.body;
        if let Some(encoding) = content_encoding {
            if encoding.eq_ignore_ascii_case("gzip") {
                let src: &[u8] = body.as_deref().unwrap_or(raw_body);
                if !src.is_empty() {
                    let mut out = Vec::with_capacity(src.len().saturating_mul(10));
                    GzDecoder::new(src)
                        .read_to_end(&mut out)
                        .map_err(|_| ParseError::Gzip)?;
                    body = Some(out);
                }
            }
        }

        let raw_fields = fields
            .raw_fields
            .iter()
            .map(|f| RawField {
                key: span_str(buf, f.key),
                values: f.values.iter().map(|&v| span_str(buf, v)).collect(),
            })
            .collect();

        Ok(Message {
            status_code: fields.status_code,
            url: fields.url.map(|s| span_str(buf, s)),
            host: fields.host.map(|s| span_str(buf, s)),
            user_agent: fields.user_agent.map(|s| span_str(buf, s)),
            location: fields.location.map(|s| span_str(buf, s)),
            accept_encoding: fields.accept_encoding.map(|s| span_str(buf, s)),
            content_encoding,
            transfer_encoding: fields.transfer_encoding.map(|s| span_str(buf, s)),
            transfer_encoding_chunked: fields.transfer_encoding_chunked,
            is_options_method: fields.is_options_method,
            is_connect_method: fields.is_connect_method,
            connection_close: fields.connection_close,
            raw_body,
            body,
            raw_fields,
        })
    }
}

pub(crate) fn span_str(buf: &[u8], s: Span) -> &str {
    // SAFETY: the header scanner admits printable ASCII only, so every
    // recorded span is valid single-byte UTF-8.
    unsafe { std::str::from_utf8_unchecked(&buf[s.ndx..s.ndx + s.len]) }
}

/// A header field outside the recognized set, preserved verbatim.
///
/// Obsolete line folding keeps each continuation as its own value line,
/// leading whitespace included, so re-emission reproduces the original
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField<'b> {
    /// Field name.
    pub key: &'b str,
    /// Value lines; one for a plain field, several for folded values.
    pub values: Vec<&'b str>,
}

/// A parsed message, borrowing the connection's read buffer.
#[derive(Debug)]
pub struct Message<'b> {
    /// Status code (responses; zero on requests).
    pub status_code: u16,
    /// Request target (requests; absent on responses).
    pub url: Option<&'b str>,
    /// Host header value.
    pub host: Option<&'b str>,
    /// User-Agent header value.
    pub user_agent: Option<&'b str>,
    /// Location header value.
    pub location: Option<&'b str>,
    /// Accept-Encoding header value.
    pub accept_encoding: Option<&'b str>,
    /// Content-Encoding header value.
    pub content_encoding: Option<&'b str>,
    /// Transfer-Encoding header value.
    pub transfer_encoding: Option<&'b str>,
    /// True when Transfer-Encoding contains `chunked`.
    pub transfer_encoding_chunked: bool,
    /// True for OPTIONS requests.
    pub is_options_method: bool,
    /// True for CONNECT requests (server side only).
    pub is_connect_method: bool,
    /// True when the message or its HTTP version closes the connection.
    pub connection_close: bool,
    /// Body bytes as they appeared on the wire.
    pub raw_body: &'b [u8],
    /// Decoded body (after chunked reassembly and/or gzip inflation).
    pub body: Option<Vec<u8>>,
    /// Unrecognized header fields in arrival order.
    pub raw_fields: Vec<RawField<'b>>,
}

impl<'b> Message<'b> {
    /// The effective body: decoded bytes when present, wire bytes
    /// otherwise.
    pub fn payload(&self) -> &[u8] {
        self.body.as_deref().unwrap_or(self.raw_body)
    }

    /// Duplicates every field into an owned message.
    ///
    /// With `strip_proxy_target` an absolute-form target
    /// (`http://host/path`) is reduced to its origin form (`/path`), the
    /// shape an origin server expects from a forward proxy.
    pub fn to_owned(&self, strip_proxy_target: bool) -> OwnedMessage {
        let url = self.url.map(|url| {
            if strip_proxy_target {
                origin_form(url).to_string()
            } else {
                url.to_string()
            }
        });

        OwnedMessage {
            status_code: self.status_code,
            url,
            host: self.host.map(str::to_string),
            user_agent: self.user_agent.map(str::to_string),
            location: self.location.map(str::to_string),
            accept_encoding: self.accept_encoding.map(str::to_string),
            content_encoding: self.content_encoding.map(str::to_string),
            transfer_encoding: self.transfer_encoding.map(str::to_string),
            transfer_encoding_chunked: self.transfer_encoding_chunked,
            is_options_method: self.is_options_method,
            connection_close: self.connection_close,
            raw_body: self.raw_body.to_vec(),
            body: self.body.clone(),
            raw_fields: self
                .raw_fields
                .iter()
                .map(|f| OwnedRawField {
                    key: f.key.to_string(),
                    values: f.values.iter().map(|v| v.to_string()).collect(),
                })
                .collect(),
            www_form: Vec::new(),
        }
    }
}

fn origin_form(url: &str) -> &str {
    for scheme in ["http://", "https://"] {
        if url.len() > scheme.len() && url[..scheme.len()].eq_ignore_ascii_case(scheme) {
            if let Some(slash) = url[scheme.len()..].find('/') {
                return &url[scheme.len() + slash..];
            }
        }
    }
    url
}

/// An unrecognized header field with owned storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedRawField {
    /// Field name.
    pub key: String,
    /// Value lines.
    pub values: Vec<String>,
}

/// A message with owned fields: the duplicate of a parsed message, and the
/// builder for outgoing requests and replies.
#[derive(Debug, Clone, Default)]
pub struct OwnedMessage {
    /// Status code for replies.
    pub status_code: u16,
    /// Request target for requests.
    pub url: Option<String>,
    /// Host header value.
    pub host: Option<String>,
    /// User-Agent header value.
    pub user_agent: Option<String>,
    /// Location header value.
    pub location: Option<String>,
    /// Accept-Encoding header value.
    pub accept_encoding: Option<String>,
    /// Content-Encoding header value.
    pub content_encoding: Option<String>,
    /// Transfer-Encoding header value.
    pub transfer_encoding: Option<String>,
    /// True when Transfer-Encoding contains `chunked`.
    pub transfer_encoding_chunked: bool,
    /// Emit an OPTIONS request.
    pub is_options_method: bool,
    /// Close the connection after this message.
    pub connection_close: bool,
    /// Body bytes to send (or duplicated wire bytes).
    pub raw_body: Vec<u8>,
    /// Decoded body copied from a parsed message.
    pub body: Option<Vec<u8>>,
    /// Extra header fields emitted verbatim after the recognized set.
    pub raw_fields: Vec<OwnedRawField>,
    /// Form key/value pairs; encoded as the body when non-empty.
    pub www_form: Vec<(String, Option<String>)>,
}
