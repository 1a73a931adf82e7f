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

//! Start-line and header-field parsing for the streaming parser.

use super::{
    is_printable_ascii, ChType, ParseError, RawFieldSpan, ReadState, Span, TopState,
    MAX_HDR_LEN, MAX_LINES, MAX_LINE_LEN, STATUS_CODE_MAX, STATUS_CODE_MIN,
};

const STATUS_MIN_LEN: usize = 12;
const STATUS_SP1: usize = 8;
const STATUS_CODE: usize = 9;
const STATUS_SP2: usize = 12;

/// Byte scanner over the header section: classifies each byte, tracks line
/// boundaries and the first colon of the current line, and hands complete
/// lines (CR excluded) to the line parser.
pub(super) fn parse_hdr(rs: &mut ReadState, buf: &[u8]) -> Result<(), ParseError> {
    while matches!(
        rs.state,
        TopState::StatusLine | TopState::RequestLine | TopState::HeaderFields
    ) && rs.n < buf.len()
    {
        if rs.n >= MAX_HDR_LEN {
            return Err(ParseError::HeaderTooLarge);
        }

        if rs.hdr.last_ch_type == ChType::Lf {
            rs.hdr.last_line_begin = rs.n;
            rs.hdr.first_colon = None;
        }

        let b = buf[rs.n];

        if is_printable_ascii(b) {
            if rs.hdr.last_ch_type == ChType::Cr {
                return Err(ParseError::Line);
            }
            if b == b':' {
                if rs.n == 0 {
                    return Err(ParseError::Line);
                }
                if rs.hdr.first_colon.is_none() {
                    rs.hdr.first_colon = Some(rs.n);
                }
            }
            rs.hdr.last_ch_type = ChType::Ch;
        } else if b == b'\r' {
            if rs.hdr.last_ch_type == ChType::Cr {
                return Err(ParseError::Line);
            }
            rs.hdr.last_ch_type = ChType::Cr;
        } else if b == b'\n' {
            let mut line_len = rs.n - rs.hdr.last_line_begin;
            if rs.hdr.last_ch_type == ChType::Cr {
                line_len -= 1;
            }
            parse_line(rs, buf, line_len)?;
            rs.hdr.last_ch_type = ChType::Lf;
        } else if b == b'\t' && rs.hdr.last_ch_type != ChType::Cr {
            // HTAB only continues a folded value line
            rs.hdr.last_ch_type = ChType::Ch;
        } else {
            return Err(ParseError::Line);
        }

        rs.n += 1;
    }

    Ok(())
}

fn parse_line(rs: &mut ReadState, buf: &[u8], line_len: usize) -> Result<(), ParseError> {
    rs.hdr.line_num += 1;

    if line_len > MAX_LINE_LEN {
        return Err(ParseError::LineTooLong);
    }
    if rs.hdr.line_num > MAX_LINES {
        return Err(ParseError::TooManyLines);
    }

    let begin = rs.hdr.last_line_begin;
    let line = &buf[begin..begin + line_len];

    match rs.state {
        TopState::StatusLine => parse_status_line(rs, line),
        TopState::RequestLine => parse_request_line(rs, line),
        TopState::HeaderFields => parse_header_fields(rs, line),
        _ => Err(ParseError::Line),
    }
}

fn parse_status_line(rs: &mut ReadState, line: &[u8]) -> Result<(), ParseError> {
    if rs.hdr.line_num != 1
        || line.len() < STATUS_MIN_LEN
        || (line.len() > STATUS_MIN_LEN && line[STATUS_SP2] != b' ')
        || line[STATUS_SP1] != b' '
        || !line[STATUS_CODE].is_ascii_digit()
        || !line[STATUS_CODE + 1].is_ascii_digit()
        || !line[STATUS_CODE + 2].is_ascii_digit()
    {
        return Err(ParseError::Status);
    }

    if line.starts_with(b"HTTP/1.0") {
        rs.hdr.is_http10 = true;
    } else if !line.starts_with(b"HTTP/1.1") {
        return Err(ParseError::Status);
    }

    let code = (line[STATUS_CODE] - b'0') as u16 * 100
        + (line[STATUS_CODE + 1] - b'0') as u16 * 10
        + (line[STATUS_CODE + 2] - b'0') as u16;

    if !(STATUS_CODE_MIN..=STATUS_CODE_MAX).contains(&code) {
        return Err(ParseError::Status);
    }

    rs.fields.status_code = code;
    rs.state = TopState::HeaderFields;

    Ok(())
}

fn parse_request_line(rs: &mut ReadState, line: &[u8]) -> Result<(), ParseError> {
    if rs.hdr.line_num != 1 {
        return Err(ParseError::Request);
    }

    let (method_len, is_options, is_connect) = if line.starts_with(b"GET ") {
        (4, false, false)
    } else if line.starts_with(b"POST ") {
        (5, false, false)
    } else if line.starts_with(b"OPTIONS ") {
        (8, true, false)
    } else if line.starts_with(b"CONNECT ") {
        (8, false, true)
    } else {
        return Err(ParseError::Request);
    };

    if line.len() <= method_len {
        return Err(ParseError::Request);
    }

    let rest = &line[method_len..];
    if !is_printable_ascii(rest[0]) {
        return Err(ParseError::Request);
    }

    let sp = rest
        .iter()
        .position(|&b| b == b' ')
        .ok_or(ParseError::Request)?;
    if sp == 0 {
        return Err(ParseError::Request);
    }

    let version = &rest[sp + 1..];
    if version == b"HTTP/1.0" {
        rs.hdr.is_http10 = true;
    } else if version != b"HTTP/1.1" {
        return Err(ParseError::Request);
    }

    rs.fields.url = Some(Span {
        ndx: rs.hdr.last_line_begin + method_len,
        len: sp,
    });
    rs.fields.is_options_method = is_options;
    rs.fields.is_connect_method = is_connect;
    rs.state = TopState::HeaderFields;

    Ok(())
}

fn prefix_value<'a>(line: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    if line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

fn parse_header_fields(rs: &mut ReadState, line: &[u8]) -> Result<(), ParseError> {
    let begin = rs.hdr.last_line_begin;
    let len = line.len();

    if len == 0 {
        if rs.hdr.content_length_seen && rs.fields.transfer_encoding_chunked {
            // both framings present
            return Err(ParseError::Header);
        }
        rs.state = TopState::Body;
        return Ok(());
    }

    if line[0] == b' ' || line[0] == b'\t' {
        // obs-fold: another value line for the most recent raw field
        if !rs.hdr.is_raw_field {
            return Err(ParseError::Fold);
        }
        let field = rs.fields.raw_fields.last_mut().ok_or(ParseError::Fold)?;
        if field.values.is_empty() {
            return Err(ParseError::Fold);
        }
        field.values.push(Span { ndx: begin, len });
        return Ok(());
    }

    let colon = rs.hdr.first_colon.ok_or(ParseError::Header)?;

    if let Some(value) = prefix_value(line, b"content-length: ") {
        rs.hdr.is_raw_field = false;
        if value.is_empty() || rs.hdr.content_length_seen {
            return Err(ParseError::Header);
        }
        if value.iter().any(|&b| !b.is_ascii_digit() && b != b' ') {
            return Err(ParseError::Header);
        }
        let digits: &[u8] = value
            .split(|&b| b == b' ')
            .find(|part| !part.is_empty())
            .unwrap_or(&[]);
        let length = if digits.is_empty() {
            0
        } else {
            super::span_str(digits, Span { ndx: 0, len: digits.len() })
                .parse::<usize>()
                .map_err(|_| ParseError::Header)?
        };
        rs.fields.raw_body_len = length;
        rs.hdr.no_content_length = false;
        rs.hdr.content_length_seen = true;
    } else if let Some(value) = prefix_value(line, b"connection: ") {
        rs.hdr.is_raw_field = false;
        if value.is_empty() || rs.hdr.connection_seen {
            return Err(ParseError::Header);
        }
        rs.hdr.connection_seen = true;
        if value.eq_ignore_ascii_case(b"close") {
            rs.fields.connection_close = true;
        }
    } else if let Some(value) = prefix_value(line, b"host: ") {
        rs.hdr.is_raw_field = false;
        if value.is_empty() || rs.fields.host.is_some() {
            return Err(ParseError::Header);
        }
        rs.fields.host = Some(Span {
            ndx: begin + 6,
            len: len - 6,
        });
    } else if let Some(value) = prefix_value(line, b"user-agent: ") {
        rs.hdr.is_raw_field = false;
        if value.is_empty() || rs.fields.user_agent.is_some() {
            return Err(ParseError::Header);
        }
        rs.fields.user_agent = Some(Span {
            ndx: begin + 12,
            len: len - 12,
        });
    } else if let Some(value) = prefix_value(line, b"location: ") {
        rs.hdr.is_raw_field = false;
        if value.is_empty() || rs.fields.location.is_some() {
            return Err(ParseError::Header);
        }
        rs.fields.location = Some(Span {
            ndx: begin + 10,
            len: len - 10,
        });
    } else if let Some(value) = prefix_value(line, b"accept-encoding: ") {
        rs.hdr.is_raw_field = false;
        if value.is_empty() || rs.fields.accept_encoding.is_some() {
            return Err(ParseError::Header);
        }
        rs.fields.accept_encoding = Some(Span {
            ndx: begin + 17,
            len: len - 17,
        });
    } else if let Some(value) = prefix_value(line, b"content-encoding: ") {
        rs.hdr.is_raw_field = false;
        if value.is_empty() || rs.fields.content_encoding.is_some() {
            return Err(ParseError::Header);
        }
        rs.fields.content_encoding = Some(Span {
            ndx: begin + 18,
            len: len - 18,
        });
    } else if let Some(value) = prefix_value(line, b"transfer-encoding: ") {
        rs.hdr.is_raw_field = false;
        if value.is_empty() || rs.fields.transfer_encoding.is_some() {
            return Err(ParseError::Header);
        }
        rs.fields.transfer_encoding = Some(Span {
            ndx: begin + 19,
            len: len - 19,
        });
        if value.windows(7).any(|w| w == b"chunked") {
            rs.fields.transfer_encoding_chunked = true;
        }
    } else {
        // unrecognized: capture verbatim
        rs.hdr.is_raw_field = true;

        let key_len = colon - begin;
        if key_len == 0 {
            return Err(ParseError::Header);
        }

        let mut field = RawFieldSpan {
            key: Span {
                ndx: begin,
                len: key_len,
            },
            values: Vec::new(),
        };

        // first value byte sits after ": "
        if colon + 2 < begin + len {
            field.values.push(Span {
                ndx: colon + 2,
                len: begin + len - (colon + 2),
            });
        }

        rs.fields.raw_fields.push(field);
    }

    Ok(())
}
