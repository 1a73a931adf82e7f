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

//! Chunked transfer decoding for the streaming parser.

use super::{
    is_printable_ascii, span_str, ChType, ChunkStage, ChunkState, ParseError, ReadState,
    Span, TopState,
};

fn is_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b) || (b'A'..=b'F').contains(&b)
}

/// Decodes chunk frames from the buffer, accumulating data bytes into the
/// message's owned body. Returns once the buffer is exhausted or the final
/// trailer completes the message.
pub(super) fn parse_chunked_body(rs: &mut ReadState, buf: &[u8]) -> Result<(), ParseError> {
    if rs.fields.raw_body_ndx == 0 && rs.n < buf.len() {
        if rs.n == 0 {
            return Err(ParseError::ChunkSize);
        }
        rs.fields.raw_body_ndx = rs.n;
    }

    while rs.state == TopState::Body && rs.n < buf.len() {
        match rs.chunked.stage {
            ChunkStage::Size => parse_chunk_size(rs, buf)?,
            ChunkStage::Data => {
                if parse_chunk_data(rs, buf)? {
                    // need more bytes
                    return Ok(());
                }
            }
            ChunkStage::Last => parse_chunk_last(rs, buf)?,
        }
    }

    Ok(())
}

/// Chunk-size line: hex digits, then optionally `;` extensions or SP/HTAB
/// (accepted, ignored), terminated by CRLF. Zero size switches to the
/// trailer stage.
fn parse_chunk_size(rs: &mut ReadState, buf: &[u8]) -> Result<(), ParseError> {
    let c = buf[rs.n];

    let begin = match rs.chunked.size_begin {
        None => {
            if !is_hex(c) {
                return Err(ParseError::ChunkSize);
            }
            rs.chunked.size_begin = Some(rs.n);
            rs.chunked.last_ch_type = Some(ChType::Ch);
            rs.n += 1;
            return Ok(());
        }
        Some(begin) => begin,
    };

    if rs.chunked.size_len == 0 && is_hex(c) {
        rs.n += 1;
        return Ok(());
    }

    if rs.chunked.size_len == 0 && (c == b'\r' || c == b';' || c == b' ' || c == b'\t') {
        rs.chunked.size_len = rs.n - begin;
        debug_assert!(rs.chunked.size_len > 0);

        if c == b'\r' {
            rs.chunked.last_ch_type = Some(ChType::Cr);
        }

        let digits = Span {
            ndx: begin,
            len: rs.chunked.size_len,
        };
        if digits.len >= 32 {
            return Err(ParseError::ChunkSize);
        }
        rs.chunked.size_val = usize::from_str_radix(span_str(buf, digits), 16)
            .map_err(|_| ParseError::ChunkSize)?;

        rs.n += 1;
        return Ok(());
    }

    if c == b'\n' {
        if rs.chunked.last_ch_type != Some(ChType::Cr) || rs.chunked.size_len == 0 {
            return Err(ParseError::ChunkSize);
        }

        rs.chunked.last_ch_type = Some(ChType::Lf);
        rs.chunked.stage = if rs.chunked.size_val > 0 {
            ChunkStage::Data
        } else {
            ChunkStage::Last
        };

        rs.n += 1;
        return Ok(());
    }

    if c == b'\r' {
        if rs.chunked.last_ch_type == Some(ChType::Cr) || rs.chunked.size_len == 0 {
            return Err(ParseError::ChunkSize);
        }

        rs.chunked.last_ch_type = Some(ChType::Cr);
        rs.n += 1;
        return Ok(());
    }

    if is_printable_ascii(c) || c == b'\t' {
        // extension bytes after the size, value ignored
        if rs.chunked.last_ch_type == Some(ChType::Cr) || rs.chunked.size_len == 0 {
            return Err(ParseError::ChunkSize);
        }

        rs.n += 1;
        return Ok(());
    }

    Err(ParseError::ChunkSize)
}

/// Chunk data: exactly `size_val` bytes, then CRLF, then back to the size
/// stage. Returns `true` when more bytes are needed.
fn parse_chunk_data(rs: &mut ReadState, buf: &[u8]) -> Result<bool, ParseError> {
    let begin = *rs.chunked.data_begin.get_or_insert(rs.n);

    if !rs.chunked.has_data {
        if begin + rs.chunked.size_val > buf.len() {
            return Ok(true);
        }

        let chunk = &buf[begin..begin + rs.chunked.size_val];
        rs.fields
            .body
            .get_or_insert_with(Vec::new)
            .extend_from_slice(chunk);

        rs.n = begin + rs.chunked.size_val;
        rs.chunked.has_data = true;
        return Ok(false);
    }

    if rs.n + 2 > buf.len() {
        return Ok(true);
    }

    if buf[rs.n] == b'\r' && buf[rs.n + 1] == b'\n' {
        rs.n += 2;
        rs.chunked = ChunkState::default();
        debug_assert_eq!(ChunkStage::Size, rs.chunked.stage);
        return Ok(false);
    }

    Err(ParseError::ChunkData)
}

/// Trailer lines after the zero-size chunk, skipped until an empty line
/// ends the message.
fn parse_chunk_last(rs: &mut ReadState, buf: &[u8]) -> Result<(), ParseError> {
    if rs.chunked.trailer_line_begin.is_none() {
        rs.chunked.trailer_line_begin = Some(rs.n);
    }

    let c = buf[rs.n];

    if is_printable_ascii(c) || c == b'\t' {
        if rs.chunked.last_ch_type == Some(ChType::Cr) {
            return Err(ParseError::Trailer);
        }
        rs.chunked.last_ch_type = Some(ChType::Ch);
        rs.n += 1;
        return Ok(());
    }

    if c == b'\r' {
        if rs.chunked.last_ch_type == Some(ChType::Cr) {
            return Err(ParseError::Trailer);
        }
        rs.chunked.last_ch_type = Some(ChType::Cr);
        rs.chunked.trailer_line_len = rs.n
            - rs.chunked
                .trailer_line_begin
                .unwrap_or(rs.n);
        rs.n += 1;
        return Ok(());
    }

    if c == b'\n' {
        if rs.chunked.last_ch_type != Some(ChType::Cr) {
            return Err(ParseError::Trailer);
        }

        if rs.chunked.trailer_line_len == 0 {
            rs.n += 1;
            rs.fields.raw_body_len = rs.n - rs.fields.raw_body_ndx;
            rs.state = TopState::Eom;
            return Ok(());
        }

        rs.chunked.last_ch_type = Some(ChType::Lf);
        rs.chunked.trailer_line_begin = None;
        rs.chunked.trailer_line_len = 0;
        rs.n += 1;
        return Ok(());
    }

    Err(ParseError::Trailer)
}
