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

//! HTTP/1.1 message emission: start line, canonical headers, raw fields,
//! body; www-form body construction.

use crate::error::{Error, Result};
use crate::form::percent_encode;
use crate::parser::{OwnedMessage, Role, MAX_HDR_LEN, STATUS_CODE_MAX, STATUS_CODE_MIN};

/// Cap for the start line and Location values.
const MAX_URL_LEN: usize = 16384;
/// Cap for the User-Agent value.
const MAX_USER_AGENT_LEN: usize = 256;
/// Cap for Host and the remaining short header values.
const MAX_SHORT_LEN: usize = 256;

fn push_capped(hdr: &mut Vec<u8>, field: String, cap: usize) -> Result<()> {
    if field.len() > cap {
        return Err(Error::HdrTooLarge);
    }
    hdr.extend_from_slice(field.as_bytes());
    Ok(())
}

fn form_body(msg: &OwnedMessage) -> Result<Vec<u8>> {
    let mut body = Vec::new();

    for (i, (key, value)) in msg.www_form.iter().enumerate() {
        if key.is_empty() {
            return Err(Error::WrongParams);
        }

        body.extend_from_slice(percent_encode(key.as_bytes(), true).as_bytes());
        body.push(b'=');
        if let Some(value) = value {
            body.extend_from_slice(percent_encode(value.as_bytes(), true).as_bytes());
        }
        if i != msg.www_form.len() - 1 {
            body.push(b'&');
        }
    }

    Ok(body)
}

/// Encodes the header block and body for an outgoing message.
///
/// Requests pick their method from the message flags: OPTIONS when flagged,
/// POST when a body is present, GET otherwise. Replies carry a reason
/// phrase only for 200. Header order is fixed: start line, Host,
/// Content-Length, Connection, User-Agent, Location, Accept-Encoding,
/// Content-Encoding, Transfer-Encoding, then raw fields, then the blank
/// line. Field and total size caps yield [`Error::HdrTooLarge`].
pub(crate) fn encode(role: Role, msg: &OwnedMessage) -> Result<(Vec<u8>, Vec<u8>)> {
    let body = if !msg.www_form.is_empty() {
        form_body(msg)?
    } else {
        msg.raw_body.clone()
    };

    let mut hdr = Vec::with_capacity(256);

    match role {
        Role::Client => {
            let url = msg.url.as_deref().ok_or(Error::WrongParams)?;
            let method = if msg.is_options_method {
                "OPTIONS"
            } else if !body.is_empty() {
                "POST"
            } else {
                "GET"
            };
            push_capped(
                &mut hdr,
                format!("{} {} HTTP/1.1\r\n", method, url),
                MAX_URL_LEN,
            )?;
        }
        Role::Server => {
            if !(STATUS_CODE_MIN..=STATUS_CODE_MAX).contains(&msg.status_code) {
                return Err(Error::WrongParams);
            }
            let reason = if msg.status_code == 200 { " OK" } else { "" };
            push_capped(
                &mut hdr,
                format!("HTTP/1.1 {}{}\r\n", msg.status_code, reason),
                MAX_URL_LEN,
            )?;
        }
    }

    if let Some(host) = msg.host.as_deref() {
        push_capped(&mut hdr, format!("Host: {}\r\n", host), MAX_SHORT_LEN)?;
    }

    if (role == Role::Server || !body.is_empty()) && msg.transfer_encoding.is_none() {
        push_capped(
            &mut hdr,
            format!("Content-Length: {}\r\n", body.len()),
            MAX_SHORT_LEN,
        )?;
    }

    let connection = if msg.connection_close {
        "close"
    } else {
        "keep-alive"
    };
    push_capped(
        &mut hdr,
        format!("Connection: {}\r\n", connection),
        MAX_SHORT_LEN,
    )?;

    if let Some(user_agent) = msg.user_agent.as_deref() {
        push_capped(
            &mut hdr,
            format!("User-Agent: {}\r\n", user_agent),
            MAX_USER_AGENT_LEN,
        )?;
    }

    if let Some(location) = msg.location.as_deref() {
        push_capped(&mut hdr, format!("Location: {}\r\n", location), MAX_URL_LEN)?;
    }

    if let Some(accept_encoding) = msg.accept_encoding.as_deref() {
        push_capped(
            &mut hdr,
            format!("Accept-Encoding: {}\r\n", accept_encoding),
            MAX_SHORT_LEN,
        )?;
    }

    if let Some(content_encoding) = msg.content_encoding.as_deref() {
        push_capped(
            &mut hdr,
            format!("Content-Encoding: {}\r\n", content_encoding),
            MAX_SHORT_LEN,
        )?;
    }

    if let Some(transfer_encoding) = msg.transfer_encoding.as_deref() {
        push_capped(
            &mut hdr,
            format!("Transfer-Encoding: {}\r\n", transfer_encoding),
            MAX_SHORT_LEN,
        )?;
    }

    for field in &msg.raw_fields {
        if field.key.is_empty() {
            return Err(Error::WrongParams);
        }
        hdr.extend_from_slice(field.key.as_bytes());
        hdr.extend_from_slice(b": ");
        if field.values.is_empty() {
            hdr.extend_from_slice(b"\r\n");
            continue;
        }
        for value in &field.values {
            if value.is_empty() {
                return Err(Error::WrongParams);
            }
            hdr.extend_from_slice(value.as_bytes());
            hdr.extend_from_slice(b"\r\n");
        }
    }

    hdr.extend_from_slice(b"\r\n");

    if hdr.len() > MAX_HDR_LEN {
        return Err(Error::HdrTooLarge);
    }

    Ok((hdr, body))
}
