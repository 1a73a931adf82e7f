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

//! Percent encoding/decoding and `application/x-www-form-urlencoded` parsing.

use crate::error::{Error, Result};
use crate::table::HashTable;

/// Smallest accepted form: `k=`.
const FORM_MIN_LEN: usize = 2;

fn is_printable_ascii(b: u8) -> bool {
    (32..=126).contains(&b)
}

fn is_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b) || (b'A'..=b'F').contains(&b)
}

const fn make_encode_map() -> [bool; 256] {
    let mut map = [true; 256];
    let mut i: usize = 32;
    // printable ASCII passes through except the reserved set
    while i <= 126 {
        map[i] = matches!(
            i as u8,
            b'!' | b'*'
                | b'\''
                | b'('
                | b')'
                | b';'
                | b':'
                | b'@'
                | b'&'
                | b'='
                | b'+'
                | b'$'
                | b','
                | b'/'
                | b'?'
                | b'#'
                | b'['
                | b']'
                | b'"'
                | b'%'
                | b'-'
                | b'.'
                | b'<'
                | b'>'
                | b'\\'
                | b'^'
                | b'_'
                | b'`'
                | b'{'
                | b'|'
                | b'}'
                | b'~'
                | b' '
        );
        i += 1;
    }
    map
}

static ENCODE_MAP: [bool; 256] = make_encode_map();

/// Percent-encodes `input`; in form mode SP becomes `+`.
pub fn percent_encode(input: &[u8], form_mode: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input {
        if form_mode && b == b' ' {
            out.push('+');
        } else if ENCODE_MAP[b as usize] {
            out.push_str(&format!("%{:02X}", b));
        } else {
            out.push(b as char);
        }
    }
    out
}

/// Percent-decodes `input`, reversing [`percent_encode`] for the same mode.
///
/// Rejects non-printable input bytes and malformed escapes.
pub fn percent_decode(input: &[u8], form_mode: bool) -> Result<Vec<u8>> {
    enum State {
        Default,
        FirstHex,
        SecondHex(u8),
    }

    let mut out = Vec::with_capacity(input.len());
    let mut state = State::Default;

    for &b in input {
        if !is_printable_ascii(b) {
            return Err(Error::WrongParams);
        }

        state = match state {
            State::Default => {
                if b == b'%' {
                    State::FirstHex
                } else if form_mode && b == b'+' {
                    out.push(b' ');
                    State::Default
                } else {
                    out.push(b);
                    State::Default
                }
            }
            State::FirstHex => {
                if is_hex(b) {
                    State::SecondHex(b)
                } else {
                    return Err(Error::WrongParams);
                }
            }
            State::SecondHex(first) => {
                if is_hex(b) {
                    let hi = (first as char).to_digit(16).unwrap_or(0) as u8;
                    let lo = (b as char).to_digit(16).unwrap_or(0) as u8;
                    out.push((hi << 4) | lo);
                    State::Default
                } else {
                    return Err(Error::WrongParams);
                }
            }
        };
    }

    if !matches!(state, State::Default) {
        // truncated escape
        return Err(Error::WrongParams);
    }

    Ok(out)
}

fn set_pair(
    table: &mut HashTable<Vec<u8>>,
    key: &[u8],
    val: Option<&[u8]>,
) -> Result<()> {
    let decoded_key = percent_decode(key, true)?;
    let decoded_val = match val {
        Some(v) => percent_decode(v, true)?,
        None => Vec::new(),
    };
    table.set(&decoded_key, decoded_val);
    Ok(())
}

/// Parses `a=b&c=d` form input into a hash table of decoded pairs.
///
/// With `is_url` the form is taken from after the first `?`. Keys must be
/// non-empty and followed by `=`; a missing value is permitted; a repeated
/// `=` within a value is rejected, as is any non-printable byte.
pub fn parse_form(
    form: &[u8],
    is_url: bool,
    n_buckets: usize,
) -> Result<HashTable<Vec<u8>>> {
    if form.len() < FORM_MIN_LEN {
        return Err(Error::WrongParams);
    }

    let form = if is_url {
        let q = form
            .iter()
            .position(|&b| b == b'?')
            .ok_or(Error::WrongParams)?;
        if q + FORM_MIN_LEN >= form.len() {
            return Err(Error::WrongParams);
        }
        &form[q + 1..]
    } else {
        form
    };

    let mut table = HashTable::new(n_buckets);

    enum State {
        Key,
        Val,
    }

    let mut state = State::Key;
    let mut key: Option<usize> = None;
    let mut key_len = 0usize;
    let mut val: Option<usize> = None;
    let mut val_len = 0usize;

    for i in 0..form.len() {
        let b = form[i];
        let is_last = i == form.len() - 1;

        if !is_printable_ascii(b) {
            return Err(Error::WrongParams);
        }

        match state {
            State::Key => {
                if b == b'&' {
                    return Err(Error::WrongParams);
                }
                match key {
                    None => {
                        if b == b'=' || is_last {
                            return Err(Error::WrongParams);
                        }
                        key = Some(i);
                    }
                    Some(begin) => {
                        if b == b'=' {
                            key_len = i - begin;
                            state = State::Val;
                        }
                    }
                }
            }
            State::Val => {
                if b == b'=' {
                    return Err(Error::WrongParams);
                }
                if val.is_none() && b != b'&' {
                    val = Some(i);
                }
                if b == b'&' {
                    if let Some(begin) = val {
                        val_len = i - begin;
                    }
                    if !is_last {
                        let k = &form[key.ok_or(Error::WrongParams)?..][..key_len];
                        let v = val.map(|begin| &form[begin..][..val_len]);
                        set_pair(&mut table, k, v)?;

                        key = None;
                        key_len = 0;
                        val = None;
                        val_len = 0;
                        state = State::Key;
                    }
                }
            }
        }

        if is_last {
            if key_len == 0 {
                return Err(Error::WrongParams);
            }
            if let Some(begin) = val {
                if val_len == 0 {
                    val_len = i - begin + 1;
                }
            }
            let k = &form[key.ok_or(Error::WrongParams)?..][..key_len];
            let v = val.map(|begin| &form[begin..][..val_len]);
            set_pair(&mut table, k, v)?;
        }
    }

    Ok(table)
}
