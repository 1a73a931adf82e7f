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

//! Grow-on-demand contiguous byte buffer with a used/remainder split.

/// Initial size and growth step of a connection's read buffer.
pub const READ_BUFFER_SIZE: usize = 128 * 1024;

/// A contiguous heap buffer split into a valid prefix (`used`) and free
/// space (the remainder).
///
/// Read buffers append by receiving into [`space`](Buffer::space) and then
/// [`advance`](Buffer::advance); consumed prefixes are removed with
/// [`consume`](Buffer::consume), which shifts the remaining bytes down so
/// the storage stays contiguous. Growth reallocates with copy, which is why
/// the parser records offsets, never references, while a message is still
/// streaming in.
#[derive(Debug, Default)]
pub struct Buffer {
    data: Vec<u8>,
    used: usize,
}

impl Buffer {
    /// Creates a buffer with `capacity` bytes of free space.
    pub fn with_capacity(capacity: usize) -> Self {
        Buffer {
            data: vec![0; capacity],
            used: 0,
        }
    }

    /// Total capacity.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when no valid bytes are held.
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Number of valid bytes at the front.
    pub fn used(&self) -> usize {
        self.used
    }

    /// The valid prefix.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.used]
    }

    /// Free space past the valid prefix, for the next receive.
    pub fn space(&mut self) -> &mut [u8] {
        &mut self.data[self.used..]
    }

    /// Bytes of free space left.
    pub fn remainder(&self) -> usize {
        self.data.len() - self.used
    }

    /// Marks `n` freshly received bytes as valid.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.used + n <= self.data.len());
        self.used += n;
    }

    /// Drops the first `n` valid bytes, shifting the rest down.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.used);
        self.data.copy_within(n..self.used, 0);
        self.used -= n;
    }

    /// True once the remainder falls under the low-water mark (a tenth of
    /// the capacity).
    pub fn needs_growth(&self) -> bool {
        self.remainder() < self.data.len() / 10
    }

    /// Extends capacity by `step` bytes, reallocating with copy.
    pub fn grow(&mut self, step: usize) {
        let new_len = self.data.len() + step;
        self.data.resize(new_len, 0);
    }
}

#[cfg(test)]
mod test {
    use super::{Buffer, READ_BUFFER_SIZE};

    #[test]
    fn starts_empty_with_full_remainder() {
        let buf = Buffer::with_capacity(READ_BUFFER_SIZE);
        assert_eq!(READ_BUFFER_SIZE, buf.len());
        assert_eq!(0, buf.used());
        assert_eq!(READ_BUFFER_SIZE, buf.remainder());
        assert!(buf.is_empty());
    }

    #[test]
    fn advance_marks_received_bytes_valid() {
        let mut buf = Buffer::with_capacity(64);
        buf.space()[..5].copy_from_slice(b"hello");
        buf.advance(5);
        assert_eq!(b"hello", buf.filled());
        assert_eq!(59, buf.remainder());
    }

    #[test]
    fn consume_shifts_remaining_bytes_down() {
        let mut buf = Buffer::with_capacity(64);
        buf.space()[..10].copy_from_slice(b"helloworld");
        buf.advance(10);
        buf.consume(5);
        assert_eq!(b"world", buf.filled());
        assert_eq!(5, buf.used());
    }

    #[test]
    fn consume_all_resets_to_empty() {
        let mut buf = Buffer::with_capacity(16);
        buf.space()[..3].copy_from_slice(b"abc");
        buf.advance(3);
        buf.consume(3);
        assert!(buf.is_empty());
    }

    #[test]
    fn grow_extends_capacity_and_keeps_contents() {
        let mut buf = Buffer::with_capacity(10);
        buf.space()[..9].copy_from_slice(b"012345678");
        buf.advance(9);
        assert!(buf.needs_growth());
        buf.grow(10);
        assert_eq!(20, buf.len());
        assert_eq!(b"012345678", buf.filled());
        assert!(!buf.needs_growth());
    }

    #[test]
    fn low_water_mark_is_a_tenth_of_capacity() {
        let mut buf = Buffer::with_capacity(100);
        buf.advance(90);
        assert!(!buf.needs_growth());
        buf.advance(1);
        assert!(buf.needs_growth());
    }
}
