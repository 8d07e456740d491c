//! Growable read/write byte buffer used on the frame extraction path.
//!
//! The buffer keeps three indices into one contiguous allocation:
//!
//! ```text
//! | prepend reserve | readable bytes | writable space |
//! 0            read_idx          write_idx       storage end
//! ```
//!
//! The prepend reserve lets a length prefix be written in front of an
//! already-appended body without shifting it. When an append does not fit,
//! space freed by earlier reads is reclaimed by sliding the readable bytes
//! back to the front; only if that is still insufficient does the storage
//! grow, up to a hard ceiling.

use std::io::{IoSliceMut, Read};

use crate::protocol::{Result, RpcError};

/// Space kept in front of the readable region for length prefixes.
pub const PREPEND_RESERVE: usize = 8;

/// Initial storage after the prepend reserve.
const INITIAL_SIZE: usize = 1024;

/// Hard ceiling on total storage. Appends that would exceed it fail with a
/// protocol error instead of growing without bound.
pub const MAX_CAPACITY: usize = 64 * 1024 * 1024;

/// Size of the stack-resident spill region used by [`ByteBuffer::read_from`].
const READ_SPILL: usize = 64 * 1024;

pub struct ByteBuffer {
    data: Vec<u8>,
    read_idx: usize,
    write_idx: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_SIZE)
    }

    /// Creates a buffer whose storage holds `capacity` writable bytes before
    /// the first growth.
    pub fn with_capacity(capacity: usize) -> Self {
        ByteBuffer {
            data: vec![0; PREPEND_RESERVE + capacity],
            read_idx: PREPEND_RESERVE,
            write_idx: PREPEND_RESERVE,
        }
    }

    pub fn readable_bytes(&self) -> usize {
        self.write_idx - self.read_idx
    }

    pub fn writable_bytes(&self) -> usize {
        self.data.len() - self.write_idx
    }

    pub fn prependable_bytes(&self) -> usize {
        self.read_idx
    }

    /// Total storage currently held, including the prepend reserve.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The readable region, without consuming it.
    pub fn peek(&self) -> &[u8] {
        &self.data[self.read_idx..self.write_idx]
    }

    /// Appends `src` after the readable region, growing storage if needed.
    pub fn append(&mut self, src: &[u8]) -> Result<()> {
        self.ensure_writable(src.len())?;
        self.data[self.write_idx..self.write_idx + src.len()].copy_from_slice(src);
        self.write_idx += src.len();
        Ok(())
    }

    pub fn append_u8(&mut self, v: u8) -> Result<()> {
        self.append(&[v])
    }

    pub fn append_u16(&mut self, v: u16) -> Result<()> {
        self.append(&v.to_be_bytes())
    }

    pub fn append_u32(&mut self, v: u32) -> Result<()> {
        self.append(&v.to_be_bytes())
    }

    pub fn append_u64(&mut self, v: u64) -> Result<()> {
        self.append(&v.to_be_bytes())
    }

    pub fn append_i32(&mut self, v: i32) -> Result<()> {
        self.append(&v.to_be_bytes())
    }

    /// Writes a big-endian length in front of the readable region, inside the
    /// prepend reserve.
    pub fn prepend_u32(&mut self, v: u32) -> Result<()> {
        if self.read_idx < 4 {
            return Err(RpcError::Protocol(
                "no prepend space for length prefix".into(),
            ));
        }
        self.read_idx -= 4;
        self.data[self.read_idx..self.read_idx + 4].copy_from_slice(&v.to_be_bytes());
        Ok(())
    }

    /// Consumes `n` readable bytes. Consuming everything resets both cursors
    /// to the prepend reserve so the full storage becomes writable again.
    pub fn retrieve(&mut self, n: usize) {
        debug_assert!(n <= self.readable_bytes());
        if n >= self.readable_bytes() {
            self.retrieve_all();
        } else {
            self.read_idx += n;
        }
    }

    pub fn retrieve_all(&mut self) {
        self.read_idx = PREPEND_RESERVE;
        self.write_idx = PREPEND_RESERVE;
    }

    /// Copies out and consumes exactly `n` readable bytes.
    pub fn take(&mut self, n: usize) -> Result<Vec<u8>> {
        if n > self.readable_bytes() {
            return Err(RpcError::Protocol(format!(
                "take of {} bytes exceeds {} readable",
                n,
                self.readable_bytes()
            )));
        }
        let out = self.data[self.read_idx..self.read_idx + n].to_vec();
        self.retrieve(n);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = self.peek_exact(1)?[0];
        self.retrieve(1);
        Ok(b)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let v = u16::from_be_bytes(self.peek_exact(2)?.try_into().unwrap());
        self.retrieve(2);
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let v = self.peek_u32()?;
        self.retrieve(4);
        Ok(v)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let v = u64::from_be_bytes(self.peek_exact(8)?.try_into().unwrap());
        self.retrieve(8);
        Ok(v)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let v = i32::from_be_bytes(self.peek_exact(4)?.try_into().unwrap());
        self.retrieve(4);
        Ok(v)
    }

    /// Decodes a big-endian u32 from the front without consuming it.
    pub fn peek_u32(&self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.peek_exact(4)?.try_into().unwrap()))
    }

    fn peek_exact(&self, n: usize) -> Result<&[u8]> {
        if self.readable_bytes() < n {
            return Err(RpcError::Protocol(format!(
                "need {} readable bytes, have {}",
                n,
                self.readable_bytes()
            )));
        }
        Ok(&self.data[self.read_idx..self.read_idx + n])
    }

    /// Reads once from `reader` with scatter I/O: the writable tail plus a
    /// 64 KiB stack spill region, so a large read does not require a large
    /// preallocated tail. Returns the number of bytes read; 0 means EOF.
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> Result<usize> {
        let mut spill = [0u8; READ_SPILL];
        let storage_end = self.data.len();
        let writable = storage_end - self.write_idx;
        let n = {
            let (_, tail) = self.data.split_at_mut(self.write_idx);
            let mut iov = [IoSliceMut::new(tail), IoSliceMut::new(&mut spill)];
            reader.read_vectored(&mut iov)?
        };
        if n <= writable {
            self.write_idx += n;
        } else {
            self.write_idx = storage_end;
            self.append(&spill[..n - writable])?;
        }
        Ok(n)
    }

    /// Makes room for `len` more bytes: reclaim prepend slack first, then
    /// grow, refusing to pass [`MAX_CAPACITY`].
    fn ensure_writable(&mut self, len: usize) -> Result<()> {
        if self.writable_bytes() >= len {
            return Ok(());
        }
        // Slide readable bytes back to the reserve boundary.
        if self.read_idx > PREPEND_RESERVE {
            let readable = self.readable_bytes();
            self.data.copy_within(self.read_idx..self.write_idx, PREPEND_RESERVE);
            self.read_idx = PREPEND_RESERVE;
            self.write_idx = PREPEND_RESERVE + readable;
        }
        if self.writable_bytes() >= len {
            return Ok(());
        }
        let required = self.write_idx + len;
        if required > MAX_CAPACITY {
            return Err(RpcError::Protocol(format!(
                "buffer capacity {} would exceed the {} byte ceiling",
                required, MAX_CAPACITY
            )));
        }
        let new_size = required.max(self.data.len() * 2).min(MAX_CAPACITY);
        self.data.resize(new_size, 0);
        Ok(())
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_new_buffer_is_empty() {
        let buf = ByteBuffer::new();
        assert_eq!(buf.readable_bytes(), 0);
        assert_eq!(buf.prependable_bytes(), PREPEND_RESERVE);
        assert!(buf.writable_bytes() >= 1024);
    }

    #[test]
    fn test_append_and_peek() {
        let mut buf = ByteBuffer::new();
        buf.append(b"hello").unwrap();
        assert_eq!(buf.readable_bytes(), 5);
        assert_eq!(buf.peek(), b"hello");
    }

    #[test]
    fn test_retrieve_partial_then_all() {
        let mut buf = ByteBuffer::new();
        buf.append(b"hello world").unwrap();
        buf.retrieve(6);
        assert_eq!(buf.peek(), b"world");
        buf.retrieve_all();
        assert_eq!(buf.readable_bytes(), 0);
        assert_eq!(buf.prependable_bytes(), PREPEND_RESERVE);
    }

    #[test]
    fn test_full_drain_resets_cursors() {
        let mut buf = ByteBuffer::new();
        buf.append(b"abc").unwrap();
        buf.retrieve(3);
        assert_eq!(buf.prependable_bytes(), PREPEND_RESERVE);
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn test_int_round_trip() {
        let mut buf = ByteBuffer::new();
        buf.append_u8(0xAB).unwrap();
        buf.append_u16(0x1234).unwrap();
        buf.append_u32(0xDEAD_BEEF).unwrap();
        buf.append_u64(0x0102_0304_0506_0708).unwrap();
        buf.append_i32(-42).unwrap();

        assert_eq!(buf.read_u8().unwrap(), 0xAB);
        assert_eq!(buf.read_u16().unwrap(), 0x1234);
        assert_eq!(buf.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(buf.read_u64().unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(buf.read_i32().unwrap(), -42);
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn test_ints_are_network_byte_order() {
        let mut buf = ByteBuffer::new();
        buf.append_u32(0x0102_0304).unwrap();
        assert_eq!(buf.peek(), &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_read_past_end_fails() {
        let mut buf = ByteBuffer::new();
        buf.append(&[0x01, 0x02]).unwrap();
        assert!(buf.read_u32().is_err());
        // The failed read consumed nothing.
        assert_eq!(buf.readable_bytes(), 2);
    }

    #[test]
    fn test_peek_u32_does_not_consume() {
        let mut buf = ByteBuffer::new();
        buf.append_u32(99).unwrap();
        assert_eq!(buf.peek_u32().unwrap(), 99);
        assert_eq!(buf.readable_bytes(), 4);
    }

    #[test]
    fn test_prepend_length_prefix() {
        let mut buf = ByteBuffer::new();
        buf.append(b"body").unwrap();
        buf.prepend_u32(4).unwrap();
        assert_eq!(buf.read_u32().unwrap(), 4);
        assert_eq!(buf.take(4).unwrap(), b"body");
    }

    #[test]
    fn test_growth_beyond_initial_capacity() {
        let mut buf = ByteBuffer::with_capacity(16);
        let payload = vec![0x5A; 4096];
        buf.append(&payload).unwrap();
        assert_eq!(buf.peek(), payload.as_slice());
    }

    #[test]
    fn test_reclaims_prepend_space_before_growing() {
        let mut buf = ByteBuffer::with_capacity(32);
        buf.append(&[1u8; 24]).unwrap();
        buf.retrieve(20);
        let capacity_before = buf.capacity();
        // 4 readable + 24 new = 28 <= 32, fits once the read slack is
        // reclaimed.
        buf.append(&[2u8; 24]).unwrap();
        assert_eq!(buf.capacity(), capacity_before);
        assert_eq!(buf.readable_bytes(), 28);
    }

    #[test]
    fn test_capacity_ceiling_rejected() {
        let mut buf = ByteBuffer::new();
        let oversize = vec![0u8; MAX_CAPACITY + 1];
        let err = buf.append(&oversize).unwrap_err();
        assert!(err.to_string().contains("ceiling"));
    }

    #[test]
    fn test_take_more_than_readable_fails() {
        let mut buf = ByteBuffer::new();
        buf.append(b"ab").unwrap();
        assert!(buf.take(3).is_err());
    }

    #[test]
    fn test_read_from_fits_in_tail() {
        let mut buf = ByteBuffer::new();
        let mut src = Cursor::new(vec![7u8; 100]);
        let n = buf.read_from(&mut src).unwrap();
        assert_eq!(n, 100);
        assert_eq!(buf.peek(), &[7u8; 100][..]);
    }

    #[test]
    fn test_read_from_spills_past_tail() {
        let mut buf = ByteBuffer::with_capacity(64);
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut src = Cursor::new(data.clone());
        let mut total = 0;
        while total < data.len() {
            let n = buf.read_from(&mut src).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, data.len());
        assert_eq!(buf.peek(), data.as_slice());
    }

    #[test]
    fn test_read_from_eof_returns_zero() {
        let mut buf = ByteBuffer::new();
        let mut src = Cursor::new(Vec::<u8>::new());
        assert_eq!(buf.read_from(&mut src).unwrap(), 0);
    }
}
