//! Binary codec for SFTP packet bodies.
//!
//! Everything on the wire is big-endian; strings and byte blocks carry a
//! 4-byte length prefix and no trailing NUL. [`Parser`] consumes a request
//! body left to right, [`Printer`] builds a response, and [`LenMark`] lets a
//! response declare its length up front without precomputing sizes: reserve
//! the slot, mark where counting starts, and patch once the packet is done.
//!
//! ```
//! use skiff_proto::sftp::wire::{LenMark, Printer};
//!
//! let mut out = Printer::new();
//! let mut len = LenMark::default();
//! out.len_u32(&mut len).len_start(&mut len).u8(102).u32(7);
//! out.len_done(&mut len);
//! assert_eq!(out.finish().as_ref(), [0, 0, 0, 5, 102, 0, 0, 0, 7]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use skiff_platform::{Error, Result};

/// Consumes a packet body left to right.
///
/// Accessors fail with [`Error::Protocol`] when the body runs short; a
/// well-formed request must also satisfy the terminal [`Parser::end`] check.
#[derive(Debug)]
pub struct Parser<'a> {
    buf: &'a [u8],
}

impl<'a> Parser<'a> {
    /// Creates a parser over a request body.
    pub fn new(body: &'a [u8]) -> Self {
        Self { buf: body }
    }

    /// Number of unconsumed bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Error::Protocol(format!(
                "request body truncated: wanted {} bytes, {} left",
                n,
                self.buf.len()
            )));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Reads one byte.
    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a big-endian u32.
    pub fn u32(&mut self) -> Result<u32> {
        let bs = self.take(4)?;
        Ok(u32::from_be_bytes([bs[0], bs[1], bs[2], bs[3]]))
    }

    /// Reads a big-endian u64.
    pub fn u64(&mut self) -> Result<u64> {
        let bs = self.take(8)?;
        Ok(u64::from_be_bytes([
            bs[0], bs[1], bs[2], bs[3], bs[4], bs[5], bs[6], bs[7],
        ]))
    }

    /// Reads exactly `n` raw bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Reads a length-prefixed string.
    pub fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bs = self.take(len)?;
        String::from_utf8(bs.to_vec())
            .map_err(|_| Error::Protocol("string field is not valid UTF-8".to_string()))
    }

    /// Terminal check: fails unless the body was fully consumed.
    pub fn end(&self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "{} trailing bytes after request body",
                self.buf.len()
            )))
        }
    }
}

/// Deferred length slot(s) for a [`Printer`].
///
/// One mark may back several slots (all patched with the same count), and
/// independent marks nest freely.
#[derive(Debug, Default)]
pub struct LenMark {
    slots: Vec<usize>,
    start: usize,
}

/// Appends big-endian fields to a growable output buffer.
#[derive(Debug, Default)]
pub struct Printer {
    buf: BytesMut,
}

impl Printer {
    /// Creates an empty printer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a printer with room for `cap` bytes.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(cap),
        }
    }

    /// Appends one byte.
    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    /// Appends a big-endian u32.
    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32(v);
        self
    }

    /// Appends a big-endian u64.
    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.put_u64(v);
        self
    }

    /// Appends raw bytes with no length prefix.
    pub fn raw(&mut self, bs: &[u8]) -> &mut Self {
        self.buf.put_slice(bs);
        self
    }

    /// Appends a string with a 4-byte length prefix and no trailing NUL.
    pub fn string(&mut self, s: &str) -> &mut Self {
        self.buf.put_u32(s.len() as u32);
        self.buf.put_slice(s.as_bytes());
        self
    }

    /// Appends a byte block with a 4-byte length prefix.
    pub fn blob(&mut self, bs: &[u8]) -> &mut Self {
        self.buf.put_u32(bs.len() as u32);
        self.buf.put_slice(bs);
        self
    }

    /// Reserves a 32-bit slot to be patched by [`Printer::len_done`].
    pub fn len_u32(&mut self, mark: &mut LenMark) -> &mut Self {
        mark.slots.push(self.buf.len());
        self.u32(0)
    }

    /// Marks where the length region starts counting.
    pub fn len_start(&mut self, mark: &mut LenMark) -> &mut Self {
        mark.start = self.buf.len();
        self
    }

    /// Patches every slot of `mark` with the bytes written since
    /// [`Printer::len_start`].
    pub fn len_done(&mut self, mark: &mut LenMark) -> &mut Self {
        let count = (self.buf.len() - mark.start) as u32;
        for &slot in &mark.slots {
            self.buf[slot..slot + 4].copy_from_slice(&count.to_be_bytes());
        }
        self
    }

    /// Returns the finished output.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}
