//! The growable packet buffer.

use crate::error::Error;

/// Default hard cap for a packet buffer: 1 MiB.
///
/// Far above anything GDB sends in practice, but bounds a misbehaving peer.
pub const DEFAULT_MAX: usize = 1024 * 1024;

/// A growable byte buffer with a hard size limit.
///
/// Serves as the receive buffer the framer works in and as scratch for
/// building reply bodies. Growth failures (allocation failure or hitting the
/// configured maximum) surface as `NoMemory` and leave the current contents
/// untouched.
#[derive(Debug)]
pub struct PacketBuf {
    data: Vec<u8>,
    max: usize,
}

impl Default for PacketBuf {
    fn default() -> Self {
        PacketBuf::new(DEFAULT_MAX)
    }
}

impl PacketBuf {
    pub fn new(max: usize) -> Self {
        PacketBuf { data: Vec::new(), max }
    }

    pub fn set_max(&mut self, max: usize) {
        self.max = max;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Makes room for `extra` more bytes.
    fn ensure(&mut self, extra: usize) -> Result<(), Error> {
        let needed = self.data.len().checked_add(extra).ok_or(Error::NoMemory)?;
        if needed > self.max {
            return Err(Error::NoMemory);
        }
        self.data.try_reserve(extra).map_err(|_| Error::NoMemory)
    }

    /// Exposes an `n`-byte writable tail for the transport to fill.
    ///
    /// The bytes only become part of the buffer once `commit` is called with
    /// the count actually written.
    pub fn read_tail(&mut self, n: usize) -> Result<&mut [u8], Error> {
        self.ensure(n)?;
        let used = self.data.len();
        self.data.resize(used + n, 0);
        Ok(&mut self.data[used..])
    }

    /// Retains `n` bytes of the tail handed out by `read_tail`.
    pub fn commit(&mut self, n: usize, requested: usize) {
        debug_assert!(n <= requested);
        let used = self.data.len() - requested;
        self.data.truncate(used + n);
    }

    /// Drops the first `n` bytes, compacting the remainder to the front.
    pub fn drain_front(&mut self, n: usize) {
        self.data.drain(..n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_tail_and_commit() {
        let mut buf = PacketBuf::default();
        let tail = buf.read_tail(8).unwrap();
        tail[..3].copy_from_slice(b"abc");
        buf.commit(3, 8);
        assert_eq!(buf.as_slice(), b"abc");

        let tail = buf.read_tail(4).unwrap();
        tail[..2].copy_from_slice(b"de");
        buf.commit(2, 4);
        assert_eq!(buf.as_slice(), b"abcde");
    }

    #[test]
    fn drain_front_compacts() {
        let mut buf = PacketBuf::default();
        buf.read_tail(5).unwrap().copy_from_slice(b"xx$ab");
        buf.commit(5, 5);
        buf.drain_front(2);
        assert_eq!(buf.as_slice(), b"$ab");
    }

    #[test]
    fn hard_maximum_is_enforced_and_contents_survive() {
        let mut buf = PacketBuf::new(4);
        buf.read_tail(4).unwrap().copy_from_slice(b"full");
        buf.commit(4, 4);
        assert_eq!(buf.read_tail(1), Err(Error::NoMemory));
        assert_eq!(buf.as_slice(), b"full");
    }
}
