//! The receive state machine.
//!
//! Locates `$…#cc` frames in the raw transport byte stream, verifies their
//! checksums and surfaces out-of-band interrupts. Acknowledgement and
//! dispatch are the session's job; the framer only reports events.

use crate::buffer::PacketBuf;
use crate::error::Error;

/// Packet start character.
pub(crate) const PKT_START: u8 = b'$';
/// Packet end character (checksum follows).
pub(crate) const PKT_END: u8 = b'#';
/// Out-of-band interrupt byte (ETX, what GDB sends for Ctrl-C).
pub(crate) const OOB_INTERRUPT: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvState {
    /// Waiting for the start character.
    WaitForStart,
    /// Receiving the packet body up to the end character.
    ReceiveBody,
    /// Receiving the two checksum digits.
    ReceiveChecksum,
}

/// What the framer found while scanning newly received bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    /// An interrupt byte arrived outside of a packet.
    Interrupt,
    /// A complete frame was received; `ok` is the checksum verdict.
    Packet { ok: bool },
}

/// Receive state machine over the packet buffer.
///
/// Invariants: outside of a packet the buffer holds no accepted frame data;
/// inside one, byte 0 is always `$`. The payload length is fixed when `#` is
/// found and never touched afterwards.
#[derive(Debug)]
pub(crate) struct Receiver {
    state: RecvState,
    pub(crate) buf: PacketBuf,
    /// Scan watermark; bytes in front of it have been examined.
    scan: usize,
    /// Length of the frame payload, `$` and `#` excluded.
    payload_len: usize,
}

impl Default for Receiver {
    fn default() -> Self {
        Receiver {
            state: RecvState::WaitForStart,
            buf: PacketBuf::default(),
            scan: 0,
            payload_len: 0,
        }
    }
}

impl Receiver {
    /// Returns to the initial state, keeping allocated buffers.
    pub fn reset(&mut self) {
        self.state = RecvState::WaitForStart;
        self.buf.clear();
        self.scan = 0;
        self.payload_len = 0;
    }

    /// Exposes an `n`-byte tail of the packet buffer for the transport to
    /// read into; `commit` retains the count actually read.
    pub fn read_tail(&mut self, n: usize) -> Result<&mut [u8], Error> {
        self.buf.read_tail(n)
    }

    pub fn commit(&mut self, n: usize, requested: usize) {
        self.buf.commit(n, requested);
    }

    /// Scans unexamined bytes, advancing the state machine.
    ///
    /// Returns the first event found, or `None` once all received bytes are
    /// consumed. After a `Packet` event the frame stays in the buffer for
    /// `payload` until `finish_packet` is called.
    pub fn advance(&mut self) -> Option<Event> {
        loop {
            match self.state {
                RecvState::WaitForStart => {
                    if self.buf.is_empty() {
                        return None;
                    }
                    match memchr(self.buf.as_slice(), PKT_START) {
                        Some(at) => {
                            // Drop everything in front of the start byte.
                            self.buf.drain_front(at);
                            self.state = RecvState::ReceiveBody;
                            self.scan = 1;
                        }
                        None => {
                            let interrupted =
                                memchr(self.buf.as_slice(), OOB_INTERRUPT).is_some();
                            self.buf.clear();
                            if interrupted {
                                return Some(Event::Interrupt);
                            }
                            return None;
                        }
                    }
                }
                RecvState::ReceiveBody => {
                    match memchr(&self.buf.as_slice()[self.scan..], PKT_END) {
                        Some(rel) => {
                            let end = self.scan + rel;
                            self.payload_len = end - 1;
                            self.scan = end + 1;
                            self.state = RecvState::ReceiveChecksum;
                        }
                        None => {
                            self.scan = self.buf.len();
                            return None;
                        }
                    }
                }
                RecvState::ReceiveChecksum => {
                    if self.buf.len() - self.scan < 2 {
                        return None;
                    }
                    let data = self.buf.as_slice();
                    let expected = crate::hex::from_hex(data[self.scan])
                        .map(|hi| u16::from(hi) << 4)
                        .zip(crate::hex::from_hex(data[self.scan + 1]))
                        .map(|(hi, lo)| (hi | u16::from(lo)) as u8);
                    let actual = data[1..=self.payload_len]
                        .iter()
                        .fold(0u8, |sum, &b| sum.wrapping_add(b));
                    self.scan += 2;
                    return Some(Event::Packet {
                        ok: expected == Some(actual),
                    });
                }
            }
        }
    }

    /// The payload of the frame reported by the last `Packet` event.
    pub fn payload(&self) -> &[u8] {
        &self.buf.as_slice()[1..=self.payload_len]
    }

    /// Removes the completed frame from the buffer and rearms the state
    /// machine. Bytes received after the frame are kept and rescanned.
    pub fn finish_packet(&mut self) {
        // '$' + payload + '#' + two checksum digits.
        self.buf.drain_front(self.payload_len + 4);
        self.state = RecvState::WaitForStart;
        self.scan = 0;
        self.payload_len = 0;
    }
}

fn memchr(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}
