//! The transport seam between the stub and a connecting debugger, plus the
//! outbound reply framing.
//!
//! The stub does not open sockets or serial ports itself; the host hands it
//! an [`Io`] implementation and the engine only ever talks to that.

use crate::error::Error;
use crate::hex;

/// A byte-oriented transport to the connected debugger.
///
/// Implemented by the host for whatever carries the session (a TCP stream, a
/// serial line, a pipe). The run loop is cooperative: `peek` and `read` must
/// not block, all waiting happens inside `poll`.
pub trait Io {
    /// Returns the number of bytes immediately available for reading,
    /// `0` if none.
    fn peek(&mut self) -> usize;

    /// Reads up to `dst.len()` bytes without blocking.
    ///
    /// Returns the number of bytes read. Fails with `PeerDisconnected` once
    /// the far end has closed the connection, or `TryAgain` if no data is
    /// available after all.
    fn read(&mut self, dst: &mut [u8]) -> Result<usize, Error>;

    /// Writes all of `src`, returning only once every byte is out or a fatal
    /// error occurred. Short writes must be retried internally and surface
    /// as errors if they cannot complete.
    fn write(&mut self, src: &[u8]) -> Result<(), Error>;

    /// Blocks until data is available for reading.
    ///
    /// Optional; the default returns `NotSupported`, which makes the run
    /// loop return to the caller instead of blocking whenever the transport
    /// runs dry.
    fn poll(&mut self) -> Result<(), Error> {
        Err(Error::NotSupported)
    }
}

/// Sends a reply packet, adding the `$`…`#cc` framing.
///
/// The checksum is the unsigned 8-bit sum of the body bytes, rendered as two
/// lowercase hex digits; an empty body checksums to `00`. Each frame segment
/// is handed to the transport in order: start, body, end, checksum.
pub(crate) fn reply_send<I: Io>(io: &mut I, body: &[u8]) -> Result<(), Error> {
    let checksum = body.iter().fold(0u8, |sum, &b| sum.wrapping_add(b));

    io.write(b"$")?;
    if !body.is_empty() {
        io.write(body)?;
    }
    io.write(b"#")?;
    io.write(&hex::hex_byte(checksum))
}

/// Sends the empty reply, telling GDB the packet is unsupported.
pub(crate) fn reply_empty<I: Io>(io: &mut I) -> Result<(), Error> {
    reply_send(io, &[])
}

/// Sends an `OK` reply.
pub(crate) fn reply_ok<I: Io>(io: &mut I) -> Result<(), Error> {
    reply_send(io, b"OK")
}

/// Sends an `E nn` reply for the given status.
pub(crate) fn reply_err<I: Io>(io: &mut I, err: Error) -> Result<(), Error> {
    let code = hex::hex_byte(err.wire_code());
    reply_send(io, &[b'E', code[0], code[1]])
}

/// Sends the `S 05` stop reply (SIGTRAP), the only stop signal the stub
/// reports.
pub(crate) fn reply_sig_trap<I: Io>(io: &mut I) -> Result<(), Error> {
    reply_send(io, b"S05")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Sink {
        out: Vec<u8>,
        writes: usize,
    }

    impl Io for Sink {
        fn peek(&mut self) -> usize {
            0
        }

        fn read(&mut self, _dst: &mut [u8]) -> Result<usize, Error> {
            Err(Error::TryAgain)
        }

        fn write(&mut self, src: &[u8]) -> Result<(), Error> {
            self.writes += 1;
            self.out.extend_from_slice(src);
            Ok(())
        }
    }

    #[test]
    fn frames_body_with_lowercase_checksum() {
        let mut sink = Sink::default();
        reply_sig_trap(&mut sink).unwrap();
        assert_eq!(sink.out, b"$S05#b8");
        assert_eq!(sink.writes, 4);
    }

    #[test]
    fn empty_reply_checksums_to_zero() {
        let mut sink = Sink::default();
        reply_empty(&mut sink).unwrap();
        assert_eq!(sink.out, b"$#00");
        assert_eq!(sink.writes, 3);
    }

    #[test]
    fn ok_and_error_replies() {
        let mut sink = Sink::default();
        reply_ok(&mut sink).unwrap();
        reply_err(&mut sink, Error::ProtocolViolation).unwrap();
        assert_eq!(sink.out, b"$OK#9a$E07#ac");
    }

    #[test]
    fn poll_defaults_to_not_supported() {
        let mut sink = Sink::default();
        assert_eq!(sink.poll(), Err(Error::NotSupported));
    }
}
