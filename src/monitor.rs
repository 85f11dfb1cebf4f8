//! Monitor commands (`qRcmd`) and their output channel.
//!
//! `monitor` commands typed into GDB arrive hex-encoded in a `qRcmd` packet.
//! The stub decodes them, looks the command up in the table the target
//! provides and hands the handler a [`MonitorOutput`] to print into. When the
//! handler returns, any produced text is hex-encoded back to GDB; a silent
//! handler yields a plain `OK`.

use crate::error::Error;

/// Size of the output scratch buffer; output beyond it is dropped.
const SCRATCH_SIZE: usize = 512;

/// A host-defined command reachable via GDB's `monitor` command.
pub struct MonitorCommand<T> {
    /// The identifier the user types, up to the first space.
    pub name: &'static str,
    /// One-line description (eg. for a host-provided help command).
    pub description: &'static str,
    /// Handler; `args` is everything after the first space, or the empty
    /// string when no arguments were given.
    pub handler: fn(&mut T, &mut MonitorOutput, args: &str) -> Result<(), Error>,
}

/// An argument for [`MonitorOutput::printf`].
///
/// Stands in for the varargs a C-style printf would take; each conversion
/// specifier consumes the next argument of the matching type.
#[derive(Debug, Clone, Copy)]
pub enum Arg<'a> {
    /// For `%u` and `%x`.
    U32(u32),
    /// For `%d`.
    I32(i32),
    /// For `%X`.
    U64(u64),
    /// For `%s`.
    Str(&'a str),
    /// For `%p`.
    Ptr(usize),
}

/// Formatted-output sink handed to monitor command handlers.
///
/// A fixed 512-byte scratch buffer with printf-style formatting; output
/// overflowing the scratch is silently dropped. Deliberately tiny — monitor
/// output is human-oriented diagnostics, not bulk data.
pub struct MonitorOutput {
    scratch: [u8; SCRATCH_SIZE],
    off: usize,
}

impl Default for MonitorOutput {
    fn default() -> Self {
        MonitorOutput {
            scratch: [0; SCRATCH_SIZE],
            off: 0,
        }
    }
}

impl MonitorOutput {
    /// Discards all buffered output.
    pub fn reset(&mut self) {
        self.off = 0;
    }

    /// The output produced so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.scratch[..self.off]
    }

    pub fn is_empty(&self) -> bool {
        self.off == 0
    }

    /// Appends a single character, dropping it if the scratch is full.
    pub fn put_char(&mut self, ch: u8) {
        if self.off < SCRATCH_SIZE {
            self.scratch[self.off] = ch;
            self.off += 1;
        }
    }

    /// Appends a string verbatim.
    pub fn put_str(&mut self, s: &str) {
        for &b in s.as_bytes() {
            self.put_char(b);
        }
    }

    fn put_dec(&mut self, mut v: u64) {
        let mut digits = [0u8; 20];
        let mut n = 0;
        while v != 0 {
            digits[n] = b'0' + (v % 10) as u8;
            v /= 10;
            n += 1;
        }
        if n == 0 {
            self.put_char(b'0');
        }
        while n > 0 {
            n -= 1;
            self.put_char(digits[n]);
        }
    }

    fn put_hex(&mut self, mut v: u64) {
        let mut digits = [0u8; 16];
        let mut n = 0;
        while v != 0 {
            digits[n] = crate::hex::to_hex((v & 0xf) as u8);
            v >>= 4;
            n += 1;
        }
        if n == 0 {
            self.put_char(b'0');
        }
        while n > 0 {
            n -= 1;
            self.put_char(digits[n]);
        }
    }

    /// printf-like formatting into the scratch buffer.
    ///
    /// Supported specifiers: `%u` and `%x` (32-bit decimal/hex), `%d`
    /// (signed), `%X` (64-bit hex), `%s`, `%p`, `%%`, and the `%#` prefix
    /// which prints `0x` before the converted value. A specifier whose
    /// argument is missing or of the wrong type produces nothing.
    pub fn printf(&mut self, fmt: &str, args: &[Arg<'_>]) {
        let mut args = args.iter();
        let mut it = fmt.as_bytes().iter().copied();

        while let Some(ch) = it.next() {
            if ch != b'%' {
                self.put_char(ch);
                continue;
            }

            let mut spec = match it.next() {
                Some(c) => c,
                None => break,
            };
            if spec == b'#' {
                self.put_str("0x");
                spec = match it.next() {
                    Some(c) => c,
                    None => break,
                };
            }

            match spec {
                b'%' => self.put_char(b'%'),
                b'u' => match args.next() {
                    Some(Arg::U32(v)) => self.put_dec(u64::from(*v)),
                    _ => {}
                },
                b'd' => match args.next() {
                    Some(Arg::I32(v)) => {
                        if *v < 0 {
                            self.put_char(b'-');
                        }
                        self.put_dec(u64::from(v.unsigned_abs()));
                    }
                    _ => {}
                },
                b'x' => match args.next() {
                    Some(Arg::U32(v)) => self.put_hex(u64::from(*v)),
                    _ => {}
                },
                b'X' => match args.next() {
                    Some(Arg::U64(v)) => self.put_hex(*v),
                    _ => {}
                },
                b's' => match args.next() {
                    Some(Arg::Str(s)) => self.put_str(s),
                    _ => {}
                },
                b'p' => match args.next() {
                    Some(Arg::Ptr(p)) => {
                        self.put_str("0x");
                        self.put_hex(*p as u64);
                    }
                    _ => {}
                },
                _ => {}
            }
        }
    }
}
