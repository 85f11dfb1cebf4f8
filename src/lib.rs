//! An embeddable GDB remote stub speaking the remote serial protocol (RSP).
//!
//! This crate is a pure protocol engine: it frames and checksums packets,
//! dispatches every supported command and encodes the replies, but owns no
//! sockets, no CPU state and no memory map. The host supplies those through
//! two small capability traits:
//!
//! * [`Io`] — the byte transport the debugger is connected over;
//! * [`Target`] — control over whatever is being debugged (an emulator, a
//!   hypervisor guest, bare-metal firmware behind a probe, …).
//!
//! A session is one [`GdbStub`] value driven by [`GdbStub::run`]:
//!
//! ```ignore
//! let mut stub = GdbStub::new(transport, target);
//! match stub.run() {
//!     Ok(()) => { /* transport dry and no poll hook; call run() again later */ }
//!     Err(Error::PeerDisconnected) => { /* debugger went away, reaccept */ }
//!     Err(e) => eprintln!("session failed: {}", e),
//! }
//! ```
//!
//! Supported commands: `? s c g G m M p P Z z R k !`, the `qSupported` /
//! `qXfer:features:read` target-description negotiation, `qRcmd` monitor
//! commands, `qTStatus` and `vCont`. Out-of-band `0x03` interrupts are
//! recognized between packets. Multi-threaded targets, non-stop mode and
//! `vFile` are out of scope.

mod buffer;
mod hex;
mod proto;

pub mod comm;
pub mod error;
pub mod monitor;
pub mod targets;

pub use crate::comm::Io;
pub use crate::error::Error;
pub use crate::monitor::{Arg, MonitorCommand, MonitorOutput};
pub use crate::targets::{
    Arch, DecodeRegister, EncodeRegister, Register, RegisterKind, Target, TargetState,
    TracePointAction, TracePointType,
};

use log::{debug, info, trace};
use std::convert::TryFrom;
use std::mem;
use std::str;

use crate::proto::{Event, Receiver};
use crate::targets::build_target_xml;

/// Largest memory chunk read from the target at once while serving `m`.
const MEM_READ_CHUNK: usize = 1024;
/// Largest memory chunk decoded and written at once while serving `M`.
const MEM_WRITE_CHUNK: usize = 4096;
/// Longest accepted monitor command line, decoded.
const RCMD_MAX: usize = 4096;

/// A GDB debugging session over the remote serial protocol.
///
/// One value per connected client. The session is exclusively owned by the
/// thread driving [`run`](GdbStub::run); independent sessions over different
/// transports may run on different threads, nothing is shared.
pub struct GdbStub<I: Io, T: Target> {
    io: I,
    target: T,
    rx: Receiver,
    /// Target state seen at the last `run` entry; a Running→Stopped edge
    /// produces an unsolicited stop reply.
    last_state: TargetState,
    /// Number of target registers.
    reg_count: u32,
    /// Size of the full register file in bytes.
    reg_bytes: usize,
    /// Identity index array handed to `regs_read`/`regs_write` for `g`/`G`.
    reg_indices: Vec<u32>,
    /// Scratch for register transfers, `reg_bytes` long.
    reg_scratch: Vec<u8>,
    /// Peer announced it understands `qXfer:features:read`.
    tgt_desc_supported: bool,
    /// Lazily built `target.xml`, kept for the session.
    xml_desc: Option<Vec<u8>>,
    /// Set by `!`; gates `R`.
    extended_mode: bool,
    out: MonitorOutput,
}

impl<I: Io, T: Target + 'static> GdbStub<I, T> {
    /// Creates a session over the given transport and target.
    pub fn new(io: I, target: T) -> Self {
        let regs = target.registers();
        let reg_count = regs.len() as u32;
        let reg_bytes = regs.iter().map(Register::bytes).sum();

        GdbStub {
            io,
            target,
            rx: Receiver::default(),
            last_state: TargetState::Invalid,
            reg_count,
            reg_bytes,
            reg_indices: (0..reg_count).collect(),
            reg_scratch: vec![0; reg_bytes],
            tgt_desc_supported: false,
            xml_desc: None,
            extended_mode: false,
            out: MonitorOutput::default(),
        }
    }

    /// Caps the receive buffer; a peer pushing more than this into a single
    /// packet has the packet dropped with `NoMemory`.
    pub fn set_max_packet_buf(&mut self, max: usize) {
        self.rx.buf.set_max(max);
    }

    /// Resets the receive machinery to its initial state, keeping allocated
    /// buffers. Negotiated features survive; use a fresh session for a new
    /// client.
    pub fn reset(&mut self) {
        self.rx.reset();
    }

    /// The transport capability.
    pub fn io(&self) -> &I {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut I {
        &mut self.io
    }

    /// The target capability.
    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    /// Dissolves the session, handing back the capabilities.
    pub fn into_parts(self) -> (I, T) {
        (self.io, self.target)
    }

    /// Processes debugger traffic until the transport runs dry.
    ///
    /// Blocks inside [`Io::poll`] when the transport provides it; otherwise
    /// returns `Ok(())` once no data is pending, and the host calls `run`
    /// again when the transport becomes readable. `Err(PeerDisconnected)`
    /// means the debugger closed the connection; other errors are transport
    /// failures or target failures on the reply-less commands.
    pub fn run(&mut self) -> Result<(), Error> {
        let state = self.target.state();
        if state == TargetState::Stopped && self.last_state != TargetState::Stopped {
            comm::reply_sig_trap(&mut self.io)?;
        }
        self.last_state = state;

        loop {
            let pending = self.io.peek();
            if pending > 0 {
                let dst = match self.rx.read_tail(pending) {
                    Ok(dst) => dst,
                    Err(e) => {
                        // Packet too large for the configured cap; drop it
                        // but keep the session alive.
                        self.rx.reset();
                        return Err(e);
                    }
                };
                let got = match self.io.read(dst) {
                    Ok(got) => got,
                    Err(e) => {
                        self.rx.commit(0, pending);
                        return Err(e);
                    }
                };
                self.rx.commit(got, pending);
                self.pump()?;
            } else {
                match self.io.poll() {
                    Err(Error::NotSupported) => return Ok(()),
                    other => other?,
                }
            }
        }
    }

    /// Walks the framer over everything received so far, acknowledging and
    /// dispatching each completed frame.
    fn pump(&mut self) -> Result<(), Error> {
        while let Some(event) = self.rx.advance() {
            match event {
                Event::Interrupt => {
                    info!("interrupt request from debugger, stopping target");
                    self.target.stop()?;
                    comm::reply_sig_trap(&mut self.io)?;
                }
                Event::Packet { ok: false } => {
                    self.io.write(b"-")?;
                    self.rx.finish_packet();
                }
                Event::Packet { ok: true } => {
                    self.io.write(b"+")?;
                    let rx = mem::take(&mut self.rx);
                    let result = self.process_packet(rx.payload());
                    self.rx = rx;
                    self.rx.finish_packet();
                    result?;
                }
            }
        }
        Ok(())
    }

    /// Dispatches one acknowledged packet payload.
    fn process_packet(&mut self, payload: &[u8]) -> Result<(), Error> {
        trace!("packet: {}", String::from_utf8_lossy(payload));

        let (cmd, args) = match payload.split_first() {
            Some((&cmd, args)) => (cmd, args),
            None => return comm::reply_empty(&mut self.io),
        };

        match cmd {
            b'!' => {
                if self.target.can_restart() {
                    self.extended_mode = true;
                    comm::reply_ok(&mut self.io)
                } else {
                    comm::reply_empty(&mut self.io)
                }
            }
            b'?' => comm::reply_sig_trap(&mut self.io),
            b's' => {
                self.target.step()?;
                comm::reply_sig_trap(&mut self.io)
            }
            b'c' => {
                self.target.cont()?;
                self.last_state = TargetState::Running;
                Ok(())
            }
            b'g' => self.read_all_registers(),
            b'G' => self.write_all_registers(args),
            b'm' => self.read_memory(args),
            b'M' => self.write_memory(args),
            b'p' => self.read_register(args),
            b'P' => self.write_register(args),
            b'Z' => self.trace_point(args, true),
            b'z' => self.trace_point(args, false),
            b'q' => self.process_query(args),
            b'v' => self.process_v(args),
            b'R' => {
                if self.extended_mode {
                    // Successful restart owes no reply.
                    self.target.restart()
                } else {
                    comm::reply_empty(&mut self.io)
                }
            }
            b'k' => {
                info!("debugger killed the target");
                self.target.kill()
            }
            other => {
                debug!("unsupported command '{}'", other as char);
                comm::reply_empty(&mut self.io)
            }
        }
    }

    fn reply_status(&mut self, err: Error) -> Result<(), Error> {
        comm::reply_err(&mut self.io, err)
    }

    /// `g`: read the whole register file.
    fn read_all_registers(&mut self) -> Result<(), Error> {
        match self
            .target
            .regs_read(&self.reg_indices, &mut self.reg_scratch)
        {
            Ok(()) => {
                let mut body = Vec::new();
                hex::push_hex(&mut body, &self.reg_scratch);
                comm::reply_send(&mut self.io, &body)
            }
            Err(e) => self.reply_status(e),
        }
    }

    /// `G<hex>`: write the whole register file.
    fn write_all_registers(&mut self, args: &[u8]) -> Result<(), Error> {
        if args.len() != self.reg_bytes * 2 {
            return self.reply_status(Error::ProtocolViolation);
        }
        if hex::parse_hex_bytes(args, &mut self.reg_scratch).is_err() {
            return self.reply_status(Error::ProtocolViolation);
        }
        match self
            .target
            .regs_write(&self.reg_indices, &self.reg_scratch)
        {
            Ok(()) => comm::reply_ok(&mut self.io),
            Err(e) => self.reply_status(e),
        }
    }

    /// `m addr,len`: read target memory, hex-encoded.
    fn read_memory(&mut self, args: &[u8]) -> Result<(), Error> {
        let parsed = (|| {
            let (addr, sep) = hex::parse_hex_u64(args, Some(b','))?;
            if sep == args.len() {
                return Err(Error::ProtocolViolation);
            }
            let (len, _) = hex::parse_hex_u64(&args[sep + 1..], None)?;
            Ok((addr, len))
        })();
        let (mut addr, len) = match parsed {
            Ok(v) => v,
            Err(e) => return self.reply_status(e),
        };

        let len = match usize::try_from(len).ok().filter(|l| l.checked_mul(2).is_some()) {
            Some(len) => len,
            None => return self.reply_status(Error::NoMemory),
        };
        let mut body = Vec::new();
        if body.try_reserve(len * 2).is_err() {
            return self.reply_status(Error::NoMemory);
        }

        let mut chunk = [0u8; MEM_READ_CHUNK];
        let mut remaining = len;
        while remaining > 0 {
            let this = remaining.min(MEM_READ_CHUNK);
            if let Err(e) = self.target.mem_read(addr, &mut chunk[..this]) {
                return self.reply_status(e);
            }
            hex::push_hex(&mut body, &chunk[..this]);
            addr = addr.wrapping_add(this as u64);
            remaining -= this;
        }

        comm::reply_send(&mut self.io, &body)
    }

    /// `M addr,len:data`: write hex-encoded data to target memory.
    fn write_memory(&mut self, args: &[u8]) -> Result<(), Error> {
        let parsed = (|| {
            let (addr, sep) = hex::parse_hex_u64(args, Some(b','))?;
            if sep == args.len() {
                return Err(Error::ProtocolViolation);
            }
            let rest = &args[sep + 1..];
            let (len, colon) = hex::parse_hex_u64(rest, Some(b':'))?;
            if colon == rest.len() {
                return Err(Error::ProtocolViolation);
            }
            let data = &rest[colon + 1..];
            let len = usize::try_from(len).map_err(|_| Error::NoMemory)?;
            if data.len() != len.checked_mul(2).ok_or(Error::NoMemory)? {
                return Err(Error::ProtocolViolation);
            }
            Ok((addr, len, data))
        })();
        let (mut addr, len, mut data) = match parsed {
            Ok(v) => v,
            Err(e) => return self.reply_status(e),
        };

        let mut chunk = [0u8; MEM_WRITE_CHUNK];
        let mut remaining = len;
        while remaining > 0 {
            let this = remaining.min(MEM_WRITE_CHUNK);
            let consumed = match hex::parse_hex_bytes(data, &mut chunk[..this]) {
                Ok(consumed) => consumed,
                Err(_) => return self.reply_status(Error::ProtocolViolation),
            };
            if let Err(e) = self.target.mem_write(addr, &chunk[..this]) {
                return self.reply_status(e);
            }
            addr = addr.wrapping_add(this as u64);
            remaining -= this;
            data = &data[consumed..];
        }

        comm::reply_ok(&mut self.io)
    }

    /// `p n`: read one register.
    fn read_register(&mut self, args: &[u8]) -> Result<(), Error> {
        let idx = match hex::parse_hex_u64(args, None) {
            Ok((idx, _)) => idx,
            Err(e) => return self.reply_status(e),
        };
        if idx >= u64::from(self.reg_count) {
            return self.reply_status(Error::ProtocolViolation);
        }

        let width = self.target.registers()[idx as usize].bytes();
        match self
            .target
            .regs_read(&[idx as u32], &mut self.reg_scratch[..width])
        {
            Ok(()) => {
                let mut body = Vec::new();
                hex::push_hex(&mut body, &self.reg_scratch[..width]);
                comm::reply_send(&mut self.io, &body)
            }
            Err(e) => self.reply_status(e),
        }
    }

    /// `P n=vv`: write one register.
    fn write_register(&mut self, args: &[u8]) -> Result<(), Error> {
        let parsed = (|| {
            let (idx, sep) = hex::parse_hex_u64(args, Some(b'='))?;
            if sep == args.len() {
                return Err(Error::ProtocolViolation);
            }
            Ok((idx, &args[sep + 1..]))
        })();
        let (idx, value_hex) = match parsed {
            Ok(v) => v,
            Err(e) => return self.reply_status(e),
        };
        if idx >= u64::from(self.reg_count) {
            return self.reply_status(Error::ProtocolViolation);
        }

        // Register bytes arrive in wire order; copy them through verbatim,
        // up to the declared register width.
        let width = self.target.registers()[idx as usize].bytes().min(8);
        let mut value = [0u8; 8];
        if hex::parse_hex_bytes(value_hex, &mut value[..width]).is_err() {
            return self.reply_status(Error::ProtocolViolation);
        }

        match self.target.regs_write(&[idx as u32], &value[..width]) {
            Ok(()) => comm::reply_ok(&mut self.io),
            Err(Error::NotSupported) => comm::reply_empty(&mut self.io),
            Err(e) => self.reply_status(e),
        }
    }

    /// `Z type,addr,kind` / `z type,addr,kind`: set or clear a trace point.
    fn trace_point(&mut self, args: &[u8], set: bool) -> Result<(), Error> {
        let parsed = (|| {
            let (ty, sep) = hex::parse_hex_u64(args, Some(b','))?;
            if sep == args.len() {
                return Err(Error::ProtocolViolation);
            }
            let rest = &args[sep + 1..];
            let (addr, sep) = hex::parse_hex_u64(rest, Some(b','))?;
            if sep == rest.len() {
                return Err(Error::ProtocolViolation);
            }
            // The kind argument (breakpoint width) is parsed for validity
            // but not forwarded; the target owns instruction sizing.
            let (_kind, _) = hex::parse_hex_u64(&rest[sep + 1..], None)?;

            let ty = match ty {
                0 => TracePointType::ExecSw,
                1 => TracePointType::ExecHw,
                2 => TracePointType::MemWrite,
                3 => TracePointType::MemRead,
                4 => TracePointType::MemAccess,
                _ => return Err(Error::InvalidParameter),
            };
            Ok((ty, addr))
        })();
        let (ty, addr) = match parsed {
            Ok(v) => v,
            Err(e) => return self.reply_status(e),
        };

        let result = if set {
            self.target.tp_set(addr, ty, TracePointAction::Stop)
        } else {
            self.target.tp_clear(addr)
        };
        match result {
            Ok(()) => comm::reply_ok(&mut self.io),
            Err(Error::NotSupported) => comm::reply_empty(&mut self.io),
            Err(e) => self.reply_status(e),
        }
    }

    /// `q…`: general query packets.
    fn process_query(&mut self, args: &[u8]) -> Result<(), Error> {
        let procs: &[(&[u8], fn(&mut Self, &[u8]) -> Result<(), Error>)] = &[
            (b"TStatus", Self::query_tstatus),
            (b"Supported", Self::query_supported),
            (b"Xfer:features:read", Self::query_xfer_features),
            (b"Rcmd", Self::query_rcmd),
        ];

        for (name, proc) in procs {
            if args.starts_with(name) {
                return proc(self, &args[name.len()..]);
            }
        }

        debug!("unsupported query {}", String::from_utf8_lossy(args));
        comm::reply_empty(&mut self.io)
    }

    /// `qTStatus`: no tracing support, trace experiment never running.
    fn query_tstatus(&mut self, _args: &[u8]) -> Result<(), Error> {
        comm::reply_send(&mut self.io, b"T0")
    }

    /// `qSupported:feat;feat;…`: feature negotiation.
    fn query_supported(&mut self, args: &[u8]) -> Result<(), Error> {
        let args = match args.split_first() {
            Some((&b':', rest)) => rest,
            _ => return self.reply_status(Error::ProtocolViolation),
        };

        for token in args.split(|&b| b == b';') {
            if let Err(e) = self.parse_feature(token) {
                return self.reply_status(e);
            }
        }

        if self.tgt_desc_supported {
            comm::reply_send(&mut self.io, b"qXfer:features:read+")
        } else {
            comm::reply_empty(&mut self.io)
        }
    }

    /// Handles one `qSupported` feature token.
    ///
    /// Tokens for features we know must be well formed: `name=value` for
    /// value-carrying ones, a single trailing `+` or `-` otherwise. Unknown
    /// features are ignored.
    fn parse_feature(&mut self, token: &[u8]) -> Result<(), Error> {
        let features: &[(&[u8], bool, fn(&mut Self, &[u8]) -> Result<(), Error>)] =
            &[(b"xmlRegisters", true, Self::feature_xml_registers)];

        for (name, has_value, handler) in features {
            // At least one byte must follow the name ('+', '-' or '=value').
            if token.len() > name.len() && token.starts_with(name) {
                let val = &token[name.len()..];
                return if *has_value {
                    if val.len() > 1 && val[0] == b'=' {
                        handler(self, &val[1..])
                    } else {
                        Err(Error::ProtocolViolation)
                    }
                } else if val == b"+" || val == b"-" {
                    handler(self, val)
                } else {
                    Err(Error::ProtocolViolation)
                };
            }
        }

        Ok(())
    }

    /// `xmlRegisters=arch,arch,…`: the peer can use our target description
    /// if it understands this architecture.
    fn feature_xml_registers(&mut self, value: &[u8]) -> Result<(), Error> {
        let arch = self.target.arch().gdb_name().as_bytes();
        if value.split(|&b| b == b',').any(|a| a == arch) {
            self.tgt_desc_supported = true;
        }
        Ok(())
    }

    /// `qXfer:features:read:annex:off,len`: windowed target description
    /// reads.
    fn query_xfer_features(&mut self, args: &[u8]) -> Result<(), Error> {
        let args = match args.split_first() {
            Some((&b':', rest)) => rest,
            _ => return self.reply_status(Error::ProtocolViolation),
        };

        if !self.tgt_desc_supported {
            return comm::reply_empty(&mut self.io);
        }

        if self.xml_desc.is_none() {
            let xml = build_target_xml(self.target.arch(), self.target.registers());
            self.xml_desc = Some(xml);
        }

        let parsed = (|| {
            let colon = args
                .iter()
                .position(|&b| b == b':')
                .ok_or(Error::ProtocolViolation)?;
            let annex = &args[..colon];
            let rest = &args[colon + 1..];
            let (off, sep) = hex::parse_hex_u64(rest, Some(b','))?;
            if sep == rest.len() {
                return Err(Error::ProtocolViolation);
            }
            let (len, _) = hex::parse_hex_u64(&rest[sep + 1..], None)?;
            Ok((annex, off, len))
        })();
        let (annex, off, len) = match parsed {
            Ok(v) => v,
            Err(e) => return self.reply_status(e),
        };

        if annex != b"target.xml" {
            return comm::reply_send(&mut self.io, b"E00");
        }

        let xml = match &self.xml_desc {
            Some(xml) => xml,
            None => return Err(Error::InternalError),
        };
        let size = xml.len() as u64;
        if off < size {
            let off = off as usize;
            let window = (size - off as u64).min(len) as usize;
            // A window truncated by the end of the document is the last one.
            let letter = if (window as u64) < len { b'l' } else { b'm' };

            let mut body = Vec::new();
            if body.try_reserve(window + 1).is_err() {
                return self.reply_status(Error::NoMemory);
            }
            body.push(letter);
            body.extend_from_slice(&xml[off..off + window]);
            comm::reply_send(&mut self.io, &body)
        } else if off == size {
            comm::reply_send(&mut self.io, b"l")
        } else {
            self.reply_status(Error::InvalidParameter)
        }
    }

    /// `qRcmd,<hex>`: host-defined monitor commands.
    fn query_rcmd(&mut self, args: &[u8]) -> Result<(), Error> {
        let args = match args.split_first() {
            Some((&b',', rest)) => rest,
            _ => return self.reply_status(Error::ProtocolViolation),
        };

        if args.len() / 2 > RCMD_MAX {
            return self.reply_status(Error::BufferOverflow);
        }
        let mut decoded = vec![0u8; args.len() / 2];
        if hex::parse_hex_bytes(args, &mut decoded).is_err() {
            return self.reply_status(Error::ProtocolViolation);
        }
        let line = match str::from_utf8(&decoded) {
            Ok(line) => line,
            Err(_) => return self.reply_status(Error::ProtocolViolation),
        };

        // Command name runs up to the first space, the rest is arguments.
        let (name, cmd_args) = match line.find(' ') {
            Some(at) => (&line[..at], &line[at + 1..]),
            None => (line, ""),
        };

        let cmd = self
            .target
            .commands()
            .iter()
            .find(|cmd| cmd.name == name);
        let cmd = match cmd {
            Some(cmd) => cmd,
            None => {
                debug!("unknown monitor command '{}'", name);
                return self.reply_status(Error::NotFound);
            }
        };

        self.out.reset();
        match (cmd.handler)(&mut self.target, &mut self.out, cmd_args) {
            Err(e) => self.reply_status(e),
            Ok(()) => {
                if self.out.is_empty() {
                    comm::reply_ok(&mut self.io)
                } else {
                    let mut body = Vec::new();
                    hex::push_hex(&mut body, self.out.as_bytes());
                    comm::reply_send(&mut self.io, &body)
                }
            }
        }
    }

    /// `v…`: multi-letter packets.
    fn process_v(&mut self, args: &[u8]) -> Result<(), Error> {
        let procs: &[(&[u8], &[u8], fn(&mut Self, &[u8]) -> Result<(), Error>)] =
            &[(b"Cont", b"vCont;s;c;t", Self::v_cont)];

        // The identifier ends at '?' (query form), ';' or the end of the
        // packet.
        let query = args.iter().position(|&b| b == b'?');
        let name_len = query
            .or_else(|| args.iter().position(|&b| b == b';'))
            .unwrap_or(args.len());
        let name = &args[..name_len];

        for (proc_name, query_reply, proc) in procs {
            if name == *proc_name {
                if query.is_some() {
                    return comm::reply_send(&mut self.io, query_reply);
                }
                return proc(self, &args[name_len..]);
            }
        }

        debug!("unsupported v-packet {}", String::from_utf8_lossy(args));
        comm::reply_empty(&mut self.io)
    }

    /// `vCont;action[:tid]`: only the first action is honored, thread ids
    /// are ignored (single-thread stub).
    fn v_cont(&mut self, args: &[u8]) -> Result<(), Error> {
        if args.len() < 2 || args[0] != b';' {
            return self.reply_status(Error::ProtocolViolation);
        }

        match args[1] {
            b'c' => {
                self.target.cont()?;
                self.last_state = TargetState::Running;
                Ok(())
            }
            b's' => {
                self.target.step()?;
                comm::reply_sig_trap(&mut self.io)
            }
            b't' => {
                self.target.stop()?;
                comm::reply_sig_trap(&mut self.io)
            }
            _ => self.reply_status(Error::ProtocolViolation),
        }
    }
}
