//! A TCP-based stub serving a tiny fake ARM machine.
//!
//! Run it, then connect with `gdb-multiarch`:
//!
//! ```text
//! (gdb) set architecture arm
//! (gdb) target remote 127.0.0.1:9001
//! (gdb) x/8x 0x0
//! (gdb) monitor counters
//! ```

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};

use byteorder::LittleEndian;
use rsp_stub::monitor::{Arg, MonitorCommand, MonitorOutput};
use rsp_stub::{
    Arch, DecodeRegister, EncodeRegister, Error, GdbStub, Io, Register, RegisterKind, Target,
    TargetState,
};

/// Transport over a TCP stream.
///
/// The stream stays in blocking mode; `peek` flips it to non-blocking for
/// the probe so the run loop never stalls outside of `poll`.
struct TcpIo {
    stream: TcpStream,
}

impl Io for TcpIo {
    fn peek(&mut self) -> usize {
        let mut probe = [0u8; 512];
        if self.stream.set_nonblocking(true).is_err() {
            return 0;
        }
        let peeked = match self.stream.peek(&mut probe) {
            Ok(n) => n,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => 0,
            Err(_) => 0,
        };
        let _ = self.stream.set_nonblocking(false);
        peeked
    }

    fn read(&mut self, dst: &mut [u8]) -> Result<usize, Error> {
        match self.stream.read(dst) {
            Ok(0) => Err(Error::PeerDisconnected),
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => Err(Error::TryAgain),
            Err(_) => Err(Error::PeerDisconnected),
        }
    }

    fn write(&mut self, src: &[u8]) -> Result<(), Error> {
        self.stream
            .write_all(src)
            .map_err(|_| Error::PeerDisconnected)
    }

    fn poll(&mut self) -> Result<(), Error> {
        // A blocking peek returns once at least one byte is readable; zero
        // readable bytes on a blocking socket means the peer went away.
        let mut probe = [0u8; 1];
        match self.stream.peek(&mut probe) {
            Ok(0) => Err(Error::PeerDisconnected),
            Ok(_) => Ok(()),
            Err(_) => Err(Error::PeerDisconnected),
        }
    }
}

const REGS: &[Register] = &[
    Register::new("r0", 32, RegisterKind::Gp),
    Register::new("r1", 32, RegisterKind::Gp),
    Register::new("r2", 32, RegisterKind::Gp),
    Register::new("r3", 32, RegisterKind::Gp),
    Register::new("sp", 32, RegisterKind::StackPtr),
    Register::new("lr", 32, RegisterKind::CodePtr),
    Register::new("pc", 32, RegisterKind::Pc),
];

/// A make-believe ARM machine: 64 bytes of nop-sled memory and a program
/// counter crawling over it.
struct SledMachine {
    mem: [u8; 64],
    regs: [u32; 7],
    state: TargetState,
    steps: u32,
}

impl SledMachine {
    fn new() -> Self {
        SledMachine {
            mem: [0x90; 64],
            regs: [0, 0, 0, 0, 0x40, 0, 0x10],
            state: TargetState::Stopped,
            steps: 0,
        }
    }
}

fn cmd_counters(m: &mut SledMachine, out: &mut MonitorOutput, _args: &str) -> Result<(), Error> {
    out.printf(
        "pc %#x after %u steps\n",
        &[Arg::U32(m.regs[6]), Arg::U32(m.steps)],
    );
    Ok(())
}

fn cmd_help(_m: &mut SledMachine, out: &mut MonitorOutput, _args: &str) -> Result<(), Error> {
    for cmd in COMMANDS {
        out.printf("%s - %s\n", &[Arg::Str(cmd.name), Arg::Str(cmd.description)]);
    }
    Ok(())
}

const COMMANDS: &[MonitorCommand<SledMachine>] = &[
    MonitorCommand {
        name: "counters",
        description: "show the program counter and step count",
        handler: cmd_counters,
    },
    MonitorCommand {
        name: "help",
        description: "list the available monitor commands",
        handler: cmd_help,
    },
];

impl Target for SledMachine {
    fn arch(&self) -> Arch {
        Arch::Arm
    }

    fn registers(&self) -> &[Register] {
        REGS
    }

    fn commands(&self) -> &'static [MonitorCommand<Self>] {
        COMMANDS
    }

    fn state(&mut self) -> TargetState {
        self.state
    }

    fn stop(&mut self) -> Result<(), Error> {
        self.state = TargetState::Stopped;
        Ok(())
    }

    fn step(&mut self) -> Result<(), Error> {
        self.steps += 1;
        self.regs[6] = (self.regs[6] + 1) % self.mem.len() as u32;
        Ok(())
    }

    fn cont(&mut self) -> Result<(), Error> {
        // Nothing ever runs for real; pretend the sled finished instantly.
        self.regs[6] = 0;
        self.state = TargetState::Stopped;
        Ok(())
    }

    fn mem_read(&mut self, addr: u64, dst: &mut [u8]) -> Result<(), Error> {
        for (i, byte) in dst.iter_mut().enumerate() {
            let at = addr as usize + i;
            *byte = *self.mem.get(at).ok_or(Error::InvalidParameter)?;
        }
        Ok(())
    }

    fn mem_write(&mut self, addr: u64, src: &[u8]) -> Result<(), Error> {
        for (i, &byte) in src.iter().enumerate() {
            let at = addr as usize + i;
            *self.mem.get_mut(at).ok_or(Error::InvalidParameter)? = byte;
        }
        Ok(())
    }

    fn regs_read(&mut self, indices: &[u32], dst: &mut [u8]) -> Result<(), Error> {
        for (slot, &idx) in dst.chunks_exact_mut(4).zip(indices) {
            let value = *self.regs.get(idx as usize).ok_or(Error::InvalidParameter)?;
            value.encode::<LittleEndian>(slot);
        }
        Ok(())
    }

    fn regs_write(&mut self, indices: &[u32], src: &[u8]) -> Result<(), Error> {
        for (slot, &idx) in src.chunks_exact(4).zip(indices) {
            *self.regs.get_mut(idx as usize).ok_or(Error::InvalidParameter)? =
                u32::decode::<LittleEndian>(slot);
        }
        Ok(())
    }
}

fn main() {
    env_logger::init();

    let listener = TcpListener::bind("127.0.0.1:9001").expect("bind failed");
    println!("listening on 127.0.0.1:9001, connect with `target remote`");

    loop {
        let (stream, addr) = match listener.accept() {
            Ok(conn) => conn,
            Err(e) => {
                eprintln!("accept failed: {}", e);
                continue;
            }
        };
        println!("incoming connection from {}", addr);

        let mut stub = GdbStub::new(TcpIo { stream }, SledMachine::new());
        match stub.run() {
            Ok(()) => println!("transport idle, dropping session"),
            Err(Error::PeerDisconnected) => println!("debugger disconnected"),
            Err(e) => eprintln!("session failed: {}", e),
        }
    }
}
