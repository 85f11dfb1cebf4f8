//! Target-side definitions: the capability trait the host implements, the
//! register/architecture model and the `target.xml` description builder.

use byteorder::ByteOrder;

use crate::error::Error;
use crate::monitor::MonitorCommand;

/// Architectures the stub can describe to GDB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Arm,
    X86,
    Amd64,
}

impl Arch {
    /// The architecture name announced in the target description.
    ///
    /// Amd64 deliberately maps to `i386` as well; GDB works the wider
    /// register file out from the descriptors.
    pub fn gdb_name(self) -> &'static str {
        match self {
            Arch::Arm => "arm",
            Arch::X86 | Arch::Amd64 => "i386",
        }
    }

    /// The core feature namespace for the `<feature>` element.
    fn core_feature(self) -> &'static str {
        match self {
            Arch::Arm => "org.gnu.gdb.arm.core",
            Arch::X86 | Arch::Amd64 => "org.gnu.gdb.i386.core",
        }
    }
}

/// Execution state of the target as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// Not yet observed; only used as the initial last-seen state.
    Invalid,
    Running,
    Stopped,
}

/// What a register holds, as far as GDB cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    /// General purpose.
    Gp,
    /// The program counter.
    Pc,
    /// The stack pointer.
    StackPtr,
    /// Some other register holding a code address.
    CodePtr,
    /// A status/flags register.
    Status,
}

/// Describes one target register.
///
/// The position in the target's descriptor table defines the GDB register
/// index. Widths above 99 bits are not supported by the description renderer.
#[derive(Debug, Clone, Copy)]
pub struct Register {
    pub name: &'static str,
    /// Width in bits.
    pub bits: u32,
    pub kind: RegisterKind,
}

impl Register {
    pub const fn new(name: &'static str, bits: u32, kind: RegisterKind) -> Self {
        Register { name, bits, kind }
    }

    /// Width in bytes.
    pub fn bytes(&self) -> usize {
        self.bits as usize / 8
    }
}

/// The kind of trace point a `Z`/`z` packet refers to.
///
/// Umbrella over software/hardware breakpoints and read/write/access
/// watchpoints; their lifetime is owned by the host target, the stub is a
/// messenger only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracePointType {
    /// Software execution breakpoint.
    ExecSw,
    /// Hardware execution breakpoint.
    ExecHw,
    /// Read watchpoint.
    MemRead,
    /// Write watchpoint.
    MemWrite,
    /// Access (read or write) watchpoint.
    MemAccess,
}

/// What to do when a trace point is hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracePointAction {
    /// Stop the target.
    Stop,
}

/// The target control capability.
///
/// This trait is the seam between the protocol engine and whatever is being
/// debugged; the stub never touches CPU state, memory or breakpoints except
/// through it. Optional operations have defaults that make the corresponding
/// RSP commands report "unsupported" to GDB.
pub trait Target {
    /// The target architecture, selecting the `target.xml` contents.
    fn arch(&self) -> Arch;

    /// The register descriptor table. Must not change during a session.
    fn registers(&self) -> &[Register];

    /// Monitor commands reachable via `qRcmd`.
    fn commands(&self) -> &'static [MonitorCommand<Self>]
    where
        Self: Sized,
    {
        &[]
    }

    /// The current execution state.
    fn state(&mut self) -> TargetState;

    /// Stops the target (out-of-band interrupt or `vCont;t`).
    fn stop(&mut self) -> Result<(), Error>;

    /// Executes a single instruction, stopping again immediately.
    fn step(&mut self) -> Result<(), Error>;

    /// Resumes execution.
    fn cont(&mut self) -> Result<(), Error>;

    /// Restarts the target; only called when `can_restart` is true and the
    /// debugger enabled extended mode.
    fn restart(&mut self) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    /// Whether `restart` is implemented. Gates the `!` extended-mode probe.
    fn can_restart(&self) -> bool {
        false
    }

    /// Kills the target. GDB sends this when closing the session; hosts with
    /// nothing to tear down can keep the default no-op.
    fn kill(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Reads `dst.len()` bytes from the target address space.
    fn mem_read(&mut self, addr: u64, dst: &mut [u8]) -> Result<(), Error>;

    /// Writes `src` to the target address space.
    fn mem_write(&mut self, addr: u64, src: &[u8]) -> Result<(), Error>;

    /// Reads the registers named by `indices`, concatenating their values
    /// into `dst` in table order and the target's native byte order.
    fn regs_read(&mut self, indices: &[u32], dst: &mut [u8]) -> Result<(), Error>;

    /// Writes the registers named by `indices` from the concatenated values
    /// in `src`.
    fn regs_write(&mut self, indices: &[u32], src: &[u8]) -> Result<(), Error>;

    /// Sets a trace point at `addr`.
    fn tp_set(
        &mut self,
        addr: u64,
        ty: TracePointType,
        action: TracePointAction,
    ) -> Result<(), Error> {
        let _ = (addr, ty, action);
        Err(Error::NotSupported)
    }

    /// Clears the trace point at `addr`.
    fn tp_clear(&mut self, addr: u64) -> Result<(), Error> {
        let _ = addr;
        Err(Error::NotSupported)
    }
}

/// Encodes a register value into the byte layout GDB expects.
///
/// The stub copies register bytes verbatim between the hex coder and the
/// target; byte order is the target's responsibility. These helpers let a
/// target state its order once, at the type level.
pub trait EncodeRegister {
    fn encode<B: ByteOrder>(&self, dst: &mut [u8]);
}

/// Decodes a register value from the bytes GDB sent.
pub trait DecodeRegister: Sized {
    fn decode<B: ByteOrder>(src: &[u8]) -> Self;
}

impl EncodeRegister for u16 {
    fn encode<B: ByteOrder>(&self, dst: &mut [u8]) {
        B::write_u16(dst, *self);
    }
}

impl EncodeRegister for u32 {
    fn encode<B: ByteOrder>(&self, dst: &mut [u8]) {
        B::write_u32(dst, *self);
    }
}

impl EncodeRegister for u64 {
    fn encode<B: ByteOrder>(&self, dst: &mut [u8]) {
        B::write_u64(dst, *self);
    }
}

impl DecodeRegister for u16 {
    fn decode<B: ByteOrder>(src: &[u8]) -> Self {
        B::read_u16(src)
    }
}

impl DecodeRegister for u32 {
    fn decode<B: ByteOrder>(src: &[u8]) -> Self {
        B::read_u32(src)
    }
}

impl DecodeRegister for u64 {
    fn decode<B: ByteOrder>(src: &[u8]) -> Self {
        B::read_u64(src)
    }
}

/// Builds the `target.xml` document for `qXfer:features:read`.
///
/// Register bit widths are rendered as two decimal digits, matching the
/// widths real register files use; the `type` attribute is emitted for
/// program-counter, stack-pointer and code-pointer registers so GDB treats
/// their values as addresses.
pub(crate) fn build_target_xml(arch: Arch, regs: &[Register]) -> Vec<u8> {
    let mut xml = String::new();

    xml.push_str("<?xml version=\"1.0\"?>\n");
    xml.push_str("<!DOCTYPE target SYSTEM \"gdb-target.dtd\">\n");
    xml.push_str("<target version=\"1.0\">\n");
    xml.push_str("<architecture>");
    xml.push_str(arch.gdb_name());
    xml.push_str("</architecture>\n");
    xml.push_str("<feature name=\"");
    xml.push_str(arch.core_feature());
    xml.push_str("\">\n");

    for reg in regs {
        xml.push_str("<reg name=\"");
        xml.push_str(reg.name);
        xml.push_str("\" bitsize=\"");
        xml.push((b'0' + (reg.bits / 10 % 10) as u8) as char);
        xml.push((b'0' + (reg.bits % 10) as u8) as char);
        match reg.kind {
            RegisterKind::StackPtr => xml.push_str("\" type=\"data_ptr"),
            RegisterKind::Pc | RegisterKind::CodePtr => xml.push_str("\" type=\"code_ptr"),
            RegisterKind::Gp | RegisterKind::Status => {}
        }
        xml.push_str("\"/>\n");
    }

    xml.push_str("</feature>\n");
    xml.push_str("</target>\n");

    xml.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, LittleEndian};

    const REGS: &[Register] = &[
        Register::new("r0", 32, RegisterKind::Gp),
        Register::new("sp", 32, RegisterKind::StackPtr),
        Register::new("lr", 32, RegisterKind::CodePtr),
        Register::new("pc", 32, RegisterKind::Pc),
        Register::new("cpsr", 32, RegisterKind::Status),
    ];

    #[test]
    fn arm_description_is_byte_exact() {
        let xml = build_target_xml(Arch::Arm, REGS);
        let expected = "<?xml version=\"1.0\"?>\n\
                        <!DOCTYPE target SYSTEM \"gdb-target.dtd\">\n\
                        <target version=\"1.0\">\n\
                        <architecture>arm</architecture>\n\
                        <feature name=\"org.gnu.gdb.arm.core\">\n\
                        <reg name=\"r0\" bitsize=\"32\"/>\n\
                        <reg name=\"sp\" bitsize=\"32\" type=\"data_ptr\"/>\n\
                        <reg name=\"lr\" bitsize=\"32\" type=\"code_ptr\"/>\n\
                        <reg name=\"pc\" bitsize=\"32\" type=\"code_ptr\"/>\n\
                        <reg name=\"cpsr\" bitsize=\"32\"/>\n\
                        </feature>\n\
                        </target>\n";
        assert_eq!(xml, expected.as_bytes());
    }

    #[test]
    fn amd64_is_described_as_i386() {
        let regs = [Register::new("rip", 64, RegisterKind::Pc)];
        let xml = build_target_xml(Arch::Amd64, &regs);
        let xml = String::from_utf8(xml).unwrap();
        assert!(xml.contains("<architecture>i386</architecture>"));
        assert!(xml.contains("org.gnu.gdb.i386.core"));
        assert!(xml.contains("<reg name=\"rip\" bitsize=\"64\" type=\"code_ptr\"/>"));
    }

    #[test]
    fn narrow_widths_keep_two_digits() {
        let regs = [Register::new("flags", 8, RegisterKind::Gp)];
        let xml = build_target_xml(Arch::X86, &regs);
        let xml = String::from_utf8(xml).unwrap();
        assert!(xml.contains("bitsize=\"08\""));
    }

    #[test]
    fn register_value_round_trip() {
        let mut buf = [0u8; 8];
        0xdead_beef_u32.encode::<LittleEndian>(&mut buf[..4]);
        assert_eq!(&buf[..4], &[0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(u32::decode::<LittleEndian>(&buf[..4]), 0xdead_beef);

        0x0102_0304_0506_0708_u64.encode::<BigEndian>(&mut buf);
        assert_eq!(u64::decode::<BigEndian>(&buf), 0x0102_0304_0506_0708);
    }
}
