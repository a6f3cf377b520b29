
pub mod reg;
pub use reg::*;

use dynasmrt::{
    DynasmLabelApi,
    Assembler,
    VecAssembler,
    dynasm,
    x64::X64Relocation,
};
use iced_x86::{
    Decoder, DecoderOptions, Instruction, Formatter, IntelFormatter
};

/// Fallback/default assembler from [dynasmrt] (backed by executable memory).
pub type X64Assembler = Assembler<X64Relocation>;

/// Assembler from [dynasmrt] which only produces a byte vector.
pub type X64VecAssembler = VecAssembler<X64Relocation>;

/// Utility functions you might want on something implementing [dynasmrt::DynasmApi].
///
/// Every operation emitted by the synthesizer has exactly one method here.
/// Registers are passed as raw encodings (see [Gpr]).
pub trait Emitter: DynasmLabelApi<Relocation=X64Relocation> {
    fn emit_mov_r64_r64(&mut self, dst: u8, src: u8) {
        dynasm!(self ; mov Rq(dst), Rq(src));
    }
    fn emit_mov_r32_i32(&mut self, dst: u8, imm: i32) {
        dynasm!(self ; mov Rd(dst), DWORD imm);
    }
    fn emit_mov_r64_i64(&mut self, dst: u8, qword: i64) {
        dynasm!(self ; mov Rq(dst), QWORD qword);
    }

    fn emit_cmp_r64_r64(&mut self, lhs: u8, rhs: u8) {
        dynasm!(self ; cmp Rq(lhs), Rq(rhs));
    }
    fn emit_cmp_r32_i8(&mut self, lhs: u8, imm: i8) {
        dynasm!(self ; cmp Rd(lhs), BYTE imm as i32);
    }

    /// NOTE: Only use this with registers whose low byte is addressable
    /// without a REX prefix ambiguity (see [Gpr::has_plain_low_byte]).
    fn emit_setz_r8(&mut self, dst: u8) {
        dynasm!(self ; setz Rb(dst));
    }
    fn emit_cmovz_r64_r64(&mut self, dst: u8, src: u8) {
        dynasm!(self ; cmovz Rq(dst), Rq(src));
    }

    fn emit_push_r64(&mut self, src: u8) {
        dynasm!(self ; push Rq(src));
    }
    fn emit_pop_r64(&mut self, dst: u8) {
        dynasm!(self ; pop Rq(dst));
    }

    // PUSHFQ and POPFQ (no operand-size prefix needed in 64-bit mode)
    fn emit_pushfq(&mut self) {
        dynasm!(self ; .bytes &[0x9c]);
    }
    fn emit_popfq(&mut self) {
        dynasm!(self ; .bytes &[0x9d]);
    }

    fn emit_ret(&mut self) {
        dynasm!(self ; ret);
    }
}

// Implement [Emitter] for all of the JIT assemblers we care about
impl Emitter for X64Assembler {}
impl Emitter for X64VecAssembler {}

/// Disassemble some x86-64 bytes (Intel syntax), one line per instruction.
pub fn disas(buf: &[u8], addr: u64) -> Vec<String> {
    let mut decoder = Decoder::with_ip(64, buf, addr, DecoderOptions::NONE);
    let mut formatter = IntelFormatter::new();
    formatter.options_mut().set_digit_separator("_");
    let mut output = String::new();
    let mut instr  = Instruction::default();
    let mut lines  = Vec::new();

    while decoder.can_decode() {
        decoder.decode_out(&mut instr);
        output.clear();
        formatter.format(&instr, &mut output);

        let start_idx = (instr.ip() - addr) as usize;
        let instr_bytes = &buf[start_idx..start_idx + instr.len()];
        let mut bytestr = String::new();
        for b in instr_bytes.iter() {
            bytestr.push_str(&format!("{:02x}", b));
        }
        lines.push(format!("{:016x}: {:32} {}", instr.ip(), bytestr, output));
    }
    lines
}


#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8  = 8,
    R9  = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}
impl Gpr {
    pub const ALL: [Gpr; 16] = [
        Gpr::Rax, Gpr::Rcx, Gpr::Rdx, Gpr::Rbx,
        Gpr::Rsp, Gpr::Rbp, Gpr::Rsi, Gpr::Rdi,
        Gpr::R8,  Gpr::R9,  Gpr::R10, Gpr::R11,
        Gpr::R12, Gpr::R13, Gpr::R14, Gpr::R15,
    ];

    pub fn as_usize(&self) -> usize {
        *self as usize
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Returns true if the low byte of this register is encoded the same way
    /// with or without a REX prefix (ie. not SPL/BPL/SIL/DIL).
    pub fn has_plain_low_byte(&self) -> bool {
        !matches!(self, Self::Rsp | Self::Rbp | Self::Rsi | Self::Rdi)
    }
}
impl From<u8> for Gpr {
    fn from(x: u8) -> Self {
        Self::ALL[(x & 0xf) as usize]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_ops() {
        let mut f = X64VecAssembler::new(0);
        f.emit_mov_r64_r64(Gpr::R12.as_u8(), Gpr::Rax.as_u8());
        f.emit_cmovz_r64_r64(Gpr::Rax.as_u8(), Gpr::R11.as_u8());
        f.emit_pushfq();
        f.emit_cmp_r32_i8(Gpr::R10.as_u8(), 1);
        f.emit_cmp_r32_i8(Gpr::Rax.as_u8(), -1);
        let bytes = f.finalize().unwrap();
        let lines = disas(&bytes, 0);
        assert_eq!(lines.len(), 5);
        assert!(lines[0].ends_with("mov r12,rax"), "{}", lines[0]);
        assert!(lines[1].ends_with("cmove rax,r11"), "{}", lines[1]);
        assert!(lines[2].ends_with("pushfq"), "{}", lines[2]);
        assert!(lines[3].ends_with("cmp r10d,1"), "{}", lines[3]);
        assert!(lines[4].contains("cmp eax,"), "{}", lines[4]);
    }
}
