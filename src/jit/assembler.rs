//! Architecture-abstracted byte emitter plus x86-64/SSE2 instruction
//! encoders for compiled traces.
//!
//! [`CodeBuffer`] is the generic "byte/word/dword/qword writer" every
//! architecture backend would sit on top of, named after Cranelift's
//! `CodeSink` trait in its own machine-code emitter (`cranelift-codegen`,
//! not this crate's own teacher). Only one backend ([`x64`]) exists here; a
//! second architecture would add its own module next to it rather than
//! growing this one with `#[cfg(target_arch)]`.
//!
//! Emitted code is never mapped executable or invoked — see
//! [`crate::jit`] for why.

/// A growable byte buffer an instruction encoder writes into, little-endian
/// throughout (every architecture this crate could target is little-endian
/// in its native mode).
#[derive(Debug, Default, Clone)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put1(&mut self, x: u8) {
        self.bytes.push(x);
    }

    pub fn put2(&mut self, x: u16) {
        self.bytes.extend_from_slice(&x.to_le_bytes());
    }

    pub fn put4(&mut self, x: u32) {
        self.bytes.extend_from_slice(&x.to_le_bytes());
    }

    pub fn put8(&mut self, x: u64) {
        self.bytes.extend_from_slice(&x.to_le_bytes());
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    /// Patch a 4-byte little-endian value already written at `offset`, used
    /// to back-patch a guard's side-exit displacement once its target is
    /// known.
    pub fn patch4(&mut self, offset: usize, x: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&x.to_le_bytes());
    }
}

/// x86-64/SSE2 encoders for the handful of instructions the register
/// allocator's output needs: scalar-double moves, arithmetic, and a
/// compare-then-conditional-jump pair for guards.
pub mod x64 {
    use super::CodeBuffer;

    /// One of the eight low SSE registers a trace ever needs; this backend
    /// never allocates `xmm8`-`xmm15`, so no REX prefix is ever required.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Xmm(pub u8);

    /// A general-purpose register, used only as the base of the stack-slot
    /// addressing mode (`rbx`, conventionally, holds the stack base in the
    /// contract this backend assumes).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Gpr(pub u8);

    impl Gpr {
        pub const RBX: Gpr = Gpr(3);
    }

    const fn modrm(md: u8, reg: u8, rm: u8) -> u8 {
        (md << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
    }

    /// `movsd xmm(dst), xmm(src)` (register to register).
    pub fn movsd_reg_reg(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
        buf.put1(0xf2);
        buf.put1(0x0f);
        buf.put1(0x10);
        buf.put1(modrm(0b11, dst.0, src.0));
    }

    /// `movsd xmm(dst), [base + disp32]`: loads the 8-byte [`crate::value::Value`]
    /// word sitting at `slot * 8` in the interpreter's stack, as addressed
    /// from `base`.
    pub fn movsd_load(buf: &mut CodeBuffer, dst: Xmm, base: Gpr, disp32: i32) {
        buf.put1(0xf2);
        buf.put1(0x0f);
        buf.put1(0x10);
        // mod=10 (disp32), rm=100 selects the SIB byte, needed because rbx's
        // low 3 bits (011) would otherwise be read as a disp8-less encoding.
        buf.put1(modrm(0b10, dst.0, 0b100));
        buf.put1((0 << 6) | (0b100 << 3) | (base.0 & 0x7)); // SIB: scale=1, no index, base
        buf.put4(disp32 as u32);
    }

    fn binop(buf: &mut CodeBuffer, opcode: u8, dst: Xmm, src: Xmm) {
        buf.put1(0xf2);
        buf.put1(0x0f);
        buf.put1(opcode);
        buf.put1(modrm(0b11, dst.0, src.0));
    }

    pub fn addsd(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
        binop(buf, 0x58, dst, src);
    }

    pub fn subsd(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
        binop(buf, 0x5c, dst, src);
    }

    pub fn mulsd(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
        binop(buf, 0x59, dst, src);
    }

    pub fn divsd(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
        binop(buf, 0x5e, dst, src);
    }

    /// `xorpd xmm(dst), xmm(dst)`: zeroes a register, used ahead of `subsd`
    /// when lowering unary negation (`0 - x`).
    pub fn xorpd_zero(buf: &mut CodeBuffer, dst: Xmm) {
        buf.put1(0x66);
        buf.put1(0x0f);
        buf.put1(0x57);
        buf.put1(modrm(0b11, dst.0, dst.0));
    }

    /// `ucomisd xmm(a), xmm(b)`: sets the flags a guard's `jcc` reads.
    pub fn ucomisd(buf: &mut CodeBuffer, a: Xmm, b: Xmm) {
        buf.put1(0x66);
        buf.put1(0x0f);
        buf.put1(0x2e);
        buf.put1(modrm(0b11, a.0, b.0));
    }

    /// Near conditional jump (`0F 8x`), always emitted with a placeholder
    /// `rel32` of 0; returns the buffer offset of that displacement so the
    /// caller can [`CodeBuffer::patch4`] it once the side-exit target is
    /// known. `condition` is the low nibble of the `Jcc` opcode (`0x5` = jne,
    /// used for every guard since a guard always side-exits on mismatch).
    pub fn jcc_rel32_placeholder(buf: &mut CodeBuffer, condition: u8) -> usize {
        buf.put1(0x0f);
        buf.put1(0x80 | (condition & 0xf));
        let at = buf.len();
        buf.put4(0);
        at
    }

    pub const JNE: u8 = 0x5;
}

#[cfg(test)]
mod tests {
    use super::x64::*;
    use super::*;

    #[test]
    fn codebuffer_writes_little_endian() {
        let mut buf = CodeBuffer::new();
        buf.put1(0xab);
        buf.put2(0x1234);
        buf.put4(0xdead_beef);
        buf.put8(0x0102_0304_0506_0708);
        assert_eq!(
            buf.as_slice(),
            &[0xab, 0x34, 0x12, 0xef, 0xbe, 0xad, 0xde, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn patch4_overwrites_in_place() {
        let mut buf = CodeBuffer::new();
        buf.put1(0x90);
        let at = buf.len();
        buf.put4(0);
        buf.put1(0x90);
        buf.patch4(at, 0x1122_3344);
        assert_eq!(buf.as_slice(), &[0x90, 0x44, 0x33, 0x22, 0x11, 0x90]);
    }

    #[test]
    fn movsd_reg_reg_matches_known_encoding() {
        let mut buf = CodeBuffer::new();
        movsd_reg_reg(&mut buf, Xmm(0), Xmm(1));
        // movsd xmm0, xmm1
        assert_eq!(buf.as_slice(), &[0xf2, 0x0f, 0x10, 0xc1]);
    }

    #[test]
    fn addsd_matches_known_encoding() {
        let mut buf = CodeBuffer::new();
        addsd(&mut buf, Xmm(0), Xmm(1));
        // addsd xmm0, xmm1
        assert_eq!(buf.as_slice(), &[0xf2, 0x0f, 0x58, 0xc1]);
    }

    #[test]
    fn ucomisd_matches_known_encoding() {
        let mut buf = CodeBuffer::new();
        ucomisd(&mut buf, Xmm(0), Xmm(1));
        // ucomisd xmm0, xmm1
        assert_eq!(buf.as_slice(), &[0x66, 0x0f, 0x2e, 0xc1]);
    }

    #[test]
    fn jne_placeholder_returns_patchable_offset() {
        let mut buf = CodeBuffer::new();
        let at = jcc_rel32_placeholder(&mut buf, JNE);
        assert_eq!(&buf.as_slice()[..2], &[0x0f, 0x85]);
        buf.patch4(at, 42);
        assert_eq!(&buf.as_slice()[at..at + 4], &42u32.to_le_bytes());
    }

    #[test]
    fn movsd_load_encodes_a_sib_addressed_disp32() {
        let mut buf = CodeBuffer::new();
        movsd_load(&mut buf, Xmm(2), Gpr::RBX, 16);
        // movsd xmm2, [rbx+16]
        assert_eq!(buf.as_slice(), &[0xf2, 0x0f, 0x10, 0x94, 0x23, 0x10, 0x00, 0x00, 0x00]);
    }
}
