// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Z80 instruction encoder: a static mnemonic table dispatching into
//! per-family encoders (loads, ALU, bit/shift, control flow, misc).
//! Every encoder returns opcode bytes plus pending fixups for operands
//! that are not compile-time literals.

mod alu;
mod bits;
mod flow;
mod loads;
mod misc;

use crate::core::diag::{CompileError, ErrorKind};

/// Z80 registers, including the undocumented IX/IY halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    A,
    B,
    C,
    D,
    E,
    H,
    L,
    I,
    R,
    Ixh,
    Ixl,
    Iyh,
    Iyl,
    Af,
    AfAlt,
    Bc,
    De,
    Hl,
    Sp,
    Ix,
    Iy,
}

impl Reg {
    pub fn parse(name: &str) -> Option<Reg> {
        Some(match name {
            "a" => Reg::A,
            "b" => Reg::B,
            "c" => Reg::C,
            "d" => Reg::D,
            "e" => Reg::E,
            "h" => Reg::H,
            "l" => Reg::L,
            "i" => Reg::I,
            "r" => Reg::R,
            "ixh" => Reg::Ixh,
            "ixl" => Reg::Ixl,
            "iyh" => Reg::Iyh,
            "iyl" => Reg::Iyl,
            "af" => Reg::Af,
            "af'" => Reg::AfAlt,
            "bc" => Reg::Bc,
            "de" => Reg::De,
            "hl" => Reg::Hl,
            "sp" => Reg::Sp,
            "ix" => Reg::Ix,
            "iy" => Reg::Iy,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Reg::A => "a",
            Reg::B => "b",
            Reg::C => "c",
            Reg::D => "d",
            Reg::E => "e",
            Reg::H => "h",
            Reg::L => "l",
            Reg::I => "i",
            Reg::R => "r",
            Reg::Ixh => "ixh",
            Reg::Ixl => "ixl",
            Reg::Iyh => "iyh",
            Reg::Iyl => "iyl",
            Reg::Af => "af",
            Reg::AfAlt => "af'",
            Reg::Bc => "bc",
            Reg::De => "de",
            Reg::Hl => "hl",
            Reg::Sp => "sp",
            Reg::Ix => "ix",
            Reg::Iy => "iy",
        }
    }

    /// 3-bit register field for the legacy 8-bit set. The IX/IY halves
    /// reuse the H/L codes under their family prefix.
    pub fn code8(self) -> Option<u8> {
        Some(match self {
            Reg::B => 0,
            Reg::C => 1,
            Reg::D => 2,
            Reg::E => 3,
            Reg::H | Reg::Ixh | Reg::Iyh => 4,
            Reg::L | Reg::Ixl | Reg::Iyl => 5,
            Reg::A => 7,
            _ => return None,
        })
    }

    /// Legacy 8-bit registers: valid targets for the CB copy forms.
    pub fn is_legacy8(self) -> bool {
        matches!(
            self,
            Reg::A | Reg::B | Reg::C | Reg::D | Reg::E | Reg::H | Reg::L
        )
    }

    pub fn is_half_index(self) -> bool {
        matches!(self, Reg::Ixh | Reg::Ixl | Reg::Iyh | Reg::Iyl)
    }

    /// The index pair a half register belongs to.
    pub fn half_family(self) -> Option<Reg> {
        match self {
            Reg::Ixh | Reg::Ixl => Some(Reg::Ix),
            Reg::Iyh | Reg::Iyl => Some(Reg::Iy),
            _ => None,
        }
    }

    /// 2-bit dd/ss field: BC DE HL SP.
    pub fn ss_code(self) -> Option<u8> {
        Some(match self {
            Reg::Bc => 0,
            Reg::De => 1,
            Reg::Hl => 2,
            Reg::Sp => 3,
            _ => return None,
        })
    }

    /// 2-bit qq field for push/pop: BC DE HL AF.
    pub fn qq_code(self) -> Option<u8> {
        Some(match self {
            Reg::Bc => 0,
            Reg::De => 1,
            Reg::Hl => 2,
            Reg::Af => 3,
            _ => return None,
        })
    }

    pub fn index_prefix(self) -> Option<u8> {
        match self {
            Reg::Ix => Some(0xDD),
            Reg::Iy => Some(0xFD),
            _ => None,
        }
    }
}

/// The 8 condition codes in hardware order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Nz,
    Z,
    Nc,
    C,
    Po,
    Pe,
    P,
    M,
}

impl Cond {
    pub fn parse(name: &str) -> Option<Cond> {
        Some(match name {
            "nz" => Cond::Nz,
            "z" => Cond::Z,
            "nc" => Cond::Nc,
            "c" => Cond::C,
            "po" => Cond::Po,
            "pe" => Cond::Pe,
            "p" => Cond::P,
            "m" => Cond::M,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Cond::Nz => "nz",
            Cond::Z => "z",
            Cond::Nc => "nc",
            Cond::C => "c",
            Cond::Po => "po",
            Cond::Pe => "pe",
            Cond::P => "p",
            Cond::M => "m",
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Cond::Nz => 0,
            Cond::Z => 1,
            Cond::Nc => 2,
            Cond::C => 3,
            Cond::Po => 4,
            Cond::Pe => 5,
            Cond::P => 6,
            Cond::M => 7,
        }
    }

    /// JR only encodes the flag subset.
    pub fn valid_for_jr(self) -> bool {
        matches!(self, Cond::Nz | Cond::Z | Cond::Nc | Cond::C)
    }

    /// Logical complement, used when lowering structured control.
    pub fn inverse(self) -> Cond {
        match self {
            Cond::Nz => Cond::Z,
            Cond::Z => Cond::Nz,
            Cond::Nc => Cond::C,
            Cond::C => Cond::Nc,
            Cond::Po => Cond::Pe,
            Cond::Pe => Cond::Po,
            Cond::P => Cond::M,
            Cond::M => Cond::P,
        }
    }
}

/// An immediate that is either a folded literal or a deferred
/// symbol-plus-addend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImmValue {
    Literal(i64),
    Symbolic { symbol: String, addend: i64 },
}

/// Operand shapes after expression folding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg),
    Cond(Cond),
    Indirect(Reg),
    Indexed { base: Reg, disp: i32 },
    Mem(ImmValue),
    Imm(ImmValue),
}

impl Operand {
    /// Shape description used in encoder diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Operand::Reg(r) => format!("register {}", r.name()),
            Operand::Cond(c) => format!("condition {}", c.name()),
            Operand::Indirect(r) => format!("({})", r.name()),
            Operand::Indexed { base, disp } => {
                if *disp >= 0 {
                    format!("({}+{})", base.name(), disp)
                } else {
                    format!("({}{})", base.name(), disp)
                }
            }
            Operand::Mem(_) => "(addr)".to_string(),
            Operand::Imm(_) => "immediate".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupKind {
    Rel8,
    Abs16,
}

/// Relocation request attached to an encoded instruction; `offset` is
/// the patch position within the instruction's bytes. A missing symbol
/// means a literal branch target that still needs the final site
/// address for its displacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFixup {
    pub kind: FixupKind,
    pub offset: usize,
    pub symbol: Option<String>,
    pub addend: i64,
}

/// Net stack-pointer movement of one instruction, as tracked by the
/// stack verifier. `Untracked` marks non-modeled SP writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackDelta {
    Net(i32),
    Untracked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedInstruction {
    pub bytes: Vec<u8>,
    pub fixups: Vec<PendingFixup>,
    pub delta: StackDelta,
}

impl EncodedInstruction {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            fixups: Vec::new(),
            delta: StackDelta::Net(0),
        }
    }

    pub fn with_delta(mut self, delta: i32) -> Self {
        self.delta = StackDelta::Net(delta);
        self
    }

    pub fn untracked(mut self) -> Self {
        self.delta = StackDelta::Untracked;
        self
    }

    pub fn with_fixup(mut self, fixup: PendingFixup) -> Self {
        self.fixups.push(fixup);
        self
    }
}

pub type EncodeResult = Result<EncodedInstruction, CompileError>;

pub(crate) fn encode_error(msg: impl Into<String>) -> CompileError {
    CompileError::new(ErrorKind::Encode, &msg.into(), None)
}

pub(crate) fn ok_bytes(bytes: &[u8]) -> EncodeResult {
    Ok(EncodedInstruction::from_bytes(bytes.to_vec()))
}

/// Fold a literal into an imm8, honoring the extended range; symbolic
/// values are rejected because no 8-bit absolute relocation exists.
pub(crate) fn imm8_byte(mnemonic: &str, value: &ImmValue) -> Result<u8, CompileError> {
    match value {
        ImmValue::Literal(v) if crate::frontend::ast::value_fits_byte(*v) => Ok((*v & 0xFF) as u8),
        ImmValue::Literal(v) => Err(encode_error(format!(
            "{mnemonic} immediate out of range (-128..255): {v}"
        ))),
        ImmValue::Symbolic { symbol, .. } => Err(encode_error(format!(
            "{mnemonic} 8-bit immediate must be a constant, not the address \"{symbol}\""
        ))),
    }
}

/// imm16 low/high bytes plus an abs16 fixup when symbolic. `offset` is
/// the position of the low byte within the instruction.
pub(crate) fn imm16_bytes(
    mnemonic: &str,
    value: &ImmValue,
    offset: usize,
) -> Result<(u8, u8, Option<PendingFixup>), CompileError> {
    match value {
        ImmValue::Literal(v) if crate::frontend::ast::value_fits_word(*v) => {
            let w = (*v & 0xFFFF) as u16;
            Ok(((w & 0xFF) as u8, (w >> 8) as u8, None))
        }
        ImmValue::Literal(v) => Err(encode_error(format!(
            "{mnemonic} immediate out of range (-32768..65535): {v}"
        ))),
        ImmValue::Symbolic { symbol, addend } => Ok((
            0,
            0,
            Some(PendingFixup {
                kind: FixupKind::Abs16,
                offset,
                symbol: Some(symbol.clone()),
                addend: *addend,
            }),
        )),
    }
}

/// Indexed displacement byte.
pub(crate) fn disp_byte(mnemonic: &str, disp: i32) -> Result<u8, CompileError> {
    if (-128..=127).contains(&disp) {
        Ok((disp & 0xFF) as u8)
    } else {
        Err(encode_error(format!(
            "{mnemonic} indexed displacement out of range (-128..127): {disp}"
        )))
    }
}

type EncodeFn = fn(&str, &[Operand]) -> EncodeResult;

/// One row of the mnemonic table: name, operand-count bounds, encoder.
pub struct MnemonicSpec {
    pub name: &'static str,
    pub min_ops: u8,
    pub max_ops: u8,
    encode: EncodeFn,
}

// Sorted by name; lookups binary-search it.
static TABLE: &[MnemonicSpec] = &[
    m("adc", 2, 2, alu::encode_alu),
    m("add", 2, 2, alu::encode_alu),
    m("and", 1, 2, alu::encode_alu),
    m("bit", 2, 3, bits::encode_bit_op),
    m("call", 1, 2, flow::encode_call),
    m("ccf", 0, 0, misc::encode_simple),
    m("cp", 1, 2, alu::encode_alu),
    m("cpd", 0, 0, misc::encode_simple),
    m("cpdr", 0, 0, misc::encode_simple),
    m("cpi", 0, 0, misc::encode_simple),
    m("cpir", 0, 0, misc::encode_simple),
    m("cpl", 0, 0, misc::encode_simple),
    m("daa", 0, 0, misc::encode_simple),
    m("dec", 1, 1, alu::encode_incdec),
    m("di", 0, 0, misc::encode_simple),
    m("djnz", 1, 1, flow::encode_djnz),
    m("ei", 0, 0, misc::encode_simple),
    m("ex", 2, 2, loads::encode_ex),
    m("exx", 0, 0, misc::encode_simple),
    m("halt", 0, 0, misc::encode_simple),
    m("im", 1, 1, misc::encode_im),
    m("in", 2, 2, misc::encode_in),
    m("inc", 1, 1, alu::encode_incdec),
    m("ind", 0, 0, misc::encode_simple),
    m("indr", 0, 0, misc::encode_simple),
    m("ini", 0, 0, misc::encode_simple),
    m("inir", 0, 0, misc::encode_simple),
    m("jp", 1, 2, flow::encode_jp),
    m("jr", 1, 2, flow::encode_jr),
    m("ld", 2, 2, loads::encode_ld),
    m("ldd", 0, 0, misc::encode_simple),
    m("lddr", 0, 0, misc::encode_simple),
    m("ldi", 0, 0, misc::encode_simple),
    m("ldir", 0, 0, misc::encode_simple),
    m("neg", 0, 0, misc::encode_simple),
    m("nop", 0, 0, misc::encode_simple),
    m("or", 1, 2, alu::encode_alu),
    m("otdr", 0, 0, misc::encode_simple),
    m("otir", 0, 0, misc::encode_simple),
    m("out", 2, 2, misc::encode_out),
    m("outd", 0, 0, misc::encode_simple),
    m("outi", 0, 0, misc::encode_simple),
    m("pop", 1, 1, loads::encode_pop),
    m("push", 1, 1, loads::encode_push),
    m("res", 2, 3, bits::encode_bit_op),
    m("ret", 0, 1, flow::encode_ret),
    m("reti", 0, 0, flow::encode_reti_retn),
    m("retn", 0, 0, flow::encode_reti_retn),
    m("rl", 1, 2, bits::encode_shift),
    m("rla", 0, 0, misc::encode_simple),
    m("rlc", 1, 2, bits::encode_shift),
    m("rlca", 0, 0, misc::encode_simple),
    m("rld", 0, 0, misc::encode_simple),
    m("rr", 1, 2, bits::encode_shift),
    m("rra", 0, 0, misc::encode_simple),
    m("rrc", 1, 2, bits::encode_shift),
    m("rrca", 0, 0, misc::encode_simple),
    m("rrd", 0, 0, misc::encode_simple),
    m("rst", 1, 1, flow::encode_rst),
    m("sbc", 2, 2, alu::encode_alu),
    m("scf", 0, 0, misc::encode_simple),
    m("set", 2, 3, bits::encode_bit_op),
    m("sla", 1, 2, bits::encode_shift),
    m("sll", 1, 2, bits::encode_shift),
    m("sra", 1, 2, bits::encode_shift),
    m("srl", 1, 2, bits::encode_shift),
    m("sub", 1, 2, alu::encode_alu),
    m("xor", 1, 2, alu::encode_alu),
];

const fn m(name: &'static str, min_ops: u8, max_ops: u8, encode: EncodeFn) -> MnemonicSpec {
    MnemonicSpec {
        name,
        min_ops,
        max_ops,
        encode,
    }
}

pub fn lookup(mnemonic: &str) -> Option<&'static MnemonicSpec> {
    TABLE
        .binary_search_by(|spec| spec.name.cmp(mnemonic))
        .ok()
        .map(|ix| &TABLE[ix])
}

pub fn is_mnemonic(name: &str) -> bool {
    lookup(name).is_some()
}

/// Encode one instruction. Arity is validated here from the table so
/// every malformed shape fails with the mnemonic-scoped count message
/// before any operand inspection.
pub fn encode(mnemonic: &str, ops: &[Operand]) -> EncodeResult {
    let Some(spec) = lookup(mnemonic) else {
        return Err(CompileError::new(
            ErrorKind::Encode,
            "Unknown instruction",
            Some(mnemonic),
        ));
    };
    let n = ops.len();
    if n < spec.min_ops as usize || n > spec.max_ops as usize {
        let expected = if spec.min_ops == spec.max_ops {
            format!("{}", spec.min_ops)
        } else {
            format!("{} to {}", spec.min_ops, spec.max_ops)
        };
        return Err(encode_error(format!(
            "{mnemonic} expects {expected} operand(s), found {n}"
        )));
    }
    (spec.encode)(mnemonic, ops)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted_for_binary_search() {
        for pair in TABLE.windows(2) {
            assert!(
                pair[0].name < pair[1].name,
                "table out of order at {}",
                pair[1].name
            );
        }
    }

    #[test]
    fn lookup_finds_known_mnemonics() {
        assert!(is_mnemonic("ld"));
        assert!(is_mnemonic("otir"));
        assert!(!is_mnemonic("mov"));
    }

    #[test]
    fn arity_violation_reports_expected_count() {
        let err = encode("ld", &[Operand::Reg(Reg::A)]).expect_err("arity");
        assert_eq!(err.message(), "ld expects 2 operand(s), found 1");
        let err = encode("ret", &[Operand::Cond(Cond::Z), Operand::Cond(Cond::Z)])
            .expect_err("arity");
        assert_eq!(err.message(), "ret expects 0 to 1 operand(s), found 2");
    }

    #[test]
    fn unknown_mnemonic_is_reported_by_name() {
        let err = encode("mov", &[]).expect_err("unknown");
        assert_eq!(err.message(), "Unknown instruction: mov");
    }

    #[test]
    fn cond_inverse_round_trips() {
        for cc in [
            Cond::Nz,
            Cond::Z,
            Cond::Nc,
            Cond::C,
            Cond::Po,
            Cond::Pe,
            Cond::P,
            Cond::M,
        ] {
            assert_eq!(cc.inverse().inverse(), cc);
            assert_ne!(cc.inverse(), cc);
        }
    }

    #[test]
    fn half_index_registers_reuse_hl_codes() {
        assert_eq!(Reg::Ixh.code8(), Some(4));
        assert_eq!(Reg::Iyl.code8(), Some(5));
        assert_eq!(Reg::Ixh.half_family(), Some(Reg::Ix));
        assert!(!Reg::Ixh.is_legacy8());
    }

    #[test]
    fn imm8_truncates_negative_literals() {
        assert_eq!(imm8_byte("ld", &ImmValue::Literal(-1)).expect("fits"), 0xFF);
        assert_eq!(imm8_byte("ld", &ImmValue::Literal(255)).expect("fits"), 0xFF);
        assert!(imm8_byte("ld", &ImmValue::Literal(-129)).is_err());
        assert!(imm8_byte("ld", &ImmValue::Literal(256)).is_err());
    }

    #[test]
    fn imm16_symbolic_defers_to_fixup() {
        let (lo, hi, fixup) = imm16_bytes(
            "jp",
            &ImmValue::Symbolic {
                symbol: "draw".to_string(),
                addend: 2,
            },
            1,
        )
        .expect("symbolic ok");
        assert_eq!((lo, hi), (0, 0));
        let fixup = fixup.expect("fixup present");
        assert_eq!(fixup.kind, FixupKind::Abs16);
        assert_eq!(fixup.offset, 1);
        assert_eq!(fixup.symbol.as_deref(), Some("draw"));
        assert_eq!(fixup.addend, 2);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn imm8_accepts_exactly_the_extended_byte_range(v in -512i64..512) {
                let result = imm8_byte("ld", &ImmValue::Literal(v));
                if (-128..=255).contains(&v) {
                    prop_assert_eq!(result.expect("fits"), (v & 0xFF) as u8);
                } else {
                    prop_assert!(result.is_err());
                }
            }

            #[test]
            fn imm16_bytes_reassemble_the_truncated_value(v in -32768i64..=65535) {
                let (lo, hi, fixup) = imm16_bytes("ld", &ImmValue::Literal(v), 1)
                    .expect("in range");
                prop_assert!(fixup.is_none());
                prop_assert_eq!(u16::from_le_bytes([lo, hi]), (v & 0xFFFF) as u16);
            }

            #[test]
            fn imm16_rejects_everything_outside_the_word_range(v in prop_oneof![
                (i64::from(i32::MIN)..=-32769),
                (65536..=i64::from(i32::MAX)),
            ]) {
                prop_assert!(imm16_bytes("ld", &ImmValue::Literal(v), 1).is_err());
            }
        }
    }
}
