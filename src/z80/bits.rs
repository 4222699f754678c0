// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! CB-prefixed encoders: shifts, rotates, and bit test/set/reset,
//! including the undocumented indexed-copy forms.

use crate::core::diag::CompileError;

use super::{disp_byte, encode_error, ok_bytes, EncodeResult, ImmValue, Operand, Reg};

fn shift_base(mnemonic: &str) -> u8 {
    match mnemonic {
        "rlc" => 0x00,
        "rrc" => 0x08,
        "rl" => 0x10,
        "rr" => 0x18,
        "sla" => 0x20,
        "sra" => 0x28,
        "sll" => 0x30,
        _ => 0x38,
    }
}

/// rlc/rrc/rl/rr/sla/sra/sll/srl. The two-operand form is the
/// indexed-copy variant: shift memory, copy the result to a register.
pub(crate) fn encode_shift(mnemonic: &str, ops: &[Operand]) -> EncodeResult {
    let base = shift_base(mnemonic);
    if ops.len() == 2 {
        let (prefix, d, code) = copy_form(mnemonic, &ops[0], &ops[1])?;
        return ok_bytes(&[prefix, 0xCB, d, base | code]);
    }
    match cb_target(mnemonic, &ops[0])? {
        CbTarget::Plain(code) => ok_bytes(&[0xCB, base | code]),
        CbTarget::Indexed(prefix, d) => ok_bytes(&[prefix, 0xCB, d, base | 6]),
    }
}

/// bit/res/set. Three operands select the indexed-copy variant.
pub(crate) fn encode_bit_op(mnemonic: &str, ops: &[Operand]) -> EncodeResult {
    let base = match mnemonic {
        "bit" => 0x40,
        "res" => 0x80,
        _ => 0xC0,
    };
    let bit = bit_number(mnemonic, &ops[0])?;
    let op = base | (bit << 3);
    if ops.len() == 3 {
        let (prefix, d, code) = copy_form(mnemonic, &ops[1], &ops[2])?;
        return ok_bytes(&[prefix, 0xCB, d, op | code]);
    }
    match cb_target(mnemonic, &ops[1])? {
        CbTarget::Plain(code) => ok_bytes(&[0xCB, op | code]),
        CbTarget::Indexed(prefix, d) => ok_bytes(&[prefix, 0xCB, d, op | 6]),
    }
}

fn bit_number(mnemonic: &str, op: &Operand) -> Result<u8, CompileError> {
    match op {
        Operand::Imm(ImmValue::Literal(v)) if (0..=7).contains(v) => Ok(*v as u8),
        Operand::Imm(ImmValue::Literal(v)) => Err(encode_error(format!(
            "{mnemonic} bit number out of range (0-7): {v}"
        ))),
        Operand::Imm(ImmValue::Symbolic { symbol, .. }) => Err(encode_error(format!(
            "{mnemonic} bit number must be a constant, not the address \"{symbol}\""
        ))),
        other => Err(encode_error(format!(
            "{mnemonic} expects a bit number (0-7), found {}",
            other.describe()
        ))),
    }
}

enum CbTarget {
    Plain(u8),
    Indexed(u8, u8),
}

fn cb_target(mnemonic: &str, op: &Operand) -> Result<CbTarget, CompileError> {
    match op {
        Operand::Reg(r) if r.is_legacy8() => {
            // Legacy registers only; the IX/IY halves have no CB forms.
            let code = r.code8().unwrap_or(0);
            Ok(CbTarget::Plain(code))
        }
        Operand::Reg(r) => Err(encode_error(format!(
            "{mnemonic} cannot operate on register {}",
            r.name()
        ))),
        Operand::Indirect(Reg::Hl) => Ok(CbTarget::Plain(6)),
        Operand::Indirect(r) => Err(encode_error(format!(
            "{mnemonic} cannot address ({})",
            r.name()
        ))),
        Operand::Indexed { base, disp } => {
            let prefix = base.index_prefix().ok_or_else(|| {
                encode_error(format!(
                    "{mnemonic} indexed addressing needs ix or iy, found {}",
                    base.name()
                ))
            })?;
            let d = disp_byte(mnemonic, *disp)?;
            Ok(CbTarget::Indexed(prefix, d))
        }
        other => Err(encode_error(format!(
            "{mnemonic} cannot operate on {}",
            other.describe()
        ))),
    }
}

fn copy_form(
    mnemonic: &str,
    memory: &Operand,
    target: &Operand,
) -> Result<(u8, u8, u8), CompileError> {
    let (prefix, d) = match cb_target(mnemonic, memory)? {
        CbTarget::Indexed(prefix, d) => (prefix, d),
        CbTarget::Plain(_) => {
            return Err(encode_error(format!(
                "{mnemonic} copy form needs (ix+d) or (iy+d) first, found {}",
                memory.describe()
            )))
        }
    };
    let code = match target {
        Operand::Reg(r) if r.is_legacy8() => r.code8().unwrap_or(0),
        other => {
            return Err(encode_error(format!(
                "{mnemonic} copy target must be an 8-bit register, found {}",
                other.describe()
            )))
        }
    };
    Ok((prefix, d, code))
}

#[cfg(test)]
mod tests {
    use super::super::encode;
    use super::*;

    fn bytes_of(mnemonic: &str, ops: &[Operand]) -> Vec<u8> {
        encode(mnemonic, ops).expect("encodes").bytes
    }

    #[test]
    fn shifts_on_registers_and_memory() {
        assert_eq!(bytes_of("rlc", &[Operand::Reg(Reg::B)]), vec![0xCB, 0x00]);
        assert_eq!(bytes_of("srl", &[Operand::Reg(Reg::A)]), vec![0xCB, 0x3F]);
        assert_eq!(bytes_of("sll", &[Operand::Reg(Reg::E)]), vec![0xCB, 0x33]);
        assert_eq!(
            bytes_of("rl", &[Operand::Indirect(Reg::Hl)]),
            vec![0xCB, 0x16]
        );
        assert_eq!(
            bytes_of(
                "sla",
                &[Operand::Indexed {
                    base: Reg::Ix,
                    disp: 3
                }]
            ),
            vec![0xDD, 0xCB, 0x03, 0x26]
        );
    }

    #[test]
    fn indexed_copy_forms() {
        assert_eq!(
            bytes_of(
                "rr",
                &[
                    Operand::Indexed {
                        base: Reg::Iy,
                        disp: -1
                    },
                    Operand::Reg(Reg::C)
                ]
            ),
            vec![0xFD, 0xCB, 0xFF, 0x19]
        );
        assert_eq!(
            bytes_of(
                "res",
                &[
                    Operand::Imm(ImmValue::Literal(0)),
                    Operand::Indexed {
                        base: Reg::Ix,
                        disp: 2
                    },
                    Operand::Reg(Reg::B)
                ]
            ),
            vec![0xDD, 0xCB, 0x02, 0x80]
        );
        let err = encode(
            "rl",
            &[Operand::Reg(Reg::B), Operand::Reg(Reg::C)],
        )
        .expect_err("copy needs indexed");
        assert_eq!(
            err.message(),
            "rl copy form needs (ix+d) or (iy+d) first, found register b"
        );
    }

    #[test]
    fn bit_test_set_reset() {
        assert_eq!(
            bytes_of(
                "bit",
                &[Operand::Imm(ImmValue::Literal(7)), Operand::Indirect(Reg::Hl)]
            ),
            vec![0xCB, 0x7E]
        );
        assert_eq!(
            bytes_of(
                "set",
                &[Operand::Imm(ImmValue::Literal(3)), Operand::Reg(Reg::A)]
            ),
            vec![0xCB, 0xDF]
        );
        assert_eq!(
            bytes_of(
                "res",
                &[
                    Operand::Imm(ImmValue::Literal(0)),
                    Operand::Indexed {
                        base: Reg::Ix,
                        disp: 2
                    }
                ]
            ),
            vec![0xDD, 0xCB, 0x02, 0x86]
        );
    }

    #[test]
    fn bit_number_is_validated() {
        let err = encode(
            "bit",
            &[Operand::Imm(ImmValue::Literal(8)), Operand::Reg(Reg::A)],
        )
        .expect_err("bit 8");
        assert_eq!(err.message(), "bit bit number out of range (0-7): 8");
        let err = encode(
            "set",
            &[
                Operand::Imm(ImmValue::Symbolic {
                    symbol: "mask".to_string(),
                    addend: 0,
                }),
                Operand::Reg(Reg::A),
            ],
        )
        .expect_err("symbolic bit");
        assert_eq!(
            err.message(),
            "set bit number must be a constant, not the address \"mask\""
        );
    }

    #[test]
    fn half_index_registers_have_no_cb_forms() {
        let err = encode("rl", &[Operand::Reg(Reg::Ixh)]).expect_err("no cb half");
        assert_eq!(err.message(), "rl cannot operate on register ixh");
    }
}
