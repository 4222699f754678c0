// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Arithmetic and logic encoders: the 8-bit accumulator family, the
//! 16-bit add/adc/sbc forms, and inc/dec.

use super::{
    disp_byte, encode_error, imm8_byte, ok_bytes, EncodeResult, EncodedInstruction, Operand, Reg,
};

/// Register-operand and immediate-operand opcode bases per mnemonic.
fn alu_bases(mnemonic: &str) -> (u8, u8) {
    match mnemonic {
        "add" => (0x80, 0xC6),
        "adc" => (0x88, 0xCE),
        "sub" => (0x90, 0xD6),
        "sbc" => (0x98, 0xDE),
        "and" => (0xA0, 0xE6),
        "xor" => (0xA8, 0xEE),
        "or" => (0xB0, 0xF6),
        _ => (0xB8, 0xFE),
    }
}

fn has_16bit_form(mnemonic: &str) -> bool {
    matches!(mnemonic, "add" | "adc" | "sbc")
}

/// add/adc/sub/sbc/and/xor/or/cp. The carry family takes an explicit
/// destination; the others accept the implicit-accumulator form too.
pub(crate) fn encode_alu(mnemonic: &str, ops: &[Operand]) -> EncodeResult {
    let src = if ops.len() == 2 {
        match &ops[0] {
            Operand::Reg(Reg::A) => &ops[1],
            Operand::Reg(d @ (Reg::Hl | Reg::Ix | Reg::Iy)) => {
                return encode_alu16(mnemonic, *d, &ops[1]);
            }
            other => {
                let allowed = if has_16bit_form(mnemonic) {
                    "a, hl, ix or iy"
                } else {
                    "a"
                };
                return Err(encode_error(format!(
                    "{mnemonic} destination must be {allowed}; found {}",
                    other.describe()
                )));
            }
        }
    } else {
        &ops[0]
    };
    encode_alu8(mnemonic, src)
}

fn encode_alu8(mnemonic: &str, src: &Operand) -> EncodeResult {
    let (reg_base, imm_base) = alu_bases(mnemonic);
    match src {
        Operand::Reg(r) => {
            let code = r.code8().ok_or_else(|| {
                encode_error(format!(
                    "{mnemonic} cannot operate on register {}",
                    r.name()
                ))
            })?;
            match r.half_family().and_then(Reg::index_prefix) {
                Some(prefix) => ok_bytes(&[prefix, reg_base | code]),
                None => ok_bytes(&[reg_base | code]),
            }
        }
        Operand::Indirect(Reg::Hl) => ok_bytes(&[reg_base | 6]),
        Operand::Indexed { base, disp } => {
            let prefix = base.index_prefix().ok_or_else(|| {
                encode_error(format!(
                    "{mnemonic} indexed addressing needs ix or iy, found {}",
                    base.name()
                ))
            })?;
            let d = disp_byte(mnemonic, *disp)?;
            ok_bytes(&[prefix, reg_base | 6, d])
        }
        Operand::Imm(v) => {
            let n = imm8_byte(mnemonic, v)?;
            ok_bytes(&[imm_base, n])
        }
        other => Err(encode_error(format!(
            "{mnemonic} cannot operate on {}",
            other.describe()
        ))),
    }
}

fn encode_alu16(mnemonic: &str, dst: Reg, src: &Operand) -> EncodeResult {
    if !has_16bit_form(mnemonic) {
        return Err(encode_error(format!(
            "{mnemonic} destination must be a; found register {}",
            dst.name()
        )));
    }
    if mnemonic != "add" && dst != Reg::Hl {
        return Err(encode_error(format!(
            "{mnemonic} 16-bit destination must be hl, found {}",
            dst.name()
        )));
    }
    let Operand::Reg(s) = src else {
        return Err(encode_error(format!(
            "{mnemonic} {} pairs with a 16-bit register, found {}",
            dst.name(),
            src.describe()
        )));
    };
    match mnemonic {
        "add" => {
            // The index destinations replace hl in the ss slot.
            let ss = match (dst, s) {
                (_, Reg::Bc) => 0,
                (_, Reg::De) => 1,
                (Reg::Hl, Reg::Hl) => 2,
                (Reg::Ix, Reg::Ix) | (Reg::Iy, Reg::Iy) => 2,
                (_, Reg::Sp) => 3,
                _ => {
                    return Err(encode_error(format!(
                        "add {} pairs with bc, de, {} or sp; found {}",
                        dst.name(),
                        dst.name(),
                        s.name()
                    )))
                }
            };
            match dst.index_prefix() {
                Some(prefix) => ok_bytes(&[prefix, 0x09 | (ss << 4)]),
                None => ok_bytes(&[0x09 | (ss << 4)]),
            }
        }
        _ => {
            let ss = s.ss_code().ok_or_else(|| {
                encode_error(format!(
                    "{mnemonic} hl pairs with bc, de, hl or sp; found {}",
                    s.name()
                ))
            })?;
            let base = if mnemonic == "adc" { 0x4A } else { 0x42 };
            ok_bytes(&[0xED, base | (ss << 4)])
        }
    }
}

/// inc/dec across 8-bit registers, (hl), indexed memory, and the
/// 16-bit pairs. The SP forms carry their one-byte stack movement.
pub(crate) fn encode_incdec(mnemonic: &str, ops: &[Operand]) -> EncodeResult {
    let inc = mnemonic == "inc";
    match &ops[0] {
        Operand::Reg(Reg::Sp) => {
            let op = if inc { 0x33 } else { 0x3B };
            // inc sp discards a pushed byte; dec sp reserves one.
            let delta = if inc { -1 } else { 1 };
            Ok(EncodedInstruction::from_bytes(vec![op]).with_delta(delta))
        }
        Operand::Reg(r @ (Reg::Bc | Reg::De | Reg::Hl)) => {
            let ss = match r {
                Reg::Bc => 0,
                Reg::De => 1,
                _ => 2,
            };
            let base = if inc { 0x03 } else { 0x0B };
            ok_bytes(&[base | (ss << 4)])
        }
        Operand::Reg(r @ (Reg::Ix | Reg::Iy)) => {
            let prefix = r.index_prefix().unwrap_or(0xDD);
            ok_bytes(&[prefix, if inc { 0x23 } else { 0x2B }])
        }
        Operand::Reg(r) => {
            let code = r.code8().ok_or_else(|| {
                encode_error(format!("{mnemonic} cannot modify register {}", r.name()))
            })?;
            let op = if inc { 0x04 } else { 0x05 } | (code << 3);
            match r.half_family().and_then(Reg::index_prefix) {
                Some(prefix) => ok_bytes(&[prefix, op]),
                None => ok_bytes(&[op]),
            }
        }
        Operand::Indirect(Reg::Hl) => ok_bytes(&[if inc { 0x34 } else { 0x35 }]),
        Operand::Indexed { base, disp } => {
            let prefix = base.index_prefix().ok_or_else(|| {
                encode_error(format!(
                    "{mnemonic} indexed addressing needs ix or iy, found {}",
                    base.name()
                ))
            })?;
            let d = disp_byte(mnemonic, *disp)?;
            ok_bytes(&[prefix, if inc { 0x34 } else { 0x35 }, d])
        }
        other => Err(encode_error(format!(
            "{mnemonic} cannot modify {}",
            other.describe()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{encode, ImmValue, StackDelta};
    use super::*;

    fn bytes_of(mnemonic: &str, ops: &[Operand]) -> Vec<u8> {
        encode(mnemonic, ops).expect("encodes").bytes
    }

    #[test]
    fn accumulator_forms_explicit_and_implicit() {
        assert_eq!(
            bytes_of("add", &[Operand::Reg(Reg::A), Operand::Reg(Reg::B)]),
            vec![0x80]
        );
        assert_eq!(bytes_of("xor", &[Operand::Reg(Reg::A)]), vec![0xAF]);
        assert_eq!(
            bytes_of("and", &[Operand::Imm(ImmValue::Literal(0x0F))]),
            vec![0xE6, 0x0F]
        );
        assert_eq!(bytes_of("cp", &[Operand::Indirect(Reg::Hl)]), vec![0xBE]);
        assert_eq!(
            bytes_of(
                "sbc",
                &[Operand::Reg(Reg::A), Operand::Imm(ImmValue::Literal(1))]
            ),
            vec![0xDE, 0x01]
        );
    }

    #[test]
    fn indexed_and_half_index_sources() {
        assert_eq!(
            bytes_of(
                "add",
                &[
                    Operand::Reg(Reg::A),
                    Operand::Indexed {
                        base: Reg::Ix,
                        disp: 4
                    }
                ]
            ),
            vec![0xDD, 0x86, 0x04]
        );
        assert_eq!(
            bytes_of("add", &[Operand::Reg(Reg::A), Operand::Reg(Reg::Ixh)]),
            vec![0xDD, 0x84]
        );
        assert_eq!(
            bytes_of("or", &[Operand::Reg(Reg::Iyl)]),
            vec![0xFD, 0xB5]
        );
    }

    #[test]
    fn sixteen_bit_adds() {
        assert_eq!(
            bytes_of("add", &[Operand::Reg(Reg::Hl), Operand::Reg(Reg::Sp)]),
            vec![0x39]
        );
        assert_eq!(
            bytes_of("add", &[Operand::Reg(Reg::Ix), Operand::Reg(Reg::Bc)]),
            vec![0xDD, 0x09]
        );
        assert_eq!(
            bytes_of("add", &[Operand::Reg(Reg::Iy), Operand::Reg(Reg::Iy)]),
            vec![0xFD, 0x29]
        );
        assert_eq!(
            bytes_of("adc", &[Operand::Reg(Reg::Hl), Operand::Reg(Reg::De)]),
            vec![0xED, 0x5A]
        );
        assert_eq!(
            bytes_of("sbc", &[Operand::Reg(Reg::Hl), Operand::Reg(Reg::Bc)]),
            vec![0xED, 0x42]
        );
    }

    #[test]
    fn destination_legality_is_checked_before_addressing() {
        let err = encode("add", &[Operand::Reg(Reg::B), Operand::Reg(Reg::C)])
            .expect_err("bad dest");
        assert_eq!(
            err.message(),
            "add destination must be a, hl, ix or iy; found register b"
        );
        let err = encode("sub", &[Operand::Reg(Reg::Hl), Operand::Reg(Reg::Bc)])
            .expect_err("no 16-bit sub");
        assert_eq!(err.message(), "sub destination must be a; found register hl");
        let err = encode("adc", &[Operand::Reg(Reg::Ix), Operand::Reg(Reg::Bc)])
            .expect_err("adc ix");
        assert_eq!(err.message(), "adc 16-bit destination must be hl, found ix");
        let err = encode("add", &[Operand::Reg(Reg::Ix), Operand::Reg(Reg::Hl)])
            .expect_err("add ix,hl");
        assert_eq!(err.message(), "add ix pairs with bc, de, ix or sp; found hl");
    }

    #[test]
    fn inc_dec_registers_and_memory() {
        assert_eq!(bytes_of("inc", &[Operand::Reg(Reg::B)]), vec![0x04]);
        assert_eq!(bytes_of("dec", &[Operand::Reg(Reg::A)]), vec![0x3D]);
        assert_eq!(bytes_of("inc", &[Operand::Indirect(Reg::Hl)]), vec![0x34]);
        assert_eq!(
            bytes_of(
                "dec",
                &[Operand::Indexed {
                    base: Reg::Ix,
                    disp: 1
                }]
            ),
            vec![0xDD, 0x35, 0x01]
        );
        assert_eq!(bytes_of("inc", &[Operand::Reg(Reg::De)]), vec![0x13]);
        assert_eq!(bytes_of("dec", &[Operand::Reg(Reg::Hl)]), vec![0x2B]);
        assert_eq!(bytes_of("inc", &[Operand::Reg(Reg::Ix)]), vec![0xDD, 0x23]);
        assert_eq!(bytes_of("inc", &[Operand::Reg(Reg::Ixl)]), vec![0xDD, 0x2C]);
    }

    #[test]
    fn sp_inc_dec_report_stack_movement() {
        let enc = encode("inc", &[Operand::Reg(Reg::Sp)]).expect("inc sp");
        assert_eq!(enc.bytes, vec![0x33]);
        assert_eq!(enc.delta, StackDelta::Net(-1));
        let enc = encode("dec", &[Operand::Reg(Reg::Sp)]).expect("dec sp");
        assert_eq!(enc.bytes, vec![0x3B]);
        assert_eq!(enc.delta, StackDelta::Net(1));
    }
}
