// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Load-group encoders: the `ld` matrix, stack push/pop, and the
//! exchange instructions.

use crate::core::diag::CompileError;

use super::{
    disp_byte, encode_error, imm16_bytes, imm8_byte, ok_bytes, EncodeResult, EncodedInstruction,
    ImmValue, Operand, Reg,
};

/// `ld dst, src` across the 8-bit matrix, the 16-bit pair loads, the
/// indexed and half-index forms, and the accumulator specials.
pub(crate) fn encode_ld(mnemonic: &str, ops: &[Operand]) -> EncodeResult {
    let (dst, src) = (&ops[0], &ops[1]);
    match (dst, src) {
        // Accumulator specials.
        (Operand::Reg(Reg::A), Operand::Indirect(Reg::Bc)) => ok_bytes(&[0x0A]),
        (Operand::Reg(Reg::A), Operand::Indirect(Reg::De)) => ok_bytes(&[0x1A]),
        (Operand::Indirect(Reg::Bc), Operand::Reg(Reg::A)) => ok_bytes(&[0x02]),
        (Operand::Indirect(Reg::De), Operand::Reg(Reg::A)) => ok_bytes(&[0x12]),
        (Operand::Reg(Reg::A), Operand::Reg(Reg::I)) => ok_bytes(&[0xED, 0x57]),
        (Operand::Reg(Reg::A), Operand::Reg(Reg::R)) => ok_bytes(&[0xED, 0x5F]),
        (Operand::Reg(Reg::I), Operand::Reg(Reg::A)) => ok_bytes(&[0xED, 0x47]),
        (Operand::Reg(Reg::R), Operand::Reg(Reg::A)) => ok_bytes(&[0xED, 0x4F]),
        (Operand::Reg(Reg::I | Reg::R), _) | (_, Operand::Reg(Reg::I | Reg::R)) => Err(
            encode_error(format!("{mnemonic} i and r only transfer to or from a")),
        ),

        // SP writes leave the verifier without a usable depth.
        (Operand::Reg(Reg::Sp), Operand::Reg(Reg::Hl)) => {
            Ok(EncodedInstruction::from_bytes(vec![0xF9]).untracked())
        }
        (Operand::Reg(Reg::Sp), Operand::Reg(Reg::Ix)) => {
            Ok(EncodedInstruction::from_bytes(vec![0xDD, 0xF9]).untracked())
        }
        (Operand::Reg(Reg::Sp), Operand::Reg(Reg::Iy)) => {
            Ok(EncodedInstruction::from_bytes(vec![0xFD, 0xF9]).untracked())
        }
        (Operand::Reg(Reg::Sp), Operand::Imm(v)) => {
            Ok(pair_imm(mnemonic, None, 0x31, v)?.untracked())
        }
        (Operand::Reg(Reg::Sp), Operand::Mem(v)) => {
            Ok(pair_mem(mnemonic, &[0xED, 0x7B], v)?.untracked())
        }
        (Operand::Mem(v), Operand::Reg(Reg::Sp)) => pair_mem(mnemonic, &[0xED, 0x73], v),

        // 16-bit immediates.
        (Operand::Reg(d @ (Reg::Bc | Reg::De | Reg::Hl)), Operand::Imm(v)) => {
            let ss = match d {
                Reg::Bc => 0,
                Reg::De => 1,
                _ => 2,
            };
            pair_imm(mnemonic, None, 0x01 | (ss << 4), v)
        }
        (Operand::Reg(Reg::Ix), Operand::Imm(v)) => pair_imm(mnemonic, Some(0xDD), 0x21, v),
        (Operand::Reg(Reg::Iy), Operand::Imm(v)) => pair_imm(mnemonic, Some(0xFD), 0x21, v),

        // 16-bit absolute loads and stores.
        (Operand::Reg(Reg::Hl), Operand::Mem(v)) => pair_mem(mnemonic, &[0x2A], v),
        (Operand::Mem(v), Operand::Reg(Reg::Hl)) => pair_mem(mnemonic, &[0x22], v),
        (Operand::Reg(Reg::Bc), Operand::Mem(v)) => pair_mem(mnemonic, &[0xED, 0x4B], v),
        (Operand::Mem(v), Operand::Reg(Reg::Bc)) => pair_mem(mnemonic, &[0xED, 0x43], v),
        (Operand::Reg(Reg::De), Operand::Mem(v)) => pair_mem(mnemonic, &[0xED, 0x5B], v),
        (Operand::Mem(v), Operand::Reg(Reg::De)) => pair_mem(mnemonic, &[0xED, 0x53], v),
        (Operand::Reg(Reg::Ix), Operand::Mem(v)) => pair_mem(mnemonic, &[0xDD, 0x2A], v),
        (Operand::Mem(v), Operand::Reg(Reg::Ix)) => pair_mem(mnemonic, &[0xDD, 0x22], v),
        (Operand::Reg(Reg::Iy), Operand::Mem(v)) => pair_mem(mnemonic, &[0xFD, 0x2A], v),
        (Operand::Mem(v), Operand::Reg(Reg::Iy)) => pair_mem(mnemonic, &[0xFD, 0x22], v),
        (Operand::Reg(Reg::A), Operand::Mem(v)) => pair_mem(mnemonic, &[0x3A], v),
        (Operand::Mem(v), Operand::Reg(Reg::A)) => pair_mem(mnemonic, &[0x32], v),
        (Operand::Reg(_), Operand::Mem(_)) | (Operand::Mem(_), Operand::Reg(_)) => Err(
            encode_error(format!(
                "{mnemonic} absolute addressing only moves a or a 16-bit pair"
            )),
        ),

        // Indexed memory.
        (Operand::Reg(r), Operand::Indexed { base, disp }) => {
            let code = legacy8_code(mnemonic, *r)?;
            indexed_bytes(mnemonic, *base, *disp, 0x46 | (code << 3), None)
        }
        (Operand::Indexed { base, disp }, Operand::Reg(r)) => {
            let code = legacy8_code(mnemonic, *r)?;
            indexed_bytes(mnemonic, *base, *disp, 0x70 | code, None)
        }
        (Operand::Indexed { base, disp }, Operand::Imm(v)) => {
            let n = imm8_byte(mnemonic, v)?;
            indexed_bytes(mnemonic, *base, *disp, 0x36, Some(n))
        }

        // (hl) and the 8-bit matrix.
        (Operand::Indirect(Reg::Hl), Operand::Indirect(Reg::Hl)) => Err(encode_error(format!(
            "{mnemonic} cannot move (hl) to (hl)"
        ))),
        (Operand::Reg(d), Operand::Indirect(Reg::Hl)) => {
            let code = legacy8_code(mnemonic, *d)?;
            ok_bytes(&[0x46 | (code << 3)])
        }
        (Operand::Indirect(Reg::Hl), Operand::Reg(s)) => {
            let code = legacy8_code(mnemonic, *s)?;
            ok_bytes(&[0x70 | code])
        }
        (Operand::Indirect(Reg::Hl), Operand::Imm(v)) => {
            let n = imm8_byte(mnemonic, v)?;
            ok_bytes(&[0x36, n])
        }
        (Operand::Indirect(r), _) | (_, Operand::Indirect(r)) => Err(encode_error(format!(
            "{mnemonic} cannot address ({})",
            r.name()
        ))),

        (Operand::Reg(d), Operand::Reg(s)) => {
            let (dc, sc) = match (d.code8(), s.code8()) {
                (Some(dc), Some(sc)) => (dc, sc),
                _ => {
                    return Err(encode_error(format!(
                        "{mnemonic} cannot move {} to {}",
                        src.describe(),
                        dst.describe()
                    )))
                }
            };
            match half_prefix(mnemonic, *d, *s)? {
                Some(prefix) => ok_bytes(&[prefix, 0x40 | (dc << 3) | sc]),
                None => ok_bytes(&[0x40 | (dc << 3) | sc]),
            }
        }
        (Operand::Reg(d), Operand::Imm(v)) => {
            let code = d.code8().ok_or_else(|| {
                encode_error(format!(
                    "{mnemonic} cannot load an 8-bit immediate into {}",
                    d.name()
                ))
            })?;
            let n = imm8_byte(mnemonic, v)?;
            match d.half_family() {
                Some(family) => {
                    let prefix = family.index_prefix().unwrap_or(0xDD);
                    ok_bytes(&[prefix, 0x06 | (code << 3), n])
                }
                None => ok_bytes(&[0x06 | (code << 3), n]),
            }
        }

        _ => Err(encode_error(format!(
            "{mnemonic}: unsupported operand combination {}, {}",
            dst.describe(),
            src.describe()
        ))),
    }
}

pub(crate) fn encode_push(mnemonic: &str, ops: &[Operand]) -> EncodeResult {
    let encoded = stack_pair(mnemonic, &ops[0], 0xC5, 0xE5)?;
    Ok(encoded.with_delta(2))
}

pub(crate) fn encode_pop(mnemonic: &str, ops: &[Operand]) -> EncodeResult {
    let encoded = stack_pair(mnemonic, &ops[0], 0xC1, 0xE1)?;
    Ok(encoded.with_delta(-2))
}

pub(crate) fn encode_ex(mnemonic: &str, ops: &[Operand]) -> EncodeResult {
    match (&ops[0], &ops[1]) {
        (Operand::Reg(Reg::De), Operand::Reg(Reg::Hl)) => ok_bytes(&[0xEB]),
        (Operand::Reg(Reg::Af), Operand::Reg(Reg::AfAlt)) => ok_bytes(&[0x08]),
        (Operand::Indirect(Reg::Sp), Operand::Reg(Reg::Hl)) => ok_bytes(&[0xE3]),
        (Operand::Indirect(Reg::Sp), Operand::Reg(Reg::Ix)) => ok_bytes(&[0xDD, 0xE3]),
        (Operand::Indirect(Reg::Sp), Operand::Reg(Reg::Iy)) => ok_bytes(&[0xFD, 0xE3]),
        (a, b) => Err(encode_error(format!(
            "{mnemonic} supports de,hl / af,af' / (sp),hl / (sp),ix / (sp),iy; found {}, {}",
            a.describe(),
            b.describe()
        ))),
    }
}

fn stack_pair(
    mnemonic: &str,
    op: &Operand,
    qq_base: u8,
    index_op: u8,
) -> Result<EncodedInstruction, CompileError> {
    match op {
        Operand::Reg(r) => {
            if let Some(qq) = r.qq_code() {
                return Ok(EncodedInstruction::from_bytes(vec![qq_base | (qq << 4)]));
            }
            if let Some(prefix) = r.index_prefix() {
                return Ok(EncodedInstruction::from_bytes(vec![prefix, index_op]));
            }
            Err(encode_error(format!(
                "{mnemonic} expects bc, de, hl, af, ix or iy; found register {}",
                r.name()
            )))
        }
        other => Err(encode_error(format!(
            "{mnemonic} expects bc, de, hl, af, ix or iy; found {}",
            other.describe()
        ))),
    }
}

/// Resolve the optional DD/FD prefix when half-index registers appear
/// in a two-register form. Families cannot mix, and the halves cannot
/// pair with h or l.
fn half_prefix(mnemonic: &str, a: Reg, b: Reg) -> Result<Option<u8>, CompileError> {
    let fam_a = a.half_family();
    let fam_b = b.half_family();
    let family = match (fam_a, fam_b) {
        (None, None) => return Ok(None),
        (Some(f), None) | (None, Some(f)) => f,
        (Some(fa), Some(fb)) if fa == fb => fa,
        (Some(_), Some(_)) => {
            return Err(encode_error(format!(
                "{mnemonic} cannot mix ix and iy half registers"
            )))
        }
    };
    let clash = |r: Reg| matches!(r, Reg::H | Reg::L);
    if clash(a) || clash(b) {
        return Err(encode_error(format!(
            "{mnemonic} cannot combine {} with h or l",
            if fam_a.is_some() { a.name() } else { b.name() }
        )));
    }
    Ok(family.index_prefix())
}

fn legacy8_code(mnemonic: &str, r: Reg) -> Result<u8, CompileError> {
    if r.is_half_index() {
        return Err(encode_error(format!(
            "{mnemonic} cannot combine {} with indexed or (hl) addressing",
            r.name()
        )));
    }
    r.code8().ok_or_else(|| {
        encode_error(format!(
            "{mnemonic} needs an 8-bit register here, found {}",
            r.name()
        ))
    })
}

fn pair_imm(mnemonic: &str, prefix: Option<u8>, opcode: u8, value: &ImmValue) -> EncodeResult {
    let mut bytes = Vec::with_capacity(4);
    if let Some(p) = prefix {
        bytes.push(p);
    }
    bytes.push(opcode);
    let (lo, hi, fixup) = imm16_bytes(mnemonic, value, bytes.len())?;
    bytes.push(lo);
    bytes.push(hi);
    let mut encoded = EncodedInstruction::from_bytes(bytes);
    if let Some(f) = fixup {
        encoded = encoded.with_fixup(f);
    }
    Ok(encoded)
}

fn pair_mem(mnemonic: &str, opcodes: &[u8], value: &ImmValue) -> EncodeResult {
    let mut bytes = opcodes.to_vec();
    let (lo, hi, fixup) = imm16_bytes(mnemonic, value, bytes.len())?;
    bytes.push(lo);
    bytes.push(hi);
    let mut encoded = EncodedInstruction::from_bytes(bytes);
    if let Some(f) = fixup {
        encoded = encoded.with_fixup(f);
    }
    Ok(encoded)
}

fn indexed_bytes(
    mnemonic: &str,
    base: Reg,
    disp: i32,
    opcode: u8,
    trailing: Option<u8>,
) -> EncodeResult {
    let prefix = base.index_prefix().ok_or_else(|| {
        encode_error(format!(
            "{mnemonic} indexed addressing needs ix or iy, found {}",
            base.name()
        ))
    })?;
    let d = disp_byte(mnemonic, disp)?;
    let mut bytes = vec![prefix, opcode, d];
    if let Some(n) = trailing {
        bytes.push(n);
    }
    ok_bytes(&bytes)
}
