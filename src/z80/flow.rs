// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Control-flow encoders: jp/jr/djnz/call/ret/rst. Relative branches
//! always leave a rel8 fixup because the displacement needs the final
//! site address even for literal targets.

use super::{
    encode_error, imm16_bytes, ok_bytes, Cond, EncodeResult, EncodedInstruction, FixupKind,
    ImmValue, Operand, PendingFixup, Reg,
};

/// The c register doubles as the carry condition in first position.
fn as_cond(op: &Operand) -> Option<Cond> {
    match op {
        Operand::Cond(c) => Some(*c),
        Operand::Reg(Reg::C) => Some(Cond::C),
        _ => None,
    }
}

pub(crate) fn encode_jp(mnemonic: &str, ops: &[Operand]) -> EncodeResult {
    if ops.len() == 2 {
        let Some(cc) = as_cond(&ops[0]) else {
            return Err(encode_error(format!(
                "{mnemonic} condition must be one of nz z nc c po pe p m; found {}",
                ops[0].describe()
            )));
        };
        return absolute_target(mnemonic, &ops[1], &[0xC2 | (cc.code() << 3)]);
    }
    match &ops[0] {
        Operand::Indirect(Reg::Hl) => ok_bytes(&[0xE9]),
        Operand::Indirect(Reg::Ix) => ok_bytes(&[0xDD, 0xE9]),
        Operand::Indirect(Reg::Iy) => ok_bytes(&[0xFD, 0xE9]),
        Operand::Indirect(r) => Err(encode_error(format!(
            "{mnemonic} register target must be (hl), (ix) or (iy); found ({})",
            r.name()
        ))),
        target => absolute_target(mnemonic, target, &[0xC3]),
    }
}

pub(crate) fn encode_jr(mnemonic: &str, ops: &[Operand]) -> EncodeResult {
    if ops.len() == 2 {
        let Some(cc) = as_cond(&ops[0]) else {
            return Err(encode_error(format!(
                "{mnemonic} condition must be nz, z, nc or c; found {}",
                ops[0].describe()
            )));
        };
        if !cc.valid_for_jr() {
            return Err(encode_error(format!(
                "{mnemonic} condition must be nz, z, nc or c; found {}",
                cc.name()
            )));
        }
        return relative_target(mnemonic, &ops[1], 0x20 | (cc.code() << 3));
    }
    relative_target(mnemonic, &ops[0], 0x18)
}

pub(crate) fn encode_djnz(mnemonic: &str, ops: &[Operand]) -> EncodeResult {
    relative_target(mnemonic, &ops[0], 0x10)
}

pub(crate) fn encode_call(mnemonic: &str, ops: &[Operand]) -> EncodeResult {
    if ops.len() == 2 {
        let Some(cc) = as_cond(&ops[0]) else {
            return Err(encode_error(format!(
                "{mnemonic} condition must be one of nz z nc c po pe p m; found {}",
                ops[0].describe()
            )));
        };
        return absolute_target(mnemonic, &ops[1], &[0xC4 | (cc.code() << 3)]);
    }
    absolute_target(mnemonic, &ops[0], &[0xCD])
}

pub(crate) fn encode_ret(mnemonic: &str, ops: &[Operand]) -> EncodeResult {
    match ops.first() {
        None => ok_bytes(&[0xC9]),
        Some(op) => match as_cond(op) {
            Some(cc) => ok_bytes(&[0xC0 | (cc.code() << 3)]),
            None => Err(encode_error(format!(
                "{mnemonic} condition must be one of nz z nc c po pe p m; found {}",
                op.describe()
            ))),
        },
    }
}

pub(crate) fn encode_reti_retn(mnemonic: &str, _ops: &[Operand]) -> EncodeResult {
    if mnemonic == "reti" {
        ok_bytes(&[0xED, 0x4D])
    } else {
        ok_bytes(&[0xED, 0x45])
    }
}

pub(crate) fn encode_rst(mnemonic: &str, ops: &[Operand]) -> EncodeResult {
    match &ops[0] {
        Operand::Imm(ImmValue::Literal(v)) if (0..=0x38).contains(v) && v % 8 == 0 => {
            ok_bytes(&[0xC7 | (*v as u8)])
        }
        Operand::Imm(ImmValue::Literal(v)) => Err(encode_error(format!(
            "{mnemonic} target must be a multiple of 8 in 0-56: {v}"
        ))),
        Operand::Imm(ImmValue::Symbolic { symbol, .. }) => Err(encode_error(format!(
            "{mnemonic} target must be a constant, not the address \"{symbol}\""
        ))),
        other => Err(encode_error(format!(
            "{mnemonic} target must be a restart vector, found {}",
            other.describe()
        ))),
    }
}

fn absolute_target(mnemonic: &str, target: &Operand, opcodes: &[u8]) -> EncodeResult {
    let Operand::Imm(value) = target else {
        return Err(encode_error(format!(
            "{mnemonic} target must be an address, found {}",
            target.describe()
        )));
    };
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

fn relative_target(mnemonic: &str, target: &Operand, opcode: u8) -> EncodeResult {
    let Operand::Imm(value) = target else {
        return Err(encode_error(format!(
            "{mnemonic} target must be an address, found {}",
            target.describe()
        )));
    };
    let (symbol, addend) = match value {
        ImmValue::Literal(v) => (None, *v),
        ImmValue::Symbolic { symbol, addend } => (Some(symbol.clone()), *addend),
    };
    Ok(
        EncodedInstruction::from_bytes(vec![opcode, 0]).with_fixup(PendingFixup {
            kind: FixupKind::Rel8,
            offset: 1,
            symbol,
            addend,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::super::encode;
    use super::*;

    fn bytes_of(mnemonic: &str, ops: &[Operand]) -> Vec<u8> {
        encode(mnemonic, ops).expect("encodes").bytes
    }

    #[test]
    fn absolute_jumps_and_calls() {
        assert_eq!(
            bytes_of("jp", &[Operand::Imm(ImmValue::Literal(0x1234))]),
            vec![0xC3, 0x34, 0x12]
        );
        assert_eq!(
            bytes_of("call", &[Operand::Imm(ImmValue::Literal(0x10))]),
            vec![0xCD, 0x10, 0x00]
        );
        assert_eq!(
            bytes_of(
                "jp",
                &[
                    Operand::Cond(Cond::Nz),
                    Operand::Imm(ImmValue::Literal(0x4000))
                ]
            ),
            vec![0xC2, 0x00, 0x40]
        );
        assert_eq!(
            bytes_of(
                "call",
                &[
                    Operand::Cond(Cond::Pe),
                    Operand::Imm(ImmValue::Literal(0x8000))
                ]
            ),
            vec![0xEC, 0x00, 0x80]
        );
    }

    #[test]
    fn register_jumps() {
        assert_eq!(bytes_of("jp", &[Operand::Indirect(Reg::Hl)]), vec![0xE9]);
        assert_eq!(
            bytes_of("jp", &[Operand::Indirect(Reg::Iy)]),
            vec![0xFD, 0xE9]
        );
    }

    #[test]
    fn c_register_doubles_as_carry_condition() {
        assert_eq!(
            bytes_of(
                "jp",
                &[Operand::Reg(Reg::C), Operand::Imm(ImmValue::Literal(0x100))]
            ),
            vec![0xDA, 0x00, 0x01]
        );
        assert_eq!(bytes_of("ret", &[Operand::Reg(Reg::C)]), vec![0xD8]);
    }

    #[test]
    fn symbolic_jump_defers_to_abs16_fixup() {
        let enc = encode(
            "jp",
            &[Operand::Imm(ImmValue::Symbolic {
                symbol: "draw".to_string(),
                addend: 0,
            })],
        )
        .expect("jp sym");
        assert_eq!(enc.bytes, vec![0xC3, 0x00, 0x00]);
        assert_eq!(enc.fixups.len(), 1);
        assert_eq!(enc.fixups[0].kind, FixupKind::Abs16);
    }

    #[test]
    fn relative_branches_always_carry_a_fixup() {
        let enc = encode("jr", &[Operand::Imm(ImmValue::Literal(0x105))]).expect("jr lit");
        assert_eq!(enc.bytes, vec![0x18, 0x00]);
        assert_eq!(enc.fixups.len(), 1);
        assert_eq!(enc.fixups[0].kind, FixupKind::Rel8);
        assert_eq!(enc.fixups[0].symbol, None);
        assert_eq!(enc.fixups[0].addend, 0x105);

        let enc = encode(
            "jr",
            &[
                Operand::Cond(Cond::Z),
                Operand::Imm(ImmValue::Symbolic {
                    symbol: "loop".to_string(),
                    addend: 0,
                }),
            ],
        )
        .expect("jr z");
        assert_eq!(enc.bytes, vec![0x28, 0x00]);
        assert_eq!(enc.fixups[0].symbol.as_deref(), Some("loop"));

        let enc = encode("djnz", &[Operand::Imm(ImmValue::Literal(0))]).expect("djnz");
        assert_eq!(enc.bytes, vec![0x10, 0x00]);
    }

    #[test]
    fn jr_rejects_parity_and_sign_conditions() {
        let err = encode(
            "jr",
            &[
                Operand::Cond(Cond::Po),
                Operand::Imm(ImmValue::Literal(0)),
            ],
        )
        .expect_err("jr po");
        assert_eq!(err.message(), "jr condition must be nz, z, nc or c; found po");
    }

    #[test]
    fn returns_and_restarts() {
        assert_eq!(bytes_of("ret", &[]), vec![0xC9]);
        assert_eq!(bytes_of("ret", &[Operand::Cond(Cond::Nz)]), vec![0xC0]);
        assert_eq!(bytes_of("reti", &[]), vec![0xED, 0x4D]);
        assert_eq!(bytes_of("retn", &[]), vec![0xED, 0x45]);
        assert_eq!(
            bytes_of("rst", &[Operand::Imm(ImmValue::Literal(0x28))]),
            vec![0xEF]
        );
        let err = encode("rst", &[Operand::Imm(ImmValue::Literal(9))]).expect_err("rst 9");
        assert_eq!(err.message(), "rst target must be a multiple of 8 in 0-56: 9");
    }

    #[test]
    fn condition_errors_name_the_shape() {
        let err = encode(
            "jp",
            &[Operand::Reg(Reg::B), Operand::Imm(ImmValue::Literal(0))],
        )
        .expect_err("jp b");
        assert_eq!(
            err.message(),
            "jp condition must be one of nz z nc c po pe p m; found register b"
        );
    }
}
