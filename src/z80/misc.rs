// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Zero-operand instructions, interrupt modes, and port I/O.

use super::{encode_error, imm8_byte, ok_bytes, EncodeResult, ImmValue, Operand, Reg};

/// Every operand-free instruction, including the ED block group.
pub(crate) fn encode_simple(mnemonic: &str, _ops: &[Operand]) -> EncodeResult {
    let bytes: &[u8] = match mnemonic {
        "nop" => &[0x00],
        "halt" => &[0x76],
        "di" => &[0xF3],
        "ei" => &[0xFB],
        "daa" => &[0x27],
        "cpl" => &[0x2F],
        "scf" => &[0x37],
        "ccf" => &[0x3F],
        "exx" => &[0xD9],
        "rlca" => &[0x07],
        "rla" => &[0x17],
        "rrca" => &[0x0F],
        "rra" => &[0x1F],
        "neg" => &[0xED, 0x44],
        "rrd" => &[0xED, 0x67],
        "rld" => &[0xED, 0x6F],
        "ldi" => &[0xED, 0xA0],
        "ldir" => &[0xED, 0xB0],
        "ldd" => &[0xED, 0xA8],
        "lddr" => &[0xED, 0xB8],
        "cpi" => &[0xED, 0xA1],
        "cpir" => &[0xED, 0xB1],
        "cpd" => &[0xED, 0xA9],
        "cpdr" => &[0xED, 0xB9],
        "ini" => &[0xED, 0xA2],
        "inir" => &[0xED, 0xB2],
        "ind" => &[0xED, 0xAA],
        "indr" => &[0xED, 0xBA],
        "outi" => &[0xED, 0xA3],
        "otir" => &[0xED, 0xB3],
        "outd" => &[0xED, 0xAB],
        "otdr" => &[0xED, 0xBB],
        other => {
            return Err(encode_error(format!(
                "No zero-operand encoding for {other}"
            )))
        }
    };
    ok_bytes(bytes)
}

pub(crate) fn encode_im(mnemonic: &str, ops: &[Operand]) -> EncodeResult {
    match &ops[0] {
        Operand::Imm(ImmValue::Literal(0)) => ok_bytes(&[0xED, 0x46]),
        Operand::Imm(ImmValue::Literal(1)) => ok_bytes(&[0xED, 0x56]),
        Operand::Imm(ImmValue::Literal(2)) => ok_bytes(&[0xED, 0x5E]),
        other => Err(encode_error(format!(
            "{mnemonic} mode must be 0, 1 or 2; found {}",
            other.describe()
        ))),
    }
}

pub(crate) fn encode_in(mnemonic: &str, ops: &[Operand]) -> EncodeResult {
    match (&ops[0], &ops[1]) {
        (Operand::Reg(Reg::A), Operand::Mem(v)) => {
            let n = imm8_byte(mnemonic, v)?;
            ok_bytes(&[0xDB, n])
        }
        (Operand::Reg(r), Operand::Mem(_)) => Err(encode_error(format!(
            "{mnemonic} from an immediate port only reads into a, found {}",
            r.name()
        ))),
        (Operand::Reg(r), Operand::Indirect(Reg::C)) if r.is_legacy8() => {
            let code = r.code8().unwrap_or(0);
            ok_bytes(&[0xED, 0x40 | (code << 3)])
        }
        (dst, port) => Err(encode_error(format!(
            "{mnemonic} expects r,(c) or a,(n); found {}, {}",
            dst.describe(),
            port.describe()
        ))),
    }
}

pub(crate) fn encode_out(mnemonic: &str, ops: &[Operand]) -> EncodeResult {
    match (&ops[0], &ops[1]) {
        (Operand::Mem(v), Operand::Reg(Reg::A)) => {
            let n = imm8_byte(mnemonic, v)?;
            ok_bytes(&[0xD3, n])
        }
        (Operand::Mem(_), Operand::Reg(r)) => Err(encode_error(format!(
            "{mnemonic} to an immediate port only writes a, found {}",
            r.name()
        ))),
        (Operand::Indirect(Reg::C), Operand::Reg(r)) if r.is_legacy8() => {
            let code = r.code8().unwrap_or(0);
            ok_bytes(&[0xED, 0x41 | (code << 3)])
        }
        (port, src) => Err(encode_error(format!(
            "{mnemonic} expects (c),r or (n),a; found {}, {}",
            port.describe(),
            src.describe()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::super::encode;
    use super::*;

    fn bytes_of(mnemonic: &str, ops: &[Operand]) -> Vec<u8> {
        encode(mnemonic, ops).expect("encodes").bytes
    }

    #[test]
    fn block_transfer_group() {
        let expected: &[(&str, [u8; 2])] = &[
            ("ldi", [0xED, 0xA0]),
            ("ldir", [0xED, 0xB0]),
            ("ldd", [0xED, 0xA8]),
            ("lddr", [0xED, 0xB8]),
            ("cpi", [0xED, 0xA1]),
            ("cpir", [0xED, 0xB1]),
            ("cpd", [0xED, 0xA9]),
            ("cpdr", [0xED, 0xB9]),
            ("otir", [0xED, 0xB3]),
        ];
        for (mnemonic, bytes) in expected {
            assert_eq!(bytes_of(mnemonic, &[]), bytes.to_vec(), "{mnemonic}");
        }
    }

    #[test]
    fn accumulator_rotates_and_control() {
        assert_eq!(bytes_of("rlca", &[]), vec![0x07]);
        assert_eq!(bytes_of("rra", &[]), vec![0x1F]);
        assert_eq!(bytes_of("neg", &[]), vec![0xED, 0x44]);
        assert_eq!(bytes_of("rld", &[]), vec![0xED, 0x6F]);
        assert_eq!(bytes_of("halt", &[]), vec![0x76]);
        assert_eq!(bytes_of("di", &[]), vec![0xF3]);
    }

    #[test]
    fn interrupt_modes() {
        assert_eq!(
            bytes_of("im", &[Operand::Imm(ImmValue::Literal(2))]),
            vec![0xED, 0x5E]
        );
        let err = encode("im", &[Operand::Imm(ImmValue::Literal(3))]).expect_err("im 3");
        assert_eq!(err.message(), "im mode must be 0, 1 or 2; found immediate");
    }

    #[test]
    fn port_io_forms() {
        assert_eq!(
            bytes_of(
                "in",
                &[Operand::Reg(Reg::A), Operand::Mem(ImmValue::Literal(0xFE))]
            ),
            vec![0xDB, 0xFE]
        );
        assert_eq!(
            bytes_of("in", &[Operand::Reg(Reg::B), Operand::Indirect(Reg::C)]),
            vec![0xED, 0x40]
        );
        assert_eq!(
            bytes_of(
                "out",
                &[Operand::Mem(ImmValue::Literal(0x01)), Operand::Reg(Reg::A)]
            ),
            vec![0xD3, 0x01]
        );
        assert_eq!(
            bytes_of("out", &[Operand::Indirect(Reg::C), Operand::Reg(Reg::E)]),
            vec![0xED, 0x59]
        );
        let err = encode(
            "in",
            &[Operand::Reg(Reg::B), Operand::Mem(ImmValue::Literal(1))],
        )
        .expect_err("in b,(n)");
        assert_eq!(
            err.message(),
            "in from an immediate port only reads into a, found b"
        );
    }
}
