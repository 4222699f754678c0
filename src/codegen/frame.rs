// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Frame layout: IX-relative slot assignment plus the synthesized
//! prologue/epilogue instruction sequences.
//!
//! Layout after the full prologue, relative to IX:
//!   +4+2i  parameter i (pushed right-to-left, word-sized)
//!   +2..+3 return address
//!   +0..+1 saved IX
//!   -1..-6 saved BC/DE/IY (only when locals exist)
//!   -7...  locals, declaration order, sized per width

use crate::frontend::ast::{LocalDecl, Param, StorageWidth};
use crate::z80::{ImmValue, Operand, Reg};

/// BC, DE and IY saved below the frame pointer.
pub const CALLEE_SAVED_BYTES: i16 = 6;

#[derive(Debug, Clone)]
pub struct FrameSlot {
    pub name: String,
    pub width: StorageWidth,
    /// IX-relative displacement of the slot's lowest byte.
    pub offset: i16,
}

#[derive(Debug, Clone)]
pub struct Frame {
    slots: Vec<FrameSlot>,
    pub local_size: u16,
    params: usize,
}

/// A synthesized instruction: mnemonic plus resolved operands, encoded
/// with the same tables as user code.
pub type InstrSpec = (&'static str, Vec<Operand>);

impl Frame {
    pub fn build(params: &[Param], locals: &[&LocalDecl]) -> Frame {
        let mut slots = Vec::with_capacity(params.len() + locals.len());
        for (i, p) in params.iter().enumerate() {
            slots.push(FrameSlot {
                name: p.name.clone(),
                width: p.width,
                offset: 4 + 2 * i as i16,
            });
        }
        let mut depth = CALLEE_SAVED_BYTES;
        for local in locals {
            depth += local.width.size() as i16;
            slots.push(FrameSlot {
                name: local.name.clone(),
                width: local.width,
                offset: -depth,
            });
        }
        Frame {
            slots,
            local_size: (depth - CALLEE_SAVED_BYTES) as u16,
            params: params.len(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&FrameSlot> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    pub fn has_locals(&self) -> bool {
        self.local_size > 0
    }

    pub fn has_params(&self) -> bool {
        self.params > 0
    }

    /// Parameter addressing needs IX established even without locals,
    /// so any frame at all forces the epilogue rewrite.
    pub fn requires_epilogue(&self) -> bool {
        self.has_locals() || self.has_params()
    }

    /// Entry sequence. BC/DE/IY are saved only when locals exist; that
    /// is what puts the first word local at IX-8.
    pub fn prologue_ops(&self) -> Vec<InstrSpec> {
        if !self.requires_epilogue() {
            return Vec::new();
        }
        let mut ops: Vec<InstrSpec> = vec![
            ("push", vec![Operand::Reg(Reg::Ix)]),
            (
                "ld",
                vec![Operand::Reg(Reg::Ix), Operand::Imm(ImmValue::Literal(0))],
            ),
            ("add", vec![Operand::Reg(Reg::Ix), Operand::Reg(Reg::Sp)]),
        ];
        if self.has_locals() {
            ops.push(("push", vec![Operand::Reg(Reg::Bc)]));
            ops.push(("push", vec![Operand::Reg(Reg::De)]));
            ops.push(("push", vec![Operand::Reg(Reg::Iy)]));
            ops.push((
                "ld",
                vec![
                    Operand::Reg(Reg::Hl),
                    Operand::Imm(ImmValue::Literal(-(self.local_size as i64))),
                ],
            ));
            ops.push(("add", vec![Operand::Reg(Reg::Hl), Operand::Reg(Reg::Sp)]));
            ops.push(("ld", vec![Operand::Reg(Reg::Sp), Operand::Reg(Reg::Hl)]));
        }
        ops
    }

    /// Teardown behind the synthesized exit label. IY carries the
    /// local-size add because it is restored immediately afterwards,
    /// leaving A and HL free for return values.
    pub fn epilogue_ops(&self) -> Vec<InstrSpec> {
        let mut ops: Vec<InstrSpec> = Vec::new();
        if !self.requires_epilogue() {
            ops.push(("ret", Vec::new()));
            return ops;
        }
        if self.has_locals() {
            ops.push((
                "ld",
                vec![
                    Operand::Reg(Reg::Iy),
                    Operand::Imm(ImmValue::Literal(self.local_size as i64)),
                ],
            ));
            ops.push(("add", vec![Operand::Reg(Reg::Iy), Operand::Reg(Reg::Sp)]));
            ops.push(("ld", vec![Operand::Reg(Reg::Sp), Operand::Reg(Reg::Iy)]));
            ops.push(("pop", vec![Operand::Reg(Reg::Iy)]));
            ops.push(("pop", vec![Operand::Reg(Reg::De)]));
            ops.push(("pop", vec![Operand::Reg(Reg::Bc)]));
        }
        ops.push(("pop", vec![Operand::Reg(Reg::Ix)]));
        ops.push(("ret", Vec::new()));
        ops
    }
}
