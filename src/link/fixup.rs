// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Single-pass fixup resolution over the packed image.
//!
//! Lowering records every symbolic or site-relative reference as plain
//! fixup data. Once layout has given every item a base address the whole
//! set resolves in one pass against the symbol table; no fixup depends
//! on the result of another.

use crate::core::diag::{CompileError, Diagnostic, ErrorKind, Severity};
use crate::link::packer::{ItemKind, PackedProgram};
use crate::z80::FixupKind;

/// Patch every recorded fixup into the program's byte image.
///
/// Abs16 targets must land in 0..=65535 and are stored little-endian.
/// Rel8 displacements are measured from the byte after the patch
/// position and must fit a signed byte. Failures are reported at the
/// span of the instruction or data element that carried the reference.
pub fn resolve_fixups(program: &mut PackedProgram) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    let mut patches: Vec<(u32, u8)> = Vec::new();

    for item in &program.items {
        let module = &program.modules[item.module];
        let fixups = match item.kind {
            ItemKind::Code => &module.funcs[item.index].fixups,
            ItemKind::Data => &module.datas[item.index].fixups,
            ItemKind::Var => continue,
        };
        for fixup in fixups {
            let target = match &fixup.symbol {
                Some(name) => match program.symbols.lookup(name) {
                    Some(sym) => i64::from(sym.address) + fixup.addend,
                    None => {
                        let err =
                            CompileError::new(ErrorKind::Fixup, "Unresolved symbol", Some(name));
                        diags.push(
                            Diagnostic::at(fixup.span, Severity::Error, err)
                                .with_file(Some(module.rel_path.clone())),
                        );
                        continue;
                    }
                },
                None => fixup.addend,
            };

            let patch_addr = u32::from(item.base) + fixup.offset as u32;
            match fixup.kind {
                FixupKind::Abs16 => {
                    if !(0..=0xFFFF).contains(&target) {
                        let err = CompileError::new(
                            ErrorKind::Fixup,
                            "Fixup target out of range (0-65535)",
                            Some(&target.to_string()),
                        );
                        diags.push(
                            Diagnostic::at(fixup.span, Severity::Error, err)
                                .with_file(Some(module.rel_path.clone())),
                        );
                        continue;
                    }
                    patches.push((patch_addr, (target & 0xFF) as u8));
                    patches.push((patch_addr + 1, ((target >> 8) & 0xFF) as u8));
                }
                FixupKind::Rel8 => {
                    // The patch byte always sits immediately before the
                    // next instruction, so the reference point is one
                    // past the patch position.
                    let next = i64::from(item.base) + fixup.offset as i64 + 1;
                    let disp = target - next;
                    if !(-128..=127).contains(&disp) {
                        let msg = format!(
                            "Branch displacement {disp} out of range (-128..127) for rel8 branch"
                        );
                        let err = CompileError::new(ErrorKind::Fixup, &msg, None);
                        diags.push(
                            Diagnostic::at(fixup.span, Severity::Error, err)
                                .with_file(Some(module.rel_path.clone())),
                        );
                        continue;
                    }
                    patches.push((patch_addr, disp as u8));
                }
            }
        }
    }

    for (addr, value) in patches {
        program.image.patch_byte(addr, value);
    }
    diags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::lower::{ItemFixup, LoweredFunc, LoweredModule};
    use crate::core::span::Span;
    use crate::link::packer::pack;
    use std::path::PathBuf;

    fn func(name: &str, bytes: Vec<u8>, fixups: Vec<ItemFixup>) -> LoweredFunc {
        LoweredFunc {
            name: name.to_string(),
            exported: true,
            span: Span::point(1, 1),
            bytes,
            fixups,
            labels: Vec::new(),
            records: Vec::new(),
            placements: Vec::new(),
        }
    }

    fn fixup(kind: FixupKind, offset: usize, symbol: Option<&str>, addend: i64) -> ItemFixup {
        ItemFixup {
            kind,
            offset,
            symbol: symbol.map(|s| s.to_string()),
            addend,
            span: Span::point(2, 3),
        }
    }

    fn one_module(funcs: Vec<LoweredFunc>) -> LoweredModule {
        LoweredModule {
            path: PathBuf::from("main.zax"),
            rel_path: "main.zax".to_string(),
            consts: Vec::new(),
            funcs,
            datas: Vec::new(),
            vars: Vec::new(),
        }
    }

    #[test]
    fn abs16_patches_are_little_endian() {
        let caller = func(
            "main",
            vec![0xCD, 0x00, 0x00, 0xC9],
            vec![fixup(FixupKind::Abs16, 1, Some("draw"), 0)],
        );
        let callee = func("draw", vec![0xC9], Vec::new());
        let (mut program, diags) = pack(vec![one_module(vec![caller, callee])]);
        assert!(diags.is_empty(), "{diags:?}");

        let fix_diags = resolve_fixups(&mut program);
        assert!(fix_diags.is_empty(), "{fix_diags:?}");
        // draw lands right after main's four bytes.
        assert_eq!(program.image.read_byte(1), Some(0x04));
        assert_eq!(program.image.read_byte(2), Some(0x00));
    }

    #[test]
    fn abs16_applies_the_addend() {
        let caller = func(
            "main",
            vec![0x21, 0x00, 0x00, 0xC9],
            vec![fixup(FixupKind::Abs16, 1, Some("draw"), 2)],
        );
        let callee = func("draw", vec![0xC9], Vec::new());
        let (mut program, _) = pack(vec![one_module(vec![caller, callee])]);
        let fix_diags = resolve_fixups(&mut program);
        assert!(fix_diags.is_empty(), "{fix_diags:?}");
        assert_eq!(program.image.read_byte(1), Some(0x06));
    }

    #[test]
    fn rel8_displacement_counts_from_the_next_byte() {
        // djnz back to the function's own start.
        let f = func(
            "main",
            vec![0x10, 0x00, 0xC9],
            vec![fixup(FixupKind::Rel8, 1, None, 0)],
        );
        let (mut program, _) = pack(vec![one_module(vec![f])]);
        let fix_diags = resolve_fixups(&mut program);
        assert!(fix_diags.is_empty(), "{fix_diags:?}");
        assert_eq!(program.image.read_byte(1), Some(0xFE));
    }

    #[test]
    fn rel8_out_of_range_is_reported() {
        let f = func(
            "main",
            vec![0x10, 0x00, 0xC9],
            vec![fixup(FixupKind::Rel8, 1, None, 0x0200)],
        );
        let (mut program, _) = pack(vec![one_module(vec![f])]);
        let fix_diags = resolve_fixups(&mut program);
        assert_eq!(fix_diags.len(), 1);
        let msg = fix_diags[0].message();
        assert!(msg.contains("out of range"), "{msg}");
        assert!(msg.contains("for rel8 branch"), "{msg}");
    }

    #[test]
    fn unresolved_symbol_is_reported_with_the_fixup_code() {
        let f = func(
            "main",
            vec![0xCD, 0x00, 0x00, 0xC9],
            vec![fixup(FixupKind::Abs16, 1, Some("missing"), 0)],
        );
        let (mut program, _) = pack(vec![one_module(vec![f])]);
        let fix_diags = resolve_fixups(&mut program);
        assert_eq!(fix_diags.len(), 1);
        assert_eq!(fix_diags[0].message(), "Unresolved symbol: missing");
        assert_eq!(fix_diags[0].code(), "zax501");
        assert_eq!(fix_diags[0].file(), Some("main.zax"));
    }

    #[test]
    fn constant_symbols_resolve_like_addresses() {
        let f = func(
            "main",
            vec![0x21, 0x00, 0x00, 0xC9],
            vec![fixup(FixupKind::Abs16, 1, Some("Port"), 0)],
        );
        let mut module = one_module(vec![f]);
        module.consts.push(crate::codegen::lower::ConstSym {
            name: "Port".to_string(),
            value: 0xBC00,
            exported: false,
            span: Span::point(1, 1),
        });
        let (mut program, _) = pack(vec![module]);
        let fix_diags = resolve_fixups(&mut program);
        assert!(fix_diags.is_empty(), "{fix_diags:?}");
        assert_eq!(program.image.read_byte(1), Some(0x00));
        assert_eq!(program.image.read_byte(2), Some(0xBC));
    }
}
