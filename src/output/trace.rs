// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Stack trace file generation: the verifier's view of every lowered
//! instruction, for debugging stack-safety reports.

use std::io::Write;

use crate::codegen::stack::Depth;
use crate::core::diag::SourceCache;
use crate::link::packer::{ItemKind, PackedProgram, PlacedItem};
use crate::output::listing::format_bytes;

pub struct TraceWriter<W: Write> {
    out: W,
}

impl<W: Write> TraceWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// One row per instruction in address order. DEPTH is the tracked
    /// stack state on entry to the instruction: a byte count, `?` for
    /// unknown, `!` after an untracked SP write. Rows the compiler
    /// introduced (prologue, epilogue, structured-control jumps) carry
    /// a `+` before the source text.
    pub fn write(&mut self, program: &PackedProgram, sources: &SourceCache) -> std::io::Result<()> {
        writeln!(self.out, "ADDR   DEPTH  BYTES        SOURCE")?;
        writeln!(self.out, "-----  -----  -----------  ------")?;

        let mut items: Vec<&PlacedItem> = program
            .items
            .iter()
            .filter(|it| it.kind == ItemKind::Code)
            .collect();
        items.sort_by_key(|it| it.base);

        let mut current_file: Option<&str> = None;
        for item in items {
            let module = &program.modules[item.module];
            if current_file != Some(module.rel_path.as_str()) {
                writeln!(self.out, "; {}", module.rel_path)?;
                current_file = Some(module.rel_path.as_str());
            }
            let lines = sources.lines_for(Some(&module.rel_path));
            let func = &module.funcs[item.index];
            for record in &func.records {
                let addr = u32::from(item.base) + record.offset as u32;
                let bytes = &func.bytes[record.offset..record.offset + record.len];
                let source = lines
                    .and_then(|lines| lines.get(record.line.saturating_sub(1) as usize))
                    .map(|s| s.as_str())
                    .unwrap_or("");
                let marker = if record.synthesized { "+ " } else { "" };
                writeln!(
                    self.out,
                    "{:04X}   {:>5}  {:<11}  {}{}",
                    addr,
                    depth_cell(record.depth),
                    format_bytes(bytes),
                    marker,
                    source
                )?;
            }
        }
        Ok(())
    }
}

fn depth_cell(depth: Depth) -> String {
    match depth {
        Depth::Known(n) => n.to_string(),
        Depth::Unknown => "?".to_string(),
        Depth::Untracked => "!".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::lower::{InstrRecord, LoweredFunc, LoweredModule};
    use crate::core::span::Span;
    use crate::link::packer::pack;
    use std::path::PathBuf;

    fn fixture() -> PackedProgram {
        let func = LoweredFunc {
            name: "main".to_string(),
            exported: true,
            span: Span::point(1, 1),
            bytes: vec![0xC5, 0xF9, 0xC9],
            fixups: Vec::new(),
            labels: Vec::new(),
            records: vec![
                InstrRecord {
                    offset: 0,
                    len: 1,
                    line: 2,
                    depth: Depth::Known(0),
                    synthesized: false,
                },
                InstrRecord {
                    offset: 1,
                    len: 1,
                    line: 3,
                    depth: Depth::Known(2),
                    synthesized: false,
                },
                InstrRecord {
                    offset: 2,
                    len: 1,
                    line: 4,
                    depth: Depth::Untracked,
                    synthesized: true,
                },
            ],
            placements: Vec::new(),
        };
        let module = LoweredModule {
            path: PathBuf::from("main.zax"),
            rel_path: "main.zax".to_string(),
            consts: Vec::new(),
            funcs: vec![func],
            datas: Vec::new(),
            vars: Vec::new(),
        };
        let (program, diags) = pack(vec![module]);
        assert!(diags.is_empty(), "{diags:?}");
        program
    }

    #[test]
    fn rows_show_address_depth_and_bytes() {
        let mut cache = SourceCache::new();
        cache.insert(
            "main.zax",
            "export func main(): void\n  push bc\n  ld sp, hl\nend\n",
        );
        let mut out = Vec::new();
        let mut writer = TraceWriter::new(&mut out);
        writer.write(&fixture(), &cache).expect("write trace");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("; main.zax"), "{text}");
        assert!(text.contains("0000       0  C5"), "{text}");
        assert!(text.contains("0001       2  F9"), "{text}");
        assert!(text.contains("0002       !  C9"), "{text}");
        assert!(text.contains("push bc"), "{text}");
        // The closing ret the compiler inserted is flagged.
        assert!(text.contains("+ end"), "{text}");
    }
}
