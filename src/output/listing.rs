// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Listing file generation.

use std::io::Write;

use crate::core::diag::{PassCounts, SourceCache};
use crate::link::packer::{ItemKind, PackedProgram, PlacedItem};

/// Writer for listing file output: one row per source line that emitted
/// bytes or reserved storage, a counts footer, and a symbol dump.
pub struct ListingWriter<W: Write> {
    out: W,
}

impl<W: Write> ListingWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn write(
        &mut self,
        program: &PackedProgram,
        sources: &SourceCache,
        counts: &PassCounts,
        title: &str,
    ) -> std::io::Result<()> {
        writeln!(self.out, "{title}")?;
        writeln!(self.out, "ADDR    BYTES                    LINE  SOURCE")?;
        writeln!(self.out, "------  -----------------------  ----  ------")?;

        let mut items: Vec<&PlacedItem> = program.items.iter().collect();
        items.sort_by_key(|it| it.base);

        let mut current_file: Option<&str> = None;
        for item in items {
            let module = &program.modules[item.module];
            if current_file != Some(module.rel_path.as_str()) {
                writeln!(self.out, "; {}", module.rel_path)?;
                current_file = Some(module.rel_path.as_str());
            }
            let lines = sources.lines_for(Some(&module.rel_path));
            match item.kind {
                ItemKind::Code => self.code_rows(program, item, lines)?,
                ItemKind::Data => {
                    let data = &module.datas[item.index];
                    self.byte_rows(item, &data.bytes, data.span.line, lines)?;
                }
                ItemKind::Var => {
                    let var = &module.vars[item.index];
                    let row = source_line(lines, var.span.line);
                    self.row(
                        &format!("{:04X}", item.base),
                        &format!("+{:04X}", var.size),
                        var.span.line,
                        row,
                        item.section.as_deref(),
                    )?;
                }
            }
        }

        writeln!(
            self.out,
            "\nLines: {}  Errors: {}  Warnings: {}",
            counts.lines, counts.errors, counts.warnings
        )?;
        writeln!(self.out, "\nSYMBOL TABLE\n")?;
        program.symbols.dump(&mut self.out)?;
        writeln!(self.out, "\nTotal memory is {} bytes", program.image.len())?;
        Ok(())
    }

    /// One row per source line; consecutive records on the same line
    /// (typed calls, op expansions) collapse into one byte run.
    fn code_rows(
        &mut self,
        program: &PackedProgram,
        item: &PlacedItem,
        lines: Option<&[String]>,
    ) -> std::io::Result<()> {
        let func = &program.modules[item.module].funcs[item.index];
        let mut section = item.section.as_deref();
        let mut run: Option<(u32, usize, usize)> = None;
        for record in &func.records {
            match run {
                Some((line, start, end)) if line == record.line && end == record.offset => {
                    run = Some((line, start, record.offset + record.len));
                }
                Some((line, start, end)) => {
                    let addr = u32::from(item.base) + start as u32;
                    let source = source_line(lines, line);
                    self.row(
                        &format!("{addr:04X}"),
                        &format_bytes(&func.bytes[start..end]),
                        line,
                        source,
                        section.take(),
                    )?;
                    run = Some((record.line, record.offset, record.offset + record.len));
                }
                None => {
                    run = Some((record.line, record.offset, record.offset + record.len));
                }
            }
        }
        if let Some((line, start, end)) = run {
            let addr = u32::from(item.base) + start as u32;
            let source = source_line(lines, line);
            self.row(
                &format!("{addr:04X}"),
                &format_bytes(&func.bytes[start..end]),
                line,
                source,
                section.take(),
            )?;
        }
        Ok(())
    }

    /// Data rows wrap at sixteen bytes; continuation rows restate the
    /// address but leave the source columns empty.
    fn byte_rows(
        &mut self,
        item: &PlacedItem,
        bytes: &[u8],
        line: u32,
        lines: Option<&[String]>,
    ) -> std::io::Result<()> {
        let mut section = item.section.as_deref();
        let mut first = true;
        let mut offset = 0usize;
        loop {
            let end = (offset + 16).min(bytes.len());
            let addr = u32::from(item.base) + offset as u32;
            if first {
                let source = source_line(lines, line);
                self.row(
                    &format!("{addr:04X}"),
                    &format_bytes(&bytes[offset..end]),
                    line,
                    source,
                    section.take(),
                )?;
                first = false;
            } else {
                writeln!(
                    self.out,
                    "{:<6}  {:<23}",
                    format!("{addr:04X}"),
                    format_bytes(&bytes[offset..end])
                )?;
            }
            offset = end;
            if offset >= bytes.len() {
                break;
            }
        }
        Ok(())
    }

    fn row(
        &mut self,
        addr: &str,
        bytes: &str,
        line: u32,
        source: &str,
        section: Option<&str>,
    ) -> std::io::Result<()> {
        let section_suffix = section
            .map(|name| format!("  ; [section {name}]"))
            .unwrap_or_default();
        writeln!(
            self.out,
            "{:<6}  {:<23}  {:>4}  {}{}",
            addr, bytes, line, source, section_suffix
        )
    }
}

fn source_line(lines: Option<&[String]>, line: u32) -> &str {
    lines
        .and_then(|lines| lines.get(line.saturating_sub(1) as usize))
        .map(|s| s.as_str())
        .unwrap_or("")
}

/// Format bytes as a spaced uppercase hex string.
pub fn format_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
