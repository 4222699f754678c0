// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! D8M debug map emission.
//!
//! The map is consumed by debuggers and emulator tooling: an address
//! space header, per-file segment tables, and the public symbols. Bytes
//! produced by op expansion already carry their call site's source
//! attribution, so segment tables point at the importing file.

use std::io::Write;

use serde_json::{json, Value};

use crate::link::packer::{PackedProgram, PlacedItem};

pub const D8M_FORMAT: &str = "d8m";
pub const D8M_VERSION: u32 = 1;

/// Serialize the debug map. Keys are emitted in serde_json's map order,
/// so repeated runs produce byte-identical output.
pub fn write_debug_map<W: Write>(
    out: &mut W,
    program: &PackedProgram,
    tool: &str,
    version: &str,
) -> std::io::Result<()> {
    let value = build_map(program, tool, version);
    serde_json::to_writer_pretty(&mut *out, &value).map_err(std::io::Error::from)?;
    out.write_all(b"\n")
}

fn build_map(program: &PackedProgram, tool: &str, version: &str) -> Value {
    let entry = match &program.entry {
        Some((symbol, address)) => json!({ "symbol": symbol, "address": address }),
        None => Value::Null,
    };

    let files: Vec<Value> = program
        .modules
        .iter()
        .enumerate()
        .map(|(mi, module)| {
            let mut segments: Vec<&PlacedItem> = program
                .items
                .iter()
                .filter(|it| it.module == mi && it.size > 0)
                .collect();
            segments.sort_by_key(|it| it.base);
            let segments: Vec<Value> = segments
                .iter()
                .map(|it| {
                    let kind = it
                        .section
                        .as_deref()
                        .unwrap_or_else(|| it.kind.label());
                    json!({
                        "start": it.base,
                        "end": it.base + (it.size - 1),
                        "kind": kind,
                        "confidence": "high",
                    })
                })
                .collect();
            json!({ "path": module.rel_path, "segments": segments })
        })
        .collect();

    let symbols: Vec<Value> = program
        .symbols
        .iter_public()
        .map(|sym| {
            let scope = if sym.scope.is_empty() {
                if sym.exported { "global" } else { "module" }
            } else {
                sym.scope.as_str()
            };
            json!({
                "name": sym.name,
                "kind": sym.kind.label(),
                "address": sym.address,
                "scope": scope,
                "file": sym.file,
                "line": sym.line,
                "size": sym.size,
            })
        })
        .collect();

    json!({
        "format": D8M_FORMAT,
        "version": D8M_VERSION,
        "arch": "z80",
        "addressWidth": 16,
        "endianness": "little",
        "generator": { "tool": tool, "version": version },
        "entry": entry,
        "files": files,
        "symbols": symbols,
    })
}
