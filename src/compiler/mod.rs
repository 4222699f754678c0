// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Compile pipeline driver.
//!
//! One call runs the whole chain: import graph loading, per-module
//! symbol environments, lowering, packing, and fixup resolution. The
//! result carries every diagnostic plus the packed program; artifact
//! emission is a separate step that runs only when no error was
//! produced, so a failing compile never leaves partial output behind.

pub mod cli;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::codegen::lower::{lower_module, LoweredModule, ModuleEnv};
use crate::core::diag::{
    CompileError, Diagnostic, ErrorKind, PassCounts, Severity, SourceCache,
};
use crate::core::options::CompileOptions;
use crate::frontend::ast::{Item, RetType};
use crate::link::fixup::resolve_fixups;
use crate::link::packer::{load_modules, pack, PackedProgram};
use crate::output::debug_map::write_debug_map;
use crate::output::listing::ListingWriter;
use crate::output::trace::TraceWriter;

pub use cli::{validate_cli, Cli, CliConfig, OutputPaths, VERSION};

pub const TOOL_NAME: &str = "zaxc";

/// Everything a compile run produced. `program` is present whenever the
/// entry file could be read, even for failing runs, so diagnostics-only
/// consumers (tests, tooling) can still inspect the partial program.
pub struct CompileResult {
    pub diagnostics: Vec<Diagnostic>,
    pub sources: SourceCache,
    pub counts: PassCounts,
    pub module_lines: Vec<(String, u32)>,
    pub program: Option<PackedProgram>,
}

impl CompileResult {
    pub fn has_errors(&self) -> bool {
        self.counts.errors > 0
    }
}

/// Run the pipeline from the entry module to a packed, fixed-up program.
pub fn compile(input: &Path, options: &CompileOptions) -> CompileResult {
    let mut diagnostics = Vec::new();
    let mut sources = SourceCache::new();

    let (parsed, load_diags) = load_modules(input, options);
    diagnostics.extend(load_diags);

    let mut module_lines = Vec::new();
    for sm in &parsed {
        sources.insert(sm.module.rel_path.clone(), &sm.text);
        module_lines.push((sm.module.rel_path.clone(), sm.text.lines().count() as u32));
    }

    if parsed.is_empty() {
        let counts = count_diags(&diagnostics, &module_lines);
        return CompileResult {
            diagnostics,
            sources,
            counts,
            module_lines,
            program: None,
        };
    }

    if options.require_main {
        if let Some(entry) = parsed.last() {
            if !exports_main(&entry.module.items) {
                let err = CompileError::new(
                    ErrorKind::Semantic,
                    "Entry module must export func main(): void",
                    None,
                );
                diagnostics.push(
                    Diagnostic::new(1, Severity::Error, err)
                        .with_file(Some(entry.module.rel_path.clone())),
                );
            }
        }
    }

    // Environments in load order; every import index precedes its importer.
    let mut envs: Vec<ModuleEnv> = Vec::new();
    for (index, sm) in parsed.iter().enumerate() {
        let imports: Vec<&ModuleEnv> = sm.imports.iter().map(|&i| &envs[i]).collect();
        let (env, env_diags) = ModuleEnv::build(&sm.module, index, &imports);
        diagnostics.extend(env_diags);
        envs.push(env);
    }

    let mut lowered: Vec<LoweredModule> = Vec::new();
    for (index, sm) in parsed.iter().enumerate() {
        let (module, lower_diags) = lower_module(&sm.module, &envs, index, options);
        diagnostics.extend(lower_diags);
        lowered.push(module);
    }

    let (mut program, pack_diags) = pack(lowered);
    diagnostics.extend(pack_diags);
    diagnostics.extend(resolve_fixups(&mut program));

    let counts = count_diags(&diagnostics, &module_lines);
    CompileResult {
        diagnostics,
        sources,
        counts,
        module_lines,
        program: Some(program),
    }
}

fn exports_main(items: &[Item]) -> bool {
    items.iter().any(|item| {
        matches!(
            item,
            Item::Func(f)
                if f.exported && f.name == "main" && f.ret == RetType::Void && f.params.is_empty()
        )
    })
}

fn count_diags(diagnostics: &[Diagnostic], module_lines: &[(String, u32)]) -> PassCounts {
    let mut counts = PassCounts::new();
    counts.lines = module_lines.iter().map(|(_, n)| n).sum();
    for diag in diagnostics {
        match diag.severity() {
            Severity::Error => counts.errors += 1,
            Severity::Warning => counts.warnings += 1,
            Severity::Info => {}
        }
    }
    counts
}

/// Write every requested artifact. Callers must only invoke this for
/// error-free runs; emission is all-or-nothing by contract.
pub fn emit_artifacts(result: &CompileResult, config: &CliConfig) -> Result<(), CompileError> {
    let Some(program) = &result.program else {
        return Ok(());
    };
    let title = format!("{TOOL_NAME} v{VERSION}");

    if let Some(path) = &config.outputs.bin {
        let bytes = match program.image.output_range() {
            Some((start, end)) => program.image.to_bin(start, end, config.options.fill_byte),
            None => Vec::new(),
        };
        write_file(path, &bytes)?;
    }
    if let Some(path) = &config.outputs.hex {
        write_file(path, program.image.to_hex().as_bytes())?;
    }
    if let Some(path) = &config.outputs.d8m {
        let mut file = create_file(path)?;
        write_debug_map(&mut file, program, TOOL_NAME, VERSION)
            .map_err(|err| io_error(&err, path))?;
    }
    if let Some(path) = &config.outputs.listing {
        let file = create_file(path)?;
        let mut writer = ListingWriter::new(file);
        writer
            .write(program, &result.sources, &result.counts, &title)
            .map_err(|err| io_error(&err, path))?;
    }
    if let Some(path) = &config.outputs.trace {
        let file = create_file(path)?;
        let mut writer = TraceWriter::new(file);
        writer
            .write(program, &result.sources)
            .map_err(|err| io_error(&err, path))?;
    }
    Ok(())
}

/// Per-module line counts, totals, and the written image ranges for
/// verbose runs.
pub fn verbose_summary(result: &CompileResult) -> String {
    let mut out = String::new();
    for (path, lines) in &result.module_lines {
        out.push_str(&format!("{path}: {lines} lines\n"));
    }
    out.push_str(&format!(
        "{} module(s), {} lines, {} error(s), {} warning(s)",
        result.module_lines.len(),
        result.counts.lines,
        result.counts.errors,
        result.counts.warnings
    ));
    if let Some(program) = &result.program {
        let ranges: Vec<String> = program
            .image
            .written_ranges()
            .iter()
            .map(|(start, end)| format!("{start:04X}-{end:04X}"))
            .collect();
        if !ranges.is_empty() {
            out.push_str(&format!("\nimage: {}", ranges.join(", ")));
        }
    }
    out
}

fn create_file(path: &Path) -> Result<File, CompileError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| io_error(&err, path))?;
        }
    }
    File::create(path).map_err(|err| io_error(&err, path))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), CompileError> {
    let mut file = create_file(path)?;
    file.write_all(bytes).map_err(|err| io_error(&err, path))
}

fn io_error(err: &dyn std::fmt::Display, path: &Path) -> CompileError {
    let path_text = path.to_string_lossy().to_string();
    CompileError::new(ErrorKind::Io, &err.to_string(), Some(&path_text))
}
