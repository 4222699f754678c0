// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface parsing and argument validation.

use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser};

use crate::core::diag::{CompileError, ErrorKind};
use crate::core::options::{CaseStyle, CompileOptions, OpStackPolicy};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const LONG_ABOUT: &str = "Compiler for the Zax low-level language targeting the Zilog Z80.

Artifacts are opt-in: pass any of --bin, --hex, --d8m, --listing, --trace.
With no artifact flags the compiler emits a flat binary next to the entry
module. Flag values are optional; when omitted, the filename derives from
-o/--output (or the entry module's base name) plus the artifact's
extension.";

#[derive(Parser, Debug)]
#[command(
    name = "zaxc",
    version = VERSION,
    about = "Zax compiler for the Zilog Z80 with typed calls and stack-safety verification",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(
        short = 'i',
        long = "input",
        value_name = "FILE",
        long_help = "Entry module. Imports are resolved relative to the importing file first, then the -I include roots in command-line order."
    )]
    pub input: PathBuf,
    #[arg(
        short = 'o',
        long = "output",
        value_name = "BASE",
        long_help = "Output base path for artifacts whose flags omit a filename. Defaults to the entry module's path without its extension."
    )]
    pub output: Option<PathBuf>,
    #[arg(
        short = 'I',
        long = "include",
        value_name = "DIR",
        action = ArgAction::Append,
        long_help = "Additional import search root (repeatable). Searched after the importing file's directory, in command-line order."
    )]
    pub include: Vec<PathBuf>,
    #[arg(
        long = "bin",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "",
        long_help = "Emit a flat binary image spanning the lowest to highest written address. FILE is optional; when omitted, the output base is used and a .bin extension is added."
    )]
    pub bin: Option<String>,
    #[arg(
        long = "hex",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "",
        long_help = "Emit an Intel HEX image. FILE is optional; when omitted, the output base is used and a .hex extension is added."
    )]
    pub hex: Option<String>,
    #[arg(
        long = "d8m",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "",
        long_help = "Emit the D8M JSON debug map for debuggers and emulator tooling. FILE is optional; when omitted, the output base is used and a .d8m extension is added."
    )]
    pub d8m: Option<String>,
    #[arg(
        long = "listing",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "",
        long_help = "Emit a listing file with addresses, bytes and source lines. FILE is optional; when omitted, the output base is used and a .lst extension is added."
    )]
    pub listing: Option<String>,
    #[arg(
        long = "trace",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "",
        long_help = "Emit the stack verifier's per-instruction trace. FILE is optional; when omitted, the output base is used and a .trace extension is added."
    )]
    pub trace: Option<String>,
    #[arg(
        long = "fill",
        value_name = "hh",
        default_value = "ff",
        long_help = "Fill byte for gaps in binary output (2 hex digits). Defaults to FF."
    )]
    pub fill: String,
    #[arg(
        long = "case-style",
        value_name = "off|lower|upper",
        default_value = "off",
        long_help = "Lint the spelling case of mnemonics, registers and condition codes. off accepts any case; lower/upper warn on the other spelling."
    )]
    pub case_style: String,
    #[arg(
        long = "op-stack-policy",
        value_name = "strict|risky",
        default_value = "strict",
        long_help = "How op expansions that fail stack verification are reported: strict makes them errors, risky downgrades them to warnings."
    )]
    pub op_stack_policy: String,
    #[arg(
        long = "warn-type-padding",
        action = ArgAction::SetTrue,
        long_help = "Warn when a byte-typed argument or initializer is widened to fill a word slot."
    )]
    pub warn_type_padding: bool,
    #[arg(
        long = "warn-raw-call",
        action = ArgAction::SetTrue,
        long_help = "Warn when a raw call targets a typed function, bypassing argument marshalling."
    )]
    pub warn_raw_call: bool,
    #[arg(
        long = "require-main",
        action = ArgAction::SetTrue,
        long_help = "Require the entry module to export func main(): void."
    )]
    pub require_main: bool,
    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::SetTrue,
        long_help = "Print a per-module summary of lines compiled and diagnostic counts."
    )]
    pub verbose: bool,
}

/// Resolved artifact paths. `None` means the artifact is not requested.
#[derive(Debug, Clone, Default)]
pub struct OutputPaths {
    pub bin: Option<PathBuf>,
    pub hex: Option<PathBuf>,
    pub d8m: Option<PathBuf>,
    pub listing: Option<PathBuf>,
    pub trace: Option<PathBuf>,
}

#[derive(Debug)]
pub struct CliConfig {
    pub input: PathBuf,
    pub options: CompileOptions,
    pub outputs: OutputPaths,
}

/// Map raw arguments onto `CompileOptions` and concrete artifact paths.
pub fn validate_cli(cli: &Cli) -> Result<CliConfig, CompileError> {
    let fill_byte = parse_fill(&cli.fill)?;
    let case_style = CaseStyle::parse(&cli.case_style).ok_or_else(|| {
        CompileError::new(ErrorKind::Cli, "Invalid case style", Some(&cli.case_style))
    })?;
    let op_stack_policy = OpStackPolicy::parse(&cli.op_stack_policy).ok_or_else(|| {
        CompileError::new(
            ErrorKind::Cli,
            "Invalid op-stack policy",
            Some(&cli.op_stack_policy),
        )
    })?;

    let base = match &cli.output {
        Some(path) => path.clone(),
        None => cli.input.with_extension(""),
    };
    let any_requested = cli.bin.is_some()
        || cli.hex.is_some()
        || cli.d8m.is_some()
        || cli.listing.is_some()
        || cli.trace.is_some();

    let mut outputs = OutputPaths {
        bin: artifact_path(&base, cli.bin.as_deref(), "bin"),
        hex: artifact_path(&base, cli.hex.as_deref(), "hex"),
        d8m: artifact_path(&base, cli.d8m.as_deref(), "d8m"),
        listing: artifact_path(&base, cli.listing.as_deref(), "lst"),
        trace: artifact_path(&base, cli.trace.as_deref(), "trace"),
    };
    if !any_requested {
        outputs.bin = Some(base.with_extension("bin"));
    }

    let options = CompileOptions {
        include_dirs: cli.include.clone(),
        case_style,
        op_stack_policy,
        warn_type_padding: cli.warn_type_padding,
        warn_raw_call_typed: cli.warn_raw_call,
        require_main: cli.require_main,
        fill_byte,
        verbose: cli.verbose,
    };

    Ok(CliConfig {
        input: cli.input.clone(),
        options,
        outputs,
    })
}

fn artifact_path(base: &Path, value: Option<&str>, ext: &str) -> Option<PathBuf> {
    match value {
        Some("") => Some(base.with_extension(ext)),
        Some(file) => Some(PathBuf::from(file)),
        None => None,
    }
}

fn parse_fill(text: &str) -> Result<u8, CompileError> {
    if text.len() == 2 {
        if let Ok(value) = u8::from_str_radix(text, 16) {
            return Ok(value);
        }
    }
    Err(CompileError::new(
        ErrorKind::Cli,
        "Invalid fill byte (expected 2 hex digits)",
        Some(text),
    ))
}
