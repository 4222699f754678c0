// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// CLI entrypoint for zaxc.

use clap::Parser;

use zaxc::compiler::{compile, emit_artifacts, validate_cli, verbose_summary, Cli};

fn main() {
    let cli = Cli::parse();
    let config = match validate_cli(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    let use_color = std::env::var("NO_COLOR").is_err();
    let result = compile(&config.input, &config.options);
    for diag in &result.diagnostics {
        let lines = result.sources.lines_for(diag.file());
        eprintln!("{}", diag.format_with_context(lines, use_color));
    }
    if config.options.verbose {
        eprintln!("{}", verbose_summary(&result));
    }
    if result.has_errors() {
        std::process::exit(1);
    }

    if let Err(err) = emit_artifacts(&result, &config) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
