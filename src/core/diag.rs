// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Error types, diagnostics, and reporting for the compiler.

use std::fmt;
use std::sync::Arc;

use crate::core::span::Span;

/// Categories of compiler errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Cli,
    Parser,
    Semantic,
    Stack,
    Encode,
    Fixup,
    Emission,
    Io,
}

/// A compiler error with a kind and message.
#[derive(Debug, Clone)]
pub struct CompileError {
    kind: ErrorKind,
    message: String,
}

impl CompileError {
    pub fn new(kind: ErrorKind, msg: &str, param: Option<&str>) -> Self {
        Self {
            kind,
            message: format_error(msg, param),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CompileError {}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }
}

/// A diagnostic message with location and context.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub(crate) line: u32,
    pub(crate) column: Option<usize>,
    pub(crate) col_end: Option<usize>,
    pub(crate) code: String,
    pub(crate) severity: Severity,
    pub(crate) error: CompileError,
    pub(crate) file: Option<String>,
    pub(crate) notes: Vec<String>,
    pub(crate) help: Vec<String>,
}

impl Diagnostic {
    pub fn new(line: u32, severity: Severity, error: CompileError) -> Self {
        Self {
            line,
            column: None,
            col_end: None,
            code: default_diagnostic_code(error.kind()).to_string(),
            severity,
            error,
            file: None,
            notes: Vec::new(),
            help: Vec::new(),
        }
    }

    /// Diagnostic anchored at a span.
    pub fn at(span: Span, severity: Severity, error: CompileError) -> Self {
        Diagnostic::new(span.line, severity, error)
            .with_column(Some(span.col_start))
            .with_col_end(Some(span.col_end))
    }

    pub fn with_column(mut self, column: Option<usize>) -> Self {
        self.column = column;
        self
    }

    pub fn with_col_end(mut self, col_end: Option<usize>) -> Self {
        self.col_end = col_end;
        self
    }

    pub fn with_file(mut self, file: Option<String>) -> Self {
        self.file = file;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help.push(help.into());
        self
    }

    pub fn format(&self) -> String {
        format!(
            "{}: {} [{}] - {}",
            self.line,
            self.severity.label(),
            self.code,
            self.error.message()
        )
    }

    pub fn format_with_context(&self, lines: Option<&[String]>, use_color: bool) -> String {
        let sev = self.severity.label();
        let header = match &self.file {
            Some(file) => format!("{file}:{}: {sev} [{}]", self.line, self.code),
            None => format!("{}: {sev} [{}]", self.line, self.code),
        };

        let mut out = String::new();
        out.push_str(&header);
        out.push('\n');

        let context = build_context_lines(self.line, self.column, self.col_end, lines, use_color);
        for line in context {
            out.push_str(&line);
            out.push('\n');
        }

        for note in &self.notes {
            out.push_str("note: ");
            out.push_str(note);
            out.push('\n');
        }

        for help in &self.help {
            out.push_str("help: ");
            out.push_str(help);
            out.push('\n');
        }

        out.push_str(&format!("{sev}: {}", self.error.message()));
        out
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn code(&self) -> &str {
        self.code.as_str()
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn message(&self) -> &str {
        self.error.message()
    }
}

/// Source text of every module touched during a run, keyed by the
/// project-relative path carried in diagnostics. Rendering context lines
/// for multi-module compiles needs the right file's text.
#[derive(Debug, Default, Clone)]
pub struct SourceCache {
    files: std::collections::BTreeMap<String, Arc<Vec<String>>>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, text: &str) {
        let lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();
        self.files.insert(path.into(), Arc::new(lines));
    }

    pub fn lines_for(&self, path: Option<&str>) -> Option<&[String]> {
        path.and_then(|p| self.files.get(p)).map(|v| v.as_slice())
    }
}

/// Per-module statistics reported in verbose runs and listing footers.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassCounts {
    pub lines: u32,
    pub errors: u32,
    pub warnings: u32,
}

impl PassCounts {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Build context lines for error display.
pub fn build_context_lines(
    line_num: u32,
    column: Option<usize>,
    col_end: Option<usize>,
    lines: Option<&[String]>,
    use_color: bool,
) -> Vec<String> {
    let mut out = Vec::new();
    let line_idx = line_num.saturating_sub(1) as usize;

    let lines = match lines {
        Some(lines) if !lines.is_empty() => lines,
        _ => {
            out.push(format!("{:>5} | <source unavailable>", line_num));
            return out;
        }
    };

    if line_idx >= lines.len() {
        out.push(format!("{:>5} | <source unavailable>", line_num));
        return out;
    }

    let line = &lines[line_idx];
    let display = crate::core::report::highlight_span(line, column, col_end, use_color);
    out.push(format!("{:>5} | {}", line_num, display));

    out
}

fn default_diagnostic_code(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Cli => "zax001",
        ErrorKind::Parser => "zax101",
        ErrorKind::Semantic => "zax201",
        ErrorKind::Stack => "zax301",
        ErrorKind::Encode => "zax401",
        ErrorKind::Fixup => "zax501",
        ErrorKind::Emission => "zax601",
        ErrorKind::Io => "zax701",
    }
}

/// Format an error message with an optional parameter.
pub fn format_error(msg: &str, param: Option<&str>) -> String {
    match param {
        Some(p) => format!("{msg}: {p}"),
        None => msg.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_format_includes_line_and_severity() {
        let err = CompileError::new(ErrorKind::Semantic, "Bad thing", None);
        let diag = Diagnostic::new(12, Severity::Error, err);
        assert_eq!(diag.format(), "12: ERROR [zax201] - Bad thing");
    }

    #[test]
    fn format_with_context_renders_notes_before_help() {
        let err = CompileError::new(ErrorKind::Stack, "ret with non-zero tracked stack delta (2)", None);
        let diag = Diagnostic::new(3, Severity::Error, err)
            .with_file(Some("example.zax".to_string()))
            .with_column(Some(5))
            .with_note("stack changed by a push on line 2")
            .with_help("balance pushes and pops before returning");

        let lines = vec![
            "func f(): void".to_string(),
            "push bc".to_string(),
            "ret".to_string(),
        ];

        let rendered = diag.format_with_context(Some(&lines), false);
        assert!(rendered.contains("example.zax:3: ERROR [zax301]"));
        assert!(rendered.contains("    3 | ret"));
        let note_idx = rendered
            .find("note: stack changed by a push on line 2")
            .expect("note should be present");
        let help_idx = rendered
            .find("help: balance pushes and pops")
            .expect("help should be present");
        assert!(note_idx < help_idx, "notes must render before help");
        assert!(rendered.ends_with("ERROR: ret with non-zero tracked stack delta (2)"));
    }

    #[test]
    fn format_error_appends_parameter() {
        assert_eq!(format_error("Unresolved symbol", Some("draw")), "Unresolved symbol: draw");
        assert_eq!(format_error("Unresolved symbol", None), "Unresolved symbol");
    }

    #[test]
    fn source_cache_returns_lines_for_known_file() {
        let mut cache = SourceCache::new();
        cache.insert("main.zax", "nop\nret\n");
        let lines = cache.lines_for(Some("main.zax")).expect("file cached");
        assert_eq!(lines, &["nop".to_string(), "ret".to_string()]);
        assert!(cache.lines_for(Some("other.zax")).is_none());
        assert!(cache.lines_for(None).is_none());
    }
}
