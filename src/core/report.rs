// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// Shared reporting helpers used by the driver and diagnostics renderer.

/// Highlight the 1-based inclusive column range `col_start..=col_end`
/// when rendering a context line. A missing end highlights the start
/// column alone; starts past the end of the line append a trailing
/// caret so end-of-line positions still show up.
pub fn highlight_span(
    line: &str,
    col_start: Option<usize>,
    col_end: Option<usize>,
    use_color: bool,
) -> String {
    let Some(start) = col_start.filter(|c| *c > 0) else {
        return line.to_string();
    };
    let from = start - 1;
    if from >= line.len() {
        if use_color {
            return format!("{line}\x1b[31m^\x1b[0m");
        }
        return format!("{line}^");
    }
    if !use_color {
        return line.to_string();
    }
    let to = col_end.unwrap_or(start).max(start).min(line.len());
    match (line.get(..from), line.get(from..to), line.get(to..)) {
        (Some(head), Some(span), Some(rest)) => format!("{head}\x1b[31m{span}\x1b[0m{rest}"),
        // Columns off a char boundary render unhighlighted.
        _ => line.to_string(),
    }
}
