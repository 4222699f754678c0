// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// Shared infrastructure: diagnostics, spans, options, image, symbols.

pub mod diag;
pub mod image;
pub mod options;
pub mod report;
pub mod span;
pub mod symtab;
