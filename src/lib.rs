// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Zax compiler for the Zilog Z80.
//!
//! The pipeline runs front to back: `frontend` turns source text into an
//! AST, `codegen` lowers functions to encoded bytes with pending fixups,
//! `link` packs modules into one address space and resolves the fixups,
//! and `output` renders the binary, Intel HEX, debug map, listing and
//! trace artifacts. `compiler` ties the stages together behind one call.

pub mod codegen;
pub mod compiler;
pub mod core;
pub mod frontend;
pub mod link;
pub mod output;
pub mod z80;
