// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;
