// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Code generation: the stack-depth lattice, the IX frame layout, and
//! the lowering pass that turns parsed functions into encoded items.

pub mod frame;
pub mod lower;
pub mod stack;
