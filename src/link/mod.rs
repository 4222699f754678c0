// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Program assembly: import graph loading, layout, and fixup resolution.

pub mod fixup;
pub mod packer;
