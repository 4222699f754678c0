// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Artifact writers: listing, debug map, and stack trace. The bin and
//! hex images serialize straight off `ByteImage`.

pub mod debug_map;
pub mod listing;
pub mod trace;
