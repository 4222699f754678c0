// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Options consumed by the compile pipeline. The CLI maps onto this struct;
//! tests construct it directly.

use std::path::PathBuf;

/// Spelling-case lint for mnemonics, registers and condition codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseStyle {
    #[default]
    Off,
    Lower,
    Upper,
}

impl CaseStyle {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(CaseStyle::Off),
            "lower" => Some(CaseStyle::Lower),
            "upper" => Some(CaseStyle::Upper),
            _ => None,
        }
    }
}

/// How strictly op expansions must balance the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpStackPolicy {
    #[default]
    Strict,
    Risky,
}

impl OpStackPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "strict" => Some(OpStackPolicy::Strict),
            "risky" => Some(OpStackPolicy::Risky),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub include_dirs: Vec<PathBuf>,
    pub case_style: CaseStyle,
    pub op_stack_policy: OpStackPolicy,
    pub warn_type_padding: bool,
    pub warn_raw_call_typed: bool,
    pub require_main: bool,
    pub fill_byte: u8,
    pub verbose: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            include_dirs: Vec::new(),
            case_style: CaseStyle::Off,
            op_stack_policy: OpStackPolicy::Strict,
            warn_type_padding: false,
            warn_raw_call_typed: false,
            require_main: false,
            fill_byte: 0xFF,
            verbose: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_style_parses_known_modes_only() {
        assert_eq!(CaseStyle::parse("lower"), Some(CaseStyle::Lower));
        assert_eq!(CaseStyle::parse("upper"), Some(CaseStyle::Upper));
        assert_eq!(CaseStyle::parse("off"), Some(CaseStyle::Off));
        assert_eq!(CaseStyle::parse("mixed"), None);
    }

    #[test]
    fn op_stack_policy_defaults_to_strict() {
        assert_eq!(OpStackPolicy::default(), OpStackPolicy::Strict);
        assert_eq!(OpStackPolicy::parse("risky"), Some(OpStackPolicy::Risky));
        assert_eq!(OpStackPolicy::parse("loose"), None);
    }
}
