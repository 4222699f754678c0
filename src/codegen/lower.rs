// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Per-module lowering: folds operands, rewrites frame-slot access into
//! `(ix+d)` forms, expands structured control and ops, drives the stack
//! verifier, and hands encoded items to the packer.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use std::path::PathBuf;

use crate::core::diag::{CompileError, Diagnostic, ErrorKind, Severity};
use crate::core::options::{CompileOptions, OpStackPolicy};
use crate::core::span::Span;
use crate::core::symtab::qualify;
use crate::frontend::ast::{
    eval_expr, value_fits_byte, value_fits_word, AstOperand, ConstBinding, ConstEnv, DataDecl,
    DataInit, Expr, FuncDecl, InstructionNode, Item, LocalDecl, Module, OpDecl,
    PlacementDirective, PlacementKind, SelectArm, StorageWidth, Stmt, Value,
};
use crate::z80::{self, Cond, EncodedInstruction, FixupKind, ImmValue, Operand, Reg};

use super::frame::Frame;
use super::stack::{boundary_message, join_message, BoundaryFault, Depth};

/// How deep op bodies may invoke other ops before expansion stops.
const MAX_OP_DEPTH: u32 = 16;

/// Folded placement directive attached to the item that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    At(u16),
    Align(u16),
    Section(String),
}

/// A relocation lifted to item scope; `offset` is the patch position
/// within the item's byte buffer. `symbol: None` marks a literal branch
/// target whose displacement still depends on the final site address.
#[derive(Debug, Clone)]
pub struct ItemFixup {
    pub kind: FixupKind,
    pub offset: usize,
    pub symbol: Option<String>,
    pub addend: i64,
    pub span: Span,
}

/// A label defined inside a code item; `offset` is relative to the
/// item base. Names synthesized by lowering carry a `__` part and stay
/// out of listings and the debug map.
#[derive(Debug, Clone)]
pub struct CodeLabel {
    pub name: String,
    pub offset: usize,
    pub span: Span,
}

/// Provenance of one emitted instruction: where its bytes landed, which
/// source line produced them, and the tracked depth on entry.
#[derive(Debug, Clone)]
pub struct InstrRecord {
    pub offset: usize,
    pub len: usize,
    pub line: u32,
    pub depth: Depth,
    pub synthesized: bool,
}

#[derive(Debug, Clone)]
pub struct LoweredFunc {
    pub name: String,
    pub exported: bool,
    pub span: Span,
    pub bytes: Vec<u8>,
    pub fixups: Vec<ItemFixup>,
    pub labels: Vec<CodeLabel>,
    pub records: Vec<InstrRecord>,
    pub placements: Vec<Placement>,
}

#[derive(Debug, Clone)]
pub struct LoweredData {
    pub name: String,
    pub exported: bool,
    pub span: Span,
    pub bytes: Vec<u8>,
    pub fixups: Vec<ItemFixup>,
    pub placements: Vec<Placement>,
}

#[derive(Debug, Clone)]
pub struct LoweredVar {
    pub name: String,
    pub exported: bool,
    pub span: Span,
    pub size: u16,
    pub placements: Vec<Placement>,
}

#[derive(Debug, Clone)]
pub struct ConstSym {
    pub name: String,
    pub value: i64,
    pub exported: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct LoweredModule {
    pub path: PathBuf,
    pub rel_path: String,
    pub consts: Vec<ConstSym>,
    pub funcs: Vec<LoweredFunc>,
    pub datas: Vec<LoweredData>,
    pub vars: Vec<LoweredVar>,
}

/// Signature a typed call is checked against.
#[derive(Debug, Clone)]
pub struct FuncSig {
    pub params: Vec<(String, StorageWidth)>,
}

/// An op body plus the module it was declared in; expansion resolves
/// names against the defining module, not the call site.
#[derive(Debug, Clone)]
pub struct OpRef {
    pub module: usize,
    pub decl: OpDecl,
}

/// Name environment of one module: folded consts, typed-call
/// signatures and op bodies, own declarations shadowing imports.
#[derive(Debug, Clone)]
pub struct ModuleEnv {
    pub rel_path: String,
    pub consts: BTreeMap<String, i64>,
    pub funcs: BTreeMap<String, FuncSig>,
    pub ops: BTreeMap<String, OpRef>,
    pub exported_consts: BTreeMap<String, i64>,
    pub exported_funcs: BTreeMap<String, FuncSig>,
    pub exported_ops: BTreeMap<String, OpRef>,
}

impl ModuleEnv {
    pub fn build(
        module: &Module,
        index: usize,
        imports: &[&ModuleEnv],
    ) -> (ModuleEnv, Vec<Diagnostic>) {
        let mut env = ModuleEnv {
            rel_path: module.rel_path.clone(),
            consts: BTreeMap::new(),
            funcs: BTreeMap::new(),
            ops: BTreeMap::new(),
            exported_consts: BTreeMap::new(),
            exported_funcs: BTreeMap::new(),
            exported_ops: BTreeMap::new(),
        };
        let mut diags = Vec::new();
        for imp in imports {
            for (name, value) in &imp.exported_consts {
                env.consts.entry(name.clone()).or_insert(*value);
            }
            for (name, sig) in &imp.exported_funcs {
                env.funcs.entry(name.clone()).or_insert_with(|| sig.clone());
            }
            for (name, op) in &imp.exported_ops {
                env.ops.entry(name.clone()).or_insert_with(|| op.clone());
            }
        }

        let mut claimed: BTreeMap<String, Span> = BTreeMap::new();
        let mut claim = |name: &str, span: Span, diags: &mut Vec<Diagnostic>| {
            if claimed.insert(name.to_string(), span).is_some() {
                diags.push(
                    Diagnostic::at(
                        span,
                        Severity::Error,
                        CompileError::new(
                            ErrorKind::Semantic,
                            "Duplicate symbol in module",
                            Some(name),
                        ),
                    )
                    .with_file(Some(module.rel_path.clone())),
                );
            }
        };

        for item in &module.items {
            match item {
                Item::Const(decl) => {
                    claim(&decl.name, decl.span, &mut diags);
                    let folded = {
                        let view = ConstsView(&env.consts);
                        eval_expr(&decl.expr, &view)
                    };
                    match folded {
                        Ok(Value::Literal(value)) => {
                            env.consts.insert(decl.name.clone(), value);
                            if decl.exported {
                                env.exported_consts.insert(decl.name.clone(), value);
                            }
                        }
                        Ok(Value::Address { .. }) => diags.push(
                            Diagnostic::at(
                                decl.span,
                                Severity::Error,
                                CompileError::new(
                                    ErrorKind::Semantic,
                                    "Const initializer must be a constant expression",
                                    Some(&decl.name),
                                ),
                            )
                            .with_file(Some(module.rel_path.clone())),
                        ),
                        Err((span, err)) => diags.push(
                            Diagnostic::at(span, Severity::Error, err)
                                .with_file(Some(module.rel_path.clone())),
                        ),
                    }
                }
                Item::Func(decl) => {
                    claim(&decl.name, decl.span, &mut diags);
                    let sig = FuncSig {
                        params: decl
                            .params
                            .iter()
                            .map(|p| (p.name.clone(), p.width))
                            .collect(),
                    };
                    if decl.exported {
                        env.exported_funcs.insert(decl.name.clone(), sig.clone());
                    }
                    env.funcs.insert(decl.name.clone(), sig);
                }
                Item::Op(decl) => {
                    claim(&decl.name, decl.span, &mut diags);
                    let op = OpRef {
                        module: index,
                        decl: decl.clone(),
                    };
                    if decl.exported {
                        env.exported_ops.insert(decl.name.clone(), op.clone());
                    }
                    env.ops.insert(decl.name.clone(), op);
                }
                Item::Data(decl) => claim(&decl.name, decl.span, &mut diags),
                Item::Var(decl) => claim(&decl.name, decl.span, &mut diags),
                Item::Import(_) | Item::Placement(_) => {}
            }
        }
        (env, diags)
    }
}

/// Const-only view used while folding module-level expressions; unknown
/// names stay symbolic for the fixup resolver.
struct ConstsView<'a>(&'a BTreeMap<String, i64>);

impl ConstEnv for ConstsView<'_> {
    fn lookup(&self, name: &str) -> Option<ConstBinding> {
        self.0.get(name).map(|v| ConstBinding::Value(*v))
    }
}

/// Function-scope view: labels resolve to their qualified form before
/// consts; everything else falls through symbolically.
struct EnvView<'a> {
    labels: Option<&'a BTreeSet<String>>,
    func_name: &'a str,
    env: &'a ModuleEnv,
}

impl ConstEnv for EnvView<'_> {
    fn lookup(&self, name: &str) -> Option<ConstBinding> {
        if let Some(labels) = self.labels {
            if labels.contains(name) {
                return Some(ConstBinding::Address(qualify(self.func_name, name)));
            }
        }
        self.env.consts.get(name).map(|v| ConstBinding::Value(*v))
    }
}

pub fn lower_module(
    module: &Module,
    envs: &[ModuleEnv],
    index: usize,
    options: &CompileOptions,
) -> (LoweredModule, Vec<Diagnostic>) {
    let mut diags = Vec::new();
    let mut pending: Vec<(Placement, Span)> = Vec::new();
    let mut out = LoweredModule {
        path: module.path.clone(),
        rel_path: module.rel_path.clone(),
        consts: Vec::new(),
        funcs: Vec::new(),
        datas: Vec::new(),
        vars: Vec::new(),
    };

    for item in &module.items {
        match item {
            Item::Import(_) | Item::Op(_) => {}
            Item::Const(decl) => {
                if let Some(value) = envs[index].consts.get(&decl.name) {
                    out.consts.push(ConstSym {
                        name: decl.name.clone(),
                        value: *value,
                        exported: decl.exported,
                        span: decl.span,
                    });
                }
            }
            Item::Placement(directive) => {
                if let Some(placement) =
                    fold_placement(directive, &envs[index], &module.rel_path, &mut diags)
                {
                    pending.push((placement, directive.span));
                }
            }
            Item::Data(decl) => {
                let mut lowered = lower_data(decl, &envs[index], &module.rel_path, &mut diags);
                lowered.placements = take_placements(&mut pending);
                out.datas.push(lowered);
            }
            Item::Var(decl) => out.vars.push(LoweredVar {
                name: decl.name.clone(),
                exported: decl.exported,
                span: decl.span,
                size: decl.ty.byte_size(),
                placements: take_placements(&mut pending),
            }),
            Item::Func(decl) => {
                let mut lowerer = FuncLowerer::new(decl, envs, index, options);
                let (mut lowered, func_diags) = lowerer.run();
                lowered.placements = take_placements(&mut pending);
                out.funcs.push(lowered);
                diags.extend(func_diags);
            }
        }
    }

    for (_, span) in pending {
        diags.push(
            Diagnostic::at(
                span,
                Severity::Warning,
                CompileError::new(
                    ErrorKind::Semantic,
                    "Placement directive is not followed by an item",
                    None,
                ),
            )
            .with_file(Some(module.rel_path.clone())),
        );
    }
    (out, diags)
}

fn take_placements(pending: &mut Vec<(Placement, Span)>) -> Vec<Placement> {
    mem::take(pending).into_iter().map(|(p, _)| p).collect()
}

fn fold_placement(
    directive: &PlacementDirective,
    env: &ModuleEnv,
    file: &str,
    diags: &mut Vec<Diagnostic>,
) -> Option<Placement> {
    let mut fail = |span: Span, msg: &str, param: Option<&str>| {
        diags.push(
            Diagnostic::at(
                span,
                Severity::Error,
                CompileError::new(ErrorKind::Semantic, msg, param),
            )
            .with_file(Some(file.to_string())),
        );
        None
    };
    match &directive.kind {
        PlacementKind::Section(name) => Some(Placement::Section(name.clone())),
        PlacementKind::At(expr) => match eval_expr(expr, &ConstsView(&env.consts)) {
            Ok(Value::Literal(v)) if (0..=65535).contains(&v) => Some(Placement::At(v as u16)),
            Ok(Value::Literal(v)) => fail(
                directive.span,
                "at address out of range (0-65535)",
                Some(&v.to_string()),
            ),
            Ok(Value::Address { .. }) => {
                fail(directive.span, "at requires a constant expression", None)
            }
            Err((span, err)) => {
                diags.push(
                    Diagnostic::at(span, Severity::Error, err).with_file(Some(file.to_string())),
                );
                None
            }
        },
        PlacementKind::Align(expr) => match eval_expr(expr, &ConstsView(&env.consts)) {
            Ok(Value::Literal(v)) if (1..=32768).contains(&v) && (v & (v - 1)) == 0 => {
                Some(Placement::Align(v as u16))
            }
            Ok(Value::Literal(v)) => fail(
                directive.span,
                "align must be a power of two",
                Some(&v.to_string()),
            ),
            Ok(Value::Address { .. }) => {
                fail(directive.span, "align requires a constant expression", None)
            }
            Err((span, err)) => {
                diags.push(
                    Diagnostic::at(span, Severity::Error, err).with_file(Some(file.to_string())),
                );
                None
            }
        },
    }
}

fn lower_data(
    decl: &DataDecl,
    env: &ModuleEnv,
    file: &str,
    diags: &mut Vec<Diagnostic>,
) -> LoweredData {
    let mut bytes = Vec::with_capacity(decl.ty.byte_size() as usize);
    let mut fixups = Vec::new();
    for init in &decl.init {
        match init {
            // The parser only admits strings under byte storage.
            DataInit::Str(text, _) => bytes.extend_from_slice(text.as_bytes()),
            DataInit::Expr(expr) => {
                let folded = eval_expr(expr, &ConstsView(&env.consts));
                match (decl.ty.width, folded) {
                    (StorageWidth::Byte, Ok(Value::Literal(v))) if value_fits_byte(v) => {
                        bytes.push((v & 0xFF) as u8);
                    }
                    (StorageWidth::Byte, Ok(Value::Literal(v))) => diags.push(
                        Diagnostic::at(
                            expr.span(),
                            Severity::Error,
                            CompileError::new(
                                ErrorKind::Semantic,
                                "Data byte out of range (-128..255)",
                                Some(&v.to_string()),
                            ),
                        )
                        .with_file(Some(file.to_string())),
                    ),
                    (StorageWidth::Byte, Ok(Value::Address { symbol, .. })) => diags.push(
                        Diagnostic::at(
                            expr.span(),
                            Severity::Error,
                            CompileError::new(
                                ErrorKind::Semantic,
                                "Byte data element must be a constant, not an address",
                                Some(&symbol),
                            ),
                        )
                        .with_file(Some(file.to_string())),
                    ),
                    (StorageWidth::Word, Ok(Value::Literal(v))) if value_fits_word(v) => {
                        let w = (v & 0xFFFF) as u16;
                        bytes.push((w & 0xFF) as u8);
                        bytes.push((w >> 8) as u8);
                    }
                    (StorageWidth::Word, Ok(Value::Literal(v))) => diags.push(
                        Diagnostic::at(
                            expr.span(),
                            Severity::Error,
                            CompileError::new(
                                ErrorKind::Semantic,
                                "Data word out of range (-32768..65535)",
                                Some(&v.to_string()),
                            ),
                        )
                        .with_file(Some(file.to_string())),
                    ),
                    (StorageWidth::Word, Ok(Value::Address { symbol, addend })) => {
                        fixups.push(ItemFixup {
                            kind: FixupKind::Abs16,
                            offset: bytes.len(),
                            symbol: Some(symbol),
                            addend,
                            span: expr.span(),
                        });
                        bytes.push(0);
                        bytes.push(0);
                    }
                    (_, Err((span, err))) => diags.push(
                        Diagnostic::at(span, Severity::Error, err)
                            .with_file(Some(file.to_string())),
                    ),
                }
            }
        }
    }
    LoweredData {
        name: decl.name.clone(),
        exported: decl.exported,
        span: decl.span,
        bytes,
        fixups,
        placements: Vec::new(),
    }
}

/// Where a frame-slot name showed up in an operand.
enum SlotPos {
    Imm { exact: bool },
    Mem,
    Disp,
}

struct SlotUse {
    index: usize,
    name: String,
    offset: i16,
    width: StorageWidth,
    pos: SlotPos,
}

/// First frame-slot name mentioned in an expression, and whether the
/// expression is exactly that bare name.
fn slot_mention(frame: &Frame, expr: &Expr) -> Option<(String, bool)> {
    match expr {
        Expr::Num(..) => None,
        Expr::Sym(name, _) => frame.lookup(name).map(|s| (s.name.clone(), true)),
        Expr::Unary { inner, .. } => slot_mention(frame, inner).map(|(n, _)| (n, false)),
        Expr::Binary { lhs, rhs, .. } => slot_mention(frame, lhs)
            .or_else(|| slot_mention(frame, rhs))
            .map(|(n, _)| (n, false)),
    }
}

/// Low/high legacy halves of a 16-bit pair.
fn pair_halves(pair: Reg) -> Option<(Reg, Reg)> {
    match pair {
        Reg::Bc => Some((Reg::C, Reg::B)),
        Reg::De => Some((Reg::E, Reg::D)),
        Reg::Hl => Some((Reg::L, Reg::H)),
        _ => None,
    }
}

struct FuncLowerer<'a> {
    envs: &'a [ModuleEnv],
    cur: usize,
    options: &'a CompileOptions,
    func: &'a FuncDecl,
    func_name: String,
    file: String,
    frame: Frame,
    label_names: BTreeSet<String>,
    bytes: Vec<u8>,
    fixups: Vec<ItemFixup>,
    labels: Vec<CodeLabel>,
    records: Vec<InstrRecord>,
    diags: Vec<Diagnostic>,
    state: Depth,
    terminated: bool,
    next_label: u32,
    expand_depth: u32,
    span_override: Option<Span>,
}

impl<'a> FuncLowerer<'a> {
    fn new(
        func: &'a FuncDecl,
        envs: &'a [ModuleEnv],
        index: usize,
        options: &'a CompileOptions,
    ) -> Self {
        FuncLowerer {
            envs,
            cur: index,
            options,
            func,
            func_name: func.name.clone(),
            file: envs[index].rel_path.clone(),
            frame: Frame::build(&func.params, &[]),
            label_names: BTreeSet::new(),
            bytes: Vec::new(),
            fixups: Vec::new(),
            labels: Vec::new(),
            records: Vec::new(),
            diags: Vec::new(),
            state: Depth::Known(0),
            terminated: false,
            next_label: 0,
            expand_depth: 0,
            span_override: None,
        }
    }

    fn run(&mut self) -> (LoweredFunc, Vec<Diagnostic>) {
        let func = self.func;
        self.collect_names();
        self.emit_prologue();
        self.emit_local_inits();
        self.lower_body(&func.body);

        let end_span = func.body.last().map(|s| s.span()).unwrap_or(func.span);
        if !self.terminated {
            self.boundary(end_span, "Function fallthrough", 0, Severity::Error);
        }
        if self.frame.requires_epilogue() {
            self.define_label(format!("{}.__exit", self.func_name), end_span);
            for (mn, ops) in self.frame.epilogue_ops() {
                self.emit(mn, &ops, end_span, true);
            }
        } else if !self.terminated {
            self.emit("ret", &[], end_span, true);
        }

        let lowered = LoweredFunc {
            name: self.func.name.clone(),
            exported: self.func.exported,
            span: self.func.span,
            bytes: mem::take(&mut self.bytes),
            fixups: mem::take(&mut self.fixups),
            labels: mem::take(&mut self.labels),
            records: mem::take(&mut self.records),
            placements: Vec::new(),
        };
        (lowered, mem::take(&mut self.diags))
    }

    /// Pre-pass: params, locals and labels, with duplicate checks, so
    /// forward label references and mid-body locals resolve.
    fn collect_names(&mut self) {
        let func = self.func;
        let mut seen: BTreeMap<&str, Span> = BTreeMap::new();
        for param in &func.params {
            if seen.insert(&param.name, param.span).is_some() {
                let d = self.error_diag(param.span, "Duplicate parameter", Some(&param.name));
                self.diags.push(d);
            }
        }
        let mut locals: Vec<&LocalDecl> = Vec::new();
        collect_locals(&func.body, &mut locals);
        for local in &locals {
            if seen.insert(&local.name, local.span).is_some() {
                let d =
                    self.error_diag(local.span, "Duplicate local in function", Some(&local.name));
                self.diags.push(d);
            }
        }
        let mut labels: BTreeMap<String, Span> = BTreeMap::new();
        collect_labels(&func.body, &mut labels, &mut self.diags, &self.file);
        for (name, span) in &labels {
            if seen.contains_key(name.as_str()) {
                let d = self.error_diag(*span, "Local name collides with a label", Some(name));
                self.diags.push(d);
            }
        }
        self.label_names = labels.into_keys().collect();
        self.frame = Frame::build(&func.params, &locals);
        let mut oversized: Vec<String> = Vec::new();
        for slot in self.frame.slots() {
            let end = slot.offset as i32 + slot.width.size() as i32 - 1;
            if slot.offset < -128 || end > 127 {
                oversized.push(slot.name.clone());
            }
        }
        for name in oversized {
            let d = self.error_diag(func.span, "Frame slot out of indexed range", Some(&name));
            self.diags.push(d);
        }
    }

    fn emit_prologue(&mut self) {
        let span = self.func.span;
        for (mn, ops) in self.frame.prologue_ops() {
            self.emit(mn, &ops, span, true);
        }
    }

    /// Initializers run in declaration order right after the prologue.
    /// Word initializers with symbolic values go through HL, which is
    /// free at entry.
    fn emit_local_inits(&mut self) {
        let func = self.func;
        let mut locals: Vec<&LocalDecl> = Vec::new();
        collect_locals(&func.body, &mut locals);
        for local in locals {
            let Some(init) = &local.init else { continue };
            let Some(slot) = self.frame.lookup(&local.name) else {
                continue;
            };
            let (offset, width) = (slot.offset as i32, slot.width);
            let span = local.span;
            let Ok(value) = self.fold_value(init) else {
                continue;
            };
            match (width, value) {
                (StorageWidth::Byte, ImmValue::Literal(v)) => {
                    self.emit(
                        "ld",
                        &[
                            Operand::Indexed {
                                base: Reg::Ix,
                                disp: offset,
                            },
                            Operand::Imm(ImmValue::Literal(v)),
                        ],
                        span,
                        false,
                    );
                }
                (StorageWidth::Byte, ImmValue::Symbolic { symbol, .. }) => {
                    self.semantic(
                        span,
                        "Byte local initializer must be a constant, not an address",
                        Some(&symbol),
                    );
                }
                (StorageWidth::Word, ImmValue::Literal(v)) => {
                    if !value_fits_word(v) {
                        self.semantic(
                            span,
                            "Local initializer out of range (-32768..65535)",
                            Some(&v.to_string()),
                        );
                        continue;
                    }
                    let w = (v & 0xFFFF) as u16;
                    self.store_word_literal(offset, w, span);
                }
                (StorageWidth::Word, symbolic @ ImmValue::Symbolic { .. }) => {
                    self.emit(
                        "ld",
                        &[Operand::Reg(Reg::Hl), Operand::Imm(symbolic)],
                        span,
                        false,
                    );
                    self.emit(
                        "ld",
                        &[
                            Operand::Indexed {
                                base: Reg::Ix,
                                disp: offset,
                            },
                            Operand::Reg(Reg::L),
                        ],
                        span,
                        false,
                    );
                    self.emit(
                        "ld",
                        &[
                            Operand::Indexed {
                                base: Reg::Ix,
                                disp: offset + 1,
                            },
                            Operand::Reg(Reg::H),
                        ],
                        span,
                        false,
                    );
                }
            }
        }
    }

    /// Two register-neutral immediate stores, low byte first.
    fn store_word_literal(&mut self, offset: i32, value: u16, span: Span) {
        self.emit(
            "ld",
            &[
                Operand::Indexed {
                    base: Reg::Ix,
                    disp: offset,
                },
                Operand::Imm(ImmValue::Literal((value & 0xFF) as i64)),
            ],
            span,
            false,
        );
        self.emit(
            "ld",
            &[
                Operand::Indexed {
                    base: Reg::Ix,
                    disp: offset + 1,
                },
                Operand::Imm(ImmValue::Literal((value >> 8) as i64)),
            ],
            span,
            false,
        );
    }

    fn lower_body(&mut self, body: &[Stmt]) {
        for stmt in body {
            match stmt {
                Stmt::Label { name, span } => {
                    self.define_label(qualify(&self.func_name, name), *span);
                    self.terminated = false;
                }
                Stmt::Local(_) => {}
                Stmt::Instr(node) => self.lower_instruction(node),
                Stmt::If {
                    cc,
                    then_body,
                    else_body,
                    span,
                } => self.lower_if(*cc, then_body, else_body.as_deref(), *span),
                Stmt::While { cc, body, span } => self.lower_while(*cc, body, *span),
                Stmt::Repeat { body, cc, span } => self.lower_repeat(body, *cc, *span),
                Stmt::Select {
                    arms,
                    else_body,
                    span,
                } => self.lower_select(arms, else_body.as_deref(), *span),
                Stmt::TypedCall { name, args, span } => {
                    self.lower_typed_call(name, args, *span)
                }
                Stmt::OpCall { name, span } => self.lower_op_call(name, *span),
            }
        }
    }

    fn lower_if(
        &mut self,
        cc: Cond,
        then_body: &[Stmt],
        else_body: Option<&[Stmt]>,
        span: Span,
    ) {
        let entry = self.state;
        match else_body {
            None => {
                let end = self.fresh_label();
                self.emit_jump(Some(cc.inverse()), &end, span);
                self.lower_body(then_body);
                let then_exit = (!self.terminated).then_some(self.state);
                self.join(span, "if/else join", &[Some(entry), then_exit]);
                self.define_label(end, span);
                self.terminated = false;
            }
            Some(else_body) => {
                let else_label = self.fresh_label();
                let end = self.fresh_label();
                self.emit_jump(Some(cc.inverse()), &else_label, span);
                self.lower_body(then_body);
                let then_exit = (!self.terminated).then_some(self.state);
                let then_terminated = self.terminated;
                self.emit_jump(None, &end, span);
                self.define_label(else_label, span);
                self.state = entry;
                self.terminated = false;
                self.lower_body(else_body);
                let else_exit = (!self.terminated).then_some(self.state);
                let both_dead = then_terminated && self.terminated;
                self.join(span, "if/else join", &[then_exit, else_exit]);
                self.define_label(end, span);
                self.terminated = both_dead;
                if both_dead {
                    self.state = entry;
                }
            }
        }
    }

    fn lower_while(&mut self, cc: Cond, body: &[Stmt], span: Span) {
        let top = self.fresh_label();
        let end = self.fresh_label();
        let entry = self.state;
        self.define_label(top.clone(), span);
        self.emit_jump(Some(cc.inverse()), &end, span);
        self.lower_body(body);
        let back_edge = (!self.terminated).then_some(self.state);
        self.join(span, "while back-edge", &[Some(entry), back_edge]);
        self.emit_jump(None, &top, span);
        self.define_label(end, span);
        self.terminated = false;
    }

    fn lower_repeat(&mut self, body: &[Stmt], cc: Cond, span: Span) {
        let top = self.fresh_label();
        let entry = self.state;
        self.define_label(top.clone(), span);
        self.lower_body(body);
        if self.terminated {
            return;
        }
        self.join(span, "repeat/until back-edge", &[Some(entry), Some(self.state)]);
        // Loop back while the until-condition has not come true yet.
        self.emit_jump(Some(cc.inverse()), &top, span);
    }

    fn lower_select(&mut self, arms: &[SelectArm], else_body: Option<&[Stmt]>, span: Span) {
        let end = self.fresh_label();
        let entry = self.state;
        let mut exits: Vec<Option<Depth>> = Vec::new();
        for arm in arms {
            let value = match self.fold_value(&arm.value) {
                Ok(ImmValue::Literal(v)) if value_fits_byte(v) => v,
                Ok(ImmValue::Literal(v)) => {
                    self.semantic(
                        arm.span,
                        "Select case value out of byte range (-128..255)",
                        Some(&v.to_string()),
                    );
                    continue;
                }
                Ok(ImmValue::Symbolic { symbol, .. }) => {
                    self.semantic(
                        arm.span,
                        "Select case value must be a constant, not an address",
                        Some(&symbol),
                    );
                    continue;
                }
                Err(()) => continue,
            };
            let next = self.fresh_label();
            self.state = entry;
            self.terminated = false;
            self.emit(
                "cp",
                &[Operand::Imm(ImmValue::Literal(value))],
                arm.span,
                false,
            );
            self.emit_jump(Some(Cond::Nz), &next, arm.span);
            self.lower_body(&arm.body);
            exits.push((!self.terminated).then_some(self.state));
            self.emit_jump(None, &end, arm.span);
            self.define_label(next, arm.span);
        }
        self.state = entry;
        self.terminated = false;
        match else_body {
            Some(body) => {
                self.lower_body(body);
                exits.push((!self.terminated).then_some(self.state));
            }
            // No else: the fall-through path joins with the arm exits.
            None => exits.push(Some(entry)),
        }
        let all_dead = exits.iter().all(|e| e.is_none());
        self.join(span, "select join", &exits);
        self.define_label(end, span);
        self.terminated = all_dead;
        if all_dead {
            self.state = entry;
        }
    }

    /// Merge the live exit states of a join, reporting at most one
    /// diagnostic, and leave the merged state as current.
    fn join(&mut self, span: Span, kind: &str, exits: &[Option<Depth>]) {
        let mut merged: Option<Depth> = None;
        let mut reported = false;
        for exit in exits.iter().flatten() {
            merged = Some(match merged {
                None => *exit,
                Some(state) => {
                    let (next, report) = Depth::merge(state, *exit);
                    if !reported {
                        if let Some(msg) = join_message(kind, report) {
                            self.push_diag(
                                span,
                                Severity::Error,
                                CompileError::new(ErrorKind::Stack, &msg, None),
                            );
                            reported = true;
                        }
                    }
                    next
                }
            });
        }
        if let Some(state) = merged {
            self.state = state;
        }
    }

    fn lower_instruction(&mut self, node: &InstructionNode) {
        match node.mnemonic.as_str() {
            "ret" => return self.lower_ret(node),
            "reti" | "retn" => return self.lower_reti(node),
            _ => {}
        }
        if self.try_lower_slot_access(node) {
            return;
        }
        let Ok(ops) = self.fold_operands(&node.operands) else {
            return;
        };
        match node.mnemonic.as_str() {
            "call" => self.pre_call(node, &ops),
            "rst" => self.boundary(node.span, "Rst", 0, Severity::Error),
            _ => {}
        }
        let unconditional_jump = matches!(node.mnemonic.as_str(), "jp" | "jr")
            && !matches!(ops.first(), Some(Operand::Cond(_)));
        match z80::encode(&node.mnemonic, &ops) {
            Ok(enc) => {
                self.append(enc, node.span, false);
                if unconditional_jump {
                    self.terminated = true;
                }
            }
            Err(err) => self.push_diag(node.span, Severity::Error, err),
        }
    }

    fn lower_ret(&mut self, node: &InstructionNode) {
        let Ok(ops) = self.fold_operands(&node.operands) else {
            return;
        };
        // `ret c` parses the register; it means the carry condition here.
        let cc = match ops.first() {
            None => None,
            Some(Operand::Cond(cc)) => Some(*cc),
            Some(Operand::Reg(Reg::C)) => Some(Cond::C),
            Some(_) => {
                if let Err(err) = z80::encode("ret", &ops) {
                    self.push_diag(node.span, Severity::Error, err);
                }
                return;
            }
        };
        self.boundary(node.span, "Return", 0, Severity::Error);
        if self.frame.requires_epilogue() {
            let target = format!("{}.__exit", self.func_name);
            self.emit_jump(cc, &target, node.span);
        } else {
            match z80::encode("ret", &ops) {
                Ok(enc) => self.append(enc, node.span, false),
                Err(err) => self.push_diag(node.span, Severity::Error, err),
            }
        }
        if cc.is_none() {
            self.terminated = true;
        }
    }

    fn lower_reti(&mut self, node: &InstructionNode) {
        let Ok(ops) = self.fold_operands(&node.operands) else {
            return;
        };
        if self.frame.requires_epilogue() {
            let msg = format!(
                "{} not supported in functions that require cleanup; use ret/ret cc instead",
                node.mnemonic
            );
            self.push_diag(
                node.span,
                Severity::Error,
                CompileError::new(ErrorKind::Stack, &msg, None),
            );
            return;
        }
        self.boundary(node.span, "Return", 0, Severity::Error);
        match z80::encode(&node.mnemonic, &ops) {
            Ok(enc) => {
                self.append(enc, node.span, false);
                self.terminated = true;
            }
            Err(err) => self.push_diag(node.span, Severity::Error, err),
        }
    }

    fn pre_call(&mut self, node: &InstructionNode, ops: &[Operand]) {
        if self.options.warn_raw_call_typed {
            if let Some(Operand::Imm(ImmValue::Symbolic { symbol, .. })) = ops.last() {
                let envs = self.envs;
                if envs[self.cur].funcs.contains_key(symbol) {
                    let name = symbol.clone();
                    let span = self.span_override.unwrap_or(node.span);
                    self.diags.push(
                        Diagnostic::at(
                            span,
                            Severity::Warning,
                            CompileError::new(
                                ErrorKind::Semantic,
                                "Raw call to typed function",
                                Some(&name),
                            ),
                        )
                        .with_file(Some(self.file.clone()))
                        .with_help(format!(
                            "invoke it as {name}(...) so arguments are pushed and cleaned up"
                        )),
                    );
                }
            }
        }
        self.boundary(node.span, "Call", 0, Severity::Warning);
    }

    fn lower_typed_call(&mut self, name: &str, args: &[Expr], span: Span) {
        let envs = self.envs;
        let Some(sig) = envs[self.cur].funcs.get(name) else {
            self.semantic(span, "Unknown function", Some(name));
            return;
        };
        if sig.params.len() != args.len() {
            let msg = format!(
                "Function \"{}\" expects {} argument(s), found {}",
                name,
                sig.params.len(),
                args.len()
            );
            self.push_diag(
                span,
                Severity::Error,
                CompileError::new(ErrorKind::Semantic, &msg, None),
            );
            return;
        }

        // Arguments go on the stack right to left, each as a word.
        for ((pname, pwidth), arg) in sig.params.iter().zip(args.iter()).rev() {
            self.push_argument(name, pname, *pwidth, arg, span);
        }

        let required = 2 * args.len() as i32;
        let subject = format!("Typed call \"{name}\"");
        self.boundary(span, &subject, required, Severity::Error);

        self.emit(
            "call",
            &[Operand::Imm(ImmValue::Symbolic {
                symbol: name.to_string(),
                addend: 0,
            })],
            span,
            false,
        );
        for _ in 0..(2 * args.len()) {
            self.emit("inc", &[Operand::Reg(Reg::Sp)], span, false);
        }
    }

    fn push_argument(
        &mut self,
        func: &str,
        pname: &str,
        pwidth: StorageWidth,
        arg: &Expr,
        span: Span,
    ) {
        if pwidth == StorageWidth::Byte && self.options.warn_type_padding {
            self.push_diag(
                span,
                Severity::Warning,
                CompileError::new(
                    ErrorKind::Semantic,
                    "Byte argument widened to a word slot",
                    Some(&format!("{func}.{pname}")),
                ),
            );
        }

        // A bare local or parameter name marshals straight off the frame.
        if self.expand_depth == 0 {
            if let Expr::Sym(arg_name, _) = arg {
                if let Some(slot) = self.frame.lookup(arg_name) {
                    let (offset, width, slot_name) =
                        (slot.offset as i32, slot.width, slot.name.clone());
                    if pwidth == StorageWidth::Byte && width == StorageWidth::Word {
                        let msg = format!(
                            "Argument \"{pname}\" is a byte; frame slot \"{slot_name}\" is a word"
                        );
                        self.push_diag(
                            span,
                            Severity::Error,
                            CompileError::new(ErrorKind::Semantic, &msg, None),
                        );
                        return;
                    }
                    self.emit(
                        "ld",
                        &[
                            Operand::Reg(Reg::L),
                            Operand::Indexed {
                                base: Reg::Ix,
                                disp: offset,
                            },
                        ],
                        span,
                        false,
                    );
                    match width {
                        StorageWidth::Byte => self.emit(
                            "ld",
                            &[Operand::Reg(Reg::H), Operand::Imm(ImmValue::Literal(0))],
                            span,
                            false,
                        ),
                        StorageWidth::Word => self.emit(
                            "ld",
                            &[
                                Operand::Reg(Reg::H),
                                Operand::Indexed {
                                    base: Reg::Ix,
                                    disp: offset + 1,
                                },
                            ],
                            span,
                            false,
                        ),
                    }
                    self.emit("push", &[Operand::Reg(Reg::Hl)], span, false);
                    return;
                }
            }
        }

        let Ok(value) = self.fold_value(arg) else {
            return;
        };
        let word = match (pwidth, value) {
            (StorageWidth::Byte, ImmValue::Literal(v)) => {
                if !value_fits_byte(v) {
                    let msg = format!("Argument \"{pname}\" out of byte range: {v}");
                    self.push_diag(
                        span,
                        Severity::Error,
                        CompileError::new(ErrorKind::Semantic, &msg, None),
                    );
                    return;
                }
                ImmValue::Literal(v & 0xFF)
            }
            (StorageWidth::Word, ImmValue::Literal(v)) => {
                if !value_fits_word(v) {
                    let msg = format!("Argument \"{pname}\" out of word range: {v}");
                    self.push_diag(
                        span,
                        Severity::Error,
                        CompileError::new(ErrorKind::Semantic, &msg, None),
                    );
                    return;
                }
                ImmValue::Literal(v)
            }
            (StorageWidth::Byte, ImmValue::Symbolic { .. }) => {
                let msg = format!("Argument \"{pname}\" is a byte; cannot pass an address");
                self.push_diag(
                    span,
                    Severity::Error,
                    CompileError::new(ErrorKind::Semantic, &msg, None),
                );
                return;
            }
            (StorageWidth::Word, symbolic) => symbolic,
        };
        self.emit(
            "ld",
            &[Operand::Reg(Reg::Hl), Operand::Imm(word)],
            span,
            false,
        );
        self.emit("push", &[Operand::Reg(Reg::Hl)], span, false);
    }

    fn lower_op_call(&mut self, name: &str, span: Span) {
        let envs = self.envs;
        let Some(op) = envs[self.cur].ops.get(name) else {
            self.semantic(span, "Unknown op", Some(name));
            return;
        };
        if self.expand_depth >= MAX_OP_DEPTH {
            self.semantic(span, "Op expansion exceeds the nesting limit", Some(name));
            return;
        }

        let entry = self.state;
        let saved_cur = mem::replace(&mut self.cur, op.module);
        let saved_span = self.span_override;
        if saved_span.is_none() {
            // Expanded instructions report at the call site.
            self.span_override = Some(span);
        }
        self.expand_depth += 1;
        self.lower_body(&op.decl.body);
        self.expand_depth -= 1;
        self.cur = saved_cur;
        self.span_override = saved_span;

        // The boundary only classifies when the state was trackable on
        // entry; earlier faults already carry the blame. Untracked can
        // only arise from a direct SP write inside the body.
        if let Depth::Known(entry_depth) = entry {
            let severity = match self.options.op_stack_policy {
                OpStackPolicy::Strict => Severity::Error,
                OpStackPolicy::Risky => Severity::Warning,
            };
            let message = match self.state {
                Depth::Untracked => Some(format!(
                    "Op expansion \"{name}\" performed an untracked SP mutation; cannot verify stack depth"
                )),
                Depth::Unknown => {
                    Some(format!("Op expansion \"{name}\" leaves stack untrackable"))
                }
                Depth::Known(depth) if depth != entry_depth => Some(boundary_message(
                    &format!("Op expansion \"{name}\""),
                    BoundaryFault::NonZero(depth - entry_depth),
                )),
                Depth::Known(_) => None,
            };
            if let Some(msg) = message {
                self.push_diag(
                    span,
                    severity,
                    CompileError::new(ErrorKind::Stack, &msg, None),
                );
            }
        }
    }

    // ---- frame-slot access rewriting -------------------------------

    fn find_slot_use(&self, node: &InstructionNode) -> Option<SlotUse> {
        if self.expand_depth > 0 {
            return None;
        }
        for (index, op) in node.operands.iter().enumerate() {
            let (expr, pos_of) = match op {
                AstOperand::Imm(expr, _) => (expr, None),
                AstOperand::Mem(expr, _) => (expr, Some(SlotPos::Mem)),
                AstOperand::Indexed {
                    disp: Some(expr), ..
                } => (expr, Some(SlotPos::Disp)),
                _ => continue,
            };
            if let Some((name, exact)) = slot_mention(&self.frame, expr) {
                let slot = self.frame.lookup(&name)?;
                return Some(SlotUse {
                    index,
                    name,
                    offset: slot.offset,
                    width: slot.width,
                    pos: pos_of.unwrap_or(SlotPos::Imm { exact }),
                });
            }
        }
        None
    }

    /// Returns true when the instruction touched a frame slot and was
    /// fully handled, successfully or not.
    fn try_lower_slot_access(&mut self, node: &InstructionNode) -> bool {
        let Some(slot_use) = self.find_slot_use(node) else {
            return false;
        };
        match slot_use.pos {
            SlotPos::Mem => {
                self.semantic(node.span, "Frame slot cannot be used here", Some(&slot_use.name));
                return true;
            }
            SlotPos::Disp | SlotPos::Imm { exact: false } => {
                self.semantic(
                    node.span,
                    "Frame slot cannot appear in an expression",
                    Some(&slot_use.name),
                );
                return true;
            }
            SlotPos::Imm { exact: true } => {}
        }
        let count = node.operands.len();
        match (node.mnemonic.as_str(), count, slot_use.index) {
            ("ld", 2, 1) => self.slot_load(node, &slot_use),
            ("ld", 2, 0) => self.slot_store(node, &slot_use),
            ("add" | "adc" | "sub" | "sbc" | "and" | "or" | "xor" | "cp", 2, 1) => {
                self.slot_alu(node, &slot_use, 0)
            }
            ("sub" | "and" | "or" | "xor" | "cp", 1, 0) => self.slot_alu(node, &slot_use, 1),
            ("inc" | "dec", 1, 0) => self.slot_incdec(node, &slot_use),
            _ => self.semantic(node.span, "Frame slot cannot be used here", Some(&slot_use.name)),
        }
        true
    }

    fn indexed(&self, offset: i16, byte: i32) -> Operand {
        Operand::Indexed {
            base: Reg::Ix,
            disp: offset as i32 + byte,
        }
    }

    fn slot_load(&mut self, node: &InstructionNode, slot: &SlotUse) {
        let AstOperand::Reg(dst, _) = &node.operands[0] else {
            self.semantic(node.span, "Frame slot cannot be used here", Some(&slot.name));
            return;
        };
        let dst = *dst;
        match (slot.width, pair_halves(dst)) {
            (StorageWidth::Word, Some((lo, hi))) => {
                self.emit(
                    "ld",
                    &[Operand::Reg(lo), self.indexed(slot.offset, 0)],
                    node.span,
                    false,
                );
                self.emit(
                    "ld",
                    &[Operand::Reg(hi), self.indexed(slot.offset, 1)],
                    node.span,
                    false,
                );
            }
            (StorageWidth::Byte, None) if dst.is_legacy8() => {
                self.emit(
                    "ld",
                    &[Operand::Reg(dst), self.indexed(slot.offset, 0)],
                    node.span,
                    false,
                );
            }
            (StorageWidth::Byte, _) => self.slot_width_error(node.span, slot),
            (StorageWidth::Word, None) => self.slot_width_error(node.span, slot),
        }
    }

    fn slot_store(&mut self, node: &InstructionNode, slot: &SlotUse) {
        // Reject slot-to-slot before folding the source.
        if let AstOperand::Imm(expr, _) = &node.operands[1] {
            if slot_mention(&self.frame, expr).is_some() {
                self.semantic(
                    node.span,
                    "Frame slot to frame slot moves are not supported; go through a register",
                    Some(&slot.name),
                );
                return;
            }
        }
        match &node.operands[1] {
            AstOperand::Reg(src, _) => match (slot.width, pair_halves(*src)) {
                (StorageWidth::Word, Some((lo, hi))) => {
                    self.emit(
                        "ld",
                        &[self.indexed(slot.offset, 0), Operand::Reg(lo)],
                        node.span,
                        false,
                    );
                    self.emit(
                        "ld",
                        &[self.indexed(slot.offset, 1), Operand::Reg(hi)],
                        node.span,
                        false,
                    );
                }
                (StorageWidth::Byte, None) if src.is_legacy8() => {
                    self.emit(
                        "ld",
                        &[self.indexed(slot.offset, 0), Operand::Reg(*src)],
                        node.span,
                        false,
                    );
                }
                _ => self.slot_width_error(node.span, slot),
            },
            AstOperand::Imm(expr, _) => {
                let Ok(value) = self.fold_value(expr) else {
                    return;
                };
                match (slot.width, value) {
                    (StorageWidth::Byte, ImmValue::Literal(v)) => {
                        self.emit(
                            "ld",
                            &[self.indexed(slot.offset, 0), Operand::Imm(ImmValue::Literal(v))],
                            node.span,
                            false,
                        );
                    }
                    (StorageWidth::Word, ImmValue::Literal(v)) => {
                        if !value_fits_word(v) {
                            self.push_diag(
                                node.span,
                                Severity::Error,
                                CompileError::new(
                                    ErrorKind::Encode,
                                    &format!("ld immediate out of range (-32768..65535): {v}"),
                                    None,
                                ),
                            );
                            return;
                        }
                        self.store_word_literal(slot.offset as i32, (v & 0xFFFF) as u16, node.span);
                    }
                    (_, ImmValue::Symbolic { .. }) => self.semantic(
                        node.span,
                        "Frame slot store requires a constant or register source",
                        Some(&slot.name),
                    ),
                }
            }
            _ => self.semantic(node.span, "Frame slot cannot be used here", Some(&slot.name)),
        }
    }

    fn slot_alu(&mut self, node: &InstructionNode, slot: &SlotUse, implied: usize) {
        if slot.width == StorageWidth::Word {
            self.semantic(
                node.span,
                "ALU on a word frame slot is not supported",
                Some(&slot.name),
            );
            return;
        }
        if implied == 0 {
            let AstOperand::Reg(Reg::A, _) = &node.operands[0] else {
                let msg = format!("{} frame slot source requires destination a", node.mnemonic);
                self.push_diag(
                    node.span,
                    Severity::Error,
                    CompileError::new(ErrorKind::Encode, &msg, None),
                );
                return;
            };
            self.emit(
                &node.mnemonic,
                &[Operand::Reg(Reg::A), self.indexed(slot.offset, 0)],
                node.span,
                false,
            );
        } else {
            self.emit(&node.mnemonic, &[self.indexed(slot.offset, 0)], node.span, false);
        }
    }

    fn slot_incdec(&mut self, node: &InstructionNode, slot: &SlotUse) {
        if slot.width == StorageWidth::Word {
            let msg = format!(
                "{} cannot operate on word frame slot \"{}\"",
                node.mnemonic, slot.name
            );
            self.push_diag(
                node.span,
                Severity::Error,
                CompileError::new(ErrorKind::Semantic, &msg, None),
            );
            return;
        }
        self.emit(&node.mnemonic, &[self.indexed(slot.offset, 0)], node.span, false);
    }

    fn slot_width_error(&mut self, span: Span, slot: &SlotUse) {
        let msg = match slot.width {
            StorageWidth::Byte => format!(
                "Frame slot \"{}\" is a byte; use an 8-bit register",
                slot.name
            ),
            StorageWidth::Word => {
                format!("Frame slot \"{}\" is a word; use bc, de or hl", slot.name)
            }
        };
        self.push_diag(
            span,
            Severity::Error,
            CompileError::new(ErrorKind::Semantic, &msg, None),
        );
    }

    // ---- operand folding -------------------------------------------

    fn fold_operands(&mut self, operands: &[AstOperand]) -> Result<Vec<Operand>, ()> {
        let mut out = Vec::with_capacity(operands.len());
        for op in operands {
            out.push(self.fold_operand(op)?);
        }
        Ok(out)
    }

    fn fold_operand(&mut self, op: &AstOperand) -> Result<Operand, ()> {
        match op {
            AstOperand::Reg(r, _) => Ok(Operand::Reg(*r)),
            AstOperand::Cond(cc, _) => Ok(Operand::Cond(*cc)),
            AstOperand::Indirect(r, _) => Ok(Operand::Indirect(*r)),
            AstOperand::Indexed { base, disp, span } => {
                let disp = match disp {
                    None => 0,
                    Some(expr) => match self.fold_value(expr)? {
                        ImmValue::Literal(v) if (-128..=127).contains(&v) => v as i32,
                        ImmValue::Literal(v) => {
                            self.push_diag(
                                *span,
                                Severity::Error,
                                CompileError::new(
                                    ErrorKind::Encode,
                                    &format!("Indexed displacement out of range (-128..127): {v}"),
                                    None,
                                ),
                            );
                            return Err(());
                        }
                        ImmValue::Symbolic { symbol, .. } => {
                            self.push_diag(
                                *span,
                                Severity::Error,
                                CompileError::new(
                                    ErrorKind::Encode,
                                    "Indexed displacement must be a constant, not the address",
                                    Some(&symbol),
                                ),
                            );
                            return Err(());
                        }
                    },
                };
                Ok(Operand::Indexed { base: *base, disp })
            }
            AstOperand::Mem(expr, _) => Ok(Operand::Mem(self.fold_value(expr)?)),
            AstOperand::Imm(expr, _) => Ok(Operand::Imm(self.fold_value(expr)?)),
        }
    }

    fn fold_value(&mut self, expr: &Expr) -> Result<ImmValue, ()> {
        if self.expand_depth == 0 {
            if let Some((name, exact)) = slot_mention(&self.frame, expr) {
                let msg = if exact {
                    "Frame slot cannot be used here"
                } else {
                    "Frame slot cannot appear in an expression"
                };
                self.semantic(expr.span(), msg, Some(&name));
                return Err(());
            }
        }
        let folded = {
            let envs = self.envs;
            let view = EnvView {
                labels: (self.expand_depth == 0).then_some(&self.label_names),
                func_name: &self.func_name,
                env: &envs[self.cur],
            };
            eval_expr(expr, &view)
        };
        match folded {
            Ok(Value::Literal(v)) => Ok(ImmValue::Literal(v)),
            Ok(Value::Address { symbol, addend }) => Ok(ImmValue::Symbolic { symbol, addend }),
            Err((span, err)) => {
                self.push_diag(span, Severity::Error, err);
                Err(())
            }
        }
    }

    // ---- emission and bookkeeping ----------------------------------

    fn emit(&mut self, mnemonic: &str, ops: &[Operand], span: Span, synthesized: bool) {
        match z80::encode(mnemonic, ops) {
            Ok(enc) => self.append(enc, span, synthesized),
            Err(err) => self.push_diag(span, Severity::Error, err),
        }
    }

    fn emit_jump(&mut self, cc: Option<Cond>, target: &str, span: Span) {
        let mut ops = Vec::with_capacity(2);
        if let Some(cc) = cc {
            ops.push(Operand::Cond(cc));
        }
        ops.push(Operand::Imm(ImmValue::Symbolic {
            symbol: target.to_string(),
            addend: 0,
        }));
        self.emit("jp", &ops, span, true);
    }

    fn append(&mut self, enc: EncodedInstruction, span: Span, synthesized: bool) {
        let span = self.span_override.unwrap_or(span);
        let base = self.bytes.len();
        for fixup in &enc.fixups {
            self.fixups.push(ItemFixup {
                kind: fixup.kind,
                offset: base + fixup.offset,
                symbol: fixup.symbol.clone(),
                addend: fixup.addend,
                span,
            });
        }
        self.records.push(InstrRecord {
            offset: base,
            len: enc.bytes.len(),
            line: span.line,
            depth: self.state,
            synthesized,
        });
        self.bytes.extend_from_slice(&enc.bytes);
        self.state = self.state.apply(enc.delta);
        self.terminated = false;
    }

    fn define_label(&mut self, name: String, span: Span) {
        self.labels.push(CodeLabel {
            name,
            offset: self.bytes.len(),
            span,
        });
    }

    fn fresh_label(&mut self) -> String {
        let n = self.next_label;
        self.next_label += 1;
        format!("{}.__L{n}", self.func_name)
    }

    fn boundary(&mut self, span: Span, subject: &str, required: i32, nonzero: Severity) {
        if let Some(fault) = self.state.fault_against(required) {
            let severity = match fault {
                BoundaryFault::NonZero(_) => nonzero,
                _ => Severity::Error,
            };
            let msg = boundary_message(subject, fault);
            self.push_diag(
                span,
                severity,
                CompileError::new(ErrorKind::Stack, &msg, None),
            );
        }
    }

    fn semantic(&mut self, span: Span, msg: &str, param: Option<&str>) {
        self.push_diag(
            span,
            Severity::Error,
            CompileError::new(ErrorKind::Semantic, msg, param),
        );
    }

    fn error_diag(&self, span: Span, msg: &str, param: Option<&str>) -> Diagnostic {
        Diagnostic::at(
            span,
            Severity::Error,
            CompileError::new(ErrorKind::Semantic, msg, param),
        )
        .with_file(Some(self.file.clone()))
    }

    fn push_diag(&mut self, span: Span, severity: Severity, err: CompileError) {
        let span = self.span_override.unwrap_or(span);
        self.diags
            .push(Diagnostic::at(span, severity, err).with_file(Some(self.file.clone())));
    }
}

fn collect_locals<'b>(body: &'b [Stmt], out: &mut Vec<&'b LocalDecl>) {
    for stmt in body {
        match stmt {
            Stmt::Local(decl) => out.push(decl),
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                collect_locals(then_body, out);
                if let Some(els) = else_body {
                    collect_locals(els, out);
                }
            }
            Stmt::While { body, .. } | Stmt::Repeat { body, .. } => collect_locals(body, out),
            Stmt::Select {
                arms, else_body, ..
            } => {
                for arm in arms {
                    collect_locals(&arm.body, out);
                }
                if let Some(els) = else_body {
                    collect_locals(els, out);
                }
            }
            _ => {}
        }
    }
}

fn collect_labels(
    body: &[Stmt],
    out: &mut BTreeMap<String, Span>,
    diags: &mut Vec<Diagnostic>,
    file: &str,
) {
    for stmt in body {
        match stmt {
            Stmt::Label { name, span } => {
                if out.insert(name.clone(), *span).is_some() {
                    diags.push(
                        Diagnostic::at(
                            *span,
                            Severity::Error,
                            CompileError::new(
                                ErrorKind::Semantic,
                                "Duplicate label in function",
                                Some(name),
                            ),
                        )
                        .with_file(Some(file.to_string())),
                    );
                }
            }
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                collect_labels(then_body, out, diags, file);
                if let Some(els) = else_body {
                    collect_labels(els, out, diags, file);
                }
            }
            Stmt::While { body, .. } | Stmt::Repeat { body, .. } => {
                collect_labels(body, out, diags, file)
            }
            Stmt::Select {
                arms, else_body, ..
            } => {
                for arm in arms {
                    collect_labels(&arm.body, out, diags, file);
                }
                if let Some(els) = else_body {
                    collect_labels(els, out, diags, file);
                }
            }
            _ => {}
        }
    }
}
