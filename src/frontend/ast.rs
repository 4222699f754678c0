// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! The Zax module tree handed to lowering, plus constant-expression
//! evaluation.

use std::path::PathBuf;

use crate::core::diag::{CompileError, ErrorKind};
use crate::core::span::Span;
use crate::z80::{Cond, Reg};

#[derive(Debug, Clone)]
pub struct Module {
    /// Resolved filesystem path of the source file.
    pub path: PathBuf,
    /// Project-relative forward-slash form used in diagnostics/artifacts.
    pub rel_path: String,
    pub items: Vec<Item>,
}

impl Module {
    pub fn imports(&self) -> impl Iterator<Item = &ImportDecl> {
        self.items.iter().filter_map(|item| match item {
            Item::Import(decl) => Some(decl),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub enum Item {
    Import(ImportDecl),
    Const(ConstDecl),
    Data(DataDecl),
    Var(VarDecl),
    Func(FuncDecl),
    Op(OpDecl),
    Placement(PlacementDirective),
}

#[derive(Debug, Clone)]
pub struct ImportDecl {
    /// Slash-separated module path without the `.zax` extension.
    pub path: String,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ConstDecl {
    pub name: String,
    pub expr: Expr,
    pub exported: bool,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageWidth {
    Byte,
    Word,
}

impl StorageWidth {
    pub fn size(self) -> u16 {
        match self {
            StorageWidth::Byte => 1,
            StorageWidth::Word => 2,
        }
    }
}

/// Scalar or array storage: `byte`, `word`, `byte[n]`, `word[n]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageType {
    pub width: StorageWidth,
    pub count: u16,
}

impl StorageType {
    pub fn byte_size(self) -> u16 {
        self.width.size().saturating_mul(self.count)
    }
}

#[derive(Debug, Clone)]
pub enum DataInit {
    Expr(Expr),
    Str(String, Span),
}

#[derive(Debug, Clone)]
pub struct DataDecl {
    pub name: String,
    pub ty: StorageType,
    pub init: Vec<DataInit>,
    pub exported: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub name: String,
    pub ty: StorageType,
    pub exported: bool,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetType {
    Void,
    Byte,
    Word,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub width: StorageWidth,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: RetType,
    pub body: Vec<Stmt>,
    pub exported: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct OpDecl {
    pub name: String,
    pub body: Vec<Stmt>,
    pub exported: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum PlacementKind {
    At(Expr),
    Align(Expr),
    Section(String),
}

/// `at`/`align`/`section` apply to the next emitted item.
#[derive(Debug, Clone)]
pub struct PlacementDirective {
    pub kind: PlacementKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct LocalDecl {
    pub name: String,
    pub width: StorageWidth,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct SelectArm {
    pub value: Expr,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Instr(InstructionNode),
    Label {
        name: String,
        span: Span,
    },
    Local(LocalDecl),
    If {
        cc: Cond,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
        span: Span,
    },
    While {
        cc: Cond,
        body: Vec<Stmt>,
        span: Span,
    },
    Repeat {
        body: Vec<Stmt>,
        cc: Cond,
        span: Span,
    },
    Select {
        arms: Vec<SelectArm>,
        else_body: Option<Vec<Stmt>>,
        span: Span,
    },
    TypedCall {
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
    OpCall {
        name: String,
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Instr(node) => node.span,
            Stmt::Label { span, .. }
            | Stmt::Local(LocalDecl { span, .. })
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Repeat { span, .. }
            | Stmt::Select { span, .. }
            | Stmt::TypedCall { span, .. }
            | Stmt::OpCall { span, .. } => *span,
        }
    }
}

/// One instruction before encoding: lowercase mnemonic plus parsed
/// operand shapes.
#[derive(Debug, Clone)]
pub struct InstructionNode {
    pub mnemonic: String,
    pub operands: Vec<AstOperand>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum AstOperand {
    Reg(Reg, Span),
    Cond(Cond, Span),
    /// `(bc)`, `(de)`, `(hl)`, `(sp)`, `(c)`.
    Indirect(Reg, Span),
    /// `(ix+d)`, `(iy-d)`; bare `(ix)` carries no displacement expr.
    Indexed {
        base: Reg,
        disp: Option<Expr>,
        span: Span,
    },
    /// `(expr)` absolute memory reference.
    Mem(Expr, Span),
    Imm(Expr, Span),
}

impl AstOperand {
    pub fn span(&self) -> Span {
        match self {
            AstOperand::Reg(_, span)
            | AstOperand::Cond(_, span)
            | AstOperand::Indirect(_, span)
            | AstOperand::Indexed { span, .. }
            | AstOperand::Mem(_, span)
            | AstOperand::Imm(_, span) => *span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Num(i64, Span),
    Sym(String, Span),
    Unary {
        op: UnaryOp,
        inner: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Num(_, span) | Expr::Sym(_, span) => *span,
            Expr::Unary { span, .. } | Expr::Binary { span, .. } => *span,
        }
    }
}

/// What a name resolves to while folding constant expressions.
#[derive(Debug, Clone)]
pub enum ConstBinding {
    /// A `const` with a known value.
    Value(i64),
    /// An addressable symbol; the qualified name survives into a fixup.
    Address(String),
}

/// Name resolution hook for expression evaluation. Lowering implements
/// this over function/module/import scopes.
pub trait ConstEnv {
    fn lookup(&self, name: &str) -> Option<ConstBinding>;
}

/// Result of folding an operand expression: either a literal, or a
/// symbol plus addend that must become a fixup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Literal(i64),
    Address { symbol: String, addend: i64 },
}

pub fn eval_expr(expr: &Expr, env: &dyn ConstEnv) -> Result<Value, (Span, CompileError)> {
    match expr {
        Expr::Num(value, _) => Ok(Value::Literal(*value)),
        Expr::Sym(name, _) => match env.lookup(name) {
            Some(ConstBinding::Value(value)) => Ok(Value::Literal(value)),
            Some(ConstBinding::Address(qualified)) => Ok(Value::Address {
                symbol: qualified,
                addend: 0,
            }),
            // Leave unknown names symbolic; the fixup resolver reports
            // them with the original span if they never materialize.
            None => Ok(Value::Address {
                symbol: name.clone(),
                addend: 0,
            }),
        },
        Expr::Unary { op, inner, span } => {
            let value = eval_expr(inner, env)?;
            apply_unary(*op, value, *span)
        }
        Expr::Binary { op, lhs, rhs, span } => {
            let lhs = eval_expr(lhs, env)?;
            let rhs = eval_expr(rhs, env)?;
            apply_binary(*op, lhs, rhs, *span)
        }
    }
}

fn apply_unary(op: UnaryOp, value: Value, span: Span) -> Result<Value, (Span, CompileError)> {
    match (op, value) {
        (UnaryOp::Neg, Value::Literal(v)) => Ok(Value::Literal(-v)),
        (UnaryOp::Not, Value::Literal(v)) => Ok(Value::Literal(!v)),
        (UnaryOp::Neg, Value::Address { .. }) | (UnaryOp::Not, Value::Address { .. }) => Err((
            span,
            CompileError::new(
                ErrorKind::Semantic,
                "Unary operator cannot be applied to an address symbol",
                None,
            ),
        )),
    }
}

fn apply_binary(
    op: BinaryOp,
    lhs: Value,
    rhs: Value,
    span: Span,
) -> Result<Value, (Span, CompileError)> {
    use Value::{Address, Literal};
    match (op, lhs, rhs) {
        (BinaryOp::Div, Literal(_), Literal(0)) | (BinaryOp::Mod, Literal(_), Literal(0)) => {
            Err((
                span,
                CompileError::new(
                    ErrorKind::Semantic,
                    "Division by zero in constant expression",
                    None,
                ),
            ))
        }
        (op, Literal(a), Literal(b)) => Ok(Literal(match op {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div => a / b,
            BinaryOp::Mod => a % b,
            BinaryOp::And => a & b,
            BinaryOp::Or => a | b,
            BinaryOp::Xor => a ^ b,
            BinaryOp::Shl => a.wrapping_shl(b as u32 & 31),
            BinaryOp::Shr => a.wrapping_shr(b as u32 & 31),
        })),
        (BinaryOp::Add, Address { symbol, addend }, Literal(b)) => Ok(Address {
            symbol,
            addend: addend.wrapping_add(b),
        }),
        (BinaryOp::Add, Literal(a), Address { symbol, addend }) => Ok(Address {
            symbol,
            addend: addend.wrapping_add(a),
        }),
        (BinaryOp::Sub, Address { symbol, addend }, Literal(b)) => Ok(Address {
            symbol,
            addend: addend.wrapping_sub(b),
        }),
        (BinaryOp::Add, Address { .. }, Address { .. })
        | (BinaryOp::Sub, Address { .. }, Address { .. }) => Err((
            span,
            CompileError::new(
                ErrorKind::Semantic,
                "Cannot combine two address symbols in one expression",
                None,
            ),
        )),
        (op, Address { .. }, _) | (op, _, Address { .. }) => Err((
            span,
            CompileError::new(
                ErrorKind::Semantic,
                "Operator not defined for address symbols",
                Some(op.symbol()),
            ),
        )),
    }
}

/// Extended imm8 range: negatives down to -128 share encodings with
/// 128..=255.
pub fn value_fits_byte(value: i64) -> bool {
    (-128..=255).contains(&value)
}

/// Extended imm16 range.
pub fn value_fits_word(value: i64) -> bool {
    (-32768..=65535).contains(&value)
}
