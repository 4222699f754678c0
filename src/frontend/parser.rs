// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Recursive-descent parser for Zax modules. Errors recover at the
//! next statement separator so one run surfaces many problems.

use std::path::Path;

use crate::core::diag::{CompileError, Diagnostic, ErrorKind, Severity};
use crate::core::options::{CaseStyle, CompileOptions};
use crate::core::span::Span;
use crate::frontend::ast::{
    AstOperand, BinaryOp, ConstDecl, DataDecl, DataInit, Expr, FuncDecl, ImportDecl,
    InstructionNode, Item, LocalDecl, Module, OpDecl, Param, PlacementDirective, PlacementKind,
    RetType, SelectArm, Stmt, StorageType, StorageWidth, UnaryOp, VarDecl,
};
use crate::frontend::lexer::Lexer;
use crate::frontend::token::{Token, TokenKind};
use crate::z80::{self, Cond, Reg};

// Structural keywords, lowercase-only and sorted.
const KEYWORDS: &[&str] = &[
    "align", "at", "byte", "case", "const", "data", "else", "end", "export", "func", "if",
    "import", "op", "repeat", "section", "select", "until", "var", "void", "while", "word",
];

/// Symbols may not shadow keywords, mnemonics, registers or condition
/// codes. Keywords match exactly; the others are case-insensitive.
pub fn is_reserved_name(name: &str) -> bool {
    if KEYWORDS.binary_search(&name).is_ok() {
        return true;
    }
    let lower = name.to_ascii_lowercase();
    z80::is_mnemonic(&lower) || Reg::parse(&lower).is_some() || Cond::parse(&lower).is_some()
}

/// Lex and parse one source file into a module plus its diagnostics.
pub fn parse_source(
    path: &Path,
    rel_path: &str,
    text: &str,
    options: &CompileOptions,
) -> (Module, Vec<Diagnostic>) {
    let (tokens, lex_errors) = Lexer::new(text).scan();
    let mut parser = Parser {
        tokens,
        pos: 0,
        diags: Vec::new(),
        options,
        file: rel_path.to_string(),
    };
    for (span, error) in lex_errors {
        parser.diags.push(
            Diagnostic::at(span, Severity::Error, error).with_file(Some(rel_path.to_string())),
        );
    }
    let items = parser.parse_items();
    (
        Module {
            path: path.to_path_buf(),
            rel_path: rel_path.to_string(),
            items,
        },
        parser.diags,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyEnd {
    End,
    Else,
    Until,
    Case,
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    diags: Vec<Diagnostic>,
    options: &'a CompileOptions,
    file: String,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek_kind_ahead(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos + 1).map(|t| t.kind)
    }

    fn bump(&mut self) -> Token {
        let tok = self.peek().clone();
        if !tok.is(TokenKind::Eof) {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: TokenKind) -> Option<Token> {
        if self.peek().is(kind) {
            Some(self.bump())
        } else {
            None
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> Option<Token> {
        if self.peek().is_keyword(kw) {
            Some(self.bump())
        } else {
            None
        }
    }

    fn at_eof(&self) -> bool {
        self.peek().is(TokenKind::Eof)
    }

    fn describe(tok: &Token) -> String {
        match tok.kind {
            TokenKind::Ident => format!("\"{}\"", tok.text),
            TokenKind::Number => format!("number {}", tok.text),
            TokenKind::Str => "string literal".to_string(),
            TokenKind::Separator => "end of line".to_string(),
            TokenKind::Eof => "end of file".to_string(),
            _ => format!("\"{}\"", tok.text),
        }
    }

    fn push_diag(&mut self, span: Span, severity: Severity, kind: ErrorKind, msg: &str) {
        self.diags.push(
            Diagnostic::at(span, severity, CompileError::new(kind, msg, None))
                .with_file(Some(self.file.clone())),
        );
    }

    fn parser_error(&mut self, span: Span, msg: String) {
        self.push_diag(span, Severity::Error, ErrorKind::Parser, &msg);
    }

    fn semantic_error(&mut self, span: Span, msg: String) {
        self.push_diag(span, Severity::Error, ErrorKind::Semantic, &msg);
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, ()> {
        if self.peek().is(kind) {
            Ok(self.bump())
        } else {
            let tok = self.peek().clone();
            self.parser_error(
                tok.span,
                format!("Expected {what}, found {}", Self::describe(&tok)),
            );
            Err(())
        }
    }

    fn skip_separators(&mut self) {
        while self.peek().is(TokenKind::Separator) {
            self.bump();
        }
    }

    fn sync_to_separator(&mut self) {
        while !matches!(self.peek().kind, TokenKind::Separator | TokenKind::Eof) {
            self.bump();
        }
    }

    fn expect_stmt_end(&mut self) {
        match self.peek().kind {
            TokenKind::Separator => {
                self.bump();
            }
            TokenKind::Eof => {}
            _ => {
                let tok = self.peek().clone();
                self.parser_error(
                    tok.span,
                    format!("Expected end of line, found {}", Self::describe(&tok)),
                );
                self.sync_to_separator();
            }
        }
    }

    /// Warn when a mnemonic/register/condition spelling disagrees with
    /// the configured case style.
    fn lint_case(&mut self, what: &str, text: &str, span: Span) {
        let style = match self.options.case_style {
            CaseStyle::Off => return,
            CaseStyle::Lower => {
                if !text.chars().any(|c| c.is_ascii_uppercase()) {
                    return;
                }
                "lower"
            }
            CaseStyle::Upper => {
                if !text.chars().any(|c| c.is_ascii_lowercase()) {
                    return;
                }
                "upper"
            }
        };
        let msg = format!("{what} case differs from configured {style} style: {text}");
        self.push_diag(span, Severity::Warning, ErrorKind::Parser, &msg);
    }

    fn check_decl_name(&mut self, tok: &Token, what: &str) {
        if tok.text.starts_with("__") {
            self.semantic_error(
                tok.span,
                format!("Names starting with __ are reserved: {}", tok.text),
            );
        } else if is_reserved_name(&tok.text) {
            self.semantic_error(
                tok.span,
                format!("Reserved name cannot be used for a {what}: {}", tok.text),
            );
        }
    }

    // ---- items ----

    fn parse_items(&mut self) -> Vec<Item> {
        let mut items = Vec::new();
        loop {
            self.skip_separators();
            if self.at_eof() {
                break;
            }
            let start = self.pos;
            match self.parse_item() {
                Ok(item) => {
                    items.push(item);
                    self.expect_stmt_end();
                }
                Err(()) => self.sync_to_separator(),
            }
            if self.pos == start {
                // Never stall on an unconsumed token.
                self.bump();
            }
        }
        items
    }

    fn parse_item(&mut self) -> Result<Item, ()> {
        let export_tok = self.eat_keyword("export");
        let exported = export_tok.is_some();
        let tok = self.peek().clone();
        if tok.is_keyword("import") {
            if let Some(exp) = &export_tok {
                self.parser_error(exp.span, "export cannot be applied to import".to_string());
            }
            return self.parse_import().map(Item::Import);
        }
        if tok.is_keyword("const") {
            return self.parse_const(exported).map(Item::Const);
        }
        if tok.is_keyword("data") {
            return self.parse_data(exported).map(Item::Data);
        }
        if tok.is_keyword("var") {
            return self.parse_top_var(exported).map(Item::Var);
        }
        if tok.is_keyword("func") {
            return self.parse_func(exported).map(Item::Func);
        }
        if tok.is_keyword("op") {
            return self.parse_op(exported).map(Item::Op);
        }
        if tok.is_keyword("at") || tok.is_keyword("align") || tok.is_keyword("section") {
            if let Some(exp) = &export_tok {
                self.parser_error(
                    exp.span,
                    format!("export cannot be applied to {}", tok.text),
                );
            }
            return self.parse_placement().map(Item::Placement);
        }
        self.parser_error(
            tok.span,
            format!("Expected a declaration, found {}", Self::describe(&tok)),
        );
        Err(())
    }

    fn parse_import(&mut self) -> Result<ImportDecl, ()> {
        let kw = self.bump();
        let first = self.expect(TokenKind::Ident, "a module path")?;
        let mut path = first.text.clone();
        let mut span = kw.span.merge(first.span);
        while self.eat(TokenKind::Slash).is_some() {
            let part = self.expect(TokenKind::Ident, "a module path segment")?;
            path.push('/');
            path.push_str(&part.text);
            span = span.merge(part.span);
        }
        Ok(ImportDecl { path, span })
    }

    fn parse_const(&mut self, exported: bool) -> Result<ConstDecl, ()> {
        let kw = self.bump();
        let name = self.expect(TokenKind::Ident, "a constant name")?;
        self.check_decl_name(&name, "constant");
        self.expect(TokenKind::Eq, "\"=\" after the constant name")?;
        let expr = self.parse_expr()?;
        let span = kw.span.merge(expr.span());
        Ok(ConstDecl {
            name: name.text,
            expr,
            exported,
            span,
        })
    }

    fn parse_data(&mut self, exported: bool) -> Result<DataDecl, ()> {
        let kw = self.bump();
        let name = self.expect(TokenKind::Ident, "a data name")?;
        self.check_decl_name(&name, "data symbol");
        self.expect(TokenKind::Colon, "\":\" after the data name")?;
        let ty = self.parse_storage_type(true)?;
        self.expect(TokenKind::Eq, "\"=\" before the data initializer")?;

        let mut init = Vec::new();
        loop {
            let tok = self.peek().clone();
            if tok.is(TokenKind::Str) {
                self.bump();
                init.push(DataInit::Str(tok.text, tok.span));
            } else {
                init.push(DataInit::Expr(self.parse_expr()?));
            }
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }

        if ty.width == StorageWidth::Word {
            for item in &init {
                if let DataInit::Str(_, span) = item {
                    self.semantic_error(*span, "String initializer requires byte storage".into());
                }
            }
        }
        let implied: usize = init
            .iter()
            .map(|item| match item {
                DataInit::Str(s, _) => s.len(),
                DataInit::Expr(_) => 1,
            })
            .sum();
        if implied != ty.count as usize {
            self.semantic_error(
                name.span,
                format!(
                    "Data initializer has {implied} element(s), declared {}",
                    ty.count
                ),
            );
        }

        Ok(DataDecl {
            name: name.text,
            ty,
            init,
            exported,
            span: kw.span.merge(name.span),
        })
    }

    fn parse_top_var(&mut self, exported: bool) -> Result<VarDecl, ()> {
        let kw = self.bump();
        let name = self.expect(TokenKind::Ident, "a var name")?;
        self.check_decl_name(&name, "var symbol");
        self.expect(TokenKind::Colon, "\":\" after the var name")?;
        let ty = self.parse_storage_type(true)?;
        if let Some(eq) = self.eat(TokenKind::Eq) {
            self.parser_error(
                eq.span,
                "var reserves storage; use data for initialized bytes".to_string(),
            );
            self.sync_to_separator();
        }
        Ok(VarDecl {
            name: name.text,
            ty,
            exported,
            span: kw.span.merge(name.span),
        })
    }

    fn parse_storage_type(&mut self, allow_array: bool) -> Result<StorageType, ()> {
        let tok = self.expect(TokenKind::Ident, "a type (byte or word)")?;
        let width = if tok.is_keyword("byte") {
            StorageWidth::Byte
        } else if tok.is_keyword("word") {
            StorageWidth::Word
        } else {
            self.parser_error(
                tok.span,
                format!("Expected type byte or word, found \"{}\"", tok.text),
            );
            return Err(());
        };
        if self.eat(TokenKind::LBracket).is_none() {
            return Ok(StorageType { width, count: 1 });
        }
        if !allow_array {
            self.semantic_error(tok.span, "Local variables must be scalar byte or word".into());
        }
        let expr = self.parse_expr()?;
        self.expect(TokenKind::RBracket, "\"]\"")?;
        let count = self.fold_count(&expr)?;
        Ok(StorageType { width, count })
    }

    /// Array counts fold without name lookups, so only literal
    /// arithmetic is allowed here.
    fn fold_count(&mut self, expr: &Expr) -> Result<u16, ()> {
        struct NoNames;
        impl crate::frontend::ast::ConstEnv for NoNames {
            fn lookup(&self, _name: &str) -> Option<crate::frontend::ast::ConstBinding> {
                None
            }
        }
        match crate::frontend::ast::eval_expr(expr, &NoNames) {
            Ok(crate::frontend::ast::Value::Literal(v)) if (1..=65535).contains(&v) => Ok(v as u16),
            Ok(crate::frontend::ast::Value::Literal(v)) => {
                self.semantic_error(expr.span(), format!("Array count out of range (1-65535): {v}"));
                Err(())
            }
            Ok(crate::frontend::ast::Value::Address { .. }) => {
                self.semantic_error(expr.span(), "Array count must be a numeric constant".into());
                Err(())
            }
            Err((span, error)) => {
                self.push_diag(span, Severity::Error, error.kind(), error.message());
                Err(())
            }
        }
    }

    fn parse_func(&mut self, exported: bool) -> Result<FuncDecl, ()> {
        let kw = self.bump();
        let name = self.expect(TokenKind::Ident, "a function name")?;
        self.check_decl_name(&name, "function");
        self.expect(TokenKind::LParen, "\"(\" after the function name")?;
        let mut params = Vec::new();
        if !self.peek().is(TokenKind::RParen) {
            loop {
                let pname = self.expect(TokenKind::Ident, "a parameter name")?;
                self.check_decl_name(&pname, "parameter");
                self.expect(TokenKind::Colon, "\":\" after the parameter name")?;
                let ty = self.expect(TokenKind::Ident, "a parameter type")?;
                let width = if ty.is_keyword("byte") {
                    StorageWidth::Byte
                } else if ty.is_keyword("word") {
                    StorageWidth::Word
                } else {
                    self.parser_error(
                        ty.span,
                        format!("Parameter type must be byte or word, found \"{}\"", ty.text),
                    );
                    return Err(());
                };
                params.push(Param {
                    name: pname.text,
                    width,
                    span: pname.span,
                });
                if self.eat(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "\")\" after the parameter list")?;
        let ret = if self.eat(TokenKind::Colon).is_some() {
            let ty = self.expect(TokenKind::Ident, "a return type")?;
            if ty.is_keyword("void") {
                RetType::Void
            } else if ty.is_keyword("byte") {
                RetType::Byte
            } else if ty.is_keyword("word") {
                RetType::Word
            } else {
                self.parser_error(
                    ty.span,
                    format!("Return type must be void, byte or word, found \"{}\"", ty.text),
                );
                RetType::Void
            }
        } else {
            RetType::Void
        };
        let (body, _) = self.parse_body("func", kw.span, &[BodyEnd::End]);
        Ok(FuncDecl {
            name: name.text,
            params,
            ret,
            body,
            exported,
            span: kw.span.merge(name.span),
        })
    }

    fn parse_op(&mut self, exported: bool) -> Result<OpDecl, ()> {
        let kw = self.bump();
        let name = self.expect(TokenKind::Ident, "an op name")?;
        self.check_decl_name(&name, "op");
        let (body, _) = self.parse_body("op", kw.span, &[BodyEnd::End]);
        self.reject_in_op(&body);
        Ok(OpDecl {
            name: name.text,
            body,
            exported,
            span: kw.span.merge(name.span),
        })
    }

    /// Ops expand at many sites; anything that defines a symbol or a
    /// frame slot cannot live inside one.
    fn reject_in_op(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            match stmt {
                Stmt::Label { name, span } => self.semantic_error(
                    *span,
                    format!("Labels are not allowed inside op: {name}"),
                ),
                Stmt::Local(local) => {
                    self.semantic_error(local.span, "Locals are not allowed inside op".into())
                }
                Stmt::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    self.reject_in_op(then_body);
                    if let Some(body) = else_body {
                        self.reject_in_op(body);
                    }
                }
                Stmt::While { body, .. } | Stmt::Repeat { body, .. } => self.reject_in_op(body),
                Stmt::Select {
                    arms, else_body, ..
                } => {
                    for arm in arms {
                        self.reject_in_op(&arm.body);
                    }
                    if let Some(body) = else_body {
                        self.reject_in_op(body);
                    }
                }
                _ => {}
            }
        }
    }

    fn parse_placement(&mut self) -> Result<PlacementDirective, ()> {
        let kw = self.bump();
        let kind = if kw.is_keyword("at") {
            PlacementKind::At(self.parse_expr()?)
        } else if kw.is_keyword("align") {
            PlacementKind::Align(self.parse_expr()?)
        } else {
            let name = self.expect(TokenKind::Ident, "a section name")?;
            PlacementKind::Section(name.text)
        };
        Ok(PlacementDirective { kind, span: kw.span })
    }

    // ---- statements ----

    fn parse_body(&mut self, construct: &str, open: Span, allowed: &[BodyEnd]) -> (Vec<Stmt>, BodyEnd) {
        let mut stmts = Vec::new();
        loop {
            self.skip_separators();
            let tok = self.peek().clone();
            if tok.is(TokenKind::Eof) {
                self.parser_error(open, format!("Unterminated {construct}: missing end"));
                return (stmts, BodyEnd::End);
            }
            let ends = [
                ("end", BodyEnd::End),
                ("else", BodyEnd::Else),
                ("until", BodyEnd::Until),
                ("case", BodyEnd::Case),
            ];
            if let Some(&(kw, end)) = ends.iter().find(|(kw, _)| tok.is_keyword(kw)) {
                self.bump();
                if allowed.contains(&end) {
                    return (stmts, end);
                }
                self.parser_error(tok.span, format!("Unexpected {kw} in {construct}"));
                continue;
            }
            match self.parse_stmt() {
                Ok(stmt) => {
                    stmts.push(stmt);
                    self.expect_stmt_end();
                }
                Err(()) => self.sync_to_separator(),
            }
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ()> {
        let tok = self.peek().clone();
        if !tok.is(TokenKind::Ident) {
            self.parser_error(
                tok.span,
                format!("Expected a statement, found {}", Self::describe(&tok)),
            );
            return Err(());
        }
        if tok.is_keyword("var") {
            return self.parse_local();
        }
        if tok.is_keyword("if") {
            return self.parse_if();
        }
        if tok.is_keyword("while") {
            return self.parse_while();
        }
        if tok.is_keyword("repeat") {
            return self.parse_repeat();
        }
        if tok.is_keyword("select") {
            return self.parse_select();
        }

        // A trailing colon always means a label, even when the name is
        // reserved; the name check reports that case.
        if self.peek_kind_ahead() == Some(TokenKind::Colon) {
            self.bump();
            self.bump();
            self.check_decl_name(&tok, "label");
            return Ok(Stmt::Label {
                name: tok.text,
                span: tok.span,
            });
        }

        let lower = tok.text.to_ascii_lowercase();
        if z80::is_mnemonic(&lower) {
            self.lint_case("Mnemonic", &tok.text, tok.span);
            return self.parse_instruction(lower);
        }

        if self.peek_kind_ahead() == Some(TokenKind::LParen) {
            return self.parse_typed_call();
        }

        self.bump();
        Ok(Stmt::OpCall {
            name: tok.text,
            span: tok.span,
        })
    }

    fn parse_local(&mut self) -> Result<Stmt, ()> {
        let kw = self.bump();
        let name = self.expect(TokenKind::Ident, "a local name")?;
        self.check_decl_name(&name, "local variable");
        self.expect(TokenKind::Colon, "\":\" after the local name")?;
        let ty = self.parse_storage_type(false)?;
        let init = if self.eat(TokenKind::Eq).is_some() {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(Stmt::Local(LocalDecl {
            name: name.text,
            width: ty.width,
            init,
            span: kw.span.merge(name.span),
        }))
    }

    fn parse_cond(&mut self) -> Result<Cond, ()> {
        let tok = self.expect(TokenKind::Ident, "a condition code")?;
        match Cond::parse(&tok.text.to_ascii_lowercase()) {
            Some(cc) => {
                self.lint_case("Condition", &tok.text, tok.span);
                Ok(cc)
            }
            None => {
                self.parser_error(
                    tok.span,
                    format!(
                        "Expected a condition code (nz z nc c po pe p m), found \"{}\"",
                        tok.text
                    ),
                );
                Err(())
            }
        }
    }

    fn parse_if(&mut self) -> Result<Stmt, ()> {
        let kw = self.bump();
        let cc = self.parse_cond()?;
        let (then_body, end) = self.parse_body("if", kw.span, &[BodyEnd::Else, BodyEnd::End]);
        let else_body = if end == BodyEnd::Else {
            let (body, _) = self.parse_body("else", kw.span, &[BodyEnd::End]);
            Some(body)
        } else {
            None
        };
        Ok(Stmt::If {
            cc,
            then_body,
            else_body,
            span: kw.span,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ()> {
        let kw = self.bump();
        let cc = self.parse_cond()?;
        let (body, _) = self.parse_body("while", kw.span, &[BodyEnd::End]);
        Ok(Stmt::While {
            cc,
            body,
            span: kw.span,
        })
    }

    fn parse_repeat(&mut self) -> Result<Stmt, ()> {
        let kw = self.bump();
        let (body, _) = self.parse_body("repeat", kw.span, &[BodyEnd::Until]);
        let cc = self.parse_cond()?;
        Ok(Stmt::Repeat {
            body,
            cc,
            span: kw.span,
        })
    }

    fn parse_select(&mut self) -> Result<Stmt, ()> {
        let kw = self.bump();
        let (lead, mut end) = self.parse_body(
            "select",
            kw.span,
            &[BodyEnd::Case, BodyEnd::Else, BodyEnd::End],
        );
        if let Some(first) = lead.first() {
            self.parser_error(
                first.span(),
                "Statements before the first case are not allowed in select".to_string(),
            );
        }
        let mut arms = Vec::new();
        let mut else_body = None;
        while end == BodyEnd::Case {
            let case_span = self.peek().span;
            let value = match self.parse_expr() {
                Ok(expr) => expr,
                Err(()) => {
                    self.sync_to_separator();
                    Expr::Num(0, case_span)
                }
            };
            let (body, next) = self.parse_body(
                "case",
                kw.span,
                &[BodyEnd::Case, BodyEnd::Else, BodyEnd::End],
            );
            arms.push(SelectArm {
                span: value.span(),
                value,
                body,
            });
            end = next;
        }
        if end == BodyEnd::Else {
            let (body, _) = self.parse_body("else", kw.span, &[BodyEnd::End]);
            else_body = Some(body);
        }
        Ok(Stmt::Select {
            arms,
            else_body,
            span: kw.span,
        })
    }

    fn parse_typed_call(&mut self) -> Result<Stmt, ()> {
        let name = self.bump();
        self.bump(); // (
        let mut args = Vec::new();
        if !self.peek().is(TokenKind::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if self.eat(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        let rp = self.expect(TokenKind::RParen, "\")\" after the argument list")?;
        Ok(Stmt::TypedCall {
            name: name.text,
            args,
            span: name.span.merge(rp.span),
        })
    }

    fn parse_instruction(&mut self, mnemonic: String) -> Result<Stmt, ()> {
        let head = self.bump();
        let mut span = head.span;
        let mut operands = Vec::new();
        if !matches!(self.peek().kind, TokenKind::Separator | TokenKind::Eof) {
            loop {
                let allow_cond = operands.is_empty()
                    && matches!(mnemonic.as_str(), "jp" | "jr" | "call" | "ret");
                let op = self.parse_operand(allow_cond)?;
                span = span.merge(op.span());
                operands.push(op);
                if self.eat(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        Ok(Stmt::Instr(InstructionNode {
            mnemonic,
            operands,
            span,
        }))
    }

    fn parse_operand(&mut self, allow_cond: bool) -> Result<AstOperand, ()> {
        let tok = self.peek().clone();
        if tok.is(TokenKind::LParen) {
            return self.parse_paren_operand();
        }
        if tok.is(TokenKind::Ident) {
            let lower = tok.text.to_ascii_lowercase();
            if let Some(reg) = Reg::parse(&lower) {
                self.lint_case("Register", &tok.text, tok.span);
                self.bump();
                return Ok(AstOperand::Reg(reg, tok.span));
            }
            if allow_cond {
                if let Some(cc) = Cond::parse(&lower) {
                    self.lint_case("Condition", &tok.text, tok.span);
                    self.bump();
                    return Ok(AstOperand::Cond(cc, tok.span));
                }
            }
        }
        let expr = self.parse_expr()?;
        let span = expr.span();
        Ok(AstOperand::Imm(expr, span))
    }

    fn parse_paren_operand(&mut self) -> Result<AstOperand, ()> {
        let lp = self.bump();
        let tok = self.peek().clone();
        if tok.is(TokenKind::Ident) {
            if let Some(reg) = Reg::parse(&tok.text.to_ascii_lowercase()) {
                self.lint_case("Register", &tok.text, tok.span);
                self.bump();
                return match reg {
                    Reg::Bc | Reg::De | Reg::Hl | Reg::Sp | Reg::C => {
                        let rp = self.expect(TokenKind::RParen, "\")\"")?;
                        Ok(AstOperand::Indirect(reg, lp.span.merge(rp.span)))
                    }
                    Reg::Ix | Reg::Iy => {
                        if let Some(rp) = self.eat(TokenKind::RParen) {
                            return Ok(AstOperand::Indexed {
                                base: reg,
                                disp: None,
                                span: lp.span.merge(rp.span),
                            });
                        }
                        // Unary minus binds tighter than +, so parsing
                        // the signed remainder keeps ix-2+1 meaning
                        // (-2)+1.
                        let disp = if self.eat(TokenKind::Plus).is_some() {
                            self.parse_expr()?
                        } else if self.peek().is(TokenKind::Minus) {
                            self.parse_expr()?
                        } else {
                            let bad = self.peek().clone();
                            self.parser_error(
                                bad.span,
                                format!(
                                    "Expected + or - displacement after {}, found {}",
                                    reg.name(),
                                    Self::describe(&bad)
                                ),
                            );
                            return Err(());
                        };
                        let rp = self.expect(TokenKind::RParen, "\")\"")?;
                        Ok(AstOperand::Indexed {
                            base: reg,
                            disp: Some(disp),
                            span: lp.span.merge(rp.span),
                        })
                    }
                    other => {
                        self.parser_error(
                            tok.span,
                            format!("({}) is not an addressable form", other.name()),
                        );
                        Err(())
                    }
                };
            }
        }
        let expr = self.parse_expr()?;
        let rp = self.expect(TokenKind::RParen, "\")\"")?;
        Ok(AstOperand::Mem(expr, lp.span.merge(rp.span)))
    }

    // ---- expressions ----

    fn parse_expr(&mut self) -> Result<Expr, ()> {
        self.parse_or()
    }

    fn parse_binary(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, ()>,
        ops: &[(TokenKind, BinaryOp)],
    ) -> Result<Expr, ()> {
        let mut lhs = next(self)?;
        loop {
            let Some(&(_, op)) = ops.iter().find(|(kind, _)| self.peek().is(*kind)) else {
                return Ok(lhs);
            };
            self.bump();
            let rhs = next(self)?;
            let span = lhs.span().merge(rhs.span());
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ()> {
        self.parse_binary(Self::parse_xor, &[(TokenKind::Pipe, BinaryOp::Or)])
    }

    fn parse_xor(&mut self) -> Result<Expr, ()> {
        self.parse_binary(Self::parse_and, &[(TokenKind::Caret, BinaryOp::Xor)])
    }

    fn parse_and(&mut self) -> Result<Expr, ()> {
        self.parse_binary(Self::parse_shift, &[(TokenKind::Amp, BinaryOp::And)])
    }

    fn parse_shift(&mut self) -> Result<Expr, ()> {
        self.parse_binary(
            Self::parse_add,
            &[
                (TokenKind::Shl, BinaryOp::Shl),
                (TokenKind::Shr, BinaryOp::Shr),
            ],
        )
    }

    fn parse_add(&mut self) -> Result<Expr, ()> {
        self.parse_binary(
            Self::parse_mul,
            &[
                (TokenKind::Plus, BinaryOp::Add),
                (TokenKind::Minus, BinaryOp::Sub),
            ],
        )
    }

    fn parse_mul(&mut self) -> Result<Expr, ()> {
        self.parse_binary(
            Self::parse_unary,
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Mod),
            ],
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, ()> {
        if let Some(tok) = self.eat(TokenKind::Minus) {
            let inner = self.parse_unary()?;
            let span = tok.span.merge(inner.span());
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                inner: Box::new(inner),
                span,
            });
        }
        if let Some(tok) = self.eat(TokenKind::Tilde) {
            let inner = self.parse_unary()?;
            let span = tok.span.merge(inner.span());
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                inner: Box::new(inner),
                span,
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ()> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Number => {
                self.bump();
                Ok(Expr::Num(tok.value, tok.span))
            }
            TokenKind::Ident => {
                self.bump();
                Ok(Expr::Sym(tok.text, tok.span))
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen, "\")\"")?;
                Ok(inner)
            }
            _ => {
                self.parser_error(
                    tok.span,
                    format!("Expected an expression, found {}", Self::describe(&tok)),
                );
                Err(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(src: &str) -> (Module, Vec<Diagnostic>) {
        let options = CompileOptions::default();
        parse_source(&PathBuf::from("main.zax"), "main.zax", src, &options)
    }

    fn parse_ok(src: &str) -> Module {
        let (module, diags) = parse(src);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        module
    }

    fn only_func(module: &Module) -> &FuncDecl {
        let mut funcs = module.items.iter().filter_map(|item| match item {
            Item::Func(f) => Some(f),
            _ => None,
        });
        let f = funcs.next().expect("one func");
        assert!(funcs.next().is_none());
        f
    }

    #[test]
    fn parses_an_exported_function() {
        let module = parse_ok("export func main(): void\n  ld a, 1\n  ret\nend\n");
        let func = only_func(&module);
        assert!(func.exported);
        assert_eq!(func.name, "main");
        assert_eq!(func.ret, RetType::Void);
        assert_eq!(func.body.len(), 2);
        match &func.body[0] {
            Stmt::Instr(node) => {
                assert_eq!(node.mnemonic, "ld");
                assert_eq!(node.operands.len(), 2);
            }
            other => panic!("expected instruction, got {other:?}"),
        }
    }

    #[test]
    fn classifies_labels_calls_and_ops() {
        let module = parse_ok(
            "func main(): void\nspin:\n  djnz spin\n  draw(1, 2)\n  cls\nend\n",
        );
        let func = only_func(&module);
        assert!(matches!(&func.body[0], Stmt::Label { name, .. } if name == "spin"));
        assert!(matches!(&func.body[1], Stmt::Instr(_)));
        match &func.body[2] {
            Stmt::TypedCall { name, args, .. } => {
                assert_eq!(name, "draw");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected typed call, got {other:?}"),
        }
        assert!(matches!(&func.body[3], Stmt::OpCall { name, .. } if name == "cls"));
    }

    #[test]
    fn structured_statements_nest() {
        let module = parse_ok(
            "func f(): void\n  if z\n    nop\n  else\n    while nz\n      nop\n    end\n  end\n  repeat\n    nop\n  until c\nend\n",
        );
        let func = only_func(&module);
        match &func.body[0] {
            Stmt::If {
                cc,
                then_body,
                else_body,
                ..
            } => {
                assert_eq!(*cc, Cond::Z);
                assert_eq!(then_body.len(), 1);
                let else_body = else_body.as_ref().expect("else");
                assert!(matches!(&else_body[0], Stmt::While { cc: Cond::Nz, .. }));
            }
            other => panic!("expected if, got {other:?}"),
        }
        assert!(matches!(&func.body[1], Stmt::Repeat { cc: Cond::C, .. }));
    }

    #[test]
    fn select_collects_arms_and_else() {
        let module = parse_ok(
            "func f(): void\n  select\n  case 1\n    nop\n  case 2\n    nop\n  else\n    halt\n  end\nend\n",
        );
        let func = only_func(&module);
        match &func.body[0] {
            Stmt::Select {
                arms, else_body, ..
            } => {
                assert_eq!(arms.len(), 2);
                assert_eq!(else_body.as_ref().map(Vec::len), Some(1));
            }
            other => panic!("expected select, got {other:?}"),
        }
    }

    #[test]
    fn operand_shapes() {
        let module = parse_ok(
            "func f(): void\n  ld a, (ix+2)\n  ld b, (ix-3)\n  ld c, (hl)\n  jp (ix)\n  ld hl, (table+4)\nend\n",
        );
        let func = only_func(&module);
        let instr = |i: usize| match &func.body[i] {
            Stmt::Instr(node) => node,
            other => panic!("expected instr, got {other:?}"),
        };
        assert!(matches!(
            &instr(0).operands[1],
            AstOperand::Indexed { base: Reg::Ix, disp: Some(_), .. }
        ));
        assert!(matches!(
            &instr(3).operands[0],
            AstOperand::Indexed { base: Reg::Ix, disp: None, .. }
        ));
        assert!(matches!(&instr(2).operands[1], AstOperand::Indirect(Reg::Hl, _)));
        assert!(matches!(&instr(4).operands[1], AstOperand::Mem(_, _)));
    }

    #[test]
    fn condition_position_prefers_registers() {
        let module = parse_ok("func f(): void\n  jp c, 5\n  jp po, 5\n  ret nz\nend\n");
        let func = only_func(&module);
        match &func.body[0] {
            Stmt::Instr(node) => {
                assert!(matches!(node.operands[0], AstOperand::Reg(Reg::C, _)))
            }
            other => panic!("{other:?}"),
        }
        match &func.body[1] {
            Stmt::Instr(node) => {
                assert!(matches!(node.operands[0], AstOperand::Cond(Cond::Po, _)))
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn const_data_var_and_import() {
        let module = parse_ok(
            "import gfx/tiles\nexport const Max = 16\ndata msg: byte[6] = \"Hello\", 0\nvar cursor: word\n",
        );
        assert_eq!(module.items.len(), 4);
        assert!(matches!(&module.items[0], Item::Import(i) if i.path == "gfx/tiles"));
        match &module.items[1] {
            Item::Const(c) => assert!(c.exported),
            other => panic!("{other:?}"),
        }
        match &module.items[2] {
            Item::Data(d) => {
                assert_eq!(d.ty.count, 6);
                assert_eq!(d.init.len(), 2);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn data_length_mismatch_is_reported() {
        let (_, diags) = parse("data msg: byte[4] = \"Hello\"\n");
        assert_eq!(diags.len(), 1);
        assert_eq!(
            diags[0].message(),
            "Data initializer has 5 element(s), declared 4"
        );
    }

    #[test]
    fn reserved_names_are_rejected_at_declarations() {
        let (_, diags) = parse("const ld = 5\n");
        assert_eq!(diags.len(), 1);
        assert_eq!(
            diags[0].message(),
            "Reserved name cannot be used for a constant: ld"
        );
        let (_, diags) = parse("func f(): void\n__x:\n  ret\nend\n");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message(), "Names starting with __ are reserved: __x");
    }

    #[test]
    fn case_lint_fires_against_configured_style() {
        let mut options = CompileOptions::default();
        options.case_style = CaseStyle::Lower;
        let (_, diags) = parse_source(
            &PathBuf::from("main.zax"),
            "main.zax",
            "func f(): void\n  LD a, 1\n  ret\nend\n",
            &options,
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity(), Severity::Warning);
        assert_eq!(
            diags[0].message(),
            "Mnemonic case differs from configured lower style: LD"
        );
    }

    #[test]
    fn recovery_continues_after_bad_statements() {
        let (module, diags) = parse(
            "func f(): void\n  ld a,\n  %\n  ret\nend\n",
        );
        assert!(diags.len() >= 2, "expected at least two diagnostics: {diags:?}");
        let func = only_func(&module);
        assert!(func
            .body
            .iter()
            .any(|s| matches!(s, Stmt::Instr(node) if node.mnemonic == "ret")));
    }

    #[test]
    fn unterminated_function_is_reported() {
        let (_, diags) = parse("func f(): void\n  nop\n");
        assert!(diags
            .iter()
            .any(|d| d.message() == "Unterminated func: missing end"));
    }

    #[test]
    fn ops_reject_labels_and_locals() {
        let (_, diags) = parse("op cls\nagain:\n  nop\nend\n");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message(), "Labels are not allowed inside op: again");
    }

    #[test]
    fn negative_displacement_folds_left_of_addition() {
        let module = parse_ok("func f(): void\n  ld a, (ix-2+1)\nend\n");
        let func = only_func(&module);
        let Stmt::Instr(node) = &func.body[0] else {
            panic!("expected instr")
        };
        let AstOperand::Indexed { disp: Some(expr), .. } = &node.operands[1] else {
            panic!("expected indexed")
        };
        let value = crate::frontend::ast::eval_expr(expr, &NoConsts).expect("folds");
        assert_eq!(value, crate::frontend::ast::Value::Literal(-1));
    }

    struct NoConsts;
    impl crate::frontend::ast::ConstEnv for NoConsts {
        fn lookup(&self, _name: &str) -> Option<crate::frontend::ast::ConstBinding> {
            None
        }
    }
}
