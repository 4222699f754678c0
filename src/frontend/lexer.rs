// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Hand-written scanner for Zax source. Line-oriented: newline and `;`
//! both terminate statements; `//` starts a comment.

use crate::core::diag::{CompileError, ErrorKind};
use crate::core::span::Span;
use crate::frontend::token::{Token, TokenKind};

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Scan the whole input. Lexical faults become errors bound to the
    /// offending span; scanning continues on the next line so several
    /// surface per run.
    pub fn scan(mut self) -> (Vec<Token>, Vec<(Span, CompileError)>) {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();
        loop {
            match self.next_token() {
                Ok(tok) => {
                    let done = tok.kind == TokenKind::Eof;
                    tokens.push(tok);
                    if done {
                        break;
                    }
                }
                Err((span, err)) => {
                    errors.push((span, err));
                    self.skip_to_line_end();
                }
            }
        }
        (tokens, errors)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn skip_to_line_end(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == b'\n' {
                break;
            }
            self.bump();
        }
    }

    fn skip_blanks_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') => {
                    self.bump();
                }
                Some(b'/') if self.peek2() == Some(b'/') => {
                    self.skip_to_line_end();
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, (Span, CompileError)> {
        self.skip_blanks_and_comments();
        let line = self.line;
        let col = self.col;
        let make = |kind, text: &str, value| Token {
            kind,
            text: text.to_string(),
            value,
            span: Span::new(line, col, col + text.len().saturating_sub(1)),
        };

        let Some(ch) = self.peek() else {
            return Ok(make(TokenKind::Eof, "", 0));
        };

        match ch {
            b'\n' => {
                self.bump();
                Ok(make(TokenKind::Separator, "\n", 0))
            }
            b';' => {
                self.bump();
                Ok(make(TokenKind::Separator, ";", 0))
            }
            b',' => {
                self.bump();
                Ok(make(TokenKind::Comma, ",", 0))
            }
            b':' => {
                self.bump();
                Ok(make(TokenKind::Colon, ":", 0))
            }
            b'=' => {
                self.bump();
                Ok(make(TokenKind::Eq, "=", 0))
            }
            b'(' => {
                self.bump();
                Ok(make(TokenKind::LParen, "(", 0))
            }
            b')' => {
                self.bump();
                Ok(make(TokenKind::RParen, ")", 0))
            }
            b'[' => {
                self.bump();
                Ok(make(TokenKind::LBracket, "[", 0))
            }
            b']' => {
                self.bump();
                Ok(make(TokenKind::RBracket, "]", 0))
            }
            b'+' => {
                self.bump();
                Ok(make(TokenKind::Plus, "+", 0))
            }
            b'-' => {
                self.bump();
                Ok(make(TokenKind::Minus, "-", 0))
            }
            b'*' => {
                self.bump();
                Ok(make(TokenKind::Star, "*", 0))
            }
            b'/' => {
                self.bump();
                Ok(make(TokenKind::Slash, "/", 0))
            }
            b'&' => {
                self.bump();
                Ok(make(TokenKind::Amp, "&", 0))
            }
            b'|' => {
                self.bump();
                Ok(make(TokenKind::Pipe, "|", 0))
            }
            b'^' => {
                self.bump();
                Ok(make(TokenKind::Caret, "^", 0))
            }
            b'~' => {
                self.bump();
                Ok(make(TokenKind::Tilde, "~", 0))
            }
            b'<' if self.peek2() == Some(b'<') => {
                self.bump();
                self.bump();
                Ok(make(TokenKind::Shl, "<<", 0))
            }
            b'>' if self.peek2() == Some(b'>') => {
                self.bump();
                self.bump();
                Ok(make(TokenKind::Shr, ">>", 0))
            }
            b'"' => self.scan_string(line, col),
            b'\'' => self.scan_char(line, col),
            b'$' => self.scan_number(line, col),
            b'%' => {
                // Binary literal when digits follow, else the modulo
                // operator.
                if matches!(self.peek2(), Some(b'0') | Some(b'1')) {
                    self.scan_number(line, col)
                } else {
                    self.bump();
                    Ok(make(TokenKind::Percent, "%", 0))
                }
            }
            b'0'..=b'9' => self.scan_number(line, col),
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => self.scan_ident(line, col),
            other => {
                self.bump();
                Err((
                    Span::point(line, col),
                    CompileError::new(
                        ErrorKind::Parser,
                        "Unexpected character",
                        Some(&format!("{:?}", other as char)),
                    ),
                ))
            }
        }
    }

    fn scan_ident(&mut self, line: u32, col: usize) -> Result<Token, (Span, CompileError)> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == b'_' {
                self.bump();
            } else {
                break;
            }
        }
        let mut text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        // The alternate accumulator pair is spelled af'.
        if text.eq_ignore_ascii_case("af") && self.peek() == Some(b'\'') {
            self.bump();
            text.push('\'');
        }
        Ok(Token {
            kind: TokenKind::Ident,
            span: Span::new(line, col, col + text.len() - 1),
            value: 0,
            text,
        })
    }

    fn scan_number(&mut self, line: u32, col: usize) -> Result<Token, (Span, CompileError)> {
        let start = self.pos;
        let (radix, digits_from): (u32, usize) = match self.peek() {
            Some(b'$') => {
                self.bump();
                (16, self.pos)
            }
            Some(b'%') => {
                self.bump();
                (2, self.pos)
            }
            Some(b'0') if matches!(self.peek2(), Some(b'x') | Some(b'X')) => {
                self.bump();
                self.bump();
                (16, self.pos)
            }
            Some(b'0') if matches!(self.peek2(), Some(b'b') | Some(b'B')) => {
                self.bump();
                self.bump();
                (2, self.pos)
            }
            _ => (10, self.pos),
        };

        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == b'_' {
                self.bump();
            } else {
                break;
            }
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        let digits: String = self.src[digits_from..self.pos]
            .iter()
            .map(|&b| b as char)
            .filter(|&c| c != '_')
            .collect();
        let span = Span::new(line, col, col + text.len().saturating_sub(1));

        if digits.is_empty() {
            return Err((
                span,
                CompileError::new(ErrorKind::Parser, "Malformed number literal", Some(&text)),
            ));
        }
        let mut value: i64 = 0;
        for c in digits.chars() {
            let Some(d) = c.to_digit(radix) else {
                return Err((
                    span,
                    CompileError::new(ErrorKind::Parser, "Malformed number literal", Some(&text)),
                ));
            };
            value = value * radix as i64 + d as i64;
            if value > 0xFFFF_FFFF {
                return Err((
                    span,
                    CompileError::new(ErrorKind::Parser, "Number literal too large", Some(&text)),
                ));
            }
        }
        Ok(Token {
            kind: TokenKind::Number,
            text,
            value,
            span,
        })
    }

    fn scan_char(&mut self, line: u32, col: usize) -> Result<Token, (Span, CompileError)> {
        self.bump();
        let value = match self.bump() {
            Some(b'\\') => self.unescape(line, col)?,
            Some(b'\'') | Some(b'\n') | None => {
                return Err((
                    Span::point(line, col),
                    CompileError::new(ErrorKind::Parser, "Empty character literal", None),
                ));
            }
            Some(ch) => ch,
        };
        if self.peek() == Some(b'\'') {
            self.bump();
        } else {
            return Err((
                Span::point(line, col),
                CompileError::new(ErrorKind::Parser, "Unterminated character literal", None),
            ));
        }
        Ok(Token {
            kind: TokenKind::Number,
            text: format!("'{}'", value as char),
            value: value as i64,
            span: Span::new(line, col, self.col.saturating_sub(1)),
        })
    }

    fn scan_string(&mut self, line: u32, col: usize) -> Result<Token, (Span, CompileError)> {
        self.bump();
        let mut text = String::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.bump();
                    break;
                }
                Some(b'\n') | None => {
                    return Err((
                        Span::point(line, col),
                        CompileError::new(ErrorKind::Parser, "Unterminated string literal", None),
                    ));
                }
                Some(b'\\') => {
                    self.bump();
                    let b = self.unescape(line, col)?;
                    text.push(b as char);
                }
                Some(ch) => {
                    self.bump();
                    text.push(ch as char);
                }
            }
        }
        Ok(Token {
            kind: TokenKind::Str,
            span: Span::new(line, col, self.col.saturating_sub(1)),
            value: 0,
            text,
        })
    }

    /// Consume the character after a backslash and return the escaped byte.
    fn unescape(&mut self, line: u32, col: usize) -> Result<u8, (Span, CompileError)> {
        match self.bump() {
            Some(b'n') => Ok(b'\n'),
            Some(b't') => Ok(b'\t'),
            Some(b'r') => Ok(b'\r'),
            Some(b'0') => Ok(0),
            Some(b'\\') => Ok(b'\\'),
            Some(b'"') => Ok(b'"'),
            Some(b'\'') => Ok(b'\''),
            other => Err((
                Span::point(line, col),
                CompileError::new(
                    ErrorKind::Parser,
                    "Unknown escape sequence",
                    other.map(|b| format!("\\{}", b as char)).as_deref(),
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let (tokens, errors) = Lexer::new(src).scan();
        assert!(errors.is_empty(), "unexpected lex errors: {errors:?}");
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn scans_instruction_line() {
        let (tokens, errors) = Lexer::new("ld a, 1").scan();
        assert!(errors.is_empty());
        assert_eq!(tokens.len(), 5);
        assert_eq!(tokens[0].text, "ld");
        assert_eq!(tokens[1].text, "a");
        assert_eq!(tokens[2].kind, TokenKind::Comma);
        assert_eq!(tokens[3].value, 1);
        assert_eq!(tokens[4].kind, TokenKind::Eof);
    }

    #[test]
    fn semicolon_and_newline_are_separators() {
        assert_eq!(
            kinds("nop; ret\nnop"),
            vec![
                TokenKind::Ident,
                TokenKind::Separator,
                TokenKind::Ident,
                TokenKind::Separator,
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn number_radix_forms() {
        let (tokens, _) = Lexer::new("255 0xFF $ff %1111_1111 0b11111111 'A'").scan();
        let values: Vec<i64> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Number)
            .map(|t| t.value)
            .collect();
        assert_eq!(values, vec![255, 255, 255, 255, 255, 65]);
    }

    #[test]
    fn percent_without_digits_is_modulo() {
        let (tokens, errors) = Lexer::new("5 % 2").scan();
        assert!(errors.is_empty());
        assert_eq!(tokens[1].kind, TokenKind::Percent);
    }

    #[test]
    fn const_declaration_tokens() {
        assert_eq!(
            kinds("const Max = 16"),
            vec![
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Eq,
                TokenKind::Number,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comment_runs_to_end_of_line() {
        assert_eq!(
            kinds("nop // ld a, 1\nret"),
            vec![
                TokenKind::Ident,
                TokenKind::Separator,
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn af_prime_is_one_identifier() {
        let (tokens, errors) = Lexer::new("ex af, af'").scan();
        assert!(errors.is_empty());
        assert_eq!(tokens[3].text, "af'");
    }

    #[test]
    fn spans_are_one_based() {
        let (tokens, _) = Lexer::new("nop\n  ret").scan();
        assert_eq!(tokens[0].span.line, 1);
        assert_eq!(tokens[0].span.col_start, 1);
        assert_eq!(tokens[2].span.line, 2);
        assert_eq!(tokens[2].span.col_start, 3);
    }

    #[test]
    fn unexpected_character_is_reported_and_skipped() {
        let (tokens, errors) = Lexer::new("nop @ bad\nret").scan();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].1.message().starts_with("Unexpected character"));
        assert!(tokens.iter().any(|t| t.text == "ret"));
    }

    #[test]
    fn string_escapes_decode() {
        let (tokens, errors) = Lexer::new("\"hi\\n\\0\"").scan();
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].text.as_bytes(), b"hi\n\0");
    }
}
