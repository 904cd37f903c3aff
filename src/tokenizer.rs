// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Tokenizer for ACME-dialect assembly source with spans.
//!
//! The scanner is context-free except for the `+` and `-` characters, which
//! double as anonymous-label markers, macro-call introducers and arithmetic
//! operators. Disambiguation needs a small lookbehind within the current
//! line; it is isolated in [`Tokenizer::scan_plus_run`] and
//! [`Tokenizer::scan_minus_run`].

use crate::text_utils::{hex_digit, is_bin_digit, is_ident_char, is_ident_start, is_space};

/// Source location of a token: byte range, 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Eof,
    Eol,
    /// Numeric literal (decimal, `$` hex or `%` binary), 32-bit signed.
    Number(i32),
    /// Character literal `'c'`, already resolved through escapes.
    Char(i32),
    /// String literal payload as owned bytes.
    String(Vec<u8>),
    Identifier(String),
    /// Local identifier starting with `.`; the dot is part of the text.
    LocalIdent(String),
    /// A run of `+` in label/reference position, carrying the run length.
    AnonForward(u32),
    /// A run of `-` in label/reference position, carrying the run length.
    AnonBackward(u32),
    /// Directive name without the leading `!`, folded to lowercase.
    Directive(String),
    /// Macro call name without the leading `+`.
    MacroCall(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Lt,
    Gt,
    Eq,
    Ne,
    Le,
    Ge,
    Shl,
    Shr,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Hash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TokenizeError {
    pub message: String,
    pub span: Span,
}

pub struct Tokenizer<'a> {
    input: &'a [u8],
    cursor: usize,
    line: u32,
    line_start: usize,
}

impl<'a> Tokenizer<'a> {
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        Self::with_line(source, 1)
    }

    /// Create a tokenizer whose first line is reported as `line`.
    #[must_use]
    pub fn with_line(source: &'a str, line: u32) -> Self {
        Self {
            input: source.as_bytes(),
            cursor: 0,
            line,
            line_start: 0,
        }
    }

    pub fn next_token(&mut self) -> Result<Token, TokenizeError> {
        self.skip_white();

        let start = self.cursor;
        let c = self.current_byte();
        if c == 0 && self.cursor >= self.input.len() {
            return Ok(self.token(TokenKind::Eof, start));
        }
        self.cursor += 1;

        if c == b'\n' {
            let tok = self.token(TokenKind::Eol, start);
            self.line += 1;
            self.line_start = self.cursor;
            return Ok(tok);
        }

        match c {
            b'$' => self.scan_hex(start),
            b'%' if is_bin_digit(self.current_byte()) => self.scan_binary(start),
            b'0'..=b'9' => self.scan_decimal(start),
            b'\'' => self.scan_char(start),
            b'"' => self.scan_string(start),
            _ if is_ident_start(c) => Ok(self.scan_identifier(start)),
            b'.' if is_ident_start(self.current_byte()) => Ok(self.scan_local_ident(start)),
            b'!' if self.current_byte().is_ascii_alphanumeric() => Ok(self.scan_directive(start)),
            b'+' => Ok(self.scan_plus_run(start)),
            b'-' => Ok(self.scan_minus_run(start)),
            b'<' => Ok(match self.current_byte() {
                b'<' => self.take(TokenKind::Shl, start),
                b'=' => self.take(TokenKind::Le, start),
                b'>' => self.take(TokenKind::Ne, start),
                _ => self.token(TokenKind::Lt, start),
            }),
            b'>' => Ok(match self.current_byte() {
                b'>' => self.take(TokenKind::Shr, start),
                b'=' => self.take(TokenKind::Ge, start),
                _ => self.token(TokenKind::Gt, start),
            }),
            b'*' => Ok(self.token(TokenKind::Star, start)),
            b'/' => Ok(self.token(TokenKind::Slash, start)),
            b'%' => Ok(self.token(TokenKind::Percent, start)),
            b'&' => Ok(self.token(TokenKind::Amp, start)),
            b'|' => Ok(self.token(TokenKind::Pipe, start)),
            b'^' => Ok(self.token(TokenKind::Caret, start)),
            b'~' => Ok(self.token(TokenKind::Tilde, start)),
            b'!' => Ok(self.token(TokenKind::Bang, start)),
            b'=' => Ok(self.token(TokenKind::Eq, start)),
            b'(' => Ok(self.token(TokenKind::LParen, start)),
            b')' => Ok(self.token(TokenKind::RParen, start)),
            b'{' => Ok(self.token(TokenKind::LBrace, start)),
            b'}' => Ok(self.token(TokenKind::RBrace, start)),
            b'[' => Ok(self.token(TokenKind::LBracket, start)),
            b']' => Ok(self.token(TokenKind::RBracket, start)),
            b',' => Ok(self.token(TokenKind::Comma, start)),
            b':' => Ok(self.token(TokenKind::Colon, start)),
            b'#' => Ok(self.token(TokenKind::Hash, start)),
            _ => Err(self.error("unexpected character", start)),
        }
    }

    /// Hexadecimal literal after `$`: 1-8 hex digits.
    fn scan_hex(&mut self, start: usize) -> Result<Token, TokenizeError> {
        let mut value: u32 = 0;
        let mut digits = 0;
        while self.current_byte().is_ascii_hexdigit() {
            let c = self.current_byte();
            self.cursor += 1;
            value = (value << 4) | u32::from(hex_digit(c));
            digits += 1;
            if digits > 8 {
                return Err(self.error("hex number too large", start));
            }
        }
        if digits == 0 {
            return Err(self.error("expected hex digits after $", start));
        }
        Ok(self.token(TokenKind::Number(value as i32), start))
    }

    /// Binary literal after `%`: 1-32 bits.
    fn scan_binary(&mut self, start: usize) -> Result<Token, TokenizeError> {
        let mut value: u32 = 0;
        let mut digits = 0;
        while is_bin_digit(self.current_byte()) {
            let c = self.current_byte();
            self.cursor += 1;
            value = (value << 1) | u32::from(c - b'0');
            digits += 1;
            if digits > 32 {
                return Err(self.error("binary number too large", start));
            }
        }
        Ok(self.token(TokenKind::Number(value as i32), start))
    }

    fn scan_decimal(&mut self, start: usize) -> Result<Token, TokenizeError> {
        self.cursor = start;
        let mut value: i32 = 0;
        while self.current_byte().is_ascii_digit() {
            let c = self.current_byte();
            self.cursor += 1;
            value = match value
                .checked_mul(10)
                .and_then(|v| v.checked_add(i32::from(c - b'0')))
            {
                Some(v) => v,
                None => return Err(self.error("decimal number too large", start)),
            };
        }
        Ok(self.token(TokenKind::Number(value), start))
    }

    /// Character literal `'c'` with the shared escape set.
    fn scan_char(&mut self, start: usize) -> Result<Token, TokenizeError> {
        let c = self.current_byte();
        if c == 0 || c == b'\n' {
            return Err(self.error("unterminated character literal", start));
        }
        self.cursor += 1;

        let value = if c == b'\\' {
            let esc = self.current_byte();
            if esc == 0 || esc == b'\n' {
                return Err(self.error("unterminated escape sequence", start));
            }
            self.cursor += 1;
            match escape_value(esc) {
                Some(v) => i32::from(v),
                None => return Err(self.error("unknown escape sequence", start)),
            }
        } else {
            i32::from(c)
        };

        if self.current_byte() != b'\'' {
            return Err(self.error("unterminated character literal", start));
        }
        self.cursor += 1;
        Ok(self.token(TokenKind::Char(value), start))
    }

    fn scan_string(&mut self, start: usize) -> Result<Token, TokenizeError> {
        let mut bytes = Vec::new();
        loop {
            let c = self.current_byte();
            if c == 0 || c == b'\n' {
                return Err(self.error("unterminated string", start));
            }
            if c == b'"' {
                break;
            }
            self.cursor += 1;
            if c == b'\\' {
                let esc = self.current_byte();
                if esc == 0 || esc == b'\n' {
                    return Err(self.error("unterminated string", start));
                }
                self.cursor += 1;
                match escape_value(esc) {
                    Some(v) => bytes.push(v),
                    None => return Err(self.error("unknown escape sequence", start)),
                }
            } else {
                bytes.push(c);
            }
        }
        self.cursor += 1;
        Ok(self.token(TokenKind::String(bytes), start))
    }

    fn scan_identifier(&mut self, start: usize) -> Token {
        while is_ident_char(self.current_byte()) {
            self.cursor += 1;
        }
        let text = self.text(start);
        self.token(TokenKind::Identifier(text), start)
    }

    /// Local label `.name`; the dot is part of the token text.
    fn scan_local_ident(&mut self, start: usize) -> Token {
        while is_ident_char(self.current_byte()) {
            self.cursor += 1;
        }
        let text = self.text(start);
        self.token(TokenKind::LocalIdent(text), start)
    }

    /// Directive after `!`: a letter run, or exactly `08`/`16`/`24`/`32`.
    /// Anything else rewinds and yields the logical-not operator.
    fn scan_directive(&mut self, start: usize) -> Token {
        let first = self.current_byte();
        if is_ident_start(first) {
            while is_ident_char(self.current_byte()) {
                self.cursor += 1;
            }
            let name = self.input[start + 1..self.cursor].to_vec();
            let name = String::from_utf8_lossy(&name).to_ascii_lowercase();
            return self.token(TokenKind::Directive(name), start);
        }

        let digits_start = self.cursor;
        while self.current_byte().is_ascii_digit() {
            self.cursor += 1;
        }
        let digits = &self.input[digits_start..self.cursor];
        if matches!(digits, b"08" | b"16" | b"24" | b"32") {
            let name = String::from_utf8_lossy(digits).to_string();
            return self.token(TokenKind::Directive(name), start);
        }

        // Not a numeric directive - rewind and emit a lone `!`
        self.cursor = digits_start;
        self.token(TokenKind::Bang, start)
    }

    /// Disambiguate a run of `+`. Cases:
    /// - single `+` before an identifier with only spaces (or a label's `:`)
    ///   to the left: macro call;
    /// - single `+` before an identifier elsewhere: additive operator;
    /// - single `+` before a primary-expression starter: additive operator;
    /// - anything else: anonymous-forward token carrying the run length.
    fn scan_plus_run(&mut self, start: usize) -> Token {
        let mut count: u32 = 1;
        while self.current_byte() == b'+' {
            self.cursor += 1;
            count += 1;
        }

        let next = self.current_byte();
        if count == 1 && is_ident_start(next) {
            if self.only_space_or_label_before(start) {
                let name_start = self.cursor;
                while is_ident_char(self.current_byte()) {
                    self.cursor += 1;
                }
                let name = self.input[name_start..self.cursor].to_vec();
                let name = String::from_utf8_lossy(&name).to_string();
                return self.token(TokenKind::MacroCall(name), start);
            }
            return self.token(TokenKind::Plus, start);
        }

        if count == 1
            && (next.is_ascii_digit()
                || matches!(
                    next,
                    b'$' | b'%' | b'(' | b'\'' | b'*' | b'<' | b'>' | b'-' | b'~' | b'!'
                ))
        {
            return self.token(TokenKind::Plus, start);
        }

        self.token(TokenKind::AnonForward(count), start)
    }

    /// Disambiguate a run of `-`: a single `-` directly before something
    /// that can start a primary expression is the subtraction/negation
    /// operator; everything else is an anonymous-backward token.
    fn scan_minus_run(&mut self, start: usize) -> Token {
        let mut count: u32 = 1;
        while self.current_byte() == b'-' {
            self.cursor += 1;
            count += 1;
        }

        let next = self.current_byte();
        if count == 1
            && (next.is_ascii_digit()
                || next == b'$'
                || next == b'%'
                || next == b'('
                || is_ident_start(next))
        {
            return self.token(TokenKind::Minus, start);
        }

        self.token(TokenKind::AnonBackward(count), start)
    }

    /// True when the nearest non-space byte to the left on this line is a
    /// `:` label terminator, or when there is nothing but spaces.
    fn only_space_or_label_before(&self, start: usize) -> bool {
        let mut p = start;
        while p > self.line_start {
            p -= 1;
            let c = self.input[p];
            if c == b':' {
                return true;
            }
            if !is_space(c) {
                return false;
            }
        }
        true
    }

    fn skip_white(&mut self) {
        loop {
            let c = self.current_byte();
            if is_space(c) {
                self.cursor += 1;
            } else if c == b';' {
                while self.current_byte() != 0 && self.current_byte() != b'\n' {
                    self.cursor += 1;
                }
            } else {
                return;
            }
        }
    }

    fn current_byte(&self) -> u8 {
        self.input.get(self.cursor).copied().unwrap_or(0)
    }

    fn text(&self, start: usize) -> String {
        String::from_utf8_lossy(&self.input[start..self.cursor]).to_string()
    }

    fn token(&self, kind: TokenKind, start: usize) -> Token {
        Token {
            kind,
            span: self.span(start),
        }
    }

    fn take(&mut self, kind: TokenKind, start: usize) -> Token {
        self.cursor += 1;
        self.token(kind, start)
    }

    fn span(&self, start: usize) -> Span {
        Span {
            start,
            end: self.cursor,
            line: self.line,
            column: start - self.line_start + 1,
        }
    }

    fn error(&self, message: &str, start: usize) -> TokenizeError {
        TokenizeError {
            message: message.to_string(),
            span: self.span(start),
        }
    }
}

/// Resolve a character escape. Both `\n` and `\r` map to 0x0D, the PETSCII
/// newline.
fn escape_value(esc: u8) -> Option<u8> {
    match esc {
        b'n' => Some(0x0d),
        b'r' => Some(0x0d),
        b't' => Some(0x09),
        b'\\' => Some(b'\\'),
        b'\'' => Some(b'\''),
        b'"' => Some(b'"'),
        b'0' => Some(0),
        _ => None,
    }
}
