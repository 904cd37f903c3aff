// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// Parser for tokenized assembly source: expressions and statements.

use crate::expr::{self, EvalContext};
use crate::mos6502::{select_mode, table, AddressMode, OperandShape};
use crate::symbol_table::SymbolTable;
use crate::tokenizer::{Token, TokenKind, Tokenizer};

/// Expression tree. Trees are owned by the statement they belong to;
/// cloning is deep.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(i32),
    /// Reference by name. Anonymous references are carried as the synthetic
    /// names `__anon_fwd_<n>` / `__anon_back_<n>`; local references keep
    /// their leading dot until evaluation mangles them.
    Symbol(String),
    /// The `*` current-PC marker.
    CurrentPc,
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Complement,
    Not,
    LowByte,
    HighByte,
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
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

/// A label attached to a statement. The three anonymous/local flags are
/// mutually exclusive.
#[derive(Debug, Clone)]
pub struct LabelInfo {
    pub name: String,
    pub is_local: bool,
    pub is_anon_fwd: bool,
    pub is_anon_back: bool,
}

#[derive(Debug, Clone)]
pub struct InstructionInfo {
    pub mnemonic: String,
    pub mode: AddressMode,
    pub operand: Option<Expr>,
    pub opcode: u8,
    /// Total instruction size committed in pass 1 (1, 2 or 3).
    pub size: u8,
    pub cycles: u8,
    pub page_penalty: bool,
}

#[derive(Debug, Clone)]
pub struct DirectiveInfo {
    /// Directive name without the leading `!`.
    pub name: String,
    pub args: Vec<Expr>,
    pub string_arg: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct AssignmentInfo {
    pub name: String,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub struct MacroCallInfo {
    /// Macro name without the leading `+`.
    pub name: String,
    /// Raw argument texts, one token each, comma-separated at the call site.
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    Empty,
    LabelOnly,
    Instruction(InstructionInfo),
    Directive(DirectiveInfo),
    Assignment(AssignmentInfo),
    MacroCall(MacroCallInfo),
    Error(String),
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    pub label: Option<LabelInfo>,
    pub line: u32,
}

impl Statement {
    fn new(kind: StatementKind, line: u32) -> Self {
        Self {
            kind,
            label: None,
            line,
        }
    }

    /// Directive name when this statement is a directive.
    pub fn directive_name(&self) -> Option<&str> {
        match &self.kind {
            StatementKind::Directive(dir) => Some(dir.name.as_str()),
            _ => None,
        }
    }
}

/// State the parser needs for parse-time operand evaluation: symbols, PC,
/// pass and the active zone. Anonymous references are never resolved at
/// parse time (the tracker cursor must not move), so unresolved ones simply
/// pin the absolute encoding.
pub struct ParseContext<'a> {
    pub symbols: &'a SymbolTable,
    pub pc: u16,
    pub pass: u8,
    pub zone: Option<&'a str>,
}

#[derive(Debug, Clone)]
struct ParseError {
    message: String,
}

impl ParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Parse one logical line into a [`Statement`]. Lexical errors become
/// error statements so the driver can report and continue.
pub fn parse_statement(line: &str, line_num: u32, ctx: &ParseContext<'_>) -> Statement {
    match Parser::from_line(line, line_num) {
        Ok(mut parser) => parser.parse_line(ctx),
        Err(err) => Statement::new(StatementKind::Error(err.message), line_num),
    }
}

/// Single-line statement parser over a pre-scanned token vector.
pub struct Parser<'a> {
    line: &'a str,
    tokens: Vec<Token>,
    index: usize,
    line_num: u32,
}

impl<'a> Parser<'a> {
    pub fn from_line(line: &'a str, line_num: u32) -> Result<Self, crate::tokenizer::TokenizeError> {
        let mut tokenizer = Tokenizer::with_line(line, line_num);
        let mut tokens = Vec::new();
        loop {
            let token = tokenizer.next_token()?;
            if matches!(token.kind, TokenKind::Eof | TokenKind::Eol) {
                break;
            }
            tokens.push(token);
        }
        Ok(Self {
            line,
            tokens,
            index: 0,
            line_num,
        })
    }

    pub fn parse_line(&mut self, ctx: &ParseContext<'_>) -> Statement {
        let line_num = self.line_num;

        if self.tokens.is_empty() {
            return Statement::new(StatementKind::Empty, line_num);
        }

        let mut label: Option<LabelInfo> = None;

        // A leading identifier, local identifier or anonymous marker may be
        // a label, an assignment target, or a mnemonic.
        if let Some(first) = self.peek() {
            let labelish = matches!(
                first.kind,
                TokenKind::Identifier(_)
                    | TokenKind::LocalIdent(_)
                    | TokenKind::AnonForward(_)
                    | TokenKind::AnonBackward(_)
            );
            if labelish {
                let saved = first.clone();
                let name = self.token_text(&saved);
                self.index += 1;

                if self.match_kind(&TokenKind::Colon) {
                    label = Some(make_label(&saved, name));
                } else if self.check_kind(&TokenKind::Eq) {
                    self.index += 1;
                    let mut stmt = self.parse_assignment(name);
                    stmt.line = line_num;
                    return stmt;
                } else if matches!(saved.kind, TokenKind::Identifier(_)) && table::is_mnemonic(&name)
                {
                    let mut stmt = self.parse_instruction(&name, ctx);
                    stmt.line = line_num;
                    return stmt;
                } else {
                    // Label without colon; the rest of the line follows.
                    label = Some(make_label(&saved, name));
                }
            }
        }

        let mut stmt = match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::Directive(name)) => {
                self.index += 1;
                Some(self.parse_directive(name))
            }
            Some(TokenKind::MacroCall(name)) => {
                self.index += 1;
                Some(self.parse_macro_call(name))
            }
            Some(TokenKind::Identifier(name)) => {
                self.index += 1;
                if table::is_mnemonic(&name) {
                    Some(self.parse_instruction(&name, ctx))
                } else {
                    Some(Statement::new(
                        StatementKind::Error(format!(
                            "unknown instruction or directive: {name}"
                        )),
                        self.line_num,
                    ))
                }
            }
            Some(TokenKind::Star) => {
                self.index += 1;
                if self.match_kind(&TokenKind::Eq) {
                    // Origin: `*= expr`, lowered to a directive named `org`
                    match self.parse_expr() {
                        Ok(arg) => Some(Statement::new(
                            StatementKind::Directive(DirectiveInfo {
                                name: "org".to_string(),
                                args: vec![arg],
                                string_arg: None,
                            }),
                            self.line_num,
                        )),
                        Err(err) => Some(Statement::new(
                            StatementKind::Error(err.message),
                            self.line_num,
                        )),
                    }
                } else {
                    Some(Statement::new(
                        StatementKind::Error("expected '=' after '*'".to_string()),
                        self.line_num,
                    ))
                }
            }
            _ => None,
        };

        if stmt.is_none() {
            stmt = Some(if label.is_some() {
                Statement::new(StatementKind::LabelOnly, line_num)
            } else {
                Statement::new(StatementKind::Empty, line_num)
            });
        }

        let mut stmt = stmt.unwrap();
        stmt.line = line_num;
        stmt.label = label;
        // Trailing tokens are consumed silently.
        stmt
    }

    // ---------- statement forms ----------

    fn parse_instruction(&mut self, mnemonic: &str, ctx: &ParseContext<'_>) -> Statement {
        let mnemonic = mnemonic.to_ascii_uppercase();
        let shape = match self.parse_operand(&mnemonic) {
            Ok(shape) => shape,
            Err(err) => {
                return Statement::new(StatementKind::Error(err.message), self.line_num);
            }
        };

        // Evaluate the operand if possible; unresolved forward references
        // leave value_known false.
        let mut value = 0;
        let mut value_known = false;
        if let Some(operand) = &shape.expr {
            let mut eval_ctx = EvalContext {
                symbols: ctx.symbols,
                anon: None,
                pc: ctx.pc,
                pass: ctx.pass,
                zone: ctx.zone,
            };
            let result = expr::eval(operand, &mut eval_ctx);
            value = result.value;
            value_known = result.defined;
        }

        let mode = select_mode(&mnemonic, &shape, value, value_known);

        let entry = match table::lookup(&mnemonic, mode) {
            Some(entry) => entry,
            None => {
                // Unknown forward reference in pass 1: pin the absolute form
                // so the size cannot change in pass 2.
                if !value_known && ctx.pass == 1 {
                    match table::lookup(&mnemonic, AddressMode::Absolute) {
                        Some(entry) => entry,
                        None => {
                            return Statement::new(
                                StatementKind::Error(
                                    "invalid addressing mode for instruction".to_string(),
                                ),
                                self.line_num,
                            );
                        }
                    }
                } else {
                    return Statement::new(
                        StatementKind::Error(
                            "invalid addressing mode for instruction".to_string(),
                        ),
                        self.line_num,
                    );
                }
            }
        };

        Statement::new(
            StatementKind::Instruction(InstructionInfo {
                mnemonic,
                mode: entry.mode,
                operand: shape.expr,
                opcode: entry.opcode,
                size: entry.size,
                cycles: entry.cycles,
                page_penalty: entry.page_penalty,
            }),
            self.line_num,
        )
    }

    /// Operand grammar:
    ///
    /// ```text
    /// operand := '#' expression
    ///          | '(' expression [',' 'X'] ')' [',' 'Y']
    ///          | expression [',' ('X' | 'Y')]
    ///          | e
    /// ```
    fn parse_operand(&mut self, _mnemonic: &str) -> Result<OperandShape, ParseError> {
        let mut shape = OperandShape::default();

        if self.match_kind(&TokenKind::Hash) {
            shape.has_hash = true;
        }

        if !shape.has_hash && self.match_kind(&TokenKind::LParen) {
            shape.is_indirect = true;
            shape.expr = Some(self.parse_expr()?);

            if self.match_kind(&TokenKind::Comma) {
                if self.match_register("X") {
                    shape.has_x_index = true;
                }
            }
            if !self.match_kind(&TokenKind::RParen) {
                return Err(ParseError::new("expected ')'"));
            }
            if self.match_kind(&TokenKind::Comma) {
                if self.match_register("Y") {
                    shape.has_y_index = true;
                }
            }
        } else if !self.at_end() {
            shape.expr = Some(self.parse_expr()?);

            if self.match_kind(&TokenKind::Comma) {
                if self.match_register("X") {
                    shape.has_x_index = true;
                } else if self.match_register("Y") {
                    shape.has_y_index = true;
                }
            }
        }

        Ok(shape)
    }

    fn parse_directive(&mut self, name: String) -> Statement {
        let mut args = Vec::new();
        let mut string_arg = None;

        // `!macro` arguments are a name plus space-separated parameter
        // names; everything else takes a comma-separated expression list.
        let is_macro_directive = name == "macro";

        while !self.at_end() {
            match self.peek().map(|t| t.kind.clone()) {
                Some(TokenKind::String(bytes)) => {
                    string_arg = Some(bytes);
                    self.index += 1;
                }
                Some(TokenKind::Identifier(ident)) if is_macro_directive => {
                    args.push(Expr::Symbol(ident));
                    self.index += 1;
                    self.match_kind(&TokenKind::Comma);
                    continue;
                }
                _ => match self.parse_expr() {
                    Ok(arg) => args.push(arg),
                    Err(err) => {
                        return Statement::new(StatementKind::Error(err.message), self.line_num);
                    }
                },
            }

            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
        }

        Statement::new(
            StatementKind::Directive(DirectiveInfo {
                name,
                args,
                string_arg,
            }),
            self.line_num,
        )
    }

    fn parse_assignment(&mut self, name: String) -> Statement {
        match self.parse_expr() {
            Ok(value) => Statement::new(
                StatementKind::Assignment(AssignmentInfo { name, value }),
                self.line_num,
            ),
            Err(err) => Statement::new(StatementKind::Error(err.message), self.line_num),
        }
    }

    fn parse_macro_call(&mut self, name: String) -> Statement {
        let mut args = Vec::new();
        while !self.at_end() {
            if let Some(token) = self.peek() {
                args.push(self.token_text(token));
            }
            self.index += 1;
            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
        }
        Statement::new(
            StatementKind::MacroCall(MacroCallInfo { name, args }),
            self.line_num,
        )
    }

    // ---------- expression grammar ----------
    //
    // Precedence, lowest to highest: | ^ & comparisons shifts additive
    // multiplicative unary primary. Anonymous-label tokens double as the
    // additive operators, and a backward marker acts as unary negate when a
    // primary expression follows.

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_xor()?;
        while self.match_kind(&TokenKind::Pipe) {
            let right = self.parse_xor()?;
            node = binary(BinaryOp::Or, node, right);
        }
        Ok(node)
    }

    fn parse_xor(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_and()?;
        while self.match_kind(&TokenKind::Caret) {
            let right = self.parse_and()?;
            node = binary(BinaryOp::Xor, node, right);
        }
        Ok(node)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_comparison()?;
        while self.match_kind(&TokenKind::Amp) {
            let right = self.parse_comparison()?;
            node = binary(BinaryOp::And, node, right);
        }
        Ok(node)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_shift()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Eq) => BinaryOp::Eq,
                Some(TokenKind::Ne) => BinaryOp::Ne,
                Some(TokenKind::Le) => BinaryOp::Le,
                Some(TokenKind::Ge) => BinaryOp::Ge,
                Some(TokenKind::Lt) => BinaryOp::Lt,
                Some(TokenKind::Gt) => BinaryOp::Gt,
                _ => break,
            };
            self.index += 1;
            let right = self.parse_shift()?;
            node = binary(op, node, right);
        }
        Ok(node)
    }

    fn parse_shift(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_additive()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Shl) => BinaryOp::Shl,
                Some(TokenKind::Shr) => BinaryOp::Shr,
                _ => break,
            };
            self.index += 1;
            let right = self.parse_additive()?;
            node = binary(op, node, right);
        }
        Ok(node)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_multiplicative()?;
        loop {
            // Anonymous-label tokens act as the additive operators when
            // preceded by a value.
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Plus) | Some(TokenKind::AnonForward(_)) => BinaryOp::Add,
                Some(TokenKind::Minus) | Some(TokenKind::AnonBackward(_)) => BinaryOp::Sub,
                _ => break,
            };
            self.index += 1;
            let right = self.parse_multiplicative()?;
            node = binary(op, node, right);
        }
        Ok(node)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_unary()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Star) => BinaryOp::Mul,
                Some(TokenKind::Slash) => BinaryOp::Div,
                Some(TokenKind::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.index += 1;
            let right = self.parse_unary()?;
            node = binary(op, node, right);
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Minus) => Some(UnaryOp::Negate),
            Some(TokenKind::AnonBackward(_)) => {
                // Unary negate only when a primary expression follows;
                // otherwise this is an anonymous-label reference.
                if self
                    .tokens
                    .get(self.index + 1)
                    .is_some_and(|t| is_primary_start(&t.kind))
                {
                    Some(UnaryOp::Negate)
                } else {
                    None
                }
            }
            Some(TokenKind::Tilde) => Some(UnaryOp::Complement),
            Some(TokenKind::Bang) => Some(UnaryOp::Not),
            Some(TokenKind::Lt) => Some(UnaryOp::LowByte),
            Some(TokenKind::Gt) => Some(UnaryOp::HighByte),
            _ => None,
        };

        if let Some(op) = op {
            self.index += 1;
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let Some(token) = self.peek() else {
            return Err(ParseError::new("expected expression"));
        };
        let kind = token.kind.clone();
        self.index += 1;
        match kind {
            TokenKind::Number(value) | TokenKind::Char(value) => Ok(Expr::Number(value)),
            TokenKind::Identifier(name) => Ok(Expr::Symbol(name)),
            TokenKind::LocalIdent(name) => Ok(Expr::Symbol(name)),
            TokenKind::Star => Ok(Expr::CurrentPc),
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                if !self.match_kind(&TokenKind::RParen) {
                    return Err(ParseError::new("expected ')'"));
                }
                Ok(inner)
            }
            TokenKind::AnonForward(count) => Ok(Expr::Symbol(format!("__anon_fwd_{count}"))),
            TokenKind::AnonBackward(count) => Ok(Expr::Symbol(format!("__anon_back_{count}"))),
            _ => Err(ParseError::new("expected expression")),
        }
    }

    // ---------- token helpers ----------

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    fn at_end(&self) -> bool {
        self.index >= self.tokens.len()
    }

    fn check_kind(&self, kind: &TokenKind) -> bool {
        self.peek().is_some_and(|t| &t.kind == kind)
    }

    fn match_kind(&mut self, kind: &TokenKind) -> bool {
        if self.check_kind(kind) {
            self.index += 1;
            return true;
        }
        false
    }

    /// Consume an `X`/`Y` register name (case-insensitive).
    fn match_register(&mut self, register: &str) -> bool {
        if let Some(Token {
            kind: TokenKind::Identifier(name),
            ..
        }) = self.peek()
        {
            if name.eq_ignore_ascii_case(register) {
                self.index += 1;
                return true;
            }
        }
        false
    }

    /// Source text of a token, sliced out of the line by span.
    fn token_text(&self, token: &Token) -> String {
        self.line
            .get(token.span.start..token.span.end)
            .unwrap_or("")
            .to_string()
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn is_primary_start(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Number(_)
            | TokenKind::Char(_)
            | TokenKind::Identifier(_)
            | TokenKind::LocalIdent(_)
            | TokenKind::Star
            | TokenKind::LParen
    )
}

fn make_label(token: &Token, name: String) -> LabelInfo {
    LabelInfo {
        name,
        is_local: matches!(token.kind, TokenKind::LocalIdent(_)),
        is_anon_fwd: matches!(token.kind, TokenKind::AnonForward(_)),
        is_anon_back: matches!(token.kind, TokenKind::AnonBackward(_)),
    }
}
