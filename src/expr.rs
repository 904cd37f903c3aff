// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Expression evaluation.
//!
//! Evaluation is two-pass aware: a result carries a `defined` flag instead
//! of failing on unresolved forward references, and a `zeropage` hint that
//! drives the zero-page vs. absolute addressing decision.

use crate::parser::{BinaryOp, Expr, UnaryOp};
use crate::symbol_table::{mangle_local, AnonLabels, SymbolFlags, SymbolTable};

/// Result of evaluating an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalResult {
    pub value: i32,
    pub defined: bool,
    pub zeropage: bool,
}

impl EvalResult {
    fn known(value: i32) -> Self {
        Self {
            value,
            defined: true,
            zeropage: (0..=0xff).contains(&value),
        }
    }

    fn undefined() -> Self {
        Self {
            value: 0,
            defined: false,
            zeropage: false,
        }
    }
}

/// Evaluation context: symbol state, anonymous-label tracker, current PC,
/// pass number and active zone.
///
/// The tracker is optional because parse-time evaluation must not move the
/// forward-reference cursor; without a tracker all anonymous references
/// evaluate as undefined.
pub struct EvalContext<'a> {
    pub symbols: &'a SymbolTable,
    pub anon: Option<&'a mut AnonLabels>,
    pub pc: u16,
    pub pass: u8,
    pub zone: Option<&'a str>,
}

/// Evaluate an expression to `{value, defined, zeropage}`.
pub fn eval(expr: &Expr, ctx: &mut EvalContext<'_>) -> EvalResult {
    match expr {
        Expr::Number(value) => EvalResult::known(*value),

        Expr::CurrentPc => EvalResult {
            value: i32::from(ctx.pc),
            defined: true,
            zeropage: ctx.pc <= 0xff,
        },

        Expr::Symbol(name) => eval_symbol(name, ctx),

        Expr::Unary { op, operand } => {
            let operand = eval(operand, ctx);
            let mut result = EvalResult {
                value: apply_unary(*op, operand.value),
                defined: operand.defined,
                zeropage: false,
            };
            result.zeropage = match op {
                // A single byte always fits in the zero page
                UnaryOp::LowByte | UnaryOp::HighByte => true,
                _ => (0..=0xff).contains(&result.value),
            };
            result
        }

        Expr::Binary { op, left, right } => {
            let left = eval(left, ctx);
            let right = eval(right, ctx);
            let value = apply_binary(*op, left.value, right.value);
            EvalResult {
                value,
                defined: left.defined && right.defined,
                zeropage: (0..=0xff).contains(&value),
            }
        }
    }
}

fn eval_symbol(name: &str, ctx: &mut EvalContext<'_>) -> EvalResult {
    // Anonymous forward reference: undefined in pass 1; in pass 2 resolved
    // through the cursor, which advances after each resolution.
    if let Some(count) = name.strip_prefix("__anon_fwd_") {
        let count: u32 = count.parse().unwrap_or(0);
        if ctx.pass == 1 {
            return EvalResult::undefined();
        }
        let Some(anon) = ctx.anon.as_deref_mut() else {
            return EvalResult::undefined();
        };
        let result = match anon.resolve_forward(count) {
            Some(addr) => EvalResult {
                value: i32::from(addr),
                defined: true,
                zeropage: addr <= 0xff,
            },
            None => EvalResult::undefined(),
        };
        anon.advance_forward();
        return result;
    }

    // Anonymous backward reference: resolvable in both passes.
    if let Some(count) = name.strip_prefix("__anon_back_") {
        let count: u32 = count.parse().unwrap_or(0);
        let Some(anon) = ctx.anon.as_deref() else {
            return EvalResult::undefined();
        };
        return match anon.resolve_backward(count) {
            Some(addr) => EvalResult {
                value: i32::from(addr),
                defined: true,
                zeropage: addr <= 0xff,
            },
            None => EvalResult::undefined(),
        };
    }

    // Local labels are mangled with the current zone before lookup.
    let mangled;
    let lookup_name = if name.starts_with('.') {
        mangled = mangle_local(name, ctx.zone);
        mangled.as_str()
    } else {
        name
    };

    match ctx.symbols.lookup(lookup_name) {
        Some(sym) if sym.is_defined() => EvalResult {
            value: sym.value,
            defined: true,
            zeropage: sym.flags.contains(SymbolFlags::ZEROPAGE)
                || (0..=0xff).contains(&sym.value),
        },
        _ => EvalResult::undefined(),
    }
}

/// Apply a unary operator in 32-bit signed arithmetic.
pub fn apply_unary(op: UnaryOp, value: i32) -> i32 {
    match op {
        UnaryOp::Negate => value.wrapping_neg(),
        UnaryOp::Complement => !value,
        UnaryOp::Not => i32::from(value == 0),
        UnaryOp::LowByte => value & 0xff,
        UnaryOp::HighByte => (value >> 8) & 0xff,
    }
}

/// Apply a binary operator in 32-bit signed two's-complement arithmetic.
/// Division and modulo by zero yield 0; `>>` is a logical shift on the
/// unsigned reinterpretation; shift counts are masked to 0-31.
pub fn apply_binary(op: BinaryOp, left: i32, right: i32) -> i32 {
    match op {
        BinaryOp::Add => left.wrapping_add(right),
        BinaryOp::Sub => left.wrapping_sub(right),
        BinaryOp::Mul => left.wrapping_mul(right),
        BinaryOp::Div => {
            if right == 0 {
                0
            } else {
                left.wrapping_div(right)
            }
        }
        BinaryOp::Mod => {
            if right == 0 {
                0
            } else {
                left.wrapping_rem(right)
            }
        }
        BinaryOp::And => left & right,
        BinaryOp::Or => left | right,
        BinaryOp::Xor => left ^ right,
        BinaryOp::Shl => left.wrapping_shl(right as u32),
        BinaryOp::Shr => ((left as u32).wrapping_shr(right as u32)) as i32,
        BinaryOp::Eq => i32::from(left == right),
        BinaryOp::Ne => i32::from(left != right),
        BinaryOp::Lt => i32::from(left < right),
        BinaryOp::Gt => i32::from(left > right),
        BinaryOp::Le => i32::from(left <= right),
        BinaryOp::Ge => i32::from(left >= right),
    }
}
