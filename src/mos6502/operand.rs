// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Addressing modes and the mode selector for the MOS 6502 family.

use crate::mos6502::{is_accumulator_optional, is_branch_mnemonic, table};
use crate::parser::Expr;

/// Addressing modes of the 6502/6510.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    /// No operand (NOP, RTS, BRK, ...)
    Implied,
    /// Accumulator (ASL A, ROL A, ...)
    Accumulator,
    /// `#$nn` - 8-bit immediate value
    Immediate,
    /// `$nn` - zero page (8-bit address)
    ZeroPage,
    /// `$nn,X` - zero page indexed by X
    ZeroPageX,
    /// `$nn,Y` - zero page indexed by Y
    ZeroPageY,
    /// `$nnnn` - absolute (16-bit address)
    Absolute,
    /// `$nnnn,X` - absolute indexed by X
    AbsoluteX,
    /// `$nnnn,Y` - absolute indexed by Y
    AbsoluteY,
    /// `($nnnn)` - indirect (JMP only)
    Indirect,
    /// `($nn,X)` - indexed indirect
    IndirectX,
    /// `($nn),Y` - indirect indexed
    IndirectY,
    /// Branch offset (8-bit signed)
    Relative,
}

impl AddressMode {
    /// Total instruction size in bytes (opcode included).
    pub fn size(self) -> u8 {
        match self {
            AddressMode::Implied | AddressMode::Accumulator => 1,
            AddressMode::Immediate
            | AddressMode::ZeroPage
            | AddressMode::ZeroPageX
            | AddressMode::ZeroPageY
            | AddressMode::IndirectX
            | AddressMode::IndirectY
            | AddressMode::Relative => 2,
            AddressMode::Absolute
            | AddressMode::AbsoluteX
            | AddressMode::AbsoluteY
            | AddressMode::Indirect => 3,
        }
    }

    /// Human-readable mode name for error messages.
    pub fn name(self) -> &'static str {
        match self {
            AddressMode::Implied => "implied",
            AddressMode::Accumulator => "accumulator",
            AddressMode::Immediate => "immediate",
            AddressMode::ZeroPage => "zero page",
            AddressMode::ZeroPageX => "zero page,X",
            AddressMode::ZeroPageY => "zero page,Y",
            AddressMode::Absolute => "absolute",
            AddressMode::AbsoluteX => "absolute,X",
            AddressMode::AbsoluteY => "absolute,Y",
            AddressMode::Indirect => "indirect",
            AddressMode::IndirectX => "(indirect,X)",
            AddressMode::IndirectY => "(indirect),Y",
            AddressMode::Relative => "relative",
        }
    }
}

/// The zero-page counterpart of an absolute mode, used by the pass-2
/// size-stable re-optimisation.
pub fn zero_page_variant(mode: AddressMode) -> Option<AddressMode> {
    match mode {
        AddressMode::Absolute => Some(AddressMode::ZeroPage),
        AddressMode::AbsoluteX => Some(AddressMode::ZeroPageX),
        AddressMode::AbsoluteY => Some(AddressMode::ZeroPageY),
        _ => None,
    }
}

/// Raw operand shape as collected by the statement parser.
#[derive(Debug, Clone, Default)]
pub struct OperandShape {
    pub expr: Option<Expr>,
    /// `#` prefix
    pub has_hash: bool,
    /// `,X` suffix
    pub has_x_index: bool,
    /// `,Y` suffix
    pub has_y_index: bool,
    /// `( )` wrapper
    pub is_indirect: bool,
}

/// Select the addressing mode from the operand shape and the evaluated
/// operand value. `value_known` is false for unresolved forward references,
/// in which case the zero-page forms are never chosen.
pub fn select_mode(
    mnemonic: &str,
    shape: &OperandShape,
    value: i32,
    value_known: bool,
) -> AddressMode {
    // Branch instructions always use relative addressing
    if is_branch_mnemonic(mnemonic) {
        return AddressMode::Relative;
    }

    if shape.has_hash {
        return AddressMode::Immediate;
    }

    // No operand: accumulator when the mnemonic admits it, else implied
    let expr = match &shape.expr {
        Some(expr) => expr,
        None => {
            if is_accumulator_optional(mnemonic)
                && table::lookup(mnemonic, AddressMode::Accumulator).is_some()
            {
                return AddressMode::Accumulator;
            }
            return AddressMode::Implied;
        }
    };

    // Explicit accumulator operand: `ASL A`
    if let Expr::Symbol(name) = expr {
        if name.eq_ignore_ascii_case("A") && is_accumulator_optional(mnemonic) {
            return AddressMode::Accumulator;
        }
    }

    if shape.is_indirect {
        if shape.has_x_index {
            return AddressMode::IndirectX;
        }
        if shape.has_y_index {
            return AddressMode::IndirectY;
        }
        return AddressMode::Indirect;
    }

    let fits_zp = value_known && (0..=0xff).contains(&value);

    if shape.has_x_index {
        if fits_zp && table::lookup(mnemonic, AddressMode::ZeroPageX).is_some() {
            return AddressMode::ZeroPageX;
        }
        return AddressMode::AbsoluteX;
    }

    if shape.has_y_index {
        if fits_zp && table::lookup(mnemonic, AddressMode::ZeroPageY).is_some() {
            return AddressMode::ZeroPageY;
        }
        return AddressMode::AbsoluteY;
    }

    if fits_zp && table::lookup(mnemonic, AddressMode::ZeroPage).is_some() {
        return AddressMode::ZeroPage;
    }

    AddressMode::Absolute
}
