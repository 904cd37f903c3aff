// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// Symbol table for labels and constants, plus the anonymous-label tracker.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::{self, Write};

/// Symbol attribute bits.
///
/// `FORCE_UPDATE` is a transient request bit: it is honored during
/// [`SymbolTable::define`] and never stored on the symbol itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SymbolFlags(u8);

impl SymbolFlags {
    pub const NONE: SymbolFlags = SymbolFlags(0);
    /// Value committed.
    pub const DEFINED: SymbolFlags = SymbolFlags(1 << 0);
    /// Value fits in 0x00-0xFF and was known to do so at definition.
    pub const ZEROPAGE: SymbolFlags = SymbolFlags(1 << 1);
    /// Defined via `=` outside a loop in pass 1; forbids silent redefinition.
    pub const CONSTANT: SymbolFlags = SymbolFlags(1 << 2);
    /// Has been looked up.
    pub const REFERENCED: SymbolFlags = SymbolFlags(1 << 3);
    /// Local label (name started with `.`).
    pub const LOCAL: SymbolFlags = SymbolFlags(1 << 4);
    pub const EXPORTED: SymbolFlags = SymbolFlags(1 << 5);
    /// Transient request to update even a CONSTANT.
    pub const FORCE_UPDATE: SymbolFlags = SymbolFlags(1 << 6);

    #[must_use]
    pub fn contains(self, other: SymbolFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn without(self, other: SymbolFlags) -> SymbolFlags {
        SymbolFlags(self.0 & !other.0)
    }
}

impl std::ops::BitOr for SymbolFlags {
    type Output = SymbolFlags;

    fn bitor(self, rhs: SymbolFlags) -> SymbolFlags {
        SymbolFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for SymbolFlags {
    fn bitor_assign(&mut self, rhs: SymbolFlags) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    /// Name as first written, used for symbol-file output.
    pub display_name: String,
    pub value: i32,
    pub flags: SymbolFlags,
    pub file: String,
    pub line: u32,
}

impl Symbol {
    pub fn is_defined(&self) -> bool {
        self.flags.contains(SymbolFlags::DEFINED)
    }
}

/// Case-insensitive symbol store keyed by upper-cased name.
#[derive(Debug, Default)]
pub struct SymbolTable {
    entries: HashMap<String, Symbol>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Define or update a symbol.
    ///
    /// - new name: inserted with DEFINED set;
    /// - existing without CONSTANT: value overwritten, flags unioned in;
    /// - existing CONSTANT with FORCE_UPDATE requested: CONSTANT cleared,
    ///   value updated;
    /// - existing CONSTANT otherwise: refused, returns `None`.
    pub fn define(
        &mut self,
        name: &str,
        value: i32,
        flags: SymbolFlags,
        file: &str,
        line: u32,
    ) -> Option<&Symbol> {
        let key = name.to_ascii_uppercase();
        match self.entries.entry(key) {
            Entry::Occupied(occupied) => {
                let sym = occupied.into_mut();
                if sym.flags.contains(SymbolFlags::CONSTANT) {
                    if flags.contains(SymbolFlags::FORCE_UPDATE) {
                        sym.flags = sym.flags.without(SymbolFlags::CONSTANT);
                    } else {
                        return None;
                    }
                }
                sym.value = value;
                sym.flags |= flags.without(SymbolFlags::FORCE_UPDATE) | SymbolFlags::DEFINED;
                Some(sym)
            }
            Entry::Vacant(vacant) => Some(vacant.insert(Symbol {
                display_name: name.to_string(),
                value,
                flags: flags.without(SymbolFlags::FORCE_UPDATE) | SymbolFlags::DEFINED,
                file: file.to_string(),
                line,
            })),
        }
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.entries.get(&name.to_ascii_uppercase())
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.entries.get_mut(&name.to_ascii_uppercase())
    }

    #[must_use]
    pub fn is_defined(&self, name: &str) -> bool {
        self.lookup(name).is_some_and(Symbol::is_defined)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Defined symbols sorted by `(value, name)` ascending. Hash order is
    /// never observable in any output.
    #[must_use]
    pub fn sorted_defined(&self) -> Vec<&Symbol> {
        let mut symbols: Vec<&Symbol> = self
            .entries
            .values()
            .filter(|sym| sym.is_defined())
            .collect();
        symbols.sort_by(|a, b| {
            a.value
                .cmp(&b.value)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        symbols
    }

    /// Write the VICE-compatible symbol file: `al C:%04X .%s` per symbol.
    pub fn write_vice<W: Write>(&self, mut out: W) -> io::Result<()> {
        for sym in self.sorted_defined() {
            writeln!(out, "al C:{:04X} .{}", sym.value as u16, sym.display_name)?;
        }
        Ok(())
    }
}

/// Mangle a local-label name into its canonical form:
/// `<zone>.<name-without-dot>`, or `_global.<name>` when no zone is active.
#[must_use]
pub fn mangle_local(name: &str, zone: Option<&str>) -> String {
    let local = name.strip_prefix('.').unwrap_or(name);
    match zone {
        Some(zone) if !zone.is_empty() => format!("{zone}.{local}"),
        _ => format!("_global.{local}"),
    }
}

/// A recorded anonymous-label position.
#[derive(Debug, Clone)]
pub struct AnonLabel {
    pub address: u16,
    pub file: String,
    pub line: u32,
}

/// Tracker for `+`/`-` anonymous labels.
///
/// Forward references resolve through a cursor that only moves during
/// pass-2 evaluation; between passes the backward list is cleared and the
/// cursor reset while the forward list is preserved, so references resolve
/// to the same positions in both passes.
#[derive(Debug, Default)]
pub struct AnonLabels {
    forward: Vec<AnonLabel>,
    backward: Vec<AnonLabel>,
    forward_index: usize,
}

impl AnonLabels {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_forward(&mut self, address: u16, file: &str, line: u32) {
        self.forward.push(AnonLabel {
            address,
            file: file.to_string(),
            line,
        });
    }

    pub fn define_backward(&mut self, address: u16, file: &str, line: u32) {
        self.backward.push(AnonLabel {
            address,
            file: file.to_string(),
            line,
        });
    }

    /// Resolve `+`, `++`, ... relative to the forward cursor.
    #[must_use]
    pub fn resolve_forward(&self, count: u32) -> Option<u16> {
        if count < 1 {
            return None;
        }
        let index = self.forward_index + count as usize - 1;
        self.forward.get(index).map(|label| label.address)
    }

    /// Resolve `-`, `--`, ... most-recent-first.
    #[must_use]
    pub fn resolve_backward(&self, count: u32) -> Option<u16> {
        if count < 1 {
            return None;
        }
        let index = self.backward.len().checked_sub(count as usize)?;
        self.backward.get(index).map(|label| label.address)
    }

    pub fn advance_forward(&mut self) {
        if self.forward_index < self.forward.len() {
            self.forward_index += 1;
        }
    }

    /// Prepare for the next pass: reset the forward cursor, clear the
    /// backward list, keep the forward list.
    pub fn reset_pass(&mut self) {
        self.forward_index = 0;
        self.backward.clear();
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.backward.clear();
        self.forward_index = 0;
    }
}
