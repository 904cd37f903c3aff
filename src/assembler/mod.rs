// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Two-pass assembler driver.
//!
//! Pass 1 parses the source line by line, defines symbols, executes macros,
//! loops, conditionals and includes, and records every surviving statement
//! together with its virtual address and zone. Pass 2 replays the recorded
//! statements in order, resolves the remaining references and emits bytes
//! into the memory image.
//!
//! All mutable assembly state lives on [`Assembler`]; everything below the
//! driver is a pure function over its inputs.

pub mod cli;
pub mod conditional;
mod directives;
pub mod encoding;
pub mod error;
pub mod listing;
pub mod macros;
#[cfg(test)]
mod tests;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::expr::{self, EvalContext, EvalResult};
use crate::imagestore::ImageStore;
use crate::mos6502::{table, zero_page_variant, CpuType};
use crate::parser::{
    parse_statement, AssignmentInfo, DirectiveInfo, Expr, InstructionInfo, LabelInfo,
    ParseContext, Statement, StatementKind,
};
use crate::symbol_table::{AnonLabels, SymbolFlags, SymbolTable};

use conditional::ConditionalStack;
use error::{AsmError, AsmErrorKind, Diagnostic, Severity};
use macros::{substitute_loop_var, substitute_params, MacroTable, MAX_MACRO_DEPTH};

pub use cli::{run, VERSION};
pub use error::{AsmRunError, AsmRunReport};

/// Default origin: the C64 BASIC start.
pub const DEFAULT_ORG: u16 = 0x0801;
/// Per-pass error cap; the pass stops cooperatively once reached.
pub const MAX_ERRORS: u32 = 100;
pub const MAX_WARNINGS: u32 = 100;
pub const MAX_INCLUDE_DEPTH: usize = 32;
pub const MAX_LOOP_DEPTH: usize = 64;
/// Safety cap for `!while`.
pub const MAX_WHILE_ITERATIONS: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Two-byte little-endian load address, then the image.
    #[default]
    Prg,
    /// The image without a header.
    Raw,
}

/// One statement that survived pass 1, with everything pass 2 and the
/// listing writer need.
#[derive(Debug, Clone)]
pub(crate) struct AssembledLine {
    pub(crate) stmt: Statement,
    /// Virtual PC at the start of the line.
    pub(crate) address: u16,
    /// Original source text, for listings. Macro and loop bodies carry none.
    pub(crate) source: Option<String>,
    /// Zone active when the line was recorded.
    pub(crate) zone: Option<String>,
    /// First up to 8 bytes emitted in pass 2.
    pub(crate) bytes: Vec<u8>,
    pub(crate) cycles: u8,
    pub(crate) page_penalty: bool,
}

struct IncludeFrame {
    #[allow(dead_code)]
    file: String,
    #[allow(dead_code)]
    line: u32,
}

/// The assembler: all process-wide state of a two-pass run.
pub struct Assembler {
    image: ImageStore,
    symbols: SymbolTable,
    anon: AnonLabels,
    zone: Option<String>,
    zone_counter: u32,
    macros: MacroTable,
    macro_depth: usize,
    macro_unique_counter: u32,
    include_paths: Vec<PathBuf>,
    include_stack: Vec<IncludeFrame>,
    cond: ConditionalStack,
    loop_depth: usize,
    pc: u16,
    real_pc: u16,
    in_pseudopc: bool,
    org: u16,
    pass: u8,
    errors: u32,
    warnings: u32,
    diagnostics: Vec<Diagnostic>,
    lines: Vec<AssembledLine>,
    current_file: String,
    current_line: u32,
    cpu: CpuType,
    cmdline_defines: Vec<String>,
    pub format: OutputFormat,
    pub verbose: bool,
    pub show_cycles: bool,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            image: ImageStore::new(),
            symbols: SymbolTable::new(),
            anon: AnonLabels::new(),
            zone: None,
            zone_counter: 0,
            macros: MacroTable::new(),
            macro_depth: 0,
            macro_unique_counter: 0,
            include_paths: Vec::new(),
            include_stack: Vec::new(),
            cond: ConditionalStack::new(),
            loop_depth: 0,
            pc: DEFAULT_ORG,
            real_pc: DEFAULT_ORG,
            in_pseudopc: false,
            org: DEFAULT_ORG,
            pass: 1,
            errors: 0,
            warnings: 0,
            diagnostics: Vec::new(),
            lines: Vec::new(),
            current_file: "<input>".to_string(),
            current_line: 0,
            cpu: CpuType::default(),
            cmdline_defines: Vec::new(),
            format: OutputFormat::default(),
            verbose: false,
            show_cycles: false,
        }
    }

    /// Reset all per-assembly state. Command-line defines are re-applied.
    pub fn reset(&mut self) {
        self.image.clear();
        self.symbols.clear();
        self.anon.clear();
        self.zone = None;
        self.zone_counter = 0;
        self.macros.clear();
        self.macro_depth = 0;
        self.macro_unique_counter = 0;
        self.include_stack.clear();
        self.cond.clear();
        self.loop_depth = 0;
        self.pc = DEFAULT_ORG;
        self.real_pc = DEFAULT_ORG;
        self.in_pseudopc = false;
        self.org = DEFAULT_ORG;
        self.pass = 1;
        self.errors = 0;
        self.warnings = 0;
        self.diagnostics.clear();
        self.lines.clear();
        self.current_line = 0;

        let defines = self.cmdline_defines.clone();
        for definition in &defines {
            let _ = self.apply_define(definition);
        }
    }

    // ---------- accessors ----------

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn image(&self) -> &ImageStore {
        &self.image
    }

    pub fn cpu(&self) -> CpuType {
        self.cpu
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn error_count(&self) -> u32 {
        self.errors
    }

    pub fn warning_count(&self) -> u32 {
        self.warnings
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Convenience lookup of a defined symbol's value.
    pub fn symbol_value(&self, name: &str) -> Option<i32> {
        self.symbols
            .lookup(name)
            .filter(|sym| sym.is_defined())
            .map(|sym| sym.value)
    }

    /// The emitted image: `(lowest_addr, bytes)`, or `None` when nothing
    /// was written.
    pub fn output(&self) -> Option<(u16, &[u8])> {
        self.image.output_slice()
    }

    // ---------- diagnostics ----------

    fn report_error(&mut self, kind: AsmErrorKind, message: impl Into<String>) {
        if self.errors >= MAX_ERRORS {
            return;
        }
        self.diagnostics.push(Diagnostic::new(
            &self.current_file,
            self.current_line,
            Severity::Error,
            AsmError::new(kind, message),
        ));
        self.errors += 1;
    }

    fn report_warning(&mut self, kind: AsmErrorKind, message: impl Into<String>) {
        if self.warnings >= MAX_WARNINGS {
            return;
        }
        self.diagnostics.push(Diagnostic::new(
            &self.current_file,
            self.current_line,
            Severity::Warning,
            AsmError::new(kind, message),
        ));
        self.warnings += 1;
    }

    // ---------- code emission ----------

    /// Emit one byte at the real output position and advance both PCs.
    pub(crate) fn emit_byte(&mut self, byte: u8) {
        let output_addr = if self.in_pseudopc {
            self.real_pc
        } else {
            self.pc
        };
        self.image.store(output_addr, byte);
        self.pc = self.pc.wrapping_add(1);
        self.real_pc = self.real_pc.wrapping_add(1);
    }

    pub(crate) fn emit_word(&mut self, word: u16) {
        self.emit_byte((word & 0xff) as u8);
        self.emit_byte((word >> 8) as u8);
    }

    pub(crate) fn emit_bytes(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.emit_byte(*byte);
        }
    }

    /// Set the virtual PC; outside `!pseudopc` the real PC follows.
    pub(crate) fn set_pc(&mut self, pc: u16) {
        self.pc = pc;
        if !self.in_pseudopc {
            self.real_pc = pc;
        }
    }

    /// Advance both PCs without writing memory (pass-1 sizing, `!skip`).
    pub(crate) fn advance_pc(&mut self, count: u16) {
        self.pc = self.pc.wrapping_add(count);
        self.real_pc = self.real_pc.wrapping_add(count);
    }

    /// Branch displacement relative to the byte after the instruction.
    fn calc_branch_offset(target: u16, pc: u16) -> Option<i32> {
        let offset = i32::from(target) - (i32::from(pc) + 2);
        if (-128..=127).contains(&offset) {
            Some(offset)
        } else {
            None
        }
    }

    pub(crate) fn eval(&mut self, expr: &Expr) -> EvalResult {
        let mut ctx = EvalContext {
            symbols: &self.symbols,
            anon: Some(&mut self.anon),
            pc: self.pc,
            pass: self.pass,
            zone: self.zone.as_deref(),
        };
        expr::eval(expr, &mut ctx)
    }

    fn parse_line(&self, text: &str, line_num: u32) -> Statement {
        let ctx = ParseContext {
            symbols: &self.symbols,
            pc: self.pc,
            pass: self.pass,
            zone: self.zone.as_deref(),
        };
        parse_statement(text, line_num, &ctx)
    }

    // ---------- labels and zones ----------

    fn define_label(&mut self, label: &LabelInfo) {
        let mut flags = SymbolFlags::DEFINED;
        if self.pc <= 0xff {
            flags |= SymbolFlags::ZEROPAGE;
        }

        if label.is_anon_fwd {
            self.anon
                .define_forward(self.pc, &self.current_file, self.current_line);
        } else if label.is_anon_back {
            self.anon
                .define_backward(self.pc, &self.current_file, self.current_line);
        } else if label.is_local {
            let mangled = crate::symbol_table::mangle_local(&label.name, self.zone.as_deref());
            let value = i32::from(self.pc);
            self.symbols.define(
                &mangled,
                value,
                flags | SymbolFlags::LOCAL,
                &self.current_file,
                self.current_line,
            );
        } else {
            // A global label also re-binds the zone for local labels
            let value = i32::from(self.pc);
            self.symbols.define(
                &label.name,
                value,
                flags,
                &self.current_file,
                self.current_line,
            );
            self.zone = Some(label.name.clone());
        }
    }

    // ---------- statement assembly ----------

    pub(crate) fn assemble_statement(&mut self, stmt: &mut Statement) {
        self.current_line = stmt.line;

        if let Some(label) = stmt.label.clone() {
            if self.pass == 1 {
                self.define_label(&label);
            } else if label.is_anon_fwd {
                // Anonymous labels are re-tracked in pass 2 so backward
                // references resolve against the replayed positions.
                self.anon
                    .define_forward(self.pc, &self.current_file, self.current_line);
            } else if label.is_anon_back {
                self.anon
                    .define_backward(self.pc, &self.current_file, self.current_line);
            } else if !label.is_local {
                self.zone = Some(label.name.clone());
            }
        }

        match &mut stmt.kind {
            StatementKind::Empty | StatementKind::LabelOnly => {}
            StatementKind::Instruction(info) => self.assemble_instruction(info),
            StatementKind::Directive(dir) => self.assemble_directive(dir),
            StatementKind::Assignment(assign) => self.assemble_assignment(assign),
            StatementKind::MacroCall(call) => {
                let message = format!("unexpanded macro call '+{}'", call.name);
                self.report_error(AsmErrorKind::Semantic, message);
            }
            StatementKind::Error(message) => {
                let message = message.clone();
                self.report_error(AsmErrorKind::Syntax, message);
            }
        }
    }

    fn assemble_instruction(&mut self, info: &mut InstructionInfo) {
        use crate::mos6502::AddressMode;

        // CPU gating applies to mnemonics, not encodings
        if self.pass == 1 && table::is_illegal(&info.mnemonic) && !self.cpu.allows_illegal() {
            let message = format!(
                "illegal opcode {} not allowed for CPU {}",
                info.mnemonic,
                self.cpu.name()
            );
            self.report_error(AsmErrorKind::Semantic, message);
        }

        if matches!(info.mode, AddressMode::Accumulator | AddressMode::Implied) {
            if self.pass == 2 {
                self.emit_byte(info.opcode);
            } else {
                self.advance_pc(1);
            }
            return;
        }

        let mut value = 0;
        let mut defined = true;
        if let Some(operand) = &info.operand {
            let result = self.eval(operand);
            value = result.value;
            defined = result.defined;
            if self.pass == 2 && !defined {
                self.report_error(AsmErrorKind::Semantic, "undefined symbol in operand");
                return;
            }
        }

        if info.mode == AddressMode::Relative {
            if self.pass == 2 {
                match Self::calc_branch_offset(value as u16, self.pc) {
                    Some(offset) => {
                        self.emit_byte(info.opcode);
                        self.emit_byte((offset & 0xff) as u8);
                    }
                    None => {
                        self.report_error(AsmErrorKind::Semantic, "branch target out of range");
                    }
                }
            } else {
                self.advance_pc(2);
            }
            return;
        }

        // Pass-2 re-optimisation: swap in the zero-page encoding when the
        // value is now known to fit, but only at equal size. Size changes
        // would relocate every later label, so the pass-1 choice stands.
        if self.pass == 2 && defined && (0..=0xff).contains(&value) {
            if let Some(zp_mode) = zero_page_variant(info.mode) {
                if let Some(entry) = table::lookup(&info.mnemonic, zp_mode) {
                    if entry.size == info.size {
                        info.mode = zp_mode;
                        info.opcode = entry.opcode;
                    }
                }
            }
        }

        if self.pass == 2 {
            self.emit_byte(info.opcode);
            match info.size {
                2 => self.emit_byte((value & 0xff) as u8),
                3 => self.emit_word((value & 0xffff) as u16),
                _ => {}
            }
        } else {
            self.advance_pc(u16::from(info.size));
        }
    }

    fn assemble_assignment(&mut self, assign: &AssignmentInfo) {
        let result = self.eval(&assign.value);

        // Pass 1 outside loops defines a constant; pass 2 and loop bodies
        // must be able to reassign.
        let mut flags = if self.pass == 2 || self.loop_depth > 0 {
            SymbolFlags::DEFINED | SymbolFlags::FORCE_UPDATE
        } else {
            SymbolFlags::CONSTANT
        };
        if result.defined && (0..=0xff).contains(&result.value) {
            flags |= SymbolFlags::ZEROPAGE;
        }

        if self
            .symbols
            .define(
                &assign.name,
                result.value,
                flags,
                &self.current_file,
                self.current_line,
            )
            .is_none()
        {
            let message = format!("symbol '{}' already defined as constant", assign.name);
            self.report_error(AsmErrorKind::Semantic, message);
        }
    }

    // ---------- pass 1 ----------

    /// Run pass 1 over one source unit (the top-level file, an include, or
    /// an expansion fragment has its own variant below).
    fn pass1_unit(&mut self, source: &str, filename: &str) {
        let saved_file = std::mem::replace(&mut self.current_file, filename.to_string());
        let entry_cond_depth = self.cond.depth();

        let lines: Vec<&str> = source.lines().collect();
        let mut index = 0;
        while index < lines.len() {
            if self.errors >= MAX_ERRORS {
                break;
            }
            index = self.process_source_line(&lines, index, true);
        }

        if self.cond.depth() > entry_cond_depth {
            let location = self
                .cond
                .innermost()
                .map(|entry| format!("{}:{}", entry.file, entry.line));
            if let Some(location) = location {
                let message = format!("unterminated !if (started at {location})");
                self.report_error(AsmErrorKind::Directive, message);
            }
            while self.cond.depth() > entry_cond_depth {
                let _ = self.cond.leave_endif();
            }
        }

        self.current_file = saved_file;
    }

    /// Assemble an expanded macro or loop body. The fragment inherits the
    /// driver's pass and PC; statements are recorded (without source text)
    /// only in pass 1.
    fn assemble_fragment(&mut self, text: &str, pseudo_file: &str) {
        let saved_file = std::mem::replace(&mut self.current_file, pseudo_file.to_string());
        let saved_line = self.current_line;

        let lines: Vec<&str> = text.lines().collect();
        let mut index = 0;
        while index < lines.len() {
            if self.errors >= MAX_ERRORS {
                break;
            }
            index = self.process_source_line(&lines, index, false);
        }

        self.current_file = saved_file;
        self.current_line = saved_line;
    }

    /// Process one source line (and any body lines it swallows); returns
    /// the index of the next line to process. `top_level` distinguishes a
    /// real source unit (lines are recorded with their text, `!source` is
    /// honored) from an expansion fragment.
    fn process_source_line(&mut self, lines: &[&str], index: usize, top_level: bool) -> usize {
        let line_num = (index + 1) as u32;
        let text = lines[index];
        let line_pc = self.pc;

        let stmt = self.parse_line(text, line_num);
        self.current_line = line_num;

        // Conditional directives are always processed, active or not
        if is_conditional_directive(&stmt) {
            self.process_conditional(&stmt);
            return index + 1;
        }

        if !self.cond.is_active() {
            return index + 1;
        }

        match stmt.directive_name() {
            Some("source" | "src" | "include") => {
                if top_level {
                    match directive_string(&stmt) {
                        Some(filename) => self.include_file(&filename),
                        None => self.report_error(
                            AsmErrorKind::Directive,
                            "!source requires a filename argument",
                        ),
                    }
                    return index + 1;
                }
            }
            Some("macro") => {
                return self.process_macro_def(&stmt, lines, index);
            }
            Some("for" | "while") => {
                return self.process_loop(&stmt, lines, index);
            }
            _ => {}
        }

        if let StatementKind::MacroCall(call) = &stmt.kind {
            let call = call.clone();
            self.expand_macro(&call.name, &call.args);
            return index + 1;
        }

        // Record the line (capturing the zone before any label re-binds
        // it), then let the statement advance the PC.
        let zone_before = self.zone.clone();
        let mut stmt = stmt;
        self.assemble_statement(&mut stmt);

        if self.pass == 1 {
            let source = if top_level {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            } else {
                None
            };
            let (cycles, page_penalty) = match &stmt.kind {
                StatementKind::Instruction(info) => (info.cycles, info.page_penalty),
                _ => (0, false),
            };
            self.lines.push(AssembledLine {
                stmt,
                address: line_pc,
                source,
                zone: zone_before,
                bytes: Vec::new(),
                cycles,
                page_penalty,
            });
        }

        index + 1
    }

    // ---------- conditionals ----------

    fn process_conditional(&mut self, stmt: &Statement) {
        let StatementKind::Directive(dir) = &stmt.kind else {
            return;
        };
        match dir.name.as_str() {
            "if" => {
                let Some(cond_expr) = dir.args.first().cloned() else {
                    self.report_error(
                        AsmErrorKind::Directive,
                        "!if requires a condition expression",
                    );
                    return;
                };
                // Undefined in pass 1 means a forward reference: treat as false
                let result = self.eval(&cond_expr);
                let condition = result.defined && result.value != 0;
                let file = self.current_file.clone();
                if let Err(message) = self.cond.push_if(condition, &file, self.current_line) {
                    self.report_error(AsmErrorKind::Resource, message);
                }
            }
            "ifdef" | "ifndef" => {
                let Some(name) = directive_symbol_name(dir) else {
                    let message = format!("!{} requires a symbol name", dir.name);
                    self.report_error(AsmErrorKind::Directive, message);
                    return;
                };
                let defined = self.symbols.is_defined(&name);
                let condition = if dir.name == "ifdef" { defined } else { !defined };
                let file = self.current_file.clone();
                if let Err(message) = self.cond.push_if(condition, &file, self.current_line) {
                    self.report_error(AsmErrorKind::Resource, message);
                }
            }
            "else" => {
                if let Err(message) = self.cond.enter_else() {
                    self.report_error(AsmErrorKind::Directive, message);
                }
            }
            "endif" => {
                if let Err(message) = self.cond.leave_endif() {
                    self.report_error(AsmErrorKind::Directive, message);
                }
            }
            _ => {}
        }
    }

    // ---------- macros ----------

    /// Register a `!macro` definition, swallowing its body lines up to the
    /// matching `!endmacro`/`!endm`.
    fn process_macro_def(&mut self, stmt: &Statement, lines: &[&str], index: usize) -> usize {
        let StatementKind::Directive(dir) = &stmt.kind else {
            return index + 1;
        };

        let name = directive_string(stmt).or_else(|| match dir.args.first() {
            Some(Expr::Symbol(name)) => Some(name.clone()),
            _ => None,
        });
        let param_start = if dir.string_arg.is_some() { 0 } else { 1 };
        let params: Vec<String> = dir
            .args
            .iter()
            .skip(param_start)
            .filter_map(|arg| match arg {
                Expr::Symbol(name) => Some(name.clone()),
                _ => None,
            })
            .collect();

        let def_line = self.current_line;
        let Some((body, next)) =
            self.collect_body(lines, index + 1, &["macro"], &["endmacro", "endm"])
        else {
            let label = name.as_deref().unwrap_or("?");
            let message = format!("unterminated macro '{label}'");
            self.report_error(AsmErrorKind::Directive, message);
            return lines.len();
        };

        let Some(name) = name else {
            self.report_error(AsmErrorKind::Directive, "!macro requires a name");
            return next;
        };

        let file = self.current_file.clone();
        if let Err(message) = self.macros.define(&name, params, body, &file, def_line) {
            self.report_error(AsmErrorKind::Directive, message);
        }
        next
    }

    /// Expand a `+name` invocation inline: substitute arguments into the
    /// body and assemble the result under a fresh `_macro_<id>` zone.
    fn expand_macro(&mut self, name: &str, args: &[String]) {
        let Some(def) = self.macros.lookup(name).cloned() else {
            let message = format!("undefined macro '{name}'");
            self.report_error(AsmErrorKind::Semantic, message);
            return;
        };

        if args.len() != def.params.len() {
            let message = format!(
                "macro '{name}' expects {} arguments, got {}",
                def.params.len(),
                args.len()
            );
            self.report_error(AsmErrorKind::Directive, message);
            return;
        }

        if self.macro_depth >= MAX_MACRO_DEPTH {
            let message = format!("macro expansion too deep (max {MAX_MACRO_DEPTH})");
            self.report_error(AsmErrorKind::Resource, message);
            return;
        }

        self.macro_unique_counter += 1;
        let unique_id = self.macro_unique_counter;
        let expanded = substitute_params(&def.body, &def.params, args);

        let saved_zone = self.zone.replace(format!("_macro_{unique_id}"));
        self.macro_depth += 1;
        self.assemble_fragment(&expanded, &format!("<{name}>"));
        self.macro_depth -= 1;
        self.zone = saved_zone;
    }

    // ---------- loops ----------

    /// Execute a `!for`/`!while`, swallowing the body up to the matching
    /// `!end`.
    fn process_loop(&mut self, stmt: &Statement, lines: &[&str], index: usize) -> usize {
        let StatementKind::Directive(dir) = &stmt.kind else {
            return index + 1;
        };
        let dir = dir.clone();

        let Some((body, next)) =
            self.collect_body(lines, index + 1, &["for", "while"], &["end"])
        else {
            let message = format!("unterminated !{} loop", dir.name);
            self.report_error(AsmErrorKind::Directive, message);
            return lines.len();
        };

        if dir.name == "for" {
            if dir.args.len() < 3 {
                self.report_error(
                    AsmErrorKind::Directive,
                    "!for requires variable, start, and end",
                );
                return next;
            }
            let Some(Expr::Symbol(var_name)) = dir.args.first() else {
                self.report_error(AsmErrorKind::Directive, "!for requires a variable name");
                return next;
            };
            let var_name = var_name.clone();
            let start = self.eval(&dir.args[1]);
            let end = self.eval(&dir.args[2]);
            if !start.defined || !end.defined {
                self.report_error(
                    AsmErrorKind::Directive,
                    "!for start and end must be defined values",
                );
                return next;
            }
            self.run_for(&var_name, start.value, end.value, &body);
        } else {
            let Some(condition) = dir.args.first() else {
                self.report_error(
                    AsmErrorKind::Directive,
                    "!while requires a condition expression",
                );
                return next;
            };
            self.run_while(condition, &body);
        }

        next
    }

    /// `!for v, a, b`: bind `v` to each integer from `a` to `b` (step ±1),
    /// substituting it textually and defining it as a symbol.
    fn run_for(&mut self, var_name: &str, start: i32, end: i32, body: &str) {
        if self.loop_depth >= MAX_LOOP_DEPTH {
            let message = format!("loop nesting too deep (max {MAX_LOOP_DEPTH})");
            self.report_error(AsmErrorKind::Resource, message);
            return;
        }

        let step: i32 = if start <= end { 1 } else { -1 };
        let pseudo_file = format!("<for {var_name}>");
        let mut value = start;
        loop {
            let expanded = substitute_loop_var(body, var_name, value);
            self.symbols.define(
                var_name,
                value,
                SymbolFlags::DEFINED | SymbolFlags::FORCE_UPDATE,
                &self.current_file,
                self.current_line,
            );

            self.loop_depth += 1;
            self.assemble_fragment(&expanded, &pseudo_file);
            self.loop_depth -= 1;

            if self.errors >= MAX_ERRORS || value == end {
                break;
            }
            value += step;
        }
    }

    /// `!while expr`: re-evaluate before each iteration, with a safety cap.
    fn run_while(&mut self, condition: &Expr, body: &str) {
        if self.loop_depth >= MAX_LOOP_DEPTH {
            let message = format!("loop nesting too deep (max {MAX_LOOP_DEPTH})");
            self.report_error(AsmErrorKind::Resource, message);
            return;
        }

        let mut iterations = 0;
        loop {
            if iterations >= MAX_WHILE_ITERATIONS {
                let message =
                    format!("!while loop exceeded maximum iterations ({MAX_WHILE_ITERATIONS})");
                self.report_error(AsmErrorKind::Resource, message);
                break;
            }
            let result = self.eval(condition);
            if !result.defined {
                self.report_error(AsmErrorKind::Semantic, "undefined symbol in !while condition");
                break;
            }
            if result.value == 0 {
                break;
            }

            self.loop_depth += 1;
            self.assemble_fragment(body, "<while>");
            self.loop_depth -= 1;

            iterations += 1;
            if self.errors >= MAX_ERRORS {
                break;
            }
        }
    }

    /// Collect raw body lines until the matching closer, tracking nesting
    /// of the opener directives. Returns `(body, next_index)`.
    fn collect_body(
        &mut self,
        lines: &[&str],
        start: usize,
        openers: &[&str],
        closers: &[&str],
    ) -> Option<(String, usize)> {
        let mut depth = 1usize;
        let mut body = String::new();
        let mut index = start;
        while index < lines.len() {
            let text = lines[index];
            let stmt = self.parse_line(text, (index + 1) as u32);
            if let Some(name) = stmt.directive_name() {
                if openers.contains(&name) {
                    depth += 1;
                } else if closers.contains(&name) {
                    depth -= 1;
                    if depth == 0 {
                        return Some((body, index + 1));
                    }
                }
            }
            body.push_str(text);
            body.push('\n');
            index += 1;
        }
        None
    }

    // ---------- includes ----------

    pub fn add_include_path(&mut self, path: impl Into<PathBuf>) {
        self.include_paths.push(path.into());
    }

    /// Add delimiter-separated search paths from an environment variable.
    pub fn add_include_paths_from_env(&mut self, var_name: &str, delimiter: char) {
        let Ok(value) = std::env::var(var_name) else {
            return;
        };
        for path in value.split(delimiter) {
            if !path.is_empty() {
                self.add_include_path(path);
            }
        }
    }

    /// Resolve an include/binary filename: sibling of the current file
    /// first, then the configured search paths, then the working directory.
    fn find_include(&self, filename: &str) -> Option<PathBuf> {
        if let Some(dir) = Path::new(&self.current_file).parent() {
            let candidate = dir.join(filename);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        for path in &self.include_paths {
            let candidate = path.join(filename);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        let candidate = PathBuf::from(filename);
        if candidate.is_file() {
            return Some(candidate);
        }
        None
    }

    /// Recursive pass-1 inclusion of another source file.
    fn include_file(&mut self, filename: &str) {
        if self.include_stack.len() >= MAX_INCLUDE_DEPTH {
            let message = format!("include nesting too deep (max {MAX_INCLUDE_DEPTH})");
            self.report_error(AsmErrorKind::Resource, message);
            return;
        }

        let Some(path) = self.find_include(filename) else {
            let message = format!("cannot find include file: {filename}");
            self.report_error(AsmErrorKind::Directive, message);
            return;
        };

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => {
                let message = format!("cannot read include file: {}", path.display());
                self.report_error(AsmErrorKind::Io, message);
                return;
            }
        };

        self.include_stack.push(IncludeFrame {
            file: self.current_file.clone(),
            line: self.current_line,
        });
        self.pass1_unit(&content, &path.to_string_lossy());
        self.include_stack.pop();
    }

    /// Splice raw bytes from a binary file (`!binary`).
    pub(crate) fn include_binary(&mut self, filename: &str, offset: i32, length: i32) {
        let Some(path) = self.find_include(filename) else {
            let message = format!("cannot find binary file: {filename}");
            self.report_error(AsmErrorKind::Directive, message);
            return;
        };

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(_) => {
                let message = format!("cannot read binary file: {}", path.display());
                self.report_error(AsmErrorKind::Io, message);
                return;
            }
        };

        if offset < 0 || offset as usize > data.len() {
            let message = format!(
                "binary offset {offset} out of range (file size {})",
                data.len()
            );
            self.report_error(AsmErrorKind::Directive, message);
            return;
        }

        let offset = offset as usize;
        let mut read_len = if length <= 0 {
            data.len() - offset
        } else {
            length as usize
        };
        if offset + read_len > data.len() {
            read_len = data.len() - offset;
        }
        if read_len == 0 {
            return;
        }

        let slice = data[offset..offset + read_len].to_vec();
        if self.pass == 2 {
            self.emit_bytes(&slice);
        } else {
            self.advance_pc(read_len as u16);
        }
    }

    // ---------- command-line defines ----------

    /// Define a `NAME[=VALUE]` symbol as a constant. The definition is
    /// stored and re-applied on every assembly reset.
    pub fn define_symbol(&mut self, definition: &str) -> Result<(), String> {
        if definition.is_empty() {
            return Err("empty symbol definition".to_string());
        }
        self.cmdline_defines.push(definition.to_string());
        self.apply_define(definition)
    }

    fn apply_define(&mut self, definition: &str) -> Result<(), String> {
        let (name, value) = match definition.split_once('=') {
            Some((name, value_str)) => (name, parse_define_value(value_str)?),
            None => (definition, 1),
        };
        if name.is_empty() {
            return Err(format!("invalid symbol definition '{definition}'"));
        }
        self.symbols.define(
            name,
            value,
            SymbolFlags::DEFINED | SymbolFlags::CONSTANT | SymbolFlags::FORCE_UPDATE,
            "<command-line>",
            0,
        );
        Ok(())
    }

    // ---------- passes ----------

    pub fn pass1(&mut self, source: &str, filename: &str) -> u32 {
        self.pass = 1;
        self.pc = self.org;
        self.real_pc = self.org;
        self.pass1_unit(source, filename);
        self.errors
    }

    pub fn pass2(&mut self) -> u32 {
        self.pass = 2;
        self.pc = self.org;
        self.real_pc = self.org;
        self.in_pseudopc = false;
        self.zone = None;
        // Expansion IDs must match between passes so local-label names agree
        self.macro_unique_counter = 0;
        self.anon.reset_pass();

        for i in 0..self.lines.len() {
            if self.errors >= MAX_ERRORS {
                break;
            }

            let mut stmt = self.lines[i].stmt.clone();
            self.pc = self.lines[i].address;
            self.zone = self.lines[i].zone.clone();
            self.current_line = stmt.line;

            let is_org = stmt.directive_name() == Some("org");
            let start = if self.in_pseudopc { self.real_pc } else { self.pc };

            self.assemble_statement(&mut stmt);

            let end = if self.in_pseudopc { self.real_pc } else { self.pc };
            let count = i32::from(end) - i32::from(start);
            let mut bytes = Vec::new();
            if !is_org && count > 0 {
                let capture = (count as usize).min(8);
                for j in 0..capture {
                    bytes.push(self.image.read(start.wrapping_add(j as u16)));
                }
            }

            let line = &mut self.lines[i];
            if let StatementKind::Instruction(info) = &stmt.kind {
                line.cycles = info.cycles;
                line.page_penalty = info.page_penalty;
            }
            line.stmt = stmt;
            line.bytes = bytes;
        }

        self.errors
    }

    /// Full two-pass assembly of a source string. Returns the error count.
    pub fn assemble_string(&mut self, source: &str, filename: &str) -> u32 {
        self.reset();

        if self.verbose {
            eprintln!("Pass 1: parsing and symbol collection...");
        }
        self.pass1(source, filename);
        if self.verbose {
            eprintln!(
                "Pass 1: {} lines, {} symbols defined",
                self.lines.len(),
                self.symbols.len()
            );
        }
        if self.errors > 0 {
            return self.errors;
        }

        if self.verbose {
            eprintln!("Pass 2: code generation...");
        }
        self.pass2();
        if self.verbose {
            if let Some((lo, slice)) = self.image.output_slice() {
                eprintln!(
                    "Pass 2: generated {} bytes (${:04X}-${:04X})",
                    slice.len(),
                    lo,
                    lo as usize + slice.len() - 1
                );
            }
        }

        self.errors
    }

    /// Read and assemble a file. Returns the error count.
    pub fn assemble_file(&mut self, filename: &str) -> u32 {
        let source = match fs::read_to_string(filename) {
            Ok(source) => source,
            Err(_) => {
                self.current_file = filename.to_string();
                self.current_line = 0;
                let message = format!("cannot open file: {filename}");
                self.report_error(AsmErrorKind::Io, message);
                return self.errors;
            }
        };
        self.current_file = filename.to_string();
        self.assemble_string(&source, filename)
    }

    // ---------- outputs ----------

    /// Write the PRG or raw image. When nothing was emitted, no file is
    /// created and a warning is issued.
    pub fn write_output(&mut self, path: &str) -> io::Result<()> {
        if self.image.output_range().is_none() {
            self.report_warning(AsmErrorKind::Directive, "no output generated");
            return Ok(());
        }
        let file = fs::File::create(path)?;
        match self.format {
            OutputFormat::Prg => self.image.write_prg_file(file),
            OutputFormat::Raw => self.image.write_raw_file(file),
        }
    }

    /// Write the VICE-compatible symbol file.
    pub fn write_symbol_file(&self, path: &str) -> io::Result<()> {
        let file = fs::File::create(path)?;
        self.symbols.write_vice(file)
    }

    /// Write the listing file.
    pub fn write_listing_file(&self, path: &str) -> io::Result<()> {
        let file = fs::File::create(path)?;
        let mut writer = listing::ListingWriter::new(file, self.show_cycles);
        writer.write(&self.lines, &self.symbols)
    }
}

fn is_conditional_directive(stmt: &Statement) -> bool {
    matches!(
        stmt.directive_name(),
        Some("if" | "ifdef" | "ifndef" | "else" | "endif")
    )
}

/// A directive's string argument as UTF-8 text (filenames, messages).
fn directive_string(stmt: &Statement) -> Option<String> {
    match &stmt.kind {
        StatementKind::Directive(dir) => dir
            .string_arg
            .as_ref()
            .map(|bytes| String::from_utf8_lossy(bytes).to_string()),
        _ => None,
    }
}

/// Symbol-name argument of `!ifdef`/`!ifndef`: string form or bare symbol.
fn directive_symbol_name(dir: &DirectiveInfo) -> Option<String> {
    if let Some(bytes) = &dir.string_arg {
        return Some(String::from_utf8_lossy(bytes).to_string());
    }
    match dir.args.first() {
        Some(Expr::Symbol(name)) => Some(name.clone()),
        _ => None,
    }
}

/// Parse a command-line define value: `$`/`0x` hex, `%` binary, else
/// decimal.
fn parse_define_value(text: &str) -> Result<i32, String> {
    let parsed = if let Some(hex) = text.strip_prefix('$') {
        i64::from_str_radix(hex, 16)
    } else if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if let Some(bin) = text.strip_prefix('%') {
        i64::from_str_radix(bin, 2)
    } else {
        text.parse::<i64>()
    };
    match parsed {
        Ok(value) => Ok(value as i32),
        Err(_) => Err(format!("invalid symbol value '{text}'")),
    }
}
