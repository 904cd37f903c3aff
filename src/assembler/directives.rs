// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// Directive implementations for the two-pass driver.

use super::encoding::{ascii_to_petscii, ascii_to_screencode};
use super::error::AsmErrorKind;
use super::Assembler;
use crate::mos6502::CpuType;
use crate::parser::{DirectiveInfo, Expr};

impl Assembler {
    pub(crate) fn assemble_directive(&mut self, dir: &DirectiveInfo) {
        match dir.name.as_str() {
            "byte" | "by" | "db" | "08" => self.dir_byte(dir),
            "word" | "wo" | "dw" | "16" => self.dir_word(dir),
            "text" | "tx" => self.dir_string(dir, StringMode::Raw, "!text"),
            "pet" => self.dir_string(dir, StringMode::Petscii, "!pet"),
            "scr" => self.dir_string(dir, StringMode::ScreenCode, "!scr"),
            "null" => self.dir_string(dir, StringMode::NullTerminated, "!null"),
            "fill" | "fi" => self.dir_fill(dir),
            "skip" | "res" => self.dir_skip(dir),
            "align" => self.dir_align(dir),
            "org" => self.dir_org(dir),
            "binary" | "bin" => self.dir_binary(dir),
            "basic" => self.dir_basic(dir),
            "pseudopc" => self.dir_pseudopc(dir),
            "realpc" => self.dir_realpc(),
            "cpu" => self.dir_cpu(dir),
            "zone" | "zn" => self.dir_zone(dir),
            "error" => self.dir_error(dir),
            "warn" | "warning" => self.dir_warn(dir),
            // Handled structurally during pass 1
            "source" | "src" | "include" => {}
            "macro" | "endmacro" | "endm" => {}
            "for" | "while" | "end" => {}
            other => {
                let message = format!("unknown directive !{other} ignored");
                self.report_warning(AsmErrorKind::Directive, message);
            }
        }
    }

    /// `!byte`: emit each argument's low byte; warn on truncation.
    fn dir_byte(&mut self, dir: &DirectiveInfo) {
        for arg in &dir.args {
            let result = self.eval(arg);
            if self.pass == 2 && !result.defined {
                self.report_error(AsmErrorKind::Semantic, "undefined symbol in !byte directive");
                return;
            }
            if self.pass == 2 {
                if result.value < -128 || result.value > 255 {
                    let message = format!("byte value ${:X} truncated", result.value as u32);
                    self.report_warning(AsmErrorKind::Directive, message);
                }
                self.emit_byte((result.value & 0xff) as u8);
            } else {
                self.advance_pc(1);
            }
        }
    }

    /// `!word`: emit each argument as little-endian 16-bit.
    fn dir_word(&mut self, dir: &DirectiveInfo) {
        for arg in &dir.args {
            let result = self.eval(arg);
            if self.pass == 2 && !result.defined {
                self.report_error(AsmErrorKind::Semantic, "undefined symbol in !word directive");
                return;
            }
            if self.pass == 2 {
                self.emit_word((result.value & 0xffff) as u16);
            } else {
                self.advance_pc(2);
            }
        }
    }

    fn dir_string(&mut self, dir: &DirectiveInfo, mode: StringMode, what: &str) {
        let Some(bytes) = dir.string_arg.clone() else {
            let message = format!("{what} requires a string argument");
            self.report_error(AsmErrorKind::Directive, message);
            return;
        };

        let extra = u16::from(mode == StringMode::NullTerminated);
        if self.pass != 2 {
            self.advance_pc(bytes.len() as u16 + extra);
            return;
        }

        for byte in &bytes {
            let value = match mode {
                StringMode::Raw | StringMode::NullTerminated => *byte,
                StringMode::Petscii => ascii_to_petscii(*byte),
                StringMode::ScreenCode => ascii_to_screencode(*byte),
            };
            self.emit_byte(value);
        }
        if mode == StringMode::NullTerminated {
            self.emit_byte(0x00);
        }
    }

    /// `!fill n[, v]`: emit `v` (default 0) `n` times.
    fn dir_fill(&mut self, dir: &DirectiveInfo) {
        let Some(count_arg) = dir.args.first() else {
            self.report_error(AsmErrorKind::Directive, "!fill requires count argument");
            return;
        };
        let count = self.eval(count_arg);
        if !count.defined {
            self.report_error(AsmErrorKind::Directive, "!fill count must be constant");
            return;
        }
        if count.value < 0 || count.value > 65536 {
            self.report_error(AsmErrorKind::Directive, "!fill count out of range");
            return;
        }

        let mut fill_value = 0u8;
        if let Some(value_arg) = dir.args.get(1) {
            let value = self.eval(value_arg);
            if self.pass == 2 && !value.defined {
                self.report_error(AsmErrorKind::Directive, "!fill value must be defined");
                return;
            }
            fill_value = (value.value & 0xff) as u8;
        }

        if self.pass == 2 {
            for _ in 0..count.value {
                self.emit_byte(fill_value);
            }
        } else {
            self.advance_pc(count.value as u16);
        }
    }

    /// `!skip n`: advance the PC without writing memory.
    fn dir_skip(&mut self, dir: &DirectiveInfo) {
        let Some(count_arg) = dir.args.first() else {
            self.report_error(AsmErrorKind::Directive, "!skip requires count argument");
            return;
        };
        let count = self.eval(count_arg);
        if !count.defined {
            self.report_error(AsmErrorKind::Directive, "!skip count must be constant");
            return;
        }
        if count.value < 0 || count.value > 65536 {
            self.report_error(AsmErrorKind::Directive, "!skip count out of range");
            return;
        }
        self.advance_pc(count.value as u16);
    }

    /// `!align n[, v]`: pad until `pc % n == 0`.
    fn dir_align(&mut self, dir: &DirectiveInfo) {
        let Some(align_arg) = dir.args.first() else {
            self.report_error(AsmErrorKind::Directive, "!align requires alignment argument");
            return;
        };
        let align = self.eval(align_arg);
        if !align.defined {
            self.report_error(AsmErrorKind::Directive, "!align value must be constant");
            return;
        }
        let alignment = align.value;
        if alignment <= 0 || alignment > 65536 {
            self.report_error(AsmErrorKind::Directive, "!align value out of range");
            return;
        }
        if alignment & (alignment - 1) != 0 {
            let message = format!("!align value {alignment} is not a power of 2");
            self.report_warning(AsmErrorKind::Directive, message);
        }

        let remainder = i32::from(self.pc) % alignment;
        let padding = if remainder == 0 {
            0
        } else {
            alignment - remainder
        };

        let mut fill_value = 0u8;
        if let Some(value_arg) = dir.args.get(1) {
            let value = self.eval(value_arg);
            if self.pass == 2 && !value.defined {
                self.report_error(AsmErrorKind::Directive, "!align fill value must be defined");
                return;
            }
            fill_value = (value.value & 0xff) as u8;
        }

        if self.pass == 2 {
            for _ in 0..padding {
                self.emit_byte(fill_value);
            }
        } else {
            self.advance_pc(padding as u16);
        }
    }

    /// `!org <expr>` / `*= <expr>`: set the PC.
    fn dir_org(&mut self, dir: &DirectiveInfo) {
        let Some(arg) = dir.args.first() else {
            self.report_error(AsmErrorKind::Directive, "org directive requires address");
            return;
        };
        let result = self.eval(arg);
        if !result.defined {
            self.report_error(AsmErrorKind::Directive, "org address must be constant");
            return;
        }
        self.set_pc((result.value & 0xffff) as u16);
    }

    /// `!binary <file>[, len[, off]]`: splice raw bytes from a file.
    fn dir_binary(&mut self, dir: &DirectiveInfo) {
        let Some(bytes) = &dir.string_arg else {
            self.report_error(AsmErrorKind::Directive, "!binary requires a filename argument");
            return;
        };
        let filename = String::from_utf8_lossy(bytes).to_string();

        let mut length = 0;
        let mut offset = 0;
        if let Some(arg) = dir.args.first() {
            let result = self.eval(arg);
            if !result.defined {
                self.report_error(AsmErrorKind::Directive, "!binary size must be constant");
                return;
            }
            length = result.value;
        }
        if let Some(arg) = dir.args.get(1) {
            let result = self.eval(arg);
            if !result.defined {
                self.report_error(AsmErrorKind::Directive, "!binary offset must be constant");
                return;
            }
            offset = result.value;
        }

        self.include_binary(&filename, offset, length);
    }

    /// `!basic [line[, addr]]`: emit a BASIC stub that SYS's into the code.
    ///
    /// Layout: link word, line number, SYS token ($9E), the address as
    /// ASCII digits, end of line, end of program. The default address is
    /// the byte after the stub; one iteration settles the 4- vs 5-digit
    /// length.
    fn dir_basic(&mut self, dir: &DirectiveInfo) {
        let mut line_number = 10;
        let mut sys_addr = 0;
        let mut explicit_addr = false;

        if let Some(arg) = dir.args.first() {
            let result = self.eval(arg);
            if self.pass == 2 && !result.defined {
                self.report_error(AsmErrorKind::Directive, "!basic line number must be constant");
                return;
            }
            line_number = result.value;
        }
        if let Some(arg) = dir.args.get(1) {
            let result = self.eval(arg);
            if self.pass == 2 && !result.defined {
                self.report_error(AsmErrorKind::Directive, "!basic SYS address must be constant");
                return;
            }
            sys_addr = result.value;
            explicit_addr = true;
        }

        let start_pc = i32::from(self.pc);

        if !explicit_addr {
            // link + linenum + SYS + null + end marker
            let base_size = 2 + 2 + 1 + 1 + 2;
            // The address depends on its own digit count; settle 4 vs 5
            let mut addr = start_pc + base_size + 4;
            if addr >= 10000 {
                addr = start_pc + base_size + 5;
            }
            sys_addr = addr;
        }

        let digit_count = if sys_addr >= 10000 { 5 } else { 4 };
        let total_size = 2 + 2 + 1 + digit_count + 1 + 2;
        let link_addr = start_pc + total_size - 2;

        if self.pass == 2 {
            self.emit_byte((link_addr & 0xff) as u8);
            self.emit_byte(((link_addr >> 8) & 0xff) as u8);
            self.emit_byte((line_number & 0xff) as u8);
            self.emit_byte(((line_number >> 8) & 0xff) as u8);
            self.emit_byte(0x9e);
            for digit in sys_addr.to_string().bytes() {
                self.emit_byte(digit);
            }
            self.emit_byte(0x00);
            self.emit_byte(0x00);
            self.emit_byte(0x00);
        } else {
            self.advance_pc(total_size as u16);
        }
    }

    /// `!pseudopc <addr>`: divert the virtual PC while bytes keep landing
    /// at the real output position.
    fn dir_pseudopc(&mut self, dir: &DirectiveInfo) {
        let Some(arg) = dir.args.first() else {
            self.report_error(AsmErrorKind::Directive, "!pseudopc requires an address");
            return;
        };
        let result = self.eval(arg);
        if !result.defined {
            self.report_error(
                AsmErrorKind::Directive,
                "!pseudopc address must be a defined value",
            );
            return;
        }
        if self.in_pseudopc {
            self.report_error(AsmErrorKind::Directive, "nested !pseudopc not allowed");
            return;
        }
        self.real_pc = self.pc;
        self.in_pseudopc = true;
        self.pc = (result.value & 0xffff) as u16;
    }

    /// `!realpc`: rejoin the virtual PC with the real output position.
    fn dir_realpc(&mut self) {
        if !self.in_pseudopc {
            self.report_error(AsmErrorKind::Directive, "!realpc without matching !pseudopc");
            return;
        }
        self.pc = self.real_pc;
        self.in_pseudopc = false;
    }

    /// `!cpu`: select 6502 / 6510 / 65c02.
    fn dir_cpu(&mut self, dir: &DirectiveInfo) {
        let name = if let Some(bytes) = &dir.string_arg {
            Some(String::from_utf8_lossy(bytes).to_string())
        } else {
            match dir.args.first() {
                Some(Expr::Symbol(name)) => Some(name.clone()),
                Some(Expr::Number(value)) => Some(value.to_string()),
                _ => None,
            }
        };

        let Some(name) = name else {
            self.report_error(
                AsmErrorKind::Directive,
                "!cpu requires a CPU type (6502, 6510, or 65c02)",
            );
            return;
        };

        match CpuType::from_name(&name) {
            Some(cpu) => self.cpu = cpu,
            None => {
                let message = format!("unknown CPU type: {name}");
                self.report_error(AsmErrorKind::Directive, message);
            }
        }
    }

    /// `!zone [name]`: set the zone for local labels; a missing or empty
    /// name generates a fresh `_zone_<n>`.
    fn dir_zone(&mut self, dir: &DirectiveInfo) {
        let name = if let Some(bytes) = &dir.string_arg {
            Some(String::from_utf8_lossy(bytes).to_string())
        } else {
            match dir.args.first() {
                Some(Expr::Symbol(name)) => Some(name.clone()),
                _ => None,
            }
        };

        self.zone = match name {
            Some(name) if !name.is_empty() => Some(name),
            _ => {
                self.zone_counter += 1;
                Some(format!("_zone_{}", self.zone_counter))
            }
        };
    }

    fn dir_error(&mut self, dir: &DirectiveInfo) {
        let message = dir
            .string_arg
            .as_ref()
            .map(|bytes| String::from_utf8_lossy(bytes).to_string())
            .unwrap_or_else(|| "user error".to_string());
        self.report_error(AsmErrorKind::Directive, message);
    }

    fn dir_warn(&mut self, dir: &DirectiveInfo) {
        let message = dir
            .string_arg
            .as_ref()
            .map(|bytes| String::from_utf8_lossy(bytes).to_string())
            .unwrap_or_else(|| "user warning".to_string());
        self.report_warning(AsmErrorKind::Directive, message);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum StringMode {
    Raw,
    Petscii,
    ScreenCode,
    NullTerminated,
}
