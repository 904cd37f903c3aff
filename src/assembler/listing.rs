// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Listing file generation.

use std::io::{self, Write};

use super::AssembledLine;
use crate::parser::StatementKind;
use crate::symbol_table::SymbolTable;

/// Writer for listing file output: a header block, one record per
/// assembled line (address, up to four bytes per row with continuation
/// rows, optional cycle count, source text), and a symbol-table trailer.
pub struct ListingWriter<W: Write> {
    out: W,
    show_cycles: bool,
}

impl<W: Write> ListingWriter<W> {
    pub fn new(out: W, show_cycles: bool) -> Self {
        Self { out, show_cycles }
    }

    pub(crate) fn write(
        &mut self,
        lines: &[AssembledLine],
        symbols: &SymbolTable,
    ) -> io::Result<()> {
        self.header()?;
        for line in lines {
            self.write_line(line)?;
        }
        self.footer(symbols)
    }

    fn header(&mut self) -> io::Result<()> {
        writeln!(self.out, "; forge64 Listing File")?;
        writeln!(self.out, "; Generated from assembled source")?;
        writeln!(self.out, ";")?;
        if self.show_cycles {
            writeln!(self.out, "; Address  Bytes         Cycles  Source")?;
            writeln!(self.out, "; -------  ----------    ------  ------")?;
        } else {
            writeln!(self.out, "; Address  Bytes         Source")?;
            writeln!(self.out, "; -------  ----------    ------")?;
        }
        writeln!(self.out)
    }

    fn write_line(&mut self, line: &AssembledLine) -> io::Result<()> {
        // Empty filler lines with no source text add nothing
        if matches!(line.stmt.kind, StatementKind::Empty) && line.source.is_none() {
            return Ok(());
        }

        let is_org = line.stmt.directive_name() == Some("org");

        if (!line.bytes.is_empty() && !is_org)
            || matches!(line.stmt.kind, StatementKind::LabelOnly)
        {
            write!(self.out, "{:04X}  ", line.address)?;
        } else {
            write!(self.out, "      ")?;
        }

        let shown = if is_org { 0 } else { line.bytes.len().min(4) };
        write!(self.out, "{:<12}", hex_group(&line.bytes[..shown]))?;

        if self.show_cycles {
            if line.cycles > 0 {
                let penalty = if line.page_penalty { '+' } else { ' ' };
                write!(self.out, "  {:2}{}   ", line.cycles, penalty)?;
            } else {
                write!(self.out, "        ")?;
            }
        }

        if let Some(source) = &line.source {
            write!(self.out, "  {source}")?;
        }
        writeln!(self.out)?;

        // Continuation rows for data longer than four bytes
        if line.bytes.len() > 4 && !is_org {
            let mut pos = 4;
            while pos < line.bytes.len() {
                let count = (line.bytes.len() - pos).min(4);
                write!(
                    self.out,
                    "{:04X}  {:<12}",
                    line.address.wrapping_add(pos as u16),
                    hex_group(&line.bytes[pos..pos + count])
                )?;
                if self.show_cycles {
                    write!(self.out, "        ")?;
                }
                writeln!(self.out)?;
                pos += count;
            }
        }

        Ok(())
    }

    fn footer(&mut self, symbols: &SymbolTable) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "; Symbol Table")?;
        writeln!(self.out, "; ------------")?;
        symbols.write_vice(&mut self.out)
    }
}

fn hex_group(bytes: &[u8]) -> String {
    let mut out = String::new();
    for byte in bytes {
        out.push_str(&format!("{byte:02X} "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::hex_group;

    #[test]
    fn hex_group_formats_bytes() {
        assert_eq!(hex_group(&[0xad, 0x12, 0xd0]), "AD 12 D0 ");
        assert_eq!(hex_group(&[]), "");
    }
}
