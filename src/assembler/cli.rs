// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface parsing and run orchestration.

use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser};

use super::error::{AsmError, AsmErrorKind, AsmRunError, AsmRunReport};
use super::{Assembler, OutputFormat};

pub const VERSION: &str = "1.0.0";

/// Environment variable holding extra include search paths.
pub const INCLUDE_ENV_VAR: &str = "FORGE64_INCLUDE";

const LONG_ABOUT: &str = "6502/6510 cross-assembler for Commodore 64 development.

Assembles ACME-dialect source into a PRG file (two-byte load address
header) or a raw binary image. Optional outputs: a listing file and a
VICE-compatible symbol file. Include files are resolved against the
including file's directory, then -I paths and the FORGE64_INCLUDE
environment variable, then the working directory.";

#[derive(Parser, Debug)]
#[command(
    name = "forge64",
    version = VERSION,
    about = "6502/6510 cross-assembler for Commodore 64 development",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(value_name = "FILE", help = "Input assembly source file")]
    pub input: PathBuf,
    #[arg(
        short = 'o',
        long = "outfile",
        value_name = "FILE",
        long_help = "Output filename. Defaults to the input base with .prg (or .bin for raw format)."
    )]
    pub outfile: Option<PathBuf>,
    #[arg(
        short = 'f',
        long = "format",
        value_name = "FORMAT",
        default_value = "prg",
        long_help = "Output format: prg (two-byte load address header) or raw."
    )]
    pub format: String,
    #[arg(
        short = 'l',
        long = "list",
        value_name = "FILE",
        long_help = "Emit a listing file with addresses, bytes and source text."
    )]
    pub listing: Option<PathBuf>,
    #[arg(
        short = 's',
        long = "symbols",
        value_name = "FILE",
        long_help = "Emit a VICE-compatible symbol file, sorted by value."
    )]
    pub symbols: Option<PathBuf>,
    #[arg(
        short = 'D',
        long = "define",
        value_name = "NAME[=VAL]",
        action = ArgAction::Append,
        long_help = "Define a constant symbol (repeatable). VAL parses as hex with $ or 0x, binary with %, else decimal; omitted VAL defaults to 1."
    )]
    pub defines: Vec<String>,
    #[arg(
        short = 'I',
        long = "include",
        value_name = "PATH",
        action = ArgAction::Append,
        long_help = "Add an include search path (repeatable)."
    )]
    pub include_paths: Vec<PathBuf>,
    #[arg(
        long = "cycles",
        action = ArgAction::SetTrue,
        long_help = "Include cycle counts in the listing file."
    )]
    pub cycles: bool,
    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::SetTrue,
        long_help = "Report pass progress and output sizes on stderr."
    )]
    pub verbose: bool,
}

/// Default output path: the input base with `.prg`/`.bin`.
pub fn default_output_path(input: &Path, format: OutputFormat) -> PathBuf {
    let extension = match format {
        OutputFormat::Prg => "prg",
        OutputFormat::Raw => "bin",
    };
    input.with_extension(extension)
}

/// Run the assembler with command-line arguments.
pub fn run() -> Result<AsmRunReport, AsmRunError> {
    run_with(Cli::parse())
}

fn cli_error(message: String) -> AsmRunError {
    AsmRunError::new(AsmError::new(AsmErrorKind::Cli, message), Vec::new())
}

pub fn run_with(cli: Cli) -> Result<AsmRunReport, AsmRunError> {
    let format = match cli.format.as_str() {
        "prg" => OutputFormat::Prg,
        "raw" => OutputFormat::Raw,
        other => return Err(cli_error(format!("unknown format '{other}'"))),
    };

    let mut assembler = Assembler::new();
    assembler.format = format;
    assembler.verbose = cli.verbose;
    assembler.show_cycles = cli.cycles;

    // Environment paths first so -I paths take priority at equal depth
    assembler.add_include_paths_from_env(INCLUDE_ENV_VAR, ':');
    for path in &cli.include_paths {
        assembler.add_include_path(path.clone());
    }

    for definition in &cli.defines {
        if let Err(message) = assembler.define_symbol(definition) {
            return Err(cli_error(message));
        }
    }

    let input = cli.input.to_string_lossy().to_string();
    if assembler.verbose {
        eprintln!("forge64 {VERSION}");
        eprintln!("Assembling {input}...");
    }

    let errors = assembler.assemble_file(&input);
    if errors > 0 {
        return Err(AsmRunError::new(
            AsmError::new(
                AsmErrorKind::Semantic,
                format!("{errors} error(s); no output written"),
            ),
            assembler.take_diagnostics(),
        ));
    }

    let out_path = cli
        .outfile
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.input, format));
    let out_name = out_path.to_string_lossy().to_string();
    if let Err(err) = assembler.write_output(&out_name) {
        return Err(AsmRunError::new(
            AsmError::new(
                AsmErrorKind::Io,
                format!("cannot create output file {out_name}: {err}"),
            ),
            assembler.take_diagnostics(),
        ));
    }
    if assembler.verbose {
        if let Some((start, bytes)) = assembler.output() {
            eprintln!(
                "Output: {out_name} ({} bytes, ${:04X}-${:04X})",
                bytes.len(),
                start,
                start as usize + bytes.len() - 1
            );
        }
    }

    if let Some(path) = &cli.symbols {
        let name = path.to_string_lossy().to_string();
        if let Err(err) = assembler.write_symbol_file(&name) {
            return Err(AsmRunError::new(
                AsmError::new(
                    AsmErrorKind::Io,
                    format!("cannot create symbol file {name}: {err}"),
                ),
                assembler.take_diagnostics(),
            ));
        }
    }

    if let Some(path) = &cli.listing {
        let name = path.to_string_lossy().to_string();
        if let Err(err) = assembler.write_listing_file(&name) {
            return Err(AsmRunError::new(
                AsmError::new(
                    AsmErrorKind::Io,
                    format!("cannot create listing file {name}: {err}"),
                ),
                assembler.take_diagnostics(),
            ));
        }
    }

    Ok(AsmRunReport::new(assembler.take_diagnostics()))
}
