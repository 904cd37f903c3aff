// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// CLI entrypoint for forge64.

fn main() {
    match forge64::assembler::run() {
        Ok(report) => {
            for diag in report.diagnostics() {
                eprintln!("{}", diag.format());
            }
            if report.error_count() > 0 {
                std::process::exit(1);
            }
        }
        Err(err) => {
            for diag in err.diagnostics() {
                eprintln!("{}", diag.format());
            }
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
