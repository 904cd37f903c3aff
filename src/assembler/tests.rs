// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// End-to-end tests for the two-pass driver.

use std::io::Write;

use super::error::Severity;
use super::{Assembler, OutputFormat};

fn assemble(source: &str) -> Assembler {
    let mut assembler = Assembler::new();
    assembler.assemble_string(source, "test.asm");
    assembler
}

fn assemble_ok(source: &str) -> Assembler {
    let assembler = assemble(source);
    if assembler.has_errors() {
        for diag in assembler.diagnostics() {
            eprintln!("{}", diag.format());
        }
        panic!("unexpected assembly errors");
    }
    assembler
}

fn output_bytes(assembler: &Assembler) -> (u16, Vec<u8>) {
    let (start, bytes) = assembler.output().expect("no output generated");
    (start, bytes.to_vec())
}

fn has_error_containing(assembler: &Assembler, needle: &str) -> bool {
    assembler
        .diagnostics()
        .iter()
        .any(|d| d.severity == Severity::Error && d.error.message().contains(needle))
}

fn has_warning_containing(assembler: &Assembler, needle: &str) -> bool {
    assembler
        .diagnostics()
        .iter()
        .any(|d| d.severity == Severity::Warning && d.error.message().contains(needle))
}

#[test]
fn hello_world_stub_produces_prg_image() {
    let assembler = assemble_ok(
        "*=$0801\n\
         !byte $0c, $08, $0a, $00, $9e, $32, $30, $36, $34, $00, $00, $00\n",
    );
    let mut prg = Vec::new();
    assembler.image().write_prg_file(&mut prg).unwrap();
    assert_eq!(
        prg,
        vec![
            0x01, 0x08, 0x0c, 0x08, 0x0a, 0x00, 0x9e, 0x32, 0x30, 0x36, 0x34, 0x00, 0x00, 0x00
        ]
    );
    assert_eq!(prg.len(), 14);
}

#[test]
fn forward_reference_stays_absolute() {
    // zp is unknown when the lda is sized, so the 3-byte absolute form is
    // committed; pass 2 may not shrink it.
    let assembler = assemble_ok("*=$1000\nlda zp\nzp = $42\nrts\n");
    let (start, bytes) = output_bytes(&assembler);
    assert_eq!(start, 0x1000);
    assert_eq!(bytes, vec![0xad, 0x42, 0x00, 0x60]);
}

#[test]
fn backward_reference_uses_zero_page() {
    let assembler = assemble_ok("*=$1000\nzp = $42\nlda zp\nrts\n");
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0xa5, 0x42, 0x60]);
}

#[test]
fn branch_out_of_range_fails() {
    let assembler = assemble("*=$1000\nbne target\n!fill 140, $ea\ntarget: rts\n");
    assert!(assembler.has_errors());
    assert!(has_error_containing(&assembler, "branch target out of range"));
}

#[test]
fn branch_in_range_encodes_offset() {
    let assembler = assemble_ok("*=$1000\nloop: dex\nbne loop\nrts\n");
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0xca, 0xd0, 0xfd, 0x60]);
}

#[test]
fn pseudopc_relocates_labels_not_bytes() {
    let assembler = assemble_ok(
        "*=$1000\n\
         !pseudopc $C000\n\
         loop: nop\n\
         bne loop\n\
         !realpc\n",
    );
    let (start, bytes) = output_bytes(&assembler);
    assert_eq!(start, 0x1000);
    assert_eq!(bytes, vec![0xea, 0xd0, 0xfd]);
    assert_eq!(assembler.symbol_value("loop"), Some(0xc000));
}

#[test]
fn nested_pseudopc_is_an_error() {
    let assembler = assemble("*=$1000\n!pseudopc $c000\n!pseudopc $d000\n");
    assert!(has_error_containing(&assembler, "nested !pseudopc"));
}

#[test]
fn realpc_without_pseudopc_is_an_error() {
    let assembler = assemble("*=$1000\n!realpc\n");
    assert!(has_error_containing(&assembler, "without matching !pseudopc"));
}

#[test]
fn anonymous_backward_branch() {
    let assembler = assemble_ok(
        "*=$0810\n\
         -\n\
         lda $d012\n\
         cmp #$80\n\
         bne -\n",
    );
    let (start, bytes) = output_bytes(&assembler);
    assert_eq!(start, 0x0810);
    assert_eq!(bytes, vec![0xad, 0x12, 0xd0, 0xc9, 0x80, 0xd0, 0xf9]);
}

#[test]
fn anonymous_forward_branch() {
    let assembler = assemble_ok("*=$1000\nbeq +\nnop\n+\nrts\n");
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0xf0, 0x01, 0xea, 0x60]);
}

#[test]
fn anonymous_forward_data_reference() {
    // A non-branch forward reference pins the absolute form in pass 1
    let assembler = assemble_ok("*=$1000\nlda +\n+\nrts\n");
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0xad, 0x03, 0x10, 0x60]);
}

#[test]
fn for_loop_emits_each_iteration() {
    let assembler = assemble_ok("*=$1000\n!for i, 1, 3\n!byte i*2\n!end\n");
    let (start, bytes) = output_bytes(&assembler);
    assert_eq!(start, 0x1000);
    assert_eq!(bytes, vec![0x02, 0x04, 0x06]);
    assert_eq!(assembler.symbol_value("i"), Some(3));
}

#[test]
fn for_loop_counts_down_when_reversed() {
    let assembler = assemble_ok("*=$1000\n!for i, 3, 1\n!byte i\n!end\n");
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x03, 0x02, 0x01]);
}

#[test]
fn while_loop_runs_until_condition_clears() {
    let assembler = assemble_ok(
        "*=$1000\n\
         i = 0\n\
         !while i < 3\n\
         !byte i\n\
         i = i + 1\n\
         !end\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x00, 0x01, 0x02]);
    assert_eq!(assembler.symbol_value("i"), Some(3));
}

#[test]
fn macro_expansion_substitutes_arguments() {
    let assembler = assemble_ok(
        "*=$1000\n\
         !macro setborder col\n\
         lda #col\n\
         sta $d020\n\
         !endmacro\n\
         +setborder 2\n\
         rts\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0xa9, 0x02, 0x8d, 0x20, 0xd0, 0x60]);
}

#[test]
fn macro_expansions_get_private_zones() {
    let assembler = assemble_ok(
        "*=$1000\n\
         !macro delay\n\
         .w: dex\n\
         bne .w\n\
         !endmacro\n\
         +delay\n\
         +delay\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0xca, 0xd0, 0xfd, 0xca, 0xd0, 0xfd]);
    assert_eq!(assembler.symbol_value("_macro_1.w"), Some(0x1000));
    assert_eq!(assembler.symbol_value("_macro_2.w"), Some(0x1003));
}

#[test]
fn macro_argument_count_is_checked() {
    let assembler = assemble(
        "*=$1000\n!macro two a, b\n!byte a, b\n!endmacro\n+two 1\n",
    );
    assert!(has_error_containing(&assembler, "expects 2 arguments, got 1"));
}

#[test]
fn undefined_macro_is_an_error() {
    let assembler = assemble("*=$1000\n+nothere\n");
    assert!(has_error_containing(&assembler, "undefined macro"));
}

#[test]
fn unterminated_macro_is_an_error() {
    let assembler = assemble("*=$1000\n!macro broken\nnop\n");
    assert!(has_error_containing(&assembler, "unterminated macro"));
}

#[test]
fn conditional_if_else_endif() {
    let assembler = assemble_ok(
        "n = 1\n*=$1000\n!if n\nlda #1\n!else\nlda #2\n!endif\nrts\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0xa9, 0x01, 0x60]);

    let assembler = assemble_ok(
        "n = 0\n*=$1000\n!if n\nlda #1\n!else\nlda #2\n!endif\nrts\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0xa9, 0x02, 0x60]);
}

#[test]
fn undefined_condition_is_false_in_pass_1() {
    let assembler = assemble_ok("*=$1000\n!if FUTURE\nnop\n!endif\nrts\n");
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x60]);
}

#[test]
fn ifdef_and_ifndef() {
    let assembler = assemble_ok(
        "flag = 1\n*=$1000\n!ifdef flag\n!byte 1\n!endif\n!ifndef other\n!byte 2\n!endif\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x01, 0x02]);
}

#[test]
fn nested_conditionals_respect_parents() {
    let assembler = assemble_ok(
        "*=$1000\n\
         !if 0\n\
         !if 1\n\
         !byte 1\n\
         !endif\n\
         !else\n\
         !byte 2\n\
         !endif\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x02]);
}

#[test]
fn duplicate_else_is_an_error() {
    let assembler = assemble("*=$1000\n!if 1\n!else\n!else\n!endif\n");
    assert!(has_error_containing(&assembler, "duplicate !else"));
}

#[test]
fn unterminated_if_is_an_error() {
    let assembler = assemble("*=$1000\n!if 1\nnop\n");
    assert!(has_error_containing(&assembler, "unterminated !if"));
}

#[test]
fn endif_without_if_is_an_error() {
    let assembler = assemble("*=$1000\n!endif\n");
    assert!(has_error_containing(&assembler, "!endif without matching !if"));
}

#[test]
fn data_directives_emit_expected_bytes() {
    let assembler = assemble_ok(
        "*=$1000\n\
         !byte $0c, 8\n\
         !word $1234\n\
         !text \"AB\"\n\
         !pet \"ab\"\n\
         !scr \"@a\"\n\
         !null \"HI\"\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(
        bytes,
        vec![
            0x0c, 0x08, // !byte
            0x34, 0x12, // !word little-endian
            0x41, 0x42, // !text
            0x41, 0x42, // !pet folds to uppercase
            0x00, 0x01, // !scr
            0x48, 0x49, 0x00, // !null
        ]
    );
}

#[test]
fn word_alias_16_and_byte_alias_08() {
    let assembler = assemble_ok("*=$1000\n!08 $ff\n!16 $abcd\n");
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0xff, 0xcd, 0xab]);
}

#[test]
fn byte_truncation_warns_but_succeeds() {
    let assembler = assemble_ok("*=$1000\n!byte 300\n");
    assert!(has_warning_containing(&assembler, "truncated"));
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x2c]);
}

#[test]
fn fill_align_and_skip() {
    let assembler = assemble_ok("*=$1000\n!fill 3, $aa\n!align 16\n!byte 1\n");
    let (start, bytes) = output_bytes(&assembler);
    assert_eq!(start, 0x1000);
    let mut expected = vec![0xaa, 0xaa, 0xaa];
    expected.extend(std::iter::repeat(0).take(13));
    expected.push(0x01);
    assert_eq!(bytes, expected);

    let assembler = assemble_ok("*=$1000\n!byte 1\n!skip 2\n!byte 2\n");
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x01, 0x00, 0x00, 0x02]);
    assert!(!assembler.image().is_written(0x1001));
    assert!(!assembler.image().is_written(0x1002));
}

#[test]
fn align_warns_on_non_power_of_two() {
    let assembler = assemble_ok("*=$1000\n!align 3\n!byte 1\n");
    assert!(has_warning_containing(&assembler, "not a power of 2"));
}

#[test]
fn fill_count_must_be_constant() {
    let assembler = assemble("*=$1000\n!fill later\nlater = 4\n");
    assert!(has_error_containing(&assembler, "must be constant"));
}

#[test]
fn basic_stub_defaults_to_next_address() {
    let assembler = assemble_ok("*=$0801\n!basic\nlda #0\nrts\n");
    let (start, bytes) = output_bytes(&assembler);
    assert_eq!(start, 0x0801);
    // Stub: link $080B, line 10, SYS token, "2061" ($080D), terminators
    assert_eq!(
        &bytes[..12],
        &[0x0b, 0x08, 0x0a, 0x00, 0x9e, 0x32, 0x30, 0x36, 0x31, 0x00, 0x00, 0x00]
    );
    assert_eq!(&bytes[12..], &[0xa9, 0x00, 0x60]);
}

#[test]
fn basic_stub_with_explicit_line_and_address() {
    let assembler = assemble_ok("*=$0801\n!basic 2025, $c000\nrts\n");
    let (_, bytes) = output_bytes(&assembler);
    // line 2025 = $07E9, SYS 49152 is five digits
    assert_eq!(bytes[2], 0xe9);
    assert_eq!(bytes[3], 0x07);
    assert_eq!(bytes[4], 0x9e);
    assert_eq!(&bytes[5..10], b"49152");
}

#[test]
fn zone_directive_scopes_local_labels() {
    let assembler = assemble_ok("*=$1000\n!zone irq\n.wait: nop\nbne .wait\n");
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0xea, 0xd0, 0xfd]);
    assert_eq!(assembler.symbol_value("irq.wait"), Some(0x1000));
}

#[test]
fn global_labels_rebind_the_zone() {
    let assembler = assemble_ok(
        "*=$1000\n\
         first:\n\
         .loop: dex\n\
         bne .loop\n\
         second:\n\
         .loop: dex\n\
         bne .loop\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0xca, 0xd0, 0xfd, 0xca, 0xd0, 0xfd]);
    assert_eq!(assembler.symbol_value("first.loop"), Some(0x1000));
    assert_eq!(assembler.symbol_value("second.loop"), Some(0x1003));
}

#[test]
fn local_label_without_zone_is_global_scoped() {
    let assembler = assemble_ok("*=$1000\n.start: nop\nbne .start\n");
    assert_eq!(assembler.symbol_value("_global.start"), Some(0x1000));
}

#[test]
fn anonymous_zone_names_are_unique() {
    let assembler = assemble_ok(
        "*=$1000\n!zone\n.a: nop\n!zone\n.a: nop\n",
    );
    assert_eq!(assembler.symbol_value("_zone_1.a"), Some(0x1000));
    assert_eq!(assembler.symbol_value("_zone_2.a"), Some(0x1001));
}

#[test]
fn cpu_gating_rejects_illegal_opcodes() {
    let assembler = assemble("*=$1000\n!cpu 6502\nlax $10\n");
    assert!(has_error_containing(&assembler, "illegal opcode"));

    let assembler = assemble("*=$1000\n!cpu \"65c02\"\nslo $10\n");
    assert!(has_error_containing(&assembler, "illegal opcode"));
}

#[test]
fn default_cpu_accepts_illegal_opcodes() {
    let assembler = assemble_ok("*=$1000\nlax $10\ndcp $20\n");
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0xa7, 0x10, 0xc7, 0x20]);
}

#[test]
fn unknown_cpu_is_an_error() {
    let assembler = assemble("*=$1000\n!cpu \"z80\"\n");
    assert!(has_error_containing(&assembler, "unknown CPU type"));
}

#[test]
fn undefined_symbol_fails_in_pass_2() {
    let assembler = assemble("*=$1000\njmp nowhere\n");
    assert!(has_error_containing(&assembler, "undefined symbol"));
}

#[test]
fn duplicate_constant_is_an_error() {
    let assembler = assemble("n = 1\nn = 2\n*=$1000\nrts\n");
    assert!(has_error_containing(&assembler, "already defined as constant"));
}

#[test]
fn user_error_and_warning_directives() {
    let assembler = assemble("*=$1000\n!error \"boom\"\n");
    assert!(has_error_containing(&assembler, "boom"));

    let assembler = assemble_ok("*=$1000\n!warn \"watch out\"\nrts\n");
    assert!(has_warning_containing(&assembler, "watch out"));
}

#[test]
fn unknown_directive_warns_and_continues() {
    let assembler = assemble_ok("*=$1000\n!bogus 1\nrts\n");
    assert!(has_warning_containing(&assembler, "unknown directive"));
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x60]);
}

#[test]
fn command_line_defines_survive_reset() {
    let mut assembler = Assembler::new();
    assembler.define_symbol("DEBUG").unwrap();
    assembler.define_symbol("N=$10").unwrap();

    let source = "*=$1000\n!ifdef DEBUG\n!byte N\n!endif\n";
    assembler.assemble_string(source, "test.asm");
    assert!(!assembler.has_errors());
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x10]);

    // Defines are re-applied on the second run
    assembler.assemble_string(source, "test.asm");
    assert!(!assembler.has_errors());
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x10]);
}

#[test]
fn assembly_is_deterministic_across_runs() {
    let source = "*=$1000\nstart: lda #<start\nldx #>start\njmp start\n";
    let first = assemble_ok(source);
    let second = assemble_ok(source);
    assert_eq!(output_bytes(&first), output_bytes(&second));
}

#[test]
fn symbol_file_is_sorted_by_value_then_name() {
    let assembler = assemble_ok("*=$1000\nstart: rts\nzp = $42\n");
    let mut out = Vec::new();
    assembler.symbols().write_vice(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text, "al C:0042 .zp\nal C:1000 .start\n");
}

#[test]
fn source_include_is_textual() {
    let dir = tempfile::tempdir().unwrap();
    let inc_path = dir.path().join("inc.asm");
    let main_path = dir.path().join("main.asm");
    let mut inc = std::fs::File::create(&inc_path).unwrap();
    writeln!(inc, "lda #$01").unwrap();
    let mut main = std::fs::File::create(&main_path).unwrap();
    writeln!(main, "*=$1000").unwrap();
    writeln!(main, "!source \"inc.asm\"").unwrap();
    writeln!(main, "rts").unwrap();

    let mut assembler = Assembler::new();
    let errors = assembler.assemble_file(&main_path.to_string_lossy());
    assert_eq!(errors, 0);
    let (_, bytes) = output_bytes(&assembler);

    // Inclusion must behave exactly like pasting the text in place
    let direct = assemble_ok("*=$1000\nlda #$01\nrts\n");
    assert_eq!(bytes, output_bytes(&direct).1);
}

#[test]
fn missing_include_is_an_error() {
    let assembler = assemble("*=$1000\n!source \"missing.asm\"\n");
    assert!(has_error_containing(&assembler, "cannot find include file"));
}

#[test]
fn binary_directive_splices_file_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let bin_path = dir.path().join("data.bin");
    std::fs::write(&bin_path, [0x11, 0x22, 0x33, 0x44]).unwrap();
    let main_path = dir.path().join("main.asm");
    std::fs::write(
        &main_path,
        "*=$1000\n!binary \"data.bin\"\n!binary \"data.bin\", 2, 1\n",
    )
    .unwrap();

    let mut assembler = Assembler::new();
    let errors = assembler.assemble_file(&main_path.to_string_lossy());
    assert_eq!(errors, 0);
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x11, 0x22, 0x33, 0x44, 0x22, 0x33]);
}

#[test]
fn prg_and_raw_output_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut assembler = assemble_ok("*=$1000\nlda #$01\nrts\n");

    let prg_path = dir.path().join("out.prg");
    assembler.format = OutputFormat::Prg;
    assembler.write_output(&prg_path.to_string_lossy()).unwrap();
    assert_eq!(
        std::fs::read(&prg_path).unwrap(),
        vec![0x00, 0x10, 0xa9, 0x01, 0x60]
    );

    let raw_path = dir.path().join("out.bin");
    assembler.format = OutputFormat::Raw;
    assembler.write_output(&raw_path.to_string_lossy()).unwrap();
    assert_eq!(std::fs::read(&raw_path).unwrap(), vec![0xa9, 0x01, 0x60]);
}

#[test]
fn empty_image_writes_no_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut assembler = assemble_ok("n = 1\n");
    let path = dir.path().join("out.prg");
    assembler.write_output(&path.to_string_lossy()).unwrap();
    assert!(!path.exists());
    assert!(has_warning_containing(&assembler, "no output generated"));
}

#[test]
fn listing_file_contains_addresses_bytes_and_symbols() {
    let dir = tempfile::tempdir().unwrap();
    let assembler = assemble_ok("*=$1000\nstart: lda #$01\nrts\n");
    let path = dir.path().join("out.lst");
    assembler
        .write_listing_file(&path.to_string_lossy())
        .unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("; forge64 Listing File"));
    assert!(text.contains("1000  A9 01"));
    assert!(text.contains("lda #$01"));
    assert!(text.contains("; Symbol Table"));
    assert!(text.contains("al C:1000 .start"));
}

#[test]
fn listing_continues_long_data_rows() {
    let dir = tempfile::tempdir().unwrap();
    let assembler = assemble_ok("*=$1000\n!byte 1, 2, 3, 4, 5, 6\n");
    let path = dir.path().join("out.lst");
    assembler
        .write_listing_file(&path.to_string_lossy())
        .unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("1000  01 02 03 04"));
    assert!(text.contains("1004  05 06"));
}

#[test]
fn instruction_sizes_match_mode_table() {
    let assembler = assemble_ok(
        "*=$1000\n\
         nop\n\
         lda #1\n\
         lda $10\n\
         lda $1234\n\
         jmp ($fffc)\n\
         lda ($10,x)\n\
         lda ($10),y\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(
        bytes,
        vec![
            0xea, // nop
            0xa9, 0x01, // lda #
            0xa5, 0x10, // lda zp
            0xad, 0x34, 0x12, // lda abs
            0x6c, 0xfc, 0xff, // jmp (ind)
            0xa1, 0x10, // lda (zp,x)
            0xb1, 0x10, // lda (zp),y
        ]
    );
}

#[test]
fn current_pc_marker_in_expressions() {
    let assembler = assemble_ok("*=$1000\njmp *\n");
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x4c, 0x00, 0x10]);
}

#[test]
fn low_and_high_byte_operators() {
    let assembler = assemble_ok("*=$1000\ntarget = $1234\nlda #<target\nldx #>target\n");
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0xa9, 0x34, 0xa2, 0x12]);
}

#[test]
fn loops_allow_symbol_reassignment() {
    // A reassignment inside a loop body must not trip the constant rule
    let assembler = assemble_ok(
        "*=$1000\nbase = 0\n!for i, 1, 2\nbase = base + 8\n!byte base\n!end\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x08, 0x10]);
}

#[test]
fn nested_loops_multiply() {
    let assembler = assemble_ok(
        "*=$1000\n!for a, 0, 1\n!for b, 0, 1\n!byte a*2+b\n!end\n!end\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x00, 0x01, 0x02, 0x03]);
}

#[test]
fn macro_inside_loop_body() {
    let assembler = assemble_ok(
        "*=$1000\n\
         !macro put v\n\
         !byte v\n\
         !endmacro\n\
         !for i, 1, 2\n\
         +put i\n\
         !end\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x01, 0x02]);
}

#[test]
fn too_many_errors_stops_the_pass() {
    let mut source = String::from("*=$1000\n");
    for _ in 0..150 {
        source.push_str("!error \"x\"\n");
    }
    let assembler = assemble(&source);
    assert_eq!(assembler.error_count(), super::MAX_ERRORS);
}

#[test]
fn label_values_are_stable_between_passes() {
    let assembler = assemble_ok(
        "*=$1000\n\
         start: lda data\n\
         mid: sta $0400\n\
         data: !byte 7\n",
    );
    assert_eq!(assembler.symbol_value("start"), Some(0x1000));
    assert_eq!(assembler.symbol_value("mid"), Some(0x1003));
    assert_eq!(assembler.symbol_value("data"), Some(0x1006));
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0xad, 0x06, 0x10, 0x8d, 0x00, 0x04, 0x07]);
}

#[test]
fn zeropage_labels_keep_small_encodings() {
    let assembler = assemble_ok("*=$00fb\nptr: !byte 0\n*=$1000\nlda ptr\n");
    let (start, bytes) = output_bytes(&assembler);
    assert_eq!(start, 0x00fb);
    assert_eq!(assembler.symbol_value("ptr"), Some(0xfb));
    // lda ptr assembles as the 2-byte zero-page form
    assert_eq!(&bytes[bytes.len() - 2..], &[0xa5, 0xfb]);
}

// ---------- expression semantics through data directives ----------

fn byte_of(expr_src: &str) -> u8 {
    let assembler = assemble_ok(&format!("*=$1000\n!byte {expr_src}\n"));
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes.len(), 1);
    bytes[0]
}

fn word_of(expr_src: &str) -> u16 {
    let assembler = assemble_ok(&format!("*=$1000\n!word {expr_src}\n"));
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes.len(), 2);
    u16::from(bytes[0]) | (u16::from(bytes[1]) << 8)
}

#[test]
fn expression_arithmetic() {
    assert_eq!(byte_of("2+3"), 5);
    assert_eq!(byte_of("10-4"), 6);
    assert_eq!(byte_of("6*7"), 42);
    assert_eq!(byte_of("100/4"), 25);
    assert_eq!(byte_of("10%3"), 1);
    assert_eq!(byte_of("1+2+3+4"), 10);
    assert_eq!(byte_of("10-3+2"), 9);
}

#[test]
fn expression_precedence_rules() {
    assert_eq!(byte_of("2+3*4"), 14);
    assert_eq!(byte_of("3*4+2"), 14);
    assert_eq!(byte_of("20-2*3"), 14);
    assert_eq!(byte_of("(2+3)*4"), 20);
    assert_eq!(byte_of("((2+3))*(1+3)"), 20);
    assert_eq!(word_of("1<<4+4"), 0x100);
    assert_eq!(byte_of("3&1|4"), 5);
}

#[test]
fn expression_bitwise_and_shifts() {
    assert_eq!(byte_of("$ff & $0f"), 0x0f);
    assert_eq!(byte_of("$f0 | $0f"), 0xff);
    assert_eq!(byte_of("$ff ^ $0f"), 0xf0);
    assert_eq!(byte_of("1 << 4"), 0x10);
    assert_eq!(byte_of("$80 >> 3"), 0x10);
    assert_eq!(word_of("1 << 2 << 3"), 0x20);
}

#[test]
fn expression_comparisons() {
    assert_eq!(byte_of("5 = 5"), 1);
    assert_eq!(byte_of("5 = 6"), 0);
    assert_eq!(byte_of("5 <> 6"), 1);
    assert_eq!(byte_of("5 <> 5"), 0);
    assert_eq!(byte_of("4 < 5"), 1);
    assert_eq!(byte_of("5 > 4"), 1);
    assert_eq!(byte_of("5 <= 5"), 1);
    assert_eq!(byte_of("5 >= 6"), 0);
}

#[test]
fn expression_unary_operators() {
    assert_eq!(word_of("-5 & $ffff"), 0xfffb);
    assert_eq!(byte_of("~$f0 & $ff"), 0x0f);
    assert_eq!(byte_of("!0"), 1);
    assert_eq!(byte_of("!42"), 0);
    assert_eq!(byte_of("<$1234"), 0x34);
    assert_eq!(byte_of(">$1234"), 0x12);
    assert_eq!(byte_of("<$34"), 0x34);
    assert_eq!(byte_of(">$34"), 0x00);
    assert_eq!(byte_of(">$1234 + 1"), 0x13);
}

#[test]
fn expression_division_by_zero_yields_zero() {
    assert_eq!(byte_of("10/0"), 0);
    assert_eq!(byte_of("10%0"), 0);
}

#[test]
fn expression_char_literals() {
    assert_eq!(byte_of("'A'"), 0x41);
    assert_eq!(byte_of("'A'+1"), 0x42);
    assert_eq!(byte_of("'\\n'"), 0x0d);
}

#[test]
fn expression_current_pc() {
    // * inside the operand is the PC at the start of the statement
    let assembler = assemble_ok("*=$1000\n!word *\n!word *+2\n");
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x00, 0x10, 0x04, 0x10]);
}

// ---------- opcode encodings ----------

/// Encoding sweep: each line assembles to exactly the expected bytes.
#[test]
fn opcode_encoding_sweep() {
    let cases: &[(&str, &[u8])] = &[
        ("lda #$42", &[0xa9, 0x42]),
        ("lda $42", &[0xa5, 0x42]),
        ("lda $42,x", &[0xb5, 0x42]),
        ("lda $1234", &[0xad, 0x34, 0x12]),
        ("lda $1234,x", &[0xbd, 0x34, 0x12]),
        ("lda $1234,y", &[0xb9, 0x34, 0x12]),
        ("lda ($42,x)", &[0xa1, 0x42]),
        ("lda ($42),y", &[0xb1, 0x42]),
        ("sta $42", &[0x85, 0x42]),
        ("sta $1234", &[0x8d, 0x34, 0x12]),
        ("stx $42,y", &[0x96, 0x42]),
        ("sty $42,x", &[0x94, 0x42]),
        ("ldx #$10", &[0xa2, 0x10]),
        ("ldx $42,y", &[0xb6, 0x42]),
        ("ldy #$10", &[0xa0, 0x10]),
        ("adc #$01", &[0x69, 0x01]),
        ("sbc #$01", &[0xe9, 0x01]),
        ("and #$0f", &[0x29, 0x0f]),
        ("ora #$f0", &[0x09, 0xf0]),
        ("eor #$ff", &[0x49, 0xff]),
        ("cmp #$42", &[0xc9, 0x42]),
        ("cpx #$42", &[0xe0, 0x42]),
        ("cpy #$42", &[0xc0, 0x42]),
        ("asl", &[0x0a]),
        ("asl a", &[0x0a]),
        ("asl $42", &[0x06, 0x42]),
        ("lsr a", &[0x4a]),
        ("rol a", &[0x2a]),
        ("ror a", &[0x6a]),
        ("inc $42", &[0xe6, 0x42]),
        ("dec $1234", &[0xce, 0x34, 0x12]),
        ("inx", &[0xe8]),
        ("iny", &[0xc8]),
        ("dex", &[0xca]),
        ("dey", &[0x88]),
        ("jmp $1234", &[0x4c, 0x34, 0x12]),
        ("jmp ($1234)", &[0x6c, 0x34, 0x12]),
        ("jsr $1234", &[0x20, 0x34, 0x12]),
        ("rts", &[0x60]),
        ("rti", &[0x40]),
        ("brk", &[0x00]),
        ("nop", &[0xea]),
        ("php", &[0x08]),
        ("plp", &[0x28]),
        ("pha", &[0x48]),
        ("pla", &[0x68]),
        ("tax", &[0xaa]),
        ("txa", &[0x8a]),
        ("tay", &[0xa8]),
        ("tya", &[0x98]),
        ("tsx", &[0xba]),
        ("txs", &[0x9a]),
        ("sec", &[0x38]),
        ("clc", &[0x18]),
        ("sei", &[0x78]),
        ("cli", &[0x58]),
        ("sed", &[0xf8]),
        ("cld", &[0xd8]),
        ("clv", &[0xb8]),
        ("bit $42", &[0x24, 0x42]),
        ("bit $1234", &[0x2c, 0x34, 0x12]),
    ];

    for (src, expected) in cases {
        let assembler = assemble_ok(&format!("*=$1000\n{src}\n"));
        let (_, bytes) = output_bytes(&assembler);
        assert_eq!(&bytes, expected, "encoding mismatch for {src}");
    }
}

#[test]
fn undocumented_opcode_encoding_sweep() {
    let cases: &[(&str, &[u8])] = &[
        ("lax $42", &[0xa7, 0x42]),
        ("lax ($42),y", &[0xb3, 0x42]),
        ("sax $42", &[0x87, 0x42]),
        ("dcp $1234", &[0xcf, 0x34, 0x12]),
        ("dcm $1234", &[0xcf, 0x34, 0x12]),
        ("isc $42", &[0xe7, 0x42]),
        ("isb $42", &[0xe7, 0x42]),
        ("ins $42", &[0xe7, 0x42]),
        ("slo $42", &[0x07, 0x42]),
        ("aso $42", &[0x07, 0x42]),
        ("rla $42", &[0x27, 0x42]),
        ("sre $42", &[0x47, 0x42]),
        ("lse $42", &[0x47, 0x42]),
        ("rra $42", &[0x67, 0x42]),
        ("anc #$42", &[0x0b, 0x42]),
        ("alr #$42", &[0x4b, 0x42]),
        ("asr #$42", &[0x4b, 0x42]),
        ("arr #$42", &[0x6b, 0x42]),
        ("xaa #$42", &[0x8b, 0x42]),
        ("ane #$42", &[0x8b, 0x42]),
        ("sha $1234,y", &[0x9f, 0x34, 0x12]),
        ("ahx $1234,y", &[0x9f, 0x34, 0x12]),
        ("tas $1234,y", &[0x9b, 0x34, 0x12]),
        ("shx $1234,y", &[0x9e, 0x34, 0x12]),
        ("shy $1234,x", &[0x9c, 0x34, 0x12]),
        ("las $1234,y", &[0xbb, 0x34, 0x12]),
        ("lar $1234,y", &[0xbb, 0x34, 0x12]),
        ("usb #$42", &[0xeb, 0x42]),
        ("dop #$42", &[0x80, 0x42]),
        ("top $1234", &[0x0c, 0x34, 0x12]),
        ("jam", &[0x02]),
        ("kil", &[0x02]),
        ("hlt", &[0x02]),
    ];

    for (src, expected) in cases {
        let assembler = assemble_ok(&format!("*=$1000\n{src}\n"));
        let (_, bytes) = output_bytes(&assembler);
        assert_eq!(&bytes, expected, "encoding mismatch for {src}");
    }
}

#[test]
fn all_branch_mnemonics_encode() {
    let cases: &[(&str, u8)] = &[
        ("bcc", 0x90),
        ("bcs", 0xb0),
        ("beq", 0xf0),
        ("bmi", 0x30),
        ("bne", 0xd0),
        ("bpl", 0x10),
        ("bvc", 0x50),
        ("bvs", 0x70),
    ];
    for (mnemonic, opcode) in cases {
        let assembler = assemble_ok(&format!("*=$1000\nhere: {mnemonic} here\n"));
        let (_, bytes) = output_bytes(&assembler);
        assert_eq!(bytes, vec![*opcode, 0xfe], "encoding mismatch for {mnemonic}");
    }
}

// ---------- pseudopc interleaving ----------

#[test]
fn pseudopc_interleaves_with_real_code() {
    let assembler = assemble_ok(
        "*=$1000\n\
         lda #$01\n\
         !pseudopc $C000\n\
         lda #$02\n\
         nop\n\
         !realpc\n\
         lda #$03\n\
         rts\n",
    );
    let (start, bytes) = output_bytes(&assembler);
    assert_eq!(start, 0x1000);
    assert_eq!(
        bytes,
        vec![0xa9, 0x01, 0xa9, 0x02, 0xea, 0xa9, 0x03, 0x60]
    );
}

#[test]
fn pseudopc_label_values() {
    let assembler = assemble_ok(
        "*=$1000\n\
         start:\n\
         !pseudopc $C000\n\
         pseudo_start:\n\
         nop\n\
         pseudo_end:\n\
         !realpc\n\
         real_end:\n\
         rts\n",
    );
    assert_eq!(assembler.symbol_value("start"), Some(0x1000));
    assert_eq!(assembler.symbol_value("pseudo_start"), Some(0xc000));
    assert_eq!(assembler.symbol_value("pseudo_end"), Some(0xc001));
    assert_eq!(assembler.symbol_value("real_end"), Some(0x1001));
}

// ---------- symbols and assignments ----------

#[test]
fn symbol_references_are_case_insensitive() {
    let assembler = assemble_ok("value = $42\n*=$1000\nlda VALUE\nldx Value\n");
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0xa5, 0x42, 0xa6, 0x42]);
}

#[test]
fn assignment_from_expression() {
    let assembler = assemble_ok("base = $0400\nofs = base + $28\n*=$1000\n!word ofs\n");
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x28, 0x04]);
    assert_eq!(assembler.symbol_value("ofs"), Some(0x0428));
}

#[test]
fn label_arithmetic_in_operands() {
    let assembler = assemble_ok(
        "*=$1000\n\
         table: !byte 1, 2, 3, 4\n\
         lda table+2\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(&bytes[4..], &[0xad, 0x02, 0x10]);
}

#[test]
fn labels_on_zero_page_get_the_flag() {
    let assembler = assemble_ok("*=$00fb\nptr:\n*=$1000\nrts\n");
    let sym = assembler.symbols().lookup("ptr").unwrap();
    assert!(sym
        .flags
        .contains(crate::symbol_table::SymbolFlags::ZEROPAGE));
}

// ---------- macros, loops and conditionals combined ----------

#[test]
fn macro_calls_nest() {
    let assembler = assemble_ok(
        "*=$1000\n\
         !macro inner v\n\
         !byte v\n\
         !endmacro\n\
         !macro outer v\n\
         +inner v\n\
         +inner v\n\
         !endmacro\n\
         +outer 7\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x07, 0x07]);
}

#[test]
fn macro_with_multiple_arguments() {
    let assembler = assemble_ok(
        "*=$1000\n\
         !macro store val, addr\n\
         lda #val\n\
         sta addr\n\
         !endmacro\n\
         +store 1, $d020\n\
         +store 2, $d021\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(
        bytes,
        vec![0xa9, 0x01, 0x8d, 0x20, 0xd0, 0xa9, 0x02, 0x8d, 0x21, 0xd0]
    );
}

#[test]
fn conditional_inside_macro_body() {
    let assembler = assemble_ok(
        "*=$1000\n\
         !macro opt flag\n\
         !if flag\n\
         nop\n\
         !else\n\
         rts\n\
         !endif\n\
         !endmacro\n\
         +opt 1\n\
         +opt 0\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0xea, 0x60]);
}

#[test]
fn conditional_inside_loop_body() {
    let assembler = assemble_ok(
        "*=$1000\n\
         !for i, 0, 3\n\
         !if i & 1\n\
         !byte i\n\
         !endif\n\
         !end\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x01, 0x03]);
}

#[test]
fn while_with_undefined_condition_errors() {
    let assembler = assemble("*=$1000\n!while missing\nnop\n!end\n");
    assert!(has_error_containing(&assembler, "undefined symbol in !while"));
}

#[test]
fn for_loop_bounds_must_be_defined() {
    let assembler = assemble("*=$1000\n!for i, 0, later\n!byte i\n!end\nlater = 3\n");
    assert!(has_error_containing(
        &assembler,
        "start and end must be defined"
    ));
}

#[test]
fn single_iteration_loop() {
    let assembler = assemble_ok("*=$1000\n!for i, 5, 5\n!byte i\n!end\n");
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x05]);
}

#[test]
fn loop_variable_visible_as_symbol() {
    // The loop variable is usable in expressions that name it indirectly
    let assembler = assemble_ok(
        "*=$1000\n!for i, 1, 2\ncopy = i\n!byte copy\n!end\n",
    );
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x01, 0x02]);
}

// ---------- listings with cycle counts ----------

#[test]
fn listing_shows_cycle_counts_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut assembler = Assembler::new();
    assembler.show_cycles = true;
    assembler.assemble_string("*=$1000\nlda #$01\nlda $1234,x\nrts\n", "test.asm");
    assert!(!assembler.has_errors());

    let path = dir.path().join("out.lst");
    assembler
        .write_listing_file(&path.to_string_lossy())
        .unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    // lda # is 2 cycles, lda abs,x is 4 with page penalty, rts is 6
    assert!(text.contains("; Address  Bytes         Cycles  Source"));
    assert!(text.contains(" 2 "));
    assert!(text.contains(" 4+"));
    assert!(text.contains(" 6 "));
}

// ---------- includes ----------

#[test]
fn nested_includes_resolve_relative_to_including_file() {
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("sub");
    std::fs::create_dir(&sub).unwrap();
    std::fs::write(sub.join("leaf.asm"), "lda #$07\n").unwrap();
    std::fs::write(sub.join("mid.asm"), "!source \"leaf.asm\"\nnop\n").unwrap();
    std::fs::write(
        dir.path().join("main.asm"),
        "*=$1000\n!source \"sub/mid.asm\"\nrts\n",
    )
    .unwrap();

    let mut assembler = Assembler::new();
    let errors =
        assembler.assemble_file(&dir.path().join("main.asm").to_string_lossy());
    assert_eq!(errors, 0);
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0xa9, 0x07, 0xea, 0x60]);
}

#[test]
fn include_search_paths_are_consulted() {
    let dir = tempfile::tempdir().unwrap();
    let libs = dir.path().join("libs");
    std::fs::create_dir(&libs).unwrap();
    std::fs::write(libs.join("util.asm"), "nop\n").unwrap();
    let main = dir.path().join("main.asm");
    std::fs::write(&main, "*=$1000\n!source \"util.asm\"\nrts\n").unwrap();

    let mut assembler = Assembler::new();
    assembler.add_include_path(libs);
    let errors = assembler.assemble_file(&main.to_string_lossy());
    assert_eq!(errors, 0);
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0xea, 0x60]);
}

#[test]
fn symbols_cross_include_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("defs.asm"), "border = $d020\n").unwrap();
    let main = dir.path().join("main.asm");
    std::fs::write(&main, "*=$1000\n!source \"defs.asm\"\nsta border\n").unwrap();

    let mut assembler = Assembler::new();
    let errors = assembler.assemble_file(&main.to_string_lossy());
    assert_eq!(errors, 0);
    let (_, bytes) = output_bytes(&assembler);
    assert_eq!(bytes, vec![0x8d, 0x20, 0xd0]);
}

// ---------- origin handling ----------

#[test]
fn multiple_origins_leave_gaps_in_the_image() {
    let assembler = assemble_ok("*=$1000\n!byte 1\n*=$1004\n!byte 2\n");
    let (start, bytes) = output_bytes(&assembler);
    assert_eq!(start, 0x1000);
    assert_eq!(bytes, vec![0x01, 0x00, 0x00, 0x00, 0x02]);
    assert!(assembler.image().is_written(0x1000));
    assert!(!assembler.image().is_written(0x1001));
    assert!(assembler.image().is_written(0x1004));
}

#[test]
fn org_accepts_expressions() {
    let assembler = assemble_ok("base = $1000\n*=base+$10\n!byte 1\n");
    let (start, _) = output_bytes(&assembler);
    assert_eq!(start, 0x1010);
}

#[test]
fn org_requires_a_defined_address() {
    let assembler = assemble("*=later\nlater = $1000\n!byte 1\n");
    assert!(has_error_containing(&assembler, "org address must be constant"));
}
