//! End to end: protocol source through the registry into compiled instructions.

use std::rc::Rc;

use streamproto::device::{decode_program, opcode, render_program, ExtraInput};
use streamproto::diag::Severity;
use streamproto::instruction::encode;
use streamproto::{
    Backend, BasicDevice, CollectingDiagnostics, CompiledProtocol, CompilerConfig, ErrorKind, FormatKind,
    Instruction, ProtocolError, Registry, Sentinel, StdFormats,
};

const END: Instruction = Instruction::Control(Sentinel::End);

fn lit(bytes: &[u8]) -> Instruction {
    Instruction::Literal(bytes.to_vec())
}

fn device() -> BasicDevice {
    BasicDevice::new().with_field("VOLT", vec![0x01, 0x00])
}

fn compile(src: &str, request: &str) -> Result<CompiledProtocol, ProtocolError> {
    let dev = device();
    let backend = Backend::new(&dev, &StdFormats).with_fields(&dev);
    let mut registry = Registry::new(CompilerConfig::default());
    registry.add_source("test.proto", src)?;
    registry.compile("test.proto", request, &backend)
}

fn body(src: &str, request: &str) -> Vec<Instruction> {
    compile(src, request).expect("compile").body
}

// ==================== Strings and variables ====================

#[test]
fn quoted_variable_in_output_string() {
    let b = body("x = \"abc\";\ndemo { out \"$x\"; }", "demo");
    assert_eq!(b, vec![Instruction::Command(opcode::OUT), lit(b"abc"), END, END]);
}

#[test]
fn parameters_and_request_string() {
    let b = body("set { out \"$0:$1=$2\"; }", "set(CH1,5)");
    assert_eq!(b, vec![Instruction::Command(opcode::OUT), lit(b"set(CH1,5):CH1=5"), END, END]);
}

#[test]
fn unquoted_parameter_as_number_and_byte() {
    let b = body("w { wait $1; }", "w(250)");
    assert_eq!(b, vec![Instruction::Command(opcode::WAIT), Instruction::Number(250), END]);

    let b = body("p { out $1; }", "p(0x41)");
    assert_eq!(b, vec![Instruction::Command(opcode::OUT), lit(b"A"), END, END]);
}

#[test]
fn missing_parameter_is_undefined() {
    let e = compile("p { out \"$2\"; }", "p(1)").expect_err("only one argument");
    assert_eq!(e.kind(), ErrorKind::Undefined);
    assert!(e.to_string().contains("Missing value for parameter $2"));
}

#[test]
fn double_percent_is_literal() {
    let b = body("p { out \"100%%\"; }", "p");
    assert_eq!(b, vec![Instruction::Command(opcode::OUT), lit(b"100%"), END, END]);
}

#[test]
fn escapes_in_output_string() {
    let b = body(r#"p { out "\x41\0102\67\r\n"; }"#, "p");
    assert_eq!(b, vec![Instruction::Command(opcode::OUT), lit(b"ABC\r\n"), END, END]);
}

#[test]
fn named_codes_and_numbers_between_strings() {
    let b = body("p { out \"A\" CR LF 0x42 -1; }", "p");
    assert_eq!(
        b,
        vec![Instruction::Command(opcode::OUT), lit(b"A\r\nB\xff"), END, END]
    );
}

#[test]
fn skip_marker_in_input() {
    let b = body(r#"p { in "OK\?"; }"#, "p");
    assert_eq!(
        b,
        vec![
            Instruction::Command(opcode::IN),
            lit(b"OK"),
            Instruction::Control(Sentinel::Skip),
            END,
            END
        ]
    );
}

#[test]
fn skip_word_only_in_input() {
    let b = body("p { in \"A\" skip; }", "p");
    assert_eq!(b[2], Instruction::Control(Sentinel::Skip));

    let e = compile("p { out \"A\" skip; }", "p").expect_err("skip in output");
    assert_eq!(e.kind(), ErrorKind::Syntax);
    assert!(e.to_string().contains("only allowed in input formats"));
}

#[test]
fn quoting_keeps_literal_text() {
    let src = "q = 'say \"hi\"';\nbare { out $q; }\nquoted { out \"<$q>\"; }";
    assert_eq!(
        body(src, "bare"),
        vec![Instruction::Command(opcode::OUT), lit(b"say \"hi\""), END, END]
    );
    assert_eq!(
        body(src, "quoted"),
        vec![Instruction::Command(opcode::OUT), lit(b"<say \"hi\">"), END, END]
    );
}

#[test]
fn self_referencing_parameter_hits_recursion_cap() {
    let e = compile("loop { out $1; }", "loop($1)").expect_err("endless expansion");
    assert_eq!(e.kind(), ErrorKind::TooDeep);
    assert!(e.to_string().contains("in protocol 'loop'"));
}

#[test]
fn recursion_cap_follows_config() {
    let dev = device();
    let backend = Backend::new(&dev, &StdFormats).with_fields(&dev);
    let config = CompilerConfig {
        max_recursion_depth: 1,
        ..CompilerConfig::default()
    };
    let mut registry = Registry::new(config);
    registry
        .add_source("t.proto", "a = \"x\";\np { out $1; }")
        .expect("parse");
    // $1 -> $a is two levels deep
    let e = registry.compile("t.proto", "p($a)", &backend).expect_err("too deep");
    assert_eq!(e.kind(), ErrorKind::TooDeep);
}

// ==================== Formats ====================

#[test]
fn conversions_become_format_descriptors() {
    let b = body("p { out \"SET %5.2f V\"; }", "p");
    assert_eq!(b[1], lit(b"SET "));
    match &b[2] {
        Instruction::Field(f) => {
            assert_eq!(f.kind, FormatKind::Double);
            assert_eq!(f.conv, b'f');
            assert_eq!(f.width, 5);
            assert_eq!(f.precision, Some(2));
            assert_eq!(f.source, "5.2f");
            assert!(f.field.is_none());
        }
        other => panic!("expected format, got {:?}", other),
    }
    assert_eq!(b[3], lit(b" V"));
}

#[test]
fn conversion_assembled_from_variable_on_same_line() {
    let b = body("fmt = \"%\";\np { in $fmt \"d\"; }", "p");
    assert!(matches!(&b[1], Instruction::Field(f) if f.conv == b'd'));
}

#[test]
fn field_redirection() {
    let b = body("p { in \"%(VOLT)f\"; }", "p");
    match &b[1] {
        Instruction::Field(f) => {
            let field = f.field.as_ref().expect("redirected");
            assert_eq!(field.name, "VOLT");
            assert_eq!(field.address, vec![0x01, 0x00]);
            assert_eq!(f.kind, FormatKind::Double);
        }
        other => panic!("expected format, got {:?}", other),
    }
}

#[test]
fn unknown_field_is_undefined() {
    let e = compile("p { in \"%(AMPS)f\"; }", "p").expect_err("no such field");
    assert_eq!(e.kind(), ErrorKind::Undefined);
    assert!(e.to_string().contains("Field 'AMPS' not found"));
}

#[test]
fn skip_flag_with_redirection_is_rejected() {
    let e = compile("p { in \"%(VOLT)*d\"; }", "p").expect_err("skip and field");
    assert_eq!(e.kind(), ErrorKind::Syntax);
    assert!(e.to_string().contains("not allowed together with redirection"));
}

#[test]
fn bad_conversion_names_the_format_string() {
    let e = compile("p { out \"%q\"; }", "p").expect_err("bad conversion");
    assert_eq!(e.kind(), ErrorKind::Syntax);
    assert!(e.to_string().contains("in format string: \"%q\""));
}

#[test]
fn oversized_choice_list_is_rejected() {
    let src = format!("p {{ out \"%{{{}|b}}\"; }}", "a".repeat(70_000));
    let e = compile(&src, "p").expect_err("info string too long");
    assert_eq!(e.kind(), ErrorKind::Range);
    assert!(e.to_string().contains("Format info string too long"));
}

#[test]
fn oversized_field_address_is_rejected() {
    let dev = BasicDevice::new().with_field("BLOB", vec![0x55; 70_000]);
    let backend = Backend::new(&dev, &StdFormats).with_fields(&dev);
    let mut registry = Registry::new(CompilerConfig::default());
    registry.add_source("test.proto", "p { in \"%(BLOB)d\"; }").expect("parse");
    let e = registry.compile("test.proto", "p", &backend).expect_err("address too long");
    assert_eq!(e.kind(), ErrorKind::Range);
    assert!(e.to_string().contains("Field address of 'BLOB' too long (70000 bytes)"));
}

#[test]
fn largest_descriptors_survive_wire_encoding() {
    let src = format!("p {{ out \"%{{{}|b}}\" \"%.2147483647f\"; }}", "a".repeat(65_533));
    let compiled = compile(&src, "p").expect("compile");
    let bytes = encode(&compiled.body);
    assert_eq!(decode_program(&bytes).expect("decode"), compiled.body);
}

// ==================== Commands ====================

#[test]
fn wire_encoding_round_trips_through_device_decoder() {
    let compiled = compile(
        "p { out \"MEAS?\" CR; in \"%(VOLT)f\"; wait 250; event; disconnect; }",
        "p",
    )
    .expect("compile");
    let bytes = encode(&compiled.body);
    assert_eq!(decode_program(&bytes).expect("decode"), compiled.body);
    assert_eq!(
        render_program(&compiled.body),
        "out \"MEAS?\\r\"; in \"%(VOLT)f\"; wait 250; event 0; disconnect;"
    );
}

#[test]
fn unknown_command_is_undefined() {
    let e = compile("p { frobnicate; }", "p").expect_err("unknown command");
    assert_eq!(e.kind(), ErrorKind::Undefined);
    assert!(e.to_string().contains("Unknown command name 'frobnicate'"));
}

#[test]
fn garbage_after_arguments() {
    let e = compile("p { disconnect 5; }", "p").expect_err("argument to disconnect");
    assert_eq!(e.kind(), ErrorKind::Garbage);
    assert!(e.to_string().contains("Garbage after 'disconnect' command: '5'"));

    let e = compile("p { wait 10 20; }", "p").expect_err("two numbers");
    assert_eq!(e.kind(), ErrorKind::Garbage);
}

#[test]
fn number_out_of_range() {
    let e = compile("p { wait 0x100000000; }", "p").expect_err("too large");
    assert_eq!(e.kind(), ErrorKind::Range);
}

#[test]
fn empty_protocol_compiles_to_end() {
    assert_eq!(body("p { }", "p"), vec![END]);
}

#[test]
fn protocol_reference_is_inlined() {
    let b = body("base { out \"A\"; }\nfull { base; wait 1; }", "full");
    assert_eq!(
        b,
        vec![
            Instruction::Command(opcode::OUT),
            lit(b"A"),
            END,
            Instruction::Command(opcode::WAIT),
            Instruction::Number(1),
            END
        ]
    );
}

// ==================== Handlers ====================

#[test]
fn handlers_compile_with_the_protocol() {
    let src = "@init { out \"*RST\"; }\np { @mismatch { in \"ERR %s\"; } out \"x\"; }";
    let compiled = compile(src, "p").expect("compile");
    let init = compiled.handler("@init").expect("global handler inherited");
    assert_eq!(init, &[Instruction::Command(opcode::OUT), lit(b"*RST"), END, END][..]);
    let mismatch = compiled.handler("@MISMATCH").expect("local handler");
    assert_eq!(mismatch[0], Instruction::Command(opcode::IN));
    assert!(compiled.handler("@readtimeout").is_none());
}

#[test]
fn handler_errors_name_handler_and_protocol() {
    let e = compile("@init { out $nothere; }\np { out \"x\"; }", "p").expect_err("undefined in handler");
    assert_eq!(e.kind(), ErrorKind::Undefined);
    let text = e.to_string();
    assert!(text.contains("in handler '@init'"));
    assert!(text.contains("used by protocol 'p'"));
}

#[test]
fn unknown_handler_fails_compilation() {
    let e = compile("p { @bogus { out \"x\"; } out \"y\"; }", "p").expect_err("unused handler");
    assert_eq!(e.kind(), ErrorKind::UnusedHandler);
    assert!(e.to_string().contains("Unknown handler @bogus defined in protocol file 'test.proto' line 1"));
}

#[test]
fn unknown_handler_allowed_without_unused_check() {
    let dev = device();
    let backend = Backend::new(&dev, &StdFormats);
    let config = CompilerConfig {
        check_unused: false,
        ..CompilerConfig::default()
    };
    let mut registry = Registry::new(config);
    registry
        .add_source("t.proto", "p { @bogus { out \"x\"; } out \"y\"; }")
        .expect("parse");
    assert!(registry.compile("t.proto", "p", &backend).is_ok());
}

#[test]
fn unused_variable_is_only_a_note() {
    let diagnostics = Rc::new(CollectingDiagnostics::new());
    let mut registry = Registry::with_diagnostics(CompilerConfig::default(), Box::new(diagnostics.clone()));
    let dev = device();
    let backend = Backend::new(&dev, &StdFormats);
    registry
        .add_source("t.proto", "spare = 1;\np { out \"y\"; }")
        .expect("parse");
    registry.compile("t.proto", "p", &backend).expect("compile");

    assert!(diagnostics.errors().is_empty());
    let notes = diagnostics.messages();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].severity, Severity::Note);
    assert_eq!(notes[0].line, 1);
    assert!(notes[0].message.contains("Unused variable spare in protocol 'p'"));
}

#[test]
fn compile_failures_reach_diagnostics() {
    let diagnostics = Rc::new(CollectingDiagnostics::new());
    let mut registry = Registry::with_diagnostics(CompilerConfig::default(), Box::new(diagnostics.clone()));
    let dev = device();
    let backend = Backend::new(&dev, &StdFormats);
    registry.add_source("t.proto", "p {\n  wait x;\n}").expect("parse");
    let e = registry.compile("t.proto", "p", &backend).expect_err("not a number");

    let errors = diagnostics.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].file, "t.proto");
    assert_eq!(errors[0].line, 2);
    assert_eq!(errors[0].message, e.to_string());
}

// ==================== Variable scoping ====================

#[test]
fn variable_defined_after_protocol_is_undefined() {
    let e = compile("p { out $later; }\nlater = \"x\";", "p").expect_err("defined too late");
    assert_eq!(e.kind(), ErrorKind::Undefined);
    assert!(e.to_string().contains("Undefined variable 'later' referenced"));
}

#[test]
fn protocol_local_assignment_overrides_global() {
    let src = "t = \"g\";\np { t = \"l\"; out $t; }\nq { out $t; }";
    assert_eq!(body(src, "p")[1], lit(b"l"));
    assert_eq!(body(src, "q")[1], lit(b"g"));
}

#[test]
fn assignment_references_are_eager_command_references_lazy() {
    let src = "a = \"1\";\nb = $a;\na = \"2\";\np { out $b $a; }";
    assert_eq!(body(src, "p")[1], lit(b"12"));
}

#[test]
fn unknown_protocol_is_undefined() {
    let e = compile("p { out \"x\"; }", "nothere").expect_err("no such protocol");
    assert_eq!(e.kind(), ErrorKind::Undefined);
    assert!(e.to_string().contains("Protocol 'nothere' not found"));
}

#[test]
fn malformed_request_is_syntax_error() {
    let e = compile("p { out \"x\"; }", "p(1").expect_err("unclosed arguments");
    assert_eq!(e.kind(), ErrorKind::Syntax);
}

// ==================== Device settings ====================

#[test]
fn device_settings_from_variables() {
    let src = "terminator = CR LF;\nreplytimeout = 500;\nextrainput = Ignore;\np { out \"x\"; }";
    let mut registry = Registry::new(CompilerConfig::default());
    registry.add_source("t.proto", src).expect("parse");
    let mut instance = registry.get_protocol("t.proto", "p").expect("instance");
    let settings = device().settings(&mut instance).expect("settings");
    assert_eq!(settings.out_terminator, vec![lit(b"\r\n")]);
    assert_eq!(settings.in_terminator, vec![lit(b"\r\n")]);
    assert_eq!(settings.reply_timeout, 500);
    assert_eq!(settings.read_timeout, 100);
    assert_eq!(settings.extra_input, ExtraInput::Ignore);
    assert!(instance.binding("terminator").expect("bound").used);
}

#[test]
fn bad_settings_are_errors() {
    let mut registry = Registry::new(CompilerConfig::default());
    registry
        .add_source("t.proto", "extrainput = maybe;\np { out \"x\"; }")
        .expect("parse");
    let mut instance = registry.get_protocol("t.proto", "p").expect("instance");
    let e = device().settings(&mut instance).expect_err("bad choice");
    assert!(e.to_string().contains("must be one of 'error' or 'ignore'"));

    registry
        .add_source("t.proto", "readtimeout = 10 ms;\np { out \"x\"; }")
        .expect("parse");
    let mut instance = registry.get_protocol("t.proto", "p").expect("instance");
    let e = device().settings(&mut instance).expect_err("garbage");
    assert_eq!(e.kind(), ErrorKind::Garbage);
}

// ==================== Determinism ====================

#[test]
fn compilation_is_idempotent_across_registries() {
    let src = "terminator = CR;\n@init { out \"*IDN?\"; in \"%s\"; }\nread { out \"CH$1?\"; in \"%(VOLT)f\"; }";
    let first = compile(src, "read(2)").expect("first");
    let second = compile(src, "read(2)").expect("second");
    assert_eq!(first, second);
    assert_eq!(encode(&first.body), encode(&second.body));
}

#[test]
fn instances_are_independent() {
    let mut registry = Registry::new(CompilerConfig::default());
    registry.add_source("t.proto", "p { out \"$1\"; }").expect("parse");
    let a = registry.get_protocol("t.proto", "p(a)").expect("a");
    let b = registry.get_protocol("t.proto", "p(b)").expect("b");
    assert_eq!(a.parameter(1), Some("a"));
    assert_eq!(b.parameter(1), Some("b"));
    assert_eq!(a.parameter(0), Some("p(a)"));
}
