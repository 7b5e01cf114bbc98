//! String and number compilation.
//!
//! Strings compile in two steps. The first turns tokens into pieces:
//! literal text, escaped bytes that never start a conversion, and the skip
//! and whitespace markers. Variable references expand recursively in this
//! step. The second step runs once per source line and replaces every `%`
//! conversion in the pieces of that line with a [`FormatDescriptor`], so a
//! conversion may be assembled from several strings and variables as long as
//! they sit on one line.

use crate::ast::Protocol;
use crate::command::FieldResolver;
use crate::dump::push_escaped;
use crate::error::ProtocolError;
use crate::format::{FieldRef, FormatConverter, FormatDescriptor, FormatFlags, FormatKind, FormatMode};
use crate::instruction::{push_literal, Instruction, Sentinel, MAX_INFO_LEN, MAX_PRECISION};
use crate::token::{display_tokens, Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Piece {
    /// Plain character; `%` starts a conversion.
    Text(u8),
    /// Escaped or numeric byte, always literal.
    Byte(u8),
    Control(Sentinel),
}

impl Piece {
    fn byte(self) -> Option<u8> {
        match self {
            Piece::Text(b) | Piece::Byte(b) => Some(b),
            Piece::Control(_) => None,
        }
    }
}

/// Byte codes that may be written as bare words.
const NAMED_CODES: &[(&str, u8)] = &[
    ("nul", 0x00),
    ("soh", 0x01),
    ("stx", 0x02),
    ("etx", 0x03),
    ("eot", 0x04),
    ("enq", 0x05),
    ("ack", 0x06),
    ("bel", 0x07),
    ("bs", 0x08),
    ("ht", 0x09),
    ("tab", 0x09),
    ("lf", 0x0a),
    ("nl", 0x0a),
    ("vt", 0x0b),
    ("ff", 0x0c),
    ("np", 0x0c),
    ("cr", 0x0d),
    ("so", 0x0e),
    ("si", 0x0f),
    ("dle", 0x10),
    ("dc1", 0x11),
    ("dc2", 0x12),
    ("dc3", 0x13),
    ("dc4", 0x14),
    ("nak", 0x15),
    ("syn", 0x16),
    ("etb", 0x17),
    ("can", 0x18),
    ("em", 0x19),
    ("sub", 0x1a),
    ("esc", 0x1b),
    ("fs", 0x1c),
    ("gs", 0x1d),
    ("rs", 0x1e),
    ("us", 0x1f),
    ("del", 0x7f),
];

/// Parse a C integer literal prefix of `s` (sign, `0x` hex, leading `0`
/// octal, decimal). Returns the value and the number of bytes used, or
/// `None` when `s` does not start with a number.
pub(crate) fn parse_c_integer(s: &str) -> Option<(i64, usize)> {
    let b = s.as_bytes();
    let mut i = 0;
    let negative = match b.first() {
        Some(b'-') => {
            i = 1;
            true
        }
        Some(b'+') => {
            i = 1;
            false
        }
        _ => false,
    };
    let (radix, start) = if b.get(i) == Some(&b'0')
        && matches!(b.get(i + 1), Some(b'x' | b'X'))
        && b.get(i + 2).map_or(false, u8::is_ascii_hexdigit)
    {
        (16, i + 2)
    } else if b.get(i) == Some(&b'0') {
        (8, i)
    } else {
        (10, i)
    };
    let mut end = start;
    let mut value: i64 = 0;
    while let Some(d) = b.get(end).and_then(|c| (*c as char).to_digit(radix)) {
        value = value.saturating_mul(radix as i64).saturating_add(d as i64);
        end += 1;
    }
    if end == start {
        return None;
    }
    Some((if negative { -value } else { value }, end))
}

/// At most `max_digits` leading digits of `bytes` in `radix`.
fn leading_number(bytes: &[u8], radix: u32, max_digits: usize) -> (u32, usize) {
    let mut value = 0;
    let mut n = 0;
    while n < max_digits {
        match bytes.get(n).and_then(|c| (*c as char).to_digit(radix)) {
            Some(d) => value = value * radix + d,
            None => break,
        }
        n += 1;
    }
    (value, n)
}

fn render_pieces(pieces: &[Piece]) -> String {
    let mut out = String::new();
    for p in pieces {
        match p {
            Piece::Text(b) | Piece::Byte(b) => push_escaped(&mut out, *b),
            Piece::Control(Sentinel::Skip) => out.push_str("\\?"),
            Piece::Control(Sentinel::Whitespace) => out.push_str("\\_"),
            Piece::Control(_) => {}
        }
    }
    out
}

struct StringCompiler<'c> {
    mode: FormatMode,
    fields: Option<&'c dyn FieldResolver>,
    formats: Option<&'c dyn FormatConverter>,
    /// Pieces of the current line, not yet checked for conversions.
    pieces: Vec<Piece>,
    out: Vec<Instruction>,
    line: u32,
}

impl<'c> StringCompiler<'c> {
    fn syntax(&self, protocol: &Protocol, message: impl Into<String>) -> ProtocolError {
        ProtocolError::syntax(protocol.location(self.line), message)
    }

    fn encode_tokens(&mut self, protocol: &mut Protocol, tokens: &[Token], depth: usize) -> Result<(), ProtocolError> {
        let mut i = 0;
        while i < tokens.len() {
            i += self.encode_token(protocol, tokens, i, depth)?;
        }
        Ok(())
    }

    /// Encode `tokens[i]`, returning how many tokens were used.
    fn encode_token(
        &mut self,
        protocol: &mut Protocol,
        tokens: &[Token],
        i: usize,
        depth: usize,
    ) -> Result<usize, ProtocolError> {
        let token = &tokens[i];
        match token.kind {
            TokenKind::Quoted(_) => self.encode_quoted(protocol, &token.text)?,
            TokenKind::Variable { .. } => {
                if depth >= protocol.max_depth {
                    return Err(ProtocolError::too_deep(
                        protocol.location(self.line),
                        format!(
                            "Variable expansion of '{}' nested deeper than {} levels (reference cycle?)",
                            token, protocol.max_depth
                        ),
                    ));
                }
                let value = protocol.replace_variable(token)?;
                log::trace!("compileString: {} -> {}", token, display_tokens(&value));
                self.encode_tokens(protocol, &value, depth + 1)?;
            }
            TokenKind::Special(b' ' | b',') | TokenKind::CommandEnd | TokenKind::Eof => {}
            TokenKind::Special(sign @ (b'-' | b'+')) => match tokens.get(i + 1) {
                Some(next) if next.kind == TokenKind::Word => {
                    self.encode_word(protocol, &format!("{}{}", sign as char, next.text))?;
                    return Ok(2);
                }
                _ => return Err(self.syntax(protocol, format!("Unexpected '{}' in string", sign as char))),
            },
            TokenKind::Special(c) => {
                return Err(self.syntax(protocol, format!("Unexpected '{}' in string", c as char)));
            }
            TokenKind::Word => self.encode_word(protocol, &token.text)?,
        }
        Ok(1)
    }

    fn encode_quoted(&mut self, protocol: &Protocol, text: &str) -> Result<(), ProtocolError> {
        let bytes = text.as_bytes();
        let mut k = 0;
        while k < bytes.len() {
            let b = bytes[k];
            if (b & 0x7f) < 0x20 {
                return Err(self.syntax(protocol, format!("Unexpected byte {:#04x}", b)));
            }
            k += 1;
            if b != b'\\' {
                self.pieces.push(Piece::Text(b));
                continue;
            }
            let escaped = match bytes.get(k) {
                Some(&e) => e,
                None => return Err(self.syntax(protocol, format!("Backslash at end of string \"{}\"", text))),
            };
            let (value, len) = match escaped {
                b'?' => {
                    self.pieces.push(Piece::Control(Sentinel::Skip));
                    k += 1;
                    continue;
                }
                b'_' => {
                    self.pieces.push(Piece::Control(Sentinel::Whitespace));
                    k += 1;
                    continue;
                }
                b'a' => (0x07, 1),
                b'b' => (0x08, 1),
                b't' => (b'\t', 1),
                b'n' => (b'\n', 1),
                b'r' => (b'\r', 1),
                b'e' => (0x1b, 1),
                b'0' => {
                    let (v, n) = leading_number(&bytes[k..], 8, 4);
                    if v > 0xff {
                        return Err(ProtocolError::range(
                            protocol.location(self.line),
                            format!("Octal number {:#o} does not fit in byte: \"\\{}\"", v, &text[k..k + n]),
                        ));
                    }
                    (v as u8, n)
                }
                b'x' => {
                    let (v, n) = leading_number(&bytes[k + 1..], 16, 2);
                    if n == 0 {
                        return Err(self.syntax(protocol, format!("Hex digit expected after \\x: \"{}\"", text)));
                    }
                    (v as u8, n + 1)
                }
                b'1'..=b'9' => {
                    let (v, n) = leading_number(&bytes[k..], 10, 3);
                    if v > 0xff {
                        return Err(ProtocolError::range(
                            protocol.location(self.line),
                            format!("Decimal number {} does not fit in byte: \"\\{}\"", v, &text[k..k + n]),
                        ));
                    }
                    (v as u8, n)
                }
                other => (other, 1),
            };
            k += len;
            self.pieces.push(Piece::Byte(value));
        }
        Ok(())
    }

    fn encode_word(&mut self, protocol: &Protocol, word: &str) -> Result<(), ProtocolError> {
        if let Some((value, used)) = parse_c_integer(word) {
            if used < word.len() {
                return Err(ProtocolError::garbage(
                    protocol.location(self.line),
                    format!("Garbage after numeric source: {}", word),
                ));
            }
            if !(-0x80..=0xff).contains(&value) {
                return Err(ProtocolError::range(
                    protocol.location(self.line),
                    format!("Value {} does not fit in byte", word),
                ));
            }
            self.pieces.push(Piece::Byte(value as u8));
            return Ok(());
        }
        if word == "skip" || word == "?" {
            if self.mode != FormatMode::Scan {
                return Err(self.syntax(protocol, format!("Use of '{}' only allowed in input formats", word)));
            }
            self.pieces.push(Piece::Control(Sentinel::Skip));
            return Ok(());
        }
        match NAMED_CODES.iter().find(|(name, _)| *name == word) {
            Some(&(_, code)) => {
                self.pieces.push(Piece::Byte(code));
                Ok(())
            }
            None => Err(self.syntax(protocol, format!("Unexpected '{}' in string", word))),
        }
    }

    fn emit(&mut self, piece: Piece) {
        match piece {
            Piece::Text(b) | Piece::Byte(b) => push_literal(&mut self.out, b),
            Piece::Control(s) => self.out.push(Instruction::Control(s)),
        }
    }

    /// Move the pending pieces to the output, compiling conversions.
    fn flush(&mut self, protocol: &Protocol) -> Result<(), ProtocolError> {
        let pieces = std::mem::take(&mut self.pieces);
        if self.mode == FormatMode::None {
            for p in pieces {
                self.emit(p);
            }
            return Ok(());
        }
        let mut k = 0;
        let mut count = 0;
        while k < pieces.len() {
            if pieces[k] != Piece::Text(b'%') {
                self.emit(pieces[k]);
                k += 1;
                continue;
            }
            if pieces.get(k + 1) == Some(&Piece::Text(b'%')) {
                push_literal(&mut self.out, b'%');
                k += 2;
                continue;
            }
            let (descriptor, used) = self.compile_format(protocol, &pieces[k + 1..]).map_err(|e| {
                e.context(
                    protocol.location(self.line),
                    format!("in format string: \"{}\"", render_pieces(&pieces[k..])),
                )
            })?;
            self.out.push(Instruction::Field(descriptor));
            k += 1 + used;
            count += 1;
        }
        log::trace!("compileString: {} format(s) in line {}", count, self.line);
        Ok(())
    }

    /// Compile the conversion in `rest` (the pieces after `%`).
    fn compile_format(&self, protocol: &Protocol, rest: &[Piece]) -> Result<(FormatDescriptor, usize), ProtocolError> {
        let mut used = 0;
        let mut field = None;
        if rest.first() == Some(&Piece::Text(b'(')) {
            let fields = self
                .fields
                .ok_or_else(|| self.syntax(protocol, "Using fieldname is not possible in this context"))?;
            let close = rest
                .iter()
                .position(|p| p.byte() == Some(b')'))
                .ok_or_else(|| self.syntax(protocol, "Missing ')' after field name"))?;
            let name: String = rest[1..close].iter().filter_map(|p| p.byte()).map(char::from).collect();
            log::trace!("compileFormat: fieldname='{}'", name);
            let address = fields.field_address(&name).ok_or_else(|| {
                ProtocolError::undefined(protocol.location(self.line), format!("Field '{}' not found", name))
            })?;
            if address.len() > MAX_INFO_LEN {
                return Err(ProtocolError::range(
                    protocol.location(self.line),
                    format!("Field address of '{}' too long ({} bytes)", name, address.len()),
                ));
            }
            field = Some(FieldRef { name, address });
            used = close + 1;
        }

        let formats = self
            .formats
            .ok_or_else(|| self.syntax(protocol, "No format converter available in this context"))?;
        let source: String = rest[used..]
            .iter()
            .map_while(|p| p.byte().filter(u8::is_ascii))
            .map(char::from)
            .collect();
        let parsed = formats
            .parse_format(&source, self.mode)
            .map_err(|message| self.syntax(protocol, message))?;
        let consumed = parsed.consumed.min(source.len());
        if parsed.info.len() > MAX_INFO_LEN {
            return Err(ProtocolError::range(
                protocol.location(self.line),
                format!("Format info string too long ({} bytes)", parsed.info.len()),
            ));
        }
        if let Some(precision) = parsed.precision.filter(|&p| p > MAX_PRECISION) {
            return Err(ProtocolError::range(
                protocol.location(self.line),
                format!("Format precision {} too large", precision),
            ));
        }

        if let Some(f) = &field {
            if parsed.kind == FormatKind::Pseudo {
                return Err(self.syntax(
                    protocol,
                    format!("Fieldname not allowed with pseudo format: '%({}){}'", f.name, parsed.conv as char),
                ));
            }
            if parsed.flags.contains(FormatFlags::SKIP) {
                return Err(self.syntax(
                    protocol,
                    "Use of skip modifier '*' not allowed together with redirection",
                ));
            }
        }

        let descriptor = FormatDescriptor {
            kind: parsed.kind,
            conv: parsed.conv,
            flags: parsed.flags,
            width: parsed.width,
            precision: parsed.precision,
            source: source[..consumed].to_string(),
            info: parsed.info,
            field,
        };
        log::trace!(
            "compileFormat: formatstring=\"{}\" type={} infolen={}",
            descriptor.source,
            descriptor.kind.name(),
            descriptor.info.len()
        );
        Ok((descriptor, used + consumed))
    }
}

impl Protocol {
    /// Compile a value (string arguments, handler strings, string variables)
    /// into instructions. No `End` is appended.
    pub fn compile_string(
        &mut self,
        tokens: &[Token],
        mode: FormatMode,
        fields: Option<&dyn FieldResolver>,
        formats: Option<&dyn FormatConverter>,
    ) -> Result<Vec<Instruction>, ProtocolError> {
        let mut c = StringCompiler {
            mode,
            fields,
            formats,
            pieces: Vec::new(),
            out: Vec::new(),
            line: tokens.first().map_or(self.line, |t| t.line),
        };
        log::trace!(
            "compileString line {} mode={} source=\"{}\"",
            c.line,
            mode,
            display_tokens(tokens)
        );
        let mut i = 0;
        while i < tokens.len() {
            if tokens[i].line != c.line {
                c.flush(self)?;
                c.line = tokens[i].line;
            }
            i += c.encode_token(self, tokens, i, 0)?;
        }
        c.flush(self)?;
        Ok(c.out)
    }

    /// Compile an unsigned number from the leading tokens, which may be
    /// variable references. Returns the value and the number of tokens used.
    pub fn compile_number(&mut self, tokens: &[Token], max: u64) -> Result<(u64, usize), ProtocolError> {
        let line = tokens.first().map_or(self.line, |t| t.line);
        let mut text = String::new();
        let mut consumed = 0;
        for token in tokens {
            match token.kind {
                TokenKind::Variable { .. } => {
                    for t in self.replace_variable(token)? {
                        text.push_str(&t.text);
                    }
                }
                TokenKind::Word if token.text.starts_with(|c: char| c.is_ascii_digit()) => {
                    text.push_str(&token.text)
                }
                _ => break,
            }
            consumed += 1;
        }

        let at = self.location(line);
        let (value, end) = match parse_c_integer(&text) {
            Some((value, end)) if value >= 0 && !text.starts_with(['-', '+']) => (value as u64, end),
            _ => {
                return Err(ProtocolError::syntax(
                    at,
                    format!("Unsigned numeric value expected: {}", text),
                ))
            }
        };
        if end < text.len() {
            return Err(ProtocolError::garbage(at, format!("Garbage after numeric value: {}", text)));
        }
        if value > max {
            return Err(ProtocolError::range(
                at,
                format!("Value {} out of range [0...{}]", text, max),
            ));
        }
        log::trace!("compileNumber {} = {}", text, value);
        Ok((value, consumed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::format::StdFormats;
    use crate::instruction::literal_bytes;
    use crate::token::Tokenizer;

    fn tokens(src: &str) -> Vec<Token> {
        Tokenizer::new(src, "t.proto").tokenize_value().expect("tokenize")
    }

    fn compile(src: &str, mode: FormatMode) -> Result<Vec<Instruction>, ProtocolError> {
        let mut p = Protocol::global("t.proto");
        p.compile_string(&tokens(src), mode, None, Some(&StdFormats))
    }

    #[test]
    fn escapes_compile_to_single_bytes() {
        let out = compile(r#""\x41\0101\66\r\n\t\e\\""#, FormatMode::Print).expect("compile");
        assert_eq!(literal_bytes(&out), b"AAB\r\n\t\x1b\\".to_vec());
    }

    #[test]
    fn skip_and_whitespace_markers_stay_distinct() {
        let out = compile(r#""a\?\_\x01""#, FormatMode::Scan).expect("compile");
        assert_eq!(
            out,
            vec![
                Instruction::Literal(b"a".to_vec()),
                Instruction::Control(Sentinel::Skip),
                Instruction::Control(Sentinel::Whitespace),
                Instruction::Literal(vec![0x01]),
            ]
        );
    }

    #[test]
    fn numbers_and_named_codes() {
        let out = compile("CR LF 0x41, 010 -1 \"x\"", FormatMode::Print).expect("compile");
        assert_eq!(literal_bytes(&out), vec![0x0d, 0x0a, 0x41, 0o10, 0xff, b'x']);
    }

    #[test]
    fn skip_word_only_in_input() {
        let err = compile("skip", FormatMode::Print).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
        let out = compile("\"v\" ?", FormatMode::Scan).expect("compile");
        assert_eq!(out.last(), Some(&Instruction::Control(Sentinel::Skip)));
    }

    #[test]
    fn bad_numeric_bytes() {
        assert_eq!(compile("12abc", FormatMode::Print).unwrap_err().kind(), ErrorKind::Garbage);
        assert_eq!(compile("300", FormatMode::Print).unwrap_err().kind(), ErrorKind::Range);
        assert_eq!(compile("-129", FormatMode::Print).unwrap_err().kind(), ErrorKind::Range);
        assert_eq!(compile(r#""\400""#, FormatMode::Print).unwrap_err().kind(), ErrorKind::Range);
        assert_eq!(compile(r#""\xg""#, FormatMode::Print).unwrap_err().kind(), ErrorKind::Syntax);
        assert!(compile("bogus", FormatMode::Print).is_err());
    }

    #[test]
    fn formats_become_descriptors() {
        let out = compile(r#""V=%5.2f" CR"#, FormatMode::Print).expect("compile");
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], Instruction::Literal(b"V=".to_vec()));
        match &out[1] {
            Instruction::Field(d) => {
                assert_eq!(d.kind, FormatKind::Double);
                assert_eq!(d.width, 5);
                assert_eq!(d.precision, Some(2));
                assert_eq!(d.source, "5.2f");
                assert!(d.field.is_none());
            }
            other => panic!("expected a field, got {:?}", other),
        }
        assert_eq!(out[2], Instruction::Literal(b"\r".to_vec()));
    }

    #[test]
    fn percent_percent_and_escaped_percent_are_literal() {
        let out = compile(r#""100%%" "\%d""#, FormatMode::Print).expect("compile");
        assert_eq!(out, vec![Instruction::Literal(b"100%%d".to_vec())]);
    }

    #[test]
    fn no_format_mode_keeps_percent() {
        let out = compile(r#""%d""#, FormatMode::None).expect("compile");
        assert_eq!(literal_bytes(&out), b"%d".to_vec());
    }

    #[test]
    fn field_redirection_needs_a_resolver() {
        let err = compile(r#""%(x)d""#, FormatMode::Print).unwrap_err();
        assert!(err.to_string().contains("Using fieldname is not possible"));
        assert!(err.to_string().contains("in format string"));
    }

    #[test]
    fn bad_conversion_is_reported_with_context() {
        let err = compile(r#""%q""#, FormatMode::Print).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
        assert!(err.to_string().contains("in format string: \"%q\""));
    }

    #[test]
    fn oversized_format_descriptors_are_range_errors() {
        let err = compile(&format!("\"%{{{}|b}}\"", "a".repeat(70_000)), FormatMode::Print).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
        assert!(err.to_string().contains("Format info string too long (70002 bytes)"));

        let err = compile(r#""%.3000000000f""#, FormatMode::Print).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
        assert!(err.to_string().contains("Format precision 3000000000 too large"));

        let out = compile(&format!("\"%.{}f\"", i32::MAX), FormatMode::Print).expect("largest precision");
        assert!(matches!(&out[0], Instruction::Field(d) if d.precision == Some(MAX_PRECISION)));
    }

    #[test]
    fn raw_control_bytes_in_strings_are_rejected() {
        let err = compile("\"a\u{1}\"", FormatMode::Print).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
        assert!(err.to_string().contains("Unexpected byte 0x01"));

        // U+0085 encodes as C2 85, and 0x85 is a control byte with the high bit set
        let err = compile("\"a\u{85}\"", FormatMode::Print).unwrap_err();
        assert!(err.to_string().contains("Unexpected byte 0x85"));

        let out = compile("\"\u{e9}\"", FormatMode::Print).expect("compile");
        assert_eq!(literal_bytes(&out), vec![0xc3, 0xa9]);
    }

    #[test]
    fn c_integer_prefixes() {
        assert_eq!(parse_c_integer("0x1f"), Some((31, 4)));
        assert_eq!(parse_c_integer("017"), Some((15, 3)));
        assert_eq!(parse_c_integer("09"), Some((0, 1)));
        assert_eq!(parse_c_integer("0x"), Some((0, 1)));
        assert_eq!(parse_c_integer("-12z"), Some((-12, 3)));
        assert_eq!(parse_c_integer("abc"), None);
    }

    #[test]
    fn numbers_from_tokens() {
        let mut p = Protocol::global("t.proto");
        assert_eq!(p.compile_number(&tokens("0x10"), 100).expect("number"), (16, 1));
        assert_eq!(p.compile_number(&tokens("5 6"), 100).expect("number"), (5, 1));
        let err = p.compile_number(&tokens("500"), 100).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
        assert!(err.to_string().contains("out of range [0...100]"));
        assert_eq!(p.compile_number(&tokens("1x"), 100).unwrap_err().kind(), ErrorKind::Garbage);
        assert_eq!(p.compile_number(&tokens("\"5\""), 100).unwrap_err().kind(), ErrorKind::Syntax);
    }
}
