//! Text renderings: compiled instruction streams in source-like notation and
//! protocol reports (variables, handlers, commands).

use crate::ast::{Protocol, ProtocolFile};
use crate::instruction::{Instruction, Sentinel};
use crate::token::display_tokens;
use std::fmt::Write;

/// Append `b` as it would be written inside a quoted string.
pub fn push_escaped(out: &mut String, b: u8) {
    match b {
        b'\r' => out.push_str("\\r"),
        b'\n' => out.push_str("\\n"),
        b'"' => out.push_str("\\\""),
        b'\\' => out.push_str("\\\\"),
        _ if b < 0x20 || b >= 0x7f => {
            let _ = write!(out, "\\x{:02x}", b);
        }
        _ => out.push(b as char),
    }
}

/// Render a string stream up to its `End`.
pub fn render(instructions: &[Instruction]) -> String {
    let mut out = String::new();
    for instruction in instructions {
        match instruction {
            Instruction::Literal(bytes) => {
                for &b in bytes {
                    // a literal '%' must not read as a conversion
                    if b == b'%' {
                        out.push_str("%%");
                    } else {
                        push_escaped(&mut out, b);
                    }
                }
            }
            Instruction::Control(Sentinel::End) => break,
            Instruction::Control(Sentinel::Skip) => out.push_str("\\?"),
            Instruction::Control(Sentinel::Whitespace) => out.push_str("\\_"),
            Instruction::Control(_) => {}
            Instruction::Field(desc) => {
                out.push('%');
                if let Some(field) = &desc.field {
                    let _ = write!(out, "({})", field.name);
                }
                for b in desc.source.bytes() {
                    push_escaped(&mut out, b);
                }
            }
            Instruction::Command(op) => {
                let _ = write!(out, "<{:#04x}>", op);
            }
            Instruction::Number(n) => {
                let _ = write!(out, "<{}>", n);
            }
        }
    }
    out
}

impl Protocol {
    /// Variables, handlers and commands of this protocol.
    pub fn report(&self) -> String {
        let mut out = String::new();
        if !self.name.is_empty() {
            let _ = writeln!(out, "  Protocol {}", self.name);
        }
        out.push_str("    Variables:\n");
        for b in self.bindings().iter().filter(|b| !b.is_handler()) {
            let _ = writeln!(out, "    {} = {};", b.name, display_tokens(&b.value));
        }
        out.push_str("    Handlers:\n");
        for b in self.bindings().iter().filter(|b| b.is_handler()) {
            let _ = writeln!(out, "    {} {{{}}}", b.name, display_tokens(&b.value));
        }
        out.push_str("    Commands:\n");
        let _ = writeln!(out, "     {{ {} }}", display_tokens(self.commands()));
        out
    }
}

impl ProtocolFile {
    /// Report of the global settings followed by every protocol.
    pub fn report(&self) -> String {
        let mut out = format!("Protocol file '{}'\n", self.filename);
        out.push_str("  Global settings:\n");
        out.push_str(&self.global.report());
        for p in &self.protocols {
            out.push_str(&p.report());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{FieldRef, FormatDescriptor, FormatFlags, FormatKind};

    #[test]
    fn renders_escapes_and_markers() {
        let stream = vec![
            Instruction::Literal(b"a\"5%\r\n\x01".to_vec()),
            Instruction::Control(Sentinel::Skip),
            Instruction::Control(Sentinel::Whitespace),
            Instruction::Control(Sentinel::End),
            Instruction::Literal(b"never".to_vec()),
        ];
        assert_eq!(render(&stream), "a\\\"5%%\\r\\n\\x01\\?\\_");
    }

    #[test]
    fn non_ascii_bytes_render_as_hex() {
        let stream = vec![
            Instruction::Literal("é".as_bytes().to_vec()),
            Instruction::Literal(vec![0x7f, 0x80, 0xff]),
        ];
        assert_eq!(render(&stream), "\\xc3\\xa9\\x7f\\x80\\xff");
    }

    #[test]
    fn renders_fields() {
        let field = FormatDescriptor {
            kind: FormatKind::Signed,
            conv: b'd',
            flags: FormatFlags::default(),
            width: 0,
            precision: None,
            source: "d".to_string(),
            info: Vec::new(),
            field: Some(FieldRef {
                name: "VAL".to_string(),
                address: vec![1],
            }),
        };
        assert_eq!(render(&[Instruction::Field(field)]), "%(VAL)d");
    }
}
