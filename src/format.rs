//! Format descriptors and the format converter interface.
//!
//! The string compiler hands the text following each `%` to a
//! [`FormatConverter`], which decides how much of it is the conversion and
//! what kind of value it converts. [`StdFormats`] understands the usual
//! printf/scanf conversions plus the choice (`%{a|b}`) and checksum
//! (`%<sum8>`) forms.

use pest::Parser;
use pest_derive::Parser as PestParser;
use std::fmt;

/// Whether a string is compiled for output, for input, or without formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMode {
    None,
    Print,
    Scan,
}

impl fmt::Display for FormatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FormatMode::None => "NoFormat",
            FormatMode::Print => "PrintFormat",
            FormatMode::Scan => "ScanFormat",
        })
    }
}

/// What kind of value a conversion produces or consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FormatKind {
    Unsigned = 1,
    Signed = 2,
    Enum = 3,
    Double = 4,
    String = 5,
    /// No value of its own (checksums).
    Pseudo = 6,
}

impl FormatKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => FormatKind::Unsigned,
            2 => FormatKind::Signed,
            3 => FormatKind::Enum,
            4 => FormatKind::Double,
            5 => FormatKind::String,
            6 => FormatKind::Pseudo,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            FormatKind::Unsigned => "unsigned",
            FormatKind::Signed => "signed",
            FormatKind::Enum => "enum",
            FormatKind::Double => "double",
            FormatKind::String => "string",
            FormatKind::Pseudo => "pseudo",
        }
    }
}

/// Conversion flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatFlags(pub u16);

impl FormatFlags {
    pub const LEFT: u16 = 0x01;
    pub const SIGN: u16 = 0x02;
    pub const SPACE: u16 = 0x04;
    pub const ALT: u16 = 0x08;
    pub const ZERO: u16 = 0x10;
    /// Input only: read and discard.
    pub const SKIP: u16 = 0x20;
    pub const DEFAULT: u16 = 0x40;
    pub const COMPARE: u16 = 0x80;
    pub const FIX_WIDTH: u16 = 0x100;

    pub fn from_char(c: char) -> Option<u16> {
        Some(match c {
            '-' => Self::LEFT,
            '+' => Self::SIGN,
            ' ' => Self::SPACE,
            '#' => Self::ALT,
            '0' => Self::ZERO,
            '*' => Self::SKIP,
            '?' => Self::DEFAULT,
            '=' => Self::COMPARE,
            '!' => Self::FIX_WIDTH,
            _ => return None,
        })
    }

    pub fn contains(self, bit: u16) -> bool {
        self.0 & bit != 0
    }

    pub fn insert(&mut self, bit: u16) {
        self.0 |= bit;
    }
}

/// Redirection of a conversion to a named external field: `%(name)d`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub name: String,
    /// Opaque address bytes from the field resolver.
    pub address: Vec<u8>,
}

/// A compiled `%` conversion, embedded by value in the instruction stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub kind: FormatKind,
    pub conv: u8,
    pub flags: FormatFlags,
    pub width: u32,
    pub precision: Option<u32>,
    /// Format text after `%` (and after the field part), kept for rendering.
    pub source: String,
    pub info: Vec<u8>,
    pub field: Option<FieldRef>,
}

/// What a converter reports about one conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFormat {
    pub kind: FormatKind,
    pub conv: u8,
    pub flags: FormatFlags,
    pub width: u32,
    pub precision: Option<u32>,
    pub info: Vec<u8>,
    /// Bytes of the source text belonging to the conversion.
    pub consumed: usize,
}

pub trait FormatConverter {
    /// Parse the conversion at the start of `source` (text following `%`).
    fn parse_format(&self, source: &str, mode: FormatMode) -> Result<ParsedFormat, String>;
}

#[derive(PestParser)]
#[grammar = "format.pest"]
struct FormatParser;

/// printf/scanf style conversions.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFormats;

impl FormatConverter for StdFormats {
    fn parse_format(&self, source: &str, mode: FormatMode) -> Result<ParsedFormat, String> {
        let pair = FormatParser::parse(Rule::format, source)
            .map_err(|_| format!("Missing conversion character in format '%{}'", source))?
            .next()
            .ok_or_else(|| format!("Empty format '%{}'", source))?;
        let consumed = pair.as_span().end();

        let mut flags = FormatFlags::default();
        let mut width = 0u32;
        let mut precision = None;
        let mut conversion = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::flags => {
                    for flag in inner.as_str().chars() {
                        if let Some(bit) = FormatFlags::from_char(flag) {
                            flags.insert(bit);
                        }
                    }
                }
                Rule::width => {
                    width = inner
                        .as_str()
                        .parse()
                        .map_err(|_| format!("Format width {} too large", inner.as_str()))?;
                }
                Rule::precision => {
                    let digits = &inner.as_str()[1..];
                    precision = Some(if digits.is_empty() {
                        0
                    } else {
                        digits
                            .parse()
                            .map_err(|_| format!("Format precision {} too large", digits))?
                    });
                }
                Rule::conversion => conversion = inner.into_inner().next(),
                _ => {}
            }
        }
        let conversion = conversion.ok_or_else(|| format!("Missing conversion character in format '%{}'", source))?;

        let text = conversion.as_str();
        let body = || text.as_bytes()[1..text.len() - 1].to_vec();
        let (kind, conv, info) = match conversion.as_rule() {
            Rule::charset => {
                if mode != FormatMode::Scan {
                    return Err("Format '%[' is only allowed in input formats".to_string());
                }
                (FormatKind::String, b'[', body())
            }
            Rule::choices => (FormatKind::Enum, b'{', body()),
            Rule::checksum => (FormatKind::Pseudo, b'<', body()),
            _ => {
                let conv = text.as_bytes()[0];
                let kind = match conv {
                    b'd' | b'i' => FormatKind::Signed,
                    b'u' | b'o' | b'x' | b'X' | b'b' | b'B' => FormatKind::Unsigned,
                    b'f' | b'F' | b'e' | b'E' | b'g' | b'G' | b'a' | b'A' => FormatKind::Double,
                    b's' | b'c' => FormatKind::String,
                    _ => return Err(format!("Unknown format conversion character '{}'", conv as char)),
                };
                (kind, conv, Vec::new())
            }
        };

        if flags.contains(FormatFlags::SKIP) && mode != FormatMode::Scan {
            return Err("Use of skip modifier '*' only allowed in input formats".to_string());
        }
        if kind == FormatKind::Pseudo && flags.contains(FormatFlags::SKIP) {
            return Err("Use of skip modifier '*' not allowed with checksums".to_string());
        }

        Ok(ParsedFormat {
            kind,
            conv,
            flags,
            width,
            precision,
            info,
            consumed,
        })
    }
}
