//! Compiled instruction streams and their flat wire encoding.
//!
//! Compilation produces a sequence of [`Instruction`]s, where literal data
//! and control markers are distinct variants. [`encode`] flattens such a
//! sequence into the sentinel-framed byte stream runtime engines consume:
//! literal bytes equal to a sentinel value are preceded by
//! [`Sentinel::Escape`], format descriptors are laid out inline
//! (little-endian), and command opcodes and numeric operands are written as
//! raw bytes at positions only the command compiler interprets.

use crate::format::{FieldRef, FormatDescriptor, FormatFlags, FormatKind};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

/// Largest format info string and field address the length fields can carry.
pub const MAX_INFO_LEN: usize = u16::MAX as usize;
/// Largest precision the signed precision field can carry.
pub const MAX_PRECISION: u32 = i32::MAX as u32;

/// Reserved byte values of the wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Sentinel {
    /// End of a string operand, and of the whole stream.
    End = 0x00,
    /// Input: accept any one byte.
    Skip = 0x01,
    /// Input: any amount of whitespace, including none.
    Whitespace = 0x02,
    Format = 0x03,
    FieldFormat = 0x04,
    Escape = 0x1b,
}

impl Sentinel {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x00 => Sentinel::End,
            0x01 => Sentinel::Skip,
            0x02 => Sentinel::Whitespace,
            0x03 => Sentinel::Format,
            0x04 => Sentinel::FieldFormat,
            0x1b => Sentinel::Escape,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Literal(Vec<u8>),
    /// `End`, `Skip` or `Whitespace`.
    Control(Sentinel),
    Field(FormatDescriptor),
    /// Opcode chosen by the command compiler.
    Command(u8),
    /// Numeric command operand.
    Number(u64),
}

/// Append `byte` to `out`, extending a trailing literal run if there is one.
pub fn push_literal(out: &mut Vec<Instruction>, byte: u8) {
    if let Some(Instruction::Literal(bytes)) = out.last_mut() {
        bytes.push(byte);
        return;
    }
    out.push(Instruction::Literal(vec![byte]));
}

/// All literal bytes of a sequence, in order.
pub fn literal_bytes(instructions: &[Instruction]) -> Vec<u8> {
    instructions
        .iter()
        .filter_map(|i| match i {
            Instruction::Literal(b) => Some(b.as_slice()),
            _ => None,
        })
        .flatten()
        .copied()
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} trailing byte(s) after end of stream")]
    TrailingBytes(u64),
    #[error("Unknown format type {0}")]
    UnknownFormatKind(u8),
    #[error("Unknown opcode 0x{0:02x} at offset {1}")]
    UnknownOpcode(u8, u64),
    #[error("Invalid text in descriptor: {0}")]
    Text(#[from] std::string::FromUtf8Error),
}

fn needs_escape(b: u8) -> bool {
    b <= Sentinel::FieldFormat as u8 || b == Sentinel::Escape as u8
}

/// Flatten instructions into the wire encoding.
pub fn encode(instructions: &[Instruction]) -> Vec<u8> {
    let mut out = Vec::new();
    for instruction in instructions {
        match instruction {
            Instruction::Literal(bytes) => {
                for &b in bytes {
                    if needs_escape(b) {
                        out.push(Sentinel::Escape as u8);
                    }
                    out.push(b);
                }
            }
            Instruction::Control(s) => out.push(*s as u8),
            Instruction::Field(desc) => encode_format(&mut out, desc),
            Instruction::Command(op) => out.push(*op),
            Instruction::Number(n) => {
                // writes into a Vec cannot fail
                let _ = out.write_u64::<LittleEndian>(*n);
            }
        }
    }
    out
}

// <Format> source <End> type conv flags width prec infolen info
// <FieldFormat> name <End> addrlen addr source <End> type conv flags width prec infolen info
// lengths and precision are bounded by MAX_INFO_LEN and MAX_PRECISION at compile time
fn encode_format(out: &mut Vec<u8>, desc: &FormatDescriptor) {
    match &desc.field {
        Some(field) => {
            out.push(Sentinel::FieldFormat as u8);
            out.extend_from_slice(field.name.as_bytes());
            out.push(Sentinel::End as u8);
            let _ = out.write_u16::<LittleEndian>(field.address.len() as u16);
            out.extend_from_slice(&field.address);
        }
        None => out.push(Sentinel::Format as u8),
    }
    out.extend_from_slice(desc.source.as_bytes());
    out.push(Sentinel::End as u8);
    out.push(desc.kind as u8);
    out.push(desc.conv);
    let _ = out.write_u16::<LittleEndian>(desc.flags.0);
    let _ = out.write_u32::<LittleEndian>(desc.width);
    let _ = out.write_i32::<LittleEndian>(desc.precision.map_or(-1, |p| p as i32));
    let _ = out.write_u16::<LittleEndian>(desc.info.len() as u16);
    out.extend_from_slice(&desc.info);
}

fn read_cstring(r: &mut Cursor<&[u8]>) -> Result<String, DecodeError> {
    let mut bytes = Vec::new();
    loop {
        match r.read_u8()? {
            0 => break,
            b => bytes.push(b),
        }
    }
    Ok(String::from_utf8(bytes)?)
}

fn read_exact_vec(r: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>, DecodeError> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn decode_format(r: &mut Cursor<&[u8]>, with_field: bool) -> Result<FormatDescriptor, DecodeError> {
    let field = if with_field {
        let name = read_cstring(r)?;
        let len = r.read_u16::<LittleEndian>()? as usize;
        let address = read_exact_vec(r, len)?;
        Some(FieldRef { name, address })
    } else {
        None
    };
    let source = read_cstring(r)?;
    let tag = r.read_u8()?;
    let kind = FormatKind::from_tag(tag).ok_or(DecodeError::UnknownFormatKind(tag))?;
    let conv = r.read_u8()?;
    let flags = FormatFlags(r.read_u16::<LittleEndian>()?);
    let width = r.read_u32::<LittleEndian>()?;
    let precision = r.read_i32::<LittleEndian>()?;
    let info_len = r.read_u16::<LittleEndian>()? as usize;
    let info = read_exact_vec(r, info_len)?;
    Ok(FormatDescriptor {
        kind,
        conv,
        flags,
        width,
        precision: (precision >= 0).then_some(precision as u32),
        source,
        info,
        field,
    })
}

/// Decode one string operand up to and including its `End` sentinel.
pub fn decode_string(r: &mut Cursor<&[u8]>) -> Result<Vec<Instruction>, DecodeError> {
    let mut out = Vec::new();
    loop {
        let offset = r.position();
        let b = r.read_u8()?;
        match Sentinel::from_byte(b) {
            None => push_literal(&mut out, b),
            Some(Sentinel::Escape) => {
                let escaped = r.read_u8()?;
                push_literal(&mut out, escaped);
            }
            Some(Sentinel::End) => {
                out.push(Instruction::Control(Sentinel::End));
                return Ok(out);
            }
            Some(s @ (Sentinel::Skip | Sentinel::Whitespace)) => out.push(Instruction::Control(s)),
            Some(Sentinel::Format) => out.push(Instruction::Field(decode_format(r, false)?)),
            Some(Sentinel::FieldFormat) => out.push(Instruction::Field(decode_format(r, true)?)),
        }
        debug_assert!(r.position() > offset);
    }
}

/// Decode a complete string stream; nothing may follow its `End`.
pub fn decode(bytes: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
    let mut r = Cursor::new(bytes);
    let out = decode_string(&mut r)?;
    if r.position() < bytes.len() as u64 {
        return Err(DecodeError::TrailingBytes(bytes.len() as u64 - r.position()));
    }
    Ok(out)
}

pub fn read_number(r: &mut Cursor<&[u8]>) -> Result<u64, DecodeError> {
    Ok(r.read_u64::<LittleEndian>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(field: Option<FieldRef>) -> FormatDescriptor {
        FormatDescriptor {
            kind: FormatKind::Enum,
            conv: b'{',
            flags: FormatFlags(FormatFlags::LEFT),
            width: 3,
            precision: None,
            source: "-3{a|b}".to_string(),
            info: b"a|b".to_vec(),
            field,
        }
    }

    #[test]
    fn sentinel_valued_literals_are_escaped() {
        let stream = vec![
            Instruction::Literal(vec![b'A', 0x00, 0x02, 0x1b, 0x7f]),
            Instruction::Control(Sentinel::Skip),
            Instruction::Control(Sentinel::End),
        ];
        let bytes = encode(&stream);
        assert_eq!(bytes, vec![b'A', 0x1b, 0x00, 0x1b, 0x02, 0x1b, 0x1b, 0x7f, 0x01, 0x00]);

        let decoded = decode_string(&mut Cursor::new(bytes.as_slice())).expect("decode");
        assert_eq!(decoded, stream);
    }

    #[test]
    fn descriptors_survive_the_wire() {
        let stream = vec![
            Instruction::Literal(b"V=".to_vec()),
            Instruction::Field(descriptor(None)),
            Instruction::Field(descriptor(Some(FieldRef {
                name: "VAL".to_string(),
                address: vec![0, 1, 2],
            }))),
            Instruction::Control(Sentinel::End),
        ];
        let bytes = encode(&stream);
        assert_eq!(bytes[2], Sentinel::Format as u8);
        let decoded = decode_string(&mut Cursor::new(bytes.as_slice())).expect("decode");
        assert_eq!(decoded, stream);
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let bytes = encode(&[Instruction::Field(descriptor(None))]);
        let cut = &bytes[..bytes.len() - 2];
        assert!(decode_string(&mut Cursor::new(cut)).is_err());
    }

    #[test]
    fn decode_rejects_bytes_after_end() {
        let mut bytes = encode(&[Instruction::Literal(b"ok".to_vec()), Instruction::Control(Sentinel::End)]);
        assert_eq!(decode(&bytes).expect("decode").len(), 2);
        bytes.push(b'x');
        assert!(matches!(decode(&bytes), Err(DecodeError::TrailingBytes(1))));
    }

    #[test]
    fn literal_runs_coalesce() {
        let mut out = Vec::new();
        push_literal(&mut out, b'a');
        push_literal(&mut out, b'b');
        out.push(Instruction::Control(Sentinel::Whitespace));
        push_literal(&mut out, b'c');
        assert_eq!(out.len(), 3);
        assert_eq!(literal_bytes(&out), b"abc".to_vec());
    }
}
