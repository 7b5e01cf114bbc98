//! A reference device: a small command vocabulary over a byte stream.
//!
//! | command      | arguments          | encoding                        |
//! |--------------|--------------------|---------------------------------|
//! | `out`        | output string      | `OUT` string `End`              |
//! | `in`         | input string       | `IN` string `End`               |
//! | `wait`       | milliseconds       | `WAIT` u64                      |
//! | `event`      | optional timeout   | `EVENT` u64                     |
//! | `exec`       | output string      | `EXEC` string `End`             |
//! | `connect`    | timeout            | `CONNECT` u64                   |
//! | `disconnect` |                    | `DISCONNECT`                    |
//!
//! A program ends with `End` where the next opcode would be.

use crate::ast::Protocol;
use crate::command::{Arguments, CommandCompiler, FieldResolver};
use crate::dump;
use crate::error::ProtocolError;
use crate::format::FormatMode;
use crate::instruction::{decode_string, read_number, DecodeError, Instruction, Sentinel};
use byteorder::ReadBytesExt;
use std::collections::HashMap;
use std::io::Cursor;

pub mod opcode {
    pub const OUT: u8 = 0x11;
    pub const IN: u8 = 0x12;
    pub const WAIT: u8 = 0x13;
    pub const EVENT: u8 = 0x14;
    pub const EXEC: u8 = 0x15;
    pub const CONNECT: u8 = 0x16;
    pub const DISCONNECT: u8 = 0x17;

    pub fn name(op: u8) -> Option<&'static str> {
        Some(match op {
            OUT => "out",
            IN => "in",
            WAIT => "wait",
            EVENT => "event",
            EXEC => "exec",
            CONNECT => "connect",
            DISCONNECT => "disconnect",
            _ => return None,
        })
    }
}

pub const STANDARD_HANDLERS: &[&str] = &["@init", "@mismatch", "@writetimeout", "@replytimeout", "@readtimeout"];

const MAX_TIMEOUT: u64 = u32::MAX as u64;

/// What to do with input after a successful match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraInput {
    Error,
    Ignore,
}

/// Protocol settings the device reads from variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    pub out_terminator: Vec<Instruction>,
    pub in_terminator: Vec<Instruction>,
    pub separator: Vec<Instruction>,
    pub lock_timeout: u64,
    pub write_timeout: u64,
    pub reply_timeout: u64,
    pub read_timeout: u64,
    pub max_input: u64,
    pub extra_input: ExtraInput,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            out_terminator: Vec::new(),
            in_terminator: Vec::new(),
            separator: Vec::new(),
            lock_timeout: 5000,
            write_timeout: 100,
            reply_timeout: 1000,
            read_timeout: 100,
            max_input: 0,
            extra_input: ExtraInput::Error,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct BasicDevice {
    fields: HashMap<String, Vec<u8>>,
}

impl BasicDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `%(name)` resolve to `address`.
    pub fn with_field(mut self, name: impl Into<String>, address: impl Into<Vec<u8>>) -> Self {
        self.fields.insert(name.into(), address.into());
        self
    }

    /// Read the settings variables of `protocol`, marking them used.
    pub fn settings(&self, protocol: &mut Protocol) -> Result<DeviceSettings, ProtocolError> {
        let mut s = DeviceSettings::default();
        if let Some(t) = protocol.string_variable("terminator")? {
            s.out_terminator = t.clone();
            s.in_terminator = t;
        }
        if let Some(t) = protocol.string_variable("outterminator")? {
            s.out_terminator = t;
        }
        if let Some(t) = protocol.string_variable("interminator")? {
            s.in_terminator = t;
        }
        if let Some(t) = protocol.string_variable("separator")? {
            s.separator = t;
        }
        let timeouts = [
            ("locktimeout", &mut s.lock_timeout),
            ("writetimeout", &mut s.write_timeout),
            ("replytimeout", &mut s.reply_timeout),
            ("readtimeout", &mut s.read_timeout),
            ("maxinput", &mut s.max_input),
        ];
        for (name, slot) in timeouts {
            if let Some(v) = protocol.number_variable(name, MAX_TIMEOUT)? {
                *slot = v;
            }
        }
        if let Some(i) = protocol.enum_variable("extrainput", &["error", "ignore"])? {
            s.extra_input = if i == 0 { ExtraInput::Error } else { ExtraInput::Ignore };
        }
        Ok(s)
    }
}

impl FieldResolver for BasicDevice {
    fn field_address(&self, name: &str) -> Option<Vec<u8>> {
        self.fields.get(name).cloned()
    }
}

impl CommandCompiler for BasicDevice {
    fn compile_command(
        &self,
        command: &str,
        args: &mut Arguments<'_>,
        out: &mut Vec<Instruction>,
    ) -> Result<(), ProtocolError> {
        match command {
            "out" | "in" | "exec" => {
                let (op, mode) = match command {
                    "out" => (opcode::OUT, FormatMode::Print),
                    "in" => (opcode::IN, FormatMode::Scan),
                    _ => (opcode::EXEC, FormatMode::Print),
                };
                out.push(Instruction::Command(op));
                out.extend(args.compile_string(mode)?);
                out.push(Instruction::Control(Sentinel::End));
            }
            "wait" | "connect" => {
                let op = if command == "wait" { opcode::WAIT } else { opcode::CONNECT };
                let n = args.compile_number(MAX_TIMEOUT)?;
                out.push(Instruction::Command(op));
                out.push(Instruction::Number(n));
            }
            "event" => {
                let timeout = if args.is_empty() {
                    0
                } else {
                    args.compile_number(MAX_TIMEOUT)?
                };
                out.push(Instruction::Command(opcode::EVENT));
                out.push(Instruction::Number(timeout));
            }
            "disconnect" => out.push(Instruction::Command(opcode::DISCONNECT)),
            _ => return Err(args.undefined(format!("Unknown command name '{}'", command))),
        }
        Ok(())
    }

    fn handlers(&self) -> &[&str] {
        STANDARD_HANDLERS
    }
}

/// Decode a wire-encoded program of this device.
pub fn decode_program(bytes: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
    let mut r = Cursor::new(bytes);
    let mut out = Vec::new();
    loop {
        let offset = r.position();
        let op = r.read_u8()?;
        match op {
            0 => {
                out.push(Instruction::Control(Sentinel::End));
                break;
            }
            opcode::OUT | opcode::IN | opcode::EXEC => {
                out.push(Instruction::Command(op));
                out.extend(decode_string(&mut r)?);
            }
            opcode::WAIT | opcode::EVENT | opcode::CONNECT => {
                out.push(Instruction::Command(op));
                out.push(Instruction::Number(read_number(&mut r)?));
            }
            opcode::DISCONNECT => out.push(Instruction::Command(op)),
            _ => return Err(DecodeError::UnknownOpcode(op, offset)),
        }
    }
    if r.position() < bytes.len() as u64 {
        return Err(DecodeError::TrailingBytes(bytes.len() as u64 - r.position()));
    }
    Ok(out)
}

/// Render a program as commands: `out "V?\r"; in "%d"; wait 100;`.
pub fn render_program(program: &[Instruction]) -> String {
    let mut out = String::new();
    let mut i = 0;
    while i < program.len() {
        let op = match &program[i] {
            Instruction::Command(op) => *op,
            Instruction::Control(Sentinel::End) => break,
            other => {
                out.push_str(&dump::render(std::slice::from_ref(other)));
                i += 1;
                continue;
            }
        };
        i += 1;
        match opcode::name(op) {
            Some(name) => out.push_str(name),
            None => out.push_str(&format!("<{:#04x}>", op)),
        }
        match op {
            opcode::OUT | opcode::IN | opcode::EXEC => {
                let end = program[i..]
                    .iter()
                    .position(|x| *x == Instruction::Control(Sentinel::End))
                    .map_or(program.len(), |p| i + p);
                out.push_str(&format!(" \"{}\"", dump::render(&program[i..end])));
                i = end + 1;
            }
            opcode::WAIT | opcode::EVENT | opcode::CONNECT => {
                if let Some(Instruction::Number(n)) = program.get(i) {
                    out.push_str(&format!(" {}", n));
                    i += 1;
                }
            }
            _ => {}
        }
        out.push_str("; ");
    }
    out.trim_end().to_string()
}
