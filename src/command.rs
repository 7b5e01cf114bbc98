//! Command compilation and the device-side collaborator traits.
//!
//! A protocol body or handler is a list of commands, each a word followed by
//! argument tokens. [`Protocol::compile_commands`] hands every command to a
//! [`CommandCompiler`], which pulls the arguments it expects out of
//! [`Arguments`] and appends its encoding. Whatever the compiler leaves
//! unconsumed is an error.

use crate::ast::Protocol;
use crate::error::ProtocolError;
use crate::format::{FormatConverter, FormatMode};
use crate::instruction::{Instruction, Sentinel};
use crate::token::{display_tokens, Token, TokenKind};

/// Maps `%(name)` field names to opaque address bytes.
pub trait FieldResolver {
    fn field_address(&self, name: &str) -> Option<Vec<u8>>;
}

/// Resolver for contexts without addressable fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFields;

impl FieldResolver for NoFields {
    fn field_address(&self, _name: &str) -> Option<Vec<u8>> {
        None
    }
}

/// Device-specific command vocabulary.
pub trait CommandCompiler {
    /// Encode `command` into `out`, consuming its arguments from `args`.
    fn compile_command(
        &self,
        command: &str,
        args: &mut Arguments<'_>,
        out: &mut Vec<Instruction>,
    ) -> Result<(), ProtocolError>;

    /// Handlers this device runs, compiled along with the protocol body.
    fn handlers(&self) -> &[&str] {
        &[]
    }
}

/// The collaborators used for one compilation.
#[derive(Clone, Copy)]
pub struct Backend<'a> {
    pub commands: &'a dyn CommandCompiler,
    pub fields: Option<&'a dyn FieldResolver>,
    pub formats: &'a dyn FormatConverter,
}

impl<'a> Backend<'a> {
    pub fn new(commands: &'a dyn CommandCompiler, formats: &'a dyn FormatConverter) -> Self {
        Backend {
            commands,
            fields: None,
            formats,
        }
    }

    pub fn with_fields(mut self, fields: &'a dyn FieldResolver) -> Self {
        self.fields = Some(fields);
        self
    }
}

/// Arguments of one command, consumed front to back by the command compiler.
pub struct Arguments<'a> {
    protocol: &'a mut Protocol,
    fields: Option<&'a dyn FieldResolver>,
    formats: &'a dyn FormatConverter,
    command: String,
    line: u32,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Arguments<'a> {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    /// Tokens not consumed yet.
    pub fn remaining(&self) -> &[Token] {
        &self.tokens[self.pos..]
    }

    /// Nothing but separators left.
    pub fn is_empty(&self) -> bool {
        self.remaining().iter().all(Token::is_separator)
    }

    /// Compile all remaining arguments as one string.
    pub fn compile_string(&mut self, mode: FormatMode) -> Result<Vec<Instruction>, ProtocolError> {
        let tokens = self.tokens[self.pos..].to_vec();
        self.pos = self.tokens.len();
        self.protocol
            .compile_string(&tokens, mode, self.fields, Some(self.formats))
    }

    /// Compile a leading unsigned number no larger than `max`.
    pub fn compile_number(&mut self, max: u64) -> Result<u64, ProtocolError> {
        while self.tokens.get(self.pos).map_or(false, Token::is_separator) {
            self.pos += 1;
        }
        let tokens = self.tokens[self.pos..].to_vec();
        let (value, used) = self.protocol.compile_number(&tokens, max)?;
        self.pos += used;
        Ok(value)
    }

    pub fn error(&self, message: impl Into<String>) -> ProtocolError {
        ProtocolError::syntax(self.protocol.location(self.line), message)
    }

    pub fn undefined(&self, message: impl Into<String>) -> ProtocolError {
        ProtocolError::undefined(self.protocol.location(self.line), message)
    }
}

impl Protocol {
    /// Compile a command list into instructions terminated by `End`.
    pub fn compile_commands(&mut self, tokens: &[Token], backend: &Backend<'_>) -> Result<Vec<Instruction>, ProtocolError> {
        let mut out = Vec::new();
        let mut rest = tokens;
        while let Some((command, tail)) = rest.split_first() {
            let end = tail
                .iter()
                .position(|t| t.kind == TokenKind::CommandEnd)
                .unwrap_or(tail.len());
            let (args, next) = tail.split_at(end);
            rest = next.get(1..).unwrap_or(&[]);

            if command.kind != TokenKind::Word {
                return Err(ProtocolError::syntax(
                    self.location(command.line),
                    format!("Expect command name instead of '{}'", command),
                ));
            }
            log::trace!("compileCommand: {} {}", command.text, display_tokens(args));

            let at = self.location(command.line);
            let mut arguments = Arguments {
                protocol: &mut *self,
                fields: backend.fields,
                formats: backend.formats,
                command: command.text.clone(),
                line: command.line,
                tokens: args.to_vec(),
                pos: 0,
            };
            backend
                .commands
                .compile_command(&command.text, &mut arguments, &mut out)
                .map_err(|e| e.context(at.clone(), format!("in command '{}'", command.text)))?;
            if !arguments.is_empty() {
                let garbage = display_tokens(arguments.remaining());
                return Err(ProtocolError::garbage(
                    at,
                    format!("Garbage after '{}' command: '{}'", command.text, garbage.trim()),
                ));
            }
        }
        out.push(Instruction::Control(Sentinel::End));
        Ok(out)
    }
}
