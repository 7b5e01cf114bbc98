//! Parse protocol files into [`ProtocolFile`]s.
//!
//! Grammar, informally:
//!
//! ```text
//! file     := { assignment | handler | protocol }*
//! protocol := name '{' { assignment | handler | command | reference }* '}'
//! handler  := '@' name '{' { command | reference }* '}'
//! assignment := name '=' value ';'
//! command  := name value ';'
//! reference := protocolname ';'
//! ```
//!
//! Assignments resolve named variable references immediately; command
//! arguments keep every reference so it can be resolved per instance.
//! A reference to an earlier protocol copies its raw body in place.

use crate::ast::{is_statement_word, name_matches, Protocol, ProtocolFile};
use crate::error::{Location, ProtocolError};
use crate::token::{Token, TokenKind, Tokenizer, STATEMENT_SPECIALS};

/// Parse protocol file `source`; `filename` is used in diagnostics.
pub fn parse(source: &str, filename: &str) -> Result<ProtocolFile, ProtocolError> {
    parse_bytes(source.as_bytes(), filename)
}

pub fn parse_bytes(source: &[u8], filename: &str) -> Result<ProtocolFile, ProtocolError> {
    let mut parser = Parser {
        tokens: Tokenizer::new(source.to_vec(), filename),
        filename: filename.to_string(),
        protocols: Vec::new(),
    };
    let mut global = Protocol::global(filename);
    parser.parse_body(&mut global, Target::Global)?;
    log::debug!(
        "parsed '{}': {} protocol(s), {} global binding(s)",
        filename,
        parser.protocols.len(),
        global.bindings().len()
    );
    Ok(ProtocolFile {
        filename: parser.filename,
        global,
        protocols: parser.protocols,
    })
}

/// Where the statements currently being parsed end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Global,
    Body,
    Handler(usize),
}

struct Parser {
    tokens: Tokenizer,
    filename: String,
    protocols: Vec<Protocol>,
}

impl Parser {
    fn location(&self, line: u32) -> Location {
        Location::new(self.filename.clone(), line)
    }

    fn error(&self, message: impl Into<String>) -> ProtocolError {
        ProtocolError::syntax(self.tokens.location(), message)
    }

    fn parse_body(&mut self, protocol: &mut Protocol, target: Target) -> Result<(), ProtocolError> {
        loop {
            let startline = self.tokens.line();
            let token = self.tokens.read_token(STATEMENT_SPECIALS, target == Target::Global)?;
            log::trace!("parseProtocol: token='{}'", token);

            match token.kind {
                TokenKind::Eof => return Ok(()),
                TokenKind::Special(b' ' | b';') => continue,
                TokenKind::Special(b'}') => {
                    if target != Target::Global {
                        return Ok(());
                    }
                    return Err(self.error("Unexpected '}' (no matching '{') in global context"));
                }
                TokenKind::Special(b'{') => {
                    return Err(self.error(format!(
                        "Expect {} name before '{{'",
                        if target == Target::Global { "protocol" } else { "handler" }
                    )));
                }
                TokenKind::Special(b'=') => {
                    return Err(self.error("Expect variable name before '='"));
                }
                _ if !is_statement_word(&token) => {
                    return Err(self.error(format!("Unexpected '{}'", token)));
                }
                _ => {}
            }

            let op = loop {
                match self.tokens.reader().read_char() {
                    Some(b' ') => continue,
                    other => break other,
                }
            };

            match op {
                Some(b'=') => self.parse_assignment(protocol, target, &token, startline)?,
                Some(b'{') => self.parse_definition(protocol, target, &token, startline)?,
                _ => self.parse_command(protocol, target, token, op, startline)?,
            }
        }
    }

    fn parse_assignment(
        &mut self,
        protocol: &mut Protocol,
        target: Target,
        name: &Token,
        startline: u32,
    ) -> Result<(), ProtocolError> {
        if let Target::Handler(_) = target {
            return Err(self.error(format!("Variables are not allowed in handlers: {}", name.text)));
        }
        if name.text.starts_with('@') {
            return Err(self.error(format!("Variable name cannot start with '@': {}", name.text)));
        }
        let value = self
            .tokens
            .parse_value(false, |reference| protocol_reference(protocol, reference))
            .map_err(|e| {
                e.context(
                    self.location(startline),
                    format!("in variable assignment '{} = ...'", name.text),
                )
            })?;
        let line = self.tokens.line();
        let index = protocol.create_variable(&name.text, line);
        protocol.bindings[index].value = value;
        log::trace!("assignment {} at line {}", name.text, line);
        Ok(())
    }

    fn parse_definition(
        &mut self,
        protocol: &mut Protocol,
        target: Target,
        name: &Token,
        startline: u32,
    ) -> Result<(), ProtocolError> {
        if name.text.starts_with('@') {
            if let Target::Handler(_) = target {
                return Err(self.error(format!("Handlers are not allowed in handlers: {}", name.text)));
            }
            let index = protocol.create_variable(&name.text, self.tokens.line());
            // a later definition replaces the earlier one
            protocol.bindings[index].value.clear();
            return self
                .parse_body(protocol, Target::Handler(index))
                .map_err(|e| e.context(self.location(startline), format!("in handler '{}'", name.text)));
        }

        if target != Target::Global {
            return Err(self.error(format!(
                "Definition of '{}' not in global context (missing '}}' ?)",
                name.text
            )));
        }
        if self.protocols.iter().any(|p| name_matches(&p.name, &name.text)) {
            return Err(self.error(format!("Protocol '{}' redefined", name.text)));
        }
        let mut definition = Protocol::derive(protocol, &name.text, startline);
        self.parse_body(&mut definition, Target::Body)
            .map_err(|e| e.context(self.location(startline), format!("in protocol '{}'", name.text)))?;
        log::debug!(
            "protocol '{}' (line {}): {} command token(s)",
            definition.name,
            startline,
            definition.commands().len()
        );
        self.protocols.push(definition);
        Ok(())
    }

    fn parse_command(
        &mut self,
        protocol: &mut Protocol,
        target: Target,
        token: Token,
        op: Option<u8>,
        startline: u32,
    ) -> Result<(), ProtocolError> {
        if token.text.starts_with('@') {
            return Err(self.error(format!("Expect '{{' after handler '{}'", token.text)));
        }
        if target == Target::Global {
            return Err(self.error(format!("Expect '=' or '{{' instead after '{}'", token.text)));
        }

        if matches!(op, Some(b';') | Some(b'}')) {
            if let Some(referenced) = self.protocols.iter().find(|p| name_matches(&p.name, &token.text)) {
                let body = referenced.commands().to_vec();
                target_tokens(protocol, target).extend(body);
                if op == Some(b'}') {
                    self.tokens.reader().ungetc(b'}');
                }
                return Ok(());
            }
        }

        // a command; the command compiler decides later whether it exists
        let name = token.text.clone();
        let line = token.line;
        if let Some(op) = op {
            self.tokens.reader().ungetc(op);
        }
        let args = self
            .tokens
            .parse_value(true, |_| Ok(Vec::new()))
            .map_err(|e| e.context(self.location(startline), format!("after command '{}'", name)))?;
        let buffer = target_tokens(protocol, target);
        buffer.push(token);
        buffer.extend(args);
        buffer.push(Token::new(TokenKind::CommandEnd, "", line));
        Ok(())
    }
}

fn target_tokens(protocol: &mut Protocol, target: Target) -> &mut Vec<Token> {
    match target {
        Target::Handler(index) => &mut protocol.bindings[index].value,
        Target::Body | Target::Global => protocol.commands_mut(),
    }
}

fn protocol_reference(protocol: &mut Protocol, reference: &Token) -> Result<Vec<Token>, ProtocolError> {
    protocol.replace_variable(reference)
}
