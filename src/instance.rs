//! Protocol instances: parameter binding, typed variable access, handler
//! compilation and the unused-binding check.

use crate::ast::{Protocol, ProtocolRequest};
use crate::command::Backend;
use crate::diag::Diagnostics;
use crate::error::ProtocolError;
use crate::format::FormatMode;
use crate::instruction::{Instruction, Sentinel};
use crate::token::{display_tokens, Token};

/// A protocol instance compiled for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledProtocol {
    pub name: String,
    /// The protocol body, terminated by `End`.
    pub body: Vec<Instruction>,
    /// Non-empty handlers the device asked for, in its order.
    pub handlers: Vec<(String, Vec<Instruction>)>,
}

impl CompiledProtocol {
    pub fn handler(&self, name: &str) -> Option<&[Instruction]> {
        self.handlers
            .iter()
            .find(|(n, _)| crate::ast::name_matches(n, name))
            .map(|(_, code)| code.as_slice())
    }
}

impl Protocol {
    /// Deep copy of this template with the request's parameters bound:
    /// `$0` is the request as written, `$1`.. its arguments.
    pub fn instantiate(&self, request: &ProtocolRequest) -> Protocol {
        let mut instance = self.clone();
        instance.parameters = Default::default();
        instance.parameters[0] = Some(request.full.clone());
        for (slot, arg) in instance.parameters[1..].iter_mut().zip(&request.args) {
            *slot = Some(arg.clone());
        }
        log::debug!(
            "instantiate '{}' from line {} with {} argument(s)",
            request.full,
            self.line,
            request.args.len()
        );
        instance
    }

    fn variable_value(&mut self, name: &str) -> Option<(Vec<Token>, u32)> {
        self.get_variable(name).map(|b| (b.value.clone(), b.line))
    }

    /// Numeric setting `name` no larger than `max`, `None` when undefined.
    pub fn number_variable(&mut self, name: &str, max: u64) -> Result<Option<u64>, ProtocolError> {
        let (value, line) = match self.variable_value(name) {
            Some(v) => v,
            None => return Ok(None),
        };
        let at = self.location(line);
        let (number, used) = self
            .compile_number(&value, max)
            .map_err(|e| e.context(at.clone(), format!("in variable {}", name)))?;
        let rest = &value[used..];
        if !rest.iter().all(Token::is_separator) {
            return Err(ProtocolError::garbage(
                at,
                format!(
                    "Garbage in variable '{}' after numeric value {}: {}",
                    name,
                    number,
                    display_tokens(rest).trim()
                ),
            ));
        }
        Ok(Some(number))
    }

    /// Index of the choice setting `name` holds, `None` when undefined.
    pub fn enum_variable(&mut self, name: &str, choices: &[&str]) -> Result<Option<usize>, ProtocolError> {
        let (value, line) = match self.variable_value(name) {
            Some(v) => v,
            None => return Ok(None),
        };
        let text: String = value.iter().map(|t| t.text.as_str()).collect();
        if let Some(index) = choices.iter().position(|c| c.eq_ignore_ascii_case(text.trim())) {
            return Ok(Some(index));
        }
        let expected = choices
            .iter()
            .map(|c| format!("'{}'", c))
            .collect::<Vec<_>>()
            .join(" or ");
        Err(ProtocolError::syntax(
            self.location(line),
            format!("Value '{}' must be one of {}", text, expected),
        )
        .context(self.location(line), format!("in variable '{}'", name)))
    }

    /// String setting `name` compiled without formats, `None` when undefined.
    pub fn string_variable(&mut self, name: &str) -> Result<Option<Vec<Instruction>>, ProtocolError> {
        let (value, line) = match self.variable_value(name) {
            Some(v) => v,
            None => return Ok(None),
        };
        let at = self.location(line);
        let code = self
            .compile_string(&value, FormatMode::None, None, None)
            .map_err(|e| e.context(at, format!("in string variable '{}'", name)))?;
        Ok(Some(code))
    }

    /// Compile the body (`None`) or a handler. An undefined or empty
    /// handler gives `None`.
    pub fn compile_handler(
        &mut self,
        handler: Option<&str>,
        backend: &Backend<'_>,
    ) -> Result<Option<Vec<Instruction>>, ProtocolError> {
        let (source, line) = match handler {
            None => (self.commands().to_vec(), self.line),
            Some(name) => match self.variable_value(name) {
                Some(v) => v,
                None => return Ok(None),
            },
        };
        if source.is_empty() {
            return Ok(None);
        }
        log::trace!(
            "getCommands({}): {}",
            handler.unwrap_or("<body>"),
            display_tokens(&source)
        );
        match self.compile_commands(&source, backend) {
            Ok(code) => Ok(Some(code)),
            Err(e) => Err(match handler {
                Some(name) => e
                    .context(self.location(line), format!("in handler '{}'", name))
                    .context(self.location(self.line), format!("used by protocol '{}'", self.name)),
                None => e.context(self.location(line), format!("in protocol '{}'", self.name)),
            }),
        }
    }

    /// Compile the body and every handler the device knows.
    pub fn compile(&mut self, backend: &Backend<'_>) -> Result<CompiledProtocol, ProtocolError> {
        let body = self
            .compile_handler(None, backend)?
            .unwrap_or_else(|| vec![Instruction::Control(Sentinel::End)]);
        let mut handlers = Vec::new();
        for name in backend.commands.handlers() {
            if let Some(code) = self.compile_handler(Some(*name), backend)? {
                handlers.push((name.to_string(), code));
            }
        }
        log::debug!(
            "compiled protocol '{}': {} body instruction(s), {} handler(s)",
            self.name,
            body.len(),
            handlers.len()
        );
        Ok(CompiledProtocol {
            name: self.name.clone(),
            body,
            handlers,
        })
    }

    /// Handlers nobody referenced are errors; unused variables only go to
    /// `diagnostics` as notes.
    pub fn check_unused(&self, diagnostics: &dyn Diagnostics) -> Result<(), ProtocolError> {
        for binding in self.bindings() {
            if binding.used {
                continue;
            }
            if binding.is_handler() {
                let message = format!(
                    "Unknown handler {} defined in protocol file '{}' line {}",
                    binding.name, self.filename, binding.line
                );
                return Err(ProtocolError::unused_handler(self.location(binding.line), message));
            }
            diagnostics.note(
                binding.line,
                &self.filename,
                &format!("Unused variable {} in protocol '{}'", binding.name, self.name),
            );
        }
        Ok(())
    }
}
