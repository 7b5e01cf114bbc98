//! Parsed protocol files: protocols, their bindings and instantiation requests.

use crate::config::DEFAULT_MAX_RECURSION_DEPTH;
use crate::error::{Location, ProtocolError};
use crate::token::{Token, TokenKind};

/// Positional parameters `$1`..`$9`; slot 0 holds the instantiation string.
pub const MAX_PARAMETERS: usize = 9;

/// Names of protocols, variables and handlers compare case-insensitively and in full.
pub fn name_matches(stored: &str, wanted: &str) -> bool {
    stored.eq_ignore_ascii_case(wanted)
}

/// A variable (`name = value;`) or handler (`@name { ... }`) of one protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    /// Raw value tokens; for handlers and the protocol body, commands
    /// separated by [`TokenKind::CommandEnd`].
    pub value: Vec<Token>,
    /// Line of the last assignment.
    pub line: u32,
    pub used: bool,
}

impl Binding {
    pub fn new(name: impl Into<String>, line: u32) -> Self {
        Binding {
            name: name.into(),
            value: Vec::new(),
            line,
            used: false,
        }
    }

    pub fn is_handler(&self) -> bool {
        self.name.starts_with('@')
    }
}

/// One protocol: a template owned by its [`ProtocolFile`], or an instance
/// produced by [`Protocol::instantiate`] and owned by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Protocol {
    /// Lowercase protocol name; empty for the global settings of a file.
    pub name: String,
    pub filename: String,
    pub line: u32,
    pub(crate) parameters: [Option<String>; MAX_PARAMETERS + 1],
    /// `bindings[0]` is the protocol body; the rest in definition order.
    pub(crate) bindings: Vec<Binding>,
    pub(crate) max_depth: usize,
}

impl Protocol {
    /// The implicit container for top-level variables and handlers of a file.
    pub fn global(filename: impl Into<String>) -> Self {
        Protocol {
            name: String::new(),
            filename: filename.into(),
            line: 0,
            parameters: Default::default(),
            bindings: vec![Binding::new("", 0)],
            max_depth: DEFAULT_MAX_RECURSION_DEPTH,
        }
    }

    /// A protocol definition starting at `line`, inheriting every binding
    /// `parent` holds right now. The body starts out empty.
    pub fn derive(parent: &Protocol, name: &str, line: u32) -> Self {
        let mut bindings = parent.bindings.clone();
        bindings[0] = Binding::new("", line);
        Protocol {
            name: name.to_ascii_lowercase(),
            filename: parent.filename.clone(),
            line,
            parameters: Default::default(),
            bindings,
            max_depth: parent.max_depth,
        }
    }

    pub fn location(&self, line: u32) -> Location {
        Location::new(self.filename.clone(), line)
    }

    /// Raw command tokens of the protocol body.
    pub fn commands(&self) -> &[Token] {
        &self.bindings[0].value
    }

    pub(crate) fn commands_mut(&mut self) -> &mut Vec<Token> {
        &mut self.bindings[0].value
    }

    /// Variables and handlers, without the body.
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings[1..]
    }

    /// Look up a binding without marking it used.
    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings[1..].iter().find(|b| name_matches(&b.name, name))
    }

    pub(crate) fn binding_index(&self, name: &str) -> Option<usize> {
        self.bindings
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, b)| name_matches(&b.name, name))
            .map(|(i, _)| i)
    }

    /// Find or append the binding `name`, stamping it with `line`. Returns its index.
    pub(crate) fn create_variable(&mut self, name: &str, line: u32) -> usize {
        match self.binding_index(name) {
            Some(i) => {
                self.bindings[i].line = line;
                i
            }
            None => {
                self.bindings.push(Binding::new(name.to_ascii_lowercase(), line));
                self.bindings.len() - 1
            }
        }
    }

    pub fn parameter(&self, index: usize) -> Option<&str> {
        self.parameters.get(index).and_then(|p| p.as_deref())
    }

    pub fn max_recursion_depth(&self) -> usize {
        self.max_depth
    }

    pub fn set_max_recursion_depth(&mut self, depth: usize) {
        self.max_depth = depth;
    }
}

/// Everything parsed from one protocol file.
#[derive(Debug, Clone)]
pub struct ProtocolFile {
    pub filename: String,
    pub global: Protocol,
    pub protocols: Vec<Protocol>,
}

impl ProtocolFile {
    pub fn find(&self, name: &str) -> Option<&Protocol> {
        self.protocols.iter().find(|p| name_matches(&p.name, name))
    }

    /// Deep copy of the protocol named in `request`, parameters filled in.
    pub fn instantiate(&self, request: &ProtocolRequest) -> Result<Protocol, ProtocolError> {
        match self.find(&request.name) {
            Some(template) => Ok(template.instantiate(request)),
            None => Err(ProtocolError::undefined(
                Location::new(self.filename.clone(), 0),
                format!(
                    "Protocol '{}' not found in protocol file '{}'",
                    request.full, self.filename
                ),
            )),
        }
    }
}

/// `name` or `name(arg1,arg2,...)` as written by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolRequest {
    /// The request as given (trimmed); becomes `$0`.
    pub full: String,
    pub name: String,
    pub args: Vec<String>,
}

impl ProtocolRequest {
    /// Split a request. Arguments are separated by top-level commas;
    /// `\` escapes the next character and nested parentheses are kept.
    pub fn parse(request: &str) -> Result<Self, String> {
        let full = request.trim();
        let (name, rest) = match full.find('(') {
            Some(i) => (full[..i].trim(), Some(&full[i + 1..])),
            None => (full, None),
        };
        if name.is_empty() {
            return Err(format!("Missing protocol name in '{}'", full));
        }
        if name.contains(|c: char| c.is_ascii_whitespace() || c == ')') {
            return Err(format!("Garbage after protocol name in '{}'", full));
        }
        let mut args = Vec::new();
        if let Some(rest) = rest {
            let mut depth = 0usize;
            let mut current = String::new();
            let mut chars = rest.chars();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some(e) => current.push(e),
                        None => return Err(format!("Backslash at end of '{}'", full)),
                    },
                    '(' => {
                        depth += 1;
                        current.push(c);
                    }
                    ')' if depth > 0 => {
                        depth -= 1;
                        current.push(c);
                    }
                    ')' => {
                        closed = true;
                        args.push(std::mem::take(&mut current));
                        break;
                    }
                    ',' if depth == 0 => args.push(std::mem::take(&mut current)),
                    _ => current.push(c),
                }
            }
            if !closed {
                return Err(format!("Missing ')' after arguments in '{}'", full));
            }
            let trailing: String = chars.collect();
            if !trailing.trim().is_empty() {
                return Err(format!("Garbage after ')' in '{}': '{}'", full, trailing));
            }
            if args.len() == 1 && args[0].is_empty() {
                args.clear();
            }
        }
        if args.len() > MAX_PARAMETERS {
            return Err(format!(
                "Too many arguments in '{}' ({} given, at most {})",
                full,
                args.len(),
                MAX_PARAMETERS
            ));
        }
        Ok(ProtocolRequest {
            full: full.to_string(),
            name: name.to_ascii_lowercase(),
            args,
        })
    }
}

/// Is `token` a word that may start a statement (`name`, `@handler`)?
pub(crate) fn is_statement_word(token: &Token) -> bool {
    token.kind == TokenKind::Word
        && token
            .text
            .bytes()
            .next()
            .map_or(false, |c| c == b'@' || c.is_ascii_alphabetic())
}
