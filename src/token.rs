//! Tokenizer for protocol files.
//!
//! A token is one of
//! - a quoted string in `"..."` or `'...'` (escapes kept verbatim),
//! - a variable reference `$1`, `$name` or `${name}`, tagged quoted when it
//!   sits inside a quoted string,
//! - one character from the caller's special set,
//! - a bare word, folded to lowercase,
//! - end of input.
//!
//! Every token remembers the line it started on. A quoted string that
//! contains a variable reference is split: the literal run before the
//! reference is returned as a complete string, the reference comes next and
//! the string resumes in the following call.

use crate::error::{Location, ProtocolError};
use crate::reader::Reader;
use std::fmt;

/// Specials inside a value.
pub const VALUE_SPECIALS: &[u8] = b" ,;{}=()$'\"+-*/";
/// Specials at statement level (operators may start command arguments).
pub const STATEMENT_SPECIALS: &[u8] = b" ,;{}=()$'\"";
/// Specials inside `${...}`.
pub const BRACED_SPECIALS: &[u8] = b"{}=;$";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    /// Quoted string; the payload is the delimiter (`"` or `'`).
    Quoted(u8),
    Variable { quoted: bool },
    Special(u8),
    /// Terminates one command inside a command body.
    CommandEnd,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: u32) -> Self {
        Token {
            kind,
            text: text.into(),
            line,
        }
    }

    pub fn special(c: u8, line: u32) -> Self {
        Token::new(TokenKind::Special(c), (c as char).to_string(), line)
    }

    pub fn is_special(&self, c: u8) -> bool {
        self.kind == TokenKind::Special(c)
    }

    /// Blanks and commas only separate values.
    pub fn is_separator(&self) -> bool {
        self.is_special(b' ') || self.is_special(b',')
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }

    /// Positional parameter reference `$0`..`$9`.
    pub fn parameter_index(&self) -> Option<usize> {
        match self.kind {
            TokenKind::Variable { .. } if self.text.len() == 1 => {
                self.text.as_bytes()[0].is_ascii_digit().then(|| (self.text.as_bytes()[0] - b'0') as usize)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Word | TokenKind::Special(_) => write!(f, "{}", self.text),
            TokenKind::Quoted(q) => write!(f, "{}{}{}", q as char, self.text, q as char),
            TokenKind::Variable { quoted: false } => write!(f, "${{{}}}", self.text),
            TokenKind::Variable { quoted: true } => write!(f, "\\${{{}}}", self.text),
            TokenKind::CommandEnd => write!(f, ";"),
            TokenKind::Eof => Ok(()),
        }
    }
}

/// Render a token sequence back into source-like text.
pub fn display_tokens(tokens: &[Token]) -> String {
    // words, strings and plain references would run together
    fn standalone(t: &Token) -> bool {
        matches!(
            t.kind,
            TokenKind::Word | TokenKind::Quoted(_) | TokenKind::Variable { quoted: false }
        )
    }
    let mut out = String::new();
    let mut prev: Option<&Token> = None;
    for t in tokens {
        match t.kind {
            TokenKind::CommandEnd => out.push_str("; "),
            _ => {
                if prev.map_or(false, standalone) && standalone(t) {
                    out.push(' ');
                }
                out.push_str(&t.to_string());
            }
        }
        prev = Some(t);
    }
    out.trim_end().to_string()
}

pub struct Tokenizer {
    reader: Reader,
    filename: String,
    /// Active quote delimiter while a string is split around a variable.
    quote: Option<u8>,
}

impl Tokenizer {
    pub fn new(source: impl Into<Vec<u8>>, filename: impl Into<String>) -> Self {
        Tokenizer {
            reader: Reader::new(source),
            filename: filename.into(),
            quote: None,
        }
    }

    /// Tokenizer over substituted text, reporting errors at `line`.
    pub fn for_text(text: &str, filename: &str, line: u32) -> Self {
        Tokenizer {
            reader: Reader::starting_at(text.as_bytes().to_vec(), line),
            filename: filename.to_string(),
            quote: None,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn line(&self) -> u32 {
        self.reader.line()
    }

    pub fn location(&self) -> Location {
        Location::new(self.filename.clone(), self.reader.line())
    }

    pub fn reader(&mut self) -> &mut Reader {
        &mut self.reader
    }

    fn error(&self, message: impl Into<String>) -> ProtocolError {
        ProtocolError::syntax(self.location(), message)
    }

    /// Read one token. With `eof_allowed` false, end of input is an error.
    pub fn read_token(&mut self, specials: &[u8], eof_allowed: bool) -> Result<Token, ProtocolError> {
        let line = self.reader.line();
        let c = match self.quote {
            Some(_) => self.reader.getc(),
            None => self.reader.read_char(),
        };

        match c {
            Some(b'$') if self.quote.is_none() || self.starts_reference() => self.read_variable(specials, line),
            Some(q) if self.quote.is_some() || q == b'"' || q == b'\'' => {
                let first = match self.quote {
                    Some(_) => Some(q),
                    None => {
                        self.quote = Some(q);
                        self.reader.getc()
                    }
                };
                self.read_quoted(first, line)
            }
            None if self.quote.is_some() => Err(self.error("Unterminated quoted string")),
            None => {
                if !eof_allowed {
                    return Err(self.error("Unexpected end of file (looking for '}')"));
                }
                Ok(Token::new(TokenKind::Eof, "", line))
            }
            Some(c) if specials.contains(&c) => {
                log::trace!("readToken: special '{}'", c as char);
                Ok(Token::special(c, line))
            }
            Some(c) => {
                let word = self.read_word(c, specials);
                log::trace!("readToken: word '{}'", word);
                Ok(Token::new(TokenKind::Word, word, line))
            }
        }
    }

    fn read_word(&mut self, first: u8, specials: &[u8]) -> String {
        let in_quote = self.quote.is_some();
        let mut word = vec![first.to_ascii_lowercase()];
        loop {
            let c = if in_quote {
                self.reader.getc()
            } else {
                self.reader.read_char()
            };
            match c {
                None => break,
                Some(c) if specials.contains(&c) || c.is_ascii_whitespace() || (in_quote && c == b'\\') => {
                    self.reader.ungetc(c);
                    break;
                }
                Some(c) => word.push(c.to_ascii_lowercase()),
            }
        }
        String::from_utf8_lossy(&word).into_owned()
    }

    fn read_variable(&mut self, specials: &[u8], line: u32) -> Result<Token, ProtocolError> {
        let quoted = self.quote.is_some();
        let kind = TokenKind::Variable { quoted };
        match self.reader.getc() {
            Some(d) if d.is_ascii_digit() => Ok(Token::new(kind, (d as char).to_string(), line)),
            Some(b'{') => {
                // no nested references inside braces
                if let Some(c) = self.reader.getc() {
                    if c == b'$' {
                        return Err(self.error("Expect variable name instead of '$' after '${'"));
                    }
                    self.reader.ungetc(c);
                }
                let saved = self.quote.take();
                let name = self.read_token(BRACED_SPECIALS, false)?;
                if name.kind != TokenKind::Word {
                    return Err(self.error(format!("Expect variable name instead of '{}' after '${{'", name.text)));
                }
                match self.reader.getc() {
                    Some(b'}') => {}
                    Some(c) => {
                        return Err(self.error(format!(
                            "Expect '}}' instead of '{}' after: ${{{}",
                            c as char, name.text
                        )))
                    }
                    None => return Err(self.error("Unexpected end of file after '$' (looking for '}')")),
                }
                self.quote = saved;
                Ok(Token::new(kind, name.text, line))
            }
            None => Err(self.error("Unexpected end of file after '$' (looking for '}')")),
            Some(c) if specials.contains(&c) || c.is_ascii_whitespace() => {
                Err(self.error(format!("Unexpected '{}' after '$'", c as char)))
            }
            Some(c) => {
                let name = self.read_word(c, specials);
                Ok(Token::new(kind, name, line))
            }
        }
    }

    /// Read the rest of a quoted string whose opening delimiter is already consumed.
    fn read_quoted(&mut self, mut c: Option<u8>, line: u32) -> Result<Token, ProtocolError> {
        let quote = match self.quote {
            Some(q) => q,
            None => return Err(self.error("INTERNAL ERROR: quoted string without delimiter")),
        };
        let mut text = Vec::new();
        loop {
            let b = match c {
                None | Some(b'\n') => {
                    return Err(self.error(format!(
                        "Unterminated quoted string: {}{}",
                        quote as char,
                        String::from_utf8_lossy(&text)
                    )))
                }
                Some(b) => b,
            };
            if b == quote {
                self.quote = None;
                break;
            }
            if b == b'\\' {
                match self.reader.getc() {
                    Some(b'$') => {
                        // the reference is the next token, the string resumes after it
                        self.reader.ungetc(b'$');
                        break;
                    }
                    None | Some(b'\n') => {
                        return Err(self.error(format!(
                            "Backslash at end of line: {}{}",
                            quote as char,
                            String::from_utf8_lossy(&text)
                        )))
                    }
                    Some(e) => {
                        text.push(b'\\');
                        text.push(e);
                    }
                }
            } else if b == b'$' && self.starts_reference() {
                self.reader.ungetc(b'$');
                break;
            } else {
                text.push(b);
            }
            c = self.reader.getc();
        }
        Ok(Token::new(
            TokenKind::Quoted(quote),
            String::from_utf8_lossy(&text).into_owned(),
            line,
        ))
    }

    /// After a bare `$` in a string: does a variable reference follow?
    fn starts_reference(&mut self) -> bool {
        match self.reader.getc() {
            Some(n) => {
                self.reader.ungetc(n);
                n.is_ascii_alphanumeric() || n == b'{' || n == b'_'
            }
            None => false,
        }
    }

    /// Read a value up to `;` (consumed) or `}` (left for the caller).
    /// With `lazy` false, named references are passed to `resolve` at once;
    /// positional parameters always stay unresolved.
    pub fn parse_value<F>(&mut self, lazy: bool, mut resolve: F) -> Result<Vec<Token>, ProtocolError>
    where
        F: FnMut(&Token) -> Result<Vec<Token>, ProtocolError>,
    {
        let mut value = Vec::new();
        loop {
            match self.reader.read_char() {
                Some(b' ') => continue,
                Some(c) => {
                    self.reader.ungetc(c);
                    break;
                }
                None => break,
            }
        }
        loop {
            let token = self.read_token(VALUE_SPECIALS, false)?;
            log::trace!("parseValue:{}: {}", token.line, token);
            match token.kind {
                TokenKind::Variable { .. } => {
                    if lazy || token.parameter_index().is_some() {
                        value.push(token);
                    } else {
                        value.extend(resolve(&token)?);
                    }
                }
                TokenKind::Special(c @ (b'{' | b'=')) => {
                    return Err(self.error(format!("Unexpected '{}' (missing ';' or '\"' ?)", c as char)));
                }
                TokenKind::Special(b';') => break,
                TokenKind::Special(b'}') => {
                    self.reader.ungetc(b'}');
                    break;
                }
                _ => value.push(token),
            }
        }
        while value.last().map_or(false, Token::is_separator) {
            value.pop();
        }
        Ok(value)
    }

    /// Tokenize a complete standalone value (parameter text), without terminator.
    pub fn tokenize_value(&mut self) -> Result<Vec<Token>, ProtocolError> {
        let mut value = Vec::new();
        loop {
            let token = self.read_token(VALUE_SPECIALS, true)?;
            if token.is_eof() {
                break;
            }
            value.push(token);
        }
        while value.first().map_or(false, Token::is_separator) {
            value.remove(0);
        }
        while value.last().map_or(false, Token::is_separator) {
            value.pop();
        }
        Ok(value)
    }
}
