//! Variable and parameter substitution.

use crate::ast::{name_matches, Binding, Protocol};
use crate::error::ProtocolError;
use crate::token::{Token, TokenKind, Tokenizer};

impl Protocol {
    /// Look up a binding by name and mark it used.
    pub fn get_variable(&mut self, name: &str) -> Option<&Binding> {
        let binding = self.bindings[1..].iter_mut().find(|b| name_matches(&b.name, name))?;
        binding.used = true;
        Some(binding)
    }

    /// Tokens that replace the variable or parameter reference `reference`.
    ///
    /// Unquoted parameters are tokenized like source text; quoted references
    /// become one quoted string holding the literal text, with `"` escaped so
    /// the surrounding string stays well formed.
    pub fn replace_variable(&mut self, reference: &Token) -> Result<Vec<Token>, ProtocolError> {
        let quoted = matches!(reference.kind, TokenKind::Variable { quoted: true });
        let line = reference.line;
        log::trace!("replaceVariable {}", reference);

        if let Some(index) = reference.parameter_index() {
            let value = match self.parameter(index) {
                Some(v) => v.to_string(),
                None => {
                    return Err(ProtocolError::undefined(
                        self.location(line),
                        format!("Missing value for parameter ${}", index),
                    ))
                }
            };
            if !quoted {
                return Tokenizer::for_text(&value, &self.filename, line).tokenize_value();
            }
            return Ok(vec![Token::new(TokenKind::Quoted(b'"'), escape_quotes(&value), line)]);
        }

        let filename = self.filename.clone();
        let binding = match self.get_variable(&reference.text) {
            Some(b) => b,
            None => {
                return Err(ProtocolError::undefined(
                    crate::error::Location::new(filename, line),
                    format!("Undefined variable '{}' referenced", reference.text),
                ))
            }
        };
        if !quoted {
            return Ok(binding.value.clone());
        }
        Ok(quote_tokens(&binding.value, binding.line))
    }
}

/// Put a backslash in front of every `"` that is not already escaped.
pub fn escape_quotes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut escaped = false;
    for c in text.chars() {
        if c == '"' && !escaped {
            out.push('\\');
        }
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        }
        out.push(c);
    }
    out
}

/// Turn a binding value into double-quoted strings with the same literal text.
/// Positional references inside the value stay references, now quoted.
fn quote_tokens(value: &[Token], line: u32) -> Vec<Token> {
    let mut out = Vec::new();
    let mut text = String::new();
    for token in value {
        match token.kind {
            TokenKind::Quoted(_) => text.push_str(&escape_quotes(&token.text)),
            TokenKind::Variable { .. } => {
                out.push(Token::new(TokenKind::Quoted(b'"'), std::mem::take(&mut text), line));
                out.push(Token::new(TokenKind::Variable { quoted: true }, token.text.clone(), token.line));
            }
            TokenKind::Word | TokenKind::Special(_) => {
                for c in token.text.chars() {
                    if c == '"' || c == '\\' {
                        text.push('\\');
                    }
                    text.push(c);
                }
            }
            TokenKind::CommandEnd | TokenKind::Eof => {}
        }
    }
    out.push(Token::new(TokenKind::Quoted(b'"'), text, line));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_quotes_keeps_existing_escapes() {
        assert_eq!(escape_quotes(r#"a"b"#), r#"a\"b"#);
        assert_eq!(escape_quotes(r#"a\"b"#), r#"a\"b"#);
        assert_eq!(escape_quotes(r#"a\\"b"#), r#"a\\\"b"#);
    }

    #[test]
    fn quoted_value_becomes_single_string() {
        let value = vec![
            Token::new(TokenKind::Quoted(b'\''), "say \"hi\"", 3),
            Token::special(b' ', 3),
            Token::new(TokenKind::Word, "cr", 3),
        ];
        let out = quote_tokens(&value, 3);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, TokenKind::Quoted(b'"'));
        assert_eq!(out[0].text, r#"say \"hi\" cr"#);
    }
}
