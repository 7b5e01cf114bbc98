//! Character source for the protocol parser.
//!
//! [`Reader::read_char`] folds every run of blanks and `#` comments into a
//! single space and counts newlines; [`Reader::getc`] hands out raw bytes
//! (quoted strings need them untouched). Both share one push-back stack.

pub struct Reader {
    input: Vec<u8>,
    pos: usize,
    pushback: Vec<u8>,
    line: u32,
}

impl Reader {
    pub fn new(input: impl Into<Vec<u8>>) -> Self {
        Self::starting_at(input, 1)
    }

    /// Reader whose first byte is on line `line` (re-tokenizing substituted text).
    pub fn starting_at(input: impl Into<Vec<u8>>, line: u32) -> Self {
        Reader {
            input: input.into(),
            pos: 0,
            pushback: Vec::new(),
            line,
        }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    /// Next raw byte, no folding, no line counting. `None` at end of input.
    pub fn getc(&mut self) -> Option<u8> {
        if let Some(c) = self.pushback.pop() {
            return Some(c);
        }
        let c = self.input.get(self.pos).copied()?;
        self.pos += 1;
        Some(c)
    }

    pub fn ungetc(&mut self, c: u8) {
        self.pushback.push(c);
    }

    /// Next logical character: blanks and comments collapse to one `b' '`.
    pub fn read_char(&mut self) -> Option<u8> {
        let mut c = self.getc();
        if !matches!(c, Some(b) if b.is_ascii_whitespace() || b == b'#') {
            return c;
        }
        while let Some(b) = c {
            if b == b'#' {
                loop {
                    c = self.getc();
                    match c {
                        None | Some(b'\n') => break,
                        _ => {}
                    }
                }
            } else {
                c = Some(b);
            }
            if c == Some(b'\n') {
                self.line += 1;
            }
            c = self.getc();
            if !matches!(c, Some(b) if b.is_ascii_whitespace() || b == b'#') {
                break;
            }
        }
        if let Some(b) = c {
            self.ungetc(b);
        }
        Some(b' ')
    }
}
