//! Record framing: building and splitting delimited records.

use crate::error::ClientError;
use std::fmt::{Display, Write};
use std::str::FromStr;

pub const SECTION_SEP: char = '|';
pub const LIST_SEP: char = ';';
pub const FIELD_SEP: char = ',';
pub const PAIR_SEP: char = ':';

/// Builds one record: values joined by a single separator.
pub struct RecordWriter {
    sep: char,
    out: String,
    empty: bool,
}

impl RecordWriter {
    pub fn new(sep: char) -> Self {
        Self {
            sep,
            out: String::new(),
            empty: true,
        }
    }

    pub fn field(&mut self, value: impl Display) -> &mut Self {
        if !self.empty {
            self.out.push(self.sep);
        }
        // Writing into a String cannot fail.
        let _ = write!(self.out, "{}", value);
        self.empty = false;
        self
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// Cursor over the fields of one record, with typed accessors.
pub struct Fields<'a> {
    kind: &'static str,
    parts: Vec<&'a str>,
    pos: usize,
}

impl<'a> Fields<'a> {
    /// Splits `record` on `sep`; the field count must be exactly `expected`.
    pub fn split(
        record: &'a str,
        sep: char,
        expected: usize,
        kind: &'static str,
    ) -> Result<Self, ClientError> {
        let parts: Vec<&str> = record.split(sep).collect();
        if parts.len() != expected {
            return Err(ClientError::malformed(
                kind,
                format!("expected {} fields, got {}", expected, parts.len()),
            ));
        }
        Ok(Self {
            kind,
            parts,
            pos: 0,
        })
    }

    fn next_raw(&mut self) -> &'a str {
        // `split` guarantees the count, and decoders read each field once.
        let s = self.parts.get(self.pos).copied().unwrap_or("");
        self.pos += 1;
        s
    }

    pub fn text(&mut self) -> String {
        self.next_raw().to_string()
    }

    pub fn number<T: FromStr>(&mut self, name: &'static str) -> Result<T, ClientError> {
        let raw = self.next_raw();
        raw.parse()
            .map_err(|_| ClientError::malformed(self.kind, format!("invalid {}: {:?}", name, raw)))
    }

    /// Single-character code. Anything other than exactly one char yields `'\0'`,
    /// which no enum recognises.
    pub fn code(&mut self) -> char {
        let raw = self.next_raw();
        let mut chars = raw.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => c,
            _ => '\0',
        }
    }

    /// Raw text of the next field (used for nested sections).
    pub fn raw(&mut self) -> &'a str {
        self.next_raw()
    }
}

/// Splits a list section; an empty section is an empty list.
pub fn split_list(section: &str) -> impl Iterator<Item = &str> {
    section.split(LIST_SEP).filter(|s| !s.is_empty())
}
