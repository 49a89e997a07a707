//! Records buffered into buckets and their textual row encoding.
//!
//! Each record is written as a single line of comma-delimited fields. Fields that contain the
//! delimiter or a quote are wrapped in quotes (with embedded quotes doubled). Line breaks are never
//! permitted inside a field, so a bucket file can always be split on `\n` before decoding.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Field delimiter used by the row encoding.
pub const DELIMITER: char = ',';

/// Quote used to escape fields containing the delimiter.
const QUOTE: char = '"';

/// Errors that can occur when constructing or decoding a record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("hash value is empty")]
    EmptyHash,
    #[error("content id is empty")]
    EmptyContentId,
    #[error("field contains a line break: {0:?}")]
    LineBreak(String),
    #[error("unterminated quoted field")]
    UnterminatedQuote,
    #[error("unexpected character after quoted field at byte {0}")]
    TrailingCharacters(usize),
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
}

/// A value that can be stored as one row of a bucket file.
pub trait Row: Sized + Send + Sync + 'static {
    /// Returns the ordered fields of this row.
    fn to_fields(&self) -> Vec<String>;

    /// Reconstructs a row from its ordered fields.
    fn from_fields(fields: Vec<String>) -> Result<Self, Error>;

    /// Encodes this row as a single line (without the trailing newline).
    fn to_line(&self) -> String {
        encode(&self.to_fields())
    }

    /// Decodes a row from a single line (without the trailing newline).
    fn from_line(line: &str) -> Result<Self, Error> {
        Self::from_fields(decode(line)?)
    }
}

/// A content hash paired with the identifier of the content it was computed from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashRecord {
    hash: String,
    content_id: String,
}

impl HashRecord {
    /// Create a new [HashRecord].
    ///
    /// Empty values and values containing line breaks are rejected.
    pub fn new(hash: impl Into<String>, content_id: impl Into<String>) -> Result<Self, Error> {
        let hash = hash.into();
        let content_id = content_id.into();
        if hash.is_empty() {
            return Err(Error::EmptyHash);
        }
        if content_id.is_empty() {
            return Err(Error::EmptyContentId);
        }
        for field in [&hash, &content_id] {
            if field.contains(['\n', '\r']) {
                return Err(Error::LineBreak(field.clone()));
            }
        }
        Ok(Self { hash, content_id })
    }

    /// The hash value.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// The identifier of the hashed content.
    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    /// Consume the record, returning `(hash, content_id)`.
    pub fn into_parts(self) -> (String, String) {
        (self.hash, self.content_id)
    }
}

impl Row for HashRecord {
    fn to_fields(&self) -> Vec<String> {
        vec![self.hash.clone(), self.content_id.clone()]
    }

    fn from_fields(fields: Vec<String>) -> Result<Self, Error> {
        let found = fields.len();
        let mut fields = fields.into_iter();
        match (fields.next(), fields.next(), fields.next()) {
            (Some(hash), Some(content_id), None) => Self::new(hash, content_id),
            _ => Err(Error::FieldCount { expected: 2, found }),
        }
    }
}

/// Encode fields into a single delimited line.
pub fn encode<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            line.push(DELIMITER);
        }
        let field = field.as_ref();
        if field.contains([DELIMITER, QUOTE]) {
            line.push(QUOTE);
            for c in field.chars() {
                if c == QUOTE {
                    line.push(QUOTE);
                }
                line.push(c);
            }
            line.push(QUOTE);
        } else {
            line.push_str(field);
        }
    }
    line
}

/// Decode a single delimited line into its fields.
pub fn decode(line: &str) -> Result<Vec<String>, Error> {
    if line.contains(['\n', '\r']) {
        return Err(Error::LineBreak(line.to_string()));
    }

    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.char_indices().peekable();
    let mut quoted = false;
    let mut closed = false;
    while let Some((i, c)) = chars.next() {
        if quoted {
            if c != QUOTE {
                field.push(c);
                continue;
            }
            // A doubled quote is an escaped quote
            if matches!(chars.peek(), Some((_, QUOTE))) {
                chars.next();
                field.push(QUOTE);
            } else {
                quoted = false;
                closed = true;
            }
            continue;
        }
        match c {
            DELIMITER => {
                fields.push(std::mem::take(&mut field));
                closed = false;
            }
            _ if closed => return Err(Error::TrailingCharacters(i)),
            QUOTE if field.is_empty() => quoted = true,
            _ => field.push(c),
        }
    }
    if quoted {
        return Err(Error::UnterminatedQuote);
    }
    fields.push(field);
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_round_trip_plain() {
        let record = HashRecord::new("f8f8f0cee0f4a84f", "content-1").unwrap();
        let line = record.to_line();
        assert_eq!(line, "f8f8f0cee0f4a84f,content-1");
        assert_eq!(HashRecord::from_line(&line).unwrap(), record);
    }

    #[test]
    fn test_round_trip_delimiter_in_content_id() {
        let record = HashRecord::new("abc", "photos/2022,02,08.jpg").unwrap();
        let line = record.to_line();
        assert_eq!(line, "abc,\"photos/2022,02,08.jpg\"");
        assert_eq!(HashRecord::from_line(&line).unwrap(), record);
    }

    #[test]
    fn test_round_trip_quotes() {
        let record = HashRecord::new("abc", "say \"cheese\", please").unwrap();
        let line = record.to_line();
        assert_eq!(line, "abc,\"say \"\"cheese\"\", please\"");
        assert_eq!(HashRecord::from_line(&line).unwrap(), record);

        // Quotes without a delimiter are still escaped
        let record = HashRecord::new("abc", "\"").unwrap();
        assert_eq!(HashRecord::from_line(&record.to_line()).unwrap(), record);
    }

    #[test_case("", "id", Error::EmptyHash; "empty hash")]
    #[test_case("abc", "", Error::EmptyContentId; "empty content id")]
    #[test_case("abc", "a\nb", Error::LineBreak("a\nb".into()); "newline")]
    #[test_case("a\rb", "id", Error::LineBreak("a\rb".into()); "carriage return")]
    fn test_new_rejects(hash: &str, content_id: &str, expected: Error) {
        assert_eq!(HashRecord::new(hash, content_id).unwrap_err(), expected);
    }

    #[test_case("abc", Error::FieldCount { expected: 2, found: 1 }; "too few")]
    #[test_case("a,b,c", Error::FieldCount { expected: 2, found: 3 }; "too many")]
    #[test_case(",id", Error::EmptyHash; "empty hash field")]
    #[test_case("abc,\"id", Error::UnterminatedQuote; "unterminated")]
    #[test_case("abc,\"id\"x", Error::TrailingCharacters(8); "trailing")]
    fn test_from_line_rejects(line: &str, expected: Error) {
        assert_eq!(HashRecord::from_line(line).unwrap_err(), expected);
    }

    #[test]
    fn test_decode_empty_fields() {
        assert_eq!(decode("").unwrap(), vec![String::new()]);
        assert_eq!(decode(",,").unwrap(), vec![String::new(); 3]);
        assert_eq!(
            decode("\"\",x").unwrap(),
            vec![String::new(), "x".to_string()]
        );
    }

    #[test]
    fn test_quote_inside_unquoted_field() {
        // A quote that does not open the field is taken literally
        assert_eq!(
            decode("a\"b,c").unwrap(),
            vec!["a\"b".to_string(), "c".to_string()]
        );
    }
}
