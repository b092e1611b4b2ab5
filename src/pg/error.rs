//! Error types for the PostgreSQL text-encoding parsers.

use std::fmt;

/// Result type for literal and hstore parsing.
pub type ParseResult<T> = Result<T, ParseError>;

/// Errors raised while splitting a textual composite, array or hstore value.
///
/// Positions are byte offsets into the parsed input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The literal does not start or end with the expected delimiter.
    MissingDelimiter {
        expected: char,
        input: String,
    },

    /// A quoted element is never closed.
    UnterminatedQuote { position: usize },

    /// A backslash inside a quoted element escapes something other than `\` or `"`.
    InvalidEscape { position: usize, found: char },

    /// A character that the grammar does not allow at this point.
    UnexpectedChar {
        position: usize,
        found: char,
        expected: &'static str,
    },

    /// Input ended while the grammar still expected more.
    UnexpectedEnd { expected: &'static str },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingDelimiter { expected, input } => {
                write!(f, "expected '{}' delimiter in {:?}", expected, input)
            }
            ParseError::UnterminatedQuote { position } => {
                write!(f, "quote opened at position {} is not closed", position)
            }
            ParseError::InvalidEscape { position, found } => {
                write!(
                    f,
                    "invalid escape '\\{}' at position {} (only '\\\\' and '\\\"' are allowed)",
                    found, position
                )
            }
            ParseError::UnexpectedChar {
                position,
                found,
                expected,
            } => write!(
                f,
                "unexpected '{}' at position {}, expected {}",
                found, position, expected
            ),
            ParseError::UnexpectedEnd { expected } => {
                write!(f, "unexpected end of input, expected {}", expected)
            }
        }
    }
}

impl std::error::Error for ParseError {}
