//! PostgreSQL composite-row and array text literals.
//!
//! Splits `(e1,e2,...)` and `{e1,e2,...}` into element strings without
//! interpreting them. Nested rows and arrays are returned verbatim and get
//! split again when the coercion engine descends into them.
//!
//! Reference: https://www.postgresql.org/docs/current/rowtypes.html#ROWTYPES-IO-SYNTAX

use super::error::{ParseError, ParseResult};

/// Parsed elements in input order. `None` marks a NULL element.
pub type Elements = Vec<Option<String>>;

/// Initial capacity of the per-element buffer.
pub const DEFAULT_ELEMENT_CAPACITY: usize = 128;

/// Which of the two literal grammars to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiteralKind {
    /// `(a,b,c)`: empty positions are NULL, whitespace is significant.
    Composite,
    /// `{a,b,c}`: unquoted `NULL` is NULL, whitespace around elements is ignored.
    Array,
}

impl LiteralKind {
    /// Opening delimiter.
    #[inline]
    pub fn open(self) -> char {
        match self {
            LiteralKind::Composite => '(',
            LiteralKind::Array => '{',
        }
    }

    /// Closing delimiter.
    #[inline]
    pub fn close(self) -> char {
        match self {
            LiteralKind::Composite => ')',
            LiteralKind::Array => '}',
        }
    }

    /// Guess the grammar from the first character of `input`.
    pub fn detect(input: &str) -> Option<Self> {
        match input.chars().next()? {
            '(' => Some(LiteralKind::Composite),
            '{' | '[' => Some(LiteralKind::Array),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingElement,
    Quoted,
    AfterQuote,
    Unquoted,
}

/// Split a composite literal `(…)`.
pub fn parse_composite(input: &str) -> ParseResult<Elements> {
    LiteralParser::new(LiteralKind::Composite).parse(input)
}

/// Split an array literal `{…}`.
pub fn parse_array(input: &str) -> ParseResult<Elements> {
    LiteralParser::new(LiteralKind::Array).parse(input)
}

/// Split either literal form, chosen by the opening character.
pub fn parse(input: &str) -> ParseResult<Elements> {
    match LiteralKind::detect(input) {
        Some(kind) => LiteralParser::new(kind).parse(input),
        None => Err(ParseError::MissingDelimiter {
            expected: LiteralKind::Composite.open(),
            input: input.to_string(),
        }),
    }
}

/// Single-pass splitter for one literal grammar.
///
/// The parser holds no state between calls: the same input always yields
/// the same elements.
#[derive(Debug, Clone, Copy)]
pub struct LiteralParser {
    kind: LiteralKind,
    capacity: usize,
}

impl LiteralParser {
    pub fn new(kind: LiteralKind) -> Self {
        Self {
            kind,
            capacity: DEFAULT_ELEMENT_CAPACITY,
        }
    }

    /// Set the initial capacity of each element buffer.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn kind(&self) -> LiteralKind {
        self.kind
    }

    /// Split `input` into its elements.
    pub fn parse(&self, input: &str) -> ParseResult<Elements> {
        let (body, offset) = self.body(input)?;
        self.split(body, offset)
    }

    /// Strip the delimiters (and an array's `[lo:hi]=` dimension prefix).
    fn body<'a>(&self, input: &'a str) -> ParseResult<(&'a str, usize)> {
        let mut start = 0;
        if self.kind == LiteralKind::Array && input.starts_with('[') {
            if let Some(eq) = input.find('=') {
                start = eq + 1;
            }
        }
        let literal = &input[start..];

        if !literal.starts_with(self.kind.open()) {
            return Err(ParseError::MissingDelimiter {
                expected: self.kind.open(),
                input: input.to_string(),
            });
        }
        if literal.len() < 2 || !literal.ends_with(self.kind.close()) {
            return Err(ParseError::MissingDelimiter {
                expected: self.kind.close(),
                input: input.to_string(),
            });
        }

        Ok((&literal[1..literal.len() - 1], start + 1))
    }

    fn split(&self, body: &str, offset: usize) -> ParseResult<Elements> {
        let mut elements = Elements::new();
        if body.is_empty() {
            return Ok(elements);
        }

        let array = self.kind == LiteralKind::Array;
        let mut state = State::AwaitingElement;
        let mut element = String::with_capacity(self.capacity);
        let mut quote_start = 0;
        let mut separated = false;
        // Unquoted element bookkeeping
        let mut escaped = false;
        let mut nested = false;
        let mut depth = 0usize;
        let mut nested_quote = false;

        let mut chars = body.char_indices().peekable();
        let mut pending: Option<(usize, char)> = None;

        while let Some((i, ch)) = pending.take().or_else(|| chars.next()) {
            let position = offset + i;
            match state {
                State::AwaitingElement => match ch {
                    ',' => {
                        elements.push(None);
                        separated = true;
                    }
                    '"' => {
                        state = State::Quoted;
                        quote_start = position;
                    }
                    c if array && c.is_whitespace() => {}
                    _ => {
                        // Brackets inside plain text are not quoted by the server.
                        nested = match self.kind {
                            LiteralKind::Array => ch == '{',
                            LiteralKind::Composite => ch == '(' || ch == '{',
                        };
                        state = State::Unquoted;
                        pending = Some((i, ch));
                    }
                },

                State::Quoted => match ch {
                    '"' => {
                        if matches!(chars.peek(), Some((_, '"'))) {
                            chars.next();
                            element.push('"');
                        } else {
                            state = State::AfterQuote;
                        }
                    }
                    '\\' => match chars.next() {
                        Some((_, c @ ('\\' | '"'))) => element.push(c),
                        Some((_, found)) => {
                            return Err(ParseError::InvalidEscape { position, found });
                        }
                        None => {
                            return Err(ParseError::UnterminatedQuote {
                                position: quote_start,
                            });
                        }
                    },
                    _ => element.push(ch),
                },

                State::AfterQuote => match ch {
                    ',' => {
                        elements.push(Some(self.take(&mut element)));
                        state = State::AwaitingElement;
                        separated = true;
                    }
                    c if array && c.is_whitespace() => {}
                    _ => {
                        return Err(ParseError::UnexpectedChar {
                            position,
                            found: ch,
                            expected: "',' or closing delimiter after quoted element",
                        });
                    }
                },

                State::Unquoted => {
                    if depth == 0 {
                        match ch {
                            ',' => {
                                elements.push(self.finish_unquoted(&mut element, escaped));
                                escaped = false;
                                nested = false;
                                state = State::AwaitingElement;
                                separated = true;
                                continue;
                            }
                            '\\' => {
                                match chars.next() {
                                    Some((_, c)) => element.push(c),
                                    None => {
                                        return Err(ParseError::UnexpectedEnd {
                                            expected: "escaped character",
                                        });
                                    }
                                }
                                escaped = true;
                                continue;
                            }
                            _ => {}
                        }
                    }

                    // Nested row/array text is kept verbatim, quotes and all.
                    if nested_quote {
                        match ch {
                            '"' => nested_quote = false,
                            '\\' => {
                                element.push(ch);
                                if let Some((_, c)) = chars.next() {
                                    element.push(c);
                                }
                                continue;
                            }
                            _ => {}
                        }
                    } else if nested {
                        match ch {
                            '{' => depth += 1,
                            '(' if !array => depth += 1,
                            '}' => depth = depth.saturating_sub(1),
                            ')' if !array => depth = depth.saturating_sub(1),
                            '"' if depth > 0 => nested_quote = true,
                            _ => {}
                        }
                    }
                    element.push(ch);
                }
            }
        }

        match state {
            State::AwaitingElement => {
                // A trailing separator leaves one more (empty) position.
                if separated {
                    elements.push(None);
                }
            }
            State::Quoted => {
                return Err(ParseError::UnterminatedQuote {
                    position: quote_start,
                });
            }
            State::AfterQuote => elements.push(Some(element)),
            State::Unquoted => {
                if depth > 0 || nested_quote {
                    return Err(ParseError::UnexpectedEnd {
                        expected: "closing bracket of nested value",
                    });
                }
                elements.push(self.finish_unquoted(&mut element, escaped));
            }
        }

        Ok(elements)
    }

    #[inline]
    fn take(&self, element: &mut String) -> String {
        std::mem::replace(element, String::with_capacity(self.capacity))
    }

    fn finish_unquoted(&self, element: &mut String, escaped: bool) -> Option<String> {
        let mut value = self.take(element);
        if self.kind == LiteralKind::Array {
            let len = value.trim_end().len();
            value.truncate(len);
        }
        if value.is_empty() {
            return None;
        }
        if self.kind == LiteralKind::Array && !escaped && value.eq_ignore_ascii_case("NULL") {
            return None;
        }
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_kind() {
        assert_eq!(LiteralKind::detect("(1)"), Some(LiteralKind::Composite));
        assert_eq!(LiteralKind::detect("{1}"), Some(LiteralKind::Array));
        assert_eq!(LiteralKind::detect("[0:1]={1,2}"), Some(LiteralKind::Array));
        assert_eq!(LiteralKind::detect("abc"), None);
        assert_eq!(LiteralKind::detect(""), None);
    }

    #[test]
    fn test_parse_dispatches_on_delimiter() {
        assert_eq!(
            parse("(a,b)").unwrap(),
            vec![Some("a".to_string()), Some("b".to_string())]
        );
        assert_eq!(parse("{NULL}").unwrap(), vec![None]);
        assert!(matches!(
            parse("abc"),
            Err(ParseError::MissingDelimiter { expected: '(', .. })
        ));
    }

    #[test]
    fn test_small_capacity_does_not_truncate() {
        let parser = LiteralParser::new(LiteralKind::Composite).with_capacity(1);
        assert_eq!(
            parser.parse("(\"a long quoted value\",x)").unwrap(),
            vec![Some("a long quoted value".to_string()), Some("x".to_string())]
        );
    }
}
