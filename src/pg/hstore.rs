//! PostgreSQL `hstore` text values.
//!
//! Format: `"key"=>"value", other=>NULL`. Keys are never NULL; an unquoted
//! `NULL` value (any case) is.

use std::iter::Peekable;
use std::str::CharIndices;

use super::error::{ParseError, ParseResult};

/// One hstore pair.
pub type Entry = (String, Option<String>);

/// Parse a whole hstore value into its pairs, in input order.
pub fn parse(input: &str) -> ParseResult<Vec<Entry>> {
    HstoreIter::new(input).collect()
}

/// Lazily yields the pairs of an hstore value.
///
/// Stops after the first error.
pub struct HstoreIter<'a> {
    chars: Peekable<CharIndices<'a>>,
    separated: bool,
    done: bool,
}

impl<'a> HstoreIter<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
            separated: false,
            done: false,
        }
    }

    fn advance(&mut self) -> ParseResult<Option<Entry>> {
        self.skip_whitespace();
        let separated = std::mem::take(&mut self.separated);
        let key = match self.chars.peek() {
            None if separated => {
                return Err(ParseError::UnexpectedEnd {
                    expected: "key after ','",
                })
            }
            None => return Ok(None),
            Some(&(_, '"')) => self.quoted()?,
            Some(_) => self.word('=')?,
        };

        self.skip_whitespace();
        self.expect('=')?;
        self.expect('>')?;
        self.skip_whitespace();

        let value = match self.chars.peek() {
            None => return Err(ParseError::UnexpectedEnd { expected: "value" }),
            Some(&(_, '"')) => Some(self.quoted()?),
            Some(_) => {
                let word = self.word(',')?;
                if word.eq_ignore_ascii_case("NULL") {
                    None
                } else {
                    Some(word)
                }
            }
        };

        self.skip_whitespace();
        match self.chars.next() {
            None => Ok(Some((key, value))),
            Some((_, ',')) => {
                self.separated = true;
                Ok(Some((key, value)))
            }
            Some((position, found)) => Err(ParseError::UnexpectedChar {
                position,
                found,
                expected: "',' after value",
            }),
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn expect(&mut self, wanted: char) -> ParseResult<()> {
        match self.chars.next() {
            Some((_, c)) if c == wanted => Ok(()),
            Some((position, found)) => Err(ParseError::UnexpectedChar {
                position,
                found,
                expected: "'=>' key-value separator",
            }),
            None => Err(ParseError::UnexpectedEnd {
                expected: "'=>' key-value separator",
            }),
        }
    }

    fn quoted(&mut self) -> ParseResult<String> {
        let start = match self.chars.next() {
            Some((position, '"')) => position,
            _ => return Err(ParseError::UnexpectedEnd { expected: "quote" }),
        };
        let mut text = String::new();
        loop {
            match self.chars.next() {
                Some((_, '"')) => {
                    if matches!(self.chars.peek(), Some((_, '"'))) {
                        self.chars.next();
                        text.push('"');
                    } else {
                        return Ok(text);
                    }
                }
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, c)) => text.push(c),
                    None => return Err(ParseError::UnterminatedQuote { position: start }),
                },
                Some((_, c)) => text.push(c),
                None => return Err(ParseError::UnterminatedQuote { position: start }),
            }
        }
    }

    fn word(&mut self, stop: char) -> ParseResult<String> {
        let mut text = String::new();
        while let Some(&(position, c)) = self.chars.peek() {
            if c == '"' {
                return Err(ParseError::UnexpectedChar {
                    position,
                    found: c,
                    expected: "unquoted word without quotes",
                });
            }
            if c.is_whitespace() || c == stop {
                break;
            }
            text.push(c);
            self.chars.next();
        }
        if text.is_empty() {
            return match self.chars.peek() {
                Some(&(position, found)) => Err(ParseError::UnexpectedChar {
                    position,
                    found,
                    expected: "key or value",
                }),
                None => Err(ParseError::UnexpectedEnd {
                    expected: "key or value",
                }),
            };
        }
        Ok(text)
    }
}

impl Iterator for HstoreIter<'_> {
    type Item = ParseResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(k: &str, v: Option<&str>) -> Entry {
        (k.to_string(), v.map(str::to_string))
    }

    #[test]
    fn test_quoted_pairs() {
        let parsed = parse(r#""a"=>"1", "b"=>"two words""#).unwrap();
        assert_eq!(parsed, vec![entry("a", Some("1")), entry("b", Some("two words"))]);
    }

    #[test]
    fn test_unquoted_and_null() {
        let parsed = parse("a=>1,b=>NULL, c => null").unwrap();
        assert_eq!(
            parsed,
            vec![entry("a", Some("1")), entry("b", None), entry("c", None)]
        );
    }

    #[test]
    fn test_quoted_null_is_text() {
        assert_eq!(parse(r#"k=>"NULL""#).unwrap(), vec![entry("k", Some("NULL"))]);
    }

    #[test]
    fn test_escapes() {
        let parsed = parse(r#""q\"k"=>"a""b", "s"=>"back\\slash""#).unwrap();
        assert_eq!(
            parsed,
            vec![entry("q\"k", Some("a\"b")), entry("s", Some("back\\slash"))]
        );
    }

    #[test]
    fn test_empty() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("   ").unwrap().is_empty());
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            parse("a=1"),
            Err(ParseError::UnexpectedChar { found: '1', .. })
        ));
        assert!(matches!(
            parse(r#""a=>1"#),
            Err(ParseError::UnterminatedQuote { position: 0 })
        ));
        assert!(matches!(
            parse("a=>1 b=>2"),
            Err(ParseError::UnexpectedChar { found: 'b', .. })
        ));
        assert!(matches!(parse("a=>"), Err(ParseError::UnexpectedEnd { .. })));
    }

    #[test]
    fn test_trailing_comma_is_rejected() {
        assert!(matches!(parse("a=>1,"), Err(ParseError::UnexpectedEnd { .. })));
        assert!(matches!(parse("a=>1,  "), Err(ParseError::UnexpectedEnd { .. })));

        let mut iter = HstoreIter::new("a=>1, ");
        assert_eq!(iter.next(), Some(Ok(entry("a", Some("1")))));
        assert!(matches!(iter.next(), Some(Err(ParseError::UnexpectedEnd { .. }))));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_iterator_stops_after_error() {
        let mut iter = HstoreIter::new("a=>1, =>2, c=>3");
        assert_eq!(iter.next(), Some(Ok(entry("a", Some("1")))));
        assert!(matches!(iter.next(), Some(Err(_))));
        assert_eq!(iter.next(), None);
    }
}
