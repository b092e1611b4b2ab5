//! PostgreSQL value representations and text formats.
//!
//! Architecture:
//! - `types`: type OIDs, raw values and database array/composite handles
//! - `literal`: composite-row and array literal splitting
//! - `hstore`: hstore literal parsing
//! - `error`: literal parse errors

pub mod error;
pub mod hstore;
pub mod literal;
pub mod types;


pub use error::{ParseError, ParseResult};
pub use literal::{parse, parse_array, parse_composite, Elements, LiteralKind, LiteralParser};
pub use types::{ArrayHandle, CompositeHandle, Oid, RawValue};
