//! Delimited text wire format: record framing and entity encode/decode.
//!
//! One entity per record. Separators, in nesting order:
//!
//! | separator | char | between |
//! |-----------|------|---------|
//! | section   | `\|` | top-level sections of a book or snapshot |
//! | list      | `;`  | orders in a list, portfolio entries |
//! | field     | `,`  | fields of an order or trade |
//! | pair      | `:`  | symbol and position of a portfolio entry |
//!
//! Text fields (symbols, ids) must not contain any separator.
//!
//! Enum codes are single characters. A code that is not exactly one known
//! character decodes to the enum's default variant rather than failing, so a
//! corrupted code is silently read as the default. Callers must not rely on
//! unknown codes round-tripping.

pub mod codec;
pub mod record;

pub use codec::{
    decode_book, decode_order, decode_snapshot, decode_trade, encode_book, encode_order,
    encode_snapshot, encode_trade,
};
pub use record::{Fields, RecordWriter, FIELD_SEP, LIST_SEP, PAIR_SEP, SECTION_SEP};
