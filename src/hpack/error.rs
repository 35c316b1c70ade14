//! HPACK error types
//!
//! Every fault a header block can exhibit collapses to one of these
//! variants; the HTTP/2 layer maps any of them to a COMPRESSION_ERROR
//! connection error.

/// HPACK decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Input ended in the middle of an instruction
    #[error("truncated header block")]
    Truncated,

    /// Integer representation exceeds 64 bits
    #[error("integer representation overflows 64 bits")]
    IntegerOverflow,

    /// Index does not resolve to a static or dynamic table entry
    #[error("index {0} out of table range")]
    IndexOutOfRange(u64),

    /// Huffman-coded string contains a code outside the table
    #[error("invalid huffman code")]
    InvalidHuffmanCode,

    /// Huffman padding is not a run of 1-bits shorter than 8
    #[error("invalid huffman padding")]
    InvalidPadding,

    /// Dynamic-table-size update above the protocol-imposed cap
    #[error("table size update {requested} exceeds allowed maximum {allowed}")]
    TableSizeExceeded { requested: usize, allowed: usize },

    /// Header name or value is not valid UTF-8
    #[error("header text is not valid UTF-8")]
    InvalidString,
}

/// Result type for HPACK operations
pub type Result<T> = std::result::Result<T, Error>;
