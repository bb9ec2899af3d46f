use std::fmt;

/// Errors surfaced synchronously by the public API.
///
/// Absence (an unmapped key, an out-of-range-but-never-written slot) is
/// never an error — it is `Option::None`. This enum covers only the
/// conditions a caller must actually react to.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A mutator received an argument it cannot act on: a key outside the
    /// enum's domain, or (on the resizable array) an index `>= size()`.
    #[error("bad argument: {0}")]
    BadArgument(BadArgument),

    /// The iterator has already yielded its last element.
    #[error("iterator exhausted")]
    IteratorExhausted,

    /// The operation is not implemented by this container variant.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

/// Why a `BadArgument` was raised, kept as a sub-enum so callers can match
/// on the specific cause without parsing the `Display` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadArgument {
    KeyOutsideDomain,
    IndexOutOfBounds { index: usize, len: usize },
}

impl fmt::Display for BadArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BadArgument::KeyOutsideDomain => write!(f, "key does not belong to this map's domain"),
            BadArgument::IndexOutOfBounds { index, len } => {
                write!(f, "index {} out of bounds for length {}", index, len)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
