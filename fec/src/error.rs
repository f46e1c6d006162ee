use thiserror::Error;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FecError {
    #[error("invalid Reed-Solomon parameters n={n}, k={k}: requires 0 < k <= n <= 255")]
    InvalidParameters { n: usize, k: usize },

    #[error("decoding requires exactly {expected} blocks, got {actual}")]
    InsufficientBlocks { expected: usize, actual: usize },

    #[error("block index {index} is outside the coding group of {n} blocks")]
    IndexOutOfRange { index: usize, n: usize },

    #[error("block index {0} is present more than once")]
    DuplicateIndex(usize),

    #[error("all blocks of a coding group must have the same size: expected {expected}, got {actual}")]
    BlockSizeMismatch { expected: usize, actual: usize },

    #[error("division by zero in GF(256)")]
    DivisionByZero,

    #[error("matrix is singular")]
    SingularMatrix,
}

pub type FecResult<T> = Result<T, FecError>;
