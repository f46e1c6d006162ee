//! Forward error correction for packetized transports: a systematic Reed-Solomon erasure code
//!  over GF(2^8).
//!
//! A *coding group* consists of `n` blocks of identical size: the `k` source blocks themselves
//!  (the code is systematic) followed by `n - k` parity blocks. Any `k` of the `n` blocks are
//!  sufficient to reconstruct all source blocks, regardless of which blocks were lost.
//!
//! ## Field
//!
//! Arithmetic is done in GF(2^8) with the primitive polynomial `x^8 + x^4 + x^3 + x^2 + 1`
//!  (0x11d) and generator element `α = 2`. Addition is XOR, multiplication and division go
//!  through log / antilog tables that are generated at compile time and are immutable, so
//!  they can be read concurrently without synchronization.
//!
//! ## Generator matrix
//!
//! The `n x k` generator matrix is derived from the Vandermonde matrix `V` with
//!  `V[i][j] = (α^i)^j`, i.e. the `n` distinct non-zero evaluation points `α^0 .. α^(n-1)`:
//!
//! ```ascii
//!  GM = V * inverse(V[0..k])
//! ```
//!
//! This makes the top `k x k` part of `GM` the identity matrix, while every selection of `k`
//!  rows of `GM` remains invertible. Peers that use the same `(n, k)` construct bit-identical
//!  matrices, which is what makes parity interoperable.
//!
//! ## Parity layouts
//!
//! * *inline* - the `k` surviving blocks can be any of the `n` codeword positions, see
//!   [reed_solomon::ReedSolomon::decode]
//! * *appended* - slot `i` holds either source block `i` or a parity block standing in for it,
//!   see [reed_solomon::ReedSolomon::decode_parity_appended]. If no parity is involved,
//!   decoding is a no-op and skips matrix inversion entirely.

pub mod error;
pub mod galois;
pub mod matrix;
pub mod reed_solomon;
