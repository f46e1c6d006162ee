use tracing::{debug, trace};

use crate::error::{FecError, FecResult};
use crate::galois;
use crate::matrix::Matrix;

/// A systematic `(n, k)` Reed-Solomon erasure code.
///
/// The generator matrix is computed once on construction and is read-only afterwards, so a
///  single instance can be shared between threads (e.g. in an `Arc`). Encoding and decoding
///  operate on caller-provided blocks only.
#[derive(Debug)]
pub struct ReedSolomon {
    n: usize,
    k: usize,
    generator: Matrix,
}

impl ReedSolomon {
    pub const MAX_N: usize = 255;

    pub fn new(n: usize, k: usize) -> FecResult<ReedSolomon> {
        if k == 0 || k > n || n > Self::MAX_N {
            return Err(FecError::InvalidParameters { n, k });
        }

        let vandermonde = Matrix::vandermonde(n, k);
        let top = vandermonde.select_rows(&(0..k).collect::<Vec<_>>());
        let generator = vandermonde.multiply(&top.invert()?);

        debug!("initialized Reed-Solomon generator matrix for RS({}, {})", n, k);
        Ok(ReedSolomon { n, k, generator })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn parity_count(&self) -> usize {
        self.n - self.k
    }

    pub fn generator(&self) -> &Matrix {
        &self.generator
    }

    fn block_size<B: AsRef<[u8]>>(blocks: &[B]) -> FecResult<usize> {
        let expected = blocks.first()
            .map(|b| b.as_ref().len())
            .unwrap_or(0);
        for b in blocks {
            if b.as_ref().len() != expected {
                return Err(FecError::BlockSizeMismatch { expected, actual: b.as_ref().len() });
            }
        }
        Ok(expected)
    }

    fn check_source<B: AsRef<[u8]>>(&self, source: &[B]) -> FecResult<usize> {
        if source.len() != self.k {
            return Err(FecError::InsufficientBlocks { expected: self.k, actual: source.len() });
        }
        Self::block_size(source)
    }

    /// Calculate the parity block at codeword position `index` (`k <= index < n`) into `out`,
    ///  overwriting its previous contents.
    pub fn encode_parity<B: AsRef<[u8]>>(&self, source: &[B], index: usize, out: &mut [u8]) -> FecResult<()> {
        let block_size = self.check_source(source)?;
        if index < self.k || index >= self.n {
            return Err(FecError::IndexOutOfRange { index, n: self.n });
        }
        if out.len() != block_size {
            return Err(FecError::BlockSizeMismatch { expected: block_size, actual: out.len() });
        }

        out.fill(0);
        for (j, block) in source.iter().enumerate() {
            galois::mul_add_region(out, block.as_ref(), self.generator.get(index, j));
        }
        Ok(())
    }

    /// Calculate all `n - k` parity blocks for the `k` source blocks.
    pub fn encode<B: AsRef<[u8]>>(&self, source: &[B]) -> FecResult<Vec<Vec<u8>>> {
        let block_size = self.check_source(source)?;

        (self.k..self.n)
            .map(|index| {
                let mut parity = vec![0; block_size];
                self.encode_parity(source, index, &mut parity)?;
                Ok(parity)
            })
            .collect()
    }

    fn check_indices(&self, indices: &[usize]) -> FecResult<()> {
        let mut seen = [false; Self::MAX_N];
        for &index in indices {
            if index >= self.n {
                return Err(FecError::IndexOutOfRange { index, n: self.n });
            }
            if seen[index] {
                return Err(FecError::DuplicateIndex(index));
            }
            seen[index] = true;
        }
        Ok(())
    }

    /// the inverse of the generator matrix restricted to the surviving rows
    fn repair_matrix(&self, indices: &[usize]) -> FecResult<Matrix> {
        trace!("inverting repair matrix for codeword indices {:?}", indices);
        self.generator
            .select_rows(indices)
            .invert()
    }

    /// Reconstruct the `k` source blocks from any `k` surviving blocks of the coding group
    ///  (parity inline): `blocks[i]` is the block at codeword position `indices[i]`.
    ///
    /// All source blocks are returned in order, including those that were present already.
    pub fn decode<B: AsRef<[u8]>>(&self, blocks: &[B], indices: &[usize]) -> FecResult<Vec<Vec<u8>>> {
        if blocks.len() != self.k || indices.len() != self.k {
            return Err(FecError::InsufficientBlocks { expected: self.k, actual: blocks.len().min(indices.len()) });
        }
        let block_size = Self::block_size(blocks)?;
        self.check_indices(indices)?;

        let repair = self.repair_matrix(indices)?;

        let mut result = vec![vec![0u8; block_size]; self.k];
        for (i, recovered) in result.iter_mut().enumerate() {
            for (j, block) in blocks.iter().enumerate() {
                galois::mul_add_region(recovered, block.as_ref(), repair.get(i, j));
            }
        }
        Ok(result)
    }

    /// Reconstruct missing source blocks in place (parity appended): slot `i` of `blocks`
    ///  either holds source block `i` (`indices[i] == i`) or a parity block with codeword
    ///  position `indices[i] >= k` standing in for it.
    ///
    /// Returns the number of source blocks that were recovered. If all source blocks are
    ///  present, nothing is recovered and the repair matrix is never built.
    pub fn decode_parity_appended(&self, blocks: &mut [Vec<u8>], indices: &[usize]) -> FecResult<usize> {
        if blocks.len() != self.k || indices.len() != self.k {
            return Err(FecError::InsufficientBlocks { expected: self.k, actual: blocks.len().min(indices.len()) });
        }
        let block_size = Self::block_size(blocks)?;
        self.check_indices(indices)?;

        let missing = indices.iter()
            .enumerate()
            .filter(|(slot, index)| *slot != **index)
            .map(|(slot, &index)| {
                if index < self.k {
                    // a source block in the wrong slot
                    Err(FecError::IndexOutOfRange { index, n: self.n })
                }
                else {
                    Ok(slot)
                }
            })
            .collect::<FecResult<Vec<_>>>()?;

        if missing.is_empty() {
            return Ok(0);
        }

        let repair = self.repair_matrix(indices)?;

        let recovered = missing.iter()
            .map(|&slot| {
                let mut block = vec![0u8; block_size];
                for (j, source) in blocks.iter().enumerate() {
                    galois::mul_add_region(&mut block, source, repair.get(slot, j));
                }
                (slot, block)
            })
            .collect::<Vec<_>>();

        for (slot, block) in recovered {
            blocks[slot] = block;
        }

        Ok(missing.len())
    }
}
