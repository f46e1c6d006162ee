//! Table driven arithmetic in GF(2^8).
//!
//! Every non-zero element `a` has a unique discrete logarithm `log(a)` in `0..=254` with
//!  `α^log(a) == a`. Zero has no logarithm and is special-cased in all operations.

use crate::error::{FecError, FecResult};

/// x^8 + x^4 + x^3 + x^2 + 1
pub const PRIMITIVE_POLYNOMIAL: u16 = 0x11d;

/// number of non-zero field elements, i.e. the order of the multiplicative group
pub const FIELD_ORDER: usize = 255;

struct Tables {
    /// antilog table, doubled so that `exp[log(a) + log(b)]` needs no modulo
    exp: [u8; 512],
    log: [u8; 256],
}

impl Tables {
    const fn generate() -> Tables {
        let mut exp = [0u8; 512];
        let mut log = [0u8; 256];

        let mut x: u16 = 1;
        let mut i = 0;
        while i < FIELD_ORDER {
            exp[i] = x as u8;
            log[x as usize] = i as u8;

            x <<= 1;
            if x & 0x100 != 0 {
                x ^= PRIMITIVE_POLYNOMIAL;
            }
            i += 1;
        }
        while i < exp.len() {
            exp[i] = exp[i - FIELD_ORDER];
            i += 1;
        }

        Tables { exp, log }
    }
}

static TABLES: Tables = Tables::generate();

#[inline]
pub fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

#[inline]
pub fn mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    TABLES.exp[TABLES.log[a as usize] as usize + TABLES.log[b as usize] as usize]
}

#[inline]
pub fn div(a: u8, b: u8) -> FecResult<u8> {
    if b == 0 {
        return Err(FecError::DivisionByZero);
    }
    if a == 0 {
        return Ok(0);
    }
    Ok(TABLES.exp[TABLES.log[a as usize] as usize + FIELD_ORDER - TABLES.log[b as usize] as usize])
}

/// multiplicative inverse
#[inline]
pub fn inv(a: u8) -> FecResult<u8> {
    div(1, a)
}

/// `a` raised to the power of `e`, with `pow(0, 0) == 1`
pub fn pow(a: u8, e: usize) -> u8 {
    if e == 0 {
        return 1;
    }
    if a == 0 {
        return 0;
    }
    TABLES.exp[(TABLES.log[a as usize] as usize * (e % FIELD_ORDER)) % FIELD_ORDER]
}

/// `α^e` for the field's generator element `α`
#[inline]
pub fn exp(e: usize) -> u8 {
    TABLES.exp[e % FIELD_ORDER]
}

/// Multiply-accumulate over a whole block: `dst[i] ^= c * src[i]`.
///
/// The products for `c` are looked up once per call, so the per-byte work is a single table
///  access regardless of the values involved.
pub fn mul_add_region(dst: &mut [u8], src: &[u8], c: u8) {
    debug_assert_eq!(dst.len(), src.len());

    match c {
        0 => {}
        1 => {
            for (d, s) in dst.iter_mut().zip(src) {
                *d ^= *s;
            }
        }
        _ => {
            let mut products = [0u8; 256];
            for (x, p) in products.iter_mut().enumerate() {
                *p = mul(c, x as u8);
            }
            for (d, s) in dst.iter_mut().zip(src) {
                *d ^= products[*s as usize];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_log_is_unique() {
        let mut seen = [false; 256];
        for a in 1..=255u8 {
            let l = TABLES.log[a as usize] as usize;
            assert!(l < FIELD_ORDER);
            assert!(!seen[l], "duplicate log {} for {}", l, a);
            seen[l] = true;
            assert_eq!(exp(l), a);
        }
    }

    #[test]
    fn test_div_inverts_mul() {
        for a in 1..=255u8 {
            for b in 1..=255u8 {
                assert_eq!(div(mul(a, b), b), Ok(a), "a={} b={}", a, b);
            }
        }
    }

    #[test]
    fn test_mul_by_zero() {
        for a in 0..=255u8 {
            assert_eq!(mul(a, 0), 0);
            assert_eq!(mul(0, a), 0);
        }
    }

    #[test]
    fn test_mul_identity_and_commutativity() {
        for a in 0..=255u8 {
            assert_eq!(mul(a, 1), a);
            for b in 0..=255u8 {
                assert_eq!(mul(a, b), mul(b, a));
            }
        }
    }

    #[test]
    fn test_div_by_zero() {
        assert_eq!(div(5, 0), Err(FecError::DivisionByZero));
        assert_eq!(div(0, 0), Err(FecError::DivisionByZero));
        assert_eq!(inv(0), Err(FecError::DivisionByZero));
    }

    #[test]
    fn test_pow_zero_exponent() {
        for a in 0..=255u8 {
            assert_eq!(pow(a, 0), 1);
        }
    }

    #[rstest]
    #[case::one(2, 1, 2)]
    #[case::two(2, 2, 4)]
    #[case::wrap(2, 8, 0x1d)]
    #[case::full_cycle(2, 255, 1)]
    #[case::beyond_cycle(3, 256, 3)]
    #[case::zero_base(0, 7, 0)]
    fn test_pow(#[case] a: u8, #[case] e: usize, #[case] expected: u8) {
        assert_eq!(pow(a, e), expected);
    }

    #[test]
    fn test_pow_matches_repeated_mul() {
        for a in 0..=255u8 {
            let mut acc = 1u8;
            for e in 0..300 {
                assert_eq!(pow(a, e), acc, "a={} e={}", a, e);
                acc = mul(acc, a);
            }
        }
    }

    #[test]
    fn test_inv() {
        for a in 1..=255u8 {
            assert_eq!(mul(a, inv(a).unwrap()), 1);
        }
    }

    #[rstest]
    #[case::zero(0)]
    #[case::one(1)]
    #[case::other(0x53)]
    fn test_mul_add_region(#[case] c: u8) {
        let src = (0..=255u8).collect::<Vec<_>>();
        let mut dst = vec![0x5a; src.len()];

        mul_add_region(&mut dst, &src, c);

        for (i, d) in dst.iter().enumerate() {
            assert_eq!(*d, 0x5a ^ mul(c, src[i]));
        }
    }
}
