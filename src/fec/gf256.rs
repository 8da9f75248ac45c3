//! Arithmetic in GF(2^8) with the polynomial x^8 + x^4 + x^3 + x^2 + 1

const POLY: u16 = 0x11d;

const fn build_tables() -> ([u8; 512], [u8; 256]) {
    let mut exp = [0u8; 512];
    let mut log = [0u8; 256];
    let mut x: u16 = 1;
    let mut i = 0;
    while i < 255 {
        exp[i] = x as u8;
        log[x as usize] = i as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= POLY;
        }
        i += 1;
    }
    // Doubled so mul can index log[a] + log[b] without a modulo
    let mut j = 255;
    while j < 512 {
        exp[j] = exp[j - 255];
        j += 1;
    }
    (exp, log)
}

const TABLES: ([u8; 512], [u8; 256]) = build_tables();
static EXP: [u8; 512] = TABLES.0;
static LOG: [u8; 256] = TABLES.1;

#[inline]
pub fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

#[inline]
pub fn mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    EXP[LOG[a as usize] as usize + LOG[b as usize] as usize]
}

/// Multiplicative inverse; `a` must be non-zero
#[inline]
pub fn inv(a: u8) -> u8 {
    debug_assert!(a != 0, "zero has no inverse");
    EXP[255 - LOG[a as usize] as usize]
}

#[inline]
pub fn div(a: u8, b: u8) -> u8 {
    if a == 0 {
        return 0;
    }
    EXP[LOG[a as usize] as usize + 255 - LOG[b as usize] as usize]
}

/// `dst += c * src`, element-wise
pub fn mul_acc(dst: &mut [u8], src: &[u8], c: u8) {
    match c {
        0 => {}
        1 => {
            for (d, s) in dst.iter_mut().zip(src) {
                *d ^= *s;
            }
        }
        _ => {
            let log_c = LOG[c as usize] as usize;
            for (d, s) in dst.iter_mut().zip(src) {
                if *s != 0 {
                    *d ^= EXP[log_c + LOG[*s as usize] as usize];
                }
            }
        }
    }
}

/// Invert a square matrix by Gauss-Jordan elimination.
/// Returns `None` if it is singular.
pub fn invert(matrix: &[Vec<u8>]) -> Option<Vec<Vec<u8>>> {
    let n = matrix.len();
    let mut work: Vec<Vec<u8>> = matrix.to_vec();
    let mut out: Vec<Vec<u8>> = (0..n)
        .map(|i| {
            let mut row = vec![0u8; n];
            row[i] = 1;
            row
        })
        .collect();

    for col in 0..n {
        let pivot = (col..n).find(|&row| work[row][col] != 0)?;
        work.swap(col, pivot);
        out.swap(col, pivot);

        let scale = inv(work[col][col]);
        for j in 0..n {
            work[col][j] = mul(work[col][j], scale);
            out[col][j] = mul(out[col][j], scale);
        }

        for row in 0..n {
            if row == col || work[row][col] == 0 {
                continue;
            }
            let factor = work[row][col];
            let (pivot_work, pivot_out) = (work[col].clone(), out[col].clone());
            mul_acc(&mut work[row], &pivot_work, factor);
            mul_acc(&mut out[row], &pivot_out, factor);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_identities() {
        for a in 1..=255u8 {
            assert_eq!(mul(a, inv(a)), 1, "a = {}", a);
            assert_eq!(div(a, a), 1);
            assert_eq!(mul(a, 1), a);
            assert_eq!(mul(a, 0), 0);
            assert_eq!(add(a, a), 0);
        }
    }

    #[test]
    fn test_mul_distributes() {
        for a in [3u8, 29, 77, 200] {
            for b in [1u8, 5, 128, 254] {
                for c in [2u8, 9, 99] {
                    assert_eq!(mul(a, add(b, c)), add(mul(a, b), mul(a, c)));
                }
            }
        }
    }

    #[test]
    fn test_invert_matrix() {
        let m = vec![vec![1u8, 2, 3], vec![4, 5, 6], vec![7, 8, 10]];
        let inverse = invert(&m).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let mut acc = 0u8;
                for k in 0..3 {
                    acc ^= mul(m[i][k], inverse[k][j]);
                }
                assert_eq!(acc, u8::from(i == j));
            }
        }
    }

    #[test]
    fn test_singular_matrix() {
        let m = vec![vec![1u8, 2], vec![1, 2]];
        assert!(invert(&m).is_none());
    }
}
