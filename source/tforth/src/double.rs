//! Double cell arithmetic.
//!
//! Doubles are `(lo, hi)` pairs of unsigned cells. Everything here works on
//! cell and half-cell limbs, so results wrap exactly as two's complement at
//! twice the cell width regardless of what wider integers the target has.

use crate::{Cell, UCell};

/// A double cell, low cell first.
pub type Double = (UCell, UCell);

const HALF_BITS: u32 = UCell::BITS / 2;
const HALF_MASK: UCell = (1 << HALF_BITS) - 1;

#[inline]
pub fn from_cell(n: Cell) -> Double {
    (n as UCell, if n < 0 { UCell::MAX } else { 0 })
}

#[inline]
pub fn is_negative(d: Double) -> bool {
    (d.1 as Cell) < 0
}

pub fn d_add(a: Double, b: Double) -> Double {
    let lo = a.0.wrapping_add(b.0);
    let carry = (lo < a.0) as UCell;
    (lo, a.1.wrapping_add(b.1).wrapping_add(carry))
}

pub fn d_sub(a: Double, b: Double) -> Double {
    let borrow = (a.0 < b.0) as UCell;
    (a.0.wrapping_sub(b.0), a.1.wrapping_sub(b.1).wrapping_sub(borrow))
}

pub fn d_negate(d: Double) -> Double {
    d_add((!d.0, !d.1), (1, 0))
}

pub fn d_abs(d: Double) -> Double {
    if is_negative(d) {
        d_negate(d)
    } else {
        d
    }
}

pub fn d_less(a: Double, b: Double) -> bool {
    if a.1 == b.1 {
        a.0 < b.0
    } else {
        (a.1 as Cell) < (b.1 as Cell)
    }
}

/// Unsigned cell by cell multiply with a double result.
pub fn um_star(a: UCell, b: UCell) -> Double {
    let (al, ah) = (a & HALF_MASK, a >> HALF_BITS);
    let (bl, bh) = (b & HALF_MASK, b >> HALF_BITS);

    let p0 = al * bl;
    let p1 = al * bh;
    let p2 = ah * bl;
    let p3 = ah * bh;

    // sum of the three middle half-limbs, fits comfortably in a cell
    let mid = (p0 >> HALF_BITS) + (p1 & HALF_MASK) + (p2 & HALF_MASK);
    let lo = (p0 & HALF_MASK) | (mid << HALF_BITS);
    let hi = p3 + (p1 >> HALF_BITS) + (p2 >> HALF_BITS) + (mid >> HALF_BITS);
    (lo, hi)
}

/// Signed cell by cell multiply with a double result.
pub fn m_star(a: Cell, b: Cell) -> Double {
    let prod = um_star(a.unsigned_abs(), b.unsigned_abs());
    if (a < 0) != (b < 0) {
        d_negate(prod)
    } else {
        prod
    }
}

/// Divide a double by a cell, returning `(remainder, quotient)` with a
/// double quotient. `None` on division by zero.
pub fn mu_slash_mod(ud: Double, u: UCell) -> Option<(UCell, Double)> {
    if u == 0 {
        return None;
    }
    let (mut lo, mut hi) = ud;
    let mut rem: UCell = 0;
    let mut quot: Double = (0, 0);
    for _ in 0..(2 * UCell::BITS) {
        // shift the dividend's top bit into the remainder
        let top = hi >> (UCell::BITS - 1);
        hi = (hi << 1) | (lo >> (UCell::BITS - 1));
        lo <<= 1;
        let carry = rem >> (UCell::BITS - 1);
        rem = (rem << 1) | top;

        quot = (quot.0 << 1, (quot.1 << 1) | (quot.0 >> (UCell::BITS - 1)));
        if carry != 0 || rem >= u {
            rem = rem.wrapping_sub(u);
            quot.0 |= 1;
        }
    }
    Some((rem, quot))
}

/// `UM/MOD`: unsigned double by cell, returning `(remainder, quotient)`.
/// A quotient that does not fit a cell is truncated.
pub fn um_slash_mod(ud: Double, u: UCell) -> Option<(UCell, UCell)> {
    mu_slash_mod(ud, u).map(|(rem, quot)| (rem, quot.0))
}

/// `SM/REM`: symmetric division, the remainder takes the dividend's sign.
pub fn sm_slash_rem(d: Double, n: Cell) -> Option<(Cell, Cell)> {
    let (rem, quot) = um_slash_mod(d_abs(d), n.unsigned_abs())?;
    let dneg = is_negative(d);
    let quot = if dneg != (n < 0) {
        (quot as Cell).wrapping_neg()
    } else {
        quot as Cell
    };
    let rem = if dneg {
        (rem as Cell).wrapping_neg()
    } else {
        rem as Cell
    };
    Some((rem, quot))
}

/// `FM/MOD`: floored division, the remainder takes the divisor's sign.
pub fn fm_slash_mod(d: Double, n: Cell) -> Option<(Cell, Cell)> {
    let (rem, quot) = sm_slash_rem(d, n)?;
    if rem != 0 && ((rem < 0) != (n < 0)) {
        Some((rem.wrapping_add(n), quot.wrapping_sub(1)))
    } else {
        Some((rem, quot))
    }
}

/// `ud * base + digit`, used by number conversion.
pub fn ud_mul_add(ud: Double, base: UCell, digit: UCell) -> Double {
    let low = um_star(ud.0, base);
    let acc = (low.0, low.1.wrapping_add(ud.1.wrapping_mul(base)));
    d_add(acc, (digit, 0))
}

#[cfg(test)]
pub mod test {
    use super::*;

    fn to_i64(d: Double) -> i64 {
        ((d.1 as u64) << 32 | d.0 as u64) as i64
    }

    fn from_i64(v: i64) -> Double {
        (v as u64 as u32, (v as u64 >> 32) as u32)
    }

    const SAMPLES: &[i64] = &[
        0,
        1,
        -1,
        7,
        -7,
        0x7FFF_FFFF,
        -0x8000_0000,
        0xFFFF_FFFF,
        0x1_0000_0000,
        -0x1_2345_6789,
        i64::MAX,
        i64::MIN,
        123_456_789_012,
    ];

    #[test]
    fn add_sub_negate() {
        for &a in SAMPLES {
            for &b in SAMPLES {
                assert_eq!(to_i64(d_add(from_i64(a), from_i64(b))), a.wrapping_add(b));
                assert_eq!(to_i64(d_sub(from_i64(a), from_i64(b))), a.wrapping_sub(b));
                assert_eq!(d_less(from_i64(a), from_i64(b)), a < b, "{a} < {b}");
            }
            assert_eq!(to_i64(d_negate(from_i64(a))), a.wrapping_neg());
        }
    }

    #[test]
    fn multiply() {
        let cells: &[Cell] = &[0, 1, -1, 2, 65535, 65536, -65536, Cell::MAX, Cell::MIN, 12345];
        for &a in cells {
            for &b in cells {
                assert_eq!(to_i64(m_star(a, b)), a as i64 * b as i64, "{a} * {b}");
                let ua = a as UCell;
                let ub = b as UCell;
                assert_eq!(
                    to_i64(um_star(ua, ub)) as u64,
                    ua as u64 * ub as u64,
                    "{ua} u* {ub}"
                );
            }
        }
    }

    #[test]
    fn divide() {
        assert_eq!(um_slash_mod((10, 0), 0), None);
        assert_eq!(um_slash_mod((10, 0), 3), Some((1, 3)));
        assert_eq!(um_slash_mod((0, 1), 2), Some((0, 0x8000_0000)));

        let (rem, quot) = mu_slash_mod((5, 7), 3).unwrap();
        let n = (7u64 << 32) | 5;
        assert_eq!(rem as u64, n % 3);
        assert_eq!(((quot.1 as u64) << 32) | quot.0 as u64, n / 3);

        for &(n, d) in &[(7i64, 2i32), (-7, 2), (7, -2), (-7, -2), (0, 5), (-1, 3)] {
            let (r, q) = sm_slash_rem(from_i64(n), d).unwrap();
            assert_eq!(q as i64, n / d as i64, "{n} sm/rem {d}");
            assert_eq!(r as i64, n % d as i64, "{n} sm/rem {d}");

            let (r, q) = fm_slash_mod(from_i64(n), d).unwrap();
            let d = d as i64;
            let mut floored = n / d;
            if n % d != 0 && ((n % d < 0) != (d < 0)) {
                floored -= 1;
            }
            assert_eq!(q as i64, floored, "{n} fm/mod {d}");
            assert_eq!(r as i64, n - floored * d);
        }
    }

    #[test]
    fn accumulate_digits() {
        let mut d = (0, 0);
        for digit in [1u32, 2, 3, 4, 5, 6, 7, 8, 9, 0, 1, 2] {
            d = ud_mul_add(d, 10, digit);
        }
        assert_eq!(to_i64(d), 123_456_789_012);
    }
}
