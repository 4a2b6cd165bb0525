//! Numeric literal conversion for the outer interpreter.

use crate::{
    double::{self, Double},
    Cell, UCell,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Single(Cell),
    Double(Double),
    #[cfg(feature = "floats")]
    Float(f64),
    NotANumber,
}

#[inline]
fn digit_value(c: u8) -> Option<u32> {
    match c {
        b'0'..=b'9' => Some((c - b'0') as u32),
        b'a'..=b'z' => Some((c - b'a') as u32 + 10),
        b'A'..=b'Z' => Some((c - b'A') as u32 + 10),
        _ => None,
    }
}

/// Convert `text` to a number in radix `base`.
///
/// Accepts an optional `-` and an optional `$`, `%` or `#` radix prefix in
/// either order, `'c'` character literals, and marks the number as a double
/// when a `.` appears among the digits.
pub fn convert(text: &[u8], base: UCell) -> Number {
    if let [b'\'', c, b'\''] = text {
        return Number::Single(Cell::from(*c));
    }
    if !(2..=36).contains(&base) || text.is_empty() {
        return Number::NotANumber;
    }

    #[cfg(feature = "floats")]
    if base == 10 {
        if let Some(f) = convert_float(text) {
            return Number::Float(f);
        }
    }

    let mut base = base;
    let mut negative = false;
    let mut prefixed = false;
    let mut rest = text;
    while let [first, tail @ ..] = rest {
        match *first {
            b'-' if !negative => negative = true,
            b'$' if !prefixed => base = 16,
            b'%' if !prefixed => base = 2,
            b'#' if !prefixed => base = 10,
            _ => break,
        }
        if *first != b'-' {
            prefixed = true;
        }
        rest = tail;
    }

    let mut acc: Double = (0, 0);
    let mut digits = 0;
    let mut is_double = false;
    for &c in rest {
        if c == b'.' {
            is_double = true;
            continue;
        }
        match digit_value(c) {
            Some(v) if v < base => {
                acc = double::ud_mul_add(acc, base, v);
                digits += 1;
            }
            _ => return Number::NotANumber,
        }
    }
    if digits == 0 {
        return Number::NotANumber;
    }
    if negative {
        acc = double::d_negate(acc);
    }
    if is_double {
        Number::Double(acc)
    } else {
        Number::Single(acc.0 as Cell)
    }
}

/// Floats need an exponent marker, so `1.5` stays a double cell integer.
#[cfg(feature = "floats")]
fn convert_float(text: &[u8]) -> Option<f64> {
    if !text.iter().any(|c| matches!(c, b'e' | b'E')) {
        return None;
    }
    let s = core::str::from_utf8(text).ok()?;
    // "1E" is shorthand for "1E0"
    let trimmed = s.strip_suffix(['e', 'E']);
    match trimmed {
        Some(mantissa) if !mantissa.is_empty() => mantissa.parse::<f64>().ok(),
        _ => s.parse::<f64>().ok(),
    }
}

#[cfg(test)]
pub mod test {
    use super::{convert, Number};

    #[test]
    fn singles() {
        assert_eq!(convert(b"123", 10), Number::Single(123));
        assert_eq!(convert(b"-123", 10), Number::Single(-123));
        assert_eq!(convert(b"ff", 16), Number::Single(255));
        assert_eq!(convert(b"FF", 16), Number::Single(255));
        assert_eq!(convert(b"ff", 10), Number::NotANumber);
        assert_eq!(convert(b"z", 36), Number::Single(35));
        assert_eq!(convert(b"4294967295", 10), Number::Single(-1));
    }

    #[test]
    fn prefixes_in_either_order() {
        assert_eq!(convert(b"$10", 10), Number::Single(16));
        assert_eq!(convert(b"-$10", 10), Number::Single(-16));
        assert_eq!(convert(b"$-10", 10), Number::Single(-16));
        assert_eq!(convert(b"%101", 10), Number::Single(5));
        assert_eq!(convert(b"#99", 16), Number::Single(99));
        assert_eq!(convert(b"$", 10), Number::NotANumber);
        assert_eq!(convert(b"-", 10), Number::NotANumber);
        assert_eq!(convert(b"--1", 10), Number::NotANumber);
        assert_eq!(convert(b"$$1", 10), Number::NotANumber);
    }

    #[test]
    fn doubles_and_chars() {
        assert_eq!(convert(b"1.", 10), Number::Double((1, 0)));
        assert_eq!(convert(b"-1.", 10), Number::Double((u32::MAX, u32::MAX)));
        assert_eq!(convert(b"4294967296.", 10), Number::Double((0, 1)));
        assert_eq!(convert(b"1.5", 10), Number::Double((15, 0)));
        assert_eq!(convert(b"'A'", 10), Number::Single(65));
        assert_eq!(convert(b"'AB'", 10), Number::NotANumber);
        assert_eq!(convert(b".", 10), Number::NotANumber);
    }

    #[test]
    fn bad_bases() {
        assert_eq!(convert(b"1", 1), Number::NotANumber);
        assert_eq!(convert(b"1", 37), Number::NotANumber);
        assert_eq!(convert(b"", 10), Number::NotANumber);
    }
}
