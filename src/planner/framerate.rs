//! Frame rate as an exact fraction for the encoder's `-r` option

use std::fmt;

/// Rates that NTSC-style sources usually approximate
const COMMON_RATES: [(u64, u64); 7] = [
    (24000, 1001),
    (25000, 1001),
    (30000, 1001),
    (60000, 1001),
    (48000, 1001),
    (12000, 1001),
    (15000, 1001),
];

const MATCH_TOLERANCE: f64 = 0.01;
const MAX_DENOMINATOR: u64 = 1001;

/// Frame rate fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction {
    pub numerator: u64,
    pub denominator: u64,
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Map a measured frame rate to a fraction.
///
/// Snaps to a common `N/1001` rate within 0.01, otherwise uses the closest
/// fraction with a denominator of at most 1001.
pub fn find_fraction(frame_rate: f64) -> Option<Fraction> {
    if !frame_rate.is_finite() || frame_rate <= 0.0 {
        return None;
    }
    for (numerator, denominator) in COMMON_RATES {
        if (frame_rate - numerator as f64 / denominator as f64).abs() < MATCH_TOLERANCE {
            return Some(Fraction {
                numerator,
                denominator,
            });
        }
    }
    Some(limit_denominator(frame_rate, MAX_DENOMINATOR))
}

/// Best rational approximation with a bounded denominator (continued fractions)
fn limit_denominator(value: f64, max_denominator: u64) -> Fraction {
    let (mut p0, mut q0, mut p1, mut q1) = (0u64, 1u64, 1u64, 0u64);
    let mut x = value;
    loop {
        let a = x.floor() as u64;
        let q2 = q0 + a * q1;
        if q2 > max_denominator {
            break;
        }
        (p0, q0, p1, q1) = (p1, q1, p0 + a * p1, q2);
        let rest = x - a as f64;
        if rest < 1e-9 {
            return Fraction {
                numerator: p1,
                denominator: q1,
            };
        }
        x = 1.0 / rest;
    }

    let k = (max_denominator - q0) / q1;
    let bound1 = Fraction {
        numerator: p0 + k * p1,
        denominator: q0 + k * q1,
    };
    let bound2 = Fraction {
        numerator: p1,
        denominator: q1,
    };
    let error = |f: &Fraction| (f.numerator as f64 / f.denominator as f64 - value).abs();
    if error(&bound2) <= error(&bound1) {
        bound2
    } else {
        bound1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_and_integer_rates() {
        let cases = [
            (23.976024, "24000/1001"),
            (23.98, "24000/1001"),
            (24.00, "24/1"),
            (24.98, "25000/1001"),
            (25.00, "25/1"),
            (29.97, "30000/1001"),
            (30.00, "30/1"),
            (59.94, "60000/1001"),
            (60.00, "60/1"),
            (120.00, "120/1"),
            (150.00, "150/1"),
        ];
        for (rate, expected) in cases {
            assert_eq!(find_fraction(rate).unwrap().to_string(), expected, "rate {}", rate);
        }
    }

    #[test]
    fn test_approximation() {
        let fraction = find_fraction(12.5).unwrap();
        assert_eq!(fraction, Fraction { numerator: 25, denominator: 2 });
        let fraction = find_fraction(24.8).unwrap();
        assert_eq!(fraction.to_string(), "124/5");
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(find_fraction(0.0).is_none());
        assert!(find_fraction(f64::NAN).is_none());
    }
}
