//! Numeric answer grading

use std::ops::{Add, Mul, Sub};

/// Minimal complex number used by the numeric checkers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub const ZERO: Complex = Complex { re: 0.0, im: 0.0 };

    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    pub fn real(re: f64) -> Self {
        Self { re, im: 0.0 }
    }

    pub fn abs(self) -> f64 {
        self.re.hypot(self.im)
    }

    /// Parse `3`, `-2.5`, `1e3`, `1+2i`, `2-3j`, `-i`, `4.5i`.
    pub fn parse(input: &str) -> Option<Complex> {
        let text: String = input
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| if c == 'j' || c == 'J' || c == 'I' { 'i' } else { c })
            .collect();
        if text.is_empty() {
            return None;
        }

        let Some(body) = text.strip_suffix('i') else {
            return parse_finite(&text).map(Complex::real);
        };

        match split_real_imaginary(body) {
            Some(at) => {
                let re = parse_finite(&body[..at])?;
                let im = parse_coefficient(&body[at..])?;
                Some(Complex::new(re, im))
            }
            None => parse_coefficient(body).map(|im| Complex::new(0.0, im)),
        }
    }
}

impl Add for Complex {
    type Output = Complex;

    fn add(self, rhs: Complex) -> Complex {
        Complex::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl Sub for Complex {
    type Output = Complex;

    fn sub(self, rhs: Complex) -> Complex {
        Complex::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl Mul<f64> for Complex {
    type Output = Complex;

    fn mul(self, rhs: f64) -> Complex {
        Complex::new(self.re * rhs, self.im * rhs)
    }
}

fn parse_finite(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Imaginary coefficient: a bare sign means one.
fn parse_coefficient(text: &str) -> Option<f64> {
    match text {
        "" | "+" => Some(1.0),
        "-" => Some(-1.0),
        _ => parse_finite(text),
    }
}

/// Index of the sign separating the real part from the imaginary part, if
/// any. Signs at the start or directly after an exponent marker don't count.
fn split_real_imaginary(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    (1..bytes.len()).rev().find(|&i| {
        (bytes[i] == b'+' || bytes[i] == b'-') && !matches!(bytes[i - 1], b'e' | b'E')
    })
}

/// True when `given` is within `tolerance` of `expected`, absolutely or
/// relative to the larger magnitude.
pub fn within_tolerance(given: Complex, expected: Complex, tolerance: f64) -> bool {
    let diff = (given - expected).abs();
    if diff <= tolerance {
        return true;
    }
    let scale = given.abs().max(expected.abs());
    scale > 0.0 && diff / scale <= tolerance
}

/// Grade a numeric answer against every accepted answer that parses.
pub fn check_numeric(answer: &str, accepted: &[String], tolerance: f64) -> bool {
    let Some(given) = Complex::parse(answer) else {
        return false;
    };
    accepted
        .iter()
        .filter_map(|a| Complex::parse(a))
        .any(|expected| within_tolerance(given, expected, tolerance))
}

/// Grade a space-separated tuple of variable values against a linear system.
pub fn check_linear_system(
    answer: &str,
    coeffs: &[Vec<f64>],
    equal_to: &[f64],
    tolerance: f64,
) -> bool {
    let values: Option<Vec<Complex>> = answer.split_whitespace().map(Complex::parse).collect();
    let Some(values) = values else {
        return false;
    };
    if coeffs.is_empty() || coeffs.len() != equal_to.len() {
        return false;
    }

    coeffs.iter().zip(equal_to).all(|(row, &rhs)| {
        if row.len() != values.len() {
            return false;
        }
        let lhs = row
            .iter()
            .zip(&values)
            .fold(Complex::ZERO, |acc, (&c, &v)| acc + v * c);
        let rhs = Complex::real(rhs);
        let diff = (lhs - rhs).abs() / lhs.abs().max(rhs.abs()).max(1.0);
        diff <= tolerance
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(Complex::parse("3"), Some(Complex::real(3.0)));
        assert_eq!(Complex::parse(" -2.5 "), Some(Complex::real(-2.5)));
        assert_eq!(Complex::parse("1+2i"), Some(Complex::new(1.0, 2.0)));
        assert_eq!(Complex::parse("2-3j"), Some(Complex::new(2.0, -3.0)));
        assert_eq!(Complex::parse("-i"), Some(Complex::new(0.0, -1.0)));
        assert_eq!(Complex::parse("4.5i"), Some(Complex::new(0.0, 4.5)));
        assert_eq!(Complex::parse("1e-3+1e2i"), Some(Complex::new(0.001, 100.0)));
        assert_eq!(Complex::parse("four"), None);
        assert_eq!(Complex::parse(""), None);
        assert_eq!(Complex::parse("inf"), None);
    }

    #[test]
    fn test_numeric_tolerance() {
        let accepted = vec!["4".to_string()];
        assert!(check_numeric("4.0005", &accepted, 0.001));
        assert!(!check_numeric("4.01", &accepted, 0.001));
        assert!(!check_numeric("four", &accepted, 0.001));
    }

    #[test]
    fn test_relative_tolerance_for_large_values() {
        let accepted = vec!["1000000".to_string()];
        assert!(check_numeric("1000500", &accepted, 0.001));
        assert!(!check_numeric("1002000", &accepted, 0.001));
    }

    #[test]
    fn test_linear_system() {
        // x + y = 3, x - y = 1
        let coeffs = vec![vec![1.0, 1.0], vec![1.0, -1.0]];
        let equal_to = vec![3.0, 1.0];
        assert!(check_linear_system("2 1", &coeffs, &equal_to, 0.001));
        assert!(check_linear_system("2.0001 0.9999", &coeffs, &equal_to, 0.001));
        assert!(!check_linear_system("1 2", &coeffs, &equal_to, 0.001));
        assert!(!check_linear_system("2", &coeffs, &equal_to, 0.001));
        assert!(!check_linear_system("x=2 y=1", &coeffs, &equal_to, 0.001));
    }
}
