//! Numeric traits used by the reference kernels.

use std::ops;

use crate::tensor::Element;

/// Arithmetic on tensor elements with ONNX semantics.
///
/// Integer operations wrap on overflow. Integer division by zero returns
/// `None`.
pub trait Arith: Element {
    fn zero() -> Self;
    fn one() -> Self;
    fn add(self, rhs: Self) -> Self;
    fn sub(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
    fn div(self, rhs: Self) -> Option<Self>;

    /// Compute the remainder of `self / rhs`.
    ///
    /// If `fmod` is true the result has the sign of the dividend, as with C's
    /// `fmod`. Otherwise it has the sign of the divisor.
    fn rem(self, rhs: Self, fmod: bool) -> Option<Self>;
    fn pow(self, rhs: Self) -> Self;
    fn abs(self) -> Self;
    fn neg(self) -> Self;
    fn signum(self) -> Self;

    /// Return the larger value, or NaN if either value is NaN.
    fn maximum(self, rhs: Self) -> Self;

    /// Return the smaller value, or NaN if either value is NaN.
    fn minimum(self, rhs: Self) -> Self;
}

macro_rules! impl_float_arith {
    ($type:ty) => {
        impl Arith for $type {
            fn zero() -> Self {
                0.
            }

            fn one() -> Self {
                1.
            }

            fn add(self, rhs: Self) -> Self {
                self + rhs
            }

            fn sub(self, rhs: Self) -> Self {
                self - rhs
            }

            fn mul(self, rhs: Self) -> Self {
                self * rhs
            }

            fn div(self, rhs: Self) -> Option<Self> {
                Some(self / rhs)
            }

            fn rem(self, rhs: Self, fmod: bool) -> Option<Self> {
                let r = self % rhs;
                if !fmod && r != 0. && (r < 0.) != (rhs < 0.) {
                    Some(r + rhs)
                } else {
                    Some(r)
                }
            }

            fn pow(self, rhs: Self) -> Self {
                self.powf(rhs)
            }

            fn abs(self) -> Self {
                <$type>::abs(self)
            }

            fn neg(self) -> Self {
                -self
            }

            fn signum(self) -> Self {
                if self == 0. || <$type>::is_nan(self) {
                    self
                } else {
                    <$type>::signum(self)
                }
            }

            fn maximum(self, rhs: Self) -> Self {
                if <$type>::is_nan(self) || <$type>::is_nan(rhs) {
                    <$type>::NAN
                } else {
                    <$type>::max(self, rhs)
                }
            }

            fn minimum(self, rhs: Self) -> Self {
                if <$type>::is_nan(self) || <$type>::is_nan(rhs) {
                    <$type>::NAN
                } else {
                    <$type>::min(self, rhs)
                }
            }
        }
    };
}

macro_rules! impl_int_arith {
    ($type:ty) => {
        impl Arith for $type {
            fn zero() -> Self {
                0
            }

            fn one() -> Self {
                1
            }

            fn add(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }

            fn sub(self, rhs: Self) -> Self {
                self.wrapping_sub(rhs)
            }

            fn mul(self, rhs: Self) -> Self {
                self.wrapping_mul(rhs)
            }

            fn div(self, rhs: Self) -> Option<Self> {
                if rhs == 0 {
                    None
                } else {
                    Some(self.wrapping_div(rhs))
                }
            }

            #[allow(unused_comparisons)]
            fn rem(self, rhs: Self, fmod: bool) -> Option<Self> {
                if rhs == 0 {
                    return None;
                }
                let r = self.wrapping_rem(rhs);
                if !fmod && r != 0 && (r < 0) != (rhs < 0) {
                    Some(r.wrapping_add(rhs))
                } else {
                    Some(r)
                }
            }

            fn pow(self, rhs: Self) -> Self {
                (self as f64).powf(rhs as f64) as $type
            }

            #[allow(unused_comparisons)]
            fn abs(self) -> Self {
                if self < 0 {
                    (0 as $type).wrapping_sub(self)
                } else {
                    self
                }
            }

            fn neg(self) -> Self {
                (0 as $type).wrapping_sub(self)
            }

            #[allow(unused_comparisons)]
            fn signum(self) -> Self {
                if self > 0 {
                    1
                } else if self < 0 {
                    (0 as $type).wrapping_sub(1)
                } else {
                    0
                }
            }

            fn maximum(self, rhs: Self) -> Self {
                Ord::max(self, rhs)
            }

            fn minimum(self, rhs: Self) -> Self {
                Ord::min(self, rhs)
            }
        }
    };
}

impl_float_arith!(f32);
impl_float_arith!(f64);
impl_int_arith!(i64);
impl_int_arith!(i32);
impl_int_arith!(i8);
impl_int_arith!(u8);

/// Float element types.
pub trait Float:
    Arith
    + ops::Add<Output = Self>
    + ops::Sub<Output = Self>
    + ops::Mul<Output = Self>
    + ops::Div<Output = Self>
    + ops::Neg<Output = Self>
{
    fn from_f32(val: f32) -> Self;
    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sqrt(self) -> Self;
    fn tanh(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn erf(self) -> Self;
    fn floor(self) -> Self;
    fn ceil(self) -> Self;

    /// Round to the nearest integer, with ties rounded to even.
    fn round_even(self) -> Self;
}

macro_rules! impl_float {
    ($type:ident, $erf:path) => {
        impl Float for $type {
            fn from_f32(val: f32) -> Self {
                val as $type
            }

            fn exp(self) -> Self {
                $type::exp(self)
            }

            fn ln(self) -> Self {
                $type::ln(self)
            }

            fn sqrt(self) -> Self {
                $type::sqrt(self)
            }

            fn tanh(self) -> Self {
                $type::tanh(self)
            }

            fn sin(self) -> Self {
                $type::sin(self)
            }

            fn cos(self) -> Self {
                $type::cos(self)
            }

            fn erf(self) -> Self {
                $erf(self)
            }

            fn floor(self) -> Self {
                $type::floor(self)
            }

            fn ceil(self) -> Self {
                $type::ceil(self)
            }

            fn round_even(self) -> Self {
                $type::round_ties_even(self)
            }
        }
    };
}

impl_float!(f32, libm::erff);
impl_float!(f64, libm::erf);

#[cfg(test)]
mod tests {
    use super::{Arith, Float};

    #[test]
    fn test_rem() {
        struct Case {
            a: i32,
            b: i32,
            fmod: bool,
            expected: Option<i32>,
        }

        let cases = [
            Case {
                a: -7,
                b: 3,
                fmod: false,
                expected: Some(2),
            },
            Case {
                a: -7,
                b: 3,
                fmod: true,
                expected: Some(-1),
            },
            Case {
                a: 7,
                b: -3,
                fmod: false,
                expected: Some(-2),
            },
            Case {
                a: 7,
                b: 0,
                fmod: false,
                expected: None,
            },
        ];

        for case in cases {
            assert_eq!(Arith::rem(case.a, case.b, case.fmod), case.expected);
        }

        assert_eq!(Arith::rem(-7.5f32, 2., true), Some(-1.5));
    }

    #[test]
    fn test_int_ops_wrap() {
        assert_eq!(Arith::add(i8::MAX, 1), i8::MIN);
        assert_eq!(Arith::div(i32::MIN, -1), Some(i32::MIN));
        assert_eq!(Arith::div(1i64, 0), None);
        assert_eq!(Arith::neg(5u8), 251);
    }

    #[test]
    fn test_maximum_propagates_nan() {
        assert!(Arith::maximum(1.0f32, f32::NAN).is_nan());
        assert_eq!(Arith::minimum(1.0f64, 2.0), 1.0);
    }

    #[test]
    fn test_round_even() {
        assert_eq!(Float::round_even(2.5f32), 2.);
        assert_eq!(Float::round_even(3.5f32), 4.);
        assert_eq!(Float::round_even(-0.5f64), -0.);
    }
}
