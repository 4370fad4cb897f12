//! Forward-mode automatic differentiation scalar.
//!
//! A [`Fad`] carries a value and its gradient with respect to a fixed list
//! of independent variables. An empty gradient stands for "all zero", so
//! constants cost no allocation and mix freely with variables of any length.

use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

use num_traits::{One, Zero};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fad {
    val: f64,
    dx: Vec<f64>,
}

impl Fad {
    /// A constant (zero gradient).
    #[inline]
    pub fn constant(val: f64) -> Self {
        Fad { val, dx: Vec::new() }
    }

    /// Independent variable `index` of `n`.
    pub fn variable(n: usize, index: usize, val: f64) -> Self {
        let mut dx = vec![0.0; n];
        if let Some(d) = dx.get_mut(index) {
            *d = 1.0;
        }
        Fad { val, dx }
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.val
    }

    /// Derivative with respect to variable `index`.
    #[inline]
    pub fn dx(&self, index: usize) -> f64 {
        self.dx.get(index).copied().unwrap_or(0.0)
    }

    /// Gradient padded with zeros to `n` entries.
    pub fn gradient(&self, n: usize) -> Vec<f64> {
        (0..n).map(|i| self.dx(i)).collect()
    }

    pub fn sqrt(&self) -> Fad {
        let s = self.val.sqrt();
        let scale = if s > 0.0 { 0.5 / s } else { 0.0 };
        Fad {
            val: s,
            dx: self.dx.iter().map(|d| d * scale).collect(),
        }
    }

    pub fn abs(&self) -> Fad {
        if self.val < 0.0 { -self } else { self.clone() }
    }

    /// `a * self.dx + b * other.dx`, padding the shorter gradient.
    fn combine(&self, a: f64, other: &Fad, b: f64) -> Vec<f64> {
        let n = self.dx.len().max(other.dx.len());
        (0..n).map(|i| a * self.dx(i) + b * other.dx(i)).collect()
    }
}

impl From<f64> for Fad {
    fn from(val: f64) -> Self {
        Fad::constant(val)
    }
}

impl Add<&Fad> for &Fad {
    type Output = Fad;
    fn add(self, rhs: &Fad) -> Fad {
        Fad {
            val: self.val + rhs.val,
            dx: self.combine(1.0, rhs, 1.0),
        }
    }
}

impl Sub<&Fad> for &Fad {
    type Output = Fad;
    fn sub(self, rhs: &Fad) -> Fad {
        Fad {
            val: self.val - rhs.val,
            dx: self.combine(1.0, rhs, -1.0),
        }
    }
}

impl Mul<&Fad> for &Fad {
    type Output = Fad;
    fn mul(self, rhs: &Fad) -> Fad {
        Fad {
            val: self.val * rhs.val,
            dx: self.combine(rhs.val, rhs, self.val),
        }
    }
}

impl Div<&Fad> for &Fad {
    type Output = Fad;
    fn div(self, rhs: &Fad) -> Fad {
        let inv = 1.0 / rhs.val;
        Fad {
            val: self.val * inv,
            dx: self.combine(inv, rhs, -self.val * inv * inv),
        }
    }
}

impl Neg for &Fad {
    type Output = Fad;
    fn neg(self) -> Fad {
        Fad {
            val: -self.val,
            dx: self.dx.iter().map(|d| -d).collect(),
        }
    }
}

impl Neg for Fad {
    type Output = Fad;
    fn neg(self) -> Fad {
        -&self
    }
}

macro_rules! forward_owned_binop {
    ($tr:ident, $method:ident) => {
        impl $tr<Fad> for Fad {
            type Output = Fad;
            fn $method(self, rhs: Fad) -> Fad {
                (&self).$method(&rhs)
            }
        }
        impl $tr<&Fad> for Fad {
            type Output = Fad;
            fn $method(self, rhs: &Fad) -> Fad {
                (&self).$method(rhs)
            }
        }
        impl $tr<Fad> for &Fad {
            type Output = Fad;
            fn $method(self, rhs: Fad) -> Fad {
                self.$method(&rhs)
            }
        }
        impl $tr<f64> for &Fad {
            type Output = Fad;
            fn $method(self, rhs: f64) -> Fad {
                self.$method(&Fad::constant(rhs))
            }
        }
        impl $tr<f64> for Fad {
            type Output = Fad;
            fn $method(self, rhs: f64) -> Fad {
                (&self).$method(&Fad::constant(rhs))
            }
        }
    };
}

forward_owned_binop!(Add, add);
forward_owned_binop!(Sub, sub);
forward_owned_binop!(Mul, mul);
forward_owned_binop!(Div, div);

impl AddAssign<&Fad> for Fad {
    fn add_assign(&mut self, rhs: &Fad) {
        *self = &*self + rhs;
    }
}

impl SubAssign<&Fad> for Fad {
    fn sub_assign(&mut self, rhs: &Fad) {
        *self = &*self - rhs;
    }
}

impl MulAssign<f64> for Fad {
    fn mul_assign(&mut self, rhs: f64) {
        self.val *= rhs;
        self.dx.iter_mut().for_each(|d| *d *= rhs);
    }
}

impl Zero for Fad {
    fn zero() -> Self {
        Fad::constant(0.0)
    }

    fn is_zero(&self) -> bool {
        self.val == 0.0 && self.dx.iter().all(|d| *d == 0.0)
    }
}

impl One for Fad {
    fn one() -> Self {
        Fad::constant(1.0)
    }
}

/// Dot product of two 3-vectors of [`Fad`].
pub fn dot3(a: &[Fad; 3], b: &[Fad; 3]) -> Fad {
    &(&(&a[0] * &b[0]) + &(&a[1] * &b[1])) + &(&a[2] * &b[2])
}

/// Cross product of two 3-vectors of [`Fad`].
pub fn cross3(a: &[Fad; 3], b: &[Fad; 3]) -> [Fad; 3] {
    [
        &(&a[1] * &b[2]) - &(&a[2] * &b[1]),
        &(&a[2] * &b[0]) - &(&a[0] * &b[2]),
        &(&a[0] * &b[1]) - &(&a[1] * &b[0]),
    ]
}

/// Component-wise difference of two 3-vectors of [`Fad`].
pub fn sub3(a: &[Fad; 3], b: &[Fad; 3]) -> [Fad; 3] {
    [&a[0] - &b[0], &a[1] - &b[1], &a[2] - &b[2]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_rule() {
        let x = Fad::variable(2, 0, 3.0);
        let y = Fad::variable(2, 1, 4.0);
        let f = &(&x * &y) + &x;
        assert_eq!(f.value(), 15.0);
        assert_eq!(f.dx(0), 5.0);
        assert_eq!(f.dx(1), 3.0);
    }

    #[test]
    fn quotient_and_sqrt() {
        let x = Fad::variable(1, 0, 4.0);
        let r = x.sqrt();
        assert_eq!(r.value(), 2.0);
        assert_eq!(r.dx(0), 0.25);
        let q = Fad::constant(1.0) / &x;
        assert!((q.dx(0) + 1.0 / 16.0).abs() < 1e-15);
    }

    #[test]
    fn constants_have_no_gradient() {
        let c = Fad::constant(2.0) * 3.0;
        assert!(c.gradient(3).iter().all(|d| *d == 0.0));
        assert!(Fad::zero().is_zero());
        assert_eq!(Fad::one().value(), 1.0);
    }

    #[test]
    fn cross_of_unit_vectors() {
        let e = |i: usize| -> [Fad; 3] {
            let mut v = [Fad::zero(), Fad::zero(), Fad::zero()];
            v[i] = Fad::one();
            v
        };
        let z = cross3(&e(0), &e(1));
        assert_eq!(z[2].value(), 1.0);
        assert_eq!(dot3(&z, &e(2)).value(), 1.0);
    }
}
