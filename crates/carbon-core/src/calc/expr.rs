//! Typed raster-algebra expressions.
//!
//! An [`Expr`] is built in Rust, rendered to the numpy syntax `gdal_calc.py`
//! expects, or evaluated per pixel by the in-process backend. Both paths agree
//! on the semantics below:
//! - comparisons yield 1.0 / 0.0
//! - division by zero yields 0 (NoData); a divisor that is not a nonzero
//!   constant renders as a guarded `where(...)`

use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use crate::error::{Error, Result};

/// Single-letter input binding, `A` through `Z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Band(u8);

impl Band {
    pub const A: Band = Band(0);
    pub const B: Band = Band(1);
    pub const C: Band = Band(2);

    /// Band at position `index` (0 → A).
    pub fn nth(index: usize) -> Result<Self> {
        if index < 26 {
            Ok(Band(index as u8))
        } else {
            Err(Error::Config(format!("at most 26 input bands can be bound, not {}", index + 1)))
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn letter(self) -> char {
        (b'A' + self.0) as char
    }

    pub fn expr(self) -> Expr {
        Expr::Band(self)
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Band(Band),
    Const(f64),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Max(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn gt(self, rhs: impl Into<Expr>) -> Expr {
        Expr::Gt(Box::new(self), Box::new(rhs.into()))
    }

    pub fn eq_to(self, rhs: impl Into<Expr>) -> Expr {
        Expr::Eq(Box::new(self), Box::new(rhs.into()))
    }

    /// Element-wise maximum.
    pub fn max(self, rhs: impl Into<Expr>) -> Expr {
        Expr::Max(Box::new(self), Box::new(rhs.into()))
    }

    /// `self` where it is positive, else 0.
    pub fn positive_part(self) -> Expr {
        self.clone().gt(0.0) * self
    }

    /// Every band the expression reads, in letter order.
    pub fn bands(&self) -> BTreeSet<Band> {
        let mut out = BTreeSet::new();
        self.collect_bands(&mut out);
        out
    }

    fn collect_bands(&self, out: &mut BTreeSet<Band>) {
        match self {
            Expr::Band(b) => {
                out.insert(*b);
            }
            Expr::Const(_) => {}
            Expr::Add(l, r)
            | Expr::Sub(l, r)
            | Expr::Mul(l, r)
            | Expr::Div(l, r)
            | Expr::Gt(l, r)
            | Expr::Eq(l, r)
            | Expr::Max(l, r) => {
                l.collect_bands(out);
                r.collect_bands(out);
            }
        }
    }

    /// Value at one pixel; `pixel[i]` is the value of band `i`.
    pub fn eval(&self, pixel: &[f64]) -> f64 {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        match self {
            Expr::Band(b) => pixel.get(b.index()).copied().unwrap_or(0.0),
            Expr::Const(c) => *c,
            Expr::Add(l, r) => l.eval(pixel) + r.eval(pixel),
            Expr::Sub(l, r) => l.eval(pixel) - r.eval(pixel),
            Expr::Mul(l, r) => l.eval(pixel) * r.eval(pixel),
            Expr::Div(l, r) => {
                let d = r.eval(pixel);
                if d == 0.0 {
                    0.0
                } else {
                    l.eval(pixel) / d
                }
            }
            Expr::Gt(l, r) => flag(l.eval(pixel) > r.eval(pixel)),
            Expr::Eq(l, r) => flag(l.eval(pixel) == r.eval(pixel)),
            Expr::Max(l, r) => l.eval(pixel).max(r.eval(pixel)),
        }
    }

    fn is_atom(&self) -> bool {
        matches!(self, Expr::Band(_) | Expr::Const(_) | Expr::Max(..))
    }
}

impl From<f64> for Expr {
    fn from(c: f64) -> Self {
        Expr::Const(c)
    }
}

impl From<Band> for Expr {
    fn from(b: Band) -> Self {
        Expr::Band(b)
    }
}

macro_rules! binary_op {
    ($trait:ident, $method:ident, $variant:ident) => {
        impl<R: Into<Expr>> $trait<R> for Expr {
            type Output = Expr;

            fn $method(self, rhs: R) -> Expr {
                Expr::$variant(Box::new(self), Box::new(rhs.into()))
            }
        }
    };
}

binary_op!(Add, add, Add);
binary_op!(Sub, sub, Sub);
binary_op!(Mul, mul, Mul);
binary_op!(Div, div, Div);

struct Operand<'a>(&'a Expr);

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_atom() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "({})", self.0)
        }
    }
}

/// numpy syntax, parenthesised so precedence never matters.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bin = |f: &mut fmt::Formatter<'_>, l: &Expr, op: &str, r: &Expr| {
            write!(f, "{}{op}{}", Operand(l), Operand(r))
        };
        match self {
            Expr::Band(b) => write!(f, "{b}"),
            Expr::Const(c) if c.fract() == 0.0 && c.abs() < 1e15 => write!(f, "{}", *c as i64),
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Add(l, r) => bin(f, l, "+", r),
            Expr::Sub(l, r) => bin(f, l, "-", r),
            Expr::Mul(l, r) => bin(f, l, "*", r),
            Expr::Div(l, r) if matches!(**r, Expr::Const(d) if d != 0.0) => bin(f, l, "/", r),
            Expr::Div(l, r) => write!(f, "where({}!=0,{}/{},0)", Operand(r), Operand(l), Operand(r)),
            Expr::Gt(l, r) => bin(f, l, ">", r),
            Expr::Eq(l, r) => bin(f, l, "==", r),
            Expr::Max(l, r) => write!(f, "maximum({l},{r})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a() -> Expr {
        Band::A.expr()
    }
    fn b() -> Expr {
        Band::B.expr()
    }

    #[test]
    fn renders_numpy_syntax() {
        let e = a().gt(0.0) * b().eq_to(0.0) * a();
        assert_eq!(e.to_string(), "((A>0)*(B==0))*A");
        assert_eq!(a().max(b()).to_string(), "maximum(A,B)");
        assert_eq!((a() * (Expr::from(44.0) / 12.0)).to_string(), "A*(44/12)");
        assert_eq!((a() * 0.5).to_string(), "A*0.5");
    }

    #[test]
    fn comparisons_are_numeric_flags() {
        let px = [3.0, 0.0];
        assert_eq!(a().gt(0.0).eval(&px), 1.0);
        assert_eq!(b().gt(0.0).eval(&px), 0.0);
        assert_eq!(b().eq_to(0.0).eval(&px), 1.0);
    }

    #[test]
    fn division_by_zero_is_nodata() {
        assert_eq!((a() / b()).eval(&[5.0, 0.0]), 0.0);
        assert_eq!((a() / b()).eval(&[5.0, 2.0]), 2.5);
    }

    #[test]
    fn band_divisor_is_guarded_when_rendered() {
        assert_eq!((a() / b()).to_string(), "where(B!=0,A/B,0)");
        assert_eq!((a() / (b() + 1.0)).to_string(), "where((B+1)!=0,A/(B+1),0)");
        assert_eq!((a() / 0.0).to_string(), "where(0!=0,A/0,0)");
        assert_eq!((a() / 4.0).to_string(), "A/4");
    }

    #[test]
    fn positive_part_masks_non_positive() {
        let e = a().positive_part();
        assert_eq!(e.eval(&[-9999.0]), 0.0);
        assert_eq!(e.eval(&[0.0]), 0.0);
        assert_eq!(e.eval(&[4.0]), 4.0);
    }

    #[test]
    fn bands_are_collected_in_letter_order() {
        let e = Band::C.expr() + a() * b().max(a());
        let letters: Vec<char> = e.bands().into_iter().map(Band::letter).collect();
        assert_eq!(letters, ['A', 'B', 'C']);
    }

    #[test]
    fn band_limit() {
        assert_eq!(Band::nth(25).unwrap().letter(), 'Z');
        assert!(Band::nth(26).is_err());
    }
}
