//! Symbolic expressions representing dimension sizes.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::sync::Arc;

use onnxsim_onnx::onnx;

/// Symbolic expression representing an integer value.
///
/// Expressions can be known integer values, named symbols or composite
/// expressions.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum SymExpr {
    /// Element with a known integer value.
    Value(i64),
    /// Named symbol, such as a dynamic batch size.
    Var(Arc<str>),
    /// Addition of two symbolic values
    Add(Arc<SymExpr>, Arc<SymExpr>),
    /// Subtraction of two symbolic values
    Sub(Arc<SymExpr>, Arc<SymExpr>),
    /// Multiplication of two symbolic values
    Mul(Arc<SymExpr>, Arc<SymExpr>),
    /// Flooring division of first expression by second.
    Div(Arc<SymExpr>, Arc<SymExpr>),
    /// Ceiling division of first expression by second.
    DivCeil(Arc<SymExpr>, Arc<SymExpr>),
    /// Maximum of two symbolic values
    Max(Arc<SymExpr>, Arc<SymExpr>),
    /// Minimum of two symbolic values
    Min(Arc<SymExpr>, Arc<SymExpr>),
}

impl SymExpr {
    pub fn var(name: &str) -> Self {
        Self::Var(name.into())
    }

    pub fn as_value(&self) -> Option<i64> {
        match self {
            Self::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn max(&self, other: &SymExpr) -> SymExpr {
        Self::Max(self.clone().into(), other.clone().into()).simplify()
    }

    pub fn min(&self, other: &SymExpr) -> SymExpr {
        Self::Min(self.clone().into(), other.clone().into()).simplify()
    }

    pub fn div_ceil(&self, other: &SymExpr) -> SymExpr {
        Self::DivCeil(self.clone().into(), other.clone().into()).simplify()
    }

    /// Simplify an expression.
    ///
    /// Constant sub-expressions are evaluated, identities such as `x * 1` are
    /// removed and operands of commutative operations are sorted, so that
    /// equivalent expressions built in different orders compare equal.
    pub fn simplify(&self) -> SymExpr {
        match self {
            Self::Value(_) | Self::Var(_) => self.clone(),
            Self::Add(..) | Self::Mul(..) | Self::Max(..) | Self::Min(..) => {
                let mut terms = Vec::new();
                self.collect_terms(&mut terms);
                let terms: Vec<SymExpr> = terms.into_iter().map(|t| t.simplify()).collect();
                self.rebuild_associative(terms)
            }
            Self::Sub(lhs, rhs) => {
                let (lhs, rhs) = (lhs.simplify(), rhs.simplify());
                match (&lhs, &rhs) {
                    (Self::Value(a), Self::Value(b)) => Self::Value(a - b),
                    (_, Self::Value(0)) => lhs,
                    _ if lhs == rhs => Self::Value(0),
                    _ => Self::Sub(lhs.into(), rhs.into()),
                }
            }
            Self::Div(lhs, rhs) => {
                let (lhs, rhs) = (lhs.simplify(), rhs.simplify());
                match (&lhs, &rhs) {
                    (Self::Value(a), Self::Value(b)) if *b != 0 => Self::Value(a.div_euclid(*b)),
                    (_, Self::Value(1)) => lhs,
                    _ if lhs == rhs => Self::Value(1),
                    _ => Self::Div(lhs.into(), rhs.into()),
                }
            }
            Self::DivCeil(lhs, rhs) => {
                let (lhs, rhs) = (lhs.simplify(), rhs.simplify());
                match (&lhs, &rhs) {
                    (Self::Value(a), Self::Value(b)) if *b > 0 => {
                        Self::Value((a + b - 1).div_euclid(*b))
                    }
                    (_, Self::Value(1)) => lhs,
                    _ => Self::DivCeil(lhs.into(), rhs.into()),
                }
            }
        }
    }

    /// Flatten a chain of the same associative operation into its terms.
    fn collect_terms(&self, terms: &mut Vec<SymExpr>) {
        let (lhs, rhs) = match self {
            Self::Add(l, r) | Self::Mul(l, r) | Self::Max(l, r) | Self::Min(l, r) => (l, r),
            _ => {
                terms.push(self.clone());
                return;
            }
        };
        for side in [lhs, rhs] {
            if std::mem::discriminant(side.as_ref()) == std::mem::discriminant(self) {
                side.collect_terms(terms);
            } else {
                terms.push(side.as_ref().clone());
            }
        }
    }

    /// Rebuild an associative expression of the same kind as `self` from
    /// simplified terms.
    fn rebuild_associative(&self, terms: Vec<SymExpr>) -> SymExpr {
        let (identity, fold): (Option<i64>, fn(i64, i64) -> i64) = match self {
            Self::Add(..) => (Some(0), |a, b| a.saturating_add(b)),
            Self::Mul(..) => (Some(1), |a, b| a.saturating_mul(b)),
            Self::Max(..) => (None, |a, b| a.max(b)),
            _ => (None, |a, b| a.min(b)),
        };

        // Terms produced by simplification may themselves be chains of the
        // same operation, so flatten again.
        let mut flat = Vec::new();
        for term in terms {
            if std::mem::discriminant(&term) == std::mem::discriminant(self) {
                term.collect_terms(&mut flat);
            } else {
                flat.push(term);
            }
        }

        let mut constant: Option<i64> = None;
        let mut symbolic = Vec::new();
        for term in flat {
            match term {
                Self::Value(v) => constant = Some(constant.map(|c| fold(c, v)).unwrap_or(v)),
                other => symbolic.push(other),
            }
        }

        if matches!(self, Self::Mul(..)) && constant == Some(0) {
            return Self::Value(0);
        }
        symbolic.sort_by(cmp_terms);
        if matches!(self, Self::Max(..) | Self::Min(..)) {
            symbolic.dedup();
        }

        let mut terms = Vec::new();
        if let Some(c) = constant {
            if Some(c) != identity || symbolic.is_empty() {
                terms.push(Self::Value(c));
            }
        }
        terms.extend(symbolic);

        let make = |lhs: SymExpr, rhs: SymExpr| -> SymExpr {
            match self {
                Self::Add(..) => Self::Add(lhs.into(), rhs.into()),
                Self::Mul(..) => Self::Mul(lhs.into(), rhs.into()),
                Self::Max(..) => Self::Max(lhs.into(), rhs.into()),
                _ => Self::Min(lhs.into(), rhs.into()),
            }
        };

        let mut iter = terms.into_iter();
        let Some(first) = iter.next() else {
            return Self::Value(identity.unwrap_or(0));
        };
        iter.fold(first, make)
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Value(_) | Self::Var(_) | Self::Max(..) | Self::Min(..) | Self::DivCeil(..) => 3,
            Self::Mul(..) | Self::Div(..) => 2,
            Self::Add(..) | Self::Sub(..) => 1,
        }
    }
}

/// Sort terms so that values come first, then symbols and composite
/// expressions ordered by their text.
fn cmp_terms(a: &SymExpr, b: &SymExpr) -> Ordering {
    match (a, b) {
        (SymExpr::Value(x), SymExpr::Value(y)) => x.cmp(y),
        (SymExpr::Value(_), _) => Ordering::Less,
        (_, SymExpr::Value(_)) => Ordering::Greater,
        _ => a.to_string().cmp(&b.to_string()),
    }
}

impl Add<SymExpr> for SymExpr {
    type Output = SymExpr;

    fn add(self, rhs: SymExpr) -> Self {
        Self::Add(self.into(), rhs.into()).simplify()
    }
}

impl Sub<SymExpr> for SymExpr {
    type Output = SymExpr;

    fn sub(self, rhs: SymExpr) -> Self {
        Self::Sub(self.into(), rhs.into()).simplify()
    }
}

impl Mul<SymExpr> for SymExpr {
    type Output = SymExpr;

    fn mul(self, rhs: SymExpr) -> Self {
        Self::Mul(self.into(), rhs.into()).simplify()
    }
}

impl Div<SymExpr> for SymExpr {
    type Output = SymExpr;

    fn div(self, rhs: SymExpr) -> Self {
        Self::Div(self.into(), rhs.into()).simplify()
    }
}

impl From<i64> for SymExpr {
    fn from(val: i64) -> Self {
        Self::Value(val)
    }
}

impl<'a> From<&'a str> for SymExpr {
    fn from(name: &'a str) -> Self {
        Self::var(name)
    }
}

impl fmt::Debug for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_operand = |f: &mut fmt::Formatter<'_>, operand: &SymExpr| {
            if operand.precedence() < self.precedence() {
                write!(f, "({})", operand)
            } else {
                write!(f, "{}", operand)
            }
        };
        let write_binop = |f: &mut fmt::Formatter<'_>, lhs: &SymExpr, op: &str, rhs: &SymExpr| {
            write_operand(f, lhs)?;
            write!(f, "{}", op)?;
            // Right operand of a non-commutative operator needs brackets if it
            // has the same precedence.
            if rhs.precedence() <= self.precedence() && matches!(self, Self::Sub(..) | Self::Div(..))
                && !matches!(rhs, Self::Value(_) | Self::Var(_))
            {
                write!(f, "({})", rhs)
            } else {
                write_operand(f, rhs)
            }
        };

        match self {
            Self::Value(v) => write!(f, "{}", v),
            Self::Var(name) => write!(f, "{}", name),
            Self::Add(lhs, rhs) => write_binop(f, lhs, " + ", rhs),
            Self::Sub(lhs, rhs) => write_binop(f, lhs, " - ", rhs),
            Self::Mul(lhs, rhs) => write_binop(f, lhs, "*", rhs),
            Self::Div(lhs, rhs) => write_binop(f, lhs, "/", rhs),
            Self::DivCeil(lhs, rhs) => write!(f, "ceil({}/{})", lhs, rhs),
            Self::Max(lhs, rhs) => write!(f, "max({}, {})", lhs, rhs),
            Self::Min(lhs, rhs) => write!(f, "min({}, {})", lhs, rhs),
        }
    }
}

/// Size of a tensor dimension.
///
/// A dimension is either a fixed size, a symbolic expression (such as a named
/// batch size or a product of named sizes) or unknown.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dim {
    Fixed(u64),
    Symbolic(SymExpr),
    Unknown,
}

impl Dim {
    pub fn symbol(name: &str) -> Dim {
        Dim::Symbolic(SymExpr::var(name))
    }

    /// Create a dimension from an expression, simplifying it first.
    ///
    /// Negative constant values produce [`Dim::Unknown`].
    pub fn from_expr(expr: SymExpr) -> Dim {
        match expr.simplify() {
            SymExpr::Value(v) if v >= 0 => Dim::Fixed(v as u64),
            SymExpr::Value(_) => Dim::Unknown,
            other => Dim::Symbolic(other),
        }
    }

    /// Return this dimension as an expression, unless it is unknown.
    pub fn to_expr(&self) -> Option<SymExpr> {
        match self {
            Dim::Fixed(v) => Some(SymExpr::Value(*v as i64)),
            Dim::Symbolic(expr) => Some(expr.clone()),
            Dim::Unknown => None,
        }
    }

    pub fn fixed(&self) -> Option<u64> {
        match self {
            Dim::Fixed(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, Dim::Fixed(_))
    }

    pub fn from_proto(dim: &onnx::Dimension) -> Dim {
        match (dim.dim_value, dim.dim_param.as_deref()) {
            (Some(v), _) if v >= 0 => Dim::Fixed(v as u64),
            (_, Some(param)) if !param.is_empty() => Dim::symbol(param),
            _ => Dim::Unknown,
        }
    }

    pub fn to_proto(&self) -> onnx::Dimension {
        match self {
            Dim::Fixed(v) => onnx::Dimension {
                dim_value: Some(*v as i64),
                ..Default::default()
            },
            Dim::Symbolic(expr) => onnx::Dimension {
                dim_param: Some(expr.to_string()),
                ..Default::default()
            },
            Dim::Unknown => onnx::Dimension::default(),
        }
    }
}

impl From<u64> for Dim {
    fn from(size: u64) -> Dim {
        Dim::Fixed(size)
    }
}

impl<'a> From<&'a str> for Dim {
    fn from(name: &'a str) -> Dim {
        Dim::symbol(name)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(v) => write!(f, "{}", v),
            Dim::Symbolic(expr) => write!(f, "{}", expr),
            Dim::Unknown => write!(f, "?"),
        }
    }
}

/// Return true if all dimensions in `shape` are fixed.
pub fn is_static(shape: &[Dim]) -> bool {
    shape.iter().all(|d| d.is_fixed())
}

/// Convert a fully fixed shape to sizes.
pub fn fixed_shape(shape: &[Dim]) -> Option<Vec<usize>> {
    shape.iter().map(|d| d.fixed().map(|v| v as usize)).collect()
}

#[cfg(test)]
mod tests {
    use super::{Dim, SymExpr};

    #[test]
    fn test_simplify() {
        struct Case {
            expr: SymExpr,
            expected: SymExpr,
        }

        let a = SymExpr::var("a");
        let b = SymExpr::var("b");

        let cases = [
            Case {
                expr: SymExpr::Value(2) * SymExpr::Value(3),
                expected: SymExpr::Value(6),
            },
            Case {
                expr: a.clone() * SymExpr::Value(1),
                expected: a.clone(),
            },
            Case {
                expr: a.clone() + SymExpr::Value(0),
                expected: a.clone(),
            },
            Case {
                expr: (a.clone() * SymExpr::Value(2)) * SymExpr::Value(3),
                expected: SymExpr::Mul(SymExpr::Value(6).into(), a.clone().into()),
            },
            Case {
                expr: a.clone() - a.clone(),
                expected: SymExpr::Value(0),
            },
            Case {
                expr: SymExpr::Value(7).div_ceil(&SymExpr::Value(2)),
                expected: SymExpr::Value(4),
            },
            Case {
                expr: a.max(&a),
                expected: a.clone(),
            },
        ];

        for Case { expr, expected } in cases {
            assert_eq!(expr.simplify(), expected, "simplifying {}", expr);
        }

        // Commutative operands are ordered, so construction order does not matter.
        assert_eq!(a.clone() * b.clone(), b.clone() * a.clone());
        assert_eq!(a.clone() + b.clone(), b + a);
    }

    #[test]
    fn test_display() {
        let a = SymExpr::var("a");
        let b = SymExpr::var("b");
        assert_eq!((a.clone() * b.clone()).to_string(), "a*b");
        assert_eq!(((a.clone() + b.clone()) * SymExpr::Value(2)).to_string(), "2*(a + b)");
        assert_eq!((a - b).to_string(), "a - b");
    }

    #[test]
    fn test_dim_from_expr() {
        assert_eq!(Dim::from_expr(SymExpr::Value(4) * SymExpr::Value(5)), Dim::Fixed(20));
        assert_eq!(Dim::from_expr(SymExpr::Value(-1)), Dim::Unknown);
        assert_eq!(Dim::from_expr(SymExpr::var("n")), Dim::symbol("n"));
    }
}
