//! Compile-time constant values and the arithmetic used to fold them.
//!
//! `param` variables, enum constants, and literals carry an [`Immediate`].
//! The post-order fold (see `resolve::fold`) combines immediates with the
//! operator semantics of the target: fixed-width two's-complement integers
//! with wrapping on overflow, IEEE doubles for reals.

use crate::intern::NameId;

/// A constant known at compile time.
///
/// String immediates hold an interned id rather than the text, so copying a
/// subtree never clones string payloads.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Immediate {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Real(f64),
    String(NameId),
}

impl Immediate {
    /// True for the numeric variants.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int(_) | Self::Uint(_) | Self::Real(_))
    }

    /// Converts to `i64` when the value is integral and in range.
    #[must_use]
    pub fn as_int(self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(v),
            Self::Uint(v) => i64::try_from(v).ok(),
            Self::Bool(v) => Some(i64::from(v)),
            _ => None,
        }
    }

    /// Converts to `f64` when the value is numeric.
    #[must_use]
    pub fn as_real(self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(v as f64),
            Self::Uint(v) => Some(v as f64),
            Self::Real(v) => Some(v),
            _ => None,
        }
    }

    /// Truthiness used when folding conditionals over params.
    #[must_use]
    pub fn is_true(self) -> bool {
        match self {
            Self::Bool(v) => v,
            Self::Int(v) => v != 0,
            Self::Uint(v) => v != 0,
            Self::Real(v) => v != 0.0,
            Self::String(_) => true,
        }
    }
}

/// Binary operators the fold understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lsh,
    Rsh,
    BitAnd,
    BitOr,
    BitXor,
    LogAnd,
    LogOr,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Numeric rank used to pick the common type of a binary fold.
fn rank(imm: Immediate) -> u8 {
    match imm {
        Immediate::Bool(_) => 0,
        Immediate::Int(_) => 1,
        Immediate::Uint(_) => 2,
        Immediate::Real(_) => 3,
        Immediate::String(_) => 4,
    }
}

/// Folds a binary operation over two immediates.
///
/// Returns `None` when the operation is not defined for the operand kinds or
/// would trap (integer division by zero); the caller leaves the call in the
/// tree and resolution reports it later if it survives to codegen.
#[must_use]
pub fn fold_binary(op: FoldOp, lhs: Immediate, rhs: Immediate) -> Option<Immediate> {
    use Immediate::{Bool, Int, Real, Uint};

    if let (Immediate::String(a), Immediate::String(b)) = (lhs, rhs) {
        return match op {
            FoldOp::Eq => Some(Bool(a == b)),
            FoldOp::Ne => Some(Bool(a != b)),
            _ => None,
        };
    }

    match op {
        FoldOp::LogAnd => return Some(Bool(lhs.is_true() && rhs.is_true())),
        FoldOp::LogOr => return Some(Bool(lhs.is_true() || rhs.is_true())),
        _ => {}
    }

    // Promote both sides to the wider numeric kind, then fold there.
    let common = rank(lhs).max(rank(rhs));
    match common {
        3 => {
            let a = lhs.as_real()?;
            let b = rhs.as_real()?;
            fold_real(op, a, b)
        }
        2 => {
            // A negative int mixed with uint folds through i64 instead.
            if matches!(lhs, Int(v) if v < 0) || matches!(rhs, Int(v) if v < 0) {
                let a = lhs.as_int()?;
                let b = rhs.as_int()?;
                return fold_int(op, a, b);
            }
            let a = match lhs {
                Uint(v) => v,
                Int(v) => v as u64,
                Bool(v) => u64::from(v),
                _ => return None,
            };
            let b = match rhs {
                Uint(v) => v,
                Int(v) => v as u64,
                Bool(v) => u64::from(v),
                _ => return None,
            };
            fold_uint(op, a, b)
        }
        _ => {
            let a = lhs.as_int()?;
            let b = rhs.as_int()?;
            fold_int(op, a, b)
        }
    }
}

fn fold_int(op: FoldOp, a: i64, b: i64) -> Option<Immediate> {
    use Immediate::{Bool, Int};
    Some(match op {
        FoldOp::Add => Int(a.wrapping_add(b)),
        FoldOp::Sub => Int(a.wrapping_sub(b)),
        FoldOp::Mul => Int(a.wrapping_mul(b)),
        FoldOp::Div => {
            if b == 0 {
                return None;
            }
            Int(a.wrapping_div(b))
        }
        FoldOp::Mod => {
            if b == 0 {
                return None;
            }
            Int(a.wrapping_rem(b))
        }
        FoldOp::Lsh => Int(a.wrapping_shl(b as u32)),
        FoldOp::Rsh => Int(a.wrapping_shr(b as u32)),
        FoldOp::BitAnd => Int(a & b),
        FoldOp::BitOr => Int(a | b),
        FoldOp::BitXor => Int(a ^ b),
        FoldOp::Pow => {
            if b < 0 {
                return None;
            }
            Int(a.wrapping_pow(u32::try_from(b).ok()?))
        }
        FoldOp::Eq => Bool(a == b),
        FoldOp::Ne => Bool(a != b),
        FoldOp::Lt => Bool(a < b),
        FoldOp::Le => Bool(a <= b),
        FoldOp::Gt => Bool(a > b),
        FoldOp::Ge => Bool(a >= b),
        FoldOp::LogAnd | FoldOp::LogOr => return None,
    })
}

fn fold_uint(op: FoldOp, a: u64, b: u64) -> Option<Immediate> {
    use Immediate::{Bool, Uint};
    Some(match op {
        FoldOp::Add => Uint(a.wrapping_add(b)),
        FoldOp::Sub => Uint(a.wrapping_sub(b)),
        FoldOp::Mul => Uint(a.wrapping_mul(b)),
        FoldOp::Div => {
            if b == 0 {
                return None;
            }
            Uint(a / b)
        }
        FoldOp::Mod => {
            if b == 0 {
                return None;
            }
            Uint(a % b)
        }
        FoldOp::Lsh => Uint(a.wrapping_shl(b as u32)),
        FoldOp::Rsh => Uint(a.wrapping_shr(b as u32)),
        FoldOp::BitAnd => Uint(a & b),
        FoldOp::BitOr => Uint(a | b),
        FoldOp::BitXor => Uint(a ^ b),
        FoldOp::Pow => Uint(a.wrapping_pow(u32::try_from(b).ok()?)),
        FoldOp::Eq => Bool(a == b),
        FoldOp::Ne => Bool(a != b),
        FoldOp::Lt => Bool(a < b),
        FoldOp::Le => Bool(a <= b),
        FoldOp::Gt => Bool(a > b),
        FoldOp::Ge => Bool(a >= b),
        FoldOp::LogAnd | FoldOp::LogOr => return None,
    })
}

fn fold_real(op: FoldOp, a: f64, b: f64) -> Option<Immediate> {
    use Immediate::{Bool, Real};
    Some(match op {
        FoldOp::Add => Real(a + b),
        FoldOp::Sub => Real(a - b),
        FoldOp::Mul => Real(a * b),
        FoldOp::Div => Real(a / b),
        FoldOp::Mod => Real(a % b),
        FoldOp::Pow => Real(a.powf(b)),
        FoldOp::Eq => Bool(a == b),
        FoldOp::Ne => Bool(a != b),
        FoldOp::Lt => Bool(a < b),
        FoldOp::Le => Bool(a <= b),
        FoldOp::Gt => Bool(a > b),
        FoldOp::Ge => Bool(a >= b),
        _ => return None,
    })
}

/// Folds a unary operation.
#[must_use]
pub fn fold_unary(op: UnaryFoldOp, operand: Immediate) -> Option<Immediate> {
    use Immediate::{Bool, Int, Real, Uint};
    Some(match (op, operand) {
        (UnaryFoldOp::Neg, Int(v)) => Int(v.wrapping_neg()),
        (UnaryFoldOp::Neg, Real(v)) => Real(-v),
        (UnaryFoldOp::Plus, v) if v.is_numeric() => v,
        (UnaryFoldOp::Not, v) => Bool(!v.is_true()),
        (UnaryFoldOp::BitNot, Int(v)) => Int(!v),
        (UnaryFoldOp::BitNot, Uint(v)) => Uint(!v),
        _ => return None,
    })
}

/// Unary operators the fold understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryFoldOp {
    Neg,
    Plus,
    Not,
    BitNot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_kind_folds_promote() {
        assert_eq!(
            fold_binary(FoldOp::Add, Immediate::Int(2), Immediate::Real(0.5)),
            Some(Immediate::Real(2.5))
        );
        assert_eq!(
            fold_binary(FoldOp::Mul, Immediate::Bool(true), Immediate::Int(7)),
            Some(Immediate::Int(7))
        );
    }

    #[test]
    fn division_by_zero_refuses_to_fold() {
        assert_eq!(fold_binary(FoldOp::Div, Immediate::Int(1), Immediate::Int(0)), None);
        assert_eq!(fold_binary(FoldOp::Mod, Immediate::Uint(1), Immediate::Uint(0)), None);
    }

    #[test]
    fn negative_int_with_uint_folds_signed() {
        assert_eq!(
            fold_binary(FoldOp::Add, Immediate::Int(-1), Immediate::Uint(3)),
            Some(Immediate::Int(2))
        );
    }

    #[test]
    fn comparisons_yield_bools() {
        assert_eq!(
            fold_binary(FoldOp::Lt, Immediate::Int(2), Immediate::Int(3)),
            Some(Immediate::Bool(true))
        );
        assert_eq!(fold_unary(UnaryFoldOp::Not, Immediate::Bool(true)), Some(Immediate::Bool(false)));
    }
}
