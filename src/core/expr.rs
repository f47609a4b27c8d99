//! Predicate expression trees
//!
//! [`Expr`] is a small closed tree that the query compiler lowers to SQL.
//! Build it with [`col`], [`val`], [`captured`] and [`list`] plus the
//! combinator methods:
//!
//! ```
//! use rust_sqlite_orm::core::expr::{col, val};
//!
//! let adults = col("Age").ge(18).and(col("Name").starts_with("A"));
//! let not_deleted = !col("Deleted").eq(true);
//! # let _ = (adults, not_deleted);
//! ```

use crate::core::value::{ColumnType, FieldValue};
use chrono::{Duration, NaiveDateTime};
use rust_decimal::Decimal;
use std::ops::Not;
use uuid::Uuid;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    /// Arithmetic addition, or text concatenation when the left side is text
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOp {
    /// SQL spelling of the operator
    pub fn as_sql(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
        }
    }
}

/// Methods a predicate may call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Like,
    /// Substring test on text, membership test on a list
    Contains,
    StartsWith,
    EndsWith,
    Equals,
    ToLower,
    ToUpper,
    Replace,
    Trim,
    Length,
    Abs,
    /// Any other method; never translatable
    Other(String),
}

/// A predicate or value expression over the columns of one table
#[derive(Debug, Clone)]
pub enum Expr {
    /// A record field, by field name
    Column(String),
    /// Literal constant
    Constant(FieldValue),
    /// Value captured from the surrounding scope
    Captured(FieldValue),
    /// Captured collection, lowered to a parenthesized placeholder list
    List(Vec<FieldValue>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Call {
        method: Method,
        target: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
    Convert {
        operand: Box<Expr>,
        to: ColumnType,
    },
}

/// Reference a record field
pub fn col(field: impl Into<String>) -> Expr {
    Expr::Column(field.into())
}

/// Literal constant
pub fn val(value: impl Into<FieldValue>) -> Expr {
    Expr::Constant(value.into())
}

/// Value captured from the caller's scope
pub fn captured(value: impl Into<FieldValue>) -> Expr {
    Expr::Captured(value.into())
}

/// Captured collection of values
pub fn list<I, V>(values: I) -> Expr
where
    I: IntoIterator<Item = V>,
    V: Into<FieldValue>,
{
    Expr::List(values.into_iter().map(Into::into).collect())
}

/// Static method call such as `like(column, pattern)`
pub fn call(method: Method, args: Vec<Expr>) -> Expr {
    Expr::Call {
        method,
        target: None,
        args,
    }
}

impl Expr {
    fn binary(self, op: BinaryOp, rhs: impl Into<Expr>) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(rhs.into()),
        }
    }

    fn method(self, method: Method, args: Vec<Expr>) -> Expr {
        Expr::Call {
            method,
            target: Some(Box::new(self)),
            args,
        }
    }

    pub fn eq(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Eq, rhs)
    }

    pub fn ne(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Ne, rhs)
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lt, rhs)
    }

    pub fn le(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Le, rhs)
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Gt, rhs)
    }

    pub fn ge(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Ge, rhs)
    }

    pub fn and(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::And, rhs)
    }

    pub fn or(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Or, rhs)
    }

    pub fn bit_and(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::BitAnd, rhs)
    }

    pub fn bit_or(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::BitOr, rhs)
    }

    /// Addition; concatenation when `self` is text
    pub fn plus(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn minus(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Subtract, rhs)
    }

    pub fn times(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Multiply, rhs)
    }

    pub fn divided_by(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Divide, rhs)
    }

    /// SQL `LIKE` against a pattern
    pub fn like(self, pattern: impl Into<Expr>) -> Expr {
        call(Method::Like, vec![self, pattern.into()])
    }

    /// Substring test when `self` is text, membership when `self` is a list
    pub fn contains(self, item: impl Into<Expr>) -> Expr {
        self.method(Method::Contains, vec![item.into()])
    }

    /// Membership of `self` in a list
    pub fn is_in(self, values: Expr) -> Expr {
        call(Method::Contains, vec![values, self])
    }

    pub fn starts_with(self, prefix: impl Into<Expr>) -> Expr {
        self.method(Method::StartsWith, vec![prefix.into()])
    }

    pub fn ends_with(self, suffix: impl Into<Expr>) -> Expr {
        self.method(Method::EndsWith, vec![suffix.into()])
    }

    pub fn equals(self, other: impl Into<Expr>) -> Expr {
        self.method(Method::Equals, vec![other.into()])
    }

    pub fn to_lower(self) -> Expr {
        self.method(Method::ToLower, Vec::new())
    }

    pub fn to_upper(self) -> Expr {
        self.method(Method::ToUpper, Vec::new())
    }

    pub fn replace(self, from: impl Into<Expr>, to: impl Into<Expr>) -> Expr {
        self.method(Method::Replace, vec![from.into(), to.into()])
    }

    pub fn trim(self) -> Expr {
        self.method(Method::Trim, Vec::new())
    }

    pub fn length(self) -> Expr {
        self.method(Method::Length, Vec::new())
    }

    pub fn abs(self) -> Expr {
        self.method(Method::Abs, Vec::new())
    }

    /// Convert to another semantic type
    pub fn convert(self, to: ColumnType) -> Expr {
        Expr::Convert {
            operand: Box::new(self),
            to,
        }
    }
}

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

impl From<FieldValue> for Expr {
    fn from(v: FieldValue) -> Self {
        Expr::Constant(v)
    }
}

macro_rules! constant_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Expr {
                fn from(v: $ty) -> Self {
                    Expr::Constant(FieldValue::from(v))
                }
            }

            impl From<Option<$ty>> for Expr {
                fn from(v: Option<$ty>) -> Self {
                    Expr::Constant(FieldValue::from(v))
                }
            }
        )*
    };
}

constant_from!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    f32,
    f64,
    Decimal,
    String,
    &str,
    Vec<u8>,
    NaiveDateTime,
    Duration,
    Uuid,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_sql() {
        assert_eq!(BinaryOp::Ne.as_sql(), "!=");
        assert_eq!(BinaryOp::And.as_sql(), "AND");
        assert_eq!(BinaryOp::BitOr.as_sql(), "|");
    }

    #[test]
    fn test_combinators_shape() {
        let expr = col("Age").ge(18).and(col("Name").starts_with("A"));
        match expr {
            Expr::Binary { op, left, right } => {
                assert_eq!(op, BinaryOp::And);
                assert!(matches!(*left, Expr::Binary { op: BinaryOp::Ge, .. }));
                assert!(matches!(
                    *right,
                    Expr::Call {
                        method: Method::StartsWith,
                        target: Some(_),
                        ..
                    }
                ));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn test_is_in_puts_list_first() {
        let expr = col("Id").is_in(list([1, 2, 3]));
        match expr {
            Expr::Call {
                method: Method::Contains,
                target: None,
                args,
            } => {
                assert!(matches!(&args[0], Expr::List(items) if items.len() == 3));
                assert!(matches!(&args[1], Expr::Column(name) if name == "Id"));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn test_optional_constant() {
        let expr = col("Name").eq(Option::<String>::None);
        assert!(matches!(
            expr,
            Expr::Binary { right, .. } if matches!(*right, Expr::Constant(FieldValue::Null))
        ));
    }
}
