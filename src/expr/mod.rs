//! The expression IR that func definitions are written in.
//!
//! Expressions are plain trees. Reads of other funcs, buffers and params are
//! leaves addressed by arena ids; index arguments of reads are themselves
//! expressions whose value is floored to an integer when evaluated.

pub mod diff;
pub mod display;
pub mod simplify;
pub mod visit;

use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::{
    identity::{BufferId, FuncId, ParamId},
    ops::{BinaryOp, CmpOp, UnaryOp},
};

pub use display::ExprDisplay;
pub use visit::Read;

/// A pure (data-parallel) variable of a func definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(String);

impl Var {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// A reduction variable, iterated sequentially over an `RDom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RVar(String);

impl RVar {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(f64),
    Var(Var),
    RVar(RVar),
    Param(ParamId),
    Call(FuncId, Vec<Expr>),
    Load(BufferId, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Select(Box<Expr>, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(Var::new(name))
    }

    pub fn rvar(name: impl Into<String>) -> Self {
        Expr::RVar(RVar::new(name))
    }

    pub fn call(func: FuncId, args: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Call(func, args.into_iter().collect())
    }

    pub fn load(buffer: BufferId, args: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Load(buffer, args.into_iter().collect())
    }

    pub fn param(param: ParamId) -> Self {
        Expr::Param(param)
    }

    pub fn as_const(&self) -> Option<f64> {
        match self {
            Expr::Const(c) => Some(*c),
            _ => None,
        }
    }

    /// The constant value if it is integral.
    pub fn as_integer(&self) -> Option<i64> {
        self.as_const()
            .filter(|c| c.fract() == 0.0 && c.is_finite())
            .map(|c| c as i64)
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Const(c) if *c == 0.0)
    }

    pub fn is_one(&self) -> bool {
        matches!(self, Expr::Const(c) if *c == 1.0)
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Expr {
        Expr::Cmp(CmpOp::Lt, Box::new(self), Box::new(rhs.into()))
    }

    pub fn le(self, rhs: impl Into<Expr>) -> Expr {
        Expr::Cmp(CmpOp::Le, Box::new(self), Box::new(rhs.into()))
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Expr {
        Expr::Cmp(CmpOp::Gt, Box::new(self), Box::new(rhs.into()))
    }

    pub fn ge(self, rhs: impl Into<Expr>) -> Expr {
        Expr::Cmp(CmpOp::Ge, Box::new(self), Box::new(rhs.into()))
    }

    pub fn equal(self, rhs: impl Into<Expr>) -> Expr {
        Expr::Cmp(CmpOp::Eq, Box::new(self), Box::new(rhs.into()))
    }

    pub fn not_equal(self, rhs: impl Into<Expr>) -> Expr {
        Expr::Cmp(CmpOp::Ne, Box::new(self), Box::new(rhs.into()))
    }

    pub fn and(self, rhs: impl Into<Expr>) -> Expr {
        Expr::And(Box::new(self), Box::new(rhs.into()))
    }

    pub fn or(self, rhs: impl Into<Expr>) -> Expr {
        Expr::Or(Box::new(self), Box::new(rhs.into()))
    }
}

fn unary(op: UnaryOp, a: impl Into<Expr>) -> Expr {
    Expr::Unary(op, Box::new(a.into()))
}

fn binary(op: BinaryOp, a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    Expr::Binary(op, Box::new(a.into()), Box::new(b.into()))
}

pub fn exp(a: impl Into<Expr>) -> Expr {
    unary(UnaryOp::Exp, a)
}

pub fn log(a: impl Into<Expr>) -> Expr {
    unary(UnaryOp::Log, a)
}

pub fn sin(a: impl Into<Expr>) -> Expr {
    unary(UnaryOp::Sin, a)
}

pub fn cos(a: impl Into<Expr>) -> Expr {
    unary(UnaryOp::Cos, a)
}

pub fn tanh(a: impl Into<Expr>) -> Expr {
    unary(UnaryOp::Tanh, a)
}

pub fn sqrt(a: impl Into<Expr>) -> Expr {
    unary(UnaryOp::Sqrt, a)
}

pub fn abs(a: impl Into<Expr>) -> Expr {
    unary(UnaryOp::Abs, a)
}

pub fn floor(a: impl Into<Expr>) -> Expr {
    unary(UnaryOp::Floor, a)
}

pub fn pow(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    binary(BinaryOp::Pow, a, b)
}

pub fn min(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    binary(BinaryOp::Min, a, b)
}

pub fn max(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    binary(BinaryOp::Max, a, b)
}

pub fn clamp(a: impl Into<Expr>, lo: impl Into<Expr>, hi: impl Into<Expr>) -> Expr {
    min(max(a, lo), hi)
}

pub fn select(cond: impl Into<Expr>, t: impl Into<Expr>, f: impl Into<Expr>) -> Expr {
    Expr::Select(
        Box::new(cond.into()),
        Box::new(t.into()),
        Box::new(f.into()),
    )
}

impl From<f64> for Expr {
    fn from(c: f64) -> Self {
        Expr::Const(c)
    }
}

impl From<i32> for Expr {
    fn from(c: i32) -> Self {
        Expr::Const(f64::from(c))
    }
}

impl From<i64> for Expr {
    fn from(c: i64) -> Self {
        Expr::Const(c as f64)
    }
}

impl From<Var> for Expr {
    fn from(v: Var) -> Self {
        Expr::Var(v)
    }
}

impl From<&Var> for Expr {
    fn from(v: &Var) -> Self {
        Expr::Var(v.clone())
    }
}

impl From<RVar> for Expr {
    fn from(v: RVar) -> Self {
        Expr::RVar(v)
    }
}

impl From<&Expr> for Expr {
    fn from(e: &Expr) -> Self {
        e.clone()
    }
}

macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<Expr>> $trait<T> for Expr {
            type Output = Expr;
            fn $method(self, rhs: T) -> Expr {
                binary($op, self, rhs)
            }
        }

        impl<T: Into<Expr>> $trait<T> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: T) -> Expr {
                binary($op, self.clone(), rhs)
            }
        }

        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                binary($op, self, rhs)
            }
        }
    };
}

impl_binary_operator!(Add, add, BinaryOp::Add);
impl_binary_operator!(Sub, sub, BinaryOp::Sub);
impl_binary_operator!(Mul, mul, BinaryOp::Mul);
impl_binary_operator!(Div, div, BinaryOp::Div);

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        unary(UnaryOp::Neg, self)
    }
}

impl Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        unary(UnaryOp::Neg, self.clone())
    }
}
