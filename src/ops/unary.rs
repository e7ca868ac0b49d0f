use num_traits::Float;

use crate::{
    expr::{Expr, simplify},
    ops::{CmpOp, UnaryOp},
};

impl UnaryOp {
    /// forward semantics
    pub fn apply<D: Float>(self, x: D) -> D {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Abs => x.abs(),
            UnaryOp::Floor => x.floor(),
        }
    }

    /// d op(a) / da, as an expression of `a`.
    pub fn derivative(self, a: &Expr) -> Expr {
        match self {
            UnaryOp::Neg => Expr::Const(-1.0),
            UnaryOp::Exp => simplify::unary(UnaryOp::Exp, a.clone()),
            // 1/x
            UnaryOp::Log => simplify::div(Expr::Const(1.0), a.clone()),
            UnaryOp::Sin => simplify::unary(UnaryOp::Cos, a.clone()),
            UnaryOp::Cos => simplify::neg(simplify::unary(UnaryOp::Sin, a.clone())),
            UnaryOp::Tanh => {
                // 1 - tanh(x)^2
                let t = simplify::unary(UnaryOp::Tanh, a.clone());
                simplify::sub(Expr::Const(1.0), simplify::mul(t.clone(), t))
            }
            UnaryOp::Sqrt => {
                simplify::div(Expr::Const(0.5), simplify::unary(UnaryOp::Sqrt, a.clone()))
            }
            UnaryOp::Abs => simplify::select(
                simplify::cmp(CmpOp::Ge, a.clone(), Expr::Const(0.0)),
                Expr::Const(1.0),
                Expr::Const(-1.0),
            ),
            // zero almost everywhere
            UnaryOp::Floor => Expr::Const(0.0),
        }
    }
}
