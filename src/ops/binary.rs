use num_traits::Float;

use crate::{
    expr::{Expr, simplify},
    ops::{BinaryOp, CmpOp, UnaryOp},
};

impl BinaryOp {
    /// forward semantics
    pub fn apply<D: Float>(self, a: D, b: D) -> D {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
            BinaryOp::Pow => a.powf(b),
        }
    }

    /// Local partials `(d op / da, d op / db)`.
    pub fn partials(self, a: &Expr, b: &Expr) -> (Expr, Expr) {
        let one = || Expr::Const(1.0);
        let zero = || Expr::Const(0.0);
        match self {
            BinaryOp::Add => (one(), one()),
            BinaryOp::Sub => (one(), Expr::Const(-1.0)),
            BinaryOp::Mul => (b.clone(), a.clone()),
            BinaryOp::Div => {
                // d/da (a/b) = 1/b, d/db (a/b) = -a / b^2
                let da = simplify::div(one(), b.clone());
                let db = simplify::div(
                    simplify::neg(a.clone()),
                    simplify::mul(b.clone(), b.clone()),
                );
                (da, db)
            }
            BinaryOp::Min => {
                // ties go to the left operand
                let c = simplify::cmp(CmpOp::Le, a.clone(), b.clone());
                (
                    simplify::select(c.clone(), one(), zero()),
                    simplify::select(c, zero(), one()),
                )
            }
            BinaryOp::Max => {
                let c = simplify::cmp(CmpOp::Ge, a.clone(), b.clone());
                (
                    simplify::select(c.clone(), one(), zero()),
                    simplify::select(c, zero(), one()),
                )
            }
            BinaryOp::Pow => {
                // d/da a^b = b * a^(b-1), d/db a^b = a^b * ln(a)
                let da = simplify::mul(
                    b.clone(),
                    simplify::binary(
                        BinaryOp::Pow,
                        a.clone(),
                        simplify::sub(b.clone(), one()),
                    ),
                );
                let db = simplify::mul(
                    simplify::binary(BinaryOp::Pow, a.clone(), b.clone()),
                    simplify::unary(UnaryOp::Log, a.clone()),
                );
                (da, db)
            }
        }
    }
}
