//! Symbolic derivatives of a single expression with respect to the reads it
//! contains. Index arguments of reads are treated as constants.

use crate::expr::{Expr, Read, simplify};

/// `d expr / d read`, summed over identical occurrences of `read`.
#[derive(Debug, Clone, PartialEq)]
pub struct Partial {
    pub read: Read,
    pub partial: Expr,
}

/// Reverse accumulation through `expr`, seeded with 1.
///
/// Reads whose partial simplifies to zero are left out, the order of the
/// result follows the first occurrence of each read.
pub fn partials(expr: &Expr) -> Vec<Partial> {
    let mut out = vec![];
    accumulate(expr, Expr::Const(1.0), &mut out);
    out.retain(|p| !p.partial.is_zero());
    out
}

fn accumulate(expr: &Expr, adjoint: Expr, out: &mut Vec<Partial>) {
    if adjoint.is_zero() {
        return;
    }
    match expr {
        Expr::Const(_) | Expr::Var(_) | Expr::RVar(_) => {}
        Expr::Call(..) | Expr::Load(..) | Expr::Param(_) => {
            let read = match expr.reads().into_iter().next() {
                Some(read) => read,
                None => return,
            };
            match out.iter_mut().find(|p| p.read == read) {
                Some(existing) => {
                    let prev = std::mem::replace(&mut existing.partial, Expr::Const(0.0));
                    existing.partial = simplify::add(prev, adjoint);
                }
                None => out.push(Partial {
                    read,
                    partial: adjoint,
                }),
            }
        }
        Expr::Unary(op, a) => accumulate(a, simplify::mul(adjoint, op.derivative(a)), out),
        Expr::Binary(op, a, b) => {
            let (da, db) = op.partials(a, b);
            accumulate(a, simplify::mul(adjoint.clone(), da), out);
            accumulate(b, simplify::mul(adjoint, db), out);
        }
        // piecewise constant
        Expr::Cmp(..) | Expr::And(..) | Expr::Or(..) | Expr::Not(_) => {}
        Expr::Select(c, t, f) => {
            let c = simplify::simplify(c);
            accumulate(
                t,
                simplify::select(c.clone(), adjoint.clone(), Expr::Const(0.0)),
                out,
            );
            accumulate(f, simplify::select(c, Expr::Const(0.0), adjoint), out);
        }
    }
}

/// Forward accumulation: the directional derivative of `expr` when every
/// read `r` moves along `tangent_of(r)`. Reads without a tangent are constant.
pub fn tangent(expr: &Expr, tangent_of: &mut impl FnMut(&Read) -> Option<Expr>) -> Expr {
    match expr {
        Expr::Const(_) | Expr::Var(_) | Expr::RVar(_) => Expr::Const(0.0),
        Expr::Call(..) | Expr::Load(..) | Expr::Param(_) => expr
            .reads()
            .into_iter()
            .next()
            .and_then(|read| tangent_of(&read))
            .unwrap_or(Expr::Const(0.0)),
        Expr::Unary(op, a) => simplify::mul(op.derivative(a), tangent(a, tangent_of)),
        Expr::Binary(op, a, b) => {
            let (da, db) = op.partials(a, b);
            let ta = tangent(a, tangent_of);
            let tb = tangent(b, tangent_of);
            simplify::add(simplify::mul(da, ta), simplify::mul(db, tb))
        }
        Expr::Cmp(..) | Expr::And(..) | Expr::Or(..) | Expr::Not(_) => Expr::Const(0.0),
        Expr::Select(c, t, f) => simplify::select(
            simplify::simplify(c),
            tangent(t, tangent_of),
            tangent(f, tangent_of),
        ),
    }
}
