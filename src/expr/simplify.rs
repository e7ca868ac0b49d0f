//! Smart constructors with constant folding and algebraic identities.
//!
//! The derivative passes build every expression through these so that
//! trivially-zero contributions vanish instead of piling up as `0 * x` trees.

use crate::{
    expr::Expr,
    ops::{BinaryOp, CmpOp, UnaryOp},
};

fn bool_const(b: bool) -> Expr {
    Expr::Const(if b { 1.0 } else { 0.0 })
}

pub fn unary(op: UnaryOp, a: Expr) -> Expr {
    match a {
        Expr::Const(c) => Expr::Const(op.apply(c)),
        Expr::Unary(UnaryOp::Neg, inner) if op == UnaryOp::Neg => *inner,
        other => Expr::Unary(op, Box::new(other)),
    }
}

pub fn neg(a: Expr) -> Expr {
    unary(UnaryOp::Neg, a)
}

pub fn binary(op: BinaryOp, a: Expr, b: Expr) -> Expr {
    match op {
        BinaryOp::Add => add(a, b),
        BinaryOp::Sub => sub(a, b),
        BinaryOp::Mul => mul(a, b),
        BinaryOp::Div => div(a, b),
        _ => match (a.as_const(), b.as_const()) {
            (Some(x), Some(y)) => Expr::Const(op.apply(x, y)),
            _ if op == BinaryOp::Pow && b.is_one() => a,
            _ if op == BinaryOp::Pow && b.is_zero() => Expr::Const(1.0),
            _ => Expr::Binary(op, Box::new(a), Box::new(b)),
        },
    }
}

pub fn add(a: Expr, b: Expr) -> Expr {
    match (a.as_const(), b.as_const()) {
        (Some(x), Some(y)) => Expr::Const(x + y),
        _ if a.is_zero() => b,
        _ if b.is_zero() => a,
        _ => Expr::Binary(BinaryOp::Add, Box::new(a), Box::new(b)),
    }
}

pub fn sub(a: Expr, b: Expr) -> Expr {
    match (a.as_const(), b.as_const()) {
        (Some(x), Some(y)) => Expr::Const(x - y),
        _ if b.is_zero() => a,
        _ if a.is_zero() => neg(b),
        _ => Expr::Binary(BinaryOp::Sub, Box::new(a), Box::new(b)),
    }
}

pub fn mul(a: Expr, b: Expr) -> Expr {
    match (a.as_const(), b.as_const()) {
        (Some(x), Some(y)) => Expr::Const(x * y),
        _ if a.is_zero() || b.is_zero() => Expr::Const(0.0),
        _ if a.is_one() => b,
        _ if b.is_one() => a,
        (Some(c), _) if c == -1.0 => neg(b),
        (_, Some(c)) if c == -1.0 => neg(a),
        _ => Expr::Binary(BinaryOp::Mul, Box::new(a), Box::new(b)),
    }
}

pub fn div(a: Expr, b: Expr) -> Expr {
    match (a.as_const(), b.as_const()) {
        (Some(x), Some(y)) if y != 0.0 => Expr::Const(x / y),
        _ if a.is_zero() => Expr::Const(0.0),
        _ if b.is_one() => a,
        _ => Expr::Binary(BinaryOp::Div, Box::new(a), Box::new(b)),
    }
}

pub fn cmp(op: CmpOp, a: Expr, b: Expr) -> Expr {
    match (a.as_const(), b.as_const()) {
        (Some(x), Some(y)) => bool_const(op.apply(x, y)),
        _ => Expr::Cmp(op, Box::new(a), Box::new(b)),
    }
}

pub fn and(a: Expr, b: Expr) -> Expr {
    match (a.as_const(), b.as_const()) {
        (Some(x), _) if x == 0.0 => Expr::Const(0.0),
        (_, Some(y)) if y == 0.0 => Expr::Const(0.0),
        (Some(_), _) => b,
        (_, Some(_)) => a,
        _ => Expr::And(Box::new(a), Box::new(b)),
    }
}

pub fn or(a: Expr, b: Expr) -> Expr {
    match (a.as_const(), b.as_const()) {
        (Some(x), _) if x != 0.0 => Expr::Const(1.0),
        (_, Some(y)) if y != 0.0 => Expr::Const(1.0),
        (Some(_), _) => b,
        (_, Some(_)) => a,
        _ => Expr::Or(Box::new(a), Box::new(b)),
    }
}

pub fn not(a: Expr) -> Expr {
    match a.as_const() {
        Some(x) => bool_const(x == 0.0),
        None => Expr::Not(Box::new(a)),
    }
}

pub fn select(cond: Expr, t: Expr, f: Expr) -> Expr {
    match cond.as_const() {
        Some(c) if c != 0.0 => t,
        Some(_) => f,
        None if t == f => t,
        None => Expr::Select(Box::new(cond), Box::new(t), Box::new(f)),
    }
}

/// Conjunction of all `terms`; an empty list is `true`.
pub fn all(terms: impl IntoIterator<Item = Expr>) -> Expr {
    terms.into_iter().fold(Expr::Const(1.0), and)
}

/// Sum of all `terms`; an empty list is `0`.
pub fn sum(terms: impl IntoIterator<Item = Expr>) -> Expr {
    terms.into_iter().fold(Expr::Const(0.0), add)
}

/// Rebuild `expr` bottom-up through the smart constructors.
pub fn simplify(expr: &Expr) -> Expr {
    match expr {
        Expr::Const(_) | Expr::Var(_) | Expr::RVar(_) | Expr::Param(_) => expr.clone(),
        Expr::Call(f, args) => Expr::Call(*f, args.iter().map(simplify).collect()),
        Expr::Load(b, args) => Expr::Load(*b, args.iter().map(simplify).collect()),
        Expr::Unary(op, a) => unary(*op, simplify(a)),
        Expr::Binary(op, a, b) => binary(*op, simplify(a), simplify(b)),
        Expr::Cmp(op, a, b) => cmp(*op, simplify(a), simplify(b)),
        Expr::And(a, b) => and(simplify(a), simplify(b)),
        Expr::Or(a, b) => or(simplify(a), simplify(b)),
        Expr::Not(a) => not(simplify(a)),
        Expr::Select(c, t, f) => select(simplify(c), simplify(t), simplify(f)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_constants() {
        let e = Expr::from(2.0) * 3.0 + 1.0;
        assert_eq!(simplify(&e), Expr::Const(7.0));
    }

    #[test]
    fn test_identities() {
        let x = Expr::var("x");
        assert_eq!(mul(Expr::Const(1.0), x.clone()), x);
        assert_eq!(mul(x.clone(), Expr::Const(0.0)), Expr::Const(0.0));
        assert_eq!(add(Expr::Const(0.0), x.clone()), x);
        assert_eq!(neg(neg(x.clone())), x);
        assert_eq!(sub(Expr::Const(0.0), x.clone()), neg(x.clone()));
        assert_eq!(div(x.clone(), Expr::Const(1.0)), x);
    }

    #[test]
    fn test_select_folding() {
        let x = Expr::var("x");
        let c = x.clone().lt(3);
        assert_eq!(select(Expr::Const(1.0), x.clone(), Expr::Const(0.0)), x);
        assert_eq!(select(c.clone(), x.clone(), x.clone()), x);
        assert!(matches!(
            select(c, x, Expr::Const(0.0)),
            Expr::Select(_, _, _)
        ));
    }

    #[test]
    fn test_logic_folding() {
        let c = Expr::var("x").lt(1);
        assert_eq!(all([]), Expr::Const(1.0));
        assert_eq!(all([Expr::Const(1.0), c.clone()]), c);
        assert_eq!(and(c.clone(), Expr::Const(0.0)), Expr::Const(0.0));
        assert_eq!(or(c, Expr::Const(1.0)), Expr::Const(1.0));
        assert_eq!(not(Expr::Const(0.0)), Expr::Const(1.0));
    }

    #[test]
    fn test_comparison_folding() {
        assert_eq!(cmp(CmpOp::Le, Expr::Const(1.0), Expr::Const(2.0)), Expr::Const(1.0));
        assert_eq!(cmp(CmpOp::Gt, Expr::Const(1.0), Expr::Const(2.0)), Expr::Const(0.0));
    }
}
