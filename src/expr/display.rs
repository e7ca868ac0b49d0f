use core::fmt::{Display, Formatter, Result as FmtResult};

use crate::{expr::Expr, graph::Graph};

/// Renders an expression with the names the graph gives its funcs, buffers
/// and params.
pub struct ExprDisplay<'a> {
    expr: &'a Expr,
    graph: &'a Graph,
}

impl Expr {
    pub fn display<'a>(&'a self, graph: &'a Graph) -> ExprDisplay<'a> {
        ExprDisplay { expr: self, graph }
    }
}

impl ExprDisplay<'_> {
    fn child<'b>(&'b self, expr: &'b Expr) -> ExprDisplay<'b> {
        ExprDisplay {
            expr,
            graph: self.graph,
        }
    }

    fn list(&self, f: &mut Formatter<'_>, args: &[Expr]) -> FmtResult {
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", self.child(arg))?;
        }
        Ok(())
    }
}

impl Display for ExprDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.expr {
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Var(v) => write!(f, "{}", v.name()),
            Expr::RVar(v) => write!(f, "{}", v.name()),
            Expr::Param(p) => write!(f, "{}", self.graph[*p].name()),
            Expr::Call(func, args) => {
                write!(f, "{}(", self.graph[*func].name())?;
                self.list(f, args)?;
                write!(f, ")")
            }
            Expr::Load(b, args) => {
                write!(f, "{}(", self.graph[*b].name())?;
                self.list(f, args)?;
                write!(f, ")")
            }
            Expr::Unary(op, a) => write!(f, "{}({})", op.name(), self.child(a)),
            Expr::Binary(op, a, b) => match op.symbol() {
                Some(sym) => write!(f, "({} {sym} {})", self.child(a), self.child(b)),
                None => write!(f, "{}({}, {})", op.name(), self.child(a), self.child(b)),
            },
            Expr::Cmp(op, a, b) => {
                write!(f, "({} {} {})", self.child(a), op.symbol(), self.child(b))
            }
            Expr::And(a, b) => write!(f, "({} && {})", self.child(a), self.child(b)),
            Expr::Or(a, b) => write!(f, "({} || {})", self.child(a), self.child(b)),
            Expr::Not(a) => write!(f, "!{}", self.child(a)),
            Expr::Select(c, t, e) => write!(
                f,
                "select({}, {}, {})",
                self.child(c),
                self.child(t),
                self.child(e)
            ),
        }
    }
}
