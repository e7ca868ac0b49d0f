//! Traversal and substitution over expression trees.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    expr::{Expr, RVar, Var},
    graph::Target,
    identity::FuncId,
};

/// One read of a func, buffer or param together with its index arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Read {
    pub target: Target,
    pub args: Vec<Expr>,
}

impl Read {
    pub fn new(target: Target, args: Vec<Expr>) -> Self {
        Self { target, args }
    }

    /// The read as an expression.
    pub fn to_expr(&self) -> Expr {
        match self.target {
            Target::Func(f) => Expr::Call(f, self.args.clone()),
            Target::Buffer(b) => Expr::Load(b, self.args.clone()),
            Target::Param(p) => Expr::Param(p),
        }
    }
}

impl Expr {
    /// Direct children in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Const(_) | Expr::Var(_) | Expr::RVar(_) | Expr::Param(_) => vec![],
            Expr::Call(_, args) | Expr::Load(_, args) => args.iter().collect(),
            Expr::Unary(_, a) | Expr::Not(a) => vec![a],
            Expr::Binary(_, a, b) | Expr::Cmp(_, a, b) | Expr::And(a, b) | Expr::Or(a, b) => {
                vec![a, b]
            }
            Expr::Select(c, t, f) => vec![c, t, f],
        }
    }

    /// Visit every read in pre-order, including reads nested in index arguments.
    pub fn for_each_read(&self, visit: &mut impl FnMut(Target, &[Expr])) {
        match self {
            Expr::Call(f, args) => visit(Target::Func(*f), args),
            Expr::Load(b, args) => visit(Target::Buffer(*b), args),
            Expr::Param(p) => visit(Target::Param(*p), &[]),
            _ => {}
        }
        for child in self.children() {
            child.for_each_read(visit);
        }
    }

    pub fn reads(&self) -> Vec<Read> {
        let mut out = vec![];
        self.for_each_read(&mut |target, args| out.push(Read::new(target, args.to_vec())));
        out
    }

    pub fn reads_target(&self, target: Target) -> bool {
        let mut found = false;
        self.for_each_read(&mut |t, _| found |= t == target);
        found
    }

    pub fn for_each_node(&self, visit: &mut impl FnMut(&Expr)) {
        visit(self);
        for child in self.children() {
            child.for_each_node(visit);
        }
    }

    pub fn free_vars(&self) -> BTreeSet<Var> {
        let mut out = BTreeSet::new();
        self.for_each_node(&mut |e| {
            if let Expr::Var(v) = e {
                out.insert(v.clone());
            }
        });
        out
    }

    pub fn uses_var(&self, var: &Var) -> bool {
        let mut found = false;
        self.for_each_node(&mut |e| found |= matches!(e, Expr::Var(v) if v == var));
        found
    }

    pub fn uses_rvars(&self) -> bool {
        let mut found = false;
        self.for_each_node(&mut |e| found |= matches!(e, Expr::RVar(_)));
        found
    }

    /// Rebuild the tree top-down; wherever `f` returns a replacement it is
    /// used as-is and not visited further.
    pub fn rewrite(&self, f: &mut impl FnMut(&Expr) -> Option<Expr>) -> Expr {
        if let Some(replaced) = f(self) {
            return replaced;
        }
        let mut go = |e: &Expr| Box::new(e.rewrite(&mut *f));
        match self {
            Expr::Const(_) | Expr::Var(_) | Expr::RVar(_) | Expr::Param(_) => self.clone(),
            Expr::Call(func, args) => Expr::Call(*func, args.iter().map(|a| *go(a)).collect()),
            Expr::Load(b, args) => Expr::Load(*b, args.iter().map(|a| *go(a)).collect()),
            Expr::Unary(op, a) => Expr::Unary(*op, go(a)),
            Expr::Binary(op, a, b) => Expr::Binary(*op, go(a), go(b)),
            Expr::Cmp(op, a, b) => Expr::Cmp(*op, go(a), go(b)),
            Expr::And(a, b) => Expr::And(go(a), go(b)),
            Expr::Or(a, b) => Expr::Or(go(a), go(b)),
            Expr::Not(a) => Expr::Not(go(a)),
            Expr::Select(c, t, e) => Expr::Select(go(c), go(t), go(e)),
        }
    }

    /// Simultaneous substitution of pure variables.
    pub fn substitute(&self, map: &BTreeMap<Var, Expr>) -> Expr {
        if map.is_empty() {
            return self.clone();
        }
        self.rewrite(&mut |e| match e {
            Expr::Var(v) => map.get(v).cloned(),
            _ => None,
        })
    }

    pub fn substitute_var(&self, var: &Var, value: &Expr) -> Expr {
        self.rewrite(&mut |e| match e {
            Expr::Var(v) if v == var => Some(value.clone()),
            _ => None,
        })
    }

    /// Simultaneous substitution of reduction variables.
    pub fn substitute_rvars(&self, map: &BTreeMap<RVar, Expr>) -> Expr {
        if map.is_empty() {
            return self.clone();
        }
        self.rewrite(&mut |e| match e {
            Expr::RVar(v) => map.get(v).cloned(),
            _ => None,
        })
    }

    /// Redirect every call of `from` (including calls nested in arguments) to `to`.
    pub fn replace_calls(&self, from: FuncId, to: FuncId) -> Expr {
        if from == to {
            return self.clone();
        }
        self.rewrite(&mut |e| match e {
            Expr::Call(f, args) if *f == from => Some(Expr::Call(
                to,
                args.iter().map(|a| a.replace_calls(from, to)).collect(),
            )),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{BufferId, ParamId};

    #[test]
    fn test_reads_are_preorder_and_include_index_reads() {
        let f = FuncId(0);
        let b = BufferId(0);
        let e = Expr::call(f, [Expr::load(b, [Expr::var("x")])]) + Expr::param(ParamId(1));
        let targets: Vec<Target> = e.reads().into_iter().map(|r| r.target).collect();
        assert_eq!(
            targets,
            vec![
                Target::Func(f),
                Target::Buffer(b),
                Target::Param(ParamId(1))
            ]
        );
    }

    #[test]
    fn test_substitution_is_simultaneous() {
        let (x, y) = (Var::new("x"), Var::new("y"));
        let e = Expr::var("x") - Expr::var("y");
        let map = BTreeMap::from([(x, Expr::var("y")), (y, Expr::var("x"))]);
        assert_eq!(e.substitute(&map), Expr::var("y") - Expr::var("x"));
    }

    #[test]
    fn test_replace_calls_reaches_arguments() {
        let (f, g) = (FuncId(0), FuncId(1));
        let e = Expr::call(f, [Expr::call(f, [Expr::var("x")])]);
        let r = e.replace_calls(f, g);
        assert_eq!(r, Expr::call(g, [Expr::call(g, [Expr::var("x")])]));
        assert!(!r.reads_target(Target::Func(f)));
    }

    #[test]
    fn test_free_vars() {
        let e = Expr::var("x") * Expr::rvar("r") + Expr::var("y");
        let vars: Vec<String> = e.free_vars().iter().map(|v| v.name().to_string()).collect();
        assert_eq!(vars, vec!["x", "y"]);
        assert!(e.uses_rvars());
    }
}
