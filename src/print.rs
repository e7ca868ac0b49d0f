//! Human-readable dump of a func and everything it calls.

use std::collections::{BTreeMap, HashSet};

use itertools::Itertools;

use crate::{
    expr::{Expr, Var},
    graph::{Func, Graph, Origin, Stage, Target, rdom_display},
    identity::FuncId,
};

#[derive(Debug, Clone)]
pub struct PrintOptions {
    /// Skip funcs that were not synthesized by differentiation.
    pub ignore_non_adjoints: bool,
    /// Show bounded adjoints without their boundary `select`.
    pub ignore_bc: bool,
    /// How many levels of called funcs to follow; `-1` follows all.
    pub depth: i32,
    /// Variables replaced by expressions in the output.
    pub variables: BTreeMap<String, Expr>,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            ignore_non_adjoints: false,
            ignore_bc: false,
            depth: -1,
            variables: BTreeMap::new(),
        }
    }
}

fn strip_boundary(func: &Func, value: &Expr) -> Expr {
    match (func.origin(), value) {
        (Origin::Adjoint { bounded: true, .. }, Expr::Select(_, body, otherwise)) if otherwise.is_zero() => {
            body.as_ref().clone()
        }
        _ => value.clone(),
    }
}

pub fn render_func(graph: &Graph, func: FuncId, options: &PrintOptions) -> String {
    let substitutions: BTreeMap<Var, Expr> = options
        .variables
        .iter()
        .map(|(name, e)| (Var::new(name.as_str()), e.clone()))
        .collect();
    let show = |e: &Expr| e.substitute(&substitutions).display(graph).to_string();

    let mut out = String::new();
    let mut seen = HashSet::new();
    let mut stack = vec![(func, 0)];
    while let Some((id, level)) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        let f = &graph[id];
        if !options.ignore_non_adjoints || f.origin().is_derivative() {
            for (stage, def) in f.definitions() {
                let lhs = def.lhs.iter().map(&show).join(", ");
                let value = if options.ignore_bc && stage == Stage::Initial {
                    strip_boundary(f, &def.value)
                } else {
                    def.value.clone()
                };
                out.push_str(&format!("{}({lhs}) = {}", f.name(), show(&value)));
                if let Some(rdom) = &def.rdom {
                    out.push_str(&format!(" over {}", rdom_display(rdom)));
                }
                out.push('\n');
            }
        }
        if options.depth >= 0 && level >= options.depth {
            continue;
        }
        // reversed so that callees pop in discovery order
        let callees: Vec<FuncId> = f
            .definitions()
            .flat_map(|(_, def)| {
                def.lhs
                    .iter()
                    .chain(std::iter::once(&def.value))
                    .flat_map(|e| e.reads())
                    .collect::<Vec<_>>()
            })
            .filter_map(|r| match r.target {
                Target::Func(g) if g != id => Some(g),
                _ => None,
            })
            .unique()
            .collect();
        stack.extend(callees.into_iter().rev().map(|g| (g, level + 1)));
    }
    out
}

/// Write [`render_func`] to stdout.
pub fn print_func(graph: &Graph, func: FuncId, options: &PrintOptions) {
    print!("{}", render_func(graph, func, options));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backward::propagate_scalar_adjoints;

    fn sample() -> (Graph, FuncId, FuncId) {
        let mut g = Graph::new();
        let input = g.buffer("input", &[3]);
        let a = g.func("a", &["x"]);
        g.define(a, Expr::load(input, [Expr::var("x")]) * 2.0);
        let b = g.func("b", &["x"]);
        g.define(b, Expr::call(a, [Expr::var("x")]) + 1.0);
        (g, a, b)
    }

    #[test]
    fn test_render_follows_calls() {
        let (g, _, b) = sample();
        let text = render_func(&g, b, &PrintOptions::default());
        assert_eq!(text, "b(x) = (a(x) + 1)\na(x) = (input(x) * 2)\n");
    }

    #[test]
    fn test_depth_limits_recursion() {
        let (g, _, b) = sample();
        let options = PrintOptions {
            depth: 0,
            ..Default::default()
        };
        assert_eq!(render_func(&g, b, &options), "b(x) = (a(x) + 1)\n");
    }

    #[test]
    fn test_variables_are_substituted() {
        let (g, a, _) = sample();
        let options = PrintOptions {
            variables: BTreeMap::from([("x".to_string(), Expr::from(2))]),
            ..Default::default()
        };
        assert_eq!(render_func(&g, a, &options), "a(2) = (input(2) * 2)\n");
    }

    #[test]
    fn test_adjoint_printing_options() {
        let mut g = Graph::new();
        let input = g.buffer("input", &[2]);
        let f = g.func("f", &[]);
        g.define(f, Expr::load(input, [Expr::from(0)]) * 3.0);
        let d = propagate_scalar_adjoints(&g, f).unwrap();
        let di = d.buffer(input).unwrap();

        let full = render_func(d.graph(), di, &PrintOptions::default());
        assert!(full.starts_with("input_d(i0) = select("));
        assert!(full.contains("f_d() = 1"));

        let options = PrintOptions {
            ignore_bc: true,
            ignore_non_adjoints: true,
            ..Default::default()
        };
        let bare = render_func(d.graph(), di, &options);
        assert!(bare.starts_with("input_d(i0) = select((i0 == 0), (3 * f_d()), 0)"));
        assert!(!bare.contains("f("));
    }
}
