//! Dependency order over `(func, stage)` pairs.

use std::collections::HashMap;

use crate::{
    error::GraphError,
    graph::{Graph, Stage, Target},
    identity::{BufferId, FuncId, ParamId},
};

/// Producers first: for every dependency `a -> b`, all stages of `b` come
/// before any stage of `a`, and each func's stages ascend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub stages: Vec<(FuncId, Stage)>,
    pub funcs: Vec<FuncId>,
    pub buffers: Vec<BufferId>,
    pub params: Vec<ParamId>,
}

impl Order {
    /// Consumers first, each func's stages descending.
    pub fn reversed(&self) -> impl Iterator<Item = (FuncId, Stage)> + '_ {
        self.stages.iter().rev().copied()
    }

    pub fn contains(&self, func: FuncId) -> bool {
        self.funcs.contains(&func)
    }

    /// Every target reachable from the root.
    pub fn targets(&self) -> impl Iterator<Item = Target> + '_ {
        self.funcs
            .iter()
            .map(|f| Target::Func(*f))
            .chain(self.buffers.iter().map(|b| Target::Buffer(*b)))
            .chain(self.params.iter().map(|p| Target::Param(*p)))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

struct Walker<'g> {
    graph: &'g Graph,
    marks: HashMap<FuncId, Mark>,
    stack: Vec<FuncId>,
    order: Order,
}

impl Walker<'_> {
    fn visit(&mut self, func: FuncId) -> Result<(), GraphError> {
        match self.marks.get(&func) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = self.stack.iter().position(|f| *f == func).unwrap_or(0);
                let path = self.stack[start..]
                    .iter()
                    .chain(std::iter::once(&func))
                    .map(|f| self.graph[*f].name().to_string())
                    .collect();
                return Err(GraphError::Cycle { path });
            }
            None => {}
        }
        let graph = self.graph;
        let f = &graph[func];
        if !f.is_defined() {
            return Err(GraphError::Undefined {
                func: f.name().to_string(),
            });
        }

        self.marks.insert(func, Mark::Visiting);
        self.stack.push(func);
        for (stage, def) in f.definitions() {
            let reads = def
                .lhs
                .iter()
                .chain(std::iter::once(&def.value))
                .flat_map(|e| e.reads());
            for read in reads {
                match read.target {
                    Target::Func(g) if g == func => {
                        if stage == Stage::Initial {
                            return Err(GraphError::SelfReference {
                                func: f.name().to_string(),
                            });
                        }
                    }
                    Target::Func(g) => self.visit(g)?,
                    Target::Buffer(b) => {
                        if !self.order.buffers.contains(&b) {
                            self.order.buffers.push(b);
                        }
                    }
                    Target::Param(p) => {
                        if !self.order.params.contains(&p) {
                            self.order.params.push(p);
                        }
                    }
                }
            }
        }
        self.stack.pop();
        self.marks.insert(func, Mark::Done);

        self.order.funcs.push(func);
        self.order
            .stages
            .extend(f.definitions().map(|(stage, _)| (func, stage)));
        Ok(())
    }
}

/// Depth-first post-order from `root`; ties follow first discovery.
pub fn build_order(graph: &Graph, root: FuncId) -> Result<Order, GraphError> {
    let mut walker = Walker {
        graph,
        marks: HashMap::new(),
        stack: vec![],
        order: Order {
            stages: vec![],
            funcs: vec![],
            buffers: vec![],
            params: vec![],
        },
    };
    walker.visit(root)?;
    log::trace!(
        "order from `{}`: {} funcs, {} stages",
        graph[root].name(),
        walker.order.funcs.len(),
        walker.order.stages.len()
    );
    Ok(walker.order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{expr::Expr, graph::RDom};

    fn x() -> Expr {
        Expr::var("x")
    }

    #[test]
    fn test_producers_precede_consumers() {
        let mut g = Graph::new();
        let input = g.buffer("input", &[4]);
        let a = g.func("a", &["x"]);
        g.define(a, Expr::load(input, [x()]));
        let b = g.func("b", &["x"]);
        g.define(b, Expr::call(a, [x()]) * 2.0);
        let c = g.func("c", &["x"]);
        g.define(c, Expr::call(a, [x()]) + Expr::call(b, [x()]));

        let order = build_order(&g, c).unwrap();
        assert_eq!(order.funcs, vec![a, b, c]);
        assert_eq!(order.buffers, vec![input]);
        assert!(order.params.is_empty());
    }

    #[test]
    fn test_stages_ascend_and_reverse_descends() {
        let mut g = Graph::new();
        let f = g.func("f", &["x"]);
        g.define(f, 0.0);
        let r = RDom::new([("r", 0, 3)]);
        g.update_over(f, vec![r.x()], Expr::call(f, [r.x()]) + 1.0, r);
        g.update(f, vec![x()], Expr::call(f, [x()]) * 2.0);

        let order = build_order(&g, f).unwrap();
        assert_eq!(
            order.stages,
            vec![(f, Stage::Initial), (f, Stage::Update(0)), (f, Stage::Update(1))]
        );
        let rev: Vec<_> = order.reversed().map(|(_, s)| s).collect();
        assert_eq!(rev, vec![Stage::Update(1), Stage::Update(0), Stage::Initial]);
    }

    #[test]
    fn test_index_reads_are_dependencies() {
        let mut g = Graph::new();
        let idx = g.buffer("idx", &[4]);
        let table = g.func("table", &["i"]);
        g.define(table, Expr::var("i") * 3.0);
        let out = g.func("out", &["x"]);
        g.define(out, Expr::call(table, [Expr::load(idx, [x()])]));

        let order = build_order(&g, out).unwrap();
        assert_eq!(order.funcs, vec![table, out]);
        assert_eq!(order.buffers, vec![idx]);
    }

    #[test]
    fn test_cycle_is_reported_with_path() {
        let mut g = Graph::new();
        let a = g.func("a", &["x"]);
        let b = g.func("b", &["x"]);
        g.define(a, Expr::call(b, [x()]));
        g.define(b, Expr::call(a, [x() + 1]));

        let err = build_order(&g, a).unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle {
                path: vec!["a".into(), "b".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_self_reference_in_initial_definition() {
        let mut g = Graph::new();
        let f = g.func("f", &["x"]);
        g.define(f, Expr::call(f, [x() - 1]));
        assert!(matches!(
            build_order(&g, f),
            Err(GraphError::SelfReference { .. })
        ));
    }

    #[test]
    fn test_undefined_func() {
        let mut g = Graph::new();
        let a = g.func("a", &["x"]);
        let b = g.func("b", &["x"]);
        g.define(b, Expr::call(a, [x()]));
        assert_eq!(
            build_order(&g, b).unwrap_err(),
            GraphError::Undefined { func: "a".into() }
        );
    }
}
