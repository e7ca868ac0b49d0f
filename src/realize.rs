//! Reference interpreter for graphs.
//!
//! Funcs without updates are evaluated lazily point by point; funcs with
//! updates are computed over their whole inferred region. Updates without a
//! reduction domain read the values from before the update; updates with one
//! run sequentially, pure variables outermost and the first reduction
//! dimension innermost.

use std::collections::HashMap;

use ndarray::IxDyn;

use crate::{
    Floating,
    bounds::{Domain, Regions, infer_bounds},
    context::{Context, TensorData},
    error::{GraphError, RealizeError},
    expr::{Expr, RVar, Var},
    graph::{Graph, RDom, Stage},
    identity::FuncId,
    order::build_order,
};

#[derive(Debug, Default)]
struct Env {
    vars: Vec<(Var, i64)>,
    rvars: Vec<(RVar, i64)>,
}

impl Env {
    fn var(&self, v: &Var) -> Option<i64> {
        self.vars.iter().find(|(w, _)| w == v).map(|(_, i)| *i)
    }

    fn rvar(&self, v: &RVar) -> Option<i64> {
        self.rvars.iter().find(|(w, _)| w == v).map(|(_, i)| *i)
    }
}

struct Storage<D> {
    domain: Domain,
    data: TensorData<D>,
}

impl<D: Floating> Storage<D> {
    fn get(&self, index: &[i64]) -> Option<D> {
        let offset = self.domain.offset(index)?;
        Some(self.data[IxDyn(&offset)])
    }

    fn set(&mut self, index: &[i64], value: D) -> bool {
        match self.domain.offset(index) {
            Some(offset) => {
                self.data[IxDyn(&offset)] = value;
                true
            }
            None => false,
        }
    }
}

/// Iteration order of a reduction domain: first dimension fastest.
fn rdom_points(rdom: Option<&RDom>) -> Vec<Vec<i64>> {
    let Some(rdom) = rdom else {
        return vec![vec![]];
    };
    let reversed = Domain::new(rdom.dims().iter().rev().map(|(_, i)| *i).collect());
    reversed
        .points()
        .into_iter()
        .map(|mut p| {
            p.reverse();
            p
        })
        .collect()
}

fn to_tensor<D>(name: &str, domain: &Domain, values: Vec<D>) -> Result<TensorData<D>, RealizeError> {
    let shape = domain.shape();
    let found = vec![values.len()];
    TensorData::from_shape_vec(IxDyn(&shape), values).map_err(|_| RealizeError::ShapeMismatch {
        name: name.to_string(),
        expected: shape,
        found,
    })
}

struct Interpreter<'a, D> {
    graph: &'a Graph,
    ctx: &'a Context<D>,
    regions: Regions,
    materialized: HashMap<FuncId, Storage<D>>,
    memo: HashMap<(FuncId, Vec<i64>), D>,
}

impl<D: Floating> Interpreter<'_, D> {
    fn constant(c: f64) -> D {
        num_traits::cast(c).unwrap_or_else(D::nan)
    }

    fn index(&mut self, args: &[Expr], env: &Env) -> Result<Vec<i64>, RealizeError> {
        args.iter()
            .map(|a| {
                let v = self.eval(a, env)?;
                Ok(v.floor().to_i64().unwrap_or(i64::MIN))
            })
            .collect()
    }

    fn eval(&mut self, expr: &Expr, env: &Env) -> Result<D, RealizeError> {
        let truth = |b: bool| if b { D::one() } else { D::zero() };
        Ok(match expr {
            Expr::Const(c) => Self::constant(*c),
            Expr::Var(v) => {
                let i = env.var(v).ok_or_else(|| RealizeError::UnboundVariable {
                    name: v.name().to_string(),
                })?;
                Self::constant(i as f64)
            }
            Expr::RVar(v) => {
                let i = env.rvar(v).ok_or_else(|| RealizeError::UnboundVariable {
                    name: v.name().to_string(),
                })?;
                Self::constant(i as f64)
            }
            Expr::Param(p) => *self.ctx.param(self.graph, *p)?,
            Expr::Load(b, args) => {
                let index = self.index(args, env)?;
                let decl = &self.graph[*b];
                let data = self.ctx.checked_get(self.graph, *b)?;
                let offset = decl
                    .domain()
                    .offset(&index)
                    .ok_or_else(|| RealizeError::OutOfBounds {
                        name: decl.name().to_string(),
                        index: index.clone(),
                    })?;
                data[IxDyn(&offset)]
            }
            Expr::Call(f, args) => {
                let index = self.index(args, env)?;
                self.call(*f, index)?
            }
            Expr::Unary(op, a) => op.apply(self.eval(a, env)?),
            Expr::Binary(op, a, b) => {
                let a = self.eval(a, env)?;
                op.apply(a, self.eval(b, env)?)
            }
            Expr::Cmp(op, a, b) => {
                let a = self.eval(a, env)?;
                truth(op.apply(a, self.eval(b, env)?))
            }
            Expr::And(a, b) => {
                let a = !self.eval(a, env)?.is_zero();
                truth(a && !self.eval(b, env)?.is_zero())
            }
            Expr::Or(a, b) => {
                let a = !self.eval(a, env)?.is_zero();
                truth(a || !self.eval(b, env)?.is_zero())
            }
            Expr::Not(a) => truth(self.eval(a, env)?.is_zero()),
            Expr::Select(c, t, f) => {
                if self.eval(c, env)?.is_zero() {
                    self.eval(f, env)?
                } else {
                    self.eval(t, env)?
                }
            }
        })
    }

    fn call(&mut self, func: FuncId, index: Vec<i64>) -> Result<D, RealizeError> {
        let graph = self.graph;
        let f = &graph[func];
        if f.num_updates() > 0 && !self.materialized.contains_key(&func) {
            self.materialize(func)?;
        }
        if let Some(storage) = self.materialized.get(&func) {
            return storage.get(&index).ok_or_else(|| RealizeError::OutOfBounds {
                name: f.name().to_string(),
                index,
            });
        }
        if let Some(v) = self.memo.get(&(func, index.clone())) {
            return Ok(*v);
        }
        let Some(init) = f.definition(Stage::Initial) else {
            return Err(GraphError::Undefined {
                func: f.name().to_string(),
            }
            .into());
        };
        let env = Env {
            vars: f.args().iter().cloned().zip(index.iter().copied()).collect(),
            rvars: vec![],
        };
        let v = self.eval(&init.value, &env)?;
        self.memo.insert((func, index), v);
        Ok(v)
    }

    fn materialize(&mut self, func: FuncId) -> Result<(), RealizeError> {
        let graph = self.graph;
        let f = &graph[func];
        log::trace!("materializing `{}`", f.name());
        let region = self
            .regions
            .get(&func)
            .cloned()
            .unwrap_or_else(|| Domain::empty(f.dims()));

        let mut values = Vec::with_capacity(region.size());
        if let Some(init) = f.definition(Stage::Initial) {
            for point in region.points() {
                let env = Env {
                    vars: f.args().iter().cloned().zip(point).collect(),
                    rvars: vec![],
                };
                values.push(self.eval(&init.value, &env)?);
            }
        }
        let data = to_tensor(f.name(), &region, values)?;
        self.materialized.insert(
            func,
            Storage {
                domain: region.clone(),
                data,
            },
        );

        for def in f.updates() {
            let pure: Vec<(Var, usize)> = def
                .lhs
                .iter()
                .enumerate()
                .filter_map(|(d, a)| match a {
                    Expr::Var(v) => Some((v.clone(), d)),
                    _ => None,
                })
                .collect();
            let outer = Domain::new(pure.iter().map(|(_, d)| region.intervals()[*d]).collect());
            let inner = rdom_points(def.rdom.as_ref());
            let rvars: Vec<RVar> = def
                .rdom
                .iter()
                .flat_map(|r| r.dims().iter().map(|(v, _)| v.clone()))
                .collect();

            let mut pending = vec![];
            for p in outer.points() {
                for r in &inner {
                    let env = Env {
                        vars: pure.iter().map(|(v, _)| v.clone()).zip(p.iter().copied()).collect(),
                        rvars: rvars.iter().cloned().zip(r.iter().copied()).collect(),
                    };
                    let index = self.index(&def.lhs, &env)?;
                    let value = self.eval(&def.value, &env)?;
                    if def.rdom.is_some() {
                        self.store(func, index, value)?;
                    } else {
                        pending.push((index, value));
                    }
                }
            }
            for (index, value) in pending {
                self.store(func, index, value)?;
            }
        }
        Ok(())
    }

    fn store(&mut self, func: FuncId, index: Vec<i64>, value: D) -> Result<(), RealizeError> {
        let written = self
            .materialized
            .get_mut(&func)
            .is_some_and(|s| s.set(&index, value));
        if written {
            Ok(())
        } else {
            Err(RealizeError::OutOfBounds {
                name: self.graph[func].name().to_string(),
                index,
            })
        }
    }
}

/// Evaluate `func` over `domain`.
pub fn realize<D: Floating>(
    graph: &Graph,
    func: FuncId,
    domain: &Domain,
    ctx: &Context<D>,
) -> Result<TensorData<D>, RealizeError> {
    let order = build_order(graph, func)?;
    let regions = infer_bounds(graph, &order, func, domain)?;
    let mut interp = Interpreter {
        graph,
        ctx,
        regions,
        materialized: HashMap::new(),
        memo: HashMap::new(),
    };
    let values = domain
        .points()
        .into_iter()
        .map(|p| interp.call(func, p))
        .collect::<Result<Vec<_>, _>>()?;
    to_tensor(graph[func].name(), domain, values)
}
