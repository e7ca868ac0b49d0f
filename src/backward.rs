//! Reverse-mode propagation of adjoints through a graph.
//!
//! Stages are processed consumers first. Every `(target, stage)` key owns an
//! ordered list of terms; once all contributions to a key have arrived the
//! terms are turned into synthesized funcs (see [`Backward::materialize`]).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    bounds::{Domain, Regions, ResolvedSeed, Seed, infer_bounds, resolve_seed},
    derivative::{AdjointSlot, Derivative, FuncKey},
    error::DiffError,
    expr::{
        Expr, RVar, Var,
        diff::{self, Partial},
        simplify,
    },
    graph::{Definition, Func, Graph, Origin, RDom, Stage, Target},
    identity::{BufferId, FuncId},
    ops::{BinaryOp, CmpOp, UnaryOp},
    order::build_order,
    recurrence::{Recurrences, UpdateKind, classify, writes_once},
};

/// One contribution to an adjoint.
#[derive(Debug, Clone)]
enum Term {
    /// Pointwise, in the target's own variables.
    Gather(Expr),
    /// `adj(lhs) += value` over `rdom`.
    Scatter {
        lhs: Vec<Expr>,
        value: Expr,
        rdom: RDom,
    },
    /// `adj(lhs) = 0`.
    Mask { lhs: Vec<Expr>, rdom: Option<RDom> },
}

/// Pure variables of `func` that the definition writes along.
fn live_vars(func: &Func, def: &Definition) -> Vec<Var> {
    func.args()
        .iter()
        .filter(|v| def.lhs.iter().any(|a| matches!(a, Expr::Var(w) if w == *v)))
        .cloned()
        .collect()
}

/// Match `±var + c` with an integer `c`.
fn affine(e: &Expr) -> Option<(Var, bool, i64)> {
    match e {
        Expr::Var(v) => Some((v.clone(), true, 0)),
        Expr::Unary(UnaryOp::Neg, a) => match a.as_ref() {
            Expr::Var(v) => Some((v.clone(), false, 0)),
            _ => None,
        },
        Expr::Binary(op @ (BinaryOp::Add | BinaryOp::Sub), a, b) => {
            match (a.as_ref(), b.as_ref(), op) {
                (Expr::Var(v), c, BinaryOp::Add) | (c, Expr::Var(v), BinaryOp::Add) => {
                    Some((v.clone(), true, c.as_integer()?))
                }
                (Expr::Var(v), c, BinaryOp::Sub) => Some((v.clone(), true, -c.as_integer()?)),
                (c, Expr::Var(v), BinaryOp::Sub) => Some((v.clone(), false, c.as_integer()?)),
                _ => None,
            }
        }
        _ => None,
    }
}

struct Backward<'g> {
    source: &'g Graph,
    graph: Graph,
    regions: Regions,
    terms: HashMap<FuncKey, Vec<Term>>,
    slots: BTreeMap<FuncKey, AdjointSlot>,
    states: Recurrences,
    primals: HashMap<(FuncId, Stage), FuncId>,
}

impl<'g> Backward<'g> {
    fn new(source: &'g Graph, regions: Regions) -> Self {
        Self {
            source,
            graph: source.clone(),
            regions,
            terms: HashMap::new(),
            slots: BTreeMap::new(),
            states: Recurrences::new(),
            primals: HashMap::new(),
        }
    }

    fn target_vars(&self, target: Target) -> Vec<Var> {
        match target {
            Target::Func(f) => self.source[f].args().to_vec(),
            Target::Buffer(b) => (0..self.source[b].dims())
                .map(|i| Var::new(format!("i{i}")))
                .collect(),
            Target::Param(_) => vec![],
        }
    }

    fn target_region(&self, target: Target) -> Domain {
        match target {
            Target::Func(f) => self
                .regions
                .get(&f)
                .cloned()
                .unwrap_or_else(|| Domain::empty(self.source[f].dims())),
            Target::Buffer(b) => self.source[b].domain().clone(),
            Target::Param(_) => Domain::scalar(),
        }
    }

    fn region(&self, func: FuncId) -> Option<&Domain> {
        self.regions.get(&func)
    }

    fn adjoint_name(&self, key: FuncKey) -> String {
        let name = self.source.target_name(key.target);
        match key.stage {
            Stage::Initial => format!("{name}_d"),
            Stage::Update(i) => format!("{name}_{i}_d"),
        }
    }

    fn push_term(&mut self, key: FuncKey, term: Term) {
        log::trace!("{:?} <- {:?}", key, term);
        self.terms.entry(key).or_default().push(term);
    }

    fn seed(&mut self, output: FuncId, seed: &ResolvedSeed) {
        let f = &self.source[output];
        let vars = f.arg_exprs();
        let guard = seed.domain.contains_expr(&vars);
        let key = FuncKey::new(output, f.last_stage());
        let value = simplify::select(guard, seed.value.clone(), Expr::Const(0.0));
        self.push_term(key, Term::Gather(value));
    }

    /// Turn the terms of `key` into funcs.
    ///
    /// Leading gathers become the initial definition. Without further terms
    /// the bounded func is that sum clamped to the target's region; otherwise
    /// an unbounded func runs every remaining term as an update and the
    /// bounded func clamps it.
    fn materialize(&mut self, key: FuncKey) -> AdjointSlot {
        let vars = self.target_vars(key.target);
        let var_exprs: Vec<Expr> = vars.iter().map(Expr::from).collect();
        let region = self.target_region(key.target);
        let base = self.adjoint_name(key);

        let mut terms = self.terms.remove(&key).unwrap_or_default().into_iter().peekable();
        let mut init = Expr::Const(0.0);
        while let Some(Term::Gather(g)) = terms.peek() {
            init = simplify::add(init, g.clone());
            terms.next();
        }
        let rest: Vec<Term> = terms.collect();

        let unbounded = if rest.is_empty() {
            None
        } else {
            let name = self.graph.fresh_name(&format!("{base}_acc"));
            let origin = Origin::Adjoint {
                of: key.target,
                stage: key.stage,
                bounded: false,
            };
            let mut acc = Func::new(name, vars.clone(), origin);
            acc.set_init(init.clone());
            let id = self.graph.push(acc);
            for term in rest {
                let def = match term {
                    Term::Gather(g) => Definition::new(
                        var_exprs.clone(),
                        simplify::add(Expr::call(id, var_exprs.clone()), g),
                        None,
                    ),
                    Term::Scatter { lhs, value, rdom } => Definition::new(
                        lhs.clone(),
                        simplify::add(Expr::call(id, lhs), value),
                        Some(rdom),
                    ),
                    Term::Mask { lhs, rdom } => Definition::new(lhs, Expr::Const(0.0), rdom),
                };
                self.graph.func_mut(id).push_update(def);
            }
            Some(id)
        };

        let body = match unbounded {
            Some(acc) => Expr::call(acc, var_exprs.clone()),
            None => init,
        };
        let value = if body.is_zero() {
            body
        } else {
            simplify::select(region.contains_expr(&var_exprs), body, Expr::Const(0.0))
        };
        let name = self.graph.fresh_name(&base);
        let origin = Origin::Adjoint {
            of: key.target,
            stage: key.stage,
            bounded: true,
        };
        let mut bounded = Func::new(name, vars, origin);
        bounded.set_init(value);
        let bounded = self.graph.push(bounded);
        log::debug!(
            "materialized `{}`{}",
            self.graph[bounded].name(),
            if unbounded.is_some() { " with accumulator" } else { "" }
        );
        AdjointSlot { bounded, unbounded }
    }

    /// Copy of `func` as it is after `stage`.
    fn primal(&mut self, func: FuncId, stage: Stage) -> FuncId {
        let source = self.source;
        let f = &source[func];
        if stage >= f.last_stage() {
            return func;
        }
        if let Some(id) = self.primals.get(&(func, stage)) {
            return *id;
        }
        let base = match stage {
            Stage::Initial => format!("{}_primal", f.name()),
            Stage::Update(i) => format!("{}_{i}_primal", f.name()),
        };
        let name = self.graph.fresh_name(&base);
        let id = self
            .graph
            .push(f.truncated(stage, name, Origin::Primal { of: func, stage }));
        self.graph
            .func_mut(id)
            .map_definitions(|e| e.replace_calls(func, id));
        self.primals.insert((func, stage), id);
        id
    }

    /// Pointwise form of a contribution, when the read can be inverted.
    fn gather(
        &self,
        consumer: FuncId,
        def: &Definition,
        target_vars: &[Var],
        args: &[Expr],
        value: &Expr,
    ) -> Option<Expr> {
        if def.rdom.is_some() {
            return None;
        }
        let c = &self.source[consumer];
        let region = self.region(consumer)?;
        let live: BTreeSet<Var> = live_vars(c, def).into_iter().collect();
        let mut solved: BTreeMap<Var, Expr> = BTreeMap::new();
        let mut guards = vec![];
        for (t, arg) in target_vars.iter().zip(args) {
            let arg = simplify::simplify(arg);
            let t = Expr::from(t);
            if let Some(k) = arg.as_integer() {
                guards.push(simplify::cmp(CmpOp::Eq, t, Expr::from(k)));
                continue;
            }
            let (v, positive, offset) = affine(&arg)?;
            if !live.contains(&v) || solved.contains_key(&v) {
                return None;
            }
            let inverse = if positive {
                simplify::sub(t, Expr::from(offset))
            } else {
                simplify::sub(Expr::from(offset), t)
            };
            let range = region.intervals()[c.dim_of(&v)?];
            guards.push(simplify::cmp(CmpOp::Ge, inverse.clone(), Expr::from(range.min)));
            guards.push(simplify::cmp(CmpOp::Le, inverse.clone(), Expr::from(range.max)));
            solved.insert(v, inverse);
        }
        if solved.len() != live.len() {
            return None;
        }
        let value = simplify::simplify(&value.substitute(&solved));
        Some(simplify::select(simplify::all(guards), value, Expr::Const(0.0)))
    }

    /// Update-definition form of a contribution: iterate the consumer's
    /// written pure variables (as reduction variables) and its reduction domain.
    fn scatter(&self, consumer: FuncId, def: &Definition, args: &[Expr], value: &Expr) -> Option<Term> {
        let c = &self.source[consumer];
        let region = self.region(consumer)?;
        let mut map = BTreeMap::new();
        let mut dims = vec![];
        for v in live_vars(c, def) {
            let range = region.intervals()[c.dim_of(&v)?];
            if range.is_empty() {
                return None;
            }
            let rv = RVar::new(format!("{}${}", c.name(), v.name()));
            map.insert(v, Expr::RVar(rv.clone()));
            dims.push((rv, range));
        }
        let own = RDom::from_dims(dims);
        let rdom = match &def.rdom {
            Some(r) => r.join(&own),
            None => own,
        };
        Some(Term::Scatter {
            lhs: args
                .iter()
                .map(|a| simplify::simplify(&a.substitute(&map)))
                .collect(),
            value: simplify::simplify(&value.substitute(&map)),
            rdom,
        })
    }

    /// Add `value` (the derivative of the output with respect to the read of
    /// `args` in `def`) to `key`.
    fn contribute(&mut self, key: FuncKey, consumer: FuncId, def: &Definition, args: &[Expr], value: Expr) {
        let value = simplify::simplify(&value);
        if value.is_zero() {
            return;
        }
        let target_vars = self.target_vars(key.target);
        let term = match self.gather(consumer, def, &target_vars, args, &value) {
            Some(g) => Some(Term::Gather(g)),
            None => self.scatter(consumer, def, args, &value),
        };
        if let Some(term) = term {
            self.push_term(key, term);
        }
    }

    /// Key that a read of `target` by another func contributes to.
    fn consumer_key(&self, target: Target) -> Result<FuncKey, DiffError> {
        match target {
            Target::Func(g) => {
                self.states.accept(self.source, g)?;
                Ok(FuncKey::new(g, self.source[g].last_stage()))
            }
            other => Ok(FuncKey::new(other, Stage::Initial)),
        }
    }

    /// Contributions to every read other than `func` itself. Self values in
    /// partials are redirected to `snapshot`.
    fn contribute_reads(
        &mut self,
        func: FuncId,
        def: &Definition,
        partials: &[Partial],
        adjoint: &Expr,
        snapshot: FuncId,
    ) -> Result<(), DiffError> {
        for p in partials {
            if p.read.target == Target::Func(func) {
                continue;
            }
            let key = self.consumer_key(p.read.target)?;
            let partial = p.partial.replace_calls(func, snapshot);
            let value = simplify::mul(partial, adjoint.clone());
            self.contribute(key, func, def, &p.read.args, value);
        }
        Ok(())
    }

    fn unsupported(&self, func: FuncId, stage: Stage, reason: &str) -> DiffError {
        DiffError::UnsupportedRecurrence {
            func: self.source[func].name().to_string(),
            stage,
            reason: reason.to_string(),
        }
    }

    fn process(&mut self, func: FuncId, stage: Stage) -> Result<(), DiffError> {
        let source = self.source;
        self.states.begin(source, func, stage)?;
        let key = FuncKey::new(func, stage);
        let slot = self.materialize(key);
        self.slots.insert(key, slot);

        let f = &source[func];
        let Some(def) = f.definition(stage) else {
            return Ok(());
        };
        let adj = slot.bounded;
        let at_lhs = Expr::call(adj, def.lhs.clone());
        let partials = diff::partials(&def.value);

        let Some(prior) = stage.prev() else {
            return self.contribute_reads(func, def, &partials, &at_lhs, func);
        };
        let prior = FuncKey::new(func, prior);
        let me = Target::Func(func);
        let vars = f.arg_exprs();
        let kind = classify(source, func, stage, def)?;
        log::debug!("`{}` {}: {:?}", f.name(), stage, kind);

        match kind {
            UpdateKind::Overwrite => {
                if def.rdom.is_some() && !writes_once(def) {
                    return Err(self.unsupported(func, stage, "a position is overwritten more than once"));
                }
                let before = self.primal(func, prior.stage);
                if def.rdom.is_some() || def.lhs != vars {
                    self.push_term(prior, Term::Gather(Expr::call(adj, vars.clone())));
                    self.push_term(
                        prior,
                        Term::Mask {
                            lhs: def.lhs.clone(),
                            rdom: def.rdom.clone(),
                        },
                    );
                }
                for p in partials.iter().filter(|p| p.read.target == me) {
                    let value = simplify::mul(p.partial.replace_calls(func, before), at_lhs.clone());
                    self.contribute(prior, func, def, &p.read.args, value);
                }
                self.contribute_reads(func, def, &partials, &at_lhs, before)
            }
            UpdateKind::InPlace => {
                let additive = partials
                    .iter()
                    .filter(|p| p.read.target == me)
                    .all(|p| simplify::simplify(&p.partial).is_one());
                if !additive {
                    return Err(self.unsupported(func, stage, "the reduction is not additive"));
                }
                if partials
                    .iter()
                    .any(|p| p.read.target != me && p.partial.reads_target(me))
                {
                    return Err(self.unsupported(
                        func,
                        stage,
                        "the accumulated value depends on the func itself",
                    ));
                }
                self.push_term(prior, Term::Gather(Expr::call(adj, vars)));
                self.contribute_reads(func, def, &partials, &at_lhs, func)
            }
            UpdateKind::Scan { read, in_place } => {
                let Some(rdom) = def.rdom.clone() else {
                    return Err(self.unsupported(func, stage, "a scan needs a reduction domain"));
                };
                let after = self.primal(func, stage);
                let mut step = Expr::Const(0.0);
                for p in partials.iter().filter(|p| p.read.target == me) {
                    if p.read.args == read {
                        step = p.partial.replace_calls(func, after);
                    } else if !simplify::simplify(&p.partial).is_one() {
                        return Err(self.unsupported(func, stage, "the scan does not accumulate in place"));
                    }
                }

                // iterate the reduction domain backwards
                let reverse: BTreeMap<RVar, Expr> = rdom
                    .dims()
                    .iter()
                    .map(|(v, i)| {
                        let flipped = simplify::sub(Expr::from(i.min + i.max), Expr::RVar(v.clone()));
                        (v.clone(), flipped)
                    })
                    .collect();
                let rev = |e: &Expr| simplify::simplify(&e.substitute_rvars(&reverse));

                let base = format!("{}_scan", self.adjoint_name(key));
                let name = self.graph.fresh_name(&base);
                let mut scan = Func::new(name, f.args().to_vec(), Origin::ScanAdjoint { of: func, stage });
                scan.set_init(Expr::call(adj, vars.clone()));
                let v = self.graph.push(scan);
                let read_rev: Vec<Expr> = read.iter().map(&rev).collect();
                let lhs_rev: Vec<Expr> = def.lhs.iter().map(&rev).collect();
                let value = simplify::add(
                    Expr::call(v, read_rev.clone()),
                    simplify::mul(rev(&step), Expr::call(v, lhs_rev)),
                );
                self.graph
                    .func_mut(v)
                    .push_update(Definition::new(read_rev, value, Some(rdom.clone())));

                self.push_term(prior, Term::Gather(Expr::call(v, vars)));
                if !in_place {
                    self.push_term(
                        prior,
                        Term::Mask {
                            lhs: def.lhs.clone(),
                            rdom: Some(rdom),
                        },
                    );
                }
                let at_lhs = Expr::call(v, def.lhs.clone());
                self.contribute_reads(func, def, &partials, &at_lhs, after)
            }
        }
    }
}

fn propagate(graph: &Graph, output: FuncId, seed: Seed) -> Result<Derivative, DiffError> {
    let resolved = resolve_seed(graph, output, &seed)?;
    let order = build_order(graph, output)?;
    let regions = infer_bounds(graph, &order, output, &resolved.domain)?;
    log::info!(
        "propagating adjoints of `{}` over {} stages",
        graph[output].name(),
        order.stages.len()
    );

    let mut pass = Backward::new(graph, regions);
    pass.seed(output, &resolved);
    for (func, stage) in order.reversed() {
        pass.process(func, stage)?;
    }
    let leaves = order
        .buffers
        .iter()
        .map(|b| Target::Buffer(*b))
        .chain(order.params.iter().map(|p| Target::Param(*p)));
    for target in leaves {
        let key = FuncKey::new(target, Stage::Initial);
        let slot = pass.materialize(key);
        pass.slots.insert(key, slot);
    }
    Ok(Derivative::new(pass.graph, output, pass.slots))
}

/// Adjoints of everything `output` depends on, seeded by `adjoint` over
/// explicit `(min, max)` bounds per output dimension.
pub fn propagate_adjoints(
    graph: &Graph,
    output: FuncId,
    adjoint: FuncId,
    output_bounds: &[(Expr, Expr)],
) -> Result<Derivative, DiffError> {
    let seed = Seed::Func {
        adjoint,
        bounds: output_bounds.to_vec(),
    };
    propagate(graph, output, seed)
}

/// Adjoints seeded by a buffer whose declared domain is the output domain.
pub fn propagate_adjoints_from_buffer(
    graph: &Graph,
    output: FuncId,
    adjoint: BufferId,
) -> Result<Derivative, DiffError> {
    propagate(graph, output, Seed::Buffer(adjoint))
}

/// Adjoints of a single-element output, seeded with 1.
pub fn propagate_scalar_adjoints(graph: &Graph, output: FuncId) -> Result<Derivative, DiffError> {
    propagate(graph, output, Seed::Unit)
}
