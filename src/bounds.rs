//! Domains, interval arithmetic over index expressions, seed resolution and
//! per-func region inference.

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::{
    error::ShapeError,
    expr::{Expr, RVar, Read, Var, simplify},
    graph::{Definition, Func, Graph, RDom, Target},
    identity::{BufferId, FuncId},
    ops::{BinaryOp, CmpOp, UnaryOp},
    order::Order,
};

/// Inclusive integer range `[min, max]`; empty when `max < min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub min: i64,
    pub max: i64,
}

impl Interval {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn point(v: i64) -> Self {
        Self { min: v, max: v }
    }

    pub fn from_extent(min: i64, extent: i64) -> Self {
        Self {
            min,
            max: min + extent - 1,
        }
    }

    pub fn empty() -> Self {
        Self { min: 0, max: -1 }
    }

    pub fn extent(&self) -> i64 {
        (self.max - self.min + 1).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.max < self.min
    }

    pub fn contains(&self, v: i64) -> bool {
        self.min <= v && v <= self.max
    }

    pub fn union(&self, other: &Interval) -> Interval {
        match (self.is_empty(), other.is_empty()) {
            (true, _) => *other,
            (_, true) => *self,
            _ => Interval::new(self.min.min(other.min), self.max.max(other.max)),
        }
    }
}

/// One interval per dimension. A zero-dimensional domain holds one point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Domain(Vec<Interval>);

impl Domain {
    pub fn new(intervals: Vec<Interval>) -> Self {
        Self(intervals)
    }

    pub fn scalar() -> Self {
        Self(vec![])
    }

    pub fn empty(dims: usize) -> Self {
        Self(vec![Interval::empty(); dims])
    }

    /// `[0, n - 1]` per dimension.
    pub fn from_shape(shape: &[usize]) -> Self {
        Self(
            shape
                .iter()
                .map(|&n| Interval::from_extent(0, n as i64))
                .collect(),
        )
    }

    pub fn dims(&self) -> usize {
        self.0.len()
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.0
    }

    pub fn extents(&self) -> Vec<i64> {
        self.0.iter().map(Interval::extent).collect()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.0.iter().map(|i| i.extent() as usize).collect()
    }

    pub fn size(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().any(Interval::is_empty)
    }

    pub fn contains(&self, point: &[i64]) -> bool {
        point.len() == self.0.len() && self.0.iter().zip(point).all(|(i, v)| i.contains(*v))
    }

    pub fn union(&self, other: &Domain) -> Domain {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        Domain(
            self.0
                .iter()
                .zip(&other.0)
                .map(|(a, b)| a.union(b))
                .collect(),
        )
    }

    /// Row-major offsets of `point` relative to the domain minimums.
    pub fn offset(&self, point: &[i64]) -> Option<Vec<usize>> {
        self.contains(point).then(|| {
            self.0
                .iter()
                .zip(point)
                .map(|(i, v)| (v - i.min) as usize)
                .collect()
        })
    }

    /// Every point in row-major order, last dimension fastest.
    pub fn points(&self) -> Vec<Vec<i64>> {
        if self.0.is_empty() {
            return vec![vec![]];
        }
        if self.is_empty() {
            return vec![];
        }
        self.0
            .iter()
            .map(|i| i.min..=i.max)
            .multi_cartesian_product()
            .collect()
    }

    /// `min_d <= args[d] <= max_d` for every dimension.
    pub fn contains_expr(&self, args: &[Expr]) -> Expr {
        simplify::all(self.0.iter().zip(args).map(|(i, a)| {
            simplify::and(
                simplify::cmp(CmpOp::Ge, a.clone(), Expr::from(i.min)),
                simplify::cmp(CmpOp::Le, a.clone(), Expr::from(i.max)),
            )
        }))
    }
}

/// Real-valued range of an expression; empty when `lo > hi`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub lo: f64,
    pub hi: f64,
}

impl Span {
    pub fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    pub fn point(v: f64) -> Self {
        Self { lo: v, hi: v }
    }

    pub fn unbounded() -> Self {
        Self {
            lo: f64::NEG_INFINITY,
            hi: f64::INFINITY,
        }
    }

    pub fn empty() -> Self {
        Self {
            lo: f64::INFINITY,
            hi: f64::NEG_INFINITY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lo > self.hi
    }

    pub fn is_finite(&self) -> bool {
        self.lo.is_finite() && self.hi.is_finite()
    }

    pub fn union(&self, other: &Span) -> Span {
        match (self.is_empty(), other.is_empty()) {
            (true, _) => *other,
            (_, true) => *self,
            _ => Span::new(self.lo.min(other.lo), self.hi.max(other.hi)),
        }
    }

    /// Index range covered: the floor of both ends.
    pub fn to_interval(&self) -> Option<Interval> {
        if self.is_empty() {
            return Some(Interval::empty());
        }
        self.is_finite()
            .then(|| Interval::new(self.lo.floor() as i64, self.hi.floor() as i64))
    }

    fn monotone(&self, f: impl Fn(f64) -> f64) -> Span {
        Span::new(f(self.lo), f(self.hi))
    }

    fn from_corners(corners: [f64; 4]) -> Span {
        if corners.iter().any(|c| c.is_nan()) {
            return Span::unbounded();
        }
        let lo = corners.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = corners.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Span::new(lo, hi)
    }
}

impl From<Interval> for Span {
    fn from(i: Interval) -> Self {
        if i.is_empty() {
            Span::empty()
        } else {
            Span::new(i.min as f64, i.max as f64)
        }
    }
}

/// Ranges of the pure and reduction variables in scope.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: BTreeMap<Var, Span>,
    rvars: BTreeMap<RVar, Span>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_var(&mut self, var: Var, range: Interval) {
        self.vars.insert(var, range.into());
    }

    pub fn bind_rvar(&mut self, rvar: RVar, range: Interval) {
        self.rvars.insert(rvar, range.into());
    }

    pub fn bind_rdom(&mut self, rdom: &RDom) {
        for (v, i) in rdom.dims() {
            self.bind_rvar(v.clone(), *i);
        }
    }

    /// Scope of one definition of `func` evaluated over `region`.
    pub fn of_definition(func: &Func, def: &Definition, region: &Domain) -> Scope {
        let mut scope = Scope::new();
        for (var, range) in func.args().iter().zip(region.intervals()) {
            scope.bind_var(var.clone(), *range);
        }
        if let Some(rdom) = &def.rdom {
            scope.bind_rdom(rdom);
        }
        scope
    }

    /// No variable in scope has an empty range.
    pub fn is_reachable(&self) -> bool {
        !self
            .vars
            .values()
            .chain(self.rvars.values())
            .any(Span::is_empty)
    }

    fn slot(&mut self, e: &Expr) -> Option<&mut Span> {
        match e {
            Expr::Var(v) => self.vars.get_mut(v),
            Expr::RVar(v) => self.rvars.get_mut(v),
            _ => None,
        }
    }

    /// Scope restricted to where `cond` evaluates to `holds`.
    pub fn narrow(&self, cond: &Expr, holds: bool) -> Scope {
        let mut out = self.clone();
        out.restrict(cond, holds);
        out
    }

    fn restrict(&mut self, cond: &Expr, holds: bool) {
        match cond {
            Expr::And(a, b) if holds => {
                self.restrict(a, true);
                self.restrict(b, true);
            }
            Expr::Or(a, b) if !holds => {
                self.restrict(a, false);
                self.restrict(b, false);
            }
            Expr::Not(a) => self.restrict(a, !holds),
            Expr::Cmp(op, a, b) => {
                let op = if holds { Some(*op) } else { negate(*op) };
                let Some(op) = op else { return };
                match (a.as_ref(), b.as_ref()) {
                    (lhs, Expr::Const(c)) => self.bound(lhs, op, *c),
                    (Expr::Const(c), rhs) => self.bound(rhs, op.flip(), *c),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn bound(&mut self, e: &Expr, op: CmpOp, c: f64) {
        let Some(span) = self.slot(e) else { return };
        // variables range over integers
        match op {
            CmpOp::Lt => span.hi = span.hi.min(c.ceil() - 1.0),
            CmpOp::Le => span.hi = span.hi.min(c.floor()),
            CmpOp::Gt => span.lo = span.lo.max(c.floor() + 1.0),
            CmpOp::Ge => span.lo = span.lo.max(c.ceil()),
            CmpOp::Eq => {
                span.lo = span.lo.max(c.ceil());
                span.hi = span.hi.min(c.floor());
            }
            CmpOp::Ne => {}
        }
    }
}

fn negate(op: CmpOp) -> Option<CmpOp> {
    match op {
        CmpOp::Lt => Some(CmpOp::Ge),
        CmpOp::Le => Some(CmpOp::Gt),
        CmpOp::Gt => Some(CmpOp::Le),
        CmpOp::Ge => Some(CmpOp::Lt),
        CmpOp::Ne => Some(CmpOp::Eq),
        CmpOp::Eq => None,
    }
}

/// Conservative range of `expr` with variables ranging over `scope`.
pub fn span(expr: &Expr, scope: &Scope) -> Span {
    match expr {
        Expr::Const(c) => Span::point(*c),
        Expr::Var(v) => scope.vars.get(v).copied().unwrap_or(Span::unbounded()),
        Expr::RVar(v) => scope.rvars.get(v).copied().unwrap_or(Span::unbounded()),
        // data
        Expr::Param(_) | Expr::Call(..) | Expr::Load(..) => Span::unbounded(),
        Expr::Unary(op, a) => {
            let a = span(a, scope);
            if a.is_empty() {
                return a;
            }
            unary_span(*op, a)
        }
        Expr::Binary(op, a, b) => {
            let (a, b) = (span(a, scope), span(b, scope));
            if a.is_empty() || b.is_empty() {
                return Span::empty();
            }
            binary_span(*op, a, b)
        }
        Expr::Cmp(..) | Expr::And(..) | Expr::Or(..) | Expr::Not(_) => Span::new(0.0, 1.0),
        Expr::Select(c, t, f) => {
            let on_true = scope.narrow(c, true);
            let on_false = scope.narrow(c, false);
            let t = if on_true.is_reachable() {
                span(t, &on_true)
            } else {
                Span::empty()
            };
            let f = if on_false.is_reachable() {
                span(f, &on_false)
            } else {
                Span::empty()
            };
            t.union(&f)
        }
    }
}

fn unary_span(op: UnaryOp, a: Span) -> Span {
    match op {
        UnaryOp::Neg => Span::new(-a.hi, -a.lo),
        UnaryOp::Exp => a.monotone(f64::exp),
        UnaryOp::Tanh => a.monotone(f64::tanh),
        UnaryOp::Floor => a.monotone(f64::floor),
        UnaryOp::Log if a.lo > 0.0 => a.monotone(f64::ln),
        UnaryOp::Log => Span::new(f64::NEG_INFINITY, a.hi.ln()),
        UnaryOp::Sqrt => Span::new(a.lo.max(0.0).sqrt(), a.hi.max(0.0).sqrt()),
        UnaryOp::Sin | UnaryOp::Cos => Span::new(-1.0, 1.0),
        UnaryOp::Abs if a.lo >= 0.0 => a,
        UnaryOp::Abs if a.hi <= 0.0 => Span::new(-a.hi, -a.lo),
        UnaryOp::Abs => Span::new(0.0, a.hi.max(-a.lo)),
    }
}

fn binary_span(op: BinaryOp, a: Span, b: Span) -> Span {
    match op {
        BinaryOp::Add => Span::new(a.lo + b.lo, a.hi + b.hi),
        BinaryOp::Sub => Span::new(a.lo - b.hi, a.hi - b.lo),
        BinaryOp::Mul => {
            Span::from_corners([a.lo * b.lo, a.lo * b.hi, a.hi * b.lo, a.hi * b.hi])
        }
        BinaryOp::Div if b.lo > 0.0 || b.hi < 0.0 => {
            Span::from_corners([a.lo / b.lo, a.lo / b.hi, a.hi / b.lo, a.hi / b.hi])
        }
        BinaryOp::Div => Span::unbounded(),
        BinaryOp::Min => Span::new(a.lo.min(b.lo), a.hi.min(b.hi)),
        BinaryOp::Max => Span::new(a.lo.max(b.lo), a.hi.max(b.hi)),
        BinaryOp::Pow if a.lo == a.hi && b.lo == b.hi => Span::point(a.lo.powf(b.lo)),
        BinaryOp::Pow => Span::unbounded(),
    }
}

/// Every read in `expr` (nested ones included) with the ranges of its
/// arguments. Reads in `select` branches that cannot be taken are skipped.
pub fn accesses(expr: &Expr, scope: &Scope) -> Vec<(Read, Vec<Span>)> {
    let mut out = vec![];
    collect_accesses(expr, scope, &mut out);
    out
}

fn collect_accesses(expr: &Expr, scope: &Scope, out: &mut Vec<(Read, Vec<Span>)>) {
    match expr {
        Expr::Call(..) | Expr::Load(..) | Expr::Param(_) => {
            if let Some(read) = expr.reads().into_iter().next() {
                let spans = read.args.iter().map(|a| span(a, scope)).collect();
                out.push((read, spans));
            }
            for child in expr.children() {
                collect_accesses(child, scope, out);
            }
        }
        Expr::Select(c, t, f) => {
            collect_accesses(c, scope, out);
            let on_true = scope.narrow(c, true);
            if on_true.is_reachable() {
                collect_accesses(t, &on_true, out);
            }
            let on_false = scope.narrow(c, false);
            if on_false.is_reachable() {
                collect_accesses(f, &on_false, out);
            }
        }
        _ => {
            for child in expr.children() {
                collect_accesses(child, scope, out);
            }
        }
    }
}

/// Region every func has to be computed over.
pub type Regions = BTreeMap<FuncId, Domain>;

fn request(
    graph: &Graph,
    consumer: FuncId,
    target: Target,
    spans: &[Span],
) -> Result<Domain, ShapeError> {
    spans
        .iter()
        .enumerate()
        .map(|(dim, s)| {
            s.to_interval().ok_or_else(|| ShapeError::UnboundedAccess {
                consumer: graph[consumer].name().to_string(),
                target: graph.target_name(target).to_string(),
                dim,
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Domain::new)
}

/// Propagate `domain` of `root` backwards through `order`, consumers first.
pub fn infer_bounds(
    graph: &Graph,
    order: &Order,
    root: FuncId,
    domain: &Domain,
) -> Result<Regions, ShapeError> {
    let mut regions = Regions::new();
    regions.insert(root, domain.clone());

    for &func in order.funcs.iter().rev() {
        let f = &graph[func];
        let mut region = regions
            .get(&func)
            .cloned()
            .unwrap_or_else(|| Domain::empty(f.dims()));

        // positions written or re-read by its own updates
        if !region.is_empty() {
            let mut extra = Domain::empty(f.dims());
            for def in f.updates() {
                let scope = Scope::of_definition(f, def, &region);
                if !scope.is_reachable() {
                    continue;
                }
                let lhs: Vec<Span> = def.lhs.iter().map(|a| span(a, &scope)).collect();
                extra = extra.union(&request(graph, func, Target::Func(func), &lhs)?);
                for (read, spans) in accesses(&def.value, &scope) {
                    if read.target == Target::Func(func) {
                        extra = extra.union(&request(graph, func, read.target, &spans)?);
                    }
                }
            }
            region = region.union(&extra);
        }
        regions.insert(func, region.clone());

        for (_, def) in f.definitions() {
            let scope = Scope::of_definition(f, def, &region);
            if !scope.is_reachable() {
                continue;
            }
            for expr in def.lhs.iter().chain(std::iter::once(&def.value)) {
                for (read, spans) in accesses(expr, &scope) {
                    let Target::Func(g) = read.target else {
                        continue;
                    };
                    if g == func {
                        continue;
                    }
                    let req = request(graph, func, read.target, &spans)?;
                    let merged = match regions.get(&g) {
                        Some(prev) => prev.union(&req),
                        None => req,
                    };
                    regions.insert(g, merged);
                }
            }
        }
    }
    for &func in &order.funcs {
        regions
            .entry(func)
            .or_insert_with(|| Domain::empty(graph[func].dims()));
    }
    Ok(regions)
}

/// How the output adjoint is supplied.
#[derive(Debug, Clone)]
pub enum Seed {
    /// An adjoint func evaluated over explicit `(min, max)` bounds.
    Func {
        adjoint: FuncId,
        bounds: Vec<(Expr, Expr)>,
    },
    /// An adjoint buffer; its declared domain is the output domain.
    Buffer(BufferId),
    /// A single-element output seeded with 1.
    Unit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSeed {
    pub domain: Domain,
    /// Output adjoint in terms of the output's pure variables.
    pub value: Expr,
}

pub fn resolve_seed(graph: &Graph, output: FuncId, seed: &Seed) -> Result<ResolvedSeed, ShapeError> {
    let out = &graph[output];
    let dims = out.dims();
    let rank = |name: &str, found: usize| -> Result<(), ShapeError> {
        if found == dims {
            Ok(())
        } else {
            Err(ShapeError::RankMismatch {
                name: name.to_string(),
                expected: dims,
                found,
            })
        }
    };

    match seed {
        Seed::Func { adjoint, bounds } => {
            rank(graph[*adjoint].name(), graph[*adjoint].dims())?;
            rank(out.name(), bounds.len())?;
            let intervals = bounds
                .iter()
                .enumerate()
                .map(|(dim, (min, max))| {
                    let min = simplify::simplify(min).as_integer();
                    let max = simplify::simplify(max).as_integer();
                    match (min, max) {
                        (Some(min), Some(max)) => Ok(Interval::new(min, max)),
                        _ => Err(ShapeError::NonConstantBound {
                            func: out.name().to_string(),
                            dim,
                        }),
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ResolvedSeed {
                domain: Domain::new(intervals),
                value: Expr::call(*adjoint, out.arg_exprs()),
            })
        }
        Seed::Buffer(buffer) => {
            let decl = &graph[*buffer];
            rank(decl.name(), decl.dims())?;
            Ok(ResolvedSeed {
                domain: decl.domain().clone(),
                value: Expr::load(*buffer, out.arg_exprs()),
            })
        }
        Seed::Unit => {
            let domain = match out.estimate() {
                _ if dims == 0 => Domain::scalar(),
                Some(estimate) if estimate.extents().iter().all(|e| *e == 1) => estimate.clone(),
                Some(estimate) => {
                    return Err(ShapeError::NotSingleElement {
                        func: out.name().to_string(),
                        extents: estimate.extents(),
                    });
                }
                None => Domain::new(vec![Interval::point(0); dims]),
            };
            Ok(ResolvedSeed {
                domain,
                value: Expr::Const(1.0),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{
        expr::{clamp, select},
        order::build_order,
    };

    fn scope_x(min: i64, max: i64) -> Scope {
        let mut s = Scope::new();
        s.bind_var(Var::new("x"), Interval::new(min, max));
        s
    }

    #[rstest]
    #[case(Expr::var("x") + 1, Span::new(1.0, 10.0))]
    #[case(Expr::from(2) * Expr::var("x") - 3, Span::new(-3.0, 15.0))]
    #[case(-Expr::var("x"), Span::new(-9.0, 0.0))]
    #[case(Expr::var("x") / 2.0, Span::new(0.0, 4.5))]
    #[case(clamp(Expr::var("x") - 5, 0, 3), Span::new(0.0, 3.0))]
    #[case(Expr::var("x").lt(3), Span::new(0.0, 1.0))]
    fn test_span_arithmetic(#[case] e: Expr, #[case] expected: Span) {
        assert_eq!(span(&e, &scope_x(0, 9)), expected);
    }

    #[test]
    fn test_data_dependent_span_is_unbounded_until_clamped() {
        let b = BufferId(0);
        let read = Expr::load(b, [Expr::var("x")]);
        assert!(!span(&read, &scope_x(0, 3)).is_finite());
        assert_eq!(
            span(&clamp(read, 0, 7), &scope_x(0, 3)),
            Span::new(0.0, 7.0)
        );
    }

    #[test]
    fn test_select_narrows_branches() {
        // select(x < 4, x, x - 10) with x in [0, 9]
        let e = select(
            Expr::var("x").lt(4),
            Expr::var("x"),
            Expr::var("x") - 10,
        );
        assert_eq!(span(&e, &scope_x(0, 9)), Span::new(-6.0, 3.0));

        let both = Expr::var("x").ge(2).and(Expr::var("x").le(5));
        let narrowed = scope_x(0, 9).narrow(&both, true);
        assert_eq!(span(&Expr::var("x"), &narrowed), Span::new(2.0, 5.0));
        assert!(!scope_x(0, 3).narrow(&Expr::var("x").gt(3), true).is_reachable());
    }

    #[test]
    fn test_domain_points_and_guard() {
        let d = Domain::new(vec![Interval::new(0, 1), Interval::new(5, 6)]);
        assert_eq!(
            d.points(),
            vec![vec![0, 5], vec![0, 6], vec![1, 5], vec![1, 6]]
        );
        assert_eq!(Domain::scalar().points(), vec![Vec::<i64>::new()]);
        assert!(Domain::empty(2).points().is_empty());
        assert_eq!(d.offset(&[1, 5]), Some(vec![1, 0]));
        assert_eq!(d.offset(&[2, 5]), None);

        let guard = d.contains_expr(&[Expr::Const(1.0), Expr::Const(7.0)]);
        assert_eq!(guard, Expr::Const(0.0));
    }

    #[test]
    fn test_infer_bounds_through_stencil() {
        let mut g = Graph::new();
        let input = g.buffer("input", &[12]);
        let x = || Expr::var("x");
        let a = g.func("a", &["x"]);
        g.define(a, Expr::load(input, [x()]));
        let blur = g.func("blur", &["x"]);
        g.define(
            blur,
            Expr::call(a, [x() - 1]) + Expr::call(a, [x()]) + Expr::call(a, [x() + 1]),
        );
        let order = build_order(&g, blur).unwrap();
        let regions =
            infer_bounds(&g, &order, blur, &Domain::new(vec![Interval::new(1, 8)])).unwrap();
        assert_eq!(regions[&blur], Domain::new(vec![Interval::new(1, 8)]));
        assert_eq!(regions[&a], Domain::new(vec![Interval::new(0, 9)]));
    }

    #[test]
    fn test_infer_bounds_includes_update_writes() {
        let mut g = Graph::new();
        let input = g.buffer("input", &[6]);
        let hist = g.func("hist", &["b"]);
        g.define(hist, 0.0);
        let r = RDom::new([("r", 0, 6)]);
        let bin = clamp(Expr::load(input, [r.x()]), 0, 3);
        g.update_over(
            hist,
            vec![bin.clone()],
            Expr::call(hist, [bin]) + 1.0,
            r,
        );
        let order = build_order(&g, hist).unwrap();
        let regions =
            infer_bounds(&g, &order, hist, &Domain::new(vec![Interval::new(0, 1)])).unwrap();
        assert_eq!(regions[&hist], Domain::new(vec![Interval::new(0, 3)]));
    }

    #[test]
    fn test_unbounded_access_is_an_error() {
        let mut g = Graph::new();
        let idx = g.buffer("idx", &[4]);
        let t = g.func("t", &["i"]);
        g.define(t, Expr::var("i"));
        let out = g.func("out", &["x"]);
        g.define(out, Expr::call(t, [Expr::load(idx, [Expr::var("x")])]));
        let order = build_order(&g, out).unwrap();
        let err = infer_bounds(&g, &order, out, &Domain::from_shape(&[4])).unwrap_err();
        assert_eq!(
            err,
            ShapeError::UnboundedAccess {
                consumer: "out".into(),
                target: "t".into(),
                dim: 0
            }
        );
    }

    #[test]
    fn test_resolve_seed_modes() {
        let mut g = Graph::new();
        let f = g.func("f", &["x"]);
        g.define(f, Expr::var("x"));
        let adj = g.func("adj", &["x"]);
        g.define(adj, 1.0);
        let buf = g.buffer("seed", &[3]);
        let wide = g.buffer("wide", &[3, 3]);

        let explicit = Seed::Func {
            adjoint: adj,
            bounds: vec![(Expr::from(0), Expr::from(2) + 1)],
        };
        let resolved = resolve_seed(&g, f, &explicit).unwrap();
        assert_eq!(resolved.domain, Domain::new(vec![Interval::new(0, 3)]));
        assert_eq!(resolved.value, Expr::call(adj, [Expr::var("x")]));

        let resolved = resolve_seed(&g, f, &Seed::Buffer(buf)).unwrap();
        assert_eq!(resolved.domain, Domain::from_shape(&[3]));

        assert!(matches!(
            resolve_seed(&g, f, &Seed::Buffer(wide)),
            Err(ShapeError::RankMismatch { expected: 1, found: 2, .. })
        ));
        let symbolic = Seed::Func {
            adjoint: adj,
            bounds: vec![(Expr::var("n"), Expr::from(3))],
        };
        assert_eq!(
            resolve_seed(&g, f, &symbolic).unwrap_err(),
            ShapeError::NonConstantBound {
                func: "f".into(),
                dim: 0
            }
        );

        // no estimate: evaluated at the origin
        let unit = resolve_seed(&g, f, &Seed::Unit).unwrap();
        assert_eq!(unit.domain, Domain::new(vec![Interval::point(0)]));
        assert_eq!(unit.value, Expr::Const(1.0));

        g.estimate(f, Domain::from_shape(&[4]));
        assert_eq!(
            resolve_seed(&g, f, &Seed::Unit).unwrap_err(),
            ShapeError::NotSingleElement {
                func: "f".into(),
                extents: vec![4]
            }
        );
    }
}
