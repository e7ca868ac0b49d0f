use core::fmt::{Display, Formatter, Result as FmtResult};
use std::ops::Index;

use itertools::Itertools;

use crate::{
    bounds::{Domain, Interval},
    expr::{Expr, RVar, Var},
    identity::{BufferId, FuncId, IdGenerator, ParamId, generators::Counter},
};

/// Definition index of a func: the initial definition or one of its updates.
///
/// Stages order as they execute: `Initial < Update(0) < Update(1) < ...`.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Initial,
    Update(usize),
}

impl Stage {
    /// The `-1` / `0..k-1` integer convention.
    pub fn index(self) -> i64 {
        match self {
            Stage::Initial => -1,
            Stage::Update(i) => i as i64,
        }
    }

    pub fn from_index(index: i64) -> Option<Stage> {
        match index {
            -1 => Some(Stage::Initial),
            i if i >= 0 => Some(Stage::Update(i as usize)),
            _ => None,
        }
    }

    /// The stage that executed just before this one.
    pub fn prev(self) -> Option<Stage> {
        match self {
            Stage::Initial => None,
            Stage::Update(0) => Some(Stage::Initial),
            Stage::Update(i) => Some(Stage::Update(i - 1)),
        }
    }

    /// Last stage of a func with `num_updates` update definitions.
    pub fn last(num_updates: usize) -> Stage {
        match num_updates {
            0 => Stage::Initial,
            n => Stage::Update(n - 1),
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Stage::Initial => write!(f, "initial"),
            Stage::Update(i) => write!(f, "update {i}"),
        }
    }
}

/// Anything an expression can read and that can receive an adjoint.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Target {
    Func(FuncId),
    Buffer(BufferId),
    Param(ParamId),
}

impl From<FuncId> for Target {
    fn from(f: FuncId) -> Self {
        Target::Func(f)
    }
}

impl From<BufferId> for Target {
    fn from(b: BufferId) -> Self {
        Target::Buffer(b)
    }
}

impl From<ParamId> for Target {
    fn from(p: ParamId) -> Self {
        Target::Param(p)
    }
}

/// Reduction domain: reduction variables iterated sequentially, first
/// dimension innermost, every dimension ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct RDom {
    dims: Vec<(RVar, Interval)>,
}

impl RDom {
    /// `(name, min, extent)` per dimension.
    pub fn new<S: Into<String>>(dims: impl IntoIterator<Item = (S, i64, i64)>) -> Self {
        let dims = dims
            .into_iter()
            .map(|(name, min, extent)| (RVar::new(name), Interval::from_extent(min, extent)))
            .collect();
        Self { dims }
    }

    pub fn from_dims(dims: Vec<(RVar, Interval)>) -> Self {
        Self { dims }
    }

    pub fn dims(&self) -> &[(RVar, Interval)] {
        &self.dims
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// The `i`-th reduction variable as an expression.
    pub fn var(&self, i: usize) -> Expr {
        Expr::RVar(self.dims[i].0.clone())
    }

    pub fn x(&self) -> Expr {
        self.var(0)
    }

    pub fn y(&self) -> Expr {
        self.var(1)
    }

    pub fn domain(&self) -> Domain {
        Domain::new(self.dims.iter().map(|(_, i)| *i).collect())
    }

    /// Concatenate two domains; `self` stays innermost.
    pub fn join(&self, outer: &RDom) -> RDom {
        RDom {
            dims: self.dims.iter().chain(outer.dims.iter()).cloned().collect(),
        }
    }
}

/// One assignment rule of a func.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub lhs: Vec<Expr>,
    pub value: Expr,
    pub rdom: Option<RDom>,
}

impl Definition {
    pub fn new(lhs: Vec<Expr>, value: Expr, rdom: Option<RDom>) -> Self {
        Self { lhs, value, rdom }
    }
}

/// Why a func exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    User,
    /// Adjoint of `of` after `stage`, boundary-clamped when `bounded`.
    Adjoint {
        of: Target,
        stage: Stage,
        bounded: bool,
    },
    /// Reverse accumulator of a scan update.
    ScanAdjoint { of: FuncId, stage: Stage },
    /// Copy of `of` truncated after `stage`.
    Primal { of: FuncId, stage: Stage },
    Tangent { of: Target },
}

impl Origin {
    /// Synthesized by differentiation (as opposed to user code or snapshots).
    pub fn is_derivative(&self) -> bool {
        matches!(
            self,
            Origin::Adjoint { .. } | Origin::ScanAdjoint { .. } | Origin::Tangent { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct Func {
    name: String,
    args: Vec<Var>,
    init: Option<Definition>,
    updates: Vec<Definition>,
    estimate: Option<Domain>,
    origin: Origin,
}

impl Func {
    pub(crate) fn new(name: impl Into<String>, args: Vec<Var>, origin: Origin) -> Self {
        Self {
            name: name.into(),
            args,
            init: None,
            updates: vec![],
            estimate: None,
            origin,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Var] {
        &self.args
    }

    pub fn arg_exprs(&self) -> Vec<Expr> {
        self.args.iter().map(Expr::from).collect()
    }

    pub fn dims(&self) -> usize {
        self.args.len()
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn estimate(&self) -> Option<&Domain> {
        self.estimate.as_ref()
    }

    pub fn is_defined(&self) -> bool {
        self.init.is_some()
    }

    pub fn updates(&self) -> &[Definition] {
        &self.updates
    }

    pub fn num_updates(&self) -> usize {
        self.updates.len()
    }

    pub fn last_stage(&self) -> Stage {
        Stage::last(self.updates.len())
    }

    pub fn definition(&self, stage: Stage) -> Option<&Definition> {
        match stage {
            Stage::Initial => self.init.as_ref(),
            Stage::Update(i) => self.updates.get(i),
        }
    }

    /// All definitions in execution order.
    pub fn definitions(&self) -> impl Iterator<Item = (Stage, &Definition)> {
        self.init
            .iter()
            .map(|d| (Stage::Initial, d))
            .chain(self.updates.iter().enumerate().map(|(i, d)| (Stage::Update(i), d)))
    }

    /// Position of a pure variable among the func's arguments.
    pub fn dim_of(&self, var: &Var) -> Option<usize> {
        self.args.iter().position(|a| a == var)
    }

    pub(crate) fn set_init(&mut self, value: Expr) {
        self.init = Some(Definition::new(self.arg_exprs(), value, None));
    }

    pub(crate) fn push_update(&mut self, def: Definition) {
        self.updates.push(def);
    }

    /// Copy truncated after `stage`, renamed.
    pub(crate) fn truncated(&self, stage: Stage, name: String, origin: Origin) -> Func {
        let keep = match stage {
            Stage::Initial => 0,
            Stage::Update(i) => (i + 1).min(self.updates.len()),
        };
        Func {
            name,
            args: self.args.clone(),
            init: self.init.clone(),
            updates: self.updates[..keep].to_vec(),
            estimate: self.estimate.clone(),
            origin,
        }
    }

    pub(crate) fn map_definitions(&mut self, mut f: impl FnMut(&Expr) -> Expr) {
        for def in self.init.iter_mut().chain(self.updates.iter_mut()) {
            def.lhs = def.lhs.iter().map(&mut f).collect();
            def.value = f(&def.value);
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferDecl {
    name: String,
    domain: Domain,
}

impl BufferDecl {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn dims(&self) -> usize {
        self.domain.dims()
    }
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    name: String,
}

impl ParamDecl {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Arena of funcs, buffer declarations and scalar parameters.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    funcs: Vec<Func>,
    buffers: Vec<BufferDecl>,
    params: Vec<ParamDecl>,
    generator: Counter,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a func with named pure arguments.
    pub fn func(&mut self, name: &str, args: &[&str]) -> FuncId {
        assert!(
            self.lookup(name).is_none(),
            "name `{name}` is already used in this graph"
        );
        let args = args.iter().map(|a| Var::new(*a)).collect();
        self.push(Func::new(name, args, Origin::User))
    }

    /// Give `func` its initial definition.
    pub fn define(&mut self, func: FuncId, value: impl Into<Expr>) {
        let f = &mut self.funcs[func.0];
        assert!(f.init.is_none(), "func `{}` is already defined", f.name);
        f.set_init(value.into());
    }

    /// Append an update definition without a reduction domain.
    pub fn update(&mut self, func: FuncId, lhs: Vec<Expr>, value: impl Into<Expr>) {
        self.push_checked_update(func, Definition::new(lhs, value.into(), None));
    }

    /// Append an update definition iterated over `rdom`.
    pub fn update_over(&mut self, func: FuncId, lhs: Vec<Expr>, value: impl Into<Expr>, rdom: RDom) {
        self.push_checked_update(func, Definition::new(lhs, value.into(), Some(rdom)));
    }

    /// Declare the extent the func is expected to be realized over.
    pub fn estimate(&mut self, func: FuncId, domain: Domain) {
        let f = &mut self.funcs[func.0];
        assert_eq!(domain.dims(), f.dims(), "estimate rank of `{}`", f.name);
        f.estimate = Some(domain);
    }

    /// Declare a buffer with extents `shape` and zero minimums.
    pub fn buffer(&mut self, name: &str, shape: &[usize]) -> BufferId {
        let domain = Domain::new(
            shape
                .iter()
                .map(|&n| Interval::from_extent(0, n as i64))
                .collect(),
        );
        self.buffer_with_domain(name, domain)
    }

    pub fn buffer_with_domain(&mut self, name: &str, domain: Domain) -> BufferId {
        assert!(
            self.lookup(name).is_none(),
            "name `{name}` is already used in this graph"
        );
        self.buffers.push(BufferDecl {
            name: name.to_string(),
            domain,
        });
        BufferId(self.buffers.len() - 1)
    }

    pub fn param(&mut self, name: &str) -> ParamId {
        assert!(
            self.lookup(name).is_none(),
            "name `{name}` is already used in this graph"
        );
        self.params.push(ParamDecl {
            name: name.to_string(),
        });
        ParamId(self.params.len() - 1)
    }

    /// The pure arguments of `func` as expressions.
    pub fn vars(&self, func: FuncId) -> Vec<Expr> {
        self[func].arg_exprs()
    }

    pub fn lookup(&self, name: &str) -> Option<Target> {
        if let Some(i) = self.funcs.iter().position(|f| f.name == name) {
            return Some(Target::Func(FuncId(i)));
        }
        if let Some(i) = self.buffers.iter().position(|b| b.name == name) {
            return Some(Target::Buffer(BufferId(i)));
        }
        self.params
            .iter()
            .position(|p| p.name == name)
            .map(|i| Target::Param(ParamId(i)))
    }

    /// Name of `target`, or `None` when it belongs to another graph.
    pub fn name_of(&self, target: Target) -> Option<&str> {
        match target {
            Target::Func(f) => self.funcs.get(f.0).map(Func::name),
            Target::Buffer(b) => self.buffers.get(b.0).map(BufferDecl::name),
            Target::Param(p) => self.params.get(p.0).map(ParamDecl::name),
        }
    }

    pub fn target_name(&self, target: Target) -> &str {
        match target {
            Target::Func(f) => self[f].name(),
            Target::Buffer(b) => self[b].name(),
            Target::Param(p) => self[p].name(),
        }
    }

    /// Number of dimensions a target is indexed with.
    pub fn target_dims(&self, target: Target) -> usize {
        match target {
            Target::Func(f) => self[f].dims(),
            Target::Buffer(b) => self[b].dims(),
            Target::Param(_) => 0,
        }
    }

    pub fn funcs(&self) -> impl Iterator<Item = (FuncId, &Func)> {
        self.funcs.iter().enumerate().map(|(i, f)| (FuncId(i), f))
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    pub(crate) fn push(&mut self, func: Func) -> FuncId {
        self.funcs.push(func);
        FuncId(self.funcs.len() - 1)
    }

    /// The func behind `func`, if it belongs to this graph.
    pub fn get(&self, func: FuncId) -> Option<&Func> {
        self.funcs.get(func.0)
    }

    pub(crate) fn func_mut(&mut self, func: FuncId) -> &mut Func {
        &mut self.funcs[func.0]
    }

    /// `base` if unused, otherwise `base$n` with a fresh `n`.
    pub(crate) fn fresh_name(&mut self, base: &str) -> String {
        let mut name = base.to_string();
        while self.lookup(&name).is_some() {
            name = format!("{base}${}", self.generator.fresh());
        }
        name
    }

    fn push_checked_update(&mut self, func: FuncId, def: Definition) {
        let f = &self.funcs[func.0];
        assert!(f.init.is_some(), "func `{}` needs a definition before updates", f.name);
        assert_eq!(def.lhs.len(), f.dims(), "update arity of `{}`", f.name);
        for (i, arg) in def.lhs.iter().enumerate() {
            for var in arg.free_vars() {
                assert!(
                    matches!(arg, Expr::Var(v) if *v == var) && f.dim_of(&var) == Some(i),
                    "pure variable `{}` of `{}` must appear alone at its own dimension",
                    var.name(),
                    f.name
                );
            }
        }
        self.funcs[func.0].push_update(def);
    }
}

impl Index<FuncId> for Graph {
    type Output = Func;

    fn index(&self, id: FuncId) -> &Func {
        &self.funcs[id.0]
    }
}

impl Index<BufferId> for Graph {
    type Output = BufferDecl;

    fn index(&self, id: BufferId) -> &BufferDecl {
        &self.buffers[id.0]
    }
}

impl Index<ParamId> for Graph {
    type Output = ParamDecl;

    fn index(&self, id: ParamId) -> &ParamDecl {
        &self.params[id.0]
    }
}

impl Display for Graph {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (i, func) in self.funcs.iter().enumerate() {
            for (_, def) in func.definitions() {
                let lhs = def.lhs.iter().map(|e| e.display(self)).join(", ");
                write!(f, "{i}: {}({lhs}) = {}", func.name, def.value.display(self))?;
                if let Some(rdom) = &def.rdom {
                    write!(f, " over {}", rdom_display(rdom))?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

pub(crate) fn rdom_display(rdom: &RDom) -> String {
    rdom.dims()
        .iter()
        .map(|(v, i)| format!("{} in [{}, {}]", v.name(), i.min, i.max))
        .join(", ")
}
