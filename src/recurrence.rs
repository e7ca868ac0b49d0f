//! Per-func processing state and classification of update definitions.

use std::collections::HashMap;

use crate::{
    error::DiffError,
    expr::{Expr, RVar, Var, simplify},
    graph::{Definition, Graph, RDom, Stage, Target},
    identity::FuncId,
    ops::{BinaryOp, UnaryOp},
};

/// Where a func is in the last-to-first walk over its stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitState {
    Unvisited,
    Processing(Stage),
    Resolved,
}

/// Enforces that each func's stages are processed last to first and that
/// contributions from other funcs arrive before the first of them.
#[derive(Debug, Default)]
pub struct Recurrences {
    states: HashMap<FuncId, VisitState>,
}

impl Recurrences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, func: FuncId) -> VisitState {
        self.states
            .get(&func)
            .copied()
            .unwrap_or(VisitState::Unvisited)
    }

    pub fn begin(&mut self, graph: &Graph, func: FuncId, stage: Stage) -> Result<(), DiffError> {
        let expected = match self.state(func) {
            VisitState::Unvisited => Some(graph[func].last_stage()),
            VisitState::Processing(prev) => prev.prev(),
            VisitState::Resolved => None,
        };
        if expected != Some(stage) {
            return Err(out_of_order(graph, func, stage));
        }
        let next = match stage {
            Stage::Initial => VisitState::Resolved,
            _ => VisitState::Processing(stage),
        };
        self.states.insert(func, next);
        Ok(())
    }

    /// A consumer contributes to `func`.
    pub fn accept(&self, graph: &Graph, func: FuncId) -> Result<(), DiffError> {
        match self.state(func) {
            VisitState::Unvisited => Ok(()),
            _ => Err(out_of_order(graph, func, graph[func].last_stage())),
        }
    }
}

fn out_of_order(graph: &Graph, func: FuncId, stage: Stage) -> DiffError {
    DiffError::OutOfOrder {
        func: graph[func].name().to_string(),
        stage,
    }
}

/// How an update definition uses the func's previous values.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    /// Self-reads only see values from before the update: written positions
    /// lose their old value and feed nothing else.
    Overwrite,
    /// Accumulation into positions that may be written many times; every
    /// self-read sits at the written position.
    InPlace,
    /// Each position is written once and one self-read sees a position
    /// written by an earlier iteration.
    Scan { read: Vec<Expr>, in_place: bool },
}

/// One coordinate of a written or read position.
#[derive(Debug, Clone, PartialEq)]
enum Coord {
    Fixed(i64),
    Pure(Var),
    /// `±var + offset`
    Reduction { var: RVar, positive: bool, offset: i64 },
}

fn coord(e: &Expr) -> Option<Coord> {
    let e = simplify::simplify(e);
    if let Some(k) = e.as_integer() {
        return Some(Coord::Fixed(k));
    }
    let reduction = |e: &Expr, positive: bool, offset: i64| match e {
        Expr::RVar(var) => Some(Coord::Reduction {
            var: var.clone(),
            positive,
            offset,
        }),
        _ => None,
    };
    match &e {
        Expr::Var(v) => Some(Coord::Pure(v.clone())),
        Expr::RVar(_) => reduction(&e, true, 0),
        Expr::Unary(UnaryOp::Neg, a) => reduction(a, false, 0),
        Expr::Binary(BinaryOp::Add, a, b) => match (a.as_integer(), b.as_integer()) {
            (None, Some(c)) => reduction(a, true, c),
            (Some(c), None) => reduction(b, true, c),
            _ => None,
        },
        Expr::Binary(BinaryOp::Sub, a, b) => match (a.as_integer(), b.as_integer()) {
            (None, Some(c)) => reduction(a, true, -c),
            (Some(c), None) => reduction(b, false, c),
            _ => None,
        },
        _ => None,
    }
}

/// Coordinates of the written position when no position is written twice:
/// distinct pure variables, and distinct `±rvar + c` covering every
/// reduction dimension of more than one point.
fn injective_lhs(def: &Definition) -> Option<Vec<Coord>> {
    let coords: Vec<Coord> = def.lhs.iter().map(coord).collect::<Option<_>>()?;
    let mut pure = vec![];
    let mut reduction = vec![];
    for c in &coords {
        match c {
            Coord::Fixed(_) => {}
            Coord::Pure(v) if pure.contains(&v) => return None,
            Coord::Pure(v) => pure.push(v),
            Coord::Reduction { var, .. } if reduction.contains(&var) => return None,
            Coord::Reduction { var, .. } => reduction.push(var),
        }
    }
    let covered = def.rdom.as_ref().is_none_or(|rdom| {
        rdom.dims()
            .iter()
            .all(|(v, range)| range.extent() <= 1 || reduction.contains(&v))
    });
    covered.then_some(coords)
}

/// Whether every position the definition writes is written once.
pub fn writes_once(def: &Definition) -> bool {
    injective_lhs(def).is_some()
}

/// Which value of the func a self-read sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seen {
    /// The value before the update: the read position is the written one,
    /// is written by a later iteration, or is never written.
    Before,
    /// A value written by an earlier iteration.
    Earlier,
}

fn seen(written: &[Coord], rdom: &RDom, args: &[Expr]) -> Option<Seen> {
    let mut delta: HashMap<&RVar, i64> = HashMap::new();
    let mut never = false;
    for (w, a) in written.iter().zip(args) {
        match (w, coord(a)?) {
            (Coord::Fixed(k), Coord::Fixed(j)) => never |= *k != j,
            (Coord::Pure(v), Coord::Pure(u)) if *v == u => {}
            (
                Coord::Reduction {
                    var,
                    positive,
                    offset,
                },
                Coord::Reduction {
                    var: u,
                    positive: p,
                    offset: o,
                },
            ) if *var == u && *positive == p => {
                // the iteration that writes the read position, relative to this one
                let d = if p { o - offset } else { offset - o };
                delta.insert(var, d);
            }
            _ => return None,
        }
    }
    if never {
        return Some(Seen::Before);
    }
    // last dimension outermost
    let lead = rdom
        .dims()
        .iter()
        .rev()
        .map(|(v, _)| delta.get(v).copied().unwrap_or(0))
        .find(|d| *d != 0);
    Some(match lead {
        Some(d) if d < 0 => Seen::Earlier,
        _ => Seen::Before,
    })
}

pub fn classify(graph: &Graph, func: FuncId, stage: Stage, def: &Definition) -> Result<UpdateKind, DiffError> {
    let unsupported = |reason: &str| DiffError::UnsupportedRecurrence {
        func: graph[func].name().to_string(),
        stage,
        reason: reason.to_string(),
    };
    let me = Target::Func(func);
    if def.lhs.iter().any(|a| a.reads_target(me)) {
        return Err(unsupported("the written position depends on the func itself"));
    }
    let mut reads: Vec<Vec<Expr>> = vec![];
    for read in def.value.reads() {
        if read.target != me {
            continue;
        }
        if read.args.iter().any(|a| a.reads_target(me)) {
            return Err(unsupported("a self-read is indexed by the func itself"));
        }
        if !reads.contains(&read.args) {
            reads.push(read.args);
        }
    }
    let Some(rdom) = def.rdom.as_ref().filter(|_| !reads.is_empty()) else {
        return Ok(UpdateKind::Overwrite);
    };

    let Some(written) = injective_lhs(def) else {
        if reads.iter().all(|args| *args == def.lhs) {
            return Ok(UpdateKind::InPlace);
        }
        return Err(unsupported("a position written more than once is read elsewhere"));
    };
    let mut earlier = vec![];
    for args in &reads {
        match seen(&written, rdom, args) {
            Some(Seen::Before) => {}
            Some(Seen::Earlier) => earlier.push(args),
            None => return Err(unsupported("a self-read cannot be ordered against the written positions")),
        }
    }
    match earlier.as_slice() {
        [] => Ok(UpdateKind::Overwrite),
        [read] => {
            if reads.iter().any(|args| args != *read && *args != def.lhs) {
                return Err(unsupported("a scan also reads positions written later"));
            }
            Ok(UpdateKind::Scan {
                read: (*read).clone(),
                in_place: reads.contains(&def.lhs),
            })
        }
        _ => Err(unsupported("more than one earlier position is read")),
    }
}
