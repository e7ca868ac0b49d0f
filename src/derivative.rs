use std::collections::BTreeMap;

use crate::{
    error::LookupError,
    graph::{Graph, Stage, Target},
    identity::{BufferId, FuncId, ParamId},
};

/// `(target, stage)`: which value an adjoint is taken with respect to.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct FuncKey {
    pub target: Target,
    pub stage: Stage,
}

impl FuncKey {
    pub fn new(target: impl Into<Target>, stage: Stage) -> Self {
        Self {
            target: target.into(),
            stage,
        }
    }
}

/// The synthesized adjoint funcs of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjointSlot {
    /// Zero outside the region of the func it differentiates.
    pub bounded: FuncId,
    /// The raw accumulation, present when it needed update definitions.
    pub unbounded: Option<FuncId>,
}

/// Result of reverse propagation: the extended graph plus one slot for
/// every key reachable backwards from the output.
#[derive(Debug, Clone)]
pub struct Derivative {
    graph: Graph,
    output: FuncId,
    slots: BTreeMap<FuncKey, AdjointSlot>,
}

impl Derivative {
    pub(crate) fn new(graph: Graph, output: FuncId, slots: BTreeMap<FuncKey, AdjointSlot>) -> Self {
        Self {
            graph,
            output,
            slots,
        }
    }

    /// Adjoint of `func` after `stage`.
    pub fn adjoint(&self, func: FuncId, stage: Stage, bounded: bool) -> Result<FuncId, LookupError> {
        self.lookup(FuncKey::new(func, stage), bounded)
    }

    /// Bounded adjoint of the initial definition of `func`.
    pub fn of(&self, func: FuncId) -> Result<FuncId, LookupError> {
        self.adjoint(func, Stage::Initial, true)
    }

    pub fn buffer(&self, buffer: BufferId) -> Result<FuncId, LookupError> {
        self.lookup(FuncKey::new(buffer, Stage::Initial), true)
    }

    pub fn param(&self, param: ParamId) -> Result<FuncId, LookupError> {
        self.lookup(FuncKey::new(param, Stage::Initial), true)
    }

    pub fn lookup(&self, key: FuncKey, bounded: bool) -> Result<FuncId, LookupError> {
        let slot = self.slots.get(&key);
        let found = match (slot, bounded) {
            (Some(slot), true) => Some(slot.bounded),
            (Some(slot), false) => slot.unbounded,
            (None, _) => None,
        };
        found.ok_or_else(|| self.missing(key.target, key.stage, bounded))
    }

    fn missing(&self, target: Target, stage: Stage, bounded: bool) -> LookupError {
        let target = match self.graph.name_of(target) {
            Some(name) => name.to_string(),
            None => match target {
                Target::Func(f) => f.to_string(),
                Target::Buffer(b) => b.to_string(),
                Target::Param(p) => p.to_string(),
            },
        };
        LookupError::Missing {
            target,
            stage,
            bounded,
        }
    }

    /// Adjoint funcs of `func` from its last stage down to the initial one,
    /// each bounded func followed by its unbounded one when present.
    pub fn funcs(&self, func: FuncId) -> Result<Vec<FuncId>, LookupError> {
        let Some(f) = self.graph.get(func) else {
            return Err(self.missing(func.into(), Stage::Initial, true));
        };
        let mut out = vec![];
        let mut stage = Some(f.last_stage());
        while let Some(s) = stage {
            let slot = self
                .slot(FuncKey::new(func, s))
                .ok_or_else(|| self.missing(func.into(), s, true))?;
            out.push(slot.bounded);
            out.extend(slot.unbounded);
            stage = s.prev();
        }
        Ok(out)
    }

    pub fn slot(&self, key: FuncKey) -> Option<&AdjointSlot> {
        self.slots.get(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &FuncKey> {
        self.slots.keys()
    }

    pub fn output(&self) -> FuncId {
        self.output
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }
}
