//! Forward-mode propagation of tangents.

use std::collections::{BTreeMap, HashMap};

use crate::{
    error::{DiffError, LookupError, ShapeError},
    expr::{Expr, Read, diff, simplify},
    graph::{Definition, Func, Graph, Origin, Stage, Target},
    identity::FuncId,
    order::build_order,
    recurrence::{UpdateKind, classify},
};

/// Result of forward propagation.
#[derive(Debug, Clone)]
pub struct Tangent {
    graph: Graph,
    func: FuncId,
    tangents: BTreeMap<Target, FuncId>,
}

impl Tangent {
    /// Tangent of the output.
    pub fn func(&self) -> FuncId {
        self.func
    }

    /// Tangent of any active target.
    pub fn of(&self, target: impl Into<Target>) -> Option<FuncId> {
        self.tangents.get(&target.into()).copied()
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }
}

fn snapshot(graph: &mut Graph, snapshots: &mut HashMap<(FuncId, Stage), FuncId>, func: FuncId, stage: Stage) -> FuncId {
    if stage >= graph[func].last_stage() {
        return func;
    }
    if let Some(id) = snapshots.get(&(func, stage)) {
        return *id;
    }
    let base = match stage {
        Stage::Initial => format!("{}_primal", graph[func].name()),
        Stage::Update(i) => format!("{}_{i}_primal", graph[func].name()),
    };
    let name = graph.fresh_name(&base);
    let copy = graph[func].truncated(stage, name, Origin::Primal { of: func, stage });
    let id = graph.push(copy);
    graph
        .func_mut(id)
        .map_definitions(|e| e.replace_calls(func, id));
    snapshots.insert((func, stage), id);
    id
}

/// Tangent of `output` when each named func, buffer or param moves along
/// the func it is mapped to.
pub fn propagate_tangents(
    graph: &Graph,
    output: FuncId,
    tangents: &BTreeMap<String, FuncId>,
) -> Result<Tangent, DiffError> {
    let mut seeds: BTreeMap<Target, FuncId> = BTreeMap::new();
    for (name, seed) in tangents {
        let target = graph
            .lookup(name)
            .ok_or_else(|| LookupError::UnknownName { name: name.clone() })?;
        let expected = graph.target_dims(target);
        let found = graph[*seed].dims();
        if expected != found {
            return Err(ShapeError::RankMismatch {
                name: graph[*seed].name().to_string(),
                expected,
                found,
            }
            .into());
        }
        seeds.insert(target, *seed);
    }

    let order = build_order(graph, output)?;
    log::info!(
        "propagating tangents of {} seeds to `{}`",
        seeds.len(),
        graph[output].name()
    );
    let mut out = graph.clone();
    let mut active = seeds.clone();
    let mut snapshots = HashMap::new();

    for &func in &order.funcs {
        if active.contains_key(&Target::Func(func)) {
            continue;
        }
        let f = &graph[func];
        let reads_active = f
            .definitions()
            .any(|(_, def)| def.value.reads().iter().any(|r| active.contains_key(&r.target)));
        if !reads_active {
            continue;
        }

        let name = out.fresh_name(&format!("{}_t", f.name()));
        let id = out.push(Func::new(name, f.args().to_vec(), Origin::Tangent { of: Target::Func(func) }));
        active.insert(Target::Func(func), id);

        for (stage, def) in f.definitions() {
            // self values in partials: before the update, or after it for scans
            let mut at = stage.prev();
            if stage != Stage::Initial {
                let kind = classify(graph, func, stage, def)?;
                check_additive(graph, func, stage, &kind, def)?;
                if matches!(kind, UpdateKind::Scan { .. }) {
                    at = Some(stage);
                }
            }
            let mut tangent_of = |read: &Read| {
                active
                    .get(&read.target)
                    .map(|t| Expr::call(*t, read.args.clone()))
            };
            let mut value = simplify::simplify(&diff::tangent(&def.value, &mut tangent_of));
            if let Some(at) = at.filter(|_| value.reads_target(Target::Func(func))) {
                let primal = snapshot(&mut out, &mut snapshots, func, at);
                value = value.replace_calls(func, primal);
            }
            match stage {
                Stage::Initial => out.func_mut(id).set_init(value),
                _ => out
                    .func_mut(id)
                    .push_update(Definition::new(def.lhs.clone(), value, def.rdom.clone())),
            }
        }
        log::debug!("tangent `{}` of `{}`", out[id].name(), f.name());
    }

    let func = match active.get(&Target::Func(output)) {
        Some(t) => *t,
        None => {
            let name = out.fresh_name(&format!("{}_t", graph[output].name()));
            let mut zero = Func::new(
                name,
                graph[output].args().to_vec(),
                Origin::Tangent {
                    of: Target::Func(output),
                },
            );
            zero.set_init(Expr::Const(0.0));
            out.push(zero)
        }
    };
    Ok(Tangent {
        graph: out,
        func,
        tangents: active,
    })
}

/// In-place reductions must accumulate additively, as in reverse mode.
fn check_additive(
    graph: &Graph,
    func: FuncId,
    stage: Stage,
    kind: &UpdateKind,
    def: &Definition,
) -> Result<(), DiffError> {
    let me = Target::Func(func);
    let partials = diff::partials(&def.value);
    let bad = match kind {
        UpdateKind::InPlace => {
            partials
                .iter()
                .any(|p| p.read.target == me && !simplify::simplify(&p.partial).is_one())
                || partials
                    .iter()
                    .any(|p| p.read.target != me && p.partial.reads_target(me))
        }
        UpdateKind::Scan { read, .. } => partials.iter().any(|p| {
            p.read.target == me && p.read.args != *read && !simplify::simplify(&p.partial).is_one()
        }),
        UpdateKind::Overwrite => false,
    };
    if bad {
        return Err(DiffError::UnsupportedRecurrence {
            func: graph[func].name().to_string(),
            stage,
            reason: "the reduction is not additive".to_string(),
        });
    }
    Ok(())
}
