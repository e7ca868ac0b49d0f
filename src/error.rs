use itertools::Itertools;

use crate::graph::Stage;

/// Structural problems found while ordering the graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
    #[error("func `{func}` reads itself in its initial definition")]
    SelfReference { func: String },
    #[error("func `{func}` is used but never defined")]
    Undefined { func: String },
}

/// Domain problems found while resolving the seed or inferring bounds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("`{func}` is not single-element (extents [{}])", extents.iter().join(", "))]
    NotSingleElement { func: String, extents: Vec<i64> },
    #[error("`{name}` has {found} dimensions, expected {expected}")]
    RankMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("bound of dimension {dim} of `{func}` is not an integer constant")]
    NonConstantBound { func: String, dim: usize },
    #[error("`{consumer}` reads `{target}` at an unbounded index in dimension {dim}")]
    UnboundedAccess {
        consumer: String,
        target: String,
        dim: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("no {} adjoint of `{target}` at {stage}", if *bounded { "bounded" } else { "unbounded" })]
    Missing {
        target: String,
        stage: Stage,
        bounded: bool,
    },
    #[error("no func, buffer or param named `{name}`")]
    UnknownName { name: String },
}

/// Errors returned by the propagators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    /// An update definition whose recurrence has no supported adjoint.
    #[error("cannot differentiate {stage} of `{func}`: {reason}")]
    UnsupportedRecurrence {
        func: String,
        stage: Stage,
        reason: String,
    },
    /// A contribution reached a func after its stages were processed.
    #[error("adjoint contribution to {stage} of `{func}` arrived out of order")]
    OutOfOrder { func: String, stage: Stage },
}

/// Errors of the reference interpreter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RealizeError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error("no data bound to buffer `{name}`")]
    MissingBuffer { name: String },
    #[error("no value bound to param `{name}`")]
    MissingParam { name: String },
    #[error("data for `{name}` has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("`{name}` read out of bounds at {index:?}")]
    OutOfBounds { name: String, index: Vec<i64> },
    #[error("variable `{name}` is not bound")]
    UnboundVariable { name: String },
}
