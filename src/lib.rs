//! Automatic differentiation of array pipelines.
//!
//! A [`Graph`] holds funcs: multi-dimensional functions of integer
//! coordinates with an initial definition and any number of update
//! definitions, optionally iterated over a reduction domain. Reverse mode
//! synthesizes adjoint funcs for every func, buffer and param the output
//! depends on; forward mode synthesizes tangents. Both return new graphs
//! that [`realize`](realize::realize) can evaluate.
//!
//! ```rust
//! use ndarray::array;
//! use pipegrad::prelude::*;
//!
//! let mut g = Graph::new();
//! let input = g.buffer("input", &[3]);
//! let r = RDom::new([("r", 0, 3)]);
//! let loss = g.func("loss", &[]);
//! g.define(loss, 0.0);
//! let v = Expr::load(input, [r.x()]);
//! g.update_over(loss, vec![], Expr::call(loss, []) + v.clone() * v, r);
//!
//! let d = propagate_scalar_adjoints(&g, loss).unwrap();
//! let mut ctx = Context::new();
//! ctx.insert(input, array![1.0, 2.0, 3.0].into_dyn());
//! let grad = realize(d.graph(), d.buffer(input).unwrap(), &Domain::from_shape(&[3]), &ctx).unwrap();
//! assert_eq!(grad, array![2.0, 4.0, 6.0].into_dyn());
//! ```

use num_traits::{Float, NumOps};

/// Element type that [`realize`](realize::realize) and [`Context`](context::Context) evaluate graphs in.
pub trait Floating: std::fmt::Debug + Float + NumOps {}

impl Floating for f32 {}
impl Floating for f64 {}

pub mod backward;
pub mod bounds;
pub mod context;
pub mod derivative;
pub mod error;
pub mod expr;
pub mod forward;
pub mod graph;
pub mod identity;
pub mod ops;
pub mod order;
pub mod print;
pub mod realize;
pub mod recurrence;

pub use backward::{propagate_adjoints, propagate_adjoints_from_buffer, propagate_scalar_adjoints};
pub use derivative::{Derivative, FuncKey};
pub use error::{DiffError, RealizeError};
pub use forward::{Tangent, propagate_tangents};
pub use graph::{Graph, RDom, Stage};

pub mod prelude {
    pub use crate::{
        Floating,
        backward::{propagate_adjoints, propagate_adjoints_from_buffer, propagate_scalar_adjoints},
        bounds::{Domain, Interval},
        context::{Context, TensorData},
        derivative::{Derivative, FuncKey},
        error::{DiffError, GraphError, LookupError, RealizeError, ShapeError},
        expr::{Expr, RVar, Var, abs, clamp, cos, exp, floor, log, max, min, pow, select, sin, sqrt, tanh},
        forward::{Tangent, propagate_tangents},
        graph::{Graph, Origin, RDom, Stage, Target},
        identity::{BufferId, FuncId, ParamId},
        print::{PrintOptions, print_func, render_func},
        realize::realize,
    };
}
