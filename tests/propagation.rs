use std::collections::BTreeMap;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use ndarray::{ArrayD, IxDyn, array};
use pipegrad::prelude::*;
use rstest::rstest;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn x() -> Expr {
    Expr::var("x")
}

fn eval_scalar(graph: &Graph, func: FuncId, ctx: &Context) -> f64 {
    realize(graph, func, &Domain::scalar(), ctx).unwrap()[IxDyn(&[])]
}

/// Central differences of a scalar output with respect to every element of
/// `buffer`.
fn finite_differences(graph: &Graph, output: FuncId, buffer: BufferId, ctx: &Context) -> ArrayD<f64> {
    let eps = 1e-3;
    let base = ctx.tensors[&buffer].clone();
    let mut grad = ArrayD::zeros(base.raw_dim());
    for (index, _) in base.indexed_iter() {
        let mut probe = ctx.clone();
        probe.tensors.get_mut(&buffer).unwrap()[index.clone()] += eps;
        let up = eval_scalar(graph, output, &probe);
        probe.tensors.get_mut(&buffer).unwrap()[index.clone()] -= 2.0 * eps;
        let down = eval_scalar(graph, output, &probe);
        grad[index] = (up - down) / (2.0 * eps);
    }
    grad
}

/// `loss = sum(f(x)^2)` over `[0, extent)`.
fn sum_of_squares(graph: &mut Graph, f: FuncId, extent: i64) -> FuncId {
    let r = RDom::new([("s", 0, extent)]);
    let loss = graph.func("loss", &[]);
    graph.define(loss, 0.0);
    let v = Expr::call(f, [r.x()]);
    graph.update_over(loss, vec![], Expr::call(loss, []) + v.clone() * v, r);
    loss
}

fn ones(graph: &mut Graph, name: &str) -> FuncId {
    let f = graph.func(name, &["x"]);
    graph.define(f, 1.0);
    f
}

#[rstest]
#[case(array![1.0, -2.0, 0.5, 3.0, 0.0, 1.5])]
#[case(array![0.1, 0.2, 0.3, 0.4, 0.5, 0.6])]
fn test_blur_loss_matches_finite_differences(#[case] data: ndarray::Array1<f64>) {
    init_logger();
    let mut g = Graph::new();
    let input = g.buffer("input", &[6]);
    let blur = g.func("blur", &["x"]);
    g.define(
        blur,
        Expr::load(input, [x() - 1]) * 0.25 + Expr::load(input, [x()]) * 0.5 + Expr::load(input, [x() + 1]) * 0.25,
    );
    let r = RDom::new([("r", 1, 4)]);
    let loss = g.func("loss", &[]);
    g.define(loss, 0.0);
    let b = Expr::call(blur, [r.x()]);
    g.update_over(loss, vec![], Expr::call(loss, []) + b.clone() * b, r);

    let mut ctx = Context::new();
    ctx.insert(input, data.into_dyn());

    let d = propagate_scalar_adjoints(&g, loss).unwrap();
    let grad = realize(d.graph(), d.buffer(input).unwrap(), &Domain::from_shape(&[6]), &ctx).unwrap();
    let expected = finite_differences(&g, loss, input, &ctx);
    for (got, want) in grad.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(*got, *want, epsilon = 1e-6);
    }
}

#[test]
fn test_fan_out_sums_contributions() {
    init_logger();
    let mut g = Graph::new();
    let input = g.buffer("input", &[4]);
    let a = g.func("a", &["x"]);
    g.define(a, Expr::load(input, [x()]) * 2.0);
    let b = g.func("b", &["x"]);
    g.define(b, sin(Expr::load(input, [x()])));
    let out = g.func("out", &["x"]);
    g.define(out, Expr::call(a, [x()]) + Expr::call(b, [x()]));
    let seed = ones(&mut g, "seed");

    let d = propagate_adjoints(&g, out, seed, &[(Expr::from(0), Expr::from(3))]).unwrap();
    let data = array![0.0, 0.5, 1.0, 2.0];
    let mut ctx = Context::new();
    ctx.insert(input, data.clone().into_dyn());
    let grad = realize(d.graph(), d.buffer(input).unwrap(), &Domain::from_shape(&[4]), &ctx).unwrap();
    for (got, v) in grad.iter().zip(data.iter()) {
        assert_abs_diff_eq!(*got, 2.0 + f64::cos(*v), epsilon = 1e-12);
    }
}

#[test]
fn test_forward_and_reverse_agree() {
    init_logger();
    let mut g = Graph::new();
    let input = g.buffer("input", &[4]);
    let k = g.param("k");
    let f = g.func("f", &["x"]);
    g.define(f, tanh(Expr::load(input, [x()])) * Expr::param(k));
    let r = RDom::new([("r", 0, 4)]);
    let loss = g.func("loss", &[]);
    g.define(loss, 0.0);
    g.update_over(loss, vec![], Expr::call(loss, []) + Expr::call(f, [r.x()]), r);
    let dir = g.func("dir", &["i"]);
    g.define(dir, Expr::var("i") + 1);

    let mut ctx = Context::new();
    ctx.insert(input, array![0.3, -0.7, 1.1, 0.0].into_dyn()).set_param(k, 1.5);

    let d = propagate_scalar_adjoints(&g, loss).unwrap();
    let grad = realize(d.graph(), d.buffer(input).unwrap(), &Domain::from_shape(&[4]), &ctx).unwrap();
    let vjp: f64 = grad.iter().enumerate().map(|(i, v)| (i as f64 + 1.0) * v).sum();

    let t = propagate_tangents(&g, loss, &BTreeMap::from([("input".to_string(), dir)])).unwrap();
    let jvp = eval_scalar(t.graph(), t.func(), &ctx);
    assert_abs_diff_eq!(jvp, vjp, epsilon = 1e-10);

    let dk = eval_scalar(d.graph(), d.param(k).unwrap(), &ctx);
    let expected: f64 = [0.3_f64, -0.7, 1.1, 0.0].iter().map(|v| v.tanh()).sum();
    assert_abs_diff_eq!(dk, expected, epsilon = 1e-12);
}

#[test]
fn test_column_sum_broadcasts_buffer_seed() {
    init_logger();
    let mut g = Graph::new();
    let input = g.buffer("input", &[4, 2]);
    let seed = g.buffer("seed", &[2]);
    let r = RDom::new([("r", 0, 4)]);
    let colsum = g.func("colsum", &["y"]);
    g.define(colsum, 0.0);
    let y = Expr::var("y");
    g.update_over(
        colsum,
        vec![y.clone()],
        Expr::call(colsum, [y.clone()]) + Expr::load(input, [r.x(), y]),
        r,
    );

    let d = propagate_adjoints_from_buffer(&g, colsum, seed).unwrap();
    let mut ctx = Context::new();
    ctx.insert(input, ArrayD::zeros(IxDyn(&[4, 2])))
        .insert(seed, array![1.0, 10.0].into_dyn());
    let grad = realize(d.graph(), d.buffer(input).unwrap(), &Domain::from_shape(&[4, 2]), &ctx).unwrap();
    assert_eq!(
        grad,
        array![[1.0, 10.0], [1.0, 10.0], [1.0, 10.0], [1.0, 10.0]].into_dyn()
    );
}

#[test]
fn test_pointwise_update_needs_no_accumulator() {
    init_logger();
    let mut g = Graph::new();
    let input = g.buffer("input", &[3]);
    let node = g.func("node", &["x"]);
    g.define(node, Expr::load(input, [x()]));
    g.update(node, vec![x()], Expr::call(node, [x()]) + Expr::load(input, [x()]));
    let seed = ones(&mut g, "seed");

    let d = propagate_adjoints(&g, node, seed, &[(Expr::from(0), Expr::from(2))]).unwrap();
    assert!(d.lookup(FuncKey::new(input, Stage::Initial), false).is_err());
    assert!(d.adjoint(node, Stage::Update(0), false).is_err());
    assert!(d.adjoint(node, Stage::Initial, false).is_err());

    let mut ctx = Context::new();
    ctx.insert(input, array![5.0, -1.0, 2.0].into_dyn());
    let grad = realize(d.graph(), d.buffer(input).unwrap(), &Domain::from_shape(&[3]), &ctx).unwrap();
    assert_eq!(grad, array![2.0, 2.0, 2.0].into_dyn());
}

#[test]
fn test_scalar_square() {
    let mut g = Graph::new();
    let input = g.buffer("input", &[1]);
    let sq = g.func("sq", &[]);
    let v = Expr::load(input, [Expr::from(0)]);
    g.define(sq, v.clone() * v);

    let d = propagate_scalar_adjoints(&g, sq).unwrap();
    let mut ctx = Context::new();
    ctx.insert(input, array![3.0].into_dyn());
    let grad = realize(d.graph(), d.buffer(input).unwrap(), &Domain::from_shape(&[1]), &ctx).unwrap();
    assert_abs_diff_eq!(grad[IxDyn(&[0])], 6.0);
}

#[test]
fn test_weighted_histogram() {
    init_logger();
    let mut g = Graph::new();
    let idx = g.buffer("idx", &[6]);
    let w = g.buffer("w", &[6]);
    let seed = g.buffer("seed", &[4]);
    let r = RDom::new([("r", 0, 6)]);
    let hist = g.func("hist", &["b"]);
    g.define(hist, 0.0);
    let bin = clamp(Expr::load(idx, [r.x()]), 0, 3);
    g.update_over(
        hist,
        vec![bin.clone()],
        Expr::call(hist, [bin]) + Expr::load(w, [r.x()]),
        r,
    );

    let d = propagate_adjoints_from_buffer(&g, hist, seed).unwrap();
    let names: Vec<&str> = d
        .funcs(hist)
        .unwrap()
        .into_iter()
        .map(|f| d.graph()[f].name())
        .collect();
    assert_eq!(names, ["hist_0_d", "hist_d"]);
    let acc = d.lookup(FuncKey::new(w, Stage::Initial), false).unwrap();
    assert_eq!(d.graph()[acc].name(), "w_d_acc");

    let mut ctx = Context::new();
    ctx.insert(idx, array![0.0, 1.0, 1.0, 3.0, 9.0, -2.0].into_dyn())
        .insert(w, ArrayD::ones(IxDyn(&[6])))
        .insert(seed, array![1.0, 2.0, 3.0, 4.0].into_dyn());
    let grad = realize(d.graph(), d.buffer(w).unwrap(), &Domain::from_shape(&[6]), &ctx).unwrap();
    assert_eq!(grad, array![1.0, 2.0, 2.0, 4.0, 4.0, 1.0].into_dyn());
}

#[test]
fn test_cumulative_sum() {
    init_logger();
    let mut g = Graph::new();
    let input = g.buffer("input", &[5]);
    let cum = g.func("cum", &["x"]);
    g.define(cum, Expr::load(input, [x()]));
    let r = RDom::new([("r", 1, 4)]);
    g.update_over(
        cum,
        vec![r.x()],
        Expr::call(cum, [r.x()]) + Expr::call(cum, [r.x() - 1]),
        r,
    );
    let seed = ones(&mut g, "seed");

    let d = propagate_adjoints(&g, cum, seed, &[(Expr::from(0), Expr::from(4))]).unwrap();
    let mut ctx = Context::new();
    ctx.insert(input, array![1.0, 2.0, 3.0, 4.0, 5.0].into_dyn());
    let grad = realize(d.graph(), d.buffer(input).unwrap(), &Domain::from_shape(&[5]), &ctx).unwrap();
    assert_eq!(grad, array![5.0, 4.0, 3.0, 2.0, 1.0].into_dyn());
}

#[test]
fn test_param_adjoint_sums_over_output() {
    let mut g = Graph::new();
    let input = g.buffer("input", &[4]);
    let k = g.param("k");
    let out = g.func("out", &["x"]);
    g.define(out, Expr::load(input, [x()]) * Expr::param(k));
    let seed = ones(&mut g, "seed");

    let d = propagate_adjoints(&g, out, seed, &[(Expr::from(0), Expr::from(3))]).unwrap();
    let mut ctx = Context::new();
    ctx.insert(input, array![1.0, 2.0, 3.0, 4.0].into_dyn()).set_param(k, 7.0);
    assert_abs_diff_eq!(eval_scalar(d.graph(), d.param(k).unwrap(), &ctx), 10.0);
}

#[test]
fn test_explicit_bounds_limit_the_seed() {
    let mut g = Graph::new();
    let input = g.buffer("input", &[4]);
    let out = g.func("out", &["x"]);
    g.define(out, Expr::load(input, [x()]) * 2.0);
    let seed = ones(&mut g, "seed");

    let d = propagate_adjoints(&g, out, seed, &[(Expr::from(1), Expr::from(2))]).unwrap();
    let mut ctx: Context<f64> = Context::new();
    ctx.insert(input, ArrayD::zeros(IxDyn(&[4])));
    let grad = realize(d.graph(), d.buffer(input).unwrap(), &Domain::from_shape(&[4]), &ctx).unwrap();
    assert_eq!(grad, array![0.0, 2.0, 2.0, 0.0].into_dyn());
}

#[test]
fn test_cycle_is_rejected() {
    let mut g = Graph::new();
    let a = g.func("a", &["x"]);
    let b = g.func("b", &["x"]);
    g.define(a, Expr::call(b, [x()]));
    g.define(b, Expr::call(a, [x()]) + 1.0);
    let seed = ones(&mut g, "seed");
    let err = propagate_adjoints(&g, a, seed, &[(Expr::from(0), Expr::from(1))]).unwrap_err();
    assert!(matches!(err, DiffError::Graph(GraphError::Cycle { .. })));
}

#[test]
fn test_scalar_seed_needs_single_element() {
    let mut g = Graph::new();
    let f = g.func("f", &["x"]);
    g.define(f, x());
    g.estimate(f, Domain::from_shape(&[3]));
    let err = propagate_scalar_adjoints(&g, f).unwrap_err();
    assert_eq!(
        err,
        DiffError::Shape(ShapeError::NotSingleElement {
            func: "f".into(),
            extents: vec![3]
        })
    );
}

#[test]
fn test_multiplicative_reduction_is_unsupported() {
    let mut g = Graph::new();
    let input = g.buffer("input", &[3]);
    let r = RDom::new([("r", 0, 3)]);
    let prod = g.func("prod", &[]);
    g.define(prod, 1.0);
    g.update_over(prod, vec![], Expr::call(prod, []) * Expr::load(input, [r.x()]), r);
    assert!(matches!(
        propagate_scalar_adjoints(&g, prod),
        Err(DiffError::UnsupportedRecurrence { .. })
    ));
}

type Build = fn(&mut Graph, BufferId) -> FuncId;

/// `f(r) = f(r + 1) * 2`: every read sees a position written later.
fn shift_from_later(g: &mut Graph, input: BufferId) -> FuncId {
    let f = g.func("f", &["x"]);
    g.define(f, Expr::load(input, [x()]));
    let r = RDom::new([("r", 0, 4)]);
    g.update_over(f, vec![r.x()], Expr::call(f, [r.x() + 1]) * 2.0, r);
    sum_of_squares(g, f, 5)
}

/// `f(r) = f(r) + f(r + 1) * input(r)`
fn accumulate_from_later(g: &mut Graph, input: BufferId) -> FuncId {
    let f = g.func("f", &["x"]);
    g.define(f, Expr::load(input, [x()]));
    let r = RDom::new([("r", 0, 4)]);
    g.update_over(
        f,
        vec![r.x()],
        Expr::call(f, [r.x()]) + Expr::call(f, [r.x() + 1]) * Expr::load(input, [r.x()]),
        r,
    );
    sum_of_squares(g, f, 5)
}

/// `f(r) = f(r) * input(r)`, each position written once.
fn elementwise_product(g: &mut Graph, input: BufferId) -> FuncId {
    let f = g.func("f", &["x"]);
    g.define(f, Expr::load(input, [x()]));
    let r = RDom::new([("r", 0, 5)]);
    g.update_over(
        f,
        vec![r.x()],
        Expr::call(f, [r.x()]) * Expr::load(input, [r.x()]),
        r,
    );
    sum_of_squares(g, f, 5)
}

/// Positions 0 and 1 are replaced by values computed from 2 and 3.
fn partial_overwrite(g: &mut Graph, input: BufferId) -> FuncId {
    let f = g.func("f", &["x"]);
    let v = Expr::load(input, [x()]);
    g.define(f, v.clone() * v);
    let r = RDom::new([("r", 0, 2)]);
    g.update_over(f, vec![r.x()], sin(Expr::call(f, [r.x() + 2])) * 3.0, r);
    sum_of_squares(g, f, 5)
}

/// `f(r) = f(r) + sin(f(r - 1)) * input(r)`
fn nonlinear_scan(g: &mut Graph, input: BufferId) -> FuncId {
    let f = g.func("f", &["x"]);
    g.define(f, Expr::load(input, [x()]));
    let r = RDom::new([("r", 1, 4)]);
    g.update_over(
        f,
        vec![r.x()],
        Expr::call(f, [r.x()]) + sin(Expr::call(f, [r.x() - 1])) * Expr::load(input, [r.x()]),
        r,
    );
    sum_of_squares(g, f, 5)
}

/// A pure update, a scan and a second pure update on one func.
fn multi_stage(g: &mut Graph, input: BufferId) -> FuncId {
    let f = g.func("f", &["x"]);
    g.define(f, Expr::load(input, [x()]));
    g.update(f, vec![x()], Expr::call(f, [x()]) * Expr::call(f, [x()]));
    let r = RDom::new([("r", 1, 4)]);
    g.update_over(
        f,
        vec![r.x()],
        Expr::call(f, [r.x()]) + Expr::call(f, [r.x() - 1]) * 0.5,
        r,
    );
    g.update(f, vec![x()], tanh(Expr::call(f, [x()])) + Expr::load(input, [x()]));
    sum_of_squares(g, f, 5)
}

#[rstest]
#[case::shift_from_later(shift_from_later)]
#[case::accumulate_from_later(accumulate_from_later)]
#[case::elementwise_product(elementwise_product)]
#[case::partial_overwrite(partial_overwrite)]
#[case::nonlinear_scan(nonlinear_scan)]
#[case::multi_stage(multi_stage)]
fn test_update_gradients(#[case] build: Build) {
    init_logger();
    let mut g = Graph::new();
    let input = g.buffer("input", &[5]);
    let loss = build(&mut g, input);
    let dir = g.func("dir", &["i"]);
    g.define(dir, Expr::var("i") * 0.5 - 1.0);

    let mut ctx = Context::new();
    ctx.insert(input, array![1.2, -0.7, 1.5, 0.9, 0.4].into_dyn());

    let d = propagate_scalar_adjoints(&g, loss).unwrap();
    let grad = realize(d.graph(), d.buffer(input).unwrap(), &Domain::from_shape(&[5]), &ctx).unwrap();
    let expected = finite_differences(&g, loss, input, &ctx);
    for (got, want) in grad.iter().zip(expected.iter()) {
        assert_relative_eq!(*got, *want, epsilon = 1e-5, max_relative = 1e-4);
    }

    let vjp: f64 = grad.iter().enumerate().map(|(i, v)| (i as f64 * 0.5 - 1.0) * v).sum();
    let t = propagate_tangents(&g, loss, &BTreeMap::from([("input".to_string(), dir)])).unwrap();
    let jvp = eval_scalar(t.graph(), t.func(), &ctx);
    assert_relative_eq!(jvp, vjp, epsilon = 1e-10, max_relative = 1e-10);
}

#[test]
fn test_shift_from_later_gradient() {
    let mut g = Graph::new();
    let input = g.buffer("input", &[5]);
    let loss = shift_from_later(&mut g, input);
    let d = propagate_scalar_adjoints(&g, loss).unwrap();

    let mut ctx = Context::new();
    ctx.insert(input, array![0.5, 1.2, -0.7, 1.5, 0.9].into_dyn());
    let grad = realize(d.graph(), d.buffer(input).unwrap(), &Domain::from_shape(&[5]), &ctx).unwrap();
    // f = [2 in(1), 2 in(2), 2 in(3), 2 in(4), in(4)]
    let want = [0.0, 9.6, -5.6, 12.0, 9.0];
    for (got, want) in grad.iter().zip(want) {
        assert_abs_diff_eq!(*got, want, epsilon = 1e-12);
    }
}

#[test]
fn test_every_reachable_stage_has_an_adjoint() {
    let mut g = Graph::new();
    let input = g.buffer("input", &[5]);
    let loss = multi_stage(&mut g, input);
    let d = propagate_scalar_adjoints(&g, loss).unwrap();

    let order = pipegrad::order::build_order(&g, loss).unwrap();
    for &(func, stage) in &order.stages {
        assert!(d.adjoint(func, stage, true).is_ok(), "{} {stage}", g[func].name());
    }
    for &func in &order.funcs {
        let stages = g[func].num_updates() + 1;
        let bounded = d
            .funcs(func)
            .unwrap()
            .into_iter()
            .filter(|id| matches!(d.graph()[*id].origin(), Origin::Adjoint { bounded: true, .. }))
            .count();
        assert_eq!(bounded, stages);
        let past_last = Stage::Update(g[func].num_updates());
        assert!(matches!(
            d.adjoint(func, past_last, true),
            Err(LookupError::Missing { .. })
        ));
    }
    assert!(d.adjoint(loss, Stage::Initial, true).is_ok());
    assert!(d.adjoint(loss, Stage::Update(0), true).is_ok());
    assert!(d.buffer(input).is_ok());
}

#[test]
fn test_unordered_recurrences_are_unsupported() {
    let mut g = Graph::new();
    let input = g.buffer("input", &[5]);
    let f = g.func("f", &["x"]);
    g.define(f, Expr::load(input, [x()]));
    let r = RDom::new([("r", 1, 3)]);
    g.update_over(
        f,
        vec![r.x()],
        Expr::call(f, [r.x() - 1]) * Expr::call(f, [r.x() + 1]),
        r,
    );
    let loss = sum_of_squares(&mut g, f, 5);
    assert!(matches!(
        propagate_scalar_adjoints(&g, loss),
        Err(DiffError::UnsupportedRecurrence { .. })
    ));
}

#[test]
fn test_repeated_overwrite_is_unsupported() {
    let mut g = Graph::new();
    let input = g.buffer("input", &[3]);
    let last = g.func("last", &[]);
    g.define(last, 0.0);
    let r = RDom::new([("r", 0, 3)]);
    g.update_over(last, vec![], Expr::load(input, [r.x()]), r);
    assert!(matches!(
        propagate_scalar_adjoints(&g, last),
        Err(DiffError::UnsupportedRecurrence { .. })
    ));
}
