use approx::{assert_abs_diff_eq, assert_relative_eq};
use scalargrad::{GradError, Tape};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_arithm() {
    init();
    let tape = Tape::new();
    let a = tape.term("a", 123.);
    let b = tape.term("b", 321.);
    let c = tape.term("c", 42.);
    let ab = a + b;
    let abc = ab * c;
    assert_eq!(abc.data(), (123. + 321.) * 42.);
    abc.backprop().unwrap();
    assert_eq!(a.grad(), 42.);
    assert_eq!(b.grad(), 42.);
    assert_eq!(c.grad(), 123. + 321.);

    tape.zero_grad();
    let d = tape.term("d", 2.);
    let abcd = abc / d;
    abcd.backprop().unwrap();
    assert_relative_eq!(c.grad(), (123. + 321.) / 2.);
    assert_relative_eq!(d.grad(), -(123. + 321.) * 42. / 4.);
}

#[test]
fn test_diamond() {
    init();
    let tape = Tape::new();
    let a = tape.term("a", 1.);
    let a2 = -a;
    let b = tape.term("b", 3.);
    let c = tape.term("c", 5.);
    let ab = a2 + b;
    let ac = a2 + c;
    let abac = ab + ac;

    abac.backprop().unwrap();
    assert_eq!(abac.data(), 6.);
    assert_eq!(a.grad(), -2.);
    assert_eq!(b.grad(), 1.);
    assert_eq!(c.grad(), 1.);
}

#[test]
fn test_fan_out() {
    init();
    let tape = Tape::new();
    let x = tape.term("x", -2.5);
    let y = x * x;
    y.backprop().unwrap();
    assert_eq!(x.grad(), -5.);
    assert_eq!(y.topo_order().unwrap().len(), 2);
}

#[test]
fn test_sigmoid() {
    init();
    let tape = Tape::new();
    let x = tape.term("x", 0.8);
    let sigmoid = 1. / (1. + (-x).exp());
    let s = 1. / (1. + (-0.8f64).exp());
    assert_relative_eq!(sigmoid.data(), s, epsilon = 1e-12);
    sigmoid.backprop().unwrap();
    assert_relative_eq!(x.grad(), s * (1. - s), epsilon = 1e-12);
}

#[test]
fn test_neuron() {
    init();
    let tape = Tape::new();
    let x1 = tape.term("x1", 2.);
    let x2 = tape.term("x2", 1.);
    let w1 = tape.term("w1", 1.);
    let w2 = tape.term("w2", -1.);
    let b = tape.term("b", 0.);
    let out = (w1 * x1 + w2 * x2 + b).tanh();

    let t = 1f64.tanh();
    assert_relative_eq!(out.data(), t, epsilon = 1e-12);
    out.backprop().unwrap();
    let dt = 1. - t * t;
    assert_relative_eq!(w1.grad(), 2. * dt, epsilon = 1e-12);
    assert_relative_eq!(w2.grad(), dt, epsilon = 1e-12);
    assert_relative_eq!(b.grad(), dt, epsilon = 1e-12);
}

#[test]
fn test_pow() {
    init();
    let tape = Tape::new();
    let a = tape.term("a", 1.7);
    let y = a.pow(2.5);
    y.backprop().unwrap();
    assert_relative_eq!(a.grad(), 2.5 * 1.7f64.powf(1.5), epsilon = 1e-12);

    let n = tape.term("n", 2.);
    let len = tape.len();
    assert!(matches!(a.pow_term(n), Err(GradError::InvalidExponent { .. })));
    assert_eq!(tape.len(), len);
    assert!(matches!(
        a.pow_term(n + n),
        Err(GradError::InvalidExponent { .. })
    ));
}

#[test]
fn test_zero_grad() {
    init();
    let tape = Tape::new();
    let x = tape.term("x", 0.6);
    let w = tape.term("w", 1.5);
    let y = (x * w).tanh() - x.exp();
    y.backprop().unwrap();
    let first = (x.grad(), w.grad());
    assert_abs_diff_eq!(
        first.0,
        1.5 * (1. - (0.9f64).tanh().powi(2)) - 0.6f64.exp(),
        epsilon = 1e-12
    );

    y.zero_grad().unwrap();
    assert!(y.topo_order().unwrap().iter().all(|t| t.grad() == 0.));
    y.backprop().unwrap();
    assert_eq!((x.grad(), w.grad()), first);
}

#[test]
fn test_tape_zero_grad_covers_unreachable() {
    let tape = Tape::new();
    let a = tape.term("a", 1.);
    let b = tape.term("b", 2.);
    let c = a * b;
    let d = a + b;
    c.backprop().unwrap();
    d.backprop().unwrap();
    assert_eq!(a.grad(), 3.);
    d.zero_grad().unwrap();
    assert_eq!(c.grad(), 1.);
    tape.zero_grad();
    assert_eq!(c.grad(), 0.);
}

#[test]
fn test_set() {
    let tape = Tape::new();
    let a = tape.term("a", 1.);
    let b = a * 3.;
    a.set(2.).unwrap();
    assert_eq!(a.data(), 2.);
    assert_eq!(b.data(), 3.);
    assert!(matches!(b.set(0.), Err(GradError::NotLeaf { .. })));
}

#[test]
fn test_divide_by_zero() {
    let tape = Tape::new();
    let a = tape.term("a", -1.);
    let b = tape.term("b", 0.);
    let c = a / b;
    assert_eq!(c.data(), f64::NEG_INFINITY);
    c.backprop().unwrap();
    assert_eq!(a.grad(), f64::INFINITY);
}

#[cfg(not(feature = "expr_name"))]
#[test]
fn test_deep_chain() {
    let tape = Tape::new();
    let x = tape.term("x", 0.);
    let mut y = x;
    for _ in 0..100_000 {
        y = y + 1.;
    }
    assert_eq!(y.data(), 100_000.);
    y.backprop().unwrap();
    assert_eq!(x.grad(), 1.);
}

#[test]
#[should_panic(expected = "different tapes")]
fn test_terms_from_different_tapes() {
    let tape1 = Tape::new();
    let tape2 = Tape::new();
    let a = tape1.term("a", 1.);
    let b = tape2.term("b", 2.);
    let _ = a * b;
}

#[test]
fn test_dot_escapes_names() {
    let tape = Tape::new();
    let a = tape.term("say \"hi\"", 1.);
    let mut buf = vec![];
    a.exp().dot(&mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();
    assert!(text.contains("a0 [label=\"say \\\"hi\\\" \\ndata:1"));
}
