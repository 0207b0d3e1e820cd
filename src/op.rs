/// The primitive operation that produced a node.
///
/// Each variant carries only what its local derivative needs beyond the
/// forward values of the operands, so the backward pass dispatches on the tag
/// instead of calling a stored closure.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Op {
    /// An independent variable. It has no operands.
    Leaf,
    Add,
    Mul,
    /// Raise to a constant real exponent.
    Pow(f64),
    Exp,
    Tanh,
}

impl Op {
    /// Number of operands the operation consumes.
    pub fn arity(&self) -> usize {
        match self {
            Op::Leaf => 0,
            Op::Pow(_) | Op::Exp | Op::Tanh => 1,
            Op::Add | Op::Mul => 2,
        }
    }

    /// Short label used for node names and graph output.
    pub fn label(&self) -> String {
        match self {
            Op::Leaf => "leaf".to_string(),
            Op::Add => "+".to_string(),
            Op::Mul => "*".to_string(),
            Op::Pow(exponent) => format!("**{exponent}"),
            Op::Exp => "exp".to_string(),
            Op::Tanh => "tanh".to_string(),
        }
    }

    /// Forward rule. `rhs` is ignored by unary operations, and a leaf forwards `lhs`.
    pub(crate) fn eval(&self, lhs: f64, rhs: f64) -> f64 {
        match *self {
            Op::Leaf => lhs,
            Op::Add => lhs + rhs,
            Op::Mul => lhs * rhs,
            Op::Pow(exponent) => lhs.powf(exponent),
            Op::Exp => lhs.exp(),
            Op::Tanh => lhs.tanh(),
        }
    }

    /// Local derivative rule: the contributions `grad` pushes onto
    /// `(lhs, rhs)`, given the forward values of the operands and of the node
    /// itself.
    pub(crate) fn local_grad(&self, lhs: f64, rhs: f64, data: f64, grad: f64) -> (f64, f64) {
        match *self {
            Op::Leaf => (0., 0.),
            Op::Add => (grad, grad),
            Op::Mul => (rhs * grad, lhs * grad),
            Op::Pow(exponent) => (exponent * lhs.powf(exponent - 1.) * grad, 0.),
            Op::Exp => (data * grad, 0.),
            Op::Tanh => ((1. - data * data) * grad, 0.),
        }
    }

    /// Name an intermediate node after the expression that produced it.
    #[cfg_attr(not(feature = "expr_name"), allow(dead_code))]
    pub(crate) fn format_expr(&self, args: &[&str]) -> String {
        match (self, args) {
            (Op::Add, [lhs, rhs]) => format!("({lhs} + {rhs})"),
            (Op::Mul, [lhs, rhs]) => format!("{lhs} * {rhs}"),
            (Op::Pow(exponent), [arg]) => format!("{arg}**{exponent}"),
            (Op::Exp | Op::Tanh, [arg]) => format!("{}({arg})", self.label()),
            _ => self.label(),
        }
    }
}
