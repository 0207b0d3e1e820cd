use crate::{
    dot::escape_label,
    error::GradError,
    op::Op,
    topo::{topo_sort, GraphNode},
};
use log::{debug, trace, warn};
use std::{
    cell::Cell,
    io::Write,
    ops::{Add, Div, Mul, Neg, Sub},
    rc::Rc,
};

#[derive(Debug)]
struct TermPayload {
    name: String,
    op: Op,
    operands: Vec<RcTerm>,
    data: Cell<f64>,
    grad: Cell<f64>,
}

impl Drop for TermPayload {
    /// Release the operands with an explicit work-list. The default drop
    /// recurses once per level and overflows the stack on long chains.
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.operands);
        while let Some(term) = stack.pop() {
            if let Ok(mut payload) = Rc::try_unwrap(term.0) {
                stack.append(&mut payload.operands);
            }
        }
    }
}

/// A node in the expression graph, shared by reference counting.
///
/// Cloning the handle shares the node. A node keeps its operands alive, and the
/// operand relation is acyclic since a node can only be built from existing
/// ones, so the counts always reach zero.
#[derive(Clone, Debug)]
pub struct RcTerm(Rc<TermPayload>);

impl RcTerm {
    /// Create a named leaf: an independent variable such as a weight or an input.
    pub fn new(name: impl Into<String>, val: f64) -> RcTerm {
        Self(Rc::new(TermPayload {
            name: name.into(),
            op: Op::Leaf,
            operands: vec![],
            data: Cell::new(val),
            grad: Cell::new(0.),
        }))
    }

    /// Create a leaf named after its value.
    pub fn leaf(val: f64) -> RcTerm {
        Self::new(val.to_string(), val)
    }

    fn from_op(op: Op, operands: Vec<RcTerm>) -> RcTerm {
        debug_assert_eq!(op.arity(), operands.len());
        let lhs = operands.first().map_or(0., RcTerm::data);
        let rhs = operands.get(1).map_or(0., RcTerm::data);
        let name = Self::op_name(op, &operands);
        Self(Rc::new(TermPayload {
            name,
            op,
            operands,
            data: Cell::new(op.eval(lhs, rhs)),
            grad: Cell::new(0.),
        }))
    }

    #[cfg(feature = "expr_name")]
    fn op_name(op: Op, operands: &[RcTerm]) -> String {
        let args: Vec<&str> = operands.iter().map(|term| term.0.name.as_str()).collect();
        op.format_expr(&args)
    }

    #[cfg(not(feature = "expr_name"))]
    fn op_name(op: Op, _operands: &[RcTerm]) -> String {
        op.label()
    }

    pub fn data(&self) -> f64 {
        self.0.data.get()
    }

    pub fn grad(&self) -> f64 {
        self.0.grad.get()
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn op(&self) -> Op {
        self.0.op
    }

    pub fn operands(&self) -> &[RcTerm] {
        &self.0.operands
    }

    pub fn is_leaf(&self) -> bool {
        self.0.op == Op::Leaf
    }

    /// Reassign the value of a leaf. Nodes already built from it keep the value
    /// they were computed with.
    pub fn set(&self, value: f64) -> Result<(), GradError> {
        if self.is_leaf() {
            self.0.data.set(value);
            Ok(())
        } else {
            Err(GradError::NotLeaf {
                name: self.0.name.clone(),
            })
        }
    }

    /// Raise to a constant exponent.
    pub fn pow(&self, exponent: f64) -> RcTerm {
        Self::from_op(Op::Pow(exponent), vec![self.clone()])
    }

    /// Raise to a node exponent. Only constant exponents are supported, so
    /// this always fails with [`GradError::InvalidExponent`]; use [`RcTerm::pow`].
    pub fn pow_term(&self, exponent: &RcTerm) -> Result<RcTerm, GradError> {
        Err(GradError::InvalidExponent {
            name: exponent.0.name.clone(),
        })
    }

    pub fn exp(&self) -> RcTerm {
        Self::from_op(Op::Exp, vec![self.clone()])
    }

    pub fn tanh(&self) -> RcTerm {
        Self::from_op(Op::Tanh, vec![self.clone()])
    }

    /// All nodes reachable from this one, operands before their consumers.
    pub fn topo_order(&self) -> Result<Vec<RcTerm>, GradError> {
        topo_sort(self.clone())
    }

    /// The entry point to backpropagation.
    ///
    /// Seeds this node's gradient with 1 and adds every contribution into the
    /// operands in reverse topological order. Gradients are not cleared first;
    /// call [`RcTerm::zero_grad`] between passes unless accumulation is wanted.
    pub fn backprop(&self) -> Result<(), GradError> {
        let order = self.topo_order()?;
        debug!("backprop from {}: {} nodes", self.0.name, order.len());
        self.0.grad.set(1.);
        for term in order.iter().rev() {
            term.propagate();
        }
        if let Some(term) = order.iter().find(|term| !term.grad().is_finite()) {
            warn!("non-finite gradient {} at {}", term.grad(), term.0.name);
        }
        Ok(())
    }

    /// Push this node's gradient onto its operands.
    fn propagate(&self) {
        let payload = &*self.0;
        if payload.operands.is_empty() {
            return;
        }
        let lhs = payload.operands.first().map_or(0., RcTerm::data);
        let rhs = payload.operands.get(1).map_or(0., RcTerm::data);
        let (dlhs, drhs) = payload
            .op
            .local_grad(lhs, rhs, payload.data.get(), payload.grad.get());
        trace!("propagate {}: ({dlhs}, {drhs})", payload.name);
        for (operand, contrib) in payload.operands.iter().zip([dlhs, drhs]) {
            operand.0.grad.set(operand.0.grad.get() + contrib);
        }
    }

    /// Reset the gradient of this node only.
    pub fn clear_grad(&self) {
        self.0.grad.set(0.);
    }

    /// Reset the gradient of every node reachable from this one.
    pub fn zero_grad(&self) -> Result<(), GradError> {
        let order = self.topo_order()?;
        trace!("zero_grad from {}: {} nodes", self.0.name, order.len());
        for term in &order {
            term.clear_grad();
        }
        Ok(())
    }

    /// Write graphviz dot file to the given writer.
    pub fn dot(&self, writer: &mut impl Write) -> Result<(), GradError> {
        let order = self.topo_order()?;
        writeln!(writer, "digraph G {{\nrankdir=\"LR\";")?;
        for term in &order {
            writeln!(
                writer,
                "a{} [label=\"{} \\ndata:{}, grad:{}\"];",
                term.id(),
                escape_label(&term.0.name),
                term.data(),
                term.grad()
            )?;
        }
        for term in &order {
            for operand in &term.0.operands {
                writeln!(writer, "a{} -> a{};", operand.id(), term.id())?;
            }
        }
        writeln!(writer, "}}")?;
        Ok(())
    }
}

impl GraphNode for RcTerm {
    fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    fn operands(&self) -> Vec<Self> {
        self.0.operands.clone()
    }

    fn name(&self) -> String {
        self.0.name.clone()
    }
}

impl Add for &RcTerm {
    type Output = RcTerm;
    fn add(self, rhs: Self) -> Self::Output {
        RcTerm::from_op(Op::Add, vec![self.clone(), rhs.clone()])
    }
}

impl Mul for &RcTerm {
    type Output = RcTerm;
    fn mul(self, rhs: Self) -> Self::Output {
        RcTerm::from_op(Op::Mul, vec![self.clone(), rhs.clone()])
    }
}

impl Neg for &RcTerm {
    type Output = RcTerm;
    fn neg(self) -> Self::Output {
        self * -1.
    }
}

impl Sub for &RcTerm {
    type Output = RcTerm;
    fn sub(self, rhs: Self) -> Self::Output {
        self + &(-rhs)
    }
}

impl Div for &RcTerm {
    type Output = RcTerm;
    fn div(self, rhs: Self) -> Self::Output {
        self * &rhs.pow(-1.)
    }
}

/// Operators against a plain number, which becomes a fresh leaf on either side.
macro_rules! impl_const_op {
    ($trait:ident, $method:ident) => {
        impl $trait<f64> for &RcTerm {
            type Output = RcTerm;
            fn $method(self, rhs: f64) -> Self::Output {
                self.$method(&RcTerm::leaf(rhs))
            }
        }

        impl $trait<&RcTerm> for f64 {
            type Output = RcTerm;
            fn $method(self, rhs: &RcTerm) -> Self::Output {
                (&RcTerm::leaf(self)).$method(rhs)
            }
        }
    };
}

impl_const_op!(Add, add);
impl_const_op!(Sub, sub);
impl_const_op!(Mul, mul);
impl_const_op!(Div, div);
