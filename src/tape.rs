//! Implementation of shared memory arena for the terms, aka a tape.
//! See https://rufflewind.com/2016-12-30/reverse-mode-automatic-differentiation
//!
//! Every node lives in the tape's `Vec` and refers to its operands by index.
//! A node can only reference nodes pushed before it, so the graph is acyclic
//! by construction and the handles are plain `Copy` values.

use crate::{
    dot::escape_label,
    error::GradError,
    op::Op,
    topo::{topo_sort, GraphNode},
};
use log::{debug, trace, warn};
use std::{cell::RefCell, io::Write};

#[derive(Default, Debug)]
pub struct Tape {
    nodes: RefCell<Vec<TapeNode>>,
}

#[derive(Clone, Debug)]
struct TapeNode {
    name: String,
    op: Op,
    args: Vec<u32>,
    data: f64,
    grad: f64,
}

#[derive(Copy, Clone)]
pub struct TapeTerm<'a> {
    tape: &'a Tape,
    idx: u32,
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a named leaf onto the tape.
    pub fn term<'a>(&'a self, name: impl Into<String>, init: f64) -> TapeTerm<'a> {
        self.push(TapeNode {
            name: name.into(),
            op: Op::Leaf,
            args: vec![],
            data: init,
            grad: 0.,
        })
    }

    /// Push a leaf named after its value.
    pub fn constant(&self, val: f64) -> TapeTerm {
        self.term(val.to_string(), val)
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    /// Reset the gradient of every node on the tape.
    pub fn zero_grad(&self) {
        let mut nodes = self.nodes.borrow_mut();
        trace!("zero_grad on tape: {} nodes", nodes.len());
        for node in nodes.iter_mut() {
            node.grad = 0.;
        }
    }

    fn push(&self, node: TapeNode) -> TapeTerm {
        let mut nodes = self.nodes.borrow_mut();
        let idx = nodes.len();
        nodes.push(node);
        TapeTerm {
            tape: self,
            idx: idx as u32,
        }
    }

    fn term0(&self, op: Op, args: Vec<u32>) -> TapeTerm {
        debug_assert_eq!(op.arity(), args.len());
        let (data, name) = {
            let nodes = self.nodes.borrow();
            let lhs = args.first().map_or(0., |&i| nodes[i as usize].data);
            let rhs = args.get(1).map_or(0., |&i| nodes[i as usize].data);
            (op.eval(lhs, rhs), Self::op_name(&nodes, op, &args))
        };
        self.push(TapeNode {
            name,
            op,
            args,
            data,
            grad: 0.,
        })
    }

    #[cfg(feature = "expr_name")]
    fn op_name(nodes: &[TapeNode], op: Op, args: &[u32]) -> String {
        let args: Vec<&str> = args
            .iter()
            .map(|&i| nodes[i as usize].name.as_str())
            .collect();
        op.format_expr(&args)
    }

    #[cfg(not(feature = "expr_name"))]
    fn op_name(nodes: &[TapeNode], _op: Op, _args: &[u32]) -> String {
        format!("a{}", nodes.len())
    }
}

impl<'a> TapeTerm<'a> {
    /// Position of the node on its tape.
    pub fn idx(&self) -> u32 {
        self.idx
    }

    pub fn data(&self) -> f64 {
        self.tape.nodes.borrow()[self.idx as usize].data
    }

    pub fn grad(&self) -> f64 {
        self.tape.nodes.borrow()[self.idx as usize].grad
    }

    pub fn name(&self) -> String {
        self.tape.nodes.borrow()[self.idx as usize].name.clone()
    }

    pub fn op(&self) -> Op {
        self.tape.nodes.borrow()[self.idx as usize].op
    }

    pub fn is_leaf(&self) -> bool {
        self.op() == Op::Leaf
    }

    /// Reassign the value of a leaf. Nodes already pushed keep the value
    /// they were computed with.
    pub fn set(&self, value: f64) -> Result<(), GradError> {
        let mut nodes = self.tape.nodes.borrow_mut();
        let node = &mut nodes[self.idx as usize];
        if node.op != Op::Leaf {
            return Err(GradError::NotLeaf {
                name: node.name.clone(),
            });
        }
        node.data = value;
        Ok(())
    }

    /// Raise to a constant exponent.
    pub fn pow(self, exponent: f64) -> Self {
        self.tape.term0(Op::Pow(exponent), vec![self.idx])
    }

    /// Raise to a term exponent. Only constant exponents are supported, so
    /// this always fails with [`GradError::InvalidExponent`]; use [`TapeTerm::pow`].
    pub fn pow_term(self, exponent: Self) -> Result<Self, GradError> {
        Err(GradError::InvalidExponent {
            name: exponent.name(),
        })
    }

    pub fn exp(self) -> Self {
        self.tape.term0(Op::Exp, vec![self.idx])
    }

    pub fn tanh(self) -> Self {
        self.tape.term0(Op::Tanh, vec![self.idx])
    }

    /// Combine with a term that must live on the same tape.
    fn binary(self, op: Op, rhs: Self) -> Self {
        assert!(
            std::ptr::eq(self.tape, rhs.tape),
            "cannot combine terms from different tapes"
        );
        self.tape.term0(op, vec![self.idx, rhs.idx])
    }

    /// All terms reachable from this one, operands before their consumers.
    pub fn topo_order(&self) -> Result<Vec<TapeTerm<'a>>, GradError> {
        topo_sort(*self)
    }

    /// The entry point to backpropagation. Gradients accumulate across calls
    /// until cleared with [`TapeTerm::zero_grad`] or [`Tape::zero_grad`].
    pub fn backprop(&self) -> Result<(), GradError> {
        let order = self.topo_order()?;
        debug!("backprop from a{}: {} nodes", self.idx, order.len());
        let mut nodes = self.tape.nodes.borrow_mut();
        nodes[self.idx as usize].grad = 1.;
        for term in order.iter().rev() {
            propagate(&mut nodes, term.idx);
        }
        if let Some(node) = order
            .iter()
            .map(|term| &nodes[term.idx as usize])
            .find(|node| !node.grad.is_finite())
        {
            warn!("non-finite gradient {} at {}", node.grad, node.name);
        }
        Ok(())
    }

    /// Reset the gradient of this node only.
    pub fn clear_grad(&self) {
        self.tape.nodes.borrow_mut()[self.idx as usize].grad = 0.;
    }

    /// Reset the gradient of every node reachable from this one.
    pub fn zero_grad(&self) -> Result<(), GradError> {
        let order = self.topo_order()?;
        let mut nodes = self.tape.nodes.borrow_mut();
        for term in &order {
            nodes[term.idx as usize].grad = 0.;
        }
        Ok(())
    }

    /// Write graphviz dot file to the given writer.
    pub fn dot(&self, writer: &mut impl Write) -> Result<(), GradError> {
        let order = self.topo_order()?;
        let nodes = self.tape.nodes.borrow();
        writeln!(writer, "digraph G {{\nrankdir=\"LR\";")?;
        for term in &order {
            let node = &nodes[term.idx as usize];
            writeln!(
                writer,
                "a{} [label=\"{} \\ndata:{}, grad:{}\"];",
                term.idx,
                escape_label(&node.name),
                node.data,
                node.grad
            )?;
        }
        for term in &order {
            for arg in &nodes[term.idx as usize].args {
                writeln!(writer, "a{} -> a{};", arg, term.idx)?;
            }
        }
        writeln!(writer, "}}")?;
        Ok(())
    }
}

fn propagate(nodes: &mut [TapeNode], idx: u32) {
    let node = &nodes[idx as usize];
    if node.args.is_empty() {
        return;
    }
    let lhs = node.args.first().map_or(0., |&i| nodes[i as usize].data);
    let rhs = node.args.get(1).map_or(0., |&i| nodes[i as usize].data);
    let (dlhs, drhs) = node.op.local_grad(lhs, rhs, node.data, node.grad);
    trace!("propagate {}: ({dlhs}, {drhs})", node.name);
    let args = node.args.clone();
    for (arg, contrib) in args.into_iter().zip([dlhs, drhs]) {
        nodes[arg as usize].grad += contrib;
    }
}

impl<'a> GraphNode for TapeTerm<'a> {
    fn id(&self) -> usize {
        self.idx as usize
    }

    fn operands(&self) -> Vec<Self> {
        self.tape.nodes.borrow()[self.idx as usize]
            .args
            .iter()
            .map(|&idx| TapeTerm {
                tape: self.tape,
                idx,
            })
            .collect()
    }

    fn name(&self) -> String {
        TapeTerm::name(self)
    }
}

impl<'a> std::ops::Add for TapeTerm<'a> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        self.binary(Op::Add, rhs)
    }
}

impl<'a> std::ops::Mul for TapeTerm<'a> {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self::Output {
        self.binary(Op::Mul, rhs)
    }
}

impl<'a> std::ops::Neg for TapeTerm<'a> {
    type Output = Self;
    fn neg(self) -> Self::Output {
        self * -1.
    }
}

impl<'a> std::ops::Sub for TapeTerm<'a> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        self + -rhs
    }
}

impl<'a> std::ops::Div for TapeTerm<'a> {
    type Output = Self;
    fn div(self, rhs: Self) -> Self::Output {
        self * rhs.pow(-1.)
    }
}

macro_rules! impl_const_op {
    ($trait:ident, $method:ident) => {
        impl<'a> std::ops::$trait<f64> for TapeTerm<'a> {
            type Output = Self;
            fn $method(self, rhs: f64) -> Self::Output {
                std::ops::$trait::$method(self, self.tape.constant(rhs))
            }
        }

        impl<'a> std::ops::$trait<TapeTerm<'a>> for f64 {
            type Output = TapeTerm<'a>;
            fn $method(self, rhs: TapeTerm<'a>) -> Self::Output {
                std::ops::$trait::$method(rhs.tape.constant(self), rhs)
            }
        }
    };
}

impl_const_op!(Add, add);
impl_const_op!(Sub, sub);
impl_const_op!(Mul, mul);
impl_const_op!(Div, div);
