//! Feed-forward network built on [`RcTerm`]: neurons, layers and a multi-layer perceptron.
//!
//! Weights are drawn from a random number generator supplied by the caller, so
//! a seeded generator gives a reproducible network.

use crate::{error::GradError, rc_term::RcTerm};
use log::debug;
use rand::Rng;

/// Anything that owns learnable parameters.
pub trait Module {
    fn parameters(&self) -> Vec<RcTerm>;

    /// Reset the gradient of every parameter before the next backward pass.
    fn zero_grad(&self) {
        for p in self.parameters() {
            p.clear_grad();
        }
    }
}

/// A single unit computing `tanh(sum(w_i * x_i) + b)`.
#[derive(Clone, Debug)]
pub struct Neuron {
    w: Vec<RcTerm>,
    b: RcTerm,
}

impl Neuron {
    /// Weights and bias are uniform in `[-1, 1]`.
    pub fn new(nin: usize, rng: &mut impl Rng) -> Self {
        let w = (0..nin)
            .map(|i| RcTerm::new(format!("w{i}"), rng.gen_range(-1.0..=1.0)))
            .collect();
        let b = RcTerm::new("b", rng.gen_range(-1.0..=1.0));
        Self { w, b }
    }

    /// Build a neuron from existing weights and bias.
    pub fn from_params(w: Vec<RcTerm>, b: RcTerm) -> Self {
        Self { w, b }
    }

    pub fn nin(&self) -> usize {
        self.w.len()
    }

    pub fn forward(&self, x: &[RcTerm]) -> Result<RcTerm, GradError> {
        if x.len() != self.w.len() {
            return Err(GradError::InputSize {
                expected: self.w.len(),
                actual: x.len(),
            });
        }
        let act = self
            .w
            .iter()
            .zip(x)
            .fold(self.b.clone(), |acc, (wi, xi)| &acc + &(wi * xi));
        Ok(act.tanh())
    }
}

impl Module for Neuron {
    fn parameters(&self) -> Vec<RcTerm> {
        self.w.iter().chain(std::iter::once(&self.b)).cloned().collect()
    }
}

#[derive(Clone, Debug)]
pub struct Layer {
    neurons: Vec<Neuron>,
}

impl Layer {
    pub fn new(nin: usize, nout: usize, rng: &mut impl Rng) -> Self {
        Self {
            neurons: (0..nout).map(|_| Neuron::new(nin, rng)).collect(),
        }
    }

    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    /// One output per neuron.
    pub fn forward(&self, x: &[RcTerm]) -> Result<Vec<RcTerm>, GradError> {
        self.neurons.iter().map(|n| n.forward(x)).collect()
    }
}

impl Module for Layer {
    fn parameters(&self) -> Vec<RcTerm> {
        self.neurons.iter().flat_map(|n| n.parameters()).collect()
    }
}

/// Multi-layer perceptron: layers of sizes `nouts` stacked on `nin` inputs.
#[derive(Clone, Debug)]
pub struct Mlp {
    layers: Vec<Layer>,
}

impl Mlp {
    pub fn new(nin: usize, nouts: &[usize], rng: &mut impl Rng) -> Self {
        let sizes: Vec<usize> = std::iter::once(nin).chain(nouts.iter().copied()).collect();
        let layers: Vec<Layer> = sizes
            .windows(2)
            .map(|pair| Layer::new(pair[0], pair[1], rng))
            .collect();
        let mlp = Self { layers };
        debug!(
            "Mlp {sizes:?}: {} parameters",
            mlp.parameters().len()
        );
        mlp
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Feed the input through every layer and return the last layer's outputs.
    pub fn forward(&self, x: &[RcTerm]) -> Result<Vec<RcTerm>, GradError> {
        let mut x = x.to_vec();
        for layer in &self.layers {
            x = layer.forward(&x)?;
        }
        Ok(x)
    }
}

impl Module for Mlp {
    fn parameters(&self) -> Vec<RcTerm> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }
}
