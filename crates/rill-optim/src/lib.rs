//! # rill-optim
//!
//! Optimizers for Rill: [`SGD`] (with momentum and weight decay) and
//! [`Adam`].
//!
//! Both implement the [`Optimizer`] trait so training code stays generic
//! over the update rule. `step()` writes the updated values into the
//! parameter tensors IN PLACE: tensor identities never change, and every
//! handle to a parameter (model, optimizer, caller) observes the update.

pub mod adam;
pub mod sgd;

pub use adam::Adam;
pub use sgd::SGD;

use rill_core::backend::Backend;
use rill_core::{GradStore, Result, Tensor};

/// A gradient-descent update rule.
///
/// Implementations hold the parameter list and any per-parameter state
/// (momentum buffers, moment estimates). One `step()` consumes a
/// [`GradStore`] produced by `loss.backward()`.
pub trait Optimizer<B: Backend> {
    /// Apply one update from the gradients, returning the updated
    /// parameters. Parameters without an entry in `grads` are left
    /// untouched.
    fn step(&mut self, grads: &GradStore<B>) -> Result<Vec<Tensor<B>>>;

    /// The parameters being optimized.
    fn params(&self) -> &[Tensor<B>];

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);
}
