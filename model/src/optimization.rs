//! Update rules applied by the single writer of a `ModelState`.

use crate::{ModelErr, Result, config::OptimizerConfig};

/// Turns an aggregated gradient into a parameter update.
pub trait Optimizer {
    /// Moves `params` against `grad`.
    ///
    /// # Returns
    /// A `SizeMismatch` error if the sizes disagree, `params` is left untouched then.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;
}

fn check_len(grad: &[f32], expected: usize) -> Result<()> {
    if grad.len() != expected {
        return Err(ModelErr::SizeMismatch {
            what: "gradient",
            got: grad.len(),
            expected,
        });
    }

    Ok(())
}

/// Plain gradient descent, `p -= lr * g`.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    lr: f32,
}

impl GradientDescent {
    pub fn new(lr: f32) -> Self {
        Self { lr }
    }
}

impl Optimizer for GradientDescent {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_len(grad, params.len())?;

        params
            .iter_mut()
            .zip(grad)
            .for_each(|(p, g)| *p -= self.lr * g);

        Ok(())
    }
}

/// Gradient descent with a velocity term carried across steps.
#[derive(Debug, Clone)]
pub struct Momentum {
    lr: f32,
    mu: f32,
    velocity: Vec<f32>,
}

impl Momentum {
    /// Creates a new `Momentum` optimizer with zero velocity.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters it will update.
    /// * `lr` - The learning rate.
    /// * `mu` - How much of the previous velocity survives each step.
    pub fn new(len: usize, lr: f32, mu: f32) -> Self {
        Self {
            lr,
            mu,
            velocity: vec![0.0; len],
        }
    }
}

impl Optimizer for Momentum {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_len(grad, self.velocity.len())?;
        check_len(params, self.velocity.len())?;

        for ((p, g), v) in params.iter_mut().zip(grad).zip(&mut self.velocity) {
            *v = self.mu * *v + g;
            *p -= self.lr * *v;
        }

        Ok(())
    }
}

/// Builds the optimizer described by `config` for a model of `len` parameters.
pub fn from_config(config: &OptimizerConfig, len: usize) -> Box<dyn Optimizer + Send> {
    match *config {
        OptimizerConfig::GradientDescent { lr } => Box::new(GradientDescent::new(lr)),
        OptimizerConfig::Momentum { lr, mu } => Box::new(Momentum::new(len, lr, mu)),
    }
}
