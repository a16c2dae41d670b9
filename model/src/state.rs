use std::sync::Arc;

use crate::{ModelErr, ParamLayout, ParamSpec, Result, optimization::Optimizer};

/// The trainable parameters of a model plus its run metadata.
///
/// Only the holder of the authoritative copy commits updates through `apply`,
/// everyone else works on `snapshot`s.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelState {
    layout: Arc<ParamLayout>,
    values: Vec<f32>,
    step: u64,
    epoch: u64,
    config_hash: String,
}

impl ModelState {
    /// Creates a new `ModelState` at step zero.
    ///
    /// # Arguments
    /// * `layout` - The names and shapes of the parameters.
    /// * `values` - The flat parameter buffer.
    /// * `config_hash` - The fingerprint of the configuration that produced this state.
    ///
    /// # Returns
    /// A `SizeMismatch` error if `values` doesn't match the layout.
    pub fn new(
        layout: Arc<ParamLayout>,
        values: Vec<f32>,
        config_hash: impl Into<String>,
    ) -> Result<Self> {
        if values.len() != layout.len() {
            return Err(ModelErr::SizeMismatch {
                what: "model state values",
                got: values.len(),
                expected: layout.len(),
            });
        }

        Ok(Self {
            layout,
            values,
            step: 0,
            epoch: 0,
            config_hash: config_hash.into(),
        })
    }

    /// Restores the step and epoch counters of a previously trained state.
    pub fn with_progress(mut self, step: u64, epoch: u64) -> Self {
        self.step = step;
        self.epoch = epoch;
        self
    }

    pub fn layout(&self) -> &Arc<ParamLayout> {
        &self.layout
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    /// Iterates every named parameter together with its current values.
    pub fn named_params(&self) -> impl Iterator<Item = (&ParamSpec, &[f32])> {
        self.layout
            .iter()
            .map(|spec| (spec, &self.values[spec.range()]))
    }

    /// Mutable access to a single named parameter.
    pub fn param_mut(&mut self, name: &str) -> Option<&mut [f32]> {
        let range = self.layout.get(name)?.range();
        Some(&mut self.values[range])
    }

    /// An immutable copy of the parameters, cheap to share with every worker of a round.
    pub fn snapshot(&self) -> Arc<[f32]> {
        Arc::from(self.values.as_slice())
    }

    /// Commits an aggregated gradient, advancing the step counter.
    ///
    /// # Arguments
    /// * `grad` - The gradient to apply.
    /// * `optimizer` - The optimizer owning the update rule.
    ///
    /// # Returns
    /// A `SizeMismatch` error if the gradient doesn't match the parameters, the state is untouched then.
    pub fn apply(&mut self, grad: &[f32], optimizer: &mut dyn Optimizer) -> Result<()> {
        optimizer.update_params(grad, &mut self.values)?;
        self.step += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::GradientDescent;

    fn state() -> ModelState {
        let layout = ParamLayout::new([("w", vec![2, 2]), ("b", vec![2])]);
        ModelState::new(Arc::new(layout), vec![1.0; 6], "cafe").unwrap()
    }

    #[test]
    fn test_rejects_wrong_buffer_size() {
        let layout = ParamLayout::new([("w", vec![3])]);
        assert!(ModelState::new(Arc::new(layout), vec![0.0; 2], "").is_err());
    }

    #[test]
    fn test_apply_advances_step() {
        let mut state = state();
        let mut optimizer = GradientDescent::new(0.5);

        state.apply(&[2.0; 6], &mut optimizer).unwrap();

        assert_eq!(state.values(), &[0.0; 6]);
        assert_eq!(state.step(), 1);
    }

    #[test]
    fn test_failed_apply_keeps_state() {
        let mut state = state();
        let mut optimizer = GradientDescent::new(0.5);

        assert!(state.apply(&[2.0; 3], &mut optimizer).is_err());
        assert_eq!(state.values(), &[1.0; 6]);
        assert_eq!(state.step(), 0);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut state = state();
        let snapshot = state.snapshot();

        state.param_mut("b").unwrap().fill(9.0);

        assert_eq!(&snapshot[..], &[1.0; 6]);
        assert_eq!(state.named_params().last().unwrap().1, &[9.0, 9.0]);
    }
}
