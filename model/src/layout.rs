use std::ops::Range;

use crate::config::ModelConfig;

/// A named parameter tensor inside a flat parameter buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub offset: usize,
}

impl ParamSpec {
    /// The amount of scalars in this tensor.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// The range this tensor occupies in the flat buffer.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.numel()
    }
}

/// Maps every named parameter of a model to its place in the flat buffer
/// that is broadcast to workers and optimized by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamLayout {
    params: Vec<ParamSpec>,
    size: usize,
}

impl ParamLayout {
    /// Creates a new `ParamLayout` packing the given tensors back to back.
    ///
    /// # Arguments
    /// * `tensors` - The `(name, shape)` pairs in buffer order.
    ///
    /// # Returns
    /// A new `ParamLayout` instance.
    pub fn new<I, S>(tensors: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<usize>)>,
        S: Into<String>,
    {
        let mut size = 0;
        let params = tensors
            .into_iter()
            .map(|(name, shape)| {
                let spec = ParamSpec {
                    name: name.into(),
                    shape,
                    offset: size,
                };
                size += spec.numel();
                spec
            })
            .collect();

        Self { params, size }
    }

    /// The layout of a dense sequential model, weights as `[input, output]` then biases.
    pub fn for_model(config: &ModelConfig) -> Self {
        Self::new(config.layers.iter().enumerate().flat_map(|(i, layer)| {
            [
                (format!("layers.{i}.weight"), vec![layer.input, layer.output]),
                (format!("layers.{i}.bias"), vec![layer.output]),
            ]
        }))
    }

    /// The total amount of scalars of the model.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|spec| spec.name == name)
    }
}
