use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ModelErr, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActFnConfig {
    Sigmoid,
    Relu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub input: usize,
    pub output: usize,
    #[serde(default)]
    pub activation: Option<ActFnConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub layers: Vec<LayerConfig>,
}

impl ModelConfig {
    /// Checks that the model has layers and that adjacent layers fit together.
    ///
    /// # Returns
    /// An `InvalidConfig` error describing the first offending layer.
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(ModelErr::InvalidConfig(
                "model must have at least one layer".into(),
            ));
        }

        for (i, layer) in self.layers.iter().enumerate() {
            if layer.input == 0 || layer.output == 0 {
                return Err(ModelErr::InvalidConfig(format!(
                    "layer {i}: input and output sizes must be greater than 0"
                )));
            }
        }

        for (i, pair) in self.layers.windows(2).enumerate() {
            let (prev, curr) = (&pair[0], &pair[1]);
            if prev.output != curr.input {
                return Err(ModelErr::InvalidConfig(format!(
                    "layer {}: input size ({}) does not match previous layer output size ({})",
                    i + 1,
                    curr.input,
                    prev.output
                )));
            }
        }

        Ok(())
    }

    /// The amount of features the model expects per record.
    pub fn input_size(&self) -> usize {
        self.layers.first().map(|l| l.input).unwrap_or_default()
    }

    /// The amount of values the model predicts per record.
    pub fn output_size(&self) -> usize {
        self.layers.last().map(|l| l.output).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasetConfig {
    Inline {
        data: Vec<f32>,
        x_size: usize,
        y_size: usize,
    },
    Local {
        path: PathBuf,
        x_size: usize,
        y_size: usize,
    },
}

impl DatasetConfig {
    /// The `(x_size, y_size)` pair of every record.
    pub fn row_shape(&self) -> (usize, usize) {
        match self {
            Self::Inline { x_size, y_size, .. } | Self::Local { x_size, y_size, .. } => {
                (*x_size, *y_size)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    GradientDescent { lr: f32 },
    Momentum { lr: f32, mu: f32 },
}

impl OptimizerConfig {
    /// The learning rate of the configured optimizer.
    pub fn learning_rate(&self) -> f32 {
        match *self {
            Self::GradientDescent { lr } | Self::Momentum { lr, .. } => lr,
        }
    }
}
