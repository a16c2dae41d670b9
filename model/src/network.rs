use std::{num::NonZeroUsize, sync::Arc};

use log::debug;
use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis, linalg};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::Uniform;

use crate::{
    Dataset, ModelErr, ParamLayout, Result,
    config::{ActFnConfig, ModelConfig},
};

/// The outcome of one local training pass over a data shard.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Sample weighted mean gradient over the shard.
    pub grad: Vec<f32>,
    /// Sample weighted mean loss over the shard.
    pub loss: f32,
    /// The amount of records the update was computed on.
    pub samples: u64,
}

#[derive(Debug, Clone, Copy)]
struct ActFn(ActFnConfig);

impl ActFn {
    fn f(&self, z: f32) -> f32 {
        match self.0 {
            ActFnConfig::Sigmoid => 1.0 / (1.0 + (-z).exp()),
            ActFnConfig::Relu => z.max(0.0),
        }
    }

    fn df(&self, z: f32) -> f32 {
        match self.0 {
            ActFnConfig::Sigmoid => {
                let s = self.f(z);
                s * (1.0 - s)
            }
            ActFnConfig::Relu => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// A fully connected layer, `a = act(x · w + b)` with `w` shaped `[input, output]`.
#[derive(Debug, Clone)]
struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
}

impl Dense {
    fn size(&self) -> usize {
        (self.dim.0 + 1) * self.dim.1
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let w_size = self.size() - self.dim.1;
        let (w_raw, b_raw) = params.split_at(w_size);
        let w = ArrayView2::from_shape(self.dim, w_raw).map_err(shape_err)?;
        let b = ArrayView1::from_shape(self.dim.1, b_raw).map_err(shape_err)?;
        Ok((w, b))
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let w_size = self.size() - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw).map_err(shape_err)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw).map_err(shape_err)?;
        Ok((dw, db))
    }

    /// Returns the pre-activation and activation of this layer.
    fn forward(&self, params: &[f32], x: ArrayView2<f32>) -> Result<(Array2<f32>, Array2<f32>)> {
        let (w, b) = self.view_params(params)?;
        let z = x.dot(&w) + &b;

        let a = match self.act_fn {
            Some(act_fn) => z.mapv(|v| act_fn.f(v)),
            None => z.clone(),
        };

        Ok((z, a))
    }

    /// Writes this layer's gradient and returns the delta for the previous layer.
    fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        x: ArrayView2<f32>,
        z: &Array2<f32>,
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        if let Some(act_fn) = self.act_fn {
            d.zip_mut_with(z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &x.t(), &d, 0.0, &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }
}

fn shape_err(e: ndarray::ShapeError) -> ModelErr {
    ModelErr::InvalidConfig(format!("parameter view: {e}"))
}

/// A dense sequential network trained with mean squared error.
///
/// The network holds no parameters itself, every call receives the flat buffer
/// described by `layout`, so the same instance serves any snapshot.
#[derive(Debug, Clone)]
pub struct Network {
    layers: Vec<Dense>,
    layout: Arc<ParamLayout>,
}

impl Network {
    /// Creates a new `Network`.
    ///
    /// # Arguments
    /// * `config` - The model configuration.
    ///
    /// # Returns
    /// A new `Network` or an `InvalidConfig` error.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        config.validate()?;

        let layers = config
            .layers
            .iter()
            .map(|layer| Dense {
                dim: (layer.input, layer.output),
                act_fn: layer.activation.map(ActFn),
            })
            .collect();

        Ok(Self {
            layers,
            layout: Arc::new(ParamLayout::for_model(config)),
        })
    }

    pub fn layout(&self) -> &Arc<ParamLayout> {
        &self.layout
    }

    /// The amount of parameters of the network.
    pub fn size(&self) -> usize {
        self.layout.len()
    }

    /// Samples the initial parameters, Xavier uniform weights and zero biases.
    ///
    /// # Arguments
    /// * `seed` - The seed of the generator, equal seeds give equal parameters.
    pub fn init_params(&self, seed: u64) -> Result<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut params = Vec::with_capacity(self.size());

        for layer in &self.layers {
            let (fan_in, fan_out) = layer.dim;
            let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
            let dist = Uniform::new_inclusive(-limit, limit)
                .map_err(|e| ModelErr::InvalidConfig(e.to_string()))?;

            params.extend((0..fan_in * fan_out).map(|_| rng.sample(&dist)));
            params.extend(std::iter::repeat_n(0.0, fan_out));
        }

        Ok(params)
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `params` - The flat parameter buffer.
    /// * `x` - The input records, one per row.
    ///
    /// # Returns
    /// The prediction for every record.
    pub fn forward(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_params(params)?;
        self.check_input(x.ncols())?;

        let mut a = x.to_owned();
        let mut offset = 0;

        for layer in &self.layers {
            let size = layer.size();
            let (_, next) = layer.forward(&params[offset..offset + size], a.view())?;
            a = next;
            offset += size;
        }

        Ok(a)
    }

    /// Computes the gradient of the mean squared error of a single batch.
    ///
    /// # Arguments
    /// * `params` - The flat parameter buffer.
    /// * `x` - The batch inputs.
    /// * `y` - The batch targets.
    /// * `grad` - Where to write the gradient, same size as `params`.
    ///
    /// # Returns
    /// The loss of the batch.
    pub fn gradient(
        &self,
        params: &[f32],
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
        grad: &mut [f32],
    ) -> Result<f32> {
        self.check_params(params)?;
        self.check_input(x.ncols())?;

        if grad.len() != params.len() {
            return Err(ModelErr::SizeMismatch {
                what: "gradient buffer",
                got: grad.len(),
                expected: params.len(),
            });
        }

        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut zs = Vec::with_capacity(self.layers.len());
        let mut a = x.to_owned();
        let mut offset = 0;

        for layer in &self.layers {
            let size = layer.size();
            let (z, next) = layer.forward(&params[offset..offset + size], a.view())?;
            inputs.push(a);
            zs.push(z);
            a = next;
            offset += size;
        }

        if a.dim() != y.dim() {
            return Err(ModelErr::SizeMismatch {
                what: "targets",
                got: y.ncols(),
                expected: a.ncols(),
            });
        }

        let diff = &a - &y;
        let loss = diff.mapv(|v| v * v).mean().unwrap_or_default();
        let mut d = diff * (2.0 / a.len().max(1) as f32);

        for (i, layer) in self.layers.iter().enumerate().rev() {
            let size = layer.size();
            offset -= size;
            let range = offset..offset + size;
            d = layer.backward(&params[range.clone()], &mut grad[range], inputs[i].view(), &zs[i], d)?;
        }

        Ok(loss)
    }

    /// Runs one local training pass over a shard without touching the parameters.
    ///
    /// Every mini-batch gradient is weighted by its size, so the result doesn't depend on
    /// how the shard is split into batches.
    ///
    /// # Arguments
    /// * `params` - The broadcast parameters.
    /// * `shard` - The local data shard.
    /// * `batch_size` - The maximum amount of records per batch.
    ///
    /// # Returns
    /// The local update, an empty shard yields a zero gradient with no samples.
    pub fn local_update(
        &self,
        params: &[f32],
        shard: &Dataset,
        batch_size: NonZeroUsize,
    ) -> Result<Update> {
        let mut acc = vec![0.0f64; params.len()];
        let mut batch_grad = vec![0.0f32; params.len()];
        let mut total_loss = 0.0f64;
        let mut samples = 0usize;

        for (x, y) in shard.batches(batch_size) {
            let n = x.nrows();
            let loss = self.gradient(params, x, y, &mut batch_grad)?;

            for (a, g) in acc.iter_mut().zip(&batch_grad) {
                *a += f64::from(*g) * n as f64;
            }

            total_loss += f64::from(loss) * n as f64;
            samples += n;
        }

        let scale = if samples == 0 { 0.0 } else { 1.0 / samples as f64 };
        let grad = acc.into_iter().map(|a| (a * scale) as f32).collect();
        let loss = (total_loss * scale) as f32;

        debug!(samples = samples, loss = loss; "local update computed");

        Ok(Update {
            grad,
            loss,
            samples: samples as u64,
        })
    }

    fn check_params(&self, params: &[f32]) -> Result<()> {
        if params.len() != self.size() {
            return Err(ModelErr::SizeMismatch {
                what: "parameters",
                got: params.len(),
                expected: self.size(),
            });
        }

        Ok(())
    }

    fn check_input(&self, cols: usize) -> Result<()> {
        let expected = self.layers.first().map(|l| l.dim.0).unwrap_or_default();
        if cols != expected {
            return Err(ModelErr::SizeMismatch {
                what: "input features",
                got: cols,
                expected,
            });
        }

        Ok(())
    }
}
