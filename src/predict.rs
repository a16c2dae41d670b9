use std::{
    fs::File,
    io::{self, BufRead, BufReader, Write},
    path::Path,
};

use anyhow::Context;
use log::{info, warn};
use model::{ModelErr, ModelState, Network, config::ModelConfig};
use ndarray::Array2;
use orchestrator::configs::TrainingConfig;
use weights::WeightBundle;

use crate::AppError;

/// A model restored from a weight artifact, ready to answer.
#[derive(Debug)]
pub struct Predictor {
    network: Network,
    state: ModelState,
    input_size: usize,
}

impl Predictor {
    /// Creates a new `Predictor` restoring `bundle` into the model described by `model`.
    ///
    /// # Returns
    /// An `Incompatible` weights error if the bundle doesn't fit the model.
    pub fn new(model: &ModelConfig, bundle: &WeightBundle) -> Result<Self, AppError> {
        let network = Network::new(model)?;
        let state = weights::restore(bundle, network.layout().clone())?;
        Ok(Self {
            network,
            state,
            input_size: model.input_size(),
        })
    }

    /// Loads the artifact the config points at.
    ///
    /// # Arguments
    /// * `config` - The run's config, for the model and the artifact path.
    ///
    /// # Returns
    /// The predictor or the error that kept the artifact from loading.
    pub fn load(config: &TrainingConfig) -> Result<Self, AppError> {
        let path = &config.output.artifact_path;
        let bundle = weights::load(path)?;
        let provenance = bundle.provenance();

        if provenance.config_hash != config.config_hash() {
            warn!(
                path:% = path.display(),
                artifact_hash:% = provenance.config_hash;
                "artifact was produced with another config"
            );
        }

        info!(
            path:% = path.display(),
            producer = provenance.producer.name(),
            step = provenance.step;
            "loaded weights"
        );

        Self::new(&config.model, &bundle)
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    /// The amount of values every input record must have.
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Predicts every record of `inputs`.
    ///
    /// # Returns
    /// One prediction per record, or a `SizeMismatch` error for the first record of the wrong size.
    pub fn predict(&self, inputs: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, ModelErr> {
        let size = self.input_size();
        if let Some(record) = inputs.iter().find(|record| record.len() != size) {
            return Err(ModelErr::SizeMismatch {
                what: "input record",
                got: record.len(),
                expected: size,
            });
        }

        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let x = Array2::from_shape_vec((inputs.len(), size), inputs.concat())
            .map_err(|e| ModelErr::InvalidConfig(e.to_string()))?;
        let y = self.network.forward(self.state.values(), x.view())?;

        Ok(y.outer_iter().map(|row| row.to_vec()).collect())
    }
}

/// Answers every JSON array record of `input` with a JSON array prediction line on `output`.
///
/// # Arguments
/// * `predictor` - The restored model.
/// * `input` - One record per line, blank lines are skipped.
/// * `output` - Where the predictions go.
///
/// # Returns
/// The amount of records answered, or an error naming the first bad line.
pub fn run_batch<R, W>(predictor: &Predictor, input: R, mut output: W) -> anyhow::Result<usize>
where
    R: BufRead,
    W: Write,
{
    let mut answered = 0;

    for (i, line) in input.lines().enumerate() {
        let line = line.context("cannot read input")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record: Vec<f32> = serde_json::from_str(line)
            .with_context(|| format!("line {}: expected a JSON array of numbers", i + 1))?;
        let mut prediction = predictor
            .predict(&[record])
            .with_context(|| format!("line {}", i + 1))?;

        serde_json::to_writer(&mut output, &prediction.pop().unwrap_or_default())?;
        writeln!(output)?;
        answered += 1;
    }

    output.flush()?;
    Ok(answered)
}

/// The `predict` mode: reads records from `input`, or stdin, and writes predictions to stdout.
pub fn run(config: &TrainingConfig, input: Option<&Path>) -> Result<(), AppError> {
    let predictor = Predictor::load(config)?;
    let stdout = io::stdout().lock();

    let answered = match input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("cannot open '{}'", path.display()))?;
            run_batch(&predictor, BufReader::new(file), stdout)?
        }
        None => run_batch(&predictor, io::stdin().lock(), stdout)?,
    };

    info!(records = answered; "predictions written");
    Ok(())
}
