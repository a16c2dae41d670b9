use crate::{cluster::Report, configs::Aggregation};

/// The merged outcome of a round.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub grad: Vec<f32>,
    /// Sample weighted mean of the reported losses.
    pub loss: f32,
    pub samples: u64,
    /// L2 norm of `grad`.
    pub norm: f32,
}

/// Merges the accepted reports of a round.
///
/// Accumulation happens in `f64` in ascending worker id order regardless of the order
/// of `reports`, so the result only depends on which workers reported and what.
///
/// # Arguments
/// * `reports` - The accepted `(worker_id, report)` pairs, all of the same length.
/// * `policy` - How reports are merged.
///
/// # Returns
/// The aggregate, empty when there are no reports.
pub fn aggregate(reports: &[(usize, Report)], policy: Aggregation) -> Aggregate {
    let mut ordered: Vec<_> = reports.iter().collect();
    ordered.sort_by_key(|(worker_id, _)| *worker_id);

    let len = ordered.first().map(|(_, r)| r.grad.len()).unwrap_or_default();
    let samples: u64 = ordered.iter().map(|(_, r)| r.samples).sum();
    let count = ordered.len() as f64;

    let weighted = policy == Aggregation::WeightedMean && samples > 0;
    let mut acc = vec![0.0f64; len];

    for (_, report) in &ordered {
        let weight = if weighted { report.samples as f64 } else { 1.0 };
        for (a, g) in acc.iter_mut().zip(&report.grad) {
            *a += weight * f64::from(*g);
        }
    }

    let scale = match policy {
        Aggregation::Sum => 1.0,
        _ if weighted => 1.0 / samples as f64,
        _ if count > 0.0 => 1.0 / count,
        _ => 0.0,
    };

    let grad: Vec<f32> = acc.into_iter().map(|a| (a * scale) as f32).collect();
    let norm = grad.iter().map(|g| f64::from(*g).powi(2)).sum::<f64>().sqrt() as f32;

    let loss = if samples > 0 {
        ordered
            .iter()
            .map(|(_, r)| f64::from(r.loss) * r.samples as f64)
            .sum::<f64>()
            / samples as f64
    } else if count > 0.0 {
        ordered.iter().map(|(_, r)| f64::from(r.loss)).sum::<f64>() / count
    } else {
        0.0
    };

    Aggregate {
        grad,
        loss: loss as f32,
        samples,
        norm,
    }
}
