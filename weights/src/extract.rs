use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use log::debug;
use model::{ModelState, ParamLayout};

use crate::{DType, Producer, Provenance, Result, TensorRecord, WeightBundle, WeightsErr};

/// Captures every named parameter of `state` by value, stamped with the current time.
///
/// # Arguments
/// * `state` - The trained model state.
/// * `producer` - The trainer that produced `state`.
///
/// # Returns
/// A bundle that stays valid after `state` is mutated or dropped.
pub fn extract(state: &ModelState, producer: Producer) -> WeightBundle {
    let created_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    extract_at(state, producer, created_at)
}

/// Same as `extract` with an explicit creation timestamp in unix seconds.
pub fn extract_at(state: &ModelState, producer: Producer, created_at: u64) -> WeightBundle {
    let tensors: BTreeMap<_, _> = state
        .named_params()
        .map(|(spec, values)| {
            (
                spec.name.clone(),
                TensorRecord::from_f32(spec.shape.clone(), values),
            )
        })
        .collect();

    debug!(tensors = tensors.len(), step = state.step(); "extracted weights");

    let provenance = Provenance {
        config_hash: state.config_hash().to_string(),
        step: state.step(),
        epoch: state.epoch(),
        created_at,
        producer,
    };

    WeightBundle::new(tensors, provenance)
}

/// Rebuilds a model state from a bundle so it can be used for prediction.
///
/// # Arguments
/// * `bundle` - The loaded weights.
/// * `layout` - The parameter layout of the model the weights are for.
///
/// # Returns
/// An `Incompatible` error if a tensor is missing, has another shape or isn't `f32`.
pub fn restore(bundle: &WeightBundle, layout: Arc<ParamLayout>) -> Result<ModelState> {
    let mut values = Vec::with_capacity(layout.len());

    for spec in layout.iter() {
        let record = bundle
            .get(&spec.name)
            .ok_or_else(|| WeightsErr::Incompatible(format!("missing tensor '{}'", spec.name)))?;

        if record.shape() != spec.shape.as_slice() {
            return Err(WeightsErr::Incompatible(format!(
                "tensor '{}' has shape {:?}, expected {:?}",
                spec.name,
                record.shape(),
                spec.shape
            )));
        }

        let decoded = record.to_f32().ok_or_else(|| {
            WeightsErr::Incompatible(format!(
                "tensor '{}' is {}, expected {}",
                spec.name,
                record.dtype(),
                DType::F32
            ))
        })?;

        values.extend(decoded);
    }

    let provenance = bundle.provenance();
    let state = ModelState::new(layout, values, provenance.config_hash.clone())?
        .with_progress(provenance.step, provenance.epoch);

    Ok(state)
}

#[cfg(test)]
mod tests {
    use model::optimization::GradientDescent;

    use super::*;

    fn state() -> ModelState {
        let layout = ParamLayout::new([("dense.weight", vec![2, 3]), ("dense.bias", vec![3])]);
        let values = (0..9).map(|i| i as f32 * 0.5).collect();
        ModelState::new(Arc::new(layout), values, "abc123")
            .unwrap()
            .with_progress(42, 3)
    }

    #[test]
    fn test_extract_captures_every_param() {
        let bundle = extract_at(&state(), Producer::Local, 7);

        assert_eq!(bundle.len(), 2);
        let weight = bundle.get("dense.weight").unwrap();
        assert_eq!(weight.shape(), &[2, 3]);
        assert_eq!(weight.to_f32().unwrap(), vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5]);

        let provenance = bundle.provenance();
        assert_eq!(provenance.config_hash, "abc123");
        assert_eq!((provenance.step, provenance.epoch), (42, 3));
        assert_eq!(provenance.created_at, 7);
    }

    #[test]
    fn test_bundle_survives_state_mutation() {
        let mut state = state();
        let bundle = extract_at(&state, Producer::Distributed, 0);
        let before = bundle.clone();

        state.param_mut("dense.bias").unwrap().fill(-1.0);
        state
            .apply(&[1.0; 9], &mut GradientDescent::new(1.0))
            .unwrap();
        drop(state);

        assert_eq!(bundle, before);
        assert_eq!(
            bundle.get("dense.bias").unwrap().to_f32().unwrap(),
            vec![3.0, 3.5, 4.0]
        );
    }

    #[test]
    fn test_restore_inverts_extract() {
        let state = state();
        let bundle = extract(&state, Producer::Local);

        let restored = restore(&bundle, state.layout().clone()).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_restore_rejects_other_shapes() {
        let bundle = extract_at(&state(), Producer::Local, 0);
        let layout = ParamLayout::new([("dense.weight", vec![3, 2]), ("dense.bias", vec![3])]);

        let err = restore(&bundle, Arc::new(layout)).unwrap_err();
        assert!(matches!(err, WeightsErr::Incompatible(_)));
    }

    #[test]
    fn test_restore_rejects_missing_tensors() {
        let bundle = extract_at(&state(), Producer::Local, 0);
        let layout = ParamLayout::new([("other.weight", vec![9])]);

        assert!(restore(&bundle, Arc::new(layout)).is_err());
    }
}
