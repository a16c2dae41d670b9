use std::{collections::BTreeMap, sync::Arc};

use model::{ModelState, ParamLayout};
use weights::{
    DType, Producer, Provenance, TensorRecord, WeightBundle, WeightsErr, deserialize, extract_at,
    load, persist, restore, serialize,
};

fn state() -> ModelState {
    let layout = ParamLayout::new([
        ("layers.0.weight", vec![3, 2]),
        ("layers.0.bias", vec![2]),
        ("layers.1.weight", vec![2, 1]),
        ("layers.1.bias", vec![1]),
    ]);
    let values = (0..11).map(|i| (i as f32 - 5.0) / 3.0).collect();

    ModelState::new(Arc::new(layout), values, "f00d")
        .unwrap()
        .with_progress(120, 4)
}

fn provenance() -> Provenance {
    Provenance {
        config_hash: "beef".into(),
        step: 9,
        epoch: 1,
        created_at: 1_700_000_000,
        producer: Producer::Distributed,
    }
}

#[test]
fn test_round_trip_keeps_every_tensor() {
    let bundle = extract_at(&state(), Producer::Local, 1_700_000_000);

    let restored = deserialize(&serialize(&bundle).unwrap()).unwrap();

    assert_eq!(restored, bundle);
    assert_eq!(restored.provenance().producer, Producer::Local);
}

#[test]
fn test_round_trip_keeps_other_dtypes() {
    let tensors = BTreeMap::from([
        (
            "embedding.table".to_string(),
            TensorRecord::new(vec![2, 2], DType::F64, vec![7; 32]),
        ),
        (
            "vocab.ids".to_string(),
            TensorRecord::new(vec![3], DType::I64, vec![1; 24]),
        ),
        (
            "mask".to_string(),
            TensorRecord::new(vec![5], DType::U8, vec![0, 1, 1, 0, 1]),
        ),
        (
            "half".to_string(),
            TensorRecord::new(vec![2], DType::BF16, vec![0x80, 0x3f, 0, 0x40]),
        ),
    ]);
    let bundle = WeightBundle::new(tensors, provenance());

    let restored = deserialize(&serialize(&bundle).unwrap()).unwrap();

    assert_eq!(restored, bundle);
}

#[test]
fn test_empty_name_is_rejected() {
    let tensors = BTreeMap::from([(String::new(), TensorRecord::from_f32(vec![1], &[1.0]))]);
    let bundle = WeightBundle::new(tensors, provenance());

    assert!(matches!(serialize(&bundle), Err(WeightsErr::Serialization(_))));
}

#[test]
fn test_reserved_header_name_is_rejected() {
    let tensors = BTreeMap::from([
        ("__metadata__".to_string(), TensorRecord::from_f32(vec![2], &[1.0, 2.0])),
        ("w".to_string(), TensorRecord::from_f32(vec![1], &[3.0])),
    ]);
    let bundle = WeightBundle::new(tensors, provenance());

    let err = serialize(&bundle).unwrap_err();
    assert!(matches!(err, WeightsErr::Serialization(_)), "{err}");
    assert!(err.to_string().contains("__metadata__"), "{err}");
}

#[test]
fn test_mismatched_byte_length_is_rejected() {
    let tensors = BTreeMap::from([(
        "w".to_string(),
        TensorRecord::new(vec![4], DType::F32, vec![0; 15]),
    )]);
    let bundle = WeightBundle::new(tensors, provenance());

    assert!(matches!(serialize(&bundle), Err(WeightsErr::Serialization(_))));
}

#[test]
fn test_flipped_value_fails_checksum() {
    let bundle = extract_at(&state(), Producer::Local, 0);
    let mut bytes = serialize(&bundle).unwrap();

    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;

    let err = deserialize(&bytes).unwrap_err();
    assert!(matches!(err, WeightsErr::CorruptArtifact(_)), "{err}");
    assert!(err.to_string().contains("checksum"), "{err}");
}

#[test]
fn test_garbage_is_corrupt() {
    assert!(matches!(
        deserialize(b"definitely not weights"),
        Err(WeightsErr::CorruptArtifact(_))
    ));
    assert!(matches!(deserialize(&[]), Err(WeightsErr::CorruptArtifact(_))));
}

#[test]
fn test_truncated_artifact_is_corrupt() {
    let bytes = serialize(&extract_at(&state(), Producer::Local, 0)).unwrap();

    let err = deserialize(&bytes[..bytes.len() - 4]).unwrap_err();
    assert!(matches!(err, WeightsErr::CorruptArtifact(_)), "{err}");
}

#[test]
fn test_foreign_safetensors_file_is_corrupt() {
    let header = br#"{"w":{"dtype":"F32","shape":[2],"data_offsets":[0,8]}}"#;
    let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
    bytes.extend_from_slice(header);
    bytes.extend_from_slice(&[0; 8]);

    let err = deserialize(&bytes).unwrap_err();
    assert!(err.to_string().contains("metadata"), "{err}");
}

#[test]
fn test_persist_then_load_and_restore() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("weights.safetensors");
    let state = state();
    let bundle = extract_at(&state, Producer::Distributed, 5);

    persist(&bundle, &path).unwrap();

    let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(names, ["weights.safetensors"]);

    let loaded = load(&path).unwrap();
    assert_eq!(loaded, bundle);

    let restored = restore(&loaded, state.layout().clone()).unwrap();
    assert_eq!(restored.values(), state.values());
    assert_eq!(restored.step(), 120);
}

#[test]
fn test_failed_persist_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weights.safetensors");
    let tensors = BTreeMap::from([(
        "w".to_string(),
        TensorRecord::new(vec![2], DType::F32, vec![0; 3]),
    )]);

    assert!(persist(&WeightBundle::new(tensors, provenance()), &path).is_err());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
