use std::fmt::Write;

use sha2::{Digest, Sha256};

use crate::WeightBundle;

/// Lowercase hex SHA-256 of `bytes`.
pub fn digest_hex(bytes: &[u8]) -> String {
    hex(&Sha256::digest(bytes))
}

/// Fingerprints every name, dtype, shape and value of a bundle plus its provenance.
pub fn bundle_checksum(bundle: &WeightBundle) -> String {
    let mut hasher = Sha256::new();

    for (name, record) in bundle.tensors() {
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update(record.dtype().name().as_bytes());
        hasher.update((record.shape().len() as u64).to_le_bytes());
        for &dim in record.shape() {
            hasher.update((dim as u64).to_le_bytes());
        }
        hasher.update((record.data().len() as u64).to_le_bytes());
        hasher.update(record.data());
    }

    let provenance = bundle.provenance();
    hasher.update((provenance.config_hash.len() as u64).to_le_bytes());
    hasher.update(provenance.config_hash.as_bytes());
    hasher.update(provenance.step.to_le_bytes());
    hasher.update(provenance.epoch.to_le_bytes());
    hasher.update(provenance.created_at.to_le_bytes());
    hasher.update(provenance.producer.name().as_bytes());

    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}
