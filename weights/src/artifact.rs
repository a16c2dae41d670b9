use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info};
use safetensors::{Dtype, SafeTensors, View};

use crate::{
    DType, Provenance, Result, TensorRecord, WeightBundle, WeightsErr, checksum::bundle_checksum,
};

const FORMAT: &str = "orchestra-weights/1";

const KEY_FORMAT: &str = "format";
const KEY_CONFIG_HASH: &str = "config_hash";
const KEY_STEP: &str = "step";
const KEY_EPOCH: &str = "epoch";
const KEY_CREATED_AT: &str = "created_at";
const KEY_PRODUCER: &str = "producer";
const KEY_CHECKSUM: &str = "checksum";

/// Header key the container keeps for its own metadata map.
const METADATA_KEY: &str = "__metadata__";

/// Borrows a record as a safetensors tensor.
struct RecordView<'a> {
    dtype: Dtype,
    record: &'a TensorRecord,
}

impl View for RecordView<'_> {
    fn dtype(&self) -> Dtype {
        self.dtype
    }

    fn shape(&self) -> &[usize] {
        self.record.shape()
    }

    fn data(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.record.data())
    }

    fn data_len(&self) -> usize {
        self.record.data().len()
    }
}

fn to_safetensors(dtype: DType) -> Dtype {
    match dtype {
        DType::F16 => Dtype::F16,
        DType::BF16 => Dtype::BF16,
        DType::F32 => Dtype::F32,
        DType::F64 => Dtype::F64,
        DType::I32 => Dtype::I32,
        DType::I64 => Dtype::I64,
        DType::U8 => Dtype::U8,
    }
}

fn from_safetensors(dtype: Dtype) -> Option<DType> {
    match dtype {
        Dtype::F16 => Some(DType::F16),
        Dtype::BF16 => Some(DType::BF16),
        Dtype::F32 => Some(DType::F32),
        Dtype::F64 => Some(DType::F64),
        Dtype::I32 => Some(DType::I32),
        Dtype::I64 => Some(DType::I64),
        Dtype::U8 => Some(DType::U8),
        _ => None,
    }
}

/// Writes `bundle` into the artifact format.
///
/// # Arguments
/// * `bundle` - The bundle to serialize.
///
/// # Returns
/// The artifact bytes or a `Serialization` error on an empty or reserved name, or a
/// byte length that disagrees with the tensor's shape and dtype.
pub fn serialize(bundle: &WeightBundle) -> Result<Vec<u8>> {
    let mut views = Vec::with_capacity(bundle.len());

    for (name, record) in bundle.tensors() {
        if name.is_empty() {
            return Err(WeightsErr::Serialization("empty tensor name".into()));
        }
        if name == METADATA_KEY {
            return Err(WeightsErr::Serialization(format!(
                "tensor name '{METADATA_KEY}' is reserved by the container header"
            )));
        }

        record.check(name)?;
        views.push((
            name.as_str(),
            RecordView {
                dtype: to_safetensors(record.dtype()),
                record,
            },
        ));
    }

    let provenance = bundle.provenance();
    let metadata = HashMap::from([
        (KEY_FORMAT.to_string(), FORMAT.to_string()),
        (KEY_CONFIG_HASH.to_string(), provenance.config_hash.clone()),
        (KEY_STEP.to_string(), provenance.step.to_string()),
        (KEY_EPOCH.to_string(), provenance.epoch.to_string()),
        (KEY_CREATED_AT.to_string(), provenance.created_at.to_string()),
        (KEY_PRODUCER.to_string(), provenance.producer.name().to_string()),
        (KEY_CHECKSUM.to_string(), bundle_checksum(bundle)),
    ]);

    safetensors::serialize(views, &Some(metadata))
        .map_err(|e| WeightsErr::Serialization(e.to_string()))
}

/// Reads a bundle back from artifact bytes.
///
/// # Arguments
/// * `bytes` - The artifact as produced by `serialize`.
///
/// # Returns
/// The bundle or a `CorruptArtifact` error, never a partial bundle.
pub fn deserialize(bytes: &[u8]) -> Result<WeightBundle> {
    let corrupt = |msg: String| WeightsErr::CorruptArtifact(msg);

    let (_, header) = SafeTensors::read_metadata(bytes).map_err(|e| corrupt(e.to_string()))?;
    let metadata = header
        .metadata()
        .as_ref()
        .ok_or_else(|| corrupt("missing metadata".into()))?;

    let field = |key: &str| {
        metadata
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| corrupt(format!("missing '{key}' field")))
    };
    let number = |key: &str| {
        field(key)?
            .parse::<u64>()
            .map_err(|e| corrupt(format!("invalid '{key}' field: {e}")))
    };

    let format = field(KEY_FORMAT)?;
    if format != FORMAT {
        return Err(corrupt(format!("unknown format '{format}'")));
    }

    let provenance = Provenance {
        config_hash: field(KEY_CONFIG_HASH)?.to_string(),
        step: number(KEY_STEP)?,
        epoch: number(KEY_EPOCH)?,
        created_at: number(KEY_CREATED_AT)?,
        producer: field(KEY_PRODUCER)?.parse().map_err(corrupt)?,
    };
    let expected = field(KEY_CHECKSUM)?;

    let container = SafeTensors::deserialize(bytes).map_err(|e| corrupt(e.to_string()))?;
    let mut tensors = BTreeMap::new();

    for (name, view) in container.tensors() {
        let dtype = from_safetensors(view.dtype())
            .ok_or_else(|| corrupt(format!("tensor '{name}': unsupported dtype {:?}", view.dtype())))?;

        let record = TensorRecord::new(view.shape().to_vec(), dtype, view.data().to_vec());
        tensors.insert(name, record);
    }

    let bundle = WeightBundle::new(tensors, provenance);
    let actual = bundle_checksum(&bundle);
    if actual != expected {
        return Err(corrupt(format!(
            "checksum mismatch: stored {expected}, computed {actual}"
        )));
    }

    Ok(bundle)
}

/// Serializes `bundle` and writes it to `path` atomically.
///
/// The artifact is first written to a sibling temporary file which is then
/// renamed into place, so readers never see a partial artifact.
pub fn persist(bundle: &WeightBundle, path: &Path) -> Result<()> {
    let bytes = serialize(bundle)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(path);
    if let Err(e) = fs::write(&tmp, &bytes).and_then(|_| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    info!(
        path:% = path.display(),
        tensors = bundle.len(),
        bytes = bytes.len();
        "persisted weight artifact"
    );

    Ok(())
}

/// Reads and deserializes the artifact at `path`.
pub fn load(path: &Path) -> Result<WeightBundle> {
    let bytes = fs::read(path)?;
    debug!(path:% = path.display(), bytes = bytes.len(); "loading weight artifact");
    deserialize(&bytes)
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "weights".into());

    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}
