use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::{Result, WeightsErr};

/// The element types a tensor record may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F16,
    BF16,
    F32,
    F64,
    I32,
    I64,
    U8,
}

impl DType {
    /// The size in bytes of a single element.
    pub fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::F16 | Self::BF16 => 2,
            Self::F32 | Self::I32 => 4,
            Self::F64 | Self::I64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::F16 => "f16",
            Self::BF16 => "bf16",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single named tensor, owning its little-endian element bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorRecord {
    shape: Vec<usize>,
    dtype: DType,
    data: Vec<u8>,
}

impl TensorRecord {
    /// Creates a new `TensorRecord` from raw bytes.
    ///
    /// The byte length is not checked here, `serialize` rejects records whose
    /// length disagrees with `shape` and `dtype`.
    pub fn new(shape: Vec<usize>, dtype: DType, data: Vec<u8>) -> Self {
        Self { shape, dtype, data }
    }

    /// Creates a new `f32` record copying `values`.
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(shape, DType::F32, data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The amount of elements described by the shape.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Decodes the values of an `f32` record, `None` for any other dtype.
    pub fn to_f32(&self) -> Option<Vec<f32>> {
        if self.dtype != DType::F32 || self.data.len() % 4 != 0 {
            return None;
        }

        let values = self
            .data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Some(values)
    }

    /// Checks that the byte length matches `shape × dtype`.
    pub(crate) fn check(&self, name: &str) -> Result<()> {
        let expected = self
            .shape
            .iter()
            .try_fold(self.dtype.size(), |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| {
                WeightsErr::Serialization(format!("tensor '{name}': shape overflows"))
            })?;

        if self.data.len() != expected {
            return Err(WeightsErr::Serialization(format!(
                "tensor '{name}': {} bytes for shape {:?} of {}, expected {expected}",
                self.data.len(),
                self.shape,
                self.dtype
            )));
        }

        Ok(())
    }
}

/// Which trainer produced a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Producer {
    Local,
    Distributed,
}

impl Producer {
    pub fn name(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Distributed => "distributed",
        }
    }
}

impl FromStr for Producer {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "distributed" => Ok(Self::Distributed),
            other => Err(format!("unknown producer '{other}'")),
        }
    }
}

/// Where a bundle comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub config_hash: String,
    pub step: u64,
    pub epoch: u64,
    /// Unix seconds.
    pub created_at: u64,
    pub producer: Producer,
}

/// Named parameter tensors plus provenance, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightBundle {
    tensors: BTreeMap<String, TensorRecord>,
    provenance: Provenance,
}

impl WeightBundle {
    pub fn new(tensors: BTreeMap<String, TensorRecord>, provenance: Provenance) -> Self {
        Self {
            tensors,
            provenance,
        }
    }

    /// The tensors ordered by name.
    pub fn tensors(&self) -> &BTreeMap<String, TensorRecord> {
        &self.tensors
    }

    pub fn get(&self, name: &str) -> Option<&TensorRecord> {
        self.tensors.get(name)
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}
