use std::{fs, num::NonZeroUsize, path::Path};

use ndarray::{Array2, ArrayView2, Axis, s};

use crate::{ModelErr, Result, config::DatasetConfig};

/// A set of training records split into features `x` and targets `y`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    x: Array2<f32>,
    y: Array2<f32>,
}

impl Dataset {
    /// Creates a new `Dataset` from row-major records of `x_size` features followed by `y_size` targets.
    ///
    /// # Arguments
    /// * `data` - The flat records.
    /// * `x_size` - The amount of features per record.
    /// * `y_size` - The amount of targets per record.
    ///
    /// # Returns
    /// A `Dataset` error if the sizes don't describe whole records.
    pub fn new(data: Vec<f32>, x_size: usize, y_size: usize) -> Result<Self> {
        let row_size = x_size + y_size;
        if x_size == 0 || y_size == 0 {
            return Err(ModelErr::Dataset(
                "x_size and y_size must be greater than 0".into(),
            ));
        }

        if data.len() % row_size != 0 {
            return Err(ModelErr::Dataset(format!(
                "dataset length ({}) is not divisible by x_size + y_size ({row_size})",
                data.len()
            )));
        }

        let rows = data.len() / row_size;
        let full = Array2::from_shape_vec((rows, row_size), data)
            .map_err(|e| ModelErr::Dataset(e.to_string()))?;

        Ok(Self {
            x: full.slice(s![.., ..x_size]).to_owned(),
            y: full.slice(s![.., x_size..]).to_owned(),
        })
    }

    /// Loads the dataset described by `config`.
    pub fn load(config: &DatasetConfig) -> Result<Self> {
        match config {
            DatasetConfig::Inline {
                data,
                x_size,
                y_size,
            } => Self::new(data.clone(), *x_size, *y_size),
            DatasetConfig::Local {
                path,
                x_size,
                y_size,
            } => Self::new(read_records(path, x_size + y_size)?, *x_size, *y_size),
        }
    }

    /// The amount of records.
    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn x_size(&self) -> usize {
        self.x.ncols()
    }

    pub fn y_size(&self) -> usize {
        self.y.ncols()
    }

    pub fn x(&self) -> ArrayView2<'_, f32> {
        self.x.view()
    }

    pub fn y(&self) -> ArrayView2<'_, f32> {
        self.y.view()
    }

    /// Takes the contiguous slice of records that belongs to shard `index` out of `count`.
    ///
    /// The first `len % count` shards hold one extra record, so the split is the same on every node.
    ///
    /// # Arguments
    /// * `index` - The shard to take, usually the worker id.
    /// * `count` - The total amount of shards.
    ///
    /// # Returns
    /// The shard or an error if `index` is out of range.
    pub fn shard(&self, index: usize, count: NonZeroUsize) -> Result<Self> {
        let count = count.get();
        if index >= count {
            return Err(ModelErr::SizeMismatch {
                what: "shard index",
                got: index,
                expected: count,
            });
        }

        let base = self.len() / count;
        let extra = self.len() % count;
        let start = index * base + index.min(extra);
        let end = start + base + usize::from(index < extra);

        Ok(Self {
            x: self.x.slice(s![start..end, ..]).to_owned(),
            y: self.y.slice(s![start..end, ..]).to_owned(),
        })
    }

    /// Iterates over mini-batches of at most `batch_size` records.
    pub fn batches(
        &self,
        batch_size: NonZeroUsize,
    ) -> impl Iterator<Item = (ArrayView2<'_, f32>, ArrayView2<'_, f32>)> {
        let size = batch_size.get();
        self.x
            .axis_chunks_iter(Axis(0), size)
            .zip(self.y.axis_chunks_iter(Axis(0), size))
    }
}

/// Reads a comma or whitespace separated file of numeric records, one per line.
///
/// Empty lines and lines starting with `#` are skipped.
fn read_records(path: &Path, row_size: usize) -> Result<Vec<f32>> {
    let content = fs::read_to_string(path).map_err(|e| {
        ModelErr::Dataset(format!("cannot read '{}': {e}", path.display()))
    })?;

    let mut data = Vec::new();

    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let before = data.len();
        for field in line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|f| !f.is_empty())
        {
            let value = field.parse::<f32>().map_err(|e| {
                ModelErr::Dataset(format!("line {}: invalid number '{field}': {e}", lineno + 1))
            })?;
            data.push(value);
        }

        let got = data.len() - before;
        if got != row_size {
            return Err(ModelErr::Dataset(format!(
                "line {}: expected {row_size} values, got {got}",
                lineno + 1
            )));
        }
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn dataset(rows: usize) -> Dataset {
        let data = (0..rows).flat_map(|i| [i as f32, 10.0 * i as f32]).collect();
        Dataset::new(data, 1, 1).unwrap()
    }

    #[test]
    fn test_splits_features_and_targets() {
        let dataset = Dataset::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 1).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.x().row(1).to_vec(), vec![4.0, 5.0]);
        assert_eq!(dataset.y().column(0).to_vec(), vec![3.0, 6.0]);
    }

    #[test]
    fn test_ragged_data_is_rejected() {
        assert!(Dataset::new(vec![1.0, 2.0, 3.0], 1, 1).is_err());
    }

    #[test]
    fn test_shards_cover_every_record_once() {
        let dataset = dataset(10);
        let shards: Vec<_> = (0..3).map(|i| dataset.shard(i, nz(3)).unwrap()).collect();

        assert_eq!(shards.iter().map(Dataset::len).collect::<Vec<_>>(), [4, 3, 3]);

        let xs: Vec<f32> = shards.iter().flat_map(|s| s.x().iter().copied().collect::<Vec<_>>()).collect();
        assert_eq!(xs, (0..10).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn test_shard_out_of_range() {
        assert!(dataset(4).shard(2, nz(2)).is_err());
    }

    #[test]
    fn test_batches_keep_the_tail() {
        let dataset = dataset(5);
        let sizes: Vec<_> = dataset.batches(nz(2)).map(|(x, _)| x.nrows()).collect();
        assert_eq!(sizes, [2, 2, 1]);
    }

    #[test]
    fn test_loads_local_records() {
        let path = std::env::temp_dir().join(format!("model-dataset-{}.csv", std::process::id()));
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "# x, y").unwrap();
        writeln!(file, "1.0, 2.0").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "3 4").unwrap();
        drop(file);

        let config = DatasetConfig::Local {
            path: path.clone(),
            x_size: 1,
            y_size: 1,
        };
        let dataset = Dataset::load(&config).unwrap();
        fs::remove_file(path).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.y().column(0).to_vec(), vec![2.0, 4.0]);
    }
}
