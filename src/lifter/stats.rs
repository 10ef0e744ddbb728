use nalgebra::Point3;
use ndarray::{Array1, ArrayView1};
use ndarray_npy::NpzReader;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use crate::error::{PoseError, Result};

/// 学習データの3D統計量（32関節 × 3 = 96次元）
///
/// `dim_use` は定数でない48次元の昇順インデックス。重みと一体で扱う。
#[derive(Debug, Clone, PartialEq)]
pub struct LifterStats {
    mean: Array1<f64>,
    std: Array1<f64>,
    dim_use: Vec<usize>,
}

impl LifterStats {
    pub fn new(mean: Array1<f64>, std: Array1<f64>, dim_use: Vec<usize>) -> Result<Self> {
        if mean.len() != std.len() {
            return Err(PoseError::ModelLoad(format!(
                "mean has {} dims but std has {}",
                mean.len(),
                std.len()
            )));
        }
        if dim_use.is_empty() || dim_use.len() % 3 != 0 {
            return Err(PoseError::ModelLoad(format!(
                "dim_use must select whole joints, got {} dims",
                dim_use.len()
            )));
        }
        if dim_use.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PoseError::ModelLoad("dim_use must be strictly increasing".into()));
        }
        if let Some(&last) = dim_use.last() {
            if last >= mean.len() {
                return Err(PoseError::ModelLoad(format!(
                    "dim_use index {} out of range for {} dims",
                    last,
                    mean.len()
                )));
            }
        }
        // 先頭3次元（骨盤）は出力時に0で埋めるため使えない
        if dim_use[0] < 3 {
            return Err(PoseError::ModelLoad("dim_use must not include the pelvis".into()));
        }
        Ok(Self { mean, std, dim_use })
    }

    /// `mean`, `std`, `dim_use` を含む npz を読む
    pub fn from_npz<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let in_file = |e: PoseError| match e {
            PoseError::ModelLoad(msg) => PoseError::ModelLoad(format!("{}: {}", path.display(), msg)),
            other => PoseError::ModelLoad(format!("{}: {}", path.display(), other)),
        };
        let file = File::open(path).map_err(|e| in_file(e.into()))?;
        let mut npz = NpzReader::new(file).map_err(|e| in_file(e.into()))?;
        let stats = Self::from_npz_reader(&mut npz).map_err(in_file)?;
        tracing::info!(
            "lifter stats loaded from {} ({} dims, {} used)",
            path.display(),
            stats.dims(),
            stats.dim_use.len()
        );
        Ok(stats)
    }

    pub fn from_npz_reader<R: Read + Seek>(npz: &mut NpzReader<R>) -> Result<Self> {
        let names = npz.names()?;
        let find = |key: &str| -> Result<String> {
            names
                .iter()
                .find(|n| n.trim_end_matches(".npy") == key)
                .cloned()
                .ok_or_else(|| PoseError::ModelLoad(format!("stats are missing `{key}`")))
        };

        let mean = read_f64(npz, &find("mean")?)?;
        let std = read_f64(npz, &find("std")?)?;
        let dim_use = read_indices(npz, &find("dim_use")?)?;
        Self::new(mean, std, dim_use)
    }

    pub fn dims(&self) -> usize {
        self.mean.len()
    }

    pub fn dim_use(&self) -> &[usize] {
        &self.dim_use
    }

    /// 出力する関節数（骨盤 + 使用次元）
    pub fn joint_count(&self) -> usize {
        1 + self.dim_use.len() / 3
    }

    /// 96次元 → 使用する48次元の正規化値
    pub fn normalize(&self, data: ArrayView1<f64>) -> Result<Array1<f64>> {
        if data.len() != self.dims() {
            return Err(PoseError::ModelLoad(format!(
                "expected {} dims, got {}",
                self.dims(),
                data.len()
            )));
        }
        Ok(self
            .dim_use
            .iter()
            .map(|&d| {
                let s = self.std[d];
                if s.abs() < f64::EPSILON {
                    0.0
                } else {
                    (data[d] - self.mean[d]) / s
                }
            })
            .collect())
    }

    /// 48次元のネットワーク出力 → 96次元（mm）
    ///
    /// dim_use の位置に散布し、std を掛けて mean を足す。
    pub fn unnormalize(&self, normalized: ArrayView1<f32>) -> Result<Array1<f64>> {
        if normalized.len() != self.dim_use.len() {
            return Err(PoseError::ModelLoad(format!(
                "network output has {} dims but dim_use selects {}",
                normalized.len(),
                self.dim_use.len()
            )));
        }
        let mut full = Array1::<f64>::zeros(self.dims());
        for (&d, &v) in self.dim_use.iter().zip(normalized.iter()) {
            full[d] = v as f64;
        }
        Ok(full * &self.std + &self.mean)
    }

    /// 96次元から使用関節を取り出し、骨盤 (0,0,0) を先頭に付けた関節列にする
    pub fn gather_joints(&self, full: ArrayView1<f64>) -> Vec<Point3<f64>> {
        let mut values = vec![0.0; 3];
        values.extend(self.dim_use.iter().map(|&d| full[d]));
        values
            .chunks_exact(3)
            .map(|c| Point3::new(c[0], c[1], c[2]))
            .collect()
    }
}

fn read_f64<R: Read + Seek>(npz: &mut NpzReader<R>, name: &str) -> Result<Array1<f64>> {
    match npz.by_name::<_, ndarray::Ix1>(name) {
        Ok(a) => Ok(a),
        Err(_) => {
            let a: Array1<f32> = npz.by_name(name)?;
            Ok(a.mapv(|v| v as f64))
        }
    }
}

fn read_indices<R: Read + Seek>(npz: &mut NpzReader<R>, name: &str) -> Result<Vec<usize>> {
    let raw: Vec<i64> = match npz.by_name::<_, ndarray::Ix1>(name) {
        Ok(a) => {
            let a: Array1<i64> = a;
            a.to_vec()
        }
        Err(_) => {
            let a: Array1<i32> = npz.by_name(name)?;
            a.iter().map(|&v| v as i64).collect()
        }
    };
    raw.into_iter()
        .map(|v| {
            usize::try_from(v)
                .map_err(|_| PoseError::ModelLoad(format!("negative index {v} in {name}")))
        })
        .collect()
}
