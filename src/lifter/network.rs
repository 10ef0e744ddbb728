//! 2D→3D リフティング用の全結合残差ネットワーク（推論専用）。
//!
//! Linear(32→H) → BN → ReLU → Dropout
//! → S 段の残差ブロック x + f(x)
//! → Linear(H→48)
//!
//! 推論時の Dropout は恒等写像、BN は学習時の移動平均・分散を使う。

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Ix1, Ix2};
use ndarray_npy::NpzReader;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use crate::error::{PoseError, Result};

/// PyTorch BatchNorm1d のデフォルト
pub const BATCH_NORM_EPS: f32 = 1e-5;

/// y = W x + b  (W: [out, in])
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Linear {
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if weight.nrows() != bias.len() {
            return Err(PoseError::ModelLoad(format!(
                "linear weight {:?} does not match bias {}",
                weight.dim(),
                bias.len()
            )));
        }
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    /// x: [batch, in] → [batch, out]
    pub fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        x.dot(&self.weight.t()) + &self.bias
    }
}

/// 推論モードの BatchNorm1d。係数は読み込み時に scale / shift へ畳み込む
#[derive(Debug, Clone)]
pub struct BatchNorm1d {
    scale: Array1<f32>,
    shift: Array1<f32>,
}

impl BatchNorm1d {
    pub fn new(
        gamma: Array1<f32>,
        beta: Array1<f32>,
        running_mean: Array1<f32>,
        running_var: Array1<f32>,
        eps: f32,
    ) -> Result<Self> {
        let n = gamma.len();
        if beta.len() != n || running_mean.len() != n || running_var.len() != n {
            return Err(PoseError::ModelLoad(format!(
                "batch norm parameter lengths differ: {} {} {} {}",
                n,
                beta.len(),
                running_mean.len(),
                running_var.len()
            )));
        }
        let scale = &gamma / &running_var.mapv(|v| (v + eps).sqrt());
        let shift = &beta - &(&running_mean * &scale);
        Ok(Self { scale, shift })
    }

    pub fn features(&self) -> usize {
        self.scale.len()
    }

    pub fn forward(&self, x: Array2<f32>) -> Array2<f32> {
        x * &self.scale + &self.shift
    }
}

fn relu(x: Array2<f32>) -> Array2<f32> {
    x.mapv_into(|v| v.max(0.0))
}

/// Linear → BN → ReLU（Dropout は推論時に無効）
#[derive(Debug, Clone)]
struct Dense {
    linear: Linear,
    norm: BatchNorm1d,
}

impl Dense {
    fn new(linear: Linear, norm: BatchNorm1d) -> Result<Self> {
        if linear.out_features() != norm.features() {
            return Err(PoseError::ModelLoad(format!(
                "linear output {} does not match batch norm {}",
                linear.out_features(),
                norm.features()
            )));
        }
        Ok(Self { linear, norm })
    }

    fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        relu(self.norm.forward(self.linear.forward(x)))
    }
}

/// x + f(x), f = Dense → Dense
#[derive(Debug, Clone)]
pub struct ResidualBlock {
    first: Dense,
    second: Dense,
}

impl ResidualBlock {
    pub fn new(w1: Linear, bn1: BatchNorm1d, w2: Linear, bn2: BatchNorm1d) -> Result<Self> {
        let first = Dense::new(w1, bn1)?;
        let second = Dense::new(w2, bn2)?;
        let size = first.linear.in_features();
        if first.linear.out_features() != size || second.linear.in_features() != size
            || second.linear.out_features() != size
        {
            return Err(PoseError::ModelLoad(format!(
                "residual block must be {size}x{size}"
            )));
        }
        Ok(Self { first, second })
    }

    fn forward(&self, x: Array2<f32>) -> Array2<f32> {
        let y = self.second.forward(self.first.forward(x.view()).view());
        x + y
    }
}

/// 残差 MLP 本体
#[derive(Debug, Clone)]
pub struct LinearModel {
    input: Dense,
    stages: Vec<ResidualBlock>,
    output: Linear,
}

impl LinearModel {
    pub fn new(
        w1: Linear,
        bn1: BatchNorm1d,
        stages: Vec<ResidualBlock>,
        w2: Linear,
    ) -> Result<Self> {
        let input = Dense::new(w1, bn1)?;
        let linear_size = input.linear.out_features();
        for (i, stage) in stages.iter().enumerate() {
            if stage.first.linear.in_features() != linear_size {
                return Err(PoseError::ModelLoad(format!(
                    "linear_stages.{i} width {} != {}",
                    stage.first.linear.in_features(),
                    linear_size
                )));
            }
        }
        if w2.in_features() != linear_size {
            return Err(PoseError::ModelLoad(format!(
                "w2 input {} != {}",
                w2.in_features(),
                linear_size
            )));
        }
        Ok(Self {
            input,
            stages,
            output: w2,
        })
    }

    /// state_dict を npz に書き出したチェックポイントを読む
    pub fn from_npz<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let in_file = |e: PoseError| match e {
            PoseError::ModelLoad(msg) => PoseError::ModelLoad(format!("{}: {}", path.display(), msg)),
            other => PoseError::ModelLoad(format!("{}: {}", path.display(), other)),
        };
        let file = File::open(path).map_err(|e| in_file(e.into()))?;
        let mut npz = NpzReader::new(file).map_err(|e| in_file(e.into()))?;
        let model = Self::from_state_dict(&mut npz).map_err(in_file)?;
        tracing::info!(
            "lifter loaded from {} (linear_size={}, num_stage={})",
            path.display(),
            model.linear_size(),
            model.num_stage()
        );
        Ok(model)
    }

    /// PyTorch の state_dict 名で各テンソルを引く
    ///
    /// キーは `w1.weight` 形式。`state_dict/` 接頭辞付きでもよい。
    pub fn from_state_dict<R: Read + Seek>(npz: &mut NpzReader<R>) -> Result<Self> {
        let mut dict = StateDict::new(npz)?;

        let w1 = dict.linear("w1")?;
        let bn1 = dict.batch_norm("batch_norm1")?;

        let mut stages = Vec::new();
        while dict.contains(&format!("linear_stages.{}.w1.weight", stages.len())) {
            let prefix = format!("linear_stages.{}", stages.len());
            stages.push(ResidualBlock::new(
                dict.linear(&format!("{prefix}.w1"))?,
                dict.batch_norm(&format!("{prefix}.batch_norm1"))?,
                dict.linear(&format!("{prefix}.w2"))?,
                dict.batch_norm(&format!("{prefix}.batch_norm2"))?,
            )?);
        }

        let w2 = dict.linear("w2")?;
        Self::new(w1, bn1, stages, w2)
    }

    pub fn input_size(&self) -> usize {
        self.input.linear.in_features()
    }

    pub fn output_size(&self) -> usize {
        self.output.out_features()
    }

    pub fn linear_size(&self) -> usize {
        self.input.linear.out_features()
    }

    pub fn num_stage(&self) -> usize {
        self.stages.len()
    }

    /// x: [batch, input_size] → [batch, output_size]
    pub fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let mut y = self.input.forward(x);
        for stage in &self.stages {
            y = stage.forward(y);
        }
        self.output.forward(y.view())
    }

    /// 1サンプル分
    pub fn forward_one(&self, x: ArrayView1<f32>) -> Array1<f32> {
        let batch = x.insert_axis(Axis(0));
        self.forward(batch).index_axis_move(Axis(0), 0)
    }
}

/// npz 内の state_dict テンソル
struct StateDict<'a, R: Read + Seek> {
    npz: &'a mut NpzReader<R>,
    /// (.npy を除いた名前, アーカイブ内の名前)
    names: Vec<(String, String)>,
}

impl<'a, R: Read + Seek> StateDict<'a, R> {
    fn new(npz: &'a mut NpzReader<R>) -> Result<Self> {
        let names = npz
            .names()?
            .into_iter()
            .map(|n| (n.trim_end_matches(".npy").to_string(), n))
            .collect();
        Ok(Self { npz, names })
    }

    fn resolve(&self, key: &str) -> Option<String> {
        let prefixed = format!("state_dict/{key}");
        self.names
            .iter()
            .find(|(short, _)| short.as_str() == key || short.as_str() == prefixed)
            .map(|(_, archived)| archived.clone())
    }

    fn contains(&self, key: &str) -> bool {
        self.resolve(key).is_some()
    }

    fn missing(key: &str) -> PoseError {
        PoseError::ModelLoad(format!("state_dict is missing `{key}`"))
    }

    fn matrix(&mut self, key: &str) -> Result<Array2<f32>> {
        let name = self.resolve(key).ok_or_else(|| Self::missing(key))?;
        match self.npz.by_name::<_, Ix2>(&name) {
            Ok(a) => Ok(a),
            Err(_) => {
                let a: Array2<f64> = self.npz.by_name(&name)?;
                Ok(a.mapv(|v| v as f32))
            }
        }
    }

    fn vector(&mut self, key: &str) -> Result<Array1<f32>> {
        let name = self.resolve(key).ok_or_else(|| Self::missing(key))?;
        match self.npz.by_name::<_, Ix1>(&name) {
            Ok(a) => Ok(a),
            Err(_) => {
                let a: Array1<f64> = self.npz.by_name(&name)?;
                Ok(a.mapv(|v| v as f32))
            }
        }
    }

    fn linear(&mut self, prefix: &str) -> Result<Linear> {
        Linear::new(
            self.matrix(&format!("{prefix}.weight"))?,
            self.vector(&format!("{prefix}.bias"))?,
        )
    }

    fn batch_norm(&mut self, prefix: &str) -> Result<BatchNorm1d> {
        BatchNorm1d::new(
            self.vector(&format!("{prefix}.weight"))?,
            self.vector(&format!("{prefix}.bias"))?,
            self.vector(&format!("{prefix}.running_mean"))?,
            self.vector(&format!("{prefix}.running_var"))?,
            BATCH_NORM_EPS,
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};
    use ndarray_npy::NpzWriter;

    /// 決定的な疑似乱数で埋めた重み
    fn filled(rows: usize, cols: usize, seed: u32) -> Array2<f32> {
        Array::from_shape_fn((rows, cols), |(r, c)| {
            let v = (r as u32 * 31 + c as u32 * 17 + seed * 7) % 23;
            (v as f32 - 11.0) / 50.0
        })
    }

    fn filled_vec(n: usize, seed: u32, offset: f32) -> Array1<f32> {
        Array::from_shape_fn(n, |i| ((i as u32 * 13 + seed) % 7) as f32 / 10.0 + offset)
    }

    /// state_dict と同じキー名のテンソル一式
    pub(crate) fn state_dict(
        input: usize,
        hidden: usize,
        output: usize,
        stages: usize,
    ) -> Vec<(String, Array<f32, ndarray::IxDyn>)> {
        let mut dict = Vec::new();
        let mut seed = 1;
        let linear = |dict: &mut Vec<_>, prefix: &str, out: usize, inp: usize, seed: &mut u32| {
            dict.push((format!("{prefix}.weight"), filled(out, inp, *seed).into_dyn()));
            dict.push((format!("{prefix}.bias"), filled_vec(out, *seed, -0.3).into_dyn()));
            *seed += 1;
        };
        let bn = |dict: &mut Vec<_>, prefix: &str, n: usize, seed: &mut u32| {
            dict.push((format!("{prefix}.weight"), filled_vec(n, *seed, 0.5).into_dyn()));
            dict.push((format!("{prefix}.bias"), filled_vec(n, *seed + 1, -0.2).into_dyn()));
            dict.push((format!("{prefix}.running_mean"), filled_vec(n, *seed + 2, -0.1).into_dyn()));
            dict.push((format!("{prefix}.running_var"), filled_vec(n, *seed + 3, 0.8).into_dyn()));
            *seed += 4;
        };
        linear(&mut dict, "w1", hidden, input, &mut seed);
        bn(&mut dict, "batch_norm1", hidden, &mut seed);
        for s in 0..stages {
            linear(&mut dict, &format!("linear_stages.{s}.w1"), hidden, hidden, &mut seed);
            bn(&mut dict, &format!("linear_stages.{s}.batch_norm1"), hidden, &mut seed);
            linear(&mut dict, &format!("linear_stages.{s}.w2"), hidden, hidden, &mut seed);
            bn(&mut dict, &format!("linear_stages.{s}.batch_norm2"), hidden, &mut seed);
        }
        linear(&mut dict, "w2", output, hidden, &mut seed);
        dict
    }

    pub(crate) fn write_state_dict<P: AsRef<Path>>(
        path: P,
        dict: &[(String, Array<f32, ndarray::IxDyn>)],
        prefix: &str,
    ) {
        let mut npz = NpzWriter::new(File::create(path).unwrap());
        for (name, array) in dict {
            npz.add_array(format!("{prefix}{name}"), array).unwrap();
        }
        npz.finish().unwrap();
    }

    #[test]
    fn test_linear_forward() {
        let linear = Linear::new(array![[1.0, 2.0], [0.0, -1.0]], array![0.5, 1.0]).unwrap();
        let y = linear.forward(array![[3.0, 4.0]].view());
        assert_eq!(y, array![[11.5, -3.0]]);
    }

    #[test]
    fn test_linear_shape_mismatch() {
        assert!(Linear::new(Array2::zeros((3, 2)), Array1::zeros(2)).is_err());
    }

    #[test]
    fn test_batch_norm_inference() {
        let bn = BatchNorm1d::new(array![2.0], array![1.0], array![3.0], array![4.0], 0.0).unwrap();
        // (5 - 3) / 2 * 2 + 1 = 3
        let y = bn.forward(array![[5.0]]);
        assert_abs_diff_eq!(y[[0, 0]], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_residual_block_identity_when_branch_is_zero() {
        // ReLU 後に 0 になる枝なら x + f(x) = x
        let zero = || Linear::new(Array2::zeros((2, 2)), Array1::zeros(2)).unwrap();
        let bn = || {
            BatchNorm1d::new(array![1.0, 1.0], array![-1.0, -1.0], array![0.0, 0.0], array![1.0, 1.0], 0.0)
                .unwrap()
        };
        let block = ResidualBlock::new(zero(), bn(), zero(), bn()).unwrap();
        let x = array![[0.25, -4.0]];
        assert_eq!(block.forward(x.clone()), x);
    }

    #[test]
    fn test_load_state_dict_infers_architecture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.npz");
        write_state_dict(&path, &state_dict(32, 8, 48, 2), "");

        let model = LinearModel::from_npz(&path).unwrap();
        assert_eq!(model.input_size(), 32);
        assert_eq!(model.linear_size(), 8);
        assert_eq!(model.num_stage(), 2);
        assert_eq!(model.output_size(), 48);
    }

    #[test]
    fn test_load_state_dict_with_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.npz");
        write_state_dict(&path, &state_dict(32, 4, 48, 1), "state_dict/");

        let model = LinearModel::from_npz(&path).unwrap();
        assert_eq!(model.num_stage(), 1);
    }

    #[test]
    fn test_missing_tensor_is_model_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.npz");
        let dict: Vec<_> = state_dict(32, 4, 48, 1)
            .into_iter()
            .filter(|(name, _)| name != "w2.bias")
            .collect();
        write_state_dict(&path, &dict, "");

        let err = LinearModel::from_npz(&path).unwrap_err();
        assert!(matches!(err, PoseError::ModelLoad(ref msg) if msg.contains("w2.bias")));
    }

    #[test]
    fn test_missing_file_is_model_load_error() {
        let err = LinearModel::from_npz("models/does_not_exist.npz").unwrap_err();
        assert!(matches!(err, PoseError::ModelLoad(_)));
    }

    #[test]
    fn test_forward_matches_manual_computation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.npz");
        let dict = state_dict(4, 3, 2, 1);
        write_state_dict(&path, &dict, "");
        let model = LinearModel::from_npz(&path).unwrap();

        let get = |name: &str| -> Array<f32, ndarray::IxDyn> {
            dict.iter().find(|(n, _)| n == name).unwrap().1.clone()
        };
        let lin = |x: &Array1<f32>, p: &str| -> Array1<f32> {
            let w = get(&format!("{p}.weight")).into_dimensionality::<Ix2>().unwrap();
            let b = get(&format!("{p}.bias")).into_dimensionality::<Ix1>().unwrap();
            w.dot(x) + b
        };
        let bn_relu = |x: Array1<f32>, p: &str| -> Array1<f32> {
            let v = |s: &str| get(&format!("{p}.{s}")).into_dimensionality::<Ix1>().unwrap();
            let y = (x - v("running_mean")) / v("running_var").mapv(|r| (r + BATCH_NORM_EPS).sqrt())
                * v("weight")
                + v("bias");
            y.mapv(|e| e.max(0.0))
        };

        let x = array![0.3f32, -1.2, 2.0, 0.7];
        let h = bn_relu(lin(&x, "w1"), "batch_norm1");
        let f = bn_relu(lin(&h, "linear_stages.0.w1"), "linear_stages.0.batch_norm1");
        let f = bn_relu(lin(&f, "linear_stages.0.w2"), "linear_stages.0.batch_norm2");
        let expected = lin(&(h + f), "w2");

        let y = model.forward_one(x.view());
        for (a, b) in y.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_forward_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.npz");
        write_state_dict(&path, &state_dict(32, 16, 48, 2), "");
        let model = LinearModel::from_npz(&path).unwrap();

        let x = Array1::from_shape_fn(32, |i| (i as f32 * 0.37).sin() * 3.0);
        let a = model.forward_one(x.view());
        let b = model.forward_one(x.view());
        for (p, q) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(*p, *q, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_batch_forward_matches_single() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.npz");
        write_state_dict(&path, &state_dict(32, 8, 48, 2), "");
        let model = LinearModel::from_npz(&path).unwrap();

        let batch = Array2::from_shape_fn((3, 32), |(r, c)| (r * 32 + c) as f32 / 40.0 - 1.0);
        let out = model.forward(batch.view());
        for r in 0..3 {
            let single = model.forward_one(batch.row(r));
            for (a, b) in out.row(r).iter().zip(single.iter()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
            }
        }
    }
}
