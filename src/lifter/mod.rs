pub mod network;
pub mod stats;

pub use network::{BatchNorm1d, Linear, LinearModel, ResidualBlock, BATCH_NORM_EPS};
pub use stats::LifterStats;

use ndarray::{ArrayView1, ArrayView2, Axis};
use std::path::Path;

use crate::config::LifterConfig;
use crate::error::{PoseError, Result};
use crate::skeleton::{Convention, Frame, Keypoints2D, Keypoints3D};

/// 2D → 3D リフター（ネットワーク + 正規化統計量）
///
/// 入力はブリッジ済みの H36M-16 を平坦化した32値。出力は骨盤原点の
/// H36M-17（mm）。読み込み後は不変なので `Arc` で共有できる。
#[derive(Debug, Clone)]
pub struct Lifter {
    model: LinearModel,
    stats: LifterStats,
}

impl Lifter {
    /// 重みと統計量の次元が噛み合っているか確認して束ねる
    pub fn new(model: LinearModel, stats: LifterStats) -> Result<Self> {
        let input = Convention::H36m16.joint_count() * 2;
        if model.input_size() != input {
            return Err(PoseError::ModelLoad(format!(
                "lifter expects {} inputs but the network takes {}",
                input,
                model.input_size()
            )));
        }
        if model.output_size() != stats.dim_use().len() {
            return Err(PoseError::ModelLoad(format!(
                "network emits {} values but dim_use selects {}",
                model.output_size(),
                stats.dim_use().len()
            )));
        }
        if stats.joint_count() != Convention::H36m17.joint_count() {
            return Err(PoseError::ModelLoad(format!(
                "stats describe {} joints, expected {}",
                stats.joint_count(),
                Convention::H36m17.joint_count()
            )));
        }
        Ok(Self { model, stats })
    }

    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(weights: P, stats: Q) -> Result<Self> {
        let model = LinearModel::from_npz(weights)?;
        let stats = LifterStats::from_npz(stats)?;
        Self::new(model, stats)
    }

    pub fn from_config(config: &LifterConfig) -> Result<Self> {
        Self::load(&config.weights_path, &config.stats_path)
    }

    pub fn model(&self) -> &LinearModel {
        &self.model
    }

    pub fn stats(&self) -> &LifterStats {
        &self.stats
    }

    /// H36M-16 の2D骨格を持ち上げる
    pub fn lift(&self, keypoints: &Keypoints2D) -> Result<Keypoints3D> {
        if keypoints.convention() != Convention::H36m16 {
            return Err(PoseError::bad_shape(Convention::H36m16, keypoints.len()));
        }
        self.lift_flat(keypoints.to_flat().view())
    }

    /// 平坦化済みの32値を持ち上げる
    pub fn lift_flat(&self, input: ArrayView1<f32>) -> Result<Keypoints3D> {
        if input.len() != self.model.input_size() {
            return Err(PoseError::bad_shape(Convention::H36m16, input.len() / 2));
        }
        let output = self.model.forward_one(input);
        self.denormalize(output.view())
    }

    /// [N, 32] をまとめて持ち上げる
    pub fn lift_batch(&self, inputs: ArrayView2<f32>) -> Result<Vec<Keypoints3D>> {
        if inputs.ncols() != self.model.input_size() {
            return Err(PoseError::bad_shape(Convention::H36m16, inputs.ncols() / 2));
        }
        let outputs = self.model.forward(inputs);
        outputs
            .axis_iter(Axis(0))
            .map(|row| self.denormalize(row))
            .collect()
    }

    fn denormalize(&self, output: ArrayView1<f32>) -> Result<Keypoints3D> {
        let full = self.stats.unnormalize(output)?;
        let joints = self.stats.gather_joints(full.view());
        Keypoints3D::new(Convention::H36m17, Frame::Local, joints)
    }
}
