use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::camera::CameraIntrinsics;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub lifter: LifterConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub pnp: PnpConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LifterConfig {
    /// state_dict を npz に変換したチェックポイント
    #[serde(default = "default_weights_path")]
    pub weights_path: String,
    /// mean / std / dim_use を含む npz
    #[serde(default = "default_stats_path")]
    pub stats_path: String,
}

fn default_weights_path() -> String { "models/ckpt_best.npz".to_string() }
fn default_stats_path() -> String { "models/stat_3d.npz".to_string() }

impl Default for LifterConfig {
    fn default() -> Self {
        Self {
            weights_path: default_weights_path(),
            stats_path: default_stats_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_model")]
    pub model_path: String,
    #[serde(default = "default_input_name")]
    pub input_name: String,
    #[serde(default = "default_keypoints_output")]
    pub keypoints_output: String,
    #[serde(default = "default_scores_output")]
    pub scores_output: String,
}

fn default_detector_model() -> String { "models/keypointrcnn_resnet50_fpn.onnx".to_string() }
fn default_input_name() -> String { "images".to_string() }
fn default_keypoints_output() -> String { "keypoints".to_string() }
fn default_scores_output() -> String { "scores".to_string() }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: default_detector_model(),
            input_name: default_input_name(),
            keypoints_output: default_keypoints_output(),
            scores_output: default_scores_output(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    /// キャリブレーション名。指定時は `<calibration_dir>/<name>_intrinsics.npy` を読む
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_calibration_dir")]
    pub calibration_dir: String,
    #[serde(default = "default_fx")]
    pub fx: f64,
    #[serde(default = "default_fy")]
    pub fy: f64,
    #[serde(default = "default_cx")]
    pub cx: f64,
    #[serde(default = "default_cy")]
    pub cy: f64,
    /// [k1, k2, p1, p2, k3]
    #[serde(default = "default_distortion")]
    pub distortion: Vec<f64>,
}

fn default_calibration_dir() -> String { "src/cameras".to_string() }
fn default_fx() -> f64 { CameraIntrinsics::reference().fx }
fn default_fy() -> f64 { CameraIntrinsics::reference().fy }
fn default_cx() -> f64 { CameraIntrinsics::reference().cx }
fn default_cy() -> f64 { CameraIntrinsics::reference().cy }
fn default_distortion() -> Vec<f64> { vec![0.0; 5] }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            name: None,
            calibration_dir: default_calibration_dir(),
            fx: default_fx(),
            fy: default_fy(),
            cx: default_cx(),
            cy: default_cy(),
            distortion: default_distortion(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PnpConfig {
    /// 初期回転ベクトル（Rodrigues）
    #[serde(default)]
    pub initial_rvec: [f64; 3],
    /// 初期並進（mm）。カメラ正面 2m で奥行きの符号を決める
    #[serde(default = "default_initial_tvec")]
    pub initial_tvec: [f64; 3],
    /// LM の patience（残差評価の上限は patience × 7 回）
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// パラメータ更新量の収束判定（LM の xtol）
    #[serde(default = "default_step_tolerance")]
    pub step_tolerance: f64,
}

fn default_initial_tvec() -> [f64; 3] { [0.0, 0.0, 2000.0] }
fn default_max_iterations() -> usize { 100 }
fn default_step_tolerance() -> f64 { 1e-10 }

impl Default for PnpConfig {
    fn default() -> Self {
        Self {
            initial_rvec: [0.0; 3],
            initial_tvec: default_initial_tvec(),
            max_iterations: default_max_iterations(),
            step_tolerance: default_step_tolerance(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// 人物スコアの閾値
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    /// これを超える RMS 再投影誤差（ピクセル）のフレームは不安定扱い
    #[serde(default = "default_max_reprojection_rms")]
    pub max_reprojection_rms: f64,
    /// 観測点の広がり（2D 共分散の短軸の標準偏差, ピクセル）の下限
    #[serde(default = "default_min_observation_spread")]
    pub min_observation_spread: f64,
    /// 骨盤の奥行き（mm）の許容範囲
    #[serde(default = "default_depth_range")]
    pub depth_range: [f64; 2],
}

fn default_score_threshold() -> f32 { 0.60 }
fn default_max_reprojection_rms() -> f64 { 25.0 }
fn default_min_observation_spread() -> f64 { 2.0 }
fn default_depth_range() -> [f64; 2] { [100.0, 20000.0] }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            score_threshold: default_score_threshold(),
            max_reprojection_rms: default_max_reprojection_rms(),
            min_observation_spread: default_min_observation_spread(),
            depth_range: default_depth_range(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// ファイルがなければデフォルト
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                if path.exists() {
                    tracing::warn!("{:#}; using defaults", e);
                }
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.pipeline.score_threshold, 0.60);
        assert_eq!(config.pnp.initial_tvec, [0.0, 0.0, 2000.0]);
        assert_eq!(config.pnp.initial_rvec, [0.0; 3]);
        assert_eq!(config.lifter.weights_path, "models/ckpt_best.npz");
        assert_eq!(config.camera.fx, 914.0999755859375);
        assert_eq!(config.camera.distortion, vec![0.0; 5]);
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [pipeline]
            score_threshold = 0.8

            [camera]
            name = "webcam_acer"
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.score_threshold, 0.8);
        assert_eq!(config.pipeline.max_reprojection_rms, 25.0);
        assert_eq!(config.pipeline.depth_range, [100.0, 20000.0]);
        assert_eq!(config.camera.name.as_deref(), Some("webcam_acer"));
        assert_eq!(config.camera.calibration_dir, "src/cameras");
        assert_eq!(config.pnp.max_iterations, 100);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pnp]\ninitial_tvec = [0.0, 0.0, 3000.0]").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.pnp.initial_tvec, [0.0, 0.0, 3000.0]);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default("does/not/exist.toml");
        assert_eq!(config.pipeline.score_threshold, 0.60);
    }
}
