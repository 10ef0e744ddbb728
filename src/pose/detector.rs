use ndarray::{Array4, Ix1, Ix3};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

use super::keypoint::{Detections, KeypointIndex};
use crate::config::DetectorConfig;
use crate::error::{PoseError, Result};

/// トップダウン型の2Dキーポイント検出器
///
/// 人物ごとに COCO 順の 17 × (x, y, visibility) と信頼度を返す。
/// 閾値によるフィルタは行わない。
pub trait KeypointDetector {
    type Frame: ?Sized;

    fn detect(&mut self, frame: &Self::Frame) -> Result<Detections>;
}

/// ONNX にエクスポートした Keypoint R-CNN 系モデル
///
/// 入力: [1, 3, H, W] の RGB f32 テンソル (0.0〜1.0)
/// 出力: keypoints [N, 17, 3], scores [N]
pub struct OnnxKeypointDetector {
    session: Session,
    input_name: String,
    keypoints_output: String,
    scores_output: String,
}

impl OnnxKeypointDetector {
    /// ONNXモデルを読み込んで初期化
    pub fn new<P: AsRef<Path>>(model_path: P, config: &DetectorConfig) -> Result<Self> {
        let model_path = model_path.as_ref();
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path)
            .map_err(|e| {
                PoseError::ModelLoad(format!("{}: {}", model_path.display(), e))
            })?;
        tracing::info!("keypoint detector loaded from {}", model_path.display());

        Ok(Self {
            session,
            input_name: config.input_name.clone(),
            keypoints_output: config.keypoints_output.clone(),
            scores_output: config.scores_output.clone(),
        })
    }

    pub fn from_config(config: &DetectorConfig) -> Result<Self> {
        Self::new(&config.model_path, config)
    }
}

impl KeypointDetector for OnnxKeypointDetector {
    type Frame = Array4<f32>;

    fn detect(&mut self, frame: &Array4<f32>) -> Result<Detections> {
        let input_tensor = Tensor::from_array(frame.to_owned())?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])?;

        let keypoints: ndarray::ArrayViewD<f32> =
            outputs[self.keypoints_output.as_str()].try_extract_array()?;
        let scores: ndarray::ArrayViewD<f32> =
            outputs[self.scores_output.as_str()].try_extract_array()?;

        // 検出なしのときは [0] や [0, 17, 3] が返る
        if scores.is_empty() {
            return Ok(Detections::empty());
        }

        let keypoints = keypoints
            .into_dimensionality::<Ix3>()
            .map_err(|e| PoseError::Detector(format!("keypoints output: {e}")))?
            .to_owned();
        let scores = scores
            .into_dimensionality::<Ix1>()
            .map_err(|e| PoseError::Detector(format!("scores output: {e}")))?
            .to_owned();

        if keypoints.dim().1 != KeypointIndex::COUNT {
            tracing::warn!(
                "detector returned {} joints per person, expected {}",
                keypoints.dim().1,
                KeypointIndex::COUNT
            );
        }
        Detections::new(keypoints, scores)
    }
}
