use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::camera::Camera;
use crate::config::{Config, PipelineConfig};
use crate::deproject::{Deprojector, PersonAxis};
use crate::error::{PoseError, Result};
use crate::geometry::Homogeneous;
use crate::lifter::Lifter;
use crate::pose::{Detections, KeypointDetector};
use crate::skeleton::{coco_to_h36m16, coco_to_h36m_observed, Keypoints2D, Keypoints3D};

/// 1人分の3D姿勢
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonPose {
    /// カメラ座標の H36M-17（mm）。PnP 失敗時は恒等変換のままのローカル座標
    pub keypoints_3d_global: Keypoints3D,
    pub homogeneous: Homogeneous,
    /// Nose を除いた16関節の再投影（PnP 失敗時は None）
    pub reprojection: Option<Keypoints2D>,
    pub axis: Option<PersonAxis>,
    pub rms_error: Option<f64>,
    pub stable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersonOutcome {
    Posed(PersonPose),
    Skipped { reason: String },
}

impl PersonOutcome {
    pub fn pose(&self) -> Option<&PersonPose> {
        match self {
            Self::Posed(pose) => Some(pose),
            Self::Skipped { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    /// 検出器の出力順
    pub index: usize,
    pub score: f32,
    pub keypoints_2d_coco: Option<Keypoints2D>,
    pub outcome: PersonOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    /// 閾値前の検出人数
    pub detected: usize,
    pub persons: Vec<PersonRecord>,
}

impl FrameResult {
    pub fn posed(&self) -> impl Iterator<Item = &PersonPose> {
        self.persons.iter().filter_map(|p| p.outcome.pose())
    }
}

/// detect → 閾値 → bridge → lift → deproject
///
/// 人物同士は独立に処理する。人物単位のエラーは記録に残してフレームを続ける。
pub struct Pipeline<D> {
    detector: D,
    lifter: Arc<Lifter>,
    deprojector: Arc<Deprojector>,
    config: PipelineConfig,
}

impl<D: KeypointDetector> Pipeline<D> {
    pub fn new(
        detector: D,
        lifter: Arc<Lifter>,
        deprojector: Arc<Deprojector>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            detector,
            lifter,
            deprojector,
            config,
        }
    }

    /// 設定からリフターとカメラを読み込む
    pub fn from_config(detector: D, config: &Config) -> Result<Self> {
        let lifter = Lifter::from_config(&config.lifter)?;
        let camera = Camera::from_config(&config.camera)?;
        let deprojector = Deprojector::new(camera, config.pnp.clone());
        Ok(Self::new(
            detector,
            Arc::new(lifter),
            Arc::new(deprojector),
            config.pipeline.clone(),
        ))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 1フレームを処理。検出器のエラーだけがフレームを失敗させる
    pub fn process_frame(&mut self, frame: &D::Frame) -> Result<FrameResult> {
        let detections = self.detector.detect(frame)?;
        Ok(self.process_detections(&detections))
    }

    pub fn process_detections(&self, detections: &Detections) -> FrameResult {
        let mut result = FrameResult {
            detected: detections.len(),
            persons: Vec::new(),
        };

        for (index, (score, coco)) in detections.persons().enumerate() {
            if score < self.config.score_threshold {
                continue;
            }
            let record = match coco {
                Ok(coco) => {
                    let outcome = match self.locate(&coco) {
                        Ok(pose) => PersonOutcome::Posed(pose),
                        Err(e) => {
                            tracing::warn!("person {}: skipped ({})", index, e);
                            PersonOutcome::Skipped { reason: e.to_string() }
                        }
                    };
                    PersonRecord {
                        index,
                        score,
                        keypoints_2d_coco: Some(coco),
                        outcome,
                    }
                }
                Err(e) => {
                    tracing::warn!("person {}: skipped ({})", index, e);
                    PersonRecord {
                        index,
                        score,
                        keypoints_2d_coco: None,
                        outcome: PersonOutcome::Skipped { reason: e.to_string() },
                    }
                }
            };
            result.persons.push(record);
        }

        tracing::debug!(
            "frame: {} detected, {} above {:.2}",
            result.detected,
            result.persons.len(),
            self.config.score_threshold
        );
        result
    }

    /// COCO-17 の1人分を3D化する
    pub fn locate(&self, coco: &Keypoints2D) -> Result<PersonPose> {
        let lifter_input = coco_to_h36m16(coco)?;
        let local = self.lifter.lift(&lifter_input)?;
        let observed = coco_to_h36m_observed(coco)?;

        match self.deprojector.deproject_pose(&observed, &local) {
            Ok(d) => {
                let stable = d.is_stable(&self.config);
                if !stable {
                    tracing::warn!(
                        "unstable PnP: rms {:.1}px, spread {:.1}px, depth {:.0}mm, converged={} after {} evaluations",
                        d.rms_error,
                        d.spread,
                        d.tvec.z,
                        d.converged,
                        d.iterations
                    );
                }
                tracing::debug!(
                    "tvec=({:.0}, {:.0}, {:.0})mm rms={:.2}px",
                    d.tvec.x,
                    d.tvec.y,
                    d.tvec.z,
                    d.rms_error
                );
                Ok(PersonPose {
                    axis: Some(self.deprojector.person_axis(&d.homogeneous)),
                    keypoints_3d_global: d.keypoints_3d_global,
                    homogeneous: d.homogeneous,
                    reprojection: Some(d.reprojection),
                    rms_error: Some(d.rms_error),
                    stable,
                })
            }
            Err(PoseError::PnpFailure(msg)) => {
                tracing::warn!("PnP failed ({}); using identity transform", msg);
                Ok(PersonPose {
                    keypoints_3d_global: local,
                    homogeneous: Homogeneous::identity(),
                    reprojection: None,
                    axis: None,
                    rms_error: None,
                    stable: false,
                })
            }
            Err(e) => Err(e),
        }
    }
}
