use nalgebra::Point2;
use ndarray::{Array1, Array3, ArrayView2};

use crate::error::{PoseError, Result};
use crate::skeleton::{Convention, Keypoints2D};

/// COCO の 17 キーポイントインデックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointIndex {
    pub const COUNT: usize = 17;
}

/// 1フレーム分の検出結果
///
/// - keypoints: [N, 17, 3] (x, y, visibility) COCO順
/// - scores: [N] 人物ごとの信頼度
#[derive(Debug, Clone)]
pub struct Detections {
    pub keypoints: Array3<f32>,
    pub scores: Array1<f32>,
}

impl Detections {
    /// 人物数とキーポイント形状を検査して構築
    pub fn new(keypoints: Array3<f32>, scores: Array1<f32>) -> Result<Self> {
        let (n, joints, channels) = keypoints.dim();
        if n != scores.len() {
            return Err(PoseError::Detector(format!(
                "{} keypoint sets but {} scores",
                n,
                scores.len()
            )));
        }
        if n > 0 && (joints != KeypointIndex::COUNT || channels != 3) {
            return Err(PoseError::bad_shape(Convention::Coco17, joints));
        }
        Ok(Self { keypoints, scores })
    }

    /// 検出なし
    pub fn empty() -> Self {
        Self {
            keypoints: Array3::zeros((0, KeypointIndex::COUNT, 3)),
            scores: Array1::zeros(0),
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// 人物 i のキーポイント [17, 3]
    pub fn person(&self, index: usize) -> ArrayView2<'_, f32> {
        self.keypoints.index_axis(ndarray::Axis(0), index)
    }

    /// 人物 i の COCO-17 2D座標
    pub fn coco_2d(&self, index: usize) -> Result<Keypoints2D> {
        let points = self
            .person(index)
            .outer_iter()
            .map(|row| Point2::new(row[0] as f64, row[1] as f64))
            .collect();
        Keypoints2D::new(Convention::Coco17, points)
    }

    /// (score, COCO-17 2D) を人物ごとに返す
    pub fn persons(&self) -> impl Iterator<Item = (f32, Result<Keypoints2D>)> + '_ {
        (0..self.len()).map(move |i| (self.scores[i], self.coco_2d(i)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn test_keypoint_index_count() {
        assert_eq!(KeypointIndex::COUNT, 17);
    }

    #[test]
    fn test_empty_detections() {
        let det = Detections::empty();
        assert!(det.is_empty());
        assert_eq!(det.keypoints.dim(), (0, 17, 3));
        assert_eq!(det.persons().count(), 0);
    }

    #[test]
    fn test_detections_score_mismatch() {
        let kp = Array3::<f32>::zeros((2, 17, 3));
        assert!(Detections::new(kp, array![0.9]).is_err());
    }

    #[test]
    fn test_detections_bad_joint_count() {
        let kp = Array3::<f32>::zeros((1, 16, 3));
        let err = Detections::new(kp, array![0.9]).unwrap_err();
        assert!(matches!(err, PoseError::BadSkeletonShape { actual: 16, .. }));
    }

    #[test]
    fn test_persons_yield_coco_points() {
        let mut kp = Array3::<f32>::zeros((2, 17, 3));
        kp[[1, KeypointIndex::LeftHip as usize, 0]] = 320.0;
        kp[[1, KeypointIndex::LeftHip as usize, 1]] = 240.0;
        kp[[1, KeypointIndex::LeftHip as usize, 2]] = 1.0;
        let det = Detections::new(kp, array![0.82, 0.31]).unwrap();

        let persons: Vec<_> = det.persons().collect();
        assert_eq!(persons.len(), 2);
        assert_eq!(persons[1].0, 0.31);
        let coco = persons[1].1.as_ref().unwrap();
        assert_eq!(coco.points()[11], Point2::new(320.0, 240.0));
    }
}
