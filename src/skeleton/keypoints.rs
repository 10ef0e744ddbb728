use nalgebra::{Point2, Point3};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use super::convention::{Convention, H36mJoint};
use crate::error::{PoseError, Result};

/// 3D座標の基準系
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// 骨盤原点の人物ローカル座標（mm）
    Local,
    /// カメラ座標（mm, Z はカメラから離れる向き）
    Camera,
}

/// 規約付きの2Dキーポイント列（ピクセル）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawKeypoints2D")]
pub struct Keypoints2D {
    convention: Convention,
    points: Vec<Point2<f64>>,
}

/// 逆シリアライズ用。関節数の検査は `Keypoints2D::new` に任せる
#[derive(Deserialize)]
struct RawKeypoints2D {
    convention: Convention,
    points: Vec<Point2<f64>>,
}

impl TryFrom<RawKeypoints2D> for Keypoints2D {
    type Error = PoseError;

    fn try_from(raw: RawKeypoints2D) -> Result<Self> {
        Self::new(raw.convention, raw.points)
    }
}

impl Keypoints2D {
    /// 関節数が規約と一致しなければ `BadSkeletonShape`
    pub fn new(convention: Convention, points: Vec<Point2<f64>>) -> Result<Self> {
        if points.len() != convention.joint_count() {
            return Err(PoseError::bad_shape(convention, points.len()));
        }
        Ok(Self { convention, points })
    }

    /// `[x0, y0, x1, y1, ...]` から構築
    pub fn from_flat(convention: Convention, flat: &[f64]) -> Result<Self> {
        if flat.len() % 2 != 0 {
            return Err(PoseError::bad_shape(convention, flat.len() / 2));
        }
        let points = flat.chunks_exact(2).map(|c| Point2::new(c[0], c[1])).collect();
        Self::new(convention, points)
    }

    pub fn convention(&self) -> Convention {
        self.convention
    }

    pub fn points(&self) -> &[Point2<f64>] {
        &self.points
    }

    pub fn get(&self, index: usize) -> Option<&Point2<f64>> {
        self.points.get(index)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 関節ごとに x, y を並べた1行ベクトル（リフター入力形式）
    pub fn to_flat(&self) -> Array1<f32> {
        self.points
            .iter()
            .flat_map(|p| [p.x as f32, p.y as f32])
            .collect()
    }

    /// 描画用の骨線分
    pub fn segments(&self, upper_body: bool) -> Vec<(Point2<f64>, Point2<f64>)> {
        super::pairs::drawing_pairs(self.convention, upper_body)
            .iter()
            .map(|&(a, b)| (self.points[a], self.points[b]))
            .collect()
    }
}

/// 規約付きの3Dキーポイント列（mm）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawKeypoints3D")]
pub struct Keypoints3D {
    convention: Convention,
    frame: Frame,
    points: Vec<Point3<f64>>,
}

#[derive(Deserialize)]
struct RawKeypoints3D {
    convention: Convention,
    frame: Frame,
    points: Vec<Point3<f64>>,
}

impl TryFrom<RawKeypoints3D> for Keypoints3D {
    type Error = PoseError;

    fn try_from(raw: RawKeypoints3D) -> Result<Self> {
        Self::new(raw.convention, raw.frame, raw.points)
    }
}

impl Keypoints3D {
    pub fn new(convention: Convention, frame: Frame, points: Vec<Point3<f64>>) -> Result<Self> {
        if points.len() != convention.joint_count() {
            return Err(PoseError::bad_shape(convention, points.len()));
        }
        Ok(Self {
            convention,
            frame,
            points,
        })
    }

    pub fn convention(&self) -> Convention {
        self.convention
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 行ごとに [X, Y, Z]
    pub fn to_rows(&self) -> Vec<[f64; 3]> {
        self.points.iter().map(|p| [p.x, p.y, p.z]).collect()
    }

    /// 合成 Nose (index 9) を除いた PnP 用の16関節
    pub fn without_synthetic_nose(&self) -> Result<Self> {
        if self.convention != Convention::H36m17 {
            return Err(PoseError::bad_shape(Convention::H36m17, self.points.len()));
        }
        Ok(Self {
            convention: Convention::H36mNoseless,
            frame: self.frame,
            points: remove_joint(&self.points, H36mJoint::SYNTHETIC_NOSE),
        })
    }

    /// 全関節に同じ変換を適用し、基準系を付け替える
    pub fn map_points<F>(&self, frame: Frame, f: F) -> Self
    where
        F: Fn(&Point3<f64>) -> Point3<f64>,
    {
        Self {
            convention: self.convention,
            frame,
            points: self.points.iter().map(f).collect(),
        }
    }
}

/// 指定関節を除いたコピーを返す
///
/// 範囲外のインデックスでは何も除かない。
pub fn remove_joint<T: Clone>(seq: &[T], index: usize) -> Vec<T> {
    seq.iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, p)| p.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h36m_local() -> Keypoints3D {
        let points = (0..17).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        Keypoints3D::new(Convention::H36m17, Frame::Local, points).unwrap()
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        let err = Keypoints2D::new(Convention::Coco17, vec![Point2::origin(); 16]).unwrap_err();
        assert!(matches!(
            err,
            PoseError::BadSkeletonShape { expected: 17, actual: 16, .. }
        ));
    }

    #[test]
    fn test_from_flat_and_back() {
        let flat: Vec<f64> = (0..32).map(|v| v as f64).collect();
        let kp = Keypoints2D::from_flat(Convention::H36m16, &flat).unwrap();
        assert_eq!(kp.get(1), Some(&Point2::new(2.0, 3.0)));
        let back = kp.to_flat();
        assert_eq!(back.len(), 32);
        assert_eq!(back[31], 31.0);
    }

    #[test]
    fn test_from_flat_odd_length() {
        assert!(Keypoints2D::from_flat(Convention::H36m16, &[1.0; 31]).is_err());
    }

    #[test]
    fn test_remove_joint() {
        assert_eq!(remove_joint(&[0, 1, 2, 3], 1), vec![0, 2, 3]);
        assert_eq!(remove_joint(&[0, 1], 5), vec![0, 1]);
    }

    #[test]
    fn test_without_synthetic_nose() {
        let noseless = h36m_local().without_synthetic_nose().unwrap();
        assert_eq!(noseless.convention(), Convention::H36mNoseless);
        assert_eq!(noseless.len(), 16);
        // index 9 は元の Head (10)
        assert_eq!(noseless.points()[9].x, 10.0);
        assert_eq!(noseless.points()[8].x, 8.0);
    }

    #[test]
    fn test_without_synthetic_nose_requires_h36m17() {
        let noseless = h36m_local().without_synthetic_nose().unwrap();
        assert!(noseless.without_synthetic_nose().is_err());
    }

    #[test]
    fn test_segments_follow_pairs() {
        let points = (0..17).map(|i| Point2::new(i as f64, 0.0)).collect();
        let kp = Keypoints2D::new(Convention::Coco17, points).unwrap();
        let segments = kp.segments(false);
        assert_eq!(segments.len(), 15);
        assert_eq!(segments[0].0.x, 0.0);
        assert_eq!(segments[0].1.x, 1.0);
    }

    #[test]
    fn test_deserialize_checks_joint_count() {
        let short = r#"{"convention":"Coco17","points":[[1.0,2.0]]}"#;
        let err = serde_json::from_str::<Keypoints2D>(short).unwrap_err();
        assert!(err.to_string().contains("17"), "{err}");

        let short = r#"{"convention":"H36m17","frame":"Local","points":[[0.0,0.0,0.0]]}"#;
        assert!(serde_json::from_str::<Keypoints3D>(short).is_err());
    }

    #[test]
    fn test_deserialize_valid_keypoints() {
        let json = serde_json::to_string(&h36m_local()).unwrap();
        let back: Keypoints3D = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h36m_local());

        let points = (0..17).map(|i| Point2::new(i as f64, 1.0)).collect();
        let coco = Keypoints2D::new(Convention::Coco17, points).unwrap();
        let back: Keypoints2D = serde_json::from_str(&serde_json::to_string(&coco).unwrap()).unwrap();
        assert_eq!(back.segments(false).len(), 15);
    }
}
