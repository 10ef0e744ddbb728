use thiserror::Error;

use crate::skeleton::Convention;

/// ライブラリ共通の Result
pub type Result<T> = std::result::Result<T, PoseError>;

/// 姿勢推定パイプラインのエラー
///
/// `ModelLoad` は起動時の致命的エラー。`BadSkeletonShape` と `PnpFailure` は
/// 人物単位のエラーで、パイプラインはフレーム処理を継続する。
#[derive(Debug, Error)]
pub enum PoseError {
    /// 重み・統計量・キャリブレーションの欠落または不整合
    #[error("model load error: {0}")]
    ModelLoad(String),

    /// 関節数が宣言された骨格規約と一致しない
    #[error("bad skeleton shape for {convention}: expected {expected} joints, got {actual}")]
    BadSkeletonShape {
        convention: Convention,
        expected: usize,
        actual: usize,
    },

    /// PnP が解を返せなかった
    #[error("PnP failure: {0}")]
    PnpFailure(String),

    /// 2D検出器の実行エラー
    #[error("detector error: {0}")]
    Detector(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PoseError {
    pub fn bad_shape(convention: Convention, actual: usize) -> Self {
        Self::BadSkeletonShape {
            convention,
            expected: convention.joint_count(),
            actual,
        }
    }

    /// 人物単位で握りつぶしてよいエラーか
    pub fn is_per_person(&self) -> bool {
        matches!(self, Self::BadSkeletonShape { .. } | Self::PnpFailure(_))
    }
}

impl From<ndarray_npy::ReadNpzError> for PoseError {
    fn from(err: ndarray_npy::ReadNpzError) -> Self {
        Self::ModelLoad(err.to_string())
    }
}

impl From<ndarray_npy::ReadNpyError> for PoseError {
    fn from(err: ndarray_npy::ReadNpyError) -> Self {
        Self::ModelLoad(err.to_string())
    }
}

impl From<ort::Error> for PoseError {
    fn from(err: ort::Error) -> Self {
        Self::Detector(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_shape_message() {
        let err = PoseError::bad_shape(Convention::Coco17, 15);
        assert_eq!(
            err.to_string(),
            "bad skeleton shape for COCO-17: expected 17 joints, got 15"
        );
        assert!(err.is_per_person());
    }

    #[test]
    fn test_model_load_is_fatal() {
        let err = PoseError::ModelLoad("stat_3d.npz: missing `dim_use`".into());
        assert!(!err.is_per_person());
        assert!(err.to_string().contains("dim_use"));
    }
}
