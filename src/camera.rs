use nalgebra::{Matrix3, Point2, Point3, Vector3};
use ndarray::ArrayD;
use ndarray_npy::read_npy;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::CameraConfig;
use crate::error::{PoseError, Result};

/// 内部パラメータ K = [[fx, 0, cx], [0, fy, cy], [0, 0, 1]]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// 同梱のデフォルト（1280x720 の Web カメラ）
    pub fn reference() -> Self {
        Self::new(
            914.0999755859375,
            914.7161254882812,
            637.8196411132812,
            370.6839904785156,
        )
    }

    /// 3x3 行列から構築。スキューや射影行のある行列は拒否する
    pub fn from_matrix(k: &Matrix3<f64>) -> Result<Self> {
        let structural = [k[(0, 1)], k[(1, 0)], k[(2, 0)], k[(2, 1)]];
        if structural.iter().any(|v| v.abs() > 1e-9) || (k[(2, 2)] - 1.0).abs() > 1e-9 {
            return Err(PoseError::ModelLoad(format!(
                "intrinsics is not of the form [[fx,0,cx],[0,fy,cy],[0,0,1]]: {k}"
            )));
        }
        if k[(0, 0)] <= 0.0 || k[(1, 1)] <= 0.0 {
            return Err(PoseError::ModelLoad("focal length must be positive".into()));
        }
        Ok(Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)]))
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }
}

/// 歪み係数 [k1, k2, p1, p2, k3]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Distortion {
    pub coeffs: [f64; 5],
}

impl Distortion {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn new(coeffs: [f64; 5]) -> Self {
        Self { coeffs }
    }

    pub fn from_slice(coeffs: &[f64]) -> Result<Self> {
        let coeffs: [f64; 5] = coeffs.try_into().map_err(|_| {
            PoseError::ModelLoad(format!(
                "distortion must have 5 coefficients, got {}",
                coeffs.len()
            ))
        })?;
        Ok(Self { coeffs })
    }

    pub fn is_zero(&self) -> bool {
        self.coeffs.iter().all(|c| *c == 0.0)
    }

    /// 正規化カメラ座標に放射・接線歪みを適用
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        if self.is_zero() {
            return (x, y);
        }
        let [k1, k2, p1, p2, k3] = self.coeffs;
        let r2 = x * x + y * y;
        let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
        let xd = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
        (xd, yd)
    }
}

/// 単眼カメラ（内部パラメータ + 歪み）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub intrinsics: CameraIntrinsics,
    pub distortion: Distortion,
}

impl Camera {
    pub fn new(intrinsics: CameraIntrinsics, distortion: Distortion) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    pub fn reference() -> Self {
        Self::new(CameraIntrinsics::reference(), Distortion::zero())
    }

    /// カメラ座標の点を画像に投影（外部パラメータなし）
    pub fn project(&self, p: &Point3<f64>) -> Point2<f64> {
        // カメラ中心上の点はゼロ除算を避ける
        let z = if p.z.abs() < 1e-12 { 1e-12 } else { p.z };
        let (xd, yd) = self.distortion.apply(p.x / z, p.y / z);
        let k = &self.intrinsics;
        Point2::new(k.fx * xd + k.cx, k.fy * yd + k.cy)
    }

    /// X_cam = R X + t を経由して投影
    pub fn project_with(
        &self,
        rotation: &Matrix3<f64>,
        translation: &Vector3<f64>,
        p: &Point3<f64>,
    ) -> Point2<f64> {
        self.project(&Point3::from(rotation * p.coords + translation))
    }

    /// `<dir>/<name>_intrinsics.npy` と `<name>_distortion.npy` を読む
    pub fn load_npy<P: AsRef<Path>>(dir: P, name: &str) -> Result<Self> {
        let dir = dir.as_ref();
        let k = read_npy_f64(dir.join(format!("{name}_intrinsics.npy")))?;
        if k.len() != 9 {
            return Err(PoseError::ModelLoad(format!(
                "{name}_intrinsics.npy: expected 3x3, got {} values",
                k.len()
            )));
        }
        let intrinsics = CameraIntrinsics::from_matrix(&Matrix3::from_row_slice(&k))?;
        let dist = read_npy_f64(dir.join(format!("{name}_distortion.npy")))?;
        let distortion = Distortion::from_slice(&dist)?;
        tracing::info!("camera `{}` loaded from {}", name, dir.display());
        Ok(Self::new(intrinsics, distortion))
    }

    /// 設定から作成。`name` があれば npy を、なければ設定値を使う
    pub fn from_config(config: &CameraConfig) -> Result<Self> {
        match &config.name {
            Some(name) => Self::load_npy(&config.calibration_dir, name),
            None => Ok(Self::new(
                CameraIntrinsics::new(config.fx, config.fy, config.cx, config.cy),
                Distortion::from_slice(&config.distortion)?,
            )),
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::reference()
    }
}

/// f64 / f32 どちらで保存された npy でも読めるようにする
fn read_npy_f64<P: AsRef<Path>>(path: P) -> Result<Vec<f64>> {
    let path = path.as_ref();
    match read_npy::<_, ArrayD<f64>>(path) {
        Ok(a) => Ok(a.iter().copied().collect()),
        Err(_) => {
            let a: ArrayD<f32> = read_npy(path)
                .map_err(|e| PoseError::ModelLoad(format!("{}: {}", path.display(), e)))?;
            Ok(a.iter().map(|v| *v as f64).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2};
    use ndarray_npy::write_npy;

    #[test]
    fn test_principal_point_projection() {
        // fx=fy=1000, cx=640, cy=360 で (0,0,2000) は (640,360) に写る
        let camera = Camera::new(CameraIntrinsics::new(1000.0, 1000.0, 640.0, 360.0), Distortion::zero());
        let p = camera.project(&Point3::new(0.0, 0.0, 2000.0));
        assert_relative_eq!(p, Point2::new(640.0, 360.0));
    }

    #[test]
    fn test_projection_offsets() {
        let camera = Camera::new(CameraIntrinsics::new(1000.0, 1000.0, 640.0, 360.0), Distortion::zero());
        let p = camera.project(&Point3::new(200.0, -100.0, 2000.0));
        assert_relative_eq!(p, Point2::new(740.0, 310.0));
    }

    #[test]
    fn test_intrinsics_matrix_round_trip() {
        let k = CameraIntrinsics::reference();
        assert_eq!(CameraIntrinsics::from_matrix(&k.matrix()).unwrap(), k);
    }

    #[test]
    fn test_intrinsics_rejects_skew() {
        let mut m = CameraIntrinsics::reference().matrix();
        m[(0, 1)] = 0.5;
        assert!(CameraIntrinsics::from_matrix(&m).is_err());
    }

    #[test]
    fn test_distortion_zero_is_identity() {
        assert_eq!(Distortion::zero().apply(0.3, -0.2), (0.3, -0.2));
    }

    #[test]
    fn test_radial_distortion_pushes_outward() {
        let d = Distortion::new([0.1, 0.0, 0.0, 0.0, 0.0]);
        let (xd, yd) = d.apply(0.5, 0.0);
        assert_relative_eq!(xd, 0.5 * (1.0 + 0.1 * 0.25));
        assert_eq!(yd, 0.0);
    }

    #[test]
    fn test_distortion_wrong_length() {
        assert!(Distortion::from_slice(&[0.0; 4]).is_err());
    }

    #[test]
    fn test_load_npy() {
        let dir = tempfile::tempdir().unwrap();
        let k = arr2(&[[900.0f64, 0.0, 640.0], [0.0, 901.0, 360.0], [0.0, 0.0, 1.0]]);
        write_npy(dir.path().join("webcam_intrinsics.npy"), &k).unwrap();
        // cv2.calibrateCamera は (1, 5) の f64 を返す
        let d = arr2(&[[0.01f64, -0.02, 0.0, 0.0, 0.003]]);
        write_npy(dir.path().join("webcam_distortion.npy"), &d).unwrap();

        let camera = Camera::load_npy(dir.path(), "webcam").unwrap();
        assert_eq!(camera.intrinsics, CameraIntrinsics::new(900.0, 901.0, 640.0, 360.0));
        assert_eq!(camera.distortion.coeffs, [0.01, -0.02, 0.0, 0.0, 0.003]);
    }

    #[test]
    fn test_load_npy_f32() {
        let dir = tempfile::tempdir().unwrap();
        let k = arr2(&[[900.0f32, 0.0, 640.0], [0.0, 900.0, 360.0], [0.0, 0.0, 1.0]]);
        write_npy(dir.path().join("cam_intrinsics.npy"), &k).unwrap();
        write_npy(dir.path().join("cam_distortion.npy"), &arr1(&[0.0f32; 5])).unwrap();

        let camera = Camera::load_npy(dir.path(), "cam").unwrap();
        assert_eq!(camera.intrinsics.fx, 900.0);
        assert!(camera.distortion.is_zero());
    }

    #[test]
    fn test_load_npy_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = Camera::load_npy(dir.path(), "nothing").unwrap_err();
        assert!(matches!(err, PoseError::ModelLoad(_)));
    }
}
