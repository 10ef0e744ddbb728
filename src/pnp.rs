use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn, Matrix3, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::config::PnpConfig;
use crate::error::{PoseError, Result};
use crate::geometry::rodrigues;

/// 6自由度の姿勢を決めるのに必要な最小点数
pub const MIN_POINTS: usize = 4;

const JACOBIAN_EPS: f64 = 1e-6;

/// 外部パラメータ（Rodrigues 回転ベクトル + 並進 mm）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extrinsics {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
}

impl Extrinsics {
    pub fn new(rvec: Vector3<f64>, tvec: Vector3<f64>) -> Self {
        Self { rvec, tvec }
    }

    /// 設定の初期値（既定は回転なし・正面 2m）
    pub fn initial_guess(config: &PnpConfig) -> Self {
        Self::new(
            Vector3::from(config.initial_rvec),
            Vector3::from(config.initial_tvec),
        )
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        rodrigues(&self.rvec)
    }

    fn to_params(self) -> DVector<f64> {
        DVector::from_row_slice(&[
            self.rvec.x,
            self.rvec.y,
            self.rvec.z,
            self.tvec.x,
            self.tvec.y,
            self.tvec.z,
        ])
    }

    fn from_params(p: &DVector<f64>) -> Self {
        Self::new(Vector3::new(p[0], p[1], p[2]), Vector3::new(p[3], p[4], p[5]))
    }

    fn project(&self, camera: &Camera, p: &Point3<f64>) -> Point2<f64> {
        camera.project_with(&self.rotation(), &self.tvec, p)
    }
}

/// PnP の結果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PnpSolution {
    pub extrinsics: Extrinsics,
    /// 再投影誤差の RMS（ピクセル）
    pub rms_error: f64,
    /// 残差の評価回数
    pub iterations: usize,
    /// LM が収束条件で停止したか
    pub converged: bool,
}

/// 点ごとの RMS 再投影誤差（ピクセル）
pub fn reprojection_rms(
    extrinsics: &Extrinsics,
    camera: &Camera,
    object_points: &[Point3<f64>],
    image_points: &[Point2<f64>],
) -> f64 {
    if object_points.is_empty() {
        return 0.0;
    }
    let rotation = extrinsics.rotation();
    let squared: f64 = object_points
        .iter()
        .zip(image_points)
        .map(|(p3, p2)| (camera.project_with(&rotation, &extrinsics.tvec, p3) - p2).norm_squared())
        .sum();
    (squared / object_points.len() as f64).sqrt()
}

/// 再投影残差 [du0, dv0, du1, dv1, ...]（パラメータは rvec ++ tvec）
struct ReprojectionProblem<'a> {
    camera: &'a Camera,
    object_points: &'a [Point3<f64>],
    image_points: &'a [Point2<f64>],
    params: DVector<f64>,
}

impl ReprojectionProblem<'_> {
    fn residuals_at(&self, params: &DVector<f64>) -> DVector<f64> {
        let extrinsics = Extrinsics::from_params(params);
        let rotation = extrinsics.rotation();
        let mut r = DVector::zeros(2 * self.object_points.len());
        for (i, (p3, p2)) in self.object_points.iter().zip(self.image_points).enumerate() {
            let projected = self.camera.project_with(&rotation, &extrinsics.tvec, p3);
            r[2 * i] = projected.x - p2.x;
            r[2 * i + 1] = projected.y - p2.y;
        }
        r
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for ReprojectionProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.residuals_at(&self.params))
    }

    /// 前進差分の数値ヤコビアン
    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let base = self.residuals_at(&self.params);
        let mut jacobian = DMatrix::zeros(base.len(), self.params.len());
        for k in 0..self.params.len() {
            let mut perturbed = self.params.clone();
            perturbed[k] += JACOBIAN_EPS;
            let column = (self.residuals_at(&perturbed) - &base) / JACOBIAN_EPS;
            jacobian.set_column(k, &column);
        }
        Some(jacobian)
    }
}

/// 初期値からの Levenberg–Marquardt による PnP
///
/// 歪みモデルはカメラの `project_with` に従う。
/// 収束しなかった場合も最良の解を `converged = false` で返し、
/// 点数不足や非有限値の入力、発散だけを `PnpFailure` にする。
pub fn solve_pnp_refine(
    initial: &Extrinsics,
    object_points: &[Point3<f64>],
    image_points: &[Point2<f64>],
    camera: &Camera,
    config: &PnpConfig,
) -> Result<PnpSolution> {
    if object_points.len() != image_points.len() {
        return Err(PoseError::PnpFailure(format!(
            "{} object points but {} image points",
            object_points.len(),
            image_points.len()
        )));
    }
    if object_points.len() < MIN_POINTS {
        return Err(PoseError::PnpFailure(format!(
            "need at least {} correspondences, got {}",
            MIN_POINTS,
            object_points.len()
        )));
    }
    let finite_3d = object_points.iter().all(|p| p.coords.iter().all(|v| v.is_finite()));
    let finite_2d = image_points.iter().all(|p| p.coords.iter().all(|v| v.is_finite()));
    if !finite_3d || !finite_2d {
        return Err(PoseError::PnpFailure("non-finite correspondence".into()));
    }

    let lm = LevenbergMarquardt::new()
        .with_xtol(config.step_tolerance.max(0.0))
        .with_patience(config.max_iterations.max(1));
    let problem = ReprojectionProblem {
        camera,
        object_points,
        image_points,
        params: initial.to_params(),
    };
    let (problem, report) = lm.minimize(problem);
    let converged = report.termination.was_successful();
    if !converged {
        tracing::debug!(
            "LM stopped without converging: {:?} after {} evaluations",
            report.termination,
            report.number_of_evaluations
        );
    }

    let params = problem.params();
    if !params.iter().all(|v| v.is_finite()) {
        return Err(PoseError::PnpFailure("solution diverged".into()));
    }
    let extrinsics = Extrinsics::from_params(&params);
    let rms_error = reprojection_rms(&extrinsics, camera, object_points, image_points);
    if !rms_error.is_finite() {
        return Err(PoseError::PnpFailure("solution diverged".into()));
    }
    Ok(PnpSolution {
        extrinsics,
        rms_error,
        iterations: report.number_of_evaluations,
        converged,
    })
}
