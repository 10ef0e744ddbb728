use nalgebra::{Matrix2, Point2, Point3, SymmetricEigen, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::config::{PipelineConfig, PnpConfig};
use crate::error::{PoseError, Result};
use crate::geometry::Homogeneous;
use crate::pnp::{solve_pnp_refine, Extrinsics};
use crate::skeleton::{Convention, Frame, Keypoints2D, Keypoints3D};

/// 人物座標軸の長さ（mm）
pub const AXIS_LENGTH: f64 = 300.0;

/// 画像上の人物座標軸（原点と各軸の端点, ピクセル）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersonAxis {
    pub origin: Point2<f64>,
    pub x: Point2<f64>,
    pub y: Point2<f64>,
    pub z: Point2<f64>,
}

/// 1人分の逆投影結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deprojection {
    /// カメラ座標の H36M-17（mm）
    pub keypoints_3d_global: Keypoints3D,
    /// Nose を除いた16関節の再投影（ピクセル）
    pub reprojection: Keypoints2D,
    /// ローカル → カメラ
    pub homogeneous: Homogeneous,
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
    pub rms_error: f64,
    pub iterations: usize,
    pub converged: bool,
    /// 観測の広がり（ピクセル, `observation_spread`）
    pub spread: f64,
}

impl Deprojection {
    /// 収束・再投影誤差・観測の広がり・奥行きがすべて許容範囲内か
    ///
    /// 観測が1点に潰れていると、残差が小さいまま奥行きが発散する。
    pub fn is_stable(&self, limits: &PipelineConfig) -> bool {
        let [near, far] = limits.depth_range;
        self.converged
            && self.rms_error.is_finite()
            && self.rms_error <= limits.max_reprojection_rms
            && self.spread >= limits.min_observation_spread
            && self.tvec.z >= near
            && self.tvec.z <= far
    }
}

/// 2D点群の共分散の小さい方の固有値の平方根（ピクセル）
///
/// 1点に潰れた観測や一直線上の観測では 0 になる。
pub fn observation_spread(points: &[Point2<f64>]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let n = points.len() as f64;
    let mean = points.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let covariance = points.iter().fold(Matrix2::zeros(), |acc, p| {
        let d = p.coords - mean;
        acc + d * d.transpose()
    }) / n;
    let eigen = SymmetricEigen::new(covariance);
    eigen.eigenvalues.min().max(0.0).sqrt()
}

/// 2D観測とローカル3D骨格からカメラ座標の骨格を求める
#[derive(Debug, Clone)]
pub struct Deprojector {
    camera: Camera,
    pnp: PnpConfig,
}

impl Deprojector {
    pub fn new(camera: Camera, pnp: PnpConfig) -> Self {
        Self { camera, pnp }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// `observed` は H36M-16（Nose なし）、`local` はリフター出力の H36M-17
    pub fn deproject_pose(
        &self,
        observed: &Keypoints2D,
        local: &Keypoints3D,
    ) -> Result<Deprojection> {
        if observed.convention() != Convention::H36mNoseless {
            return Err(PoseError::bad_shape(Convention::H36mNoseless, observed.len()));
        }
        if local.frame() != Frame::Local {
            return Err(PoseError::PnpFailure("3D pose is not in the person-local frame".into()));
        }
        // 合成 Nose は観測に対応しないので PnP から外す
        let object = local.without_synthetic_nose()?;

        let initial = Extrinsics::initial_guess(&self.pnp);
        let solution = solve_pnp_refine(
            &initial,
            object.points(),
            observed.points(),
            &self.camera,
            &self.pnp,
        )?;
        if !solution.converged {
            tracing::debug!(
                "PnP stopped after {} iterations without converging (rms {:.2}px)",
                solution.iterations,
                solution.rms_error
            );
        }

        let homogeneous = Homogeneous::from_rvec_tvec(&solution.extrinsics.rvec, &solution.extrinsics.tvec);
        let global = local.map_points(Frame::Camera, |p| homogeneous.transform_point(p));
        let reprojected = global
            .without_synthetic_nose()?
            .points()
            .iter()
            .map(|p| self.camera.project(p))
            .collect();

        Ok(Deprojection {
            keypoints_3d_global: global,
            reprojection: Keypoints2D::new(Convention::H36mNoseless, reprojected)?,
            homogeneous,
            rvec: solution.extrinsics.rvec,
            tvec: solution.extrinsics.tvec,
            rms_error: solution.rms_error,
            iterations: solution.iterations,
            converged: solution.converged,
            spread: observation_spread(observed.points()),
        })
    }

    pub fn person_axis(&self, homogeneous: &Homogeneous) -> PersonAxis {
        make_person_axis(&self.camera, homogeneous)
    }
}

/// 人物座標の X, Y, -Z 方向 300mm を画像に投影
///
/// Z は画像奥向きなので、カメラ側へ向く -Z を描く。
pub fn make_person_axis(camera: &Camera, homogeneous: &Homogeneous) -> PersonAxis {
    let rotation = homogeneous.rotation();
    let translation = homogeneous.translation();
    let project = |p: Point3<f64>| camera.project_with(&rotation, &translation, &p);
    PersonAxis {
        origin: project(Point3::origin()),
        x: project(Point3::new(AXIS_LENGTH, 0.0, 0.0)),
        y: project(Point3::new(0.0, AXIS_LENGTH, 0.0)),
        z: project(Point3::new(0.0, 0.0, -AXIS_LENGTH)),
    }
}
