use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// 回転ベクトル (Rodrigues) → 回転行列
///
/// 方向が回転軸、ノルムが回転角（ラジアン）。
pub fn rodrigues(rvec: &Vector3<f64>) -> Matrix3<f64> {
    Rotation3::new(*rvec).into_inner()
}

/// 回転行列 → 回転ベクトル
pub fn rotation_to_rvec(r: &Matrix3<f64>) -> Vector3<f64> {
    Rotation3::from_matrix(r).scaled_axis()
}

/// 2つの回転の差（度）
pub fn rotation_angle_between(a: &Matrix3<f64>, b: &Matrix3<f64>) -> f64 {
    let rel = a.transpose() * b;
    let cos = ((rel.trace() - 1.0) / 2.0).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// 4x4 剛体変換（人物ローカル → カメラ, mm）
///
/// 左上 3x3 が R、右上 3x1 が t、最終行は (0, 0, 0, 1)。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[[f64; 4]; 4]", into = "[[f64; 4]; 4]")]
pub struct Homogeneous {
    matrix: Matrix4<f64>,
}

impl Homogeneous {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    pub fn from_parts(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Self {
        let mut matrix = Matrix4::identity();
        matrix.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
        matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
        Self { matrix }
    }

    pub fn from_rvec_tvec(rvec: &Vector3<f64>, tvec: &Vector3<f64>) -> Self {
        Self::from_parts(&rodrigues(rvec), tvec)
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.matrix.fixed_view::<3, 1>(0, 3).into_owned()
    }

    pub fn rvec(&self) -> Vector3<f64> {
        rotation_to_rvec(&self.rotation())
    }

    /// X' = R X + t
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation() * p.coords + self.translation())
    }

    /// 行優先の 4x4 配列
    pub fn to_rows(&self) -> [[f64; 4]; 4] {
        let mut rows = [[0.0; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = self.matrix[(r, c)];
            }
        }
        rows
    }
}

impl Default for Homogeneous {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<[[f64; 4]; 4]> for Homogeneous {
    fn from(rows: [[f64; 4]; 4]) -> Self {
        let mut matrix = Matrix4::zeros();
        for (r, row) in rows.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                matrix[(r, c)] = *v;
            }
        }
        Self { matrix }
    }
}

impl From<Homogeneous> for [[f64; 4]; 4] {
    fn from(h: Homogeneous) -> Self {
        h.to_rows()
    }
}
