//! 骨格規約間の関節対応表と変換。
//!
//! 表はここにしか存在しない。呼び出し側で整数オフセットを直接使わないこと。

use nalgebra::{Point, SVector};
use ndarray::Array1;

use super::convention::{Convention, H36mJoint};
use super::keypoints::{Keypoints2D, Keypoints3D};
use crate::error::{PoseError, Result};
use crate::pose::KeypointIndex as Coco;

/// 出力関節 1 つの作り方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// 入力関節をそのまま使う
    Joint(usize),
    /// 入力関節の平均で合成する
    Mean(&'static [usize]),
}

const fn j(index: Coco) -> Source {
    Source::Joint(index as usize)
}

const COCO_PELVIS: Source = Source::Mean(&[Coco::LeftHip as usize, Coco::RightHip as usize]);

/// COCO-17 → リフター入力16関節
///
/// リフターはこの並びで学習されているため、変更する場合は再学習が必要。
/// spine と head に nose、thorax に左耳を使う。
pub const COCO_TO_H36M16: [Source; 16] = [
    j(Coco::LeftAnkle),
    j(Coco::LeftKnee),
    j(Coco::LeftHip),
    j(Coco::RightHip),
    j(Coco::RightKnee),
    j(Coco::RightAnkle),
    COCO_PELVIS,
    j(Coco::Nose),
    j(Coco::LeftEar),
    j(Coco::Nose),
    j(Coco::LeftShoulder),
    j(Coco::LeftElbow),
    j(Coco::LeftWrist),
    j(Coco::RightShoulder),
    j(Coco::RightElbow),
    j(Coco::RightWrist),
];

/// MPII-16 → リフター入力16関節
pub const MPII_TO_H36M16: [Source; 16] = [
    Source::Joint(10),
    Source::Joint(9),
    Source::Joint(8),
    Source::Joint(11),
    Source::Joint(12),
    Source::Joint(13),
    Source::Mean(&[8, 11]),
    Source::Joint(15),
    Source::Joint(1),
    Source::Joint(0),
    Source::Joint(4),
    Source::Joint(3),
    Source::Joint(2),
    Source::Joint(5),
    Source::Joint(6),
    Source::Joint(15),
];

/// リフター入力16関節 → PnP 観測用16関節（Nose 除去後の H36M と同じ並び）
///
/// 観測は `COCO_TO_H36M16` の出力を並べ替えるだけで、独自の合成は持たない。
pub const H36M16_TO_NOSELESS: [Source; 16] = [
    Source::Joint(6),
    Source::Joint(3),
    Source::Joint(4),
    Source::Joint(5),
    Source::Joint(2),
    Source::Joint(1),
    Source::Joint(0),
    Source::Joint(7),
    Source::Joint(8),
    Source::Joint(9),
    Source::Joint(10),
    Source::Joint(11),
    Source::Joint(12),
    Source::Joint(13),
    Source::Joint(14),
    Source::Joint(15),
];

/// H36M-17 → MVOR 上半身10関節
pub const H36M_TO_MVOR: [Source; 10] = [
    Source::Joint(H36mJoint::Head as usize),
    Source::Joint(H36mJoint::Thorax as usize),
    Source::Joint(H36mJoint::LeftShoulder as usize),
    Source::Joint(H36mJoint::RightShoulder as usize),
    Source::Joint(H36mJoint::LeftHip as usize),
    Source::Joint(H36mJoint::RightHip as usize),
    Source::Joint(H36mJoint::LeftElbow as usize),
    Source::Joint(H36mJoint::RightElbow as usize),
    Source::Joint(H36mJoint::LeftWrist as usize),
    Source::Joint(H36mJoint::RightWrist as usize),
];

/// 対応表に従って関節を並べ替え・合成する
pub fn remap<const D: usize>(points: &[Point<f64, D>], table: &[Source]) -> Vec<Point<f64, D>> {
    table
        .iter()
        .map(|source| match *source {
            Source::Joint(i) => points[i],
            Source::Mean(indices) => {
                let sum = indices
                    .iter()
                    .fold(SVector::<f64, D>::zeros(), |acc, &i| acc + points[i].coords);
                Point::from(sum / indices.len() as f64)
            }
        })
        .collect()
}

fn expect(kp: &Keypoints2D, convention: Convention) -> Result<()> {
    if kp.convention() != convention || kp.len() != convention.joint_count() {
        return Err(PoseError::bad_shape(convention, kp.len()));
    }
    Ok(())
}

/// COCO-17 をリフター入力の16関節に変換
pub fn coco_to_h36m16(coco: &Keypoints2D) -> Result<Keypoints2D> {
    expect(coco, Convention::Coco17)?;
    Keypoints2D::new(Convention::H36m16, remap(coco.points(), &COCO_TO_H36M16))
}

/// COCO-17 → 長さ32のリフター入力ベクトル
pub fn coco_to_h36m_2d(coco: &Keypoints2D) -> Result<Array1<f32>> {
    Ok(coco_to_h36m16(coco)?.to_flat())
}

/// MPII-16 をリフター入力の16関節に変換
pub fn mpii_to_h36m16(mpii: &Keypoints2D) -> Result<Keypoints2D> {
    expect(mpii, Convention::Mpii16)?;
    Keypoints2D::new(Convention::H36m16, remap(mpii.points(), &MPII_TO_H36M16))
}

/// MPII-16 → 長さ32のリフター入力ベクトル
pub fn mpii_to_h36m_2d(mpii: &Keypoints2D) -> Result<Array1<f32>> {
    Ok(mpii_to_h36m16(mpii)?.to_flat())
}

/// COCO-17 を PnP の2D観測（Nose 除去後の H36M 並び）に変換
pub fn coco_to_h36m_observed(coco: &Keypoints2D) -> Result<Keypoints2D> {
    let lifter_input = coco_to_h36m16(coco)?;
    Keypoints2D::new(
        Convention::H36mNoseless,
        remap(lifter_input.points(), &H36M16_TO_NOSELESS),
    )
}

/// H36M-17 の3D骨格を MVOR 上半身10関節にする
pub fn h36m17_to_mvor(h36m: &Keypoints3D) -> Result<Keypoints3D> {
    if h36m.convention() != Convention::H36m17 {
        return Err(PoseError::bad_shape(Convention::H36m17, h36m.len()));
    }
    Keypoints3D::new(
        Convention::Mvor10,
        h36m.frame(),
        remap(h36m.points(), &H36M_TO_MVOR),
    )
}
