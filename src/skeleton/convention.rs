use serde::{Deserialize, Serialize};
use std::fmt;

/// 骨格の関節並び規約
///
/// 値は必ずいずれかの規約でタグ付けされ、インデックスの意味はその規約で決まる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Convention {
    /// COCO 17関節（2D検出器の出力）
    Coco17,
    /// MPII 16関節
    Mpii16,
    /// Human3.6M 17関節（リフターの3D出力）
    H36m17,
    /// リフター入力用の16関節（ブリッジ表の並び）
    H36m16,
    /// Human3.6M 17関節から Nose(9) を除いた16関節（PnP の対応点）
    H36mNoseless,
    /// MVOR 上半身10関節
    Mvor10,
}

impl Convention {
    pub const fn joint_count(self) -> usize {
        match self {
            Self::Coco17 | Self::H36m17 => 17,
            Self::Mpii16 | Self::H36m16 | Self::H36mNoseless => 16,
            Self::Mvor10 => 10,
        }
    }

    pub fn joint_names(self) -> &'static [&'static str] {
        match self {
            Self::Coco17 => &COCO_JOINT_NAMES,
            Self::Mpii16 => &MPII_JOINT_NAMES,
            Self::H36m17 => &H36M_JOINT_NAMES,
            Self::H36m16 => &H36M16_JOINT_NAMES,
            Self::H36mNoseless => &H36M_NOSELESS_JOINT_NAMES,
            Self::Mvor10 => &MVOR_JOINT_NAMES,
        }
    }

    /// 関節名からインデックスを引く
    pub fn index_of(self, name: &str) -> Option<usize> {
        self.joint_names().iter().position(|n| *n == name)
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Coco17 => "COCO-17",
            Self::Mpii16 => "MPII-16",
            Self::H36m17 => "H36M-17",
            Self::H36m16 => "H36M-16",
            Self::H36mNoseless => "H36M-16-noseless",
            Self::Mvor10 => "MVOR-10",
        };
        f.write_str(s)
    }
}

pub const COCO_JOINT_NAMES: [&str; 17] = [
    "Nose", "LEye", "REye", "LEar", "REar", "LShoulder", "RShoulder", "LElbow", "RElbow",
    "LWrist", "RWrist", "LHip", "RHip", "LKnee", "RKnee", "LAnkle", "RAnkle",
];

pub const MPII_JOINT_NAMES: [&str; 16] = [
    "HeadTop", "UpperNeck", "RShoulder", "RElbow", "RWrist", "LShoulder", "LElbow", "LWrist",
    "RHip", "RKnee", "RAnkle", "LHip", "LKnee", "LAnkle", "Pelvis", "Thorax",
];

pub const H36M_JOINT_NAMES: [&str; 17] = [
    "Hip", "RHip", "RKnee", "RFoot", "LHip", "LKnee", "LFoot", "Spine", "Thorax", "Nose",
    "Head", "LShoulder", "LElbow", "LWrist", "RShoulder", "RElbow", "RWrist",
];

pub const H36M16_JOINT_NAMES: [&str; 16] = [
    "LAnkle", "LKnee", "LHip", "RHip", "RKnee", "RAnkle", "Pelvis", "Spine", "Thorax", "Head",
    "LShoulder", "LElbow", "LWrist", "RShoulder", "RElbow", "RWrist",
];

pub const H36M_NOSELESS_JOINT_NAMES: [&str; 16] = [
    "Hip", "RHip", "RKnee", "RFoot", "LHip", "LKnee", "LFoot", "Spine", "Thorax", "Head",
    "LShoulder", "LElbow", "LWrist", "RShoulder", "RElbow", "RWrist",
];

pub const MVOR_JOINT_NAMES: [&str; 10] = [
    "Head", "Neck", "LShoulder", "RShoulder", "LHip", "RHip", "LElbow", "RElbow", "LWrist",
    "RWrist",
];

/// Human3.6M 17関節のインデックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum H36mJoint {
    Hip = 0,
    RightHip = 1,
    RightKnee = 2,
    RightFoot = 3,
    LeftHip = 4,
    LeftKnee = 5,
    LeftFoot = 6,
    Spine = 7,
    Thorax = 8,
    Nose = 9,
    Head = 10,
    LeftShoulder = 11,
    LeftElbow = 12,
    LeftWrist = 13,
    RightShoulder = 14,
    RightElbow = 15,
    RightWrist = 16,
}

impl H36mJoint {
    pub const COUNT: usize = 17;

    /// リフターが合成する Nose。PnP 前に除去する。
    pub const SYNTHETIC_NOSE: usize = Self::Nose as usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joint_counts_match_name_tables() {
        for convention in [
            Convention::Coco17,
            Convention::Mpii16,
            Convention::H36m17,
            Convention::H36m16,
            Convention::H36mNoseless,
            Convention::Mvor10,
        ] {
            assert_eq!(convention.joint_names().len(), convention.joint_count(), "{convention}");
        }
    }

    #[test]
    fn test_noseless_is_h36m_without_nose() {
        let mut names = H36M_JOINT_NAMES.to_vec();
        names.remove(H36mJoint::SYNTHETIC_NOSE);
        assert_eq!(names, H36M_NOSELESS_JOINT_NAMES.to_vec());
    }

    #[test]
    fn test_index_of() {
        assert_eq!(Convention::H36m17.index_of("Nose"), Some(9));
        assert_eq!(Convention::Coco17.index_of("RAnkle"), Some(16));
        assert_eq!(Convention::Mvor10.index_of("Pelvis"), None);
    }
}
