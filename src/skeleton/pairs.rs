use super::convention::Convention;

/// 骨格の接続定義 (始点関節, 終点関節)
pub type BonePairs = &'static [(usize, usize)];

/// COCO 17関節
pub const COCO_PAIRS: [(usize, usize); 15] = [
    // 顔
    (0, 1), (0, 2), (2, 4), (1, 3),
    // 腕
    (6, 8), (8, 10), (5, 7), (7, 9),
    // 胴体・脚
    (5, 11), (11, 13), (13, 15), (6, 12), (12, 14), (14, 16),
    // 肩
    (5, 6),
];

pub const COCO_UPPER_PAIRS: [(usize, usize); 9] = [
    (0, 1), (0, 2), (2, 4), (1, 3), (6, 8), (8, 10), (5, 7), (7, 9), (5, 6),
];

pub const MPII_PAIRS: [(usize, usize); 15] = [
    (0, 1), (1, 15), (15, 2), (2, 3), (3, 4), (15, 5), (5, 6), (6, 7),
    (15, 14), (14, 8), (8, 9), (9, 10), (14, 11), (11, 12), (12, 13),
];

pub const MPII_UPPER_PAIRS: [(usize, usize); 9] = [
    (0, 1), (1, 15), (15, 2), (2, 3), (3, 4), (15, 5), (5, 6), (6, 7), (15, 14),
];

pub const H36M_PAIRS: [(usize, usize); 16] = [
    (0, 1), (1, 2), (2, 3), (0, 4), (4, 5), (5, 6),
    (0, 7), (7, 8), (8, 9), (9, 10),
    (8, 11), (11, 12), (12, 13), (8, 14), (14, 15), (15, 16),
];

pub const H36M_UPPER_PAIRS: [(usize, usize); 10] = [
    (0, 7), (7, 8), (8, 9), (9, 10), (8, 11), (11, 12), (12, 13), (8, 14), (14, 15), (15, 16),
];

/// Nose を除いた H36M（デプロジェクション結果の描画用）
pub const H36M_NOSELESS_PAIRS: [(usize, usize); 15] = [
    (0, 1), (1, 2), (2, 3), (0, 4), (4, 5), (5, 6),
    (0, 7), (7, 8), (8, 9),
    (8, 10), (10, 11), (11, 12), (8, 13), (13, 14), (14, 15),
];

pub const H36M_NOSELESS_UPPER_PAIRS: [(usize, usize); 9] = [
    (0, 7), (7, 8), (8, 9), (8, 10), (10, 11), (11, 12), (8, 13), (13, 14), (14, 15),
];

/// リフター入力の16関節並び
pub const H36M16_PAIRS: [(usize, usize); 15] = [
    (0, 1), (1, 2), (2, 6), (6, 3), (3, 4), (4, 5),
    (6, 7), (7, 8), (8, 9),
    (8, 10), (10, 11), (11, 12), (8, 13), (13, 14), (14, 15),
];

pub const H36M16_UPPER_PAIRS: [(usize, usize); 9] = [
    (6, 7), (7, 8), (8, 9), (8, 10), (10, 11), (11, 12), (8, 13), (13, 14), (14, 15),
];

/// MVOR は上半身のみ
pub const MVOR_PAIRS: [(usize, usize); 10] = [
    (0, 1), (1, 2), (1, 3), (2, 6), (6, 8), (3, 7), (7, 9), (2, 4), (3, 5), (4, 5),
];

/// 規約ごとの描画用ボーン一覧
pub fn drawing_pairs(convention: Convention, upper_body: bool) -> BonePairs {
    match (convention, upper_body) {
        (Convention::Coco17, false) => &COCO_PAIRS,
        (Convention::Coco17, true) => &COCO_UPPER_PAIRS,
        (Convention::Mpii16, false) => &MPII_PAIRS,
        (Convention::Mpii16, true) => &MPII_UPPER_PAIRS,
        (Convention::H36m17, false) => &H36M_PAIRS,
        (Convention::H36m17, true) => &H36M_UPPER_PAIRS,
        (Convention::H36m16, false) => &H36M16_PAIRS,
        (Convention::H36m16, true) => &H36M16_UPPER_PAIRS,
        (Convention::H36mNoseless, false) => &H36M_NOSELESS_PAIRS,
        (Convention::H36mNoseless, true) => &H36M_NOSELESS_UPPER_PAIRS,
        (Convention::Mvor10, _) => &MVOR_PAIRS,
    }
}

/// Human3.6M の上半身・全身ボーン
#[derive(Debug, Clone, Copy)]
pub struct DrawingPairs {
    pub upper: BonePairs,
    pub full: BonePairs,
}

/// デプロジェクション結果（Nose 除去後）を描く組
pub fn h36m17_to_drawing_pairs() -> DrawingPairs {
    DrawingPairs {
        upper: &H36M_NOSELESS_UPPER_PAIRS,
        full: &H36M_NOSELESS_PAIRS,
    }
}
