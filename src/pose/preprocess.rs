use anyhow::Result;
use ndarray::Array4;
use opencv::{
    core::{AlgorithmHint, Mat, Vec3f, CV_32FC3},
    imgproc,
    prelude::*,
};

/// OpenCV の BGR フレームを検出器入力テンソルに変換
///
/// - BGR -> RGB
/// - 0.0〜1.0 の f32 に変換
/// - [1, 3, H, W] (NCHW) に並べ替え。解像度はそのまま
pub fn preprocess_for_detector(frame: &Mat) -> Result<Array4<f32>> {
    // BGR -> RGB
    let mut rgb = Mat::default();
    imgproc::cvt_color(frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0, AlgorithmHint::ALGO_HINT_DEFAULT)?;

    // f32 に変換 (1/255)
    let mut float_mat = Mat::default();
    rgb.convert_to(&mut float_mat, CV_32FC3, 1.0 / 255.0, 0.0)?;

    let height = float_mat.rows();
    let width = float_mat.cols();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for y in 0..height {
        for x in 0..width {
            let pixel = float_mat.at_2d::<Vec3f>(y, x)?;
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel[c];
            }
        }
    }

    Ok(tensor)
}
