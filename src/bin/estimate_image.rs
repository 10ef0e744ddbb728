use anyhow::{Context, Result};
use clap::Parser;
use opencv::{imgcodecs, prelude::*};
use std::path::PathBuf;

use mono_pose3d::config::Config;
use mono_pose3d::pipeline::Pipeline;
use mono_pose3d::pose::{preprocess_for_detector, OnnxKeypointDetector};

/// 画像から人物の3D姿勢（カメラ座標, mm）を推定して JSON で出力する
#[derive(Parser, Debug)]
#[command(author, about, long_about = None, version = env!("GIT_VERSION"))]
struct Args {
    /// 入力画像（複数可）。1枚ごとに1行の JSON を出す
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// 設定ファイル
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// 人物スコアの閾値（設定ファイルより優先）
    #[arg(long)]
    score_threshold: Option<f32>,

    /// 整形して出力
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::info!("estimate_image ({})", env!("GIT_VERSION"));

    let mut config = Config::load_or_default(&args.config);
    if let Some(threshold) = args.score_threshold {
        config.pipeline.score_threshold = threshold;
    }

    let detector = OnnxKeypointDetector::from_config(&config.detector)
        .context("Failed to load keypoint detector")?;
    let mut pipeline =
        Pipeline::from_config(detector, &config).context("Failed to load lifter or camera")?;

    for path in &args.images {
        let frame = imgcodecs::imread(&path.to_string_lossy(), imgcodecs::IMREAD_COLOR)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if frame.empty() {
            anyhow::bail!("Failed to decode {}", path.display());
        }

        let input = preprocess_for_detector(&frame)?;
        let result = pipeline
            .process_frame(&input)
            .with_context(|| format!("Failed to process {}", path.display()))?;
        tracing::info!(
            "{}: {} detected, {} posed",
            path.display(),
            result.detected,
            result.posed().count()
        );

        let json = if args.pretty {
            serde_json::to_string_pretty(&result)?
        } else {
            serde_json::to_string(&result)?
        };
        println!("{}", json);
    }

    Ok(())
}
