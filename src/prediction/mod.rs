//! 推論モジュール - 画像フォルダの予測結果収集

mod roboflow;

pub use roboflow::RoboflowClient;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 記録時刻のフォーマット
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 1件の検出結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// クラス名
    pub class: String,
    /// 信頼度 (0.0 - 1.0)
    pub confidence: f64,
    /// 中心X座標
    pub x: f64,
    /// 中心Y座標
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_id: Option<String>,
}

/// 推論対象画像のサイズ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: f64,
    pub height: f64,
}

/// 推論APIのレスポンス
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InferenceResponse {
    #[serde(default)]
    pub predictions: Vec<BoundingBox>,
    #[serde(default)]
    pub image: Option<ImageInfo>,
    #[serde(default)]
    pub time: Option<f64>,
}

/// 画像1枚分の予測結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    /// 元画像のファイル名
    pub file_name: String,
    /// 推論時刻 (YYYY-MM-DD HH:MM:SS)
    pub datetime: String,
    pub predictions: Vec<BoundingBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageInfo>,
}

/// 画像を受け取り検出結果を返す推論モデル
#[async_trait]
pub trait InferenceModel: Send + Sync {
    /// 画像ファイルを推論（confidence はパーセント指定）
    async fn predict(&self, image_path: &Path, confidence: u8) -> Result<InferenceResponse>;
}

/// 予測結果コレクター
pub struct PredictionCollector<M> {
    model: M,
    confidence: u8,
}

impl<M: InferenceModel> PredictionCollector<M> {
    pub fn new(model: M, confidence: u8) -> Self {
        Self { model, confidence }
    }

    /// フォルダ内の全ファイルを推論し、列挙順に結果を返す
    ///
    /// フォルダには画像のみが置かれている前提で、絞り込みや再帰は行わない。
    /// 途中のエラーはそのまま返す。
    pub async fn collect(&self, directory: impl AsRef<Path>) -> Result<Vec<PredictionRecord>> {
        let directory = directory.as_ref();
        let entries = std::fs::read_dir(directory)
            .with_context(|| format!("画像フォルダの読み込みに失敗: {:?}", directory))?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("画像フォルダの列挙に失敗: {:?}", directory))?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            tracing::debug!("推論中: {}", file_name);

            let response = self
                .model
                .predict(&entry.path(), self.confidence)
                .await
                .with_context(|| format!("推論に失敗: {}", file_name))?;

            records.push(PredictionRecord {
                file_name,
                datetime: chrono::Local::now().format(DATETIME_FORMAT).to_string(),
                predictions: response.predictions,
                image: response.image,
            });
        }

        tracing::info!("{} 枚の画像を推論しました", records.len());
        Ok(records)
    }
}
