//! Roboflow ホスト型推論 API クライアント

use super::{InferenceModel, InferenceResponse};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Url;
use std::path::Path;

const ROBOFLOW_API_URL: &str = "https://detect.roboflow.com";

/// NMS の重なりしきい値 (%)
const DEFAULT_OVERLAP: u8 = 30;

/// Roboflow 推論クライアント
pub struct RoboflowClient {
    api_key: String,
    project: String,
    version: u32,
    base_url: String,
    http_client: reqwest::Client,
}

impl RoboflowClient {
    /// 新しいクライアントを作成
    pub fn new(api_key: &str, project: &str, version: u32) -> Self {
        Self {
            api_key: api_key.to_string(),
            project: project.to_string(),
            version,
            base_url: ROBOFLOW_API_URL.to_string(),
            http_client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    /// 推論エンドポイントのURLを組み立て
    fn endpoint(&self, file_name: &str, confidence: u8) -> Result<Url> {
        let url = format!("{}/{}/{}", self.base_url, self.project, self.version);
        let confidence = confidence.to_string();
        let overlap = DEFAULT_OVERLAP.to_string();
        Url::parse_with_params(
            &url,
            &[
                ("api_key", self.api_key.as_str()),
                ("confidence", confidence.as_str()),
                ("overlap", overlap.as_str()),
                ("format", "json"),
                ("name", file_name),
            ],
        )
        .with_context(|| format!("推論URLの生成に失敗: {}", url))
    }
}

#[async_trait]
impl InferenceModel for RoboflowClient {
    async fn predict(&self, image_path: &Path, confidence: u8) -> Result<InferenceResponse> {
        let image_data = std::fs::read(image_path)
            .with_context(|| format!("画像ファイルの読み込みに失敗: {:?}", image_path))?;

        let base64_image = STANDARD.encode(&image_data);

        let file_name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let url = self.endpoint(&file_name, confidence)?;

        let response = self
            .http_client
            .post(url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(base64_image)
            .send()
            .await
            .context("Roboflow APIリクエストに失敗")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Roboflow API エラー ({}): {}", status, error_text);
        }

        let inference: InferenceResponse = response
            .json()
            .await
            .context("Roboflow APIレスポンスのパースに失敗")?;

        tracing::debug!(
            "{}: {} 件検出 ({:?}s)",
            file_name,
            inference.predictions.len(),
            inference.time
        );

        Ok(inference)
    }
}
