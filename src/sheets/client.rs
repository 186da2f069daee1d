//! Sheets API クライアント

use super::{SheetsApi, SheetsError};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// 入力値をユーザー入力として解釈させる
const VALUE_INPUT_OPTION: &str = "USER_ENTERED";

/// Sheets APIクライアント
pub struct SheetsClient {
    access_token: String,
    append_url: Url,
    http_client: reqwest::Client,
}

impl SheetsClient {
    /// 新しいクライアントを作成
    pub fn new(access_token: &str, spreadsheet_id: &str, range: &str) -> Result<Self> {
        Self::with_base_url(SHEETS_API_URL, access_token, spreadsheet_id, range)
    }

    pub fn with_base_url(
        base_url: &str,
        access_token: &str,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Self> {
        Ok(Self {
            access_token: access_token.to_string(),
            append_url: append_url(base_url, spreadsheet_id, range)?,
            http_client: reqwest::Client::new(),
        })
    }

    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }
}

/// values.append のURLを組み立て
fn append_url(base_url: &str, spreadsheet_id: &str, range: &str) -> Result<Url> {
    let mut url = Url::parse(base_url)
        .with_context(|| format!("Sheets API URLのパースに失敗: {}", base_url))?;

    url.path_segments_mut()
        .map_err(|_| anyhow!("Sheets API URLにパスを追加できません: {}", base_url))?
        .pop_if_empty()
        .push(spreadsheet_id)
        .push("values")
        .push(&format!("{}:append", range));

    url.query_pairs_mut()
        .append_pair("valueInputOption", VALUE_INPUT_OPTION);

    Ok(url)
}

#[async_trait]
impl SheetsApi for SheetsClient {
    async fn append_row(&self, values: Vec<Value>) -> Result<(), SheetsError> {
        let request = ValueRange {
            values: vec![values],
        };

        let response = self
            .http_client
            .post(self.append_url.clone())
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SheetsError::Api {
                status: status.as_u16(),
                message: error_message(&error_text),
            });
        }

        // 追記済みなので、レスポンス本文が読めなくても失敗扱いにしない
        let appended = response.json::<AppendResponse>().await.ok();
        if let Some(range) = appended
            .and_then(|a| a.updates)
            .and_then(|u| u.updated_range)
        {
            tracing::debug!("追記: {}", range);
        }

        Ok(())
    }
}

/// Google API のエラーレスポンスからメッセージを取り出す
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string())
}

// Sheets API リクエスト/レスポンス構造体

#[derive(Serialize)]
struct ValueRange {
    values: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct AppendResponse {
    updates: Option<UpdateValuesResponse>,
}

#[derive(Deserialize)]
struct UpdateValuesResponse {
    #[serde(rename = "updatedRange")]
    updated_range: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}
