//! 設定 - 固定値と環境変数

use anyhow::{Context, Result};
use std::path::PathBuf;

/// 画像フォルダ
pub const IMAGE_DIR: &str = "data";
/// 認証トークンのキャッシュファイル
pub const TOKEN_FILE: &str = "token.json";
/// OAuth クライアント設定ファイル
pub const CREDENTIALS_FILE: &str = "credentials.json";
/// Sheets API のスコープ（読み書き）
pub const SCOPES: &[&str] = &["https://www.googleapis.com/auth/spreadsheets"];
/// 書き込み先のシート名と列範囲
pub const SPREADSHEET_RANGE: &str = "Predictions!A:Z";
/// 推論の信頼度しきい値 (%)
pub const CONFIDENCE_THRESHOLD: u8 = 70;
/// Roboflow モデルのバージョン
pub const MODEL_VERSION: u32 = 6;

const ENV_API_KEY: &str = "ROBOFLOW_API_KEY";
const ENV_PROJECT: &str = "ROBOFLOW_PROJECT";
const ENV_SPREADSHEET_ID: &str = "SPREADSHEET_ID";

/// 実行時設定
#[derive(Debug, Clone)]
pub struct Config {
    pub roboflow_api_key: String,
    pub roboflow_project: String,
    pub model_version: u32,
    pub confidence: u8,
    pub spreadsheet_id: String,
    pub spreadsheet_range: String,
    pub scopes: Vec<String>,
    pub image_dir: PathBuf,
    pub token_path: PathBuf,
    pub credentials_path: PathBuf,
}

impl Config {
    /// 環境変数から設定を作成
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意の取得関数から設定を作成
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("環境変数 {} が設定されていません", key))
        };

        // APIキーを最初に確認
        let roboflow_api_key = require(ENV_API_KEY)?;
        let roboflow_project = require(ENV_PROJECT)?;
        let spreadsheet_id = require(ENV_SPREADSHEET_ID)?;

        Ok(Self {
            roboflow_api_key,
            roboflow_project,
            model_version: MODEL_VERSION,
            confidence: CONFIDENCE_THRESHOLD,
            spreadsheet_id,
            spreadsheet_range: SPREADSHEET_RANGE.to_string(),
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
            image_dir: PathBuf::from(IMAGE_DIR),
            token_path: PathBuf::from(TOKEN_FILE),
            credentials_path: PathBuf::from(CREDENTIALS_FILE),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_uses_fixed_constants() {
        let config = Config::from_lookup(lookup_from(&[
            ("ROBOFLOW_API_KEY", "key"),
            ("ROBOFLOW_PROJECT", "hard-hats"),
            ("SPREADSHEET_ID", "sheet-1"),
        ]))
        .unwrap();

        assert_eq!(config.roboflow_api_key, "key");
        assert_eq!(config.roboflow_project, "hard-hats");
        assert_eq!(config.spreadsheet_id, "sheet-1");
        assert_eq!(config.confidence, 70);
        assert_eq!(config.model_version, 6);
        assert_eq!(config.spreadsheet_range, "Predictions!A:Z");
        assert_eq!(config.image_dir, PathBuf::from("data"));
        assert_eq!(config.token_path, PathBuf::from("token.json"));
        assert_eq!(config.credentials_path, PathBuf::from("credentials.json"));
        assert_eq!(
            config.scopes,
            vec!["https://www.googleapis.com/auth/spreadsheets".to_string()]
        );
    }

    #[test]
    fn test_missing_api_key_is_reported_first() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("ROBOFLOW_API_KEY"));
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let err = Config::from_lookup(lookup_from(&[
            ("ROBOFLOW_API_KEY", "key"),
            ("ROBOFLOW_PROJECT", "hard-hats"),
            ("SPREADSHEET_ID", "  "),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("SPREADSHEET_ID"));
    }
}
