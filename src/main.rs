//! 予測結果アップローダー - メインエントリポイント

use anyhow::Result;
use prediction_sheets::config::Config;
use prediction_sheets::prediction::{PredictionCollector, RoboflowClient};
use prediction_sheets::sheets::{Authenticator, SheetsClient, SpreadsheetWriter};

#[tokio::main]
async fn main() -> Result<()> {
    // ロギング初期化
    tracing_subscriber::fmt::init();

    // 環境変数の読み込み
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    // 画像ごとに予測を取得
    let model = RoboflowClient::new(
        &config.roboflow_api_key,
        &config.roboflow_project,
        config.model_version,
    );
    let collector = PredictionCollector::new(model, config.confidence);
    let records = collector.collect(&config.image_dir).await?;

    // スプレッドシートへ書き込み
    let authorized = Authenticator::new(
        &config.token_path,
        &config.credentials_path,
        config.scopes.clone(),
    )
    .authorize()
    .await?;
    tracing::info!("認証完了: {:?}", authorized.outcome);

    let sheets = SheetsClient::new(
        authorized.credential.access_token()?,
        &config.spreadsheet_id,
        &config.spreadsheet_range,
    )?;
    SpreadsheetWriter::new(sheets).write(&records).await;

    Ok(())
}
