//! スプレッドシートモジュール - 予測結果の追記

mod auth;
mod client;

pub use auth::{AuthOutcome, Authenticator, Authorized, ClientSecrets, Credential};
pub use client::SheetsClient;

use crate::prediction::{BoundingBox, PredictionRecord};
use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

/// Sheets API 呼び出しのエラー
#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("Sheets API エラー ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Sheets APIリクエストに失敗: {0}")]
    Request(#[from] reqwest::Error),
}

/// 1行ずつ追記できるスプレッドシート
#[async_trait]
pub trait SheetsApi: Send + Sync {
    /// 1行を追記
    async fn append_row(&self, values: Vec<Value>) -> Result<(), SheetsError>;
}

#[async_trait]
impl<'a, T: SheetsApi + ?Sized> SheetsApi for &'a T {
    async fn append_row(&self, values: Vec<Value>) -> Result<(), SheetsError> {
        (**self).append_row(values).await
    }
}

/// 追記する行の値を作成
/// 列順: class, confidence, x, y, width, height, file_name, datetime
pub fn row_values(record: &PredictionRecord, bounding_box: &BoundingBox) -> Vec<Value> {
    vec![
        json!(bounding_box.class),
        json!(bounding_box.confidence),
        json!(bounding_box.x),
        json!(bounding_box.y),
        json!(bounding_box.width),
        json!(bounding_box.height),
        json!(record.file_name),
        json!(record.datetime),
    ]
}

/// 予測結果をスプレッドシートへ書き込む
pub struct SpreadsheetWriter<S> {
    sheets: S,
}

impl<S: SheetsApi> SpreadsheetWriter<S> {
    pub fn new(sheets: S) -> Self {
        Self { sheets }
    }

    /// バウンディングボックスごとに1行ずつ追記
    ///
    /// 追記エラーはログに出力して次の行へ進む。失敗した行は記録されない。
    pub async fn write(&self, records: &[PredictionRecord]) {
        let failed = self.append_records(records).await;
        if failed > 0 {
            tracing::warn!("{} 行の書き込みに失敗しました", failed);
        }
    }

    /// 全行を追記し、失敗した行数を返す
    async fn append_records(&self, records: &[PredictionRecord]) -> usize {
        let mut failed = 0usize;

        for record in records {
            println!("{} の予測結果を保存中", record.file_name);

            for bounding_box in &record.predictions {
                let values = row_values(record, bounding_box);
                if let Err(err) = self.sheets.append_row(values).await {
                    tracing::error!("{}", err);
                    failed += 1;
                }
            }
        }

        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// 追記内容を記録し、指定回目の呼び出しで失敗するシート
    #[derive(Default)]
    struct RecordingSheet {
        rows: Mutex<Vec<Vec<Value>>>,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl SheetsApi for RecordingSheet {
        async fn append_row(&self, values: Vec<Value>) -> Result<(), SheetsError> {
            let mut rows = self.rows.lock().unwrap();
            rows.push(values);
            if Some(rows.len()) == self.fail_on_call {
                return Err(SheetsError::Api {
                    status: 500,
                    message: "backend error".to_string(),
                });
            }
            Ok(())
        }
    }

    fn bbox(class: &str, x: f64) -> BoundingBox {
        BoundingBox {
            class: class.to_string(),
            confidence: 0.85,
            x,
            y: 2.0,
            width: 3.0,
            height: 4.0,
            class_id: None,
            detection_id: None,
        }
    }

    fn record(file_name: &str, boxes: Vec<BoundingBox>) -> PredictionRecord {
        PredictionRecord {
            file_name: file_name.to_string(),
            datetime: "2024-05-01 09:30:00".to_string(),
            predictions: boxes,
            image: None,
        }
    }

    #[test]
    fn test_row_field_order() {
        let rec = record("img.jpg", vec![bbox("helmet", 1.5)]);
        let row = row_values(&rec, &rec.predictions[0]);

        assert_eq!(
            row,
            vec![
                json!("helmet"),
                json!(0.85),
                json!(1.5),
                json!(2.0),
                json!(3.0),
                json!(4.0),
                json!("img.jpg"),
                json!("2024-05-01 09:30:00"),
            ]
        );
    }

    #[tokio::test]
    async fn test_two_detections_two_appends() {
        let sheet = RecordingSheet::default();
        let records = vec![record("one.jpg", vec![bbox("helmet", 1.0), bbox("vest", 9.0)])];

        SpreadsheetWriter::new(&sheet).write(&records).await;

        let rows = sheet.rows.lock().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], json!("helmet"));
        assert_eq!(rows[1][0], json!("vest"));
        for row in rows.iter() {
            assert_eq!(row[6], json!("one.jpg"));
            assert_eq!(row[7], json!("2024-05-01 09:30:00"));
        }
    }

    #[tokio::test]
    async fn test_one_append_per_bounding_box() {
        let sheet = RecordingSheet::default();
        let records = vec![
            record("a.jpg", vec![bbox("a", 1.0), bbox("b", 2.0), bbox("c", 3.0)]),
            record("empty.jpg", vec![]),
            record("b.jpg", vec![bbox("d", 4.0)]),
        ];

        SpreadsheetWriter::new(&sheet).write(&records).await;

        let rows = sheet.rows.lock().unwrap();
        assert_eq!(rows.len(), 4);
        // 画像の順、その中では検出順
        let classes: Vec<_> = rows.iter().map(|r| r[0].clone()).collect();
        assert_eq!(classes, vec![json!("a"), json!("b"), json!("c"), json!("d")]);
        assert_eq!(rows[3][6], json!("b.jpg"));
    }

    #[tokio::test]
    async fn test_append_error_does_not_stop_remaining_rows() {
        let sheet = RecordingSheet {
            fail_on_call: Some(2),
            ..Default::default()
        };
        let records = vec![
            record("a.jpg", vec![bbox("a", 1.0), bbox("b", 2.0)]),
            record("b.jpg", vec![bbox("c", 3.0), bbox("d", 4.0), bbox("e", 5.0)]),
        ];

        let failed = SpreadsheetWriter::new(&sheet).append_records(&records).await;

        // 5行すべて試行し、失敗は2行目の1件だけ
        assert_eq!(failed, 1);
        let rows = sheet.rows.lock().unwrap();
        assert_eq!(rows.len(), 5);
        let classes: Vec<_> = rows.iter().map(|r| r[0].clone()).collect();
        assert_eq!(
            classes,
            vec![json!("a"), json!("b"), json!("c"), json!("d"), json!("e")]
        );
    }

    #[tokio::test]
    async fn test_no_failures_counted_when_all_rows_succeed() {
        let sheet = RecordingSheet::default();
        let records = vec![record("a.jpg", vec![bbox("a", 1.0), bbox("b", 2.0)])];

        let failed = SpreadsheetWriter::new(&sheet).append_records(&records).await;

        assert_eq!(failed, 0);
        assert_eq!(sheet.rows.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_error_message() {
        let err = SheetsError::Api {
            status: 403,
            message: "The caller does not have permission".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Sheets API エラー (403): The caller does not have permission"
        );
    }
}
