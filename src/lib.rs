//! 予測結果アップローダー - Roboflow の物体検出結果を Google スプレッドシートへ追記するツール
//!
//! # 機能
//! - フォルダ内の画像を Roboflow のホスト型モデルで推論
//! - 検出ごとのバウンディングボックスをスプレッドシートへ1行ずつ追記
//! - OAuth インストールアプリフローによる認証（token.json にキャッシュ）

pub mod config;
pub mod prediction;
pub mod sheets;

#[cfg(test)]
pub(crate) mod test_support;

pub use prediction::{BoundingBox, PredictionRecord};
