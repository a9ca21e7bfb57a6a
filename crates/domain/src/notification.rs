//! # 通知
//!
//! アラート通知に関する共通のエラー型と言語設定を定義する。
//!
//! ## 設計方針
//!
//! - **例外の代わりに Result**: 入力検証・テンプレート・送信の失敗はすべて
//!   [`NotificationError`] として呼び出し元に返し、ディスパッチループが
//!   パターンマッチで応答を組み立てる
//! - **ワイヤに載る文言は英語**: `Display` の文言は応答フレームにそのまま入るため、
//!   受信側が依存できる固定の英語表現とする

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;
use thiserror::Error;

/// 通知処理のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    /// 優先度が空
    #[error("Empty priority")]
    EmptyPriority,

    /// アセット名が空
    #[error("Empty asset name")]
    EmptyAssetName,

    /// 宛先が空
    #[error("Empty contact")]
    EmptyContact,

    /// アラートレコードをデコードできない
    #[error("Malformed alert: {0}")]
    MalformedAlert(String),

    /// SENDMAIL 要求のフレーム構成が不正
    #[error("Malformed mail request: {0}")]
    MalformedRequest(String),

    /// テンプレートレンダリングに失敗
    #[error("Template rendering failed: {0}")]
    TemplateFailed(String),

    /// メール送信に失敗
    ///
    /// トランスポートが返した文言をそのまま保持する。
    /// 応答コードの分類はこの文言に対して行う。
    #[error("{0}")]
    SendFailed(String),
}

impl NotificationError {
    /// 要求の検証段階で発生したエラーか
    ///
    /// 検証エラーの場合、トランスポートは一度も呼ばれていない。
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::SendFailed(_) | Self::TemplateFailed(_))
    }
}

/// 通知文面の言語
///
/// 設定キー `server/language` の値（例: `en_US`）と対応する。
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
)]
pub enum Language {
    /// 英語（既定）
    #[default]
    #[strum(serialize = "en_US")]
    #[serde(rename = "en_US")]
    EnUs,
    /// 日本語
    #[strum(serialize = "ja_JP")]
    #[serde(rename = "ja_JP")]
    JaJp,
}

/// 翻訳済みの通知文面
///
/// テンプレートレンダリングの出力。宛先は含まない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContent {
    /// 件名
    pub subject: String,
    /// プレーンテキスト本文
    pub body:    String,
}
