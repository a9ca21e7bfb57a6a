//! # Email Server エラー定義
//!
//! 起動・設定読み込み・アクター操作で発生するエラーを定義する。
//! 要求ごとの失敗は [`NotificationError`](alertmail_domain::NotificationError) として
//! 応答に変換されるため、ここには含まれない。

use std::path::PathBuf;

use alertmail_domain::NotificationError;
use thiserror::Error;

/// Email Server で発生するエラー
#[derive(Debug, Error)]
pub enum ServerError {
    /// 必須の環境変数が設定されていない
    #[error("環境変数 {0} が設定されていません")]
    MissingEnv(&'static str),

    /// 環境変数の値が不正
    #[error("環境変数 {name} の値が不正です: {value}")]
    InvalidEnv { name: &'static str, value: String },

    /// 設定ファイルを読み込めない
    #[error("設定ファイル {path} を読み込めません: {source}")]
    ConfigDocument {
        path:   PathBuf,
        #[source]
        source: config::ConfigError,
    },

    /// テンプレートの初期化に失敗
    #[error("テンプレートの初期化に失敗しました: {0}")]
    Template(#[from] NotificationError),

    /// アクターが既に終了している
    #[error("アクターは既に終了しています")]
    ActorStopped,

    /// 割り込みを受ける前にアクターが終了した
    #[error("割り込みを受ける前にアクターが終了しました")]
    ActorExited,

    /// 割り込みシグナルを待機できない
    #[error("割り込みシグナルを待機できません: {0}")]
    Signal(#[from] std::io::Error),

    /// アクタータスクが異常終了した
    #[error("アクタータスクが異常終了しました: {0}")]
    ActorPanicked(#[from] tokio::task::JoinError),
}
