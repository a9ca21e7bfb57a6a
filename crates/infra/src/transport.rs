//! # メール送信
//!
//! メールの実際の送信を担当するインフラストラクチャモジュール。
//!
//! ## 設計方針
//!
//! - **trait による抽象化**: [`MailTransport`] でメール送信を抽象化
//! - **設定は呼び出しごとに渡す**: 設定ファイルの再読み込みで SMTP 設定が
//!   変わるため、トランスポート自身は設定を保持しない
//! - **失敗は文言で返す**: 応答コードの分類は呼び出し側が
//!   [`NotificationError::SendFailed`] の文言に対して行う
//! - **環境変数切替**: `MAIL_BACKEND` で SMTP / Noop をランタイム選択

mod noop;
mod smtp;

use alertmail_domain::{
    NotificationError,
    mail::{OutgoingMail, SmtpSettings},
};
use async_trait::async_trait;
pub use noop::NoopMailTransport;
pub use smtp::SmtpMailTransport;

/// メール送信トレイト
///
/// 1 回の呼び出しにつき 1 回だけ送信を試みる。再試行はしない。
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// メールを送信する
    async fn send(&self, settings: &SmtpSettings, mail: &OutgoingMail)
    -> Result<(), NotificationError>;
}
