//! Noop メール送信実装
//!
//! メールを実際に送信せず、ログ出力のみ行う。
//! 開発環境や送信無効化時に使用する。

use alertmail_domain::{
    NotificationError,
    mail::{OutgoingMail, SmtpSettings},
};
use async_trait::async_trait;

use super::MailTransport;

/// Noop メール送信（ログ出力のみ）
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMailTransport;

#[async_trait]
impl MailTransport for NoopMailTransport {
    async fn send(
        &self,
        settings: &SmtpSettings,
        mail: &OutgoingMail,
    ) -> Result<(), NotificationError> {
        tracing::info!(
            to = %mail.recipient_hint(),
            host = ?settings.host,
            "Noop: メール送信をスキップ"
        );
        Ok(())
    }
}
