//! # メーラー
//!
//! メールトランスポートへの送信と、診断用の送信内容ミラーリングを担う。
//!
//! `_MSMTP_TEST` コマンドで観測者（[`DeliveryObserver`]）が差し替えられると、
//! 以降の送信内容はトランスポートに渡す前に観測者へ通知される。
//! 送信自体は観測者の有無にかかわらず常に行う。

use std::sync::Arc;

use alertmail_domain::{
    NotificationError,
    mail::{OutgoingMail, SmtpSettings},
};
use alertmail_infra::{bus::BusClient, transport::MailTransport};
use alertmail_shared::event_log::error::{category, kind};
use async_trait::async_trait;

/// 診断用クライアントがバスに接続する際のアドレス
pub const TEST_CLIENT_ADDRESS: &str = "smtp-test-client";

/// ミラー送信の件名
pub const MIRROR_SUBJECT: &str = "btest";

/// 送信内容の観測者
#[async_trait]
pub trait DeliveryObserver: Send {
    async fn observe(&mut self, mail: &OutgoingMail);
}

/// 何もしない観測者
pub struct NoopObserver;

#[async_trait]
impl DeliveryObserver for NoopObserver {
    async fn observe(&mut self, _mail: &OutgoingMail) {}
}

/// 送信内容をバス上のリーダーへミラーする観測者
pub struct BusMirrorObserver {
    client: Box<dyn BusClient>,
    reader: String,
}

impl BusMirrorObserver {
    pub fn new(client: Box<dyn BusClient>, reader: impl Into<String>) -> Self {
        Self {
            client,
            reader: reader.into(),
        }
    }
}

#[async_trait]
impl DeliveryObserver for BusMirrorObserver {
    async fn observe(&mut self, mail: &OutgoingMail) {
        if let Err(e) = self
            .client
            .send_to(&self.reader, MIRROR_SUBJECT, mail.mirror_frames())
            .await
        {
            tracing::warn!(
                error.category = category::BUS,
                error.kind = kind::REPLY,
                reader = %self.reader,
                error = %e,
                "診断用リーダーへのミラー送信に失敗しました"
            );
        }
    }
}

/// メーラー
pub struct Mailer {
    transport: Arc<dyn MailTransport>,
    observer:  Box<dyn DeliveryObserver>,
}

impl Mailer {
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self {
            transport,
            observer: Box::new(NoopObserver),
        }
    }

    /// 観測者を差し替える（以前の観測者は破棄される）
    pub fn set_observer(&mut self, observer: Box<dyn DeliveryObserver>) {
        self.observer = observer;
    }

    /// メールを送信する
    pub async fn deliver(
        &mut self,
        settings: &SmtpSettings,
        mail: &OutgoingMail,
    ) -> Result<(), NotificationError> {
        self.observer.observe(mail).await;
        self.transport.send(settings, mail).await
    }
}
