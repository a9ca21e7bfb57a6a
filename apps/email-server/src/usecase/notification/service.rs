//! # 通知サービス
//!
//! バスから届いた要求 1 件を処理し、応答を組み立てる。
//!
//! ## 処理フロー
//!
//! ```text
//! SENDMAIL:        フレーム → OutgoingMail → 送信 → SendMailReply
//! SENDMAIL_ALERT:  フレーム → 検証 → テンプレート → 送信 → AlertReply
//! SENDSMS_ALERT:   フレーム → 検証 → テンプレート → ゲートウェイアドレス → 送信 → AlertReply
//! ```
//!
//! 検証で拒否された要求はトランスポートに渡らない。

use alertmail_domain::{
    NotificationError,
    delivery::{AlertChannel, AlertDeliveryRequest, AlertReply, SendMailReply},
    mail::{EmailMessage, OutgoingMail, RawMessage},
    sms::sms_address,
};
use alertmail_shared::{event_log::event, log_business_event};

use super::{
    mailer::{DeliveryObserver, Mailer},
    template_renderer::TemplateRenderer,
};
use crate::live_config::LiveConfig;

fn alert_entity_type(channel: AlertChannel) -> &'static str {
    match channel {
        AlertChannel::Email => event::entity_type::EMAIL_ALERT,
        AlertChannel::Sms => event::entity_type::SMS_ALERT,
    }
}

/// SENDMAIL 要求のフレーム（相関 ID を除く）を送信単位にする
///
/// 1 フレームのみの場合は組み立て済みメッセージとして扱い、
/// 本文の先頭にホストアドレスを付ける。
fn outgoing_from_frames(
    host_address: &str,
    frames: &[String],
) -> Result<OutgoingMail, NotificationError> {
    match frames {
        [raw] => Ok(OutgoingMail::Raw(RawMessage::new(host_address, raw.as_str()))),
        _ => EmailMessage::decode_frames(frames).map(OutgoingMail::Composed),
    }
}

/// 通知サービス
pub struct NotificationService {
    renderer: TemplateRenderer,
    mailer:   Mailer,
}

impl NotificationService {
    pub fn new(renderer: TemplateRenderer, mailer: Mailer) -> Self {
        Self { renderer, mailer }
    }

    /// 送信内容の観測者を差し替える
    pub fn set_observer(&mut self, observer: Box<dyn DeliveryObserver>) {
        self.mailer.set_observer(observer);
    }

    /// `SENDMAIL` を処理する
    ///
    /// `frames` は相関 ID を除いた本文フレーム。
    pub async fn send_mail(
        &mut self,
        live: &LiveConfig,
        host_address: &str,
        correlation_id: &str,
        frames: &[String],
    ) -> SendMailReply {
        let outcome = match outgoing_from_frames(host_address, frames) {
            Ok(mail) => self.mailer.deliver(&live.smtp, &mail).await,
            Err(e) => Err(e),
        };

        log_outcome(event::entity_type::MAIL, correlation_id, &outcome);
        SendMailReply::from_result(&outcome)
    }

    /// `SENDMAIL_ALERT` / `SENDSMS_ALERT` を処理する
    pub async fn notify_alert(
        &mut self,
        live: &LiveConfig,
        channel: AlertChannel,
        correlation_id: &str,
        frames: &[String],
    ) -> AlertReply {
        let outcome = self.try_notify_alert(live, channel, correlation_id, frames).await;

        log_outcome(alert_entity_type(channel), correlation_id, &outcome);
        AlertReply::from_result(&outcome)
    }

    async fn try_notify_alert(
        &mut self,
        live: &LiveConfig,
        channel: AlertChannel,
        correlation_id: &str,
        frames: &[String],
    ) -> Result<(), NotificationError> {
        let request = AlertDeliveryRequest::from_frames(correlation_id, channel, frames)?;

        let content = self.renderer.compose(
            live.language,
            &request.alert,
            &request.priority,
            &request.asset_name,
        )?;

        let to = match channel {
            AlertChannel::Email => request.contact,
            AlertChannel::Sms => {
                sms_address(live.gw_template.as_deref().unwrap_or_default(), &request.contact)
            }
        };

        let mail = OutgoingMail::Composed(EmailMessage::new(to, content.subject, content.body));
        self.mailer.deliver(&live.smtp, &mail).await
    }
}

fn log_outcome(entity: &'static str, correlation_id: &str, outcome: &Result<(), NotificationError>) {
    match outcome {
        Ok(()) => log_business_event!(
            event.category = event::category::NOTIFICATION,
            event.action = event::action::NOTIFICATION_SENT,
            event.entity_type = entity,
            event.correlation_id = correlation_id,
            event.result = event::result::SUCCESS,
            "通知を送信しました"
        ),
        Err(e) if e.is_rejection() => log_business_event!(
            event.category = event::category::NOTIFICATION,
            event.action = event::action::NOTIFICATION_REJECTED,
            event.entity_type = entity,
            event.correlation_id = correlation_id,
            event.result = event::result::FAILURE,
            error = %e,
            "要求を拒否しました"
        ),
        Err(e) => log_business_event!(
            event.category = event::category::NOTIFICATION,
            event.action = event::action::NOTIFICATION_FAILED,
            event.entity_type = entity,
            event.correlation_id = correlation_id,
            event.result = event::result::FAILURE,
            error = %e,
            "通知の送信に失敗しました"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alertmail_domain::{alert::Alert, delivery::SmtpErrorCode};
    use alertmail_infra::mock::MockMailTransport;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn service(transport: &MockMailTransport) -> NotificationService {
        NotificationService::new(
            TemplateRenderer::new().unwrap(),
            Mailer::new(Arc::new(transport.clone())),
        )
    }

    fn frames(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    fn alert_frame() -> String {
        Alert {
            rule:        "NY_RULE".to_string(),
            name:        "ASSET1".to_string(),
            state:       "ACTIVE".to_string(),
            severity:    "CRITICAL".to_string(),
            description: "Device does not provide expected data.".to_string(),
            time:        1_700_000_000,
            ttl:         600,
            actions:     vec!["SMS".to_string()],
        }
        .encode()
    }

    #[tokio::test]
    async fn test_単一フレームのsendmailはホストアドレスを前置して送る() {
        let transport = MockMailTransport::new();
        let mut service = service(&transport);

        let reply = service
            .send_mail(&LiveConfig::default(), "10.0.0.1", "UUID", &frames(&["raw body"]))
            .await;

        assert_eq!(reply, SendMailReply::Ok);
        assert_eq!(
            transport.sent(),
            vec![OutgoingMail::Raw(RawMessage::new("10.0.0.1", "raw body"))]
        );
    }

    #[tokio::test]
    async fn test_構造化sendmailの送信失敗は分類コードで応答する() {
        let transport = MockMailTransport::new();
        transport.fail_with("authentication failed (method PLAIN)");
        let mut service = service(&transport);

        let reply = service
            .send_mail(
                &LiveConfig::default(),
                "10.0.0.1",
                "UUID",
                &frames(&["ops@example.com", "subject", "body"]),
            )
            .await;

        assert_eq!(
            reply,
            SendMailReply::Failed {
                code:    SmtpErrorCode::AuthFailed,
                message: "authentication failed (method PLAIN)".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_フレームが不正なsendmailは送信しない() {
        let transport = MockMailTransport::new();
        let mut service = service(&transport);

        let reply = service
            .send_mail(&LiveConfig::default(), "10.0.0.1", "UUID", &frames(&["to", "subject"]))
            .await;

        assert!(matches!(
            reply,
            SendMailReply::Failed {
                code: SmtpErrorCode::UnknownError,
                ..
            }
        ));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_メールアラートは連絡先へ送信される() {
        let transport = MockMailTransport::new();
        let mut service = service(&transport);

        let reply = service
            .notify_alert(
                &LiveConfig::default(),
                AlertChannel::Email,
                "id",
                &frames(&["1", "ASSET1", "ops@example.com", &alert_frame()]),
            )
            .await;

        assert_eq!(reply, AlertReply::Ok);
        let sent = transport.sent();
        let [OutgoingMail::Composed(email)] = sent.as_slice() else {
            panic!("構造化メールが 1 通送信されるはず");
        };
        assert_eq!(email.to, "ops@example.com");
        assert!(email.subject.contains("CRITICAL alert on ASSET1"));
        assert!(email.body.contains("Alert priority: P1"));
    }

    #[tokio::test]
    async fn test_smsアラートはゲートウェイアドレスへ送信される() {
        let transport = MockMailTransport::new();
        let mut service = service(&transport);
        let live = LiveConfig {
            gw_template: Some("0#####@hyper.mobile".to_string()),
            ..Default::default()
        };

        let reply = service
            .notify_alert(
                &live,
                AlertChannel::Sms,
                "id",
                &frames(&["1", "ASSET1", "+79 (0) 123456", &alert_frame()]),
            )
            .await;

        assert_eq!(reply, AlertReply::Ok);
        let sent = transport.sent();
        let [OutgoingMail::Composed(email)] = sent.as_slice() else {
            panic!("構造化メールが 1 通送信されるはず");
        };
        assert_eq!(email.to, "023456@hyper.mobile");
    }

    #[rstest]
    #[case(&["", "ASSET1", "ops@example.com"], "Empty priority")]
    #[case(&["1", "", "ops@example.com"], "Empty asset name")]
    #[case(&["1", "ASSET1", ""], "Empty contact")]
    #[tokio::test]
    async fn test_空のフィールドを持つアラートは送信せずに拒否する(
        #[case] head: &[&str],
        #[case] reason: &str,
    ) {
        let transport = MockMailTransport::new();
        let mut service = service(&transport);
        let mut request = frames(head);
        request.push(alert_frame());

        let reply = service
            .notify_alert(&LiveConfig::default(), AlertChannel::Email, "id", &request)
            .await;

        assert_eq!(reply, AlertReply::Error(reason.to_string()));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_アラートの送信失敗は生の文言で応答する() {
        let transport = MockMailTransport::new();
        transport.fail_with("cannot locate host smtp.example.com");
        let mut service = service(&transport);

        let reply = service
            .notify_alert(
                &LiveConfig::default(),
                AlertChannel::Email,
                "id",
                &frames(&["1", "ASSET1", "ops@example.com", &alert_frame()]),
            )
            .await;

        assert_eq!(
            reply,
            AlertReply::Error("cannot locate host smtp.example.com".to_string())
        );
    }
}
