//! SMTP / sendmail メール送信実装
//!
//! lettre を使用してメールを送信する。
//!
//! ## 送信経路の選択
//!
//! | `smtp/server` | 経路 |
//! |---------------|------|
//! | 設定あり | `AsyncSmtpTransport`（暗号化方式・認証は設定に従う） |
//! | 未設定 | `AsyncSendmailTransport`（`smtp/msmtppath`、既定は `sendmail`） |
//!
//! 組み立て済みメッセージ（[`OutgoingMail::Raw`]）は、ヘッダーの
//! `From` / `To` / `Cc` / `Bcc` からエンベロープを作って送る。

use std::path::Path;

use alertmail_domain::{
    NotificationError,
    mail::{EmailMessage, Encryption, OutgoingMail, RawMessage, SmtpSettings},
};
use async_trait::async_trait;
use lettre::{
    Address,
    AsyncSendmailTransport,
    AsyncSmtpTransport,
    AsyncTransport,
    Message,
    Tokio1Executor,
    address::Envelope,
    message::{
        Attachment,
        Mailbox,
        MultiPart,
        SinglePart,
        header::{ContentType, HeaderName, HeaderValue},
    },
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
};

use super::MailTransport;

/// sendmail 互換コマンドの既定値
const DEFAULT_SENDMAIL_COMMAND: &str = "sendmail";

/// 送信元が設定されていない場合のアドレス
const DEFAULT_FROM: &str = "alertmail@localhost";

/// SMTP / sendmail 送信
///
/// 設定は送信ごとに受け取り、トランスポートもその都度組み立てる。
#[derive(Debug, Clone, Copy, Default)]
pub struct SmtpMailTransport;

fn send_failed(context: &str, e: impl std::fmt::Display) -> NotificationError {
    NotificationError::SendFailed(format!("{context}: {e}"))
}

fn build_smtp_transport(
    settings: &SmtpSettings,
    host: &str,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotificationError> {
    let port = settings.effective_port();

    let builder = match settings.encryption {
        Encryption::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(port),
        encryption => {
            let tls_parameters = TlsParameters::builder(host.to_string())
                .dangerous_accept_invalid_certs(!settings.verify_ca)
                .build()
                .map_err(|e| send_failed("TLS configuration error", e))?;
            let tls = if encryption == Encryption::Tls {
                Tls::Wrapper(tls_parameters)
            } else {
                Tls::Required(tls_parameters)
            };
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                .port(port)
                .tls(tls)
        }
    };

    let builder = match &settings.username {
        Some(user) => builder.credentials(Credentials::new(
            user.clone(),
            settings.password.clone().unwrap_or_default(),
        )),
        None => builder,
    };

    Ok(builder.build())
}

fn from_mailbox(settings: &SmtpSettings) -> Result<Mailbox, NotificationError> {
    settings
        .from
        .as_deref()
        .unwrap_or(DEFAULT_FROM)
        .parse()
        .map_err(|e| send_failed("invalid sender address", e))
}

fn attachment_part(path: &Path, content: Vec<u8>) -> Result<SinglePart, NotificationError> {
    let filename = path
        .file_name()
        .map_or_else(|| "attachment".to_string(), |name| name.to_string_lossy().into_owned());
    let content_type = ContentType::parse("application/octet-stream")
        .map_err(|e| send_failed("invalid content type", e))?;
    Ok(Attachment::new(filename).body(content, content_type))
}

/// 構造化メールを MIME メッセージに組み立てる
async fn build_message(
    settings: &SmtpSettings,
    email: &EmailMessage,
) -> Result<Message, NotificationError> {
    let to: Mailbox = email
        .to
        .parse()
        .map_err(|e| send_failed("invalid recipient address", e))?;

    let mut builder = Message::builder()
        .from(from_mailbox(settings)?)
        .to(to)
        .subject(&email.subject);
    for (name, value) in &email.headers {
        let name = HeaderName::new_from_ascii(name.clone())
            .map_err(|e| send_failed("invalid header name", e))?;
        builder = builder.raw_header(HeaderValue::new(name, value.clone()));
    }

    let message = if email.attachments.is_empty() {
        builder
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
    } else {
        let mut multipart = MultiPart::mixed().singlepart(SinglePart::plain(email.body.clone()));
        for path in &email.attachments {
            let content = tokio::fs::read(path)
                .await
                .map_err(|e| send_failed(&format!("cannot read attachment {}", path.display()), e))?;
            multipart = multipart.singlepart(attachment_part(path, content)?);
        }
        builder.multipart(multipart)
    };

    message.map_err(|e| send_failed("failed to build email", e))
}

/// 組み立て済みメッセージのヘッダーを (名前, 値) の列として取り出す
///
/// 継続行（空白で始まる行）は直前のヘッダーに連結する。
fn raw_headers(raw: &str) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    headers
}

fn parse_addresses(value: &str) -> Result<Vec<Address>, NotificationError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<Mailbox>()
                .map(|mailbox| mailbox.email)
                .map_err(|e| send_failed(&format!("invalid address {part}"), e))
        })
        .collect()
}

/// 組み立て済みメッセージのヘッダーからエンベロープを作る
///
/// `From` がない場合は設定の送信元を使う。
fn raw_envelope(settings: &SmtpSettings, raw: &RawMessage) -> Result<Envelope, NotificationError> {
    let mut from = None;
    let mut recipients = Vec::new();
    for (name, value) in raw_headers(raw.header_block()) {
        match name.to_ascii_lowercase().as_str() {
            "from" => from = parse_addresses(&value)?.into_iter().next(),
            "to" | "cc" | "bcc" => recipients.extend(parse_addresses(&value)?),
            _ => {}
        }
    }
    let from = match from {
        Some(address) => address,
        None => from_mailbox(settings)?.email,
    };

    Envelope::new(Some(from), recipients).map_err(|e| send_failed("invalid envelope", e))
}

async fn deliver(
    settings: &SmtpSettings,
    envelope: &Envelope,
    content: &[u8],
) -> Result<(), NotificationError> {
    match settings.host.as_deref() {
        Some(host) => {
            let transport = build_smtp_transport(settings, host)?;
            transport
                .send_raw(envelope, content)
                .await
                .map(|_| ())
                .map_err(|e| NotificationError::SendFailed(e.to_string()))
        }
        None => {
            let command = settings
                .msmtp_path
                .as_deref()
                .unwrap_or(DEFAULT_SENDMAIL_COMMAND);
            AsyncSendmailTransport::<Tokio1Executor>::new_with_command(command)
                .send_raw(envelope, content)
                .await
                .map_err(|e| NotificationError::SendFailed(e.to_string()))
        }
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(
        &self,
        settings: &SmtpSettings,
        mail: &OutgoingMail,
    ) -> Result<(), NotificationError> {
        let result = match mail {
            OutgoingMail::Composed(email) => {
                let message = build_message(settings, email).await?;
                deliver(settings, message.envelope(), &message.formatted()).await
            }
            OutgoingMail::Raw(raw) => {
                let envelope = raw_envelope(settings, raw)?;
                deliver(settings, &envelope, raw.wire_text().as_bytes()).await
            }
        };

        match &result {
            Ok(()) => tracing::debug!(to = %mail.recipient_hint(), "メールを送信しました"),
            Err(e) => tracing::warn!(to = %mail.recipient_hint(), error = %e, "メール送信に失敗しました"),
        }
        result
    }
}
