//! # 配送プロトコル
//!
//! バスから届く要求のトピック、アラート配送要求、応答メッセージ、
//! およびトランスポートエラーの数値コード分類を定義する。
//!
//! ## トピックと応答
//!
//! | トピック | 成功時の件名 | 失敗時の件名 | 応答本文 |
//! |---------|-------------|-------------|---------|
//! | `SENDMAIL` | `SENDMAIL-OK` | `SENDMAIL-ERR` | `(id, code, text)` |
//! | `SENDMAIL_ALERT` | `SENDMAIL_ALERT` | `SENDMAIL_ALERT` | `(id, OK)` / `(id, ERROR, reason)` |
//! | `SENDSMS_ALERT` | `SENDSMS_ALERT` | `SENDSMS_ALERT` | 同上 |
//!
//! ## エラーコード分類表
//!
//! [`SmtpErrorCode::classify`] はトランスポートのエラー文言を、
//! 優先順位付きの部分文字列ルール（大文字小文字を区別しない）で数値コードに変換する。
//! この表は受信側が依存するワイヤ契約であり、テストで固定している。

use strum::IntoStaticStr;

use crate::{NotificationError, alert::Alert};

/// 要求トピック
///
/// 大文字小文字を区別する完全一致で判定する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, strum::Display, strum::EnumString)]
pub enum Topic {
    /// 任意メールの送信
    #[strum(serialize = "SENDMAIL")]
    SendMail,
    /// アラートのメール通知
    #[strum(serialize = "SENDMAIL_ALERT")]
    SendMailAlert,
    /// アラートの SMS 通知（メールゲートウェイ経由）
    #[strum(serialize = "SENDSMS_ALERT")]
    SendSmsAlert,
}

impl Topic {
    /// アラート系トピックの場合、その通知チャネルを返す
    pub fn alert_channel(self) -> Option<AlertChannel> {
        match self {
            Self::SendMail => None,
            Self::SendMailAlert => Some(AlertChannel::Email),
            Self::SendSmsAlert => Some(AlertChannel::Sms),
        }
    }
}

/// アラートの通知チャネル
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertChannel {
    /// `contact` はメールアドレス
    Email,
    /// `contact` は電話番号
    Sms,
}

impl AlertChannel {
    /// 応答の件名（要求トピックと同じ）
    pub fn reply_subject(self) -> &'static str {
        match self {
            Self::Email => Topic::SendMailAlert.into(),
            Self::Sms => Topic::SendSmsAlert.into(),
        }
    }
}

/// アラート配送要求
///
/// バスの 1 メッセージから構築される。`priority` / `asset_name` / `contact` は
/// 空であってはならず、空の場合は翻訳前に拒否される。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertDeliveryRequest {
    pub correlation_id: String,
    pub channel:        AlertChannel,
    pub priority:       String,
    pub asset_name:     String,
    /// 生の宛先（メールアドレスまたは電話番号）
    pub contact:        String,
    pub alert:          Alert,
}

impl AlertDeliveryRequest {
    /// 相関 ID を除いたフレーム列から要求を構築する
    ///
    /// フレーム構成: `priority, asset_name, contact, <alert>`。
    /// 欠けているフレームは空文字列として扱い、検証で拒否する。
    pub fn from_frames(
        correlation_id: impl Into<String>,
        channel: AlertChannel,
        frames: &[String],
    ) -> Result<Self, NotificationError> {
        let field = |index: usize| frames.get(index).cloned().unwrap_or_default();
        let priority = field(0);
        let asset_name = field(1);
        let contact = field(2);

        if priority.is_empty() {
            return Err(NotificationError::EmptyPriority);
        }
        if asset_name.is_empty() {
            return Err(NotificationError::EmptyAssetName);
        }
        if contact.is_empty() {
            return Err(NotificationError::EmptyContact);
        }

        let alert = Alert::decode(frames.get(3..).unwrap_or_default())?;

        Ok(Self {
            correlation_id: correlation_id.into(),
            channel,
            priority,
            asset_name,
            contact,
            alert,
        })
    }
}

/// トランスポートエラーの数値コード
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, strum::Display)]
pub enum SmtpErrorCode {
    Succeeded,
    ServerUnreachable,
    AuthMethodNotSupported,
    AuthFailed,
    UnknownError,
}

/// 分類ルール（上から順に評価し、最初に一致したものを採用する）
const CLASSIFICATION_RULES: &[(&str, SmtpErrorCode)] = &[
    ("cannot locate host", SmtpErrorCode::ServerUnreachable),
    ("failed to lookup address", SmtpErrorCode::ServerUnreachable),
    ("name or service not known", SmtpErrorCode::ServerUnreachable),
    ("cannot connect to", SmtpErrorCode::ServerUnreachable),
    ("connection refused", SmtpErrorCode::ServerUnreachable),
    ("network is unreachable", SmtpErrorCode::ServerUnreachable),
    ("does not support authentication", SmtpErrorCode::AuthMethodNotSupported),
    ("no compatible authentication mechanism", SmtpErrorCode::AuthMethodNotSupported),
    ("authentication method", SmtpErrorCode::AuthMethodNotSupported),
    ("authentication failed", SmtpErrorCode::AuthFailed),
    ("(535)", SmtpErrorCode::AuthFailed),
];

impl SmtpErrorCode {
    /// ワイヤに載せる数値
    pub fn code(self) -> u32 {
        match self {
            Self::Succeeded => 0,
            Self::ServerUnreachable => 1,
            Self::AuthMethodNotSupported => 2,
            Self::AuthFailed => 3,
            Self::UnknownError => 4,
        }
    }

    /// エラー文言を分類する
    ///
    /// 空文字列は [`Succeeded`](Self::Succeeded)、どのルールにも一致しない場合は
    /// [`UnknownError`](Self::UnknownError) となる。
    pub fn classify(text: &str) -> Self {
        if text.is_empty() {
            return Self::Succeeded;
        }
        let lowered = text.to_lowercase();
        CLASSIFICATION_RULES
            .iter()
            .find(|(pattern, _)| lowered.contains(pattern))
            .map_or(Self::UnknownError, |(_, code)| *code)
    }
}

/// `SENDMAIL` の応答
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendMailReply {
    Ok,
    Failed {
        code:    SmtpErrorCode,
        /// エスケープ済みのエラー文言
        message: String,
    },
}

impl SendMailReply {
    /// 送信結果から応答を組み立てる
    pub fn from_result(result: &Result<(), NotificationError>) -> Self {
        match result {
            Ok(()) => Self::Ok,
            Err(e) => {
                let text = e.to_string();
                Self::Failed {
                    code:    SmtpErrorCode::classify(&text),
                    message: escape_wire_text(&text),
                }
            }
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            Self::Ok => "SENDMAIL-OK",
            Self::Failed { .. } => "SENDMAIL-ERR",
        }
    }

    pub fn frames(&self, correlation_id: &str) -> Vec<String> {
        match self {
            Self::Ok => vec![correlation_id.to_string(), "0".to_string(), "OK".to_string()],
            Self::Failed { code, message } => vec![
                correlation_id.to_string(),
                code.code().to_string(),
                message.clone(),
            ],
        }
    }
}

/// `SENDMAIL_ALERT` / `SENDSMS_ALERT` の応答
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertReply {
    Ok,
    /// 失敗理由（生の文言）
    Error(String),
}

impl AlertReply {
    pub fn from_result(result: &Result<(), NotificationError>) -> Self {
        match result {
            Ok(()) => Self::Ok,
            Err(e) => Self::Error(e.to_string()),
        }
    }

    pub fn frames(&self, correlation_id: &str) -> Vec<String> {
        match self {
            Self::Ok => vec![correlation_id.to_string(), "OK".to_string()],
            Self::Error(reason) => vec![
                correlation_id.to_string(),
                "ERROR".to_string(),
                reason.clone(),
            ],
        }
    }
}

/// ワイヤ送出用に文字列をエスケープする
///
/// `\`・`"`・制御文字をエスケープし、非 ASCII 文字は UTF-16 の `\uXXXX` 表記にする。
pub fn escape_wire_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if c.is_ascii_control() || !c.is_ascii() => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    escaped.push_str(&format!("\\u{unit:04x}"));
                }
            }
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::alert::test_support::critical_alert;

    fn frames(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    #[test]
    fn test_topicは完全一致でパースする() {
        assert_eq!(Topic::from_str("SENDMAIL").unwrap(), Topic::SendMail);
        assert_eq!(Topic::from_str("SENDMAIL_ALERT").unwrap(), Topic::SendMailAlert);
        assert_eq!(Topic::from_str("SENDSMS_ALERT").unwrap(), Topic::SendSmsAlert);
        assert!(Topic::from_str("sendmail").is_err());
        assert!(Topic::from_str("SENDMAIL-OK").is_err());
    }

    #[test]
    fn test_アラート系トピックのみチャネルを持つ() {
        assert_eq!(Topic::SendMail.alert_channel(), None);
        assert_eq!(Topic::SendMailAlert.alert_channel(), Some(AlertChannel::Email));
        assert_eq!(Topic::SendSmsAlert.alert_channel(), Some(AlertChannel::Sms));
        assert_eq!(AlertChannel::Sms.reply_subject(), "SENDSMS_ALERT");
    }

    #[test]
    fn test_正しいフレームから配送要求を構築できる() {
        let alert = critical_alert("ASSET1");
        let request = AlertDeliveryRequest::from_frames(
            "id-1",
            AlertChannel::Email,
            &frames(&["1", "ASSET1", "a@b.com", &alert.encode()]),
        )
        .unwrap();

        assert_eq!(request.correlation_id, "id-1");
        assert_eq!(request.priority, "1");
        assert_eq!(request.asset_name, "ASSET1");
        assert_eq!(request.contact, "a@b.com");
        assert_eq!(request.alert, alert);
    }

    #[rstest]
    #[case("", "ASSET1", "a@b.com", NotificationError::EmptyPriority)]
    #[case("1", "", "a@b.com", NotificationError::EmptyAssetName)]
    #[case("1", "ASSET1", "", NotificationError::EmptyContact)]
    #[case("1", "", "", NotificationError::EmptyAssetName)]
    fn test_空のフィールドは拒否される(
        #[case] priority: &str,
        #[case] asset: &str,
        #[case] contact: &str,
        #[case] expected: NotificationError,
    ) {
        let alert = critical_alert("ASSET1").encode();
        let result = AlertDeliveryRequest::from_frames(
            "id",
            AlertChannel::Email,
            &frames(&[priority, asset, contact, &alert]),
        );
        assert_eq!(result.unwrap_err(), expected);
    }

    #[test]
    fn test_フレームが欠けている場合は空として拒否される() {
        let result = AlertDeliveryRequest::from_frames("id", AlertChannel::Sms, &frames(&["1"]));
        assert_eq!(result.unwrap_err(), NotificationError::EmptyAssetName);
    }

    #[test]
    fn test_アラートが不正な場合はmalformed_alertを返す() {
        let result = AlertDeliveryRequest::from_frames(
            "id",
            AlertChannel::Email,
            &frames(&["1", "ASSET1", "a@b.com", "{broken"]),
        );
        assert!(matches!(result, Err(NotificationError::MalformedAlert(_))));
    }

    #[rstest]
    #[case("", SmtpErrorCode::Succeeded, 0)]
    #[case("msmtp: cannot locate host smtp.example.com: Name or service not known", SmtpErrorCode::ServerUnreachable, 1)]
    #[case("Connection error: failed to lookup address information", SmtpErrorCode::ServerUnreachable, 1)]
    #[case("msmtp: cannot connect to smtp.example.com, port 25: Connection refused", SmtpErrorCode::ServerUnreachable, 1)]
    #[case("Connection refused (os error 111)", SmtpErrorCode::ServerUnreachable, 1)]
    #[case("Network is unreachable (os error 101)", SmtpErrorCode::ServerUnreachable, 1)]
    #[case("msmtp: the server does not support authentication", SmtpErrorCode::AuthMethodNotSupported, 2)]
    #[case("No compatible authentication mechanism was found", SmtpErrorCode::AuthMethodNotSupported, 2)]
    #[case("msmtp: authentication method PLAIN not supported", SmtpErrorCode::AuthMethodNotSupported, 2)]
    #[case("msmtp: authentication failed (method PLAIN)", SmtpErrorCode::AuthFailed, 3)]
    #[case("permanent error (535): 5.7.8 Username and Password not accepted", SmtpErrorCode::AuthFailed, 3)]
    #[case("something unexpected happened", SmtpErrorCode::UnknownError, 4)]
    fn test_エラー文言を数値コードに分類する(
        #[case] text: &str,
        #[case] expected: SmtpErrorCode,
        #[case] code: u32,
    ) {
        let classified = SmtpErrorCode::classify(text);
        assert_eq!(classified, expected);
        assert_eq!(classified.code(), code);
    }

    #[test]
    fn test_認証方式の不一致は認証失敗より優先される() {
        let text = "authentication method CRAM-MD5 not supported, authentication failed";
        assert_eq!(
            SmtpErrorCode::classify(text),
            SmtpErrorCode::AuthMethodNotSupported
        );
    }

    #[test]
    fn test_sendmail成功応答のフレームと件名() {
        let reply = SendMailReply::from_result(&Ok(()));
        assert_eq!(reply.subject(), "SENDMAIL-OK");
        assert_eq!(reply.frames("UUID"), frames(&["UUID", "0", "OK"]));
    }

    #[test]
    fn test_sendmail失敗応答は分類コードとエスケープ済み文言を持つ() {
        let error = NotificationError::SendFailed("cannot locate host \"smtp\"".to_string());
        let reply = SendMailReply::from_result(&Err(error));

        assert_eq!(reply.subject(), "SENDMAIL-ERR");
        assert_eq!(
            reply.frames("UUID"),
            frames(&["UUID", "1", "cannot locate host \\\"smtp\\\""])
        );
    }

    #[test]
    fn test_アラート応答のフレーム() {
        assert_eq!(AlertReply::from_result(&Ok(())).frames("id"), frames(&["id", "OK"]));
        assert_eq!(
            AlertReply::from_result(&Err(NotificationError::EmptyContact)).frames("id"),
            frames(&["id", "ERROR", "Empty contact"])
        );
    }

    #[rstest]
    #[case("plain text", "plain text")]
    #[case("line1\nline2", "line1\\nline2")]
    #[case("tab\there", "tab\\there")]
    #[case("back\\slash", "back\\\\slash")]
    #[case("bell\u{7}", "bell\\u0007")]
    #[case("é", "\\u00e9")]
    #[case("接続", "\\u63a5\\u7d9a")]
    #[case("😀", "\\ud83d\\ude00")]
    fn test_ワイヤ用にエスケープする(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(escape_wire_text(input), expected);
    }
}
