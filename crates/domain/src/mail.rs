//! # メールメッセージ
//!
//! トランスポートに渡すメールと、`SENDMAIL` 要求のフレームコーデックを定義する。
//!
//! ## SENDMAIL 要求のフレーム構成
//!
//! | 位置 | 内容 | 必須 |
//! |------|------|------|
//! | 0 | 相関 ID | Yes |
//! | 1 | 宛先 | Yes |
//! | 2 | 件名 | Yes |
//! | 3 | 本文 | Yes |
//! | 4 | ヘッダー（JSON オブジェクト） | No |
//! | 5.. | 添付ファイルパス（順序を保持） | No |
//!
//! 添付ファイルを送る場合はヘッダーフレームが必須となる（空なら `{}`）。

use std::{collections::BTreeMap, fmt, path::PathBuf};

use strum::IntoStaticStr;

use crate::NotificationError;

/// 構造化されたメール
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailMessage {
    /// 送信先メールアドレス
    pub to:          String,
    /// 件名
    pub subject:     String,
    /// プレーンテキスト本文
    pub body:        String,
    /// 追加ヘッダー
    pub headers:     BTreeMap<String, String>,
    /// 添付ファイルのパス
    pub attachments: Vec<PathBuf>,
}

impl EmailMessage {
    /// ヘッダー・添付なしのメールを作成する
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    /// 相関 ID を除いたフレーム列にエンコードする
    pub fn encode_frames(&self) -> Vec<String> {
        let mut frames = vec![
            self.to.clone(),
            self.subject.clone(),
            self.body.clone(),
            // BTreeMap<String, String> の直列化は失敗しない
            serde_json::to_string(&self.headers).unwrap_or_else(|_| "{}".to_string()),
        ];
        frames.extend(
            self.attachments
                .iter()
                .map(|path| path.to_string_lossy().into_owned()),
        );
        frames
    }

    /// 相関 ID を除いたフレーム列からデコードする
    pub fn decode_frames(frames: &[String]) -> Result<Self, NotificationError> {
        let [to, subject, body, rest @ ..] = frames else {
            return Err(NotificationError::MalformedRequest(format!(
                "expected at least 3 frames (to, subject, body), got {}",
                frames.len()
            )));
        };

        let (headers, attachments) = match rest {
            [] => (BTreeMap::new(), Vec::new()),
            [headers, paths @ ..] => {
                let headers: BTreeMap<String, String> = serde_json::from_str(headers)
                    .map_err(|e| {
                        NotificationError::MalformedRequest(format!("invalid headers frame: {e}"))
                    })?;
                (headers, paths.iter().map(PathBuf::from).collect())
            }
        };

        Ok(Self {
            to: to.clone(),
            subject: subject.clone(),
            body: body.clone(),
            headers,
            attachments,
        })
    }
}

/// `SENDMAIL` 要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailRequest {
    /// 相関 ID
    pub correlation_id: String,
    /// 送信するメール
    pub email:          EmailMessage,
}

impl MailRequest {
    pub fn new(correlation_id: impl Into<String>, email: EmailMessage) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            email,
        }
    }

    /// バスに載せるフレーム列にエンコードする
    pub fn encode(&self) -> Vec<String> {
        let mut frames = vec![self.correlation_id.clone()];
        frames.extend(self.email.encode_frames());
        frames
    }

    /// フレーム列からデコードする
    pub fn decode(frames: &[String]) -> Result<Self, NotificationError> {
        let [correlation_id, rest @ ..] = frames else {
            return Err(NotificationError::MalformedRequest(
                "correlation id frame is missing".to_string(),
            ));
        };
        Ok(Self {
            correlation_id: correlation_id.clone(),
            email:          EmailMessage::decode_frames(rest)?,
        })
    }
}

/// 組み立て済みの RFC 5322 メッセージテキスト
///
/// ホストアドレスはヘッダーに混ぜず、送信時に本文の先頭へ差し込む。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// 送信元ホストのアドレス
    pub host_address: String,
    /// 要求フレームそのままのテキスト
    pub text:         String,
}

impl RawMessage {
    pub fn new(host_address: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            host_address: host_address.into(),
            text:         text.into(),
        }
    }

    /// ヘッダー部と本文部に分ける
    ///
    /// 空行がない場合はテキスト全体を本文とみなす。
    fn split(&self) -> (&str, &str) {
        let crlf = self.text.find("\r\n\r\n").map(|at| at + 4);
        let lf = self.text.find("\n\n").map(|at| at + 2);
        match crlf.into_iter().chain(lf).min() {
            Some(at) => self.text.split_at(at),
            None => ("", self.text.as_str()),
        }
    }

    /// ヘッダー部（区切りの空行を含む）
    pub fn header_block(&self) -> &str {
        self.split().0
    }

    /// 実際に送信するテキスト
    pub fn wire_text(&self) -> String {
        let (headers, body) = self.split();
        format!("{headers}{}{body}", self.host_address)
    }
}

/// トランスポートに渡す送信単位
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMail {
    /// 構造化メール（MIME 組み立てはトランスポート側）
    Composed(EmailMessage),
    /// 組み立て済みメッセージ
    Raw(RawMessage),
}

impl OutgoingMail {
    /// 診断用リーダーへミラーするフレーム列
    ///
    /// 最後のフレームが常に本文となる。
    pub fn mirror_frames(&self) -> Vec<String> {
        match self {
            Self::Composed(email) => vec![
                email.to.clone(),
                email.subject.clone(),
                email.body.clone(),
            ],
            Self::Raw(raw) => vec![raw.wire_text()],
        }
    }

    /// ログ出力用の宛先表記
    pub fn recipient_hint(&self) -> &str {
        match self {
            Self::Composed(email) => &email.to,
            Self::Raw(_) => "(raw)",
        }
    }
}

/// SMTP の暗号化方式
///
/// 設定値は大文字小文字を区別しない（`none` / `TLS` / `StartTLS` など）。
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum Encryption {
    /// 平文
    #[default]
    #[strum(serialize = "NONE")]
    None,
    /// 接続直後から TLS（SMTPS）
    #[strum(serialize = "TLS")]
    Tls,
    /// 平文接続後に STARTTLS で昇格
    #[strum(serialize = "STARTTLS")]
    StartTls,
}

impl Encryption {
    /// ポート未指定時の既定ポート
    pub fn default_port(self) -> u16 {
        match self {
            Self::None => 25,
            Self::Tls => 465,
            Self::StartTls => 587,
        }
    }
}

/// メールトランスポートの設定
///
/// 設定ファイルの `smtp/*` キーから構築される。
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SmtpSettings {
    /// sendmail 互換コマンドのパス（SMTP サーバー未設定時に使用）
    pub msmtp_path: Option<String>,
    /// SMTP サーバーのホスト名
    pub host:       Option<String>,
    /// SMTP サーバーのポート
    pub port:       Option<u16>,
    /// 暗号化方式
    pub encryption: Encryption,
    /// 認証ユーザー名
    pub username:   Option<String>,
    /// 認証パスワード
    pub password:   Option<String>,
    /// エンベロープ送信元
    pub from:       Option<String>,
    /// サーバー証明書を検証するか
    pub verify_ca:  bool,
}

impl SmtpSettings {
    /// 実際に接続するポート
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.encryption.default_port())
    }
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("msmtp_path", &self.msmtp_path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("encryption", &self.encryption)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("from", &self.from)
            .field("verify_ca", &self.verify_ca)
            .finish()
    }
}
