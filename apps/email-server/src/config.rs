//! # Email Server 設定
//!
//! 環境変数からプロセス起動時の設定を読み込む。
//! メール送信や接続先などの運用設定は、`LOAD` で読み込む設定ファイル側に置く。

use std::{env, path::PathBuf};

use crate::{error::ServerError, server::ServerMode};

/// 送信バックエンド
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MailBackend {
    /// lettre による SMTP / sendmail 送信
    #[default]
    Smtp,
    /// 送信しない（ログ出力のみ）
    Noop,
}

impl MailBackend {
    fn parse(value: &str) -> Result<Self, ServerError> {
        match value {
            "smtp" => Ok(Self::Smtp),
            "noop" => Ok(Self::Noop),
            other => Err(ServerError::InvalidEnv {
                name:  "MAIL_BACKEND",
                value: other.to_string(),
            }),
        }
    }
}

/// Email Server の起動設定
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 起動時に `LOAD` する設定ファイル
    pub config_path:  PathBuf,
    /// 動作モード
    pub mode:         ServerMode,
    /// 送信バックエンド
    pub mail_backend: MailBackend,
}

impl ServerConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// 任意の参照関数から設定を読み込む
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServerError> {
        let config_path = lookup("EMAIL_SERVER_CONFIG")
            .filter(|value| !value.is_empty())
            .ok_or(ServerError::MissingEnv("EMAIL_SERVER_CONFIG"))?;

        let mode = match lookup("EMAIL_SERVER_SENDMAIL_ONLY").as_deref() {
            None | Some("" | "false") => ServerMode::Full,
            Some("true") => ServerMode::SendmailOnly,
            Some(other) => {
                return Err(ServerError::InvalidEnv {
                    name:  "EMAIL_SERVER_SENDMAIL_ONLY",
                    value: other.to_string(),
                });
            }
        };

        let mail_backend = match lookup("MAIL_BACKEND") {
            Some(value) => MailBackend::parse(&value)?,
            None => MailBackend::default(),
        };

        Ok(Self {
            config_path: PathBuf::from(config_path),
            mode,
            mail_backend,
        })
    }
}
