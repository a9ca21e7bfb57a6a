//! # Email Server
//!
//! アラートバスと外部メール配送をつなぐ通知アクター。
//!
//! ## 役割
//!
//! - **任意メールの送信**: `SENDMAIL` 要求をメールトランスポートへ渡す
//! - **アラート通知**: `SENDMAIL_ALERT` / `SENDSMS_ALERT` をテンプレートで文面にして送る
//! - **設定の再読み込み**: `LOAD` で設定ファイルを上書き適用する
//!
//! ```text
//! ┌──────────────┐  要求   ┌──────────────┐  SMTP / sendmail  ┌──────────────┐
//! │ Alert Bus    │───────→│ Email Server │─────────────────→│ Mail Server  │
//! │ (Redis)      │←───────│              │                  └──────────────┘
//! └──────────────┘  応答   └──────────────┘
//! ```
//!
//! ## 環境変数
//!
//! | 変数名 | 必須 | 説明 |
//! |--------|------|------|
//! | `EMAIL_SERVER_CONFIG` | **Yes** | 起動時に読み込む設定ファイル |
//! | `EMAIL_SERVER_SENDMAIL_ONLY` | No | `true` で送信専用モード |
//! | `MAIL_BACKEND` | No | `smtp`（デフォルト）または `noop` |
//! | `LOG_FORMAT` | No | `json` または `pretty`（デフォルト） |
//! | `RUST_LOG` | No | ログレベル（デフォルト: `info,alertmail=debug`） |
//!
//! ## 起動方法
//!
//! ```bash
//! EMAIL_SERVER_CONFIG=/etc/alertmail/email.toml cargo run -p alertmail-email-server
//! ```
//!
//! Ctrl-C で `$TERM` を送り、ループの終了を待ってから終了する。
//! 割り込み前にループが終了した場合（設定ファイルを読み込めない等）はエラー終了する。

use std::sync::Arc;

use alertmail_email_server::{
    config::{MailBackend, ServerConfig},
    server::{EmailServer, ServerOptions},
};
use alertmail_infra::{
    bus::RedisBusConnector,
    transport::{MailTransport, NoopMailTransport, SmtpMailTransport},
};
use alertmail_shared::observability::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env ファイルを読み込む（存在する場合）
    dotenvy::dotenv().ok();

    let bus_trace = init_tracing(TracingConfig::from_env("email-server"));

    let config = ServerConfig::from_env()?;
    tracing::info!(
        config = %config.config_path.display(),
        mode = ?config.mode,
        backend = ?config.mail_backend,
        "Email Server を起動します"
    );

    let transport: Arc<dyn MailTransport> = match config.mail_backend {
        MailBackend::Smtp => Arc::new(SmtpMailTransport),
        MailBackend::Noop => Arc::new(NoopMailTransport),
    };

    let options = ServerOptions {
        bus_trace,
        ..ServerOptions::new(config.mode)
    };
    tracing::debug!(host_address = %options.host_address, "ホストアドレスを決定しました");

    let server = EmailServer::new(options, Arc::new(RedisBusConnector), transport)?;
    let handle = server.spawn();
    handle.load(config.config_path).await?;

    // 設定の致命的エラーでループが終了した場合は非ゼロで終了する
    handle.run_until(tokio::signal::ctrl_c()).await?;

    Ok(())
}
