//! # AlertMail インフラ層
//!
//! メッセージバスとメール送信という 2 つの外部システムとの接続を担当する。
//!
//! ## 設計方針
//!
//! ディスパッチループはバスとトランスポートを trait 越しにしか扱わない。
//! このクレートはその trait と具体実装を提供し、外部システムの詳細を
//! アプリケーション層から隠蔽する。
//!
//! ## 責務
//!
//! - **メッセージバス**: Redis Pub/Sub 上のメールボックス・ストリーム
//! - **メール送信**: lettre による SMTP / sendmail 送信
//! - **テストダブル**: インメモリブローカーとモックトランスポート（`test-utils`）
//!
//! ## 依存関係
//!
//! ```text
//! email-server → infra → domain
//! ```
//!
//! ## モジュール構成
//!
//! - [`bus`] - バスクライアントの trait と Redis 実装
//! - [`transport`] - メールトランスポートの trait と実装
//! - [`error`] - インフラ層エラー定義
//!
//! ## 使用例
//!
//! ```rust,ignore
//! use std::time::Duration;
//!
//! use alertmail_infra::bus::{BusConnector, RedisBusConnector};
//!
//! async fn setup() -> Result<(), alertmail_infra::InfraError> {
//!     let mut client = RedisBusConnector.new_client();
//!     client
//!         .connect("redis://localhost", Duration::from_millis(1000), "fty-email")
//!         .await?;
//!     client.set_consumer("alerts", ".*").await?;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod transport;

pub use error::InfraError;
