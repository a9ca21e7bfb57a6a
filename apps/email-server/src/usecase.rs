//! # ユースケース層
//!
//! Email Server のビジネスロジックを実装する。
//!
//! ## 設計方針
//!
//! - **依存性注入**: トランスポートは `Arc<dyn MailTransport>` で外部から注入
//! - **薄いディスパッチループ**: ループはトピックの振り分けと応答送信のみを行い、
//!   要求の処理はユースケースに集約
//!
//! ## モジュール構成
//!
//! - `notification`: メール・アラート通知のユースケース

pub mod notification;

pub use notification::NotificationService;
