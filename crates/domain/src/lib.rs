//! # AlertMail ドメイン層
//!
//! アラート通知メールの配送プロトコルを構成するドメインモデルを定義する。
//!
//! ## 設計方針
//!
//! - **純粋性**: バス・SMTP などの外部システムには一切依存しない
//! - **ワイヤ形式の明示**: 要求・応答のフレーム構成を型として表現する
//! - **Result による失敗表現**: 検証エラーや送信失敗は [`NotificationError`] で返す
//!
//! ## 依存関係の方向
//!
//! ```text
//! email-server → infra → domain
//!          ↘               ↑
//!            ───────────────
//! ```
//!
//! ## モジュール構成
//!
//! - [`alert`] - アラートレコードとそのワイヤ形式
//! - [`delivery`] - トピック、配送要求、応答、送信エラー分類
//! - [`mail`] - メールメッセージ、SENDMAIL 要求のコーデック、SMTP 設定
//! - [`notification`] - 通知エラーと言語
//! - [`sms`] - SMS ゲートウェイのアドレス生成
//!
//! ## 使用例
//!
//! ```rust
//! use alertmail_domain::{delivery::SmtpErrorCode, sms::sms_address};
//!
//! assert_eq!(sms_address("0#####@hyper.mobile", "+79 (0) 123456"), "023456@hyper.mobile");
//! assert_eq!(SmtpErrorCode::classify("cannot locate host mail.example.com").code(), 1);
//! ```

pub mod alert;
pub mod delivery;
pub mod mail;
pub mod notification;
pub mod sms;

pub use notification::NotificationError;
