//! # Email Server ライブラリ
//!
//! 通知アクターとそのユースケースを公開する。
//! 統合テストからアクターを直接起動できるよう、バイナリとは別にライブラリとして提供する。

pub mod command;
pub mod config;
pub mod error;
pub mod live_config;
pub mod server;
pub mod usecase;
