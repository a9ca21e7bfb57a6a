//! # 通知ユースケース
//!
//! - [`template_renderer`] - アラートから件名・本文を生成
//! - [`mailer`] - トランスポートへの送信と診断用ミラー
//! - [`service`] - 要求 1 件の処理と応答の組み立て

pub mod mailer;
pub mod service;
pub mod template_renderer;

pub use mailer::{BusMirrorObserver, DeliveryObserver, Mailer, NoopObserver};
pub use service::NotificationService;
pub use template_renderer::TemplateRenderer;
