//! # ビジネスイベントログとエラーコンテキストの構造化ヘルパー
//!
//! 配送結果を `jq` で追跡できるよう、ログフィールドの命名規約と
//! ヘルパーマクロを提供する。
//!
//! ## ビジネスイベント
//!
//! [`log_business_event!`] マクロで出力する。`event.kind = "business_event"` マーカーが
//! 自動付与され、`jq 'select(.["event.kind"] == "business_event")'` でフィルタできる。
//!
//! ## フィールド命名規約
//!
//! ドット記法（`event.category`、`error.kind`）を使用。tracing の
//! `$($field:ident).+` パターンでサポートされ、JSON 出力でフラットなキーになる。

/// ビジネスイベントを構造化ログとして出力する。
///
/// `event.kind = "business_event"` マーカーを自動付与し、
/// `tracing::info!` レベルで出力する。
///
/// ## 必須フィールド（慣例）
///
/// - `event.category`: イベントカテゴリ（[`event::category`] の定数を使用）
/// - `event.action`: アクション名（[`event::action`] の定数を使用）
/// - `event.result`: 結果（[`event::result`] の定数を使用）
///
/// ## 推奨フィールド
///
/// - `event.entity_type`: エンティティ種別（[`event::entity_type`] の定数を使用）
/// - `event.correlation_id`: 要求元が付与した相関 ID
#[macro_export]
macro_rules! log_business_event {
    ($($args:tt)*) => {
        ::tracing::info!(
            event.kind = "business_event",
            $($args)*
        )
    };
}

/// イベントフィールドの定数
pub mod event {
    /// イベントカテゴリ
    pub mod category {
        pub const NOTIFICATION: &str = "notification";
        pub const CONFIGURATION: &str = "configuration";
    }

    /// イベントアクション
    pub mod action {
        // 通知
        pub const NOTIFICATION_SENT: &str = "notification.sent";
        pub const NOTIFICATION_FAILED: &str = "notification.failed";
        pub const NOTIFICATION_REJECTED: &str = "notification.rejected";

        // 設定
        pub const CONFIG_LOADED: &str = "config.loaded";
    }

    /// エンティティ種別
    pub mod entity_type {
        pub const MAIL: &str = "mail";
        pub const EMAIL_ALERT: &str = "email_alert";
        pub const SMS_ALERT: &str = "sms_alert";
    }

    /// イベント結果
    pub mod result {
        pub const SUCCESS: &str = "success";
        pub const FAILURE: &str = "failure";
    }
}

/// エラーコンテキストフィールドの定数
pub mod error {
    /// エラーカテゴリ
    pub mod category {
        /// メッセージバス（Redis Pub/Sub）
        pub const BUS: &str = "bus";
        /// メール送信トランスポート
        pub const TRANSPORT: &str = "transport";
        /// 設定ファイル
        pub const CONFIGURATION: &str = "configuration";
    }

    /// エラー種別
    pub mod kind {
        pub const CONNECT: &str = "connect";
        pub const SUBSCRIBE: &str = "subscribe";
        pub const PRODUCER: &str = "producer";
        pub const REPLY: &str = "reply";
        pub const INVALID_VALUE: &str = "invalid_value";
    }
}
