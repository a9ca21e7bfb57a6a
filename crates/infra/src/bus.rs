//! # メッセージバス
//!
//! ディスパッチループが要求を受け取り、応答を返すためのバスクライアント。
//!
//! ## 設計方針
//!
//! - **trait による抽象化**: [`BusClient`] で接続・購読・送信・受信を抽象化
//! - **2 つの実装**: Redis Pub/Sub（本番用）、インメモリ（テスト用、`test-utils`）
//! - **クライアントの生成は [`BusConnector`] 経由**: 診断用に 2 本目のクライアントを
//!   作れるよう、接続前のクライアントを生成する工場を注入する
//!
//! ## 配送の種類
//!
//! | 種類 | 宛先 | 用途 |
//! |------|------|------|
//! | メールボックス | クライアントのアドレス | 1 対 1 の要求・応答 |
//! | ストリーム | ストリーム名 + 件名パターン | 購読した件名のブロードキャスト |

mod pubsub;

use std::time::Duration;

use async_trait::async_trait;
pub use pubsub::{RedisBusClient, RedisBusConnector};
use serde::{Deserialize, Serialize};

use crate::InfraError;

/// 受信メッセージの配送種別
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryKind {
    /// 自分のアドレス宛ての直接配送
    Mailbox,
    /// 購読中のストリームからの配送
    Stream { stream: String },
}

/// バスから受信したメッセージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub kind:    DeliveryKind,
    /// 送信元アドレス（応答の宛先）
    pub sender:  String,
    /// 件名（トピック）
    pub subject: String,
    /// 本文フレーム
    pub frames:  Vec<String>,
}

/// バス上を流れるエンベロープ
///
/// 配送種別は購読チャネルから決まるため、エンベロープには含めない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender:  String,
    pub subject: String,
    pub frames:  Vec<String>,
}

impl Envelope {
    pub fn into_message(self, kind: DeliveryKind) -> BusMessage {
        BusMessage {
            kind,
            sender: self.sender,
            subject: self.subject,
            frames: self.frames,
        }
    }
}

/// バスクライアント
///
/// 1 つのアドレス（ID）でバスに接続し、メールボックスとストリームの
/// メッセージを受信する。
#[async_trait]
pub trait BusClient: Send {
    /// エンドポイントに接続し、`address` のメールボックスを開く
    ///
    /// `timeout` を過ぎても接続できない場合は失敗する。
    async fn connect(
        &mut self,
        endpoint: &str,
        timeout: Duration,
        address: &str,
    ) -> Result<(), InfraError>;

    /// 接続済みか
    fn is_connected(&self) -> bool;

    /// ストリームのうち件名が `pattern`（正規表現）に一致するものを購読する
    async fn set_consumer(&mut self, stream: &str, pattern: &str) -> Result<(), InfraError>;

    /// 発行先ストリームを設定する
    async fn set_producer(&mut self, stream: &str) -> Result<(), InfraError>;

    /// `address` のメールボックスへ直接送信する
    async fn send_to(
        &mut self,
        address: &str,
        subject: &str,
        frames: Vec<String>,
    ) -> Result<(), InfraError>;

    /// 次のメッセージを待つ
    ///
    /// 未接続の場合は永久に待機する（`tokio::select!` の分岐として使う前提）。
    async fn recv(&mut self) -> BusMessage;
}

/// 未接続のバスクライアントを生成する工場
pub trait BusConnector: Send + Sync {
    fn new_client(&self) -> Box<dyn BusClient>;
}
