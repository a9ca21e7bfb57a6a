//! Redis Pub/Sub によるバスクライアント
//!
//! ## チャネル設計
//!
//! | チャネル | 値 | 用途 |
//! |---------|-----|------|
//! | `mailbox:{address}` | [`Envelope`] (JSON) | クライアント宛ての直接配送 |
//! | `stream:{name}` | [`Envelope`] (JSON) | ストリームへのブロードキャスト |
//!
//! 購読ごとに専用の Pub/Sub 接続とリスナータスクを持ち、受信したエンベロープを
//! クライアント内の受信キューへ転送する。送信は `ConnectionManager` で行う。

use std::time::Duration;

use alertmail_shared::observability::BUS_TRAFFIC_TARGET;
use async_trait::async_trait;
use futures::StreamExt;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use regex::Regex;
use tokio::{sync::mpsc, task::JoinHandle};

use super::{BusClient, BusConnector, BusMessage, DeliveryKind, Envelope};
use crate::InfraError;

fn mailbox_channel(address: &str) -> String {
    format!("mailbox:{address}")
}

fn stream_channel(stream: &str) -> String {
    format!("stream:{stream}")
}

/// [`RedisBusClient`] を生成する
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisBusConnector;

impl BusConnector for RedisBusConnector {
    fn new_client(&self) -> Box<dyn BusClient> {
        Box::new(RedisBusClient::default())
    }
}

/// 接続中の状態
struct Session {
    client:    Client,
    publisher: ConnectionManager,
    address:   String,
    inbox_tx:  mpsc::UnboundedSender<BusMessage>,
    inbox_rx:  mpsc::UnboundedReceiver<BusMessage>,
    listeners: Vec<JoinHandle<()>>,
    producer:  Option<String>,
}

impl Drop for Session {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }
}

/// Redis Pub/Sub 上のバスクライアント
#[derive(Default)]
pub struct RedisBusClient {
    session: Option<Session>,
}

impl RedisBusClient {
    fn session_mut(&mut self) -> Result<&mut Session, InfraError> {
        self.session.as_mut().ok_or_else(InfraError::not_connected)
    }
}

/// チャネルを購読し、受信したエンベロープを `inbox` へ転送するタスクを起動する
///
/// `filter` が指定された場合、件名が一致しないメッセージは捨てる。
async fn spawn_listener(
    client: &Client,
    channel: String,
    kind: DeliveryKind,
    filter: Option<Regex>,
    inbox: mpsc::UnboundedSender<BusMessage>,
) -> Result<JoinHandle<()>, InfraError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(&channel).await?;

    Ok(tokio::spawn(async move {
        let mut messages = pubsub.into_on_message();
        while let Some(msg) = messages.next().await {
            let envelope: Envelope = match serde_json::from_slice(msg.get_payload_bytes()) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "不正なエンベロープを破棄しました");
                    continue;
                }
            };
            if filter
                .as_ref()
                .is_some_and(|pattern| !pattern.is_match(&envelope.subject))
            {
                continue;
            }
            if inbox.send(envelope.into_message(kind.clone())).is_err() {
                break;
            }
        }
        tracing::debug!(channel = %channel, "購読を終了しました");
    }))
}

#[async_trait]
impl BusClient for RedisBusClient {
    async fn connect(
        &mut self,
        endpoint: &str,
        timeout: Duration,
        address: &str,
    ) -> Result<(), InfraError> {
        if self.session.is_some() {
            return Err(InfraError::invalid_input("既に接続済みです"));
        }

        let client = Client::open(endpoint)?;
        let publisher = tokio::time::timeout(timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| InfraError::timeout(timeout))??;

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let mailbox = tokio::time::timeout(
            timeout,
            spawn_listener(
                &client,
                mailbox_channel(address),
                DeliveryKind::Mailbox,
                None,
                inbox_tx.clone(),
            ),
        )
        .await
        .map_err(|_| InfraError::timeout(timeout))??;

        self.session = Some(Session {
            client,
            publisher,
            address: address.to_string(),
            inbox_tx,
            inbox_rx,
            listeners: vec![mailbox],
            producer: None,
        });
        tracing::info!(endpoint, address, "バスに接続しました");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn set_consumer(&mut self, stream: &str, pattern: &str) -> Result<(), InfraError> {
        let filter = Regex::new(pattern)
            .map_err(|e| InfraError::invalid_input(format!("不正な購読パターン {pattern}: {e}")))?;
        let session = self.session_mut()?;

        let listener = spawn_listener(
            &session.client,
            stream_channel(stream),
            DeliveryKind::Stream {
                stream: stream.to_string(),
            },
            Some(filter),
            session.inbox_tx.clone(),
        )
        .await?;
        session.listeners.push(listener);
        Ok(())
    }

    async fn set_producer(&mut self, stream: &str) -> Result<(), InfraError> {
        let session = self.session_mut()?;
        if session.producer.as_deref() == Some(stream) {
            return Ok(());
        }
        session.producer = Some(stream.to_string());
        tracing::info!(stream, address = %session.address, "発行先ストリームを設定しました");
        Ok(())
    }

    async fn send_to(
        &mut self,
        address: &str,
        subject: &str,
        frames: Vec<String>,
    ) -> Result<(), InfraError> {
        let session = self.session_mut()?;
        let payload = serde_json::to_string(&Envelope {
            sender: session.address.clone(),
            subject: subject.to_string(),
            frames,
        })?;

        let receivers: i64 = session
            .publisher
            .publish(mailbox_channel(address), payload)
            .await?;
        tracing::trace!(
            target: BUS_TRAFFIC_TARGET,
            to = address,
            subject,
            receivers,
            "メールボックスへ送信しました"
        );
        Ok(())
    }

    async fn recv(&mut self) -> BusMessage {
        let Some(session) = self.session.as_mut() else {
            return std::future::pending().await;
        };
        // 送信側をセッション自身が保持しているため、受信キューは閉じない
        let Some(message) = session.inbox_rx.recv().await else {
            return std::future::pending().await;
        };
        tracing::trace!(
            target: BUS_TRAFFIC_TARGET,
            from = %message.sender,
            subject = %message.subject,
            kind = ?message.kind,
            "メッセージを受信しました"
        );
        message
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_チャネル名はアドレスとストリーム名から決まる() {
        assert_eq!(mailbox_channel("fty-email"), "mailbox:fty-email");
        assert_eq!(stream_channel("ALERTS"), "stream:ALERTS");
    }

    #[test]
    fn test_クライアントはsendを実装している() {
        fn assert_send<T: Send>() {}
        assert_send::<RedisBusClient>();
    }

    #[tokio::test]
    async fn test_未接続のクライアントは操作に失敗する() {
        let mut client = RedisBusConnector.new_client();

        assert!(!client.is_connected());
        assert!(client.set_producer("ALERTS").await.is_err());
        assert!(client.set_consumer("ALERTS", ".*").await.is_err());
        assert!(client.send_to("peer", "X", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_不正な購読パターンは入力エラーになる() {
        let mut client = RedisBusClient::default();
        let err = client.set_consumer("ALERTS", "(").await.unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::InfraErrorKind::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn test_未接続のrecvは完了しない() {
        let mut client = RedisBusClient::default();
        let result = tokio::time::timeout(Duration::from_millis(20), client.recv()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_不正なエンドポイントへの接続は失敗する() {
        let mut client = RedisBusClient::default();
        let result = client
            .connect("not a url", Duration::from_millis(100), "fty-email")
            .await;
        assert!(result.is_err());
        assert!(!client.is_connected());
    }
}
