//! # テスト用モック
//!
//! ディスパッチループのテストで使用するインメモリのバスとトランスポート。
//! `test-utils` feature を有効にすることで、他クレートからも利用可能。
//!
//! ```toml
//! [dev-dependencies]
//! alertmail-infra = { workspace = true, features = ["test-utils"] }
//! ```

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use alertmail_domain::{
    NotificationError,
    mail::{OutgoingMail, SmtpSettings},
};
use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Notify;

use crate::{
    bus::{BusClient, BusConnector, BusMessage, DeliveryKind},
    error::InfraError,
    transport::MailTransport,
};

// ===== InMemoryBroker =====

#[derive(Default)]
struct BrokerState {
    mailboxes: HashMap<String, VecDeque<BusMessage>>,
    /// (address, stream, pattern)
    consumers: Vec<(String, String, String)>,
    /// (address, stream)
    producers: Vec<(String, String)>,
    connected: Vec<String>,
}

/// インメモリのメッセージバス
///
/// エンドポイント名を 1 つ持ち、それ以外のエンドポイントへの接続は失敗する。
/// メールボックスは接続前から存在し、届いたメッセージは接続まで保持される。
#[derive(Clone)]
pub struct InMemoryBroker {
    endpoint: String,
    state:    Arc<Mutex<BrokerState>>,
    notify:   Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            state:    Arc::new(Mutex::new(BrokerState::default())),
            notify:   Arc::new(Notify::new()),
        }
    }

    /// 未接続のクライアントを生成する
    pub fn client(&self) -> InMemoryBusClient {
        InMemoryBusClient {
            broker:  self.clone(),
            address: None,
        }
    }

    /// 接続済みのクライアントを生成する（テストの相手役用）
    pub fn connected_client(&self, address: &str) -> InMemoryBusClient {
        let client = InMemoryBusClient {
            broker:  self.clone(),
            address: Some(address.to_string()),
        };
        self.lock().connected.push(address.to_string());
        client
    }

    /// 購読の呼び出し履歴 `(address, stream, pattern)`
    pub fn consumer_calls(&self) -> Vec<(String, String, String)> {
        self.lock().consumers.clone()
    }

    /// 発行先設定の呼び出し履歴 `(address, stream)`
    pub fn producer_calls(&self) -> Vec<(String, String)> {
        self.lock().producers.clone()
    }

    /// 接続したアドレスの履歴
    pub fn connected_addresses(&self) -> Vec<String> {
        self.lock().connected.clone()
    }

    /// ストリームへ発行する
    ///
    /// 購読パターンに件名が一致するクライアントのメールボックスへ配送する。
    pub fn publish(&self, stream: &str, sender: &str, subject: &str, frames: Vec<String>) {
        {
            let mut state = self.lock();
            let targets: Vec<String> = state
                .consumers
                .iter()
                .filter(|(_, s, pattern)| {
                    s == stream && Regex::new(pattern).is_ok_and(|re| re.is_match(subject))
                })
                .map(|(address, _, _)| address.clone())
                .collect();
            for address in targets {
                state
                    .mailboxes
                    .entry(address)
                    .or_default()
                    .push_back(BusMessage {
                        kind:    DeliveryKind::Stream {
                            stream: stream.to_string(),
                        },
                        sender:  sender.to_string(),
                        subject: subject.to_string(),
                        frames:  frames.clone(),
                    });
            }
        }
        self.notify.notify_waiters();
    }

    fn deliver(&self, address: &str, message: BusMessage) {
        self.lock()
            .mailboxes
            .entry(address.to_string())
            .or_default()
            .push_back(message);
        self.notify.notify_waiters();
    }

    fn pop(&self, address: &str) -> Option<BusMessage> {
        self.lock().mailboxes.get_mut(address)?.pop_front()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }
}

impl BusConnector for InMemoryBroker {
    fn new_client(&self) -> Box<dyn BusClient> {
        Box::new(self.client())
    }
}

/// [`InMemoryBroker`] のクライアント
pub struct InMemoryBusClient {
    broker:  InMemoryBroker,
    address: Option<String>,
}

impl InMemoryBusClient {
    fn address(&self) -> Result<&str, InfraError> {
        self.address.as_deref().ok_or_else(InfraError::not_connected)
    }

    /// 次のメッセージを待つ（タイムアウト付き）
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<BusMessage> {
        tokio::time::timeout(timeout, self.recv()).await.ok()
    }
}

#[async_trait]
impl BusClient for InMemoryBusClient {
    async fn connect(
        &mut self,
        endpoint: &str,
        _timeout: Duration,
        address: &str,
    ) -> Result<(), InfraError> {
        if endpoint != self.broker.endpoint {
            return Err(InfraError::invalid_input(format!(
                "cannot connect to {endpoint}"
            )));
        }
        self.address = Some(address.to_string());
        self.broker.lock().connected.push(address.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.address.is_some()
    }

    async fn set_consumer(&mut self, stream: &str, pattern: &str) -> Result<(), InfraError> {
        Regex::new(pattern).map_err(|e| InfraError::invalid_input(e.to_string()))?;
        let address = self.address()?.to_string();
        self.broker
            .lock()
            .consumers
            .push((address, stream.to_string(), pattern.to_string()));
        Ok(())
    }

    async fn set_producer(&mut self, stream: &str) -> Result<(), InfraError> {
        let address = self.address()?.to_string();
        self.broker
            .lock()
            .producers
            .push((address, stream.to_string()));
        Ok(())
    }

    async fn send_to(
        &mut self,
        address: &str,
        subject: &str,
        frames: Vec<String>,
    ) -> Result<(), InfraError> {
        let sender = self.address()?.to_string();
        self.broker.deliver(
            address,
            BusMessage {
                kind: DeliveryKind::Mailbox,
                sender,
                subject: subject.to_string(),
                frames,
            },
        );
        Ok(())
    }

    async fn recv(&mut self) -> BusMessage {
        let Some(address) = self.address.clone() else {
            return std::future::pending().await;
        };
        loop {
            // 取り出し前に待機を登録し、取りこぼしを防ぐ
            let notified = self.broker.notify.notified();
            if let Some(message) = self.broker.pop(&address) {
                return message;
            }
            notified.await;
        }
    }
}

// ===== MockMailTransport =====

/// 送信内容を記録するモックトランスポート
///
/// [`fail_with`](Self::fail_with) で設定した文言で失敗させることができる。
#[derive(Clone, Default)]
pub struct MockMailTransport {
    sent:    Arc<Mutex<Vec<(SmtpSettings, OutgoingMail)>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl MockMailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以降の送信を `message` で失敗させる
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock().unwrap() = Some(message.into());
    }

    /// 送信試行（失敗を含む）の履歴
    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, mail)| mail.clone())
            .collect()
    }

    /// 最後の送信試行で使われた設定
    pub fn last_settings(&self) -> Option<SmtpSettings> {
        self.sent
            .lock()
            .unwrap()
            .last()
            .map(|(settings, _)| settings.clone())
    }
}

#[async_trait]
impl MailTransport for MockMailTransport {
    async fn send(
        &self,
        settings: &SmtpSettings,
        mail: &OutgoingMail,
    ) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .unwrap()
            .push((settings.clone(), mail.clone()));
        match self.failure.lock().unwrap().clone() {
            Some(message) => Err(NotificationError::SendFailed(message)),
            None => Ok(()),
        }
    }
}
