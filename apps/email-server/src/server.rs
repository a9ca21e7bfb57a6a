//! # ディスパッチループ
//!
//! 制御チャネルとバスの 2 つの入力を待ち受け、コマンドの解釈・設定の再読み込み・
//! 要求の処理と応答送信を行うアクター。
//!
//! ## 状態
//!
//! アクターの状態はすべて [`EmailServer`] が所有し、単一タスクから操作される。
//! ロックは使わない。
//!
//! ## 再読み込み時の不変条件
//!
//! - バス接続は一度確立したら張り直さない
//! - 発行先ストリームは一度設定したら変更しない
//! - 購読は増える一方で、同じ (ストリーム, パターン) を二度購読しない
//!
//! ## 使用例
//!
//! ```rust,ignore
//! let server = EmailServer::new(options, Arc::new(RedisBusConnector), transport)?;
//! let handle = server.spawn();
//! handle.load("/etc/alertmail/email.toml").await?;
//! handle.terminate().await?;
//! ```

use std::{
    collections::BTreeSet,
    net::{IpAddr, Ipv4Addr, UdpSocket},
    ops::ControlFlow,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use alertmail_domain::delivery::Topic;
use alertmail_infra::{
    bus::{BusClient, BusConnector, BusMessage, DeliveryKind},
    transport::MailTransport,
};
use alertmail_shared::{
    event_log::{
        error::{category as error_category, kind as error_kind},
        event,
    },
    log_business_event,
    observability::BusTraceSwitch,
};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    command::ControlCommand,
    error::ServerError,
    live_config::{ConfigDocument, LiveConfig},
    usecase::notification::{
        BusMirrorObserver,
        Mailer,
        NotificationService,
        TemplateRenderer,
        mailer::TEST_CLIENT_ADDRESS,
    },
};

/// 送信専用モードでバスアドレスに付ける接尾辞
pub const SENDMAIL_ONLY_SUFFIX: &str = "-sendmail-only";

const CONTROL_CHANNEL_CAPACITY: usize = 16;

/// 動作モード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerMode {
    /// バスに接続し、設定された購読も行う
    #[default]
    Full,
    /// 送信専用。アドレスに接尾辞を付け、購読は行わない
    SendmailOnly,
}

/// アクターの起動オプション
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub mode:         ServerMode,
    /// 単一フレームの `SENDMAIL` で本文の先頭に付けるアドレス
    pub host_address: String,
    /// `malamute/verbose` で切り替えるバス送受信ログ
    pub bus_trace:    BusTraceSwitch,
}

impl ServerOptions {
    pub fn new(mode: ServerMode) -> Self {
        Self {
            mode,
            host_address: local_host_address(),
            bus_trace: BusTraceSwitch::detached(),
        }
    }
}

/// 外向きインターフェースのローカル IP アドレス
///
/// UDP ソケットの接続先選択だけを利用するため、パケットは送出しない。
/// 取得できない場合はループバックアドレスを返す。
pub fn local_host_address() -> String {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .ok()
        .filter(|ip| !ip.is_unspecified())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .to_string()
}

enum Event {
    /// `None` は制御チャネルが閉じたことを表す
    Control(Option<Vec<String>>),
    Bus(BusMessage),
}

/// 通知アクター
pub struct EmailServer {
    options:        ServerOptions,
    connector:      Arc<dyn BusConnector>,
    client:         Box<dyn BusClient>,
    live:           LiveConfig,
    subscriptions:  BTreeSet<(String, String)>,
    producer_bound: bool,
    /// 接続に成功したエンドポイント
    endpoint:       Option<String>,
    notifier:       NotificationService,
}

impl EmailServer {
    pub fn new(
        options: ServerOptions,
        connector: Arc<dyn BusConnector>,
        transport: Arc<dyn MailTransport>,
    ) -> Result<Self, ServerError> {
        let client = connector.new_client();
        let notifier = NotificationService::new(TemplateRenderer::new()?, Mailer::new(transport));

        Ok(Self {
            options,
            connector,
            client,
            live: LiveConfig::default(),
            subscriptions: BTreeSet::new(),
            producer_bound: false,
            endpoint: None,
            notifier,
        })
    }

    pub fn live_config(&self) -> &LiveConfig {
        &self.live
    }

    /// 購読済みの (ストリーム, パターン)
    pub fn subscriptions(&self) -> &BTreeSet<(String, String)> {
        &self.subscriptions
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// 制御コマンドを処理する
    ///
    /// ループを終了すべき場合は `Break` を返す。
    pub async fn handle_control(&mut self, frames: &[String]) -> ControlFlow<()> {
        match ControlCommand::parse(frames) {
            ControlCommand::Term => {
                tracing::info!("終了コマンドを受信しました");
                ControlFlow::Break(())
            }
            ControlCommand::Load(path) => self.reload(&path).await,
            ControlCommand::MsmtpTest { reader } => {
                self.install_test_observer(&reader).await;
                ControlFlow::Continue(())
            }
            ControlCommand::Unknown(command) => {
                tracing::error!(command = %command, "未知の制御コマンドです");
                ControlFlow::Continue(())
            }
        }
    }

    async fn reload(&mut self, path: &Path) -> ControlFlow<()> {
        let doc = match ConfigDocument::load(path) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::error!(
                    error.category = error_category::CONFIGURATION,
                    error = %e,
                    "設定ファイルを読み込めないため終了します"
                );
                return ControlFlow::Break(());
            }
        };

        for warning in self.live.apply(&doc) {
            tracing::warn!(
                error.category = error_category::CONFIGURATION,
                error.kind = error_kind::INVALID_VALUE,
                "{warning}"
            );
        }
        self.options.bus_trace.set(self.live.bus.verbose);

        log_business_event!(
            event.category = event::category::CONFIGURATION,
            event.action = event::action::CONFIG_LOADED,
            event.result = event::result::SUCCESS,
            path = %path.display(),
            "設定を読み込みました"
        );

        self.connect_if_needed().await;
        if self.client.is_connected() {
            match self.options.mode {
                ServerMode::Full => self.subscribe_consumers().await,
                ServerMode::SendmailOnly => {
                    tracing::debug!("送信専用モードのため購読を行いません");
                }
            }
            self.bind_producer().await;
        }

        ControlFlow::Continue(())
    }

    async fn connect_if_needed(&mut self) {
        if self.client.is_connected() {
            return;
        }

        let bus = &self.live.bus;
        let (Some(endpoint), Some(address)) = (bus.endpoint.clone(), bus.address.clone()) else {
            tracing::warn!(
                error.category = error_category::BUS,
                error.kind = error_kind::CONNECT,
                "malamute/endpoint または malamute/address が未設定のため接続しません"
            );
            return;
        };
        let address = match self.options.mode {
            ServerMode::Full => address,
            ServerMode::SendmailOnly => format!("{address}{SENDMAIL_ONLY_SUFFIX}"),
        };

        match self.client.connect(&endpoint, bus.timeout, &address).await {
            Ok(()) => {
                tracing::info!(endpoint = %endpoint, address = %address, "バスに接続しました");
                self.endpoint = Some(endpoint);
            }
            Err(e) => tracing::error!(
                error.category = error_category::BUS,
                error.kind = error_kind::CONNECT,
                endpoint = %endpoint,
                address = %address,
                error = %e,
                "バスへの接続に失敗しました"
            ),
        }
    }

    async fn subscribe_consumers(&mut self) {
        for (stream, pattern) in self.live.bus.consumers.clone() {
            let key = (stream, pattern);
            if self.subscriptions.contains(&key) {
                continue;
            }
            match self.client.set_consumer(&key.0, &key.1).await {
                Ok(()) => {
                    tracing::info!(stream = %key.0, pattern = %key.1, "ストリームを購読しました");
                    self.subscriptions.insert(key);
                }
                Err(e) => tracing::error!(
                    error.category = error_category::BUS,
                    error.kind = error_kind::SUBSCRIBE,
                    stream = %key.0,
                    pattern = %key.1,
                    error = %e,
                    "ストリームの購読に失敗しました"
                ),
            }
        }
    }

    async fn bind_producer(&mut self) {
        if self.producer_bound {
            return;
        }
        let Some(stream) = self.live.bus.producer.clone() else {
            return;
        };
        match self.client.set_producer(&stream).await {
            Ok(()) => {
                tracing::info!(stream = %stream, "発行先ストリームを設定しました");
                self.producer_bound = true;
            }
            Err(e) => tracing::error!(
                error.category = error_category::BUS,
                error.kind = error_kind::PRODUCER,
                stream = %stream,
                error = %e,
                "発行先ストリームの設定に失敗しました"
            ),
        }
    }

    /// 診断用クライアントを接続し、送信内容のミラーを有効にする
    ///
    /// 接続に失敗しても観測者は差し替える（ミラー送信は失敗としてログに残る）。
    async fn install_test_observer(&mut self, reader: &str) {
        let mut client = self.connector.new_client();
        match self.endpoint.as_deref() {
            Some(endpoint) => {
                if let Err(e) = client
                    .connect(endpoint, self.live.bus.timeout, TEST_CLIENT_ADDRESS)
                    .await
                {
                    tracing::error!(
                        error.category = error_category::BUS,
                        error.kind = error_kind::CONNECT,
                        endpoint = %endpoint,
                        error = %e,
                        "診断用クライアントの接続に失敗しました"
                    );
                }
            }
            None => tracing::warn!(
                error.category = error_category::BUS,
                error.kind = error_kind::CONNECT,
                "バスに未接続のため診断用クライアントを接続できません"
            ),
        }

        self.notifier
            .set_observer(Box::new(BusMirrorObserver::new(client, reader)));
        tracing::info!(reader = %reader, "診断用ミラーを有効にしました");
    }

    /// バスから届いたメッセージを処理し、送信元へ応答する
    pub async fn handle_bus_message(&mut self, message: BusMessage) {
        if let DeliveryKind::Stream { stream } = &message.kind {
            tracing::debug!(
                stream = %stream,
                subject = %message.subject,
                "ストリームのメッセージは処理しません"
            );
            return;
        }

        let Some((correlation_id, frames)) = message.frames.split_first() else {
            tracing::warn!(
                sender = %message.sender,
                subject = %message.subject,
                "相関 ID のないメッセージを無視します"
            );
            return;
        };

        let Ok(topic) = Topic::from_str(&message.subject) else {
            tracing::warn!(
                sender = %message.sender,
                subject = %message.subject,
                "未知のトピックです"
            );
            return;
        };

        let (subject, reply) = match topic.alert_channel() {
            None => {
                let reply = self
                    .notifier
                    .send_mail(&self.live, &self.options.host_address, correlation_id, frames)
                    .await;
                (reply.subject(), reply.frames(correlation_id))
            }
            Some(channel) => {
                let reply = self
                    .notifier
                    .notify_alert(&self.live, channel, correlation_id, frames)
                    .await;
                (channel.reply_subject(), reply.frames(correlation_id))
            }
        };

        if let Err(e) = self.client.send_to(&message.sender, subject, reply).await {
            tracing::error!(
                error.category = error_category::BUS,
                error.kind = error_kind::REPLY,
                recipient = %message.sender,
                subject = %subject,
                error = %e,
                "応答の送信に失敗しました"
            );
        }
    }

    /// 終了コマンドを受け取るか制御チャネルが閉じるまでループする
    pub async fn run(mut self, mut control: mpsc::Receiver<Vec<String>>) {
        tracing::info!(mode = ?self.options.mode, "Email Server を開始しました");

        loop {
            let event = tokio::select! {
                biased;
                frames = control.recv() => Event::Control(frames),
                message = self.client.recv() => Event::Bus(message),
            };

            match event {
                Event::Control(None) => {
                    tracing::info!("制御チャネルが閉じられました");
                    break;
                }
                Event::Control(Some(frames)) => {
                    if self.handle_control(&frames).await.is_break() {
                        break;
                    }
                }
                Event::Bus(message) => self.handle_bus_message(message).await,
            }
        }

        tracing::info!("Email Server を終了しました");
    }

    /// アクターをタスクとして起動する
    pub fn spawn(self) -> EmailServerHandle {
        let (control, rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let join = tokio::spawn(self.run(rx));
        EmailServerHandle { control, join }
    }
}

/// 起動したアクターへの制御ハンドル
pub struct EmailServerHandle {
    control: mpsc::Sender<Vec<String>>,
    join:    JoinHandle<()>,
}

impl EmailServerHandle {
    pub async fn send(&self, command: ControlCommand) -> Result<(), ServerError> {
        self.control
            .send(command.into_frames())
            .await
            .map_err(|_| ServerError::ActorStopped)
    }

    pub async fn load(&self, path: impl Into<PathBuf>) -> Result<(), ServerError> {
        self.send(ControlCommand::Load(path.into())).await
    }

    pub async fn msmtp_test(&self, reader: impl Into<String>) -> Result<(), ServerError> {
        self.send(ControlCommand::MsmtpTest {
            reader: reader.into(),
        })
        .await
    }

    /// 終了コマンドを送り、ループの終了を待つ
    pub async fn terminate(self) -> Result<(), ServerError> {
        if self.send(ControlCommand::Term).await.is_err() {
            tracing::debug!("アクターは既に終了しています");
        }
        self.join.await?;
        Ok(())
    }

    /// `interrupt` が完了するまで待ち、終了コマンドを送って終了する
    ///
    /// 割り込みより先にループが終了した場合は [`ServerError::ActorExited`] を返す。
    pub async fn run_until<F>(mut self, interrupt: F) -> Result<(), ServerError>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let interrupted = tokio::select! {
            result = interrupt => {
                result?;
                true
            }
            result = self.finished() => {
                result?;
                false
            }
        };

        if !interrupted {
            return Err(ServerError::ActorExited);
        }
        tracing::info!("割り込みを受信しました。終了します");
        self.terminate().await
    }

    /// ループの終了を待つ（ハンドルは保持したまま）
    pub async fn finished(&mut self) -> Result<(), ServerError> {
        (&mut self.join).await?;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
