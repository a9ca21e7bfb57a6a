//! # Observability 基盤
//!
//! トレーシング初期化とログ出力形式の設定を提供する。
//!
//! - `LOG_FORMAT` による JSON / Pretty 出力の切り替え
//! - バス送受信ログ（[`BUS_TRAFFIC_TARGET`]）の実行時切り替え
//!
//! バス送受信ログは設定ファイルの `malamute/verbose` に従って
//! [`BusTraceSwitch`] でフィルタを差し替える。`RUST_LOG` の指定はそのまま残る。

/// バス送受信ログのターゲット
pub const BUS_TRAFFIC_TARGET: &str = "alertmail::bus";

/// `RUST_LOG` 未設定時のフィルタ
pub const DEFAULT_FILTER: &str = "info,alertmail=debug";

/// ベースのフィルタ指定にバス送受信ログの指定を加える
pub fn filter_directives(base: &str, bus_trace: bool) -> String {
    if bus_trace {
        format!("{base},{BUS_TRAFFIC_TARGET}=trace")
    } else {
        base.to_string()
    }
}

/// ログ出力形式
///
/// 環境変数 `LOG_FORMAT` で切り替える。
/// 値が未設定または不正な場合は [`Pretty`](LogFormat::Pretty) にフォールバックする。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON 形式（本番環境向け）
    Json,
    /// 人間が読みやすい形式（開発環境向け）
    #[default]
    Pretty,
}

impl LogFormat {
    /// 文字列からログ形式をパースする
    ///
    /// 不正な値の場合は [`Pretty`](LogFormat::Pretty) にフォールバックし、
    /// stderr に警告を出力する。
    pub fn parse(s: &str) -> Self {
        match s {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            other => {
                eprintln!("WARNING: unknown LOG_FORMAT={other:?}, falling back to pretty");
                Self::Pretty
            }
        }
    }

    /// 環境変数 `LOG_FORMAT` から読み取る
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(val) => Self::parse(&val),
            Err(_) => Self::default(),
        }
    }
}

/// トレーシング初期化設定
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// サービス名（初期化ログの `service` フィールドに出力）
    pub service_name: String,
    /// ログ出力形式
    pub log_format:   LogFormat,
}

impl TracingConfig {
    pub fn new(service_name: impl Into<String>, log_format: LogFormat) -> Self {
        Self {
            service_name: service_name.into(),
            log_format,
        }
    }

    /// 環境変数から設定を読み取る
    pub fn from_env(service_name: impl Into<String>) -> Self {
        Self::new(service_name, LogFormat::from_env())
    }
}

#[cfg(feature = "observability")]
type FilterHandle =
    tracing_subscriber::reload::Handle<tracing_subscriber::EnvFilter, tracing_subscriber::Registry>;

/// バス送受信ログの切り替えスイッチ
///
/// [`init_tracing`] が返すものはグローバルなフィルタを差し替える。
/// [`detached`](BusTraceSwitch::detached) は状態だけを保持する。
#[cfg(feature = "observability")]
#[derive(Clone)]
pub struct BusTraceSwitch {
    enabled: std::sync::Arc<std::sync::atomic::AtomicBool>,
    base:    String,
    handle:  Option<FilterHandle>,
}

#[cfg(feature = "observability")]
impl BusTraceSwitch {
    fn new(base: String, handle: Option<FilterHandle>) -> Self {
        Self {
            enabled: std::sync::Arc::default(),
            base,
            handle,
        }
    }

    /// フィルタを持たないスイッチ
    pub fn detached() -> Self {
        Self::new(DEFAULT_FILTER.to_string(), None)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// バス送受信ログを有効 / 無効にする
    ///
    /// 状態が変わらない場合はフィルタを作り直さない。
    pub fn set(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, std::sync::atomic::Ordering::Relaxed);
        if previous == enabled {
            return;
        }
        let Some(handle) = &self.handle else {
            return;
        };
        if let Err(e) = handle.reload(build_filter(&self.base, enabled)) {
            tracing::warn!(error = %e, "ログフィルタを更新できませんでした");
        }
    }
}

#[cfg(feature = "observability")]
impl std::fmt::Debug for BusTraceSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusTraceSwitch")
            .field("enabled", &self.is_enabled())
            .field("base", &self.base)
            .field("attached", &self.handle.is_some())
            .finish()
    }
}

#[cfg(feature = "observability")]
impl Default for BusTraceSwitch {
    fn default() -> Self {
        Self::detached()
    }
}

#[cfg(feature = "observability")]
fn build_filter(base: &str, bus_trace: bool) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_new(filter_directives(base, bus_trace))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER))
}

/// トレーシングを初期化する
///
/// `RUST_LOG` 環境変数でログレベルを制御可能。
/// 未設定または解釈できない場合は [`DEFAULT_FILTER`] を使う。
///
/// `tracing_error::ErrorLayer` も登録するため、インフラ層のエラーが
/// 生成時点の `SpanTrace` を保持できる。
#[cfg(feature = "observability")]
pub fn init_tracing(config: TracingConfig) -> BusTraceSwitch {
    use tracing_subscriber::{Layer as _, layer::SubscriberExt, reload, util::SubscriberInitExt};

    let base = std::env::var("RUST_LOG")
        .ok()
        .filter(|value| tracing_subscriber::EnvFilter::try_new(value).is_ok())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string());
    let (filter, handle) = reload::Layer::new(build_filter(&base, false));

    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(tracing_error::ErrorLayer::default())
        .init();

    tracing::debug!(
        service = %config.service_name,
        format = ?config.log_format,
        filter = %base,
        "トレーシングを初期化しました"
    );

    BusTraceSwitch::new(base, Some(handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_jsonでjsonを返す() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    }

    #[test]
    fn test_parse_不正な値でprettyにフォールバックする() {
        assert_eq!(LogFormat::parse("unknown"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Pretty);
    }

    #[test]
    fn test_バス送受信ログ有効時はターゲット指定が追加される() {
        assert_eq!(filter_directives("warn", false), "warn");
        assert_eq!(filter_directives("warn", true), "warn,alertmail::bus=trace");
    }

    #[cfg(feature = "observability")]
    mod switch {
        use std::sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        };

        use tracing_subscriber::{Layer, Registry, layer::SubscriberExt, reload};

        use super::super::*;

        struct CountingLayer(Arc<AtomicUsize>);

        impl<S: tracing::Subscriber> Layer<S> for CountingLayer {
            fn on_event(
                &self,
                _event: &tracing::Event<'_>,
                _ctx: tracing_subscriber::layer::Context<'_, S>,
            ) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        #[test]
        fn test_スイッチでバス送受信ログの出力が切り替わる() {
            let count = Arc::new(AtomicUsize::new(0));
            let (filter, handle) = reload::Layer::new(build_filter("warn", false));
            let subscriber = Registry::default()
                .with(filter)
                .with(CountingLayer(Arc::clone(&count)));
            let switch = BusTraceSwitch::new("warn".to_string(), Some(handle));

            tracing::subscriber::with_default(subscriber, || {
                tracing::trace!(target: BUS_TRAFFIC_TARGET, "before");
                assert_eq!(count.load(Ordering::SeqCst), 0);

                switch.set(true);
                tracing::trace!(target: BUS_TRAFFIC_TARGET, "enabled");
                assert_eq!(count.load(Ordering::SeqCst), 1);

                switch.set(false);
                tracing::trace!(target: BUS_TRAFFIC_TARGET, "disabled");
                assert_eq!(count.load(Ordering::SeqCst), 1);
            });
            assert!(!switch.is_enabled());
        }

        #[test]
        fn test_フィルタを持たないスイッチは状態だけを保持する() {
            let switch = BusTraceSwitch::detached();
            assert!(!switch.is_enabled());

            switch.set(true);

            assert!(switch.is_enabled());
            assert!(switch.clone().is_enabled());
        }
    }
}
