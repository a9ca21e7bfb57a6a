//! # 稼働中の設定
//!
//! `LOAD` で読み込んだ設定ファイルを、稼働中の設定に上書き適用する。
//!
//! ## 適用の規則（存在によるマージ）
//!
//! - キーが存在しない、または値が空の場合は、現在の値を保持する
//! - 例外 1: `smtp/encryption` が存在しない場合は `NONE` に戻す
//! - 例外 2: `smtp/user` / `smtp/password` は `smtp/use_auth = true` の場合のみ適用する
//! - 解釈できない値（暗号化方式・言語・ポート・タイムアウト）は警告を出し、現在の値を保持する
//!
//! 適用はトランザクションではない。一部のキーだけが反映された状態も正当な結果である。
//!
//! ## 設定ファイルの形式
//!
//! `config` クレートが読める形式であればよい（拡張子で判定、既定は TOML）。
//! キーのパス `smtp/server` は文書内の `smtp.server` に対応する。
//!
//! ```toml
//! [server]
//! language = "en_US"
//!
//! [smtp]
//! server = "smtp.example.com"
//! port = 587
//! encryption = "STARTTLS"
//! use_auth = true
//! user = "monitor"
//! password = "secret"
//! from = "monitor@example.com"
//! verify_ca = true
//! gwtemplate = "0#####@hyper.mobile"
//!
//! [malamute]
//! endpoint = "redis://127.0.0.1/"
//! address = "fty-email"
//! timeout = 1000
//! producer = "notifications"
//!
//! [malamute.consumers]
//! alerts = [".*"]
//! ```

use std::{fmt, path::Path, str::FromStr, time::Duration};

use alertmail_domain::{
    mail::{Encryption, SmtpSettings},
    notification::Language,
};
use config::{Config, File, FileFormat};

use crate::error::ServerError;

/// バス接続タイムアウトの既定値
pub const DEFAULT_BUS_TIMEOUT: Duration = Duration::from_millis(1000);

/// 読み込んだ設定ファイル
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    inner: Config,
}

fn format_for(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => FileFormat::Json,
        Some("yaml" | "yml") => FileFormat::Yaml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    }
}

impl ConfigDocument {
    /// 設定ファイルを読み込む
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let to_error = |source| ServerError::ConfigDocument {
            path: path.to_path_buf(),
            source,
        };
        let inner = Config::builder()
            .add_source(File::from(path).format(format_for(path)).required(true))
            .build()
            .map_err(to_error)?;
        Ok(Self { inner })
    }

    /// TOML 文字列から読み込む
    pub fn from_toml(text: &str) -> Result<Self, config::ConfigError> {
        let inner = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?;
        Ok(Self { inner })
    }

    /// `smtp/server` 形式のキーで値を取得する
    ///
    /// 存在しないキーと空の値は `None` になる。
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner
            .get_string(&key.replace('/', "."))
            .ok()
            .filter(|value| !value.is_empty())
    }

    /// `malamute/consumers` の (ストリーム, パターン) 一覧
    ///
    /// 値は文字列または文字列の配列。ストリーム名順に並べて返す。
    /// テーブル自体が存在しない場合は `None`。
    pub fn consumers(&self) -> Option<Vec<(String, String)>> {
        let table = self.inner.get_table("malamute.consumers").ok()?;
        let mut consumers: Vec<(String, String)> = table
            .into_iter()
            .flat_map(|(stream, value)| {
                let patterns: Vec<String> = match value.clone().into_array() {
                    Ok(values) => values
                        .into_iter()
                        .filter_map(|v| v.into_string().ok())
                        .collect(),
                    Err(_) => value.into_string().ok().into_iter().collect(),
                };
                patterns
                    .into_iter()
                    .filter(|pattern| !pattern.is_empty())
                    .map(move |pattern| (stream.clone(), pattern))
            })
            .collect();
        consumers.sort();
        Some(consumers)
    }
}

/// 適用時に検出した不正な値
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    UnknownEncryption(String),
    UnknownLanguage(String),
    InvalidPort(String),
    InvalidTimeout(String),
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownEncryption(value) => write!(
                f,
                "smtp/encryption has unknown value, got {value}, expected (NONE|TLS|STARTTLS)"
            ),
            Self::UnknownLanguage(value) => write!(f, "server/language {value} is not supported"),
            Self::InvalidPort(value) => write!(f, "smtp/port is not a valid port: {value}"),
            Self::InvalidTimeout(value) => {
                write!(f, "malamute/timeout is not a valid number of milliseconds: {value}")
            }
        }
    }
}

/// バス接続の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSettings {
    pub endpoint:  Option<String>,
    pub address:   Option<String>,
    pub timeout:   Duration,
    pub verbose:   bool,
    /// 最後に読み込んだ購読設定
    pub consumers: Vec<(String, String)>,
    pub producer:  Option<String>,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            endpoint:  None,
            address:   None,
            timeout:   DEFAULT_BUS_TIMEOUT,
            verbose:   false,
            consumers: Vec::new(),
            producer:  None,
        }
    }
}

/// 稼働中の設定
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveConfig {
    pub language:    Language,
    pub sms_gateway: Option<String>,
    /// SMS ゲートウェイのアドレステンプレート
    pub gw_template: Option<String>,
    pub smtp:        SmtpSettings,
    pub bus:         BusSettings,
}

fn set_if_present(target: &mut Option<String>, value: Option<String>) {
    if value.is_some() {
        *target = value;
    }
}

/// 存在する値を解釈する。解釈できない場合は警告を積んで `None` を返す
fn parse_present<T: FromStr>(
    value: Option<String>,
    warning: impl FnOnce(String) -> ConfigWarning,
    warnings: &mut Vec<ConfigWarning>,
) -> Option<T> {
    let raw = value?;
    match raw.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warnings.push(warning(raw));
            None
        }
    }
}

impl LiveConfig {
    /// 設定ファイルを上書き適用する
    ///
    /// 解釈できなかった値を警告として返す（ログ出力は呼び出し側で行う）。
    pub fn apply(&mut self, doc: &ConfigDocument) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if let Some(language) = parse_present(
            doc.get("server/language"),
            ConfigWarning::UnknownLanguage,
            &mut warnings,
        ) {
            self.language = language;
        }
        set_if_present(&mut self.sms_gateway, doc.get("smtp/smsgateway"));
        set_if_present(&mut self.gw_template, doc.get("smtp/gwtemplate"));

        self.apply_smtp(doc, &mut warnings);
        self.apply_bus(doc, &mut warnings);

        warnings
    }

    fn apply_smtp(&mut self, doc: &ConfigDocument, warnings: &mut Vec<ConfigWarning>) {
        let smtp = &mut self.smtp;
        set_if_present(&mut smtp.msmtp_path, doc.get("smtp/msmtppath"));
        set_if_present(&mut smtp.host, doc.get("smtp/server"));
        if let Some(port) = parse_present(doc.get("smtp/port"), ConfigWarning::InvalidPort, warnings) {
            smtp.port = Some(port);
        }

        // 暗号化方式だけは、存在しない場合に NONE へ戻す
        match doc.get("smtp/encryption") {
            None => smtp.encryption = Encryption::None,
            Some(raw) => {
                if let Some(encryption) =
                    parse_present(Some(raw), ConfigWarning::UnknownEncryption, warnings)
                {
                    smtp.encryption = encryption;
                }
            }
        }

        if doc.get("smtp/use_auth").as_deref() == Some("true") {
            set_if_present(&mut smtp.username, doc.get("smtp/user"));
            set_if_present(&mut smtp.password, doc.get("smtp/password"));
        }

        set_if_present(&mut smtp.from, doc.get("smtp/from"));

        if let Some(verify_ca) = doc.get("smtp/verify_ca") {
            smtp.verify_ca = verify_ca == "true";
        }
    }

    fn apply_bus(&mut self, doc: &ConfigDocument, warnings: &mut Vec<ConfigWarning>) {
        let bus = &mut self.bus;

        if let Some(verbose) = doc.get("malamute/verbose") {
            bus.verbose = verbose.starts_with('1') || verbose == "true";
        }
        set_if_present(&mut bus.endpoint, doc.get("malamute/endpoint"));
        set_if_present(&mut bus.address, doc.get("malamute/address"));
        if let Some(millis) =
            parse_present(doc.get("malamute/timeout"), ConfigWarning::InvalidTimeout, warnings)
        {
            bus.timeout = Duration::from_millis(millis);
        }

        if let Some(consumers) = doc.consumers() {
            bus.consumers = consumers;
        }
        set_if_present(&mut bus.producer, doc.get("malamute/producer"));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn doc(text: &str) -> ConfigDocument {
        ConfigDocument::from_toml(text).unwrap()
    }

    const FULL: &str = r#"
[server]
language = "ja_JP"

[smtp]
server = "smtp.example.com"
port = 587
encryption = "starttls"
use_auth = true
user = "monitor"
password = "secret"
from = "monitor@example.com"
verify_ca = true
msmtppath = "/usr/bin/msmtp"
smsgateway = "hyper.mobile"
gwtemplate = "0#####@hyper.mobile"

[malamute]
verbose = 1
endpoint = "redis://127.0.0.1/"
address = "fty-email"
timeout = 2500
producer = "notifications"

[malamute.consumers]
metrics = "^cpu"
alerts = [".*", "^critical"]
"#;

    #[test]
    fn test_すべてのキーが適用される() {
        let mut live = LiveConfig::default();

        let warnings = live.apply(&doc(FULL));

        assert!(warnings.is_empty());
        assert_eq!(live.language, Language::JaJp);
        assert_eq!(live.sms_gateway.as_deref(), Some("hyper.mobile"));
        assert_eq!(live.gw_template.as_deref(), Some("0#####@hyper.mobile"));
        assert_eq!(
            live.smtp,
            SmtpSettings {
                msmtp_path: Some("/usr/bin/msmtp".to_string()),
                host:       Some("smtp.example.com".to_string()),
                port:       Some(587),
                encryption: Encryption::StartTls,
                username:   Some("monitor".to_string()),
                password:   Some("secret".to_string()),
                from:       Some("monitor@example.com".to_string()),
                verify_ca:  true,
            }
        );
        assert_eq!(
            live.bus,
            BusSettings {
                endpoint:  Some("redis://127.0.0.1/".to_string()),
                address:   Some("fty-email".to_string()),
                timeout:   Duration::from_millis(2500),
                verbose:   true,
                consumers: vec![
                    ("alerts".to_string(), ".*".to_string()),
                    ("alerts".to_string(), "^critical".to_string()),
                    ("metrics".to_string(), "^cpu".to_string()),
                ],
                producer:  Some("notifications".to_string()),
            }
        );
    }

    #[test]
    fn test_存在しないキーは現在の値を保持する() {
        let mut live = LiveConfig::default();
        live.apply(&doc(FULL));
        let before = live.clone();

        live.apply(&doc("[smtp]\nencryption = \"STARTTLS\"\n"));

        assert_eq!(live, before);
    }

    #[test]
    fn test_空の値は存在しないものとして扱う() {
        let mut live = LiveConfig::default();
        live.apply(&doc(FULL));

        live.apply(&doc("[smtp]\nserver = \"\"\nencryption = \"STARTTLS\"\n"));

        assert_eq!(live.smtp.host.as_deref(), Some("smtp.example.com"));
    }

    #[test]
    fn test_不正な暗号化方式は現在の値を保持して警告する() {
        let mut live = LiveConfig::default();
        live.apply(&doc("[smtp]\nencryption = \"TLS\"\n"));

        let warnings = live.apply(&doc("[smtp]\nencryption = \"bogus\"\n"));

        assert_eq!(live.smtp.encryption, Encryption::Tls);
        assert_eq!(
            warnings,
            vec![ConfigWarning::UnknownEncryption("bogus".to_string())]
        );
    }

    #[test]
    fn test_暗号化方式が存在しない場合はnoneに戻る() {
        let mut live = LiveConfig::default();
        live.apply(&doc("[smtp]\nencryption = \"TLS\"\n"));

        live.apply(&doc("[smtp]\nserver = \"smtp.example.com\"\n"));

        assert_eq!(live.smtp.encryption, Encryption::None);
    }

    #[rstest]
    #[case("false")]
    #[case("yes")]
    fn test_use_authがtrueでない場合は認証情報を適用しない(#[case] use_auth: &str) {
        let mut live = LiveConfig::default();

        live.apply(&doc(&format!(
            "[smtp]\nuse_auth = \"{use_auth}\"\nuser = \"monitor\"\npassword = \"secret\"\n"
        )));

        assert_eq!(live.smtp.username, None);
        assert_eq!(live.smtp.password, None);
    }

    #[rstest]
    #[case("1", true)]
    #[case("10", true)]
    #[case("true", true)]
    #[case("0", false)]
    #[case("false", false)]
    fn test_verboseは1で始まる値かtrueで有効になる(#[case] value: &str, #[case] expected: bool) {
        let mut live = LiveConfig::default();
        live.apply(&doc(&format!("[malamute]\nverbose = \"{value}\"\n")));
        assert_eq!(live.bus.verbose, expected);
    }

    #[test]
    fn test_不正な言語は現在の値を保持して警告する() {
        let mut live = LiveConfig::default();
        live.apply(&doc("[server]\nlanguage = \"ja_JP\"\n"));

        let warnings = live.apply(&doc("[server]\nlanguage = \"xx_XX\"\n"));

        assert_eq!(live.language, Language::JaJp);
        assert_eq!(
            warnings,
            vec![ConfigWarning::UnknownLanguage("xx_XX".to_string())]
        );
    }

    #[test]
    fn test_不正なポートとタイムアウトは警告して保持する() {
        let mut live = LiveConfig::default();
        live.apply(&doc("[smtp]\nport = 2525\n"));

        let warnings = live.apply(&doc(
            "[smtp]\nport = \"smtp\"\n[malamute]\ntimeout = \"soon\"\n",
        ));

        assert_eq!(live.smtp.port, Some(2525));
        assert_eq!(live.bus.timeout, DEFAULT_BUS_TIMEOUT);
        assert_eq!(
            warnings,
            vec![
                ConfigWarning::InvalidPort("smtp".to_string()),
                ConfigWarning::InvalidTimeout("soon".to_string()),
            ]
        );
    }

    #[test]
    fn test_verify_caは存在する場合のみ変更される() {
        let mut live = LiveConfig::default();
        live.apply(&doc("[smtp]\nverify_ca = true\n"));
        assert!(live.smtp.verify_ca);

        live.apply(&doc("[smtp]\nserver = \"smtp.example.com\"\n"));
        assert!(live.smtp.verify_ca);

        live.apply(&doc("[smtp]\nverify_ca = false\n"));
        assert!(!live.smtp.verify_ca);
    }

    #[test]
    fn test_存在しないファイルの読み込みはエラー() {
        let result = ConfigDocument::load(Path::new("/nonexistent/alertmail/config.toml"));
        assert!(matches!(result, Err(ServerError::ConfigDocument { .. })));
    }
}
