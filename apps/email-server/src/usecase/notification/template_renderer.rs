//! # テンプレートレンダラー
//!
//! tera テンプレートエンジンでアラートを通知メールの件名・本文に翻訳する。
//!
//! ## 設計方針
//!
//! - **`include_str!` によるコンパイル時埋め込み**: テンプレートはバイナリに埋め込まれる
//! - **言語ごとのテンプレート**: `{言語}/subject.txt` と `{言語}/body.txt`
//! - **件名パターン（en_US）**: `{severity} alert on {asset} from the rule {rule} is {state}!`
//!
//! ## 説明文の翻訳エンベロープ
//!
//! アラートの説明文は、平文のほかに次の JSON を取り得る。
//!
//! ```json
//! {"key": "Device {{ device }} does not provide expected data.", "variables": {"device": "ups-1"}}
//! ```
//!
//! この場合 `key` を `variables` でレンダリングした結果を説明文とする。

use alertmail_domain::{
    NotificationError,
    alert::Alert,
    notification::{Language, NotificationContent},
};
use serde::Deserialize;
use tera::{Context, Tera};

/// 説明文の翻訳エンベロープ
#[derive(Debug, Deserialize)]
struct TranslationEnvelope {
    key:       String,
    #[serde(default)]
    variables: serde_json::Map<String, serde_json::Value>,
}

/// 説明文を表示用の文字列にする
///
/// 翻訳エンベロープでない場合、またはレンダリングに失敗した場合は元の文字列を使う。
fn render_description(description: &str) -> String {
    let Ok(envelope) = serde_json::from_str::<TranslationEnvelope>(description) else {
        return description.to_string();
    };
    Context::from_serialize(&envelope.variables)
        .and_then(|context| Tera::one_off(&envelope.key, &context, false))
        .unwrap_or(envelope.key)
}

/// テンプレートレンダラー
pub struct TemplateRenderer {
    engine: Tera,
}

impl TemplateRenderer {
    /// 新しいレンダラーインスタンスを作成
    ///
    /// `include_str!` で埋め込んだテンプレートを tera に登録する。
    pub fn new() -> Result<Self, NotificationError> {
        let mut engine = Tera::default();

        engine
            .add_raw_templates(vec![
                (
                    "en_US/subject.txt",
                    include_str!("../../../templates/alert/en_US/subject.txt"),
                ),
                (
                    "en_US/body.txt",
                    include_str!("../../../templates/alert/en_US/body.txt"),
                ),
                (
                    "ja_JP/subject.txt",
                    include_str!("../../../templates/alert/ja_JP/subject.txt"),
                ),
                (
                    "ja_JP/body.txt",
                    include_str!("../../../templates/alert/ja_JP/body.txt"),
                ),
            ])
            .map_err(|e| NotificationError::TemplateFailed(e.to_string()))?;

        Ok(Self { engine })
    }

    /// アラートから通知の件名と本文を生成する
    ///
    /// 入力の検証（空文字列の拒否）は呼び出し前に済んでいることを前提とする。
    pub fn compose(
        &self,
        language: Language,
        alert: &Alert,
        priority: &str,
        asset_name: &str,
    ) -> Result<NotificationContent, NotificationError> {
        let language: &str = language.into();

        let mut context = Context::new();
        context.insert("rule", &alert.rule);
        context.insert("asset", asset_name);
        context.insert("priority", priority);
        context.insert("severity", &alert.severity);
        context.insert("state", &alert.state);
        context.insert("description", &render_description(&alert.description));

        let subject = self
            .engine
            .render(&format!("{language}/subject.txt"), &context)
            .map_err(|e| NotificationError::TemplateFailed(e.to_string()))?;
        let body = self
            .engine
            .render(&format!("{language}/body.txt"), &context)
            .map_err(|e| NotificationError::TemplateFailed(e.to_string()))?;

        Ok(NotificationContent {
            subject: subject.trim().to_string(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn alert() -> Alert {
        Alert {
            rule:        "NY_RULE".to_string(),
            name:        "ASSET1".to_string(),
            state:       "ACTIVE".to_string(),
            severity:    "CRITICAL".to_string(),
            description: "Device does not provide expected data.".to_string(),
            time:        1_700_000_000,
            ttl:         600,
            actions:     vec!["EMAIL".to_string()],
        }
    }

    #[test]
    fn test_英語の件名は重大度とアセットを含む() {
        let renderer = TemplateRenderer::new().unwrap();

        let content = renderer
            .compose(Language::EnUs, &alert(), "1", "ASSET1")
            .unwrap();

        assert_eq!(
            content.subject,
            "CRITICAL alert on ASSET1 from the rule ny_rule is active!"
        );
    }

    #[test]
    fn test_英語の本文はアラートの全項目を含む() {
        let renderer = TemplateRenderer::new().unwrap();

        let content = renderer
            .compose(Language::EnUs, &alert(), "1", "ASSET1")
            .unwrap();

        assert_eq!(
            content.body.trim_end(),
            "In the system an alert was detected.\n\
             Source rule: NY_RULE\n\
             Asset: ASSET1\n\
             Alert priority: P1\n\
             Alert severity: CRITICAL\n\
             Alert description: Device does not provide expected data.\n\
             Alert state: ACTIVE"
        );
    }

    #[test]
    fn test_日本語テンプレートを選択できる() {
        let renderer = TemplateRenderer::new().unwrap();

        let content = renderer
            .compose(Language::JaJp, &alert(), "2", "ASSET1")
            .unwrap();

        assert!(content.subject.contains("【CRITICAL】ASSET1"));
        assert!(content.body.contains("優先度: P2"));
    }

    #[test]
    fn test_翻訳エンベロープの説明文は変数を埋め込む() {
        let renderer = TemplateRenderer::new().unwrap();
        let alert = Alert {
            description: r#"{"key":"Device {{ device }} is offline.","variables":{"device":"ups-1"}}"#
                .to_string(),
            ..alert()
        };

        let content = renderer
            .compose(Language::EnUs, &alert, "1", "ASSET1")
            .unwrap();

        assert!(content.body.contains("Alert description: Device ups-1 is offline.\n"));
    }

    #[test]
    fn test_変数のない翻訳エンベロープはキーをそのまま使う() {
        assert_eq!(render_description(r#"{"key":"Plain key"}"#), "Plain key");
    }

    #[test]
    fn test_jsonでない説明文はそのまま使う() {
        assert_eq!(render_description("{not json"), "{not json");
    }
}
