//! # アラートレコード
//!
//! 監視ルールが発報したアラートイベントのデコード済み表現。
//!
//! ## ワイヤ形式
//!
//! アラートは 1 フレームの JSON オブジェクトとして運ばれる。
//!
//! ```json
//! {
//!   "rule": "NY_RULE",
//!   "name": "ASSET1",
//!   "state": "ACTIVE",
//!   "severity": "CRITICAL",
//!   "description": "Device ASSET1 does not provide expected data.",
//!   "time": 1700000000,
//!   "ttl": 600,
//!   "actions": ["EMAIL"]
//! }
//! ```
//!
//! `ttl` と `actions` は省略可能。

use serde::{Deserialize, Serialize};

use crate::NotificationError;

/// アラートレコード
///
/// 1 回のディスパッチの間だけ生存し、翻訳処理から読み取り専用で参照される。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// 発報したルールの識別子
    pub rule:        String,
    /// 対象アセット名
    pub name:        String,
    /// 状態（例: `ACTIVE`, `RESOLVED`）
    pub state:       String,
    /// 重大度（例: `CRITICAL`, `WARNING`）
    pub severity:    String,
    /// 説明文（翻訳エンベロープ JSON の場合もある）
    pub description: String,
    /// 発報時刻（UNIX 秒）
    pub time:        u64,
    /// 有効期間（秒）
    #[serde(default)]
    pub ttl:         u64,
    /// 要求されたアクション種別（例: `EMAIL`, `SMS`）
    #[serde(default)]
    pub actions:     Vec<String>,
}

impl Alert {
    /// ワイヤ形式（1 フレーム）にエンコードする
    pub fn encode(&self) -> String {
        // フィールドはすべて String / 整数のため直列化は失敗しない
        serde_json::to_string(self).unwrap_or_default()
    }

    /// 残りフレームからアラートをデコードする
    ///
    /// ちょうど 1 フレームの JSON オブジェクトであることを要求する。
    pub fn decode(frames: &[String]) -> Result<Self, NotificationError> {
        match frames {
            [] => Err(NotificationError::MalformedAlert(
                "alert frame is missing".to_string(),
            )),
            [frame] => serde_json::from_str(frame)
                .map_err(|e| NotificationError::MalformedAlert(e.to_string())),
            _ => Err(NotificationError::MalformedAlert(format!(
                "expected 1 alert frame, got {}",
                frames.len()
            ))),
        }
    }
}
