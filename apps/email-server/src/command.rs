//! # 制御コマンド
//!
//! 制御チャネルで受け付けるコマンドを定義する。
//! 1 つ目のフレームがコマンド名（大文字小文字を区別する）、以降が引数となる。
//!
//! | コマンド | 引数 | 動作 |
//! |---------|------|------|
//! | `$TERM` | なし | ループを終了する |
//! | `LOAD` | 設定ファイルのパス | 設定を読み込み、接続・購読を行う |
//! | `_MSMTP_TEST` | 診断用リーダーのアドレス | 送信内容のミラーを有効にする |

use std::path::PathBuf;

pub const TERM: &str = "$TERM";
pub const LOAD: &str = "LOAD";
pub const MSMTP_TEST: &str = "_MSMTP_TEST";

/// 制御コマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Term,
    Load(PathBuf),
    MsmtpTest { reader: String },
    /// 未知のコマンド、または引数が不足しているコマンド
    Unknown(String),
}

impl ControlCommand {
    pub fn parse(frames: &[String]) -> Self {
        match frames {
            [] => Self::Unknown(String::new()),
            [cmd, ..] if cmd == TERM => Self::Term,
            [cmd, path, ..] if cmd == LOAD => Self::Load(PathBuf::from(path)),
            [cmd, reader, ..] if cmd == MSMTP_TEST => Self::MsmtpTest {
                reader: reader.clone(),
            },
            [cmd, ..] => Self::Unknown(cmd.clone()),
        }
    }

    /// 制御チャネルに送るフレーム列
    pub fn into_frames(self) -> Vec<String> {
        match self {
            Self::Term => vec![TERM.to_string()],
            Self::Load(path) => vec![LOAD.to_string(), path.to_string_lossy().into_owned()],
            Self::MsmtpTest { reader } => vec![MSMTP_TEST.to_string(), reader],
            Self::Unknown(cmd) => vec![cmd],
        }
    }
}
