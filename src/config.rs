//! エンジン設定
//!
//! 履歴の深さ・結合ウィンドウ、選択範囲の接触規則、行区切り、
//! 既定の行の高さなどをまとめて管理する

use crate::bidi::Direction;
use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// エンジン設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DocConfig {
    /// 保持する履歴グループの最大数
    pub undo_depth: usize,
    /// 同一originの編集を結合する時間窓（ミリ秒）
    pub history_event_delay_ms: u64,
    /// 接触しているだけの非空範囲を結合せずに残すか
    pub selections_may_touch: bool,
    /// 行区切り（Noneなら \r\n, \r, \n で分割し \n で結合）
    pub line_separator: Option<String>,
    /// 既定の行の高さ
    pub line_height: f64,
    /// 基本の文字方向
    pub direction: Direction,
}

impl DocConfig {
    pub fn new() -> Self {
        Self {
            undo_depth: 200,
            history_event_delay_ms: 1250,
            selections_may_touch: false,
            line_separator: None,
            line_height: 1.0,
            direction: Direction::Ltr,
        }
    }

    /// 1操作ごとに履歴を分ける設定（テスト・スクリプト向け）
    pub fn granular_history() -> Self {
        Self {
            history_event_delay_ms: 0,
            ..Self::new()
        }
    }

    /// 大きな文書向け設定（履歴を深く保持する）
    pub fn deep_history() -> Self {
        Self {
            undo_depth: 2000,
            ..Self::new()
        }
    }

    /// JSON文字列から設定を読み込む
    pub fn from_json(json: &str) -> Result<Self> {
        let config: DocConfig = serde_json::from_str(json).map_err(|e| ConfigError::Malformed {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 値の妥当性を検証
    pub fn validate(&self) -> Result<()> {
        if !self.line_height.is_finite() || self.line_height <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "lineHeight".to_string(),
                value: self.line_height.to_string(),
            }
            .into());
        }
        if self.undo_depth == 0 {
            return Err(ConfigError::InvalidValue {
                key: "undoDepth".to_string(),
                value: "0".to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub fn history_event_delay(&self) -> Duration {
        Duration::from_millis(self.history_event_delay_ms)
    }
}

impl Default for DocConfig {
    fn default() -> Self {
        Self::new()
    }
}
