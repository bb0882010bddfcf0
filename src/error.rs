//! エラーハンドリングシステム
//!
//! ドキュメントエンジン全体で使用される統一されたエラー型を定義
//! 致命的なエラー（呼び出し側の契約違反）は変更前に即座に返し、
//! 回復可能な状態（no-op変更、読み取り専用範囲、空の履歴）はエラーにしない

use crate::document::DocId;
use crate::marker::MarkerId;
use crate::position::Pos;
use thiserror::Error;

/// エンジン全体のエラー型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocError {
    /// 行番号が `[first, first + size)` の範囲外
    #[error("Line {line} is out of range [{first}, {end})")]
    LineOutOfRange { line: usize, first: usize, end: usize },

    /// 変更の開始位置が終了位置より後ろにある
    #[error("Change start {from} is after its end {to}")]
    InvertedChange { from: Pos, to: Pos },

    /// マーカー範囲の開始位置が終了位置より後ろにある
    #[error("Range start {from} is after its end {to}")]
    InvertedRange { from: Pos, to: Pos },

    /// このエンジンに存在しないドキュメント
    #[error("Document {0} is not attached to this engine")]
    UnknownDocument(DocId),

    /// 既に別のレンダラーへ接続済み
    #[error("Document {0} is already in use")]
    AlreadyAttached(DocId),

    /// リンクされていないドキュメント同士の切り離し
    #[error("Documents {a} and {b} are not linked")]
    NotLinked { a: DocId, b: DocId },

    /// 既存の折りたたみマーカーと部分的に重なる
    #[error("Inserting collapsed marker partially overlapping an existing one")]
    CollapsedConflict,

    /// 存在しない（またはクリア済みの）マーカー
    #[error("Marker {0} does not exist")]
    UnknownMarker(MarkerId),

    /// 履歴スナップショットの形式エラー
    #[error("Invalid history snapshot: {message}")]
    Snapshot { message: String },

    /// 設定エラー
    #[error("Configuration error")]
    Config(#[from] ConfigError),
}

/// 設定固有のエラー
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Malformed configuration: {message}")]
    Malformed { message: String },
}

/// エラーレベル分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    /// 呼び出し側で回復できる入力エラー
    Error,
    /// 呼び出し側の契約違反（プログラミングエラー）
    Fatal,
}

impl DocError {
    /// エラーの深刻度を返す
    pub fn level(&self) -> ErrorLevel {
        match self {
            DocError::LineOutOfRange { .. }
            | DocError::AlreadyAttached(_)
            | DocError::CollapsedConflict => ErrorLevel::Fatal,
            _ => ErrorLevel::Error,
        }
    }

    /// 致命的エラーかどうか
    pub fn is_fatal(&self) -> bool {
        self.level() == ErrorLevel::Fatal
    }
}

impl From<serde_json::Error> for DocError {
    fn from(error: serde_json::Error) -> Self {
        DocError::Snapshot {
            message: error.to_string(),
        }
    }
}

/// プロジェクト標準のResult型
pub type Result<T> = std::result::Result<T, DocError>;
