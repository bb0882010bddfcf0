//! altre-doc - 行インデックス付きの文書・編集エンジン
//!
//! 行ストア、選択範囲、テキストマーカー、取り消し履歴、リンクした文書、
//! 操作のバッチ化を1つのエンジンにまとめる。

// 基礎
pub mod bidi;
pub mod config;
pub mod error;
pub mod position;
pub mod text;

// データ層
pub mod change;
pub mod line_store;
pub mod selection;

// マーカーと履歴
pub mod history;
pub mod marker;

// 文書とエンジン
pub mod document;
pub mod engine;
pub mod operation;

// 公開API
pub use bidi::{BidiOrder, BidiPart, Direction, NoBidi};
pub use change::{Change, Collapse};
pub use config::DocConfig;
pub use document::{CursorEnd, DocId, Document};
pub use engine::{BatchGuard, Engine, LinkOptions, PosH, SelectionOptions, Unit};
pub use error::{ConfigError, DocError, ErrorLevel, Result};
pub use history::snapshot::HistorySnapshot;
pub use marker::{MarkOptions, MarkerId, MarkerKind, MarkerRange, WidgetRef};
pub use operation::{ChangeEvent, ChangeListener, ChangeRecord, Renderer, ViewUpdate};
pub use position::{Affinity, Pos};
pub use selection::{Range, Selection};
