//! 履歴スナップショット
//!
//! 保存・復元の境界でだけ深いコピーを行う。
//! 形式は `{done: [...], undone: [...]}` で、各要素は選択範囲か変更列。

use super::{EditGroup, History, HistoryEvent};
use crate::change::Change;
use crate::error::{DocError, Result};
use crate::position::Pos;
use crate::selection::{Range, Selection};
use serde::{Deserialize, Serialize};

/// スナップショット内の位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPos {
    pub line: usize,
    pub col: usize,
}

impl From<Pos> for SnapshotPos {
    fn from(pos: Pos) -> Self {
        Self {
            line: pos.line,
            col: pos.col,
        }
    }
}

impl From<SnapshotPos> for Pos {
    fn from(pos: SnapshotPos) -> Self {
        Pos::new(pos.line, pos.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRange {
    pub anchor_line: usize,
    pub anchor_col: usize,
    pub head_line: usize,
    pub head_col: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotChange {
    pub from: SnapshotPos,
    pub to: SnapshotPos,
    pub text: Vec<String>,
}

/// スナップショットの1要素
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotEntry {
    Selection {
        ranges: Vec<SnapshotRange>,
        #[serde(rename = "primaryIndex")]
        primary_index: usize,
    },
    Changes {
        changes: Vec<SnapshotChange>,
        generation: u64,
    },
}

/// 履歴全体のスナップショット
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub done: Vec<SnapshotEntry>,
    pub undone: Vec<SnapshotEntry>,
}

impl HistorySnapshot {
    /// 履歴を深くコピーしてスナップショットにする
    pub fn capture(history: &History) -> Self {
        Self {
            done: history.done.iter().map(entry_from_event).collect(),
            undone: history.undone.iter().map(entry_from_event).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// `base` の世代と深さを引き継いだ履歴を組み立てる
    ///
    /// 選択範囲は正規化し直す。逆向きの変更を含む場合はエラー。
    pub fn restore(&self, base: &History, may_touch: bool) -> Result<History> {
        let restore_all = |entries: &[SnapshotEntry]| -> Result<Vec<HistoryEvent>> {
            entries.iter().map(|e| event_from_entry(e, may_touch)).collect()
        };
        let mut history = base.successor();
        history.done = restore_all(&self.done)?;
        history.undone = restore_all(&self.undone)?;
        Ok(history)
    }
}

fn entry_from_event(event: &HistoryEvent) -> SnapshotEntry {
    match event {
        HistoryEvent::Selection(sel) => SnapshotEntry::Selection {
            ranges: sel
                .ranges()
                .iter()
                .map(|r| SnapshotRange {
                    anchor_line: r.anchor.line,
                    anchor_col: r.anchor.col,
                    head_line: r.head.line,
                    head_col: r.head.col,
                })
                .collect(),
            primary_index: sel.primary_index(),
        },
        HistoryEvent::Edit(group) => SnapshotEntry::Changes {
            changes: group
                .changes
                .iter()
                .map(|c| SnapshotChange {
                    from: c.from.into(),
                    to: c.to.into(),
                    text: c.text.clone(),
                })
                .collect(),
            generation: group.generation,
        },
    }
}

fn event_from_entry(entry: &SnapshotEntry, may_touch: bool) -> Result<HistoryEvent> {
    match entry {
        SnapshotEntry::Selection {
            ranges,
            primary_index,
        } => {
            if ranges.is_empty() {
                return Err(DocError::Snapshot {
                    message: "selection entry without ranges".to_string(),
                });
            }
            if *primary_index >= ranges.len() {
                return Err(DocError::Snapshot {
                    message: format!(
                        "primary index {} out of {} ranges",
                        primary_index,
                        ranges.len()
                    ),
                });
            }
            let ranges = ranges
                .iter()
                .map(|r| {
                    Range::new(
                        Pos::new(r.anchor_line, r.anchor_col),
                        Pos::new(r.head_line, r.head_col),
                    )
                })
                .collect();
            Ok(HistoryEvent::Selection(Selection::normalized(
                ranges,
                *primary_index,
                may_touch,
            )))
        }
        SnapshotEntry::Changes {
            changes,
            generation,
        } => {
            if changes.is_empty() {
                return Err(DocError::Snapshot {
                    message: "change entry without changes".to_string(),
                });
            }
            if let Some(bad) = changes.iter().find(|c| Pos::from(c.from) > Pos::from(c.to)) {
                return Err(DocError::Snapshot {
                    message: format!(
                        "change ends before it starts ({}:{} > {}:{})",
                        bad.from.line, bad.from.col, bad.to.line, bad.to.col
                    ),
                });
            }
            let changes = changes
                .iter()
                .map(|c| Change::new(c.from.into(), c.to.into(), c.text.clone()))
                .collect();
            Ok(HistoryEvent::Edit(EditGroup {
                changes,
                generation: *generation,
            }))
        }
    }
}
