//! 操作のバッチ化
//!
//! 入れ子になったエンジン呼び出しを1つの操作にまとめ、最も外側の操作が閉じたときに
//! 文書ごとの再描画通知と変更イベントを1回だけ配送する。
//! 開いている操作は `Batcher` が持ち、グローバルな状態は使わない。

use crate::document::DocId;
use crate::marker::MarkerId;
use crate::position::Pos;
use std::collections::BTreeMap;

/// 適用された変更の記録
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub from: Pos,
    pub to: Pos,
    pub text: Vec<String>,
    /// 置き換えられたテキスト
    pub removed: Vec<String>,
    pub origin: Option<String>,
}

/// リスナーへ配送されるイベント
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Change(ChangeRecord),
    CursorActivity,
    MarkerCleared(MarkerId),
    HistoryAdded,
}

/// 変更リスナー
pub trait ChangeListener {
    fn on_change(&mut self, event: &ChangeEvent);
}

/// 操作が閉じたときに描画側へ渡す要約
#[derive(Debug, Clone, PartialEq)]
pub struct ViewUpdate {
    pub doc: DocId,
    pub view_changed: bool,
    pub selection_changed: bool,
    /// 変更後の行番号による半開区間
    pub changed_lines: Vec<(usize, usize)>,
    pub scroll_to: Option<Pos>,
    /// 操作前後の文書の高さの差
    pub height_delta: f64,
}

/// 描画側のコラボレーター
pub trait Renderer {
    fn on_update(&mut self, update: &ViewUpdate);
}

/// 1操作のあいだに文書ごとに溜める状態
#[derive(Debug, Clone, Default)]
pub(crate) struct DocOpState {
    pub selection_changed: bool,
    pub view_changed: bool,
    pub changed_lines: Vec<(usize, usize)>,
    pub scroll_to: Option<Pos>,
    pub start_height: f64,
    pub events: Vec<ChangeEvent>,
}

impl DocOpState {
    /// `[from, to)` の行が `lendiff` 行増減して置き換わったことを記録する
    fn register_change(&mut self, from: usize, to: usize, lendiff: isize) {
        let new_to = to.saturating_add_signed(lendiff).max(from);
        let map = |p: usize, is_end: bool| -> usize {
            if p >= to {
                p.saturating_add_signed(lendiff)
            } else if p > from {
                if is_end {
                    new_to
                } else {
                    from
                }
            } else {
                p
            }
        };
        for range in self.changed_lines.iter_mut() {
            *range = (map(range.0, false), map(range.1, true));
        }
        self.changed_lines.push((from, new_to.max(from + 1)));
        self.view_changed = true;
    }
}

/// 開いている操作
#[derive(Debug, Clone, Default)]
pub(crate) struct Operation {
    pub id: u64,
    pub docs: BTreeMap<DocId, DocOpState>,
}

/// 操作の入れ子を数え、最も外側の操作だけを閉じる
#[derive(Debug, Default)]
pub struct Batcher {
    depth: usize,
    next_op_id: u64,
    current: Option<Operation>,
}

impl Batcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 操作を開く（入れ子なら深さだけ増やす）
    pub(crate) fn begin(&mut self) {
        if self.current.is_none() {
            self.next_op_id += 1;
            self.current = Some(Operation {
                id: self.next_op_id,
                docs: BTreeMap::new(),
            });
        }
        self.depth += 1;
    }

    /// 操作を閉じる。最も外側なら溜めた状態を返す
    pub(crate) fn end(&mut self) -> Option<Operation> {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.current.take()
        } else {
            None
        }
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// 開いている操作のid
    pub fn op_id(&self) -> Option<u64> {
        self.current.as_ref().map(|op| op.id)
    }

    /// 文書の状態（操作が開いていなければ `None`）
    ///
    /// 初めて触れた文書は開始時の高さを記録する。
    pub(crate) fn state(&mut self, doc: DocId, start_height: impl FnOnce() -> f64) -> Option<&mut DocOpState> {
        let op = self.current.as_mut()?;
        Some(op.docs.entry(doc).or_insert_with(|| DocOpState {
            start_height: start_height(),
            ..DocOpState::default()
        }))
    }

    pub(crate) fn register_change(&mut self, doc: DocId, start_height: f64, from: usize, to: usize, lendiff: isize) {
        if let Some(state) = self.state(doc, || start_height) {
            state.register_change(from, to, lendiff);
        }
    }

    pub(crate) fn queue_event(&mut self, doc: DocId, start_height: f64, event: ChangeEvent) {
        if let Some(state) = self.state(doc, || start_height) {
            state.events.push(event);
        }
    }
}

/// 重なる・接する行区間をまとめる
pub(crate) fn merge_line_ranges(mut ranges: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    ranges.sort();
    let mut out: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
    for (from, to) in ranges {
        match out.last_mut() {
            Some(last) if from <= last.1 => last.1 = last.1.max(to),
            _ => out.push((from, to)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_operations_close_once() {
        let mut batcher = Batcher::new();
        batcher.begin();
        let id = batcher.op_id();
        batcher.begin();
        assert_eq!(batcher.op_id(), id);
        assert!(batcher.end().is_none());
        assert!(batcher.is_open());
        assert!(batcher.end().is_some());
        assert!(!batcher.is_open());

        batcher.begin();
        assert_ne!(batcher.op_id(), id);
    }

    #[test]
    fn test_state_needs_open_operation() {
        let mut batcher = Batcher::new();
        let doc = DocId::from_raw(1);
        batcher.register_change(doc, 0.0, 0, 1, 0);
        assert!(batcher.state(doc, || 0.0).is_none());
    }

    #[test]
    fn test_register_change_shifts_earlier_ranges() {
        let mut batcher = Batcher::new();
        let doc = DocId::from_raw(1);
        batcher.begin();
        batcher.register_change(doc, 10.0, 10, 11, 0);
        // 2行目の前に3行挿入: 10行目の区間は13行目へずれる
        batcher.register_change(doc, 10.0, 2, 2, 3);
        let op = batcher.end().unwrap();
        let state = &op.docs[&doc];
        assert_eq!(state.start_height, 10.0);
        assert_eq!(merge_line_ranges(state.changed_lines.clone()), vec![(2, 5), (13, 14)]);
    }

    #[test]
    fn test_merge_line_ranges() {
        assert_eq!(
            merge_line_ranges(vec![(5, 7), (0, 2), (2, 3), (6, 9)]),
            vec![(0, 3), (5, 9)]
        );
    }
}
