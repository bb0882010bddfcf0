//! 編集履歴
//!
//! `done` / `undone` の2本のスタックに、選択範囲イベントと編集グループを交互に積む。
//! 編集グループには逆変更（元に戻すための変更）を記録順に保存する。
//! 連続する入力は操作id・originの接頭辞・時間窓で1グループにまとめる。
//!
//! リンクした文書で履歴を共有するときは `Rc<RefCell<History>>` を共有する。

pub mod snapshot;

use crate::change::Change;
use crate::document::DocId;
use crate::position::Pos;
use crate::selection::Selection;
use log::{debug, warn};
use std::time::{Duration, Instant};

/// 編集グループ（1回のundoで戻る単位）
#[derive(Debug, Clone, PartialEq)]
pub struct EditGroup {
    /// 逆変更（記録順）
    pub changes: Vec<Change>,
    /// グループを記録した時点の世代
    pub generation: u64,
}

/// 履歴スタックの要素
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEvent {
    Selection(Selection),
    Edit(EditGroup),
}

impl HistoryEvent {
    pub fn is_selection(&self) -> bool {
        matches!(self, HistoryEvent::Selection(_))
    }

    pub fn as_selection(&self) -> Option<&Selection> {
        match self {
            HistoryEvent::Selection(sel) => Some(sel),
            HistoryEvent::Edit(_) => None,
        }
    }
}

/// `add_change` の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// 直前のグループに結合した
    Merged,
    /// 新しいグループを作った
    NewGroup,
}

/// 編集履歴スタック
#[derive(Debug, Clone)]
pub struct History {
    pub(crate) done: Vec<HistoryEvent>,
    pub(crate) undone: Vec<HistoryEvent>,
    undo_depth: usize,
    pub(crate) generation: u64,
    pub(crate) max_generation: u64,
    last_mod_time: Option<Instant>,
    last_sel_time: Option<Instant>,
    last_op: Option<u64>,
    last_sel_op: Option<u64>,
    last_origin: Option<String>,
    last_sel_origin: Option<String>,
}

impl History {
    pub fn new(undo_depth: usize) -> Self {
        Self::starting_at(1, undo_depth)
    }

    fn starting_at(generation: u64, undo_depth: usize) -> Self {
        Self {
            done: Vec::new(),
            undone: Vec::new(),
            undo_depth: undo_depth.max(1),
            generation,
            max_generation: generation,
            last_mod_time: None,
            last_sel_time: None,
            last_op: None,
            last_sel_op: None,
            last_origin: None,
            last_sel_origin: None,
        }
    }

    /// 世代番号を引き継いだ空の履歴
    pub fn successor(&self) -> Self {
        Self::starting_at(self.max_generation, self.undo_depth)
    }

    pub fn done(&self) -> &[HistoryEvent] {
        &self.done
    }

    pub fn undone(&self) -> &[HistoryEvent] {
        &self.undone
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_depth
    }

    /// 取り消し・やり直しできる編集グループの数
    pub fn size(&self) -> (usize, usize) {
        let count = |events: &[HistoryEvent]| events.iter().filter(|e| !e.is_selection()).count();
        (count(&self.done), count(&self.undone))
    }

    pub fn can_undo(&self) -> bool {
        self.done.iter().any(|e| !e.is_selection())
    }

    pub fn can_redo(&self) -> bool {
        self.undone.iter().any(|e| !e.is_selection())
    }

    /// 結合先となる直前の編集グループ
    fn last_change_event(&mut self, force: bool) -> Option<&mut EditGroup> {
        if force {
            clear_selection_events(&mut self.done);
        } else {
            let len = self.done.len();
            let last_is_edit = self.done.last().is_some_and(|e| !e.is_selection());
            if !last_is_edit {
                let before_last_is_edit = len > 1 && !self.done[len - 2].is_selection();
                if !before_last_is_edit {
                    return None;
                }
                self.done.pop();
            }
        }
        match self.done.last_mut() {
            Some(HistoryEvent::Edit(group)) => Some(group),
            _ => None,
        }
    }

    /// `change` が直前の編集グループのどれかの変更後範囲に接するか
    fn adjoins_last_group(&self, change: &Change) -> bool {
        let last_group = self.done.iter().rev().find_map(|event| match event {
            HistoryEvent::Edit(group) => Some(group),
            HistoryEvent::Selection(_) => None,
        });
        last_group.is_some_and(|group| {
            group
                .changes
                .iter()
                .any(|inverse| inverse.from <= change.to && change.from <= inverse.to)
        })
    }

    /// 変更を記録する
    ///
    /// `make_inverse` は新しい逆変更が必要なときだけ呼ばれる。
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn add_change(
        &mut self,
        change: &Change,
        sel_before: &Selection,
        sel_after: Selection,
        op_id: Option<u64>,
        now: Instant,
        delay: Duration,
        make_inverse: impl FnOnce() -> Change,
    ) -> Recorded {
        self.undone.clear();
        let origin = change.origin_str();
        let same_op = op_id.is_some() && self.last_op == op_id;
        let continues_origin = origin.is_some_and(|o| {
            self.last_origin.as_deref() == Some(o)
                && (o.starts_with('*')
                    || (o.starts_with('+')
                        && self
                            .last_mod_time
                            .is_some_and(|t| now.saturating_duration_since(t) < delay)))
        });

        // 同じ操作の変更は位置に関係なく1グループ。originによる結合は直前の変更に接するときだけ
        let target = if same_op {
            self.last_change_event(true)
        } else if continues_origin && self.adjoins_last_group(change) {
            self.last_change_event(false)
        } else {
            None
        };
        let recorded = match target {
            Some(group) => {
                let extend = group
                    .changes
                    .last_mut()
                    .filter(|last| change.is_insertion() && change.from == last.to);
                match extend {
                    Some(last) => last.to = change.end(),
                    None => group.changes.push(make_inverse()),
                }
                Recorded::Merged
            }
            None => {
                if self.done.last().map_or(true, |e| !e.is_selection()) {
                    push_selection(&mut self.done, sel_before.clone());
                }
                self.done.push(HistoryEvent::Edit(EditGroup {
                    changes: vec![make_inverse()],
                    generation: self.generation,
                }));
                self.trim_to_depth();
                Recorded::NewGroup
            }
        };
        debug!(
            "history: {:?} change {}..{} origin={:?}",
            recorded, change.from, change.to, origin
        );

        self.done.push(HistoryEvent::Selection(sel_after));
        self.max_generation += 1;
        self.generation = self.max_generation;
        self.last_mod_time = Some(now);
        self.last_sel_time = Some(now);
        self.last_op = op_id;
        self.last_sel_op = op_id;
        self.last_origin = change.origin.clone();
        self.last_sel_origin = change.origin.clone();
        recorded
    }

    /// 上限を超えた古いグループ（と直前の選択範囲）を捨てる
    fn trim_to_depth(&mut self) {
        let mut dropped = 0;
        while self.size().0 > self.undo_depth {
            match self.done.iter().position(|e| !e.is_selection()) {
                Some(i) => {
                    self.done.drain(..=i);
                }
                None => break,
            }
            dropped += 1;
        }
        if dropped > 0 {
            debug!("history: dropped {} oldest groups (depth {})", dropped, self.undo_depth);
        }
    }

    /// 選択範囲の変化を記録する
    pub(crate) fn add_selection(
        &mut self,
        sel: Selection,
        op_id: Option<u64>,
        origin: Option<&str>,
        clear_redo: bool,
        now: Instant,
        delay: Duration,
    ) {
        let same_op = op_id.is_some() && op_id == self.last_sel_op;
        let same_origin = origin.is_some_and(|o| {
            self.last_sel_origin.as_deref() == Some(o)
                && ((self.last_mod_time == self.last_sel_time && self.last_origin.as_deref() == Some(o))
                    || self.selection_event_can_be_merged(o, &sel, now, delay))
        });
        let replace = (same_op || same_origin) && self.done.last().is_some_and(|e| e.is_selection());
        if replace {
            if let Some(last) = self.done.last_mut() {
                *last = HistoryEvent::Selection(sel);
            }
        } else {
            push_selection(&mut self.done, sel);
        }
        self.last_sel_time = Some(now);
        self.last_sel_origin = origin.map(str::to_string);
        self.last_sel_op = op_id;
        if clear_redo {
            clear_selection_events(&mut self.undone);
        }
    }

    fn selection_event_can_be_merged(&self, origin: &str, sel: &Selection, now: Instant, delay: Duration) -> bool {
        if origin.starts_with('*') {
            return true;
        }
        if !origin.starts_with('+') {
            return false;
        }
        let Some(prev) = self.done.last().and_then(HistoryEvent::as_selection) else {
            return false;
        };
        prev.len() == sel.len()
            && prev.something_selected() == sel.something_selected()
            && self
                .last_sel_time
                .is_some_and(|t| now.saturating_duration_since(t) <= delay)
    }

    /// 次の編集を必ず新しいグループにする
    pub(crate) fn close_event(&mut self) {
        self.last_op = None;
        self.last_sel_op = None;
        self.last_origin = None;
        self.last_sel_origin = None;
    }

    /// undo/redo の前に直前のoriginを忘れる
    pub(crate) fn forget_origins(&mut self) {
        self.last_origin = None;
        self.last_sel_origin = None;
    }

    /// 外部の編集に合わせて保存済みの位置をずらす
    ///
    /// 編集と重なるグループは、それより古いものごと捨てる。
    pub(crate) fn rebase(&mut self, change: &Change) {
        let from = change.from.line;
        let to = change.to.line;
        let diff = change.text.len() as isize - (to as isize - from as isize) - 1;
        let dropped_done = rebase_events(&mut self.done, from, to, diff);
        let dropped_undone = rebase_events(&mut self.undone, from, to, diff);
        if dropped_done + dropped_undone > 0 {
            warn!(
                "history rebase over lines {}..={} dropped {} undo and {} redo events",
                from, to, dropped_done, dropped_undone
            );
        }
    }

    /// 共有をやめる文書のために履歴を複製する
    ///
    /// `split_ids` の文書のスパンは複製側へ移す。
    pub(crate) fn copy_for_split(&mut self, split_ids: &[DocId]) -> History {
        let mut copy = History::starting_at(self.max_generation, self.undo_depth);
        copy.done = split_events(&mut self.done, split_ids);
        copy.undone = split_events(&mut self.undone, split_ids);
        copy
    }
}

/// 同じ選択範囲が末尾になければ積む
pub(crate) fn push_selection(dest: &mut Vec<HistoryEvent>, sel: Selection) {
    let same = matches!(dest.last(), Some(HistoryEvent::Selection(top)) if *top == sel);
    if !same {
        dest.push(HistoryEvent::Selection(sel));
    }
}

/// 末尾の選択範囲イベントを取り除く
pub(crate) fn clear_selection_events(events: &mut Vec<HistoryEvent>) {
    while events.last().is_some_and(|e| e.is_selection()) {
        events.pop();
    }
}

fn rebase_pos_line(pos: Pos, from: usize, to: usize, diff: isize) -> Pos {
    if to < pos.line {
        Pos::new(pos.line.saturating_add_signed(diff), pos.col)
    } else if from < pos.line {
        Pos::new(from, 0)
    } else {
        pos
    }
}

fn rebase_events(events: &mut Vec<HistoryEvent>, from: usize, to: usize, diff: isize) -> usize {
    let mut dropped = 0;
    let mut i = 0;
    while i < events.len() {
        let ok = match &mut events[i] {
            HistoryEvent::Selection(sel) => {
                *sel = sel.map_positions(|p| rebase_pos_line(p, from, to, diff));
                true
            }
            HistoryEvent::Edit(group) => {
                let mut ok = true;
                for cur in group.changes.iter_mut() {
                    if to < cur.from.line {
                        cur.from.line = cur.from.line.saturating_add_signed(diff);
                        cur.to.line = cur.to.line.saturating_add_signed(diff);
                    } else if from <= cur.to.line {
                        ok = false;
                        break;
                    }
                }
                ok
            }
        };
        if ok {
            i += 1;
        } else {
            dropped += i + 1;
            events.drain(..=i);
            i = 0;
        }
    }
    dropped
}

fn split_events(events: &mut [HistoryEvent], split_ids: &[DocId]) -> Vec<HistoryEvent> {
    events
        .iter_mut()
        .map(|event| match event {
            HistoryEvent::Selection(sel) => HistoryEvent::Selection(sel.clone()),
            HistoryEvent::Edit(group) => {
                let changes = group
                    .changes
                    .iter_mut()
                    .map(|change| {
                        let mut copy = Change::new(change.from, change.to, change.text.clone());
                        for id in split_ids {
                            if let Some(spans) = change.stored_spans.remove(id) {
                                copy.stored_spans.insert(*id, spans);
                            }
                        }
                        copy
                    })
                    .collect();
                HistoryEvent::Edit(EditGroup {
                    changes,
                    generation: group.generation,
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(line: usize, col: usize) -> Pos {
        Pos::new(line, col)
    }

    fn record(hist: &mut History, change: Change, op: Option<u64>, now: Instant) -> Recorded {
        let before = Selection::cursor(change.from);
        let after = Selection::cursor(change.end());
        let inverse = Change::new(change.from, change.end(), vec![String::new()]);
        hist.add_change(&change, &before, after, op, now, Duration::from_millis(500), || inverse)
    }

    #[test]
    fn test_same_operation_merges() {
        let mut hist = History::new(10);
        let now = Instant::now();
        assert_eq!(record(&mut hist, Change::insert(p(0, 0), "a"), Some(1), now), Recorded::NewGroup);
        assert_eq!(record(&mut hist, Change::insert(p(3, 0), "b"), Some(1), now), Recorded::Merged);
        assert_eq!(hist.size(), (1, 0));
    }

    #[test]
    fn test_plus_origin_merges_within_delay() {
        let mut hist = History::new(10);
        let t0 = Instant::now();
        let typed = |col: usize| Change::insert(p(0, col), "x").with_origin("+input");
        record(&mut hist, typed(0), Some(1), t0);
        record(&mut hist, typed(1), Some(2), t0 + Duration::from_millis(100));
        assert_eq!(hist.size(), (1, 0));
        // 連続する挿入は最後の逆変更を伸ばす
        let HistoryEvent::Edit(group) = &hist.done[1] else {
            panic!("expected edit group");
        };
        assert_eq!(group.changes.len(), 1);
        assert_eq!(group.changes[0].to, p(0, 2));

        record(&mut hist, typed(2), Some(3), t0 + Duration::from_secs(5));
        assert_eq!(hist.size(), (2, 0));
    }

    #[test]
    fn test_star_origin_always_merges() {
        let mut hist = History::new(10);
        let t0 = Instant::now();
        let change = |col: usize| Change::delete(p(0, col), p(0, col + 1)).with_origin("*compose");
        record(&mut hist, change(4), Some(1), t0);
        record(&mut hist, change(3), Some(2), t0 + Duration::from_secs(60));
        assert_eq!(hist.size(), (1, 0));
    }

    #[test]
    fn test_origin_merge_needs_adjacent_change() {
        let mut hist = History::new(10);
        let t0 = Instant::now();
        let typed = |col: usize| Change::insert(p(0, col), "x").with_origin("+input");
        record(&mut hist, typed(0), Some(1), t0);
        assert_eq!(record(&mut hist, typed(9), Some(2), t0), Recorded::NewGroup);
        assert_eq!(record(&mut hist, typed(10), Some(3), t0), Recorded::Merged);
        // 削除も直前の挿入に接していれば結合する
        let backspace = Change::delete(p(0, 10), p(0, 11)).with_origin("+input");
        assert_eq!(record(&mut hist, backspace, Some(4), t0), Recorded::Merged);
        assert_eq!(hist.size(), (2, 0));

        let far = Change::delete(p(0, 0), p(0, 1)).with_origin("*compose");
        record(&mut hist, far, Some(5), t0);
        let farther = Change::delete(p(0, 5), p(0, 6)).with_origin("*compose");
        assert_eq!(record(&mut hist, farther, Some(6), t0), Recorded::NewGroup);
    }

    #[test]
    fn test_depth_drops_oldest_groups() {
        let mut hist = History::new(3);
        let now = Instant::now();
        for i in 0..5 {
            record(&mut hist, Change::insert(p(i, 0), "x"), Some(i as u64 + 1), now);
        }
        assert_eq!(hist.size(), (3, 0));
        assert!(hist.done[0].is_selection());
        assert!(!hist.done[1].is_selection());
    }

    #[test]
    fn test_generation_increases() {
        let mut hist = History::new(10);
        let now = Instant::now();
        assert_eq!(hist.generation(), 1);
        record(&mut hist, Change::insert(p(0, 0), "x"), Some(1), now);
        record(&mut hist, Change::insert(p(0, 1), "x"), Some(2), now);
        assert_eq!(hist.generation(), 3);
        let next = hist.successor();
        assert_eq!(next.generation(), 3);
        assert!(!next.can_undo());
    }

    #[test]
    fn test_selection_events_merge_by_origin() {
        let mut hist = History::new(10);
        let t0 = Instant::now();
        let delay = Duration::from_millis(500);
        hist.add_selection(Selection::cursor(p(0, 1)), Some(1), Some("+move"), true, t0, delay);
        hist.add_selection(Selection::cursor(p(0, 2)), Some(2), Some("+move"), true, t0, delay);
        assert_eq!(hist.done.len(), 1);
        hist.add_selection(Selection::cursor(p(0, 3)), Some(3), Some("click"), true, t0, delay);
        assert_eq!(hist.done.len(), 2);
    }

    #[test]
    fn test_rebase_shifts_and_drops() {
        let mut hist = History::new(10);
        let now = Instant::now();
        record(&mut hist, Change::insert(p(1, 0), "a"), Some(1), now);
        record(&mut hist, Change::insert(p(10, 0), "b"), Some(2), now);

        // 5行目の前に2行挿入: 10行目の変更はずれ、1行目の変更はそのまま
        hist.rebase(&Change::from_text(p(5, 0), p(5, 0), "\n\n"));
        let HistoryEvent::Edit(group) = &hist.done[3] else {
            panic!("expected edit group");
        };
        assert_eq!(group.changes[0].from, p(12, 0));

        // 1行目を含む編集: 1行目のグループとそれより古いものが消える
        hist.rebase(&Change::delete(p(0, 0), p(2, 0)));
        assert_eq!(hist.size(), (1, 0));
    }
}
