//! 変更の適用と履歴の再生
//!
//! 編集は必ず `make_change` を通る。読み取り専用範囲での分割、履歴への記録、
//! 文書への反映、リンク先への伝播をこの順に行う。

use super::select::SelectionOptions;
use super::Engine;
use crate::change::{compute_replaced_sel, compute_sel_after_change, Change, Collapse};
use crate::document::update::update_doc;
use crate::document::{DocId, Document};
use crate::error::{DocError, Result};
use crate::history::snapshot::HistorySnapshot;
use crate::history::{push_selection, EditGroup, History, HistoryEvent, Recorded};
use crate::marker::spans::{merge_old_spans, remove_read_only_ranges};
use crate::operation::{ChangeEvent, ChangeRecord};
use crate::position::Pos;
use crate::selection::Selection;
use crate::text::split_lines;
use log::debug;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    Undo,
    Redo,
}

impl Replay {
    fn origin(self) -> &'static str {
        match self {
            Replay::Undo => "undo",
            Replay::Redo => "redo",
        }
    }
}

/// 行のスパンを変更開始行からのオフセットで変更に保存する
fn attach_local_spans(doc: &Document, change: &mut Change, from: usize, to: usize) {
    let start = from.max(doc.first_line());
    let mut layout = BTreeMap::new();
    for (n, handle) in doc.lines.handles(start, to).into_iter().enumerate() {
        if let Some(line) = doc.lines.line(handle) {
            if !line.spans().is_empty() {
                layout.insert(n, line.spans().to_vec());
            }
        }
    }
    if !layout.is_empty() {
        change.stored_spans.entry(doc.id()).or_default().extend(layout);
    }
}

/// 取り出す側と積む側のスタック
fn stacks(hist: &mut History, replay: Replay) -> (&mut Vec<HistoryEvent>, &mut Vec<HistoryEvent>) {
    match replay {
        Replay::Undo => (&mut hist.done, &mut hist.undone),
        Replay::Redo => (&mut hist.undone, &mut hist.done),
    }
}

/// 共有中の履歴のうち、まだずらしていないものだけをずらす
fn rebase_once(rebased: &mut Vec<Rc<RefCell<History>>>, hist: Rc<RefCell<History>>, change: &Change) {
    if rebased.iter().any(|h| Rc::ptr_eq(h, &hist)) {
        return;
    }
    hist.borrow_mut().rebase(change);
    rebased.push(hist);
}

impl Engine {
    /// 変更を適用する
    ///
    /// `from > to` の変更は何も変えずにエラーを返す。
    pub fn apply(&mut self, doc: DocId, change: Change) -> Result<()> {
        let mut batch = self.begin_batch();
        batch.make_change(doc, change, false)
    }

    /// 範囲を置き換える（`to` 省略時は挿入、逆向きの範囲は入れ替える）
    pub fn replace_range(&mut self, doc: DocId, text: &str, from: Pos, to: Option<Pos>, origin: Option<&str>) -> Result<()> {
        let mut batch = self.begin_batch();
        let d = batch.doc(doc)?;
        let to = to.unwrap_or(from);
        let (from, to) = if to < from { (to, from) } else { (from, to) };
        let mut change = Change::new(d.clip_pos(from), d.clip_pos(to), batch.split(text));
        change.origin = origin.map(str::to_string);
        batch.make_change(doc, change, false)
    }

    /// すべての範囲を同じテキストで置き換える（由来の既定は `+input`）
    pub fn replace_selection(&mut self, doc: DocId, text: &str, collapse: Collapse, origin: Option<&str>) -> Result<()> {
        let count = self.doc(doc)?.sel.len();
        self.replace_selections(doc, vec![text.to_string(); count], collapse, Some(origin.unwrap_or("+input")))
    }

    /// 範囲ごとに別のテキストで置き換える
    pub fn replace_selections(
        &mut self,
        doc: DocId,
        texts: Vec<String>,
        collapse: Collapse,
        origin: Option<&str>,
    ) -> Result<()> {
        let mut batch = self.begin_batch();
        let d = batch.doc(doc)?;
        let sel = d.sel.clone();
        let first = d.first_line();
        let changes: Vec<Change> = sel
            .ranges()
            .iter()
            .zip(&texts)
            .map(|(range, text)| {
                let mut change = Change::new(range.from(), range.to(), batch.split(text));
                change.origin = origin.map(str::to_string);
                change
            })
            .collect();
        let new_sel = match collapse {
            Collapse::End => None,
            hint => Some(compute_replaced_sel(&sel, &changes, first, hint)),
        };
        for change in changes.into_iter().rev() {
            batch.make_change(doc, change, false)?;
        }
        if let Some(new_sel) = new_sel {
            batch.set_selection_replacing_history(doc, new_sel, SelectionOptions::default())?;
        }
        Ok(())
    }

    /// 文書全体を置き換える
    ///
    /// 読み取り専用マーカーを無視し、履歴を消してカーソルを先頭へ置く。
    pub fn set_value(&mut self, doc: DocId, text: &str) -> Result<()> {
        let mut batch = self.begin_batch();
        let d = batch.doc(doc)?;
        let first = d.first_line();
        let last = d.last_line();
        let end = Pos::new(last, d.get_line(last)?.chars().count());
        let mut change = Change::new(Pos::new(first, 0), end, batch.split(text)).with_origin("setValue");
        change.full = true;
        batch.make_change(doc, change, true)?;
        batch.clear_history(doc)?;
        batch.set_cursor(doc, Pos::new(first, 0), SelectionOptions::no_scroll())
    }

    pub fn undo(&mut self, doc: DocId) -> Result<()> {
        let mut batch = self.begin_batch();
        batch.make_change_from_history(doc, Replay::Undo, false)
    }

    pub fn redo(&mut self, doc: DocId) -> Result<()> {
        let mut batch = self.begin_batch();
        batch.make_change_from_history(doc, Replay::Redo, false)
    }

    /// 選択範囲だけの変化も1段として戻す
    pub fn undo_selection(&mut self, doc: DocId) -> Result<()> {
        let mut batch = self.begin_batch();
        batch.make_change_from_history(doc, Replay::Undo, true)
    }

    pub fn redo_selection(&mut self, doc: DocId) -> Result<()> {
        let mut batch = self.begin_batch();
        batch.make_change_from_history(doc, Replay::Redo, true)
    }

    /// 履歴を空にする（共有中の文書からも消える）
    pub fn clear_history(&mut self, doc: DocId) -> Result<()> {
        let hist = self.doc(doc)?.history.clone();
        let fresh = hist.borrow().successor();
        *hist.borrow_mut() = fresh;
        debug!("{}: history cleared", doc);
        Ok(())
    }

    /// 現在の世代。`close_event` なら次の編集を別グループにする
    pub fn change_generation(&mut self, doc: DocId, close_event: bool) -> Result<u64> {
        let hist = self.doc(doc)?.history.clone();
        let mut hist = hist.borrow_mut();
        if close_event {
            hist.close_event();
        }
        Ok(hist.generation())
    }

    /// 現在の状態を保存済みとして記録する
    pub fn mark_clean(&mut self, doc: DocId) -> Result<()> {
        let generation = self.change_generation(doc, true)?;
        self.doc_mut(doc)?.clean_generation = generation;
        Ok(())
    }

    pub fn is_clean(&self, doc: DocId, generation: Option<u64>) -> Result<bool> {
        Ok(self.doc(doc)?.is_clean(generation))
    }

    pub fn history_size(&self, doc: DocId) -> Result<(usize, usize)> {
        Ok(self.doc(doc)?.history_size())
    }

    pub fn history_snapshot(&self, doc: DocId) -> Result<HistorySnapshot> {
        let d = self.doc(doc)?;
        let hist = d.history.borrow();
        Ok(HistorySnapshot::capture(&hist))
    }

    /// スナップショットから履歴を復元する（共有中の文書にも反映される）
    pub fn set_history(&mut self, doc: DocId, snapshot: &HistorySnapshot) -> Result<()> {
        let hist = self.doc(doc)?.history.clone();
        let restored = snapshot.restore(&hist.borrow(), self.config.selections_may_touch)?;
        *hist.borrow_mut() = restored;
        Ok(())
    }

    // ---- 内部処理 ----

    fn split(&self, text: &str) -> Vec<String> {
        split_lines(text, self.config.line_separator.as_deref())
    }

    /// 読み取り専用範囲を避けて変更を適用する
    pub(crate) fn make_change(&mut self, doc: DocId, change: Change, ignore_read_only: bool) -> Result<()> {
        if change.from > change.to {
            return Err(DocError::InvertedChange {
                from: change.from,
                to: change.to,
            });
        }
        let d = self.doc(doc)?;
        if d.cant_edit && !ignore_read_only {
            debug!("{}: edit ignored while no legal cursor position exists", doc);
            return Ok(());
        }
        let mut change = change;
        if change.text.is_empty() {
            change.text.push(String::new());
        }
        change.from = d.clip_pos(change.from);
        change.to = d.clip_pos(change.to);

        if !ignore_read_only {
            if let Some(parts) = remove_read_only_ranges(&d.lines, change.from, change.to, &self.markers) {
                if parts.is_empty() {
                    debug!("{}: edit {}..{} rejected by read-only markers", doc, change.from, change.to);
                    return Ok(());
                }
                for (i, (from, to)) in parts.into_iter().enumerate().rev() {
                    let text = if i == 0 {
                        change.text.clone()
                    } else {
                        vec![String::new()]
                    };
                    let mut part = Change::new(from, to, text);
                    part.origin = change.origin.clone();
                    self.make_change_inner(doc, part)?;
                }
                return Ok(());
            }
        }
        self.make_change_inner(doc, change)
    }

    /// 履歴に記録し、文書とリンク先に反映する
    fn make_change_inner(&mut self, doc: DocId, change: Change) -> Result<()> {
        if change.is_noop() {
            return Ok(());
        }
        let may_touch = self.config.selections_may_touch;
        let delay = self.config.history_event_delay();
        let op_id = self.batcher.op_id();

        let d = self.doc(doc)?;
        let hist = d.history.clone();
        let sel_after = compute_sel_after_change(&d.sel, &change, may_touch);
        let recorded = hist.borrow_mut().add_change(
            &change,
            &d.sel,
            sel_after.clone(),
            op_id,
            Instant::now(),
            delay,
            || self.history_change_from_change(d, &change),
        );
        if recorded == Recorded::NewGroup {
            self.queue_event(doc, ChangeEvent::HistoryAdded);
        }

        self.make_change_single_doc(doc, &change, Some(sel_after))?;
        let mut rebased = Vec::new();
        for (other, shared) in self.linked_docs(doc, false) {
            if !shared {
                let other_hist = self.doc(other)?.history.clone();
                if !Rc::ptr_eq(&other_hist, &hist) {
                    rebase_once(&mut rebased, other_hist, &change);
                }
            }
            self.make_change_single_doc(other, &change, None)?;
        }
        Ok(())
    }

    /// 変更の逆変更（置き換えられるテキストとスパンを保存したもの）
    pub(crate) fn history_change_from_change(&self, d: &Document, change: &Change) -> Change {
        let mut inverse = Change::new(change.from, change.end(), d.get_between(change.from, change.to));
        let (from, to) = (change.from.line, change.to.line + 1);
        attach_local_spans(d, &mut inverse, from, to);
        for (other, _) in self.linked_docs(d.id(), true) {
            if let Some(other) = self.docs.get(&other) {
                attach_local_spans(other, &mut inverse, from, to);
            }
        }
        inverse
    }

    /// 1つの文書に変更を反映する（履歴には触れない）
    ///
    /// 表示窓の外の変更は `first` をずらすだけにし、はみ出す変更は窓に収まるよう切り詰める。
    pub(crate) fn make_change_single_doc(&mut self, doc: DocId, change: &Change, sel_after: Option<Selection>) -> Result<()> {
        self.touch(doc);
        let may_touch = self.config.selections_may_touch;
        let line_height = self.config.line_height;

        let d = self.doc(doc)?;
        let first = d.first_line();
        if change.to.line < first {
            let delta = change.line_delta();
            let d = self.doc_mut(doc)?;
            d.shift(delta);
            let (first, count) = (d.first_line(), d.line_count());
            self.batcher.register_change(doc, 0.0, first, first + count, 0);
            return Ok(());
        }
        if change.from.line > d.last_line() {
            return Ok(());
        }

        let mut change = change.clone();
        if change.from.line < first {
            let shift = change.text.len() as isize - 1 - (first - change.from.line) as isize;
            let d = self.doc_mut(doc)?;
            d.shift(shift);
            let last_text = change.text.last().cloned().unwrap_or_default();
            let to = Pos::new(change.to.line.saturating_add_signed(shift), change.to.col);
            let mut clipped = Change::new(Pos::new(d.first_line(), 0), to, vec![last_text]);
            clipped.origin = change.origin.take();
            change = clipped;
        }
        let d = self.doc(doc)?;
        let last = d.last_line();
        if change.to.line > last {
            let end = Pos::new(last, d.get_line(last)?.chars().count());
            let mut clipped = Change::new(change.from, end, vec![change.text[0].clone()]);
            clipped.origin = change.origin.take();
            change = clipped;
        }

        let removed = d.get_between(change.from, change.to);
        let sel_after = sel_after.unwrap_or_else(|| compute_sel_after_change(&d.sel, &change, may_touch));
        let spans = merge_old_spans(doc, &d.lines, &change, &self.markers);

        let Engine { docs, markers, .. } = self;
        let d = docs.get_mut(&doc).ok_or(DocError::UnknownDocument(doc))?;
        update_doc(d, &change, spans, markers, line_height)?;

        self.batcher
            .register_change(doc, 0.0, change.from.line, change.to.line + 1, change.line_delta());
        self.queue_event(
            doc,
            ChangeEvent::Change(ChangeRecord {
                from: change.from,
                to: change.to,
                text: change.text.clone(),
                removed,
                origin: change.origin.clone(),
            }),
        );
        self.set_selection_no_undo(doc, sel_after, &SelectionOptions::no_scroll())?;

        if self.doc(doc)?.cant_edit && self.has_legal_cursor_position(doc)? {
            debug!("{}: legal cursor position found, editing enabled", doc);
            self.doc_mut(doc)?.cant_edit = false;
        }
        Ok(())
    }

    /// 履歴を1段戻す・進める
    fn make_change_from_history(&mut self, doc: DocId, replay: Replay, allow_selection_only: bool) -> Result<()> {
        let may_touch = self.config.selections_may_touch;
        let hist = self.doc(doc)?.history.clone();
        let current = self.doc(doc)?.sel.clone();

        if !allow_selection_only && self.doc(doc)?.cant_edit {
            debug!("{}: {} ignored while no legal cursor position exists", doc, replay.origin());
            return Ok(());
        }
        {
            let h = hist.borrow();
            let source = match replay {
                Replay::Undo => &h.done,
                Replay::Redo => &h.undone,
            };
            let usable = source.iter().any(|event| match event {
                HistoryEvent::Selection(sel) => allow_selection_only && *sel != current,
                HistoryEvent::Edit(_) => !allow_selection_only,
            });
            if !usable {
                debug!("{}: nothing to {}", doc, replay.origin());
                return Ok(());
            }
            if !allow_selection_only {
                let next_group = source.iter().rev().find_map(|event| match event {
                    HistoryEvent::Edit(group) => Some(group),
                    HistoryEvent::Selection(_) => None,
                });
                if let Some(bad) = next_group.and_then(|g| g.changes.iter().find(|c| c.from > c.to)) {
                    return Err(DocError::InvertedChange {
                        from: bad.from,
                        to: bad.to,
                    });
                }
            }
        }
        hist.borrow_mut().forget_origins();

        let mut sel_after = None;
        let group = loop {
            let event = {
                let mut guard = hist.borrow_mut();
                let (source, dest) = stacks(&mut guard, replay);
                let event = source.pop();
                if let Some(HistoryEvent::Selection(sel)) = &event {
                    push_selection(dest, sel.clone());
                }
                event
            };
            match event {
                None => return Ok(()),
                Some(HistoryEvent::Selection(sel)) => {
                    if allow_selection_only && sel != current {
                        let options = SelectionOptions {
                            clear_redo: false,
                            ..SelectionOptions::default()
                        };
                        return self.set_selection_inner_undo(doc, sel, &options);
                    }
                    sel_after = Some(sel);
                }
                Some(HistoryEvent::Edit(group)) => break group,
            }
        };

        let generation_before = {
            let mut guard = hist.borrow_mut();
            let (_, dest) = stacks(&mut guard, replay);
            if let Some(sel) = sel_after {
                push_selection(dest, sel);
            }
            let before = guard.generation;
            guard.generation = group.generation;
            before
        };
        debug!(
            "{}: {} group of {} changes (generation {} -> {})",
            doc,
            replay.origin(),
            group.changes.len(),
            generation_before,
            group.generation
        );

        let mut anti_changes = Vec::with_capacity(group.changes.len());
        for (i, change) in group.changes.into_iter().enumerate().rev() {
            let mut change = change.with_origin(replay.origin());
            if change.text.is_empty() {
                change.text.push(String::new());
            }
            let d = self.doc(doc)?;
            anti_changes.push(self.history_change_from_change(d, &change));
            let after = if i > 0 {
                compute_sel_after_change(&d.sel, &change, may_touch)
            } else {
                let mut guard = hist.borrow_mut();
                let (source, _) = stacks(&mut guard, replay);
                match source.last().and_then(HistoryEvent::as_selection) {
                    Some(sel) => sel.clone(),
                    None => compute_sel_after_change(&d.sel, &change, may_touch),
                }
            };
            self.make_change_single_doc(doc, &change, Some(after))?;
            if i == 0 {
                if let Some(state) = self.batcher.state(doc, || 0.0) {
                    state.scroll_to = Some(change.end());
                }
            }

            let mut rebased = Vec::new();
            for (other, shared) in self.linked_docs(doc, false) {
                if !shared {
                    let other_hist = self.doc(other)?.history.clone();
                    rebase_once(&mut rebased, other_hist, &change);
                }
                self.make_change_single_doc(other, &change, None)?;
            }
        }

        let mut guard = hist.borrow_mut();
        let (_, dest) = stacks(&mut guard, replay);
        dest.push(HistoryEvent::Edit(EditGroup {
            changes: anti_changes,
            generation: generation_before,
        }));
        Ok(())
    }
}
