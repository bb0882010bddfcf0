//! 選択範囲の操作
//!
//! 選択範囲を置くときは必ず原子的マーカーの外へ位置を逃がしてから正規化する。
//! 逃げ場がなければ文書は編集不能状態になる。

use super::Engine;
use crate::change::Collapse;
use crate::bidi::{end_of_line, move_logically, move_visually, BidiOrder, Direction};
use crate::document::DocId;
use crate::error::Result;
use crate::marker::MarkerId;
use crate::position::{Affinity, Pos};
use crate::selection::{Range, Selection};
use log::debug;
use std::time::Instant;

/// 選択範囲を設定するときのオプション
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionOptions {
    /// 履歴の結合に使う由来（`+` / `*` で始まると結合されやすい）
    pub origin: Option<String>,
    /// 原子的マーカーから逃がす向き（省略時は移動方向から決める）
    pub bias: Option<i32>,
    pub scroll: bool,
    /// やり直し側の選択範囲イベントを捨てるか
    pub clear_redo: bool,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            origin: None,
            bias: None,
            scroll: true,
            clear_redo: true,
        }
    }
}

impl SelectionOptions {
    pub fn with_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
            ..Self::default()
        }
    }

    pub fn no_scroll() -> Self {
        Self {
            scroll: false,
            ..Self::default()
        }
    }
}

/// 水平移動の単位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// 書記素クラスタ単位（行をまたぐ）
    Char,
    /// 行内だけで1文字
    Column,
    /// 単語の端まで
    Word,
    /// 単語・記号・空白のまとまり単位
    Group,
}

/// 水平移動の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PosH {
    pub pos: Pos,
    /// 文書の端で止まった
    pub hit_side: bool,
}

/// 単語文字（英数字と `_`）
pub(crate) fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharType {
    Word,
    Newline,
    Punct,
    Space,
}

/// 選択範囲の端を `head` へ伸ばした範囲（shift付き移動の規則）
pub(crate) fn extend_range(range: Range, head: Pos, other: Option<Pos>, extend: bool) -> Range {
    if !extend {
        return Range::new(other.unwrap_or(head), head);
    }
    let mut anchor = range.anchor;
    let mut head = head;
    if let Some(other) = other {
        let pos_before = head < anchor;
        if pos_before != (other < anchor) {
            anchor = head;
            head = other;
        } else if pos_before != (head < other) {
            head = other;
        }
    }
    Range::new(anchor, head)
}

impl Engine {
    // ---- 公開API ----

    /// 選択範囲を1つの範囲にする
    pub fn set_selection(&mut self, doc: DocId, anchor: Pos, head: Pos, options: SelectionOptions) -> Result<()> {
        let mut batch = self.begin_batch();
        let d = batch.doc(doc)?;
        let sel = Selection::simple(d.clip_pos(anchor), d.clip_pos(head));
        batch.set_selection_inner_undo(doc, sel, &options)
    }

    pub fn set_cursor(&mut self, doc: DocId, pos: Pos, options: SelectionOptions) -> Result<()> {
        self.set_selection(doc, pos, pos, options)
    }

    /// 複数範囲の選択（空なら何もしない）
    pub fn set_selections(
        &mut self,
        doc: DocId,
        ranges: Vec<Range>,
        primary: Option<usize>,
        options: SelectionOptions,
    ) -> Result<()> {
        if ranges.is_empty() {
            return Ok(());
        }
        let mut batch = self.begin_batch();
        let d = batch.doc(doc)?;
        let primary = primary.unwrap_or_else(|| d.sel.primary_index().min(ranges.len() - 1));
        let clipped = ranges
            .into_iter()
            .map(|r| Range::new(d.clip_pos(r.anchor), d.clip_pos(r.head)))
            .collect();
        let sel = Selection::normalized(clipped, primary, batch.config().selections_may_touch);
        batch.set_selection_inner_undo(doc, sel, &options)
    }

    /// 範囲を追加して主範囲にする
    pub fn add_selection(&mut self, doc: DocId, anchor: Pos, head: Pos, options: SelectionOptions) -> Result<()> {
        let mut batch = self.begin_batch();
        let d = batch.doc(doc)?;
        let mut ranges = d.sel.ranges().to_vec();
        let primary = ranges.len();
        ranges.push(Range::new(d.clip_pos(anchor), d.clip_pos(head)));
        let sel = Selection::normalized(ranges, primary, batch.config().selections_may_touch);
        batch.set_selection_inner_undo(doc, sel, &options)
    }

    /// 主範囲の先端を動かす（アンカーは保つ）
    pub fn extend_selection(&mut self, doc: DocId, head: Pos, other: Option<Pos>, options: SelectionOptions) -> Result<()> {
        let mut batch = self.begin_batch();
        let d = batch.doc(doc)?;
        let head = d.clip_pos(head);
        let other = other.map(|o| d.clip_pos(o));
        let range = extend_range(d.sel.primary(), head, other, true);
        batch.set_selection_inner_undo(doc, Selection::from_sorted(vec![range], 0), &options)
    }

    pub fn select_all(&mut self, doc: DocId) -> Result<()> {
        let mut batch = self.begin_batch();
        let d = batch.doc(doc)?;
        let first = d.first_line();
        let last = d.last_line();
        let end = Pos::new(last, d.get_line(last)?.chars().count());
        let sel = Selection::simple(Pos::new(first, 0), end);
        batch.set_selection_inner_undo(doc, sel, &SelectionOptions::no_scroll())
    }

    /// 最後の選択範囲イベントを置き換えて選択する（ドラッグ中の更新など）
    pub fn set_selection_replacing_history(&mut self, doc: DocId, sel: Selection, options: SelectionOptions) -> Result<()> {
        let mut batch = self.begin_batch();
        let hist = batch.doc(doc)?.history.clone();
        let replaced = {
            let mut hist = hist.borrow_mut();
            match hist.done.last_mut() {
                Some(last) if last.is_selection() => {
                    *last = crate::history::HistoryEvent::Selection(sel.clone());
                    true
                }
                _ => false,
            }
        };
        if replaced {
            batch.set_selection_no_undo(doc, sel, &options)
        } else {
            batch.set_selection_inner_undo(doc, sel, &options)
        }
    }

    /// 各範囲を水平に動かす
    ///
    /// 空の範囲か `extend` のときは先端を動かし、そうでなければ範囲の端へ畳む。
    /// `visually` を渡すと双方向テキストを表示順で移動する。
    pub fn move_h(
        &mut self,
        doc: DocId,
        dir: i32,
        unit: Unit,
        extend: bool,
        visually: Option<&dyn BidiOrder>,
    ) -> Result<()> {
        let mut batch = self.begin_batch();
        let sel = batch.doc(doc)?.sel.clone();
        let mut out = Vec::with_capacity(sel.len());
        for range in sel.ranges() {
            let head = if extend || range.is_empty() {
                batch.find_pos_h_once(doc, range.head, dir, unit, visually)?.pos
            } else if dir < 0 {
                range.from()
            } else {
                range.to()
            };
            out.push(extend_range(*range, head, None, extend));
        }
        let new_sel = Selection::normalized(out, sel.primary_index(), batch.config().selections_may_touch);
        let mut options = SelectionOptions::with_origin("+move");
        options.bias = Some(dir);
        batch.set_selection_inner_undo(doc, new_sel, &options)
    }

    /// 選択中のテキストを消す。何も選択していなければ各カーソルから1単位消す
    pub fn delete_h(&mut self, doc: DocId, dir: i32, unit: Unit) -> Result<()> {
        let mut batch = self.begin_batch();
        let sel = batch.doc(doc)?.sel.clone();
        if sel.something_selected() {
            return batch.replace_selection(doc, "", Collapse::End, Some("+delete"));
        }
        let mut kill: Vec<(Pos, Pos)> = Vec::new();
        for range in sel.ranges() {
            let other = batch.find_pos_h_once(doc, range.head, dir, unit, None)?.pos;
            let (mut from, to) = if dir < 0 { (other, range.head) } else { (range.head, other) };
            while let Some(&(last_from, last_to)) = kill.last() {
                if from > last_to {
                    break;
                }
                kill.pop();
                if last_from < from {
                    from = last_from;
                    break;
                }
            }
            kill.push((from, to));
        }
        for (from, to) in kill.into_iter().rev() {
            batch.replace_range(doc, "", from, Some(to), Some("+delete"))?;
        }
        Ok(())
    }

    /// `pos` から `amount` 単位だけ動いた位置
    pub fn find_pos_h(
        &mut self,
        doc: DocId,
        pos: Pos,
        amount: isize,
        unit: Unit,
        visually: Option<&dyn BidiOrder>,
    ) -> Result<PosH> {
        let mut batch = self.begin_batch();
        let dir = if amount < 0 { -1 } else { 1 };
        let mut cur = PosH {
            pos: batch.doc(doc)?.clip_pos(pos),
            hit_side: false,
        };
        for _ in 0..amount.unsigned_abs() {
            cur = batch.find_pos_h_once(doc, cur.pos, dir, unit, visually)?;
            if cur.hit_side {
                break;
            }
        }
        Ok(cur)
    }

    // ---- 内部処理 ----

    /// 1単位の水平移動
    pub(crate) fn find_pos_h_once(
        &mut self,
        doc: DocId,
        start: Pos,
        dir: i32,
        unit: Unit,
        visually: Option<&dyn BidiOrder>,
    ) -> Result<PosH> {
        let direction = self.config().direction;
        let d = self.doc(doc)?;
        let first = d.first_line();
        let last = d.last_line();
        let line_dir = if visually.is_some() && direction == Direction::Rtl {
            -dir
        } else {
            dir
        };

        let orig_dir = dir;
        let mut pos = start;
        let mut text = d.get_line(pos.line)?.to_string();
        let mut dir = dir;

        let move_once = |pos: &mut Pos, text: &mut String, dir: i32, bound_to_line: bool| -> bool {
            let next = match visually {
                Some(bidi) => {
                    let order = bidi.order(text, direction);
                    move_visually(text, *pos, dir, order.as_deref(), direction)
                }
                None => move_logically(text, *pos, dir),
            };
            if let Some(next) = next {
                *pos = next;
                return true;
            }
            if bound_to_line {
                return false;
            }
            let next_line = pos.line as isize + line_dir as isize;
            if next_line < first as isize || next_line > last as isize {
                return false;
            }
            let next_line = next_line as usize;
            let Ok(line_text) = d.get_line(next_line) else {
                return false;
            };
            *text = line_text.to_string();
            let order = visually.and_then(|bidi| bidi.order(text, direction));
            *pos = end_of_line(text, next_line, line_dir, visually.is_some(), order.as_deref(), direction);
            true
        };

        match unit {
            Unit::Char => {
                move_once(&mut pos, &mut text, dir, false);
            }
            Unit::Column => {
                move_once(&mut pos, &mut text, dir, true);
            }
            Unit::Word | Unit::Group => {
                let group = unit == Unit::Group;
                let mut saw: Option<CharType> = None;
                let mut first_step = true;
                loop {
                    if dir < 0 && !move_once(&mut pos, &mut text, dir, !first_step) {
                        break;
                    }
                    let cur = text.chars().nth(pos.col).unwrap_or('\n');
                    let mut kind = if is_word_char(cur) {
                        Some(CharType::Word)
                    } else if group && cur == '\n' {
                        Some(CharType::Newline)
                    } else if !group || cur.is_whitespace() {
                        None
                    } else {
                        Some(CharType::Punct)
                    };
                    if group && !first_step && kind.is_none() {
                        kind = Some(CharType::Space);
                    }
                    if saw.is_some() && saw != kind {
                        if dir < 0 {
                            dir = 1;
                            move_once(&mut pos, &mut text, dir, false);
                            pos.affinity = Some(Affinity::After);
                        }
                        break;
                    }
                    if kind.is_some() {
                        saw = kind;
                    }
                    if dir > 0 && !move_once(&mut pos, &mut text, dir, !first_step) {
                        break;
                    }
                    first_step = false;
                }
            }
        }

        let result = self.skip_atomic(doc, pos, Some(start), orig_dir, true)?;
        Ok(PosH {
            pos: result,
            hit_side: result.same_cursor(&start),
        })
    }

    /// 選択範囲を設定し履歴に残す
    pub(crate) fn set_selection_inner_undo(&mut self, doc: DocId, sel: Selection, options: &SelectionOptions) -> Result<()> {
        self.set_selection_no_undo(doc, sel, options)?;
        let op_id = self.batcher.op_id();
        let delay = self.config().history_event_delay();
        let d = self.doc(doc)?;
        let current = d.sel.clone();
        d.history.borrow_mut().add_selection(
            current,
            op_id,
            options.origin.as_deref(),
            options.clear_redo,
            Instant::now(),
            delay,
        );
        Ok(())
    }

    /// 履歴に残さずに選択範囲を設定する
    pub(crate) fn set_selection_no_undo(&mut self, doc: DocId, sel: Selection, options: &SelectionOptions) -> Result<()> {
        let current_head = self.doc(doc)?.sel.primary().head;
        let bias = options
            .bias
            .unwrap_or(if sel.primary().head < current_head { -1 } else { 1 });
        let skipped = self.skip_atomic_in_selection(doc, &sel, bias, true)?;
        self.set_selection_raw(doc, skipped, options.scroll)
    }

    /// 選択範囲を差し替え、変化があれば操作に記録する
    pub(crate) fn set_selection_raw(&mut self, doc: DocId, sel: Selection, scroll: bool) -> Result<()> {
        self.touch(doc);
        let d = self.doc_mut(doc)?;
        if d.sel == sel {
            return Ok(());
        }
        let head = sel.primary().head;
        d.sel = sel;
        if let Some(state) = self.batcher.state(doc, || 0.0) {
            state.selection_changed = true;
            if scroll {
                state.scroll_to = Some(head);
            }
        }
        Ok(())
    }

    /// 原子的マーカーの状態が変わったあとに選択範囲を確かめ直す
    pub(crate) fn recheck_selection(&mut self, doc: DocId) -> Result<()> {
        let sel = self.doc(doc)?.sel.clone();
        let skipped = self.skip_atomic_in_selection(doc, &sel, 1, false)?;
        self.set_selection_raw(doc, skipped, false)
    }

    /// すべての範囲の端を原子的マーカーの外へ逃がす
    pub(crate) fn skip_atomic_in_selection(
        &mut self,
        doc: DocId,
        sel: &Selection,
        bias: i32,
        may_clear: bool,
    ) -> Result<Selection> {
        let old = self.doc(doc)?.sel.clone();
        let same_len = old.len() == sel.len();
        let mut out: Option<Vec<Range>> = None;
        for (i, range) in sel.ranges().iter().enumerate() {
            let old_range = if same_len { old.ranges().get(i).copied() } else { None };
            let anchor = self.skip_atomic(doc, range.anchor, old_range.map(|r| r.anchor), bias, may_clear)?;
            let head = if range.head == range.anchor {
                anchor
            } else {
                self.skip_atomic(doc, range.head, old_range.map(|r| r.head), bias, may_clear)?
            };
            let moved = !anchor.same_cursor(&range.anchor) || !head.same_cursor(&range.head);
            if out.is_some() || moved {
                let ranges = out.get_or_insert_with(|| sel.ranges()[..i].to_vec());
                ranges.push(Range::new(anchor, head));
            }
        }
        Ok(match out {
            Some(ranges) => Selection::normalized(ranges, sel.primary_index(), self.config().selections_may_touch),
            None => sel.clone(),
        })
    }

    /// 位置を原子的マーカーの外へ逃がす
    ///
    /// 移動方向、クリアを許した移動方向、逆方向、クリアを許した逆方向の順に試し、
    /// どこにも置けなければ文書を編集不能にして先頭を返す。
    pub(crate) fn skip_atomic(
        &mut self,
        doc: DocId,
        pos: Pos,
        old: Option<Pos>,
        bias: i32,
        may_clear: bool,
    ) -> Result<Pos> {
        let dir = if bias == 0 { 1 } else { bias.signum() };
        let mut attempts = vec![(dir, may_clear)];
        if !may_clear {
            attempts.push((dir, true));
        }
        attempts.push((-dir, may_clear));
        if !may_clear {
            attempts.push((-dir, true));
        }
        for (dir, clear) in attempts {
            if let Some(found) = self.skip_atomic_inner(doc, pos, old, dir, clear)? {
                return Ok(found);
            }
        }
        let d = self.doc_mut(doc)?;
        if !d.cant_edit {
            debug!("{} has no legal cursor position near {}; editing disabled", doc, pos);
        }
        d.cant_edit = true;
        Ok(Pos::new(d.first_line(), 0))
    }

    /// 主範囲の先端が原子的マーカーの外にあるか（マーカーはクリアしない）
    pub(crate) fn has_legal_cursor_position(&mut self, doc: DocId) -> Result<bool> {
        let head = self.doc(doc)?.sel.primary().head;
        for dir in [1, -1] {
            if let Some(found) = self.skip_atomic_inner(doc, head, None, dir, false)? {
                if found == head {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// 1方向だけ試す。置ける位置がなければ `None`
    fn skip_atomic_inner(
        &mut self,
        doc: DocId,
        pos: Pos,
        old: Option<Pos>,
        dir: i32,
        may_clear: bool,
    ) -> Result<Option<Pos>> {
        let mut pos = pos;
        let mut old = old;
        'scan: loop {
            let d = self.doc(doc)?;
            let spans = d.lines.get(pos.line)?.spans().to_vec();
            for span in spans {
                let Some(marker) = self.markers.get(span.marker) else {
                    continue;
                };
                let left = marker.prevents_cursor_left();
                let right = marker.prevents_cursor_right();
                let after_start = span.from.map_or(true, |f| if left { f <= pos.col } else { f < pos.col });
                let before_end = span.to.map_or(true, |t| if right { t >= pos.col } else { t > pos.col });
                if !(after_start && before_end) {
                    continue;
                }
                if may_clear && marker.options().clear_on_enter {
                    let id = marker.id();
                    self.clear_marker_inner(id)?;
                    continue 'scan;
                }
                if !marker.is_atomic() {
                    continue;
                }
                let id = marker.id();
                if let Some(old_pos) = old {
                    let step = if dir < 0 { right } else { left };
                    if let Some(near) = self.atomic_edge(doc, id, dir > 0, step, -dir)? {
                        let diff = near.cmp(&old_pos);
                        let ahead = if dir < 0 { diff.is_lt() } else { diff.is_gt() };
                        if near.line == pos.line && ahead {
                            old = Some(pos);
                            pos = near;
                            continue 'scan;
                        }
                    }
                }
                let step = if dir < 0 { left } else { right };
                let far = self.atomic_edge(doc, id, dir < 0, step, dir)?;
                match far {
                    Some(far) => {
                        old = Some(pos);
                        pos = far;
                        continue 'scan;
                    }
                    None => return Ok(None),
                }
            }
            return Ok(Some(pos));
        }
    }

    /// マーカーの端（`start` なら始端）。`step` なら `move_dir` 方向へ1つ外へ出す
    fn atomic_edge(&self, doc: DocId, marker: MarkerId, start: bool, step: bool, move_dir: i32) -> Result<Option<Pos>> {
        let d = self.doc(doc)?;
        let Some(edge) = self.markers.get(marker).and_then(|m| m.find_side(&d.lines, start)) else {
            return Ok(None);
        };
        if !step {
            return Ok(Some(edge));
        }
        self.move_pos(doc, edge, move_dir)
    }

    /// 1文字隣の位置（行をまたぐ）。文書の端なら `None`
    fn move_pos(&self, doc: DocId, pos: Pos, dir: i32) -> Result<Option<Pos>> {
        let d = self.doc(doc)?;
        let len = d.lines.get(pos.line)?.len();
        if dir < 0 && pos.col == 0 {
            if pos.line > d.first_line() {
                return Ok(Some(d.clip_pos(Pos::new(pos.line - 1, usize::MAX))));
            }
            return Ok(None);
        }
        if dir > 0 && pos.col >= len {
            if pos.line < d.last_line() {
                return Ok(Some(Pos::new(pos.line + 1, 0)));
            }
            return Ok(None);
        }
        let col = if dir < 0 { pos.col - 1 } else { pos.col + 1 };
        Ok(Some(Pos::new(pos.line, col)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(line: usize, col: usize) -> Pos {
        Pos::new(line, col)
    }

    #[test]
    fn test_extend_range() {
        let range = Range::new(p(0, 2), p(0, 4));
        assert_eq!(extend_range(range, p(0, 6), None, true), Range::new(p(0, 2), p(0, 6)));
        assert_eq!(extend_range(range, p(0, 6), None, false), Range::cursor(p(0, 6)));
        assert_eq!(extend_range(range, p(0, 6), Some(p(0, 1)), false), Range::new(p(0, 1), p(0, 6)));
        // 先端とotherがアンカーをまたぐときはアンカーを入れ替える
        assert_eq!(extend_range(range, p(0, 0), Some(p(0, 5)), true), Range::new(p(0, 0), p(0, 5)));
    }

    fn head(engine: &Engine, doc: DocId) -> Pos {
        engine.doc(doc).unwrap().selection().primary().head
    }

    #[test]
    fn test_move_by_group_and_word() {
        let mut engine = Engine::default();
        let doc = engine.create_doc("foo.bar  baz");
        engine.move_h(doc, 1, Unit::Group, false, None).unwrap();
        assert_eq!(head(&engine, doc), p(0, 3));
        engine.move_h(doc, 1, Unit::Word, false, None).unwrap();
        assert_eq!(head(&engine, doc), p(0, 7));
        engine.move_h(doc, -1, Unit::Group, false, None).unwrap();
        assert_eq!(head(&engine, doc), p(0, 4));
    }

    #[test]
    fn test_move_char_crosses_lines_and_extends() {
        let mut engine = Engine::default();
        let doc = engine.create_doc("ab\ncd");
        engine.set_cursor(doc, p(0, 2), SelectionOptions::default()).unwrap();
        engine.move_h(doc, 1, Unit::Char, false, None).unwrap();
        assert_eq!(head(&engine, doc), p(1, 0));
        engine.move_h(doc, 1, Unit::Char, true, None).unwrap();
        let range = engine.doc(doc).unwrap().selection().primary();
        assert_eq!((range.anchor, range.head), (p(1, 0), p(1, 1)));
        // 選択中の左移動は範囲の始端へ畳む
        engine.move_h(doc, -1, Unit::Char, false, None).unwrap();
        assert_eq!(head(&engine, doc), p(1, 0));
        let hit = engine.find_pos_h(doc, p(1, 0), -10, Unit::Column, None).unwrap();
        assert!(hit.hit_side);
    }

    #[test]
    fn test_delete_h() {
        let mut engine = Engine::default();
        let doc = engine.create_doc("abc def");
        engine.set_cursor(doc, p(0, 7), SelectionOptions::default()).unwrap();
        engine.delete_h(doc, -1, Unit::Group).unwrap();
        assert_eq!(engine.doc(doc).unwrap().get_value(), "abc ");
        engine.delete_h(doc, -1, Unit::Char).unwrap();
        assert_eq!(engine.doc(doc).unwrap().get_value(), "abc");
        engine.set_selection(doc, p(0, 0), p(0, 2), SelectionOptions::default()).unwrap();
        engine.delete_h(doc, 1, Unit::Char).unwrap();
        assert_eq!(engine.doc(doc).unwrap().get_value(), "c");
    }

    #[test]
    fn test_word_chars() {
        assert!(is_word_char('a'));
        assert!(is_word_char('_'));
        assert!(is_word_char('あ'));
        assert!(!is_word_char('-'));
        assert!(!is_word_char(' '));
    }
}
