//! 文書
//!
//! 行ストア・選択範囲・履歴への参照・リンク情報をまとめる。
//! 変更はすべて `Engine` を通して行い、ここには問い合わせと
//! 変更の適用に使う内部操作だけを置く。

pub(crate) mod update;

use crate::config::DocConfig;
use crate::error::Result;
use crate::history::History;
use crate::line_store::{Line, LineStore};
use crate::position::Pos;
use crate::selection::{Range, Selection};
use crate::text::{char_len, char_slice, split_lines};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// 文書の識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocId(u32);

impl DocId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

/// 他の文書へのリンク
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DocLink {
    pub doc: DocId,
    pub shared_hist: bool,
    /// リンク先がこの文書の親（この文書が `link_doc` で作られた側）
    pub is_parent: bool,
}

/// 主範囲のどの端を返すか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorEnd {
    #[default]
    Head,
    Anchor,
    From,
    To,
}

/// 1つの文書
#[derive(Debug)]
pub struct Document {
    id: DocId,
    pub(crate) lines: LineStore,
    pub(crate) sel: Selection,
    pub(crate) history: Rc<RefCell<History>>,
    pub(crate) links: Vec<DocLink>,
    pub(crate) clean_generation: u64,
    pub(crate) cant_edit: bool,
    line_separator: Option<String>,
}

impl Document {
    pub(crate) fn new(id: DocId, text: &str, first: usize, config: &DocConfig) -> Self {
        let lines = split_lines(text, config.line_separator.as_deref())
            .into_iter()
            .map(|t| Line::new(t, Vec::new(), config.line_height))
            .collect();
        Self::from_lines(id, lines, first, config)
    }

    pub(crate) fn from_lines(id: DocId, lines: Vec<Line>, first: usize, config: &DocConfig) -> Self {
        Self {
            id,
            lines: LineStore::new(lines, first),
            sel: Selection::cursor(Pos::new(first, 0)),
            history: Rc::new(RefCell::new(History::new(config.undo_depth))),
            links: Vec::new(),
            clean_generation: 1,
            cant_edit: false,
            line_separator: config.line_separator.clone(),
        }
    }

    pub fn id(&self) -> DocId {
        self.id
    }

    pub fn first_line(&self) -> usize {
        self.lines.first()
    }

    pub fn last_line(&self) -> usize {
        self.lines.last_line()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn get_line(&self, n: usize) -> Result<&str> {
        Ok(self.lines.get(n)?.text())
    }

    /// 行ストア（読み取り専用）
    pub fn line_store(&self) -> &LineStore {
        &self.lines
    }

    fn separator(&self) -> &str {
        self.line_separator.as_deref().unwrap_or("\n")
    }

    /// `from..to` のテキスト（行区切りは設定値）
    pub fn get_range(&self, from: Pos, to: Pos) -> String {
        self.get_range_with(from, to, self.separator())
    }

    pub fn get_range_with(&self, from: Pos, to: Pos, sep: &str) -> String {
        let (from, to) = if to < from { (to, from) } else { (from, to) };
        let from = self.clip_pos(from);
        let to = self.clip_pos(to);
        self.get_between(from, to).join(sep)
    }

    /// 範囲内のテキストを行ごとに返す（文書外の行は含めない）
    pub(crate) fn get_between(&self, start: Pos, end: Pos) -> Vec<String> {
        let mut out = Vec::new();
        let mut n = start.line.max(self.first_line());
        for handle in self.lines.handles(start.line, end.line + 1) {
            let Some(line) = self.lines.line(handle) else {
                continue;
            };
            let mut text = line.text();
            if n == end.line {
                text = char_slice(text, 0, end.col);
            }
            if n == start.line {
                text = char_slice(text, start.col, char_len(text));
            }
            out.push(text.to_string());
            n += 1;
        }
        out
    }

    pub fn get_value(&self) -> String {
        self.get_lines(self.first_line(), self.first_line() + self.line_count())
            .join(self.separator())
    }

    /// `[from, to)` の行テキスト（範囲は丸める）
    pub fn get_lines(&self, from: usize, to: usize) -> Vec<String> {
        self.lines
            .handles(from, to)
            .into_iter()
            .filter_map(|h| self.lines.line(h).map(|l| l.text().to_string()))
            .collect()
    }

    /// 位置を文書内に丸める
    pub fn clip_pos(&self, pos: Pos) -> Pos {
        let first = self.first_line();
        if pos.line < first {
            return Pos::new(first, 0);
        }
        let last = self.last_line();
        if pos.line > last {
            let len = self.lines.get(last).map_or(0, |l| l.len());
            return Pos::new(last, len);
        }
        let len = self.lines.get(pos.line).map_or(0, |l| l.len());
        if pos.col > len {
            Pos::new(pos.line, len)
        } else {
            pos
        }
    }

    /// 高さ `h` を含む行番号
    pub fn line_at_height(&self, h: f64) -> usize {
        self.lines.line_at_height(h)
    }

    /// 行の上端の高さ
    pub fn height_at_line(&self, n: usize) -> Result<f64> {
        let handle = self.lines.handle_at(n)?;
        Ok(self.lines.height_above(handle).unwrap_or(0.0))
    }

    pub fn total_height(&self) -> f64 {
        self.lines.total_height()
    }

    pub fn selection(&self) -> &Selection {
        &self.sel
    }

    pub fn list_selections(&self) -> &[Range] {
        self.sel.ranges()
    }

    pub fn get_cursor(&self, which: CursorEnd) -> Pos {
        let range = self.sel.primary();
        match which {
            CursorEnd::Head => range.head,
            CursorEnd::Anchor => range.anchor,
            CursorEnd::From => range.from(),
            CursorEnd::To => range.to(),
        }
    }

    pub fn something_selected(&self) -> bool {
        self.sel.something_selected()
    }

    /// 各範囲のテキスト
    pub fn get_selections(&self) -> Vec<String> {
        self.sel
            .ranges()
            .iter()
            .map(|r| self.get_range(r.from(), r.to()))
            .collect()
    }

    /// 選択中のテキストを区切り文字で連結
    pub fn get_selection(&self) -> String {
        self.get_selections().join(self.separator())
    }

    /// 原子的マーカーに阻まれて編集できない状態か
    pub fn cant_edit(&self) -> bool {
        self.cant_edit
    }

    pub fn line_store_depth(&self) -> usize {
        self.lines.depth()
    }

    /// リンク中の文書
    pub fn linked_ids(&self) -> Vec<DocId> {
        self.links.iter().map(|l| l.doc).collect()
    }

    /// 取り消し・やり直しできる編集の数
    pub fn history_size(&self) -> (usize, usize) {
        self.history.borrow().size()
    }

    pub fn history_generation(&self) -> u64 {
        self.history.borrow().generation()
    }

    /// 指定世代（省略時は最後に保存した世代）から変わっていないか
    pub fn is_clean(&self, generation: Option<u64>) -> bool {
        self.history_generation() == generation.unwrap_or(self.clean_generation)
    }

    pub(crate) fn shares_history_with(&self, other: &Document) -> bool {
        Rc::ptr_eq(&self.history, &other.history)
    }

    /// 表示窓だけをずらす（テキストは変えない）
    pub(crate) fn shift(&mut self, distance: isize) {
        if distance == 0 {
            return;
        }
        let first = self.first_line().saturating_add_signed(distance);
        self.lines.set_first(first);
        self.sel = self.sel.map_positions(|p| {
            let mut moved = p;
            moved.line = p.line.saturating_add_signed(distance);
            moved
        });
    }

    pub(crate) fn link(&self, doc: DocId) -> Option<&DocLink> {
        self.links.iter().find(|l| l.doc == doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocError;

    fn doc(text: &str) -> Document {
        Document::new(DocId::from_raw(1), text, 0, &DocConfig::default())
    }

    #[test]
    fn test_queries() {
        let d = doc("abc\ndéf\nghi");
        assert_eq!(d.line_count(), 3);
        assert_eq!(d.last_line(), 2);
        assert_eq!(d.get_line(1).unwrap(), "déf");
        assert_eq!(d.get_range(Pos::new(0, 1), Pos::new(1, 2)), "bc\ndé");
        assert_eq!(d.get_range_with(Pos::new(1, 2), Pos::new(0, 1), "|"), "bc|dé");
        assert_eq!(d.get_value(), "abc\ndéf\nghi");
        assert_eq!(d.get_lines(1, 10), vec!["déf", "ghi"]);
        assert!(matches!(d.get_line(3), Err(DocError::LineOutOfRange { .. })));
    }

    #[test]
    fn test_clip_pos() {
        let d = doc("abc\nde");
        assert_eq!(d.clip_pos(Pos::new(0, 9)), Pos::new(0, 3));
        assert_eq!(d.clip_pos(Pos::new(7, 0)), Pos::new(1, 2));
        assert_eq!(d.clip_pos(Pos::new(1, 1)), Pos::new(1, 1));
    }

    #[test]
    fn test_first_line_offset() {
        let d = Document::new(DocId::from_raw(2), "x\ny", 10, &DocConfig::default());
        assert_eq!(d.first_line(), 10);
        assert_eq!(d.clip_pos(Pos::new(0, 0)), Pos::new(10, 0));
        assert_eq!(d.get_line(11).unwrap(), "y");
        assert_eq!(d.get_cursor(CursorEnd::Head), Pos::new(10, 0));
    }

    #[test]
    fn test_heights() {
        let d = doc("a\nb\nc");
        assert_eq!(d.total_height(), 3.0);
        assert_eq!(d.height_at_line(2).unwrap(), 2.0);
        assert_eq!(d.line_at_height(1.5), 1);
    }

    #[test]
    fn test_shift_moves_window_and_selection() {
        let mut d = Document::new(DocId::from_raw(3), "x\ny", 5, &DocConfig::default());
        d.shift(2);
        assert_eq!(d.first_line(), 7);
        assert_eq!(d.get_cursor(CursorEnd::Head), Pos::new(7, 0));
        d.shift(-3);
        assert_eq!(d.first_line(), 4);
    }

    #[test]
    fn test_clean_generation() {
        let d = doc("x");
        assert!(d.is_clean(None));
        assert!(!d.is_clean(Some(5)));
    }
}
