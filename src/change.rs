//! 変更記述
//!
//! `Change` は変更前の座標で `from..to` を `text` の行列で置き換えることを表す。
//! 位置と選択範囲を変更後の座標へ写す関数もここに置く。

use crate::document::DocId;
use crate::marker::MarkedSpan;
use crate::position::Pos;
use crate::selection::{Range, Selection};
use crate::text::{char_len, split_lines};
use std::collections::{BTreeMap, HashMap};

/// 履歴に保存された、変更範囲の行ごとのスパン配置
///
/// キーは変更開始行からのオフセット。
pub type StoredSpans = HashMap<DocId, BTreeMap<usize, Vec<MarkedSpan>>>;

/// 構造化された編集
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub from: Pos,
    pub to: Pos,
    /// 挿入する行（常に1要素以上）
    pub text: Vec<String>,
    pub origin: Option<String>,
    /// 文書全体の置き換え（スパンを引き継がない）
    pub(crate) full: bool,
    /// 履歴から再生するときに復元するスパン
    pub(crate) stored_spans: StoredSpans,
}

impl Change {
    pub fn new(from: Pos, to: Pos, text: Vec<String>) -> Self {
        let text = if text.is_empty() {
            vec![String::new()]
        } else {
            text
        };
        Self {
            from,
            to,
            text,
            origin: None,
            full: false,
            stored_spans: HashMap::new(),
        }
    }

    /// 文字列を行に分割して変更を作る
    pub fn from_text(from: Pos, to: Pos, text: &str) -> Self {
        Self::new(from, to, split_lines(text, None))
    }

    /// 純粋な挿入
    pub fn insert(at: Pos, text: &str) -> Self {
        Self::from_text(at, at, text)
    }

    /// 純粋な削除
    pub fn delete(from: Pos, to: Pos) -> Self {
        Self::new(from, to, vec![String::new()])
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// 何も変えない変更か
    pub fn is_noop(&self) -> bool {
        self.from == self.to && self.text.len() <= 1 && self.text.iter().all(String::is_empty)
    }

    /// 削除を伴わない挿入か
    pub fn is_insertion(&self) -> bool {
        self.from == self.to
    }

    /// 挿入テキストの終端（変更後の座標）
    pub fn end(&self) -> Pos {
        change_end(self.from, &self.text)
    }

    /// 変更による行数の増減
    pub fn line_delta(&self) -> isize {
        self.text.len() as isize - 1 - (self.to.line as isize - self.from.line as isize)
    }

    pub(crate) fn origin_str(&self) -> Option<&str> {
        self.origin.as_deref()
    }
}

/// `from` に `text` を置いたときの終端位置
pub(crate) fn change_end(from: Pos, text: &[String]) -> Pos {
    let last = text.last().map(|s| char_len(s)).unwrap_or(0);
    if text.len() <= 1 {
        Pos::new(from.line, from.col + last)
    } else {
        Pos::new(from.line + text.len() - 1, last)
    }
}

/// 変更前の位置を変更後の位置へ写す
///
/// 変更より前はそのまま、変更範囲内は挿入テキストの終端、
/// 変更より後ろは行・列の差分だけずらす。
pub fn adjust_for_change(pos: Pos, change: &Change) -> Pos {
    if pos < change.from {
        return pos;
    }
    if pos <= change.to {
        return change.end();
    }
    let end = change.end();
    let line = pos.line - (change.to.line - change.from.line) + change.text.len() - 1;
    let col = if pos.line == change.to.line {
        pos.col - change.to.col + end.col
    } else {
        pos.col
    };
    Pos::new(line, col)
}

/// 変更適用後の選択範囲を計算
pub fn compute_sel_after_change(sel: &Selection, change: &Change, may_touch: bool) -> Selection {
    let ranges = sel
        .ranges()
        .iter()
        .map(|r| {
            Range::new(
                adjust_for_change(r.anchor, change),
                adjust_for_change(r.head, change),
            )
        })
        .collect();
    Selection::normalized(ranges, sel.primary_index(), may_touch)
}

/// 置換後の選択範囲をどこに置くか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Collapse {
    /// 挿入テキストの末尾にカーソル
    #[default]
    End,
    /// 挿入テキストの先頭にカーソル
    Start,
    /// 挿入テキスト全体を選択（元の向きを保つ）
    Around,
}

fn offset_pos(pos: Pos, old: Pos, new: Pos) -> Pos {
    if pos.line == old.line {
        Pos::new(new.line, pos.col + new.col - old.col)
    } else {
        Pos::new(new.line + (pos.line - old.line), pos.col)
    }
}

/// 選択範囲ごとの置換を順に適用したあとの選択範囲
///
/// `changes` は選択範囲と同じ順序で並んでいること。
pub(crate) fn compute_replaced_sel(
    sel: &Selection,
    changes: &[Change],
    first_line: usize,
    hint: Collapse,
) -> Selection {
    let mut out = Vec::with_capacity(changes.len());
    let mut old_prev = Pos::new(first_line, 0);
    let mut new_prev = old_prev;
    for (i, change) in changes.iter().enumerate() {
        let from = offset_pos(change.from, old_prev, new_prev);
        let to = offset_pos(change.end(), old_prev, new_prev);
        old_prev = change.to;
        new_prev = to;
        let range = match hint {
            Collapse::Around => {
                let inverted = sel.ranges().get(i).is_some_and(|r| r.is_inverted());
                if inverted {
                    Range::new(to, from)
                } else {
                    Range::new(from, to)
                }
            }
            Collapse::Start | Collapse::End => Range::cursor(from),
        };
        out.push(range);
    }
    Selection::from_sorted(out, sel.primary_index())
}
