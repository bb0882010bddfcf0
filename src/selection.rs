//! 選択範囲モデル
//!
//! 選択範囲は不変値。変更のたびに新しい `Selection` を作る。
//! 範囲列は共有スライスで持ち、履歴スナップショットと構造を共有する。

use crate::position::Pos;
use std::cmp::{max, min};
use std::rc::Rc;

/// アンカーとヘッドの組
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub anchor: Pos,
    pub head: Pos,
}

impl Range {
    pub fn new(anchor: Pos, head: Pos) -> Self {
        Self { anchor, head }
    }

    /// 空の範囲（カーソル）
    pub fn cursor(pos: Pos) -> Self {
        Self::new(pos, pos)
    }

    pub fn from(&self) -> Pos {
        min(self.anchor, self.head)
    }

    pub fn to(&self) -> Pos {
        max(self.anchor, self.head)
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.anchor
    }

    /// ヘッドがアンカーより前にあるか
    pub fn is_inverted(&self) -> bool {
        self.head < self.anchor
    }
}

/// 範囲の順序付き集合と主範囲のインデックス
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    ranges: Rc<[Range]>,
    primary: usize,
}

impl Selection {
    /// 単一範囲の選択
    pub fn simple(anchor: Pos, head: Pos) -> Self {
        Self {
            ranges: Rc::from(vec![Range::new(anchor, head)]),
            primary: 0,
        }
    }

    pub fn cursor(pos: Pos) -> Self {
        Self::simple(pos, pos)
    }

    /// 正規化せずに作る（呼び出し側が不変条件を保証する）
    pub(crate) fn from_sorted(ranges: Vec<Range>, primary: usize) -> Self {
        let primary = primary.min(ranges.len().saturating_sub(1));
        Self {
            ranges: Rc::from(ranges),
            primary,
        }
    }

    /// 範囲をソートし、重なる範囲を結合して選択を作る
    ///
    /// `may_touch` が真のとき、非空の範囲は接しているだけなら結合しない。
    /// 空の範囲は接していれば常に結合する。
    pub fn normalized(ranges: Vec<Range>, primary: usize, may_touch: bool) -> Self {
        if ranges.is_empty() {
            return Self::cursor(Pos::new(0, 0));
        }
        let primary = primary.min(ranges.len() - 1);

        let mut tagged: Vec<(Range, bool)> = ranges
            .into_iter()
            .enumerate()
            .map(|(i, r)| (r, i == primary))
            .collect();
        tagged.sort_by(|a, b| a.0.from().cmp(&b.0.from()));
        let mut prim = tagged.iter().position(|(_, p)| *p).unwrap_or(0);
        let mut out: Vec<Range> = tagged.into_iter().map(|(r, _)| r).collect();

        let mut i = 1;
        while i < out.len() {
            let cur = out[i];
            let prev = out[i - 1];
            let diff = prev.to().cmp(&cur.from());
            let overlaps = if may_touch && !cur.is_empty() {
                diff.is_gt()
            } else {
                diff.is_ge()
            };
            if overlaps {
                let from = min(prev.from(), cur.from());
                let to = max(prev.to(), cur.to());
                let inverted = if prev.is_empty() {
                    cur.from() == cur.head
                } else {
                    prev.from() == prev.head
                };
                if i <= prim {
                    prim -= 1;
                }
                let merged = if inverted {
                    Range::new(to, from)
                } else {
                    Range::new(from, to)
                };
                out.splice(i - 1..=i, std::iter::once(merged));
            } else {
                i += 1;
            }
        }

        Self::from_sorted(out, prim)
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn primary_index(&self) -> usize {
        self.primary
    }

    pub fn primary(&self) -> Range {
        self.ranges[self.primary]
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// 空でない範囲があるか
    pub fn something_selected(&self) -> bool {
        self.ranges.iter().any(|r| !r.is_empty())
    }

    /// 位置を含む範囲のインデックス
    pub fn contains(&self, pos: Pos, end: Option<Pos>) -> Option<usize> {
        let end = end.unwrap_or(pos);
        self.ranges
            .iter()
            .position(|r| end >= r.from() && pos <= r.to())
    }

    /// すべての位置に関数を適用した選択（正規化しない）
    pub(crate) fn map_positions(&self, mut f: impl FnMut(Pos) -> Pos) -> Self {
        let ranges: Vec<Range> = self
            .ranges
            .iter()
            .map(|r| Range::new(f(r.anchor), f(r.head)))
            .collect();
        Self::from_sorted(ranges, self.primary)
    }

    /// 範囲列を共有しているか（スナップショットの構造共有の確認用）
    pub fn shares_storage(&self, other: &Selection) -> bool {
        Rc::ptr_eq(&self.ranges, &other.ranges)
    }

    /// 範囲が整列済みで互いに重ならないか
    pub fn is_normalized(&self, may_touch: bool) -> bool {
        self.ranges.windows(2).all(|pair| {
            let diff = pair[0].to().cmp(&pair[1].from());
            if may_touch && !pair[1].is_empty() {
                diff.is_le()
            } else {
                diff.is_lt()
            }
        })
    }
}
