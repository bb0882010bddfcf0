//! 双方向テキストとカーソル移動
//!
//! 視覚順序の計算そのものは外部の協調者（`BidiOrder`）に任せ、
//! ここでは得られた順序に沿ったカーソル移動だけを扱う。
//! 文字単位の移動は書記素クラスタ境界を尊重する。

use crate::position::{Affinity, Pos};
use crate::text::char_len;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// 基本の文字方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Ltr,
    Rtl,
}

/// 同じ埋め込みレベルを持つ連続区間（列は文字単位、`to` は排他的）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BidiPart {
    pub from: usize,
    pub to: usize,
    pub level: u8,
}

/// 行テキストの視覚順序を返す純粋関数
///
/// 一方向だけのテキストには `None`（特別な順序なし）を返してよい。
pub trait BidiOrder {
    fn order(&self, text: &str, direction: Direction) -> Option<Vec<BidiPart>>;
}

/// 常に「特別な順序なし」を返す実装
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBidi;

impl BidiOrder for NoBidi {
    fn order(&self, _text: &str, _direction: Direction) -> Option<Vec<BidiPart>> {
        None
    }
}

impl<F> BidiOrder for F
where
    F: Fn(&str, Direction) -> Option<Vec<BidiPart>>,
{
    fn order(&self, text: &str, direction: Direction) -> Option<Vec<BidiPart>> {
        self(text, direction)
    }
}

/// 書記素クラスタ境界（文字単位、0と末尾を含む）
fn grapheme_boundaries(text: &str) -> Vec<usize> {
    let mut out = Vec::new();
    let mut col = 0;
    for grapheme in text.graphemes(true) {
        out.push(col);
        col += grapheme.chars().count();
    }
    out.push(col);
    out
}

/// `col` から `dir` 方向へ1クラスタ進んだ列。行をはみ出すなら `None`
pub(crate) fn move_char_logically(text: &str, col: usize, dir: i32) -> Option<usize> {
    let bounds = grapheme_boundaries(text);
    if dir < 0 {
        bounds.iter().rev().copied().find(|&b| b < col)
    } else {
        bounds.iter().copied().find(|&b| b > col)
    }
}

/// 論理順で1文字移動
pub fn move_logically(text: &str, start: Pos, dir: i32) -> Option<Pos> {
    let col = move_char_logically(text, start.col, dir)?;
    let affinity = if dir < 0 {
        Affinity::After
    } else {
        Affinity::Before
    };
    Some(Pos::with_affinity(start.line, col, affinity))
}

/// 列を含む区間のインデックス
///
/// 区間境界上では affinity で前後どちらの区間かを選ぶ。
pub fn bidi_part_at(order: &[BidiPart], col: usize, affinity: Option<Affinity>) -> Option<usize> {
    let before = affinity == Some(Affinity::Before);
    let mut found = None;
    let mut other = None;
    for (i, part) in order.iter().enumerate() {
        if part.from < col && part.to > col {
            return Some(i);
        }
        if part.to == col {
            if part.from != part.to && before {
                found = Some(i);
            } else {
                other = Some(i);
            }
        }
        if part.from == col {
            if part.from != part.to && !before {
                found = Some(i);
            } else {
                other = Some(i);
            }
        }
    }
    found.or(other)
}

/// 視覚順で1文字移動（折り返しは考慮しない）
pub fn move_visually(
    text: &str,
    start: Pos,
    dir: i32,
    order: Option<&[BidiPart]>,
    direction: Direction,
) -> Option<Pos> {
    let order = match order {
        Some(order) if !order.is_empty() => order,
        _ => return move_logically(text, start, dir),
    };
    let len = char_len(text);
    let mut start = start;
    if start.col >= len {
        start = Pos::with_affinity(start.line, len, Affinity::Before);
    } else if start.col == 0 {
        start = Pos::with_affinity(start.line, 0, Affinity::After);
    }

    let part_pos = bidi_part_at(order, start.col, start.affinity)?;
    let part = order[part_pos];
    let within = if dir > 0 {
        part.to > start.col
    } else {
        part.from < start.col
    };
    if direction == Direction::Ltr && part.level % 2 == 0 && within {
        return move_logically(text, start, dir);
    }

    let mv = |col: usize, d: i32| move_char_logically(text, col, d);

    if direction == Direction::Rtl || part.level == 1 {
        let in_storage_order = (part.level == 1) == (dir < 0);
        if let Some(col) = mv(start.col, if in_storage_order { 1 } else { -1 }) {
            let inside = if in_storage_order {
                col <= part.to && col <= len
            } else {
                col >= part.from
            };
            if inside {
                let affinity = if in_storage_order {
                    Affinity::Before
                } else {
                    Affinity::After
                };
                return Some(Pos::with_affinity(start.line, col, affinity));
            }
        }
    }

    // 現在の区間から出て、同じ行の隣の区間を探す
    let mut idx = part_pos as isize + dir as isize;
    while idx >= 0 && (idx as usize) < order.len() {
        let part = order[idx as usize];
        let in_storage_order = (dir > 0) == (part.level != 1);
        let candidate = if in_storage_order {
            Some(0)
        } else {
            mv(len, -1)
        };
        if let Some(col) = candidate.filter(|&c| part.from <= c && c < part.to) {
            return Some(resolve(text, start.line, col, in_storage_order));
        }
        let candidate = if in_storage_order {
            Some(part.from)
        } else {
            mv(part.to, -1)
        };
        if let Some(col) = candidate.filter(|&c| c < len) {
            return Some(resolve(text, start.line, col, in_storage_order));
        }
        idx += dir as isize;
    }
    None
}

fn resolve(text: &str, line: usize, col: usize, in_storage_order: bool) -> Pos {
    if in_storage_order {
        let next = move_char_logically(text, col, 1).unwrap_or(col);
        Pos::with_affinity(line, next, Affinity::Before)
    } else {
        Pos::with_affinity(line, col, Affinity::After)
    }
}

/// 行の端の位置（`dir < 0` なら行末側、そうでなければ行頭側）
pub fn end_of_line(
    text: &str,
    line: usize,
    dir: i32,
    visually: bool,
    order: Option<&[BidiPart]>,
    direction: Direction,
) -> Pos {
    if visually {
        let dir = if direction == Direction::Rtl { -dir } else { dir };
        let part = order.and_then(|o| if dir < 0 { o.last() } else { o.first() });
        if let Some(part) = part {
            let in_storage_order = (dir < 0) == (part.level == 1);
            let affinity = if in_storage_order {
                Affinity::After
            } else {
                Affinity::Before
            };
            let col = if part.level > 0 || direction == Direction::Rtl {
                if in_storage_order {
                    part.from
                } else {
                    move_char_logically(text, part.to.saturating_sub(1), 1).unwrap_or(part.to)
                }
            } else if dir < 0 {
                part.to
            } else {
                part.from
            };
            return Pos::with_affinity(line, col, affinity);
        }
    }
    if dir < 0 {
        Pos::with_affinity(line, char_len(text), Affinity::Before)
    } else {
        Pos::with_affinity(line, 0, Affinity::After)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_logically_respects_graphemes() {
        // "e" + 結合アキュート + "x"
        let text = "e\u{301}x";
        let next = move_logically(text, Pos::new(0, 0), 1).unwrap();
        assert_eq!(next.col, 2);
        assert_eq!(next.affinity, Some(Affinity::Before));
        let back = move_logically(text, Pos::new(0, 2), -1).unwrap();
        assert_eq!(back.col, 0);
        assert!(move_logically(text, Pos::new(0, 3), 1).is_none());
        assert!(move_logically(text, Pos::new(0, 0), -1).is_none());
    }

    #[test]
    fn test_no_bidi_falls_back_to_logical() {
        let order = NoBidi.order("abc", Direction::Ltr);
        assert!(order.is_none());
        let pos = move_visually("abc", Pos::new(0, 1), 1, order.as_deref(), Direction::Ltr).unwrap();
        assert_eq!(pos.col, 2);
    }

    #[test]
    fn test_bidi_part_at_uses_affinity() {
        let order = [
            BidiPart { from: 0, to: 3, level: 0 },
            BidiPart { from: 3, to: 6, level: 1 },
        ];
        assert_eq!(bidi_part_at(&order, 1, None), Some(0));
        assert_eq!(bidi_part_at(&order, 3, Some(Affinity::Before)), Some(0));
        assert_eq!(bidi_part_at(&order, 3, Some(Affinity::After)), Some(1));
    }

    #[test]
    fn test_move_visually_inside_rtl_part_goes_backwards() {
        let order = [
            BidiPart { from: 0, to: 3, level: 0 },
            BidiPart { from: 3, to: 6, level: 1 },
        ];
        let text = "abcאבג";
        let start = Pos::with_affinity(0, 5, Affinity::After);
        let moved = move_visually(text, start, 1, Some(&order), Direction::Ltr).unwrap();
        assert_eq!(moved.col, 4);
    }

    #[test]
    fn test_closure_order() {
        let order = |text: &str, _dir: Direction| {
            Some(vec![BidiPart {
                from: 0,
                to: char_len(text),
                level: 1,
            }])
        };
        let parts = order.order("abc", Direction::Rtl).unwrap();
        assert_eq!(parts[0].to, 3);
    }

    #[test]
    fn test_end_of_line_logical() {
        assert_eq!(end_of_line("abcd", 2, -1, false, None, Direction::Ltr).col, 4);
        assert_eq!(end_of_line("abcd", 2, 1, false, None, Direction::Ltr).col, 0);
    }
}
