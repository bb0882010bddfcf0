//! 位置モデル
//!
//! 行・列（文字単位）と、双方向テキスト境界での向き（affinity）を持つ値型

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// 双方向テキスト境界上の位置がどちら側の文字に付くか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Affinity {
    /// 直前の文字に付く
    Before,
    /// 直後の文字に付く
    After,
}

/// ドキュメント内の位置
///
/// 比較・等価判定は `(line, col)` のみで行い、`affinity` は無視する。
#[derive(Debug, Clone, Copy)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
    pub affinity: Option<Affinity>,
}

impl Pos {
    pub const fn new(line: usize, col: usize) -> Self {
        Self {
            line,
            col,
            affinity: None,
        }
    }

    pub const fn with_affinity(line: usize, col: usize, affinity: Affinity) -> Self {
        Self {
            line,
            col,
            affinity: Some(affinity),
        }
    }

    /// 行・列・affinityがすべて等しいか
    pub fn same_cursor(&self, other: &Pos) -> bool {
        self == other && self.affinity == other.affinity
    }
}

impl PartialEq for Pos {
    fn eq(&self, other: &Self) -> bool {
        self.line == other.line && self.col == other.col
    }
}

impl Eq for Pos {}

impl PartialOrd for Pos {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pos {
    fn cmp(&self, other: &Self) -> Ordering {
        self.line.cmp(&other.line).then(self.col.cmp(&other.col))
    }
}

impl Hash for Pos {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.line.hash(state);
        self.col.hash(state);
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

impl From<(usize, usize)> for Pos {
    fn from((line, col): (usize, usize)) -> Self {
        Pos::new(line, col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_ignores_affinity() {
        let a = Pos::with_affinity(1, 2, Affinity::Before);
        let b = Pos::with_affinity(1, 2, Affinity::After);
        assert_eq!(a, b);
        assert!(!a.same_cursor(&b));
        assert!(Pos::new(0, 9) < Pos::new(1, 0));
        assert!(Pos::new(2, 1) > Pos::new(2, 0));
    }

    #[test]
    fn test_display() {
        assert_eq!(Pos::new(3, 4).to_string(), "3:4");
    }
}
