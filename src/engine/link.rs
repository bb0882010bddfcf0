//! リンクした文書
//!
//! リンクは木構造になる。編集はリンクを辿ってすべての文書へ同じ変更として伝わり、
//! 履歴を共有するリンクだけが同じ `History` を指す。

use super::Engine;
use crate::document::{DocId, DocLink, Document};
use crate::error::{DocError, Result};
use crate::line_store::Line;
use log::debug;
use std::cell::RefCell;
use std::rc::Rc;

/// `link_doc` のオプション
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkOptions {
    /// 履歴を共有する
    pub shared_hist: bool,
    /// 表示する最初の行（省略時は元の文書の先頭）
    pub from: Option<usize>,
    /// 表示する範囲の終わり（排他的、省略時は元の文書の末尾）
    pub to: Option<usize>,
}

impl Engine {
    /// `source` の行 `[from, to)` を見せる文書を作ってリンクする
    pub fn link_doc(&mut self, source: DocId, options: LinkOptions) -> Result<DocId> {
        let mut batch = self.begin_batch();
        let line_height = batch.config.line_height;
        let d = batch.doc(source)?;
        let first = d.first_line();
        let end = first + d.line_count();
        let from = options.from.map_or(first, |f| f.clamp(first, end));
        let to = options.to.map_or(end, |t| t.clamp(from, end));

        let mut lines: Vec<Line> = d
            .get_lines(from, to)
            .into_iter()
            .map(|text| Line::new(text, Vec::new(), line_height))
            .collect();
        if lines.is_empty() {
            lines.push(Line::new(String::new(), Vec::new(), line_height));
        }
        let history = d.history.clone();

        let id = batch.alloc_doc_id();
        let mut copy = Document::from_lines(id, lines, from, &batch.config);
        if options.shared_hist {
            copy.history = history;
        }
        copy.links.push(DocLink {
            doc: source,
            shared_hist: options.shared_hist,
            is_parent: true,
        });
        batch.docs.insert(id, copy);
        batch.doc_mut(source)?.links.push(DocLink {
            doc: id,
            shared_hist: options.shared_hist,
            is_parent: false,
        });
        batch.copy_shared_markers(source, id)?;
        debug!(
            "linked {} to {} over lines {}..{} (shared history: {})",
            id, source, from, to, options.shared_hist
        );
        Ok(id)
    }

    /// リンクを切る。履歴を共有していたら `b` 側へ複製して分ける
    pub fn unlink_doc(&mut self, a: DocId, b: DocId) -> Result<()> {
        self.doc(b)?;
        if self.doc(a)?.link(b).is_none() {
            return Err(DocError::NotLinked { a, b });
        }
        self.doc_mut(a)?.links.retain(|l| l.doc != b);
        self.doc_mut(b)?.links.retain(|l| l.doc != a);
        self.detach_shared_markers(a);
        self.detach_shared_markers(b);

        if self.doc(a)?.shares_history_with(self.doc(b)?) {
            let hist_a = self.doc(a)?.history.clone();
            let mut split_ids = vec![b];
            split_ids.extend(self.linked_docs(b, true).into_iter().map(|(id, _)| id));
            let copy = hist_a.borrow_mut().copy_for_split(&split_ids);
            let split = Rc::new(RefCell::new(copy));
            for id in &split_ids {
                self.doc_mut(*id)?.history = split.clone();
            }
            debug!("unlinked {} from {}; history split for {} documents", b, a, split_ids.len());
        } else {
            debug!("unlinked {} from {}", b, a);
        }
        Ok(())
    }

    /// `doc` から辿れるリンク先と、そこまで履歴を共有し続けているか
    ///
    /// `shared_only` なら履歴を共有する経路だけを辿る。
    pub(crate) fn linked_docs(&self, doc: DocId, shared_only: bool) -> Vec<(DocId, bool)> {
        let mut out = Vec::new();
        let mut stack: Vec<(DocId, Option<DocId>, bool)> = vec![(doc, None, true)];
        while let Some((cur, skip, shared)) = stack.pop() {
            if cur != doc {
                out.push((cur, shared));
            }
            let Some(d) = self.docs.get(&cur) else {
                continue;
            };
            for rel in d.links.iter().rev() {
                if Some(rel.doc) == skip {
                    continue;
                }
                let shared = shared && rel.shared_hist;
                if shared_only && !shared {
                    continue;
                }
                stack.push((rel.doc, Some(cur), shared));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Change;
    use crate::position::Pos;

    fn p(line: usize, col: usize) -> Pos {
        Pos::new(line, col)
    }

    fn value(engine: &Engine, doc: DocId) -> String {
        engine.doc(doc).unwrap().get_value()
    }

    #[test]
    fn test_link_window_and_propagation() {
        let mut engine = Engine::default();
        let parent = engine.create_doc("a\nb\nc\nd\ne");
        let child = engine
            .link_doc(
                parent,
                LinkOptions {
                    from: Some(2),
                    to: Some(4),
                    ..LinkOptions::default()
                },
            )
            .unwrap();
        assert_eq!(value(&engine, child), "c\nd");
        assert_eq!(engine.doc(child).unwrap().first_line(), 2);

        engine.apply(parent, Change::insert(p(2, 0), "Z")).unwrap();
        assert_eq!(value(&engine, child), "Zc\nd");

        // 窓より前への挿入は first をずらすだけ
        engine.apply(parent, Change::insert(p(0, 0), "x\n")).unwrap();
        assert_eq!(engine.doc(child).unwrap().first_line(), 3);
        assert_eq!(value(&engine, child), "Zc\nd");

        engine.apply(child, Change::insert(p(4, 1), "!")).unwrap();
        assert_eq!(value(&engine, parent), "x\na\nb\nZc\nd!\ne");
    }

    #[test]
    fn test_linked_docs_walks_tree() {
        let mut engine = Engine::default();
        let root = engine.create_doc("x");
        let shared = engine
            .link_doc(
                root,
                LinkOptions {
                    shared_hist: true,
                    ..LinkOptions::default()
                },
            )
            .unwrap();
        let grandchild = engine.link_doc(shared, LinkOptions::default()).unwrap();

        let all = engine.linked_docs(root, false);
        assert_eq!(all, vec![(shared, true), (grandchild, false)]);
        assert_eq!(engine.linked_docs(root, true), vec![(shared, true)]);
        assert_eq!(engine.linked_docs(grandchild, false).len(), 2);
    }

    #[test]
    fn test_shared_history_undo_from_either_side() {
        let mut engine = Engine::default();
        let a = engine.create_doc("abc");
        let b = engine
            .link_doc(
                a,
                LinkOptions {
                    shared_hist: true,
                    ..LinkOptions::default()
                },
            )
            .unwrap();
        engine.apply(a, Change::insert(p(0, 3), "d")).unwrap();
        assert_eq!(value(&engine, b), "abcd");
        engine.undo(b).unwrap();
        assert_eq!(value(&engine, a), "abc");
        assert_eq!(value(&engine, b), "abc");
    }

    #[test]
    fn test_unlink_splits_history() {
        let mut engine = Engine::default();
        let a = engine.create_doc("abc");
        let b = engine
            .link_doc(
                a,
                LinkOptions {
                    shared_hist: true,
                    ..LinkOptions::default()
                },
            )
            .unwrap();
        engine.apply(a, Change::insert(p(0, 0), "1")).unwrap();
        engine.unlink_doc(a, b).unwrap();
        assert!(!engine.doc(a).unwrap().shares_history_with(engine.doc(b).unwrap()));
        assert_eq!(engine.history_size(b).unwrap(), (1, 0));

        engine.apply(a, Change::insert(p(0, 0), "2")).unwrap();
        assert_eq!(value(&engine, a), "21abc");
        assert_eq!(value(&engine, b), "1abc");

        let err = engine.unlink_doc(a, b).unwrap_err();
        assert_eq!(err, DocError::NotLinked { a, b });
    }
}
