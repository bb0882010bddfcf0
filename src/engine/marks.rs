//! マーカーの作成・検索・クリア

use super::Engine;
use crate::change::Change;
use crate::document::update::refresh_heights;
use crate::document::DocId;
use crate::error::{DocError, Result};
use crate::history::Recorded;
use crate::marker::collapsed::{self, conflicting_collapsed_range};
use crate::marker::{MarkOptions, MarkedSpan, MarkerBehavior, MarkerId, MarkerRange};
use crate::operation::ChangeEvent;
use crate::position::Pos;
use log::debug;
use std::collections::HashSet;
use std::time::Instant;

impl Engine {
    /// `from..to` にマーカーを付ける
    ///
    /// 空の範囲で幅0のスパンを残さない種類なら、どの行にも付かないマーカーを返す。
    pub fn mark_text(&mut self, doc: DocId, from: Pos, to: Pos, options: MarkOptions) -> Result<MarkerId> {
        if from > to {
            return Err(DocError::InvertedRange { from, to });
        }
        let mut batch = self.begin_batch();
        if options.shared {
            batch.mark_text_shared(doc, from, to, options)
        } else {
            batch.mark_text_inner(doc, from, to, options)
        }
    }

    /// 幅0のマーカー
    pub fn set_bookmark(&mut self, doc: DocId, pos: Pos, insert_left: bool) -> Result<MarkerId> {
        self.mark_text(doc, pos, pos, MarkOptions::bookmark(insert_left))
    }

    /// リンク中のすべての文書に同じマーカーを付け、1つのグループにする
    fn mark_text_shared(&mut self, doc: DocId, from: Pos, to: Pos, options: MarkOptions) -> Result<MarkerId> {
        let options = MarkOptions {
            shared: false,
            ..options
        };
        // どれか1つでも折りたたみが衝突するなら、どの文書にも付けない
        let linked = self.linked_docs(doc, false);
        self.check_collapsed_conflict(doc, from, to, &options)?;
        for (other, _) in &linked {
            self.check_collapsed_conflict(*other, from, to, &options)?;
        }

        let primary = self.mark_text_inner(doc, from, to, options.clone())?;
        let mut members = vec![primary];
        for (other, _) in linked {
            let d = self.doc(other)?;
            let (other_from, other_to) = (d.clip_pos(from), d.clip_pos(to));
            members.push(self.mark_text_inner(other, other_from, other_to, options.clone())?);
        }
        self.markers.join_group(&members);
        Ok(primary)
    }

    /// 新しい折りたたみが `doc` の既存の折りたたみと部分的に重ならないか確かめる
    fn check_collapsed_conflict(&self, doc: DocId, from: Pos, to: Pos, options: &MarkOptions) -> Result<()> {
        if !options.kind.collapses() {
            return Ok(());
        }
        let d = self.doc(doc)?;
        let (from, to) = (d.clip_pos(from), d.clip_pos(to));
        let (left, right) = (options.inclusive_left, options.inclusive_right);
        let conflict = conflicting_collapsed_range(&d.lines, &self.markers, from.line, from, to, left, right)?
            || (from.line != to.line
                && conflicting_collapsed_range(&d.lines, &self.markers, to.line, from, to, left, right)?);
        if conflict {
            debug!("{}: collapsed range {}..{} conflicts with an existing fold", doc, from, to);
            return Err(DocError::CollapsedConflict);
        }
        Ok(())
    }

    pub(crate) fn mark_text_inner(&mut self, doc: DocId, from: Pos, to: Pos, options: MarkOptions) -> Result<MarkerId> {
        if from > to {
            return Err(DocError::InvertedRange { from, to });
        }
        let line_height = self.config.line_height;
        let d = self.doc(doc)?;
        let (from, to) = (d.clip_pos(from), d.clip_pos(to));

        let collapsed = options.kind.collapses();
        self.check_collapsed_conflict(doc, from, to, &options)?;

        let add_to_history = options.add_to_history;
        let id = self.markers.create(doc, options);
        let (read_only, atomic) = match self.markers.get(id) {
            Some(marker) => {
                if from == to && marker.clears_when_empty() {
                    return Ok(id);
                }
                (marker.read_only(), marker.is_atomic())
            }
            None => return Ok(id),
        };

        if add_to_history {
            let delay = self.config.history_event_delay();
            let d = self.doc(doc)?;
            let change = Change::new(from, to, d.get_between(from, to)).with_origin("markText");
            let recorded = d.history.borrow_mut().add_change(
                &change,
                &d.sel,
                d.sel.clone(),
                None,
                Instant::now(),
                delay,
                || self.history_change_from_change(d, &change),
            );
            if recorded == Recorded::NewGroup {
                self.queue_event(doc, ChangeEvent::HistoryAdded);
            }
        }

        self.touch(doc);
        let Engine { docs, markers, .. } = self;
        let d = docs.get_mut(&doc).ok_or(DocError::UnknownDocument(doc))?;
        for (i, handle) in d.lines.handles(from.line, to.line + 1).into_iter().enumerate() {
            let no = from.line + i;
            let span = MarkedSpan::new(
                id,
                (no == from.line).then_some(from.col),
                (no == to.line).then_some(to.col),
            );
            if let Some(line) = d.lines.line_mut(handle) {
                line.spans.push(span);
            }
            if let Some(marker) = markers.get_mut(id) {
                marker.attach_line(handle);
            }
        }
        if collapsed {
            refresh_heights(&mut d.lines, markers, from.line, to.line + 1, line_height);
        }
        if read_only && d.history_size() != (0, 0) {
            debug!("{}: read-only {} clears history", doc, id);
            self.clear_history(doc)?;
        }
        self.batcher.register_change(doc, 0.0, from.line, to.line + 1, 0);
        if atomic {
            self.recheck_selection(doc)?;
        }
        Ok(id)
    }

    /// マーカー（共有ならグループ全体）を取り除く
    pub fn clear_marker(&mut self, id: MarkerId) -> Result<()> {
        let mut batch = self.begin_batch();
        batch.clear_marker_inner(id)
    }

    pub(crate) fn clear_marker_inner(&mut self, id: MarkerId) -> Result<()> {
        if !self.markers.contains(id) {
            return Err(DocError::UnknownMarker(id));
        }
        for member in self.markers.group_members(id) {
            self.clear_single_marker(member)?;
        }
        Ok(())
    }

    fn clear_single_marker(&mut self, id: MarkerId) -> Result<()> {
        let Some(doc) = self.markers.get(id).map(|m| m.doc()) else {
            return Ok(());
        };
        if !self.docs.contains_key(&doc) {
            self.markers.remove(id);
            return Ok(());
        }
        self.touch(doc);
        let line_height = self.config.line_height;
        let Some(marker) = self.markers.remove(id) else {
            return Ok(());
        };
        let Some(d) = self.docs.get_mut(&doc) else {
            return Ok(());
        };

        let mut range: Option<(usize, usize)> = None;
        for &handle in &marker.lines {
            if let Some(no) = d.lines.line_no(handle) {
                range = Some(range.map_or((no, no), |(lo, hi)| (lo.min(no), hi.max(no))));
            }
            if let Some(line) = d.lines.line_mut(handle) {
                line.spans.retain(|s| s.marker != id);
            }
        }
        if let Some((min, max)) = range {
            if marker.is_collapsed() {
                refresh_heights(&mut d.lines, &self.markers, min, max + 1, line_height);
            }
            self.batcher.register_change(doc, 0.0, min, max + 1, 0);
        }
        debug!("{}: cleared {}", doc, id);

        let reenable = marker.is_atomic() && self.doc(doc)?.cant_edit;
        if reenable {
            self.doc_mut(doc)?.cant_edit = false;
            debug!("{}: {} removed, re-checking selection", doc, id);
            self.recheck_selection(doc)?;
        }
        self.queue_event(doc, ChangeEvent::MarkerCleared(id));
        Ok(())
    }

    /// マーカーの現在範囲（どの行にも付いていなければ `None`）
    pub fn find_marker(&self, id: MarkerId) -> Result<Option<MarkerRange>> {
        let marker = self.markers.get(id).ok_or(DocError::UnknownMarker(id))?;
        let d = self.doc(marker.doc())?;
        Ok(marker.find(&d.lines))
    }

    /// `from..to` に触れるマーカー
    pub fn find_marks(&self, doc: DocId, from: Pos, to: Pos) -> Result<Vec<MarkerId>> {
        let d = self.doc(doc)?;
        let (from, to) = (d.clip_pos(from), d.clip_pos(to));
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for (i, handle) in d.lines.handles(from.line, to.line + 1).into_iter().enumerate() {
            let no = from.line + i;
            let Some(line) = d.lines.line(handle) else {
                continue;
            };
            for span in line.spans() {
                let before = span.to.is_some_and(|t| no == from.line && from.col >= t);
                let continued = span.from.is_none() && no != from.line;
                let after = span.from.is_some_and(|f| no == to.line && f >= to.col);
                if !(before || continued || after) && seen.insert(span.marker) {
                    found.push(span.marker);
                }
            }
        }
        Ok(found)
    }

    /// 位置を含むマーカー（端を含む）
    pub fn find_marks_at(&self, doc: DocId, pos: Pos) -> Result<Vec<MarkerId>> {
        let d = self.doc(doc)?;
        let pos = d.clip_pos(pos);
        Ok(d.lines
            .get(pos.line)?
            .spans()
            .iter()
            .filter(|s| s.from.map_or(true, |f| f <= pos.col) && s.to.map_or(true, |t| t >= pos.col))
            .map(|s| s.marker)
            .collect())
    }

    /// 文書に付いているすべてのマーカー（id順）
    pub fn all_marks(&self, doc: DocId) -> Result<Vec<MarkerId>> {
        self.doc(doc)?;
        Ok(self
            .markers
            .markers_of(doc)
            .into_iter()
            .filter(|&id| self.markers.get(id).is_some_and(|m| m.is_attached()))
            .collect())
    }

    /// 行を含む視覚行の先頭行番号
    pub fn visual_line_no(&self, doc: DocId, n: usize) -> Result<usize> {
        collapsed::visual_line_no(&self.doc(doc)?.lines, &self.markers, n)
    }

    /// 行を含む視覚行の次の行番号
    pub fn visual_line_end_no(&self, doc: DocId, n: usize) -> Result<usize> {
        collapsed::visual_line_end_no(&self.doc(doc)?.lines, &self.markers, n)
    }

    pub fn line_is_hidden(&self, doc: DocId, n: usize) -> Result<bool> {
        let d = self.doc(doc)?;
        let handle = d.lines.handle_at(n)?;
        Ok(collapsed::line_is_hidden(&d.lines, &self.markers, handle))
    }

    /// `source` の共有マーカーを新しい文書にも付ける
    pub(crate) fn copy_shared_markers(&mut self, source: DocId, target: DocId) -> Result<()> {
        let mut seen_groups = HashSet::new();
        for id in self.markers.markers_of(source) {
            let Some(marker) = self.markers.get(id) else {
                continue;
            };
            let Some(group) = marker.group else {
                continue;
            };
            if !seen_groups.insert(group) {
                continue;
            }
            let Some(range) = marker.find(&self.doc(source)?.lines) else {
                continue;
            };
            let options = MarkOptions {
                shared: false,
                ..marker.options().clone()
            };
            let d = self.doc(target)?;
            let (from, to) = (d.clip_pos(range.from), d.clip_pos(range.to));
            if from == to {
                continue;
            }
            let copy = self.mark_text_inner(target, from, to, options)?;
            self.markers.add_to_group_of(id, copy);
        }
        Ok(())
    }

    /// `doc` から辿れなくなった文書のマーカーを共有グループから外す
    pub(crate) fn detach_shared_markers(&mut self, doc: DocId) {
        let mut reachable: HashSet<DocId> = self.linked_docs(doc, false).into_iter().map(|(d, _)| d).collect();
        reachable.insert(doc);
        for id in self.markers.markers_of(doc) {
            if !self.markers.get(id).is_some_and(|m| m.is_shared()) {
                continue;
            }
            for member in self.markers.group_members(id) {
                let outside = self.markers.get(member).is_some_and(|m| !reachable.contains(&m.doc()));
                if outside {
                    self.markers.leave_group(member);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SelectionOptions;

    fn p(line: usize, col: usize) -> Pos {
        Pos::new(line, col)
    }

    #[test]
    fn test_mark_and_find() {
        let mut engine = Engine::default();
        let doc = engine.create_doc("abc\ndef\nghi");
        let id = engine.mark_text(doc, p(0, 1), p(1, 2), MarkOptions::new()).unwrap();
        let range = engine.find_marker(id).unwrap().unwrap();
        assert_eq!((range.from, range.to), (p(0, 1), p(1, 2)));
        assert_eq!(engine.find_marks(doc, p(1, 0), p(2, 0)).unwrap(), vec![id]);
        assert!(engine.find_marks(doc, p(1, 2), p(2, 1)).unwrap().is_empty());
        assert_eq!(engine.find_marks_at(doc, p(1, 2)).unwrap(), vec![id]);
        assert_eq!(engine.all_marks(doc).unwrap(), vec![id]);
    }

    #[test]
    fn test_inverted_range() {
        let mut engine = Engine::default();
        let doc = engine.create_doc("abc");
        let err = engine.mark_text(doc, p(0, 2), p(0, 1), MarkOptions::new()).unwrap_err();
        assert!(matches!(err, DocError::InvertedRange { .. }));
    }

    #[test]
    fn test_empty_range_marker_is_not_attached() {
        let mut engine = Engine::default();
        let doc = engine.create_doc("abc");
        let id = engine.mark_text(doc, p(0, 1), p(0, 1), MarkOptions::new()).unwrap();
        assert_eq!(engine.find_marker(id).unwrap(), None);
        let bookmark = engine.set_bookmark(doc, p(0, 1), false).unwrap();
        let range = engine.find_marker(bookmark).unwrap().unwrap();
        assert_eq!(range.from, range.to);
    }

    #[test]
    fn test_clear_marker() {
        let mut engine = Engine::default();
        let doc = engine.create_doc("abc\ndef");
        let id = engine.mark_text(doc, p(0, 1), p(1, 1), MarkOptions::new()).unwrap();
        engine.clear_marker(id).unwrap();
        assert!(engine.all_marks(doc).unwrap().is_empty());
        assert!(engine.doc(doc).unwrap().get_line(0).is_ok());
        assert_eq!(engine.clear_marker(id), Err(DocError::UnknownMarker(id)));
    }

    #[test]
    fn test_collapsed_hides_lines_until_cleared() {
        let mut engine = Engine::default();
        let doc = engine.create_doc("a\nb\nc\nd");
        let fold = engine.mark_text(doc, p(0, 1), p(2, 1), MarkOptions::collapsed()).unwrap();
        assert!(engine.line_is_hidden(doc, 1).unwrap());
        assert!(engine.line_is_hidden(doc, 2).unwrap());
        assert!(!engine.line_is_hidden(doc, 3).unwrap());
        assert_eq!(engine.doc(doc).unwrap().total_height(), 2.0);
        assert_eq!(engine.visual_line_no(doc, 2).unwrap(), 0);
        assert_eq!(engine.visual_line_end_no(doc, 1).unwrap(), 3);

        engine.clear_marker(fold).unwrap();
        assert_eq!(engine.doc(doc).unwrap().total_height(), 4.0);
    }

    #[test]
    fn test_read_only_marker_clears_history() {
        let mut engine = Engine::default();
        let doc = engine.create_doc("abc");
        engine.replace_range(doc, "x", p(0, 0), None, None).unwrap();
        assert_eq!(engine.history_size(doc).unwrap(), (1, 0));
        engine
            .mark_text(doc, p(0, 1), p(0, 2), MarkOptions::new().read_only(true))
            .unwrap();
        assert_eq!(engine.history_size(doc).unwrap(), (0, 0));
    }

    #[test]
    fn test_add_to_history_marker_is_undone() {
        let mut engine = Engine::default();
        let doc = engine.create_doc("abcdef");
        let id = engine
            .mark_text(doc, p(0, 1), p(0, 4), MarkOptions::new().add_to_history(true))
            .unwrap();
        assert_eq!(engine.history_size(doc).unwrap(), (1, 0));
        engine.undo(doc).unwrap();
        assert_eq!(engine.doc(doc).unwrap().get_value(), "abcdef");
        assert_eq!(engine.find_marker(id).unwrap(), None);
    }

    #[test]
    fn test_atomic_marker_moves_cursor_out() {
        let mut engine = Engine::default();
        let doc = engine.create_doc("abcdef");
        engine
            .mark_text(doc, p(0, 1), p(0, 4), MarkOptions::new().atomic(true))
            .unwrap();
        // 手前から飛び込むと近い側の端で止まる
        engine.set_cursor(doc, p(0, 2), SelectionOptions::default()).unwrap();
        assert_eq!(engine.doc(doc).unwrap().get_cursor(Default::default()), p(0, 1));
        // 端から1文字進むと反対側の端へ抜ける
        engine.set_cursor(doc, p(0, 2), SelectionOptions::default()).unwrap();
        assert_eq!(engine.doc(doc).unwrap().get_cursor(Default::default()), p(0, 4));
    }
}
