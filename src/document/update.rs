//! 変更を行ストアへ反映する
//!
//! 行オブジェクトをできるだけ使い回し、削除・挿入は1組の `remove` + `insert` で行う。
//! スパンの付け外しに合わせてマーカー側の行リストも更新する。

use super::Document;
use crate::change::Change;
use crate::error::Result;
use crate::line_store::{Line, LineHandle, LineStore};
use crate::marker::collapsed::line_is_hidden;
use crate::marker::spans::SpanLayout;
use crate::marker::{MarkedSpan, MarkerTable};
use crate::text::{prefix, suffix};

/// 行頭から行頭までを置き換え、最後の挿入行が空の変更
///
/// 行境界ちょうどで始まるマーカーが不用意に伸びないよう特別に扱う。
pub(crate) fn is_whole_line_update(change: &Change) -> bool {
    change.from.col == 0 && change.to.col == 0 && change.text.last().is_some_and(|t| t.is_empty())
}

fn spans_for(layout: &Option<SpanLayout>, n: usize) -> Vec<MarkedSpan> {
    layout
        .as_ref()
        .and_then(|l| l.get(n))
        .and_then(|s| s.clone())
        .unwrap_or_default()
}

fn attach_spans(table: &mut MarkerTable, handle: LineHandle, spans: &[MarkedSpan]) {
    for span in spans {
        if let Some(marker) = table.get_mut(span.marker) {
            marker.attach_line(handle);
        }
    }
}

fn detach_spans(table: &mut MarkerTable, handle: LineHandle, spans: &[MarkedSpan]) {
    for span in spans {
        if let Some(marker) = table.get_mut(span.marker) {
            marker.detach_line(handle);
        }
    }
}

/// 既存の行のテキストとスパンを差し替える
fn update_line(store: &mut LineStore, table: &mut MarkerTable, handle: LineHandle, text: String, spans: Vec<MarkedSpan>) {
    let Some(line) = store.line_mut(handle) else {
        return;
    };
    let old = std::mem::replace(&mut line.spans, spans.clone());
    line.set_text(text);
    detach_spans(table, handle, &old);
    attach_spans(table, handle, &spans);
}

/// 新しい行を挿入し、スパンをマーカーに結び付ける
fn insert_lines(
    store: &mut LineStore,
    table: &mut MarkerTable,
    at: usize,
    lines: Vec<(String, Vec<MarkedSpan>)>,
    height: f64,
) -> Result<()> {
    let spans: Vec<Vec<MarkedSpan>> = lines.iter().map(|(_, s)| s.clone()).collect();
    let new_lines = lines
        .into_iter()
        .map(|(text, spans)| Line::new(text, spans, height))
        .collect();
    let handles = store.insert(at, new_lines)?;
    for (handle, spans) in handles.into_iter().zip(spans) {
        attach_spans(table, handle, &spans);
    }
    Ok(())
}

/// 行を取り除き、マーカーから切り離す
fn remove_lines(store: &mut LineStore, table: &mut MarkerTable, at: usize, count: usize) -> Result<()> {
    if count == 0 {
        return Ok(());
    }
    for handle in store.handles(at, at + count) {
        let spans = store.line(handle).map(|l| l.spans.clone()).unwrap_or_default();
        detach_spans(table, handle, &spans);
    }
    store.remove(at, count)?;
    Ok(())
}

/// 変更を文書の行に反映する
///
/// `change` は文書の範囲に収まっていること。
pub(crate) fn update_doc(
    doc: &mut Document,
    change: &Change,
    spans: Option<SpanLayout>,
    table: &mut MarkerTable,
    line_height: f64,
) -> Result<()> {
    let from = change.from;
    let to = change.to;
    let text = &change.text;
    let store = &mut doc.lines;
    let first_handle = store.handle_at(from.line)?;
    let last_handle = store.handle_at(to.line)?;
    let last_text = text.last().cloned().unwrap_or_default();
    let last_spans = spans_for(&spans, text.len() - 1);
    let nlines = to.line - from.line;
    let lines_for = |start: usize, end: usize| -> Vec<(String, Vec<MarkedSpan>)> {
        (start..end).map(|i| (text[i].clone(), spans_for(&spans, i))).collect()
    };

    if change.full {
        let first = store.first();
        let old_len = store.len();
        insert_lines(store, table, first, lines_for(0, text.len()), line_height)?;
        remove_lines(store, table, first + text.len(), old_len)?;
    } else if is_whole_line_update(change) {
        let added = lines_for(0, text.len() - 1);
        let keep = store.line(last_handle).map(|l| l.text().to_string()).unwrap_or_default();
        update_line(store, table, last_handle, keep, last_spans);
        remove_lines(store, table, from.line, nlines)?;
        if !added.is_empty() {
            insert_lines(store, table, from.line, added, line_height)?;
        }
    } else if first_handle == last_handle {
        let old = store.line(first_handle).map(|l| l.text().to_string()).unwrap_or_default();
        if text.len() == 1 {
            let joined = format!("{}{}{}", prefix(&old, from.col), last_text, suffix(&old, to.col));
            update_line(store, table, first_handle, joined, last_spans);
        } else {
            let mut added = lines_for(1, text.len() - 1);
            added.push((format!("{}{}", last_text, suffix(&old, to.col)), last_spans));
            let head = format!("{}{}", prefix(&old, from.col), text[0]);
            update_line(store, table, first_handle, head, spans_for(&spans, 0));
            insert_lines(store, table, from.line + 1, added, line_height)?;
        }
    } else {
        let first_text = store.line(first_handle).map(|l| l.text().to_string()).unwrap_or_default();
        let end_text = store.line(last_handle).map(|l| l.text().to_string()).unwrap_or_default();
        if text.len() == 1 {
            let joined = format!("{}{}{}", prefix(&first_text, from.col), text[0], suffix(&end_text, to.col));
            update_line(store, table, first_handle, joined, spans_for(&spans, 0));
            remove_lines(store, table, from.line + 1, nlines)?;
        } else {
            let head = format!("{}{}", prefix(&first_text, from.col), text[0]);
            update_line(store, table, first_handle, head, spans_for(&spans, 0));
            let tail = format!("{}{}", last_text, suffix(&end_text, to.col));
            update_line(store, table, last_handle, tail, last_spans);
            let added = lines_for(1, text.len() - 1);
            if nlines > 1 {
                remove_lines(store, table, from.line + 1, nlines - 1)?;
            }
            insert_lines(store, table, from.line + 1, added, line_height)?;
        }
    }

    refresh_heights(store, table, from.line, from.line + text.len(), line_height);
    Ok(())
}

/// 変更された行の高さを、隠れているかどうかに合わせて設定し直す
pub(crate) fn refresh_heights(store: &mut LineStore, table: &MarkerTable, from: usize, to: usize, line_height: f64) {
    for handle in store.handles(from, to) {
        let height = if line_is_hidden(store, table, handle) {
            0.0
        } else {
            line_height
        };
        store.set_height(handle, height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DocConfig;
    use crate::document::DocId;
    use crate::position::Pos;

    fn doc(text: &str) -> Document {
        Document::new(DocId::from_raw(1), text, 0, &DocConfig::default())
    }

    fn apply(d: &mut Document, change: Change) {
        let mut table = MarkerTable::new();
        update_doc(d, &change, None, &mut table, 1.0).unwrap();
    }

    #[test]
    fn test_same_line_replace() {
        let mut d = doc("abc\ndef");
        apply(&mut d, Change::from_text(Pos::new(0, 1), Pos::new(0, 2), "X"));
        assert_eq!(d.get_value(), "aXc\ndef");
    }

    #[test]
    fn test_split_and_join_lines() {
        let mut d = doc("abc\ndef");
        apply(&mut d, Change::from_text(Pos::new(0, 1), Pos::new(0, 1), "1\n2\n3"));
        assert_eq!(d.get_value(), "a1\n2\n3bc\ndef");
        apply(&mut d, Change::delete(Pos::new(0, 2), Pos::new(3, 1)));
        assert_eq!(d.get_value(), "a1ef");
    }

    #[test]
    fn test_multi_line_replace() {
        let mut d = doc("one\ntwo\nthree\nfour");
        apply(&mut d, Change::from_text(Pos::new(0, 1), Pos::new(2, 2), "X\nY"));
        assert_eq!(d.get_value(), "oX\nYree\nfour");
        assert_eq!(d.total_height(), 3.0);
    }

    #[test]
    fn test_whole_line_update_keeps_following_line() {
        let mut d = doc("a\nb\nc");
        let keep = d.lines.handle_at(2).unwrap();
        apply(&mut d, Change::from_text(Pos::new(1, 0), Pos::new(2, 0), "x\ny\n"));
        assert_eq!(d.get_value(), "a\nx\ny\nc");
        assert_eq!(d.lines.line_no(keep), Some(3));
    }

    #[test]
    fn test_full_replace() {
        let mut d = doc("a\nb\nc");
        let mut change = Change::from_text(Pos::new(0, 0), Pos::new(2, 1), "new\ntext");
        change.full = true;
        apply(&mut d, change);
        assert_eq!(d.get_value(), "new\ntext");
        assert_eq!(d.line_count(), 2);
    }
}
