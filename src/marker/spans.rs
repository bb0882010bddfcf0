//! スパンの切り直し
//!
//! 変更の前後で「はみ出す」スパンを求め、挿入後の各行に配り直す。
//! 読み取り専用範囲による変更の分割もここで扱う。

use super::{MarkedSpan, MarkerId, MarkerTable};
use crate::change::Change;
use crate::document::DocId;
use crate::line_store::LineStore;
use crate::position::Pos;
use crate::text::char_len;
use log::debug;

/// 変更後の各行に付けるスパン（`None` はスパンなし）
pub(crate) type SpanLayout = Vec<Option<Vec<MarkedSpan>>>;

fn span_for(spans: &[MarkedSpan], marker: MarkerId) -> Option<MarkedSpan> {
    spans.iter().copied().find(|s| s.marker == marker)
}

/// 変更開始位置より前にはみ出すスパン
pub(crate) fn spans_before(
    old: &[MarkedSpan],
    start_ch: usize,
    is_insert: bool,
    table: &MarkerTable,
) -> Vec<MarkedSpan> {
    let mut out = Vec::new();
    for span in old {
        let Some(marker) = table.get(span.marker) else {
            continue;
        };
        let starts_before = match span.from {
            None => true,
            Some(from) if marker.inclusive_left() => from <= start_ch,
            Some(from) => from < start_ch,
        };
        let bookmark_here = span.from == Some(start_ch)
            && marker.is_bookmark()
            && (!is_insert || !marker.insert_left());
        if starts_before || bookmark_here {
            let ends_after = match span.to {
                None => true,
                Some(to) if marker.inclusive_right() => to >= start_ch,
                Some(to) => to > start_ch,
            };
            out.push(MarkedSpan::new(
                span.marker,
                span.from,
                if ends_after { None } else { span.to },
            ));
        }
    }
    out
}

/// 変更終了位置より後ろにはみ出すスパン（列は終了位置からの相対）
pub(crate) fn spans_after(
    old: &[MarkedSpan],
    end_ch: usize,
    is_insert: bool,
    table: &MarkerTable,
) -> Vec<MarkedSpan> {
    let mut out = Vec::new();
    for span in old {
        let Some(marker) = table.get(span.marker) else {
            continue;
        };
        let ends_after = match span.to {
            None => true,
            Some(to) if marker.inclusive_right() => to >= end_ch,
            Some(to) => to > end_ch,
        };
        let bookmark_here = span.from == Some(end_ch)
            && marker.is_bookmark()
            && (!is_insert || marker.insert_left());
        if ends_after || bookmark_here {
            let starts_before = match span.from {
                None => true,
                Some(from) if marker.inclusive_left() => from <= end_ch,
                Some(from) => from < end_ch,
            };
            out.push(MarkedSpan::new(
                span.marker,
                if starts_before {
                    None
                } else {
                    span.from.map(|f| f.saturating_sub(end_ch))
                },
                span.to.map(|t| t.saturating_sub(end_ch)),
            ));
        }
    }
    out
}

/// 幅0のスパンを捨てる（空になれば `None`）
pub(crate) fn clear_empty_spans(spans: Vec<MarkedSpan>, table: &MarkerTable) -> Option<Vec<MarkedSpan>> {
    let kept: Vec<MarkedSpan> = spans
        .into_iter()
        .filter(|span| {
            let empty = span.from.is_some() && span.from == span.to;
            !(empty && table.get(span.marker).map_or(true, |m| m.clears_when_empty()))
        })
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept)
    }
}

/// 変更をまたいで伸びるスパンを、挿入後の各行の配置として計算する
pub(crate) fn stretch_spans_over_change(
    store: &LineStore,
    change: &Change,
    table: &MarkerTable,
) -> Option<SpanLayout> {
    if change.full {
        return None;
    }
    let old_first: &[MarkedSpan] = store.get(change.from.line).map(|l| l.spans()).unwrap_or(&[]);
    let old_last: &[MarkedSpan] = store.get(change.to.line).map(|l| l.spans()).unwrap_or(&[]);
    if old_first.is_empty() && old_last.is_empty() {
        return None;
    }

    let start_ch = change.from.col;
    let end_ch = change.to.col;
    let is_insert = change.from == change.to;
    let mut first = Some(spans_before(old_first, start_ch, is_insert, table)).filter(|v| !v.is_empty());
    let mut last = Some(spans_after(old_last, end_ch, is_insert, table)).filter(|v| !v.is_empty());

    let same_line = change.text.len() == 1;
    let last_text_len = change.text.last().map(|t| char_len(t)).unwrap_or(0);
    let offset = last_text_len + if same_line { start_ch } else { 0 };

    if let Some(first) = first.as_mut() {
        for span in first.iter_mut().filter(|s| s.to.is_none()) {
            match last.as_deref().and_then(|l| span_for(l, span.marker)) {
                None => span.to = Some(start_ch),
                Some(found) if same_line => span.to = found.to.map(|t| t + offset),
                Some(_) => {}
            }
        }
    }
    if let Some(last) = last.as_mut() {
        for span in last.iter_mut() {
            if let Some(to) = span.to {
                span.to = Some(to + offset);
            }
            match span.from {
                None => {
                    let merged = first.as_deref().and_then(|f| span_for(f, span.marker)).is_some();
                    if !merged {
                        span.from = Some(offset);
                        if same_line {
                            first.get_or_insert_with(Vec::new).push(*span);
                        }
                    }
                }
                Some(from) => {
                    span.from = Some(from + offset);
                    if same_line {
                        first.get_or_insert_with(Vec::new).push(*span);
                    }
                }
            }
        }
    }

    let first = first.and_then(|f| clear_empty_spans(f, table));
    let mut layout = vec![first.clone()];
    if !same_line {
        let last = last.and_then(|l| clear_empty_spans(l, table));
        let gap = change.text.len().saturating_sub(2);
        let gap_spans: Option<Vec<MarkedSpan>> = first
            .as_ref()
            .map(|f| {
                f.iter()
                    .filter(|s| s.to.is_none())
                    .map(|s| MarkedSpan::new(s.marker, None, None))
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty());
        for _ in 0..gap {
            layout.push(gap_spans.clone());
        }
        layout.push(last);
    }
    Some(layout)
}

/// 履歴に保存されたスパンから、クリア済みマーカーを除いた配置
pub(crate) fn get_old_spans(doc: DocId, change: &Change, table: &MarkerTable) -> Option<SpanLayout> {
    let found = change.stored_spans.get(&doc)?;
    let layout = (0..change.text.len())
        .map(|i| {
            found.get(&i).and_then(|spans| {
                let kept: Vec<MarkedSpan> = spans.iter().copied().filter(|s| table.contains(s.marker)).collect();
                if kept.is_empty() {
                    None
                } else {
                    Some(kept)
                }
            })
        })
        .collect();
    Some(layout)
}

/// 保存済みのスパンと、変更をまたいで伸びるスパンを合わせる
pub(crate) fn merge_old_spans(
    doc: DocId,
    store: &LineStore,
    change: &Change,
    table: &MarkerTable,
) -> Option<SpanLayout> {
    let old = get_old_spans(doc, change, table);
    let stretched = stretch_spans_over_change(store, change, table);
    let (mut old, stretched) = match (old, stretched) {
        (None, stretched) => return stretched,
        (old, None) => return old,
        (Some(old), Some(stretched)) => (old, stretched),
    };
    for (old_cur, stretch_cur) in old.iter_mut().zip(stretched) {
        match (old_cur.as_mut(), stretch_cur) {
            (Some(existing), Some(stretch)) => {
                for span in stretch {
                    if span_for(existing, span.marker).is_none() {
                        existing.push(span);
                    }
                }
            }
            (None, Some(stretch)) => *old_cur = Some(stretch),
            _ => {}
        }
    }
    Some(old)
}

/// 読み取り専用マーカーを避けて範囲を分割する
///
/// 読み取り専用マーカーがなければ `None`、範囲全体が読み取り専用なら空の列を返す。
pub(crate) fn remove_read_only_ranges(
    store: &LineStore,
    from: Pos,
    to: Pos,
    table: &MarkerTable,
) -> Option<Vec<(Pos, Pos)>> {
    let mut markers: Vec<MarkerId> = Vec::new();
    for handle in store.handles(from.line, to.line + 1) {
        let Some(line) = store.line(handle) else {
            continue;
        };
        for span in line.spans() {
            let read_only = table.get(span.marker).is_some_and(|m| m.read_only());
            if read_only && !markers.contains(&span.marker) {
                markers.push(span.marker);
            }
        }
    }
    if markers.is_empty() {
        return None;
    }

    let mut parts = vec![(from, to)];
    for id in markers {
        let Some(marker) = table.get(id) else {
            continue;
        };
        let Some(range) = marker.find(store) else {
            continue;
        };
        let mut j = 0;
        while j < parts.len() {
            let (part_from, part_to) = parts[j];
            if part_to < range.from || part_from > range.to {
                j += 1;
                continue;
            }
            let mut pieces = Vec::new();
            let dfrom = part_from.cmp(&range.from);
            let dto = part_to.cmp(&range.to);
            if dfrom.is_lt() || (!marker.inclusive_left() && dfrom.is_eq()) {
                pieces.push((part_from, range.from));
            }
            if dto.is_gt() || (!marker.inclusive_right() && dto.is_eq()) {
                pieces.push((range.to, part_to));
            }
            let added = pieces.len();
            parts.splice(j..=j, pieces);
            j += added;
        }
    }
    debug!("read-only markers split {}..{} into {} parts", from, to, parts.len());
    Some(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_store::Line;
    use crate::marker::MarkOptions;

    fn setup(options: MarkOptions) -> (MarkerTable, MarkerId) {
        let mut table = MarkerTable::new();
        let id = table.create(DocId::from_raw(1), options);
        (table, id)
    }

    #[test]
    fn test_spans_before_and_after() {
        let (table, id) = setup(MarkOptions::new());
        let old = [MarkedSpan::new(id, Some(2), Some(6))];
        let before = spans_before(&old, 4, false, &table);
        assert_eq!(before, vec![MarkedSpan::new(id, Some(2), None)]);
        let after = spans_after(&old, 4, false, &table);
        assert_eq!(after, vec![MarkedSpan::new(id, None, Some(2))]);
        // 変更より完全に前のスパンは後ろ側に残らない
        assert!(spans_after(&old, 7, false, &table).is_empty());
    }

    #[test]
    fn test_bookmark_insert_left() {
        let (table, id) = setup(MarkOptions::bookmark(false));
        let old = [MarkedSpan::new(id, Some(3), Some(3))];
        // 既定のブックマークは挿入テキストの前に残る
        assert!(!spans_before(&old, 3, true, &table).is_empty());
        assert!(spans_after(&old, 3, true, &table).is_empty());

        let (table, id) = setup(MarkOptions::bookmark(true));
        let old = [MarkedSpan::new(id, Some(3), Some(3))];
        assert!(spans_before(&old, 3, true, &table).is_empty());
        assert!(!spans_after(&old, 3, true, &table).is_empty());
    }

    #[test]
    fn test_stretch_same_line_insert_inside() {
        let (table, id) = setup(MarkOptions::new());
        let mut line = Line::new("abcdef".to_string(), Vec::new(), 1.0);
        line.spans = vec![MarkedSpan::new(id, Some(1), Some(4))];
        let store = LineStore::new(vec![line], 0);
        let change = Change::insert(Pos::new(0, 2), "XY");
        let layout = stretch_spans_over_change(&store, &change, &table).unwrap();
        assert_eq!(layout, vec![Some(vec![MarkedSpan::new(id, Some(1), Some(6))])]);
    }

    #[test]
    fn test_stretch_multiline_fills_gap() {
        let (table, id) = setup(MarkOptions::new());
        let mut line = Line::new("abcdef".to_string(), Vec::new(), 1.0);
        line.spans = vec![MarkedSpan::new(id, Some(1), Some(4))];
        let store = LineStore::new(vec![line], 0);
        let change = Change::insert(Pos::new(0, 2), "X\nY\nZ");
        let layout = stretch_spans_over_change(&store, &change, &table).unwrap();
        assert_eq!(layout.len(), 3);
        assert_eq!(layout[0], Some(vec![MarkedSpan::new(id, Some(1), None)]));
        assert_eq!(layout[1], Some(vec![MarkedSpan::new(id, None, None)]));
        assert_eq!(layout[2], Some(vec![MarkedSpan::new(id, None, Some(3))]));
    }

    #[test]
    fn test_deleting_marked_text_drops_span() {
        let (table, id) = setup(MarkOptions::new());
        let mut line = Line::new("abcdef".to_string(), Vec::new(), 1.0);
        line.spans = vec![MarkedSpan::new(id, Some(1), Some(4))];
        let store = LineStore::new(vec![line], 0);
        let change = Change::delete(Pos::new(0, 0), Pos::new(0, 5));
        let layout = stretch_spans_over_change(&store, &change, &table).unwrap();
        assert_eq!(layout, vec![None]);
    }

    #[test]
    fn test_read_only_split() {
        let (table, id) = setup(MarkOptions::new().read_only(true));
        let mut line = Line::new("abcdefgh".to_string(), Vec::new(), 1.0);
        line.spans = vec![MarkedSpan::new(id, Some(2), Some(5))];
        let store = LineStore::new(vec![line], 0);
        let handle = store.handle_at(0).unwrap();
        let mut table = table;
        table.get_mut(id).unwrap().attach_line(handle);

        let parts = remove_read_only_ranges(&store, Pos::new(0, 0), Pos::new(0, 8), &table).unwrap();
        assert_eq!(
            parts,
            vec![
                (Pos::new(0, 0), Pos::new(0, 2)),
                (Pos::new(0, 5), Pos::new(0, 8))
            ]
        );
        let inside = remove_read_only_ranges(&store, Pos::new(0, 3), Pos::new(0, 4), &table).unwrap();
        assert!(inside.is_empty());
    }
}
