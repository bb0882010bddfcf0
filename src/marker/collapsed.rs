//! 折りたたみマーカー
//!
//! 入れ子は許すが部分的な重なりは許さない。
//! 同じ行で始まる・終わる折りたたみが複数あるときは全順序で「外側」を決め、
//! どの行が隠れるか（視覚行の結合）を一意にする。

use super::{MarkedSpan, Marker, MarkerId, MarkerTable};
use crate::error::Result;
use crate::line_store::{LineHandle, LineStore};
use crate::position::Pos;
use std::cmp::Ordering;

fn extra_left(inclusive_left: bool) -> i8 {
    if inclusive_left {
        -1
    } else {
        0
    }
}

fn extra_right(inclusive_right: bool) -> i8 {
    if inclusive_right {
        1
    } else {
        0
    }
}

/// 折りたたみマーカーの全順序（大きい方が外側）
///
/// 行数、開始位置（包含なら外側）、終了位置、id の順で比べる。
pub(crate) fn compare_collapsed_markers(a: &Marker, b: &Marker, store: &LineStore) -> Ordering {
    let by_len = a.lines.len().cmp(&b.lines.len());
    if by_len != Ordering::Equal {
        return by_len;
    }
    if let (Some(a_pos), Some(b_pos)) = (a.find(store), b.find(store)) {
        let from_cmp = a_pos
            .from
            .cmp(&b_pos.from)
            .then(extra_left(a.inclusive_left()).cmp(&extra_left(b.inclusive_left())));
        if from_cmp != Ordering::Equal {
            return from_cmp.reverse();
        }
        let to_cmp = a_pos
            .to
            .cmp(&b_pos.to)
            .then(extra_right(a.inclusive_right()).cmp(&extra_right(b.inclusive_right())));
        if to_cmp != Ordering::Equal {
            return to_cmp;
        }
    }
    b.id().cmp(&a.id())
}

/// 行の始端（`start`）または終端で前後の行へ続く、最も外側の折りたたみ
pub(crate) fn collapsed_span_at_side(
    spans: &[MarkedSpan],
    start: bool,
    table: &MarkerTable,
    store: &LineStore,
) -> Option<MarkerId> {
    let mut found: Option<&Marker> = None;
    for span in spans {
        let Some(marker) = table.get(span.marker) else {
            continue;
        };
        if !marker.is_collapsed() {
            continue;
        }
        let open = if start { span.from } else { span.to }.is_none();
        let outer = found.map_or(true, |f| compare_collapsed_markers(f, marker, store) == Ordering::Less);
        if open && outer {
            found = Some(marker);
        }
    }
    found.map(|m| m.id())
}

/// 新しい折りたたみ `from..to` が既存の折りたたみと部分的に重なるか
pub(crate) fn conflicting_collapsed_range(
    store: &LineStore,
    table: &MarkerTable,
    line_no: usize,
    from: Pos,
    to: Pos,
    inclusive_left: bool,
    inclusive_right: bool,
) -> Result<bool> {
    let line = store.get(line_no)?;
    for span in line.spans() {
        let Some(marker) = table.get(span.marker) else {
            continue;
        };
        if !marker.is_collapsed() {
            continue;
        }
        let Some(found) = marker.find(store) else {
            continue;
        };
        let from_cmp = found
            .from
            .cmp(&from)
            .then(extra_left(marker.inclusive_left()).cmp(&extra_left(inclusive_left)));
        let to_cmp = found
            .to
            .cmp(&to)
            .then(extra_right(marker.inclusive_right()).cmp(&extra_right(inclusive_right)));
        let nested = (from_cmp.is_ge() && to_cmp.is_le()) || (from_cmp.is_le() && to_cmp.is_ge());
        if nested {
            continue;
        }
        let touches_left = marker.inclusive_right() && inclusive_left;
        let touches_right = marker.inclusive_left() && inclusive_right;
        let overlaps_left = if touches_left {
            found.to >= from
        } else {
            found.to > from
        };
        let overlaps_right = if touches_right {
            found.from <= to
        } else {
            found.from < to
        };
        if (from_cmp.is_le() && overlaps_left) || (from_cmp.is_ge() && overlaps_right) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// 行を含む視覚行の先頭行
pub(crate) fn visual_line(store: &LineStore, table: &MarkerTable, handle: LineHandle) -> LineHandle {
    walk_visual(store, table, handle, true)
}

/// 行を含む視覚行の最終行
pub(crate) fn visual_line_end(store: &LineStore, table: &MarkerTable, handle: LineHandle) -> LineHandle {
    walk_visual(store, table, handle, false)
}

fn walk_visual(store: &LineStore, table: &MarkerTable, handle: LineHandle, start: bool) -> LineHandle {
    let mut line = handle;
    loop {
        let Some(spans) = store.line(line).map(|l| l.spans()) else {
            return line;
        };
        let next = collapsed_span_at_side(spans, start, table, store)
            .and_then(|id| table.get(id))
            .and_then(|marker| marker.edge_line(store, start));
        match next {
            Some(next) if next != line => line = next,
            _ => return line,
        }
    }
}

/// 行番号を含む視覚行の先頭行番号
pub(crate) fn visual_line_no(store: &LineStore, table: &MarkerTable, n: usize) -> Result<usize> {
    let handle = store.handle_at(n)?;
    let vis = visual_line(store, table, handle);
    if vis == handle {
        return Ok(n);
    }
    Ok(store.line_no(vis).unwrap_or(n))
}

/// 行番号を含む視覚行の次の行番号
pub(crate) fn visual_line_end_no(store: &LineStore, table: &MarkerTable, n: usize) -> Result<usize> {
    if n > store.last_line() {
        return Ok(n);
    }
    let handle = store.handle_at(n)?;
    if !line_is_hidden(store, table, handle) {
        return Ok(n);
    }
    let end = visual_line_end(store, table, handle);
    Ok(store.line_no(end).map_or(n, |no| no + 1))
}

/// 行が折りたたみで完全に隠れているか
pub(crate) fn line_is_hidden(store: &LineStore, table: &MarkerTable, handle: LineHandle) -> bool {
    let Some(line) = store.line(handle) else {
        return false;
    };
    for span in line.spans() {
        let Some(marker) = table.get(span.marker) else {
            continue;
        };
        if !marker.is_collapsed() {
            continue;
        }
        if span.from.is_none() {
            return true;
        }
        if marker.widget().is_some() {
            continue;
        }
        if span.from == Some(0) && marker.inclusive_left() && hidden_inner(store, table, handle, *span) {
            return true;
        }
    }
    false
}

fn hidden_inner(store: &LineStore, table: &MarkerTable, handle: LineHandle, span: MarkedSpan) -> bool {
    let Some(marker) = table.get(span.marker) else {
        return false;
    };
    if span.to.is_none() {
        let Some(end) = marker.edge_line(store, false) else {
            return false;
        };
        let Some(end_span) = store.line(end).and_then(|l| l.span_for(span.marker)) else {
            return false;
        };
        if end == handle {
            return false;
        }
        return hidden_inner(store, table, end, end_span);
    }
    let Some(line) = store.line(handle) else {
        return false;
    };
    if marker.inclusive_right() && span.to == Some(line.len()) {
        return true;
    }
    for sp in line.spans() {
        if *sp == span {
            continue;
        }
        let Some(other) = table.get(sp.marker) else {
            continue;
        };
        if other.is_collapsed()
            && other.widget().is_none()
            && sp.from == span.to
            && (sp.to.is_none() || sp.to != span.from)
            && (other.inclusive_left() || marker.inclusive_right())
            && hidden_inner(store, table, handle, *sp)
        {
            return true;
        }
    }
    false
}
