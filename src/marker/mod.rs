//! マーカー（テキストに付くメタデータ範囲）
//!
//! マーカー本体は `MarkerTable` に置き、各行には `MarkedSpan` だけを持たせる。
//! 複数行にまたがるマーカーは行ごとのスパンが同じ `MarkerId` を指す。

pub mod collapsed;
pub mod spans;

use crate::document::DocId;
use crate::line_store::{LineHandle, LineStore};
use crate::position::Pos;
use std::collections::HashMap;
use std::fmt;

/// マーカーの識別子（作成順に単調増加）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(u32);

impl MarkerId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "marker#{}", self.0)
    }
}

/// 共有マーカーのグループ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct GroupId(u32);

/// 折りたたみ範囲を置き換えるウィジェットへの不透明な参照
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WidgetRef(pub u64);

/// 行に付くスパン。`None` は前後の行へ続くことを表す
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkedSpan {
    pub marker: MarkerId,
    pub from: Option<usize>,
    pub to: Option<usize>,
}

impl MarkedSpan {
    pub fn new(marker: MarkerId, from: Option<usize>, to: Option<usize>) -> Self {
        Self { marker, from, to }
    }
}

/// マーカーの種類
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MarkerKind {
    /// 通常の範囲
    #[default]
    Range,
    /// 幅0の位置
    Bookmark { insert_left: bool },
    /// 範囲を隠す（ウィジェットで置き換えることもある）
    Collapsed { widget: Option<WidgetRef> },
}

/// 種類ごとに異なる振る舞い
pub trait MarkerBehavior {
    /// 範囲を隠すか
    fn collapses(&self) -> bool;
    fn is_bookmark(&self) -> bool;
    /// 位置ちょうどへの挿入でマーカーが挿入テキストの右に残るか
    fn insert_left(&self) -> bool;
    /// 種類として原子的か
    fn forces_atomic(&self) -> bool;
    /// 幅0になったスパンを既定で捨てるか
    fn clears_when_empty_by_default(&self) -> bool;
    fn widget(&self) -> Option<&WidgetRef>;
}

impl MarkerBehavior for MarkerKind {
    fn collapses(&self) -> bool {
        matches!(self, MarkerKind::Collapsed { .. })
    }

    fn is_bookmark(&self) -> bool {
        matches!(self, MarkerKind::Bookmark { .. })
    }

    fn insert_left(&self) -> bool {
        matches!(self, MarkerKind::Bookmark { insert_left: true })
    }

    fn forces_atomic(&self) -> bool {
        self.collapses()
    }

    fn clears_when_empty_by_default(&self) -> bool {
        !self.is_bookmark()
    }

    fn widget(&self) -> Option<&WidgetRef> {
        match self {
            MarkerKind::Collapsed { widget } => widget.as_ref(),
            _ => None,
        }
    }
}

/// マーカー作成オプション
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarkOptions {
    pub kind: MarkerKind,
    pub atomic: bool,
    pub read_only: bool,
    pub inclusive_left: bool,
    pub inclusive_right: bool,
    pub clear_on_enter: bool,
    pub clear_when_empty: Option<bool>,
    pub add_to_history: bool,
    pub shared: bool,
    pub select_left: Option<bool>,
    pub select_right: Option<bool>,
    pub class_name: Option<String>,
    pub title: Option<String>,
}

impl MarkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bookmark(insert_left: bool) -> Self {
        Self {
            kind: MarkerKind::Bookmark { insert_left },
            ..Self::default()
        }
    }

    pub fn collapsed() -> Self {
        Self {
            kind: MarkerKind::Collapsed { widget: None },
            ..Self::default()
        }
    }

    /// ウィジェットで置き換える（折りたたみを伴う）
    pub fn widget(mut self, widget: WidgetRef) -> Self {
        self.kind = MarkerKind::Collapsed {
            widget: Some(widget),
        };
        self
    }

    pub fn atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn inclusive_left(mut self, inclusive: bool) -> Self {
        self.inclusive_left = inclusive;
        self
    }

    pub fn inclusive_right(mut self, inclusive: bool) -> Self {
        self.inclusive_right = inclusive;
        self
    }

    pub fn clear_on_enter(mut self, clear: bool) -> Self {
        self.clear_on_enter = clear;
        self
    }

    pub fn clear_when_empty(mut self, clear: bool) -> Self {
        self.clear_when_empty = Some(clear);
        self
    }

    pub fn add_to_history(mut self, add: bool) -> Self {
        self.add_to_history = add;
        self
    }

    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn select_left(mut self, select: bool) -> Self {
        self.select_left = Some(select);
        self
    }

    pub fn select_right(mut self, select: bool) -> Self {
        self.select_right = Some(select);
        self
    }

    pub fn class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// マーカーの現在範囲
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerRange {
    pub from: Pos,
    pub to: Pos,
}

/// マーカー本体
#[derive(Debug, Clone)]
pub struct Marker {
    id: MarkerId,
    doc: DocId,
    options: MarkOptions,
    pub(crate) lines: Vec<LineHandle>,
    pub(crate) group: Option<GroupId>,
}

impl Marker {
    pub fn id(&self) -> MarkerId {
        self.id
    }

    pub fn doc(&self) -> DocId {
        self.doc
    }

    pub fn kind(&self) -> &MarkerKind {
        &self.options.kind
    }

    pub fn options(&self) -> &MarkOptions {
        &self.options
    }

    pub fn is_atomic(&self) -> bool {
        self.options.atomic || self.options.kind.forces_atomic()
    }

    pub fn is_collapsed(&self) -> bool {
        self.options.kind.collapses()
    }

    pub fn is_bookmark(&self) -> bool {
        self.options.kind.is_bookmark()
    }

    pub fn insert_left(&self) -> bool {
        self.options.kind.insert_left()
    }

    pub fn widget(&self) -> Option<&WidgetRef> {
        self.options.kind.widget()
    }

    pub fn read_only(&self) -> bool {
        self.options.read_only
    }

    pub fn inclusive_left(&self) -> bool {
        self.options.inclusive_left
    }

    pub fn inclusive_right(&self) -> bool {
        self.options.inclusive_right
    }

    pub fn clears_when_empty(&self) -> bool {
        self.options
            .clear_when_empty
            .unwrap_or_else(|| self.options.kind.clears_when_empty_by_default())
    }

    /// カーソルをマーカーの左端に置けないか
    pub(crate) fn prevents_cursor_left(&self) -> bool {
        self.options
            .select_left
            .map_or(self.options.inclusive_left, |select| !select)
    }

    /// カーソルをマーカーの右端に置けないか
    pub(crate) fn prevents_cursor_right(&self) -> bool {
        self.options
            .select_right
            .map_or(self.options.inclusive_right, |select| !select)
    }

    pub fn is_shared(&self) -> bool {
        self.group.is_some()
    }

    /// いずれかの行に付いているか
    pub fn is_attached(&self) -> bool {
        !self.lines.is_empty()
    }

    pub(crate) fn attach_line(&mut self, line: LineHandle) {
        self.lines.push(line);
    }

    pub(crate) fn detach_line(&mut self, line: LineHandle) {
        if let Some(i) = self.lines.iter().position(|&h| h == line) {
            self.lines.remove(i);
        }
    }

    /// 現在の範囲
    pub fn find(&self, store: &LineStore) -> Option<MarkerRange> {
        let mut from = None;
        let mut to = None;
        for &handle in &self.lines {
            let (Some(line), Some(no)) = (store.line(handle), store.line_no(handle)) else {
                continue;
            };
            let Some(span) = line.span_for(self.id) else {
                continue;
            };
            if let Some(col) = span.from {
                from = Some(Pos::new(no, col));
            }
            if let Some(col) = span.to {
                to = Some(Pos::new(no, col));
            }
        }
        Some(MarkerRange {
            from: from?,
            to: to?,
        })
    }

    /// 始端（`start`）または終端の位置
    pub(crate) fn find_side(&self, store: &LineStore, start: bool) -> Option<Pos> {
        let handle = self.edge_line(store, start)?;
        let span = store.line(handle)?.span_for(self.id)?;
        let col = if start { span.from } else { span.to }?;
        Some(Pos::new(store.line_no(handle)?, col))
    }

    /// 始端（`start`）または終端を含む行
    pub(crate) fn edge_line(&self, store: &LineStore, start: bool) -> Option<LineHandle> {
        self.lines.iter().copied().find(|&handle| {
            store
                .line(handle)
                .and_then(|line| line.span_for(self.id))
                .is_some_and(|span| {
                    if start {
                        span.from.is_some()
                    } else {
                        span.to.is_some()
                    }
                })
        })
    }
}

/// エンジン内のすべてのマーカー
#[derive(Debug, Clone, Default)]
pub struct MarkerTable {
    markers: HashMap<MarkerId, Marker>,
    groups: HashMap<GroupId, Vec<MarkerId>>,
    next_id: u32,
    next_group: u32,
}

impl MarkerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn create(&mut self, doc: DocId, options: MarkOptions) -> MarkerId {
        self.next_id += 1;
        let id = MarkerId(self.next_id);
        self.markers.insert(
            id,
            Marker {
                id,
                doc,
                options,
                lines: Vec::new(),
                group: None,
            },
        );
        id
    }

    pub fn get(&self, id: MarkerId) -> Option<&Marker> {
        self.markers.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: MarkerId) -> Option<&mut Marker> {
        self.markers.get_mut(&id)
    }

    pub fn contains(&self, id: MarkerId) -> bool {
        self.markers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// テーブルから取り除く（グループからも外す）
    pub(crate) fn remove(&mut self, id: MarkerId) -> Option<Marker> {
        let marker = self.markers.remove(&id)?;
        if let Some(group) = marker.group {
            self.drop_from_group(group, id);
        }
        Some(marker)
    }

    /// グループから1つ外し、残りが1つ以下ならグループを解散する
    fn drop_from_group(&mut self, group: GroupId, id: MarkerId) {
        let remaining = match self.groups.get_mut(&group) {
            Some(members) => {
                members.retain(|&m| m != id);
                members.len()
            }
            None => return,
        };
        if remaining < 2 {
            for other in self.groups.remove(&group).unwrap_or_default() {
                if let Some(marker) = self.markers.get_mut(&other) {
                    marker.group = None;
                }
            }
        }
    }

    /// マーカーを1つの共有グループにまとめる
    pub(crate) fn join_group(&mut self, ids: &[MarkerId]) {
        if ids.len() < 2 {
            return;
        }
        self.next_group += 1;
        let group = GroupId(self.next_group);
        for id in ids {
            if let Some(marker) = self.markers.get_mut(id) {
                marker.group = Some(group);
            }
        }
        self.groups.insert(group, ids.to_vec());
    }

    /// 既存グループへ追加する
    pub(crate) fn add_to_group_of(&mut self, existing: MarkerId, id: MarkerId) {
        let group = match self.markers.get(&existing).and_then(|m| m.group) {
            Some(group) => group,
            None => {
                self.join_group(&[existing, id]);
                return;
            }
        };
        if let Some(marker) = self.markers.get_mut(&id) {
            marker.group = Some(group);
        }
        self.groups.entry(group).or_default().push(id);
    }

    /// グループから外す（マーカー自体は残る）
    pub(crate) fn leave_group(&mut self, id: MarkerId) {
        if let Some(group) = self.markers.get_mut(&id).and_then(|m| m.group.take()) {
            self.drop_from_group(group, id);
        }
    }

    /// 同じグループのマーカー（自分を含む）
    pub fn group_members(&self, id: MarkerId) -> Vec<MarkerId> {
        match self.markers.get(&id).and_then(|m| m.group) {
            Some(group) => self.groups.get(&group).cloned().unwrap_or_default(),
            None => vec![id],
        }
    }

    /// 文書に属するマーカー（id順）
    pub fn markers_of(&self, doc: DocId) -> Vec<MarkerId> {
        let mut ids: Vec<MarkerId> = self
            .markers
            .values()
            .filter(|m| m.doc == doc)
            .map(|m| m.id)
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_behavior() {
        let bookmark = MarkerKind::Bookmark { insert_left: true };
        assert!(bookmark.is_bookmark());
        assert!(bookmark.insert_left());
        assert!(!bookmark.clears_when_empty_by_default());

        let fold = MarkerKind::Collapsed {
            widget: Some(WidgetRef(7)),
        };
        assert!(fold.collapses());
        assert!(fold.forces_atomic());
        assert_eq!(fold.widget(), Some(&WidgetRef(7)));
        assert!(MarkerKind::Range.clears_when_empty_by_default());
    }

    #[test]
    fn test_select_overrides_inclusive() {
        let mut table = MarkerTable::new();
        let doc = DocId::from_raw(1);
        let a = table.create(doc, MarkOptions::new().inclusive_left(true));
        let b = table.create(
            doc,
            MarkOptions::new().inclusive_left(true).select_left(true),
        );
        assert!(table.get(a).unwrap().prevents_cursor_left());
        assert!(!table.get(b).unwrap().prevents_cursor_left());
    }

    #[test]
    fn test_groups() {
        let mut table = MarkerTable::new();
        let doc = DocId::from_raw(1);
        let a = table.create(doc, MarkOptions::new());
        let b = table.create(doc, MarkOptions::new());
        let c = table.create(doc, MarkOptions::new());
        table.join_group(&[a, b]);
        table.add_to_group_of(a, c);
        assert_eq!(table.group_members(b).len(), 3);

        table.leave_group(c);
        assert_eq!(table.group_members(a), vec![a, b]);
        assert_eq!(table.group_members(c), vec![c]);

        table.remove(b);
        assert_eq!(table.group_members(a), vec![a]);
        assert!(!table.get(a).unwrap().is_shared());
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut table = MarkerTable::new();
        let doc = DocId::from_raw(1);
        let a = table.create(doc, MarkOptions::new());
        let b = table.create(doc, MarkOptions::collapsed());
        assert!(a < b);
        assert_eq!(table.markers_of(doc), vec![a, b]);
    }
}
