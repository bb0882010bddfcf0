//! 行ストア
//!
//! 行を葉に、最大10個の子を持つ枝で束ねた平衡木。
//! 各ノードは行数と累積の高さを持ち、行番号・高さからの検索を O(log n) で行う。
//!
//! ノードと行はアリーナに置き、整数ハンドルで参照する。
//! 親への参照はインデックスなので所有権の循環は生じない。
//! 再平衡（分割・spill・collapse）はすべて明示的なループで行う。

use crate::error::{DocError, Result};
use crate::marker::MarkedSpan;
use crate::text::char_len;
use log::trace;

/// 葉が分割される行数
const LEAF_MAX: usize = 50;
/// 分割後の葉の行数
const LEAF_CHUNK: usize = 25;
/// 枝の子の上限
const BRANCH_MAX: usize = 10;
/// spill で兄弟へ移す子の数
const BRANCH_SPILL: usize = 5;
/// これより小さい部分木は1枚の葉にまとめる
const COLLAPSE_BELOW: usize = 25;

/// 行への安定したハンドル
///
/// 行が削除されると世代が進み、古いハンドルは無効になる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeId(u32);

impl NodeId {
    fn idx(self) -> usize {
        self.0 as usize
    }
}

/// 1行分のテキストとメタデータ
#[derive(Debug, Clone)]
pub struct Line {
    text: String,
    height: f64,
    pub(crate) spans: Vec<MarkedSpan>,
    leaf: NodeId,
}

impl Line {
    pub(crate) fn new(text: String, spans: Vec<MarkedSpan>, height: f64) -> Self {
        Self {
            text,
            height,
            spans,
            leaf: NodeId(0),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn spans(&self) -> &[MarkedSpan] {
        &self.spans
    }

    /// 文字数
    pub fn len(&self) -> usize {
        char_len(&self.text)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub(crate) fn set_text(&mut self, text: String) {
        self.text = text;
    }

    pub(crate) fn span_for(&self, marker: crate::marker::MarkerId) -> Option<MarkedSpan> {
        self.spans.iter().copied().find(|s| s.marker == marker)
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    line: Option<Line>,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Leaf(Vec<LineHandle>),
    Branch(Vec<NodeId>),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    size: usize,
    height: f64,
    alive: bool,
    kind: NodeKind,
}

impl Node {
    fn leaf(parent: Option<NodeId>) -> Self {
        Self {
            parent,
            size: 0,
            height: 0.0,
            alive: true,
            kind: NodeKind::Leaf(Vec::new()),
        }
    }
}

/// 行番号・高さで索引付けされた行の木
#[derive(Debug, Clone)]
pub struct LineStore {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    nodes: Vec<Node>,
    free_nodes: Vec<u32>,
    root: NodeId,
    first: usize,
}

impl LineStore {
    /// 行列から木を構築（`lines` は1行以上）
    pub fn new(lines: Vec<Line>, first: usize) -> Self {
        let mut store = Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            nodes: Vec::new(),
            free_nodes: Vec::new(),
            root: NodeId(0),
            first,
        };
        let root = store.alloc_node(Node {
            kind: NodeKind::Branch(Vec::new()),
            ..Node::leaf(None)
        });
        let leaf = store.alloc_node(Node::leaf(Some(root)));
        store.nodes[root.idx()].kind = NodeKind::Branch(vec![leaf]);
        store.root = root;
        store.insert_relative(0, lines);
        store
    }

    /// 先頭の行番号
    pub fn first(&self) -> usize {
        self.first
    }

    pub(crate) fn set_first(&mut self, first: usize) {
        self.first = first;
    }

    /// 行数
    pub fn len(&self) -> usize {
        self.nodes[self.root.idx()].size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 最後の行番号
    pub fn last_line(&self) -> usize {
        self.first + self.len().saturating_sub(1)
    }

    pub fn total_height(&self) -> f64 {
        self.nodes[self.root.idx()].height
    }

    fn out_of_range(&self, line: usize) -> DocError {
        DocError::LineOutOfRange {
            line,
            first: self.first,
            end: self.first + self.len(),
        }
    }

    /// 行番号からハンドルを引く。範囲外はエラー
    pub fn handle_at(&self, n: usize) -> Result<LineHandle> {
        if n < self.first || n >= self.first + self.len() {
            return Err(self.out_of_range(n));
        }
        let mut at = n - self.first;
        let mut node = self.root;
        loop {
            match &self.nodes[node.idx()].kind {
                NodeKind::Leaf(lines) => {
                    return lines.get(at).copied().ok_or_else(|| self.out_of_range(n));
                }
                NodeKind::Branch(children) => {
                    let mut next = None;
                    for &child in children {
                        let size = self.nodes[child.idx()].size;
                        if at < size {
                            next = Some(child);
                            break;
                        }
                        at -= size;
                    }
                    node = next.ok_or_else(|| self.out_of_range(n))?;
                }
            }
        }
    }

    pub fn line(&self, handle: LineHandle) -> Option<&Line> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.line.as_ref())
    }

    pub(crate) fn line_mut(&mut self, handle: LineHandle) -> Option<&mut Line> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.line.as_mut())
    }

    /// 行番号から行を引く
    pub fn get(&self, n: usize) -> Result<&Line> {
        let handle = self.handle_at(n)?;
        self.line(handle).ok_or_else(|| self.out_of_range(n))
    }

    /// 木を親方向にたどって行番号を復元する
    pub fn line_no(&self, handle: LineHandle) -> Option<usize> {
        let line = self.line(handle)?;
        let mut cur = line.leaf;
        let mut no = match &self.nodes[cur.idx()].kind {
            NodeKind::Leaf(lines) => lines.iter().position(|&h| h == handle)?,
            NodeKind::Branch(_) => return None,
        };
        while let Some(parent) = self.nodes[cur.idx()].parent {
            for &child in self.children(parent) {
                if child == cur {
                    break;
                }
                no += self.nodes[child.idx()].size;
            }
            cur = parent;
        }
        Some(no + self.first)
    }

    /// `[from, to)` の行ハンドル（範囲は丸める）
    pub fn handles(&self, from: usize, to: usize) -> Vec<LineHandle> {
        let len = self.len();
        let start = from.saturating_sub(self.first).min(len);
        let end = to.saturating_sub(self.first).min(len);
        if start >= end {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(end - start);
        let mut stack = vec![(self.root, 0usize)];
        while let Some((node, offset)) = stack.pop() {
            let size = self.nodes[node.idx()].size;
            if offset + size <= start || offset >= end {
                continue;
            }
            match &self.nodes[node.idx()].kind {
                NodeKind::Leaf(lines) => {
                    for (i, &handle) in lines.iter().enumerate() {
                        let n = offset + i;
                        if n >= start && n < end {
                            out.push(handle);
                        }
                    }
                }
                NodeKind::Branch(children) => {
                    let mut offsets = Vec::with_capacity(children.len());
                    let mut child_offset = offset;
                    for &child in children {
                        offsets.push((child, child_offset));
                        child_offset += self.nodes[child.idx()].size;
                    }
                    stack.extend(offsets.into_iter().rev());
                }
            }
        }
        out
    }

    /// 行を `at` の位置に挿入し、新しいハンドルを返す
    pub fn insert(&mut self, at: usize, lines: Vec<Line>) -> Result<Vec<LineHandle>> {
        if at < self.first || at > self.first + self.len() {
            return Err(self.out_of_range(at));
        }
        Ok(self.insert_relative(at - self.first, lines))
    }

    fn insert_relative(&mut self, at: usize, lines: Vec<Line>) -> Vec<LineHandle> {
        if lines.is_empty() {
            return Vec::new();
        }
        let count = lines.len();
        let height: f64 = lines.iter().map(|l| l.height).sum();
        let mut at = at;
        let mut node = self.root;

        loop {
            {
                let n = &mut self.nodes[node.idx()];
                n.size += count;
                n.height += height;
            }
            if self.is_leaf(node) {
                break;
            }
            let children = self.children(node).to_vec();
            let mut next = children.last().copied();
            for child in children {
                let size = self.nodes[child.idx()].size;
                if at <= size {
                    next = Some(child);
                    break;
                }
                at -= size;
            }
            match next {
                Some(child) => node = child,
                None => break,
            }
        }

        let handles: Vec<LineHandle> = lines
            .into_iter()
            .map(|mut line| {
                line.leaf = node;
                self.alloc_line(line)
            })
            .collect();
        if let NodeKind::Leaf(leaf_lines) = &mut self.nodes[node.idx()].kind {
            let at = at.min(leaf_lines.len());
            leaf_lines.splice(at..at, handles.iter().copied());
        }
        if self.leaf_len(node) > LEAF_MAX {
            self.split_leaf(node);
        }
        handles
    }

    /// `at` から `count` 行を取り除き、取り除いた行を文書順に返す
    pub fn remove(&mut self, at: usize, count: usize) -> Result<Vec<Line>> {
        if at < self.first || at + count > self.first + self.len() {
            return Err(self.out_of_range(at + count));
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut removed = Vec::with_capacity(count);
        let mut visited = Vec::new();
        let mut stack = vec![(self.root, at - self.first, count)];

        while let Some((node, at, n)) = stack.pop() {
            if self.is_leaf(node) {
                let drained: Vec<LineHandle> = match &mut self.nodes[node.idx()].kind {
                    NodeKind::Leaf(lines) => lines.drain(at..at + n).collect(),
                    NodeKind::Branch(_) => Vec::new(),
                };
                let mut lost = 0.0;
                for handle in drained {
                    if let Some(line) = self.free_line(handle) {
                        lost += line.height;
                        removed.push(line);
                    }
                }
                let leaf = &mut self.nodes[node.idx()];
                leaf.size -= n;
                leaf.height -= lost;
                continue;
            }

            visited.push(node);
            let mut at = at;
            let mut n = n;
            let mut work = Vec::new();
            for &child in self.children(node) {
                let size = self.nodes[child.idx()].size;
                if at < size {
                    let rm = n.min(size - at);
                    work.push((child, at, rm));
                    n -= rm;
                    if n == 0 {
                        break;
                    }
                    at = 0;
                } else {
                    at -= size;
                }
            }
            stack.extend(work.into_iter().rev());
        }

        // 子孫から先に数え直し、空になった子を外す
        for &node in visited.iter().rev() {
            let children = self.children(node).to_vec();
            let mut kept = Vec::with_capacity(children.len());
            let (mut size, mut height) = (0, 0.0);
            for child in children {
                let c = &self.nodes[child.idx()];
                if c.size == 0 {
                    self.free_subtree(child);
                } else {
                    size += c.size;
                    height += c.height;
                    kept.push(child);
                }
            }
            let n = &mut self.nodes[node.idx()];
            n.size = size;
            n.height = height;
            n.kind = NodeKind::Branch(kept);
        }

        for node in visited {
            if !self.nodes[node.idx()].alive {
                continue;
            }
            let children = self.children(node);
            let needs_collapse = children.len() > 1
                || children.first().map_or(true, |&c| !self.is_leaf(c));
            if self.nodes[node.idx()].size < COLLAPSE_BELOW && needs_collapse {
                self.collapse(node);
            }
        }

        Ok(removed)
    }

    /// 行の高さを変更し、祖先の累積値を更新する
    pub fn set_height(&mut self, handle: LineHandle, height: f64) {
        let (diff, leaf) = match self.line_mut(handle) {
            Some(line) => {
                let diff = height - line.height;
                line.height = height;
                (diff, line.leaf)
            }
            None => return,
        };
        if diff == 0.0 {
            return;
        }
        let mut cur = Some(leaf);
        while let Some(node) = cur {
            self.nodes[node.idx()].height += diff;
            cur = self.nodes[node.idx()].parent;
        }
    }

    /// 高さ `h` を含む行番号（末尾を超えると `first + len`）
    pub fn line_at_height(&self, h: f64) -> usize {
        let mut h = h;
        let mut n = self.first;
        let mut node = self.root;
        'outer: loop {
            match &self.nodes[node.idx()].kind {
                NodeKind::Branch(children) => {
                    for &child in children {
                        let ch = self.nodes[child.idx()].height;
                        if h < ch {
                            node = child;
                            continue 'outer;
                        }
                        h -= ch;
                        n += self.nodes[child.idx()].size;
                    }
                    return n;
                }
                NodeKind::Leaf(lines) => {
                    for (i, &handle) in lines.iter().enumerate() {
                        let lh = self.line(handle).map_or(0.0, |l| l.height);
                        if h < lh {
                            return n + i;
                        }
                        h -= lh;
                    }
                    return n + lines.len();
                }
            }
        }
    }

    /// 行より上にある行の高さの合計
    pub fn height_above(&self, handle: LineHandle) -> Option<f64> {
        let line = self.line(handle)?;
        let mut cur = line.leaf;
        let mut h = 0.0;
        if let NodeKind::Leaf(lines) = &self.nodes[cur.idx()].kind {
            for &other in lines {
                if other == handle {
                    break;
                }
                h += self.line(other).map_or(0.0, |l| l.height);
            }
        }
        while let Some(parent) = self.nodes[cur.idx()].parent {
            for &child in self.children(parent) {
                if child == cur {
                    break;
                }
                h += self.nodes[child.idx()].height;
            }
            cur = parent;
        }
        Some(h)
    }

    /// 木の深さ（葉までの枝の数）
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self.root, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            match &self.nodes[node.idx()].kind {
                NodeKind::Leaf(_) => max = max.max(depth),
                NodeKind::Branch(children) => {
                    stack.extend(children.iter().map(|&c| (c, depth + 1)));
                }
            }
        }
        max
    }

    /// 構造の不変条件を検査（テスト用）
    ///
    /// 行数・高さの集計、親参照、分岐数の上限、
    /// 親をたどった行番号と通し順序の一致を確認する。
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let mut order = Vec::new();
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            let n = &self.nodes[node.idx()];
            if !n.alive {
                return Err(format!("dead node {} reachable", node.0));
            }
            match &n.kind {
                NodeKind::Leaf(lines) => {
                    if lines.len() > LEAF_MAX {
                        return Err(format!("leaf {} holds {} lines", node.0, lines.len()));
                    }
                    if lines.len() != n.size {
                        return Err(format!("leaf {} size mismatch", node.0));
                    }
                    let mut height = 0.0;
                    for &handle in lines {
                        let line = self
                            .line(handle)
                            .ok_or_else(|| format!("stale handle in leaf {}", node.0))?;
                        if line.leaf != node {
                            return Err(format!("line parent mismatch in leaf {}", node.0));
                        }
                        height += line.height;
                        order.push(handle);
                    }
                    if (height - n.height).abs() > 1e-6 {
                        return Err(format!("leaf {} height mismatch", node.0));
                    }
                }
                NodeKind::Branch(children) => {
                    if children.len() > BRANCH_MAX {
                        return Err(format!("branch {} has {} children", node.0, children.len()));
                    }
                    let mut size = 0;
                    let mut height = 0.0;
                    for &child in children {
                        let c = &self.nodes[child.idx()];
                        if c.parent != Some(node) {
                            return Err(format!("child {} has wrong parent", child.0));
                        }
                        size += c.size;
                        height += c.height;
                    }
                    if size != n.size || (height - n.height).abs() > 1e-6 {
                        return Err(format!("branch {} totals mismatch", node.0));
                    }
                    stack.extend(children.iter().rev());
                }
            }
        }
        for (i, &handle) in order.iter().enumerate() {
            if self.line_no(handle) != Some(self.first + i) {
                return Err(format!("line {} recovers wrong number", self.first + i));
            }
        }
        Ok(())
    }

    // ---- 内部処理 ----

    fn is_leaf(&self, node: NodeId) -> bool {
        matches!(self.nodes[node.idx()].kind, NodeKind::Leaf(_))
    }

    fn children(&self, node: NodeId) -> &[NodeId] {
        match &self.nodes[node.idx()].kind {
            NodeKind::Branch(children) => children,
            NodeKind::Leaf(_) => &[],
        }
    }

    fn children_mut(&mut self, node: NodeId) -> Option<&mut Vec<NodeId>> {
        match &mut self.nodes[node.idx()].kind {
            NodeKind::Branch(children) => Some(children),
            NodeKind::Leaf(_) => None,
        }
    }

    fn leaf_len(&self, node: NodeId) -> usize {
        match &self.nodes[node.idx()].kind {
            NodeKind::Leaf(lines) => lines.len(),
            NodeKind::Branch(_) => 0,
        }
    }

    fn alloc_node(&mut self, node: Node) -> NodeId {
        match self.free_nodes.pop() {
            Some(index) => {
                self.nodes[index as usize] = node;
                NodeId(index)
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() as u32 - 1)
            }
        }
    }

    fn free_node(&mut self, node: NodeId) {
        let n = &mut self.nodes[node.idx()];
        n.alive = false;
        n.parent = None;
        n.kind = NodeKind::Leaf(Vec::new());
        self.free_nodes.push(node.0);
    }

    /// 部分木のノードをすべて解放（行は解放しない）
    fn free_subtree(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(cur) = stack.pop() {
            stack.extend_from_slice(self.children(cur));
            self.free_node(cur);
        }
    }

    fn alloc_line(&mut self, line: Line) -> LineHandle {
        match self.free_slots.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.line = Some(line);
                LineHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    line: Some(line),
                });
                LineHandle {
                    index: self.slots.len() as u32 - 1,
                    generation: 0,
                }
            }
        }
    }

    fn free_line(&mut self, handle: LineHandle) -> Option<Line> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let line = slot.line.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(handle.index);
        line
    }

    fn new_branch(&mut self, children: Vec<NodeId>, parent: Option<NodeId>) -> NodeId {
        let size = children.iter().map(|c| self.nodes[c.idx()].size).sum();
        let height = children.iter().map(|c| self.nodes[c.idx()].height).sum();
        let id = self.alloc_node(Node {
            parent,
            size,
            height,
            alive: true,
            kind: NodeKind::Branch(Vec::new()),
        });
        for &child in &children {
            self.nodes[child.idx()].parent = Some(id);
        }
        self.nodes[id.idx()].kind = NodeKind::Branch(children);
        id
    }

    /// 大きくなった葉を25行ずつの葉に分ける
    fn split_leaf(&mut self, leaf: NodeId) {
        let parent = match self.nodes[leaf.idx()].parent {
            Some(parent) => parent,
            None => return,
        };
        let lines = match &mut self.nodes[leaf.idx()].kind {
            NodeKind::Leaf(lines) => std::mem::take(lines),
            NodeKind::Branch(_) => return,
        };
        let remaining = lines.len() % LEAF_CHUNK + LEAF_CHUNK;
        let (keep, rest) = lines.split_at(remaining);

        let mut new_leaves = Vec::new();
        let mut moved_size = 0;
        let mut moved_height = 0.0;
        for chunk in rest.chunks(LEAF_CHUNK) {
            let id = self.alloc_node(Node::leaf(Some(parent)));
            let mut height = 0.0;
            for &handle in chunk {
                if let Some(line) = self.line_mut(handle) {
                    line.leaf = id;
                    height += line.height;
                }
            }
            let node = &mut self.nodes[id.idx()];
            node.size = chunk.len();
            node.height = height;
            node.kind = NodeKind::Leaf(chunk.to_vec());
            moved_size += chunk.len();
            moved_height += height;
            new_leaves.push(id);
        }

        let kept = &mut self.nodes[leaf.idx()];
        kept.kind = NodeKind::Leaf(keep.to_vec());
        kept.size -= moved_size;
        kept.height -= moved_height;

        trace!("split leaf {} into {} new leaves", leaf.0, new_leaves.len());
        if let Some(children) = self.children_mut(parent) {
            let at = children.iter().position(|&c| c == leaf).map_or(children.len(), |i| i + 1);
            children.splice(at..at, new_leaves);
        }
        self.maybe_spill(parent);
    }

    /// 子が多すぎる枝を分け、必要なら上方向にも繰り返す
    fn maybe_spill(&mut self, start: NodeId) {
        let mut current = start;
        loop {
            if self.children(current).len() <= BRANCH_MAX {
                return;
            }
            let mut me = current;
            loop {
                let spilled = match self.children_mut(me) {
                    Some(children) => {
                        let at = children.len() - BRANCH_SPILL;
                        children.split_off(at)
                    }
                    None => return,
                };
                let sibling = self.new_branch(spilled, None);
                match self.nodes[me.idx()].parent {
                    None => {
                        // 根は自分の子を複製に移し、[複製, 兄弟] の親になる
                        let rest = match self.children_mut(me) {
                            Some(children) => std::mem::take(children),
                            None => Vec::new(),
                        };
                        let copy = self.new_branch(rest, Some(me));
                        self.nodes[sibling.idx()].parent = Some(me);
                        self.nodes[me.idx()].kind = NodeKind::Branch(vec![copy, sibling]);
                        trace!("root {} grew a level", me.0);
                        me = copy;
                    }
                    Some(parent) => {
                        let (size, height) = {
                            let s = &self.nodes[sibling.idx()];
                            (s.size, s.height)
                        };
                        let m = &mut self.nodes[me.idx()];
                        m.size -= size;
                        m.height -= height;
                        self.nodes[sibling.idx()].parent = Some(parent);
                        if let Some(children) = self.children_mut(parent) {
                            let at = children.iter().position(|&c| c == me).map_or(children.len(), |i| i + 1);
                            children.insert(at, sibling);
                        }
                        trace!("spilled {} children of branch {}", BRANCH_SPILL, me.0);
                    }
                }
                if self.children(me).len() <= BRANCH_MAX {
                    break;
                }
            }
            match self.nodes[me.idx()].parent {
                Some(parent) => current = parent,
                None => return,
            }
        }
    }

    /// 部分木を1枚の葉にまとめる
    fn collapse(&mut self, node: NodeId) {
        let mut handles = Vec::with_capacity(self.nodes[node.idx()].size);
        let mut stack: Vec<NodeId> = self.children(node).iter().rev().copied().collect();
        let mut dead = Vec::new();
        while let Some(cur) = stack.pop() {
            match &self.nodes[cur.idx()].kind {
                NodeKind::Leaf(lines) => handles.extend_from_slice(lines),
                NodeKind::Branch(children) => stack.extend(children.iter().rev()),
            }
            dead.push(cur);
        }
        for cur in dead {
            self.free_node(cur);
        }

        let leaf = self.alloc_node(Node::leaf(Some(node)));
        for &handle in &handles {
            if let Some(line) = self.line_mut(handle) {
                line.leaf = leaf;
            }
        }
        let (size, height) = {
            let n = &self.nodes[node.idx()];
            (n.size, n.height)
        };
        let l = &mut self.nodes[leaf.idx()];
        l.size = size;
        l.height = height;
        l.kind = NodeKind::Leaf(handles);
        self.nodes[node.idx()].kind = NodeKind::Branch(vec![leaf]);
        trace!("collapsed branch {} into a single leaf of {} lines", node.0, size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(n: usize) -> Vec<Line> {
        (0..n)
            .map(|i| Line::new(format!("line {}", i), Vec::new(), 1.0))
            .collect()
    }

    fn text_at(store: &LineStore, n: usize) -> String {
        store.get(n).unwrap().text().to_string()
    }

    #[test]
    fn test_build_and_lookup() {
        let store = LineStore::new(lines(1000), 0);
        assert_eq!(store.len(), 1000);
        assert_eq!(text_at(&store, 0), "line 0");
        assert_eq!(text_at(&store, 999), "line 999");
        assert_eq!(store.total_height(), 1000.0);
        store.check_invariants().unwrap();
        assert!(store.depth() >= 2);
    }

    #[test]
    fn test_out_of_range_fails_loudly() {
        let store = LineStore::new(lines(3), 5);
        assert!(store.get(5).is_ok());
        let err = store.get(8).unwrap_err();
        assert_eq!(
            err,
            DocError::LineOutOfRange {
                line: 8,
                first: 5,
                end: 8
            }
        );
        assert!(store.get(4).is_err());
    }

    #[test]
    fn test_insert_and_line_no() {
        let mut store = LineStore::new(lines(10), 0);
        let handles = store
            .insert(5, vec![Line::new("new".to_string(), Vec::new(), 1.0)])
            .unwrap();
        assert_eq!(store.line_no(handles[0]), Some(5));
        assert_eq!(text_at(&store, 6), "line 5");
        store.check_invariants().unwrap();
    }

    #[test]
    fn test_remove_collapses_small_trees() {
        let mut store = LineStore::new(lines(500), 0);
        let removed = store.remove(10, 480).unwrap();
        assert_eq!(removed.len(), 480);
        assert_eq!(removed[0].text(), "line 10");
        assert_eq!(store.len(), 20);
        assert_eq!(store.depth(), 1);
        assert_eq!(text_at(&store, 10), "line 490");
        store.check_invariants().unwrap();
    }

    #[test]
    fn test_stale_handles_are_rejected() {
        let mut store = LineStore::new(lines(5), 0);
        let handle = store.handle_at(2).unwrap();
        store.remove(2, 1).unwrap();
        assert!(store.line(handle).is_none());
        assert_eq!(store.line_no(handle), None);
        // 再利用されたスロットでも古いハンドルは無効
        store
            .insert(0, vec![Line::new("x".to_string(), Vec::new(), 1.0)])
            .unwrap();
        assert!(store.line(handle).is_none());
    }

    #[test]
    fn test_heights() {
        let mut store = LineStore::new(lines(100), 0);
        let handle = store.handle_at(40).unwrap();
        store.set_height(handle, 3.0);
        assert_eq!(store.total_height(), 102.0);
        assert_eq!(store.height_above(handle), Some(40.0));
        assert_eq!(store.line_at_height(40.5), 40);
        assert_eq!(store.line_at_height(42.9), 40);
        assert_eq!(store.line_at_height(43.0), 41);
        assert_eq!(store.line_at_height(1e9), 100);
        store.check_invariants().unwrap();
    }

    #[test]
    fn test_handles_range() {
        let store = LineStore::new(lines(300), 10);
        let hs = store.handles(100, 105);
        let nos: Vec<usize> = hs.iter().filter_map(|&h| store.line_no(h)).collect();
        assert_eq!(nos, vec![100, 101, 102, 103, 104]);
        assert!(store.handles(400, 500).is_empty());
    }

    #[test]
    fn test_sequential_inserts_stay_balanced() {
        let mut store = LineStore::new(lines(1), 0);
        for i in 0..5000 {
            store
                .insert(i + 1, vec![Line::new(i.to_string(), Vec::new(), 1.0)])
                .unwrap();
        }
        assert_eq!(store.len(), 5001);
        assert!(store.depth() <= 7, "depth {}", store.depth());
        store.check_invariants().unwrap();
    }
}
