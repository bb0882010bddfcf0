//! ドキュメントエンジン
//!
//! すべての文書・マーカー・操作バッチャー・設定を所有する。
//! 公開された変更系メソッドは操作を開き、内部メソッドに処理を任せる。
//! 操作は `BatchGuard` が破棄されるときに閉じ、描画側とリスナーへ通知する。

mod edit;
mod link;
mod marks;
mod select;

pub use link::LinkOptions;
pub use select::{PosH, SelectionOptions, Unit};

use crate::config::DocConfig;
use crate::document::{DocId, Document};
use crate::error::{DocError, Result};
use crate::marker::MarkerTable;
use crate::operation::{merge_line_ranges, Batcher, ChangeEvent, ChangeListener, Operation, Renderer, ViewUpdate};
use log::debug;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

/// 文書エンジン
pub struct Engine {
    pub(crate) docs: HashMap<DocId, Document>,
    pub(crate) markers: MarkerTable,
    pub(crate) batcher: Batcher,
    config: DocConfig,
    renderers: HashMap<DocId, Box<dyn Renderer>>,
    listeners: HashMap<DocId, Vec<Box<dyn ChangeListener>>>,
    next_doc_id: u32,
}

impl Engine {
    pub fn new(config: DocConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            docs: HashMap::new(),
            markers: MarkerTable::new(),
            batcher: Batcher::new(),
            config,
            renderers: HashMap::new(),
            listeners: HashMap::new(),
            next_doc_id: 0,
        })
    }

    pub fn config(&self) -> &DocConfig {
        &self.config
    }

    pub fn markers(&self) -> &MarkerTable {
        &self.markers
    }

    /// 新しい文書を作る
    pub fn create_doc(&mut self, text: &str) -> DocId {
        self.create_doc_at(text, 0)
    }

    /// 先頭の行番号を指定して文書を作る
    pub fn create_doc_at(&mut self, text: &str, first_line: usize) -> DocId {
        let id = self.alloc_doc_id();
        let doc = Document::new(id, text, first_line, &self.config);
        debug!("created {} with {} lines", id, doc.line_count());
        self.docs.insert(id, doc);
        id
    }

    pub(crate) fn alloc_doc_id(&mut self) -> DocId {
        self.next_doc_id += 1;
        DocId::from_raw(self.next_doc_id)
    }

    /// 文書を取り除く（リンクとマーカーも解除する）
    pub fn remove_doc(&mut self, id: DocId) -> Result<Document> {
        let linked = self.doc(id)?.linked_ids();
        for other in linked {
            self.unlink_doc(id, other)?;
        }
        for marker in self.markers.markers_of(id) {
            self.markers.remove(marker);
        }
        self.renderers.remove(&id);
        self.listeners.remove(&id);
        self.docs.remove(&id).ok_or(DocError::UnknownDocument(id))
    }

    pub fn doc(&self, id: DocId) -> Result<&Document> {
        self.docs.get(&id).ok_or(DocError::UnknownDocument(id))
    }

    pub(crate) fn doc_mut(&mut self, id: DocId) -> Result<&mut Document> {
        self.docs.get_mut(&id).ok_or(DocError::UnknownDocument(id))
    }

    pub fn doc_ids(&self) -> Vec<DocId> {
        let mut ids: Vec<DocId> = self.docs.keys().copied().collect();
        ids.sort();
        ids
    }

    /// 描画側を接続する（1文書につき1つ）
    pub fn attach_renderer(&mut self, doc: DocId, renderer: Box<dyn Renderer>) -> Result<()> {
        self.doc(doc)?;
        if self.renderers.contains_key(&doc) {
            return Err(DocError::AlreadyAttached(doc));
        }
        self.renderers.insert(doc, renderer);
        Ok(())
    }

    pub fn detach_renderer(&mut self, doc: DocId) -> Option<Box<dyn Renderer>> {
        self.renderers.remove(&doc)
    }

    pub fn add_change_listener(&mut self, doc: DocId, listener: Box<dyn ChangeListener>) -> Result<()> {
        self.doc(doc)?;
        self.listeners.entry(doc).or_default().push(listener);
        Ok(())
    }

    /// 操作を開く。返されたガードが破棄されると閉じる
    pub fn begin_batch(&mut self) -> BatchGuard<'_> {
        self.batcher.begin();
        BatchGuard { engine: self }
    }

    /// クロージャ内の呼び出しを1つの操作にまとめる
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Engine) -> R) -> R {
        let mut guard = self.begin_batch();
        f(&mut guard)
    }

    /// 文書が操作に初めて触れたときの高さを記録する
    pub(crate) fn touch(&mut self, doc: DocId) {
        let height = self.docs.get(&doc).map_or(0.0, |d| d.total_height());
        self.batcher.state(doc, || height);
    }

    pub(crate) fn queue_event(&mut self, doc: DocId, event: ChangeEvent) {
        self.touch(doc);
        self.batcher.queue_event(doc, 0.0, event);
    }

    fn end_batch(&mut self) {
        if let Some(op) = self.batcher.end() {
            self.finish_operation(op);
        }
    }

    /// 操作を閉じる
    ///
    /// 測定、要約の確定、描画側への通知、リスナーへの通知の順に行う。
    fn finish_operation(&mut self, op: Operation) {
        let mut updates = Vec::new();
        for (id, state) in op.docs {
            let Some(doc) = self.docs.get(&id) else {
                continue;
            };
            let height_delta = doc.total_height() - state.start_height;
            let scroll_to = state.scroll_to.map(|p| doc.clip_pos(p));
            let update = ViewUpdate {
                doc: id,
                view_changed: state.view_changed,
                selection_changed: state.selection_changed,
                changed_lines: merge_line_ranges(state.changed_lines),
                scroll_to,
                height_delta,
            };
            let mut events = state.events;
            if update.selection_changed {
                events.push(ChangeEvent::CursorActivity);
            }
            updates.push((update, events));
        }

        for (update, _) in &updates {
            if !(update.view_changed || update.selection_changed) {
                continue;
            }
            if let Some(renderer) = self.renderers.get_mut(&update.doc) {
                renderer.on_update(update);
            }
        }
        for (update, events) in &updates {
            if let Some(listeners) = self.listeners.get_mut(&update.doc) {
                for event in events {
                    for listener in listeners.iter_mut() {
                        listener.on_change(event);
                    }
                }
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            docs: HashMap::new(),
            markers: MarkerTable::new(),
            batcher: Batcher::new(),
            config: DocConfig::default(),
            renderers: HashMap::new(),
            listeners: HashMap::new(),
            next_doc_id: 0,
        }
    }
}

/// 開いている操作のガード
///
/// エンジンとして使え、破棄されると操作を閉じる。
pub struct BatchGuard<'a> {
    engine: &'a mut Engine,
}

impl Deref for BatchGuard<'_> {
    type Target = Engine;

    fn deref(&self) -> &Engine {
        self.engine
    }
}

impl DerefMut for BatchGuard<'_> {
    fn deref_mut(&mut self) -> &mut Engine {
        self.engine
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.engine.end_batch();
    }
}
