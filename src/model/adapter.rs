//! Tree projections of a document. Each [`TreeObjectAdapter`] owns expand/select state for one subtree and builds
//! its child items lazily. When the document changes, items whose objects survive keep their state.

use std::collections;
use std::sync;

use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::model::clipboard;
use crate::model::document;
use crate::model::document::change::{self, ApplyError};
use crate::model::document::class;
use crate::model::document::search;
use crate::model::document::structure::{Body, ObjectId, Place, Value};
use crate::model::store;
use crate::model::versioned;

/// One row of the tree.
#[derive(Debug, Clone)]
pub struct ItemAdapter {
    object: ObjectId,
    key: String,
    expanded: bool,
    selected: bool,
    children: Option<Vec<ItemAdapter>>,
}

/// Expand/select state, keyed by child key so it survives a reload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterState {
    pub expanded: bool,
    pub selected: bool,
    #[serde(skip_serializing_if = "collections::BTreeMap::is_empty")]
    pub children: collections::BTreeMap<String, AdapterState>,
}

/// What the tree shows under `id`: array elements keyed by index, or the object's visible object and array
/// properties keyed by name. An object whose only visible child is an array shows that array's elements instead.
fn child_entries(document: &document::Document, id: ObjectId) -> Vec<(ObjectId, String)> {
    let Some(object) = document.get(id) else { return Vec::new() };

    match &object.body {
        Body::Elements(elements) => elements.iter().enumerate().map(|(i, e)| (*e, i.to_string())).collect(),
        Body::Properties(props) => {
            let visible: Vec<(ObjectId, String)> = object.class.properties.iter()
                .filter(|info| info.is_structural() && !info.flags.contains(class::PropertyFlags::HIDDEN_IN_TREE))
                .filter_map(|info| props.get(&info.name).and_then(Value::as_child).map(|child| (child, info.name.clone())))
                .collect();

            match visible.as_slice() {
                [(only, _)] if document.get(*only).is_some_and(|o| o.is_array()) => child_entries(document, *only),
                _ => visible,
            }
        },
    }
}

impl ItemAdapter {
    fn new(object: ObjectId, key: String) -> ItemAdapter {
        ItemAdapter {
            object,
            key,
            expanded: false,
            selected: false,
            children: None,
        }
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// Child items, if anything has asked for them yet.
    pub fn built_children(&self) -> Option<&[ItemAdapter]> {
        self.children.as_deref()
    }

    fn children_mut(&mut self, document: &document::Document) -> &mut Vec<ItemAdapter> {
        let object = self.object;
        self.children.get_or_insert_with(|| {
            child_entries(document, object).into_iter().map(|(child, key)| ItemAdapter::new(child, key)).collect()
        })
    }

    fn walk<'a>(&'a self, items: &mut Vec<&'a ItemAdapter>) {
        items.push(self);
        for child in self.children.iter().flatten() {
            child.walk(items);
        }
    }

    fn walk_mut(&mut self, f: &mut impl FnMut(&mut ItemAdapter)) {
        f(self);
        for child in self.children.iter_mut().flatten() {
            child.walk_mut(f);
        }
    }

    fn reconcile(&mut self, document: &document::Document) {
        /* unbuilt children get built from the new document whenever someone asks */
        let Some(old) = self.children.take() else { return };
        let mut old: collections::HashMap<ObjectId, ItemAdapter> = old.into_iter().map(|item| (item.object, item)).collect();

        let children = child_entries(document, self.object).into_iter().map(|(object, key)| {
            let mut item = old.remove(&object).unwrap_or_else(|| ItemAdapter::new(object, key.clone()));
            item.key = key;
            item.reconcile(document);
            item
        }).collect();

        self.children = Some(children);
    }

    fn save(&self) -> AdapterState {
        AdapterState {
            expanded: self.expanded,
            selected: self.selected,
            children: self.children.iter().flatten()
                .map(|child| (child.key.clone(), child.save()))
                .filter(|(_, state)| *state != AdapterState::default())
                .collect(),
        }
    }

    fn load(&mut self, document: &document::Document, state: &AdapterState) {
        self.expanded = state.expanded;
        self.selected = state.selected;

        if state.children.is_empty() {
            for child in self.children.iter_mut().flatten() {
                child.walk_mut(&mut |item| {
                    item.expanded = false;
                    item.selected = false;
                });
            }
            return;
        }

        for child in self.children_mut(document).iter_mut() {
            match state.children.get(&child.key) {
                Some(child_state) => child.load(document, child_state),
                None => child.walk_mut(&mut |item| {
                    item.expanded = false;
                    item.selected = false;
                }),
            }
        }
    }
}

pub struct TreeObjectAdapter {
    document: sync::Arc<document::Document>,
    root: ItemAdapter,
}

impl TreeObjectAdapter {
    pub fn new(document: sync::Arc<document::Document>, root: ObjectId) -> TreeObjectAdapter {
        TreeObjectAdapter {
            document,
            root: ItemAdapter::new(root, String::new()),
        }
    }

    pub fn document(&self) -> &sync::Arc<document::Document> {
        &self.document
    }

    pub fn root(&self) -> &ItemAdapter {
        &self.root
    }

    /// Swaps in a new document version, dropping items for removed objects and making fresh ones for new objects.
    pub fn update(&mut self, document: sync::Arc<document::Document>) {
        self.document = document;
        let document = self.document.clone();
        self.root.reconcile(&document);
    }

    /// Child indices from the root item to the item wrapping `id`, building items along the way.
    fn item_path(&mut self, id: ObjectId) -> Option<Vec<usize>> {
        let document = self.document.clone();
        if !document.contains(id) || !document.is_ancestor(self.root.object, id) {
            return None;
        }

        let mut chain: Vec<ObjectId> = document.ancestors(id).take_while(|a| *a != self.root.object).collect();
        chain.reverse();
        chain.push(id);
        if id == self.root.object {
            chain.clear();
        }

        let mut path = Vec::new();
        let mut rest = chain.as_slice();
        let mut item = &mut self.root;

        while !rest.is_empty() {
            let children = item.children_mut(&document);
            let (index, position) = children.iter().enumerate()
                .find_map(|(i, child)| rest.iter().position(|o| *o == child.object).map(|p| (i, p)))?;

            path.push(index);
            rest = &rest[position + 1..];
            item = &mut children[index];
        }

        Some(path)
    }

    fn item_at(&self, path: &[usize]) -> Option<&ItemAdapter> {
        path.iter().try_fold(&self.root, |item, i| item.children.as_ref()?.get(*i))
    }

    fn item_at_mut(&mut self, path: &[usize]) -> Option<&mut ItemAdapter> {
        path.iter().try_fold(&mut self.root, |item, i| item.children.as_mut()?.get_mut(*i))
    }

    /// The item wrapping `id`, or `None` if the object is gone or isn't shown by this tree.
    pub fn get_object_adapter(&mut self, id: ObjectId) -> Option<&ItemAdapter> {
        let path = self.item_path(id)?;
        self.item_at(&path)
    }

    /// The item wrapping `id` or its nearest ancestor that has one.
    pub fn get_ancestor_object_adapter(&mut self, id: ObjectId) -> Option<&ItemAdapter> {
        let candidates: Vec<ObjectId> = std::iter::once(id).chain(self.document.ancestors(id)).collect();
        let path = candidates.into_iter().find_map(|candidate| self.item_path(candidate))?;
        self.item_at(&path)
    }

    pub fn get_parent(&mut self, id: ObjectId) -> Option<&ItemAdapter> {
        let path = self.item_path(id)?;
        let (_, parent) = path.split_last()?;
        self.item_at(parent)
    }

    /// Objects of the items above `id`, root first.
    pub fn get_ancestors(&mut self, id: ObjectId) -> Vec<ObjectId> {
        let Some(path) = self.item_path(id) else { return Vec::new() };
        (0..path.len()).filter_map(|depth| self.item_at(&path[..depth]).map(ItemAdapter::object)).collect()
    }

    /// Objects of the items under `id`.
    pub fn children(&mut self, id: ObjectId) -> Vec<ObjectId> {
        let document = self.document.clone();
        let Some(path) = self.item_path(id) else { return Vec::new() };

        match self.item_at_mut(&path) {
            Some(item) => item.children_mut(&document).iter().map(ItemAdapter::object).collect(),
            None => Vec::new(),
        }
    }

    /* selection */

    pub fn clear_selection(&mut self) {
        self.root.walk_mut(&mut |item| item.selected = false);
    }

    /// Replaces the selection. Items above each selected item get expanded. Ids outside this tree are ignored.
    pub fn select_items(&mut self, ids: &[ObjectId]) {
        self.clear_selection();

        for id in ids {
            let Some(path) = self.item_path(*id) else { continue };

            let mut item = &mut self.root;
            for index in path {
                item.expanded = true;
                let Some(next) = item.children.as_mut().and_then(|c| c.get_mut(index)) else { break };
                item = next;
            }
            item.selected = true;
        }
    }

    pub fn select_item(&mut self, id: ObjectId) {
        self.select_items(&[id]);
    }

    /// Like [`select_items`](Self::select_items), but objects without an item of their own select their nearest
    /// ancestor's item.
    pub fn select_objects(&mut self, ids: &[ObjectId]) {
        let items: Vec<ObjectId> = ids.iter()
            .filter_map(|id| self.get_ancestor_object_adapter(*id).map(ItemAdapter::object))
            .collect();
        self.select_items(&items);
    }

    pub fn select_object(&mut self, id: ObjectId) {
        self.select_objects(&[id]);
    }

    pub fn toggle_selected(&mut self, id: ObjectId) {
        if let Some(path) = self.item_path(id) {
            if let Some(item) = self.item_at_mut(&path) {
                item.selected = !item.selected;
            }
        }
    }

    pub fn toggle_expanded(&mut self, id: ObjectId) {
        if let Some(path) = self.item_path(id) {
            if let Some(item) = self.item_at_mut(&path) {
                item.expanded = !item.expanded;
            }
        }
    }

    /// Selected items in tree order.
    pub fn selected_items(&self) -> Vec<ObjectId> {
        let mut items = Vec::new();
        self.root.walk(&mut items);
        items.into_iter().filter(|item| item.selected).map(ItemAdapter::object).collect()
    }

    /// The selection without items that are inside other selected items.
    pub fn selected_objects(&self) -> Vec<ObjectId> {
        search::unique_top(&self.document, &self.selected_items())
    }

    pub fn selected_object(&self) -> Option<ObjectId> {
        match self.selected_items().as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /* state */

    pub fn save_state(&self) -> AdapterState {
        self.root.save()
    }

    pub fn load_state(&mut self, state: &AdapterState) {
        let document = self.document.clone();
        self.root.load(&document, state);
    }

    /* editing */

    pub fn can_delete(&self) -> bool {
        let selected = self.selected_objects();
        !selected.is_empty() && selected.iter().all(|id| self.document.can_delete(*id))
    }

    pub fn can_copy(&self) -> bool {
        clipboard::can_copy(&self.document, &self.selected_objects())
    }

    pub fn can_cut(&self) -> bool {
        clipboard::can_cut(&self.document, &self.selected_objects())
    }

    /// Where pastes aim: the single selected item, or the root.
    pub fn paste_target(&self) -> ObjectId {
        self.selected_object().unwrap_or(self.root.object)
    }

    pub fn find_paste_place_inside(&self, target: ObjectId, class: &class::ClassInfo, is_single_object: bool) -> Option<Place> {
        search::find_paste_place_inside(&self.document, target, class, is_single_object)
    }
}

impl std::fmt::Debug for TreeObjectAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeObjectAdapter")
            .field("root", &self.root.object)
            .field("selected", &self.selected_items())
            .finish()
    }
}

impl versioned::Subscriber<document::Document> for parking_lot::Mutex<TreeObjectAdapter> {
    fn notify(&self, document: &sync::Arc<document::Document>, record: &change::Record) {
        let mut adapter = self.lock();

        if record.is_structural() {
            debug!(root = %adapter.root.object, events = record.events.len(), "reconciling tree adapter");
            adapter.update(document.clone());
        } else {
            adapter.document = document.clone();
        }
    }
}

impl store::SelectionSource for parking_lot::Mutex<TreeObjectAdapter> {
    fn selection(&self) -> Vec<ObjectId> {
        self.lock().selected_objects()
    }
}

/// A tree adapter subscribed to a store and reporting its selection to it. Editing commands release the adapter
/// while the store works, since the store locks it again to notify it and to read the selection.
#[derive(Clone)]
pub struct SharedTreeAdapter {
    inner: sync::Arc<parking_lot::Mutex<TreeObjectAdapter>>,
}

impl SharedTreeAdapter {
    pub fn new(store: &store::DocumentStore, root: ObjectId) -> SharedTreeAdapter {
        let inner = sync::Arc::new(parking_lot::Mutex::new(TreeObjectAdapter::new(store.document(), root)));
        store.subscribe(&inner);
        store.watch_selection(&inner);
        SharedTreeAdapter { inner }
    }

    pub fn lock(&self) -> parking_lot::MutexGuard<'_, TreeObjectAdapter> {
        self.inner.lock()
    }

    pub fn can_paste(&self, store: &store::DocumentStore, clipboard: &dyn clipboard::Clipboard) -> bool {
        let target = self.lock().paste_target();
        store.can_paste(target, clipboard)
    }

    pub fn copy_selection(&self, store: &store::DocumentStore, clipboard: &dyn clipboard::Clipboard) -> bool {
        let selected = self.lock().selected_objects();
        store.copy_items(&selected, clipboard)
    }

    pub fn cut_selection(&self, store: &store::DocumentStore, clipboard: &dyn clipboard::Clipboard) -> Result<bool, ApplyError> {
        let selected = self.lock().selected_objects();
        store.cut_items(&selected, clipboard)
    }

    pub fn delete_selection(&self, store: &store::DocumentStore) -> Result<(), ApplyError> {
        let selected = self.lock().selected_objects();
        store.delete_items(&selected)
    }

    /// Undoes the last step and selects what was selected before it. Returns false if there was nothing to undo.
    pub fn undo(&self, store: &store::DocumentStore) -> bool {
        match store.undo() {
            Some(selection) => {
                self.lock().select_objects(&selection);
                true
            },
            None => false,
        }
    }

    pub fn redo(&self, store: &store::DocumentStore) -> bool {
        match store.redo() {
            Some(selection) => {
                self.lock().select_objects(&selection);
                true
            },
            None => false,
        }
    }

    /// Pastes at the paste target and selects what was pasted.
    pub fn paste_selection(&self, store: &store::DocumentStore, clipboard: &dyn clipboard::Clipboard) -> Result<Vec<ObjectId>, clipboard::ClipboardError> {
        let target = self.lock().paste_target();
        let pasted = store.paste_item(target, clipboard)?;
        self.lock().select_items(&pasted);
        Ok(pasted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::config;
    use crate::schema;

    fn setup() -> (schema::GuiSchema, schema::Sample, store::DocumentStore) {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let store = store::DocumentStore::new(sample.document.clone(), config::Config::default());
        (schema, sample, store)
    }

    #[test]
    fn test_children_rules() {
        let (_schema, sample, store) = setup();
        let document = store.document();
        let root = document.root();
        let settings = document.root_object().and_then(|o| o.property("settings")).and_then(Value::as_child).unwrap();

        let mut adapter = TreeObjectAdapter::new(document, root);

        /* theme is empty, so it isn't shown */
        assert_eq!(adapter.children(root), vec![settings, sample.pages, sample.styles]);

        /* a page's only child is its widget array, which is flattened */
        assert_eq!(adapter.children(sample.page), sample.items);
        assert!(adapter.get_object_adapter(sample.widgets).is_none());
        assert_eq!(adapter.get_parent(sample.items[0]).map(ItemAdapter::object), Some(sample.page));
        assert_eq!(adapter.get_ancestors(sample.items[0]), vec![root, sample.pages, sample.page]);
    }

    #[test]
    fn test_reconcile_keeps_surviving_items() {
        let (schema, sample, store) = setup();
        let [a, b, c] = [sample.items[0], sample.items[1], sample.items[2]];

        let shared = SharedTreeAdapter::new(&store, sample.page);
        {
            let mut adapter = shared.lock();
            adapter.select_items(&[a, c]);
            adapter.toggle_expanded(c);
        }

        store.delete_items(&[b]).unwrap();
        let d = store.create_object(&Place::Array(sample.widgets), &schema.text, vec![("text".to_string(), "d".into())]).unwrap();

        let mut adapter = shared.lock();
        assert_eq!(adapter.children(sample.page), vec![a, c, d]);
        assert_eq!(adapter.selected_items(), vec![a, c]);
        assert!(adapter.get_object_adapter(c).unwrap().is_expanded());
        assert!(adapter.get_object_adapter(b).is_none());

        let fresh = adapter.get_object_adapter(d).unwrap();
        assert!(!fresh.is_selected());
        assert!(!fresh.is_expanded());

        /* keys follow the new positions */
        assert_eq!(adapter.get_object_adapter(c).map(|item| item.key().to_string()), Some("1".to_string()));
    }

    #[test]
    fn test_reconcile_forgets_removed_items() {
        let (schema, sample, store) = setup();
        let [a, b, c] = [sample.items[0], sample.items[1], sample.items[2]];

        let shared = SharedTreeAdapter::new(&store, sample.page);
        {
            let mut adapter = shared.lock();
            adapter.select_items(&[a, b]);
            adapter.toggle_expanded(b);
            assert!(adapter.get_object_adapter(b).unwrap().is_expanded());
        }

        store.delete_object(b).unwrap();
        let d = store.create_object(&Place::Array(sample.widgets), &schema.text, vec![]).unwrap();

        {
            let mut adapter = shared.lock();
            assert_eq!(adapter.children(sample.page), vec![a, c, d]);
            assert_eq!(adapter.selected_items(), vec![a]);
            assert!(adapter.get_object_adapter(b).is_none());

            let fresh = adapter.get_object_adapter(d).unwrap();
            assert!(!fresh.is_selected());
            assert!(!fresh.is_expanded());
        }

        /* b comes back under its old id, but as a new item */
        store.undo();
        store.undo();
        let mut adapter = shared.lock();
        assert_eq!(adapter.children(sample.page), sample.items);
        let restored = adapter.get_object_adapter(b).unwrap();
        assert!(!restored.is_selected());
        assert!(!restored.is_expanded());
    }

    #[test]
    fn test_undo_restores_selection() {
        let (_schema, sample, store) = setup();
        let [a, b, c] = [sample.items[0], sample.items[1], sample.items[2]];
        let shared = SharedTreeAdapter::new(&store, store.document().root());

        shared.lock().select_items(&[b]);
        shared.delete_selection(&store).unwrap();
        assert!(shared.lock().selected_items().is_empty());

        shared.lock().select_items(&[c]);
        assert!(shared.undo(&store));
        assert_eq!(shared.lock().selected_items(), vec![b]);

        shared.lock().select_items(&[a]);
        assert!(shared.redo(&store));
        assert_eq!(shared.lock().selected_items(), vec![c]);

        assert!(shared.undo(&store));
        assert!(!shared.undo(&store));
    }

    #[test]
    fn test_select_expands_ancestors() {
        let (_schema, sample, store) = setup();
        let document = store.document();
        let mut adapter = TreeObjectAdapter::new(document.clone(), document.root());

        adapter.select_item(sample.items[1]);
        assert_eq!(adapter.selected_items(), vec![sample.items[1]]);
        assert_eq!(adapter.selected_object(), Some(sample.items[1]));
        assert!(adapter.root().is_expanded());
        assert!(adapter.get_object_adapter(sample.pages).unwrap().is_expanded());
        assert!(adapter.get_object_adapter(sample.page).unwrap().is_expanded());
        assert!(!adapter.get_object_adapter(sample.items[1]).unwrap().is_expanded());

        /* the flattened array has no item, so its page gets selected instead */
        adapter.select_object(sample.widgets);
        assert_eq!(adapter.selected_items(), vec![sample.page]);

        adapter.toggle_expanded(sample.page);
        assert!(!adapter.get_object_adapter(sample.page).unwrap().is_expanded());
        assert!(adapter.get_object_adapter(sample.pages).unwrap().is_expanded());
    }

    #[test]
    fn test_toggle_selected() {
        let (_schema, sample, store) = setup();
        let mut adapter = TreeObjectAdapter::new(store.document(), sample.page);
        let [a, b, c] = [sample.items[0], sample.items[1], sample.items[2]];

        adapter.select_items(&[a, b]);
        adapter.toggle_selected(b);
        adapter.toggle_selected(c);
        assert_eq!(adapter.selected_items(), vec![a, c]);
        assert_eq!(adapter.selected_object(), None);
    }

    #[test]
    fn test_out_of_scope() {
        let (_schema, sample, store) = setup();
        let mut adapter = TreeObjectAdapter::new(store.document(), sample.page);

        assert!(adapter.get_object_adapter(sample.styles).is_none());
        assert!(adapter.get_object_adapter(ObjectId::fresh()).is_none());

        adapter.select_items(&[sample.styles, sample.items[0]]);
        assert_eq!(adapter.selected_items(), vec![sample.items[0]]);
    }

    #[test]
    fn test_state_round_trip() {
        let (_schema, sample, store) = setup();
        let document = store.document();

        let mut first = TreeObjectAdapter::new(document.clone(), document.root());
        first.select_items(&[sample.items[2]]);
        let state = first.save_state();
        assert!(state.expanded);
        assert!(state.children["pages"].children["0"].children["2"].selected);

        let text = toml::to_string(&state).unwrap();
        let state: AdapterState = toml::from_str(&text).unwrap();

        let mut second = TreeObjectAdapter::new(document.clone(), document.root());
        second.load_state(&state);
        assert_eq!(second.selected_items(), vec![sample.items[2]]);
        assert!(second.get_object_adapter(sample.page).unwrap().is_expanded());

        second.load_state(&AdapterState::default());
        assert!(second.selected_items().is_empty());
        assert!(!second.get_object_adapter(sample.page).unwrap().is_expanded());
    }

    #[test]
    fn test_editing_selection() {
        let (_schema, sample, store) = setup();
        let clipboard = clipboard::MemoryClipboard::new();
        let shared = SharedTreeAdapter::new(&store, store.document().root());

        shared.lock().select_items(&[sample.items[0]]);
        assert!(shared.lock().can_copy());
        assert!(shared.lock().can_delete());
        assert!(shared.copy_selection(&store, &clipboard));
        assert!(shared.can_paste(&store, &clipboard));

        let pasted = shared.paste_selection(&store, &clipboard).unwrap();
        assert_eq!(shared.lock().selected_items(), pasted);
        assert_eq!(store.document().children(sample.widgets)[1], pasted[0]);

        shared.delete_selection(&store).unwrap();
        assert_eq!(store.document().children(sample.widgets), sample.items);
        assert!(shared.lock().selected_items().is_empty());

        /* the root itself can't go */
        shared.lock().select_items(&[store.document().root()]);
        assert!(!shared.lock().can_delete());
        assert!(!shared.lock().can_cut());
    }
}
