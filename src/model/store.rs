use std::sync;
use std::sync::atomic;

use itertools::Itertools;
use tracing::{debug, instrument};

use crate::config;
use crate::model::clipboard;
use crate::model::document;
use crate::model::document::change::{ApplyError, Change, Slot};
use crate::model::document::class;
use crate::model::document::search;
use crate::model::document::snapshot;
use crate::model::document::structure::{Body, ObjectId, Place, Subtree, Value};
use crate::model::undo;
use crate::model::versioned;
use crate::serialization;
use crate::util;

/// Reports what the user has selected. Undo steps remember it so undo and redo can put it back.
pub trait SelectionSource: Send + Sync {
    fn selection(&self) -> Vec<ObjectId>;
}

/// Per-document context: the current version, its undo history and the mutation API. Every mutation made here is
/// recorded as one undo command.
pub struct DocumentStore {
    host: sync::Arc<document::DocumentHost>,
    /* never held across `host.change`, so subscribers can query undo state */
    undo: parking_lot::Mutex<undo::UndoManager>,
    selection: parking_lot::Mutex<Option<sync::Weak<dyn SelectionSource>>>,
    config: config::Config,
    modified: atomic::AtomicBool,
}

fn describe(document: &document::Document, id: ObjectId) -> String {
    document.object_path_string(id).unwrap_or_else(|| id.to_string())
}

/// Gives unique-flagged string properties " (n)" suffixes until they don't clash with the array's elements or with
/// the subtrees placed before them.
fn ensure_unique_properties(document: &document::Document, array: ObjectId, subtrees: &mut [Subtree]) {
    let siblings = document.children(array);

    for i in 0..subtrees.len() {
        let (placed, rest) = subtrees.split_at_mut(i);
        let subtree = &mut rest[0];
        let class = subtree.class().clone();

        for info in class.properties.iter().filter(|info| info.flags.contains(class::PropertyFlags::UNIQUE) && info.ty == class::PropertyType::String) {
            let current = match subtree.root_object().property(&info.name).and_then(Value::as_str) {
                Some(current) if !current.is_empty() => current.to_string(),
                _ => continue,
            };

            let taken = |name: &str| siblings.iter()
                .filter_map(|s| document.get(*s))
                .chain(placed.iter().map(Subtree::root_object))
                .any(|o| o.property(&info.name).and_then(Value::as_str) == Some(name));

            let unique = util::unique_name(&current, taken);
            if unique != current {
                if let Body::Properties(props) = &mut subtree.root_object_mut().body {
                    props.insert(info.name.clone(), Value::String(unique));
                }
            }
        }
    }
}

impl DocumentStore {
    pub fn new(document: document::Document, config: config::Config) -> DocumentStore {
        DocumentStore {
            host: sync::Arc::new(document::DocumentHost::new(document)),
            undo: parking_lot::Mutex::new(undo::UndoManager::new(&config)),
            selection: parking_lot::Mutex::new(None),
            config,
            modified: atomic::AtomicBool::new(false),
        }
    }

    pub fn host(&self) -> &sync::Arc<document::DocumentHost> {
        &self.host
    }

    pub fn document(&self) -> sync::Arc<document::Document> {
        self.host.get()
    }

    pub fn config(&self) -> &config::Config {
        &self.config
    }

    pub fn subscribe<S: versioned::Subscriber<document::Document> + 'static>(&self, subscriber: &sync::Arc<S>) {
        self.host.subscribe(subscriber);
    }

    /// Held weakly, like subscribers. A later call replaces the source.
    pub fn watch_selection<S: SelectionSource + 'static>(&self, source: &sync::Arc<S>) {
        let source: sync::Arc<dyn SelectionSource> = source.clone();
        *self.selection.lock() = Some(sync::Arc::downgrade(&source));
    }

    fn current_selection(&self) -> Vec<ObjectId> {
        let source = self.selection.lock().as_ref().and_then(sync::Weak::upgrade);
        source.map(|source| source.selection()).unwrap_or_default()
    }

    pub fn is_modified(&self) -> bool {
        self.modified.load(atomic::Ordering::Relaxed)
    }

    pub fn set_modified(&self, modified: bool) {
        self.modified.store(modified, atomic::Ordering::Relaxed);
    }

    /// Serializes the current version and clears the modified flag.
    pub fn save(&self) -> Result<Vec<u8>, serialization::SerializationError> {
        let bytes = serialization::serialize_document(&self.document())?;
        self.set_modified(false);
        Ok(bytes)
    }

    fn execute<F: FnOnce(&document::Document) -> String>(&self, change: Change, describe: F) -> Result<sync::Arc<document::Document>, ApplyError> {
        let selection = self.current_selection();
        let (document, forward, record) = self.host.change(change)?;
        let description = describe(&document);
        debug!(%description, events = record.events.len(), "applied change");

        let mut history = self.undo.lock();
        history.set_selection(selection);
        history.execute_command(undo::Command {
            forward,
            inverse: record.inverse,
            description,
        });
        self.set_modified(true);

        Ok(document)
    }

    fn resolve_place(document: &document::Document, place: &Place, index: Option<usize>) -> Result<(ObjectId, Slot), ApplyError> {
        match place {
            Place::Array(array) => {
                let len = document.get(*array).ok_or(ApplyError::ObjectNotFound(*array))?
                    .elements().ok_or(ApplyError::InvalidParameters("place is not an array"))?
                    .len();
                Ok((*array, Slot::Index(index.unwrap_or(len))))
            },
            Place::Property { object, property } => Ok((*object, Slot::Property(property.clone()))),
        }
    }

    /* mutation */

    /// Creates a new object of `class` with defaults, overridden by `properties`, and puts it in `place`.
    #[instrument(skip(self, class, properties), fields(class = %class.name))]
    pub fn create_object(&self, place: &Place, class: &sync::Arc<class::ClassInfo>, properties: Vec<(String, Value)>) -> Result<ObjectId, ApplyError> {
        let subtree = snapshot::new_object(self.document().classes(), class, properties)?;
        self.add_object(place, subtree)
    }

    pub fn update_object(&self, object: ObjectId, values: Vec<(String, Value)>) -> Result<(), ApplyError> {
        if values.is_empty() {
            return Ok(());
        }

        let names = values.iter().map(|(name, _)| name.as_str()).join(", ");
        self.execute(Change::update(object, values), |document| format!("Changed ({}): {}", names, describe(document, object)))?;
        Ok(())
    }

    /// Appends to an array, or fills an empty object property.
    pub fn add_object(&self, place: &Place, subtree: Subtree) -> Result<ObjectId, ApplyError> {
        self.insert_at(place, None, subtree)
    }

    pub fn insert_object(&self, array: ObjectId, index: usize, subtree: Subtree) -> Result<ObjectId, ApplyError> {
        self.insert_at(&Place::Array(array), Some(index), subtree)
    }

    pub fn insert_object_before(&self, anchor: ObjectId, subtree: Subtree) -> Result<ObjectId, ApplyError> {
        let (array, index) = self.anchor_position(anchor)?;
        self.insert_object(array, index, subtree)
    }

    pub fn insert_object_after(&self, anchor: ObjectId, subtree: Subtree) -> Result<ObjectId, ApplyError> {
        let (array, index) = self.anchor_position(anchor)?;
        self.insert_object(array, index + 1, subtree)
    }

    fn anchor_position(&self, anchor: ObjectId) -> Result<(ObjectId, usize), ApplyError> {
        let document = self.document();
        let array = document.parent(anchor).ok_or(ApplyError::ObjectNotFound(anchor))?;
        let index = document.index_in_parent(anchor).ok_or(ApplyError::InvalidParameters("anchor is not an array element"))?;
        Ok((array, index))
    }

    /// Puts a subtree in `place`. `index` is only meaningful for arrays; `None` appends.
    pub fn insert_at(&self, place: &Place, index: Option<usize>, subtree: Subtree) -> Result<ObjectId, ApplyError> {
        let document = self.document();
        let (parent, slot) = Self::resolve_place(&document, place, index)?;

        let mut subtrees = [subtree];
        if matches!(slot, Slot::Index(_)) && self.config.ensure_unique_properties {
            ensure_unique_properties(&document, parent, &mut subtrees);
        }
        let [subtree] = subtrees;

        let id = subtree.root();
        self.execute(Change::Attach { parent, slot, subtree }, |document| format!("Added: {}", describe(document, id)))?;
        Ok(id)
    }

    pub fn add_objects(&self, array: ObjectId, subtrees: Vec<Subtree>) -> Result<Vec<ObjectId>, ApplyError> {
        self.insert_objects(array, None, subtrees)
    }

    /// Inserts several subtrees next to each other as one undo step.
    pub fn insert_objects(&self, array: ObjectId, index: Option<usize>, mut subtrees: Vec<Subtree>) -> Result<Vec<ObjectId>, ApplyError> {
        if subtrees.is_empty() {
            return Ok(Vec::new());
        }

        let document = self.document();
        let Slot::Index(start) = Self::resolve_place(&document, &Place::Array(array), index)?.1 else {
            return Err(ApplyError::InvalidParameters("place is not an array"));
        };

        if self.config.ensure_unique_properties {
            ensure_unique_properties(&document, array, &mut subtrees);
        }

        let ids: Vec<ObjectId> = subtrees.iter().map(Subtree::root).collect();
        let changes = subtrees.into_iter().enumerate()
            .map(|(i, subtree)| Change::Attach { parent: array, slot: Slot::Index(start + i), subtree })
            .collect();

        self.execute(Change::Compound(changes), |document| format!("Added: {}", ids.iter().map(|id| describe(document, *id)).join(", ")))?;
        Ok(ids)
    }

    /// Detaches the top-most of `objects` as one undo step. Descendants of other deleted objects, ids that are
    /// already gone, and objects their parent can't do without are ignored.
    #[instrument(skip(self))]
    pub fn delete_items(&self, objects: &[ObjectId]) -> Result<(), ApplyError> {
        let document = self.document();
        let (deletable, kept): (Vec<ObjectId>, Vec<ObjectId>) = objects.iter().copied()
            .filter(|id| document.contains(*id))
            .partition(|id| document.can_delete(*id));
        if !kept.is_empty() {
            debug!(?kept, "not deleting required objects");
        }

        let top = search::unique_top(&document, &deletable);
        if top.is_empty() {
            return Ok(());
        }

        let description = format!("Deleted: {}", top.iter().map(|id| describe(&document, *id)).join(", "));
        let change = Change::Compound(top.into_iter().map(|object| Change::Detach { object }).collect());
        self.execute(change, move |_| description)?;
        Ok(())
    }

    pub fn delete_object(&self, object: ObjectId) -> Result<(), ApplyError> {
        self.delete_items(&[object])
    }

    pub fn clone_object(&self, object: ObjectId) -> Result<Subtree, ApplyError> {
        self.document().clone_object(object)
    }

    /// Clones an array element and inserts the copy right after it.
    pub fn duplicate_item(&self, object: ObjectId) -> Result<ObjectId, ApplyError> {
        let subtree = self.clone_object(object)?;
        self.insert_object_after(object, subtree)
    }

    /// Moves a live object, ids intact, as one undo step. For arrays, `index` counts positions before the move.
    #[instrument(skip(self))]
    pub fn move_object(&self, object: ObjectId, place: &Place, index: Option<usize>) -> Result<(), ApplyError> {
        let document = self.document();
        let subtree = document.extract_subtree(object).ok_or(ApplyError::ObjectNotFound(object))?;
        let (parent, slot) = Self::resolve_place(&document, place, index)?;

        if document.is_ancestor(object, parent) {
            return Err(ApplyError::Cycle);
        }

        let slot = match slot {
            Slot::Index(index) if document.parent(object) == Some(parent) => {
                let old = document.index_in_parent(object).ok_or(ApplyError::InvalidParameters("object is missing from its parent array"))?;
                let index = if old < index { index - 1 } else { index };
                if index == old {
                    return Ok(());
                }
                Slot::Index(index)
            },
            slot => slot,
        };

        let description = format!("Moved: {}", describe(&document, object));
        self.execute(Change::Compound(vec![
            Change::Detach { object },
            Change::Attach { parent, slot, subtree },
        ]), move |_| description)?;

        Ok(())
    }

    /* undo */

    /// Reverts the last step and returns the selection from before it, or `None` if there was nothing to undo.
    pub fn undo(&self) -> Option<Vec<ObjectId>> {
        let selection = self.current_selection();
        let mut item = {
            let mut history = self.undo.lock();
            history.set_selection(selection);
            history.take_undo()?
        };

        /* unlocked, so subscribers can ask about undo state while the step replays */
        let intact = item.revert(&self.host);
        let restored = self.undo.lock().finish_undo(item, intact);
        self.set_modified(true);
        Some(restored)
    }

    /// Replays the last undone step and returns the selection from after it.
    pub fn redo(&self) -> Option<Vec<ObjectId>> {
        let mut item = self.undo.lock().take_redo()?;

        let intact = item.replay(&self.host);
        let restored = self.undo.lock().finish_redo(item, intact);
        self.set_modified(true);
        Some(restored)
    }

    pub fn can_undo(&self) -> bool {
        self.undo.lock().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.lock().can_redo()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo.lock().undo_description().map(str::to_string)
    }

    pub fn redo_description(&self) -> Option<String> {
        self.undo.lock().redo_description().map(str::to_string)
    }

    pub fn set_combine_commands(&self, value: bool) {
        self.undo.lock().set_combine_commands(value);
    }

    pub fn is_combining(&self) -> bool {
        self.undo.lock().is_combining()
    }

    pub fn clear_undo(&self) {
        self.undo.lock().clear();
    }

    /* clipboard */

    pub fn copy_items(&self, objects: &[ObjectId], clipboard: &dyn clipboard::Clipboard) -> bool {
        let document = self.document();
        let top = search::unique_top(&document, objects);

        match clipboard::objects_to_clipboard_data(&document, &top) {
            Some(text) => {
                clipboard.write_text(text);
                true
            },
            None => false,
        }
    }

    /// Copies, then deletes as one undo step. Returns false, leaving the clipboard alone, if the objects can't be
    /// copied or can't all be deleted.
    pub fn cut_items(&self, objects: &[ObjectId], clipboard: &dyn clipboard::Clipboard) -> Result<bool, ApplyError> {
        let document = self.document();
        if !clipboard::can_cut(&document, &search::unique_top(&document, objects)) || !self.copy_items(objects, clipboard) {
            return Ok(false);
        }

        self.delete_items(objects)?;
        Ok(true)
    }

    pub fn can_paste(&self, target: ObjectId, clipboard: &dyn clipboard::Clipboard) -> bool {
        let document = self.document();

        clipboard.read_text()
            .and_then(|text| clipboard::clipboard_data_to_object(document.classes(), &text).ok())
            .and_then(|data| search::find_paste_place_inside_and_outside(&document, target, &data.class, data.is_single()))
            .is_some()
    }

    /// Pastes into the nearest place at or above `target` that accepts the clipboard's class. When `target` is an
    /// element of the receiving array, the pasted objects go right after it.
    pub fn paste_item(&self, target: ObjectId, clipboard: &dyn clipboard::Clipboard) -> Result<Vec<ObjectId>, clipboard::ClipboardError> {
        let document = self.document();
        let text = clipboard.read_text().ok_or(clipboard::ClipboardError::Empty)?;
        let data = clipboard::clipboard_data_to_object(document.classes(), &text)?;

        let place = search::find_paste_place_inside_and_outside(&document, target, &data.class, data.is_single())
            .ok_or(clipboard::ClipboardError::NoPastePlace)?;

        let subtrees = data.to_subtrees(document.classes())?;

        match place {
            Place::Array(array) => {
                let index = match document.parent(target) == Some(array) {
                    true => document.index_in_parent(target).map(|i| i + 1),
                    false => None,
                };
                Ok(self.insert_objects(array, index, subtrees)?)
            },
            place => {
                let subtree = subtrees.into_iter().next().ok_or(clipboard::ClipboardError::Empty)?;
                Ok(vec![self.add_object(&place, subtree)?])
            },
        }
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("host", &self.host)
            .field("modified", &self.is_modified())
            .finish_non_exhaustive()
    }
}
