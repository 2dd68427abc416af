//! Drag and drop. A gesture starts a session, hovers over candidate targets and ends in at most one store mutation.

use tracing::{debug, warn};

use crate::model::document;
use crate::model::document::change::ApplyError;
use crate::model::document::search;
use crate::model::document::structure::{ObjectId, Place, Subtree};
use crate::model::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPosition {
    Before,
    After,
    Inside,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropEffect {
    Move,
    Copy,
}

#[derive(Debug, Clone)]
pub enum DragSource {
    /// An object already in the document.
    Object(ObjectId),
    /// Something new, like a palette entry. Always inserted, whatever the effect.
    Detached(Subtree),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// A validated drop: where the dragged object would land.
#[derive(Debug, Clone, PartialEq)]
pub struct DropTarget {
    pub object: ObjectId,
    pub position: DropPosition,
    pub place: Place,
    /// Position in the receiving array, counted before the dragged object is taken out. `None` appends.
    pub index: Option<usize>,
}

#[derive(Debug)]
pub struct DragSession {
    pub source: DragSource,
    pub effect: DropEffect,
    pub target: Option<DropTarget>,
    pub pointer: Option<Point>,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    Dragging(DragSession),
}

/// Checks whether `source` could be dropped at `position` relative to `target`.
pub fn resolve_drop_target(document: &document::Document, source: &DragSource, target: ObjectId, position: DropPosition) -> Option<DropTarget> {
    let (class, dragged) = match source {
        DragSource::Object(id) => {
            let object = document.get(*id)?;
            if object.is_array() {
                return None;
            }
            (object.class.clone(), Some(*id))
        },
        DragSource::Detached(subtree) => (subtree.class().clone(), None),
    };

    if !document.contains(target) {
        return None;
    }

    /* nothing goes into itself */
    if dragged.is_some_and(|dragged| document.is_ancestor(dragged, target)) {
        return None;
    }

    match position {
        DropPosition::Before | DropPosition::After => {
            let parent = document.parent(target)?;
            let array = document.get(parent)?;
            let elements = array.elements()?;
            if !class.is_subclass_of(&array.class.name) {
                return None;
            }

            let index = document.index_in_parent(target)?;
            let (neighbor, index) = match position {
                DropPosition::Before => (index.checked_sub(1).and_then(|i| elements.get(i)), index),
                _ => (elements.get(index + 1), index + 1),
            };

            if dragged.is_some() && neighbor.copied() == dragged {
                return None;
            }

            Some(DropTarget {
                object: target,
                position,
                place: Place::Array(parent),
                index: Some(index),
            })
        },
        DropPosition::Inside => {
            let place = search::find_paste_place_inside(document, target, &class, true)?;
            Some(DropTarget {
                object: target,
                position,
                place,
                index: None,
            })
        },
    }
}

/// One per editor. Idle until [`start`](Self::start), back to idle after [`end`](Self::end) or
/// [`cancel`](Self::cancel).
#[derive(Debug, Default)]
pub struct DragAndDropManager {
    state: State,
}

impl DragAndDropManager {
    pub fn new() -> DragAndDropManager {
        DragAndDropManager::default()
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, State::Dragging(_))
    }

    pub fn session(&self) -> Option<&DragSession> {
        match &self.state {
            State::Dragging(session) => Some(session),
            State::Idle => None,
        }
    }

    pub fn drop_target(&self) -> Option<&DropTarget> {
        self.session().and_then(|session| session.target.as_ref())
    }

    /// Starts a session, replacing any session that was never ended.
    pub fn start(&mut self, source: DragSource, effect: DropEffect) {
        if self.is_dragging() {
            debug!("abandoning unfinished drag");
        }

        self.state = State::Dragging(DragSession {
            source,
            effect,
            target: None,
            pointer: None,
        });
    }

    pub fn drag(&mut self, pointer: Point) {
        if let State::Dragging(session) = &mut self.state {
            session.pointer = Some(pointer);
        }
    }

    /// Makes `target` the drop candidate if the dragged object could land there. An invalid candidate clears the
    /// previous one. Returns whether a candidate is set.
    pub fn set_drop_object(&mut self, document: &document::Document, target: ObjectId, position: DropPosition) -> bool {
        let State::Dragging(session) = &mut self.state else { return false };

        session.target = resolve_drop_target(document, &session.source, target, position);
        if session.target.is_none() {
            debug!(object = %target, ?position, "not a valid drop target");
        }

        session.target.is_some()
    }

    pub fn unset_drop_object(&mut self) {
        if let State::Dragging(session) = &mut self.state {
            session.target = None;
        }
    }

    /// Drops onto the current candidate as one undo step and returns the object that landed. The candidate is
    /// checked again against the current document first; without a session or a valid candidate nothing happens.
    pub fn end(&mut self, store: &store::DocumentStore) -> Result<Option<ObjectId>, ApplyError> {
        let State::Dragging(session) = std::mem::take(&mut self.state) else { return Ok(None) };
        let Some(target) = session.target else { return Ok(None) };

        let document = store.document();
        let Some(target) = resolve_drop_target(&document, &session.source, target.object, target.position) else {
            warn!(object = %target.object, "drop target went stale during the drag");
            return Ok(None);
        };

        let landed = match (session.source, session.effect) {
            (DragSource::Object(object), DropEffect::Move) => {
                store.move_object(object, &target.place, target.index)?;
                object
            },
            (DragSource::Object(object), DropEffect::Copy) => {
                let subtree = store.clone_object(object)?;
                store.insert_at(&target.place, target.index, subtree)?
            },
            (DragSource::Detached(subtree), _) => store.insert_at(&target.place, target.index, subtree)?,
        };

        Ok(Some(landed))
    }

    /// Drops the session without touching the document. Returns whether there was one.
    pub fn cancel(&mut self) -> bool {
        matches!(std::mem::take(&mut self.state), State::Dragging(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync;

    use assert_matches::assert_matches;
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
    fn test_drag_reorder() {
        let (_schema, sample, store) = setup();
        let [a, b, c] = [sample.items[0], sample.items[1], sample.items[2]];
        let mut dd = DragAndDropManager::new();

        dd.start(DragSource::Object(a), DropEffect::Move);
        dd.drag(Point { x: 5.0, y: 90.0 });
        assert!(dd.set_drop_object(&store.document(), c, DropPosition::After));
        assert_eq!(dd.drop_target().map(|t| t.index), Some(Some(3)));

        assert_matches!(dd.end(&store), Ok(Some(landed)) if landed == a);
        assert!(!dd.is_dragging());
        assert_eq!(store.document().children(sample.widgets), vec![b, c, a]);

        /* one step */
        assert!(store.undo().is_some());
        assert_eq!(store.document().children(sample.widgets), vec![a, b, c]);
        assert!(!store.can_undo());
    }

    #[test]
    fn test_invalid_targets() {
        let (schema, sample, store) = setup();
        let [a, b, _] = [sample.items[0], sample.items[1], sample.items[2]];
        let document = store.document();

        let source = DragSource::Object(a);
        assert_eq!(resolve_drop_target(&document, &source, a, DropPosition::Inside), None);
        assert_eq!(resolve_drop_target(&document, &source, a, DropPosition::After), None);

        /* a already sits right before b */
        assert_eq!(resolve_drop_target(&document, &source, b, DropPosition::Before), None);
        assert!(resolve_drop_target(&document, &source, b, DropPosition::After).is_some());

        /* texts don't hold anything, and widgets don't go next to pages */
        assert_eq!(resolve_drop_target(&document, &source, b, DropPosition::Inside), None);
        assert_eq!(resolve_drop_target(&document, &source, sample.page, DropPosition::Before), None);

        /* a page can't go into its own widgets */
        let page = DragSource::Object(sample.page);
        assert_eq!(resolve_drop_target(&document, &page, a, DropPosition::After), None);

        let palette = DragSource::Detached(schema.new_object(&schema.style, &[]).unwrap());
        assert_eq!(resolve_drop_target(&document, &palette, a, DropPosition::After), None);
        assert_eq!(resolve_drop_target(&document, &palette, ObjectId::fresh(), DropPosition::Inside), None);
    }

    #[test]
    fn test_drop_inside() {
        let (schema, sample, store) = setup();
        let mut dd = DragAndDropManager::new();

        let container = store.create_object(&Place::Array(sample.widgets), &schema.container, vec![]).unwrap();
        let inner = store.document().get(container).and_then(|o| o.property("widgets")).and_then(|v| v.as_child()).unwrap();

        /* containers don't go into themselves */
        dd.start(DragSource::Object(container), DropEffect::Move);
        assert!(!dd.set_drop_object(&store.document(), container, DropPosition::Inside));
        dd.cancel();

        dd.start(DragSource::Object(sample.items[1]), DropEffect::Move);
        assert!(dd.set_drop_object(&store.document(), container, DropPosition::Inside));
        assert_matches!(dd.end(&store), Ok(Some(_)));
        assert_eq!(store.document().children(inner), vec![sample.items[1]]);
        store.document().check_invariants().unwrap();
    }

    #[test]
    fn test_copy_and_palette_drops() {
        let (schema, sample, store) = setup();
        let [a, b, c] = [sample.items[0], sample.items[1], sample.items[2]];
        let mut dd = DragAndDropManager::new();

        dd.start(DragSource::Object(b), DropEffect::Copy);
        assert!(dd.set_drop_object(&store.document(), a, DropPosition::Before));
        let copy = dd.end(&store).unwrap().unwrap();
        assert_ne!(copy, b);
        assert_eq!(store.document().children(sample.widgets), vec![copy, a, b, c]);

        let rectangle = schema.new_object(&schema.rectangle, &[("color", "#ff0000".into())]).unwrap();
        dd.start(DragSource::Detached(rectangle), DropEffect::Move);
        assert!(dd.set_drop_object(&store.document(), c, DropPosition::After));
        let new = dd.end(&store).unwrap().unwrap();
        assert_eq!(store.document().children(sample.widgets), vec![copy, a, b, c, new]);
    }

    #[test]
    fn test_cancel_and_stale_drops() {
        let (_schema, sample, store) = setup();
        let [a, b, c] = [sample.items[0], sample.items[1], sample.items[2]];
        let mut dd = DragAndDropManager::new();

        /* nothing to end or cancel */
        assert_matches!(dd.end(&store), Ok(None));
        assert!(!dd.cancel());

        dd.start(DragSource::Object(a), DropEffect::Move);
        assert!(dd.set_drop_object(&store.document(), c, DropPosition::After));
        assert!(dd.cancel());
        assert!(!dd.cancel());
        assert!(!store.can_undo());

        /* an invalid hover clears the candidate */
        dd.start(DragSource::Object(a), DropEffect::Move);
        assert!(dd.set_drop_object(&store.document(), c, DropPosition::After));
        assert!(!dd.set_drop_object(&store.document(), b, DropPosition::Before));
        assert_eq!(dd.drop_target(), None);
        assert_matches!(dd.end(&store), Ok(None));

        /* the target disappears before the drop */
        dd.start(DragSource::Object(a), DropEffect::Move);
        assert!(dd.set_drop_object(&store.document(), c, DropPosition::After));
        dd.unset_drop_object();
        assert_eq!(dd.drop_target(), None);
        assert!(dd.set_drop_object(&store.document(), c, DropPosition::After));
        store.delete_object(c).unwrap();

        let before = store.document();
        assert_matches!(dd.end(&store), Ok(None));
        assert!(sync::Arc::ptr_eq(&before, &store.document()));
        assert_eq!(store.document().children(sample.widgets), vec![a, b]);
    }
}
