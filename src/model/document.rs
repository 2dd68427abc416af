pub mod change;
pub mod class;
pub mod search;
pub mod snapshot;
pub mod structure;

use std::collections;
use std::fmt;
use std::sync;

use crate::model::versioned;

use structure::{Body, ObjectId, Value};

/// One immutable version of the object tree. Cloning is cheap; the arena is a persistent map.
#[derive(Clone)]
pub struct Document {
    objects: imbl::HashMap<ObjectId, structure::Object>,
    root: ObjectId,
    classes: sync::Arc<class::ClassRegistry>,
    version: versioned::Version<Document>,
}

pub type DocumentHost = versioned::Host<Document>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    MissingRoot(ObjectId),
    RootHasParent,
    /// A forward link points at an object that isn't there.
    DanglingChild { parent: ObjectId, child: ObjectId },
    /// An object's parent doesn't link back to it.
    ParentMismatch(ObjectId),
    /// An object is linked from more than one place.
    SharedChild(ObjectId),
    /// Following parents from this object never reaches the root.
    Unreachable(ObjectId),
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::MissingRoot(id) => write!(f, "root object {} is missing", id),
            InvariantViolation::RootHasParent => write!(f, "root object has a parent"),
            InvariantViolation::DanglingChild { parent, child } => write!(f, "{} links to missing child {}", parent, child),
            InvariantViolation::ParentMismatch(id) => write!(f, "parent of {} doesn't link back to it", id),
            InvariantViolation::SharedChild(id) => write!(f, "{} has more than one parent", id),
            InvariantViolation::Unreachable(id) => write!(f, "{} isn't reachable from the root", id),
        }
    }
}

impl Document {
    pub fn new(classes: sync::Arc<class::ClassRegistry>, root: structure::Subtree) -> Document {
        let root_id = root.root();
        Document {
            objects: root.into_objects().into_iter().map(|o| (o.id, o)).collect(),
            root: root_id,
            classes,
            version: Default::default(),
        }
    }

    /// Builds a document from loose objects. Callers are expected to `check_invariants` afterwards.
    pub(crate) fn from_objects(classes: sync::Arc<class::ClassRegistry>, root: ObjectId, objects: imbl::HashMap<ObjectId, structure::Object>) -> Document {
        Document {
            objects,
            root,
            classes,
            version: Default::default(),
        }
    }

    pub fn root(&self) -> ObjectId {
        self.root
    }

    pub fn root_object(&self) -> Option<&structure::Object> {
        self.objects.get(&self.root)
    }

    pub fn classes(&self) -> &sync::Arc<class::ClassRegistry> {
        &self.classes
    }

    pub fn get(&self, id: ObjectId) -> Option<&structure::Object> {
        self.objects.get(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> impl Iterator<Item = &structure::Object> {
        self.objects.values()
    }

    pub(crate) fn objects_mut(&mut self) -> &mut imbl::HashMap<ObjectId, structure::Object> {
        &mut self.objects
    }

    pub fn parent(&self, id: ObjectId) -> Option<ObjectId> {
        self.get(id).and_then(|o| o.parent)
    }

    /// Owned children of an object, in order.
    pub fn children(&self, id: ObjectId) -> Vec<ObjectId> {
        self.get(id).map(structure::Object::child_ids).unwrap_or_default()
    }

    /// Parents of `id`, nearest first, ending at the root.
    pub fn ancestors(&self, id: ObjectId) -> impl Iterator<Item = ObjectId> + '_ {
        std::iter::successors(self.parent(id), move |p| self.parent(*p))
    }

    /// True if `ancestor` is `object` or one of its transitive parents.
    pub fn is_ancestor(&self, ancestor: ObjectId, object: ObjectId) -> bool {
        self.contains(object) && (ancestor == object || self.ancestors(object).any(|a| a == ancestor))
    }

    /// Finds a live object, but only if it's inside `root`'s subtree.
    pub fn find_object_by_id(&self, root: ObjectId, id: ObjectId) -> Option<&structure::Object> {
        if self.is_ancestor(root, id) {
            self.get(id)
        } else {
            None
        }
    }

    pub fn is_array_element(&self, id: ObjectId) -> bool {
        self.parent(id).and_then(|p| self.get(p)).is_some_and(structure::Object::is_array)
    }

    pub fn index_in_parent(&self, id: ObjectId) -> Option<usize> {
        let parent = self.get(self.parent(id)?)?;
        parent.elements()?.iter().position(|e| *e == id)
    }

    /// The property info that holds `id` in its parent, if it's held by a property.
    pub fn property_info(&self, id: ObjectId) -> Option<&class::PropertyInfo> {
        let object = self.get(id)?;
        let parent = self.get(object.parent?)?;
        parent.class.property(object.key.as_deref()?)
    }

    /// Deletable objects are array elements and the contents of optional properties.
    pub fn can_delete(&self, id: ObjectId) -> bool {
        self.is_array_element(id) || self.property_info(id).is_some_and(|info| info.flags.contains(class::PropertyFlags::OPTIONAL))
    }

    /// Path segments from the root: property names and array indices.
    pub fn object_path(&self, id: ObjectId) -> Option<Vec<String>> {
        if !self.contains(id) {
            return None;
        }

        let mut path = Vec::new();
        let mut current = id;
        while let Some(object) = self.get(current) {
            let Some(parent) = object.parent else { break };
            match &object.key {
                Some(key) => path.push(key.clone()),
                None => path.push(self.index_in_parent(current)?.to_string()),
            }
            current = parent;
        }
        path.reverse();
        Some(path)
    }

    pub fn object_path_string(&self, id: ObjectId) -> Option<String> {
        self.object_path(id).map(|path| format!("/{}", path.join("/")))
    }

    pub fn object_from_path(&self, path: &str) -> Option<ObjectId> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self.root, |current, segment| match &self.get(current)?.body {
                Body::Elements(elements) => elements.get(segment.parse::<usize>().ok()?).copied(),
                Body::Properties(props) => props.get(segment).and_then(Value::as_child),
            })
    }

    /// Like `object_path_string`, but array elements are named by their labels.
    pub fn human_readable_path(&self, id: ObjectId) -> Option<String> {
        if !self.contains(id) {
            return None;
        }

        let mut segments: Vec<String> = std::iter::once(id)
            .chain(self.ancestors(id))
            .filter(|a| *a != self.root)
            .map(|a| self.label(a))
            .collect();
        segments.reverse();
        Some(segments.join("/"))
    }

    pub fn label(&self, id: ObjectId) -> String {
        let Some(object) = self.get(id) else {
            return String::new();
        };

        if object.is_array() {
            return object.key.clone().unwrap_or_else(|| object.class.name.clone());
        }

        if let Some(label) = object.class.capabilities.label {
            return label(self, object);
        }

        match object.property("name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => object.class.name.clone(),
        }
    }

    pub fn rect(&self, id: ObjectId) -> Option<class::Rect> {
        let object = self.get(id)?;
        object.class.capabilities.rect.and_then(|rect| rect(object))
    }

    /// `id` and everything it owns, in preorder.
    pub fn subtree_ids(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut ids = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(object) = self.get(current) else { continue };
            ids.push(current);
            stack.extend(object.child_ids().into_iter().rev());
        }
        ids
    }

    /// Snapshots a live subtree, ids included. The snapshot's root has no parent or key.
    pub fn extract_subtree(&self, id: ObjectId) -> Option<structure::Subtree> {
        let mut objects: Vec<structure::Object> = self.subtree_ids(id).into_iter()
            .filter_map(|id| self.get(id).cloned())
            .collect();

        let root = objects.first_mut()?;
        root.parent = None;
        root.key = None;

        Some(structure::Subtree::from_preorder(objects))
    }

    /// Removes a subtree from the arena without touching its parent's links.
    pub(crate) fn take_subtree(&mut self, id: ObjectId) -> Option<structure::Subtree> {
        let subtree = self.extract_subtree(id)?;
        for id in subtree.ids() {
            self.objects.remove(&id);
        }
        Some(subtree)
    }

    /// Deep copy with fresh ids. References into the copied subtree are pointed at the copies.
    pub fn clone_object(&self, id: ObjectId) -> Result<structure::Subtree, change::ApplyError> {
        let object = self.get(id).ok_or(change::ApplyError::ObjectNotFound(id))?;
        if object.is_array() {
            return Err(change::ApplyError::InvalidParameters("arrays can't be cloned on their own"));
        }

        snapshot::ObjectData::from_document(self, id, true)
            .ok_or(change::ApplyError::ObjectNotFound(id))?
            .to_subtree(&self.classes)
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let root = self.get(self.root).ok_or(InvariantViolation::MissingRoot(self.root))?;
        if root.parent.is_some() {
            return Err(InvariantViolation::RootHasParent);
        }

        let mut linked = collections::HashSet::new();
        for object in self.objects.values() {
            for child in object.child_ids() {
                let child_object = self.get(child).ok_or(InvariantViolation::DanglingChild { parent: object.id, child })?;
                if child_object.parent != Some(object.id) {
                    return Err(InvariantViolation::ParentMismatch(child));
                }
                if !linked.insert(child) {
                    return Err(InvariantViolation::SharedChild(child));
                }
            }
        }

        for object in self.objects.values() {
            if object.id == self.root {
                continue;
            }

            let Some(parent) = object.parent.and_then(|p| self.get(p)) else {
                return Err(InvariantViolation::Unreachable(object.id));
            };

            if !parent.child_ids().contains(&object.id) {
                return Err(InvariantViolation::ParentMismatch(object.id));
            }

            /* every object has one parent and links agree, so a walk longer than the arena is a cycle */
            if self.ancestors(object.id).take(self.objects.len()).last() != Some(self.root) {
                return Err(InvariantViolation::Unreachable(object.id));
            }
        }

        Ok(())
    }
}

impl versioned::Versioned for Document {
    type Change = change::Change;

    fn version(&self) -> &versioned::Version<Self> {
        &self.version
    }

    fn version_mut(&mut self) -> &mut versioned::Version<Self> {
        &mut self.version
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("root", &self.root)
            .field("objects", &self.objects.len())
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use crate::schema;

    #[test]
    fn test_ancestry() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let document = sample.document;
        let a = sample.items[0];

        assert!(document.is_ancestor(a, a));
        assert!(document.is_ancestor(sample.page, a));
        assert!(document.is_ancestor(document.root(), a));
        assert!(!document.is_ancestor(a, sample.page));
        assert!(!document.is_ancestor(sample.styles, a));

        itertools::assert_equal(document.ancestors(a), [sample.widgets, sample.page, sample.pages, document.root()]);

        assert!(document.find_object_by_id(sample.page, a).is_some());
        assert!(document.find_object_by_id(sample.styles, a).is_none());
        assert!(document.find_object_by_id(sample.page, ObjectId::fresh()).is_none());
    }

    #[test]
    fn test_paths() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let document = sample.document;
        let c = sample.items[2];

        assert_eq!(document.object_path_string(c).as_deref(), Some("/pages/0/widgets/2"));
        assert_eq!(document.object_from_path("/pages/0/widgets/2"), Some(c));
        assert_eq!(document.object_from_path("/pages/0"), Some(sample.page));
        assert_eq!(document.object_from_path("/"), Some(document.root()));
        assert_eq!(document.object_from_path("/pages/7"), None);
        assert_eq!(document.human_readable_path(c).as_deref(), Some("pages/Main/widgets/c"));
        assert_eq!(document.index_in_parent(c), Some(2));
        assert!(document.is_array_element(c));
        assert!(!document.is_array_element(sample.widgets));
    }

    #[test]
    fn test_can_delete() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let document = sample.document;
        let settings = document.object_from_path("/settings").unwrap();

        assert!(document.can_delete(sample.items[0]));
        assert!(document.can_delete(sample.page));
        assert!(!document.can_delete(sample.widgets));
        assert!(!document.can_delete(settings));
        assert!(!document.can_delete(document.root()));
    }

    #[test]
    fn test_clone_object() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let document = sample.document;

        let clone = document.clone_object(sample.page).unwrap();
        let original = document.extract_subtree(sample.page).unwrap();

        /* disjoint ids */
        assert!(clone.ids().all(|id| !document.contains(id)));
        assert_eq!(clone.len(), original.len());

        /* same shape, same order */
        for (a, b) in clone.objects().iter().zip(original.objects()) {
            assert!(a.same_shape(b), "{:?} vs {:?}", a, b);
        }

        assert_matches!(document.clone_object(sample.widgets), Err(change::ApplyError::InvalidParameters(_)));
    }

    #[test]
    fn test_check_invariants() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let document = sample.document;
        document.check_invariants().unwrap();

        /* a child pointing back at the wrong parent */
        let mut broken = document.clone();
        if let Some(a) = broken.objects_mut().get_mut(&sample.items[0]) {
            a.parent = Some(sample.page);
        }
        assert_eq!(broken.check_invariants(), Err(InvariantViolation::ParentMismatch(sample.items[0])));

        /* a dangling element */
        let mut broken = document.clone();
        broken.objects_mut().remove(&sample.items[1]);
        assert_matches!(broken.check_invariants(), Err(InvariantViolation::DanglingChild { .. }));
    }
}
