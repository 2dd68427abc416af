use std::fmt;

use crate::model::document;
use crate::model::document::class;
use crate::model::document::structure;
use crate::model::document::structure::{Body, ObjectId, Value};
use crate::model::versioned;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Index(usize),
    Property(String),
}

#[derive(Debug, Clone)]
pub enum Change {
    /// Sets non-structural property values on one object.
    Update {
        object: ObjectId,
        values: Vec<(String, Value)>,
    },

    /// Attaches a detached subtree to a parent, either at an array index or into an empty object property.
    Attach {
        parent: ObjectId,
        slot: Slot,
        subtree: structure::Subtree,
    },

    /// Removes an object and everything it owns from the document.
    Detach {
        object: ObjectId,
    },

    /// Applies each change in order. Fails as a whole if any part fails.
    Compound(Vec<Change>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    PropertyUpdated {
        object: ObjectId,
        property: String,
        old: Value,
        new: Value,
    },
    Inserted {
        parent: ObjectId,
        object: ObjectId,
    },
    Removed {
        parent: ObjectId,
        object: ObjectId,
    },
}

#[derive(Debug, Clone)]
pub struct Record {
    pub inverse: Change,
    pub events: Vec<Event>,
}

impl Record {
    /// False if the change only touched property values.
    pub fn is_structural(&self) -> bool {
        self.events.iter().any(|e| !matches!(e, Event::PropertyUpdated { .. }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyError {
    ObjectNotFound(ObjectId),
    UnknownClass(String),
    UnknownProperty {
        class: String,
        property: String,
    },
    TypeMismatch {
        expected: String,
        found: String,
    },
    /// The subtree being attached contains the parent it's being attached to.
    Cycle,
    DuplicateId(ObjectId),
    InvalidParameters(&'static str),
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyError::ObjectNotFound(id) => write!(f, "object {} not found", id),
            ApplyError::UnknownClass(name) => write!(f, "unknown class '{}'", name),
            ApplyError::UnknownProperty { class, property } => write!(f, "class '{}' has no property '{}'", class, property),
            ApplyError::TypeMismatch { expected, found } => write!(f, "expected {}, found {}", expected, found),
            ApplyError::Cycle => write!(f, "an object can't be inserted into itself"),
            ApplyError::DuplicateId(id) => write!(f, "object {} is already in the document", id),
            ApplyError::InvalidParameters(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for ApplyError {
}

impl Change {
    pub fn update(object: ObjectId, values: Vec<(String, Value)>) -> Change {
        Change::Update { object, values }
    }

    /// The object an `Update` modifies. Used to merge consecutive updates.
    pub fn updated_object(&self) -> Option<ObjectId> {
        match self {
            Change::Update { object, .. } => Some(*object),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Change::Update { values, .. } => values.is_empty(),
            Change::Compound(changes) => changes.iter().all(Change::is_empty),
            _ => false,
        }
    }

    fn apply_into(&self, document: &mut document::Document, events: &mut Vec<Event>) -> Result<Change, ApplyError> {
        match self {
            Change::Update { object, values } => apply_update(document, *object, values, events),
            Change::Attach { parent, slot, subtree } => apply_attach(document, *parent, slot, subtree, events),
            Change::Detach { object } => apply_detach(document, *object, events),
            Change::Compound(changes) => {
                let mut inverses = Vec::with_capacity(changes.len());
                for change in changes {
                    inverses.push(change.apply_into(document, events)?);
                }
                inverses.reverse();
                Ok(Change::Compound(inverses))
            },
        }
    }
}

fn apply_update(document: &mut document::Document, object: ObjectId, values: &[(String, Value)], events: &mut Vec<Event>) -> Result<Change, ApplyError> {
    let mut target = document.get(object).ok_or(ApplyError::ObjectNotFound(object))?.clone();
    let class = target.class.clone();

    let Body::Properties(props) = &mut target.body else {
        return Err(ApplyError::InvalidParameters("arrays have no properties to update"));
    };

    /* Validate everything before touching anything. */
    let mut old_values = Vec::with_capacity(values.len());
    for (name, value) in values {
        let info = class.property(name).ok_or_else(|| ApplyError::UnknownProperty {
            class: class.name.clone(),
            property: name.clone(),
        })?;

        if info.is_structural() || matches!(value, Value::Child(_)) {
            return Err(ApplyError::InvalidParameters("structural properties change through attach and detach"));
        }

        if !info.accepts(value) {
            return Err(ApplyError::TypeMismatch {
                expected: format!("{:?} for {}", info.ty, info.name),
                found: value.type_name().to_string(),
            });
        }

        old_values.push((name.clone(), props.get(name).cloned().unwrap_or(Value::Null)));
    }

    for ((name, new), (_, old)) in values.iter().zip(old_values.iter()) {
        props.insert(name.clone(), new.clone());
        events.push(Event::PropertyUpdated {
            object,
            property: name.clone(),
            old: old.clone(),
            new: new.clone(),
        });
    }

    document.objects_mut().insert(object, target);

    Ok(Change::Update { object, values: old_values })
}

fn apply_attach(document: &mut document::Document, parent: ObjectId, slot: &Slot, subtree: &structure::Subtree, events: &mut Vec<Event>) -> Result<Change, ApplyError> {
    if subtree.contains(parent) {
        return Err(ApplyError::Cycle);
    }

    let mut parent_object = document.get(parent).ok_or(ApplyError::ObjectNotFound(parent))?.clone();
    let parent_class = parent_object.class.clone();

    if let Some(id) = subtree.ids().find(|id| document.contains(*id)) {
        return Err(ApplyError::DuplicateId(id));
    }

    let class = subtree.class();
    let root = subtree.root();

    let key = match (slot, &mut parent_object.body) {
        (Slot::Index(index), Body::Elements(elements)) => {
            if *index > elements.len() {
                return Err(ApplyError::InvalidParameters("attempted to insert object at out-of-bounds index"));
            }

            if subtree.root_object().is_array() || !class.is_subclass_of(&parent_class.name) {
                return Err(ApplyError::TypeMismatch {
                    expected: parent_class.name.clone(),
                    found: class.name.clone(),
                });
            }

            elements.insert(*index, root);
            None
        },
        (Slot::Property(name), Body::Properties(props)) => {
            let info = parent_class.property(name).ok_or_else(|| ApplyError::UnknownProperty {
                class: parent_class.name.clone(),
                property: name.clone(),
            })?;

            let type_class = match (&info.ty, &info.type_class) {
                (class::PropertyType::Object | class::PropertyType::Array, Some(type_class)) => type_class,
                _ => return Err(ApplyError::InvalidParameters("property can't hold a child object")),
            };

            let wants_array = info.ty == class::PropertyType::Array;
            if wants_array != subtree.root_object().is_array() || !class.is_subclass_of(type_class) {
                return Err(ApplyError::TypeMismatch {
                    expected: type_class.clone(),
                    found: class.name.clone(),
                });
            }

            if props.get(name).is_some_and(|v| !v.is_null()) {
                return Err(ApplyError::InvalidParameters("property already holds an object"));
            }

            props.insert(name.clone(), Value::Child(root));
            Some(name.clone())
        },
        (Slot::Index(_), Body::Properties(_)) => return Err(ApplyError::InvalidParameters("attempted to insert by index into an object")),
        (Slot::Property(_), Body::Elements(_)) => return Err(ApplyError::InvalidParameters("arrays have no named slots")),
    };

    /* Preconditions passed; do the deed. */
    let objects = document.objects_mut();
    objects.insert(parent, parent_object);
    for (i, object) in subtree.objects().iter().enumerate() {
        let mut object = object.clone();
        if i == 0 {
            object.parent = Some(parent);
            object.key = key.clone();
        }
        objects.insert(object.id, object);
    }

    events.push(Event::Inserted { parent, object: root });

    Ok(Change::Detach { object: root })
}

fn apply_detach(document: &mut document::Document, object: ObjectId, events: &mut Vec<Event>) -> Result<Change, ApplyError> {
    let target = document.get(object).ok_or(ApplyError::ObjectNotFound(object))?;
    let parent = target.parent.ok_or(ApplyError::InvalidParameters("attempted to detach the root object"))?;
    let key = target.key.clone();

    let mut parent_object = document.get(parent).ok_or(ApplyError::ObjectNotFound(parent))?.clone();

    let slot = match &mut parent_object.body {
        Body::Elements(elements) => {
            let index = elements.iter().position(|e| *e == object)
                .ok_or(ApplyError::InvalidParameters("object is missing from its parent array"))?;
            elements.remove(index);
            Slot::Index(index)
        },
        Body::Properties(props) => {
            let key = key.ok_or(ApplyError::InvalidParameters("object has no key in its parent"))?;
            props.insert(key.clone(), Value::Null);
            Slot::Property(key)
        },
    };

    let subtree = document.take_subtree(object).ok_or(ApplyError::ObjectNotFound(object))?;
    document.objects_mut().insert(parent, parent_object);

    events.push(Event::Removed { parent, object });

    Ok(Change::Attach { parent, slot, subtree })
}

impl versioned::Change<document::Document> for Change {
    type ApplyError = ApplyError;
    type ApplyRecord = Record;

    /// Must be applied to a scratch copy. A failing compound change may leave the copy half-modified.
    fn apply(self, document: &mut document::Document) -> Result<(Change, Record), ApplyError> {
        let mut events = Vec::new();
        let inverse = self.apply_into(document, &mut events)?;
        Ok((self, Record { inverse, events }))
    }
}
