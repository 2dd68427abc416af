use std::fmt;
use std::sync;
use std::sync::atomic;

use serde_derive::{Deserialize, Serialize};

use crate::model::document::class;

static NEXT_OBJECT_ID: atomic::AtomicU64 = atomic::AtomicU64::new(1);

/// Largest id a decoded document may claim. Leaves half the id space for fresh ids.
pub(crate) const MAX_CLAIMED_ID: u64 = i64::MAX as u64;

/// Identity of a logical object. Generated once, never reused for a different object. Undo restores detached
/// objects under the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn fresh() -> ObjectId {
        ObjectId(NEXT_OBJECT_ID.fetch_add(1, atomic::Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Rebuilds an id from its raw value without allocating it. References and decoded edges go through here.
    pub(crate) fn from_raw(raw: u64) -> ObjectId {
        ObjectId(raw)
    }

    /// Marks a decoded id as taken, so fresh ids never collide with it. Ids above `MAX_CLAIMED_ID` are refused to
    /// keep the counter from wrapping.
    pub(crate) fn claim(raw: u64) -> Option<ObjectId> {
        if raw > MAX_CLAIMED_ID {
            return None;
        }

        NEXT_OBJECT_ID.fetch_max(raw + 1, atomic::Ordering::Relaxed);
        Some(ObjectId(raw))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    /// Owning edge to a child object or array.
    Child(ObjectId),
    /// Non-owning reference to another object.
    Reference(ObjectId),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_child(&self) -> Option<ObjectId> {
        match self {
            Value::Child(id) => Some(*id),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Child(_) => "child",
            Value::Reference(_) => "reference",
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Value {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Value {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::String(s)
    }
}

#[derive(Debug, Clone)]
pub enum Body {
    Properties(imbl::OrdMap<String, Value>),
    Elements(imbl::Vector<ObjectId>),
}

#[derive(Debug, Clone)]
pub struct Object {
    pub id: ObjectId,
    /// For arrays, this is the element class.
    pub class: sync::Arc<class::ClassInfo>,
    pub parent: Option<ObjectId>,
    /// Property of the parent that holds this object. `None` for array elements and detached roots.
    pub key: Option<String>,
    pub body: Body,
}

impl Object {
    pub fn is_array(&self) -> bool {
        matches!(self.body, Body::Elements(_))
    }

    pub fn elements(&self) -> Option<&imbl::Vector<ObjectId>> {
        match &self.body {
            Body::Elements(elements) => Some(elements),
            Body::Properties(_) => None,
        }
    }

    pub fn properties(&self) -> Option<&imbl::OrdMap<String, Value>> {
        match &self.body {
            Body::Properties(props) => Some(props),
            Body::Elements(_) => None,
        }
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties().and_then(|props| props.get(name))
    }

    /// Owned children, in element order for arrays and in schema order for objects.
    pub fn child_ids(&self) -> Vec<ObjectId> {
        match &self.body {
            Body::Elements(elements) => elements.iter().copied().collect(),
            Body::Properties(props) => self.class.properties.iter()
                .filter_map(|info| props.get(&info.name).and_then(Value::as_child))
                .collect(),
        }
    }

    /// Structural equality ignoring ids, parents and references.
    pub fn same_shape(&self, other: &Object) -> bool {
        if self.class.name != other.class.name || self.key != other.key {
            return false;
        }

        match (&self.body, &other.body) {
            (Body::Elements(a), Body::Elements(b)) => a.len() == b.len(),
            (Body::Properties(a), Body::Properties(b)) => a.len() == b.len() && a.iter().zip(b.iter()).all(|((ka, va), (kb, vb))| ka == kb && match (va, vb) {
                (Value::Child(_), Value::Child(_)) => true,
                (Value::Reference(_), Value::Reference(_)) => true,
                (va, vb) => va == vb,
            }),
            _ => false,
        }
    }
}

/// A detached, owned snapshot of a subtree. The root comes first and the rest follow in preorder. The root has no
/// parent and no key.
#[derive(Debug, Clone)]
pub struct Subtree {
    objects: Vec<Object>,
}

impl Subtree {
    pub(crate) fn from_preorder(objects: Vec<Object>) -> Subtree {
        debug_assert!(!objects.is_empty());
        Subtree { objects }
    }

    pub fn root(&self) -> ObjectId {
        self.objects[0].id
    }

    pub fn root_object(&self) -> &Object {
        &self.objects[0]
    }

    pub(crate) fn root_object_mut(&mut self) -> &mut Object {
        &mut self.objects[0]
    }

    pub fn class(&self) -> &sync::Arc<class::ClassInfo> {
        &self.objects[0].class
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.objects.iter().map(|o| o.id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.iter().any(|o| o.id == id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub(crate) fn into_objects(self) -> Vec<Object> {
        self.objects
    }
}

/// Where an object can be put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Place {
    Array(ObjectId),
    /// A single-object property that is currently empty.
    Property {
        object: ObjectId,
        property: String,
    },
}
