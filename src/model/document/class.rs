use std::collections;
use std::fmt;
use std::sync;

use bitflags::bitflags;

use crate::model::document;
use crate::model::document::structure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    String,
    Number,
    Boolean,
    /// Owns a single child object of `type_class`.
    Object,
    /// Owns an array object whose elements are instances of `type_class`.
    Array,
    /// Non-owning reference to another object.
    ObjectReference,
    Any,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct PropertyFlags: u8 {
        /// Values are made unique among siblings when an object is attached to an array.
        const UNIQUE = 1 << 0;
        /// An Object property that may be left empty. Its child can be deleted.
        const OPTIONAL = 1 << 1;
        /// Not listed as a child by tree adapters.
        const HIDDEN_IN_TREE = 1 << 2;
        /// Read-only in the property grid. The store doesn't enforce this.
        const READ_ONLY = 1 << 3;
    }
}

#[derive(Debug, Clone)]
pub struct PropertyInfo {
    pub name: String,
    pub ty: PropertyType,
    /// Class name of the child (Object) or of the elements (Array).
    pub type_class: Option<String>,
    pub default: Option<structure::Value>,
    pub flags: PropertyFlags,
}

impl PropertyInfo {
    pub fn new(name: &str, ty: PropertyType) -> PropertyInfo {
        PropertyInfo {
            name: name.to_string(),
            ty,
            type_class: None,
            default: None,
            flags: PropertyFlags::empty(),
        }
    }

    pub fn object(name: &str, type_class: &str) -> PropertyInfo {
        PropertyInfo {
            type_class: Some(type_class.to_string()),
            ..PropertyInfo::new(name, PropertyType::Object)
        }
    }

    pub fn array(name: &str, type_class: &str) -> PropertyInfo {
        PropertyInfo {
            type_class: Some(type_class.to_string()),
            ..PropertyInfo::new(name, PropertyType::Array)
        }
    }

    pub fn with_default<V: Into<structure::Value>>(mut self, value: V) -> PropertyInfo {
        self.default = Some(value.into());
        self
    }

    pub fn with_flags(mut self, flags: PropertyFlags) -> PropertyInfo {
        self.flags |= flags;
        self
    }

    pub fn is_structural(&self) -> bool {
        matches!(self.ty, PropertyType::Object | PropertyType::Array)
    }

    /// Whether a non-structural value may be stored in this property.
    pub fn accepts(&self, value: &structure::Value) -> bool {
        use structure::Value;

        match (self.ty, value) {
            (_, Value::Child(_)) => false,
            (PropertyType::Object | PropertyType::Array, _) => false,
            (_, Value::Null) => true,
            (PropertyType::String, Value::String(_)) => true,
            (PropertyType::Number, Value::Number(_)) => true,
            (PropertyType::Boolean, Value::Boolean(_)) => true,
            (PropertyType::ObjectReference, Value::Reference(_) | Value::String(_)) => true,
            (PropertyType::Any, _) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

pub type LabelFn = fn(&document::Document, &structure::Object) -> String;
pub type RectFn = fn(&structure::Object) -> Option<Rect>;
pub type FindPastePlaceFn = fn(&document::Document, &structure::Object, &ClassInfo, bool) -> Option<structure::Place>;

/// Per-class operation table. Missing entries fall back to the generic behavior.
#[derive(Clone, Copy, Default)]
pub struct Capabilities {
    pub label: Option<LabelFn>,
    pub rect: Option<RectFn>,
    pub find_paste_place_inside: Option<FindPastePlaceFn>,
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("label", &self.label.is_some())
            .field("rect", &self.rect.is_some())
            .field("find_paste_place_inside", &self.find_paste_place_inside.is_some())
            .finish()
    }
}

/// Type descriptor. Properties of the parent class are copied in when the class is built, so `properties` is
/// always the full schema.
#[derive(Debug)]
pub struct ClassInfo {
    pub name: String,
    pub parent_class: Option<sync::Arc<ClassInfo>>,
    pub properties: Vec<PropertyInfo>,
    pub capabilities: Capabilities,
}

impl ClassInfo {
    pub fn builder(name: &str) -> ClassBuilder {
        ClassBuilder {
            name: name.to_string(),
            parent_class: None,
            properties: Vec::new(),
            capabilities: Capabilities::default(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyInfo> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// True if this class is `name` or derives from it.
    pub fn is_subclass_of(&self, name: &str) -> bool {
        let mut class = Some(self);
        while let Some(c) = class {
            if c.name == name {
                return true;
            }
            class = c.parent_class.as_deref();
        }
        false
    }

    pub fn can_contain_children(&self) -> bool {
        self.properties.iter().any(PropertyInfo::is_structural)
    }
}

pub struct ClassBuilder {
    name: String,
    parent_class: Option<sync::Arc<ClassInfo>>,
    properties: Vec<PropertyInfo>,
    capabilities: Capabilities,
}

impl ClassBuilder {
    pub fn derive_from(mut self, parent: &sync::Arc<ClassInfo>) -> Self {
        self.properties = parent.properties.clone();
        self.capabilities = parent.capabilities;
        self.parent_class = Some(parent.clone());
        self
    }

    /// Adds a property, replacing an inherited one with the same name.
    pub fn property(mut self, property: PropertyInfo) -> Self {
        match self.properties.iter_mut().find(|p| p.name == property.name) {
            Some(existing) => *existing = property,
            None => self.properties.push(property),
        }
        self
    }

    pub fn label(mut self, f: LabelFn) -> Self {
        self.capabilities.label = Some(f);
        self
    }

    pub fn rect(mut self, f: RectFn) -> Self {
        self.capabilities.rect = Some(f);
        self
    }

    pub fn find_paste_place_inside(mut self, f: FindPastePlaceFn) -> Self {
        self.capabilities.find_paste_place_inside = Some(f);
        self
    }

    pub fn build(self) -> ClassInfo {
        ClassInfo {
            name: self.name,
            parent_class: self.parent_class,
            properties: self.properties,
            capabilities: self.capabilities,
        }
    }
}

/// Resolves class names, both for `type_class` lookups and for decoding snapshots.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: collections::HashMap<String, sync::Arc<ClassInfo>>,
}

impl ClassRegistry {
    pub fn new() -> ClassRegistry {
        ClassRegistry::default()
    }

    pub fn register(&mut self, class: ClassInfo) -> sync::Arc<ClassInfo> {
        let class = sync::Arc::new(class);
        self.classes.insert(class.name.clone(), class.clone());
        class
    }

    pub fn get(&self, name: &str) -> Option<&sync::Arc<ClassInfo>> {
        self.classes.get(name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
