//! Id-free object trees. Used for clipboard payloads, for cloning, and for building new objects from a class and
//! a handful of explicit property values.

use std::collections;
use std::sync;

use serde_derive::{Deserialize, Serialize};

use crate::model::document;
use crate::model::document::change::ApplyError;
use crate::model::document::class;
use crate::model::document::structure;
use crate::model::document::structure::{Body, ObjectId, Value};

/// Non-optional Object properties get default children. Self-referential schemas stop here.
const MAX_DEFAULT_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectData {
    pub class: String,

    /// Only set for clones, so references inside the cloned tree can be pointed at the copies.
    #[serde(default, rename = "id", skip_serializing_if = "Option::is_none")]
    pub source_id: Option<u64>,

    #[serde(default, skip_serializing_if = "collections::BTreeMap::is_empty")]
    pub properties: collections::BTreeMap<String, DataValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataValue {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Object(ObjectData),
    Array(Vec<ObjectData>),
    Reference(u64),
}

impl DataValue {
    fn from_value(value: &Value) -> Result<DataValue, ApplyError> {
        Ok(match value {
            Value::Null => DataValue::Null,
            Value::Boolean(b) => DataValue::Boolean(*b),
            Value::Number(n) => DataValue::Number(*n),
            Value::String(s) => DataValue::String(s.clone()),
            Value::Reference(id) => DataValue::Reference(id.raw()),
            Value::Child(_) => return Err(ApplyError::InvalidParameters("child objects can't be passed as property values")),
        })
    }

    fn to_scalar(&self) -> Option<Value> {
        match self {
            DataValue::Null => Some(Value::Null),
            DataValue::Boolean(b) => Some(Value::Boolean(*b)),
            DataValue::Number(n) => Some(Value::Number(*n)),
            DataValue::String(s) => Some(Value::String(s.clone())),
            DataValue::Reference(raw) => Some(Value::Reference(ObjectId::from_raw(*raw))),
            DataValue::Object(_) | DataValue::Array(_) => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            DataValue::Null => "null",
            DataValue::Boolean(_) => "boolean",
            DataValue::Number(_) => "number",
            DataValue::String(_) => "string",
            DataValue::Object(_) => "object",
            DataValue::Array(_) => "array",
            DataValue::Reference(_) => "reference",
        }
    }
}

impl ObjectData {
    pub fn new(class: &str) -> ObjectData {
        ObjectData {
            class: class.to_string(),
            source_id: None,
            properties: collections::BTreeMap::new(),
        }
    }

    /// Snapshots a live object and everything it owns. Arrays can't be snapshotted on their own.
    pub fn from_document(document: &document::Document, id: ObjectId, with_ids: bool) -> Option<ObjectData> {
        let object = document.get(id)?;
        let props = object.properties()?;

        let mut properties = collections::BTreeMap::new();
        for (name, value) in props.iter() {
            let data = match value {
                Value::Child(child) => match document.get(*child)?.elements() {
                    Some(elements) => DataValue::Array(elements.iter()
                                                       .map(|e| ObjectData::from_document(document, *e, with_ids))
                                                       .collect::<Option<Vec<_>>>()?),
                    None => DataValue::Object(ObjectData::from_document(document, *child, with_ids)?),
                },
                value => DataValue::from_value(value).ok()?,
            };
            properties.insert(name.clone(), data);
        }

        Some(ObjectData {
            class: object.class.name.clone(),
            source_id: with_ids.then(|| id.raw()),
            properties,
        })
    }

    /// Builds a detached subtree with fresh ids. Properties missing from the data get their class defaults.
    pub fn to_subtree(&self, registry: &class::ClassRegistry) -> Result<structure::Subtree, ApplyError> {
        let class = registry.get(&self.class).ok_or_else(|| ApplyError::UnknownClass(self.class.clone()))?.clone();
        let mut builder = Builder::new(registry);
        builder.build_object(&class, Some(self), 0)?;
        Ok(builder.finish())
    }
}

/// Creates a new detached object of `class` with defaults, overridden by `properties`.
pub fn new_object(registry: &class::ClassRegistry, class: &sync::Arc<class::ClassInfo>, properties: Vec<(String, Value)>) -> Result<structure::Subtree, ApplyError> {
    let mut data = ObjectData::new(&class.name);
    for (name, value) in properties {
        data.properties.insert(name, DataValue::from_value(&value)?);
    }

    let mut builder = Builder::new(registry);
    builder.build_object(class, Some(&data), 0)?;
    Ok(builder.finish())
}

fn mismatch(info: &class::PropertyInfo, found: &str) -> ApplyError {
    ApplyError::TypeMismatch {
        expected: format!("{:?} for {}", info.ty, info.name),
        found: found.to_string(),
    }
}

struct Builder<'a> {
    registry: &'a class::ClassRegistry,
    objects: Vec<structure::Object>,
    remap: collections::HashMap<u64, ObjectId>,
    references: Vec<(usize, String)>,
}

impl<'a> Builder<'a> {
    fn new(registry: &'a class::ClassRegistry) -> Self {
        Builder {
            registry,
            objects: Vec::new(),
            remap: collections::HashMap::new(),
            references: Vec::new(),
        }
    }

    fn resolve(&self, name: &str) -> Result<sync::Arc<class::ClassInfo>, ApplyError> {
        self.registry.get(name).cloned().ok_or_else(|| ApplyError::UnknownClass(name.to_string()))
    }

    fn type_class(&self, info: &class::PropertyInfo) -> Result<sync::Arc<class::ClassInfo>, ApplyError> {
        match &info.type_class {
            Some(name) => self.resolve(name),
            None => Err(ApplyError::InvalidParameters("structural property has no type class")),
        }
    }

    /// Resolves the class named by `data` and checks that it fits where `info` expects `expected`.
    fn derived_class(&self, info: &class::PropertyInfo, expected: &class::ClassInfo, data: &ObjectData) -> Result<sync::Arc<class::ClassInfo>, ApplyError> {
        let class = self.resolve(&data.class)?;
        if class.is_subclass_of(&expected.name) {
            Ok(class)
        } else {
            Err(mismatch(info, &data.class))
        }
    }

    fn adopt(&mut self, index: usize, parent: ObjectId, key: Option<String>) -> ObjectId {
        let object = &mut self.objects[index];
        object.parent = Some(parent);
        object.key = key;
        object.id
    }

    fn push(&mut self, class: &sync::Arc<class::ClassInfo>, body: Body) -> (usize, ObjectId) {
        let id = ObjectId::fresh();
        self.objects.push(structure::Object {
            id,
            class: class.clone(),
            parent: None,
            key: None,
            body,
        });
        (self.objects.len() - 1, id)
    }

    fn build_object(&mut self, class: &sync::Arc<class::ClassInfo>, data: Option<&ObjectData>, depth: usize) -> Result<usize, ApplyError> {
        let (index, id) = self.push(class, Body::Properties(imbl::OrdMap::new()));

        if let Some(data) = data {
            if let Some(source) = data.source_id {
                self.remap.insert(source, id);
            }

            if let Some(name) = data.properties.keys().find(|name| class.property(name).is_none()) {
                return Err(ApplyError::UnknownProperty {
                    class: class.name.clone(),
                    property: name.clone(),
                });
            }
        }

        let mut props = imbl::OrdMap::new();
        for info in &class.properties {
            let given = data.and_then(|d| d.properties.get(&info.name));

            let value = match info.ty {
                class::PropertyType::Array => {
                    let elements: &[ObjectData] = match given {
                        Some(DataValue::Array(elements)) => elements,
                        None | Some(DataValue::Null) => &[],
                        Some(other) => return Err(mismatch(info, other.type_name())),
                    };

                    let array = self.build_array(info, elements, depth)?;
                    Value::Child(self.adopt(array, id, Some(info.name.clone())))
                },
                class::PropertyType::Object => match given {
                    Some(DataValue::Object(child)) => {
                        let expected = self.type_class(info)?;
                        let child_class = self.derived_class(info, &expected, child)?;
                        let child = self.build_object(&child_class, Some(child), depth + 1)?;
                        Value::Child(self.adopt(child, id, Some(info.name.clone())))
                    },
                    Some(DataValue::Null) => Value::Null,
                    None if info.flags.contains(class::PropertyFlags::OPTIONAL) || depth >= MAX_DEFAULT_DEPTH => Value::Null,
                    None => {
                        let child_class = self.type_class(info)?;
                        let child = self.build_object(&child_class, None, depth + 1)?;
                        Value::Child(self.adopt(child, id, Some(info.name.clone())))
                    },
                    Some(other) => return Err(mismatch(info, other.type_name())),
                },
                _ => match given {
                    None => info.default.clone().unwrap_or(Value::Null),
                    Some(given) => {
                        let value = given.to_scalar().ok_or_else(|| mismatch(info, given.type_name()))?;
                        if !info.accepts(&value) {
                            return Err(mismatch(info, given.type_name()));
                        }
                        if matches!(value, Value::Reference(_)) {
                            self.references.push((index, info.name.clone()));
                        }
                        value
                    },
                },
            };

            props.insert(info.name.clone(), value);
        }

        self.objects[index].body = Body::Properties(props);
        Ok(index)
    }

    fn build_array(&mut self, info: &class::PropertyInfo, elements: &[ObjectData], depth: usize) -> Result<usize, ApplyError> {
        let element_class = self.type_class(info)?;
        let (index, id) = self.push(&element_class, Body::Elements(imbl::Vector::new()));

        let mut ids = imbl::Vector::new();
        for data in elements {
            let class = self.derived_class(info, &element_class, data)?;
            let element = self.build_object(&class, Some(data), depth + 1)?;
            ids.push_back(self.adopt(element, id, None));
        }

        self.objects[index].body = Body::Elements(ids);
        Ok(index)
    }

    fn finish(mut self) -> structure::Subtree {
        for (index, name) in std::mem::take(&mut self.references) {
            if let Body::Properties(props) = &mut self.objects[index].body {
                let remapped = match props.get(&name) {
                    Some(Value::Reference(target)) => self.remap.get(&target.raw()).copied(),
                    _ => None,
                };

                if let Some(remapped) = remapped {
                    props.insert(name, Value::Reference(remapped));
                }
            }
        }

        structure::Subtree::from_preorder(self.objects)
    }
}
