use std::collections;
use std::sync;

use crate::model::document;
use crate::model::document::change::ApplyError;
use crate::model::document::class;
use crate::model::document::structure;
use crate::model::document::structure::ObjectId;

use super::DeserializationError;

use serde_derive::Serialize;
use serde_derive::Deserialize;

/* /===============================\
 * | Struct definitions.           |
 * \===============================/
 *
 * These struct definitions are copied here so that changing them elsewhere won't ruin the serialization.
 */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    root: u64,
    /// Preorder from the root.
    objects: Vec<Object>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Object {
    id: u64,
    class: String,
    parent: Option<u64>,
    key: Option<String>,
    body: Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Body {
    Properties(Vec<(String, Value)>),
    Elements(Vec<u64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Value {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Child(u64),
    Reference(u64),
}

/* /===============================\
 * | Conversions.                  |
 * \===============================/
 */

impl From<&document::Document> for Document {
    fn from(model: &document::Document) -> Document {
        Document {
            root: model.root().raw(),
            objects: model.subtree_ids(model.root()).into_iter()
                .filter_map(|id| model.get(id))
                .map(Object::from)
                .collect(),
        }
    }
}

impl From<&structure::Object> for Object {
    fn from(object: &structure::Object) -> Object {
        Object {
            id: object.id.raw(),
            class: object.class.name.clone(),
            parent: object.parent.map(|p| p.raw()),
            key: object.key.clone(),
            body: match &object.body {
                structure::Body::Properties(props) => Body::Properties(props.iter().map(|(name, value)| (name.clone(), value.into())).collect()),
                structure::Body::Elements(elements) => Body::Elements(elements.iter().map(ObjectId::raw).collect()),
            },
        }
    }
}

impl From<&structure::Value> for Value {
    fn from(value: &structure::Value) -> Value {
        match value {
            structure::Value::Null => Value::Null,
            structure::Value::Boolean(b) => Value::Boolean(*b),
            structure::Value::Number(n) => Value::Number(*n),
            structure::Value::String(s) => Value::String(s.clone()),
            structure::Value::Child(id) => Value::Child(id.raw()),
            structure::Value::Reference(id) => Value::Reference(id.raw()),
        }
    }
}

impl From<Value> for structure::Value {
    fn from(value: Value) -> structure::Value {
        match value {
            Value::Null => structure::Value::Null,
            Value::Boolean(b) => structure::Value::Boolean(b),
            Value::Number(n) => structure::Value::Number(n),
            Value::String(s) => structure::Value::String(s),
            Value::Child(raw) => structure::Value::Child(ObjectId::from_raw(raw)),
            Value::Reference(raw) => structure::Value::Reference(ObjectId::from_raw(raw)),
        }
    }
}

impl Document {
    /// Resolves classes, checks every property against its class and validates the tree before handing it out.
    pub fn into_document(self, registry: &sync::Arc<class::ClassRegistry>) -> Result<document::Document, DeserializationError> {
        let classes = self.objects.iter()
            .map(|object| registry.get(&object.class).cloned().ok_or_else(|| DeserializationError::UnknownClass(object.class.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        let mut objects = imbl::HashMap::new();
        let mut seen = collections::HashSet::new();

        for (object, class) in self.objects.into_iter().zip(classes) {
            if object.id > structure::MAX_CLAIMED_ID {
                return Err(DeserializationError::IdOutOfRange(object.id));
            }

            let id = ObjectId::from_raw(object.id);
            if !seen.insert(id) {
                return Err(DeserializationError::DuplicateId(id));
            }

            let body = match object.body {
                Body::Properties(props) => structure::Body::Properties(props.into_iter().map(|(name, value)| {
                    let value = structure::Value::from(value);
                    let info = class.property(&name).ok_or_else(|| ApplyError::UnknownProperty {
                        class: class.name.clone(),
                        property: name.clone(),
                    })?;

                    let fits = match value {
                        structure::Value::Child(_) => info.is_structural(),
                        /* empty Object slots are legal, arrays always exist */
                        structure::Value::Null if info.ty == class::PropertyType::Object => true,
                        ref value => info.accepts(value),
                    };

                    if !fits {
                        return Err(ApplyError::TypeMismatch {
                            expected: format!("{:?}", info.ty),
                            found: value.type_name().to_string(),
                        });
                    }

                    Ok((name, value))
                }).collect::<Result<imbl::OrdMap<_, _>, ApplyError>>()?),
                Body::Elements(elements) => structure::Body::Elements(elements.into_iter().map(ObjectId::from_raw).collect()),
            };

            objects.insert(id, structure::Object {
                id,
                class,
                parent: object.parent.map(ObjectId::from_raw),
                key: object.key,
                body,
            });
        }

        let document = document::Document::from_objects(registry.clone(), ObjectId::from_raw(self.root), objects);
        document.check_invariants()?;
        check_child_classes(&document)?;

        for object in document.objects() {
            ObjectId::claim(object.id.raw());
        }

        Ok(document)
    }
}

/// Every owned child must fit the slot holding it, the same way attaching it would have been checked.
fn check_child_classes(document: &document::Document) -> Result<(), ApplyError> {
    let mismatch = |expected: &str, found: &structure::Object| ApplyError::TypeMismatch {
        expected: expected.to_string(),
        found: found.class.name.clone(),
    };

    for object in document.objects() {
        match &object.body {
            structure::Body::Properties(props) => {
                for (name, value) in props.iter() {
                    let structure::Value::Child(child) = value else { continue };
                    let Some(child) = document.get(*child) else { continue };
                    let Some(info) = object.class.property(name) else { continue };

                    let type_class = info.type_class.as_deref().unwrap_or_default();
                    let wants_array = info.ty == class::PropertyType::Array;
                    if wants_array != child.is_array() || !child.class.is_subclass_of(type_class) {
                        return Err(mismatch(type_class, child));
                    }
                }
            },
            structure::Body::Elements(elements) => {
                for element in elements.iter().filter_map(|e| document.get(*e)) {
                    if element.is_array() || !element.class.is_subclass_of(&object.class.name) {
                        return Err(mismatch(&object.class.name, element));
                    }
                }
            },
        }
    }

    Ok(())
}
