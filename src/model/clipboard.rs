//! JSON clipboard payloads. A payload names the class every object in it can be treated as, and carries either one
//! object or a list of them, without ids.

use std::fmt;
use std::sync;

use serde_derive::{Deserialize, Serialize};

use crate::model::document;
use crate::model::document::change::ApplyError;
use crate::model::document::class;
use crate::model::document::snapshot::ObjectData;
use crate::model::document::structure::{ObjectId, Subtree};

/// Where clipboard text lives. The system clipboard belongs to the embedding application.
pub trait Clipboard {
    fn read_text(&self) -> Option<String>;
    fn write_text(&self, text: String);
}

#[derive(Debug, Default)]
pub struct MemoryClipboard {
    text: parking_lot::Mutex<Option<String>>,
}

impl MemoryClipboard {
    pub fn new() -> MemoryClipboard {
        MemoryClipboard::default()
    }
}

impl Clipboard for MemoryClipboard {
    fn read_text(&self) -> Option<String> {
        self.text.lock().clone()
    }

    fn write_text(&self, text: String) {
        *self.text.lock() = Some(text);
    }
}

#[derive(Debug)]
pub enum ClipboardError {
    Empty,
    Json(serde_json::Error),
    UnknownClass(String),
    NoPastePlace,
    Apply(ApplyError),
}

impl fmt::Display for ClipboardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipboardError::Empty => write!(f, "clipboard holds no objects"),
            ClipboardError::Json(e) => write!(f, "malformed clipboard data: {}", e),
            ClipboardError::UnknownClass(name) => write!(f, "unknown class '{}' on clipboard", name),
            ClipboardError::NoPastePlace => write!(f, "nowhere to paste"),
            ClipboardError::Apply(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ClipboardError {
}

impl From<serde_json::Error> for ClipboardError {
    fn from(e: serde_json::Error) -> ClipboardError {
        ClipboardError::Json(e)
    }
}

impl From<ApplyError> for ClipboardError {
    fn from(e: ApplyError) -> ClipboardError {
        ClipboardError::Apply(e)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    #[serde(rename = "objectClassName")]
    object_class_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    object: Option<ObjectData>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    objects: Option<Vec<ObjectData>>,
}

/// A decoded payload, class resolved.
#[derive(Debug)]
pub struct SerializedData {
    pub class: sync::Arc<class::ClassInfo>,
    pub objects: Vec<ObjectData>,
    single: bool,
}

impl SerializedData {
    pub fn is_single(&self) -> bool {
        self.single
    }

    /// Every call gives fresh ids, so one payload can be pasted any number of times.
    pub fn to_subtrees(&self, registry: &class::ClassRegistry) -> Result<Vec<Subtree>, ApplyError> {
        self.objects.iter().map(|data| data.to_subtree(registry)).collect()
    }
}

/// The most derived class every object is an instance of.
fn common_class(document: &document::Document, objects: &[ObjectId]) -> Option<sync::Arc<class::ClassInfo>> {
    let classes = objects.iter()
        .map(|id| document.get(*id).map(|o| o.class.clone()))
        .collect::<Option<Vec<_>>>()?;

    let (first, rest) = classes.split_first()?;
    let mut candidate = Some(first.clone());
    while let Some(class) = candidate {
        if rest.iter().all(|c| c.is_subclass_of(&class.name)) {
            return Some(class);
        }
        candidate = class.parent_class.clone();
    }

    None
}

pub fn can_copy(document: &document::Document, objects: &[ObjectId]) -> bool {
    objects.iter().all(|id| document.get(*id).is_some_and(|o| !o.is_array()))
        && common_class(document, objects).is_some()
}

pub fn can_cut(document: &document::Document, objects: &[ObjectId]) -> bool {
    can_copy(document, objects) && objects.iter().all(|id| document.can_delete(*id))
}

/// Encodes live objects. `None` if the list is empty, names an array or a missing object, or mixes unrelated classes.
pub fn objects_to_clipboard_data(document: &document::Document, objects: &[ObjectId]) -> Option<String> {
    let class = common_class(document, objects)?;
    let mut data = objects.iter()
        .map(|id| ObjectData::from_document(document, *id, false))
        .collect::<Option<Vec<_>>>()?;

    let payload = match data.len() {
        1 => Payload {
            object_class_name: class.name.clone(),
            object: data.pop(),
            objects: None,
        },
        _ => Payload {
            object_class_name: class.name.clone(),
            object: None,
            objects: Some(data),
        },
    };

    serde_json::to_string(&payload).ok()
}

pub fn object_to_clipboard_data(document: &document::Document, object: ObjectId) -> Option<String> {
    objects_to_clipboard_data(document, &[object])
}

pub fn clipboard_data_to_object(registry: &class::ClassRegistry, text: &str) -> Result<SerializedData, ClipboardError> {
    let payload: Payload = serde_json::from_str(text)?;

    let class = registry.get(&payload.object_class_name)
        .ok_or_else(|| ClipboardError::UnknownClass(payload.object_class_name.clone()))?
        .clone();

    let (objects, single) = match (payload.object, payload.objects) {
        (Some(object), _) => (vec![object], true),
        (None, Some(objects)) if !objects.is_empty() => (objects, false),
        _ => return Err(ClipboardError::Empty),
    };

    if let Some(stranger) = objects.iter().find(|data| registry.get(&data.class).is_none()) {
        return Err(ClipboardError::UnknownClass(stranger.class.clone()));
    }

    Ok(SerializedData {
        class,
        objects,
        single,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use crate::model::document::structure::Value;
    use crate::schema;

    #[test]
    fn test_single_payload() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();

        let text = object_to_clipboard_data(&sample.document, sample.items[0]).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["objectClassName"], "Text");
        assert_eq!(json["object"]["class"], "Text");
        assert_eq!(json["object"]["properties"]["text"]["string"], "a");
        assert!(json["object"].get("id").is_none());
        assert!(json.get("objects").is_none());

        let data = clipboard_data_to_object(&schema.registry, &text).unwrap();
        assert!(data.is_single());
        assert_eq!(data.class.name, "Text");

        let subtree = data.to_subtrees(&schema.registry).unwrap().remove(0);
        assert_ne!(subtree.root(), sample.items[0]);
        assert_eq!(subtree.root_object().property("text"), Some(&Value::String("a".to_string())));
    }

    #[test]
    fn test_mixed_payload_uses_common_class() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();

        let text = objects_to_clipboard_data(&sample.document, &sample.items).unwrap();
        let data = clipboard_data_to_object(&schema.registry, &text).unwrap();
        assert!(!data.is_single());
        assert_eq!(data.class.name, "Widget");
        itertools::assert_equal(data.objects.iter().map(|o| o.class.as_str()), ["Text", "Rectangle", "Text"]);

        /* a page and a widget have nothing in common */
        assert!(objects_to_clipboard_data(&sample.document, &[sample.page, sample.items[0]]).is_none());
        assert!(!can_copy(&sample.document, &[sample.page, sample.items[0]]));
        assert!(objects_to_clipboard_data(&sample.document, &[]).is_none());
    }

    #[test]
    fn test_copy_and_cut_rules() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let settings = sample.document.root_object().and_then(|o| o.property("settings")).and_then(Value::as_child).unwrap();

        assert!(can_copy(&sample.document, &[sample.page]));
        assert!(!can_copy(&sample.document, &[sample.widgets]));
        assert!(can_copy(&sample.document, &[settings]));
        assert!(!can_cut(&sample.document, &[settings]));
        assert!(can_cut(&sample.document, &sample.items));
    }

    #[test]
    fn test_bad_payloads() {
        let schema = schema::GuiSchema::new();

        assert_matches!(clipboard_data_to_object(&schema.registry, "not json"), Err(ClipboardError::Json(_)));
        assert_matches!(clipboard_data_to_object(&schema.registry, r#"{"objectClassName":"Gizmo","object":{"class":"Gizmo"}}"#), Err(ClipboardError::UnknownClass(name)) if name == "Gizmo");
        assert_matches!(clipboard_data_to_object(&schema.registry, r#"{"objectClassName":"Text","object":{"class":"Gizmo"}}"#), Err(ClipboardError::UnknownClass(_)));
        assert_matches!(clipboard_data_to_object(&schema.registry, r#"{"objectClassName":"Text","objects":[]}"#), Err(ClipboardError::Empty));
    }

    #[test]
    fn test_memory_clipboard() {
        let clipboard = MemoryClipboard::new();
        assert_eq!(clipboard.read_text(), None);
        clipboard.write_text("x".to_string());
        assert_eq!(clipboard.read_text().as_deref(), Some("x"));
    }
}
