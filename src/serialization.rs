pub mod v1;

use std::fmt;
use std::sync;

use crate::model::document;
use crate::model::document::change::ApplyError;
use crate::model::document::class;
use crate::model::document::structure::ObjectId;

use bincode::Options;

pub use bincode::Error as SerializationError;

const MAGIC: &[u8; 5] = b"eezst";

#[derive(Debug)]
pub enum DeserializationError {
    InvalidMagic,
    UnsupportedVersion(u16),
    BincodeError(bincode::Error),
    UnknownClass(String),
    DuplicateId(ObjectId),
    /// Ids this large would leave no room for new objects.
    IdOutOfRange(u64),
    /// An object's properties don't fit its class.
    InvalidObject(ApplyError),
    Invariant(document::InvariantViolation),
}

impl fmt::Display for DeserializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeserializationError::InvalidMagic => write!(f, "not a project file"),
            DeserializationError::UnsupportedVersion(v) => write!(f, "unsupported project file version {:#06x}", v),
            DeserializationError::BincodeError(e) => write!(f, "corrupt project file: {}", e),
            DeserializationError::UnknownClass(name) => write!(f, "project uses unknown class '{}'", name),
            DeserializationError::DuplicateId(id) => write!(f, "object {} appears twice", id),
            DeserializationError::IdOutOfRange(raw) => write!(f, "object id {} is out of range", raw),
            DeserializationError::InvalidObject(e) => write!(f, "invalid object: {}", e),
            DeserializationError::Invariant(e) => write!(f, "broken object tree: {}", e),
        }
    }
}

impl std::error::Error for DeserializationError {
}

impl From<document::InvariantViolation> for DeserializationError {
    fn from(e: document::InvariantViolation) -> DeserializationError {
        DeserializationError::Invariant(e)
    }
}

impl From<ApplyError> for DeserializationError {
    fn from(e: ApplyError) -> DeserializationError {
        DeserializationError::InvalidObject(e)
    }
}

fn bincode_options() -> impl bincode::Options {
    bincode::DefaultOptions::new()
}

pub fn serialize_document(document: &document::Document) -> Result<Vec<u8>, SerializationError> {
    let mut vec: Vec<u8> = MAGIC.to_vec();
    vec.push(1); // version number MSB
    vec.push(0); // version number LSB

    vec.extend(bincode_options().serialize(&v1::Document::from(document))?);

    Ok(vec)
}

pub fn deserialize_document(bytes: &[u8], registry: &sync::Arc<class::ClassRegistry>) -> Result<document::Document, DeserializationError> {
    if bytes.len() < MAGIC.len() + 2 || &bytes[0..5] != MAGIC {
        return Err(DeserializationError::InvalidMagic);
    }

    if bytes[5..7] != [1, 0] {
        return Err(DeserializationError::UnsupportedVersion(((bytes[5] as u16) << 8) | bytes[6] as u16));
    }

    bincode_options().deserialize::<v1::Document>(&bytes[7..])
        .map_err(DeserializationError::BincodeError)?
        .into_document(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use crate::model::document::structure::Value;
    use crate::schema;

    #[test]
    fn test_save_and_load() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();

        let bytes = serialize_document(&sample.document).unwrap();
        assert_eq!(&bytes[0..7], b"eezst\x01\x00");

        let loaded = deserialize_document(&bytes, &schema.registry).unwrap();
        assert_eq!(loaded.root(), sample.document.root());
        assert_eq!(loaded.len(), sample.document.len());
        assert_eq!(loaded.children(sample.widgets), sample.items);
        assert_eq!(loaded.label(sample.items[2]), "c");
        assert_eq!(loaded.get(sample.items[1]).and_then(|o| o.property("y")), Some(&Value::Number(40.0)));

        /* new objects never collide with loaded ones */
        assert!(loaded.objects().all(|o| o.id < ObjectId::fresh()));
    }

    #[test]
    fn test_bad_headers() {
        let registry = schema::GuiSchema::new().registry;

        assert_matches!(deserialize_document(b"", &registry), Err(DeserializationError::InvalidMagic));
        assert_matches!(deserialize_document(b"eezs", &registry), Err(DeserializationError::InvalidMagic));
        assert_matches!(deserialize_document(b"charm\x01\x00", &registry), Err(DeserializationError::InvalidMagic));
        assert_matches!(deserialize_document(b"eezst\x02\x00", &registry), Err(DeserializationError::UnsupportedVersion(0x0200)));
        assert_matches!(deserialize_document(b"eezst\x01\x00\xff", &registry), Err(DeserializationError::BincodeError(_)));
    }

    #[test]
    fn test_unknown_class() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let bytes = serialize_document(&sample.document).unwrap();

        /* a registry that only knows part of the schema */
        let mut partial = class::ClassRegistry::new();
        partial.register(class::ClassInfo::builder("Project").build());

        assert_matches!(deserialize_document(&bytes, &sync::Arc::new(partial)), Err(DeserializationError::UnknownClass(_)));
    }
}
