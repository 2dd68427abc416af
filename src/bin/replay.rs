//! Replays a TOML script of editing steps against the sample project and prints the resulting tree.
//!
//! ```toml
//! [[step]]
//! op = "create"
//! place = "/pages/0/widgets"
//! class = "Text"
//! properties = { text = "hello", x = 10 }
//!
//! [[step]]
//! op = "undo"
//! ```

use std::fmt;
use std::path;

use eez_store::config;
use eez_store::model::document;
use eez_store::model::document::structure::{ObjectId, Place, Value};
use eez_store::model::store;
use eez_store::schema;
use eez_store::serialization;

use serde_derive::Deserialize;

#[derive(Debug, Deserialize)]
struct Script {
    #[serde(default, rename = "step")]
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Step {
    Create {
        place: String,
        /// Fill this property of `place` instead of appending to it.
        property: Option<String>,
        class: String,
        #[serde(default)]
        properties: toml::Table,
    },
    Update {
        object: String,
        properties: toml::Table,
    },
    Delete {
        objects: Vec<String>,
    },
    Duplicate {
        object: String,
    },
    Move {
        object: String,
        place: String,
        index: Option<usize>,
    },
    Undo,
    Redo,
    Combine {
        enabled: bool,
    },
}

#[derive(Debug)]
enum ReplayError {
    Usage,
    Io(std::io::Error),
    Script(toml::de::Error),
    Config(config::ConfigError),
    NoSuchPath(String),
    UnknownClass(String),
    BadValue(String),
    Apply(usize, document::change::ApplyError),
    Save(serialization::SerializationError),
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayError::Usage => write!(f, "usage: eez-store-replay <script.toml> [output.eezst]"),
            ReplayError::Io(e) => write!(f, "{}", e),
            ReplayError::Script(e) => write!(f, "bad script: {}", e),
            ReplayError::Config(e) => write!(f, "{}", e),
            ReplayError::NoSuchPath(path) => write!(f, "no object at '{}'", path),
            ReplayError::UnknownClass(name) => write!(f, "unknown class '{}'", name),
            ReplayError::BadValue(name) => write!(f, "property '{}' needs a string, number or boolean", name),
            ReplayError::Apply(step, e) => write!(f, "step {} failed: {}", step + 1, e),
            ReplayError::Save(e) => write!(f, "couldn't save: {}", e),
        }
    }
}

impl std::error::Error for ReplayError {
}

fn setup_tracing() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .pretty()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("couldn't install tracing subscriber");
    }
}

fn resolve(document: &document::Document, path: &str) -> Result<ObjectId, ReplayError> {
    document.object_from_path(path).ok_or_else(|| ReplayError::NoSuchPath(path.to_string()))
}

fn values(table: toml::Table) -> Result<Vec<(String, Value)>, ReplayError> {
    table.into_iter().map(|(name, value)| {
        let value = match value {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Number(i as f64),
            toml::Value::Float(n) => Value::Number(n),
            toml::Value::Boolean(b) => Value::Boolean(b),
            _ => return Err(ReplayError::BadValue(name)),
        };
        Ok((name, value))
    }).collect()
}

fn run_step(store: &store::DocumentStore, schema: &schema::GuiSchema, step: Step) -> Result<(), ReplayError> {
    let document = store.document();
    let apply = |e| ReplayError::Apply(0, e);

    match step {
        Step::Create { place, property, class, properties } => {
            let class = schema.registry.get(&class).ok_or_else(|| ReplayError::UnknownClass(class.clone()))?;
            let object = resolve(&document, &place)?;
            let place = match property {
                Some(property) => Place::Property { object, property },
                None => Place::Array(object),
            };
            store.create_object(&place, class, values(properties)?).map_err(apply)?;
        },
        Step::Update { object, properties } => {
            store.update_object(resolve(&document, &object)?, values(properties)?).map_err(apply)?;
        },
        Step::Delete { objects } => {
            let objects = objects.iter().map(|path| resolve(&document, path)).collect::<Result<Vec<_>, _>>()?;
            store.delete_items(&objects).map_err(apply)?;
        },
        Step::Duplicate { object } => {
            store.duplicate_item(resolve(&document, &object)?).map_err(apply)?;
        },
        Step::Move { object, place, index } => {
            store.move_object(resolve(&document, &object)?, &Place::Array(resolve(&document, &place)?), index).map_err(apply)?;
        },
        Step::Undo => {
            if store.undo().is_none() {
                println!("nothing to undo");
            }
        },
        Step::Redo => {
            if store.redo().is_none() {
                println!("nothing to redo");
            }
        },
        Step::Combine { enabled } => store.set_combine_commands(enabled),
    }

    Ok(())
}

fn print_tree(document: &document::Document, id: ObjectId, depth: usize) {
    let Some(object) = document.get(id) else { return };
    let key = object.key.clone().or_else(|| document.index_in_parent(id).map(|i| i.to_string())).unwrap_or_default();

    if object.is_array() {
        println!("{:indent$}{}[]", "", key, indent = depth * 2);
    } else {
        println!("{:indent$}{} {} \"{}\" {}", "", key, object.class.name, document.label(id), id, indent = depth * 2);
    }

    for child in document.children(id) {
        print_tree(document, child, depth + 1);
    }
}

fn run() -> Result<(), ReplayError> {
    let mut args = std::env::args().skip(1);
    let script_path = args.next().ok_or(ReplayError::Usage)?;
    let output = args.next().map(path::PathBuf::from);

    let config = config::Config::load().map_err(ReplayError::Config)?;
    let script: Script = toml::from_str(&std::fs::read_to_string(&script_path).map_err(ReplayError::Io)?).map_err(ReplayError::Script)?;

    let schema = schema::GuiSchema::new();
    let sample = schema.sample_document().map_err(|e| ReplayError::Apply(0, e))?;
    let store = store::DocumentStore::new(sample.document, config);

    for (i, step) in script.steps.into_iter().enumerate() {
        tracing::info!(step = i + 1, ?step, "replaying");
        run_step(&store, &schema, step).map_err(|e| match e {
            ReplayError::Apply(_, e) => ReplayError::Apply(i, e),
            e => e,
        })?;
    }

    let document = store.document();
    print_tree(&document, document.root(), 0);

    if let Some(undo) = store.undo_description() {
        println!("undo: {}", undo);
    }
    if store.is_combining() {
        println!("warning: script left combining on");
    }

    if let Some(output) = output {
        let bytes = store.save().map_err(ReplayError::Save)?;
        std::fs::write(output, bytes).map_err(ReplayError::Io)?;
    }

    Ok(())
}

fn main() {
    setup_tracing();

    if let Err(e) = run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
