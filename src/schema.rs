//! A small GUI-project schema: projects own pages and styles, pages own widgets, containers nest widgets.

use std::sync;

use crate::model::document;
use crate::model::document::change;
use crate::model::document::class::{self, ClassInfo, PropertyFlags, PropertyInfo, PropertyType};
use crate::model::document::snapshot;
use crate::model::document::structure::{self, ObjectId, Place, Value};
use crate::model::versioned::Versioned;

pub struct GuiSchema {
    pub registry: sync::Arc<class::ClassRegistry>,
    pub project: sync::Arc<ClassInfo>,
    pub settings: sync::Arc<ClassInfo>,
    pub theme: sync::Arc<ClassInfo>,
    pub style: sync::Arc<ClassInfo>,
    pub page: sync::Arc<ClassInfo>,
    pub widget: sync::Arc<ClassInfo>,
    pub text: sync::Arc<ClassInfo>,
    pub rectangle: sync::Arc<ClassInfo>,
    pub container: sync::Arc<ClassInfo>,
}

/// The sample project: one page "Main" holding a text "a", a rectangle and a text "c", plus one style.
pub struct Sample {
    pub document: document::Document,
    pub pages: ObjectId,
    pub styles: ObjectId,
    pub page: ObjectId,
    pub widgets: ObjectId,
    pub items: Vec<ObjectId>,
}

fn widget_rect(object: &structure::Object) -> Option<class::Rect> {
    let number = |name| object.property(name).and_then(Value::as_number);
    Some(class::Rect {
        x: number("x")?,
        y: number("y")?,
        width: number("width")?,
        height: number("height")?,
    })
}

fn text_label(_document: &document::Document, object: &structure::Object) -> String {
    match object.property("text").and_then(Value::as_str) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => object.class.name.clone(),
    }
}

fn page_paste_place(_document: &document::Document, page: &structure::Object, class: &ClassInfo, _is_single_object: bool) -> Option<Place> {
    if !class.is_subclass_of("Widget") {
        return None;
    }

    page.property("widgets").and_then(Value::as_child).map(Place::Array)
}

impl GuiSchema {
    pub fn new() -> GuiSchema {
        let mut registry = class::ClassRegistry::new();

        let settings = registry.register(ClassInfo::builder("Settings")
                                         .property(PropertyInfo::new("title", PropertyType::String).with_default("Untitled"))
                                         .property(PropertyInfo::new("displayWidth", PropertyType::Number).with_default(480.0))
                                         .property(PropertyInfo::new("displayHeight", PropertyType::Number).with_default(272.0))
                                         .build());

        let theme = registry.register(ClassInfo::builder("Theme")
                                      .property(PropertyInfo::new("name", PropertyType::String).with_default("Default"))
                                      .property(PropertyInfo::new("dark", PropertyType::Boolean).with_default(false))
                                      .build());

        let style = registry.register(ClassInfo::builder("Style")
                                      .property(PropertyInfo::new("name", PropertyType::String).with_default("Style").with_flags(PropertyFlags::UNIQUE))
                                      .property(PropertyInfo::new("color", PropertyType::String).with_default("#000000"))
                                      .build());

        let widget = registry.register(ClassInfo::builder("Widget")
                                       .property(PropertyInfo::new("x", PropertyType::Number).with_default(0.0))
                                       .property(PropertyInfo::new("y", PropertyType::Number).with_default(0.0))
                                       .property(PropertyInfo::new("width", PropertyType::Number).with_default(64.0))
                                       .property(PropertyInfo::new("height", PropertyType::Number).with_default(32.0))
                                       .property(PropertyInfo::new("style", PropertyType::ObjectReference))
                                       .rect(widget_rect)
                                       .build());

        let text = registry.register(ClassInfo::builder("Text")
                                     .derive_from(&widget)
                                     .property(PropertyInfo::new("text", PropertyType::String).with_default(""))
                                     .label(text_label)
                                     .build());

        let rectangle = registry.register(ClassInfo::builder("Rectangle")
                                          .derive_from(&widget)
                                          .property(PropertyInfo::new("color", PropertyType::String).with_default("#ffffff"))
                                          .build());

        let container = registry.register(ClassInfo::builder("Container")
                                          .derive_from(&widget)
                                          .property(PropertyInfo::array("widgets", "Widget"))
                                          .build());

        let page = registry.register(ClassInfo::builder("Page")
                                     .property(PropertyInfo::new("name", PropertyType::String).with_default("Page").with_flags(PropertyFlags::UNIQUE))
                                     .property(PropertyInfo::new("width", PropertyType::Number).with_default(480.0))
                                     .property(PropertyInfo::new("height", PropertyType::Number).with_default(272.0))
                                     .property(PropertyInfo::array("widgets", "Widget"))
                                     .find_paste_place_inside(page_paste_place)
                                     .build());

        let project = registry.register(ClassInfo::builder("Project")
                                        .property(PropertyInfo::object("settings", "Settings"))
                                        .property(PropertyInfo::object("theme", "Theme").with_flags(PropertyFlags::OPTIONAL))
                                        .property(PropertyInfo::array("pages", "Page"))
                                        .property(PropertyInfo::array("styles", "Style"))
                                        .build());

        GuiSchema {
            registry: sync::Arc::new(registry),
            project,
            settings,
            theme,
            style,
            page,
            widget,
            text,
            rectangle,
            container,
        }
    }

    pub fn new_project(&self) -> Result<document::Document, change::ApplyError> {
        let root = snapshot::new_object(&self.registry, &self.project, vec![])?;
        Ok(document::Document::new(self.registry.clone(), root))
    }

    pub fn new_object(&self, class: &sync::Arc<ClassInfo>, properties: &[(&str, Value)]) -> Result<structure::Subtree, change::ApplyError> {
        snapshot::new_object(&self.registry, class, properties.iter().map(|(name, value)| (name.to_string(), value.clone())).collect())
    }

    pub fn sample_document(&self) -> Result<Sample, change::ApplyError> {
        let mut document = self.new_project()?;
        let root = document.root();

        let child = |document: &document::Document, object: ObjectId, name: &str| {
            document.get(object)
                .and_then(|o| o.property(name))
                .and_then(Value::as_child)
                .ok_or(change::ApplyError::InvalidParameters("sample schema is missing a child"))
        };

        let pages = child(&document, root, "pages")?;
        let styles = child(&document, root, "styles")?;

        let page = self.new_object(&self.page, &[("name", "Main".into())])?;
        let page_id = page.root();
        document.change_in_place(change::Change::Attach { parent: pages, slot: change::Slot::Index(0), subtree: page })?;
        let widgets = child(&document, page_id, "widgets")?;

        let items = [
            self.new_object(&self.text, &[("text", "a".into())])?,
            self.new_object(&self.rectangle, &[("x", 10.into()), ("y", 40.into())])?,
            self.new_object(&self.text, &[("text", "c".into()), ("y", 80.into())])?,
        ];

        let mut ids = Vec::new();
        for (i, subtree) in items.into_iter().enumerate() {
            ids.push(subtree.root());
            document.change_in_place(change::Change::Attach { parent: widgets, slot: change::Slot::Index(i), subtree })?;
        }

        let style = self.new_object(&self.style, &[("name", "Default".into())])?;
        document.change_in_place(change::Change::Attach { parent: styles, slot: change::Slot::Index(0), subtree: style })?;

        Ok(Sample {
            document,
            pages,
            styles,
            page: page_id,
            widgets,
            items: ids,
        })
    }
}

impl Default for GuiSchema {
    fn default() -> GuiSchema {
        GuiSchema::new()
    }
}
