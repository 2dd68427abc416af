use crate::model::document;
use crate::model::document::class;
use crate::model::document::structure::{Body, ObjectId, Place, Value};

/// Where an object of `class` could be pasted inside `target`, if anywhere.
///
/// An array accepts instances of its element class. An object asks its class hook if it has one. Otherwise the
/// first compatible array property wins, then (single objects only) the first empty compatible object property.
pub fn find_paste_place_inside(document: &document::Document, target: ObjectId, class: &class::ClassInfo, is_single_object: bool) -> Option<Place> {
    let object = document.get(target)?;

    let props = match &object.body {
        Body::Elements(_) => return class.is_subclass_of(&object.class.name).then_some(Place::Array(target)),
        Body::Properties(props) => props,
    };

    if let Some(hook) = object.class.capabilities.find_paste_place_inside {
        return hook(document, object, class, is_single_object);
    }

    let compatible = |info: &&class::PropertyInfo, ty: class::PropertyType| {
        info.ty == ty && info.type_class.as_deref().is_some_and(|tc| class.is_subclass_of(tc))
    };

    let array = object.class.properties.iter()
        .filter(|info| compatible(info, class::PropertyType::Array))
        .find_map(|info| props.get(&info.name).and_then(Value::as_child));

    if let Some(array) = array {
        return Some(Place::Array(array));
    }

    if is_single_object {
        return object.class.properties.iter()
            .filter(|info| compatible(info, class::PropertyType::Object))
            .find(|info| props.get(&info.name).is_none_or(Value::is_null))
            .map(|info| Place::Property {
                object: target,
                property: info.name.clone(),
            });
    }

    None
}

/// Tries `target`, then each of its ancestors.
pub fn find_paste_place_inside_and_outside(document: &document::Document, target: ObjectId, class: &class::ClassInfo, is_single_object: bool) -> Option<Place> {
    std::iter::once(target)
        .chain(document.ancestors(target))
        .find_map(|candidate| find_paste_place_inside(document, candidate, class, is_single_object))
}

/// Drops every object that has another member of the set as an ancestor, and duplicates. Order is kept.
pub fn unique_top(document: &document::Document, objects: &[ObjectId]) -> Vec<ObjectId> {
    let mut top: Vec<ObjectId> = Vec::with_capacity(objects.len());
    for (i, object) in objects.iter().enumerate() {
        if !document.contains(*object) || top.contains(object) {
            continue;
        }

        let covered = objects.iter().enumerate().any(|(j, other)| {
            i != j && other != object && document.is_ancestor(*other, *object)
        });

        if !covered {
            top.push(*object);
        }
    }
    top
}

/// Lifts a selection until every member shares the same parent. Used to turn a mixed tree selection into something
/// that can be moved or copied as a group.
pub fn reduce_until_common_parent(document: &document::Document, objects: &[ObjectId]) -> Vec<ObjectId> {
    let mut reduced = unique_top(document, objects);

    loop {
        let Some(first) = reduced.first() else { return reduced };
        let parent = document.parent(*first);

        if reduced.iter().all(|o| document.parent(*o) == parent) {
            return reduced;
        }

        /* lift whichever objects are deepest */
        let depth = |o: &ObjectId| document.ancestors(*o).count();
        let deepest = reduced.iter().map(depth).max().unwrap_or(0);
        let lifted: Vec<ObjectId> = reduced.iter()
            .map(|o| if depth(o) == deepest { document.parent(*o).unwrap_or(*o) } else { *o })
            .collect();
        reduced = unique_top(document, &lifted);
    }
}
