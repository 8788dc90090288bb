//! Record: header plus a root field, with path-addressed access.

use crate::error::RecordError;
use crate::field::{Field, FieldType, FieldValue};
use crate::header::Header;
use crate::path::{escape_name, parse_field_path, PathElement};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    header: Header,
    value: Field,
}

impl Record {
    pub fn new(header: Header, value: Field) -> Self {
        Self { header, value }
    }

    /// Record with an empty map as root.
    pub fn with_source(stage_creator: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self::new(
            Header::new(stage_creator, source_id),
            Field::map(HashMap::new()),
        )
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn root(&self) -> &Field {
        &self.value
    }

    /// Replaces the root field, returning the previous one.
    pub fn set_root(&mut self, value: Field) -> Field {
        std::mem::replace(&mut self.value, value)
    }

    pub fn into_parts(self) -> (Header, Field) {
        (self.header, self.value)
    }

    /// Field at `path`; missing intermediates yield `None`.
    pub fn get(&self, path: &str) -> Result<Option<&Field>, RecordError> {
        let elements = resolve(path)?;
        let mut current = &self.value;
        for element in &elements[1..] {
            match current.child(element) {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    pub fn get_mut(&mut self, path: &str) -> Result<Option<&mut Field>, RecordError> {
        let elements = resolve(path)?;
        let mut current = &mut self.value;
        for element in &elements[1..] {
            current = match current.child_mut(element) {
                Some(child) => child,
                None => return Ok(None),
            };
        }
        Ok(Some(current))
    }

    pub fn has(&self, path: &str) -> Result<bool, RecordError> {
        Ok(self.get(path)?.is_some())
    }

    /// Sets the field at `path`, returning the replaced field if any.
    ///
    /// Every intermediate must exist. A list step may address one past the
    /// end to append.
    pub fn set(&mut self, path: &str, field: Field) -> Result<Option<Field>, RecordError> {
        self.set_impl(path, field, false)
    }

    /// Like [`Record::set`] but creates missing intermediates: maps for name
    /// steps, lists padded with nulls for index steps.
    pub fn set_creating(&mut self, path: &str, field: Field) -> Result<Option<Field>, RecordError> {
        self.set_impl(path, field, true)
    }

    fn set_impl(&mut self, path: &str, field: Field, create: bool) -> Result<Option<Field>, RecordError> {
        let elements = resolve(path)?;
        let Some((last, parents)) = elements[1..].split_last() else {
            return Ok(Some(self.set_root(field)));
        };

        let mut current = &mut self.value;
        for (i, element) in parents.iter().enumerate() {
            let next = parents.get(i + 1).unwrap_or(last);
            current = descend(current, element, next, create, path)?;
        }
        assign(current, last, field, create, path)
    }

    /// Removes the field at `path`. Deleting the root leaves a null map.
    pub fn delete(&mut self, path: &str) -> Result<Option<Field>, RecordError> {
        let elements = resolve(path)?;
        let Some((last, parents)) = elements[1..].split_last() else {
            return Ok(Some(self.set_root(Field::null(FieldType::Map))));
        };

        let mut current = &mut self.value;
        for element in parents {
            current = match current.child_mut(element) {
                Some(child) => child,
                None => return Ok(None),
            };
        }
        let removed = match (last, current.value_mut()) {
            (PathElement::Map(name), Some(FieldValue::Map(map))) => map.remove(name),
            (PathElement::Map(name), Some(FieldValue::ListMap(map))) => map.shift_remove(name),
            (PathElement::List(idx), Some(FieldValue::List(items))) if *idx < items.len() => {
                Some(items.remove(*idx))
            }
            (PathElement::List(idx), Some(FieldValue::ListMap(map))) => {
                map.shift_remove_index(*idx).map(|(_, v)| v)
            }
            _ => None,
        };
        Ok(removed)
    }

    /// Every addressable path in the record, root included as `/`.
    pub fn field_paths(&self) -> BTreeSet<String> {
        let mut paths = BTreeSet::new();
        paths.insert("/".to_string());
        collect_paths(&self.value, "", &mut paths);
        paths
    }
}

fn resolve(path: &str) -> Result<Vec<PathElement>, RecordError> {
    let elements = parse_field_path(path)?;
    if elements.iter().any(PathElement::is_wildcard) {
        return Err(RecordError::WildcardNotAllowed {
            path: path.to_string(),
        });
    }
    Ok(elements)
}

fn missing_parent(path: &str) -> RecordError {
    RecordError::MissingParent {
        path: path.to_string(),
    }
}

fn invalid_step(path: &str, element: &PathElement, parent: FieldType) -> RecordError {
    let step = match element {
        PathElement::List(idx) => format!("index [{}]", idx),
        PathElement::Map(name) => format!("name '{}'", name),
        other => format!("{:?}", other),
    };
    RecordError::InvalidStep {
        path: path.to_string(),
        reason: format!("cannot apply {} to a {} field", step, parent),
    }
}

fn descend<'a>(
    current: &'a mut Field,
    element: &PathElement,
    next: &PathElement,
    create: bool,
    path: &str,
) -> Result<&'a mut Field, RecordError> {
    if create {
        current.ensure_container();
    }
    let parent_type = current.field_type();
    let container = match next {
        PathElement::List(_) => FieldType::List,
        _ => FieldType::Map,
    };
    match (element, current.value_mut()) {
        (PathElement::Map(name), Some(FieldValue::Map(map))) => {
            if create {
                Ok(map
                    .entry(name.clone())
                    .or_insert_with(|| Field::empty_container(container)))
            } else {
                map.get_mut(name).ok_or_else(|| missing_parent(path))
            }
        }
        (PathElement::Map(name), Some(FieldValue::ListMap(map))) => {
            if create {
                Ok(map
                    .entry(name.clone())
                    .or_insert_with(|| Field::empty_container(container)))
            } else {
                map.get_mut(name).ok_or_else(|| missing_parent(path))
            }
        }
        (PathElement::List(idx), Some(FieldValue::List(items))) => {
            if create && *idx >= items.len() {
                items.resize(*idx + 1, Field::null(container));
            }
            let slot = items.get_mut(*idx).ok_or_else(|| missing_parent(path))?;
            if create && slot.is_null() {
                *slot = Field::empty_container(container);
            }
            Ok(slot)
        }
        (PathElement::List(idx), Some(FieldValue::ListMap(map))) => map
            .get_index_mut(*idx)
            .map(|(_, v)| v)
            .ok_or_else(|| missing_parent(path)),
        (_, None) => Err(missing_parent(path)),
        _ => Err(invalid_step(path, element, parent_type)),
    }
}

fn assign(
    parent: &mut Field,
    last: &PathElement,
    field: Field,
    create: bool,
    path: &str,
) -> Result<Option<Field>, RecordError> {
    if create {
        parent.ensure_container();
    }
    let parent_type = parent.field_type();
    match (last, parent.value_mut()) {
        (PathElement::Map(name), Some(FieldValue::Map(map))) => Ok(map.insert(name.clone(), field)),
        (PathElement::Map(name), Some(FieldValue::ListMap(map))) => {
            Ok(map.insert(name.clone(), field))
        }
        (PathElement::List(idx), Some(FieldValue::List(items))) => {
            let len = items.len();
            if *idx < len {
                Ok(Some(std::mem::replace(&mut items[*idx], field)))
            } else if *idx == len || create {
                items.resize(*idx, Field::null(field.field_type()));
                items.push(field);
                Ok(None)
            } else {
                Err(RecordError::IndexOutOfBounds {
                    path: path.to_string(),
                    index: *idx,
                    len,
                })
            }
        }
        (PathElement::List(idx), Some(FieldValue::ListMap(map))) => {
            let len = map.len();
            match map.get_index_mut(*idx) {
                Some((_, slot)) => Ok(Some(std::mem::replace(slot, field))),
                None => Err(RecordError::IndexOutOfBounds {
                    path: path.to_string(),
                    index: *idx,
                    len,
                }),
            }
        }
        (_, None) => Err(missing_parent(path)),
        _ => Err(invalid_step(path, last, parent_type)),
    }
}

fn collect_paths(field: &Field, prefix: &str, out: &mut BTreeSet<String>) {
    match field.value() {
        Some(FieldValue::List(items)) => {
            for (i, item) in items.iter().enumerate() {
                let path = format!("{}[{}]", prefix, i);
                collect_paths(item, &path, out);
                out.insert(path);
            }
        }
        Some(FieldValue::Map(_)) | Some(FieldValue::ListMap(_)) => {
            for (name, child) in field.entries() {
                let path = format!("{}/{}", prefix, escape_name(name));
                collect_paths(child, &path, out);
                out.insert(path);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        let mut record = Record::with_source("origin", "src::1");
        record.set("/name", Field::string("pump-7")).unwrap();
        record
            .set(
                "/readings",
                Field::list(vec![Field::double(1.5), Field::double(2.5)]),
            )
            .unwrap();
        record
    }

    #[test]
    fn test_get_set_delete() {
        let mut record = sample();
        assert_eq!(record.get("/name").unwrap(), Some(&Field::string("pump-7")));
        assert_eq!(record.get("/readings[1]").unwrap(), Some(&Field::double(2.5)));
        assert_eq!(record.get("/readings[9]").unwrap(), None);
        assert_eq!(record.get("/missing/deeper").unwrap(), None);

        let old = record.set("/readings[0]", Field::double(9.0)).unwrap();
        assert_eq!(old, Some(Field::double(1.5)));

        assert_eq!(record.delete("/name").unwrap(), Some(Field::string("pump-7")));
        assert!(!record.has("/name").unwrap());
        assert_eq!(record.delete("/name").unwrap(), None);
    }

    #[test]
    fn test_set_requires_parent() {
        let mut record = sample();
        let err = record.set("/a/b", Field::long(1)).unwrap_err();
        assert_eq!(err, RecordError::MissingParent { path: "/a/b".into() });
        assert!(matches!(
            record.set("/readings[5]", Field::double(0.0)),
            Err(RecordError::IndexOutOfBounds { index: 5, len: 2, .. })
        ));
        assert!(matches!(
            record.set("/name/x", Field::long(1)),
            Err(RecordError::InvalidStep { .. })
        ));
    }

    #[test]
    fn test_set_creating_builds_intermediates() {
        let mut record = Record::with_source("origin", "s");
        record.set_creating("/a/b[2]/c", Field::long(7)).unwrap();

        let list = record.get("/a/b").unwrap().unwrap();
        assert_eq!(list.field_type(), FieldType::List);
        let items = list.as_list().unwrap();
        assert_eq!(items.len(), 3);
        assert!(items[0].is_null());
        assert_eq!(items[0].field_type(), FieldType::Map);
        assert_eq!(record.get("/a/b[2]/c").unwrap(), Some(&Field::long(7)));

        record.set_creating("/x[1]", Field::string("v")).unwrap();
        let x = record.get("/x").unwrap().unwrap().as_list().unwrap();
        assert_eq!(x[0], Field::null(FieldType::String));
    }

    #[test]
    fn test_wildcards_rejected_for_access() {
        let record = sample();
        assert!(matches!(
            record.get("/readings[*]"),
            Err(RecordError::WildcardNotAllowed { .. })
        ));
        assert!(matches!(record.get("/a[x]"), Err(RecordError::Path(_))));
    }

    #[test]
    fn test_clone_isolation() {
        let original = sample();
        let mut copy = original.clone();
        copy.set("/readings[0]", Field::double(-1.0)).unwrap();
        copy.header_mut().set_attribute("k", "v");

        assert_eq!(original.get("/readings[0]").unwrap(), Some(&Field::double(1.5)));
        assert_eq!(original.header().attribute("k"), None);
    }

    #[test]
    fn test_field_paths() {
        let mut record = sample();
        record.set_creating("/odd/'x y'", Field::long(1)).unwrap();
        record.set_creating("/odd/it's", Field::long(2)).unwrap();
        let paths: Vec<String> = record.field_paths().into_iter().collect();
        assert_eq!(
            paths,
            vec![
                "/",
                "/name",
                "/odd",
                "/odd/'it\\'s'",
                "/odd/x y",
                "/readings",
                "/readings[0]",
                "/readings[1]",
            ]
        );
    }

    #[test]
    fn test_root_access() {
        let mut record = sample();
        assert_eq!(record.get("/").unwrap().unwrap().field_type(), FieldType::Map);
        assert_eq!(record.get("").unwrap().unwrap().field_type(), FieldType::Map);
        let old = record.delete("/").unwrap().unwrap();
        assert_eq!(old.entries().len(), 2);
        assert!(record.root().is_null());
    }
}
