//! The field directory: which members of a record are persisted, and under what names.
//!
//! A record's persisted fields are found by a breadth-first walk over its members and the
//! members of its embedded records, one embedding depth at a time:
//!
//! - members that are not `pub` are skipped, but a non-`pub` embedded record is still
//!   walked so its own `pub` members are promoted;
//! - a member tagged `-` is dropped;
//! - timestamps and byte sequences are leaves and are never walked into;
//! - an embedded, untagged record (or optional record) is queued for the next depth, any
//!   other member is recorded as a field.
//!
//! When one name is reachable at the shallowest depth through two different embedded
//! records, every occurrence is dropped. Two members of one record that resolve to the
//! same name are a [`DuplicateField`](DocumentStoreError::DuplicateField) error.
//!
//! Directories are computed once per type and kept in a [`FieldCache`], including the
//! error when a type is declared in a way the mapper cannot support.

use dashmap::DashMap;
use std::{
    any::TypeId,
    collections::{HashMap, HashSet},
    sync::{Arc, LazyLock},
};
use tracing::{debug, trace};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    reflect::{Member, Shape, ShapeKind},
};

static GLOBAL: LazyLock<Arc<FieldCache>> = LazyLock::new(|| Arc::new(FieldCache::new()));

/// Options parsed from a member's tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagOptions {
    /// Skip the field when its value is empty.
    pub omit_empty: bool,
    /// Write the store's timestamp when the value is unset.
    pub server_timestamp: bool,
    /// The collection a reference field points into.
    pub reference: Option<String>,
}

/// A persisted field of a record.
#[derive(Debug, Clone)]
pub struct Field {
    /// Effective name in the document body.
    pub name: String,
    /// Whether [`name`](Self::name) came from a tag rather than the member name.
    pub name_from_tag: bool,
    /// Member positions leading from the record to this field, through embedded members.
    pub index: Vec<usize>,
    /// The member's type.
    pub shape: Shape,
    pub options: TagOptions,
}

impl Field {
    /// The referenced collection, if this is a reference field.
    pub fn reference(&self) -> Option<&str> {
        self.options.reference.as_deref()
    }

    fn depth(&self) -> usize {
        self.index.len()
    }

    fn parent(&self) -> &[usize] {
        &self.index[..self.index.len() - 1]
    }
}

/// The resolved, ordered fields of one record type.
#[derive(Debug)]
pub struct FieldList {
    fields: Vec<Field>,
    by_name: HashMap<String, usize>,
}

impl FieldList {
    fn new(fields: Vec<Field>) -> Self {
        let by_name = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();

        Self { fields, by_name }
    }

    /// Looks a field up by effective name.
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.by_name
            .get(name)
            .map(|&i| &self.fields[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// Only the reference fields.
    pub fn references(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(|f| f.options.reference.is_some())
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields
            .iter()
            .map(|f| f.name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Per-type cache of field directories.
///
/// Lookups for unrelated types never contend on a shared lock, and no lock is held while a
/// directory is computed; two threads racing on a new type may both compute it, and the
/// first stored result wins.
#[derive(Debug, Default)]
pub struct FieldCache {
    cache: DashMap<TypeId, Result<Arc<FieldList>, DocumentStoreError>>,
}

impl FieldCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache, created on first use and never torn down.
    pub fn global() -> Arc<FieldCache> {
        GLOBAL.clone()
    }

    /// Returns the field directory of `shape`, computing and caching it on first use.
    ///
    /// Optional wrappers are looked through. Non-record shapes fail with
    /// [`DocumentStoreError::NotStructured`].
    pub fn fields(&self, shape: Shape) -> DocumentStoreResult<Arc<FieldList>> {
        let shape = shape.unwrap_optional();

        if !shape.is_struct() {
            return Err(DocumentStoreError::NotStructured(shape.type_name.to_string()));
        }

        if let Some(cached) = self.cache.get(&shape.type_id) {
            return cached.value().clone();
        }

        let computed = type_fields(shape).map(|fields| Arc::new(FieldList::new(fields)));

        match &computed {
            Ok(fields) => debug!(
                target: "docmodel::fields",
                type_name = shape.type_name,
                fields = ?fields.names(),
                "Resolved field directory"
            ),
            Err(e) => debug!(
                target: "docmodel::fields",
                type_name = shape.type_name,
                error = %e,
                "Field directory rejected"
            ),
        }

        self.cache
            .entry(shape.type_id)
            .or_insert(computed)
            .value()
            .clone()
    }

    /// Number of cached types.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Parses a member tag. Returns `None` when the member is excluded with `-`.
pub fn parse_tag(member: &str, tag: Option<&str>) -> DocumentStoreResult<Option<(String, TagOptions)>> {
    let Some(tag) = tag else {
        return Ok(Some((String::new(), TagOptions::default())));
    };

    let mut parts = tag.split(',');
    let name = parts.next().unwrap_or_default();
    let rest = parts.collect::<Vec<_>>();

    if name == "-" {
        if !rest.is_empty() {
            return Err(invalid_tag(member, "\"-\" field tag with options"));
        }
        return Ok(None);
    }

    let mut options = TagOptions::default();

    for option in rest {
        if let Some(collection) = option.strip_prefix("ref:") {
            options.reference = Some(collection.to_string());
            continue;
        }
        match option {
            "omitempty" => options.omit_empty = true,
            "serverTimestamp" => options.server_timestamp = true,
            other => return Err(invalid_tag(member, format!("unknown tag option: {other:?}"))),
        }
    }

    Ok(Some((name.to_string(), options)))
}

fn invalid_tag(member: &str, reason: impl Into<String>) -> DocumentStoreError {
    DocumentStoreError::InvalidTag {
        member: member.to_string(),
        reason: reason.into(),
    }
}

struct Scan {
    shape: Shape,
    index: Vec<usize>,
}

struct Candidate {
    field: Field,
    ambiguous: bool,
}

fn type_fields(shape: Shape) -> DocumentStoreResult<Vec<Field>> {
    let candidates = list_fields(shape)?;
    let mut fields = resolve(shape, candidates)?;

    for field in &fields {
        validate(shape, field)?;
    }

    fields.sort_by(|a, b| a.index.cmp(&b.index));
    Ok(fields)
}

fn members_of(shape: Shape) -> Vec<Member> {
    match shape.kind {
        ShapeKind::Struct { members, .. } => members(),
        _ => Vec::new(),
    }
}

fn list_fields(root: Shape) -> DocumentStoreResult<Vec<Candidate>> {
    let mut candidates = Vec::new();
    let mut next = vec![Scan { shape: root, index: Vec::new() }];
    let mut next_count: HashMap<TypeId, usize> = HashMap::new();
    let mut visited = HashSet::new();

    while !next.is_empty() {
        let current = std::mem::take(&mut next);
        let count = std::mem::take(&mut next_count);

        for scan in current {
            // A type seen at a shallower depth shadows this occurrence entirely.
            if !visited.insert(scan.shape.type_id) {
                continue;
            }
            let ambiguous = count
                .get(&scan.shape.type_id)
                .is_some_and(|&n| n > 1);

            for (position, member) in members_of(scan.shape)
                .into_iter()
                .enumerate()
            {
                if !member.exported && !member.embedded {
                    continue;
                }

                let Some((tag_name, options)) = parse_tag(member.name, member.tag)? else {
                    continue;
                };
                let member_shape = (member.shape)();
                let mut index = scan.index.clone();
                index.push(position);

                let embedded_struct = member.embedded
                    && !member_shape.is_leaf()
                    && member_shape
                        .unwrap_optional()
                        .is_struct();

                if member_shape.is_leaf() || !tag_name.is_empty() || !embedded_struct {
                    if !member.exported {
                        continue;
                    }
                    trace!(
                        target: "docmodel::fields",
                        record = scan.shape.type_name,
                        member = member.name,
                        depth = scan.index.len(),
                        "Recording member"
                    );
                    candidates.push(Candidate {
                        field: Field {
                            name: if tag_name.is_empty() { member.name.to_string() } else { tag_name.clone() },
                            name_from_tag: !tag_name.is_empty(),
                            index,
                            shape: member_shape,
                            options,
                        },
                        ambiguous,
                    });
                    continue;
                }

                let embedded = member_shape.unwrap_optional();
                let seen = next_count
                    .entry(embedded.type_id)
                    .or_insert(0);
                *seen += if ambiguous { 2 } else { 1 };
                if *seen > 1 && next.iter().any(|s| s.shape.type_id == embedded.type_id) {
                    continue;
                }
                next.push(Scan { shape: embedded, index });
            }
        }
    }

    Ok(candidates)
}

fn resolve(root: Shape, candidates: Vec<Candidate>) -> DocumentStoreResult<Vec<Field>> {
    let mut groups: HashMap<String, Vec<Candidate>> = HashMap::new();
    for candidate in candidates {
        groups
            .entry(candidate.field.name.clone())
            .or_default()
            .push(candidate);
    }

    let mut fields = Vec::new();

    for (name, group) in groups {
        let Some(depth) = group
            .iter()
            .map(|c| c.field.depth())
            .min()
        else {
            continue;
        };
        let mut dominant = group
            .into_iter()
            .filter(|c| c.field.depth() == depth)
            .collect::<Vec<_>>();

        if dominant.len() == 1 {
            let candidate = dominant.remove(0);
            if candidate.ambiguous {
                trace!(target: "docmodel::fields", record = root.type_name, field = %name, "Dropping ambiguous field");
            } else {
                fields.push(candidate.field);
            }
            continue;
        }

        let shares_parent = dominant
            .iter()
            .enumerate()
            .any(|(i, a)| {
                dominant[i + 1..]
                    .iter()
                    .any(|b| a.field.parent() == b.field.parent())
            });

        if depth == 1 || shares_parent {
            return Err(DocumentStoreError::DuplicateField {
                name,
                type_name: root.type_name.to_string(),
            });
        }

        trace!(target: "docmodel::fields", record = root.type_name, field = %name, depth, "Embedded fields annihilate");
    }

    Ok(fields)
}

fn validate(root: Shape, field: &Field) -> DocumentStoreResult<()> {
    if field.options.server_timestamp
        && !matches!(field.shape.unwrap_optional().kind, ShapeKind::Timestamp)
    {
        return Err(invalid_tag(
            &field.name,
            format!("serverTimestamp on non-timestamp type {}", field.shape.type_name),
        ));
    }

    if let Some(collection) = &field.options.reference {
        if collection.is_empty() {
            return Err(invalid_tag(&field.name, "ref option without a collection"));
        }

        let target = match (field.shape.kind, field.shape.unwrap_optional().kind) {
            (ShapeKind::List(elem) | ShapeKind::Map(elem), _) => elem().unwrap_optional(),
            (ShapeKind::Optional(_), ShapeKind::List(_) | ShapeKind::Map(_)) => {
                return Err(DocumentStoreError::InvalidReference(format!(
                    "field {:?} of {} wraps a reference collection in Option; use {} directly",
                    field.name,
                    root.type_name,
                    field.shape.unwrap_optional().type_name
                )));
            }
            _ => field.shape.unwrap_optional(),
        };

        if !target.is_model() {
            return Err(DocumentStoreError::InvalidReference(format!(
                "field {:?} of {} references non-model type {}",
                field.name, root.type_name, target.type_name
            )));
        }
    }

    Ok(())
}
