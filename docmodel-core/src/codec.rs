//! Conversion between reflected values and document [`Value`] trees.
//!
//! Encoding walks a value through its [`Reflect`] view and produces a [`Value`]. Records are
//! encoded field by field through the [`FieldCache`]; reference fields are collapsed to the
//! identifiers of the models they hold.
//!
//! Decoding populates a caller-supplied value in place. It is closed: every key of a
//! document body must be claimed by a field of the target record.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::{
    backend::RawDocument,
    error::{DocumentStoreError, DocumentStoreResult},
    fields::{Field, FieldCache},
    model::Model,
    reflect::{self, Reflect, ReflectMut, ReflectRef},
    value::{Map, Value},
};

/// Encodes and decodes values using a shared field directory cache.
#[derive(Debug, Clone)]
pub struct Codec {
    fields: Arc<FieldCache>,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(FieldCache::global())
    }
}

impl Codec {
    pub fn new(fields: Arc<FieldCache>) -> Self {
        Self { fields }
    }

    /// The field directory cache this codec resolves records through.
    pub fn field_cache(&self) -> &Arc<FieldCache> {
        &self.fields
    }

    /// Encodes a model into a document body.
    pub fn encode_model<M: Model>(&self, model: &M) -> DocumentStoreResult<Map> {
        self.fields.fields(M::shape())?;

        match self.encode(model)? {
            Value::Map(map) => Ok(map),
            other => Err(DocumentStoreError::InvalidDocument(format!(
                "model {} encoded to {}",
                M::shape().type_name,
                other.kind_name()
            ))),
        }
    }

    /// Encodes any reflected value.
    pub fn encode(&self, value: &dyn Reflect) -> DocumentStoreResult<Value> {
        Ok(match value.reflect() {
            ReflectRef::Bool(b) => Value::Bool(b),
            ReflectRef::Int(i) => Value::Integer(i),
            ReflectRef::Uint(u) => Value::Integer(
                i64::try_from(u).map_err(|_| DocumentStoreError::overflow(u, "i64"))?,
            ),
            ReflectRef::Float(_) => {
                return Err(DocumentStoreError::Unimplemented("float serialization".into()));
            }
            ReflectRef::String(s) => Value::String(s.to_string()),
            ReflectRef::Bytes(b) => Value::Bytes(b.to_vec()),
            ReflectRef::Timestamp(t) => Value::Timestamp(*t),
            ReflectRef::Dynamic(v) => v.clone(),
            ReflectRef::Optional(None) => Value::Null,
            ReflectRef::Optional(Some(inner)) => self.encode(inner)?,
            ReflectRef::List(list) => Value::Array(
                (0..list.len())
                    .filter_map(|i| list.get(i))
                    .map(|item| self.encode(item))
                    .collect::<DocumentStoreResult<Vec<_>>>()?,
            ),
            ReflectRef::Map(_) => {
                return Err(DocumentStoreError::Unimplemented(format!(
                    "map serialization of {}",
                    value.dyn_shape().type_name
                )));
            }
            ReflectRef::Struct(_) => Value::Map(self.encode_struct(value)?),
        })
    }

    fn encode_struct(&self, value: &dyn Reflect) -> DocumentStoreResult<Map> {
        let fields = self.fields.fields(value.dyn_shape())?;
        let mut map = Map::new();

        for field in fields.iter() {
            let Some(slot) = reflect::member(value, &field.index)? else {
                continue;
            };

            if field.options.server_timestamp && is_unset_timestamp(slot) {
                map.insert(field.name.clone(), Value::ServerTimestamp);
                continue;
            }
            if field.options.omit_empty && is_empty(slot) {
                continue;
            }

            let encoded = if field.reference().is_some() {
                encode_reference(field, slot)?
            } else {
                self.encode(slot)?
            };
            map.insert(field.name.clone(), encoded);
        }

        Ok(map)
    }

    /// Populates `target` from `value`.
    pub fn decode(&self, target: &mut dyn Reflect, value: &Value) -> DocumentStoreResult<()> {
        let shape = target.dyn_shape();

        if matches!(value, Value::ServerTimestamp) {
            return Err(DocumentStoreError::mismatch(shape.type_name, value.kind_name()));
        }

        match (target.reflect_mut(), value) {
            (ReflectMut::Optional(optional), Value::Null) => optional.clear(),
            (ReflectMut::List(list), Value::Null) => list.clear(),
            (ReflectMut::Map(map), Value::Null) => map.clear(),
            (ReflectMut::Dynamic(slot), v) => *slot = v.clone(),
            (ReflectMut::Optional(optional), v) => self.decode(optional.get_or_insert_default(), v)?,
            (ReflectMut::Bool(slot), Value::Bool(b)) => *slot = *b,
            (ReflectMut::Int(slot), Value::Integer(i)) => slot.set_i64(*i)?,
            (ReflectMut::Float, _) => {
                return Err(DocumentStoreError::Unimplemented("float deserialization".into()));
            }
            (ReflectMut::String(slot), Value::String(s)) => s.clone_into(slot),
            (ReflectMut::Bytes(slot), Value::Bytes(b)) => b.clone_into(slot),
            (ReflectMut::Timestamp(slot), Value::Timestamp(t)) => *slot = *t,
            (ReflectMut::List(list), Value::Array(items)) => {
                list.resize_default(items.len());
                for (i, item) in items.iter().enumerate() {
                    if let Some(element) = list.get_mut(i) {
                        self.decode(element, item)?;
                    }
                }
            }
            (ReflectMut::Map(_), _) => {
                return Err(DocumentStoreError::Unimplemented(format!(
                    "map deserialization into {}",
                    shape.type_name
                )));
            }
            (ReflectMut::Struct(_), Value::Map(map)) => self.decode_struct(target, map)?,
            (_, v) => return Err(DocumentStoreError::mismatch(shape.type_name, v.kind_name())),
        }

        Ok(())
    }

    fn decode_struct(&self, target: &mut dyn Reflect, map: &Map) -> DocumentStoreResult<()> {
        let shape = target.dyn_shape();
        let fields = self.fields.fields(shape)?;

        for (key, value) in map {
            let field = fields
                .get(key)
                .ok_or_else(|| DocumentStoreError::UnmatchedField {
                    field: key.clone(),
                    type_name: shape.type_name.to_string(),
                })?;
            let slot = reflect::member_mut(target, &field.index)?;

            if field.reference().is_some() {
                decode_reference(field, slot, value)?;
            } else {
                self.decode(slot, value)?;
            }
        }

        Ok(())
    }

    /// Populates a record from a raw document, then copies the envelope identifier and
    /// timestamps into its model metadata, if it has any.
    pub fn decode_document(&self, target: &mut dyn Reflect, document: &RawDocument) -> DocumentStoreResult<()> {
        if !document.exists {
            return Err(DocumentStoreError::DocumentNotFound(
                document.path.id.clone(),
                document.path.collection.clone(),
            ));
        }

        self.decode_struct(target, &document.data)?;

        if let ReflectMut::Struct(record) = target.reflect_mut()
            && let Some(meta) = record.model_meta_mut()
        {
            apply_envelope(meta, document);
        }

        Ok(())
    }

    /// Populates a model from a raw document; see [`decode_document`](Self::decode_document).
    pub fn decode_model<M: Model>(&self, model: &mut M, document: &RawDocument) -> DocumentStoreResult<()> {
        self.decode_document(model, document)?;
        apply_envelope(model.meta_mut(), document);

        Ok(())
    }
}

fn apply_envelope(meta: &mut crate::model::ModelMeta, document: &RawDocument) {
    meta.id.clone_from(&document.path.id);
    if let Some(create_time) = document.create_time {
        meta.create_time = create_time;
    }
    if let Some(update_time) = document.update_time {
        meta.update_time = update_time;
    }
}

fn is_unset_timestamp(value: &dyn Reflect) -> bool {
    match value.reflect() {
        ReflectRef::Timestamp(t) => *t == DateTime::<Utc>::default(),
        ReflectRef::Optional(None) => true,
        ReflectRef::Optional(Some(inner)) => is_unset_timestamp(inner),
        _ => false,
    }
}

fn is_empty(value: &dyn Reflect) -> bool {
    match value.reflect() {
        ReflectRef::Bool(b) => !b,
        ReflectRef::Int(i) => i == 0,
        ReflectRef::Uint(u) => u == 0,
        ReflectRef::Float(f) => f == 0.0,
        ReflectRef::String(s) => s.is_empty(),
        ReflectRef::Bytes(b) => b.is_empty(),
        ReflectRef::Timestamp(t) => *t == DateTime::<Utc>::default(),
        ReflectRef::Dynamic(v) => v.is_null(),
        ReflectRef::Optional(inner) => inner.is_none(),
        ReflectRef::List(list) => list.is_empty(),
        ReflectRef::Map(map) => map.is_empty(),
        ReflectRef::Struct(_) => false,
    }
}

fn encode_reference(field: &Field, value: &dyn Reflect) -> DocumentStoreResult<Value> {
    match value.reflect() {
        ReflectRef::List(list) => Ok(Value::Array(
            (0..list.len())
                .filter_map(|i| list.get(i))
                .map(|item| foreign_key(field, item))
                .collect::<DocumentStoreResult<Vec<_>>>()?,
        )),
        ReflectRef::Map(map) => Ok(Value::Map(
            map.entries()
                .into_iter()
                .map(|(k, v)| foreign_key(field, v).map(|id| (k.to_string(), id)))
                .collect::<DocumentStoreResult<Map>>()?,
        )),
        _ => foreign_key(field, value),
    }
}

fn foreign_key(field: &Field, value: &dyn Reflect) -> DocumentStoreResult<Value> {
    match value.reflect() {
        ReflectRef::Optional(None) => Ok(Value::Null),
        ReflectRef::Optional(Some(inner)) => foreign_key(field, inner),
        ReflectRef::Struct(record) => match record.model_meta() {
            Some(meta) if meta.id.is_empty() => Err(DocumentStoreError::InvalidReference(format!(
                "cannot convert {} to foreign key with empty ID (field {:?})",
                value.dyn_shape().type_name,
                field.name
            ))),
            Some(meta) => Ok(Value::String(meta.id.clone())),
            None => Err(non_model_reference(field, value)),
        },
        _ => Err(non_model_reference(field, value)),
    }
}

fn non_model_reference(field: &Field, value: &dyn Reflect) -> DocumentStoreError {
    DocumentStoreError::InvalidReference(format!(
        "cannot use non-model type {} as foreign key reference (field {:?})",
        value.dyn_shape().type_name,
        field.name
    ))
}

fn decode_reference(field: &Field, slot: &mut dyn Reflect, value: &Value) -> DocumentStoreResult<()> {
    let type_name = slot.dyn_shape().type_name;

    match (slot.reflect_mut(), value) {
        (ReflectMut::Optional(optional), Value::Null) => optional.clear(),
        (ReflectMut::List(list), Value::Null) => list.clear(),
        (ReflectMut::Map(map), Value::Null) => map.clear(),
        (ReflectMut::List(list), Value::Array(ids)) => {
            list.resize_default(ids.len());
            for (i, id) in ids.iter().enumerate() {
                if let Some(element) = list.get_mut(i) {
                    decode_reference(field, element, id)?;
                }
            }
        }
        (ReflectMut::Map(map), Value::Map(ids)) => {
            map.clear();
            for (key, id) in ids {
                decode_reference(field, map.insert_default(key.clone()), id)?;
            }
        }
        (ReflectMut::Optional(optional), Value::String(id)) if id.is_empty() => optional.clear(),
        (ReflectMut::Optional(optional), Value::String(id)) => {
            optional.clear();
            decode_reference(field, optional.get_or_insert_default(), value)
                .map_err(|_| DocumentStoreError::InvalidReference(format!(
                    "cannot place foreign key {id:?} into {type_name}"
                )))?;
        }
        (ReflectMut::Struct(record), Value::String(id)) => match record.model_meta_mut() {
            Some(meta) => id.clone_into(&mut meta.id),
            None => {
                return Err(DocumentStoreError::InvalidReference(format!(
                    "missing model metadata on foreign key target {type_name}"
                )));
            }
        },
        (_, other) => {
            return Err(DocumentStoreError::InvalidReference(format!(
                "cannot use {} value as foreign key for field {:?}",
                other.kind_name(),
                field.name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Model, Record,
        backend::DocumentPath,
        model::ModelMeta,
        value::Blob,
    };
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    #[derive(Debug, Default, Clone, PartialEq, Model)]
    pub struct User {
        #[docmodel(embed)]
        pub meta: ModelMeta,
        pub name: String,
    }

    #[derive(Debug, Default, Clone, PartialEq, Model)]
    pub struct Post {
        #[docmodel(embed)]
        pub meta: ModelMeta,
        #[docmodel(tag = "body")]
        pub body: String,
        #[docmodel(tag = "author,ref:users")]
        pub author: Option<Box<User>>,
        #[docmodel(tag = "readers,ref:users,omitempty")]
        pub readers: Vec<Option<User>>,
        #[docmodel(tag = "by_role,ref:users,omitempty")]
        pub by_role: BTreeMap<String, User>,
    }

    #[derive(Debug, Default, Record)]
    pub struct Scalars {
        pub flag: bool,
        pub small: i8,
        pub count: u32,
        pub big: u64,
        pub text: String,
        pub raw: Blob,
        pub tags: Vec<String>,
        pub maybe: Option<i64>,
        pub extra: Value,
    }

    #[derive(Debug, Default, Record)]
    pub struct Sparse {
        #[docmodel(tag = "note,omitempty")]
        pub note: String,
        #[docmodel(tag = "count,omitempty")]
        pub count: i32,
        #[docmodel(tag = "at,serverTimestamp")]
        pub at: DateTime<Utc>,
    }

    #[derive(Debug, Default, Record)]
    pub struct WithFloat {
        pub ratio: f64,
    }

    #[derive(Debug, Default, Record)]
    pub struct WithMap {
        pub lookup: BTreeMap<String, String>,
    }

    #[derive(Debug, Default, Record)]
    pub struct Small {
        pub value: i8,
    }

    fn codec() -> Codec {
        Codec::new(Arc::new(FieldCache::new()))
    }

    fn map(entries: Vec<(&str, Value)>) -> Value {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    fn user(id: &str, name: &str) -> User {
        User { meta: ModelMeta::with_id(id), name: name.to_string() }
    }

    #[test]
    fn scalars_round_trip() {
        let codec = codec();
        let value = Scalars {
            flag: true,
            small: -4,
            count: 9,
            big: 77,
            text: "hello".into(),
            raw: Blob(vec![0, 1]),
            tags: vec!["a".into(), "b".into()],
            maybe: None,
            extra: Value::from("free"),
        };

        let encoded = codec.encode(&value).unwrap();
        assert_eq!(
            encoded,
            map(vec![
                ("flag", Value::Bool(true)),
                ("small", Value::Integer(-4)),
                ("count", Value::Integer(9)),
                ("big", Value::Integer(77)),
                ("text", Value::from("hello")),
                ("raw", Value::Bytes(vec![0, 1])),
                ("tags", Value::from(vec!["a", "b"])),
                ("maybe", Value::Null),
                ("extra", Value::from("free")),
            ])
        );

        let mut decoded = Scalars::default();
        codec.decode(&mut decoded, &encoded).unwrap();
        assert_eq!(decoded.small, -4);
        assert_eq!(decoded.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(decoded.raw, Blob(vec![0, 1]));
        assert_eq!(decoded.extra, Value::from("free"));
        assert!(decoded.maybe.is_none());
    }

    #[test]
    fn unsigned_overflow_on_encode() {
        let value = Scalars { big: u64::MAX, ..Default::default() };
        assert!(matches!(
            codec().encode(&value),
            Err(DocumentStoreError::Overflow { .. })
        ));
    }

    #[test]
    fn narrowing_overflow_on_decode() {
        let codec = codec();
        let mut target = Small::default();

        let result = codec.decode(&mut target, &map(vec![("value", Value::Integer(300))]));
        assert!(matches!(result, Err(DocumentStoreError::Overflow { .. })));

        codec
            .decode(&mut target, &map(vec![("value", Value::Integer(120))]))
            .unwrap();
        assert_eq!(target.value, 120);
    }

    #[test]
    fn unmatched_key_is_rejected() {
        let mut target = Small::default();
        let result = codec().decode(&mut target, &map(vec![("unexpected_field", Value::Integer(1))]));

        assert!(matches!(
            result,
            Err(DocumentStoreError::UnmatchedField { field, .. }) if field == "unexpected_field"
        ));
    }

    #[test]
    fn null_into_scalar_is_rejected() {
        let mut target = Small::default();
        let result = codec().decode(&mut target, &map(vec![("value", Value::Null)]));

        assert!(matches!(result, Err(DocumentStoreError::TypeMismatch { .. })));
    }

    #[test]
    fn null_clears_nillable_targets() {
        let codec = codec();
        let mut target = Scalars { maybe: Some(3), tags: vec!["x".into()], ..Default::default() };

        codec
            .decode(&mut target, &map(vec![("maybe", Value::Null), ("tags", Value::Null)]))
            .unwrap();

        assert!(target.maybe.is_none());
        assert!(target.tags.is_empty());
    }

    #[test]
    fn floats_and_maps_are_unimplemented() {
        let codec = codec();

        assert!(matches!(
            codec.encode(&WithFloat { ratio: 0.5 }),
            Err(DocumentStoreError::Unimplemented(_))
        ));
        assert!(matches!(
            codec.decode(&mut WithFloat::default(), &map(vec![("ratio", Value::Double(0.5))])),
            Err(DocumentStoreError::Unimplemented(_))
        ));
        assert!(matches!(
            codec.encode(&WithMap::default()),
            Err(DocumentStoreError::Unimplemented(_))
        ));
        assert!(matches!(
            codec.decode(&mut WithMap::default(), &map(vec![("lookup", map(vec![]))])),
            Err(DocumentStoreError::Unimplemented(_))
        ));
    }

    #[test]
    fn omit_empty_and_server_timestamp() {
        let codec = codec();

        let encoded = codec.encode(&Sparse::default()).unwrap();
        assert_eq!(encoded, map(vec![("at", Value::ServerTimestamp)]));

        let at = Utc.with_ymd_and_hms(2022, 3, 1, 12, 0, 0).unwrap();
        let encoded = codec
            .encode(&Sparse { note: "n".into(), count: 2, at })
            .unwrap();
        assert_eq!(
            encoded,
            map(vec![
                ("note", Value::from("n")),
                ("count", Value::Integer(2)),
                ("at", Value::Timestamp(at)),
            ])
        );
    }

    #[test]
    fn references_encode_to_identifiers() {
        let post = Post {
            meta: ModelMeta::with_id("p1"),
            body: "hi".into(),
            author: Some(Box::new(user("u1", "Dave"))),
            readers: vec![Some(user("u2", "Erin")), None],
            by_role: BTreeMap::from([("editor".to_string(), user("u3", "Fay"))]),
        };

        let body = codec().encode_model(&post).unwrap();

        assert_eq!(body["author"], Value::from("u1"));
        assert_eq!(body["readers"], Value::Array(vec![Value::from("u2"), Value::Null]));
        assert_eq!(body["by_role"], map(vec![("editor", Value::from("u3"))]));
        assert_eq!(body["id"], Value::from("p1"));
        assert_eq!(body["body"], Value::from("hi"));
    }

    #[test]
    fn nil_reference_encodes_to_null() {
        let body = codec().encode_model(&Post::default()).unwrap();

        assert_eq!(body["author"], Value::Null);
        assert!(!body.contains_key("readers"));
        assert!(!body.contains_key("by_role"));
    }

    #[test]
    fn empty_reference_id_is_rejected() {
        let post = Post { author: Some(Box::new(User::default())), ..Default::default() };

        match codec().encode_model(&post) {
            Err(DocumentStoreError::InvalidReference(message)) => {
                assert!(message.contains("foreign key with empty ID"))
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn references_decode_to_placeholders() {
        let mut post = Post::default();
        let body = map(vec![
            ("body", Value::from("hi")),
            ("author", Value::from("u1")),
            ("readers", Value::Array(vec![Value::from("u2"), Value::Null])),
            ("by_role", map(vec![("editor", Value::from("u3"))])),
        ]);

        codec().decode(&mut post, &body).unwrap();

        assert_eq!(post.author.as_ref().unwrap().meta.id, "u1");
        assert_eq!(post.author.as_ref().unwrap().name, "");
        assert_eq!(post.readers.len(), 2);
        assert_eq!(post.readers[0].as_ref().unwrap().meta.id, "u2");
        assert!(post.readers[1].is_none());
        assert_eq!(post.by_role["editor"].meta.id, "u3");
    }

    #[test]
    fn reference_rejects_other_shapes() {
        let mut post = Post::default();
        let result = codec().decode(&mut post, &map(vec![("author", Value::Integer(5))]));

        assert!(matches!(result, Err(DocumentStoreError::InvalidReference(_))));
    }

    #[test]
    fn envelope_overrides_body_metadata() {
        let codec = codec();
        let created = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        let updated = Utc.with_ymd_and_hms(2022, 1, 2, 0, 0, 0).unwrap();
        let document = RawDocument {
            path: DocumentPath::new("users", "u1"),
            data: Map::from([
                ("id".to_string(), Value::from("")),
                ("name".to_string(), Value::from("Dave")),
            ]),
            create_time: Some(created),
            update_time: Some(updated),
            exists: true,
        };

        let mut user = User::default();
        codec.decode_model(&mut user, &document).unwrap();

        assert_eq!(user.meta.id, "u1");
        assert_eq!(user.meta.create_time, created);
        assert_eq!(user.meta.update_time, updated);
        assert_eq!(user.name, "Dave");
    }

    #[test]
    fn missing_document_is_not_found() {
        let document = RawDocument::missing(DocumentPath::new("users", "ghost"));
        let result = codec().decode_model(&mut User::default(), &document);

        assert!(result.unwrap_err().is_not_found());
    }

    #[test]
    fn model_round_trip_collapses_references() {
        let codec = codec();
        let post = Post {
            meta: ModelMeta::with_id("p1"),
            body: "hi".into(),
            author: Some(Box::new(user("u1", "Dave"))),
            ..Default::default()
        };

        let document = RawDocument {
            path: DocumentPath::new("posts", "p1"),
            data: codec.encode_model(&post).unwrap(),
            create_time: None,
            update_time: None,
            exists: true,
        };
        let mut decoded = Post::default();
        codec.decode_model(&mut decoded, &document).unwrap();

        assert_eq!(decoded.body, post.body);
        assert_eq!(decoded.meta.id, "p1");
        assert_eq!(*decoded.author.unwrap(), User { meta: ModelMeta::with_id("u1"), name: String::new() });
    }
}
