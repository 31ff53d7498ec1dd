//! Compile-time shape descriptors and runtime views over mapped values.
//!
//! Every type that can appear in a model implements [`Reflect`]. The static side is a
//! [`Shape`], which describes what a type looks like (a scalar kind, a wrapper around another
//! shape, or a record with an ordered list of [`Member`]s). The dynamic side is a pair of
//! views, [`ReflectRef`] and [`ReflectMut`], which the codec and the expansion engine walk
//! without knowing the concrete type.
//!
//! Record types get their implementation from `#[derive(Record)]` or `#[derive(Model)]`.
//! Implementations for scalars, `Option`, `Box`, `Vec` and string-keyed maps live here.
//!
//! Nested shapes are stored as `fn() -> Shape` so self-referential types such as
//! `struct Node { next: Option<Box<Node>> }` have a finite descriptor.

use chrono::{DateTime, Utc};
use std::{
    any::{TypeId, type_name},
    collections::{BTreeMap, HashMap},
    fmt,
};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    model::ModelMeta,
    value::{Blob, Value},
};

/// A type whose values can be inspected and populated by the mapper.
///
/// The trait is object safe; the codec works on `&dyn Reflect` and `&mut dyn Reflect`.
pub trait Reflect: Send + Sync + 'static {
    /// The static descriptor of this type.
    fn shape() -> Shape
    where
        Self: Sized;

    /// The descriptor of the concrete type behind a trait object.
    fn dyn_shape(&self) -> Shape;

    /// A read-only view of this value.
    fn reflect(&self) -> ReflectRef<'_>;

    /// A mutable view of this value.
    fn reflect_mut(&mut self) -> ReflectMut<'_>;
}

/// Static description of a reflected type.
#[derive(Clone, Copy)]
pub struct Shape {
    /// The Rust type name, for diagnostics.
    pub type_name: &'static str,
    /// Identity of the type, used as the field directory cache key.
    pub type_id: TypeId,
    /// What the type looks like.
    pub kind: ShapeKind,
}

impl Shape {
    /// Builds the shape of `T` with the given kind.
    pub fn of<T: 'static>(kind: ShapeKind) -> Self {
        Shape {
            type_name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            kind,
        }
    }

    /// Strips `Option` layers. `Box` is already transparent.
    pub fn unwrap_optional(self) -> Shape {
        match self.kind {
            ShapeKind::Optional(inner) => inner().unwrap_optional(),
            _ => self,
        }
    }

    /// Returns `true` if values of this shape are stored as a single opaque scalar and
    /// never descended into.
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, ShapeKind::Timestamp | ShapeKind::Bytes)
    }

    /// Returns `true` for record shapes.
    pub fn is_struct(&self) -> bool {
        matches!(self.kind, ShapeKind::Struct { .. })
    }

    /// Returns `true` for record shapes that carry model metadata.
    pub fn is_model(&self) -> bool {
        matches!(self.kind, ShapeKind::Struct { is_model: true, .. })
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shape")
            .field("type_name", &self.type_name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl PartialEq for Shape {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for Shape {}

/// The structural category of a [`Shape`].
#[derive(Clone, Copy)]
pub enum ShapeKind {
    Bool,
    Int,
    Uint,
    Float,
    String,
    /// An opaque byte sequence ([`Blob`]).
    Bytes,
    Timestamp,
    /// An untyped [`Value`] tree.
    Dynamic,
    /// A nillable wrapper around another shape.
    Optional(fn() -> Shape),
    /// An ordered list of elements.
    List(fn() -> Shape),
    /// A string-keyed map.
    Map(fn() -> Shape),
    /// A record with declared members.
    Struct {
        /// The declared members in declaration order.
        members: fn() -> Vec<Member>,
        /// Whether the record carries [`ModelMeta`].
        is_model: bool,
    },
}

impl fmt::Debug for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeKind::Bool => write!(f, "Bool"),
            ShapeKind::Int => write!(f, "Int"),
            ShapeKind::Uint => write!(f, "Uint"),
            ShapeKind::Float => write!(f, "Float"),
            ShapeKind::String => write!(f, "String"),
            ShapeKind::Bytes => write!(f, "Bytes"),
            ShapeKind::Timestamp => write!(f, "Timestamp"),
            ShapeKind::Dynamic => write!(f, "Dynamic"),
            ShapeKind::Optional(inner) => write!(f, "Optional({})", inner().type_name),
            ShapeKind::List(elem) => write!(f, "List({})", elem().type_name),
            ShapeKind::Map(value) => write!(f, "Map({})", value().type_name),
            ShapeKind::Struct { is_model, .. } => write!(f, "Struct {{ is_model: {is_model} }}"),
        }
    }
}

/// One declared member of a record type.
#[derive(Debug, Clone, Copy)]
pub struct Member {
    /// The member identifier as written in the source.
    pub name: &'static str,
    /// The raw `tag` attribute, if any.
    pub tag: Option<&'static str>,
    /// Whether the member is declared `pub`.
    pub exported: bool,
    /// Whether the member is marked `#[docmodel(embed)]`.
    pub embedded: bool,
    /// The member's type.
    pub shape: fn() -> Shape,
}

/// Read-only view of a reflected value.
pub enum ReflectRef<'a> {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(&'a str),
    Bytes(&'a [u8]),
    Timestamp(&'a DateTime<Utc>),
    Dynamic(&'a Value),
    Optional(Option<&'a dyn Reflect>),
    List(&'a dyn ReflectList),
    Map(&'a dyn ReflectMap),
    Struct(&'a dyn ReflectStruct),
}

/// Mutable view of a reflected value.
pub enum ReflectMut<'a> {
    Bool(&'a mut bool),
    /// Any integer type, signed or unsigned.
    Int(&'a mut dyn IntegerSlot),
    /// Floating point targets cannot be populated yet.
    Float,
    String(&'a mut String),
    Bytes(&'a mut Vec<u8>),
    Timestamp(&'a mut DateTime<Utc>),
    Dynamic(&'a mut Value),
    Optional(&'a mut dyn ReflectOptional),
    List(&'a mut dyn ReflectList),
    Map(&'a mut dyn ReflectMap),
    Struct(&'a mut dyn ReflectStruct),
}

/// An integer location that accepts a 64-bit value with range checking.
pub trait IntegerSlot: Send + Sync {
    /// Stores `value`, failing with [`DocumentStoreError::Overflow`] if it does not fit.
    fn set_i64(&mut self, value: i64) -> DocumentStoreResult<()>;
}

/// A nillable value (`Option<T>`).
pub trait ReflectOptional: Send + Sync {
    fn get_mut(&mut self) -> Option<&mut dyn Reflect>;

    /// Allocates a default value when empty and returns it.
    fn get_or_insert_default(&mut self) -> &mut dyn Reflect;

    /// Resets to `None`.
    fn clear(&mut self);
}

/// An ordered sequence (`Vec<T>`).
pub trait ReflectList: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Option<&dyn Reflect>;

    fn get_mut(&mut self, index: usize) -> Option<&mut dyn Reflect>;

    /// Truncates, or grows with default elements, to exactly `len` elements.
    fn resize_default(&mut self, len: usize);

    fn clear(&mut self);
}

/// A string-keyed map.
pub trait ReflectMap: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries, ordered by key.
    fn entries(&self) -> Vec<(&str, &dyn Reflect)>;

    /// All entries as mutable values, ordered by key.
    fn entries_mut(&mut self) -> Vec<(&str, &mut dyn Reflect)>;

    /// Inserts a default value under `key` (replacing any previous one) and returns it.
    fn insert_default(&mut self, key: String) -> &mut dyn Reflect;

    fn clear(&mut self);
}

/// A record with positional member access.
pub trait ReflectStruct: Send + Sync {
    /// The member at declaration position `index`.
    fn field(&self, index: usize) -> Option<&dyn Reflect>;

    fn field_mut(&mut self, index: usize) -> Option<&mut dyn Reflect>;

    /// The embedded model metadata, for model types.
    fn model_meta(&self) -> Option<&ModelMeta> {
        None
    }

    fn model_meta_mut(&mut self) -> Option<&mut ModelMeta> {
        None
    }
}

/// Follows a member index path from `root`.
///
/// Optional layers along the way are looked through. Returns `None` when an embedded
/// optional record on the path is empty, in which case none of its members exist.
pub fn member<'a>(root: &'a dyn Reflect, path: &[usize]) -> DocumentStoreResult<Option<&'a dyn Reflect>> {
    let Some((&first, rest)) = path.split_first() else {
        return Ok(Some(root));
    };

    match root.reflect() {
        ReflectRef::Optional(None) => Ok(None),
        ReflectRef::Optional(Some(inner)) => member(inner, path),
        ReflectRef::Struct(record) => match record.field(first) {
            Some(field) => member(field, rest),
            None => Err(missing_member(root.dyn_shape(), first)),
        },
        _ => Err(DocumentStoreError::NotStructured(root.dyn_shape().type_name.to_string())),
    }
}

/// Follows a member index path from `root`, allocating empty optional layers on the way.
pub fn member_mut<'a>(root: &'a mut dyn Reflect, path: &[usize]) -> DocumentStoreResult<&'a mut dyn Reflect> {
    let Some((&first, rest)) = path.split_first() else {
        return Ok(root);
    };
    let shape = root.dyn_shape();

    match root.reflect_mut() {
        ReflectMut::Optional(optional) => member_mut(optional.get_or_insert_default(), path),
        ReflectMut::Struct(record) => match record.field_mut(first) {
            Some(field) => member_mut(field, rest),
            None => Err(missing_member(shape, first)),
        },
        _ => Err(DocumentStoreError::NotStructured(shape.type_name.to_string())),
    }
}

fn missing_member(shape: Shape, index: usize) -> DocumentStoreError {
    DocumentStoreError::InvalidDocument(format!(
        "{} has no member at position {index}",
        shape.type_name
    ))
}

/// Reads the model metadata of a value, looking through optional layers.
pub fn model_meta(value: &dyn Reflect) -> Option<&ModelMeta> {
    match value.reflect() {
        ReflectRef::Optional(inner) => inner.and_then(model_meta),
        ReflectRef::Struct(record) => record.model_meta(),
        _ => None,
    }
}

impl Reflect for bool {
    fn shape() -> Shape {
        Shape::of::<Self>(ShapeKind::Bool)
    }

    fn dyn_shape(&self) -> Shape {
        Self::shape()
    }

    fn reflect(&self) -> ReflectRef<'_> {
        ReflectRef::Bool(*self)
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Bool(self)
    }
}

macro_rules! reflect_signed {
    ($($ty:ty),*) => {$(
        impl IntegerSlot for $ty {
            fn set_i64(&mut self, value: i64) -> DocumentStoreResult<()> {
                *self = <$ty>::try_from(value)
                    .map_err(|_| DocumentStoreError::overflow(value, stringify!($ty)))?;
                Ok(())
            }
        }

        impl Reflect for $ty {
            fn shape() -> Shape {
                Shape::of::<Self>(ShapeKind::Int)
            }

            fn dyn_shape(&self) -> Shape {
                Self::shape()
            }

            fn reflect(&self) -> ReflectRef<'_> {
                ReflectRef::Int(*self as i64)
            }

            fn reflect_mut(&mut self) -> ReflectMut<'_> {
                ReflectMut::Int(self)
            }
        }
    )*};
}

macro_rules! reflect_unsigned {
    ($($ty:ty),*) => {$(
        impl IntegerSlot for $ty {
            fn set_i64(&mut self, value: i64) -> DocumentStoreResult<()> {
                *self = <$ty>::try_from(value)
                    .map_err(|_| DocumentStoreError::overflow(value, stringify!($ty)))?;
                Ok(())
            }
        }

        impl Reflect for $ty {
            fn shape() -> Shape {
                Shape::of::<Self>(ShapeKind::Uint)
            }

            fn dyn_shape(&self) -> Shape {
                Self::shape()
            }

            fn reflect(&self) -> ReflectRef<'_> {
                ReflectRef::Uint(*self as u64)
            }

            fn reflect_mut(&mut self) -> ReflectMut<'_> {
                ReflectMut::Int(self)
            }
        }
    )*};
}

reflect_signed!(i8, i16, i32, i64, isize);
reflect_unsigned!(u8, u16, u32, u64, usize);

macro_rules! reflect_float {
    ($($ty:ty),*) => {$(
        impl Reflect for $ty {
            fn shape() -> Shape {
                Shape::of::<Self>(ShapeKind::Float)
            }

            fn dyn_shape(&self) -> Shape {
                Self::shape()
            }

            fn reflect(&self) -> ReflectRef<'_> {
                ReflectRef::Float(*self as f64)
            }

            fn reflect_mut(&mut self) -> ReflectMut<'_> {
                ReflectMut::Float
            }
        }
    )*};
}

reflect_float!(f32, f64);

impl Reflect for String {
    fn shape() -> Shape {
        Shape::of::<Self>(ShapeKind::String)
    }

    fn dyn_shape(&self) -> Shape {
        Self::shape()
    }

    fn reflect(&self) -> ReflectRef<'_> {
        ReflectRef::String(self)
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::String(self)
    }
}

impl Reflect for Blob {
    fn shape() -> Shape {
        Shape::of::<Self>(ShapeKind::Bytes)
    }

    fn dyn_shape(&self) -> Shape {
        Self::shape()
    }

    fn reflect(&self) -> ReflectRef<'_> {
        ReflectRef::Bytes(&self.0)
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Bytes(&mut self.0)
    }
}

impl Reflect for DateTime<Utc> {
    fn shape() -> Shape {
        Shape::of::<Self>(ShapeKind::Timestamp)
    }

    fn dyn_shape(&self) -> Shape {
        Self::shape()
    }

    fn reflect(&self) -> ReflectRef<'_> {
        ReflectRef::Timestamp(self)
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Timestamp(self)
    }
}

impl Reflect for Value {
    fn shape() -> Shape {
        Shape::of::<Self>(ShapeKind::Dynamic)
    }

    fn dyn_shape(&self) -> Shape {
        Self::shape()
    }

    fn reflect(&self) -> ReflectRef<'_> {
        ReflectRef::Dynamic(self)
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Dynamic(self)
    }
}

impl<T: Reflect + Default> Reflect for Option<T> {
    fn shape() -> Shape {
        Shape::of::<Self>(ShapeKind::Optional(T::shape))
    }

    fn dyn_shape(&self) -> Shape {
        Self::shape()
    }

    fn reflect(&self) -> ReflectRef<'_> {
        ReflectRef::Optional(self.as_ref().map(|v| v as &dyn Reflect))
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Optional(self)
    }
}

impl<T: Reflect + Default> ReflectOptional for Option<T> {
    fn get_mut(&mut self) -> Option<&mut dyn Reflect> {
        self.as_mut().map(|v| v as &mut dyn Reflect)
    }

    fn get_or_insert_default(&mut self) -> &mut dyn Reflect {
        self.get_or_insert_with(T::default)
    }

    fn clear(&mut self) {
        *self = None;
    }
}

impl<T: Reflect> Reflect for Box<T> {
    fn shape() -> Shape {
        T::shape()
    }

    fn dyn_shape(&self) -> Shape {
        (**self).dyn_shape()
    }

    fn reflect(&self) -> ReflectRef<'_> {
        (**self).reflect()
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        (**self).reflect_mut()
    }
}

impl<T: Reflect + Default> Reflect for Vec<T> {
    fn shape() -> Shape {
        Shape::of::<Self>(ShapeKind::List(T::shape))
    }

    fn dyn_shape(&self) -> Shape {
        Self::shape()
    }

    fn reflect(&self) -> ReflectRef<'_> {
        ReflectRef::List(self)
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::List(self)
    }
}

impl<T: Reflect + Default> ReflectList for Vec<T> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn get(&self, index: usize) -> Option<&dyn Reflect> {
        self.as_slice()
            .get(index)
            .map(|v| v as &dyn Reflect)
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut dyn Reflect> {
        self.as_mut_slice()
            .get_mut(index)
            .map(|v| v as &mut dyn Reflect)
    }

    fn resize_default(&mut self, len: usize) {
        self.resize_with(len, T::default);
    }

    fn clear(&mut self) {
        Vec::clear(self);
    }
}

impl<T: Reflect + Default> Reflect for BTreeMap<String, T> {
    fn shape() -> Shape {
        Shape::of::<Self>(ShapeKind::Map(T::shape))
    }

    fn dyn_shape(&self) -> Shape {
        Self::shape()
    }

    fn reflect(&self) -> ReflectRef<'_> {
        ReflectRef::Map(self)
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Map(self)
    }
}

impl<T: Reflect + Default> ReflectMap for BTreeMap<String, T> {
    fn len(&self) -> usize {
        BTreeMap::len(self)
    }

    fn entries(&self) -> Vec<(&str, &dyn Reflect)> {
        self.iter()
            .map(|(k, v)| (k.as_str(), v as &dyn Reflect))
            .collect()
    }

    fn entries_mut(&mut self) -> Vec<(&str, &mut dyn Reflect)> {
        self.iter_mut()
            .map(|(k, v)| (k.as_str(), v as &mut dyn Reflect))
            .collect()
    }

    fn insert_default(&mut self, key: String) -> &mut dyn Reflect {
        let slot = self.entry(key).or_default();
        *slot = T::default();
        slot
    }

    fn clear(&mut self) {
        BTreeMap::clear(self);
    }
}

impl<T: Reflect + Default> Reflect for HashMap<String, T> {
    fn shape() -> Shape {
        Shape::of::<Self>(ShapeKind::Map(T::shape))
    }

    fn dyn_shape(&self) -> Shape {
        Self::shape()
    }

    fn reflect(&self) -> ReflectRef<'_> {
        ReflectRef::Map(self)
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Map(self)
    }
}

impl<T: Reflect + Default> ReflectMap for HashMap<String, T> {
    fn len(&self) -> usize {
        HashMap::len(self)
    }

    fn entries(&self) -> Vec<(&str, &dyn Reflect)> {
        let mut entries = self
            .iter()
            .map(|(k, v)| (k.as_str(), v as &dyn Reflect))
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    fn entries_mut(&mut self) -> Vec<(&str, &mut dyn Reflect)> {
        let mut entries = self
            .iter_mut()
            .map(|(k, v)| (k.as_str(), v as &mut dyn Reflect))
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    fn insert_default(&mut self, key: String) -> &mut dyn Reflect {
        let slot = self.entry(key).or_default();
        *slot = T::default();
        slot
    }

    fn clear(&mut self) {
        HashMap::clear(self);
    }
}
