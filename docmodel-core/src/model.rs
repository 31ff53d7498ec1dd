//! The metadata every stored model carries.

use chrono::{DateTime, Utc};

use crate::{Record, reflect::Reflect};

/// Identifier and store-assigned timestamps of a model.
///
/// Embed it in a model type with `#[docmodel(embed)]`:
///
/// ```ignore
/// #[derive(Debug, Default, Model)]
/// pub struct User {
///     #[docmodel(embed)]
///     pub meta: ModelMeta,
///     pub email: String,
/// }
/// ```
///
/// The members are persisted under `id`, `create_time` and `update_time`, and are
/// overwritten from the document envelope whenever a model is read back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Record)]
pub struct ModelMeta {
    #[docmodel(tag = "id")]
    pub id: String,
    #[docmodel(tag = "create_time")]
    pub create_time: DateTime<Utc>,
    #[docmodel(tag = "update_time")]
    pub update_time: DateTime<Utc>,
}

impl ModelMeta {
    /// Creates metadata holding only an identifier, as a reference placeholder does.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// A record type mapped to a whole document.
///
/// Derive it with `#[derive(Model)]`; the derive locates the embedded [`ModelMeta`] (or an
/// embedded model that carries one) and generates the accessors below.
pub trait Model: Reflect + Default {
    fn meta(&self) -> &ModelMeta;

    fn meta_mut(&mut self) -> &mut ModelMeta;

    /// The document identifier; empty until assigned.
    fn id(&self) -> &str {
        &self.meta().id
    }

    fn create_time(&self) -> DateTime<Utc> {
        self.meta().create_time
    }

    fn update_time(&self) -> DateTime<Utc> {
        self.meta().update_time
    }

    fn set_id(&mut self, id: impl Into<String>)
    where
        Self: Sized,
    {
        self.meta_mut().id = id.into();
    }
}

impl Model for ModelMeta {
    fn meta(&self) -> &ModelMeta {
        self
    }

    fn meta_mut(&mut self) -> &mut ModelMeta {
        self
    }
}
