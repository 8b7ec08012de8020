use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::ids::{Entity, Id};

/// Opaque token naming one stored revision of a document. Empty until the
/// document has been written once.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default, Hash)]
pub struct Version(String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(bound = "T: Entity")]
pub struct DocMeta<T> {
    #[serde(rename = "_id")]
    pub id: Id<T>,
    #[serde(rename = "_version", default)]
    pub version: Version,
    #[serde(skip)]
    pub _phantom: PhantomData<T>,
}

pub trait HasMeta: Sized {
    fn meta(&self) -> &DocMeta<Self>;
    fn meta_mut(&mut self) -> &mut DocMeta<Self>;
}

impl<T> Default for DocMeta<T> {
    fn default() -> Self {
        let id = Default::default();
        let version = Default::default();
        let _phantom = Default::default();
        DocMeta {
            id,
            version,
            _phantom,
        }
    }
}

impl<T> DocMeta<T> {
    pub fn new_with_id(id: Id<T>) -> Self {
        DocMeta {
            id,
            ..Default::default()
        }
    }
}

impl Version {
    pub(crate) fn new(token: String) -> Self {
        Version(token)
    }

    pub fn is_new(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
