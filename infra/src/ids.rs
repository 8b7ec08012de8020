use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::bail;
use data_encoding::BASE64URL_NOPAD;
use err_derive::Error;
use hex_slice::AsHex;
use rand::distributions::{Distribution, Standard};
use rand::Rng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

const ID_LEN: usize = 16;
const DIVIDER: &str = "-";

/// Identifies a document of type `T`. The first eight bytes of a generated
/// id are a millisecond timestamp, the rest are random.
pub struct Id<T> {
    val: [u8; ID_LEN],
    phantom: PhantomData<T>,
}

#[derive(Debug, Clone, Error)]
pub enum IdParseError {
    #[error(display = "Invalid prefix")]
    InvalidPrefix,
    #[error(display = "Unparseable Id")]
    Unparseable,
}

/// A document type that lives in its own collection.
pub trait Entity {
    /// Collection name, also used as the textual id prefix.
    const PREFIX: &'static str;
}

/// Hands out fresh ids on behalf of the store.
#[derive(Debug, Clone, Default)]
pub struct IdGen {
    _priv: (),
}

impl IdGen {
    pub fn new() -> Self {
        IdGen { _priv: () }
    }

    pub fn generate<T>(&self) -> Id<T> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let random = rand::thread_rng().gen::<u64>();

        let mut val = [0u8; ID_LEN];
        val[..8].copy_from_slice(&millis.to_be_bytes());
        val[8..].copy_from_slice(&random.to_be_bytes());
        Id {
            val,
            phantom: PhantomData,
        }
    }
}

impl<T> Id<T> {
    /// Derives a stable id from some natural key, eg: a menu item's name.
    pub fn hashed<H: Hash + ?Sized>(entity: &H) -> Self {
        let mut val = [0u8; ID_LEN];
        for (i, chunk) in val.chunks_mut(8).enumerate() {
            let mut h = siphasher::sip::SipHasher24::new_with_keys(0, i as u64);
            entity.hash(&mut h);
            chunk.copy_from_slice(&h.finish().to_be_bytes());
        }
        Id {
            val,
            phantom: PhantomData,
        }
    }

    /// Eight hex digits taken from the random half; good enough to tell
    /// a handful of documents apart when shown to a person.
    pub fn short(&self) -> String {
        self.val[8..12].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl<T> Distribution<Id<T>> for Standard {
    fn sample<R: ?Sized + rand::Rng>(&self, rng: &mut R) -> Id<T> {
        let val = rng.gen();
        Id {
            val,
            phantom: PhantomData,
        }
    }
}

impl<T: Entity> fmt::Display for Id<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "{}{}{}",
            T::PREFIX,
            DIVIDER,
            BASE64URL_NOPAD.encode(&self.val)
        )
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Id")
            .field("val", &format_args!("{:x}", self.val.as_hex()))
            .finish()
    }
}

impl<T: Entity> std::str::FromStr for Id<T> {
    type Err = anyhow::Error;
    fn from_str(src: &str) -> Result<Self, Self::Err> {
        if !src.starts_with(T::PREFIX) {
            bail!(IdParseError::InvalidPrefix);
        }
        let remainder = &src[T::PREFIX.len()..];
        if !remainder.starts_with(DIVIDER) {
            bail!(IdParseError::Unparseable);
        }
        let b64 = &remainder[DIVIDER.len()..];

        let bytes = match BASE64URL_NOPAD.decode(b64.as_bytes()) {
            Ok(bytes) => bytes,
            Err(_) => bail!(IdParseError::Unparseable),
        };
        if bytes.len() != ID_LEN {
            bail!(IdParseError::Unparseable);
        }
        let mut id = Id::default();
        id.val.copy_from_slice(&bytes);
        Ok(id)
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        let val = Default::default();
        let phantom = PhantomData;
        Id { val, phantom }
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.val == other.val
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.val.hash(state)
    }
}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.val.cmp(&other.val)
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T: Entity> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de, T: Entity> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdStrVisitor<T>(PhantomData<T>);
        impl<'vi, T: Entity> de::Visitor<'vi> for IdStrVisitor<T> {
            type Value = Id<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "an Id string")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Id<T>, E> {
                value.parse::<Id<T>>().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(IdStrVisitor(PhantomData))
    }
}
