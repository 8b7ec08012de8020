//! Who is signed in on this machine. A single JSON record is kept under the
//! key `user`; a missing or unreadable record means nobody is signed in.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use log::*;
use serde::{Deserialize, Serialize};

use infra::documents::HasMeta;
use infra::ids::Id;

use crate::accounts::User;

pub const SESSION_KEY: &str = "user";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub uid: Id<User>,
    pub first_name: String,
    pub last_name: String,
    pub mobile: String,
}

pub trait SessionStore {
    fn load(&self) -> Result<Option<Session>>;
    fn store(&self, session: &Session) -> Result<()>;
    fn clear(&self) -> Result<()>;

    fn user(&self) -> Result<Option<Id<User>>> {
        Ok(self.load()?.map(|s| s.uid))
    }
}

#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    record: Arc<Mutex<Option<String>>>,
}

impl Session {
    pub fn for_user(user: &User) -> Self {
        Session {
            uid: user.meta().id,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            mobile: user.mobile.clone(),
        }
    }
}

fn decode(raw: &str) -> Option<Session> {
    match serde_json::from_str(raw) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!("Ignoring unreadable session record: {}", e);
            None
        }
    }
}

impl FileSessionStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref().to_path_buf();
        FileSessionStore { dir }
    }

    fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", SESSION_KEY))
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<Session>> {
        let path = self.path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No session at {:?}", path);
                return Ok(None);
            }
            Err(e) => return Err(e).with_context(|| format!("read {:?}", path)),
        };
        Ok(decode(&raw))
    }

    fn store(&self, session: &Session) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| format!("create {:?}", self.dir))?;
        let path = self.path();
        fs::write(&path, serde_json::to_string(session)?)
            .with_context(|| format!("write {:?}", path))?;
        debug!("Stored session for {} at {:?}", session.uid, path);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {:?}", path)),
        }
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts an arbitrary string in the slot, as a foreign writer might.
    pub fn put_raw(&self, raw: &str) -> Result<()> {
        *self.slot()? = Some(raw.to_string());
        Ok(())
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<Option<String>>> {
        self.record
            .lock()
            .map_err(|_| anyhow!("session lock poisoned"))
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<Session>> {
        Ok(self.slot()?.as_ref().and_then(|raw| decode(raw)))
    }

    fn store(&self, session: &Session) -> Result<()> {
        *self.slot()? = Some(serde_json::to_string(session)?);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot()? = None;
        Ok(())
    }
}
