use crate::error::ClientError;
use crate::model::UserProfile;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

pub const TOKEN_KEY: &str = "auth_token";
pub const PROFILE_KEY: &str = "user_data";

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt storage file {path}: {detail}")]
    Corrupt { path: PathBuf, detail: String },
}

impl From<StorageError> for ClientError {
    fn from(err: StorageError) -> Self {
        ClientError::Storage(err.to_string())
    }
}

pub trait SecureStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

pub struct Credential {
    token: SecretString,
    token_type: String,
}

impl Credential {
    pub fn new(token: impl Into<String>, token_type: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            token_type: token_type.into(),
        }
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub(crate) fn into_secret(self) -> SecretString {
        self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct StoredToken {
    token: String,
    token_type: String,
}

#[derive(Debug)]
pub struct StoredSession {
    pub credential: Credential,
    pub profile: UserProfile,
}

#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn SecureStorage>,
    lock: Arc<Mutex<()>>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn SecureStorage>) -> Self {
        Self {
            storage,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::default()))
    }

    /// Profile first, token last: the token is the presence marker.
    pub fn save(&self, credential: &Credential, profile: &UserProfile) -> Result<(), ClientError> {
        let token = serde_json::to_string(&StoredToken {
            token: credential.token.expose_secret().to_string(),
            token_type: credential.token_type.clone(),
        })
        .map_err(|err| ClientError::Storage(err.to_string()))?;
        let profile =
            serde_json::to_string(profile).map_err(|err| ClientError::Storage(err.to_string()))?;

        let _guard = self.lock.lock();
        self.storage.set(PROFILE_KEY, &profile)?;
        self.storage.set(TOKEN_KEY, &token)?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<StoredSession>, ClientError> {
        let _guard = self.lock.lock();
        let Some(raw_token) = self.storage.get(TOKEN_KEY)? else {
            return Ok(None);
        };
        let token: StoredToken = match serde_json::from_str(&raw_token) {
            Ok(token) => token,
            Err(err) => {
                warn!(%err, "stored credential is unreadable, treating session as absent");
                return Ok(None);
            }
        };
        let profile = match self.storage.get(PROFILE_KEY)? {
            Some(raw) => match serde_json::from_str::<UserProfile>(&raw) {
                Ok(profile) => profile,
                Err(err) => {
                    warn!(%err, "cached profile is unreadable, treating session as absent");
                    return Ok(None);
                }
            },
            None => {
                warn!("credential present without cached profile, treating session as absent");
                return Ok(None);
            }
        };
        Ok(Some(StoredSession {
            credential: Credential::new(token.token, token.token_type),
            profile,
        }))
    }

    /// Replaces the cached profile only when it belongs to the stored user.
    pub fn update_profile(&self, profile: &UserProfile) -> Result<bool, ClientError> {
        let raw =
            serde_json::to_string(profile).map_err(|err| ClientError::Storage(err.to_string()))?;
        let _guard = self.lock.lock();
        if self.storage.get(TOKEN_KEY)?.is_none() {
            return Ok(false);
        }
        let same_user = self
            .storage
            .get(PROFILE_KEY)?
            .and_then(|cached| serde_json::from_str::<UserProfile>(&cached).ok())
            .is_some_and(|cached| cached.id == profile.id);
        if !same_user {
            return Ok(false);
        }
        self.storage.set(PROFILE_KEY, &raw)?;
        Ok(true)
    }

    /// Token first, then profile. Clearing an empty store is not an error.
    pub fn clear(&self) -> Result<(), ClientError> {
        let _guard = self.lock.lock();
        self.storage.remove(TOKEN_KEY)?;
        self.storage.remove(PROFILE_KEY)?;
        Ok(())
    }

    pub fn has_credential(&self) -> bool {
        let _guard = self.lock.lock();
        matches!(self.storage.get(TOKEN_KEY), Ok(Some(_)))
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl SecureStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub const FILE_NAME: &'static str = "credentials.json";

    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| StorageError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: dir.join(Self::FILE_NAME),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>, StorageError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&contents).map_err(|err| StorageError::Corrupt {
            path: self.path.clone(),
            detail: err.to_string(),
        })
    }

    fn write_all(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        let io_err = |source| StorageError::Io {
            path: self.path.clone(),
            source,
        };
        let serialized = serde_json::to_vec_pretty(entries).map_err(|err| StorageError::Corrupt {
            path: self.path.clone(),
            detail: err.to_string(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(io_err)?;
            restrict_permissions(&file).map_err(io_err)?;
            file.write_all(&serialized).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        fs::rename(&tmp, &self.path).map_err(io_err)
    }

    fn update<F>(&self, mutate: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut HashMap<String, String>) -> bool,
    {
        let _guard = self.write_lock.lock();
        let mut entries = self.read_all()?;
        if mutate(&mut entries) {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(file: &fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &fs::File) -> std::io::Result<()> {
    Ok(())
}

impl SecureStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.write_lock.lock();
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|entries| entries.remove(key).is_some())
    }
}
