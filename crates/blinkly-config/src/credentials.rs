// ── File credential store ──
//
// Persists the session record as a small TOML file so a restarted
// process can skip login (and the two-factor prompt that may come with
// it). The file holds the auth token; on Unix it is created 0600.

use std::io::Write;
use std::path::{Path, PathBuf};

use blinkly_api::{CredentialStore, Error, StoredCredential};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// On-disk shape of [`StoredCredential`].
#[derive(Debug, Deserialize, Serialize)]
struct CredentialRecord {
    email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    unique_id: String,
    account_id: String,
    client_id: String,
    tier: String,
    token: String,
    issued_at: DateTime<Utc>,
}

impl From<&StoredCredential> for CredentialRecord {
    fn from(c: &StoredCredential) -> Self {
        Self {
            email: c.email.clone(),
            password: c.password.as_ref().map(|p| p.expose_secret().to_owned()),
            unique_id: c.unique_id.clone(),
            account_id: c.account_id.clone(),
            client_id: c.client_id.clone(),
            tier: c.tier.clone(),
            token: c.token.expose_secret().to_owned(),
            issued_at: c.issued_at,
        }
    }
}

impl From<CredentialRecord> for StoredCredential {
    fn from(r: CredentialRecord) -> Self {
        Self {
            email: r.email,
            password: r.password.map(SecretString::from),
            unique_id: r.unique_id,
            account_id: r.account_id,
            client_id: r.client_id,
            tier: r.tier,
            token: SecretString::from(r.token),
            issued_at: r.issued_at,
        }
    }
}

/// TOML-file implementation of [`CredentialStore`].
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
    keep_password: bool,
}

impl FileCredentialStore {
    /// Store at `path`. The password is not written unless
    /// [`with_password`](Self::with_password) is set.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            keep_password: false,
        }
    }

    /// Store for `profile` under the platform data directory.
    pub fn for_profile(profile: &str) -> Self {
        Self::new(crate::credentials_path(profile))
    }

    /// Also persist the password, enabling unattended re-login after a
    /// restore.
    pub fn with_password(mut self, keep: bool) -> Self {
        self.keep_password = keep;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the record. Missing files are not an error.
    pub fn clear(&self) -> Result<(), Error> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_error("remove", &self.path, &e)),
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<StoredCredential>, Error> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_error("read", &self.path, &e)),
        };
        let record: CredentialRecord =
            toml::from_str(&raw).map_err(|e| store_error("parse", &self.path, &e))?;
        debug!(path = %self.path.display(), "credential record loaded");
        Ok(Some(record.into()))
    }

    fn save(&self, credential: &StoredCredential) -> Result<(), Error> {
        let mut record = CredentialRecord::from(credential);
        if !self.keep_password {
            record.password = None;
        }
        let body = toml::to_string_pretty(&record).map_err(|e| store_error("encode", &self.path, &e))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| store_error("create", parent, &e))?;
        }
        let mut file = open_private(&self.path).map_err(|e| store_error("open", &self.path, &e))?;
        // `mode` only applies on create; tighten a pre-existing file too.
        restrict_permissions(&self.path)?;
        file.write_all(body.as_bytes())
            .map_err(|e| store_error("write", &self.path, &e))?;
        debug!(path = %self.path.display(), "credential record saved");
        Ok(())
    }
}

fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| store_error("chmod", path, &e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), Error> {
    Ok(())
}

fn store_error(op: &str, path: &Path, err: &dyn std::fmt::Display) -> Error {
    Error::CredentialStore(format!("{op} {}: {err}", path.display()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn credential() -> StoredCredential {
        StoredCredential {
            email: "user@example.com".into(),
            password: Some(SecretString::from("hunter2".to_owned())),
            unique_id: "uid-1".into(),
            account_id: "1".into(),
            client_id: "2".into(),
            tier: "u011".into(),
            token: SecretString::from("tok".to_owned()),
            issued_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        }
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nope.toml"));
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn saved_record_loads_back_without_password_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested/home.toml"));
        store.save(&credential()).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.account_id, "1");
        assert_eq!(loaded.tier, "u011");
        assert_eq!(loaded.token.expose_secret(), "tok");
        assert_eq!(loaded.issued_at, credential().issued_at);
        assert!(loaded.password.is_none());

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("hunter2"));
    }

    #[test]
    fn password_is_kept_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("home.toml")).with_password(true);
        store.save(&credential()).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.password.unwrap().expose_secret(), "hunter2");
    }

    #[cfg(unix)]
    #[test]
    fn record_is_private_to_the_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("home.toml"));
        store.save(&credential()).unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn existing_readable_file_is_tightened_before_writing() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("home.toml");
        std::fs::write(&path, "").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileCredentialStore::new(&path);
        store.save(&credential()).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(store.load().unwrap().unwrap().account_id, "1");
    }

    #[test]
    fn corrupt_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("home.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        let err = FileCredentialStore::new(&path).load().unwrap_err();
        assert!(matches!(err, Error::CredentialStore(_)));
    }
}
