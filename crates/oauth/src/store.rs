use crate::OauthError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Persisted OAuth credentials for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Filesystem-backed credential storage.
///
/// Layout: `<root>/oauth/<provider>/auth.json`, directory 0700 and file
/// 0600 on Unix. Writes go to a sibling temp file which is fsynced and
/// renamed over the target, so readers never observe a partial record.
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn auth_path(&self, provider: &str) -> PathBuf {
        self.root.join("oauth").join(provider).join("auth.json")
    }

    pub fn load(&self, provider: &str) -> Result<Option<CredentialRecord>, OauthError> {
        let path = self.auth_path(provider);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(OauthError::Storage(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };
        let record = serde_json::from_str(&contents).map_err(|e| {
            OauthError::Storage(format!("corrupt credential file {}: {e}", path.display()))
        })?;
        Ok(Some(record))
    }

    pub fn save(&self, provider: &str, record: &CredentialRecord) -> Result<(), OauthError> {
        let path = self.auth_path(provider);
        let dir = path.parent().expect("auth path has a parent");

        fs::create_dir_all(dir)
            .map_err(|e| OauthError::Storage(format!("cannot create {}: {e}", dir.display())))?;
        restrict_dir(dir)?;

        let payload = serde_json::to_vec_pretty(record)
            .map_err(|e| OauthError::Storage(format!("cannot encode credentials: {e}")))?;

        let tmp_path = path.with_extension("json.tmp");
        write_restricted(&tmp_path, &payload)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            OauthError::Storage(format!("cannot rename into {}: {e}", path.display()))
        })?;
        Ok(())
    }

    pub fn clear(&self, provider: &str) -> Result<(), OauthError> {
        let path = self.auth_path(provider);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OauthError::Storage(format!(
                "cannot remove {}: {e}",
                path.display()
            ))),
        }
    }

    pub fn is_authenticated(&self, provider: &str) -> bool {
        matches!(self.load(provider), Ok(Some(_)))
    }
}

fn write_restricted(path: &Path, payload: &[u8]) -> Result<(), OauthError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .map_err(|e| OauthError::Storage(format!("cannot open {}: {e}", path.display())))?;
    file.write_all(payload)
        .and_then(|_| file.sync_all())
        .map_err(|e| OauthError::Storage(format!("cannot write {}: {e}", path.display())))
}

fn restrict_dir(dir: &Path) -> Result<(), OauthError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(|e| {
            OauthError::Storage(format!("cannot restrict {}: {e}", dir.display()))
        })?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}
