use crate::error::{ClientError, ClientResult};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use zeroize::Zeroizing;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const TOKEN_FILE: &str = "token";

/// Holds the bearer credential attached to API and cable requests.
pub trait TokenStore: Send + Sync {
    fn token(&self) -> Option<String>;
    fn set_token(&self, token: &str) -> ClientResult<()>;
    fn clear_token(&self) -> ClientResult<()>;
}

/// Strip an optional `Bearer ` prefix, as found in the login response header.
pub fn bare_token(raw: &str) -> &str {
    let raw = raw.trim();
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .unwrap_or(raw)
        .trim()
}

/// Process-local token store. The credential is zeroized when replaced or cleared.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<Zeroizing<String>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(Zeroizing::new(bare_token(token).to_string()))),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn token(&self) -> Option<String> {
        let guard = self.token.lock().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(|t| t.to_string())
    }

    fn set_token(&self, token: &str) -> ClientResult<()> {
        let mut guard = self.token.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Zeroizing::new(bare_token(token).to_string()));
        Ok(())
    }

    fn clear_token(&self) -> ClientResult<()> {
        let mut guard = self.token.lock().unwrap_or_else(|e| e.into_inner());
        *guard = None;
        Ok(())
    }
}

/// Token persisted as a single `0600` file inside the state directory.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Open the store under `state_dir`, creating the directory (`0700`) if needed.
    pub fn open(state_dir: &Path) -> ClientResult<Self> {
        ensure_state_dir(state_dir)?;
        Ok(Self {
            path: state_dir.join(TOKEN_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn token(&self) -> Option<String> {
        let data = Zeroizing::new(std::fs::read_to_string(&self.path).ok()?);
        let token = data.trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }

    fn set_token(&self, token: &str) -> ClientResult<()> {
        std::fs::write(&self.path, bare_token(token))?;
        #[cfg(unix)]
        {
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        tracing::debug!(path = %self.path.display(), "session token saved");
        Ok(())
    }

    fn clear_token(&self) -> ClientResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Ensure the state directory exists with `0700` permissions.
pub fn ensure_state_dir(path: &Path) -> ClientResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| ClientError::Io {
            message: format!("failed to create state dir {}: {e}", path.display()),
        })?;
    }
    #[cfg(unix)]
    {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).map_err(|e| {
            ClientError::Io {
                message: format!("failed to set state dir permissions {}: {e}", path.display()),
            }
        })?;
    }
    Ok(())
}
