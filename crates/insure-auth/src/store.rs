//! Session token storage with proactive refresh scheduling
//!
//! Holds at most one `Token`, optionally persisted to a JSON file so a restart
//! restores the session. All writes use atomic temp-file + rename. A tokio
//! Mutex serializes the token swap, the file write, and the timer re-arm, so a
//! reader never observes a half-written session and a timer armed for an older
//! token never survives a newer `set()`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::constants::{MIN_REFRESH_DELAY, REFRESH_LEAD};
use crate::error::{Error, Result};
use crate::token::{Token, now_millis};

/// Callback fired when the proactive refresh timer is due.
pub type RefreshHook = Arc<dyn Fn() + Send + Sync>;

/// Delay before the proactive refresh: `max(expires_at - now - 5min, 60s)`.
pub fn proactive_delay(expires_at: u64, now: u64) -> Duration {
    let lead = REFRESH_LEAD.as_millis() as u64;
    let until_due = expires_at.saturating_sub(now).saturating_sub(lead);
    Duration::from_millis(until_due).max(MIN_REFRESH_DELAY)
}

struct StoreState {
    token: Option<Token>,
    hook: Option<RefreshHook>,
    timer: Option<AbortHandle>,
}

/// Single-session token store.
pub struct TokenStore {
    path: Option<PathBuf>,
    state: Mutex<StoreState>,
}

impl TokenStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::with_state(None, None)
    }

    /// Restore the session persisted at `path`.
    ///
    /// A missing file is a signed-out start, not an error. A file that does
    /// not parse is reported so a corrupt session is not silently discarded.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let token = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading session file: {e}")))?;
            let token: Token = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing session file: {e}")))?;
            info!(path = %path.display(), expires_at = token.expires_at, "restored session");
            Some(token)
        } else {
            info!(path = %path.display(), "no session file, starting signed out");
            None
        };

        Ok(Self::with_state(Some(path), token))
    }

    fn with_state(path: Option<PathBuf>, token: Option<Token>) -> Self {
        Self {
            path,
            state: Mutex::new(StoreState {
                token,
                hook: None,
                timer: None,
            }),
        }
    }

    /// Clone of the current token, if signed in.
    pub async fn get(&self) -> Option<Token> {
        self.state.lock().await.token.clone()
    }

    /// Swap in a new token, persist it, and re-arm the proactive timer.
    ///
    /// The in-memory swap always happens. An error means only the file write
    /// failed; callers log it and carry on with the in-memory session.
    pub async fn set(&self, token: Token) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(hook) = state.hook.clone() {
            arm(&mut state, &token, hook);
        }
        state.token = Some(token);
        debug!("stored session token");

        match (&self.path, &state.token) {
            (Some(path), Some(token)) => write_atomic(path, token).await,
            _ => Ok(()),
        }
    }

    /// Drop the session: forget the token, cancel the timer, delete the file.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.token = None;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        info!("cleared session token");

        if let Some(path) = &self.path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(format!("removing session file: {e}"))),
            }
        }
        Ok(())
    }

    /// Arm a one-shot timer calling `on_due` ahead of `token`'s expiry,
    /// replacing any timer already armed.
    pub async fn schedule_proactive_refresh(&self, token: &Token, on_due: RefreshHook) {
        let mut state = self.state.lock().await;
        arm(&mut state, token, on_due);
    }

    /// Register the hook `set()` re-arms with, and arm it now for a restored
    /// session.
    pub async fn on_refresh_due(&self, hook: RefreshHook) {
        let mut state = self.state.lock().await;
        state.hook = Some(hook.clone());
        if let Some(token) = state.token.clone() {
            arm(&mut state, &token, hook);
        }
    }

    /// Whether a proactive refresh timer is currently armed and pending.
    pub async fn refresh_scheduled(&self) -> bool {
        self.state
            .lock()
            .await
            .timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }
}

impl Drop for TokenStore {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().timer.take() {
            timer.abort();
        }
    }
}

fn arm(state: &mut StoreState, token: &Token, on_due: RefreshHook) {
    if let Some(previous) = state.timer.take() {
        previous.abort();
    }

    let delay = proactive_delay(token.expires_at, now_millis());
    debug!(delay_secs = delay.as_secs(), "armed proactive token refresh");

    let task = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        debug!("proactive token refresh due");
        on_due();
    });
    state.timer = Some(task.abort_handle());
}

/// Write the session file atomically.
///
/// Writes a temp file in the same directory and renames it over the target so
/// a crash mid-write never leaves a truncated session. Permissions are 0600
/// (owner read/write only) since the file holds bearer credentials.
async fn write_atomic(path: &Path, token: &Token) -> Result<()> {
    let json = serde_json::to_string_pretty(token)
        .map_err(|e| Error::Parse(format!("serializing session: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("session path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting session file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted session");
    Ok(())
}
