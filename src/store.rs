//! JSON persistence shared by the history, prompt and custom-prompt stores.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Read a JSON list. Missing or corrupt files yield an empty list; the
/// corrupt case is logged so the user's data loss is at least visible.
pub async fn load_list<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    try_load_list(path).await.unwrap_or_default()
}

/// Like `load_list`, but None when there is no usable file, so callers can
/// tell "never saved" from "saved empty".
pub async fn try_load_list<T: DeserializeOwned>(path: &Path) -> Option<Vec<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read store");
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(items) => Some(items),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt store, starting empty");
            None
        }
    }
}

/// Atomic write: temp file + rename prevents partial reads.
pub async fn save_list<T: Serialize>(path: &Path, items: &[T]) -> Result<(), std::io::Error> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(dir).await?;
    }

    let json = serde_json::to_vec_pretty(items).map_err(std::io::Error::other)?;

    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, &json).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}
