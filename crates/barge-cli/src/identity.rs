//! Stable peer identity persisted across uploader runs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use uuid::Uuid;

/// Where the uploader keeps its identity, relative to `$HOME`.
const PEER_ID_FILE: &str = ".uploader/.uuid";

/// Resolve the uploader's peer id: read the persisted one, or generate
/// and persist a fresh random id on first run.
///
/// # Errors
///
/// Fails when `$HOME` is unset, the file holds something that is not a
/// uuid, or the file cannot be read or written.
pub fn load_or_create() -> anyhow::Result<Uuid> {
    let home = std::env::var_os("HOME").context("HOME is not set")?;
    load_or_create_at(&PathBuf::from(home).join(PEER_ID_FILE))
}

/// [`load_or_create`] against an explicit file path.
///
/// # Errors
///
/// Same failure modes as [`load_or_create`], minus the `$HOME` lookup.
pub fn load_or_create_at(path: &Path) -> anyhow::Result<Uuid> {
    if path.exists() {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read peer id from {}", path.display()))?;
        return text
            .trim()
            .parse()
            .with_context(|| format!("malformed peer id in {}", path.display()));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let id = Uuid::new_v4();
    fs::write(path, id.to_string())
        .with_context(|| format!("cannot persist peer id to {}", path.display()))?;
    Ok(id)
}
