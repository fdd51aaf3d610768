//! # Snapshot and Entity Files
//!
//! Whole-session snapshots and per-kind entity exports, both as TOML.
//! Snapshots carry a format version and are validated again by
//! [`aviary_core::PopulationStore::restore`] when loaded.

use std::path::Path;

use aviary_core::{Entity, Kind, StateBlob};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Version written into every snapshot file.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    format_version: u32,
    state: StateBlob,
}

#[derive(Serialize, Deserialize)]
struct EntityFile {
    #[serde(default)]
    entities: Vec<Entity>,
}

fn write_file(path: &Path, text: &str) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, text)?;
    Ok(())
}

/// Renders a snapshot as TOML.
///
/// # Errors
///
/// Returns [`AppError::Snapshot`] if serialization fails.
pub fn snapshot_to_toml(state: &StateBlob) -> AppResult<String> {
    let file = SnapshotFile {
        format_version: SNAPSHOT_FORMAT_VERSION,
        state: state.clone(),
    };
    toml::to_string(&file).map_err(|e| AppError::Snapshot(e.to_string()))
}

/// Parses a snapshot from TOML.
///
/// # Errors
///
/// Returns [`AppError::Snapshot`] on syntax errors or a version mismatch.
pub fn snapshot_from_toml(text: &str) -> AppResult<StateBlob> {
    let file: SnapshotFile = toml::from_str(text).map_err(|e| AppError::Snapshot(e.to_string()))?;
    if file.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(AppError::Snapshot(format!(
            "unsupported format version {} (expected {SNAPSHOT_FORMAT_VERSION})",
            file.format_version
        )));
    }
    Ok(file.state)
}

/// Writes a snapshot file.
///
/// # Errors
///
/// Returns [`AppError::Io`] or [`AppError::Snapshot`].
pub fn save_snapshot(path: impl AsRef<Path>, state: &StateBlob) -> AppResult<()> {
    let path = path.as_ref();
    write_file(path, &snapshot_to_toml(state)?)?;
    tracing::info!(path = %path.display(), entities = state.entities.len(), "snapshot saved");
    Ok(())
}

/// Reads a snapshot file.
///
/// # Errors
///
/// Returns [`AppError::Io`] or [`AppError::Snapshot`].
pub fn load_snapshot(path: impl AsRef<Path>) -> AppResult<StateBlob> {
    let path = path.as_ref();
    let state = snapshot_from_toml(&std::fs::read_to_string(path)?)?;
    tracing::info!(path = %path.display(), entities = state.entities.len(), "snapshot loaded");
    Ok(state)
}

/// Writes the entities of `kind` from `entities`. Returns how many were written.
///
/// # Errors
///
/// Returns [`AppError::Io`] or [`AppError::Snapshot`].
pub fn save_entities(path: impl AsRef<Path>, kind: Kind, entities: &[Entity]) -> AppResult<usize> {
    let path = path.as_ref();
    let file = EntityFile {
        entities: entities.iter().filter(|e| e.kind == kind).copied().collect(),
    };
    let text = toml::to_string(&file).map_err(|e| AppError::Snapshot(e.to_string()))?;
    write_file(path, &text)?;
    tracing::info!(path = %path.display(), %kind, count = file.entities.len(), "entities exported");
    Ok(file.entities.len())
}

/// Reads an entity export.
///
/// # Errors
///
/// Returns [`AppError::Io`] or [`AppError::Snapshot`].
pub fn load_entities(path: impl AsRef<Path>) -> AppResult<Vec<Entity>> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let file: EntityFile = toml::from_str(&text).map_err(|e| AppError::Snapshot(e.to_string()))?;
    Ok(file.entities)
}
