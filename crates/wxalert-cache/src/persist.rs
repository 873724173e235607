//! On-disk mirror of cache generations.
//!
//! ```text
//! <dir>/
//!     weather-app-cache-v2.1/
//!         generation.json     name and creation order
//!         entry-0.json        one file per stored request
//!         entry-1.json
//! ```
//!
//! A write touches only the entries it stores. A batch is staged to temporary files
//! and renamed into place once every file has been written.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{trace, warn};

use crate::{CacheEntry, CacheError};

const GENERATION_FILE: &str = "generation.json";
const ENTRY_PREFIX: &str = "entry-";
const ENTRY_SUFFIX: &str = ".json";
const STAGING_EXTENSION: &str = "json.tmp";

/// Identity of a stored generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GenerationMeta {
    pub name: String,
    pub created_seq: u64,
}

/// A generation read back from disk, entries tagged with their file slot.
#[derive(Debug)]
pub(crate) struct LoadedGeneration {
    pub meta: GenerationMeta,
    pub entries: Vec<(u64, CacheEntry)>,
}

pub(crate) fn generation_dir(dir: &Path, name: &str) -> PathBuf {
    dir.join(urlencoding::encode(name).as_ref())
}

fn entry_file(generation: &Path, slot: u64) -> PathBuf {
    generation.join(format!("{ENTRY_PREFIX}{slot}{ENTRY_SUFFIX}"))
}

fn slot_of(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix(ENTRY_PREFIX)?
        .strip_suffix(ENTRY_SUFFIX)?
        .parse()
        .ok()
}

async fn discard(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path).await {
            trace!(path = %path.display(), error = %e, "Could not discard staged file");
        }
    }
}

/// Write `entries` into generation `meta`, creating the generation when `is_new`.
///
/// Either every entry file is replaced or none is.
pub(crate) async fn write_entries(
    dir: &Path,
    meta: &GenerationMeta,
    is_new: bool,
    entries: &[(u64, &CacheEntry)],
) -> Result<(), CacheError> {
    let generation = generation_dir(dir, &meta.name);
    if is_new {
        fs::create_dir_all(&generation).await?;
    }

    let mut staged = Vec::with_capacity(entries.len());
    for (slot, entry) in entries {
        let tmp = entry_file(&generation, *slot).with_extension(STAGING_EXTENSION);
        let written = match serde_json::to_vec(entry) {
            Ok(data) => fs::write(&tmp, data).await.map_err(CacheError::from),
            Err(e) => Err(e.into()),
        };
        staged.push(tmp);

        if let Err(e) = written {
            discard(&staged).await;
            if is_new {
                let _ = fs::remove_dir_all(&generation).await;
            }
            return Err(e);
        }
    }

    for ((slot, _), tmp) in entries.iter().zip(&staged) {
        fs::rename(tmp, entry_file(&generation, *slot)).await?;
    }

    if is_new {
        let path = generation.join(GENERATION_FILE);
        let tmp = path.with_extension(STAGING_EXTENSION);
        fs::write(&tmp, serde_json::to_vec(meta)?).await?;
        fs::rename(&tmp, &path).await?;
    }

    trace!(cache = %meta.name, entries = entries.len(), "Cache persisted");
    Ok(())
}

/// Remove a generation's directory. A missing directory is not an error.
pub(crate) async fn remove_generation(dir: &Path, name: &str) -> Result<(), CacheError> {
    match fs::remove_dir_all(generation_dir(dir, name)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Load every generation stored in `dir`. Unreadable generations and entries are skipped.
pub(crate) async fn load_all(dir: &Path) -> Result<Vec<LoadedGeneration>, CacheError> {
    let mut generations = Vec::new();

    let mut items = fs::read_dir(dir).await?;
    while let Some(item) = items.next_entry().await? {
        if !item.file_type().await?.is_dir() {
            continue;
        }

        let path = item.path();
        match load_generation(&path).await {
            Ok(generation) => generations.push(generation),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache generation"),
        }
    }

    Ok(generations)
}

async fn load_generation(path: &Path) -> Result<LoadedGeneration, CacheError> {
    let meta: GenerationMeta = serde_json::from_slice(&fs::read(path.join(GENERATION_FILE)).await?)?;

    let mut entries = Vec::new();
    let mut files = fs::read_dir(path).await?;
    while let Some(file) = files.next_entry().await? {
        let file = file.path();
        let Some(slot) = slot_of(&file) else {
            continue;
        };

        let parsed = match fs::read(&file).await {
            Ok(data) => serde_json::from_slice::<CacheEntry>(&data).map_err(CacheError::from),
            Err(e) => Err(e.into()),
        };
        match parsed {
            Ok(entry) => entries.push((slot, entry)),
            Err(e) => warn!(path = %file.display(), error = %e, "Skipping unreadable cache entry"),
        }
    }

    Ok(LoadedGeneration { meta, entries })
}
