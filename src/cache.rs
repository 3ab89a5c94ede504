use crate::config::{CACHE_FILE, CACHE_VERSION, READ_BUFFER_CAPACITY, WRITE_BUFFER_CAPACITY};
use crate::identity::IdentityIndex;
use anyhow::{Context, Result};
use bincode::Options;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

/// Everything the identity index depends on besides the input bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKey {
    pub input_path: String,
    pub overrides: Vec<(String, String)>,
    /// Serialized rules that decide which rows are accepted
    pub settings: String,
}

#[derive(Serialize, Deserialize)]
pub struct CacheMetadata {
    pub version: u32,
    pub key: CacheKey,
    pub input_mtime: u64,
    pub input_size: u64,
    pub id_count: usize,
    pub name_count: usize,
}

#[derive(Deserialize)]
struct IdentityCacheDe {
    metadata: CacheMetadata,
    ids: FxHashMap<String, String>,
    names: FxHashMap<String, String>,
}

/// Borrows the maps so saving does not clone every key.
#[derive(Serialize)]
struct IdentityCacheSer<'a> {
    metadata: CacheMetadata,
    ids: &'a FxHashMap<String, String>,
    names: &'a FxHashMap<String, String>,
}

pub fn cache_path(output_dir: &Path) -> PathBuf {
    output_dir.join(CACHE_FILE)
}

fn get_input_metadata(input_path: &str) -> Result<(u64, u64)> {
    let metadata = fs::metadata(input_path)
        .with_context(|| format!("Failed to get metadata for: {}", input_path))?;
    let mtime = metadata
        .modified()
        .context("Failed to get modification time")?
        .duration_since(SystemTime::UNIX_EPOCH)
        .context("Invalid modification time")?
        .as_secs();
    Ok((mtime, metadata.len()))
}

/// `Ok(None)` when the cache is missing, corrupt or stale.
pub fn try_load_index(cache_path: &Path, key: &CacheKey) -> Result<Option<IdentityIndex>> {
    if !cache_path.exists() {
        return Ok(None);
    }

    let file_size = fs::metadata(cache_path).map(|m| m.len()).unwrap_or(0);
    let file = File::open(cache_path)
        .with_context(|| format!("Failed to open cache file: {:?}", cache_path))?;
    let reader = BufReader::with_capacity(READ_BUFFER_CAPACITY, file);

    let options = bincode::options().with_limit(file_size.saturating_add(1024));
    let cache: IdentityCacheDe = match options.deserialize_from(reader) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Identity cache is corrupt or unreadable");
            return Ok(None);
        }
    };

    if cache.metadata.version != CACHE_VERSION {
        info!(
            cached = cache.metadata.version,
            current = CACHE_VERSION,
            "Cache version mismatch"
        );
        return Ok(None);
    }

    if cache.metadata.key.input_path != key.input_path {
        info!(
            cached = cache.metadata.key.input_path,
            current = key.input_path,
            "Cache input path mismatch"
        );
        return Ok(None);
    }

    if cache.metadata.key.overrides != key.overrides {
        info!("Override table has changed since cache was created");
        return Ok(None);
    }

    if cache.metadata.key.settings != key.settings {
        info!("Classification settings have changed since cache was created");
        return Ok(None);
    }

    let (mtime, size) = get_input_metadata(&key.input_path)?;
    if cache.metadata.input_mtime != mtime || cache.metadata.input_size != size {
        info!(
            cached_mtime = cache.metadata.input_mtime,
            current_mtime = mtime,
            cached_size = cache.metadata.input_size,
            current_size = size,
            "Input file has changed since cache was created"
        );
        return Ok(None);
    }

    info!(
        ids = cache.metadata.id_count,
        names = cache.metadata.name_count,
        "Identity index loaded from cache"
    );

    Ok(Some(IdentityIndex::from_maps(cache.ids, cache.names)))
}

/// Writes to a temp file and renames it over the previous cache.
pub fn save_index(index: &IdentityIndex, key: &CacheKey, output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create directory: {:?}", output_dir))?;
    let path = cache_path(output_dir);

    let (mtime, size) = get_input_metadata(&key.input_path)?;
    let (ids, names) = index.maps();
    let (id_count, name_count) = index.stats();

    let cache = IdentityCacheSer {
        metadata: CacheMetadata {
            version: CACHE_VERSION,
            key: key.clone(),
            input_mtime: mtime,
            input_size: size,
            id_count,
            name_count,
        },
        ids,
        names,
    };

    let tmp_path = path.with_extension("cache.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp cache file: {:?}", tmp_path))?;
    let writer = BufWriter::with_capacity(WRITE_BUFFER_CAPACITY, file);

    bincode::DefaultOptions::new()
        .serialize_into(writer, &cache)
        .context("Failed to serialize identity cache")?;

    fs::rename(&tmp_path, &path)
        .with_context(|| format!("Failed to rename temp cache file to: {:?}", path))?;

    info!(ids = id_count, names = name_count, path = ?path, "Identity cache saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_input(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("export.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "athleteid;firstname").unwrap();
        path
    }

    fn key_for(input: &Path) -> CacheKey {
        CacheKey {
            input_path: input.to_str().unwrap().to_string(),
            overrides: vec![("652065".to_string(), "147939".to_string())],
            settings: "{}".to_string(),
        }
    }

    fn create_test_index() -> IdentityIndex {
        let ids = [("147939", "147939"), ("652065", "147939")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let names = [("abdulaziz|aljadani", "147939")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        IdentityIndex::from_maps(ids, names)
    }

    #[test]
    fn cache_path_is_inside_output_dir() {
        assert_eq!(
            cache_path(Path::new("/output/dir")),
            PathBuf::from("/output/dir/identity.cache")
        );
    }

    #[test]
    fn missing_cache_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        let loaded = try_load_index(&dir.path().join("none.cache"), &key_for(&input)).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        let key = key_for(&input);

        save_index(&create_test_index(), &key, dir.path()).unwrap();
        let loaded = try_load_index(&cache_path(dir.path()), &key)
            .unwrap()
            .expect("cache should be valid");

        assert_eq!(loaded.resolve("652065", "").unwrap(), "147939");
        assert_eq!(loaded.resolve("", "Abdulaziz Al Jadani").unwrap(), "147939");
        assert_eq!(loaded.stats(), (2, 1));
        assert!(!dir.path().join("identity.cache.tmp").exists());
    }

    #[test]
    fn modified_input_invalidates() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        let key = key_for(&input);
        save_index(&create_test_index(), &key, dir.path()).unwrap();

        let mut file = File::create(&input).unwrap();
        writeln!(file, "athleteid;firstname;lastname;and;more;columns").unwrap();

        assert!(try_load_index(&cache_path(dir.path()), &key)
            .unwrap()
            .is_none());
    }

    #[test]
    fn changed_overrides_invalidate() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        let key = key_for(&input);
        save_index(&create_test_index(), &key, dir.path()).unwrap();

        let mut edited = key.clone();
        edited.overrides.push(("1".to_string(), "2".to_string()));
        assert!(try_load_index(&cache_path(dir.path()), &edited)
            .unwrap()
            .is_none());
    }

    #[test]
    fn changed_settings_invalidate() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        let key = key_for(&input);
        save_index(&create_test_index(), &key, dir.path()).unwrap();

        let mut edited = key.clone();
        edited.settings = r#"{"catch_all":"time_ascending"}"#.to_string();
        assert!(try_load_index(&cache_path(dir.path()), &edited)
            .unwrap()
            .is_none());
    }

    #[test]
    fn different_input_path_invalidates() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        let key = key_for(&input);
        save_index(&create_test_index(), &key, dir.path()).unwrap();

        let mut other = key.clone();
        other.input_path = "/different/export.csv".to_string();
        assert!(try_load_index(&cache_path(dir.path()), &other)
            .unwrap()
            .is_none());
    }

    #[test]
    fn corrupt_cache_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        let cache_file = cache_path(dir.path());
        File::create(&cache_file)
            .unwrap()
            .write_all(b"not valid bincode data")
            .unwrap();

        assert!(try_load_index(&cache_file, &key_for(&input))
            .unwrap()
            .is_none());
    }

    #[test]
    fn save_creates_output_directory() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        let nested = dir.path().join("nested").join("out");
        save_index(&create_test_index(), &key_for(&input), &nested).unwrap();
        assert!(cache_path(&nested).exists());
    }
}
