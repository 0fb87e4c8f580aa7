//! On-disk cache layer.
//!
//! One file per fingerprint, named by its hex digest, inside a single
//! directory:
//!
//! | File                   | Meaning                                        |
//! |------------------------|------------------------------------------------|
//! | `<hex>`                | complete file                                  |
//! | `<hex>.part`           | partial file, bytes at their real offsets      |
//! | `<hex>.ranges`         | which byte ranges of `<hex>.part` are valid    |
//! | `<hex>.ranges.temp`    | ranges file being replaced (renamed into place)|
//!
//! The ranges file uses the format in [`crate::range::format_range_list`].
//! When the valid ranges cover the whole file, `<hex>.part` is renamed to
//! `<hex>` and the ranges file is removed.
//!
//! On start-up the directory is scanned and the cache map rebuilt from file
//! names and ranges files. A complete file takes precedence over a partial
//! one; partial files without a readable, non-empty ranges file are deleted.
//!
//! All file I/O runs on the blocking thread pool.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::layer::{CacheLayer, LayerStats};
use super::lru::LruPolicy;
use super::map::CacheMap;
use crate::data::{DenseData, SparseData};
use crate::fingerprint::{Fingerprint, RemoteFileId};
use crate::range::{format_range_list, parse_range_list, Range, RangeList};
use crate::BoxFuture;

const PARTIAL_SUFFIX: &str = ".part";
const RANGES_SUFFIX: &str = ".ranges";
const TEMP_SUFFIX: &str = ".temp";

/// Errors opening a disk cache.
#[derive(Debug, Error)]
pub enum DiskCacheError {
    #[error("cannot create cache directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("cannot scan cache directory {path}: {source}")]
    Scan { path: PathBuf, source: io::Error },
}

/// What the disk holds for one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskEntry {
    /// `<hex>` exists and is complete.
    Whole,
    /// `<hex>.part` exists with these valid ranges.
    Partial(RangeList),
}

impl DiskEntry {
    fn contains(&self, range: &Range) -> bool {
        match self {
            DiskEntry::Whole => true,
            DiskEntry::Partial(list) => list.contains(range),
        }
    }
}

#[derive(Debug, Clone)]
struct FilePaths {
    whole: PathBuf,
    partial: PathBuf,
    ranges: PathBuf,
    ranges_temp: PathBuf,
}

impl FilePaths {
    fn new(dir: &Path, fingerprint: &Fingerprint) -> Self {
        let hex = fingerprint.to_hex();
        Self {
            whole: dir.join(&hex),
            partial: dir.join(format!("{hex}{PARTIAL_SUFFIX}")),
            ranges: dir.join(format!("{hex}{RANGES_SUFFIX}")),
            ranges_temp: dir.join(format!("{hex}{RANGES_SUFFIX}{TEMP_SUFFIX}")),
        }
    }

    fn remove_all(&self) {
        for path in [&self.whole, &self.ranges, &self.partial, &self.ranges_temp] {
            remove_if_present(path);
        }
    }
}

fn remove_if_present(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove cache file");
        }
    }
}

struct DiskInner {
    dir: PathBuf,
    map: CacheMap<DiskEntry>,
    closing: Arc<AtomicBool>,
}

impl Drop for DiskInner {
    fn drop(&mut self) {
        // Entries released by the map on drop must stay on disk.
        self.closing.store(true, Ordering::SeqCst);
    }
}

/// Persistent cache layer backed by a directory.
#[derive(Clone)]
pub struct DiskCacheLayer {
    inner: Arc<DiskInner>,
}

impl DiskCacheLayer {
    /// Opens (creating if needed) a cache directory and indexes its contents.
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory holding the cache files
    /// * `max_bytes` - Disk budget in bytes
    /// * `max_fraction` - Largest share of the budget a single file may use
    pub fn open(dir: impl Into<PathBuf>, max_bytes: u64, max_fraction: f64) -> Result<Self, DiskCacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| DiskCacheError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let closing = Arc::new(AtomicBool::new(false));
        let hook_dir = dir.clone();
        let hook_closing = Arc::clone(&closing);
        let map = CacheMap::new(
            Box::new(LruPolicy::new(max_bytes, max_fraction)),
            move |id: &Fingerprint, _entry: DiskEntry, size| {
                if hook_closing.load(Ordering::SeqCst) {
                    return;
                }
                debug!(fingerprint = %id, size, "removing cached file");
                FilePaths::new(&hook_dir, id).remove_all();
            },
        );

        let layer = Self {
            inner: Arc::new(DiskInner { dir, map, closing }),
        };
        layer.index_directory()?;
        Ok(layer)
    }

    pub fn directory(&self) -> &Path {
        &self.inner.dir
    }

    /// The stored descriptor for `fingerprint`.
    pub fn entry(&self, fingerprint: &Fingerprint) -> Option<DiskEntry> {
        self.inner.map.read().get(fingerprint).cloned()
    }

    /// Deletes every cached file. Returns how many entries were removed.
    pub async fn clear(&self) -> usize {
        let inner = Arc::clone(&self.inner);
        let removed = tokio::task::spawn_blocking(move || {
            let mut writer = inner.map.write();
            let count = writer.len();
            writer.erase_all();
            count
        })
        .await
        .unwrap_or(0);
        info!(dir = %self.inner.dir.display(), entries = removed, "disk cache cleared");
        removed
    }

    fn index_directory(&self) -> Result<(), DiskCacheError> {
        let dir = &self.inner.dir;
        let read_dir = fs::read_dir(dir).map_err(|source| DiskCacheError::Scan {
            path: dir.clone(),
            source,
        })?;

        let mut found: HashMap<Fingerprint, (DiskEntry, u64)> = HashMap::new();
        for dirent in read_dir.flatten() {
            let Ok(file_type) = dirent.file_type() else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            let name = dirent.file_name().to_string_lossy().into_owned();
            if name.ends_with(TEMP_SUFFIX) {
                remove_if_present(&dirent.path());
                continue;
            }
            if name.ends_with(RANGES_SUFFIX) {
                continue;
            }
            let size = dirent.metadata().map(|m| m.len()).unwrap_or(0);

            let (hex, partial) = match name.strip_suffix(PARTIAL_SUFFIX) {
                Some(hex) => (hex, true),
                None => (name.as_str(), false),
            };
            let Ok(fingerprint) = Fingerprint::from_hex(hex) else {
                debug!(file = %name, "ignoring non-cache file");
                continue;
            };
            let paths = FilePaths::new(dir, &fingerprint);

            if !partial {
                if let Some((DiskEntry::Partial(_), _)) = found.get(&fingerprint) {
                    remove_if_present(&paths.partial);
                    remove_if_present(&paths.ranges);
                }
                found.insert(fingerprint, (DiskEntry::Whole, size));
                continue;
            }

            if matches!(found.get(&fingerprint), Some((DiskEntry::Whole, _)))
                || paths.whole.exists()
            {
                remove_if_present(&paths.partial);
                remove_if_present(&paths.ranges);
                continue;
            }

            let ranges = fs::read_to_string(&paths.ranges)
                .ok()
                .and_then(|text| parse_range_list(&text).ok())
                .filter(|list| !list.is_empty());
            match ranges {
                Some(mut list) => {
                    list.resolve_eof(size);
                    found.insert(fingerprint, (DiskEntry::Partial(list), size));
                }
                None => {
                    debug!(fingerprint = %fingerprint, "dropping partial file without ranges");
                    remove_if_present(&paths.partial);
                    remove_if_present(&paths.ranges);
                }
            }
        }

        let map = &self.inner.map;
        let mut writer = map.write();
        let mut indexed = 0usize;
        for (fingerprint, (entry, size)) in found {
            if map.alloc(size, &mut writer) {
                writer.insert_with(fingerprint, size, || entry);
                indexed += 1;
            } else {
                FilePaths::new(dir, &fingerprint).remove_all();
            }
        }
        info!(dir = %dir.display(), files = indexed, "disk cache indexed");
        Ok(())
    }

    fn read_sync(inner: &DiskInner, fingerprint: &Fingerprint, range: &Range) -> Option<SparseData> {
        let (entry, path) = {
            let reader = inner.map.read();
            let entry = reader.get(fingerprint)?;
            if !entry.contains(range) {
                return None;
            }
            reader.use_entry(fingerprint);
            let paths = FilePaths::new(&inner.dir, fingerprint);
            let path = match entry {
                DiskEntry::Whole => paths.whole,
                DiskEntry::Partial(_) => paths.partial,
            };
            (entry.clone(), path)
        };

        match read_range(&path, range) {
            Ok((bytes, file_len)) => {
                let end = range.start() + bytes.len() as u64;
                let at_eof = match &entry {
                    DiskEntry::Whole => end >= file_len,
                    DiskEntry::Partial(list) => {
                        end >= file_len && list.contains(&Range::from_start(range.start()))
                    }
                };
                Some(SparseData::from_dense(DenseData::new(range.start(), bytes, at_eof)))
            }
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "disk cache read failed");
                None
            }
        }
    }

    fn write_sync(inner: &DiskInner, fingerprint: &Fingerprint, data: &SparseData) {
        if data.is_empty() {
            return;
        }
        let map = &inner.map;
        let paths = FilePaths::new(&inner.dir, fingerprint);
        let mut writer = map.write();

        let needed_end = data.chunks().iter().map(DenseData::end_byte).max().unwrap_or(0);
        let mut current = writer.get(fingerprint).cloned();
        match &current {
            Some(entry) if data.chunks().iter().all(|c| entry.contains(c.range())) => {
                writer.use_entry(fingerprint);
                return;
            }
            Some(_) => {
                writer.use_entry(fingerprint);
            }
            None => {}
        }

        let old_size = writer.size_of(fingerprint).unwrap_or(0);
        let new_size = old_size.max(needed_end);
        if !map.policy().cachable(new_size) {
            debug!(fingerprint = %fingerprint, new_size, "disk layer declined oversized entry");
            return;
        }
        if !map.alloc(new_size - old_size, &mut writer) {
            debug!(fingerprint = %fingerprint, new_size, "disk layer declined entry");
            return;
        }
        if current.is_some() && !writer.contains(fingerprint) {
            // Evicted to make room for itself.
            current = None;
            if !map.alloc(needed_end, &mut writer) {
                return;
            }
        }

        let mut list = match current {
            Some(DiskEntry::Partial(list)) => list,
            Some(DiskEntry::Whole) => return,
            None => {
                remove_if_present(&paths.ranges);
                RangeList::new()
            }
        };

        let file_len = match write_chunks(&paths.partial, data) {
            Ok(len) => len,
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "disk cache write failed");
                return;
            }
        };
        for chunk in data.chunks() {
            list.add(*chunk.range());
        }
        list.resolve_eof(file_len);

        let entry = if list.contains_whole_file() {
            if let Err(e) = fs::rename(&paths.partial, &paths.whole) {
                warn!(fingerprint = %fingerprint, error = %e, "failed to promote partial file");
                return;
            }
            remove_if_present(&paths.ranges);
            debug!(fingerprint = %fingerprint, size = file_len, "file complete on disk");
            DiskEntry::Whole
        } else {
            if let Err(e) = write_ranges(&paths, &list) {
                warn!(fingerprint = %fingerprint, error = %e, "failed to write ranges file");
                return;
            }
            DiskEntry::Partial(list)
        };

        if writer.insert_with(*fingerprint, file_len, || entry.clone()) {
            return;
        }
        if let Some(slot) = writer.get_mut(fingerprint) {
            *slot = entry;
        }
        writer.update(fingerprint, file_len);
    }
}

fn read_range(path: &Path, range: &Range) -> io::Result<(Vec<u8>, u64)> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let start = range.start().min(file_len);
    let end = if range.goes_to_eof() {
        file_len
    } else {
        range.end_byte().min(file_len)
    };
    file.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; (end - start) as usize];
    file.read_exact(&mut buf)?;
    Ok((buf, file_len))
}

fn write_chunks(path: &Path, data: &SparseData) -> io::Result<u64> {
    let mut file = OpenOptions::new().create(true).truncate(false).write(true).open(path)?;
    for chunk in data.chunks() {
        file.seek(SeekFrom::Start(chunk.start()))?;
        file.write_all(chunk.bytes())?;
    }
    file.flush()?;
    Ok(file.metadata()?.len())
}

fn write_ranges(paths: &FilePaths, list: &RangeList) -> io::Result<()> {
    fs::write(&paths.ranges_temp, format_range_list(list))?;
    fs::rename(&paths.ranges_temp, &paths.ranges)
}

impl CacheLayer for DiskCacheLayer {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn lookup<'a>(&'a self, id: &'a RemoteFileId, range: &'a Range) -> BoxFuture<'a, Option<SparseData>> {
        let fingerprint = &id.fingerprint;
        Box::pin(async move {
            let inner = Arc::clone(&self.inner);
            let (fp, r) = (*fingerprint, *range);
            tokio::task::spawn_blocking(move || Self::read_sync(&inner, &fp, &r))
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "disk read task failed");
                    None
                })
        })
    }

    fn store<'a>(&'a self, fingerprint: &'a Fingerprint, data: &'a SparseData) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let inner = Arc::clone(&self.inner);
            let (fp, data) = (*fingerprint, data.clone());
            if let Err(e) =
                tokio::task::spawn_blocking(move || Self::write_sync(&inner, &fp, &data)).await
            {
                warn!(error = %e, "disk write task failed");
            }
        })
    }

    fn purge<'a>(&'a self, fingerprint: &'a Fingerprint) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let inner = Arc::clone(&self.inner);
            let fp = *fingerprint;
            tokio::task::spawn_blocking(move || inner.map.write().erase(&fp))
                .await
                .unwrap_or(false)
        })
    }

    fn holds(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.map.read().contains(fingerprint)
    }

    fn stats(&self) -> LayerStats {
        LayerStats {
            entries: self.inner.map.len(),
            bytes: self.inner.map.used_bytes(),
            capacity: self.inner.map.policy().total_size(),
        }
    }
}
