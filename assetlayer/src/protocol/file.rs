//! `file://` protocol handler.
//!
//! Serves downloads, uploads and names from the local filesystem, which makes
//! a directory usable as a service (a shared mount, a test fixture, an
//! offline mirror).
//!
//! Names live in a `names` index file next to the named path. Each line maps
//! a file name to a content URI; the last line for a name wins and an empty
//! URI marks the name as removed:
//!
//! ```text
//! tree.mesh mhash:///9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08
//! rock.mesh mhash:///60303ae22b998861bce3b28f33eec1be758a213c86c93c076dbe9f558c11c752
//! tree.mesh
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, trace};
use url::Url;

use crate::fingerprint::RemoteFileId;
use crate::range::Range;
use crate::service::{
    DownloadHandler, Downloaded, NameLookupHandler, NameUploadHandler, ServiceError,
    ServiceParams, UploadHandler,
};
use crate::BoxFuture;

/// Name of the per-directory name index.
pub const NAMES_FILE: &str = "names";

const UPLOAD_SUFFIX: &str = ".upload";

/// Filesystem-backed implementation of every service capability.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileProtocolHandler;

impl FileProtocolHandler {
    pub fn new() -> Self {
        Self
    }
}

fn path_from_uri(uri: &Url) -> Result<PathBuf, ServiceError> {
    if uri.scheme() != "file" {
        return Err(ServiceError::Unsupported(uri.to_string()));
    }
    uri.to_file_path()
        .map_err(|_| ServiceError::General(format!("not a local path: {uri}")))
}

fn io_error(path: &Path, e: io::Error) -> ServiceError {
    match e.kind() {
        io::ErrorKind::NotFound => ServiceError::NotFound(path.display().to_string()),
        io::ErrorKind::PermissionDenied => ServiceError::Forbidden(path.display().to_string()),
        _ => ServiceError::General(format!("{}: {e}", path.display())),
    }
}

/// Runs filesystem work on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ServiceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServiceError::General(format!("file task failed: {e}")))?
}

fn read_range(path: &Path, range: Range) -> Result<Downloaded, ServiceError> {
    let mut file = File::open(path).map_err(|e| io_error(path, e))?;
    let total = file.metadata().map_err(|e| io_error(path, e))?.len();

    let start = range.start().min(total);
    let end = if range.goes_to_eof() {
        total
    } else {
        range.end_byte().min(total)
    };
    let mut buf = vec![0u8; (end - start) as usize];
    file.seek(SeekFrom::Start(start))
        .and_then(|_| file.read_exact(&mut buf))
        .map_err(|e| io_error(path, e))?;

    trace!(path = %path.display(), start, len = buf.len(), "file read");
    Ok(Downloaded {
        data: Bytes::from(buf),
        total_size: Some(total),
    })
}

fn write_file(path: &Path, data: &[u8]) -> Result<(), ServiceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let mut temp = path.as_os_str().to_owned();
    temp.push(UPLOAD_SUFFIX);
    let temp = PathBuf::from(temp);
    fs::write(&temp, data).map_err(|e| io_error(&temp, e))?;
    fs::rename(&temp, path).map_err(|e| io_error(path, e))
}

/// Splits a name path into its index file and the key within it.
fn name_index(path: &Path) -> Result<(PathBuf, String), ServiceError> {
    let key = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty() && !n.contains(char::is_whitespace))
        .ok_or_else(|| ServiceError::General(format!("invalid name: {}", path.display())))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("/"));
    Ok((dir.join(NAMES_FILE), key))
}

/// Finds the current target of `key` in a names index.
fn find_name(index: &str, key: &str) -> Option<String> {
    let mut found = None;
    for line in index.lines() {
        let mut parts = line.splitn(2, ' ');
        if parts.next() != Some(key) {
            continue;
        }
        found = parts
            .next()
            .map(str::trim)
            .filter(|target| !target.is_empty())
            .map(str::to_string);
    }
    found
}

fn lookup_name_sync(path: &Path) -> Result<RemoteFileId, ServiceError> {
    let (index_path, key) = name_index(path)?;
    let index = fs::read_to_string(&index_path).map_err(|e| io_error(&index_path, e))?;
    let target = find_name(&index, &key).ok_or_else(|| ServiceError::NotFound(key.clone()))?;
    let uri = Url::parse(&target)
        .map_err(|e| ServiceError::General(format!("bad target for {key}: {e}")))?;
    RemoteFileId::from_uri(uri).map_err(|e| ServiceError::General(format!("bad target for {key}: {e}")))
}

fn append_name_sync(path: &Path, target: &Url) -> Result<(), ServiceError> {
    let (index_path, key) = name_index(path)?;
    if let Some(parent) = index_path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&index_path)
        .map_err(|e| io_error(&index_path, e))?;
    writeln!(file, "{key} {target}").map_err(|e| io_error(&index_path, e))
}

impl DownloadHandler for FileProtocolHandler {
    fn download<'a>(
        &'a self,
        uri: &'a Url,
        _params: &'a ServiceParams,
        range: &'a Range,
    ) -> BoxFuture<'a, Result<Downloaded, ServiceError>> {
        Box::pin(async move {
            let path = path_from_uri(uri)?;
            let range = *range;
            blocking(move || read_range(&path, range)).await
        })
    }

    fn exists<'a>(
        &'a self,
        uri: &'a Url,
        _params: &'a ServiceParams,
    ) -> BoxFuture<'a, Result<bool, ServiceError>> {
        Box::pin(async move {
            let path = path_from_uri(uri)?;
            blocking(move || Ok(path.is_file())).await
        })
    }
}

impl UploadHandler for FileProtocolHandler {
    fn upload<'a>(
        &'a self,
        uri: &'a Url,
        _params: &'a ServiceParams,
        data: Bytes,
    ) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            let path = path_from_uri(uri)?;
            debug!(path = %path.display(), bytes = data.len(), "writing upload");
            blocking(move || write_file(&path, &data)).await
        })
    }

    fn remove<'a>(
        &'a self,
        uri: &'a Url,
        _params: &'a ServiceParams,
    ) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            let path = path_from_uri(uri)?;
            blocking(move || fs::remove_file(&path).map_err(|e| io_error(&path, e))).await
        })
    }
}

impl NameLookupHandler for FileProtocolHandler {
    fn lookup_name<'a>(
        &'a self,
        name: &'a Url,
        _params: &'a ServiceParams,
    ) -> BoxFuture<'a, Result<RemoteFileId, ServiceError>> {
        Box::pin(async move {
            let path = path_from_uri(name)?;
            blocking(move || lookup_name_sync(&path)).await
        })
    }
}

impl NameUploadHandler for FileProtocolHandler {
    fn upload_name<'a>(
        &'a self,
        name: &'a Url,
        _params: &'a ServiceParams,
        target: &'a RemoteFileId,
    ) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            let path = path_from_uri(name)?;
            let target = target.uri.clone();
            blocking(move || append_name_sync(&path, &target)).await
        })
    }
}
