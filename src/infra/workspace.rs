//! Filesystem-backed workspace.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use url::Url;
use walkdir::{DirEntry, WalkDir};

use crate::application::preview::{ContextError, Workspace};

use super::error::InfraError;

const SOURCE: &str = "infra::workspace";

/// Workspace folders on disk plus the buffers the host currently has open.
#[derive(Debug, Default)]
pub struct FsWorkspace {
    roots: Vec<PathBuf>,
    open: DashMap<String, String>,
}

impl FsWorkspace {
    /// Workspace over `roots`. Each root must be an existing directory.
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Result<Self, InfraError> {
        let roots = roots
            .into_iter()
            .map(|root| {
                let root = root.canonicalize()?;
                if root.is_dir() {
                    Ok(root)
                } else {
                    Err(InfraError::workspace(format!(
                        "`{}` is not a directory",
                        root.display()
                    )))
                }
            })
            .collect::<Result<Vec<_>, InfraError>>()?;

        Ok(Self {
            roots,
            open: DashMap::new(),
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Track in-memory contents for `uri`; they shadow the file on disk.
    pub fn open_buffer(&self, uri: &Url, text: impl Into<String>) {
        self.open.insert(uri.as_str().to_string(), text.into());
    }

    pub fn close_buffer(&self, uri: &Url) {
        self.open.remove(uri.as_str());
    }

    /// Innermost root containing `path`.
    fn root_for(&self, path: &Path) -> Option<&Path> {
        self.roots
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .map(PathBuf::as_path)
    }
}

fn local_path(uri: &Url) -> Option<PathBuf> {
    (uri.scheme() == "file")
        .then(|| uri.to_file_path().ok())
        .flatten()
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn enumerate(root: &Path, extension: &str) -> Result<Vec<PathBuf>, walkdir::Error> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry))
    {
        let entry = entry?;
        let matches = entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .is_some_and(|ext| ext == extension);
        if matches {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

#[async_trait]
impl Workspace for FsWorkspace {
    fn folder_for(&self, uri: &Url) -> Option<Url> {
        let path = local_path(uri)?;
        let root = self.root_for(&path)?;
        Url::from_directory_path(root).ok()
    }

    async fn find_documents(&self, folder: &Url, extension: &str) -> Result<Vec<Url>, ContextError> {
        let enumerate_error = |message: String| ContextError::Enumerate {
            folder: folder.to_string(),
            message,
        };

        let root = local_path(folder)
            .ok_or_else(|| enumerate_error("not a local folder".to_string()))?;
        let extension = extension.to_string();
        let paths = tokio::task::spawn_blocking(move || enumerate(&root, &extension))
            .await
            .map_err(|err| enumerate_error(err.to_string()))?
            .map_err(|err| enumerate_error(err.to_string()))?;

        debug!(target = SOURCE, folder = %folder, count = paths.len(), "Workspace enumerated");

        Ok(paths
            .into_iter()
            .filter_map(|path| Url::from_file_path(path).ok())
            .collect())
    }

    fn open_text(&self, uri: &Url) -> Option<String> {
        self.open.get(uri.as_str()).map(|entry| entry.value().clone())
    }

    async fn read_text(&self, uri: &Url) -> Result<String, ContextError> {
        let path = local_path(uri).ok_or_else(|| ContextError::read(uri, "not a local file"))?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| ContextError::read(uri, err))
    }

    fn relative_id(&self, uri: &Url) -> String {
        let Some(path) = local_path(uri) else {
            return uri.to_string();
        };
        match self
            .root_for(&path)
            .and_then(|root| path.strip_prefix(root).ok())
        {
            Some(relative) => relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            None => path.to_string_lossy().replace('\\', "/"),
        }
    }
}
