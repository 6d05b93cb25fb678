//! Workspace context collection and its single-entry, single-flight cache.

use std::{
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use futures::{
    FutureExt,
    future::{BoxFuture, Shared, try_join_all},
};
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::lock::mutex_lock;
use crate::application::render::{ContextSnapshot, SnapshotDocument};

const SOURCE: &str = "application::preview::context";

/// Identity of a document: its URI in string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&Url> for DocumentId {
    fn from(uri: &Url) -> Self {
        Self(uri.as_str().to_string())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document as the editor currently sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub uri: Url,
    pub text: String,
}

impl Document {
    pub fn new(uri: Url, text: impl Into<String>) -> Self {
        Self {
            uri,
            text: text.into(),
        }
    }

    pub fn id(&self) -> DocumentId {
        DocumentId::from(&self.uri)
    }

    /// Final path segment of the URI, used for titles.
    pub fn file_name(&self) -> &str {
        self.uri
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .unwrap_or(self.uri.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum ContextError {
    #[error("failed to enumerate workspace `{folder}`: {message}")]
    Enumerate { folder: String, message: String },
    #[error("failed to read `{uri}`: {message}")]
    Read { uri: String, message: String },
}

impl ContextError {
    pub fn read(uri: &Url, err: impl fmt::Display) -> Self {
        Self::Read {
            uri: uri.to_string(),
            message: err.to_string(),
        }
    }
}

/// Host view of the workspace: folders, documents on disk and open buffers.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// The workspace folder containing `uri`, if any.
    fn folder_for(&self, uri: &Url) -> Option<Url>;

    /// All documents under `folder` whose path ends in `.{extension}`.
    async fn find_documents(&self, folder: &Url, extension: &str) -> Result<Vec<Url>, ContextError>;

    /// In-memory contents when the document is open in the editor.
    fn open_text(&self, uri: &Url) -> Option<String>;

    /// Contents as stored on disk.
    async fn read_text(&self, uri: &Url) -> Result<String, ContextError>;

    /// Identifier the engine uses for cross-document references.
    fn relative_id(&self, uri: &Url) -> String;

    /// Current contents, preferring the open buffer.
    async fn load_text(&self, uri: &Url) -> Result<String, ContextError> {
        match self.open_text(uri) {
            Some(text) => Ok(text),
            None => self.read_text(uri).await,
        }
    }
}

/// Gather the context snapshot for `document`.
///
/// Outside any workspace folder the snapshot holds just the document itself.
/// Otherwise every matching document in the folder is included, ordered by URI.
pub async fn collect_documents(
    workspace: &dyn Workspace,
    document: &Document,
    extension: &str,
) -> Result<ContextSnapshot, ContextError> {
    let active_document_id = workspace.relative_id(&document.uri);

    let Some(folder) = workspace.folder_for(&document.uri) else {
        return Ok(ContextSnapshot {
            documents: vec![SnapshotDocument {
                id: active_document_id.clone(),
                content: document.text.clone(),
            }],
            active_document_id,
        });
    };

    let mut uris = workspace.find_documents(&folder, extension).await?;
    uris.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    uris.dedup();

    let documents = try_join_all(uris.iter().map(|uri| async move {
        let content = if *uri == document.uri {
            document.text.clone()
        } else {
            workspace.load_text(uri).await?
        };
        Ok::<_, ContextError>(SnapshotDocument {
            id: workspace.relative_id(uri),
            content,
        })
    }))
    .await?;

    Ok(ContextSnapshot {
        active_document_id,
        documents,
    })
}

type SnapshotResult = Result<Arc<ContextSnapshot>, ContextError>;
type SharedFetch = Shared<BoxFuture<'static, SnapshotResult>>;

enum EntryState {
    InFlight(SharedFetch),
    Ready(Arc<ContextSnapshot>),
}

struct CacheEntry {
    key: DocumentId,
    generation: u64,
    state: EntryState,
}

/// Memoises the context snapshot of the one tracked document.
///
/// Concurrent callers for the same document share a single fetch. Asking for a
/// different document drops the old entry before the new fetch starts. A
/// failed fetch is evicted so the next caller retries.
pub struct ContextCache {
    workspace: Arc<dyn Workspace>,
    extension: String,
    entry: Mutex<Option<CacheEntry>>,
    generation: AtomicU64,
    fetches: AtomicUsize,
}

impl ContextCache {
    pub fn new(workspace: Arc<dyn Workspace>, extension: impl Into<String>) -> Self {
        Self {
            workspace,
            extension: extension.into(),
            entry: Mutex::new(None),
            generation: AtomicU64::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn workspace(&self) -> &Arc<dyn Workspace> {
        &self.workspace
    }

    /// Key of the current entry, if any.
    pub fn key(&self) -> Option<DocumentId> {
        mutex_lock(&self.entry, SOURCE, "key")
            .as_ref()
            .map(|entry| entry.key.clone())
    }

    /// Number of fetches started since creation.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn invalidate(&self) {
        *mutex_lock(&self.entry, SOURCE, "invalidate") = None;
    }

    pub async fn get(&self, document: &Document) -> SnapshotResult {
        let key = document.id();

        let (fetch, generation) = {
            let mut slot = mutex_lock(&self.entry, SOURCE, "get");
            match slot.as_ref() {
                Some(entry) if entry.key == key => match &entry.state {
                    EntryState::Ready(snapshot) => return Ok(Arc::clone(snapshot)),
                    EntryState::InFlight(fetch) => (fetch.clone(), entry.generation),
                },
                _ => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let fetch = self.start_fetch(document.clone());
                    debug!(
                        target = SOURCE,
                        document = %key,
                        generation,
                        "Context fetch started"
                    );
                    *slot = Some(CacheEntry {
                        key,
                        generation,
                        state: EntryState::InFlight(fetch.clone()),
                    });
                    (fetch, generation)
                }
            }
        };

        let result = fetch.await;

        let mut slot = mutex_lock(&self.entry, SOURCE, "get.settle");
        let settles_current = slot
            .as_ref()
            .is_some_and(|entry| entry.generation == generation);
        if settles_current {
            match &result {
                Ok(snapshot) => {
                    if let Some(entry) = slot.as_mut() {
                        entry.state = EntryState::Ready(Arc::clone(snapshot));
                    }
                }
                Err(_) => *slot = None,
            }
        }

        result
    }

    fn start_fetch(&self, document: Document) -> SharedFetch {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let workspace = Arc::clone(&self.workspace);
        let extension = self.extension.clone();
        async move {
            collect_documents(workspace.as_ref(), &document, &extension)
                .await
                .map(Arc::new)
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tokio::sync::Notify;

    use super::*;

    /// Folder `file:///ws/` holding a fixed set of documents; reads wait on a
    /// gate when one is installed.
    struct StubWorkspace {
        disk: HashMap<String, String>,
        open: HashMap<String, String>,
        gate: Option<Arc<Notify>>,
        fail_reads: bool,
    }

    impl StubWorkspace {
        fn new(files: &[(&str, &str)]) -> Self {
            Self {
                disk: files
                    .iter()
                    .map(|(name, text)| (format!("file:///ws/{name}"), text.to_string()))
                    .collect(),
                open: HashMap::new(),
                gate: None,
                fail_reads: false,
            }
        }
    }

    #[async_trait]
    impl Workspace for StubWorkspace {
        fn folder_for(&self, uri: &Url) -> Option<Url> {
            uri.as_str()
                .starts_with("file:///ws/")
                .then(|| Url::parse("file:///ws/").expect("folder url"))
        }

        async fn find_documents(
            &self,
            _folder: &Url,
            extension: &str,
        ) -> Result<Vec<Url>, ContextError> {
            let suffix = format!(".{extension}");
            Ok(self
                .disk
                .keys()
                .filter(|uri| uri.ends_with(&suffix))
                .map(|uri| Url::parse(uri).expect("stub url"))
                .collect())
        }

        fn open_text(&self, uri: &Url) -> Option<String> {
            self.open.get(uri.as_str()).cloned()
        }

        async fn read_text(&self, uri: &Url) -> Result<String, ContextError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail_reads {
                return Err(ContextError::read(uri, "permission denied"));
            }
            self.disk
                .get(uri.as_str())
                .cloned()
                .ok_or_else(|| ContextError::read(uri, "missing"))
        }

        fn relative_id(&self, uri: &Url) -> String {
            uri.as_str()
                .strip_prefix("file:///ws/")
                .unwrap_or(uri.as_str())
                .to_string()
        }
    }

    fn doc(uri: &str, text: &str) -> Document {
        Document::new(Url::parse(uri).expect("url"), text)
    }

    #[tokio::test]
    async fn snapshot_without_folder_holds_only_the_document() {
        let workspace = StubWorkspace::new(&[("a.alt", "A")]);
        let document = doc("untitled:Untitled-1", "draft");
        let snapshot = collect_documents(&workspace, &document, "alt")
            .await
            .expect("snapshot");
        assert_eq!(snapshot.documents.len(), 1);
        assert_eq!(snapshot.documents[0].content, "draft");
        assert_eq!(snapshot.active_document_id, "untitled:Untitled-1");
    }

    #[tokio::test]
    async fn snapshot_is_sorted_and_prefers_open_buffers() {
        let mut workspace = StubWorkspace::new(&[
            ("z.alt", "Z on disk"),
            ("b/c.alt", "C on disk"),
            ("a.alt", "A on disk"),
            ("notes.txt", "ignored"),
        ]);
        workspace
            .open
            .insert("file:///ws/z.alt".into(), "Z in editor".into());

        let document = doc("file:///ws/a.alt", "A in editor");
        let snapshot = collect_documents(&workspace, &document, "alt")
            .await
            .expect("snapshot");

        let ids: Vec<&str> = snapshot.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a.alt", "b/c.alt", "z.alt"]);
        assert_eq!(snapshot.documents[0].content, "A in editor");
        assert_eq!(snapshot.documents[1].content, "C on disk");
        assert_eq!(snapshot.documents[2].content, "Z in editor");
        assert_eq!(snapshot.active_document_id, "a.alt");
    }

    #[tokio::test]
    async fn concurrent_gets_share_one_fetch() {
        let gate = Arc::new(Notify::new());
        let mut workspace = StubWorkspace::new(&[("a.alt", "A"), ("b.alt", "B")]);
        workspace.gate = Some(Arc::clone(&gate));
        let cache = ContextCache::new(Arc::new(workspace), "alt");
        let document = doc("file:///ws/a.alt", "A");

        let first = cache.get(&document);
        let second = cache.get(&document);
        let release = async {
            tokio::task::yield_now().await;
            gate.notify_waiters();
        };
        let (first, second, ()) = tokio::join!(first, second, release);

        let first = first.expect("first");
        let second = second.expect("second");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.fetch_count(), 1);

        // Resolved entries are reused without refetching.
        let third = cache.get(&document).await.expect("third");
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(cache.fetch_count(), 1);
    }

    #[tokio::test]
    async fn switching_documents_replaces_the_entry() {
        let cache = ContextCache::new(
            Arc::new(StubWorkspace::new(&[("a.alt", "A"), ("b.alt", "B")])),
            "alt",
        );
        let a = doc("file:///ws/a.alt", "A");
        let b = doc("file:///ws/b.alt", "B");

        cache.get(&a).await.expect("a");
        let snapshot = cache.get(&b).await.expect("b");
        assert_eq!(snapshot.active_document_id, "b.alt");
        assert_eq!(cache.key(), Some(b.id()));
        assert_eq!(cache.fetch_count(), 2);

        cache.get(&a).await.expect("a again");
        assert_eq!(cache.fetch_count(), 3);
    }

    #[tokio::test]
    async fn failed_fetch_is_evicted() {
        let mut workspace = StubWorkspace::new(&[("a.alt", "A"), ("b.alt", "B")]);
        workspace.fail_reads = true;
        let cache = ContextCache::new(Arc::new(workspace), "alt");
        let document = doc("file:///ws/a.alt", "A");

        let err = cache.get(&document).await.unwrap_err();
        assert!(matches!(err, ContextError::Read { .. }));
        assert_eq!(cache.key(), None);

        let _ = cache.get(&document).await;
        assert_eq!(cache.fetch_count(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_a_new_fetch() {
        let cache = ContextCache::new(Arc::new(StubWorkspace::new(&[("a.alt", "A")])), "alt");
        let document = doc("file:///ws/a.alt", "A");
        cache.get(&document).await.expect("first");
        cache.invalidate();
        cache.get(&document).await.expect("second");
        assert_eq!(cache.fetch_count(), 2);
    }

    #[test]
    fn file_name_uses_last_segment() {
        assert_eq!(doc("file:///ws/dir/note.alt", "").file_name(), "note.alt");
        assert_eq!(doc("untitled:Untitled-1", "").file_name(), "untitled:Untitled-1");
    }
}
