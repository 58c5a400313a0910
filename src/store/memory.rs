//! In-memory content backend.

use std::sync::Mutex;

use async_trait::async_trait;
use http::StatusCode;

use super::{
    ContentBackend, FileUpdate, RemoteFile, RemoteReadSnafu, RemoteWriteSnafu, Revision,
    StoreError,
};

/// A [`ContentBackend`] that keeps the file in memory.
///
/// Applies the same revision preconditions as the remote store, so it can
/// stand in for it during local development and tests. A few knobs allow
/// injecting failures.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    file: Option<RemoteFile>,
    next_revision: u64,
    fail_reads: Option<StatusCode>,
    reject_writes: Option<String>,
    messages: Vec<String>,
}

impl Inner {
    fn bump(&mut self) -> Revision {
        self.next_revision += 1;
        Revision::from(format!("mem-{:08x}", self.next_revision))
    }
}

impl MemoryBackend {
    /// Replace the file content behind the store's back, creating a new revision.
    pub fn set_content(&self, content: Vec<u8>) -> Revision {
        let mut inner = self.inner.lock().expect("poisoned");
        let revision = inner.bump();
        inner.file = Some(RemoteFile {
            content,
            revision: revision.clone(),
        });
        revision
    }

    /// The current raw file content, if the file exists.
    pub fn raw_content(&self) -> Option<Vec<u8>> {
        let inner = self.inner.lock().expect("poisoned");
        inner.file.as_ref().map(|f| f.content.clone())
    }

    /// Make every read fail with `status`, or stop doing so with `None`.
    pub fn fail_reads_with(&self, status: Option<StatusCode>) {
        self.inner.lock().expect("poisoned").fail_reads = status;
    }

    /// Reject every write with `message`, or stop doing so with `None`.
    pub fn reject_writes_with(&self, message: Option<String>) {
        self.inner.lock().expect("poisoned").reject_writes = message;
    }

    /// Messages of all accepted writes, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.inner.lock().expect("poisoned").messages.clone()
    }
}

#[async_trait]
impl ContentBackend for MemoryBackend {
    async fn get_file(&self) -> Result<Option<RemoteFile>, StoreError> {
        let inner = self.inner.lock().expect("poisoned");
        if let Some(status) = inner.fail_reads {
            return RemoteReadSnafu { status }.fail();
        }
        Ok(inner.file.clone())
    }

    async fn put_file(&self, update: FileUpdate) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("poisoned");
        if let Some(message) = inner.reject_writes.clone() {
            return RemoteWriteSnafu {
                status: Some(StatusCode::FORBIDDEN),
                message,
                conflict: false,
            }
            .fail();
        }

        let current = inner.file.as_ref().map(|f| &f.revision);
        if current != update.revision.as_ref() {
            let message = match (current, &update.revision) {
                (Some(_), None) => "\"sha\" wasn't supplied.".to_string(),
                (current, expected) => format!(
                    "file is at {} but expected {}",
                    current.map(Revision::as_str).unwrap_or("<none>"),
                    expected.as_ref().map(Revision::as_str).unwrap_or("<none>"),
                ),
            };
            return RemoteWriteSnafu {
                status: Some(StatusCode::CONFLICT),
                message,
                conflict: true,
            }
            .fail();
        }

        let revision = inner.bump();
        inner.file = Some(RemoteFile {
            content: update.content,
            revision,
        });
        inner.messages.push(update.message);
        Ok(())
    }
}
