// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! In-memory object store with injectable faults and a put gate

use async_trait::async_trait;
use futures::stream::BoxStream;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{
    GetOptions, GetResult, ListResult, ObjectMeta, ObjectStore, PutMultipartOptions, PutOptions,
    PutPayload, PutResult, Result as ObjectStoreResult,
};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

const STORE_NAME: &str = "ControlledStore";

/// Wraps `InMemory`; deletes under `failing_prefix` fail and every put
/// waits for a permit on `put_gate` when one is set
#[derive(Debug, Default)]
pub(crate) struct ControlledStore {
    inner: InMemory,
    failing_prefix: Option<String>,
    put_gate: Option<Arc<Semaphore>>,
    puts_started: AtomicUsize,
}

impl ControlledStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_deletes_under(mut self, prefix: &str) -> Self {
        self.failing_prefix = Some(prefix.to_string());
        self
    }

    /// Hold every put until a permit is added to `gate`
    pub(crate) fn gated_puts(mut self, gate: Arc<Semaphore>) -> Self {
        self.put_gate = Some(gate);
        self
    }

    /// Puts that have been called, held or not
    pub(crate) fn puts_started(&self) -> usize {
        self.puts_started.load(Ordering::SeqCst)
    }

    fn injected(message: String) -> object_store::Error {
        object_store::Error::Generic {
            store: STORE_NAME,
            source: message.into(),
        }
    }
}

impl fmt::Display for ControlledStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{STORE_NAME}")
    }
}

#[async_trait]
impl ObjectStore for ControlledStore {
    async fn put_opts(
        &self,
        location: &ObjectPath,
        payload: PutPayload,
        opts: PutOptions,
    ) -> ObjectStoreResult<PutResult> {
        _ = self.puts_started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.put_gate {
            gate.acquire()
                .await
                .map_err(|_| Self::injected(format!("gate closed before {location}")))?
                .forget();
        }
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &ObjectPath,
        opts: PutMultipartOptions,
    ) -> ObjectStoreResult<Box<dyn object_store::MultipartUpload>> {
        self.inner.put_multipart_opts(location, opts).await
    }

    async fn get_opts(
        &self,
        location: &ObjectPath,
        options: GetOptions,
    ) -> ObjectStoreResult<GetResult> {
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &ObjectPath) -> ObjectStoreResult<()> {
        if let Some(prefix) = &self.failing_prefix {
            if location.as_ref().starts_with(prefix.as_str()) {
                return Err(Self::injected(format!("refusing to delete {location}")));
            }
        }
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&ObjectPath>) -> BoxStream<'static, ObjectStoreResult<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(
        &self,
        prefix: Option<&ObjectPath>,
    ) -> ObjectStoreResult<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &ObjectPath, to: &ObjectPath) -> ObjectStoreResult<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(
        &self,
        from: &ObjectPath,
        to: &ObjectPath,
    ) -> ObjectStoreResult<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}
