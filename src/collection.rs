//! Document operations on one collection
//!
//! Thin wrappers that assemble a request and delegate to the dispatch
//! core. Single-document calls decode one metadata record; multi-document
//! calls return a [`BatchReader`] over the streamed per-item results.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::batch::BatchReader;
use crate::client::{check_content_type, Database};
use crate::error::SanchayaResult;
use crate::models::{
    CreateOptions, DeleteOptions, DocumentMeta, ReadOptions, ReplaceOptions, UpdateOptions,
};
use crate::request::{Method, Request};
use crate::transport::RawResponse;

/// Handle for one collection. Cheap to clone; holds no connection state.
#[derive(Clone)]
pub struct Collection {
    db: Database,
    name: String,
}

impl Collection {
    pub(crate) fn new(db: Database, name: &str) -> Self {
        Self {
            db,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store one document. Returns the new metadata.
    ///
    /// For the stored (or replaced) body, use [`create_documents`]
    /// (Self::create_documents) with `return_new`/`return_old` and read the
    /// single result via [`BatchReader::read_with`].
    pub async fn create_document<T: Serialize>(
        &self,
        document: &T,
        options: &CreateOptions,
    ) -> SanchayaResult<DocumentMeta> {
        let request = options.apply(self.request(Method::POST, None));
        self.send_single(request, Some(document)).await
    }

    /// Store many documents in one call. Results stream back in input
    /// order, one per document.
    pub async fn create_documents<T: Serialize>(
        &self,
        documents: &[T],
        options: &CreateOptions,
    ) -> SanchayaResult<BatchReader> {
        let request = options.apply(self.request(Method::POST, None));
        self.send_batch(request, documents, documents.len()).await
    }

    /// Fetch one document, decoding it into `T` alongside its metadata.
    pub async fn read_document<T: DeserializeOwned>(
        &self,
        key: &str,
        options: &ReadOptions,
    ) -> SanchayaResult<(DocumentMeta, T)> {
        let request = options.apply(self.request(Method::GET, Some(key)));
        let response = self.send(request).await?;
        let value: serde_json::Value = self.db.client().decode_body(response).await?;
        let meta = serde_json::from_value(value.clone())?;
        let document = serde_json::from_value(value)?;
        Ok((meta, document))
    }

    /// Fetch many documents by key in one call.
    pub async fn read_documents<S: AsRef<str>>(
        &self,
        keys: &[S],
        options: &ReadOptions,
    ) -> SanchayaResult<BatchReader> {
        let request = options
            .apply(self.request(Method::PUT, None))
            .query("lookup", "true");
        let keys: Vec<&str> = keys.iter().map(AsRef::as_ref).collect();
        self.send_batch(request, &keys, keys.len()).await
    }

    /// Whether a document with this key exists.
    pub async fn document_exists(&self, key: &str) -> SanchayaResult<bool> {
        match self
            .read_document::<serde_json::Value>(key, &ReadOptions::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Patch one document. Attributes in `patch` overwrite stored ones.
    pub async fn update_document<T: Serialize>(
        &self,
        key: &str,
        patch: &T,
        options: &UpdateOptions,
    ) -> SanchayaResult<DocumentMeta> {
        let request = options.apply(self.request(Method::PATCH, Some(key)));
        self.send_single(request, Some(patch)).await
    }

    /// Patch many documents. Each patch must carry `_key`.
    pub async fn update_documents<T: Serialize>(
        &self,
        patches: &[T],
        options: &UpdateOptions,
    ) -> SanchayaResult<BatchReader> {
        let request = options.apply(self.request(Method::PATCH, None));
        self.send_batch(request, patches, patches.len()).await
    }

    /// Replace one document wholesale.
    pub async fn replace_document<T: Serialize>(
        &self,
        key: &str,
        document: &T,
        options: &ReplaceOptions,
    ) -> SanchayaResult<DocumentMeta> {
        let request = options.apply(self.request(Method::PUT, Some(key)));
        self.send_single(request, Some(document)).await
    }

    /// Replace many documents. Each replacement must carry `_key`.
    pub async fn replace_documents<T: Serialize>(
        &self,
        documents: &[T],
        options: &ReplaceOptions,
    ) -> SanchayaResult<BatchReader> {
        let request = options.apply(self.request(Method::PUT, None));
        self.send_batch(request, documents, documents.len()).await
    }

    /// Remove one document.
    pub async fn delete_document(
        &self,
        key: &str,
        options: &DeleteOptions,
    ) -> SanchayaResult<DocumentMeta> {
        let request = options.apply(self.request(Method::DELETE, Some(key)));
        self.send_single::<()>(request, None).await
    }

    /// Remove many documents by key in one call.
    pub async fn delete_documents<S: AsRef<str>>(
        &self,
        keys: &[S],
        options: &DeleteOptions,
    ) -> SanchayaResult<BatchReader> {
        let request = options.apply(self.request(Method::DELETE, None));
        let keys: Vec<&str> = keys.iter().map(AsRef::as_ref).collect();
        self.send_batch(request, &keys, keys.len()).await
    }

    fn request(&self, method: Method, key: Option<&str>) -> Request {
        match key {
            Some(key) => self
                .db
                .request(method, ["document", self.name.as_str(), key]),
            None => self.db.request(method, ["document", self.name.as_str()]),
        }
    }

    async fn send(&self, request: Request) -> SanchayaResult<RawResponse> {
        self.db.client().execute(request).await
    }

    async fn send_single<T: Serialize>(
        &self,
        request: Request,
        body: Option<&T>,
    ) -> SanchayaResult<DocumentMeta> {
        let request = match body {
            Some(body) => request.body_bytes(self.db.client().encoding().encode(body)?),
            None => request,
        };
        let response = self.send(request).await?;
        self.db.client().decode_body(response).await
    }

    async fn send_batch<T: Serialize>(
        &self,
        request: Request,
        body: &[T],
        expected: usize,
    ) -> SanchayaResult<BatchReader> {
        let encoding = self.db.client().encoding();
        let request = request.body_bytes(encoding.encode(body)?);
        let response = self.send(request).await?;
        check_content_type(&response, encoding)?;
        Ok(BatchReader::new(response, encoding, expected))
    }
}
