//! Batch operation reader
//!
//! One batch call sends N documents and receives a stream of N results,
//! one value per input, in input order. The reader is a pull-based,
//! exactly-once cursor over that stream: each `read` advances one slot and
//! yields either the slot's metadata or the slot's application error. One
//! item's failure never blocks its siblings; a malformed outer stream is
//! fatal on the first read. After the N-th result every further read
//! returns [`SanchayaError::NoMoreDocuments`].
//!
//! A reader is one cursor over one response body and is not meant to be
//! shared; readers from different calls are fully independent.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::codec::{Encoding, ValueDecoder};
use crate::error::{SanchayaError, SanchayaResult, ServerError};
use crate::models::DocumentMeta;
use crate::transport::{Body, RawResponse};

pub struct BatchReader {
    decoder: ValueDecoder,
    body: Body,
    expected: usize,
    consumed: usize,
}

impl BatchReader {
    pub(crate) fn new(response: RawResponse, encoding: Encoding, expected: usize) -> Self {
        Self {
            decoder: ValueDecoder::new(encoding),
            body: response.into_body(),
            expected,
            consumed: 0,
        }
    }

    /// Total number of results this reader will deliver. Stable for the
    /// reader's lifetime regardless of how many have been consumed.
    pub fn len(&self) -> usize {
        self.expected
    }

    pub fn is_empty(&self) -> bool {
        self.expected == 0
    }

    /// Advance to the next result and return its metadata.
    ///
    /// A failed slot yields `Err(SanchayaError::Api(_))` and still advances
    /// the cursor. Exhaustion yields `Err(SanchayaError::NoMoreDocuments)`.
    pub async fn read(&mut self) -> SanchayaResult<DocumentMeta> {
        let value = self.next_item().await?;
        decode_meta(&value)
    }

    /// Advance to the next result, deserializing the whole result value
    /// (the document itself on lookup batches) into `out`.
    pub async fn read_into<T: DeserializeOwned>(
        &mut self,
        out: &mut T,
    ) -> SanchayaResult<DocumentMeta> {
        let value = self.next_item().await?;
        let meta = decode_meta(&value)?;
        *out = serde_json::from_value(value)
            .map_err(|e| SanchayaError::Protocol(format!("unexpected document shape: {e}")))?;
        Ok(meta)
    }

    /// Advance to the next result, extracting the `old` and/or `new`
    /// document bodies into caller-supplied targets. Each item gets its own
    /// targets; interleaved old/new reads off one stream never clobber each
    /// other.
    pub async fn read_with<O, N>(
        &mut self,
        old: Option<&mut O>,
        new: Option<&mut N>,
    ) -> SanchayaResult<DocumentMeta>
    where
        O: DeserializeOwned,
        N: DeserializeOwned,
    {
        let mut value = self.next_item().await?;
        let meta = decode_meta(&value)?;
        if let Some(out) = old {
            *out = take_embedded(&mut value, "old")?;
        }
        if let Some(out) = new {
            *out = take_embedded(&mut value, "new")?;
        }
        Ok(meta)
    }

    /// Drain the reader, collecting a metadata vector and a parallel error
    /// vector matching input order 1:1. Error slots hold default metadata;
    /// success slots hold `None` in the error vector.
    pub async fn read_all(
        &mut self,
    ) -> SanchayaResult<(Vec<DocumentMeta>, Vec<Option<ServerError>>)> {
        let mut metas = Vec::with_capacity(self.expected - self.consumed);
        let mut errors = Vec::with_capacity(self.expected - self.consumed);
        loop {
            match self.read().await {
                Ok(meta) => {
                    metas.push(meta);
                    errors.push(None);
                }
                Err(SanchayaError::NoMoreDocuments) => break,
                Err(SanchayaError::Api(server_error)) => {
                    metas.push(DocumentMeta::default());
                    errors.push(Some(server_error));
                }
                Err(fatal) => return Err(fatal),
            }
        }
        Ok((metas, errors))
    }

    /// Pull the next raw result value, mapping error-shaped values to
    /// per-item application errors. Protocol failures do not advance the
    /// cursor.
    async fn next_item(&mut self) -> SanchayaResult<Value> {
        if self.consumed >= self.expected {
            return Err(SanchayaError::NoMoreDocuments);
        }

        let value = loop {
            if let Some(value) = self.decoder.try_next()? {
                break value;
            }
            match self.body.chunk().await? {
                Some(chunk) => self.decoder.feed(&chunk),
                None => {
                    return Err(SanchayaError::Protocol(format!(
                        "result stream ended after {} of {} items",
                        self.consumed, self.expected
                    )))
                }
            }
        };

        self.consumed += 1;
        if self.consumed == self.expected {
            // All results delivered; release the connection eagerly.
            self.body.close();
        }

        if value.get("error").and_then(Value::as_bool) == Some(true) {
            let server_error =
                serde_json::from_value::<ServerError>(value.clone()).unwrap_or(ServerError {
                    error: true,
                    code: 500,
                    error_num: 0,
                    error_message: value.to_string(),
                });
            return Err(SanchayaError::Api(server_error));
        }
        Ok(value)
    }
}

fn decode_meta(value: &Value) -> SanchayaResult<DocumentMeta> {
    serde_json::from_value(value.clone())
        .map_err(|e| SanchayaError::Protocol(format!("unexpected result item: {e}")))
}

fn take_embedded<T: DeserializeOwned>(value: &mut Value, field: &str) -> SanchayaResult<T> {
    let embedded = value
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| SanchayaError::Protocol(format!("server did not return `{field}` document")))?;
    serde_json::from_value(embedded)
        .map_err(|e| SanchayaError::Protocol(format!("unexpected `{field}` document: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde::Deserialize;
    use serde_json::json;

    fn reader_over(items: &[Value], expected: usize) -> BatchReader {
        let mut body = Vec::new();
        for item in items {
            body.extend_from_slice(item.to_string().as_bytes());
            body.push(b'\n');
        }
        BatchReader::new(
            RawResponse::from_parts(201, Bytes::from(body)),
            Encoding::Json,
            expected,
        )
    }

    fn meta_item(key: &str, rev: &str) -> Value {
        json!({"_id": format!("parts/{key}"), "_key": key, "_rev": rev})
    }

    fn error_item(code: u16, num: i64, message: &str) -> Value {
        json!({"error": true, "code": code, "errorNum": num, "errorMessage": message})
    }

    #[tokio::test]
    async fn test_len_is_stable_across_consumption() {
        let mut reader = reader_over(&[meta_item("a", "_r1"), meta_item("b", "_r2")], 2);
        assert_eq!(reader.len(), 2);
        reader.read().await.unwrap();
        assert_eq!(reader.len(), 2);
        reader.read().await.unwrap();
        assert_eq!(reader.len(), 2);
    }

    #[tokio::test]
    async fn test_exactly_n_reads_then_sentinel() {
        let items = [
            meta_item("a", "_r1"),
            meta_item("b", "_r2"),
            meta_item("c", "_r3"),
        ];
        let mut reader = reader_over(&items, 3);
        for key in ["a", "b", "c"] {
            let meta = reader.read().await.unwrap();
            assert_eq!(meta.key, key);
        }
        let err = reader.read().await.unwrap_err();
        assert!(err.is_no_more_documents());
        // And again: the sentinel is stable.
        assert!(reader.read().await.unwrap_err().is_no_more_documents());
    }

    #[tokio::test]
    async fn test_per_item_error_does_not_block_siblings() {
        let items = [
            meta_item("a", "_r1"),
            error_item(404, 1202, "document not found"),
            meta_item("c", "_r3"),
        ];
        let mut reader = reader_over(&items, 3);

        assert_eq!(reader.read().await.unwrap().key, "a");
        let err = reader.read().await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(reader.read().await.unwrap().key, "c");
        assert!(reader.read().await.unwrap_err().is_no_more_documents());
    }

    #[tokio::test]
    async fn test_read_all_parallel_slices() {
        let items = [
            meta_item("a", "_r1"),
            error_item(404, 1202, "document not found"),
            meta_item("c", "_r3"),
        ];
        let mut reader = reader_over(&items, 3);
        let (metas, errors) = reader.read_all().await.unwrap();

        assert_eq!(metas.len(), 3);
        assert_eq!(errors.len(), 3);
        assert_eq!(metas[0].key, "a");
        assert!(errors[0].is_none());
        assert_eq!(metas[1], DocumentMeta::default());
        assert_eq!(errors[1].as_ref().unwrap().error_num, 1202);
        assert_eq!(metas[2].key, "c");
        assert!(errors[2].is_none());
    }

    #[tokio::test]
    async fn test_malformed_envelope_fatal_on_first_read() {
        let body = Bytes::from_static(b"this is not a result stream{");
        let mut reader = BatchReader::new(
            RawResponse::from_parts(201, body),
            Encoding::Json,
            2,
        );
        let err = reader.read().await.unwrap_err();
        assert!(matches!(err, SanchayaError::Protocol(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_truncated_stream_is_fatal_not_sentinel() {
        let mut reader = reader_over(&[meta_item("a", "_r1")], 3);
        reader.read().await.unwrap();
        let err = reader.read().await.unwrap_err();
        assert!(matches!(err, SanchayaError::Protocol(_)));
        assert!(!err.is_no_more_documents());
    }

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Part {
        #[serde(default)]
        name: String,
        #[serde(default)]
        qty: i64,
    }

    #[tokio::test]
    async fn test_read_with_fills_separate_targets_per_item() {
        let items = [
            json!({"_id": "parts/a", "_key": "a", "_rev": "_r2", "_oldRev": "_r1",
                   "old": {"name": "bolt", "qty": 1}, "new": {"name": "bolt", "qty": 5}}),
            json!({"_id": "parts/b", "_key": "b", "_rev": "_r4", "_oldRev": "_r3",
                   "old": {"name": "nut", "qty": 2}, "new": {"name": "nut", "qty": 6}}),
        ];
        let mut reader = reader_over(&items, 2);

        let mut old_a = Part::default();
        let mut new_a = Part::default();
        let meta_a = reader
            .read_with(Some(&mut old_a), Some(&mut new_a))
            .await
            .unwrap();

        let mut old_b = Part::default();
        let mut new_b = Part::default();
        let meta_b = reader
            .read_with(Some(&mut old_b), Some(&mut new_b))
            .await
            .unwrap();

        assert_eq!(meta_a.key, "a");
        assert_eq!(meta_a.old_rev.as_deref(), Some("_r1"));
        assert_eq!(old_a, Part { name: "bolt".into(), qty: 1 });
        assert_eq!(new_a, Part { name: "bolt".into(), qty: 5 });
        assert_eq!(meta_b.key, "b");
        assert_eq!(old_b, Part { name: "nut".into(), qty: 2 });
        assert_eq!(new_b, Part { name: "nut".into(), qty: 6 });
    }

    #[tokio::test]
    async fn test_read_with_missing_body_is_protocol_error() {
        let mut reader = reader_over(&[meta_item("a", "_r1")], 1);
        let mut new = Part::default();
        let err = reader
            .read_with::<Part, Part>(None, Some(&mut new))
            .await
            .unwrap_err();
        assert!(matches!(err, SanchayaError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_read_into_yields_document_and_meta() {
        let items = [
            json!({"_id": "parts/a", "_key": "a", "_rev": "_r1", "name": "bolt", "qty": 7}),
        ];
        let mut reader = reader_over(&items, 1);
        let mut part = Part::default();
        let meta = reader.read_into(&mut part).await.unwrap();
        assert_eq!(meta.rev, "_r1");
        assert_eq!(part, Part { name: "bolt".into(), qty: 7 });
    }

    #[tokio::test]
    async fn test_pack_encoded_stream() {
        use crate::codec::pack;
        let mut body = Vec::new();
        body.extend_from_slice(&pack::encode(&meta_item("a", "_r1")));
        body.extend_from_slice(&pack::encode(&error_item(409, 1200, "conflict")));
        let mut reader = BatchReader::new(
            RawResponse::from_parts(201, Bytes::from(body)),
            Encoding::Pack,
            2,
        );

        assert_eq!(reader.read().await.unwrap().key, "a");
        assert!(reader.read().await.unwrap_err().is_conflict());
        assert!(reader.read().await.unwrap_err().is_no_more_documents());
    }
}
