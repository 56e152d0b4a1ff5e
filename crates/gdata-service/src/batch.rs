//! Several queries, insertions, updates and deletions in one request.
//!
//! Operations are queued on a [`BatchOperation`], each receiving an id
//! starting at 1. [`run`](BatchOperation::run) posts them as one feed to the
//! batch URI, matches the response entries back to the operations by
//! `batch:id`, and reports one [`BatchOutcome`] per operation in the order
//! they were added. Callbacks fire in that same order, once each, before
//! `run` returns.

use std::collections::HashMap;
use std::fmt;

use chrono::Utc;
use gdata_core::parsable::parse_int;
use gdata_core::xml::{XmlElement, ns, parse_document};
use gdata_core::{
    BatchOperationType, BoxFuture, Cancellable, EntryType, Error, Feed, Parsable, Result,
};
use gdata_transport::http::{ATOM_CONTENT_TYPE, Method};
use gdata_transport::{AuthorizationDomain, HttpRequest, OperationType};
use tracing::{debug, warn};

use crate::service::{Service, run_blocking};

/// Called with the outcome of one operation.
pub type BatchCallback<E> = Box<dyn FnOnce(&BatchOutcome<E>) + Send>;

/// The result of one operation of a batch.
#[derive(Debug)]
pub struct BatchOutcome<E> {
    pub id: u32,
    pub operation: BatchOperationType,
    /// The server's entry on success; `None` for deletions.
    pub result: Result<Option<E>>,
}

enum Payload<E> {
    Query(String),
    Entry(E),
}

struct Record<E> {
    id: u32,
    operation: BatchOperationType,
    payload: Payload<E>,
    callback: Option<BatchCallback<E>>,
}

/// A queue of operations sent to a feed's batch URI in one request.
pub struct BatchOperation<E: EntryType> {
    service: Service,
    domain: Option<AuthorizationDomain>,
    feed_uri: String,
    records: Vec<Record<E>>,
    next_id: u32,
}

impl<E: EntryType> fmt::Debug for BatchOperation<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOperation")
            .field("domain", &self.domain)
            .field("feed_uri", &self.feed_uri)
            .field("operations", &self.records.len())
            .finish_non_exhaustive()
    }
}

impl Service {
    /// Starts a batch against `batch_uri`, usually a feed's
    /// [`batch_link`](Feed::batch_link).
    pub fn batch_operation<E: EntryType>(
        &self,
        domain: Option<&AuthorizationDomain>,
        batch_uri: &str,
    ) -> BatchOperation<E> {
        BatchOperation::new(self.clone(), domain.cloned(), batch_uri)
    }
}

impl<E: EntryType> BatchOperation<E> {
    pub fn new(
        service: Service,
        domain: Option<AuthorizationDomain>,
        feed_uri: impl Into<String>,
    ) -> Self {
        Self {
            service,
            domain,
            feed_uri: feed_uri.into(),
            records: Vec::new(),
            next_id: 1,
        }
    }

    pub fn feed_uri(&self) -> &str {
        &self.feed_uri
    }

    pub fn domain(&self) -> Option<&AuthorizationDomain> {
        self.domain.as_ref()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn push(&mut self, operation: BatchOperationType, payload: Payload<E>) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.records.push(Record {
            id,
            operation,
            payload,
            callback: None,
        });
        id
    }

    /// Queues a fetch of the entry with the given id.
    pub fn add_query(&mut self, entry_id: impl Into<String>) -> u32 {
        self.push(BatchOperationType::Query, Payload::Query(entry_id.into()))
    }

    /// Queues an insertion.
    ///
    /// # Errors
    ///
    /// Returns entry-already-inserted if `entry` has an id.
    pub fn add_insertion(&mut self, entry: E) -> Result<u32> {
        if entry.entry().is_inserted() {
            return Err(Error::entry_already_inserted());
        }
        Ok(self.push(BatchOperationType::Insertion, Payload::Entry(entry)))
    }

    /// Queues an update. The entry should carry its ETag.
    pub fn add_update(&mut self, entry: E) -> u32 {
        self.push(BatchOperationType::Update, Payload::Entry(entry))
    }

    /// Queues a deletion.
    pub fn add_deletion(&mut self, entry: E) -> u32 {
        self.push(BatchOperationType::Deletion, Payload::Entry(entry))
    }

    /// Sets the callback of operation `id`, replacing any earlier one.
    ///
    /// Returns false if there is no such operation.
    pub fn set_callback<F>(&mut self, id: u32, callback: F) -> bool
    where
        F: FnOnce(&BatchOutcome<E>) + Send + 'static,
    {
        match self.records.iter_mut().find(|record| record.id == id) {
            Some(record) => {
                record.callback = Some(Box::new(callback));
                true
            }
            None => false,
        }
    }

    fn request_feed(&self) -> Feed<E> {
        let mut feed = Feed::new(
            "batch1",
            Some("Batch operation feed".to_string()),
            Utc::now(),
        );
        for record in &self.records {
            let mut entry = match record.payload {
                Payload::Query(ref id) => {
                    let mut entry = E::default();
                    entry.entry_mut().set_id(Some(id.clone()));
                    entry
                }
                Payload::Entry(ref entry) => entry.clone(),
            };
            entry
                .entry_mut()
                .set_batch_data(record.id, record.operation);
            feed.push_entry(entry);
        }
        feed
    }

    /// Sends every queued operation and waits for the results.
    ///
    /// Per-operation failures are reported in the outcomes. If the batch as
    /// a whole fails, every callback receives a copy of that error and the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Returns the classified error of a failed batch request, a parse error
    /// for a malformed response, a protocol error if the response names an
    /// operation that was not sent, or `cancelled`.
    pub fn run(self, cancellable: &Cancellable) -> Result<Vec<BatchOutcome<E>>> {
        let results = self.send(cancellable);
        let Self { records, .. } = self;
        let mut results = match results {
            Ok(results) => results,
            Err(err) => {
                for record in records {
                    let outcome = BatchOutcome {
                        id: record.id,
                        operation: record.operation,
                        result: Err(copy_error(&err)),
                    };
                    if let Some(callback) = record.callback {
                        callback(&outcome);
                    }
                }
                return Err(err);
            }
        };

        let outcomes = records
            .into_iter()
            .map(|record| {
                let result = results.remove(&record.id).unwrap_or_else(|| {
                    warn!(id = record.id, "No result for batch operation");
                    Err(Error::protocol(
                        "The server returned no result for this operation.",
                    ))
                });
                let outcome = BatchOutcome {
                    id: record.id,
                    operation: record.operation,
                    result,
                };
                if let Some(callback) = record.callback {
                    callback(&outcome);
                }
                outcome
            })
            .collect();
        Ok(outcomes)
    }

    /// Runs [`run`](Self::run) on the blocking pool.
    ///
    /// Callbacks fire on the pool thread.
    pub fn run_async(self, cancellable: Cancellable) -> BoxFuture<'static, Result<Vec<BatchOutcome<E>>>> {
        run_blocking(move || self.run(&cancellable))
    }

    fn send(&self, cancellable: &Cancellable) -> Result<HashMap<u32, Result<Option<E>>>> {
        cancellable.check()?;
        let mut request = HttpRequest::parse(Method::POST, &self.feed_uri)?;
        request.set_body(ATOM_CONTENT_TYPE, self.request_feed().to_xml())?;
        debug!(uri = %self.feed_uri, operations = self.records.len(), "Running batch operation");

        let context = self.service.stream_context(self.domain.as_ref());
        let mut response = context.send(request, cancellable)?;
        if !response.is_success() {
            return Err(self.service.error(OperationType::Batch, response));
        }
        self.dispatch(&response.read_text()?)
    }

    /// Matches the entries of a response feed to the queued operations.
    fn dispatch(&self, body: &str) -> Result<HashMap<u32, Result<Option<E>>>> {
        let root = parse_document(body)?;
        if !root.is(ns::ATOM, "feed") {
            return Err(Error::protocol(format!(
                "Expected a batch response feed but found <{}>.",
                root.qualified_name()
            )));
        }

        let operations: HashMap<u32, BatchOperationType> = self
            .records
            .iter()
            .map(|record| (record.id, record.operation))
            .collect();
        let mut results = HashMap::new();
        for child in root.child_elements().filter(|c| c.is(ns::ATOM, "entry")) {
            let (id, status) = batch_markers(child)?;
            let Some(&operation) = operations.get(&id) else {
                return Err(Error::protocol(format!(
                    "The server returned a result for unknown batch operation {id}."
                )));
            };
            if results.contains_key(&id) {
                return Err(Error::protocol(format!(
                    "The server returned more than one result for batch operation {id}."
                )));
            }
            let result = self.entry_result(child, status, operation)?;
            results.insert(id, result);
        }
        debug!(results = results.len(), "Parsed batch response");
        Ok(results)
    }

    fn entry_result(
        &self,
        entry: &XmlElement,
        status: &XmlElement,
        operation: BatchOperationType,
    ) -> Result<Result<Option<E>>> {
        let code: u16 = match status.attribute("code") {
            Some(code) => parse_int(status, code, "@code")?,
            None => {
                return Err(Error::required_content_missing(
                    &status.qualified_name(),
                    "@code",
                    Some(status.offset),
                ));
            }
        };
        if !(200..300).contains(&code) {
            let reason = status.attribute("reason").unwrap_or_default();
            return Ok(Err(self.service.error_parser().parse_error_response(
                operation_type(operation),
                code,
                reason,
                status.inner_raw(),
            )));
        }
        if operation == BatchOperationType::Deletion {
            return Ok(Ok(None));
        }
        Ok(Ok(Some(E::from_element(entry)?)))
    }
}

/// Finds the `batch:id` and `batch:status` of a response entry.
fn batch_markers(entry: &XmlElement) -> Result<(u32, &XmlElement)> {
    let id = entry
        .child_elements()
        .find(|child| child.is(ns::BATCH, "id"))
        .ok_or_else(|| Error::required_element_missing("batch:id", "entry"))?;
    let status = entry
        .child_elements()
        .find(|child| child.is(ns::BATCH, "status"))
        .ok_or_else(|| Error::required_element_missing("batch:status", "entry"))?;
    let text = id.text();
    Ok((parse_int(id, text.trim(), "content")?, status))
}

fn operation_type(operation: BatchOperationType) -> OperationType {
    match operation {
        BatchOperationType::Query => OperationType::Query,
        BatchOperationType::Insertion => OperationType::Insertion,
        BatchOperationType::Update => OperationType::Update,
        BatchOperationType::Deletion => OperationType::Deletion,
    }
}

fn copy_error(err: &Error) -> Error {
    let copy = Error::new(err.kind(), err.message());
    match err.status() {
        Some(status) => copy.with_status(status),
        None => copy,
    }
}
