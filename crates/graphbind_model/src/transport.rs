//! Transport
//!
//! Requests are handed to a [`Transport`] together with a [`Responder`]. The
//! transport settles the responder whenever the remote side answers; the
//! caller observes the outcome through a [`Deferred`] handle.
//!
//! A deferred fires `success` or `error`, then `complete`, exactly once.
//! Callbacks registered after settlement fire immediately. Aborting a
//! pending deferred drops every callback and ignores the late response.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{trace, warn};

use crate::{Attributes, Collection, Entity, TransportError};

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Operation requested from the remote API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl Operation {
    /// Conventional HTTP method
    pub fn http_method(&self) -> &'static str {
        match self {
            Operation::Create => "POST",
            Operation::Read => "GET",
            Operation::Update => "PUT",
            Operation::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Read => write!(f, "read"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// Outgoing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub operation: Operation,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<serde_json::Value>,
}

/// Response envelope
///
/// `models` holds raw attribute objects by type name; they are merged into
/// the registry before `result` is interpreted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub models: BTreeMap<String, Vec<serde_json::Value>>,
}

/// Interpreted response
#[derive(Debug, Clone)]
pub enum SyncResult {
    /// Entities referenced by the response
    Entities(Vec<Entity>),
    /// Coerced attributes of the target
    Attributes(Attributes),
    /// Nothing to apply
    Empty,
}

/// Entity or collection a request is about
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Entity(Entity),
    Collection(Collection),
}

// ─────────────────────────────────────────────────────────────────────────────
// Deferred
// ─────────────────────────────────────────────────────────────────────────────

enum Outcome<T> {
    Pending,
    Resolved(T),
    Failed(TransportError),
    Aborted,
}

struct DeferredState<T> {
    outcome: Outcome<T>,
    on_success: Vec<Box<dyn FnOnce(&T)>>,
    on_error: Vec<Box<dyn FnOnce(&TransportError)>>,
    on_complete: Vec<Box<dyn FnOnce()>>,
    waiters: Vec<oneshot::Sender<Result<T, TransportError>>>,
}

/// Handle to the outcome of an asynchronous operation
pub struct Deferred<T>(Rc<RefCell<DeferredState<T>>>);

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Deferred(self.0.clone())
    }
}

impl<T: Clone + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> Deferred<T> {
    pub fn new() -> Self {
        Deferred(Rc::new(RefCell::new(DeferredState {
            outcome: Outcome::Pending,
            on_success: Vec::new(),
            on_error: Vec::new(),
            on_complete: Vec::new(),
            waiters: Vec::new(),
        })))
    }

    /// Call `f` with the result on success
    pub fn success(&self, f: impl FnOnce(&T) + 'static) -> &Self {
        let resolved = {
            let mut state = self.0.borrow_mut();
            if let Outcome::Pending = state.outcome {
                state.on_success.push(Box::new(f));
                return self;
            }
            match &state.outcome {
                Outcome::Resolved(value) => Some((value.clone(), f)),
                _ => None,
            }
        };
        if let Some((value, f)) = resolved {
            f(&value);
        }
        self
    }

    /// Call `f` with the failure
    pub fn error(&self, f: impl FnOnce(&TransportError) + 'static) -> &Self {
        let failed = {
            let mut state = self.0.borrow_mut();
            if let Outcome::Pending = state.outcome {
                state.on_error.push(Box::new(f));
                return self;
            }
            match &state.outcome {
                Outcome::Failed(e) => Some((e.clone(), f)),
                _ => None,
            }
        };
        if let Some((e, f)) = failed {
            f(&e);
        }
        self
    }

    /// Call `f` once settled, after `success` or `error`
    pub fn complete(&self, f: impl FnOnce() + 'static) -> &Self {
        let settled = {
            let mut state = self.0.borrow_mut();
            match state.outcome {
                Outcome::Pending => {
                    state.on_complete.push(Box::new(f));
                    return self;
                }
                Outcome::Aborted => false,
                _ => true,
            }
        };
        if settled {
            f();
        }
        self
    }

    /// Receive the outcome asynchronously
    ///
    /// The receiver errors if the operation is aborted.
    pub fn wait(&self) -> oneshot::Receiver<Result<T, TransportError>> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.0.borrow_mut();
        match &state.outcome {
            Outcome::Pending => state.waiters.push(tx),
            Outcome::Resolved(value) => {
                let _ = tx.send(Ok(value.clone()));
            }
            Outcome::Failed(e) => {
                let _ = tx.send(Err(e.clone()));
            }
            Outcome::Aborted => {}
        }
        rx
    }

    /// Settle with a result. Ignored unless pending
    pub fn settle(&self, result: Result<T, TransportError>) {
        let (on_success, on_error, on_complete, waiters) = {
            let mut state = self.0.borrow_mut();
            if !matches!(state.outcome, Outcome::Pending) {
                return;
            }
            state.outcome = match &result {
                Ok(value) => Outcome::Resolved(value.clone()),
                Err(e) => Outcome::Failed(e.clone()),
            };
            (
                std::mem::take(&mut state.on_success),
                std::mem::take(&mut state.on_error),
                std::mem::take(&mut state.on_complete),
                std::mem::take(&mut state.waiters),
            )
        };

        match &result {
            Ok(value) => {
                for f in on_success {
                    f(value);
                }
            }
            Err(e) => {
                warn!(error = %e, "Request failed");
                for f in on_error {
                    f(e);
                }
            }
        }
        for f in on_complete {
            f();
        }
        for tx in waiters {
            let _ = tx.send(result.clone());
        }
    }

    /// Cancel a pending operation. Nothing fires afterwards
    pub fn abort(&self) -> bool {
        let mut state = self.0.borrow_mut();
        if !matches!(state.outcome, Outcome::Pending) {
            return false;
        }
        state.outcome = Outcome::Aborted;
        state.on_success.clear();
        state.on_error.clear();
        state.on_complete.clear();
        state.waiters.clear();
        trace!("Request aborted");
        true
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.0.borrow().outcome, Outcome::Pending)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.0.borrow().outcome, Outcome::Aborted)
    }

    /// Outcome, once settled
    pub fn outcome(&self) -> Option<Result<T, TransportError>> {
        match &self.0.borrow().outcome {
            Outcome::Resolved(value) => Some(Ok(value.clone())),
            Outcome::Failed(e) => Some(Err(e.clone())),
            Outcome::Pending | Outcome::Aborted => None,
        }
    }

    /// Whether both handles refer to the same operation
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.0.try_borrow().map(|s| match s.outcome {
            Outcome::Pending => "pending",
            Outcome::Resolved(_) => "resolved",
            Outcome::Failed(_) => "failed",
            Outcome::Aborted => "aborted",
        }) {
            Ok(state) => state,
            Err(_) => "busy",
        };
        write!(f, "Deferred({state})")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Responder
// ─────────────────────────────────────────────────────────────────────────────

type ParseFn = Box<dyn FnOnce(serde_json::Value) -> Result<SyncResult, TransportError>>;

/// Settles one request
pub struct Responder {
    deferred: Deferred<SyncResult>,
    parse: ParseFn,
}

impl Responder {
    pub(crate) fn new(deferred: Deferred<SyncResult>, parse: ParseFn) -> Self {
        Self { deferred, parse }
    }

    /// Whether the caller gave up on this request
    pub fn is_aborted(&self) -> bool {
        self.deferred.is_aborted()
    }

    /// Deliver a successful response body
    pub fn resolve(self, body: serde_json::Value) {
        if self.is_aborted() {
            trace!("Dropping response to aborted request");
            return;
        }
        let result = (self.parse)(body);
        self.deferred.settle(result);
    }

    /// Deliver a failure
    pub fn reject(self, error: TransportError) {
        if self.is_aborted() {
            trace!("Dropping failure of aborted request");
            return;
        }
        self.deferred.settle(Err(error));
    }

    /// Deliver an HTTP failure
    ///
    /// A non-200 body carrying `errors` becomes [`TransportError::Server`];
    /// anything else is kept raw.
    pub fn fail(self, status: u16, body: &str) {
        self.reject(parse_failure(status, body));
    }
}

/// Interpret a failed HTTP response
pub fn parse_failure(status: u16, body: &str) -> TransportError {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    match parsed.and_then(|v| v.get("errors").cloned()) {
        Some(errors) if status != 200 => TransportError::Server { status, errors },
        _ => TransportError::Unexpected {
            status,
            body: body.to_string(),
        },
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("deferred", &self.deferred)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transports
// ─────────────────────────────────────────────────────────────────────────────

/// Sends requests to the remote API
pub trait Transport {
    fn send(&self, request: SyncRequest, responder: Responder);
}

/// Rejects every request
#[derive(Debug, Default)]
pub struct OfflineTransport;

impl Transport for OfflineTransport {
    fn send(&self, request: SyncRequest, responder: Responder) {
        trace!(endpoint = %request.endpoint, "Offline, rejecting request");
        responder.reject(TransportError::Offline);
    }
}

/// A request waiting in a [`MemoryTransport`]
#[derive(Debug)]
pub struct PendingRequest {
    pub request: SyncRequest,
    responder: Responder,
}

impl PendingRequest {
    pub fn resolve(self, body: serde_json::Value) {
        self.responder.resolve(body);
    }

    pub fn reject(self, error: TransportError) {
        self.responder.reject(error);
    }

    pub fn fail(self, status: u16, body: &str) {
        self.responder.fail(status, body);
    }
}

/// Queues requests until they are settled explicitly, in any order
#[derive(Debug, Default)]
pub struct MemoryTransport {
    queue: RefCell<VecDeque<PendingRequest>>,
    sent: RefCell<Vec<SyncRequest>>,
}

impl MemoryTransport {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Number of unsettled requests
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Every request sent so far
    pub fn sent(&self) -> Vec<SyncRequest> {
        self.sent.borrow().clone()
    }

    /// Take a queued request out for settlement
    pub fn take(&self, index: usize) -> Option<PendingRequest> {
        self.queue.borrow_mut().remove(index)
    }

    /// Resolve a queued request. Returns the request that was answered
    pub fn respond(&self, index: usize, body: serde_json::Value) -> Option<SyncRequest> {
        let pending = self.take(index)?;
        let request = pending.request.clone();
        pending.resolve(body);
        Some(request)
    }

    /// Resolve the oldest queued request
    pub fn respond_next(&self, body: serde_json::Value) -> Option<SyncRequest> {
        self.respond(0, body)
    }

    /// Fail a queued request with an HTTP status and body
    pub fn fail(&self, index: usize, status: u16, body: &str) -> Option<SyncRequest> {
        let pending = self.take(index)?;
        let request = pending.request.clone();
        pending.fail(status, body);
        Some(request)
    }
}

impl Transport for MemoryTransport {
    fn send(&self, request: SyncRequest, responder: Responder) {
        trace!(operation = %request.operation, endpoint = %request.endpoint, "Queued request");
        self.sent.borrow_mut().push(request.clone());
        self.queue
            .borrow_mut()
            .push_back(PendingRequest { request, responder });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn recorder(deferred: &Deferred<u32>) -> Rc<RefCell<Vec<String>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (a, b, c) = (log.clone(), log.clone(), log.clone());
        deferred
            .success(move |v| a.borrow_mut().push(format!("success {v}")))
            .error(move |e| b.borrow_mut().push(format!("error {e}")))
            .complete(move || c.borrow_mut().push("complete".to_string()));
        log
    }

    #[test]
    fn test_success_then_complete() {
        let deferred = Deferred::new();
        let log = recorder(&deferred);
        deferred.settle(Ok(7));
        deferred.settle(Ok(8));
        assert_eq!(*log.borrow(), vec!["success 7", "complete"]);
    }

    #[test]
    fn test_error_then_complete() {
        let deferred: Deferred<u32> = Deferred::new();
        let log = recorder(&deferred);
        deferred.settle(Err(TransportError::Offline));
        assert_eq!(*log.borrow(), vec!["error No transport available", "complete"]);
    }

    #[test]
    fn test_late_registration_fires_immediately() {
        let deferred = Deferred::new();
        deferred.settle(Ok(1));
        let log = recorder(&deferred);
        assert_eq!(*log.borrow(), vec!["success 1", "complete"]);
    }

    #[test]
    fn test_abort_drops_everything() {
        let deferred = Deferred::new();
        let log = recorder(&deferred);
        assert!(deferred.abort());
        deferred.settle(Ok(1));
        assert!(log.borrow().is_empty());
        assert!(deferred.is_aborted());
        assert!(deferred.outcome().is_none());

        let late = Rc::new(Cell::new(false));
        let l = late.clone();
        deferred.complete(move || l.set(true));
        assert!(!late.get());
    }

    #[tokio::test]
    async fn test_wait_receives_outcome() {
        let deferred = Deferred::new();
        let rx = deferred.wait();
        deferred.settle(Ok(5u32));
        assert_eq!(rx.await.unwrap(), Ok(5));

        let aborted: Deferred<u32> = Deferred::new();
        let rx = aborted.wait();
        aborted.abort();
        assert!(rx.await.is_err());
    }

    #[test]
    fn test_parse_failure() {
        assert!(matches!(
            parse_failure(422, r#"{"errors": {"name": "notnull"}}"#),
            TransportError::Server { status: 422, .. }
        ));
        assert!(matches!(
            parse_failure(500, "oops"),
            TransportError::Unexpected { status: 500, .. }
        ));
    }

    #[test]
    fn test_operation_methods() {
        assert_eq!(Operation::Create.http_method(), "POST");
        assert_eq!(Operation::Delete.to_string(), "delete");
        assert_eq!(
            serde_json::to_value(Operation::Update).unwrap(),
            serde_json::json!("update")
        );
    }
}
