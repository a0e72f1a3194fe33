//! Scripted controller double for tests.
//!
//! Responses are queued per (verb, path) and every call is recorded, so a
//! test can assert exactly which controller endpoints a pipeline touched.
//! When a queue is down to its final entry that entry repeats, which keeps
//! polling scenarios short to script.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::client::{ApiClient, Document};
use crate::error::{ApiError, Result};

/// The five collaborator operations, as recorded calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Save,
    Update,
    Delete,
    SaveAndTrigger,
}

/// One recorded controller call.
#[derive(Debug, Clone)]
pub struct Call {
    pub verb: Verb,
    pub path: String,
    pub payload: Option<Value>,
}

type Scripted = std::result::Result<Value, (u16, String)>;

#[derive(Default)]
pub struct MockClient {
    responses: Mutex<HashMap<(Verb, String), VecDeque<Scripted>>>,
    calls: Mutex<Vec<Call>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response for the given verb and path.
    pub fn respond(&self, verb: Verb, path: &str, body: Value) {
        self.responses
            .lock()
            .unwrap()
            .entry((verb, path.to_string()))
            .or_default()
            .push_back(Ok(body));
    }

    /// Queue a controller error for the given verb and path.
    pub fn fail(&self, verb: Verb, path: &str, status: u16, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .entry((verb, path.to_string()))
            .or_default()
            .push_back(Err((status, message.to_string())));
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls filtered to one verb.
    pub fn calls_for(&self, verb: Verb) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.verb == verb).collect()
    }

    /// Paths of all calls, for order assertions.
    pub fn paths(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.path).collect()
    }

    fn dispatch(&self, verb: Verb, path: &str, payload: Option<&Value>) -> Result<Document> {
        self.calls.lock().unwrap().push(Call {
            verb,
            path: path.to_string(),
            payload: payload.cloned(),
        });

        let mut responses = self.responses.lock().unwrap();
        let queue = responses.get_mut(&(verb, path.to_string()));
        let scripted = match queue {
            Some(q) if q.len() > 1 => q.pop_front(),
            Some(q) => q.front().cloned(),
            None => None,
        };
        match scripted {
            Some(Ok(body)) => Ok(body),
            Some(Err((status, message))) => Err(ApiError::Controller {
                path: path.to_string(),
                status,
                message,
            }),
            None => Err(ApiError::Controller {
                path: path.to_string(),
                status: 404,
                message: format!("no scripted response for {verb:?} {path}"),
            }),
        }
    }
}

#[async_trait]
impl ApiClient for MockClient {
    async fn get(&self, path: &str) -> Result<Document> {
        self.dispatch(Verb::Get, path, None)
    }

    async fn save(&self, path: &str, payload: &Document) -> Result<Document> {
        self.dispatch(Verb::Save, path, Some(payload))
    }

    async fn update(&self, path: &str, payload: &Document) -> Result<Document> {
        self.dispatch(Verb::Update, path, Some(payload))
    }

    async fn delete(&self, path: &str) -> Result<Document> {
        self.dispatch(Verb::Delete, path, None)
    }

    async fn save_and_trigger(&self, path: &str) -> Result<Document> {
        self.dispatch(Verb::SaveAndTrigger, path, None)
    }
}
