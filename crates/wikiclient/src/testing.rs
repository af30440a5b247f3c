use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;

use crate::error::{Result, WikiError};
use crate::transport::{Method, Transport};

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: Method,
    pub params: BTreeMap<String, String>,
}

impl RecordedRequest {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// In-memory transport replaying queued responses in order.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    responses: VecDeque<Result<Value>>,
    requests: Vec<RecordedRequest>,
}

impl ScriptedTransport {
    pub fn push_json(&mut self, value: Value) {
        self.responses.push_back(Ok(value));
    }

    pub fn push_error(&mut self, error: WikiError) {
        self.responses.push_back(Err(error));
    }

    pub fn requests(&self) -> &[RecordedRequest] {
        &self.requests
    }

    pub fn pending(&self) -> usize {
        self.responses.len()
    }
}

impl Transport for ScriptedTransport {
    fn send(&mut self, method: Method, params: &[(String, String)]) -> Result<Value> {
        self.requests.push(RecordedRequest {
            method,
            params: params.iter().cloned().collect(),
        });
        self.responses
            .pop_front()
            .unwrap_or_else(|| Err(WikiError::protocol("scripted transport ran out of responses")))
    }
}
