//! Continuation-driven enumeration of `list=` query modules.

use std::collections::VecDeque;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, WikiError};
use crate::response::scalar_to_param;
use crate::transport::{ApiClient, Params, Transport};

/// Lazy, forward-only sequence of list items spanning as many requests as
/// the server needs.
///
/// Items come out in server order. The first failure is yielded once and
/// ends the sequence; items already yielded stay valid. Continuation values
/// are single-use, so the sequence cannot be restarted: call the producing
/// operation again for a fresh enumeration.
pub struct Paginator<'a, T, I> {
    api: &'a mut ApiClient<T>,
    base: Params,
    list_key: String,
    continuation: Option<Params>,
    buffer: VecDeque<I>,
    finished: bool,
    requests: usize,
    _item: PhantomData<fn() -> I>,
}

impl<'a, T: Transport, I: DeserializeOwned> Paginator<'a, T, I> {
    pub fn new(api: &'a mut ApiClient<T>, base: Params, list_key: &str) -> Self {
        Self {
            api,
            base,
            list_key: list_key.to_string(),
            continuation: None,
            buffer: VecDeque::new(),
            finished: false,
            requests: 0,
            _item: PhantomData,
        }
    }

    /// HTTP calls issued so far.
    pub fn requests(&self) -> usize {
        self.requests
    }

    fn fetch_next_batch(&mut self) -> Result<()> {
        let mut params = self.base.clone();
        if let Some(continuation) = &self.continuation {
            params.extend(continuation.clone());
        }

        let payload = self.api.get(&params)?;
        self.requests += 1;

        let items = match payload.get("query").and_then(|query| query.get(&self.list_key)) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                return Err(WikiError::protocol(format!(
                    "expected `{}` to be a list, found {other}",
                    self.list_key
                )));
            }
        };
        for item in items {
            let decoded = serde_json::from_value(item).map_err(|error| {
                WikiError::protocol(format!("failed to decode {} item: {error}", self.list_key))
            })?;
            self.buffer.push_back(decoded);
        }

        self.continuation = continuation_from(&payload)?;
        debug!(
            list = %self.list_key,
            batch = self.requests,
            buffered = self.buffer.len(),
            more = self.continuation.is_some(),
            "fetched list batch"
        );
        if self.continuation.is_none() {
            self.finished = true;
        }
        Ok(())
    }
}

impl<T: Transport, I: DeserializeOwned> Iterator for Paginator<'_, T, I> {
    type Item = Result<I>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            if self.finished {
                return None;
            }
            if let Err(error) = self.fetch_next_batch() {
                self.finished = true;
                self.buffer.clear();
                return Some(Err(error));
            }
        }
    }
}

/// Parameters to merge into the next request, or `None` when the enumeration is complete.
///
/// Accepts the current `continue` object and the legacy per-module `query-continue` one.
fn continuation_from(payload: &Value) -> Result<Option<Params>> {
    if let Some(raw) = payload.get("continue") {
        let object = raw
            .as_object()
            .ok_or_else(|| WikiError::protocol(format!("expected `continue` object, found {raw}")))?;
        let params: Params = object
            .iter()
            .filter_map(|(key, value)| scalar_to_param(value).map(|value| (key.clone(), value)))
            .collect();
        return Ok((!params.is_empty()).then_some(params));
    }

    if let Some(modules) = payload.get("query-continue").and_then(Value::as_object) {
        let mut params = Params::new();
        for module in modules.values() {
            let Some(values) = module.as_object() else {
                continue;
            };
            for (key, value) in values {
                if let Some(value) = scalar_to_param(value) {
                    params.insert(key.clone(), value);
                }
            }
        }
        return Ok((!params.is_empty()).then_some(params));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::{Paginator, continuation_from};
    use crate::error::WikiError;
    use crate::testing::ScriptedTransport;
    use crate::transport::{ApiClient, params};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        title: String,
    }

    fn titles(range: std::ops::Range<usize>) -> Vec<serde_json::Value> {
        range.map(|index| json!({"ns": 0, "title": format!("P{index}")})).collect()
    }

    #[test]
    fn continuation_is_transparent_to_the_caller() {
        let mut split = ScriptedTransport::default();
        split.push_json(json!({
            "continue": {"blcontinue": "0|3", "continue": "-||"},
            "query": {"backlinks": titles(0..3)}
        }));
        split.push_json(json!({
            "batchcomplete": true,
            "query": {"backlinks": titles(3..5)}
        }));
        let mut single = ScriptedTransport::default();
        single.push_json(json!({"batchcomplete": true, "query": {"backlinks": titles(0..5)}}));

        let base = params([("action", "query"), ("list", "backlinks"), ("bltitle", "Main")]);
        let mut split_api = ApiClient::new(split);
        let mut single_api = ApiClient::new(single);
        let from_split = Paginator::<_, Item>::new(&mut split_api, base.clone(), "backlinks")
            .collect::<Result<Vec<_>, _>>()
            .expect("split");
        let from_single = Paginator::<_, Item>::new(&mut single_api, base, "backlinks")
            .collect::<Result<Vec<_>, _>>()
            .expect("single");
        assert_eq!(from_split, from_single);
        assert_eq!(from_split.len(), 5);

        let requests = split_api.transport().requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].param("blcontinue"), None);
        assert_eq!(requests[1].param("blcontinue"), Some("0|3"));
        assert_eq!(requests[1].param("continue"), Some("-||"));
        assert_eq!(requests[1].param("bltitle"), Some("Main"));
    }

    #[test]
    fn requests_are_issued_lazily() {
        let mut transport = ScriptedTransport::default();
        transport.push_json(json!({
            "continue": {"cmcontinue": "page|B|2", "continue": "-||"},
            "query": {"categorymembers": titles(0..2)}
        }));
        transport.push_json(json!({"query": {"categorymembers": titles(2..4)}}));
        let mut api = ApiClient::new(transport);

        let mut pages = Paginator::<_, Item>::new(
            &mut api,
            params([("action", "query"), ("list", "categorymembers")]),
            "categorymembers",
        );
        assert_eq!(pages.requests(), 0);
        pages.next().expect("first").expect("ok");
        pages.next().expect("second").expect("ok");
        assert_eq!(pages.requests(), 1);
        pages.next().expect("third").expect("ok");
        assert_eq!(pages.requests(), 2);
    }

    #[test]
    fn continuation_keys_do_not_leak_between_requests() {
        let mut transport = ScriptedTransport::default();
        transport.push_json(json!({
            "continue": {"eicontinue": "10|5", "continue": "-||"},
            "query": {"embeddedin": titles(0..1)}
        }));
        transport.push_json(json!({
            "continue": {"gcontinue": "x", "continue": "gcontinue||"},
            "query": {"embeddedin": titles(1..2)}
        }));
        transport.push_json(json!({"query": {"embeddedin": []}}));
        let mut api = ApiClient::new(transport);

        let count = Paginator::<_, Item>::new(
            &mut api,
            params([("action", "query"), ("list", "embeddedin")]),
            "embeddedin",
        )
        .count();
        assert_eq!(count, 2);
        let third = &api.transport().requests()[2];
        assert_eq!(third.param("eicontinue"), None);
        assert_eq!(third.param("gcontinue"), Some("x"));
    }

    #[test]
    fn failure_mid_enumeration_ends_the_sequence() {
        let mut transport = ScriptedTransport::default();
        transport.push_json(json!({
            "continue": {"blcontinue": "0|1", "continue": "-||"},
            "query": {"backlinks": titles(0..1)}
        }));
        transport.push_error(WikiError::Transport {
            status: Some(502),
            message: "Bad Gateway".to_string(),
        });
        transport.push_json(json!({"query": {"backlinks": titles(1..2)}}));
        let mut api = ApiClient::new(transport);

        let mut pages = Paginator::<_, Item>::new(
            &mut api,
            params([("action", "query"), ("list", "backlinks")]),
            "backlinks",
        );
        assert_eq!(pages.next().expect("first").expect("ok").title, "P0");
        assert!(matches!(
            pages.next(),
            Some(Err(WikiError::Transport { status: Some(502), .. }))
        ));
        assert!(pages.next().is_none());
        drop(pages);
        assert_eq!(api.transport().pending(), 1);
    }

    #[test]
    fn empty_and_absent_lists_yield_nothing() {
        let mut transport = ScriptedTransport::default();
        transport.push_json(json!({"batchcomplete": true}));
        let mut api = ApiClient::new(transport);
        let mut pages = Paginator::<_, Item>::new(
            &mut api,
            params([("action", "query"), ("list", "backlinks")]),
            "backlinks",
        );
        assert!(pages.next().is_none());
        assert_eq!(pages.requests(), 1);
    }

    #[test]
    fn malformed_list_is_a_protocol_error() {
        let mut transport = ScriptedTransport::default();
        transport.push_json(json!({"query": {"backlinks": {"oops": true}}}));
        let mut api = ApiClient::new(transport);
        let result = Paginator::<_, Item>::new(
            &mut api,
            params([("action", "query"), ("list", "backlinks")]),
            "backlinks",
        )
        .collect::<Result<Vec<_>, _>>();
        assert!(matches!(result, Err(WikiError::Protocol(_))));
    }

    #[test]
    fn legacy_query_continue_is_flattened() {
        let payload = json!({
            "query-continue": {"categorymembers": {"cmcontinue": "page|4f|99"}},
            "query": {"categorymembers": []}
        });
        let params = continuation_from(&payload).expect("parse").expect("continuation");
        assert_eq!(params.get("cmcontinue").map(String::as_str), Some("page|4f|99"));
        assert_eq!(continuation_from(&json!({"query": {}})).expect("parse"), None);
    }
}
