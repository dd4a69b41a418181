//! Mock hub transport for tests and the `--profile mock` CLI option.
//!
//! Directly grounded on the teacher's `MockProvider`
//! (`src/provider/mock.rs`): a FIFO response queue keyed by method name,
//! a default fallback, and a request recorder for assertions.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::transport::{HubCall, HubTransport};
use crate::error::HubError;

pub struct MockTransport {
    responses: Mutex<HashMap<String, Vec<Value>>>,
    default_response: Value,
    calls: Mutex<Vec<HubCall>>,
    login_name: String,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport {
            responses: Mutex::new(HashMap::new()),
            default_response: Value::Null,
            calls: Mutex::new(Vec::new()),
            login_name: "kojisync".to_string(),
        }
    }

    pub fn with_login(mut self, name: impl Into<String>) -> Self {
        self.login_name = name.into();
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_response = value;
        self
    }

    /// Queue a response for the next call to `method`.
    pub fn queue_response(&self, method: impl Into<String>, value: Value) {
        self.responses
            .lock()
            .unwrap()
            .entry(method.into())
            .or_default()
            .push(value);
    }

    pub fn calls(&self) -> Vec<HubCall> {
        self.calls.lock().unwrap().clone()
    }

    fn resolve(&self, method: &str) -> Value {
        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(method) {
            Some(queue) if !queue.is_empty() => queue.remove(0),
            _ => self.default_response.clone(),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HubTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn login(&self) -> Result<String, HubError> {
        Ok(self.login_name.clone())
    }

    async fn call(&self, method: &str, arguments: Value) -> Result<Value, HubError> {
        self.calls.lock().unwrap().push(HubCall {
            method: method.to_string(),
            arguments,
        });
        Ok(self.resolve(method))
    }

    async fn multicall(&self, calls: &[HubCall]) -> Result<Vec<Result<Value, HubError>>, HubError> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            self.calls.lock().unwrap().push(call.clone());
            results.push(Ok(self.resolve(&call.method)));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_response_is_null() {
        let transport = MockTransport::new();
        let result = transport.call("getTag", Value::Null).await.unwrap();
        assert!(result.is_null());
    }

    #[tokio::test]
    async fn test_queued_responses_are_per_method_fifo() {
        let transport = MockTransport::new();
        transport.queue_response("getTag", serde_json::json!({"name": "f40"}));
        transport.queue_response("getTag", serde_json::json!({"name": "f41"}));

        let first = transport.call("getTag", Value::Null).await.unwrap();
        let second = transport.call("getTag", Value::Null).await.unwrap();

        assert_eq!(first["name"], "f40");
        assert_eq!(second["name"], "f41");
    }

    #[tokio::test]
    async fn test_multicall_records_all_calls_in_order() {
        let transport = MockTransport::new();
        let calls = vec![
            HubCall { method: "getTag".into(), arguments: Value::Null },
            HubCall { method: "getUser".into(), arguments: Value::Null },
        ];
        let results = transport.multicall(&calls).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(transport.calls().len(), 2);
        assert_eq!(transport.calls()[0].method, "getTag");
        assert_eq!(transport.calls()[1].method, "getUser");
    }

    #[tokio::test]
    async fn test_login_returns_configured_name() {
        let transport = MockTransport::new().with_login("alice");
        assert_eq!(transport.login().await.unwrap(), "alice");
    }
}
