//! Hub connectivity: the RPC transport seam, a mock implementation, the
//! authenticated session wrapper, and multicall batching.

pub mod mock;
pub mod multicall;
pub mod session;
pub mod transport;

pub use mock::MockTransport;
pub use multicall::MulticallSession;
pub use session::HubSession;
pub use transport::{HubCall, HubTransport};

use std::sync::Arc;

use crate::error::HubError;
use crate::types::ProfileName;

/// Resolve a profile name to a concrete transport. `mock` (and any profile
/// during tests) maps to `MockTransport`; everything else resolves an HTTP
/// base URL from `KOJI_SYNC_<PROFILE>_URL`, matching SPEC_FULL.md §6.3.
pub fn create_transport(profile: &ProfileName) -> Result<Arc<dyn HubTransport>, HubError> {
    if profile.as_str() == "mock" {
        return Ok(Arc::new(MockTransport::new()));
    }
    let env_key = format!("KOJI_SYNC_{}_URL", profile.as_str().to_uppercase());
    let base_url = std::env::var(&env_key)
        .unwrap_or_else(|_| "https://koji.example.com/kojihub".to_string());
    Ok(Arc::new(HttpTransport::new(base_url)))
}

/// Illustrative HTTP-backed transport. The wire protocol (XML-RPC framing)
/// is out of core scope; this exists so the crate is runnable end-to-end
/// against a real hub, the way the teacher's HTTP-backed providers are
/// runnable against a real API even though provider internals aren't the
/// point of that crate either.
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpTransport {
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .expect("reqwest client builds"),
        }
    }
}

#[async_trait::async_trait]
impl HubTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn login(&self) -> Result<String, HubError> {
        let url = format!("{}/login", self.base_url);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| HubError::Authentication { profile: self.base_url.clone(), cause: e.to_string() })?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| HubError::Authentication { profile: self.base_url.clone(), cause: e.to_string() })?;
        body.get("user")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| HubError::Authentication { profile: self.base_url.clone(), cause: "no user in login response".into() })
    }

    async fn call(&self, method: &str, arguments: serde_json::Value) -> Result<serde_json::Value, HubError> {
        let body = serde_json::json!({ "method": method, "params": arguments });
        let response = self
            .client
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| HubError::Call { method: method.to_string(), arguments: body.clone(), message: e.to_string(), key: String::new() })?;
        response
            .json()
            .await
            .map_err(|e| HubError::Call { method: method.to_string(), arguments: body, message: e.to_string(), key: String::new() })
    }

    async fn multicall(&self, calls: &[HubCall]) -> Result<Vec<Result<serde_json::Value, HubError>>, HubError> {
        let batch: Vec<serde_json::Value> = calls
            .iter()
            .map(|c| serde_json::json!({ "method": c.method, "params": c.arguments }))
            .collect();
        let body = serde_json::json!({ "method": transport::methods::MULTI_CALL, "params": batch });
        let response = self
            .client
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| HubError::Call { method: transport::methods::MULTI_CALL.into(), arguments: body.clone(), message: e.to_string(), key: String::new() })?;
        let results: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| HubError::Call { method: transport::methods::MULTI_CALL.into(), arguments: body, message: e.to_string(), key: String::new() })?;
        Ok(results.into_iter().map(Ok).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_profile_resolves_to_mock_transport() {
        let profile = ProfileName::new("mock").unwrap();
        let transport = create_transport(&profile).unwrap();
        assert_eq!(transport.name(), "mock");
    }
}
