//! Hub RPC transport: the fixed vocabulary of Koji hub method calls this
//! crate needs, as an async trait. Grounded on the teacher's `Provider`
//! trait + `create_provider` factory (`src/provider/mod.rs`) — same shape,
//! generalized from "send a prompt, get a response" to "call a named RPC
//! method with JSON arguments, get a JSON result".
//!
//! The wire protocol itself (XML-RPC framing, session cookies) is out of
//! core scope; this trait is the seam a real implementation plugs into.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HubError;

/// One call queued for (and eventually answered via) a multicall batch.
#[derive(Debug, Clone)]
pub struct HubCall {
    pub method: String,
    pub arguments: Value,
}

#[async_trait]
pub trait HubTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Authenticate and return the logged-in user's name, cached by the
    /// session wrapper for the permission/content-generator grant+revoke
    /// dance.
    async fn login(&self) -> Result<String, HubError>;

    /// Execute a single call outside of a multicall batch (used for ad hoc
    /// commands like `fetch`).
    async fn call(&self, method: &str, arguments: Value) -> Result<Value, HubError>;

    /// Execute a batch of calls in one round trip via the hub's
    /// `multiCall` method, returning one result (or error) per call in
    /// the same order.
    async fn multicall(&self, calls: &[HubCall]) -> Result<Vec<Result<Value, HubError>>, HubError>;
}

/// The fixed RPC method names this crate calls, reproduced here as
/// associated constants so callers never hand-type a method string.
/// Names and casing are the hub's own, not Rust convention — kept verbatim
/// so a packet capture against a real hub can be diffed against these.
///
/// Defined in `model::change` (not here) since `ChangeReport` impls are the
/// real call sites and `model` doesn't depend on `hub`; re-exported under
/// this path for callers (like `workflow`/`main`) that think in terms of
/// the transport.
pub use crate::model::change::methods;
