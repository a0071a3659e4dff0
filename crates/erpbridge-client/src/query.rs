//! Typed call shapes for business code
//!
//! Each verb builds an [`RpcRequest`] and hands it to the retry coordinator.
//! This is the only surface route handlers and jobs are meant to use.

use crate::error::{RpcError, RpcResult};
use crate::identity::Identity;
use crate::retry::{CallOptions, RetryCoordinator};
use crate::wire::{CorrelationIds, RpcRequest};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::warn;

/// Query verbs bound to one identity
#[derive(Clone)]
pub struct QueryHelpers {
    coordinator: Arc<RetryCoordinator>,
    ids: Arc<CorrelationIds>,
    identity: Identity,
    options: CallOptions,
}

impl QueryHelpers {
    pub fn new(
        coordinator: Arc<RetryCoordinator>,
        ids: Arc<CorrelationIds>,
        identity: Identity,
    ) -> Self {
        Self {
            coordinator,
            ids,
            identity,
            options: CallOptions::default(),
        }
    }

    /// Deadline and cancellation used by every verb on this handle
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    fn request(&self, model: &str, method: &str) -> RpcRequest {
        RpcRequest::new(model, method, self.ids.next_id())
    }

    async fn execute(&self, request: &RpcRequest) -> RpcResult<Value> {
        self.coordinator
            .execute(&self.identity, request, &self.options)
            .await
    }

    /// Call any model method
    pub async fn call_method(
        &self,
        model: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> RpcResult<Value> {
        let request = self
            .request(model, method)
            .with_args(args)
            .with_kwargs(kwargs);
        self.execute(&request).await
    }

    /// Records matching `domain`, restricted to `fields`
    pub async fn search_read(
        &self,
        model: &str,
        domain: Value,
        fields: &[&str],
        limit: Option<u32>,
        order: Option<&str>,
    ) -> RpcResult<Vec<Value>> {
        let mut request = self
            .request(model, "search_read")
            .with_args(vec![domain])
            .with_kwarg("fields", json!(fields));
        if let Some(limit) = limit {
            request = request.with_kwarg("limit", json!(limit));
        }
        if let Some(order) = order {
            request = request.with_kwarg("order", json!(order));
        }

        expect_array(&request, self.execute(&request).await?)
    }

    /// Ids of records matching `domain`
    pub async fn search(
        &self,
        model: &str,
        domain: Value,
        limit: Option<u32>,
        order: Option<&str>,
    ) -> RpcResult<Vec<i64>> {
        let mut request = self.request(model, "search").with_args(vec![domain]);
        if let Some(limit) = limit {
            request = request.with_kwarg("limit", json!(limit));
        }
        if let Some(order) = order {
            request = request.with_kwarg("order", json!(order));
        }

        let result = self.execute(&request).await?;
        expect_array(&request, result)?
            .into_iter()
            .map(|id| expect_id(&request, id))
            .collect()
    }

    /// Read `fields` of the given records
    pub async fn read(&self, model: &str, ids: &[i64], fields: &[&str]) -> RpcResult<Vec<Value>> {
        let request = self
            .request(model, "read")
            .with_args(vec![json!(ids)])
            .with_kwarg("fields", json!(fields));

        expect_array(&request, self.execute(&request).await?)
    }

    /// Number of records matching `domain`
    pub async fn search_count(&self, model: &str, domain: Value) -> RpcResult<u64> {
        let request = self.request(model, "search_count").with_args(vec![domain]);

        let result = self.execute(&request).await?;
        result.as_u64().ok_or_else(|| malformed(&request, &result))
    }

    /// Create one record, returning its id
    pub async fn create(&self, model: &str, values: Map<String, Value>) -> RpcResult<i64> {
        let request = self
            .request(model, "create")
            .with_args(vec![Value::Object(values)]);

        expect_id(&request, self.execute(&request).await?)
    }

    /// Update the given records
    pub async fn write(
        &self,
        model: &str,
        ids: &[i64],
        values: Map<String, Value>,
    ) -> RpcResult<bool> {
        let request = self
            .request(model, "write")
            .with_args(vec![json!(ids), Value::Object(values)]);

        expect_bool(&request, self.execute(&request).await?)
    }

    /// Delete the given records
    pub async fn unlink(&self, model: &str, ids: &[i64]) -> RpcResult<bool> {
        let request = self.request(model, "unlink").with_args(vec![json!(ids)]);

        expect_bool(&request, self.execute(&request).await?)
    }
}

/// A result that decoded fine but has the wrong shape for the verb
fn malformed(request: &RpcRequest, value: &Value) -> RpcError {
    warn!(
        correlation_id = request.correlation_id(),
        model = %request.model(),
        method = %request.method(),
        raw_body = %value,
        "Unexpected result shape"
    );
    RpcError::malformed(value.to_string())
}

fn expect_array(request: &RpcRequest, value: Value) -> RpcResult<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(malformed(request, &other)),
    }
}

fn expect_id(request: &RpcRequest, value: Value) -> RpcResult<i64> {
    value.as_i64().ok_or_else(|| malformed(request, &value))
}

fn expect_bool(request: &RpcRequest, value: Value) -> RpcResult<bool> {
    value.as_bool().ok_or_else(|| malformed(request, &value))
}
