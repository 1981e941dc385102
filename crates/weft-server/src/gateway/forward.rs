// crates/weft-server/src/gateway/forward.rs
// Downstream forwarding to the selected worker

use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use weft_types::InvokeRequest;

/// The envelope workers receive on `POST /invoke`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkerRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    input: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant_id: Option<&'a str>,
}

/// How a forward can fail, as surfaced to the client.
#[derive(Debug)]
pub enum ForwardError {
    /// Worker answered with a 4xx/5xx.
    Upstream { status: u16, body: String },
    Timeout,
    Network(String),
    Cancelled,
}

/// A worker's reply in both shapes the callers need: the parsed body for the
/// invoke API, and the unwrapped text form for MCP content blocks.
#[derive(Debug, Clone)]
pub struct ForwardOutput {
    pub value: Value,
    pub text: String,
}

pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// POST the request envelope to `http://<endpoint>/invoke`, honoring the
    /// request deadline and client cancellation.
    pub async fn forward(
        &self,
        endpoint: &str,
        request: &InvokeRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ForwardOutput, ForwardError> {
        let url = format!("http://{}/invoke", normalize_endpoint(endpoint));
        let body = WorkerRequest {
            query: &request.query,
            input: request.input.as_ref(),
            metadata: request.metadata.as_ref(),
            correlation_id: request.correlation_id.as_deref(),
            tenant_id: request.tenant_id.as_deref(),
        };
        let send = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ForwardError::Cancelled),
            response = send => response.map_err(|e| {
                if e.is_timeout() {
                    ForwardError::Timeout
                } else {
                    ForwardError::Network(e.to_string())
                }
            })?,
        };

        let status = response.status();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ForwardError::Cancelled),
            body = response.text() => body.map_err(|e| {
                if e.is_timeout() {
                    ForwardError::Timeout
                } else {
                    ForwardError::Network(e.to_string())
                }
            })?,
        };

        if status.as_u16() >= 400 {
            return Err(ForwardError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        Ok(parse_worker_body(&body))
    }
}

/// Force absolute DNS resolution for cluster-internal service names: a host
/// containing a `.svc` suffix gets a trailing dot so search domains are not
/// consulted.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let (host, port) = match endpoint.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => (host, Some(port)),
        _ => (endpoint, None),
    };
    let host = if host.contains(".svc") && !host.ends_with('.') {
        format!("{host}.")
    } else {
        host.to_string()
    };
    match port {
        Some(port) => format!("{host}:{port}"),
        None => host,
    }
}

/// Workers return arbitrary JSON. An object with a string `result`,
/// `response`, or `output` field unwraps to that string for text consumers;
/// anything else passes through whole. Non-JSON bodies surface as raw text.
fn parse_worker_body(body: &str) -> ForwardOutput {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => {
            let text = ["result", "response", "output"]
                .iter()
                .find_map(|field| value.get(field).and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string());
            ForwardOutput { value, text }
        }
        Err(_) => ForwardOutput {
            value: Value::String(body.to_string()),
            text: body.to_string(),
        },
    }
}
