use async_trait::async_trait;
use flowcore::{NodeContext, NodeError, NodeExecutor, NodeMetadata, NodeOutcome, Value};
use std::collections::HashMap;

/// HTTP request node
///
/// `url`, `method` (default GET), `headers` and `body` come from the node
/// config, falling back to context keys of the same name for `url` and
/// `body`. The response is stored under `target` (default `response`) as
/// `{status, body, headers}`. Connection failures and 5xx answers are
/// transient; other statuses are left for downstream nodes to judge.
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestNode {
    fn node_type(&self) -> &str {
        "http.request"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutcome, NodeError> {
        let url = ctx
            .config
            .get("url")
            .or_else(|| ctx.context.get("url"))
            .ok_or_else(|| NodeError::MissingInput("url".to_string()))?
            .as_str()
            .ok_or_else(|| NodeError::InvalidInputType {
                field: "url".to_string(),
                expected: "string".to_string(),
                actual: "other".to_string(),
            })?;
        let method_value = ctx.get_config_or("method", Value::from("GET"));
        let method = method_value.as_str().unwrap_or("GET").to_uppercase();
        let target = ctx
            .config
            .get("target")
            .and_then(|v| v.as_str())
            .unwrap_or("response")
            .to_string();

        ctx.events.info(format!("{} {}", method, url));

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            "DELETE" => self.client.delete(url),
            _ => return Err(NodeError::Configuration(format!("Unsupported method: {}", method))),
        };

        if let Some(Value::Object(headers)) = ctx.config.get("headers") {
            for (key, value) in headers {
                if let Some(val_str) = value.as_str() {
                    request = request.header(key, val_str);
                }
            }
        }

        match ctx.config.get("body").or_else(|| ctx.context.get("body")) {
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(Value::Null) | None => {}
            Some(other) => request = request.json(&other.to_json()),
        }

        let response = tokio::select! {
            sent = request.send() => sent
                .map_err(|e| NodeError::Transient(format!("HTTP request failed: {}", e)))?,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        };

        let status = response.status();
        let headers_map: HashMap<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(v.to_str().unwrap_or(""))))
            .collect();

        let body_text = response
            .text()
            .await
            .map_err(|e| NodeError::Transient(format!("Failed to read response: {}", e)))?;

        ctx.events.info(format!("Response status: {}", status.as_u16()));

        if status.is_server_error() {
            return Err(NodeError::Transient(format!(
                "{} {} answered {}",
                method, url, status
            )));
        }

        let body = serde_json::from_str::<serde_json::Value>(&body_text)
            .map(Value::from_json)
            .unwrap_or(Value::String(body_text));

        let mut result = HashMap::new();
        result.insert("status".to_string(), Value::from(status.as_u16() as i64));
        result.insert("body".to_string(), body);
        result.insert("headers".to_string(), Value::Object(headers_map));

        let mut context = ctx.context.clone();
        context.insert(target, Value::Object(result));
        Ok(NodeOutcome::Continue(context))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
            outputs: vec![],
        }
    }
}
