use async_trait::async_trait;
use flowcore::{NodeContext, NodeError, NodeExecutor, NodeMetadata, NodeOutcome, Value};
use std::collections::HashMap;

/// Context key named by config `name`, or `default`.
fn key_from_config(ctx: &NodeContext, name: &str, default: &str) -> Result<String, NodeError> {
    match ctx.config.get(name) {
        None => Ok(default.to_string()),
        Some(value) => value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| NodeError::Configuration(format!("Config '{}' must be a string", name))),
    }
}

/// Merge the configured `values` object into the context
pub struct SetNode;

#[async_trait]
impl NodeExecutor for SetNode {
    fn node_type(&self) -> &str {
        "transform.set"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutcome, NodeError> {
        let values = ctx
            .require_config("values")?
            .as_object()
            .ok_or_else(|| NodeError::Configuration("Config 'values' must be an object".to_string()))?;

        let mut context = ctx.context.clone();
        context.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(NodeOutcome::Continue(context))
    }

    fn validate_config(&self, config: &HashMap<String, Value>) -> Result<(), NodeError> {
        match config.get("values") {
            Some(Value::Object(_)) => Ok(()),
            _ => Err(NodeError::Configuration(
                "transform.set needs an object under 'values'".to_string(),
            )),
        }
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Set context values".to_string(),
            category: "transform".to_string(),
            outputs: vec![],
        }
    }
}

/// Parse the JSON text under `source` into a structured value under `target`
pub struct JsonParseNode;

#[async_trait]
impl NodeExecutor for JsonParseNode {
    fn node_type(&self) -> &str {
        "transform.json_parse"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutcome, NodeError> {
        let source = key_from_config(&ctx, "source", "json")?;
        let target = key_from_config(&ctx, "target", "parsed")?;

        let input = ctx.require_input(&source)?;
        let text = input.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: source.clone(),
            expected: "string".to_string(),
            actual: type_name(input).to_string(),
        })?;

        let parsed: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        let mut context = ctx.context.clone();
        context.insert(target, Value::from_json(parsed));
        Ok(NodeOutcome::Continue(context))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
            outputs: vec![],
        }
    }
}

/// Render the value under `source` as JSON text under `target`
pub struct JsonStringifyNode;

#[async_trait]
impl NodeExecutor for JsonStringifyNode {
    fn node_type(&self) -> &str {
        "transform.json_stringify"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutcome, NodeError> {
        let source = key_from_config(&ctx, "source", "value")?;
        let target = key_from_config(&ctx, "target", "json")?;
        let pretty = ctx
            .config
            .get("pretty")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let value = ctx.require_input(&source)?.to_json();
        let json_str = if pretty {
            serde_json::to_string_pretty(&value)
        } else {
            serde_json::to_string(&value)
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        let mut context = ctx.context.clone();
        context.insert(target, Value::String(json_str));
        Ok(NodeOutcome::Continue(context))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Convert value to JSON string".to_string(),
            category: "transform".to_string(),
            outputs: vec![],
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
