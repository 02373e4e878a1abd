//! Control-flow nodes: branching and waiting for outside input.

use async_trait::async_trait;
use flowcore::{
    NodeContext, NodeError, NodeExecutor, NodeMetadata, NodeOutcome, PortDefinition, Value,
};
use std::cmp::Ordering;
use std::collections::HashMap;

const DEFAULT_TRUE_OUTPUT: &str = "yes";
const DEFAULT_FALSE_OUTPUT: &str = "no";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Exists,
    Truthy,
}

impl Operator {
    fn parse(raw: &str) -> Result<Self, NodeError> {
        Ok(match raw {
            "eq" | "==" => Operator::Eq,
            "ne" | "!=" => Operator::Ne,
            "gt" | ">" => Operator::Gt,
            "gte" | ">=" => Operator::Gte,
            "lt" | "<" => Operator::Lt,
            "lte" | "<=" => Operator::Lte,
            "exists" => Operator::Exists,
            "truthy" => Operator::Truthy,
            other => {
                return Err(NodeError::Configuration(format!(
                    "Unknown operator: {}",
                    other
                )))
            }
        })
    }

    fn needs_operand(self) -> bool {
        !matches!(self, Operator::Exists | Operator::Truthy)
    }

    fn evaluate(self, actual: Option<&Value>, expected: &Value) -> bool {
        let actual = actual.filter(|v| !v.is_null());
        match self {
            Operator::Exists => actual.is_some(),
            Operator::Truthy => actual.map_or(false, Value::is_truthy),
            Operator::Eq => actual.unwrap_or(&Value::Null) == expected,
            Operator::Ne => actual.unwrap_or(&Value::Null) != expected,
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                let Some(ordering) = actual.and_then(|a| compare(a, expected)) else {
                    return false;
                };
                match self {
                    Operator::Gt => ordering == Ordering::Greater,
                    Operator::Gte => ordering != Ordering::Less,
                    Operator::Lt => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                }
            }
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

/// Dotted lookup (`order.total`) through nested objects.
fn lookup<'a>(context: &'a HashMap<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = context.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Compares a context field and follows the matching output
pub struct ConditionNode;

#[async_trait]
impl NodeExecutor for ConditionNode {
    fn node_type(&self) -> &str {
        "flow.condition"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutcome, NodeError> {
        self.validate_config(&ctx.config)?;

        let field = ctx.require_config_str("field")?;
        let operator = Operator::parse(
            ctx.get_config_or("operator", Value::from("eq"))
                .as_str()
                .unwrap_or("eq"),
        )?;
        let expected = ctx.get_config_or("value", Value::Null);

        let matched = operator.evaluate(lookup(&ctx.context, field), &expected);
        let output = if matched {
            ctx.get_config_or("true_output", Value::from(DEFAULT_TRUE_OUTPUT))
        } else {
            ctx.get_config_or("false_output", Value::from(DEFAULT_FALSE_OUTPUT))
        };
        let output = output
            .as_str()
            .ok_or_else(|| NodeError::Configuration("Branch outputs must be strings".to_string()))?
            .to_string();

        ctx.events
            .info(format!("Condition on '{}' is {}, taking '{}'", field, matched, output));

        Ok(NodeOutcome::Branch {
            output,
            context: ctx.context.clone(),
        })
    }

    fn validate_config(&self, config: &HashMap<String, Value>) -> Result<(), NodeError> {
        if !matches!(config.get("field"), Some(Value::String(_))) {
            return Err(NodeError::Configuration(
                "flow.condition needs a string 'field'".to_string(),
            ));
        }
        let operator = match config.get("operator") {
            None => Operator::Eq,
            Some(Value::String(raw)) => Operator::parse(raw)?,
            Some(_) => {
                return Err(NodeError::Configuration(
                    "Config 'operator' must be a string".to_string(),
                ))
            }
        };
        if operator.needs_operand() && !config.contains_key("value") {
            return Err(NodeError::Configuration(format!(
                "Operator {:?} needs a 'value' to compare against",
                operator
            )));
        }
        Ok(())
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Branch on a comparison against a context field".to_string(),
            category: "flow".to_string(),
            outputs: vec![
                PortDefinition::new(DEFAULT_TRUE_OUTPUT, "Taken when the condition holds"),
                PortDefinition::new(DEFAULT_FALSE_OUTPUT, "Taken otherwise"),
            ],
        }
    }
}

/// Pauses the run until an outside caller resumes it
pub struct WaitNode;

#[async_trait]
impl NodeExecutor for WaitNode {
    fn node_type(&self) -> &str {
        "flow.wait"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutcome, NodeError> {
        let event = ctx.get_config_or("event", Value::from("resume"));

        ctx.events.info(format!("Waiting for {}", event));

        let mut context = ctx.context.clone();
        context.insert("waiting_for".to_string(), event);
        Ok(NodeOutcome::Pause(context))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Pause until resumed with external input".to_string(),
            category: "flow".to_string(),
            outputs: vec![],
        }
    }
}
