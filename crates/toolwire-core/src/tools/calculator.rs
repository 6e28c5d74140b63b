//! Arithmetic tool used by the CLI demo and the test suites.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core_types::ToolSpec;
use crate::errors::AgentError;
use crate::tools::Tool;

pub struct CalculatorTool;

impl CalculatorTool {
    pub fn new() -> Self {
        Self
    }

    fn error(message: impl Into<String>) -> AgentError {
        AgentError::ToolError {
            tool_name: "calculator".to_string(),
            message: message.into(),
        }
    }

    fn operand(arguments: &Value, key: &str, operation: &str) -> Result<f64, AgentError> {
        arguments
            .get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| Self::error(format!("Missing or invalid parameter '{}' for {}", key, operation)))
    }
}

impl Default for CalculatorTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "calculator",
            "Performs basic arithmetic: add, subtract, multiply, divide, power and sqrt",
            json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["add", "subtract", "multiply", "divide", "power", "sqrt"],
                        "description": "The arithmetic operation to perform"
                    },
                    "a": {
                        "type": "number",
                        "description": "The first number"
                    },
                    "b": {
                        "type": "number",
                        "description": "The second number (not required for sqrt)"
                    }
                },
                "required": ["operation", "a"]
            }),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<Value, AgentError> {
        let operation = arguments
            .get("operation")
            .and_then(Value::as_str)
            .ok_or_else(|| Self::error("Missing or invalid 'operation' parameter"))?;

        let a = Self::operand(&arguments, "a", operation)?;

        let result = match operation {
            "add" => a + Self::operand(&arguments, "b", operation)?,
            "subtract" => a - Self::operand(&arguments, "b", operation)?,
            "multiply" => a * Self::operand(&arguments, "b", operation)?,
            "divide" => {
                let b = Self::operand(&arguments, "b", operation)?;
                if b == 0.0 {
                    return Err(Self::error("Division by zero is not allowed"));
                }
                a / b
            }
            "power" => a.powf(Self::operand(&arguments, "b", operation)?),
            "sqrt" => {
                if a < 0.0 {
                    return Err(Self::error("Cannot calculate square root of negative number"));
                }
                a.sqrt()
            }
            other => return Err(Self::error(format!("Unknown operation: {}", other))),
        };

        if !result.is_finite() {
            return Err(Self::error(format!("Result of {} is not a finite number", operation)));
        }

        log::info!("Calculator: {} on a={} -> {}", operation, a, result);

        // Whole results are reported as integers so "2 + 2" reads as 4, not 4.0.
        if result.fract() == 0.0 && result.abs() < 9.0e15 {
            Ok(json!(result as i64))
        } else {
            Ok(json!((result * 1e6).round() / 1e6))
        }
    }
}
