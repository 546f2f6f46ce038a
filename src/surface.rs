//! Discovered attack surface.
//!
//! Typed views over the raw `tools/list`, `resources/list`, and
//! `prompts/list` results. Parsing is lenient: unknown fields are kept in
//! the raw payload, and a list result that does not match the expected
//! shape simply yields no items.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool advertised by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool name, used as the `tools/call` target.
    pub name: String,

    /// Optional human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema of the tool's arguments.
    #[serde(
        rename = "inputSchema",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub input_schema: Option<Value>,
}

impl ToolDef {
    /// Declared parameters as `(name, declared_type)` pairs, in schema
    /// order. Parameters without a `type` field report `"string"`.
    #[must_use]
    pub fn parameters(&self) -> Vec<(String, String)> {
        let Some(props) = self
            .input_schema
            .as_ref()
            .and_then(|s| s.get("properties"))
            .and_then(Value::as_object)
        else {
            return Vec::new();
        };
        props
            .iter()
            .map(|(name, schema)| {
                let ty = schema
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("string")
                    .to_string();
                (name.clone(), ty)
            })
            .collect()
    }
}

/// A resource advertised by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDef {
    /// Resource URI, used as the `resources/read` target.
    pub uri: String,

    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Optional human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A prompt advertised by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDef {
    /// Prompt name.
    pub name: String,

    /// Optional human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn parse_list<T: serde::de::DeserializeOwned>(result: &Value, key: &str) -> Vec<T> {
    let Some(items) = result.get(key).and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}

/// Extracts tools from a `tools/list` result.
#[must_use]
pub fn tools_from_result(result: &Value) -> Vec<ToolDef> {
    parse_list(result, "tools")
}

/// Extracts resources from a `resources/list` result.
#[must_use]
pub fn resources_from_result(result: &Value) -> Vec<ResourceDef> {
    parse_list(result, "resources")
}

/// Extracts prompts from a `prompts/list` result.
#[must_use]
pub fn prompts_from_result(result: &Value) -> Vec<PromptDef> {
    parse_list(result, "prompts")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tools_from_result() {
        let result = json!({
            "tools": [
                {
                    "name": "get_weather",
                    "description": "Fetches weather",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "city": {"type": "string"},
                            "days": {"type": "integer"}
                        }
                    }
                },
                {"name": "noop"}
            ]
        });
        let tools = tools_from_result(&result);
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "get_weather");

        let params = tools[0].parameters();
        assert!(params.contains(&("city".to_string(), "string".to_string())));
        assert!(params.contains(&("days".to_string(), "integer".to_string())));
        assert!(tools[1].parameters().is_empty());
    }

    #[test]
    fn test_parameter_without_type_defaults_to_string() {
        let tool = ToolDef {
            name: "t".to_string(),
            description: None,
            input_schema: Some(json!({"properties": {"q": {}}})),
        };
        assert_eq!(tool.parameters(), vec![("q".to_string(), "string".to_string())]);
    }

    #[test]
    fn test_resources_from_result() {
        let result = json!({
            "resources": [
                {"uri": "file:///logs/123", "name": "log"},
                {"uri": "db://users/42"}
            ]
        });
        let resources = resources_from_result(&result);
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].uri, "file:///logs/123");
        assert!(resources[1].name.is_none());
    }

    #[test]
    fn test_prompts_from_result() {
        let result = json!({"prompts": [{"name": "summarize"}]});
        let prompts = prompts_from_result(&result);
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].name, "summarize");
    }

    #[test]
    fn test_malformed_result_yields_nothing() {
        assert!(tools_from_result(&json!({"tools": "not-an-array"})).is_empty());
        assert!(resources_from_result(&json!({})).is_empty());
        assert!(prompts_from_result(&json!(null)).is_empty());
    }

    #[test]
    fn test_items_missing_required_field_skipped() {
        let result = json!({"resources": [{"name": "no-uri"}, {"uri": "ok://x"}]});
        let resources = resources_from_result(&result);
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].uri, "ok://x");
    }
}
