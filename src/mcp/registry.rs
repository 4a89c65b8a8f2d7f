use crate::mcp::error::McpError;
use rust_mcp_schema::mcp_2024_11_05::Tool;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// A remote operation discovered through `tools/list`, with its input schema
/// held as plain JSON for local validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

fn default_input_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl From<Tool> for ToolDescriptor {
    fn from(tool: Tool) -> Self {
        let mut input_schema =
            serde_json::to_value(&tool.input_schema).unwrap_or_else(|_| default_input_schema());
        // Absent optional members serialize as null, which is not a valid schema keyword.
        if let Value::Object(members) = &mut input_schema {
            members.retain(|_, value| !value.is_null());
        }
        Self::new(tool.name, tool.description, input_schema)
    }
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: Option<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description,
            input_schema,
        }
    }

    /// Parameter names declared under `properties`, in schema order.
    pub fn parameter_names(&self) -> Vec<&str> {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|properties| properties.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn required_parameters(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|required| required.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Checks `arguments` against the declared schema. A schema that cannot be
    /// compiled is not treated as a local failure; the server stays the authority.
    pub fn validate_arguments(&self, arguments: &Value) -> Result<(), McpError> {
        let validator = match jsonschema::validator_for(&self.input_schema) {
            Ok(validator) => validator,
            Err(err) => {
                debug!(tool = %self.name, error = %err, "Skipping argument validation");
                return Ok(());
            }
        };
        validator
            .validate(arguments)
            .map_err(|err| McpError::InvalidArguments {
                tool: self.name.clone(),
                reason: err.to_string(),
            })
    }
}

/// Immutable snapshot of the tools offered by one connection.
///
/// Catalogs are never edited in place: a handshake or refresh builds a new one
/// and publishes it whole.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    pub fn new(descriptors: Vec<ToolDescriptor>) -> Self {
        let mut tools = Vec::with_capacity(descriptors.len());
        let mut index = HashMap::with_capacity(descriptors.len());
        for tool in descriptors {
            if index.contains_key(&tool.name) {
                warn!(tool = %tool.name, "Ignoring duplicate tool name");
                continue;
            }
            index.insert(tool.name.clone(), tools.len());
            tools.push(tool);
        }
        Self { tools, index }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&position| &self.tools[position])
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|tool| tool.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn grade_tool() -> ToolDescriptor {
        ToolDescriptor::new(
            "grade",
            Some("Grade a submission".to_string()),
            json!({
                "type": "object",
                "properties": {
                    "submission": {"type": "string"},
                    "max_score": {"type": "integer"}
                },
                "required": ["submission"]
            }),
        )
    }

    #[test]
    fn catalog_keeps_first_of_duplicate_names() {
        let catalog = ToolCatalog::new(vec![
            grade_tool(),
            ToolDescriptor::new("grade", None, json!({})),
            ToolDescriptor::new("lookup", None, json!({})),
        ]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(
            catalog.get("grade").and_then(|tool| tool.description.as_deref()),
            Some("Grade a submission")
        );
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["grade", "lookup"]);
    }

    #[test]
    fn descriptor_from_listed_tool_keeps_schema() {
        let tool = serde_json::from_value::<Tool>(json!({
            "name": "grade",
            "description": "Grade a submission",
            "inputSchema": {
                "type": "object",
                "properties": {"submission": {"type": "string"}},
                "required": ["submission"]
            }
        }))
        .expect("tool");
        let descriptor = ToolDescriptor::from(tool);
        assert_eq!(descriptor.name, "grade");
        assert_eq!(descriptor.description.as_deref(), Some("Grade a submission"));
        assert_eq!(descriptor.required_parameters(), vec!["submission"]);
        assert_eq!(descriptor.input_schema["type"], "object");
        assert!(descriptor.validate_arguments(&json!({})).is_err());
    }

    #[test]
    fn schema_helpers_list_parameters() {
        let tool = grade_tool();
        assert_eq!(tool.required_parameters(), vec!["submission"]);
        let mut names = tool.parameter_names();
        names.sort_unstable();
        assert_eq!(names, vec!["max_score", "submission"]);
    }

    #[test]
    fn validation_rejects_missing_required_parameter() {
        let tool = grade_tool();
        assert!(tool
            .validate_arguments(&json!({"submission": "x = 2"}))
            .is_ok());
        let err = tool
            .validate_arguments(&json!({"max_score": 10}))
            .expect_err("missing submission should fail");
        assert!(matches!(err, McpError::InvalidArguments { ref tool, .. } if tool == "grade"));
    }

    #[test]
    fn uncompilable_schema_does_not_block_invocation() {
        let tool = ToolDescriptor::new("odd", None, json!({"type": 12}));
        assert!(tool.validate_arguments(&json!({})).is_ok());
    }
}
