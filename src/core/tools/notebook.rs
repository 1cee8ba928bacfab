//! `record_memory`: captures facts the interviewer hears during a session.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{ToolDeclaration, ToolError, ToolHandler};

pub const RECORD_MEMORY_TOOL: &str = "record_memory";

/// One recorded fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub fact: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub people: Vec<String>,
    /// Unix seconds
    pub recorded_at: u64,
}

#[derive(Debug, Deserialize)]
struct RecordMemoryArgs {
    fact: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    people: Vec<String>,
}

/// In-memory notebook of facts recorded through tool calls.
///
/// Clones share the same entries, so the caller can keep a handle and read
/// back what the session recorded.
#[derive(Debug, Clone, Default)]
pub struct MemoryNotebook {
    entries: Arc<RwLock<Vec<MemoryEntry>>>,
}

impl MemoryNotebook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<MemoryEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl ToolHandler for MemoryNotebook {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: RECORD_MEMORY_TOOL.to_string(),
            description: "Save a concrete fact, date, place or name the user just shared \
                          so it can be kept in their archive."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "fact": {
                        "type": "string",
                        "description": "The fact, in one sentence"
                    },
                    "category": {
                        "type": "string",
                        "description": "Optional topic such as childhood, family or career"
                    },
                    "people": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Names of people involved"
                    }
                },
                "required": ["fact"]
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let args: RecordMemoryArgs =
            serde_json::from_value(args).map_err(|e| ToolError::MalformedArgs(e.to_string()))?;
        let fact = args.fact.trim();
        if fact.is_empty() {
            return Err(ToolError::MalformedArgs("fact must not be empty".to_string()));
        }

        let recorded_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let entry = MemoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            fact: fact.to_string(),
            category: args.category.filter(|c| !c.trim().is_empty()),
            people: args.people,
            recorded_at,
        };

        let id = entry.id.clone();
        let count = {
            let mut entries = self.entries.write();
            entries.push(entry);
            entries.len()
        };
        tracing::info!(memory_id = %id, count, "memory recorded");

        Ok(json!({ "status": "recorded", "id": id, "count": count }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_memory() {
        let notebook = MemoryNotebook::new();
        let handle = notebook.clone();

        let result = notebook
            .call(json!({"fact": "Grew up in Lisbon", "category": "childhood", "people": ["Ana"]}))
            .await
            .unwrap();
        assert_eq!(result["status"], "recorded");
        assert_eq!(result["count"], 1);

        let entries = handle.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].fact, "Grew up in Lisbon");
        assert_eq!(entries[0].category.as_deref(), Some("childhood"));
        assert_eq!(entries[0].people, vec!["Ana".to_string()]);
        assert_eq!(entries[0].id, result["id"].as_str().unwrap());
    }

    #[tokio::test]
    async fn test_missing_fact_is_malformed() {
        let notebook = MemoryNotebook::new();
        let err = notebook.call(json!({"category": "x"})).await.unwrap_err();
        assert_eq!(err.kind(), "malformed_args");

        let err = notebook.call(json!({"fact": "   "})).await.unwrap_err();
        assert_eq!(err.kind(), "malformed_args");
        assert!(notebook.is_empty());
    }

    #[test]
    fn test_declaration_requires_fact() {
        let decl = MemoryNotebook::new().declaration();
        assert_eq!(decl.name, RECORD_MEMORY_TOOL);
        assert_eq!(decl.parameters["required"], json!(["fact"]));
    }
}
