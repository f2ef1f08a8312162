//! MCP (Model Context Protocol) server implementation

use async_trait::async_trait;
use queryforge_core::{
    Access, GenerationOptions, GenerationResult, GeneratorSettings, PipelineError, QueryGenerator,
};
use queryforge_schema::{Dialect, SchemaDescription};
use rust_mcp_schema::{
    schema_utils::CallToolError, CallToolRequest, CallToolResult, ContentBlock, Implementation,
    InitializeResult, ListToolsRequest, ListToolsResult, RpcError, ServerCapabilities,
    ServerCapabilitiesTools, TextContent, Tool, ToolInputSchema, LATEST_PROTOCOL_VERSION,
};
use rust_mcp_sdk::{mcp_server::ServerHandler, McpServer};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, Level};

/// Arguments of the `generate_query` tool
#[derive(Debug, Deserialize)]
struct GenerateArgs {
    question: String,
    dialect: String,
    schema: SchemaDescription,
    #[serde(default)]
    row_limit: Option<u32>,
    #[serde(default = "read_only_by_default")]
    read_only: bool,
    #[serde(default)]
    model: Option<String>,
}

fn read_only_by_default() -> bool {
    true
}

impl GenerateArgs {
    fn options(&self) -> GenerationOptions {
        GenerationOptions {
            row_limit: self.row_limit,
            access: Access::from_read_only(self.read_only),
            model: self.model.clone(),
        }
    }
}

pub struct QueryForgeServerHandler {
    generator: QueryGenerator,
    model: String,
}

impl QueryForgeServerHandler {
    pub fn new(generator: QueryGenerator, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
        }
    }

    /// Create server initialization details
    pub fn server_info() -> InitializeResult {
        InitializeResult {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ServerCapabilitiesTools { list_changed: None }),
                ..Default::default()
            },
            server_info: Implementation {
                name: "queryforge-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("QueryForge natural language to SQL/MongoDB".to_string()),
            },
            instructions: Some(
                "QueryForge turns a question and a schema description into a single validated query. \
                 Use 'generate_query' to generate and 'dialects' to see what is enabled. \
                 Queries are never executed."
                    .to_string(),
            ),
            meta: None,
        }
    }

    fn property(kind: &str, description: &str) -> Map<String, Value> {
        let mut prop = Map::new();
        prop.insert("type".to_string(), Value::String(kind.to_string()));
        prop.insert("description".to_string(), Value::String(description.to_string()));
        prop
    }

    /// Define available MCP tools
    fn tools() -> Vec<Tool> {
        let mut tools = Vec::new();

        {
            let mut properties = HashMap::new();
            properties.insert(
                "question".to_string(),
                Self::property("string", "Natural language question (e.g., 'ten newest orders per customer')"),
            );

            let mut dialect_prop = Self::property("string", "Target database dialect");
            dialect_prop.insert(
                "enum".to_string(),
                Value::Array(Dialect::ALL.iter().map(|d| Value::String(d.id().to_string())).collect()),
            );
            properties.insert("dialect".to_string(), dialect_prop);

            properties.insert(
                "schema".to_string(),
                Self::property(
                    "object",
                    "Schema description: {name, tables: [{name, fields: [{name, type, nullable, description}], \
                     primary_key, relationships: [{field, references_table, references_field}]}]}",
                ),
            );

            let mut limit_prop = Self::property("integer", "Row limit for unbounded reads (defaults to the server setting)");
            limit_prop.insert("minimum".to_string(), json!(1));
            properties.insert("row_limit".to_string(), limit_prop);

            let mut read_only_prop = Self::property(
                "boolean",
                "Only allow reads (SELECT/WITH, find, aggregate, count, distinct). Defaults to true",
            );
            read_only_prop.insert("default".to_string(), json!(true));
            properties.insert("read_only".to_string(), read_only_prop);

            properties.insert(
                "model".to_string(),
                Self::property("string", "Model to ask instead of the configured one (e.g., 'gpt-4o')"),
            );

            tools.push(Tool {
                name: "generate_query".to_string(),
                description: Some(
                    "Generate a single query for a natural language question. \
                     The model's answer is validated: destructive, multi-statement, system-level and \
                     unfiltered mutating queries are refused, writes are refused unless read_only is false, \
                     and unbounded reads get a row limit."
                        .to_string(),
                ),
                input_schema: ToolInputSchema::new(
                    vec!["question".to_string(), "dialect".to_string(), "schema".to_string()],
                    Some(properties),
                ),
                title: None,
                annotations: None,
                meta: None,
                output_schema: None,
            });
        }

        tools.push(Tool {
            name: "dialects".to_string(),
            description: Some(
                "List supported dialects with their enable flags, the default row limit and the configured model."
                    .to_string(),
            ),
            input_schema: ToolInputSchema::new(vec![], Some(HashMap::new())),
            title: None,
            annotations: None,
            meta: None,
            output_schema: None,
        });

        tools
    }
}

#[async_trait]
impl ServerHandler for QueryForgeServerHandler {
    async fn handle_list_tools_request(
        &self,
        _request: ListToolsRequest,
        _runtime: Arc<dyn McpServer>,
    ) -> std::result::Result<ListToolsResult, RpcError> {
        info!("Listing available tools");

        Ok(ListToolsResult {
            tools: Self::tools(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn handle_call_tool_request(
        &self,
        request: CallToolRequest,
        _runtime: Arc<dyn McpServer>,
    ) -> std::result::Result<CallToolResult, CallToolError> {
        info!(tool = %request.params.name, "Tool called");

        match request.params.name.as_str() {
            "generate_query" => self.handle_generate_tool(request.params.arguments).await,
            "dialects" => text_result(dialects_report(self.generator.settings(), &self.model), false),
            _ => Err(CallToolError::unknown_tool(request.params.name.clone())),
        }
    }
}

impl QueryForgeServerHandler {
    async fn handle_generate_tool(
        &self,
        arguments: Option<Map<String, Value>>,
    ) -> std::result::Result<CallToolResult, CallToolError> {
        let args = arguments.ok_or_else(|| CallToolError::from_message("Missing arguments"))?;
        let args: GenerateArgs = serde_json::from_value(Value::Object(args))
            .map_err(|e| CallToolError::from_message(format!("Invalid arguments: {e}")))?;

        let outcome = self
            .generator
            .generate_with(&args.question, &args.schema, &args.dialect, &args.options())
            .await;

        match &outcome {
            Ok(result) => {
                crate::log_event!(
                    level: Level::INFO,
                    event: "query_generated",
                    dialect: result.dialect.id(),
                    was_limited: result.was_limited
                );
            }
            Err(err) => {
                crate::log_event!(
                    level: Level::WARN,
                    event: "query_not_generated",
                    dialect: args.dialect,
                    kind: err.kind()
                );
            }
        }

        let (report, is_error) = generation_report(&outcome);
        text_result(report, is_error)
    }
}

/// The tool's JSON answer: the result, or why there is none
fn generation_report(outcome: &Result<GenerationResult, PipelineError>) -> (Value, bool) {
    match outcome {
        Ok(result) => (json!(result), false),
        Err(err) => {
            let mut report = json!({
                "error": err.kind(),
                "message": err.to_string(),
                "retryable": err.is_retryable(),
            });
            if let Some(rule) = err.matched_rule() {
                report["matched_rule"] = json!(rule);
            }
            (report, true)
        }
    }
}

fn dialects_report(settings: &GeneratorSettings, model: &str) -> Value {
    let dialects: Vec<Value> = Dialect::ALL
        .iter()
        .map(|d| {
            json!({
                "id": d.id(),
                "name": d.display_name(),
                "enabled": settings.is_enabled(*d),
            })
        })
        .collect();

    json!({
        "dialects": dialects,
        "default_row_limit": settings.default_row_limit,
        "max_row_limit": settings.max_row_limit,
        "model": model,
    })
}

fn text_result(value: Value, is_error: bool) -> std::result::Result<CallToolResult, CallToolError> {
    let text = serde_json::to_string_pretty(&value)
        .map_err(|e| CallToolError::from_message(format!("Failed to serialize response: {e}")))?;

    Ok(CallToolResult {
        content: vec![ContentBlock::TextContent(TextContent::new(text, None, None))],
        is_error: is_error.then_some(true),
        meta: None,
        structured_content: None,
    })
}
