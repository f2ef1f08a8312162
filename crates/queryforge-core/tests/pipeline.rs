//! End-to-end runs of the generation pipeline against scripted clients

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use queryforge_core::{
    Access, GenerationClient, GenerationError, GenerationOptions, GenerationResult, GeneratorSettings, PipelineError,
    Prompt, QueryGenerator, RequestError,
};
use queryforge_guard::MatchedRule;
use queryforge_schema::{Dialect, SchemaDescription};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replies with canned answers in order and records every prompt it sees
#[derive(Default)]
struct ScriptedClient {
    replies: Mutex<VecDeque<Result<String, GenerationError>>>,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedClient {
    fn replying(reply: &str) -> Arc<Self> {
        Self::with(Ok(reply.to_string()))
    }

    fn with(reply: Result<String, GenerationError>) -> Arc<Self> {
        let client = Self::default();
        client.replies.lock().unwrap().push_back(reply);
        Arc::new(client)
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn last_prompt(&self) -> Prompt {
        self.prompts.lock().unwrap().last().cloned().expect("no prompt recorded")
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(GenerationError::TransportFailure("script exhausted".to_string())))
    }
}

/// Never answers
struct SilentClient;

#[async_trait]
impl GenerationClient for SilentClient {
    async fn complete(&self, _prompt: &Prompt) -> Result<String, GenerationError> {
        std::future::pending().await
    }
}

fn shop() -> SchemaDescription {
    serde_json::from_value(serde_json::json!({
        "name": "shop",
        "tables": [
            {
                "name": "users",
                "fields": [
                    {"name": "id", "type": "integer", "nullable": false},
                    {"name": "email", "type": "varchar(255)"}
                ],
                "primary_key": ["id"]
            },
            {
                "name": "orders",
                "fields": [
                    {"name": "id", "type": "integer"},
                    {"name": "user_id", "type": "integer"}
                ],
                "relationships": [
                    {"field": "user_id", "references_table": "users", "references_field": "id"}
                ]
            }
        ]
    }))
    .unwrap()
}

fn generator(client: Arc<dyn GenerationClient>) -> QueryGenerator {
    QueryGenerator::new(client, GeneratorSettings::default())
}

async fn run(reply: &str, dialect: &str) -> Result<GenerationResult, PipelineError> {
    generator(ScriptedClient::replying(reply))
        .generate_from("show the users", &shop(), dialect, None)
        .await
}

#[tokio::test]
async fn unbounded_read_gets_default_limit() {
    let client = ScriptedClient::replying("Here you go:\n```sql\nSELECT id, email FROM users\n```\nEnjoy.");
    let result = generator(client.clone())
        .generate_from("list all users", &shop(), "postgres", None)
        .await
        .unwrap();

    assert_eq!(
        result,
        GenerationResult {
            query: "SELECT id, email FROM users LIMIT 100".to_string(),
            dialect: Dialect::Postgres,
            was_limited: true,
        }
    );

    let prompt = client.last_prompt();
    assert!(prompt.user.contains("Database type: PostgreSQL"));
    assert!(prompt.user.contains("Question: list all users"));
    assert!(prompt.user.contains("Table users (primary key: id)"));
    assert!(prompt.user.contains("foreign key user_id -> users.id"));
}

#[tokio::test]
async fn bounded_read_passes_unchanged() {
    let result = run("SELECT id FROM users LIMIT 10", "mysql").await.unwrap();
    assert_eq!(result.query, "SELECT id FROM users LIMIT 10");
    assert!(!result.was_limited);
}

#[tokio::test]
async fn qualified_update_is_safe() {
    let result = run("UPDATE users SET email = 'x' WHERE id = 5", "sqlite").await.unwrap();
    assert_eq!(result.query, "UPDATE users SET email = 'x' WHERE id = 5");
    assert!(!result.was_limited);
}

#[tokio::test]
async fn override_uses_dialect_syntax() {
    let client = ScriptedClient::replying("SELECT email FROM users");
    let result = generator(client)
        .generate_from("emails", &shop(), "SQL Server", Some(5))
        .await
        .unwrap();
    assert_eq!(result.query, "SELECT TOP 5 email FROM users");
    assert_eq!(result.dialect, Dialect::Sqlserver);
    assert!(result.was_limited);
}

#[tokio::test]
async fn destructive_query_is_refused() {
    let err = run("DROP TABLE users", "postgres").await.unwrap_err();
    assert_eq!(err.kind(), "unsafe_query");
    assert_eq!(err.matched_rule(), Some(MatchedRule::DestructiveOp));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn stacked_statements_are_refused() {
    let err = run("SELECT * FROM users; DROP TABLE users;", "mysql").await.unwrap_err();
    assert_eq!(err.matched_rule(), Some(MatchedRule::MultiStatement));
}

#[tokio::test]
async fn unqualified_mutation_is_refused() {
    let err = run("DELETE FROM orders", "oracle").await.unwrap_err();
    assert_eq!(err.matched_rule(), Some(MatchedRule::UnqualifiedMutation));
}

#[tokio::test]
async fn mongo_find_is_bounded() {
    let result = run("```javascript\ndb.users.find({ active: true })\n```", "mongodb")
        .await
        .unwrap();
    assert_eq!(result.query, "db.users.find({ active: true }).limit(100)");
    assert!(result.was_limited);
}

#[tokio::test]
async fn mongo_delete_many_without_filter_is_refused() {
    let err = run("db.users.deleteMany({})", "mongo").await.unwrap_err();
    assert_eq!(err.matched_rule(), Some(MatchedRule::UnqualifiedMutation));
}

#[tokio::test]
async fn ambiguous_shape_fails_enforcement() {
    let err = run("SELECT id FROM users UNION SELECT user_id FROM orders", "postgres")
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Enforcement(_)), "{err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn prose_only_reply_has_no_query() {
    let err = run("I'm sorry, I can't help with that.", "postgres").await.unwrap_err();
    assert_eq!(err.kind(), "no_query_found");
}

#[tokio::test]
async fn blank_reply_is_empty_response() {
    let err = run("  \n ", "postgres").await.unwrap_err();
    assert!(matches!(err, PipelineError::Generation(GenerationError::EmptyResponse)));
}

#[tokio::test]
async fn client_errors_propagate() {
    let client = ScriptedClient::with(Err(GenerationError::RateLimited("slow down".to_string())));
    let err = generator(client)
        .generate_from("q", &shop(), "postgres", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "rate_limited");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn silent_client_times_out() {
    let settings = GeneratorSettings {
        timeout: Duration::from_millis(20),
        ..GeneratorSettings::default()
    };
    let err = QueryGenerator::new(Arc::new(SilentClient), settings)
        .generate_from("q", &shop(), "postgres", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Generation(GenerationError::Timeout(d)) if d == Duration::from_millis(20)
    ));
}

#[tokio::test]
async fn disabled_dialect_fails_before_prompting() {
    let client = ScriptedClient::replying("SELECT 1");
    let settings = GeneratorSettings {
        enabled_dialects: [Dialect::Postgres].into_iter().collect(),
        ..GeneratorSettings::default()
    };
    let err = QueryGenerator::new(client.clone(), settings)
        .generate_from("q", &shop(), "oracle", None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::DialectDisabled(Dialect::Oracle)));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn oversized_row_limit_is_a_request_error() {
    let client = ScriptedClient::replying("SELECT 1");
    let err = generator(client.clone())
        .generate_from("q", &shop(), "postgres", Some(50_001))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Request(RequestError::RowLimitTooLarge { requested: 50_001, max: 50_000 })
    ));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn bad_inputs_are_rejected() {
    let pipeline = generator(ScriptedClient::replying("SELECT 1"));

    let err = pipeline.generate_from("q", &shop(), "db2", None).await.unwrap_err();
    assert_eq!(err.kind(), "unknown_dialect");

    let err = pipeline.generate_from("   ", &shop(), "postgres", None).await.unwrap_err();
    assert!(matches!(err, PipelineError::Request(RequestError::EmptyQuestion)));

    let mut declared = shop();
    declared.dialect = Some("mysql".to_string());
    let err = pipeline.generate_from("q", &declared, "postgres", None).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_schema");
}

#[tokio::test]
async fn blank_line_inside_fence_keeps_filter() {
    let result = run("```sql\nSELECT *\nFROM orders\n\nWHERE user_id = 5\n```", "postgres")
        .await
        .unwrap();
    assert_eq!(result.query, "SELECT *\nFROM orders\n\nWHERE user_id = 5 LIMIT 100");
    assert!(result.was_limited);
}

fn read_only() -> GenerationOptions {
    GenerationOptions {
        access: Access::ReadOnly,
        ..GenerationOptions::default()
    }
}

#[tokio::test]
async fn read_only_refuses_qualified_write() {
    let client = ScriptedClient::replying("UPDATE users SET email = 'x' WHERE id = 5");
    let err = generator(client.clone())
        .generate_with("change the email of user 5", &shop(), "postgres", &read_only())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "unsafe_query");
    assert_eq!(err.matched_rule(), Some(MatchedRule::WriteNotAllowed));
    assert!(client.last_prompt().user.contains("Mode: read-only."));
}

#[tokio::test]
async fn read_only_still_bounds_reads() {
    let client = ScriptedClient::replying("db.users.find({})");
    let result = generator(client)
        .generate_with("all users", &shop(), "mongodb", &read_only())
        .await
        .unwrap();
    assert_eq!(result.query, "db.users.find({}).limit(100)");
}

#[tokio::test]
async fn model_override_reaches_client() {
    let client = ScriptedClient::replying("SELECT id FROM users LIMIT 1");
    let options = GenerationOptions {
        model: Some("gpt-4o".to_string()),
        ..GenerationOptions::default()
    };
    generator(client.clone())
        .generate_with("one user", &shop(), "sqlite", &options)
        .await
        .unwrap();
    assert_eq!(client.last_prompt().model.as_deref(), Some("gpt-4o"));

    let client = ScriptedClient::replying("SELECT id FROM users LIMIT 1");
    generator(client.clone())
        .generate_from("one user", &shop(), "sqlite", None)
        .await
        .unwrap();
    assert_eq!(client.last_prompt().model, None);
}
