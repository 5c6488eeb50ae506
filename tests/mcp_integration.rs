#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! MCP Server Integration Tests
//!
//! Drives a server built from a corpus on disk through a line-by-line client
//! session, the way an MCP client talks to `pdf-qa serve`.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

use pdf_qa::answer::{Generator, REFUSAL_ANSWER};
use pdf_qa::config::Config;
use pdf_qa::embeddings::Embedder;
use pdf_qa::indexer::{IndexLifecycle, init_data_dir};
use pdf_qa::mcp::protocol::{
    CallToolParams, CallToolResult, MCP_VERSION, Tool, ToolContent, error_codes, mcp_error_codes,
};
use pdf_qa::mcp::{AskHandler, ConnectionState, McpResult, McpServer, ToolHandler};
use pdf_qa::qa::QaEngine;

const TRANSCRIPT: &str = "Monica: Welcome to Thanksgiving dinner!\n\n\
    Phoebe: See, he's her lobster. Lobsters mate for life.\n\n\
    Joey: Joey doesn't share food!\n";

/// Counts occurrences of a few corpus words
struct WordCountEmbedder;

impl Embedder for WordCountEmbedder {
    fn model_id(&self) -> &str {
        "word-count"
    }

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let lower = text.to_lowercase();
        Ok(["thanksgiving", "lobster", "food"]
            .iter()
            .map(|word| lower.matches(word).count() as f32)
            .collect())
    }
}

/// Answers from the lobster passage when it was retrieved first
struct LobsterGenerator;

impl Generator for LobsterGenerator {
    fn generate(&self, prompt: &str, _max_tokens: u32) -> anyhow::Result<String> {
        let context = prompt
            .split_once("context:\n")
            .map(|(_, rest)| rest)
            .unwrap_or_default();
        if prompt.contains("question: Who is her lobster?") && context.contains("Lobsters mate") {
            Ok("Phoebe says he is her lobster, because lobsters mate for life.".to_string())
        } else {
            Ok(REFUSAL_ANSWER.to_string())
        }
    }
}

/// Echoes its `text` argument back
struct EchoHandler;

#[async_trait]
impl ToolHandler for EchoHandler {
    async fn handle(&self, params: CallToolParams) -> McpResult<CallToolResult> {
        let text = params
            .arguments
            .as_ref()
            .and_then(|args| args.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(CallToolResult::text(text))
    }
}

/// Build the engine the way `pdf-qa serve` does, from documents on disk
fn engine_from_corpus(temp_dir: &TempDir) -> Arc<QaEngine> {
    init_data_dir(temp_dir.path()).expect("data dir should initialize");
    std::fs::write(temp_dir.path().join("friends.txt"), TRANSCRIPT)
        .expect("should write document");

    let mut config = Config::load(temp_dir.path()).expect("config should load");
    config.corpus.documents = vec![PathBuf::from("friends.txt")];
    config.retrieval.top_k = 2;

    let embedder = Arc::new(WordCountEmbedder);
    let index = IndexLifecycle::new(&config, &*embedder)
        .initialize()
        .expect("index should initialize");
    Arc::new(
        QaEngine::new(Arc::new(index), embedder, Arc::new(LobsterGenerator), &config)
            .expect("engine should assemble"),
    )
}

async fn create_server(engine: Arc<QaEngine>) -> Arc<McpServer> {
    let server = McpServer::new("pdf-qa".to_string(), "0.0.0-test".to_string())
        .with_instructions("Ask about the corpus".to_string());
    server
        .register_tool(AskHandler::tool_definition(), AskHandler::new(engine))
        .await;
    Arc::new(server)
}

/// Client end of an in-memory connection
struct TestClient {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    server_task: JoinHandle<anyhow::Result<()>>,
}

impl TestClient {
    fn connect(server: Arc<McpServer>) -> Self {
        let (client, transport) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(transport);
        let server_task = tokio::spawn(server.serve(server_read, server_write));
        let (reader, writer) = tokio::io::split(client);
        Self {
            reader: BufReader::new(reader),
            writer,
            server_task,
        }
    }

    async fn send(&mut self, message: Value) {
        let mut line = message.to_string();
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .expect("write should succeed");
    }

    async fn receive(&mut self) -> Value {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .await
            .expect("read should succeed");
        serde_json::from_str(&line).expect("response should be JSON")
    }

    async fn request(&mut self, id: i64, method: &str, params: Value) -> Value {
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        let response = self.receive().await;
        assert_eq!(response["id"], id, "response to the wrong request");
        response
    }

    async fn initialize(&mut self, protocol_version: &str) -> Value {
        let response = self
            .request(
                1,
                "initialize",
                json!({
                    "protocolVersion": protocol_version,
                    "capabilities": {},
                    "clientInfo": {"name": "integration-test", "version": "1.0"}
                }),
            )
            .await;
        self.send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        response
    }

    async fn close(mut self) {
        self.writer.shutdown().await.expect("shutdown should succeed");
        drop(self.writer);
        self.server_task
            .await
            .expect("server task should not panic")
            .expect("server should stop cleanly at EOF");
    }
}

#[tokio::test]
async fn ask_session_over_indexed_corpus() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let server = create_server(engine_from_corpus(&temp_dir)).await;
    let mut client = TestClient::connect(Arc::clone(&server));

    let init = client.initialize(MCP_VERSION).await;
    assert_eq!(init["result"]["protocolVersion"], MCP_VERSION);
    assert_eq!(init["result"]["instructions"], "Ask about the corpus");
    assert!(init["result"]["capabilities"]["tools"].is_object());

    let tools = client.request(2, "tools/list", json!({})).await;
    assert_eq!(tools["result"]["tools"][0]["name"], "ask");
    assert_eq!(
        tools["result"]["tools"][0]["inputSchema"]["required"],
        json!(["question"])
    );

    let answer = client
        .request(
            3,
            "tools/call",
            json!({"name": "ask", "arguments": {"question": "Who is her lobster?"}}),
        )
        .await;
    assert_eq!(answer["result"]["isError"], false);
    let text = answer["result"]["content"][0]["text"]
        .as_str()
        .expect("answer text");
    assert!(text.contains("lobsters mate for life"), "got {text}");

    let refusal = client
        .request(
            4,
            "tools/call",
            json!({"name": "ask", "arguments": {"question": "What is the capital of France?"}}),
        )
        .await;
    assert_eq!(refusal["result"]["content"][0]["text"], REFUSAL_ANSWER);

    assert_eq!(server.connection_state().await, ConnectionState::Ready);
    client.close().await;
    assert_eq!(server.connection_state().await, ConnectionState::Closed);
}

#[tokio::test]
async fn restarted_server_answers_from_persisted_index() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let first = engine_from_corpus(&temp_dir);
    let second = engine_from_corpus(&temp_dir);
    assert_eq!(first.retriever().index(), second.retriever().index());

    let mut client = TestClient::connect(create_server(second).await);
    client.initialize(MCP_VERSION).await;
    let answer = client
        .request(
            2,
            "tools/call",
            json!({"name": "ask", "arguments": {"question": "Who is her lobster?"}}),
        )
        .await;
    assert_eq!(answer["result"]["isError"], false);
    client.close().await;
}

#[tokio::test]
async fn invalid_questions_and_unknown_tools() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let mut client = TestClient::connect(create_server(engine_from_corpus(&temp_dir)).await);
    client.initialize(MCP_VERSION).await;

    for (id, arguments) in [
        (2, json!({"question": ""})),
        (3, json!({"question": "   "})),
        (4, json!({})),
        (5, json!({"question": 42})),
    ] {
        let response = client
            .request(id, "tools/call", json!({"name": "ask", "arguments": arguments}))
            .await;
        assert_eq!(
            response["error"]["code"],
            error_codes::INVALID_PARAMS,
            "arguments {arguments}"
        );
    }

    let unknown = client
        .request(6, "tools/call", json!({"name": "search", "arguments": {}}))
        .await;
    assert_eq!(unknown["error"]["code"], mcp_error_codes::TOOL_NOT_FOUND);

    let method = client.request(7, "resources/list", json!({})).await;
    assert_eq!(method["error"]["code"], error_codes::METHOD_NOT_FOUND);

    client.close().await;
}

#[tokio::test]
async fn unsupported_protocol_version_is_negotiated() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let mut client = TestClient::connect(create_server(engine_from_corpus(&temp_dir)).await);

    let init = client.initialize("1999-01-01").await;
    assert_eq!(init["result"]["protocolVersion"], MCP_VERSION);
    assert_eq!(init["result"]["serverInfo"]["name"], "pdf-qa");

    client.close().await;
}

#[tokio::test]
async fn additional_tools_can_be_registered() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let server = create_server(engine_from_corpus(&temp_dir)).await;
    server
        .register_tool(
            Tool {
                name: "echo".to_string(),
                description: Some("Echo the input".to_string()),
                input_schema: json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            },
            EchoHandler,
        )
        .await;

    let mut client = TestClient::connect(server);
    client.initialize(MCP_VERSION).await;

    let tools = client.request(2, "tools/list", json!({})).await;
    let names: Vec<&str> = tools["result"]["tools"]
        .as_array()
        .expect("tools array")
        .iter()
        .filter_map(|tool| tool["name"].as_str())
        .collect();
    assert_eq!(names, ["ask", "echo"]);

    let echoed = client
        .request(
            3,
            "tools/call",
            json!({"name": "echo", "arguments": {"text": "How you doin'?"}}),
        )
        .await;
    assert_eq!(echoed["result"]["content"][0]["text"], "How you doin'?");

    client.close().await;
}

#[tokio::test]
async fn ask_handler_used_directly() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let handler = AskHandler::new(engine_from_corpus(&temp_dir));

    let params = CallToolParams {
        name: "ask".to_string(),
        arguments: Some(
            [("question".to_string(), json!("Who is her lobster?"))]
                .into_iter()
                .collect(),
        ),
    };
    let result = handler.handle(params).await.expect("tool call should succeed");

    assert_eq!(result.is_error, Some(false));
    match result.content.first() {
        Some(ToolContent::Text { text }) => assert!(text.contains("lobster")),
        other => panic!("unexpected content: {other:?}"),
    }
}
