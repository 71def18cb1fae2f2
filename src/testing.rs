// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process test doubles.
//!
//! Fakes for every external collaborator of the router: capability servers
//! ([`FakeLauncher`], [`FakeServer`]), the decision model
//! ([`ScriptedProvider`]), the similarity index ([`MemoryIndex`]) and the
//! embedding backend ([`KeywordEmbedder`]). Used by unit tests and, through
//! the `test-util` feature, the integration tests under `tests/`.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::index::{CapabilityIndex, EmbeddingProvider, IndexEntry, IndexError, IndexedServer};
use crate::mcp::{
    CapabilityClient, McpError, McpPromptInfo, McpResourceInfo, McpToolInfo, McpToolResult,
    ServerConfig, ServerInfo, SessionLauncher,
};
use crate::types::{Message, Provider, ProviderResponse, ToolDefinition};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Capability servers
// ============================================================================

/// Behaviour of one fake capability server.
#[derive(Debug, Clone, Default)]
pub struct FakeServer {
    tools: Vec<McpToolInfo>,
    prompts: Vec<McpPromptInfo>,
    resources: Vec<McpResourceInfo>,
    tool_results: HashMap<String, McpToolResult>,
    fail_handshake: bool,
    fail_tools: bool,
    fail_prompts: bool,
    fail_resources: bool,
    hang_calls: bool,
    hang_lists: bool,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: McpToolInfo) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_prompt(mut self, prompt: McpPromptInfo) -> Self {
        self.prompts.push(prompt);
        self
    }

    pub fn with_resource(mut self, resource: McpResourceInfo) -> Self {
        self.resources.push(resource);
        self
    }

    /// Fixed result for calls to `tool`.
    pub fn with_tool_result(mut self, tool: impl Into<String>, result: McpToolResult) -> Self {
        self.tool_results.insert(tool.into(), result);
        self
    }

    pub fn failing_handshake(mut self) -> Self {
        self.fail_handshake = true;
        self
    }

    pub fn failing_list_tools(mut self) -> Self {
        self.fail_tools = true;
        self
    }

    pub fn failing_list_prompts(mut self) -> Self {
        self.fail_prompts = true;
        self
    }

    pub fn failing_list_resources(mut self) -> Self {
        self.fail_resources = true;
        self
    }

    /// `tools/call` never answers.
    pub fn hanging_calls(mut self) -> Self {
        self.hang_calls = true;
        self
    }

    /// List requests never answer.
    pub fn hanging_lists(mut self) -> Self {
        self.hang_lists = true;
        self
    }

    /// A standalone client with its own counters.
    pub fn into_client(self) -> FakeClient {
        FakeClient {
            name: "fake".to_string(),
            server: self,
            counters: Arc::new(Counters::default()),
            closed: false,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    launches: AtomicUsize,
    teardowns: AtomicUsize,
    calls: Mutex<Vec<(String, String, Value)>>,
}

/// Client side of a [`FakeServer`].
///
/// Teardown is counted once, either on `close` or on drop without close.
pub struct FakeClient {
    name: String,
    server: FakeServer,
    counters: Arc<Counters>,
    closed: bool,
}

impl FakeClient {
    fn list<T: Clone>(&self, fail: bool, items: &[T], method: &str) -> Result<Vec<T>, McpError> {
        if fail {
            return Err(McpError::Transport(format!("{} failed on '{}'", method, self.name)));
        }
        Ok(items.to_vec())
    }

    async fn maybe_hang(&self) {
        if self.server.hang_lists {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl CapabilityClient for FakeClient {
    async fn initialize(&mut self) -> Result<ServerInfo, McpError> {
        if self.server.fail_handshake {
            return Err(McpError::init_failed(&self.name, "handshake rejected"));
        }
        Ok(ServerInfo {
            name: self.name.clone(),
            version: "1.0.0".to_string(),
            protocol_version: Some(crate::mcp::client::PROTOCOL_VERSION.to_string()),
        })
    }

    async fn list_tools(&mut self) -> Result<Vec<McpToolInfo>, McpError> {
        self.maybe_hang().await;
        self.list(self.server.fail_tools, &self.server.tools, "tools/list")
    }

    async fn list_prompts(&mut self) -> Result<Vec<McpPromptInfo>, McpError> {
        self.maybe_hang().await;
        self.list(self.server.fail_prompts, &self.server.prompts, "prompts/list")
    }

    async fn list_resources(&mut self) -> Result<Vec<McpResourceInfo>, McpError> {
        self.maybe_hang().await;
        self.list(self.server.fail_resources, &self.server.resources, "resources/list")
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<McpToolResult, McpError> {
        lock(&self.counters.calls).push((self.name.clone(), name.to_string(), arguments.clone()));

        if self.server.hang_calls {
            std::future::pending::<()>().await;
        }

        Ok(self
            .server
            .tool_results
            .get(name)
            .cloned()
            .unwrap_or_else(|| McpToolResult::text(format!("{} called with {}", name, arguments))))
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.counters.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeClient {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.counters.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Launches [`FakeServer`]s by name and counts sessions.
#[derive(Debug, Default)]
pub struct FakeLauncher {
    servers: HashMap<String, FakeServer>,
    counters: Arc<Counters>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, name: impl Into<String>, server: FakeServer) -> Self {
        self.servers.insert(name.into(), server);
        self
    }

    pub fn launches(&self) -> usize {
        self.counters.launches.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.counters.teardowns.load(Ordering::SeqCst)
    }

    /// Every `(server, tool, arguments)` call, in order.
    pub fn calls(&self) -> Vec<(String, String, Value)> {
        lock(&self.counters.calls).clone()
    }
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    async fn launch(
        &self,
        name: &str,
        _config: &ServerConfig,
    ) -> Result<Box<dyn CapabilityClient>, McpError> {
        let server = self
            .servers
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::connection_failed(name, "no such server"))?;

        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeClient {
            name: name.to_string(),
            server,
            counters: Arc::clone(&self.counters),
            closed: false,
        }))
    }
}

// ============================================================================
// Decision model
// ============================================================================

/// One request seen by a [`ScriptedProvider`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub system_prompt: Option<String>,
}

impl RecordedRequest {
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Replies with queued responses in order; errors once the script runs out.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    next_call_id: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_response(self, response: ProviderResponse) -> Self {
        lock(&self.replies).push_back(Ok(response));
        self
    }

    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.then_response(ProviderResponse::text(text))
    }

    pub fn then_tool_call(self, name: impl Into<String>, input: Value) -> Self {
        let id = format!("call_{}", self.next_call_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.then_response(ProviderResponse::tool_call(id, name, input))
    }

    pub fn then_error(self, error: ProviderError) -> Self {
        lock(&self.replies).push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    /// Replies not yet consumed.
    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        system_prompt: Option<&str>,
    ) -> Result<ProviderResponse, ProviderError> {
        lock(&self.requests).push(RecordedRequest {
            messages: messages.to_vec(),
            tools: tools.map(|t| t.to_vec()).unwrap_or_default(),
            system_prompt: system_prompt.map(String::from),
        });

        lock(&self.replies)
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::ParseError("script exhausted".to_string())))
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Index and embeddings
// ============================================================================

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Index that scores entries by shared words with the query.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    entries: Mutex<BTreeMap<String, String>>,
    fail_search: bool,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, server: impl Into<String>, description: impl Into<String>) -> Self {
        lock(&self.entries).insert(server.into(), description.into());
        self
    }

    /// Every search fails with a storage error.
    pub fn failing_search(mut self) -> Self {
        self.fail_search = true;
        self
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CapabilityIndex for MemoryIndex {
    async fn upsert_batch(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let mut stored = lock(&self.entries);
        for entry in entries {
            stored.insert(entry.server, entry.description);
        }
        Ok(())
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<IndexedServer>, IndexError> {
        if self.fail_search {
            return Err(IndexError::Storage("search unavailable".to_string()));
        }

        let query_tokens: Vec<String> = tokens(query).collect();
        let mut hits: Vec<IndexedServer> = lock(&self.entries)
            .iter()
            .map(|(server, description)| {
                let shared = tokens(description).filter(|t| query_tokens.contains(t)).count();
                IndexedServer {
                    server: server.clone(),
                    description: description.clone(),
                    score: shared as f32,
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn get(&self, server: &str) -> Result<Option<IndexEntry>, IndexError> {
        Ok(lock(&self.entries)
            .get(server)
            .map(|d| IndexEntry::new(server, d.clone())))
    }
}

/// Bag-of-words embedder: each word is hashed into one of 256 buckets.
#[derive(Debug, Default)]
pub struct KeywordEmbedder {
    embedded: AtomicUsize,
}

impl KeywordEmbedder {
    const DIMENSIONS: usize = 256;

    pub fn new() -> Self {
        Self::default()
    }

    /// Texts embedded so far.
    pub fn embedded_texts(&self) -> usize {
        self.embedded.load(Ordering::SeqCst)
    }

    fn vectorize(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; Self::DIMENSIONS];
        for token in tokens(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            vector[(hasher.finish() as usize) % Self::DIMENSIONS] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn name(&self) -> &str {
        "Keyword"
    }

    fn model(&self) -> &str {
        "bag-of-words"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vectorize(t)).collect())
    }
}
