// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-conversation routing state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::index::IndexedServer;
use crate::mcp::ToolSchema;
use crate::types::{ContentBlockType, Message, MessageContent, Role};

/// One tool invocation made during a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub server: String,
    pub tool: String,
    pub call_id: String,
    pub is_error: bool,
    pub duration_ms: u64,
}

/// Everything the router and orchestrator know about one conversation.
///
/// Transitions take `&mut RoutingTurnState`, so a state value has exactly
/// one writer at a time. Concurrent conversations use separate values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingTurnState {
    /// Conversation history, oldest first.
    pub messages: Vec<Message>,

    /// Search queries issued so far; the last one drives retrieval.
    #[serde(default)]
    pub queries: Vec<String>,

    /// Hits of the most recent search.
    #[serde(default)]
    pub retrieved: Vec<IndexedServer>,

    /// Server handling the conversation; `None` means route again.
    #[serde(default)]
    pub current_server: Option<String>,

    /// Adapted tool whose arguments are being refined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_tool: Option<ToolSchema>,

    #[serde(default)]
    pub invocations: Vec<InvocationRecord>,

    /// Id of the last tool-result message whose sentinel reply was turned
    /// into an answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppressed_tool_result: Option<String>,
}

impl RoutingTurnState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a conversation from one user message.
    pub fn from_user(text: impl Into<String>) -> Self {
        let mut state = Self::new();
        state.push_user(text);
        state
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(Message::assistant(text));
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn latest_query(&self) -> Option<&str> {
        self.queries.last().map(String::as_str)
    }

    /// Text of the newest user message that is not a tool result.
    pub fn last_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User && !m.is_tool_result())
            .map(Message::text)
    }

    /// Text of the newest assistant message, if that is the last message.
    pub fn final_reply(&self) -> Option<String> {
        self.last_message()
            .filter(|m| m.role == Role::Assistant && m.tool_calls().is_empty())
            .map(Message::text)
    }

    /// Forget the selected server so the next transition routes again.
    pub fn clear_route(&mut self) {
        self.current_server = None;
        self.pending_tool = None;
    }

    /// Replace the arguments of tool call `call_id` inside message
    /// `message_id`, keeping both ids. Returns whether the call was found.
    pub fn replace_tool_arguments(&mut self, message_id: &str, call_id: &str, input: Value) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == message_id) else {
            return false;
        };
        let MessageContent::Blocks(blocks) = &mut message.content else {
            return false;
        };

        match blocks.iter_mut().find(|b| {
            b.block_type == ContentBlockType::ToolUse && b.id.as_deref() == Some(call_id)
        }) {
            Some(block) => {
                block.input = Some(input);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;
    use serde_json::json;

    fn call(id: &str, input: Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "create_pet".to_string(),
            input,
        }
    }

    #[test]
    fn test_from_user() {
        let state = RoutingTurnState::from_user("weather in Paris?");
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.last_user_text().as_deref(), Some("weather in Paris?"));
        assert!(state.current_server.is_none());
        assert!(state.latest_query().is_none());
    }

    #[test]
    fn test_last_user_text_skips_tool_results() {
        let mut state = RoutingTurnState::from_user("list tables");
        state.messages.push(Message::assistant_tool_calls("", &[call("c1", json!({}))]));
        state.messages.push(Message::tool_result("c1", "users, orders", false));
        assert_eq!(state.last_user_text().as_deref(), Some("list tables"));
    }

    #[test]
    fn test_final_reply() {
        let mut state = RoutingTurnState::from_user("hi");
        assert!(state.final_reply().is_none());
        state.push_assistant("hello");
        assert_eq!(state.final_reply().as_deref(), Some("hello"));
        state.messages.push(Message::assistant_tool_calls("", &[call("c1", json!({}))]));
        assert!(state.final_reply().is_none());
    }

    #[test]
    fn test_clear_route() {
        let mut state = RoutingTurnState::from_user("hi");
        state.current_server = Some("sqlite".to_string());
        state.pending_tool = Some(ToolSchema::new("query", "Run SQL", json!({})));
        state.clear_route();
        assert!(state.current_server.is_none());
        assert!(state.pending_tool.is_none());
    }

    #[test]
    fn test_replace_tool_arguments_keeps_ids() {
        let mut state = RoutingTurnState::from_user("add a pet");
        let message = Message::assistant_tool_calls("", &[call("c7", json!({"name": "rex"}))]);
        let message_id = message.id.clone();
        state.messages.push(message);

        assert!(state.replace_tool_arguments(&message_id, "c7", json!({"name": "Rex", "tag": "dog"})));

        let rewritten = &state.messages[1];
        assert_eq!(rewritten.id, message_id);
        let calls = rewritten.tool_calls();
        assert_eq!(calls[0].id, "c7");
        assert_eq!(calls[0].input, json!({"name": "Rex", "tag": "dog"}));

        assert!(!state.replace_tool_arguments(&message_id, "missing", json!({})));
        assert!(!state.replace_tool_arguments("nope", "c7", json!({})));
    }

    #[test]
    fn test_state_serde_roundtrip() {
        let mut state = RoutingTurnState::from_user("forecast");
        state.queries.push("forecast".to_string());
        state.current_server = Some("weather".to_string());
        state.invocations.push(InvocationRecord {
            server: "weather".to_string(),
            tool: "get_forecast".to_string(),
            call_id: "c1".to_string(),
            is_error: false,
            duration_ms: 12,
        });

        let json = serde_json::to_string(&state).unwrap();
        let parsed: RoutingTurnState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }
}
