// SPDX-FileCopyrightText: Copyright (c) 2025 Semgate Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! OpenAI-style chat completion request and response subsets.
//!
//! Parsing is deliberately lenient: the router only understands `model` and
//! `messages`, and everything else rides along in a flattened map so a
//! mutated request re-serializes with all unknown fields intact. The
//! response side is read-only and only the `usage` block is extracted.

use serde::{Deserialize, Serialize};

use crate::config::QueryPolicy;

/// The subset of a chat completion request this router inspects or rewrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Unknown top-level fields, preserved verbatim across mutation.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChatCompletionRequest {
    pub fn parse(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Content of the last `user` message, or `""` when there is none.
    pub fn last_user_content(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    /// The cache key text under the given policy.
    pub fn cache_query(&self, policy: QueryPolicy) -> String {
        match policy {
            QueryPolicy::LastUserMessage => self.last_user_content().to_string(),
            QueryPolicy::JoinUserMessages => self
                .messages
                .iter()
                .filter(|m| m.role == "user")
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Contents of every message whose role is neither `user` nor empty,
    /// joined by single spaces. The user turn is noisy and task-orthogonal;
    /// routing scores only this context.
    pub fn non_user_context(&self) -> String {
        self.messages
            .iter()
            .filter(|m| !m.role.is_empty() && m.role != "user")
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Token accounting reported by the upstream backend. Absent fields count
/// as zero.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ChatCompletionUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    usage: ChatCompletionUsage,
}

/// Extract the usage block from an upstream response body.
pub fn parse_usage(body: &[u8]) -> serde_json::Result<ChatCompletionUsage> {
    serde_json::from_slice::<ChatCompletionResponse>(body).map(|r| r.usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: &str) -> ChatCompletionRequest {
        ChatCompletionRequest::parse(json.as_bytes()).unwrap()
    }

    #[test]
    fn round_trip_preserves_unknown_fields_and_replaces_model() {
        let mut req = request(
            r#"{"model":"base","temperature":0.7,"stream":false,
                "messages":[{"role":"user","content":"hi","name":"alice"}]}"#,
        );
        req.model = "routed".to_string();

        let reparsed = request(std::str::from_utf8(&req.to_bytes().unwrap()).unwrap());
        assert_eq!(reparsed.model, "routed");
        assert_eq!(reparsed.extra["temperature"], 0.7);
        assert_eq!(reparsed.extra["stream"], false);
        assert_eq!(reparsed.messages.len(), 1);
        assert_eq!(reparsed.messages[0].content, "hi");
        assert_eq!(reparsed.messages[0].extra["name"], "alice");
    }

    #[test]
    fn last_user_content_picks_the_final_user_turn() {
        let req = request(
            r#"{"model":"m","messages":[
                {"role":"user","content":"first"},
                {"role":"assistant","content":"answer"},
                {"role":"user","content":"second"}]}"#,
        );
        assert_eq!(req.last_user_content(), "second");
    }

    #[test]
    fn last_user_content_is_empty_without_user_turns() {
        let req = request(r#"{"model":"m","messages":[{"role":"system","content":"s"}]}"#);
        assert_eq!(req.last_user_content(), "");
    }

    #[test]
    fn cache_query_policies_differ_on_multi_turn_input() {
        let req = request(
            r#"{"model":"m","messages":[
                {"role":"user","content":"first"},
                {"role":"user","content":"second"}]}"#,
        );
        assert_eq!(req.cache_query(QueryPolicy::LastUserMessage), "second");
        assert_eq!(req.cache_query(QueryPolicy::JoinUserMessages), "first second");
    }

    #[test]
    fn non_user_context_skips_user_and_unlabelled_messages() {
        let req = request(
            r#"{"model":"m","messages":[
                {"role":"system","content":"be terse"},
                {"role":"","content":"stray"},
                {"role":"user","content":"hi"},
                {"role":"assistant","content":"hello"}]}"#,
        );
        assert_eq!(req.non_user_context(), "be terse hello");
    }

    #[test]
    fn usage_defaults_to_zero_when_missing() {
        let usage = parse_usage(br#"{"id":"x","choices":[]}"#).unwrap();
        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.completion_tokens, 0);

        let usage = parse_usage(
            br#"{"usage":{"prompt_tokens":12,"completion_tokens":30,"total_tokens":42}}"#,
        )
        .unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 30);
        assert_eq!(usage.total_tokens, 42);
    }

    #[test]
    fn malformed_bodies_are_rejected() {
        assert!(ChatCompletionRequest::parse(b"not json").is_err());
        assert!(parse_usage(b"{").is_err());
    }
}
