// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! System prompts for the routing stages.
//!
//! Templates use `{name}` placeholders filled by [`render`]. Substitution is
//! single pass, so braces inside substituted values (JSON schemas, tool
//! output) are left alone.

use chrono::{SecondsFormat, Utc};

use crate::index::IndexedServer;

/// Rewrites the conversation into one search query.
pub const ROUTING_QUERY_SYSTEM_PROMPT: &str = "\
Generate a query to search for the capability server that can help with the user's latest message. \
Call the `search_query` tool with the query. Make it different from the previous queries:

<previous_queries>
{queries}
</previous_queries>

System time: {system_time}";

/// Picks one server from the retrieved documents.
pub const ROUTING_RESPONSE_SYSTEM_PROMPT: &str = "\
You select the capability server best suited to the user's request. Each retrieved document \
describes the tools, prompts and resources of one server:

{retrieved_docs}

Reply with exactly one of:
- the `id` of the single relevant document (for example: sqlite, github, weather)
- \"{nothing_relevant}\" if no server is relevant
- a clarifying question starting with \"{ambiguity_prefix}\" if several servers are equally relevant

No quotation marks, no prefix, no other text.

System time: {system_time}";

/// Drives tool selection on the selected server.
pub const ORCHESTRATOR_SYSTEM_PROMPT: &str = "\
You answer the user with the tools of the `{server}` server.

1. Work out what the user wants from the conversation.
2. Call the most appropriate tool if one applies. After a tool result, either answer from it \
or call another tool.
3. If one of the other servers below is better suited, reply exactly \"{other_servers_response}\".
4. If no tool on any server applies, reply exactly \"{idk_response}\".

Other servers:
{other_servers}

System time: {system_time}";

/// Fills in the arguments of an adapted tool from its API operation.
pub const REFINE_ARGUMENTS_SYSTEM_PROMPT: &str = "\
Call the `{tool}` tool with complete, correct arguments for the user's request. \
The tool wraps this HTTP API operation:

{operation}

Use the parameter names, locations and types of the operation exactly.

System time: {system_time}";

/// Fill `{name}` placeholders from `vars`. Unknown placeholders are kept.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, close))
        });

        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Current UTC time, as shown to the model.
pub fn system_time() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Wrap `(id, text)` pairs as `<document>` elements.
pub fn format_documents<'a>(docs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = String::from("<documents>\n");
    for (id, text) in docs {
        out.push_str(&format!("<document id=\"{}\">\n{}\n</document>\n", id, text.trim_end()));
    }
    out.push_str("</documents>");
    out
}

pub fn format_retrieved(retrieved: &[IndexedServer]) -> String {
    format_documents(
        retrieved
            .iter()
            .map(|hit| (hit.server.as_str(), hit.description.as_str())),
    )
}

/// Bullet list of earlier queries, or `(none)`.
pub fn format_queries(queries: &[String]) -> String {
    if queries.is_empty() {
        return "(none)".to_string();
    }
    queries
        .iter()
        .map(|q| format!("- {}", q))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_known_keys() {
        let out = render("Hello {name}, it is {time}.", &[("name", "Ada"), ("time", "noon")]);
        assert_eq!(out, "Hello Ada, it is noon.");
    }

    #[test]
    fn test_render_keeps_unknown_and_unbalanced() {
        assert_eq!(render("{a} {b}", &[("a", "1")]), "1 {b}");
        assert_eq!(render("open { brace", &[]), "open { brace");
        assert_eq!(render("trailing {", &[]), "trailing {");
    }

    #[test]
    fn test_render_is_single_pass() {
        let out = render("{docs} / {time}", &[("docs", "{time}"), ("time", "now")]);
        assert_eq!(out, "{time} / now");
    }

    #[test]
    fn test_render_json_values() {
        let out = render("op: {operation}", &[("operation", "{\"path\": \"/pets\"}")]);
        assert_eq!(out, "op: {\"path\": \"/pets\"}");
    }

    #[test]
    fn test_format_retrieved() {
        let hits = vec![
            IndexedServer {
                server: "weather".to_string(),
                description: "Provides tools:\n- get_forecast: Forecast\n---\n".to_string(),
                score: 0.9,
            },
            IndexedServer {
                server: "sqlite".to_string(),
                description: "Provides tools:\n- query: Run SQL\n---".to_string(),
                score: 0.2,
            },
        ];

        assert_eq!(
            format_retrieved(&hits),
            "<documents>\n\
             <document id=\"weather\">\nProvides tools:\n- get_forecast: Forecast\n---\n</document>\n\
             <document id=\"sqlite\">\nProvides tools:\n- query: Run SQL\n---\n</document>\n\
             </documents>"
        );
        assert_eq!(format_retrieved(&[]), "<documents>\n</documents>");
    }

    #[test]
    fn test_format_queries() {
        assert_eq!(format_queries(&[]), "(none)");
        assert_eq!(
            format_queries(&["weather".to_string(), "forecast paris".to_string()]),
            "- weather\n- forecast paris"
        );
    }

    #[test]
    fn test_templates_have_expected_placeholders() {
        assert!(ROUTING_QUERY_SYSTEM_PROMPT.contains("{queries}"));
        assert!(ROUTING_RESPONSE_SYSTEM_PROMPT.contains("{retrieved_docs}"));
        assert!(ROUTING_RESPONSE_SYSTEM_PROMPT.contains("{ambiguity_prefix}"));
        assert!(ORCHESTRATOR_SYSTEM_PROMPT.contains("{other_servers}"));
        assert!(REFINE_ARGUMENTS_SYSTEM_PROMPT.contains("{operation}"));
    }

    #[test]
    fn test_system_time_is_rfc3339() {
        let time = system_time();
        assert!(time.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&time).is_ok());
    }
}
