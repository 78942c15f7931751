//! Thinking-signature rectification (spec.md §4.8, scenario S2) as a
//! standalone pure-function service over a JSON request body, mirroring the
//! Python original's isolated `thinking_rectifier.py` module (SPEC_FULL.md
//! §2) rather than inlining the rewrite into `FailoverEngine`'s retry loop.

use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RectifyError {
    /// Stage 2 was attempted on a provider_type other than `antigravity`.
    NotEligibleForStage2,
}

/// Strips `thinking`/`redacted_thinking` content blocks, strips `signature`
/// fields on the blocks that remain, and conditionally removes a top-level
/// `thinking` field when the last assistant message now has a `tool_use`
/// block but no leading thinking block. Returns whether the body changed.
pub fn rectify_stage1(body: &mut JsonValue) -> bool {
    let mut changed = false;
    if let Some(messages) = body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for message in messages.iter_mut() {
            if message.get("role").and_then(|r| r.as_str()) != Some("assistant") {
                continue;
            }
            let Some(content) = message.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            let before = content.len();
            content.retain(|block| {
                !matches!(block.get("type").and_then(|t| t.as_str()), Some("thinking") | Some("redacted_thinking"))
            });
            if content.len() != before {
                changed = true;
            }
            for block in content.iter_mut() {
                if block.get("type").and_then(|t| t.as_str()) != Some("thinking")
                    && let Some(obj) = block.as_object_mut()
                    && obj.remove("signature").is_some()
                {
                    changed = true;
                }
            }
        }

        if let Some(last_assistant) = messages
            .iter_mut()
            .rev()
            .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("assistant"))
        {
            let has_tool_use = last_assistant
                .get("content")
                .and_then(|c| c.as_array())
                .is_some_and(|blocks| blocks.iter().any(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_use")));
            let leads_with_thinking = last_assistant
                .get("content")
                .and_then(|c| c.as_array())
                .and_then(|blocks| blocks.first())
                .is_some_and(|b| b.get("type").and_then(|t| t.as_str()) == Some("thinking"));
            if has_tool_use && !leads_with_thinking
                && let Some(obj) = body.as_object_mut()
                && obj.remove("thinking").is_some()
            {
                changed = true;
            }
        }
    }
    changed
}

/// Additionally degrades `tool_use`/`tool_result` blocks into plain text and
/// force-disables top-level thinking. Only ever granted once, and only for
/// `provider_type == "antigravity"` (spec.md §4.8).
pub fn rectify_stage2(body: &mut JsonValue, provider_type: &str) -> Result<bool, RectifyError> {
    if provider_type != "antigravity" {
        return Err(RectifyError::NotEligibleForStage2);
    }
    rectify_stage1(body);
    let mut changed = false;

    if let Some(messages) = body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for message in messages.iter_mut() {
            let Some(content) = message.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for block in content.iter_mut() {
                let kind = block.get("type").and_then(|t| t.as_str()).map(str::to_string);
                match kind.as_deref() {
                    Some("tool_use") => {
                        let name = block.get("name").and_then(|n| n.as_str()).unwrap_or("tool");
                        let input = block.get("input").cloned().unwrap_or(JsonValue::Null);
                        *block = JsonValue::Object(serde_json::Map::from_iter([
                            ("type".to_string(), JsonValue::String("text".to_string())),
                            (
                                "text".to_string(),
                                JsonValue::String(format!("[tool call: {name}({input})]")),
                            ),
                        ]));
                        changed = true;
                    }
                    Some("tool_result") => {
                        let text = block
                            .get("content")
                            .map(|c| c.to_string())
                            .unwrap_or_default();
                        *block = JsonValue::Object(serde_json::Map::from_iter([
                            ("type".to_string(), JsonValue::String("text".to_string())),
                            ("text".to_string(), JsonValue::String(format!("[tool result: {text}]"))),
                        ]));
                        changed = true;
                    }
                    _ => {}
                }
            }
        }
    }

    if let Some(obj) = body.as_object_mut()
        && obj.remove("thinking").is_some()
    {
        changed = true;
    }

    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stage1_strips_thinking_blocks_and_signatures_and_top_level_thinking() {
        let mut body = json!({
            "thinking": {"type": "enabled", "budget_tokens": 1024},
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "do a thing"}]},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "...", "signature": "sig1"},
                    {"type": "tool_use", "id": "t1", "name": "search", "input": {}, "signature": "sig2"}
                ]}
            ]
        });
        let changed = rectify_stage1(&mut body);
        assert!(changed);
        let assistant_content = body["messages"][1]["content"].as_array().unwrap();
        assert_eq!(assistant_content.len(), 1);
        assert_eq!(assistant_content[0]["type"], "tool_use");
        assert!(assistant_content[0].get("signature").is_none());
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn stage1_keeps_top_level_thinking_when_assistant_leads_with_thinking() {
        let mut body = json!({
            "thinking": {"type": "enabled"},
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "plan", "signature": "sig"},
                ]}
            ]
        });
        rectify_stage1(&mut body);
        // No tool_use present at all after stripping thinking -> has_tool_use
        // is false, so top-level thinking is untouched by that specific rule.
        assert!(body.get("thinking").is_some());
    }

    #[test]
    fn stage2_rejected_on_non_antigravity_provider() {
        let mut body = json!({"messages": []});
        assert_eq!(rectify_stage2(&mut body, "openai"), Err(RectifyError::NotEligibleForStage2));
    }

    #[test]
    fn stage2_degrades_tool_blocks_to_text_for_antigravity() {
        let mut body = json!({
            "thinking": {"type": "enabled"},
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "name": "search", "input": {"q": "x"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "content": "42"}
                ]}
            ]
        });
        let changed = rectify_stage2(&mut body, "antigravity").unwrap();
        assert!(changed);
        assert_eq!(body["messages"][0]["content"][0]["type"], "text");
        assert_eq!(body["messages"][1]["content"][0]["type"], "text");
        assert!(body.get("thinking").is_none());
    }
}
