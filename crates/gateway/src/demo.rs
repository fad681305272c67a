//! The workflow gateway sessions run.
//!
//! A scripted-provider workflow exercising phases, provider streaming,
//! optional HITL confirmation, and injected-message pickup — the
//! runnable surface the command channel drives end to end.

use serde_json::{json, Value};

use orchid_domain::{ProviderRequest, Result};
use orchid_providers::ScriptedProvider;
use orchid_sessions::{Ctx, Dispatcher, PromptOptions};

/// Reducers backing `GET /sessions/{id}/state`: a running tally of
/// signals plus the accumulated response text.
pub fn dispatcher() -> Dispatcher<Value> {
    Dispatcher::new()
        .reducer("**", |state: &mut Value, signal| {
            if !state.is_object() {
                *state = json!({ "signals": 0, "text": "" });
            }
            let count = state["signals"].as_u64().unwrap_or(0);
            state["signals"] = json!(count + 1);
            state["lastSignal"] = json!(signal.name);
        })
        .reducer("text:delta", |state: &mut Value, signal| {
            let mut text = state["text"].as_str().unwrap_or_default().to_owned();
            text.push_str(signal.payload["text"].as_str().unwrap_or_default());
            state["text"] = json!(text);
        })
}

/// The session body. Input shape:
/// `{ "message"?: string, "confirm"?: bool }`.
pub async fn workflow(ctx: Ctx<Value>) -> Result<Value> {
    let message = ctx.input()["message"]
        .as_str()
        .unwrap_or("hello from orchid")
        .to_owned();

    let output = ctx
        .phase("respond", || async {
            let provider = ScriptedProvider::say("scripted", &message);
            let request = ProviderRequest::new("scripted", message.clone());
            let result = ctx.run_provider(&provider, &request).await?;
            Ok(result.output)
        })
        .await?;

    let confirmed = if ctx.input()["confirm"].as_bool().unwrap_or(false) {
        let answer = ctx
            .wait_for_user(
                "accept this response?",
                PromptOptions::default().with_choices(["yes", "no"]),
            )
            .await?;
        answer == "yes"
    } else {
        true
    };

    // Pick up any nudges injected while streaming.
    let notes: Vec<String> = ctx
        .read_messages()
        .into_iter()
        .map(|m| m.content)
        .collect();

    Ok(json!({
        "output": output,
        "confirmed": confirmed,
        "notes": notes,
    }))
}
