//! Auxiliary state injection into the Articulate Storyline player.
//!
//! Storyline courses keep their own result variables and some only report
//! completion once those agree with what the LMS is told. Injection is
//! best-effort: nothing here can fail a completion request.

use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};

use crate::decision::{DecisionCategory, DecisionLog};
use crate::discovery::ContextRef;
use crate::drivers::call::{call_host, describe_call, invoke_host};
use crate::host::HostValue;
use crate::types::{CompletionOptions, Operation};

/// Outcome of one injection pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionRecord {
    pub success: bool,
    /// Context whose global exposed `GetPlayer`.
    pub location: String,
    pub variables: Vec<Operation>,
    pub errors: Vec<String>,
}

/// The Storyline variables set, in order, with their values.
pub fn storyline_variables(options: &CompletionOptions) -> Vec<(&'static str, Value)> {
    let percent = (options.scaled_score().max(0.0) * 100.0).round();
    vec![
        ("Results.ScorePercent", json!(percent)),
        ("Results.ScorePoints", json!(options.clamped_score())),
        ("Results.PassFail", json!(options.status.is_success())),
        ("CompletionStatus", json!(options.status.as_str())),
    ]
}

/// Find the first accessible context with a Storyline player and set its
/// result variables. `None` when no player exists anywhere.
pub async fn inject_storyline(
    contexts: &[ContextRef],
    options: &CompletionOptions,
    limit: Duration,
    log: &mut DecisionLog,
) -> Option<InjectionRecord> {
    for ctx in contexts.iter().filter(|c| c.is_accessible()) {
        let Ok(global) = ctx.handle.global().await else {
            continue;
        };
        if !global.is_callable("GetPlayer").await {
            continue;
        }

        let player = match invoke_host(&global, "GetPlayer", Vec::new(), limit).await {
            Ok(HostValue::Object(player)) => player,
            Ok(other) => {
                let reason = format!("GetPlayer() returned {other:?}");
                tracing::warn!("{}: {reason}", ctx.name);
                log.record(DecisionCategory::Injection, &ctx.name, "warn", &reason);
                return Some(InjectionRecord {
                    success: false,
                    location: ctx.name.clone(),
                    variables: Vec::new(),
                    errors: vec![reason],
                });
            }
            Err(e) => {
                tracing::warn!("{}: GetPlayer failed: {e}", ctx.name);
                log.record(DecisionCategory::Injection, &ctx.name, "warn", e.to_string());
                return Some(InjectionRecord {
                    success: false,
                    location: ctx.name.clone(),
                    variables: Vec::new(),
                    errors: vec![e.to_string()],
                });
            }
        };

        let mut variables = Vec::new();
        let mut errors = Vec::new();
        for (name, value) in storyline_variables(options) {
            let call = describe_call("SetVar", &[name, &value.to_string()]);
            match call_host(&player, "SetVar", vec![name.into(), value.into()], limit).await {
                Ok(v) => variables.push(Operation::ok(call, Some(v))),
                Err(e) => {
                    errors.push(e.to_string());
                    variables.push(Operation::failed(call, None, e.to_string()));
                }
            }
        }

        let success = errors.is_empty();
        log.record_with(
            DecisionCategory::Injection,
            &ctx.name,
            if success { "injected" } else { "partial" },
            "storyline player variables",
            json!({ "set": variables.iter().filter(|op| op.success).count() }),
        );
        return Some(InjectionRecord {
            success,
            location: ctx.name.clone(),
            variables,
            errors,
        });
    }

    log.record(
        DecisionCategory::Injection,
        "storyline",
        "skip",
        "no GetPlayer() on any accessible context",
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ContextGraphSearch;
    use crate::host::memory::MemoryContext;
    use crate::host::mocks::StorylineMock;
    use crate::types::CompletionStatus;

    #[tokio::test]
    async fn test_sets_player_variables_in_ancestor() {
        let top = MemoryContext::root("https://lms.example/");
        let player = StorylineMock::install(&top.scope());
        let frame = top.add_frame("https://lms.example/story.html");
        let contexts = ContextGraphSearch::new(10, 10).search(&frame.handle()).await;

        let opts = CompletionOptions {
            score: 80.0,
            ..Default::default()
        };
        let mut log = DecisionLog::default();
        let record = inject_storyline(&contexts, &opts, Duration::from_secs(1), &mut log)
            .await
            .unwrap();
        assert!(record.success);
        assert_eq!(record.variables.len(), 4);
        assert_eq!(player.var("Results.ScorePercent"), Some(json!(80.0)));
        assert_eq!(player.var("Results.PassFail"), Some(json!(true)));
        assert_eq!(player.var("CompletionStatus"), Some(json!("passed")));
    }

    #[tokio::test]
    async fn test_missing_player_is_skip() {
        let top = MemoryContext::root("https://lms.example/");
        let contexts = ContextGraphSearch::new(10, 10).search(&top.handle()).await;
        let mut log = DecisionLog::default();
        let record = inject_storyline(
            &contexts,
            &CompletionOptions::default(),
            Duration::from_secs(1),
            &mut log,
        )
        .await;
        assert!(record.is_none());
        assert_eq!(log.by_category(DecisionCategory::Injection)[0].decision, "skip");
    }

    #[test]
    fn test_variables_for_failed_status() {
        let vars = storyline_variables(&CompletionOptions {
            status: CompletionStatus::Failed,
            score: 30.0,
            ..Default::default()
        });
        assert_eq!(vars[0], ("Results.ScorePercent", json!(30.0)));
        assert_eq!(vars[2], ("Results.PassFail", json!(false)));
        assert_eq!(vars[3], ("CompletionStatus", json!("failed")));
    }
}
