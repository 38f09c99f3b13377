use async_trait::async_trait;
use nl2sql_core::{
    AbortRecord, ConversationContext, FinalResponse, PipelineState, QueryResult, ResponseKind,
    StageOutput, StageResult, TriageLabel, VerdictStatus,
};
use serde_json::Value;
use std::fmt::Write;

use super::StageHandler;
use crate::messages::{self, MessageKey};

const TABLE_ROWS: usize = 10;

/// Build the user-facing response from whatever the run produced.
///
/// Pure: the same context always yields the same response, and no internal
/// error text ever reaches it.
pub fn format_response(ctx: &ConversationContext) -> FinalResponse {
    if let Some(abort) = ctx.abort() {
        return degraded(ctx, abort);
    }

    match ctx.triage() {
        Some(triage) if !triage.label.is_data_question() => FinalResponse {
            kind: ResponseKind::NonData,
            text: triage
                .drafted_reply
                .clone()
                .unwrap_or_else(|| canned_reply(triage.label).to_string()),
            artifacts: Vec::new(),
            sql: None,
            row_count: None,
        },
        _ => match (ctx.current_sql(), ctx.current_result()) {
            (Some(sql), Some(result)) => {
                let mut text = answer_text(result);
                if ctx
                    .current_verdict()
                    .is_some_and(|v| v.status == VerdictStatus::Uncertain)
                {
                    text.push_str("\n\nNote: this result may not fully answer the question.");
                }
                let artifacts: Vec<_> = ctx
                    .visualization()
                    .and_then(|v| v.artifact())
                    .cloned()
                    .into_iter()
                    .collect();
                for artifact in &artifacts {
                    let _ = write!(text, "\n\nChart: {} ({})", artifact.title, artifact.uri);
                }
                FinalResponse {
                    kind: ResponseKind::Answer,
                    text,
                    artifacts,
                    sql: Some(sql.to_string()),
                    row_count: Some(result.row_count()),
                }
            }
            _ => FinalResponse {
                kind: ResponseKind::Degraded,
                text: MessageKey::Unknown.text().to_string(),
                artifacts: Vec::new(),
                sql: None,
                row_count: None,
            },
        },
    }
}

fn canned_reply(label: TriageLabel) -> &'static str {
    match label {
        TriageLabel::General => messages::GENERAL_REPLY,
        TriageLabel::OutOfScope | TriageLabel::DataQuestion => messages::OUT_OF_SCOPE_REPLY,
    }
}

fn degraded(ctx: &ConversationContext, abort: &AbortRecord) -> FinalResponse {
    let last_result = ctx.sql_attempts().last().and_then(|a| a.result.as_ref());
    let key = MessageKey::for_abort(abort, last_result);

    let mut text = format!(
        "{} I was working on \"{}\" and got as far as {}.",
        key.text(),
        ctx.question().trim(),
        messages::stage_phrase(abort.furthest_stage)
    );

    // A chart failure still leaves a verified answer worth returning.
    let partial = match (ctx.current_sql(), ctx.current_result(), ctx.current_verdict()) {
        (Some(sql), Some(result), Some(verdict)) if verdict.allows_progress() => {
            Some((sql, result))
        }
        _ => None,
    };

    match partial {
        Some((sql, result)) => {
            let _ = write!(text, "\n\n{}", answer_text(result));
            FinalResponse {
                kind: ResponseKind::Degraded,
                text,
                artifacts: Vec::new(),
                sql: Some(sql.to_string()),
                row_count: Some(result.row_count()),
            }
        }
        None => {
            if key != MessageKey::Cancelled {
                let _ = write!(text, " {}", messages::RETRY_SUGGESTION);
            }
            FinalResponse {
                kind: ResponseKind::Degraded,
                text,
                artifacts: Vec::new(),
                sql: None,
                row_count: None,
            }
        }
    }
}

fn answer_text(result: &QueryResult) -> String {
    match (result.row_count(), result.columns.len()) {
        (0, _) => "No data matched your question.".to_string(),
        (1, 1) => format!(
            "{}: {}",
            humanize(&result.columns[0].name),
            cell(result.rows[0].first().unwrap_or(&Value::Null))
        ),
        (1, _) => result
            .columns
            .iter()
            .zip(&result.rows[0])
            .map(|(c, v)| format!("- {}: {}", humanize(&c.name), cell(v)))
            .collect::<Vec<_>>()
            .join("\n"),
        (rows, _) => {
            let mut text = format!("Found {} rows.\n\n", rows);
            text.push_str(&markdown_table(result, TABLE_ROWS));
            if rows > TABLE_ROWS {
                let _ = write!(text, "\n(showing the first {} of {} rows)", TABLE_ROWS, rows);
            }
            text
        }
    }
}

fn markdown_table(result: &QueryResult, max_rows: usize) -> String {
    let header: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    let mut out = format!("| {} |\n", header.join(" | "));
    let _ = writeln!(out, "|{}", " --- |".repeat(header.len()));
    for row in result.rows.iter().take(max_rows) {
        let cells: Vec<String> = row.iter().map(cell).collect();
        let _ = writeln!(out, "| {} |", cells.join(" | "));
    }
    out.trim_end().to_string()
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "no value".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 => format!("{:.0}", f),
            (None, Some(f)) => format!("{:.2}", f),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn humanize(column: &str) -> String {
    let spaced = column.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => spaced,
    }
}

pub struct ResponseFormattingStage;

#[async_trait]
impl StageHandler for ResponseFormattingStage {
    fn state(&self) -> PipelineState {
        PipelineState::ResponseFormatting
    }

    async fn run(&self, ctx: &ConversationContext) -> StageResult<StageOutput> {
        let is_data = ctx.triage().map_or(true, |t| t.label.is_data_question());
        if is_data && ctx.current_result().is_none() {
            return StageResult::fatal("nothing to format");
        }
        StageResult::Success(StageOutput::Response(format_response(ctx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{context_with_result, context_with_selection, query_result};
    use nl2sql_core::{AbortReason, ColumnMeta, Verdict};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_point_answer() {
        let mut ctx = context_with_result(
            "What is the life expectancy in Oceania?",
            "SELECT AVG(life_expectancy) AS avg_life_expectancy FROM life_expectancy",
            query_result(&["avg_life_expectancy"], vec![vec![json!(78.4567)]]),
        );
        ctx.record(StageOutput::Verification(Verdict::pass("ok")))
            .unwrap();

        let response = format_response(&ctx);
        assert_eq!(response.kind, ResponseKind::Answer);
        assert_eq!(response.text, "Avg life expectancy: 78.46");
        assert_eq!(response.row_count, Some(1));
        assert!(response.sql.is_some());
    }

    #[test]
    fn test_multi_row_table() {
        let rows = (0..12).map(|i| vec![json!(2000 + i), json!(i)]).collect();
        let ctx = context_with_result(
            "GDP by year",
            "SELECT year, gdp_usd FROM gdp",
            query_result(&["year", "gdp_usd"], rows),
        );
        let text = format_response(&ctx).text;
        assert!(text.starts_with("Found 12 rows."));
        assert!(text.contains("| year | gdp_usd |"));
        assert!(text.ends_with("(showing the first 10 of 12 rows)"));
    }

    #[test]
    fn test_non_data_uses_drafted_reply_or_canned() {
        let mut ctx = ConversationContext::new(
            "r",
            "hi",
            vec![],
            Arc::new(nl2sql_core::SchemaCatalog::empty()),
        );
        ctx.record(StageOutput::Triage(nl2sql_core::TriageOutcome {
            label: TriageLabel::General,
            reasoning: String::new(),
            drafted_reply: None,
        }))
        .unwrap();
        let response = format_response(&ctx);
        assert_eq!(response.kind, ResponseKind::NonData);
        assert_eq!(response.text, messages::GENERAL_REPLY);
    }

    #[test]
    fn test_degraded_is_user_safe() {
        let mut ctx = context_with_selection("GDP of Chile");
        ctx.push_failure(
            PipelineState::SqlGeneration,
            nl2sql_core::OutcomeTag::Retryable,
            "LLM timeout: upstream 504 at 10.0.0.3",
        );
        ctx.mark_aborted(AbortRecord {
            reason: AbortReason::RetriesExhausted,
            stage: PipelineState::SqlGeneration,
            furthest_stage: PipelineState::SqlGeneration,
        })
        .unwrap();

        let response = format_response(&ctx);
        assert!(response.is_degraded());
        assert!(response.text.starts_with(MessageKey::GenerationFailed.text()));
        assert!(response.text.contains("\"GDP of Chile\""));
        assert!(response.text.contains("writing the query"));
        assert!(!response.text.contains("504"));
    }

    #[test]
    fn test_visualization_abort_keeps_answer() {
        let mut ctx = context_with_result(
            "GDP trend",
            "SELECT year, gdp_usd FROM gdp",
            QueryResult::new(
                vec![ColumnMeta::new("year"), ColumnMeta::new("gdp_usd")],
                vec![vec![json!(2019), json!(1.0)], vec![json!(2020), json!(2.0)]],
            ),
        );
        ctx.record(StageOutput::Verification(Verdict::pass("ok")))
            .unwrap();
        ctx.mark_aborted(AbortRecord {
            reason: AbortReason::RetriesExhausted,
            stage: PipelineState::Visualization,
            furthest_stage: PipelineState::Visualization,
        })
        .unwrap();

        let response = format_response(&ctx);
        assert!(response.is_degraded());
        assert!(response.text.contains("couldn't create the chart"));
        assert!(response.text.contains("Found 2 rows."));
        assert_eq!(response.row_count, Some(2));
    }
}
