//! Prompt construction for the model-backed stages.

use nl2sql_core::{ConversationContext, QueryResult, SchemaCatalog, Turn};
use nl2sql_llm::CompletionRequest;
use std::fmt::Write;

const TURN_CHARS: usize = 300;
const PREVIEW_ROWS: usize = 20;

pub(crate) const TRIAGE_SYSTEM: &str = "You route questions for a data assistant that answers questions \
by querying a statistical database. Classify the user's latest question.\n\
Labels:\n\
- data_question: asks for facts, figures, trends or comparisons the database could hold.\n\
- general: greetings, thanks, questions about the assistant itself.\n\
- needs_clarification: a data question too vague to query even with the conversation so far \
(no indicator, place or period can be inferred).\n\
- out_of_scope: anything else (opinions, unrelated tasks, requests to modify data).\n\
Follow-ups and chart requests about earlier answers are data_question.\n\
For general and out_of_scope, draft a short, polite reply in the user's language. \
For needs_clarification, the reply is one concise clarifying question.\n\
Respond with a JSON object: {\"label\": \"...\", \"reasoning\": \"...\", \"reply\": \"...\"}";

pub(crate) const INTENT_SYSTEM: &str = "Decide how a data question is best answered.\n\
Intents:\n\
- nivel_puntual: a single value, a short list or a small table answers it.\n\
- requiere_viz: a trend over time, a comparison across many categories or a \
distribution that is clearer as a chart.\n\
When requiere_viz, also propose a short chart title.\n\
Respond with a JSON object: {\"intent\": \"...\", \"title\": \"...\", \"reasoning\": \"...\"}";

pub(crate) const SCORING_SYSTEM: &str = "Rate how relevant each database table is to answering the \
question, from 0.0 (irrelevant) to 1.0 (essential). Only use table names from the list.\n\
Respond with a JSON object: {\"scores\": {\"table_name\": 0.0}}";

pub(crate) const GENERATION_SYSTEM: &str = "You write a single read-only SQL SELECT statement that \
answers the user's question using only the tables and columns listed.\n\
Rules:\n\
- Exactly one statement. SELECT or WITH ... SELECT only.\n\
- Never modify data or schema. No comments.\n\
- Use only listed tables and columns; never invent names.\n\
- Prefer aggregates over returning raw rows; keep result sets small.\n\
- Give computed columns a descriptive alias.\n\
Return only the SQL inside a ```sql code block.";

pub(crate) const VERIFICATION_SYSTEM: &str = "Check whether a SQL result plausibly answers the question. \
Look for empty results where data should exist, wrong aggregation grain, wrong filters, \
and units or magnitudes that make no sense.\n\
Respond with a JSON object: {\"verdict\": \"pass|fail|uncertain\", \"rationale\": \"...\", \
\"issues\": [\"...\"], \"suggestion\": \"...\"}";

/// Last `window` turns, oldest first, each side truncated.
pub fn render_history(history: &[Turn], window: usize) -> String {
    if history.is_empty() || window == 0 {
        return String::new();
    }
    let start = history.len().saturating_sub(window);
    let mut out = String::new();
    for turn in &history[start..] {
        let _ = writeln!(out, "User: {}", truncate(&turn.question, TURN_CHARS));
        let _ = writeln!(out, "Assistant: {}", truncate(&turn.answer, TURN_CHARS));
    }
    out
}

pub fn triage(ctx: &ConversationContext, window: usize) -> CompletionRequest {
    CompletionRequest::new(TRIAGE_SYSTEM, with_history(ctx, window)).json()
}

pub fn intent(ctx: &ConversationContext, window: usize) -> CompletionRequest {
    CompletionRequest::new(INTENT_SYSTEM, with_history(ctx, window)).json()
}

pub fn schema_scoring(question: &str, catalog: &SchemaCatalog) -> CompletionRequest {
    let mut prompt = String::from("Tables:\n");
    for entry in catalog.entries() {
        let columns: Vec<&str> = entry.columns.iter().map(|c| c.name.as_str()).collect();
        let _ = writeln!(
            prompt,
            "- {} ({}): {}",
            entry.table,
            columns.join(", "),
            entry.description
        );
    }
    let _ = write!(prompt, "\nQuestion: {}", question);
    CompletionRequest::new(SCORING_SYSTEM, prompt).json()
}

pub fn sql_generation(
    ctx: &ConversationContext,
    window: usize,
    dialect: &str,
) -> CompletionRequest {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "SQL dialect: {}\n", dialect);

    if let Some(selection) = ctx.selected_schema() {
        let _ = writeln!(prompt, "Schema:\n{}", selection.render());
    }

    let history = render_history(ctx.history(), window);
    if !history.is_empty() {
        let _ = writeln!(prompt, "Conversation so far:\n{}", history);
    }

    if let Some(correction) = ctx.pending_correction() {
        if let Some(previous) = ctx.sql_attempts().last() {
            let _ = writeln!(prompt, "Previous query:\n```sql\n{}\n```", previous.sql);
        }
        let _ = writeln!(
            prompt,
            "That query did not answer the question correctly:\n{}\nWrite a corrected query.\n",
            correction.hint
        );
    }

    let feedback = ctx.generation_feedback();
    if !feedback.is_empty() {
        let _ = writeln!(prompt, "Previous attempts were rejected because:");
        for reason in feedback {
            let _ = writeln!(prompt, "- {}", reason);
        }
        prompt.push('\n');
    }

    let _ = write!(prompt, "Question: {}", ctx.question());
    CompletionRequest::new(GENERATION_SYSTEM, prompt)
}

pub fn verification(question: &str, sql: &str, result: &QueryResult) -> CompletionRequest {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Question: {}\n", question);
    let _ = writeln!(prompt, "SQL:\n{}\n", sql);
    let _ = writeln!(prompt, "Result ({} rows):", result.row_count());
    let _ = writeln!(prompt, "{}", preview_table(result, PREVIEW_ROWS));
    CompletionRequest::new(VERIFICATION_SYSTEM, prompt).json()
}

/// Tab-separated header plus up to `max_rows` rows.
pub fn preview_table(result: &QueryResult, max_rows: usize) -> String {
    let mut out = result
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join("\t");
    for row in result.rows.iter().take(max_rows) {
        out.push('\n');
        let cells: Vec<String> = row
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        out.push_str(&cells.join("\t"));
    }
    if result.row_count() > max_rows {
        let _ = write!(out, "\n... {} more rows", result.row_count() - max_rows);
    }
    out
}

fn with_history(ctx: &ConversationContext, window: usize) -> String {
    let history = render_history(ctx.history(), window);
    if history.is_empty() {
        format!("Question: {}", ctx.question())
    } else {
        format!(
            "Conversation so far:\n{}\nLatest question: {}",
            history,
            ctx.question()
        )
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut s: String = text.chars().take(max_chars).collect();
    s.push_str("...");
    s
}
