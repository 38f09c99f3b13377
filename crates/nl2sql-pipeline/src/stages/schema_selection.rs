use async_trait::async_trait;
use nl2sql_core::{
    ConversationContext, OmittedJoin, OmissionReason, PipelineState, SchemaCatalog, SchemaEntry,
    SchemaSelection, StageOutput, StageResult,
};
use nl2sql_llm::{extract_json, LlmCapability, LlmError};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::{llm_failure, StageHandler};
use crate::prompts;

/// Assigns each catalog table a relevance score for a question.
/// Tables scoring zero or missing from the map are never selected.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    async fn score(
        &self,
        question: &str,
        catalog: &SchemaCatalog,
    ) -> Result<HashMap<String, f64>, LlmError>;
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "what", "which", "how", "many", "much", "with", "from", "that", "this",
    "are", "was", "were", "has", "have", "show", "give", "list", "tell", "all", "each", "per",
    "del", "los", "las", "por", "para", "con", "que", "cual", "cuál", "cuanto", "cuánto",
    "una", "uno", "son", "fue", "muestra", "dame",
];

/// Deterministic token-overlap scorer.
///
/// A question token matching a table-name token scores 3, a column-name
/// token 2, a description token 1; the full table name appearing in the
/// question adds 5.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalScorer;

impl LexicalScorer {
    pub fn score_entry(question_tokens: &HashSet<String>, question: &str, entry: &SchemaEntry) -> f64 {
        let table_tokens = tokens(&entry.table);
        let column_tokens: HashSet<String> =
            entry.columns.iter().flat_map(|c| tokens(&c.name)).collect();
        let mut description_tokens = tokens(&entry.description);
        for column in &entry.columns {
            if let Some(desc) = &column.description {
                description_tokens.extend(tokens(desc));
            }
        }

        let mut score = 0.0;
        for token in question_tokens {
            if table_tokens.contains(token) {
                score += 3.0;
            }
            if column_tokens.contains(token) {
                score += 2.0;
            }
            if description_tokens.contains(token) {
                score += 1.0;
            }
        }

        let bare_name = entry
            .table
            .rsplit('.')
            .next()
            .unwrap_or(&entry.table)
            .to_lowercase();
        if question.to_lowercase().contains(&bare_name) {
            score += 5.0;
        }
        score
    }
}

#[async_trait]
impl RelevanceScorer for LexicalScorer {
    async fn score(
        &self,
        question: &str,
        catalog: &SchemaCatalog,
    ) -> Result<HashMap<String, f64>, LlmError> {
        let question_tokens = tokens(question);
        Ok(catalog
            .entries()
            .iter()
            .map(|e| {
                (
                    e.table.clone(),
                    Self::score_entry(&question_tokens, question, e),
                )
            })
            .collect())
    }
}

/// Scores produced by the model from table names and descriptions.
pub struct LlmScorer {
    llm: Arc<dyn LlmCapability>,
}

impl LlmScorer {
    pub fn new(llm: Arc<dyn LlmCapability>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl RelevanceScorer for LlmScorer {
    async fn score(
        &self,
        question: &str,
        catalog: &SchemaCatalog,
    ) -> Result<HashMap<String, f64>, LlmError> {
        let raw = self
            .llm
            .complete(&prompts::schema_scoring(question, catalog))
            .await?;
        let value = extract_json(&raw)
            .ok_or_else(|| LlmError::MalformedOutput("no JSON in scoring output".to_string()))?;
        let scores = value.get("scores").unwrap_or(&value);
        let object = scores
            .as_object()
            .ok_or_else(|| LlmError::MalformedOutput("scores is not an object".to_string()))?;

        Ok(object
            .iter()
            .filter(|(table, _)| catalog.contains(table))
            .filter_map(|(table, v)| v.as_f64().map(|s| (table.clone(), s.clamp(0.0, 1.0))))
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionLimits {
    pub max_tables: usize,
    /// Approximate prompt tokens (4 chars each) for the rendered subset
    pub token_budget: usize,
}

/// Pick the bounded subset for a question.
///
/// Tables are ranked by score (ties broken by name) and taken while they
/// fit both limits; the top table is always taken. Foreign-key targets of
/// selected tables are then pulled in while they fit, otherwise recorded in
/// `omitted_join_targets`.
pub fn select_tables(
    catalog: &SchemaCatalog,
    scores: &HashMap<String, f64>,
    limits: SelectionLimits,
) -> SchemaSelection {
    let scores: HashMap<String, f64> = scores
        .iter()
        .map(|(k, v)| (k.to_lowercase(), *v))
        .collect();

    let mut ranked: Vec<(&SchemaEntry, f64)> = catalog
        .entries()
        .iter()
        .filter_map(|e| {
            let s = scores.get(&e.table.to_lowercase()).copied().unwrap_or(0.0);
            (s > 0.0).then_some((e, s))
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| a.0.table.to_lowercase().cmp(&b.0.table.to_lowercase()))
    });

    let mut selected: Vec<SchemaEntry> = Vec::new();
    let mut used = 0usize;
    for (entry, _) in ranked {
        if selected.len() >= limits.max_tables {
            break;
        }
        let cost = entry.approx_tokens();
        if !selected.is_empty() && used + cost > limits.token_budget {
            continue;
        }
        used += cost;
        selected.push(entry.clone());
    }

    let mut omitted = BTreeSet::new();
    let mut idx = 0;
    while idx < selected.len() {
        let from_table = selected[idx].table.clone();
        let foreign_keys = selected[idx].foreign_keys.clone();
        for fk in foreign_keys {
            let already = selected
                .iter()
                .any(|t| t.table.eq_ignore_ascii_case(&fk.references_table));
            if already {
                continue;
            }
            let reason = match catalog.get(&fk.references_table) {
                Some(target) => {
                    let cost = target.approx_tokens();
                    if selected.len() < limits.max_tables && used + cost <= limits.token_budget {
                        used += cost;
                        selected.push(target.clone());
                        continue;
                    }
                    OmissionReason::Budget
                }
                None => OmissionReason::NotInCatalog,
            };
            omitted.insert(OmittedJoin {
                from_table: from_table.clone(),
                column: fk.column.clone(),
                target_table: fk.references_table.clone(),
                reason,
            });
        }
        idx += 1;
    }

    SchemaSelection {
        catalog_version: catalog.version(),
        tables: selected,
        omitted_join_targets: omitted.into_iter().collect(),
    }
}

pub struct SchemaSelectionStage {
    scorer: Arc<dyn RelevanceScorer>,
    limits: SelectionLimits,
}

impl SchemaSelectionStage {
    pub fn new(scorer: Arc<dyn RelevanceScorer>, limits: SelectionLimits) -> Self {
        Self { scorer, limits }
    }
}

#[async_trait]
impl StageHandler for SchemaSelectionStage {
    fn state(&self) -> PipelineState {
        PipelineState::SchemaSelection
    }

    async fn run(&self, ctx: &ConversationContext) -> StageResult<StageOutput> {
        let catalog = ctx.schema();
        if catalog.is_empty() {
            return StageResult::fatal("schema catalog is empty");
        }

        let scores = match self.scorer.score(ctx.question(), catalog).await {
            Ok(scores) => scores,
            Err(e) => return llm_failure("schema scoring", &e),
        };

        let selection = select_tables(catalog, &scores, self.limits);
        if selection.tables.is_empty() {
            return StageResult::fatal("no table is relevant to the question");
        }

        log::info!(
            "[{}] Selected tables {:?} (catalog v{}, {} join targets omitted)",
            ctx.run_id(),
            selection.table_names(),
            selection.catalog_version,
            selection.omitted_join_targets.len()
        );
        StageResult::Success(StageOutput::Schema(selection))
    }
}

fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3 && !STOPWORDS.contains(t))
        .map(stem)
        .collect()
}

fn stem(token: &str) -> String {
    if token.chars().count() > 4 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}
