//! Deterministic chart selection and chart spec construction.

use async_trait::async_trait;
use nl2sql_core::{
    ChartType, ConversationContext, PipelineState, QueryResult, StageOutput, StageResult,
    VisualizationOutcome,
};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use super::StageHandler;
use crate::artifacts::{ArtifactSink, ChartSpec, DataPoint};

const PIE_MAX_SLICES: usize = 6;
const OTHER_LABEL: &str = "Other";

const TEMPORAL_NAMES: &[&str] = &[
    "year", "month", "date", "day", "week", "quarter", "period", "periodo", "fecha", "año",
    "anio", "mes", "trimestre",
];

const STACKED_HINTS: &[&str] = &["stacked", "composition", "breakdown", "apilad", "composición", "desglose"];
const SHARE_HINTS: &[&str] = &[
    "share", "proportion", "percentage", "distribution", "porcentaje", "participación",
    "proporción", "distribución",
];
const SCATTER_HINTS: &[&str] = &["correlation", "relationship", " vs ", "versus", "correlación", "relación"];
const TREND_HINTS: &[&str] = &[
    "trend", "over time", "evolution", "history", "growth", "evolución", "tendencia",
    "histórico", "crecimiento",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnRole {
    Temporal,
    Numeric,
    Categorical,
}

/// Which columns feed the chart. Indices refer to result columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartPlan {
    pub chart_type: ChartType,
    pub x: usize,
    pub y: usize,
    pub series: Option<usize>,
}

fn iso_date() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}(-\d{2}(-\d{2})?)?([T ].*)?$").ok())
        .as_ref()
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "(none)".to_string(),
        other => other.to_string(),
    }
}

fn column_role(result: &QueryResult, idx: usize) -> ColumnRole {
    let column = &result.columns[idx];
    let name = column.name.to_lowercase();
    let data_type = column
        .data_type
        .as_deref()
        .map(str::to_lowercase)
        .unwrap_or_default();

    // Whole words only: "report_date" is temporal, "avg_years_schooling" is not.
    let temporal_name = name
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| TEMPORAL_NAMES.contains(&word));
    if temporal_name
        || data_type.contains("date")
        || data_type.contains("time")
    {
        return ColumnRole::Temporal;
    }

    let values: Vec<&Value> = result.column_values(idx).filter(|v| !v.is_null()).collect();
    if values.is_empty() {
        return ColumnRole::Categorical;
    }
    let all_dates = iso_date().is_some_and(|re| {
        values
            .iter()
            .all(|v| v.as_str().is_some_and(|s| re.is_match(s.trim())))
    });
    if all_dates {
        return ColumnRole::Temporal;
    }
    if values.iter().all(|v| as_number(v).is_some()) {
        return ColumnRole::Numeric;
    }
    ColumnRole::Categorical
}

fn question_hint(question: &str) -> Option<ChartType> {
    let q = format!(" {} ", question.to_lowercase());
    let has = |hints: &[&str]| hints.iter().any(|h| q.contains(h));
    if has(STACKED_HINTS) {
        Some(ChartType::StackedBar)
    } else if has(SHARE_HINTS) {
        Some(ChartType::Pie)
    } else if has(SCATTER_HINTS) {
        Some(ChartType::Scatter)
    } else if has(TREND_HINTS) {
        Some(ChartType::Line)
    } else {
        None
    }
}

/// Choose a chart for a result, or the reason none fits.
///
/// Defaults: a temporal column gives a line (one series per category when a
/// categorical column is present); two categoricals give a stacked bar; one
/// categorical with two measures gives a scatter; one categorical gives a
/// bar. Question wording can ask for a pie, stacked bar or scatter when the
/// data supports one.
pub fn plan_chart(question: &str, result: &QueryResult) -> Result<ChartPlan, &'static str> {
    if result.row_count() < 2 {
        return Err("a single row reads better as text");
    }

    let mut temporal = Vec::new();
    let mut numeric = Vec::new();
    let mut categorical = Vec::new();
    for idx in 0..result.columns.len() {
        match column_role(result, idx) {
            ColumnRole::Temporal => temporal.push(idx),
            ColumnRole::Numeric => numeric.push(idx),
            ColumnRole::Categorical => categorical.push(idx),
        }
    }

    let Some(&measure) = numeric.first() else {
        return Err("no numeric column to plot");
    };
    let hint = question_hint(question);

    let plan = |chart_type, x, series| ChartPlan {
        chart_type,
        x,
        y: measure,
        series,
    };

    match hint {
        Some(ChartType::StackedBar) => {
            let stack = match (temporal.first(), categorical.as_slice()) {
                (Some(&t), [series, ..]) => Some(plan(ChartType::StackedBar, t, Some(*series))),
                (None, [x, series, ..]) => Some(plan(ChartType::StackedBar, *x, Some(*series))),
                _ => None,
            };
            if let Some(stack) = stack {
                return Ok(stack);
            }
        }
        Some(ChartType::Pie) => {
            if temporal.is_empty() && categorical.len() == 1 {
                let x = categorical[0];
                let non_negative = result
                    .column_values(measure)
                    .all(|v| as_number(v).is_some_and(|n| n >= 0.0));
                if non_negative && result.row_count() <= PIE_MAX_SLICES {
                    return Ok(plan(ChartType::Pie, x, None));
                }
            }
        }
        Some(ChartType::Scatter) if numeric.len() >= 2 => {
            return Ok(ChartPlan {
                chart_type: ChartType::Scatter,
                x: numeric[0],
                y: numeric[1],
                series: None,
            });
        }
        _ => {}
    }

    if let Some(&t) = temporal.first() {
        return Ok(plan(ChartType::Line, t, categorical.first().copied()));
    }
    match categorical.as_slice() {
        [x, series, ..] => Ok(plan(ChartType::StackedBar, *x, Some(*series))),
        [_] if numeric.len() >= 2 => Ok(ChartPlan {
            chart_type: ChartType::Scatter,
            x: numeric[0],
            y: numeric[1],
            series: None,
        }),
        [x] => Ok(plan(ChartType::Bar, *x, None)),
        [] if numeric.len() >= 2 => Ok(ChartPlan {
            chart_type: ChartType::Scatter,
            x: numeric[0],
            y: numeric[1],
            series: None,
        }),
        [] => Err("nothing to plot against the measure"),
    }
}

/// Build the chart spec for a plan. Categorical axes are limited to
/// `max_categories` values, the smallest folded into "Other".
pub fn build_chart_spec(
    question: &str,
    title: Option<&str>,
    result: &QueryResult,
    plan: ChartPlan,
    max_categories: usize,
) -> ChartSpec {
    let mut points: Vec<DataPoint> = result
        .rows
        .iter()
        .filter_map(|row| {
            let x = row.get(plan.x).cloned().unwrap_or(Value::Null);
            let y = row.get(plan.y).and_then(as_number)?;
            let series = plan
                .series
                .map(|s| label(row.get(s).unwrap_or(&Value::Null)));
            let x = if plan.chart_type == ChartType::Scatter {
                Value::from(as_number(&x)?)
            } else {
                x
            };
            Some(DataPoint { x, y, series })
        })
        .collect();

    match plan.chart_type {
        ChartType::Bar | ChartType::Pie => {
            points = fold_categories(points, max_categories, |p| label(&p.x), |p, l| {
                p.x = Value::String(l)
            });
        }
        ChartType::StackedBar if plan.x_is_categorical(result) => {
            points = fold_categories(points, max_categories, |p| label(&p.x), |p, l| {
                p.x = Value::String(l)
            });
            points = fold_series(points, max_categories);
        }
        ChartType::Line | ChartType::StackedBar => {
            points = fold_series(points, max_categories);
            points.sort_by(|a, b| compare_x(&a.x, &b.x));
        }
        ChartType::Scatter => {}
    }

    let column_name = |idx: usize| result.columns[idx].name.clone();
    let title = title
        .map(str::to_string)
        .unwrap_or_else(|| question.trim().to_string());

    let mut spec = ChartSpec {
        id: String::new(),
        chart_type: plan.chart_type,
        title,
        x_label: column_name(plan.x),
        y_label: column_name(plan.y),
        series_label: plan.series.map(column_name),
        points,
    };
    spec.id = chart_id(question, &spec);
    spec
}

impl ChartPlan {
    fn x_is_categorical(&self, result: &QueryResult) -> bool {
        column_role(result, self.x) == ColumnRole::Categorical
    }
}

fn fold_series(points: Vec<DataPoint>, max_categories: usize) -> Vec<DataPoint> {
    fold_categories(
        points,
        max_categories,
        |p| p.series.clone().unwrap_or_default(),
        |p, l| p.series = Some(l),
    )
}

/// Keep the `max - 1` largest keys by total, rename the rest to "Other" and
/// merge points that collide.
fn fold_categories(
    points: Vec<DataPoint>,
    max_categories: usize,
    key: impl Fn(&DataPoint) -> String,
    relabel: impl Fn(&mut DataPoint, String),
) -> Vec<DataPoint> {
    let mut totals: HashMap<String, f64> = HashMap::new();
    for point in &points {
        *totals.entry(key(point)).or_default() += point.y;
    }
    if max_categories < 2 || totals.len() <= max_categories {
        return points;
    }

    let mut ranked: Vec<(String, f64)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let kept: Vec<String> = ranked
        .into_iter()
        .take(max_categories - 1)
        .map(|(k, _)| k)
        .collect();

    let mut folded: Vec<DataPoint> = Vec::new();
    for mut point in points {
        if !kept.contains(&key(&point)) {
            relabel(&mut point, OTHER_LABEL.to_string());
        }
        match folded
            .iter_mut()
            .find(|p| p.x == point.x && p.series == point.series)
        {
            Some(existing) => existing.y += point.y,
            None => folded.push(point),
        }
    }
    folded
}

fn compare_x(a: &Value, b: &Value) -> Ordering {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        _ => label(a).cmp(&label(b)),
    }
}

/// Content hash of the question and the rendered chart, so reruns over the
/// same data publish the same artifact.
fn chart_id(question: &str, spec: &ChartSpec) -> String {
    let mut hasher = Sha256::new();
    hasher.update(question.trim().as_bytes());
    hasher.update(spec.chart_type.as_str().as_bytes());
    hasher.update(spec.x_label.as_bytes());
    hasher.update(spec.y_label.as_bytes());
    if let Ok(points) = serde_json::to_vec(&spec.points) {
        hasher.update(points);
    }
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

pub struct VisualizationStage {
    sink: Arc<dyn ArtifactSink>,
    max_categories: usize,
}

impl VisualizationStage {
    pub fn new(sink: Arc<dyn ArtifactSink>, max_categories: usize) -> Self {
        Self {
            sink,
            max_categories,
        }
    }
}

#[async_trait]
impl StageHandler for VisualizationStage {
    fn state(&self) -> PipelineState {
        PipelineState::Visualization
    }

    async fn run(&self, ctx: &ConversationContext) -> StageResult<StageOutput> {
        let Some(result) = ctx.current_result() else {
            return StageResult::fatal("no result to visualize");
        };

        let plan = match plan_chart(ctx.question(), result) {
            Ok(plan) => plan,
            Err(reason) => {
                log::info!("[{}] Visualization skipped: {}", ctx.run_id(), reason);
                return StageResult::Success(StageOutput::Visualization(
                    VisualizationOutcome::Skipped {
                        reason: reason.to_string(),
                    },
                ));
            }
        };

        let title = ctx.intent().and_then(|i| i.title.as_deref());
        let spec = build_chart_spec(ctx.question(), title, result, plan, self.max_categories);
        if spec.points.is_empty() {
            return StageResult::Success(StageOutput::Visualization(
                VisualizationOutcome::Skipped {
                    reason: "no plottable values".to_string(),
                },
            ));
        }

        match self.sink.publish(&spec).await {
            Ok(artifact) => {
                log::info!(
                    "[{}] Published {} chart {} ({} points)",
                    ctx.run_id(),
                    artifact.chart_type.as_str(),
                    artifact.id,
                    artifact.point_count
                );
                StageResult::Success(StageOutput::Visualization(VisualizationOutcome::Artifact {
                    artifact,
                }))
            }
            Err(e) => StageResult::retryable(format!("chart export failed: {}", e)),
        }
    }
}
