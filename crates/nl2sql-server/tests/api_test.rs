use actix_web::{test, web, App};
use nl2sql_core::schema::JsonFileSchemaSource;
use nl2sql_core::{SchemaCatalog, SchemaIndex};
use nl2sql_pipeline::test_utils::{
    fast_config, query_result, sample_catalog, InMemoryArtifactSink, ScriptedExecutor, ScriptedLlm,
};
use nl2sql_pipeline::Pipeline;
use nl2sql_server::{configure, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

const CATALOG_JSON: &str = r#"{
  "tables": [
    {"table": "population", "description": "Population by country and year",
     "columns": [{"name": "country_code", "type": "TEXT"}, {"name": "year", "type": "INT"}, {"name": "total", "type": "INT"}]}
  ]
}"#;

struct Fixture {
    state: web::Data<AppState>,
    executor: ScriptedExecutor,
    _dir: TempDir,
}

fn fixture(llm: ScriptedLlm, executor: ScriptedExecutor, catalog: SchemaCatalog) -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("catalog.json");
    std::fs::write(&path, CATALOG_JSON).unwrap();

    let pipeline = Pipeline::new(
        Arc::new(llm),
        Arc::new(executor.clone()),
        Arc::new(SchemaIndex::new(catalog)),
        Arc::new(InMemoryArtifactSink::new()),
        fast_config(),
    );
    let state = web::Data::new(AppState::new(
        pipeline,
        Arc::new(JsonFileSchemaSource::new(path)),
    ));
    Fixture {
        state,
        executor,
        _dir: dir,
    }
}

fn idle_fixture() -> Fixture {
    fixture(ScriptedLlm::new(), ScriptedExecutor::new(), sample_catalog())
}

#[actix_web::test]
async fn test_health_endpoint() {
    let f = idle_fixture();
    let app = test::init_service(App::new().app_data(f.state.clone()).configure(configure)).await;

    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body = test::read_body(resp).await;
    assert_eq!(body, "OK");
}

#[actix_web::test]
async fn test_ready_reflects_catalog() {
    let f = idle_fixture();
    let app = test::init_service(App::new().app_data(f.state.clone()).configure(configure)).await;

    let req = test::TestRequest::get().uri("/api/v1/ready").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["ready"], true);
    assert_eq!(body["tables"], 3);

    let empty = fixture(ScriptedLlm::new(), ScriptedExecutor::new(), SchemaCatalog::empty());
    let app = test::init_service(App::new().app_data(empty.state.clone()).configure(configure)).await;
    let req = test::TestRequest::get().uri("/api/v1/ready").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 503);
}

#[actix_web::test]
async fn test_submit_answers_question() {
    let llm = ScriptedLlm::new()
        .on_triage(r#"{"label": "data_question"}"#)
        .on_intent(r#"{"intent": "nivel_puntual"}"#)
        .on_generation("SELECT SUM(gdp_usd) AS total_gdp FROM gdp WHERE year = 2020");
    let executor = ScriptedExecutor::new()
        .then_ok(query_result(&["total_gdp"], vec![vec![json!(84.5)]]));
    let f = fixture(llm, executor, sample_catalog());
    let app = test::init_service(App::new().app_data(f.state.clone()).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/submit")
        .set_json(json!({"question": "What was total GDP in 2020?", "run_id": "run-7"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["run_id"], "run-7");
    assert_eq!(body["final_state"], "completed");
    assert_eq!(body["response"]["kind"], "answer");
    assert_eq!(body["response"]["text"], "Total gdp: 84.50");
    assert_eq!(body["path"].as_array().unwrap().last().unwrap(), "completed");
    assert_eq!(f.executor.executed().len(), 1);
}

#[actix_web::test]
async fn test_submit_failure_is_user_safe() {
    let llm = ScriptedLlm::new().on_triage(r#"{"label": "data_question"}"#);
    let f = fixture(llm, ScriptedExecutor::new(), sample_catalog());
    let app = test::init_service(App::new().app_data(f.state.clone()).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/submit")
        .set_json(json!({"question": "GDP of Chile"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["final_state"], "aborted");
    assert_eq!(body["response"]["kind"], "degraded");
    let text = body["response"]["text"].as_str().unwrap();
    assert!(text.contains("\"GDP of Chile\""));
    assert!(!text.to_lowercase().contains("empty response"));
}

#[actix_web::test]
async fn test_submit_rejects_blank_question() {
    let f = idle_fixture();
    let app = test::init_service(App::new().app_data(f.state.clone()).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/submit")
        .set_json(json!({"question": "   "}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
}

#[actix_web::test]
async fn test_schema_listing_and_reload() {
    let f = idle_fixture();
    let app = test::init_service(App::new().app_data(f.state.clone()).configure(configure)).await;

    let req = test::TestRequest::get().uri("/api/v1/schema").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["version"], 1);
    let tables: Vec<&str> = body["tables"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["table"].as_str().unwrap())
        .collect();
    assert_eq!(tables, vec!["countries", "gdp", "life_expectancy"]);

    let req = test::TestRequest::post().uri("/api/v1/schema/reload").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["version"], 2);
    assert_eq!(body["tables"], 1);

    let catalog = f.state.schema().snapshot();
    assert_eq!(catalog.version(), 2);
    assert!(catalog.contains("population"));
}
