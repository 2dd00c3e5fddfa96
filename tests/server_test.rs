use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use msa_pipeline::config::OutputConfig;
use msa_pipeline::server::{create_server, AppState};
use serde_json::{json, Value};
use std::fs;
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

const CASES: &str = "msas,2020-03-01,2020-03-02,2020-03-03\n\
    \"Abilene, TX\",0,2,3\n\
    \"Kansas City, MO-KS\",1,4,9\n";

fn output_in(dir: &TempDir) -> OutputConfig {
    OutputConfig {
        dir: dir.path().to_path_buf(),
        ..OutputConfig::default()
    }
}

async fn get(state: AppState, uri: &str) -> Result<(StatusCode, Value)> {
    let response = create_server(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty())?)
        .await?;
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

#[tokio::test]
async fn health_reports_the_service() -> Result<()> {
    let dir = tempdir()?;
    let (status, body) = get(AppState::new(output_in(&dir), None), "/health").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    Ok(())
}

#[tokio::test]
async fn cases_are_served_column_oriented() -> Result<()> {
    let dir = tempdir()?;
    let output = output_in(&dir);
    fs::write(output.cases(), CASES)?;

    let (status, body) = get(AppState::new(output, None), "/cases").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "msas": {"0": "Abilene, TX", "1": "Kansas City, MO-KS"},
            "2020-03-01": {"0": 0, "1": 1},
            "2020-03-02": {"0": 2, "1": 4},
            "2020-03-03": {"0": 3, "1": 9}
        })
    );
    let columns: Vec<&String> = body.as_object().unwrap().keys().collect();
    assert_eq!(columns[0], "msas");
    Ok(())
}

#[tokio::test]
async fn date_bounds_filter_columns() -> Result<()> {
    let dir = tempdir()?;
    let output = output_in(&dir);
    fs::write(output.cases(), CASES)?;

    let (_, body) = get(AppState::new(output, None), "/cases?from=2020-03-02&to=2020-03-02").await?;
    let columns: Vec<&String> = body.as_object().unwrap().keys().collect();
    assert_eq!(columns, vec!["msas", "2020-03-02"]);
    Ok(())
}

#[tokio::test]
async fn missing_artifact_is_service_unavailable() -> Result<()> {
    let dir = tempdir()?;
    let (status, body) = get(AppState::new(output_in(&dir), None), "/deaths").await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("not been generated"));
    Ok(())
}

#[tokio::test]
async fn single_msa_series() -> Result<()> {
    let dir = tempdir()?;
    let output = output_in(&dir);
    fs::write(output.cases(), CASES)?;
    let state = AppState::new(output, None);

    let uri = "/cases/Kansas%20City%2C%20MO-KS?from=2020-03-02";
    let (status, body) = get(state.clone(), uri).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "key": "Kansas City, MO-KS",
            "series": [
                {"date": "2020-03-02", "value": 4},
                {"date": "2020-03-03", "value": 9}
            ]
        })
    );

    let (status, _) = get(state, "/cases/Nowhere").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}
