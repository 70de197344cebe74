use std::time::Duration;

use mockito::{Matcher, Server};
use serde_json::{json, Value};

use ontotag::config::SearchConfig;
use ontotag::index_client::IndexClient;
use ontotag::search::Searcher;
use ontotag::server::{router, AppState};

/// Serve the API on an ephemeral port backed by `index_url`.
async fn spawn_api(index_url: &str) -> String {
    let config: SearchConfig = toml::from_str(&format!("url = \"{}\"", index_url)).unwrap();
    let index = IndexClient::from_config(&config).unwrap();
    let state = AppState {
        searcher: Searcher::new(index.clone(), &config, None),
        index,
        documents_index: config.documents_index.clone(),
        health_timeout: Duration::from_secs(1),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn get(url: &str) -> (u16, Value) {
    let resp = reqwest::get(url).await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn search_without_keywords_is_an_empty_object() {
    let mut server = Server::new_async().await;
    let search = server
        .mock("POST", "/documents/_search")
        .expect(0)
        .create_async()
        .await;
    let api = spawn_api(&server.url()).await;

    assert_eq!(get(&format!("{}/search", api)).await, (200, json!({})));
    assert_eq!(
        get(&format!("{}/search?term=alpha&refereed=true", api)).await,
        (200, json!({}))
    );
    search.assert_async().await;
}

#[tokio::test]
async fn search_forwards_the_built_query() {
    let mut server = Server::new_async().await;
    let results = json!({ "hits": { "total": { "value": 1 }, "hits": [
        { "_id": "d1", "_score": 2.5, "_source": { "title": "Sea ice" } }
    ]}});
    let search = server
        .mock("POST", "/documents/_search")
        .match_body(Matcher::PartialJson(json!({
            "from": 0,
            "size": 5,
            "query": { "bool": { "must": [{ "query_string": { "query": "\"ocean\" \"sea ice\"" } }] } }
        })))
        .with_header("content-type", "application/json")
        .with_body(results.to_string())
        .expect(1)
        .create_async()
        .await;
    let api = spawn_api(&server.url()).await;

    let (status, body) = get(&format!("{}/search?keywords=ocean,sea%20ice&size=5", api)).await;
    assert_eq!(status, 200);
    assert_eq!(body, results);
    search.assert_async().await;
}

#[tokio::test]
async fn index_failure_is_a_bad_gateway_with_short_message() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/documents/_search")
        .with_status(500)
        .with_body("{\"error\":\"shard failure with a very long internal trace\"}")
        .create_async()
        .await;
    let api = spawn_api(&server.url()).await;

    let (status, body) = get(&format!("{}/search?keywords=ocean", api)).await;
    assert_eq!(status, 502);
    assert_eq!(body["error"]["code"], "upstream_error");
    assert!(!body["error"]["message"].as_str().unwrap().contains("trace"));
}

#[tokio::test]
async fn missing_document_is_a_404_error_body() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/documents/_doc/nope")
        .match_query(Matcher::Any)
        .with_status(404)
        .with_body("{\"_id\":\"nope\",\"found\":false}")
        .create_async()
        .await;
    let api = spawn_api(&server.url()).await;

    let (status, body) = get(&format!("{}/documents/nope", api)).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn document_lookup_excludes_extracted_text() {
    let mut server = Server::new_async().await;
    let lookup = server
        .mock("GET", "/documents/_doc/d1")
        .match_query(Matcher::UrlEncoded("_source_excludes".into(), "_bitstreamText".into()))
        .with_header("content-type", "application/json")
        .with_body(json!({ "_id": "d1", "found": true, "_source": { "title": "Sea ice" } }).to_string())
        .expect(1)
        .create_async()
        .await;
    let api = spawn_api(&server.url()).await;

    let (status, body) = get(&format!("{}/documents/d1", api)).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({ "id": "d1", "document": { "title": "Sea ice" } }));
    lookup.assert_async().await;
}

#[tokio::test]
async fn suggestions_need_a_prefix() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/terms/_search")
        .match_body(Matcher::PartialJson(json!({
            "suggest": { "terms": { "prefix": "sea", "completion": { "size": 3 } } }
        })))
        .with_header("content-type", "application/json")
        .with_body(
            json!({ "suggest": { "terms": [{ "options": [
                { "text": "seawater", "_source": { "label": "seawater", "uri": "u1" } }
            ]}]}})
            .to_string(),
        )
        .create_async()
        .await;
    let api = spawn_api(&server.url()).await;

    let (status, body) = get(&format!("{}/suggest?q=sea&size=3", api)).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({ "suggestions": [{ "label": "seawater", "uris": ["u1"] }] }));

    let (status, body) = get(&format!("{}/suggest", api)).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn health_reports_index_reachability() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/")
        .with_body("{\"version\":{\"number\":\"7.17.0\"}}")
        .create_async()
        .await;
    let api = spawn_api(&server.url()).await;
    let (status, body) = get(&format!("{}/health", api)).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    let api = spawn_api("http://127.0.0.1:9").await;
    let (status, body) = get(&format!("{}/health", api)).await;
    assert_eq!(status, 503);
    assert_eq!(body["status"], "degraded");
}
