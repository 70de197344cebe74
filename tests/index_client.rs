use mockito::{Matcher, Server};
use serde_json::json;

use ontotag::config::SearchConfig;
use ontotag::error::Error;
use ontotag::index_client::{IndexClient, ScrollOptions};
use ontotag::indices;
use ontotag::tagger::Tagger;

fn hit(id: &str) -> serde_json::Value {
    json!({ "_id": id, "_score": 1.0, "_source": { "title": format!("doc {}", id) } })
}

fn search_config(url: &str) -> SearchConfig {
    toml::from_str(&format!("url = \"{}\"", url)).unwrap()
}

#[tokio::test]
async fn scroll_visits_every_hit_and_closes_once() {
    let mut server = Server::new_async().await;
    let open = server
        .mock("POST", "/documents/_search")
        .match_query(Matcher::UrlEncoded("scroll".into(), "60m".into()))
        .with_header("content-type", "application/json")
        .with_body(json!({ "_scroll_id": "c1", "hits": { "hits": [hit("a"), hit("b")] } }).to_string())
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("POST", "/_search/scroll")
        .match_body(Matcher::PartialJson(json!({ "scroll_id": "c1" })))
        .with_header("content-type", "application/json")
        .with_body(json!({ "_scroll_id": "c2", "hits": { "hits": [hit("c")] } }).to_string())
        .expect(1)
        .create_async()
        .await;
    let last = server
        .mock("POST", "/_search/scroll")
        .match_body(Matcher::PartialJson(json!({ "scroll_id": "c2" })))
        .with_header("content-type", "application/json")
        .with_body(json!({ "_scroll_id": "c3", "hits": { "hits": [] } }).to_string())
        .expect(1)
        .create_async()
        .await;
    let close = server
        .mock("DELETE", "/_search/scroll/c3")
        .with_body("{\"succeeded\":true}")
        .expect(1)
        .create_async()
        .await;
    let stale_close = server
        .mock("DELETE", Matcher::Regex("^/_search/scroll/c[12]$".into()))
        .expect(0)
        .create_async()
        .await;

    let client = IndexClient::new(&server.url(), 5).unwrap();
    let mut seen = Vec::new();
    let visited = client
        .scroll_each("documents", &ScrollOptions::default(), |h| {
            seen.push(h.id);
            async { Ok::<(), Error>(()) }
        })
        .await
        .unwrap();

    assert_eq!(visited, 3);
    assert_eq!(seen, vec!["a", "b", "c"]);
    open.assert_async().await;
    second.assert_async().await;
    last.assert_async().await;
    close.assert_async().await;
    stale_close.assert_async().await;
}

#[tokio::test]
async fn scroll_is_closed_when_the_visitor_fails() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/documents/_search")
        .match_query(Matcher::Any)
        .with_header("content-type", "application/json")
        .with_body(json!({ "_scroll_id": "c1", "hits": { "hits": [hit("a"), hit("b"), hit("c")] } }).to_string())
        .create_async()
        .await;
    let next = server
        .mock("POST", "/_search/scroll")
        .expect(0)
        .create_async()
        .await;
    let close = server
        .mock("DELETE", "/_search/scroll/c1")
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let client = IndexClient::new(&server.url(), 5).unwrap();
    let mut calls = 0;
    let err = client
        .scroll_each("documents", &ScrollOptions::default(), |h| {
            calls += 1;
            async move {
                if h.id == "b" {
                    Err(Error::Extraction("boom".into()))
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Extraction(_)));
    assert_eq!(calls, 2);
    next.assert_async().await;
    close.assert_async().await;
}

#[tokio::test]
async fn existing_index_counts_as_created() {
    let mut server = Server::new_async().await;
    let exists = json!({
        "error": { "type": "resource_already_exists_exception", "reason": "index [documents] already exists" },
        "status": 400
    });
    let documents = server
        .mock("PUT", "/documents")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(exists.to_string())
        .expect(1)
        .create_async()
        .await;
    let terms = server
        .mock("PUT", "/terms")
        .with_body("{\"acknowledged\":true}")
        .expect(1)
        .create_async()
        .await;

    let client = IndexClient::new(&server.url(), 5).unwrap();
    indices::ensure_indices(&client, &search_config(&server.url()))
        .await
        .unwrap();
    documents.assert_async().await;
    terms.assert_async().await;
}

#[tokio::test]
async fn other_create_failures_are_fatal() {
    let mut server = Server::new_async().await;
    server
        .mock("PUT", "/documents")
        .with_status(400)
        .with_body("{\"error\":{\"type\":\"mapper_parsing_exception\"}}")
        .create_async()
        .await;

    let client = IndexClient::new(&server.url(), 5).unwrap();
    let err = client
        .create_index_if_absent("documents", &indices::documents_mapping())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Upstream { status: 400, .. }));
}

#[tokio::test]
async fn missing_document_is_none() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/documents/_doc/nope")
        .match_query(Matcher::Any)
        .with_status(404)
        .with_body("{\"found\":false}")
        .create_async()
        .await;

    let client = IndexClient::new(&server.url(), 5).unwrap();
    let doc = ontotag::get::get_document(&client, "documents", "nope")
        .await
        .unwrap();
    assert!(doc.is_none());
}

#[tokio::test]
async fn percolation_maps_hits_to_terms() {
    let mut server = Server::new_async().await;
    let percolate = server
        .mock("POST", "/terms/_search")
        .match_body(Matcher::PartialJson(json!({
            "from": 0,
            "size": 300,
            "query": { "percolate": { "field": "query", "document": { "title": "Seawater salinity" } } }
        })))
        .with_header("content-type", "application/json")
        .with_body(
            json!({ "hits": { "total": { "value": 2 }, "hits": [
                { "_id": "t1", "_source": {
                    "label": "seawater", "uri": "http://vocab/seawater",
                    "source_terminology": "envo", "namedGraphUri": "http://graph/envo",
                    "suggest": ["seawater"]
                }},
                { "_id": "t2", "_source": {
                    "label": "salinity", "uri": "http://vocab/salinity",
                    "source_terminology": "seavox", "namedGraphUri": "http://graph/seavox"
                }}
            ]}})
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let client = IndexClient::new(&server.url(), 5).unwrap();
    let tagger = Tagger::new(client, "terms", 300);
    let terms = tagger.tag(Some("Seawater salinity"), None).await.unwrap();

    assert_eq!(terms.len(), 2);
    assert_eq!(terms[0].label, "seawater");
    assert_eq!(terms[0].named_graph_uri, "http://graph/envo");
    assert_eq!(terms[1].source_terminology, "seavox");
    percolate.assert_async().await;
}
