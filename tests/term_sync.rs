use mockito::{Matcher, Server};
use serde_json::json;

use ontotag::error::Error;
use ontotag::index_client::IndexClient;
use ontotag::progress::NoProgress;
use ontotag::sparql::SparqlClient;
use ontotag::term_sync::{TermSyncer, Terminology};

fn bindings(labels: &[&str]) -> String {
    let rows: Vec<_> = labels
        .iter()
        .map(|l| {
            json!({
                "label": { "type": "literal", "value": l },
                "uri": { "type": "uri", "value": format!("http://vocab.example/{}", l) }
            })
        })
        .collect();
    json!({ "head": { "vars": ["uri", "label"] }, "results": { "bindings": rows } }).to_string()
}

fn terminology() -> Terminology {
    Terminology {
        name: "envo".into(),
        named_graph: "http://graph.example/envo".into(),
        query: "SELECT ?uri ?label WHERE { ?uri rdfs:label ?label }".into(),
    }
}

fn syncer(server: &Server) -> TermSyncer {
    TermSyncer::new(
        SparqlClient::new(&format!("{}/sparql", server.url()), 5).unwrap(),
        IndexClient::new(&server.url(), 5).unwrap(),
        "terms",
        4,
        &["the".to_string()],
    )
}

#[tokio::test]
async fn short_labels_and_stopwords_are_dropped_but_offset_tracks_raw_page() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("POST", "/sparql")
        .match_body(Matcher::Regex("LIMIT\\+4\\+OFFSET\\+0$".into()))
        .with_header("content-type", "application/sparql-results+json")
        .with_body(bindings(&["ok", "a", "seawater", "the"]))
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("POST", "/sparql")
        .match_body(Matcher::Regex("LIMIT\\+4\\+OFFSET\\+4$".into()))
        .with_header("content-type", "application/sparql-results+json")
        .with_body(bindings(&[]))
        .expect(1)
        .create_async()
        .await;
    let bulk = server
        .mock("POST", "/_bulk")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""label":"ok""#.into()),
            Matcher::Regex(r#""label":"seawater""#.into()),
            Matcher::Regex(r#""namedGraphUri":"http://graph.example/envo""#.into()),
        ]))
        .with_header("content-type", "application/json")
        .with_body(json!({ "took": 3, "errors": false, "items": [] }).to_string())
        .expect(1)
        .create_async()
        .await;

    let report = syncer(&server).sync(&terminology(), &NoProgress).await.unwrap();

    assert_eq!(report.fetched, 4);
    assert_eq!(report.indexed, 2);
    assert_eq!(report.pages, 1);
    first.assert_async().await;
    second.assert_async().await;
    bulk.assert_async().await;
}

#[tokio::test]
async fn a_page_of_only_filtered_terms_skips_the_bulk_call() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/sparql")
        .match_body(Matcher::Regex("OFFSET\\+0$".into()))
        .with_body(bindings(&["a", "the", "xy"]))
        .create_async()
        .await;
    server
        .mock("POST", "/sparql")
        .match_body(Matcher::Regex("OFFSET\\+3$".into()))
        .with_body(bindings(&[]))
        .create_async()
        .await;
    let bulk = server
        .mock("POST", "/_bulk")
        .expect(0)
        .create_async()
        .await;

    let report = syncer(&server).sync(&terminology(), &NoProgress).await.unwrap();
    assert_eq!((report.fetched, report.indexed), (3, 0));
    bulk.assert_async().await;
}

#[tokio::test]
async fn graph_store_failure_aborts_the_sync() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/sparql")
        .with_status(503)
        .with_body("overloaded")
        .create_async()
        .await;

    let err = syncer(&server).sync(&terminology(), &NoProgress).await.unwrap_err();
    assert!(matches!(err, Error::Upstream { status: 503, .. }));
}

#[tokio::test]
async fn pruning_deletes_one_named_graph_and_refreshes() {
    let mut server = Server::new_async().await;
    let delete = server
        .mock("POST", "/terms/_delete_by_query")
        .match_body(Matcher::PartialJson(json!({
            "query": { "term": { "namedGraphUri": "http://graph.example/envo" } }
        })))
        .with_header("content-type", "application/json")
        .with_body(json!({ "deleted": 12, "failures": [] }).to_string())
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/terms/_refresh")
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let deleted = syncer(&server)
        .prune_terminology("http://graph.example/envo")
        .await
        .unwrap();
    assert_eq!(deleted, 12);
    delete.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn bulk_failure_aborts_before_the_next_page() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/sparql")
        .match_body(Matcher::Regex("OFFSET\\+0$".into()))
        .with_header("content-type", "application/sparql-results+json")
        .with_body(bindings(&["seawater", "salinity", "estuary", "lagoon"]))
        .expect(1)
        .create_async()
        .await;
    let next_page = server
        .mock("POST", "/sparql")
        .match_body(Matcher::Regex("OFFSET\\+4$".into()))
        .with_body(bindings(&[]))
        .expect(0)
        .create_async()
        .await;
    let bulk = server
        .mock("POST", "/_bulk")
        .with_status(500)
        .with_body("{\"error\":\"cluster_block_exception\"}")
        .expect(1)
        .create_async()
        .await;

    let err = syncer(&server).sync(&terminology(), &NoProgress).await.unwrap_err();

    assert!(matches!(err, Error::Upstream { status: 500, .. }));
    bulk.assert_async().await;
    next_page.assert_async().await;
}
