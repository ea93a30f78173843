//! HTTP adapters (help-desk connector, embedding providers, Weaviate store)
//! against mock servers.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kb_sync::config::{parse_config, EmbeddingConfig};
use kb_sync::connector_helpdesk::HelpdeskConnector;
use kb_sync::embedding::{embed, EmbeddingFailure, OllamaProvider, OpenAIProvider};
use kb_sync::error::PartialUpsertError;
use kb_sync::models::{destination_id, DestinationRecord};
use kb_sync::store::weaviate::WeaviateStore;
use kb_sync::store::{CollectionSchema, VectorStore};
use kb_sync::traits::ArticleSource;

fn connector(server: &MockServer, max_retries: u32) -> HelpdeskConnector {
    let config = parse_config(&format!(
        r#"
[source]
list_url = "{uri}/article"
detail_url = "{uri}/article/"
max_retries = {max_retries}
timeout_secs = 5
"#,
        uri = server.uri(),
        max_retries = max_retries
    ))
    .unwrap();
    HelpdeskConnector::with_token(&config.source, Some("secret".into())).unwrap()
}

fn embedding_config(server: &MockServer, provider: &str) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: provider.into(),
        model: Some("test-model".into()),
        dims: Some(3),
        url: Some(server.uri()),
        max_retries: 0,
        timeout_secs: 5,
    }
}

// ============ Help-desk connector ============

#[tokio::test]
async fn list_page_translates_page_number_and_sends_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/article"))
        .and(query_param("page", "0"))
        .and(query_param("pageSize", "30"))
        .and(query_param("token", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 10, "title": "Reset password", "updatedDate": "2024-05-01T10:00:00.1234567" },
            { "id": "11", "title": "Invoices", "articleStatus": 1 }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let items = connector(&server, 0).list_page(1, 30).await.unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].source_id, 10);
    assert_eq!(
        items[0].updated_at_raw.as_deref(),
        Some("2024-05-01T10:00:00.1234567")
    );
    assert_eq!(items[1].source_id, 11);
    assert_eq!(items[1].status_label.as_deref(), Some("1"));
}

#[tokio::test]
async fn list_page_accepts_items_wrapper() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/article"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(&server)
        .await;

    let items = connector(&server, 0).list_page(3, 30).await.unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn detail_maps_fields_and_404_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/article/10"))
        .and(query_param("token", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 10,
            "title": "Reset password",
            "contentText": "Click forgot password.",
            "shortContent": "Password help",
            "statusDescription": "Published",
            "slug": "reset-password",
            "createdDate": "2023-01-01T08:00:00",
            "updatedDate": "2024-05-01T10:00:00",
            "category": { "name": "Accounts" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/article/99"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let connector = connector(&server, 0);
    let detail = connector.get_detail(10).await.unwrap().unwrap();
    assert_eq!(detail.body_text, "Click forgot password.");
    assert_eq!(detail.status(), "Published");
    assert_eq!(detail.category("General"), "Accounts");
    assert_eq!(
        detail.resolved_url("https://help.example.com/kb"),
        "https://help.example.com/kb/10/reset-password"
    );

    assert!(connector.get_detail(99).await.unwrap().is_none());
}

#[tokio::test]
async fn list_page_retries_transient_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/article"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/article"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
        .mount(&server)
        .await;

    let items = connector(&server, 1).list_page(1, 30).await.unwrap();
    assert_eq!(items.len(), 1);
}

#[tokio::test]
async fn list_page_fails_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/article"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    assert!(connector(&server, 0).list_page(1, 30).await.is_err());
}

// ============ Embedding providers ============

#[tokio::test]
async fn openai_posts_model_and_folded_input() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "input": "line one line two"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "index": 0, "embedding": [0.1, 0.2, 0.3] }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider =
        OpenAIProvider::with_api_key(&embedding_config(&server, "openai"), "sk-test".into())
            .unwrap();
    let vector = embed(&provider, "line one\nline two").await.unwrap();
    assert_eq!(vector, vec![0.1, 0.2, 0.3]);
}

#[tokio::test]
async fn openai_client_error_is_a_provider_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
        .expect(1)
        .mount(&server)
        .await;

    let provider =
        OpenAIProvider::with_api_key(&embedding_config(&server, "openai"), "sk-test".into())
            .unwrap();
    let err = embed(&provider, "hello").await.unwrap_err();
    assert!(matches!(err, EmbeddingFailure::ProviderError(ref m) if m.contains("400")));
}

#[tokio::test]
async fn ollama_wrong_dimensions_is_a_provider_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "model": "test-model", "input": ["hello"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[1.0, 2.0]]
        })))
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(&embedding_config(&server, "ollama")).unwrap();
    let err = embed(&provider, "hello").await.unwrap_err();
    assert_eq!(err.reason(), "provider_error");
}

// ============ Weaviate store ============

fn weaviate(server: &MockServer) -> WeaviateStore {
    WeaviateStore::with_api_key(&server.uri(), "Article", Some("wv-key".into()), 5).unwrap()
}

fn record(source_id: i64) -> DestinationRecord {
    DestinationRecord {
        id: destination_id(source_id),
        source_id,
        title: "Reset password".into(),
        content: "Click forgot password.".into(),
        summary: String::new(),
        status: "Published".into(),
        url: "https://help.example.com/kb/42/reset-password".into(),
        category: "Accounts".into(),
        created_at: None,
        updated_at: Some("2024-05-01T10:00:00.000000Z".into()),
        vector: Some(vec![0.5, 0.25, 0.0]),
    }
}

#[tokio::test]
async fn weaviate_schema_lifecycle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/schema/Article"))
        .and(header("authorization", "Bearer wv-key"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/schema"))
        .and(body_partial_json(json!({ "class": "Article", "vectorizer": "none" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "class": "Article" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/schema/Article"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = weaviate(&server);
    assert!(!store.collection_exists().await.unwrap());
    store
        .create_collection(&CollectionSchema::articles("Article", 3))
        .await
        .unwrap();
    store.delete_collection().await.unwrap();
}

#[tokio::test]
async fn weaviate_get_record_reads_properties_and_vector() {
    let server = MockServer::start().await;
    let id = destination_id(42);
    Mock::given(method("GET"))
        .and(path(format!("/v1/objects/Article/{}", id)))
        .and(query_param("include", "vector"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "class": "Article",
            "id": id.to_string(),
            "properties": {
                "source_id": 42,
                "title": "Reset password",
                "content": "Click forgot password.",
                "status": "Published",
                "url": "https://help.example.com/kb/42/reset-password",
                "category": "Accounts",
                "updated_at": "2024-05-01T10:00:00Z"
            },
            "vector": [0.5, 0.25, 0.0]
        })))
        .mount(&server)
        .await;

    let store = weaviate(&server);
    let found = store.get_record(id).await.unwrap().unwrap();
    assert_eq!(found.source_id, 42);
    assert_eq!(found.summary, "");
    assert_eq!(found.updated_at.as_deref(), Some("2024-05-01T10:00:00Z"));
    assert_eq!(found.vector, Some(vec![0.5, 0.25, 0.0]));

    assert!(store.get_record(destination_id(7)).await.unwrap().is_none());
}

#[tokio::test]
async fn weaviate_batch_reports_object_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/batch/objects"))
        .and(body_partial_json(json!({
            "objects": [{ "class": "Article", "id": destination_id(42).to_string() }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": destination_id(42).to_string(), "result": {} }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/batch/objects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "x", "result": { "errors": { "error": [{ "message": "vector length mismatch" }] } } }
        ])))
        .mount(&server)
        .await;

    let store = weaviate(&server);
    store.upsert_batch(&[record(42)]).await.unwrap();

    let err = store.upsert_batch(&[record(7), record(8)]).await.unwrap_err();
    assert!(err.to_string().contains("vector length mismatch"));
    let partial = err.downcast_ref::<PartialUpsertError>().unwrap();
    assert_eq!(partial.attempted, 2);
    assert_eq!(partial.rejected, 1);
    assert_eq!(partial.applied(), 1);
}
