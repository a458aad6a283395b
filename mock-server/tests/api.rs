use std::sync::Arc;

use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, app_with, Backend};
use tower::ServiceExt;

async fn body_text(response: axum::response::Response) -> String {
    let bytes: bytes::Bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn get(uri: &str) -> Request<String> {
    Request::builder().uri(uri).body(String::new()).unwrap()
}

fn form_request(uri: &str, body: &str) -> Request<String> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(body.to_string())
        .unwrap()
}

// --- authorize ---

#[tokio::test]
async fn authorize_with_app_id_and_key() {
    let resp = app()
        .oneshot(get(
            "/transactions/authorize.xml?provider_key=pk-test&app_id=app-1&app_key=key-1",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_text(resp).await;
    assert!(body.contains("<authorized>true</authorized>"));
    assert!(body.contains("<plan>Basic</plan>"));
    assert!(body.contains(r#"<usage_report metric="hits" period="day">"#));
}

#[tokio::test]
async fn authorize_with_user_key_and_service_token() {
    let resp = app()
        .oneshot(get(
            "/transactions/authorize.xml?service_token=st-test&service_id=42&user_key=uk-2",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("<plan>Ultimate</plan>"));
}

#[tokio::test]
async fn authorize_invalid_provider_key_returns_403() {
    let resp = app()
        .oneshot(get("/transactions/authorize.xml?provider_key=boo&app_id=app-1"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_text(resp).await,
        r#"<error code="provider_key_invalid">provider key &quot;boo&quot; is invalid</error>"#
    );
}

#[tokio::test]
async fn authorize_unknown_application_returns_404() {
    let resp = app()
        .oneshot(get("/transactions/authorize.xml?provider_key=pk-test&app_id=boo"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(body_text(resp).await.contains(r#"code="application_not_found""#));
}

#[tokio::test]
async fn authorize_wrong_app_key_is_denied_with_409() {
    let resp = app()
        .oneshot(get(
            "/transactions/authorize.xml?provider_key=pk-test&app_id=app-1&app_key=nope",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = body_text(resp).await;
    assert!(body.contains("<authorized>false</authorized>"));
    assert!(body.contains("<reason>application key &quot;nope&quot; is invalid</reason>"));
}

#[tokio::test]
async fn authorize_unknown_metric_returns_404() {
    let resp = app()
        .oneshot(get(
            "/transactions/authorize.xml?provider_key=pk-test&user_key=uk-1&usage%5Bmonkeys%5D=1",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(body_text(resp).await.contains(r#"code="metric_invalid""#));
}

#[tokio::test]
async fn authorize_predicted_usage_over_limit_is_denied() {
    let resp = app()
        .oneshot(get(
            "/transactions/authorize.xml?provider_key=pk-test&user_key=uk-1&usage%5Bhits%5D=101",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert!(body_text(resp).await.contains("<reason>usage limits are exceeded</reason>"));
}

// --- oauth ---

#[tokio::test]
async fn oauth_authorize_returns_application_key() {
    let resp = app()
        .oneshot(get("/transactions/oauth_authorize.xml?provider_key=pk-test&app_id=app-1"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp)
        .await
        .contains("<application><id>app-1</id><key>key-1</key></application>"));
}

// --- authrep ---

#[tokio::test]
async fn authrep_commits_usage() {
    let backend = Arc::new(Backend::default());
    let resp = app_with(backend.clone())
        .oneshot(get(
            "/transactions/authrep.xml?provider_key=pk-test&user_key=uk-1&usage%5Bhits%5D=7",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("<current_value>7</current_value>"));
    assert_eq!(backend.current_value("app-1", "hits").await, 7);
}

#[tokio::test]
async fn authrep_no_body_returns_empty_200() {
    let resp = app()
        .oneshot(get(
            "/transactions/authrep.xml?provider_key=pk-test&user_key=uk-1&usage%5Bhits%5D=1&no_body=true",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.is_empty());
}

// --- report ---

#[tokio::test]
async fn report_accepts_batch_and_records_timestamps() {
    let backend = Arc::new(Backend::default());
    let resp = app_with(backend.clone())
        .oneshot(form_request(
            "/transactions.xml",
            "provider_key=pk-test\
             &transactions%5B0%5D%5Bapp_id%5D=app-1\
             &transactions%5B0%5D%5Busage%5D%5Bhits%5D=2\
             &transactions%5B0%5D%5Btimestamp%5D=2010-04-27+15%3A42%3A17%2B02%3A00\
             &transactions%5B1%5D%5Buser_key%5D=uk-2\
             &transactions%5B1%5D%5Busage%5D%5Bhits%5D=1",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let recorded = backend.recorded().await;
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0].app_id, "app-1");
    assert_eq!(recorded[0].usage, vec![("hits".to_string(), 2)]);
    assert_eq!(
        recorded[0].timestamp.map(|t| t.timestamp()),
        Some(1_272_375_737)
    );
    assert_eq!(recorded[1].app_id, "app-2");
    assert_eq!(recorded[1].timestamp, None);
    assert_eq!(backend.current_value("app-1", "hits").await, 2);
}

#[tokio::test]
async fn report_with_bad_transactions_returns_indexed_errors() {
    let backend = Arc::new(Backend::default());
    let resp = app_with(backend.clone())
        .oneshot(form_request(
            "/transactions.xml",
            "provider_key=pk-test\
             &transactions%5B0%5D%5Buser_key%5D=bogus\
             &transactions%5B0%5D%5Busage%5D%5Bhits%5D=1\
             &transactions%5B1%5D%5Buser_key%5D=uk-1\
             &transactions%5B1%5D%5Busage%5D%5Bmonkeys%5D=1000000000",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = body_text(resp).await;
    assert!(body.contains(r#"<error code="user_key_invalid" index="0">"#));
    assert!(body.contains(r#"<error code="metric_invalid" index="1">"#));
    assert!(backend.recorded().await.is_empty());
}

#[tokio::test]
async fn report_invalid_provider_key_returns_single_error() {
    let resp = app()
        .oneshot(form_request(
            "/transactions.xml",
            "provider_key=boo&transactions%5B0%5D%5Bapp_id%5D=app-1",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_text(resp).await,
        r#"<error code="provider_key_invalid">provider key &quot;boo&quot; is invalid</error>"#
    );
}

#[tokio::test]
async fn report_without_transactions_returns_400() {
    let resp = app()
        .oneshot(form_request("/transactions.xml", "provider_key=pk-test"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- usage accumulates across calls ---

#[tokio::test]
async fn usage_accumulates_until_limit() {
    use tower::Service;

    let mut app = app().into_service();

    for _ in 0..2 {
        let resp = ServiceExt::ready(&mut app)
            .await
            .unwrap()
            .call(get(
                "/transactions/authrep.xml?provider_key=pk-test&user_key=uk-1&usage%5Bhits%5D=50",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    // At the limit: 100 of 100 used, one more is denied.
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(get(
            "/transactions/authorize.xml?provider_key=pk-test&user_key=uk-1&usage%5Bhits%5D=1",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = body_text(resp).await;
    assert!(body.contains("<current_value>100</current_value><max_value>100</max_value>"));
}
