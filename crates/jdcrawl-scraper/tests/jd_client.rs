//! Integration tests for `JdClient` against a local `wiremock` server.
//!
//! Every test stands up its own mock server, so no real network traffic is
//! made. Retries use a zero-delay policy to keep the suite fast.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use jdcrawl_core::{FeedType, ProductId, RecordDetail};
use jdcrawl_scraper::{
    AnonymousAuthenticator, Authenticator, CrawlError, Endpoints, FeedFetcher, JdClient,
    RetryPolicy, SearchFetcher, SessionCredentials, SessionManager, StaticCookieAuthenticator,
};

fn client_with<A: Authenticator>(server: &MockServer, auth: A, attempts: u32) -> JdClient<A> {
    let session = SessionManager::new(auth, vec!["jdcrawl-test/0.1".to_owned()], 5)
        .expect("failed to build test session");
    JdClient::new(session, RetryPolicy::immediate(attempts)).with_endpoints(Endpoints {
        api_base: server.uri(),
        search_base: server.uri(),
    })
}

fn pid() -> ProductId {
    ProductId::new("100012043978").unwrap()
}

fn review_body(ids: &[u64], max_page: u32) -> serde_json::Value {
    let comments: Vec<_> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "nickname": "buyer",
                "content": "good",
                "creationTime": "2024-03-01 10:00:00",
                "score": 5
            })
        })
        .collect();
    json!({ "maxPage": max_page, "comments": comments })
}

/// Hands out `session=<n>` where `n` is the new generation.
struct RotatingCookie {
    logins: Arc<AtomicU32>,
}

impl Authenticator for RotatingCookie {
    async fn authenticate(
        &self,
        previous_generation: u64,
    ) -> Result<SessionCredentials, CrawlError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(SessionCredentials::with_cookie(format!(
            "session={}",
            previous_generation + 1
        )))
    }
}

// ---------------------------------------------------------------------------
// Happy paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reviews_page_is_requested_zero_based_and_parsed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("functionId", "pc_club_productPageComments"))
        .and(query_param("productId", "100012043978"))
        .and(query_param("page", "0"))
        .and(header("user-agent", "jdcrawl-test/0.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(review_body(&[1, 2], 4)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(&server, AnonymousAuthenticator, 1);
    let page = client
        .fetch_feed_page(&pid(), FeedType::Reviews, 0)
        .await
        .unwrap();

    assert_eq!(page.items.len(), 2);
    assert!(!page.last_page);
    assert_eq!(page.items[0].external_record_id, "1");
    assert!(matches!(page.items[0].detail, RecordDetail::Review { .. }));
}

#[tokio::test]
async fn qa_page_is_requested_one_based() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("functionId", "getQuestionAnswerList"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalPage": 3,
            "questionList": [
                {"id": 7, "content": "q", "created": "2024-01-01", "answerList": [
                    {"id": 8, "content": "a", "created": "2024-01-02"}
                ]}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(&server, AnonymousAuthenticator, 1);
    let page = client.fetch_feed_page(&pid(), FeedType::Qa, 2).await.unwrap();

    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].external_record_id, "7:8");
    assert!(page.last_page);
}

#[tokio::test]
async fn jsonp_wrapped_reviews_are_accepted() {
    let server = MockServer::start().await;
    let body = format!("fetchJSON_comment98({});", review_body(&[5], 1));

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let client = client_with(&server, AnonymousAuthenticator, 1);
    let page = client
        .fetch_feed_page(&pid(), FeedType::Reviews, 0)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert!(page.last_page);
}

#[tokio::test]
async fn search_page_merges_both_half_pages() {
    let server = MockServer::start().await;
    let html = r#"<div id="J_goodsList"><ul>
        <li class="gl-item" data-sku="111"><div class="p-name"><em>One</em></div></li>
        <li class="gl-item" data-sku="222"><div class="p-name"><em>Two</em></div></li>
        </ul></div><script>page_count:"1"</script>"#;
    let tail = r#"<li class="gl-item" data-sku="222"><div class="p-name"><em>Two</em></div></li>
        <li class="gl-item" data-sku="333"><div class="p-name"><em>Three</em></div></li>"#;

    Mock::given(method("GET"))
        .and(path("/Search"))
        .and(query_param("keyword", "laptop"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/s_new.php"))
        .and(query_param("keyword", "laptop"))
        .and(query_param("page", "2"))
        .and(query_param("scrolling", "y"))
        .respond_with(ResponseTemplate::new(200).set_body_string(tail))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(&server, AnonymousAuthenticator, 1);
    let page = client.fetch_search_page("laptop", 0).await.unwrap();

    let skus: Vec<&str> = page.items.iter().map(|h| h.product_id.as_str()).collect();
    assert_eq!(skus, vec!["111", "222", "333"]);
    assert!(page.last_page);
}

#[tokio::test]
async fn empty_search_page_skips_the_second_half() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/Search"))
        .and(query_param("page", "3"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"<div id="J_goodsList"><ul></ul></div>"#),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/s_new.php"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_with(&server, AnonymousAuthenticator, 1);
    let page = client.fetch_search_page("laptop", 1).await.unwrap();
    assert!(page.items.is_empty());
}

// ---------------------------------------------------------------------------
// Retry behaviour
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_error_is_retried_then_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(review_body(&[1], 1)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(&server, AnonymousAuthenticator, 3);
    let page = client
        .fetch_feed_page(&pid(), FeedType::Reviews, 0)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
}

#[tokio::test]
async fn persistent_server_errors_exhaust_the_budget() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_with(&server, AnonymousAuthenticator, 3);
    let err = client
        .fetch_feed_page(&pid(), FeedType::Reviews, 0)
        .await
        .unwrap_err();

    match err {
        CrawlError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, CrawlError::ServerError { status: 500, .. }));
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn rate_limit_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(review_body(&[1], 1)))
        .mount(&server)
        .await;

    let client = client_with(&server, AnonymousAuthenticator, 2);
    assert!(client
        .fetch_feed_page(&pid(), FeedType::Reviews, 0)
        .await
        .is_ok());
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(&server, AnonymousAuthenticator, 5);
    let err = client
        .fetch_feed_page(&pid(), FeedType::Reviews, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, CrawlError::UnexpectedStatus { status: 404, .. }));
}

#[tokio::test]
async fn malformed_body_is_a_schema_failure_without_retry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>captcha</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(&server, AnonymousAuthenticator, 5);
    let err = client
        .fetch_feed_page(&pid(), FeedType::Reviews, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, CrawlError::Deserialize { .. }));
}

// ---------------------------------------------------------------------------
// Session handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn configured_cookie_is_sent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header("cookie", "pin=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(review_body(&[1], 1)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(&server, StaticCookieAuthenticator::new("pin=abc"), 1);
    assert!(client
        .fetch_feed_page(&pid(), FeedType::Reviews, 0)
        .await
        .is_ok());
}

#[tokio::test]
async fn expired_session_is_refreshed_and_request_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header("cookie", "session=1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("cookie", "session=2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(review_body(&[1], 1)))
        .expect(1)
        .mount(&server)
        .await;

    let logins = Arc::new(AtomicU32::new(0));
    let client = client_with(
        &server,
        RotatingCookie {
            logins: Arc::clone(&logins),
        },
        3,
    );

    let page = client
        .fetch_feed_page(&pid(), FeedType::Reviews, 0)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(logins.load(Ordering::SeqCst), 2);
    assert_eq!(client.session().generation().await, 2);
    assert_eq!(client.session().active_handles(), 0);
}

#[tokio::test]
async fn unrecoverable_session_reports_auth_required() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(&server, StaticCookieAuthenticator::new("pin=stale"), 5);
    let err = client
        .fetch_feed_page(&pid(), FeedType::Qa, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, CrawlError::AuthRequired { .. }));
}
