//! Platform directories against a mock API server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use unitmap_adapters::{
    ApplicationDirectory, BusinessUnitDirectory, DirectoryError, PlatformApi, PlatformApplications,
    PlatformBusinessUnits, APPLICATIONS_PATH, BUSINESS_UNITS_PATH,
};
use unitmap_core::Application;
use unitmap_storage::{HttpClient, HttpClientConfig, RetryPolicy, TransportError};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api(server: &MockServer, page_size: usize) -> PlatformApi {
    api_with_timeout(server, page_size, Duration::from_secs(5))
}

fn api_with_timeout(server: &MockServer, page_size: usize, timeout: Duration) -> PlatformApi {
    let http = HttpClient::new(HttpClientConfig {
        timeout,
        user_agent: None,
        retry: RetryPolicy {
            max_attempts: 3,
            backoff_unit: Duration::from_millis(5),
        },
    })
    .expect("http client");
    PlatformApi::new(Arc::new(http), server.uri()).with_page_size(page_size)
}

fn apps_path() -> String {
    format!("/{APPLICATIONS_PATH}")
}

fn bu_path() -> String {
    format!("/{BUSINESS_UNITS_PATH}")
}

fn app_json(guid: &str, name: &str) -> serde_json::Value {
    json!({ "guid": guid, "profile": { "name": name } })
}

#[tokio::test]
async fn application_listing_stops_after_first_empty_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(apps_path()))
        .and(query_param("page", "0"))
        .and(query_param("size", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_embedded": { "applications": [app_json("g1", "ABCD-one"), app_json("g2", "ABCD-two")] }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(apps_path()))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_embedded": { "applications": [app_json("g3", "WXYZ-three")] }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(apps_path()))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "page": { "number": 2 } })))
        .expect(1)
        .mount(&server)
        .await;

    let apps = PlatformApplications::new(api(&server, 2)).fetch_all().await.unwrap();
    let guids: Vec<_> = apps.iter().filter_map(|a| a.guid()).collect();
    assert_eq!(guids, vec!["g1", "g2", "g3"]);
}

#[tokio::test]
async fn application_listing_error_status_is_a_read_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(apps_path()))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .expect(1)
        .mount(&server)
        .await;

    let err = PlatformApplications::new(api(&server, 50)).fetch_all().await.unwrap_err();
    match err {
        DirectoryError::Read { status, body, .. } => {
            assert_eq!(status, 401);
            assert_eq!(body, "unauthorized");
        }
        other => panic!("expected read error, got {other:?}"),
    }
}

#[tokio::test]
async fn business_units_map_names_to_link_guids() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(bu_path()))
        .and(query_param("page", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_embedded": { "business_units": [
                { "bu_name": "ABCD", "_links": { "self": { "href": "https://api/x/business_units/bu-1/" } } },
                { "bu_name": "NOLINK" },
                { "_links": { "self": { "href": "https://api/x/business_units/bu-3" } } }
            ] }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(bu_path()))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "business_units": [] })))
        .mount(&server)
        .await;

    let map = PlatformBusinessUnits::new(api(&server, 50)).fetch_all().await.unwrap();
    assert_eq!(map.len(), 1);
    assert_eq!(map.get("ABCD"), Some("bu-1"));
    assert_eq!(map.get("NOLINK"), None);
}

#[tokio::test]
async fn business_unit_listing_error_status_is_a_read_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(bu_path()))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .expect(1)
        .mount(&server)
        .await;

    let err = PlatformBusinessUnits::new(api(&server, 50)).fetch_all().await.unwrap_err();
    match err {
        DirectoryError::Read { resource, status, body } => {
            assert_eq!(resource, "business units");
            assert_eq!(status, 500);
            assert_eq!(body, "down");
        }
        other => panic!("expected read error, got {other:?}"),
    }
}

#[tokio::test]
async fn details_error_status_is_a_read_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{}/missing", apps_path())))
        .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
        .expect(1)
        .mount(&server)
        .await;

    let err = PlatformApplications::new(api(&server, 50))
        .fetch_details("missing")
        .await
        .unwrap_err();
    match err {
        DirectoryError::Read { resource, status, body } => {
            assert_eq!(resource, "application missing");
            assert_eq!(status, 404);
            assert_eq!(body, "nope");
        }
        other => panic!("expected read error, got {other:?}"),
    }
}

#[tokio::test]
async fn listing_gives_up_after_three_timed_out_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(bu_path()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "business_units": [] }))
                .set_delay(Duration::from_secs(1)),
        )
        .expect(3)
        .mount(&server)
        .await;

    let err = PlatformBusinessUnits::new(api_with_timeout(&server, 50, Duration::from_millis(100)))
        .fetch_all()
        .await
        .unwrap_err();
    match err {
        DirectoryError::Transport(TransportError::Exhausted { attempts, source, .. }) => {
            assert_eq!(attempts, 3);
            assert!(source.is_timeout());
        }
        other => panic!("expected exhausted transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn create_posts_name_and_reads_guid_from_self_link() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(bu_path()))
        .and(body_json(json!({ "bu_name": "ABCD" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "bu_name": "ABCD",
            "_links": { "self": { "href": "https://api/x/business_units/new-guid" } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let guid = PlatformBusinessUnits::new(api(&server, 50))
        .create("ABCD", false)
        .await
        .unwrap();
    assert_eq!(guid, "new-guid");
}

#[tokio::test]
async fn simulated_create_and_assign_make_no_calls() {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let guid = PlatformBusinessUnits::new(api(&server, 50))
        .create("ABCD", true)
        .await
        .unwrap();
    assert_eq!(guid, "ABCD_DRYRUN");

    let app: Application = serde_json::from_value(app_json("g1", "ABCD-one")).unwrap();
    PlatformApplications::new(api(&server, 50))
        .assign_business_unit("g1", &app, &guid, true)
        .await
        .unwrap();
}

#[tokio::test]
async fn create_error_status_is_a_write_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(bu_path()))
        .respond_with(ResponseTemplate::new(409).set_body_string("exists"))
        .mount(&server)
        .await;

    let err = PlatformBusinessUnits::new(api(&server, 50))
        .create("ABCD", false)
        .await
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Write { status: 409, .. }));
}

#[tokio::test]
async fn assign_puts_full_profile_with_new_business_unit() {
    let server = MockServer::start().await;
    let details = json!({
        "guid": "g1",
        "profile": {
            "name": "ABCD-one",
            "business_criticality": "HIGH",
            "policies": [{ "guid": "p1" }],
            "business_unit": { "guid": "old-bu" }
        }
    });
    Mock::given(method("GET"))
        .and(path(format!("{}/g1", apps_path())))
        .respond_with(ResponseTemplate::new(200).set_body_json(details))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("{}/g1", apps_path())))
        .and(body_json(json!({
            "profile": {
                "name": "ABCD-one",
                "business_criticality": "HIGH",
                "policies": [{ "guid": "p1" }],
                "business_unit": { "guid": "new-bu" }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let apps = PlatformApplications::new(api(&server, 50));
    let full = apps.fetch_details("g1").await.unwrap();
    assert_eq!(full.current_business_unit(), Some("old-bu"));

    apps.assign_business_unit("g1", &full, "new-bu", false).await.unwrap();
    assert_eq!(full.current_business_unit(), Some("old-bu"));
}

#[tokio::test]
async fn assign_error_status_is_a_write_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(format!("{}/g1", apps_path())))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad profile"))
        .mount(&server)
        .await;

    let app: Application = serde_json::from_value(app_json("g1", "ABCD-one")).unwrap();
    let err = PlatformApplications::new(api(&server, 50))
        .assign_business_unit("g1", &app, "bu", false)
        .await
        .unwrap_err();
    match err {
        DirectoryError::Write { status, body, .. } => {
            assert_eq!(status, 400);
            assert_eq!(body, "bad profile");
        }
        other => panic!("expected write error, got {other:?}"),
    }
}
