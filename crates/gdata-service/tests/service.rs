//! Service operations against a scripted server.

use std::sync::Arc;

use gdata_auth::{OAuth2Authorizer, OOB_REDIRECT_URI};
use gdata_core::atom::rel;
use gdata_core::{Cancellable, Entry, ErrorKind, Feed, Link, PaginationType, Query, QueryParameters};
use gdata_transport::http::Method;
use gdata_transport::{AuthorizationDomain, MockResponse, MockTransport, RecordedRequest};
use gdata_service::Service;

const FEED_URI: &str = "https://example.com/feeds/default";

fn feed_xml(etag: &str, next: Option<&str>) -> String {
    let next = next
        .map(|uri| format!(r#"<link rel="next" href="{uri}"/>"#))
        .unwrap_or_default();
    let etag = etag.replace('"', "&quot;");
    format!(
        r#"<feed xmlns="http://www.w3.org/2005/Atom" xmlns:gd="http://schemas.google.com/g/2005" gd:etag="{etag}"><id>{FEED_URI}</id><updated>2026-10-19T09:00:00Z</updated><title>Things</title>{next}<entry><id>https://example.com/feeds/default/1</id><title>First</title></entry><entry><id>https://example.com/feeds/default/2</id><title>Second</title></entry></feed>"#
    )
}

const ENTRY_XML: &str = r#"<entry xmlns="http://www.w3.org/2005/Atom" xmlns:gd="http://schemas.google.com/g/2005" gd:etag="W/&quot;created&quot;"><id>https://example.com/feeds/default/3</id><title type="text">Third</title><link rel="edit" href="https://example.com/feeds/default/3"/></entry>"#;

fn service(transport: &Arc<MockTransport>) -> Service {
    Service::builder()
        .transport(transport.clone())
        .build()
        .unwrap()
}

#[test]
fn query_parses_feed_and_records_etag() {
    let transport = Arc::new(MockTransport::new(|_| {
        MockResponse::atom(200, feed_xml("W/\"v1\"", None))
    }));
    let mut query = Query::new(Some("things"));
    let feed: Feed = service(&transport)
        .query(None, FEED_URI, Some(&mut query), &Cancellable::new())
        .unwrap()
        .expect("a fresh feed");

    assert_eq!(feed.title(), Some("Things"));
    assert_eq!(feed.entries().len(), 2);
    assert_eq!(feed.entries()[1].title(), Some("Second"));
    assert_eq!(query.etag(), Some("W/\"v1\""));

    let request = &transport.requests()[0];
    assert_eq!(request.method, Method::GET);
    assert_eq!(request.uri.as_str(), "https://example.com/feeds/default?q=things");
    assert_eq!(request.header("If-None-Match"), None);
}

#[test]
fn unchanged_feed_is_not_returned() {
    let transport = Arc::new(MockTransport::new(|request| {
        if request.header("If-None-Match") == Some("W/\"v1\"") {
            MockResponse::new(304)
        } else {
            MockResponse::atom(200, feed_xml("W/\"v1\"", None))
        }
    }));
    let service = service(&transport);
    let mut query = Query::new(None);

    let first = service
        .query::<Entry>(None, FEED_URI, Some(&mut query), &Cancellable::new())
        .unwrap();
    assert!(first.is_some());
    let second = service
        .query::<Entry>(None, FEED_URI, Some(&mut query), &Cancellable::new())
        .unwrap();
    assert!(second.is_none());
    assert_eq!(transport.request_count(), 2);
}

#[test]
fn paging_by_links_ends_without_a_request() {
    let next = "https://example.com/feeds/default?page=2";
    let transport = Arc::new(MockTransport::new(move |request| {
        if request.uri.as_str() == next {
            MockResponse::atom(200, feed_xml("W/\"p2\"", None))
        } else {
            MockResponse::atom(200, feed_xml("W/\"p1\"", Some(next)))
        }
    }));
    let service = service(&transport);
    let mut query = Query::new(None);
    query.set_pagination_type(PaginationType::Uris);

    service
        .query::<Entry>(None, FEED_URI, Some(&mut query), &Cancellable::new())
        .unwrap();
    query.next_page();
    assert_eq!(query.query_uri(FEED_URI), next);
    assert_eq!(query.etag(), None);
    service
        .query::<Entry>(None, FEED_URI, Some(&mut query), &Cancellable::new())
        .unwrap();
    assert_eq!(transport.requests()[1].uri.as_str(), next);

    query.next_page();
    assert!(query.query().is_finished());
    let empty = service
        .query::<Entry>(None, FEED_URI, Some(&mut query), &Cancellable::new())
        .unwrap()
        .unwrap();
    assert_eq!(empty.id(), Some("feed1"));
    assert_eq!(empty.title(), Some("Empty feed"));
    assert!(empty.entries().is_empty());
    assert_eq!(transport.request_count(), 2);
}

#[test]
fn insert_posts_entry_and_returns_created_copy() {
    let transport = Arc::new(MockTransport::new(|_| MockResponse::atom(201, ENTRY_XML)));
    let mut entry = Entry::new(None);
    entry.set_title(Some("Third".to_string()));

    let created = service(&transport)
        .insert(None, FEED_URI, &entry, &Cancellable::new())
        .unwrap();
    assert!(created.is_inserted());
    assert_eq!(created.etag(), Some("W/\"created\""));
    assert!(created.look_up_link(rel::EDIT).is_some());

    let request = &transport.requests()[0];
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.header("Content-Type"), Some("application/atom+xml"));
    assert!(request.body_text().contains(r#"<title type="text">Third</title>"#));
}

#[test]
fn stale_update_is_a_conflict() {
    let transport = Arc::new(MockTransport::new(|_| {
        MockResponse::new(412).with_body(
            r#"<errors xmlns="http://schemas.google.com/g/2005"><error><domain>GData</domain><code>etagsMismatch</code><internalReason>Etags mismatch</internalReason></error></errors>"#,
        )
    }));
    let mut entry = Entry::new(Some("https://example.com/feeds/default/3".to_string()));
    entry.add_link(Link::new("https://example.com/feeds/default/3", Some(rel::EDIT)));
    entry.set_etag(Some("W/\"stale\"".to_string()));

    let err = service(&transport)
        .update(None, &entry, &Cancellable::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.status(), Some(412));
    assert!(err.message().ends_with("Etags mismatch"));

    let request = &transport.requests()[0];
    assert_eq!(request.method, Method::PUT);
    assert_eq!(request.header("If-Match"), Some("W/\"stale\""));
}

#[test]
fn missing_entry_is_not_found() {
    let transport = Arc::new(MockTransport::new(|_| {
        MockResponse::new(404).with_body("No such entry")
    }));
    let err = service(&transport)
        .query_single::<Entry>(None, "https://example.com/feeds/default/9", &Cancellable::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    insta::assert_snapshot!(err.message(), @"The requested resource was not found: No such entry");
}

fn is_token_request(request: &RecordedRequest) -> bool {
    request.uri.path() == "/o/oauth2/token"
}

fn oauth_service(transport: &Arc<MockTransport>, domain: &AuthorizationDomain) -> Service {
    let authorizer = OAuth2Authorizer::builder("id", "secret", OOB_REDIRECT_URI)
        .domain(domain.clone())
        .refresh_token("stored")
        .transport(transport.clone())
        .build()
        .unwrap();
    Service::builder()
        .transport(transport.clone())
        .authorizer(Arc::new(authorizer))
        .build()
        .unwrap()
}

#[test]
fn unauthorized_request_is_retried_after_refresh() {
    let domain = AuthorizationDomain::register("things", "https://example.com/auth/things");
    let transport = Arc::new(MockTransport::new(|request| {
        if is_token_request(request) {
            return MockResponse::new(200)
                .with_header("Content-Type", "application/json")
                .with_body(r#"{"access_token": "fresh", "expires_in": 3600}"#);
        }
        match request.header("Authorization") {
            Some("Bearer fresh") => MockResponse::atom(200, feed_xml("W/\"v1\"", None)),
            _ => MockResponse::new(401),
        }
    }));
    let service = oauth_service(&transport, &domain);
    assert!(!service.is_authorized(&domain));

    let feed = service
        .query::<Entry>(Some(&domain), FEED_URI, None, &Cancellable::new())
        .unwrap();
    assert!(feed.is_some());
    assert!(service.is_authorized(&domain));

    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].header("Authorization"), None);
    assert!(is_token_request(&requests[1]));
    assert_eq!(requests[2].header("Authorization"), Some("Bearer fresh"));
}

#[test]
fn refresh_is_attempted_once() {
    let domain = AuthorizationDomain::register("things", "https://example.com/auth/things");
    let transport = Arc::new(MockTransport::new(|request| {
        if is_token_request(request) {
            return MockResponse::new(200)
                .with_header("Content-Type", "application/json")
                .with_body(r#"{"access_token": "useless"}"#);
        }
        MockResponse::new(401).with_body("Token invalid")
    }));
    let service = oauth_service(&transport, &domain);

    let err = service
        .query::<Entry>(Some(&domain), FEED_URI, None, &Cancellable::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthenticationRequired);
    assert_eq!(transport.request_count(), 3);
}

#[test]
fn no_retry_without_an_authorizer() {
    let transport = Arc::new(MockTransport::new(|_| MockResponse::new(401)));
    let err = service(&transport)
        .query::<Entry>(None, FEED_URI, None, &Cancellable::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthenticationRequired);
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn async_mirrors() {
    let transport = Arc::new(MockTransport::new(|request| {
        if request.method == Method::POST {
            MockResponse::atom(201, ENTRY_XML)
        } else if request.method == Method::DELETE {
            MockResponse::new(204)
        } else {
            MockResponse::atom(200, feed_xml("W/\"v1\"", None))
        }
    }));
    let service = service(&transport);

    let (feed, query): (Option<Feed>, Query) = service
        .query_async(None, FEED_URI, Query::new(Some("async")), Cancellable::new())
        .await
        .unwrap();
    assert_eq!(feed.unwrap().entries().len(), 2);
    assert_eq!(query.etag(), Some("W/\"v1\""));

    let created = service
        .insert_async(None, FEED_URI, Entry::new(None), Cancellable::new())
        .await
        .unwrap();
    service
        .delete_async(None, created, Cancellable::new())
        .await
        .unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].uri.as_str(), "https://example.com/feeds/default/3");
    assert_eq!(requests[2].header("If-Match"), Some("W/\"created\""));
}
