//! Signing from several threads while the access token is refreshed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use gdata_auth::{OAuth2Authorizer, OOB_REDIRECT_URI};
use gdata_core::Cancellable;
use gdata_transport::http::{Method, header};
use gdata_transport::{AuthorizationDomain, Authorizer, HttpRequest, MockResponse, MockTransport};

const SIGNERS: usize = 2;
const SIGNATURES: usize = 500;
const REFRESHES: usize = 50;

#[test]
fn signing_races_refresh() {
    let domain = AuthorizationDomain::register("race", "https://example.com/auth/race");
    let issued: Arc<Mutex<HashSet<String>>> = Arc::default();
    let counter = Arc::new(AtomicUsize::new(0));

    let transport = {
        let issued = issued.clone();
        Arc::new(MockTransport::new(move |_| {
            let token = format!("token-{}", counter.fetch_add(1, Ordering::SeqCst));
            issued.lock().unwrap().insert(token.clone());
            MockResponse::new(200)
                .with_header("Content-Type", "application/json")
                .with_body(format!(
                    r#"{{"access_token": "{token}", "refresh_token": "refresh"}}"#
                ))
        }))
    };
    let authorizer = OAuth2Authorizer::builder("id", "secret", OOB_REDIRECT_URI)
        .domain(domain.clone())
        .transport(transport.clone())
        .build()
        .unwrap();
    authorizer
        .request_authorization("code", &Cancellable::new())
        .unwrap();

    let signers: Vec<_> = (0..SIGNERS)
        .map(|_| {
            let authorizer = authorizer.clone();
            let domain = domain.clone();
            thread::spawn(move || {
                (0..SIGNATURES)
                    .map(|_| {
                        let mut request =
                            HttpRequest::parse(Method::GET, "https://example.com/feed").unwrap();
                        authorizer.process_request(Some(&domain), &mut request);
                        request
                            .header(&header::AUTHORIZATION)
                            .map(str::to_string)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let refresher = {
        let authorizer = authorizer.clone();
        thread::spawn(move || {
            for _ in 0..REFRESHES {
                assert!(authorizer
                    .refresh_authorization(&Cancellable::new())
                    .unwrap());
            }
        })
    };

    refresher.join().unwrap();
    let issued = issued.lock().unwrap();
    for signer in signers {
        for header in signer.join().unwrap() {
            let header = header.expect("every request is signed");
            let token = header.strip_prefix("Bearer ").unwrap();
            assert!(!token.is_empty());
            assert!(issued.contains(token), "{token} was never issued");
        }
    }

    assert_eq!(transport.request_count(), REFRESHES + 1);
    assert_eq!(
        authorizer.access_token().as_deref(),
        Some(format!("token-{REFRESHES}").as_str())
    );
    assert_eq!(authorizer.refresh_token().as_deref(), Some("refresh"));
}
