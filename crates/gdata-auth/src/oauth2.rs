//! OAuth 2.0 authorizer for installed applications.
//!
//! The application sends the user to [`OAuth2Authorizer::build_authentication_uri`],
//! receives an authorization code back (pasted by the user or captured from
//! a loopback redirect), and exchanges it with
//! [`OAuth2Authorizer::request_authorization`]. The refresh token obtained
//! can be stored by the application and handed back on the next run with
//! [`OAuth2AuthorizerBuilder::refresh_token`].
//!
//! The access and refresh tokens live behind one mutex. Signing only holds
//! it to copy the access token; a refresh releases it for the duration of the
//! HTTP call.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gdata_core::{BoxFuture, Cancellable, Error, Result};
use gdata_transport::http::{Method, header};
use gdata_transport::{
    AuthorizationDomain, Authorizer, HttpRequest, ReqwestTransport, Transport, TransportConfig,
};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::credentials::OAuthCredentials;

/// Redirect URI for which the consent page shows the code for the user to copy.
pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Redirect URI for which the consent page puts the code in its title only.
pub const OOB_AUTO_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob:auto";

pub const AUTHENTICATION_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const TOKEN_URI: &str = "https://accounts.google.com/o/oauth2/token";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

fn malformed_response() -> Error {
    Error::protocol("The server returned a malformed response.")
}

/// Token state. An access token is only ever held alongside a refresh token.
#[derive(Default)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
    /// Bumped whenever the refresh token is replaced from outside a grant.
    generation: u64,
}

impl Tokens {
    fn set_refresh(&mut self, refresh: Option<String>) -> bool {
        if self.refresh == refresh {
            return false;
        }
        self.access = None;
        self.refresh = refresh;
        self.generation += 1;
        true
    }

    /// Installs a grant; a rotated refresh token replaces the old one.
    fn install(&mut self, grant: Grant) -> Result<()> {
        if let Some(refresh) = grant.refresh_token {
            self.refresh = Some(refresh);
        }
        if self.refresh.is_none() {
            // First authorization must yield a refresh token.
            self.access = None;
            return Err(malformed_response());
        }
        self.access = Some(grant.access_token);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
}

struct Grant {
    access_token: String,
    refresh_token: Option<String>,
}

fn parse_grant(body: &str) -> Result<Grant> {
    let response: TokenResponse =
        serde_json::from_str(body).map_err(|e| malformed_response().with_source(e))?;
    let access_token = response
        .access_token
        .filter(|token| !token.is_empty())
        .ok_or_else(malformed_response)?;
    debug!(expires_in = ?response.expires_in, "Received OAuth 2.0 grant");
    Ok(Grant {
        access_token,
        refresh_token: response.refresh_token.filter(|token| !token.is_empty()),
    })
}

fn grant_error(status: u16, body: &str) -> Error {
    let code = serde_json::from_str::<TokenErrorResponse>(body)
        .ok()
        .and_then(|response| response.error);
    let err = match code.as_deref() {
        Some("invalid_grant") => Error::forbidden("Access was denied by the user or server."),
        _ => malformed_response(),
    };
    err.with_status(status)
}

/// Runs a blocking call on the tokio blocking pool.
fn run_blocking<T, F>(call: F) -> BoxFuture<'static, Result<T>>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    Box::pin(async move {
        match tokio::task::spawn_blocking(call).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(Error::cancelled()),
        }
    })
}

struct Inner {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    locale: Option<String>,
    domains: Vec<AuthorizationDomain>,
    token_uri: Url,
    transport: Arc<dyn Transport>,
    tokens: Mutex<Tokens>,
}

/// Authorizes requests with OAuth 2.0 bearer tokens.
///
/// Cheap to clone; clones share the same tokens.
#[derive(Clone)]
pub struct OAuth2Authorizer {
    inner: Arc<Inner>,
}

impl fmt::Debug for OAuth2Authorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens = self.tokens();
        f.debug_struct("OAuth2Authorizer")
            .field("client_id", &self.inner.client_id)
            .field("redirect_uri", &self.inner.redirect_uri)
            .field("domains", &self.inner.domains)
            .field("has_access_token", &tokens.access.is_some())
            .field("has_refresh_token", &tokens.refresh.is_some())
            .finish_non_exhaustive()
    }
}

impl OAuth2Authorizer {
    pub fn builder(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> OAuth2AuthorizerBuilder {
        OAuth2AuthorizerBuilder {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            domains: Vec::new(),
            locale: None,
            config: TransportConfig::from_env(),
            transport: None,
            client_settings: false,
            refresh_token: None,
        }
    }

    /// Starts a builder from credentials loaded with [`OAuthCredentials`].
    pub fn with_credentials(
        credentials: &OAuthCredentials,
        redirect_uri: impl Into<String>,
    ) -> OAuth2AuthorizerBuilder {
        Self::builder(
            credentials.client_id.clone(),
            credentials.client_secret.clone(),
            redirect_uri,
        )
    }

    fn tokens(&self) -> MutexGuard<'_, Tokens> {
        self.inner
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.inner.client_secret
    }

    pub fn redirect_uri(&self) -> &str {
        &self.inner.redirect_uri
    }

    pub fn locale(&self) -> Option<&str> {
        self.inner.locale.as_deref()
    }

    pub fn domains(&self) -> &[AuthorizationDomain] {
        &self.inner.domains
    }

    /// The current access token, if any.
    pub fn access_token(&self) -> Option<String> {
        self.tokens().access.clone()
    }

    /// The current refresh token, for the application to persist.
    pub fn refresh_token(&self) -> Option<String> {
        self.tokens().refresh.clone()
    }

    /// Replaces the refresh token. A change drops the access token, which
    /// is obtained again on the next refresh.
    pub fn set_refresh_token(&self, refresh_token: Option<String>) {
        if self.tokens().set_refresh(refresh_token) {
            debug!("Refresh token replaced; access token dropped");
        }
    }

    /// The consent page URI to send the user to.
    ///
    /// Requests the scopes of every domain the authorizer was built with.
    pub fn build_authentication_uri(
        &self,
        login_hint: Option<&str>,
        include_granted_scopes: bool,
    ) -> String {
        let scopes = self
            .inner
            .domains
            .iter()
            .map(|domain| urlencoding::encode(domain.scope()).into_owned())
            .collect::<Vec<_>>()
            .join("%20");
        let mut uri = format!(
            "{AUTHENTICATION_URI}?response_type=code&client_id={}&redirect_uri={}&scope={scopes}",
            urlencoding::encode(&self.inner.client_id),
            urlencoding::encode(&self.inner.redirect_uri),
        );
        if let Some(hint) = login_hint.filter(|hint| !hint.is_empty()) {
            uri.push_str("&login_hint=");
            uri.push_str(&urlencoding::encode(hint));
        }
        if let Some(ref locale) = self.inner.locale {
            uri.push_str("&hl=");
            uri.push_str(&urlencoding::encode(locale));
        }
        uri.push_str(if include_granted_scopes {
            "&include_granted_scopes=true"
        } else {
            "&include_granted_scopes=false"
        });
        uri
    }

    /// Exchanges an authorization code from the consent page for tokens.
    ///
    /// # Errors
    ///
    /// Returns forbidden if the code was refused, protocol-error for any
    /// other failure response, `cancelled`, or a network error.
    pub fn request_authorization(
        &self,
        authorization_code: &str,
        cancellable: &Cancellable,
    ) -> Result<()> {
        if authorization_code.is_empty() {
            return Err(Error::invalid_argument("The authorization code is empty"));
        }
        info!("Requesting OAuth 2.0 authorization");
        let params = [
            ("client_id", self.inner.client_id.as_str()),
            ("client_secret", self.inner.client_secret.as_str()),
            ("code", authorization_code),
            ("redirect_uri", self.inner.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        self.exchange(&params, None, cancellable).map(|_| ())
    }

    /// Async form of [`request_authorization`](Self::request_authorization).
    pub fn request_authorization_async(
        &self,
        authorization_code: impl Into<String>,
        cancellable: Cancellable,
    ) -> BoxFuture<'static, Result<()>> {
        let this = self.clone();
        let code = authorization_code.into();
        run_blocking(move || this.request_authorization(&code, &cancellable))
    }

    /// Exchanges the refresh token for a new access token.
    ///
    /// Returns `Ok(false)` without a request when there is no refresh token.
    fn refresh(&self, cancellable: &Cancellable) -> Result<bool> {
        let (refresh_token, generation) = {
            let tokens = self.tokens();
            match tokens.refresh {
                Some(ref token) => (token.clone(), tokens.generation),
                None => return Ok(false),
            }
        };
        info!("Refreshing OAuth 2.0 access token");
        let params = [
            ("client_id", self.inner.client_id.as_str()),
            ("client_secret", self.inner.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];
        self.exchange(&params, Some(generation), cancellable)
    }

    /// Async form of [`Authorizer::refresh_authorization`].
    pub fn refresh_authorization_async(
        &self,
        cancellable: Cancellable,
    ) -> BoxFuture<'static, Result<bool>> {
        let this = self.clone();
        run_blocking(move || this.refresh(&cancellable))
    }

    /// POSTs `params` to the token endpoint and installs the grant.
    ///
    /// With `generation`, the grant is dropped if the refresh token was
    /// replaced while the request was in flight.
    fn exchange(
        &self,
        params: &[(&str, &str)],
        generation: Option<u64>,
        cancellable: &Cancellable,
    ) -> Result<bool> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        let mut request = HttpRequest::new(Method::POST, self.inner.token_uri.clone());
        request.set_body(FORM_CONTENT_TYPE, body)?;

        let mut response = self.inner.transport.send(request, cancellable)?;
        let body = response.read_text()?;
        if response.status != 200 {
            let err = grant_error(response.status, &body);
            warn!(status = response.status, "Token request failed: {}", err);
            return Err(err);
        }
        let grant = parse_grant(&body);

        let mut tokens = self.tokens();
        if generation.is_some_and(|generation| generation != tokens.generation) {
            debug!("Refresh token replaced during refresh; discarding grant");
            return Ok(false);
        }
        match grant {
            Ok(grant) => tokens.install(grant)?,
            Err(err) => {
                tokens.access = None;
                return Err(err);
            }
        }
        debug!("Installed new OAuth 2.0 access token");
        Ok(true)
    }
}

impl Authorizer for OAuth2Authorizer {
    fn process_request(&self, domain: Option<&AuthorizationDomain>, request: &mut HttpRequest) {
        let Some(domain) = domain else {
            return;
        };
        if !self.inner.domains.contains(domain) {
            return;
        }
        let Some(token) = self.access_token() else {
            return;
        };
        if !request.is_https() {
            warn!(
                uri = %request.uri,
                "Not authorizing a non-HTTPS request with the OAuth 2.0 access token"
            );
            return;
        }
        if let Err(e) = request.set_header(header::AUTHORIZATION, &format!("Bearer {token}")) {
            warn!("Cannot sign request: {}", e);
        }
    }

    fn is_authorized_for_domain(&self, domain: &AuthorizationDomain) -> bool {
        self.inner.domains.contains(domain) && self.tokens().access.is_some()
    }

    fn refresh_authorization(&self, cancellable: &Cancellable) -> Result<bool> {
        self.refresh(cancellable)
    }
}

/// Builder for [`OAuth2Authorizer`].
pub struct OAuth2AuthorizerBuilder {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    domains: Vec<AuthorizationDomain>,
    locale: Option<String>,
    config: TransportConfig,
    transport: Option<Arc<dyn Transport>>,
    // Set once a timeout or proxy is chosen; those only reach a client we build.
    client_settings: bool,
    refresh_token: Option<String>,
}

impl fmt::Debug for OAuth2AuthorizerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2AuthorizerBuilder")
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("domains", &self.domains)
            .field("locale", &self.locale)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OAuth2AuthorizerBuilder {
    /// Adds a domain to request access to. Duplicates are ignored.
    #[must_use]
    pub fn domain(mut self, domain: AuthorizationDomain) -> Self {
        if !self.domains.contains(&domain) {
            self.domains.push(domain);
        }
        self
    }

    #[must_use]
    pub fn domains(self, domains: impl IntoIterator<Item = AuthorizationDomain>) -> Self {
        domains.into_iter().fold(self, Self::domain)
    }

    /// Locale for the consent page, such as `en_GB`.
    #[must_use]
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Timeout of token requests in seconds; 0 means no timeout.
    #[must_use]
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config = self.config.with_timeout_secs(secs);
        self.client_settings = true;
        self
    }

    #[must_use]
    pub fn proxy(mut self, proxy: Option<Url>) -> Self {
        self.config = self.config.with_proxy(proxy);
        self.client_settings = true;
        self
    }

    /// Overrides the port of the token endpoint.
    #[must_use]
    pub fn https_port(mut self, port: Option<u16>) -> Self {
        self.config = self.config.with_https_port(port);
        self
    }

    /// Sends token requests through `transport` instead of a new client.
    ///
    /// The transport brings its own timeout and proxy, so it cannot be
    /// combined with [`timeout_secs`](Self::timeout_secs) or
    /// [`proxy`](Self::proxy).
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// A refresh token persisted from an earlier authorization.
    #[must_use]
    pub fn refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// # Errors
    ///
    /// Returns invalid-argument if the client id, secret or redirect URI is
    /// empty, if no domain was given, or if a timeout or proxy was set
    /// alongside an explicit transport. Returns a network error if the HTTP
    /// client cannot be created.
    pub fn build(self) -> Result<OAuth2Authorizer> {
        for (name, value) in [
            ("client id", &self.client_id),
            ("client secret", &self.client_secret),
            ("redirect URI", &self.redirect_uri),
        ] {
            if value.is_empty() {
                return Err(Error::invalid_argument(format!("The {name} is empty")));
            }
        }
        if self.domains.is_empty() {
            return Err(Error::invalid_argument(
                "At least one authorization domain is required",
            ));
        }

        if self.transport.is_some() && self.client_settings {
            return Err(Error::invalid_argument(
                "A timeout or proxy cannot be set when a transport is supplied; configure the transport instead",
            ));
        }

        let mut token_uri = Url::parse(TOKEN_URI)
            .map_err(|e| Error::invalid_argument(format!("Invalid token URI: {e}")))?;
        self.config.rewrite_uri(&mut token_uri);
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::with_config(self.config)?),
        };
        let tokens = Tokens {
            refresh: self.refresh_token.filter(|token| !token.is_empty()),
            ..Tokens::default()
        };

        Ok(OAuth2Authorizer {
            inner: Arc::new(Inner {
                client_id: self.client_id,
                client_secret: self.client_secret,
                redirect_uri: self.redirect_uri,
                locale: self.locale,
                domains: self.domains,
                token_uri,
                transport,
                tokens: Mutex::new(tokens),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdata_core::ErrorKind;
    use gdata_transport::{MockResponse, MockTransport, RecordedRequest};
    use insta::assert_snapshot;

    fn domains() -> Vec<AuthorizationDomain> {
        vec![
            AuthorizationDomain::register("one", "https://example.com/auth/one"),
            AuthorizationDomain::register("two", "https://example.com/auth/two"),
        ]
    }

    fn authorizer(transport: &Arc<MockTransport>) -> OAuth2Authorizer {
        OAuth2Authorizer::builder(
            "client-id.apps.googleusercontent.com",
            "client-secret",
            OOB_REDIRECT_URI,
        )
        .domains(domains())
        .transport(transport.clone())
        .build()
        .unwrap()
    }

    fn json(status: u16, body: &str) -> MockResponse {
        MockResponse::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(body.to_string())
    }

    fn form(request: &RecordedRequest) -> Vec<(String, String)> {
        url::form_urlencoded::parse(&request.body)
            .into_owned()
            .collect()
    }

    fn signed(authorizer: &OAuth2Authorizer, uri: &str) -> Option<String> {
        let mut request = HttpRequest::parse(Method::GET, uri).unwrap();
        authorizer.process_request(Some(&domains()[0]), &mut request);
        request.header(&header::AUTHORIZATION).map(str::to_string)
    }

    #[test]
    fn authentication_uri() {
        let transport = Arc::new(MockTransport::new(|_| MockResponse::new(500)));
        let authorizer = authorizer(&transport);
        assert_snapshot!(
            authorizer.build_authentication_uri(None, false),
            @"https://accounts.google.com/o/oauth2/auth?response_type=code&client_id=client-id.apps.googleusercontent.com&redirect_uri=urn%3Aietf%3Awg%3Aoauth%3A2.0%3Aoob&scope=https%3A%2F%2Fexample.com%2Fauth%2Fone%20https%3A%2F%2Fexample.com%2Fauth%2Ftwo&include_granted_scopes=false"
        );
    }

    #[test]
    fn authentication_uri_with_hint_and_locale() {
        let transport = Arc::new(MockTransport::new(|_| MockResponse::new(500)));
        let authorizer = OAuth2Authorizer::builder("id", "secret", "http://localhost:8080")
            .domain(domains()[0].clone())
            .locale("en_GB")
            .transport(transport)
            .build()
            .unwrap();
        assert_snapshot!(
            authorizer.build_authentication_uri(Some("someone@example.com"), true),
            @"https://accounts.google.com/o/oauth2/auth?response_type=code&client_id=id&redirect_uri=http%3A%2F%2Flocalhost%3A8080&scope=https%3A%2F%2Fexample.com%2Fauth%2Fone&login_hint=someone%40example.com&hl=en_GB&include_granted_scopes=true"
        );
    }

    #[test]
    fn builder_rejects_missing_fields() {
        let transport: Arc<dyn Transport> = Arc::new(MockTransport::new(|_| MockResponse::new(500)));
        let err = OAuth2Authorizer::builder("", "secret", OOB_REDIRECT_URI)
            .domains(domains())
            .transport(transport.clone())
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = OAuth2Authorizer::builder("id", "secret", OOB_REDIRECT_URI)
            .transport(transport)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn client_settings_conflict_with_a_supplied_transport() {
        let transport: Arc<dyn Transport> = Arc::new(MockTransport::new(|_| MockResponse::new(500)));
        let proxy = Url::parse("http://proxy.example.com:3128").unwrap();
        let builders = [
            OAuth2Authorizer::builder("id", "secret", OOB_REDIRECT_URI).timeout_secs(30),
            OAuth2Authorizer::builder("id", "secret", OOB_REDIRECT_URI).proxy(Some(proxy)),
        ];
        for builder in builders {
            let err = builder
                .domains(domains())
                .transport(transport.clone())
                .build()
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
            assert!(err.message().contains("transport"));
        }

        let authorizer = OAuth2Authorizer::builder("id", "secret", OOB_REDIRECT_URI)
            .domains(domains())
            .https_port(Some(8443))
            .transport(transport)
            .build()
            .unwrap();
        assert!(!authorizer.is_authorized_for_domain(&domains()[0]));

        OAuth2Authorizer::builder("id", "secret", OOB_REDIRECT_URI)
            .domains(domains())
            .timeout_secs(30)
            .build()
            .unwrap();
    }

    #[test]
    fn code_exchange_installs_tokens_and_signs() {
        let transport = Arc::new(MockTransport::new(|_| {
            json(
                200,
                r#"{"access_token": "access-1", "refresh_token": "refresh-1", "expires_in": 3600, "token_type": "Bearer"}"#,
            )
        }));
        let authorizer = authorizer(&transport);
        assert!(!authorizer.is_authorized_for_domain(&domains()[0]));
        assert_eq!(signed(&authorizer, "https://example.com/feed"), None);

        authorizer
            .request_authorization("the-code", &Cancellable::new())
            .unwrap();
        assert_eq!(authorizer.access_token().as_deref(), Some("access-1"));
        assert_eq!(authorizer.refresh_token().as_deref(), Some("refresh-1"));
        assert!(authorizer.is_authorized_for_domain(&domains()[1]));
        assert_eq!(
            signed(&authorizer, "https://example.com/feed").as_deref(),
            Some("Bearer access-1")
        );

        let request = &transport.requests()[0];
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.uri.as_str(), TOKEN_URI);
        assert_eq!(request.header("Content-Type"), Some(FORM_CONTENT_TYPE));
        let form = form(request);
        assert!(form.contains(&("grant_type".into(), "authorization_code".into())));
        assert!(form.contains(&("code".into(), "the-code".into())));
        assert!(form.contains(&("redirect_uri".into(), OOB_REDIRECT_URI.into())));
        assert!(form.contains(&("client_secret".into(), "client-secret".into())));
    }

    #[test]
    fn plain_http_and_foreign_domains_are_not_signed() {
        let transport = Arc::new(MockTransport::new(|_| {
            json(200, r#"{"access_token": "a", "refresh_token": "r"}"#)
        }));
        let authorizer = authorizer(&transport);
        authorizer
            .request_authorization("code", &Cancellable::new())
            .unwrap();
        assert_eq!(signed(&authorizer, "http://example.com/feed"), None);

        let other = AuthorizationDomain::register("other", "https://example.com/auth/other");
        let mut request = HttpRequest::parse(Method::GET, "https://example.com/feed").unwrap();
        authorizer.process_request(Some(&other), &mut request);
        authorizer.process_request(None, &mut request);
        assert!(request.headers.is_empty());
        assert!(!authorizer.is_authorized_for_domain(&other));
    }

    #[test]
    fn invalid_grant_is_forbidden() {
        let transport = Arc::new(MockTransport::new(|_| {
            json(400, r#"{"error": "invalid_grant"}"#)
        }));
        let err = authorizer(&transport)
            .request_authorization("bad", &Cancellable::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(err.message(), "Access was denied by the user or server.");
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn other_failures_are_malformed_responses() {
        for response in [
            json(400, r#"{"error": "invalid_client"}"#),
            json(500, "Internal error"),
            json(200, "not json"),
            json(200, r#"{"refresh_token": "r"}"#),
            json(200, r#"{"access_token": ""}"#),
        ] {
            let transport = Arc::new(MockTransport::new(move |_| response.clone()));
            let err = authorizer(&transport)
                .request_authorization("code", &Cancellable::new())
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ProtocolError);
            assert_eq!(err.message(), "The server returned a malformed response.");
        }
    }

    #[test]
    fn first_authorization_requires_refresh_token() {
        let transport = Arc::new(MockTransport::new(|_| {
            json(200, r#"{"access_token": "a"}"#)
        }));
        let authorizer = authorizer(&transport);
        let err = authorizer
            .request_authorization("code", &Cancellable::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
        assert_eq!(authorizer.access_token(), None);
        assert_eq!(authorizer.refresh_token(), None);
    }

    #[test]
    fn refresh_without_token_does_nothing() {
        let transport = Arc::new(MockTransport::new(|_| MockResponse::new(500)));
        let authorizer = authorizer(&transport);
        assert!(!authorizer
            .refresh_authorization(&Cancellable::new())
            .unwrap());
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn refresh_keeps_or_rotates_refresh_token() {
        let transport = Arc::new(MockTransport::new(|request| {
            let rotated = form(request)
                .iter()
                .any(|(name, value)| name == "refresh_token" && value == "stored-2");
            if rotated {
                json(200, r#"{"access_token": "access-3", "refresh_token": "stored-3"}"#)
            } else {
                json(200, r#"{"access_token": "access-2"}"#)
            }
        }));
        let authorizer = OAuth2Authorizer::builder("id", "secret", OOB_REDIRECT_URI)
            .domains(domains())
            .transport(transport.clone())
            .refresh_token("stored-1")
            .build()
            .unwrap();
        assert!(authorizer.refresh_authorization(&Cancellable::new()).unwrap());
        assert_eq!(authorizer.access_token().as_deref(), Some("access-2"));
        assert_eq!(authorizer.refresh_token().as_deref(), Some("stored-1"));

        authorizer.set_refresh_token(Some("stored-2".into()));
        assert_eq!(authorizer.access_token(), None);
        assert!(authorizer.refresh_authorization(&Cancellable::new()).unwrap());
        assert_eq!(authorizer.access_token().as_deref(), Some("access-3"));
        assert_eq!(authorizer.refresh_token().as_deref(), Some("stored-3"));

        let form = form(&transport.requests()[0]);
        assert!(form.contains(&("grant_type".into(), "refresh_token".into())));
        assert!(form.contains(&("refresh_token".into(), "stored-1".into())));
    }

    #[test]
    fn setting_same_refresh_token_keeps_access_token() {
        let transport = Arc::new(MockTransport::new(|_| {
            json(200, r#"{"access_token": "a", "refresh_token": "r"}"#)
        }));
        let authorizer = authorizer(&transport);
        authorizer
            .request_authorization("code", &Cancellable::new())
            .unwrap();
        authorizer.set_refresh_token(Some("r".into()));
        assert_eq!(authorizer.access_token().as_deref(), Some("a"));
        authorizer.set_refresh_token(None);
        assert_eq!(authorizer.access_token(), None);
        assert_eq!(authorizer.refresh_token(), None);
    }

    #[test]
    fn cancelled_exchange_sends_nothing() {
        let transport = Arc::new(MockTransport::new(|_| MockResponse::new(200)));
        let cancellable = Cancellable::new();
        cancellable.cancel();
        let err = authorizer(&transport)
            .request_authorization("code", &cancellable)
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn token_endpoint_port_override() {
        let transport = Arc::new(MockTransport::new(|_| {
            json(200, r#"{"access_token": "a", "refresh_token": "r"}"#)
        }));
        let authorizer = OAuth2Authorizer::builder("id", "secret", OOB_REDIRECT_URI)
            .domains(domains())
            .https_port(Some(8443))
            .transport(transport.clone())
            .build()
            .unwrap();
        authorizer
            .request_authorization("code", &Cancellable::new())
            .unwrap();
        assert_eq!(transport.requests()[0].uri.port(), Some(8443));
    }

    #[tokio::test]
    async fn async_mirrors() {
        let transport = Arc::new(MockTransport::new(|_| {
            json(200, r#"{"access_token": "async", "refresh_token": "r"}"#)
        }));
        let authorizer = authorizer(&transport);
        authorizer
            .request_authorization_async("code", Cancellable::new())
            .await
            .unwrap();
        assert!(authorizer
            .refresh_authorization_async(Cancellable::new())
            .await
            .unwrap());
        assert_eq!(authorizer.access_token().as_deref(), Some("async"));
        assert_eq!(transport.request_count(), 2);
    }
}
