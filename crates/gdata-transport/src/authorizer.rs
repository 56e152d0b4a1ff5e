//! The authorizer capability.

use gdata_core::{Cancellable, Result};

use crate::domain::AuthorizationDomain;
use crate::http::HttpRequest;

/// Signs requests for the domains it holds credentials for.
///
/// Implementations are shared between threads; signing must not block on a
/// refresh in progress.
pub trait Authorizer: Send + Sync {
    /// Adds authorization to `request` if credentials covering `domain` are
    /// held. Otherwise the request is left untouched and the server will
    /// reject it.
    fn process_request(&self, domain: Option<&AuthorizationDomain>, request: &mut HttpRequest);

    /// Returns true if requests for `domain` would be signed.
    fn is_authorized_for_domain(&self, domain: &AuthorizationDomain) -> bool;

    /// Obtains fresh credentials.
    ///
    /// Returns `Ok(false)` when the authorizer has nothing to refresh with.
    fn refresh_authorization(&self, cancellable: &Cancellable) -> Result<bool>;
}

impl<A: Authorizer + ?Sized> Authorizer for std::sync::Arc<A> {
    fn process_request(&self, domain: Option<&AuthorizationDomain>, request: &mut HttpRequest) {
        (**self).process_request(domain, request);
    }

    fn is_authorized_for_domain(&self, domain: &AuthorizationDomain) -> bool {
        (**self).is_authorized_for_domain(domain)
    }

    fn refresh_authorization(&self, cancellable: &Cancellable) -> Result<bool> {
        (**self).refresh_authorization(cancellable)
    }
}

/// Reports every domain as authorized and signs nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyAuthorizer;

impl Authorizer for DummyAuthorizer {
    fn process_request(&self, _domain: Option<&AuthorizationDomain>, _request: &mut HttpRequest) {}

    fn is_authorized_for_domain(&self, _domain: &AuthorizationDomain) -> bool {
        true
    }

    fn refresh_authorization(&self, cancellable: &Cancellable) -> Result<bool> {
        cancellable.check()?;
        Ok(true)
    }
}
