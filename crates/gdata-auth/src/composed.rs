//! An authorizer made of per-service authorizers.

use std::fmt;
use std::sync::Arc;

use gdata_core::{Cancellable, Result};
use gdata_transport::{AuthorizationDomain, Authorizer, HttpRequest};
use tracing::{debug, warn};

/// Signs each request with the first member authorized for its domain.
#[derive(Clone, Default)]
pub struct ComposedAuthorizer {
    members: Vec<Arc<dyn Authorizer>>,
}

impl fmt::Debug for ComposedAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposedAuthorizer")
            .field("members", &self.members.len())
            .finish()
    }
}

impl ComposedAuthorizer {
    pub fn new(members: impl IntoIterator<Item = Arc<dyn Authorizer>>) -> Self {
        Self {
            members: members.into_iter().collect(),
        }
    }

    /// Adds a member, consulted after the existing ones.
    pub fn push(&mut self, member: Arc<dyn Authorizer>) {
        self.members.push(member);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Authorizer for ComposedAuthorizer {
    fn process_request(&self, domain: Option<&AuthorizationDomain>, request: &mut HttpRequest) {
        let Some(domain) = domain else {
            return;
        };
        if let Some(member) = self
            .members
            .iter()
            .find(|member| member.is_authorized_for_domain(domain))
        {
            member.process_request(Some(domain), request);
        }
    }

    fn is_authorized_for_domain(&self, domain: &AuthorizationDomain) -> bool {
        self.members
            .iter()
            .any(|member| member.is_authorized_for_domain(domain))
    }

    /// Refreshes every member. The first failure is returned once all have
    /// been tried.
    fn refresh_authorization(&self, cancellable: &Cancellable) -> Result<bool> {
        let mut refreshed = false;
        let mut first_error = None;
        for (index, member) in self.members.iter().enumerate() {
            cancellable.check()?;
            match member.refresh_authorization(cancellable) {
                Ok(done) => refreshed |= done,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(member = index, "Refresh failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        debug!(refreshed, "Refreshed composed authorizer");
        match first_error {
            Some(e) => Err(e),
            None => Ok(refreshed),
        }
    }
}
