//! Authorizers for GData services: OAuth 2.0 and composition

pub mod composed;
pub mod credentials;
pub mod oauth2;

pub use composed::ComposedAuthorizer;
pub use credentials::OAuthCredentials;
pub use oauth2::{
    OAuth2Authorizer, OAuth2AuthorizerBuilder, OOB_AUTO_REDIRECT_URI, OOB_REDIRECT_URI,
};
