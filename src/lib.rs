#![doc = include_str!("../README.md")]

pub mod config;
pub mod cookies;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod pkce;
pub mod provider;
pub mod request;
pub mod response;
pub mod session;
pub mod token;
pub mod traits;
pub mod types;

// Re-exports for convenient access
pub use config::EngineConfig;
pub use cookies::{Cookie, CookieOptions, SameSite};
pub use engine::{AuthEngine, Outcome};
pub use error::{BoxError, Error, ErrorKind, UpstreamOperation, ValidationCode};
pub use middleware::{FrameworkAdapter, RenderPlan};
pub use pkce::{generate_code_challenge, generate_code_verifier, generate_state};
pub use provider::{
    AuthorizationRequest, CredentialsProvider, OAuthConfig, OAuthOverrides, OAuthProfile,
    OAuthProvider, Provider, TokenResponse,
};
pub use request::InternalRequest;
pub use response::InternalResponse;
pub use session::{
    IssuedSession, RefreshedTokens, SessionManager, SessionPair, SessionSettings, SessionState,
};
pub use token::TokenCodec;
pub use traits::{CredentialsAuthorizer, CredentialsInput, ProfileMapper, SessionHandler};
pub use types::ProviderId;
