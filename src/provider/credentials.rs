use std::sync::Arc;

use http::Method;

use crate::error::Error;
use crate::request::InternalRequest;
use crate::response::InternalResponse;
use crate::traits::{CredentialsAuthorizer, CredentialsAuthorizerDyn, CredentialsInput};
use crate::types::ProviderId;

/// First-party login (username/password, one-time code, ...).
///
/// Login and callback are the same operation: the submitted body is handed to
/// the caller's [`CredentialsAuthorizer`] and its response is returned as is.
pub struct CredentialsProvider<U> {
    id: ProviderId,
    methods: Vec<Method>,
    authorizer: Arc<dyn CredentialsAuthorizerDyn<U>>,
}

impl<U: Send + 'static> CredentialsProvider<U> {
    /// Provider with id `credentials`, accepting `POST` only.
    pub fn new(authorizer: impl CredentialsAuthorizer<U>) -> Self {
        Self {
            id: ProviderId::parse("credentials").expect("valid provider id"),
            methods: vec![Method::POST],
            authorizer: Arc::new(authorizer),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: ProviderId) -> Self {
        self.id = id;
        self
    }

    /// Accepted HTTP methods (default: `POST`).
    #[must_use]
    pub fn with_methods(mut self, methods: Vec<Method>) -> Self {
        self.methods = methods;
        self
    }

    #[must_use]
    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    #[must_use]
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub(crate) async fn login<E: Sync>(&self, req: &InternalRequest<E>) -> InternalResponse<U> {
        let fields = match req.form_or_json().await {
            Ok(fields) => fields,
            Err(e) => {
                tracing::warn!(error = %e, provider = %self.id, "Unreadable credentials body");
                return InternalResponse::from_error(e);
            }
        };

        let input = CredentialsInput {
            fields,
            user_agent: req.user_agent().map(str::to_owned),
            client_ip: req.client_ip().map(str::to_owned),
        };

        match self.authorizer.authorize_dyn(input).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, provider = %self.id, "Credentials authorization failed");
                InternalResponse::from_error(Error::callback("authorize", e))
            }
        }
    }
}
