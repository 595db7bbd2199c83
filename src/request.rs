use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use bytes::Bytes;
use http::{HeaderMap, Method, header};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use url::Url;

use crate::cookies::parse_cookie_header;
use crate::error::{Error, ValidationCode};

type BodyFuture = Pin<Box<dyn Future<Output = Result<Bytes, Error>> + Send>>;

enum BodySource {
    Empty,
    Pending(BodyFuture),
    /// The loader ran and failed; the message is replayed on later reads.
    Failed(String),
}

/// Framework-agnostic view of an inbound request.
///
/// `E` is the adapter extension point: a framework adapter can attach any
/// per-request context (client address, tracing span, app state handle) there
/// instead of the engine growing fields for every framework.
pub struct InternalRequest<E = ()> {
    method: Method,
    url: Url,
    headers: HeaderMap,
    cookies: BTreeMap<String, String>,
    body_loader: Mutex<BodySource>,
    body: OnceCell<Bytes>,
    pub ext: E,
}

impl<E> std::fmt::Debug for InternalRequest<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl InternalRequest<()> {
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self::with_extension(method, url, ())
    }
}

impl<E> InternalRequest<E> {
    #[must_use]
    pub fn with_extension(method: Method, url: Url, ext: E) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            cookies: BTreeMap::new(),
            body_loader: Mutex::new(BodySource::Empty),
            body: OnceCell::new(),
            ext,
        }
    }

    /// Sets the headers and derives the cookie mapping from every `Cookie` header.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        let mut cookies = BTreeMap::new();
        for value in headers.get_all(header::COOKIE) {
            if let Ok(raw) = value.to_str() {
                for (name, value) in parse_cookie_header(raw) {
                    cookies.entry(name).or_insert(value);
                }
            }
        }
        self.cookies = cookies;
        self.headers = headers;
        self
    }

    /// Adds a single cookie, e.g. when an adapter has already parsed the jar.
    #[must_use]
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// Body that is already in memory.
    #[must_use]
    pub fn with_body(self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.with_body_loader(async move { Ok(body) })
    }

    /// Body read on first access to [`body`](Self::body); never read if unused.
    #[must_use]
    pub fn with_body_loader<F>(mut self, loader: F) -> Self
    where
        F: Future<Output = Result<Bytes, Error>> + Send + 'static,
    {
        self.body_loader = Mutex::new(BodySource::Pending(Box::pin(loader)));
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    #[must_use]
    pub fn query(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
    }

    /// First hop of `X-Forwarded-For`, falling back to `X-Real-IP`.
    #[must_use]
    pub fn client_ip(&self) -> Option<&str> {
        self.headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| {
                self.headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
            })
    }

    /// Reads the body once; later calls return the cached bytes.
    ///
    /// # Errors
    ///
    /// Propagates the error of the adapter-supplied body loader. The loader is
    /// not retried: later calls fail with [`ValidationCode::MalformedBody`]
    /// carrying the original message.
    pub async fn body(&self) -> Result<&Bytes, Error> {
        self.body
            .get_or_try_init(|| async {
                let source = std::mem::replace(&mut *self.lock_loader(), BodySource::Empty);
                match source {
                    BodySource::Empty => Ok(Bytes::new()),
                    BodySource::Failed(message) => {
                        let err = Error::validation(ValidationCode::MalformedBody, message.clone());
                        *self.lock_loader() = BodySource::Failed(message);
                        Err(err)
                    }
                    BodySource::Pending(loader) => loader.await.inspect_err(|e| {
                        *self.lock_loader() = BodySource::Failed(e.to_string());
                    }),
                }
            })
            .await
    }

    fn lock_loader(&self) -> std::sync::MutexGuard<'_, BodySource> {
        self.body_loader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Parses the body as a JSON object or an urlencoded form, by `Content-Type`.
    /// Form fields become string values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the body is not a JSON object or valid UTF-8 form.
    pub async fn form_or_json(&self) -> Result<Map<String, Value>, Error> {
        let is_json = self
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        let body = self.body().await?;

        if is_json {
            return match serde_json::from_slice::<Value>(body) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(Error::validation(
                    ValidationCode::MalformedBody,
                    "JSON body must be an object",
                )),
                Err(e) => Err(Error::validation(ValidationCode::MalformedBody, e.to_string())),
            };
        }

        Ok(url::form_urlencoded::parse(body)
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect())
    }
}
