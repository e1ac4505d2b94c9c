use crate::error::{ClientError, Result};
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use serde::Serialize;

/// One logical request handed to [`Transport::send`](super::Transport::send)
#[derive(Debug)]
pub struct OutboundRequest {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: RequestBody,
}

impl OutboundRequest {
    /// Create a request for `path`, relative to the transport's base URL
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: RequestBody::empty(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize `value` once; the encoded bytes are replayed on retries
    pub fn with_json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        let encoded = serde_json::to_vec(value)?;
        Ok(self.with_body(Bytes::from(encoded)))
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub(crate) fn body_mut(&mut self) -> &mut RequestBody {
        &mut self.body
    }
}

/// Request payload with a regeneration capability.
///
/// Buffered bodies can be produced any number of times. A one-shot stream
/// can be produced once; asking for it again is a [`ClientError::BodyReplay`].
#[derive(Debug, Default)]
pub struct RequestBody {
    kind: BodyKind,
}

#[derive(Debug, Default)]
enum BodyKind {
    #[default]
    Empty,
    Buffered(Bytes),
    OneShot(Option<reqwest::Body>),
}

impl RequestBody {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn buffered(bytes: impl Into<Bytes>) -> Self {
        Self {
            kind: BodyKind::Buffered(bytes.into()),
        }
    }

    /// Body that can only be sent once (e.g. a stream of unknown length)
    pub fn one_shot(body: impl Into<reqwest::Body>) -> Self {
        Self {
            kind: BodyKind::OneShot(Some(body.into())),
        }
    }

    /// Whether the body can be sent again after the first attempt
    pub fn is_replayable(&self) -> bool {
        !matches!(self.kind, BodyKind::OneShot(_))
    }

    /// Buffered bytes, if this body has them
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.kind {
            BodyKind::Buffered(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Produce the payload for the next attempt
    pub fn regenerate(&mut self) -> Result<Option<reqwest::Body>> {
        match &mut self.kind {
            BodyKind::Empty => Ok(None),
            BodyKind::Buffered(bytes) => Ok(Some(reqwest::Body::from(bytes.clone()))),
            BodyKind::OneShot(slot) => slot.take().map(Some).ok_or_else(|| {
                ClientError::BodyReplay(
                    "request body is a one-shot stream and was already sent".to_string(),
                )
            }),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::buffered(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::buffered(bytes)
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self::buffered(text)
    }
}

impl From<&'static str> for RequestBody {
    fn from(text: &'static str) -> Self {
        Self::buffered(text)
    }
}
