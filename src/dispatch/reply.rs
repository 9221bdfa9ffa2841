//! Response serialization.
//!
//! A handler result of any supported shape becomes exactly one HTTP
//! response. The shapes form a closed set, so the conversion below is an
//! exhaustive match: there is no "unrecognized result" branch that could
//! leave a response open.
//!
//! | body      | wire bytes                         | default content type        |
//! |-----------|------------------------------------|-----------------------------|
//! | `Text`    | verbatim                           | `text/plain; charset=utf-8` |
//! | `Binary`  | raw                                | `application/octet-stream`  |
//! | `Stream`  | piped until the stream ends        | none                        |
//! | `Json`    | pretty-printed, 4-space indent     | `application/json`          |
//! | `Boolean` | `true` / `false`                   | `text/plain; charset=utf-8` |
//! | `Empty`   | nothing                            | none                        |

use std::fmt;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use axum::BoxError;
use bytes::Bytes;
use futures_util::TryStream;
use serde::Serialize;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";
const APPLICATION_JSON: &str = "application/json";

/// Payload of a reply.
pub enum ReplyBody {
    Empty,
    Text(String),
    Binary(Bytes),
    Stream(Body),
    Json(serde_json::Value),
    Boolean(bool),
}

impl fmt::Debug for ReplyBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyBody::Empty => f.write_str("Empty"),
            ReplyBody::Text(s) => f.debug_tuple("Text").field(s).finish(),
            ReplyBody::Binary(b) => f.debug_tuple("Binary").field(&b.len()).finish(),
            ReplyBody::Stream(_) => f.write_str("Stream"),
            ReplyBody::Json(v) => f.debug_tuple("Json").field(v).finish(),
            ReplyBody::Boolean(b) => f.debug_tuple("Boolean").field(b).finish(),
        }
    }
}

/// A complete response description.
#[derive(Debug)]
pub struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: ReplyBody,
}

impl Reply {
    pub fn new(body: ReplyBody) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body,
        }
    }

    pub fn empty() -> Self {
        Self::new(ReplyBody::Empty)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(ReplyBody::Text(text.into()))
    }

    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(ReplyBody::Binary(bytes.into()))
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(ReplyBody::Boolean(value))
    }

    /// Serialize any record as a JSON reply.
    pub fn json<T>(value: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize + ?Sized,
    {
        Ok(Self::new(ReplyBody::Json(serde_json::to_value(value)?)))
    }

    /// Pipe a stream of chunks to the client.
    pub fn stream<S>(stream: S) -> Self
    where
        S: TryStream + Send + 'static,
        S::Ok: Into<Bytes>,
        S::Error: Into<BoxError>,
    {
        Self::new(ReplyBody::Stream(Body::from_stream(stream)))
    }

    /// A plain-text reply with a status, as used for failure reasons.
    pub fn failure(status: StatusCode, reason: impl Into<String>) -> Self {
        Self::text(reason).with_status(status)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &ReplyBody {
        &self.body
    }

    /// Finalize into an HTTP response.
    pub fn into_response(self) -> Response {
        let (content_type, body) = match self.body {
            ReplyBody::Empty => (None, Body::empty()),
            ReplyBody::Text(text) => (Some(TEXT_PLAIN), Body::from(text)),
            ReplyBody::Binary(bytes) => (Some(OCTET_STREAM), Body::from(bytes)),
            ReplyBody::Stream(body) => (None, body),
            ReplyBody::Json(value) => match to_pretty_json(&value) {
                Ok(bytes) => (Some(APPLICATION_JSON), Body::from(bytes)),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize JSON reply");
                    return Reply::failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                        .into_response();
                }
            },
            ReplyBody::Boolean(value) => {
                (Some(TEXT_PLAIN), Body::from(if value { "true" } else { "false" }))
            }
        };

        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        if let Some(content_type) = content_type {
            response
                .headers_mut()
                .entry(header::CONTENT_TYPE)
                .or_insert(HeaderValue::from_static(content_type));
        }
        response
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            status: parts.status,
            headers: parts.headers,
            body: ReplyBody::Stream(body),
        }
    }
}

/// JSON with four-space indentation.
fn to_pretty_json(value: &serde_json::Value) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    Ok(buf)
}

/// Conversion of handler results into a [`Reply`].
pub trait IntoReply {
    fn into_reply(self) -> Reply;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Reply {
        self
    }
}

impl IntoReply for String {
    fn into_reply(self) -> Reply {
        Reply::text(self)
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Reply {
        Reply::text(self)
    }
}

impl IntoReply for Bytes {
    fn into_reply(self) -> Reply {
        Reply::bytes(self)
    }
}

impl IntoReply for Vec<u8> {
    fn into_reply(self) -> Reply {
        Reply::bytes(self)
    }
}

impl IntoReply for bool {
    fn into_reply(self) -> Reply {
        Reply::boolean(self)
    }
}

impl IntoReply for serde_json::Value {
    fn into_reply(self) -> Reply {
        Reply::new(ReplyBody::Json(self))
    }
}

impl IntoReply for Response {
    fn into_reply(self) -> Reply {
        Reply::from(self)
    }
}

impl<T: IntoReply> IntoReply for (StatusCode, T) {
    fn into_reply(self) -> Reply {
        self.1.into_reply().with_status(self.0)
    }
}
