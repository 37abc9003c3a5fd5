use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::RfcError;

/// A single message of the call protocol: either a request for the peer to
/// run a function, or the answer to a request received earlier.
///
/// The two variants are told apart on the wire by the presence of the
/// `listener` field; there is no explicit tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Invoke {
    Request(InvokeRequest),
    Response(InvokeResponse),
}

impl Invoke {
    /// The call identifier correlating a response with its request.
    pub fn uid(&self) -> u64 {
        match self {
            Invoke::Request(request) => request.uid,
            Invoke::Response(response) => response.uid,
        }
    }
}

/// Asks the peer to call `listener` on its provider with the given
/// positional parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub uid: u64,
    /// Dotted path of the target function inside the remote provider.
    pub listener: String,
    pub parameters: Vec<Value>,
}

/// Settles the call identified by `uid`. `value` holds the return value on
/// success, or a plain-data error description ([`RemoteError`]) on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub uid: u64,
    pub success: bool,
    pub value: Value,
}

impl InvokeResponse {
    pub fn success(uid: u64, value: Value) -> Self {
        Self {
            uid,
            success: true,
            value,
        }
    }

    pub fn failure(uid: u64, error: RemoteError) -> Self {
        Self {
            uid,
            success: false,
            value: error.into(),
        }
    }
}

/// Error identity that survives serialization: a `name`, a `message`, and
/// whatever extra data fields the origin chose to attach.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteError {
    pub name: String,
    pub message: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl RemoteError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            data: Map::new(),
        }
    }

    /// Attach an extra data field carried alongside `name` and `message`.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Interpret a response `value` as an error description. Values that do
    /// not carry the `name`/`message` shape are wrapped as-is so the caller
    /// still sees what the peer sent.
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<RemoteError>(value.clone()) {
            Ok(error) => error,
            Err(_) => match value {
                Value::String(message) => RemoteError::new("Error", message),
                other => RemoteError::new("Error", other.to_string()),
            },
        }
    }
}

impl From<RemoteError> for Value {
    fn from(error: RemoteError) -> Value {
        let mut fields = error.data;
        // name and message are copied explicitly so they survive even when a
        // data field collides with them.
        fields.insert("name".to_owned(), Value::String(error.name));
        fields.insert("message".to_owned(), Value::String(error.message));
        Value::Object(fields)
    }
}

// Routed through the same conversion as the wire frames, so explicit
// `name`/`message` win over colliding data fields everywhere.
impl Serialize for RemoteError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        Value::from(self.clone()).serialize(serializer)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl Error for RemoteError {}

/// Issues call identifiers. Process-wide so that frames from concurrent
/// communicators never share a uid in captured traffic.
static UID_SEQUENCE: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_uid() -> u64 {
    UID_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Conversion of call-site arguments into the positional parameter sequence
/// of a request frame. Implemented for tuples of serializable values, for
/// `()` (no arguments), and for an already-built `Vec<Value>`.
pub trait IntoParameters {
    fn into_parameters(self) -> Result<Vec<Value>, RfcError>;
}

impl IntoParameters for Vec<Value> {
    fn into_parameters(self) -> Result<Vec<Value>, RfcError> {
        Ok(self)
    }
}

impl IntoParameters for () {
    fn into_parameters(self) -> Result<Vec<Value>, RfcError> {
        Ok(Vec::new())
    }
}

macro_rules! impl_into_parameters {
    ($($arg:ident),+) => {
        impl<$($arg: Serialize),+> IntoParameters for ($($arg,)+) {
            fn into_parameters(self) -> Result<Vec<Value>, RfcError> {
                #[allow(non_snake_case)]
                let ($($arg,)+) = self;
                Ok(vec![$(
                    serde_json::to_value($arg).map_err(|e| RfcError::Codec(e.to_string()))?,
                )+])
            }
        }
    };
}

impl_into_parameters!(A);
impl_into_parameters!(A, B);
impl_into_parameters!(A, B, C);
impl_into_parameters!(A, B, C, D);
impl_into_parameters!(A, B, C, D, E);
impl_into_parameters!(A, B, C, D, E, F);
impl_into_parameters!(A, B, C, D, E, F, G);
impl_into_parameters!(A, B, C, D, E, F, G, H);
