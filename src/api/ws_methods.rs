use futures::FutureExt;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use thiserror::Error;

use crate::handlers::{self, Followup, HandlerContext};

// ---------------------------------------------------------------------------
// Envelope types
// ---------------------------------------------------------------------------

/// Incoming control channel request (JSON-RPC-ish).
///
/// Every field is optional. A request without `method` is answered as an
/// unsupported method; `params` that are not an object read as empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    pub method: Option<String>,
    pub params: Map<String, Value>,
    /// Echoed back verbatim. `None` covers both an absent and a `null` id.
    pub id: Option<Value>,
}

/// Why an inbound message could not be turned into a [`Request`].
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

impl Request {
    /// Parse a raw message payload.
    pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_slice(payload)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ParseError> {
        let mut object = match value {
            Value::Object(object) => object,
            other => return Err(ParseError::NotAnObject(json_kind(&other))),
        };
        let method = match object.remove("method") {
            Some(Value::String(method)) => Some(method),
            _ => None,
        };
        let params = match object.remove("params") {
            Some(Value::Object(params)) => params,
            _ => Map::new(),
        };
        let id = object.remove("id").filter(|id| !id.is_null());
        Ok(Self { method, params, id })
    }

    /// A string parameter. Numbers are accepted and rendered as text.
    pub fn param_str(&self, key: &str) -> Option<String> {
        match self.params.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// What a response carries.
///
/// `Info` and `Failure` share the `error` wire shape; only the code tells a
/// client which one it got (`0` conventionally means success). The split is
/// kept internally so logs can tell them apart.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Info { code: i32, message: String },
    Failure { code: i32, message: String },
    Result(Option<Map<String, Value>>),
}

/// Outgoing control channel response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: Option<Value>,
    pub outcome: Outcome,
}

impl Response {
    pub fn info(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Info {
                code,
                message: message.into(),
            },
        }
    }

    pub fn failure(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Failure {
                code,
                message: message.into(),
            },
        }
    }

    pub fn result(id: Option<Value>, result: Option<Map<String, Value>>) -> Self {
        Self {
            id,
            outcome: Outcome::Result(result),
        }
    }

    /// True for a result envelope.
    pub fn is_result(&self) -> bool {
        matches!(self.outcome, Outcome::Result(_))
    }

    /// The status code of an `Info` or `Failure` envelope.
    pub fn code(&self) -> Option<i32> {
        match self.outcome {
            Outcome::Info { code, .. } | Outcome::Failure { code, .. } => Some(code),
            Outcome::Result(_) => None,
        }
    }
}

/// Error payload of a status envelope.
#[derive(serde::Serialize)]
struct StatusBody<'a> {
    code: i32,
    message: &'a str,
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match &self.outcome {
            Outcome::Info { code, message } | Outcome::Failure { code, message } => {
                map.serialize_entry("error", &StatusBody { code: *code, message })?;
            }
            Outcome::Result(result) => map.serialize_entry("result", result)?,
        }
        map.serialize_entry("id", &self.id)?;
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Method registry
// ---------------------------------------------------------------------------

/// The methods the control channel understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    CheckSystemStatus,
    RestartSystem,
    ShutdownSystem,
    CheckSoftwareVersions,
    InstallSoftware,
    CheckWifiApStatus,
    SetupWifiAp,
    CheckWifiStaStatus,
    SetupWifiSta,
}

impl Method {
    pub const ALL: [Method; 9] = [
        Method::CheckSystemStatus,
        Method::RestartSystem,
        Method::ShutdownSystem,
        Method::CheckSoftwareVersions,
        Method::InstallSoftware,
        Method::CheckWifiApStatus,
        Method::SetupWifiAp,
        Method::CheckWifiStaStatus,
        Method::SetupWifiSta,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Method::CheckSystemStatus => "check_system_status",
            Method::RestartSystem => "restart_system",
            Method::ShutdownSystem => "shutdown_system",
            Method::CheckSoftwareVersions => "check_software_versions",
            Method::InstallSoftware => "install_software",
            Method::CheckWifiApStatus => "check_wifi_ap_status",
            Method::SetupWifiAp => "setup_wifi_ap",
            Method::CheckWifiStaStatus => "check_wifi_sta_status",
            Method::SetupWifiSta => "setup_wifi_sta",
        }
    }

    /// Exact, case-sensitive lookup.
    pub fn from_name(name: &str) -> Option<Method> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }
}

// ---------------------------------------------------------------------------
// Response sink
// ---------------------------------------------------------------------------

/// Failure to deliver a response.
#[derive(Debug, Error)]
pub enum SendError {
    /// The channel is gone; nothing more can be sent on it.
    #[error("channel closed")]
    Closed,
    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Where a session's responses go.
pub trait Responder: Send {
    fn send(&mut self, response: Response) -> impl Future<Output = Result<(), SendError>> + Send;
}

/// Collects responses in memory.
impl Responder for Vec<Response> {
    async fn send(&mut self, response: Response) -> Result<(), SendError> {
        self.push(response);
        Ok(())
    }
}

/// Sends responses for one request id.
pub struct Reply<'a, R> {
    id: Option<Value>,
    sink: &'a mut R,
}

impl<'a, R: Responder> Reply<'a, R> {
    pub fn new(id: Option<Value>, sink: &'a mut R) -> Self {
        Self { id, sink }
    }

    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    /// Informational status (success or notice).
    pub async fn info(&mut self, code: i32, message: impl Into<String>) -> Result<(), SendError> {
        let message = message.into();
        tracing::info!(id = ?self.id, code, %message, "send status");
        self.sink
            .send(Response::info(self.id.clone(), code, message))
            .await
    }

    /// Failure status.
    pub async fn failure(&mut self, code: i32, message: impl Into<String>) -> Result<(), SendError> {
        let message = message.into();
        tracing::warn!(id = ?self.id, code, %message, "send failure status");
        self.sink
            .send(Response::failure(self.id.clone(), code, message))
            .await
    }

    /// Structured result.
    pub async fn result(&mut self, result: Map<String, Value>) -> Result<(), SendError> {
        tracing::info!(id = ?self.id, ?result, "send result");
        self.sink
            .send(Response::result(self.id.clone(), Some(result)))
            .await
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Dispatch a request to its handler, running any follow-on method with the
/// same id.
///
/// Handler failures are reported to the client as status envelopes. Only a
/// send failure is returned, and after [`SendError::Closed`] nothing more can
/// be delivered on this channel.
pub async fn dispatch<R: Responder>(
    ctx: &HandlerContext,
    request: &Request,
    sink: &mut R,
) -> Result<(), SendError> {
    let mut reply = Reply::new(request.id.clone(), sink);

    let Some(mut method) = request.method.as_deref().and_then(Method::from_name) else {
        tracing::warn!(method = ?request.method, "unsupported method");
        return reply.failure(-1, "Unsupported method").await;
    };

    loop {
        tracing::debug!(method = method.name(), id = ?request.id, params = ?request.params, "dispatch");
        let run = handlers::call(method, ctx, request, &mut reply);
        let followup = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(result) => result?,
            Err(panic) => {
                let detail = panic_message(&panic);
                tracing::error!(method = method.name(), %detail, "handler panicked");
                return reply.failure(-1, "Internal error").await;
            }
        };
        match followup {
            Followup::Done => return Ok(()),
            Followup::Then(next) => {
                tracing::info!(from = method.name(), to = next.name(), "chaining method");
                method = next;
            }
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
