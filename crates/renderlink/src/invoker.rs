//! Blocking request/response calls into the renderer.
//!
//! [`RpcInvoker`] is what every proxy method goes through: encode the
//! request, issue one unary call over a [`UnaryTransport`], then decode the
//! response or classify the failure. It never retries and keeps no state
//! besides the default deadline.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CallFailure, RpcError, StatusCode};

/// Name of a remote method, in `Service/method` form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodId(Cow<'static, str>);

impl MethodId {
    /// Validate and wrap a method name.
    pub fn new(name: impl Into<String>) -> Result<Self, RpcError> {
        let name = name.into();
        if !Self::is_valid(&name) {
            return Err(RpcError::validation(format!(
                "malformed method name {name:?}, expected Service/method"
            )));
        }
        Ok(Self(Cow::Owned(name)))
    }

    /// Wrap a method name known at compile time.
    ///
    /// The name is not validated; malformed names are rejected by the
    /// renderer instead.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// The full name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(name: &str) -> bool {
        match name.split_once('/') {
            Some((service, method)) => {
                !service.is_empty() && !method.is_empty() && !method.contains('/')
            }
            None => false,
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-call options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Maximum time to wait for the response.
    pub deadline: Option<Duration>,
}

impl CallOptions {
    /// Options with the given deadline.
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }
}

/// A transport able to perform one blocking unary exchange.
///
/// Implementations block the calling thread until the response arrives, the
/// deadline passes or the connection fails. They must not retry.
pub trait UnaryTransport: Send + Sync {
    /// Send `payload` to `method` and wait for the response payload.
    fn call(
        &self,
        method: &MethodId,
        payload: Vec<u8>,
        deadline: Option<Duration>,
    ) -> Result<Vec<u8>, CallFailure>;
}

/// A request or response body that can cross the wire.
pub trait WireMessage: Sized {
    /// Encode to bytes.
    fn to_wire(&self) -> Vec<u8>;
    /// Decode from bytes.
    fn from_wire(bytes: &[u8]) -> Result<Self, String>;
}

impl WireMessage for Vec<u8> {
    fn to_wire(&self) -> Vec<u8> {
        self.clone()
    }

    fn from_wire(bytes: &[u8]) -> Result<Self, String> {
        Ok(bytes.to_vec())
    }
}

impl WireMessage for () {
    fn to_wire(&self) -> Vec<u8> {
        Vec::new()
    }

    fn from_wire(_bytes: &[u8]) -> Result<Self, String> {
        Ok(())
    }
}

/// Issues unary calls and translates their outcome into [`RpcError`]s.
#[derive(Clone)]
pub struct RpcInvoker {
    transport: Arc<dyn UnaryTransport>,
    default_deadline: Option<Duration>,
}

impl fmt::Debug for RpcInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcInvoker")
            .field("default_deadline", &self.default_deadline)
            .finish_non_exhaustive()
    }
}

impl RpcInvoker {
    /// Create an invoker over `transport`.
    pub fn new(transport: Arc<dyn UnaryTransport>) -> Self {
        Self {
            transport,
            default_deadline: None,
        }
    }

    /// Deadline used when a call does not specify one.
    pub fn with_default_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.default_deadline = deadline;
        self
    }

    /// Issue a raw call.
    pub fn invoke_raw(
        &self,
        method: &MethodId,
        payload: Vec<u8>,
        options: CallOptions,
    ) -> Result<Vec<u8>, RpcError> {
        let deadline = options.deadline.or(self.default_deadline);
        match self.transport.call(method, payload, deadline) {
            Ok(response) => {
                tracing::trace!(%method, bytes = response.len(), "call succeeded");
                Ok(response)
            }
            Err(failure) => {
                let err = RpcError::from(failure);
                tracing::trace!(%method, error = %err, "call failed");
                Err(err)
            }
        }
    }

    /// Issue a typed call.
    ///
    /// A response that cannot be decoded is reported as a transport error:
    /// the renderer accepted the request, so the arguments were not at fault.
    pub fn invoke<Req, Resp>(
        &self,
        method: &MethodId,
        request: &Req,
        options: CallOptions,
    ) -> Result<Resp, RpcError>
    where
        Req: WireMessage,
        Resp: WireMessage,
    {
        let response = self.invoke_raw(method, request.to_wire(), options)?;
        Resp::from_wire(&response).map_err(|e| {
            RpcError::transport(
                StatusCode::DataLoss,
                format!("failed to decode response of {method}: {e}"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    /// Transport answering from a script and recording what it was asked.
    #[derive(Default)]
    struct ScriptedTransport {
        calls: Mutex<Vec<(String, Vec<u8>, Option<Duration>)>>,
        failure: Option<CallFailure>,
    }

    impl UnaryTransport for ScriptedTransport {
        fn call(
            &self,
            method: &MethodId,
            payload: Vec<u8>,
            deadline: Option<Duration>,
        ) -> Result<Vec<u8>, CallFailure> {
            self.calls
                .lock()
                .push((method.to_string(), payload.clone(), deadline));
            match &self.failure {
                Some(failure) => Err(failure.clone()),
                None => Ok(payload.into_iter().rev().collect()),
            }
        }
    }

    #[derive(Debug)]
    struct Utf8(String);

    impl WireMessage for Utf8 {
        fn to_wire(&self) -> Vec<u8> {
            self.0.as_bytes().to_vec()
        }

        fn from_wire(bytes: &[u8]) -> Result<Self, String> {
            String::from_utf8(bytes.to_vec())
                .map(Utf8)
                .map_err(|e| e.to_string())
        }
    }

    const REVERSE: MethodId = MethodId::from_static("Test/reverse");

    #[test]
    fn method_names_are_validated() {
        assert!(MethodId::new("ApiNode/create").is_ok());
        for bad in ["", "ApiNode", "/create", "ApiNode/", "a/b/c"] {
            let err = MethodId::new(bad).unwrap_err();
            assert!(err.is_validation(), "{bad:?}: {err}");
        }
    }

    #[test]
    fn typed_call_round_trips_through_transport() {
        let transport = Arc::new(ScriptedTransport::default());
        let invoker = RpcInvoker::new(transport.clone());

        let resp: Utf8 = invoker
            .invoke(&REVERSE, &Utf8("abc".into()), CallOptions::default())
            .unwrap();
        assert_eq!(resp.0, "cba");

        let calls = transport.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "Test/reverse");
        assert_eq!(calls[0].1, b"abc");
    }

    #[test]
    fn default_deadline_applies_only_without_explicit_one() {
        let transport = Arc::new(ScriptedTransport::default());
        let invoker = RpcInvoker::new(transport.clone())
            .with_default_deadline(Some(Duration::from_secs(2)));

        invoker
            .invoke_raw(&REVERSE, vec![], CallOptions::default())
            .unwrap();
        invoker
            .invoke_raw(
                &REVERSE,
                vec![],
                CallOptions::with_deadline(Duration::from_millis(10)),
            )
            .unwrap();

        let calls = transport.calls.lock();
        assert_eq!(calls[0].2, Some(Duration::from_secs(2)));
        assert_eq!(calls[1].2, Some(Duration::from_millis(10)));
    }

    #[test]
    fn failures_are_classified() {
        let rejected = RpcInvoker::new(Arc::new(ScriptedTransport {
            failure: Some(CallFailure::new(StatusCode::InvalidArgument, "bad pin")),
            ..Default::default()
        }));
        let err = rejected
            .invoke_raw(&REVERSE, vec![1], CallOptions::default())
            .unwrap_err();
        assert!(err.is_validation());

        let dead = RpcInvoker::new(Arc::new(ScriptedTransport {
            failure: Some(CallFailure::new(StatusCode::Unavailable, "connection refused")),
            ..Default::default()
        }));
        let err = dead
            .invoke_raw(&REVERSE, vec![1], CallOptions::default())
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(err.code(), StatusCode::Unavailable);
    }

    #[test]
    fn undecodable_response_is_a_transport_error() {
        let invoker = RpcInvoker::new(Arc::new(ScriptedTransport::default()));
        // Reversing a multi-byte code point yields invalid UTF-8.
        let err = invoker
            .invoke::<_, Utf8>(&REVERSE, &Utf8("é".into()), CallOptions::default())
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(err.code(), StatusCode::DataLoss);
    }
}
