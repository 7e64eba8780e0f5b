//! Call classification
//!
//! Derives the `(grpc_type, grpc_service, grpc_method)` label tuple from a
//! full method name and the method's declared streaming shape. Everything
//! here is pure; nothing is cached.

use std::borrow::Cow;
use std::fmt;

use tonic::Code;

/// Shape of a call, fixed by the method definition rather than by runtime behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    /// One request, one response
    Unary,
    /// Many requests, one response
    ClientStream,
    /// One request, many responses
    ServerStream,
    /// Many requests, many responses
    BidiStream,
}

impl CallType {
    /// Classify from request and response cardinality
    pub fn from_streaming(client_streaming: bool, server_streaming: bool) -> Self {
        match (client_streaming, server_streaming) {
            (false, false) => CallType::Unary,
            (true, false) => CallType::ClientStream,
            (false, true) => CallType::ServerStream,
            (true, true) => CallType::BidiStream,
        }
    }

    /// Label value used for `grpc_type`
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Unary => "unary",
            CallType::ClientStream => "client_stream",
            CallType::ServerStream => "server_stream",
            CallType::BidiStream => "bidi_stream",
        }
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of a generated client method
///
/// Tonic codegen knows every method's path and streaming shape at compile
/// time, so descriptors are usually declared as constants next to the client:
///
/// ```rust
/// use grpc_client_metrics::{CallType, MethodDescriptor};
///
/// const LIST_FEED: MethodDescriptor =
///     MethodDescriptor::server_streaming("/nova.feed.v1.FeedService/ListFeed");
///
/// assert_eq!(LIST_FEED.call_type(), CallType::ServerStream);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub full_method: &'static str,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

impl MethodDescriptor {
    pub const fn new(
        full_method: &'static str,
        client_streaming: bool,
        server_streaming: bool,
    ) -> Self {
        Self {
            full_method,
            client_streaming,
            server_streaming,
        }
    }

    pub const fn unary(full_method: &'static str) -> Self {
        Self::new(full_method, false, false)
    }

    pub const fn client_streaming(full_method: &'static str) -> Self {
        Self::new(full_method, true, false)
    }

    pub const fn server_streaming(full_method: &'static str) -> Self {
        Self::new(full_method, false, true)
    }

    pub const fn bidi_streaming(full_method: &'static str) -> Self {
        Self::new(full_method, true, true)
    }

    pub fn call_type(&self) -> CallType {
        CallType::from_streaming(self.client_streaming, self.server_streaming)
    }

    /// Labels for this method, borrowing the static path (no allocation)
    pub fn labels(&self) -> CallLabels {
        let (service, method) = split_method_name(self.full_method);
        CallLabels {
            call_type: self.call_type(),
            service: Cow::Borrowed(service),
            method: Cow::Borrowed(method),
        }
    }
}

/// Label tuple shared by every metric a call touches
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallLabels {
    pub call_type: CallType,
    pub service: Cow<'static, str>,
    pub method: Cow<'static, str>,
}

impl CallLabels {
    /// Classify a call from a runtime method path such as `/pkg.Service/Method`
    ///
    /// A path without a service/method delimiter yields empty service and
    /// method values instead of an error, so a call is never blocked by its
    /// instrumentation.
    pub fn new(full_method: &str, client_streaming: bool, server_streaming: bool) -> Self {
        let (service, method) = split_method_name(full_method);
        Self {
            call_type: CallType::from_streaming(client_streaming, server_streaming),
            service: Cow::Owned(service.to_owned()),
            method: Cow::Owned(method.to_owned()),
        }
    }

    /// Values in `grpc_type, grpc_service, grpc_method` order
    pub fn values(&self) -> [&str; 3] {
        [self.call_type.as_str(), &*self.service, &*self.method]
    }
}

/// Split `/pkg.Service/Method` into `("pkg.Service", "Method")`
///
/// One leading slash is stripped and the split happens on the first
/// remaining slash. Without a delimiter both parts are empty.
pub fn split_method_name(full_method: &str) -> (&str, &str) {
    let trimmed = full_method.strip_prefix('/').unwrap_or(full_method);
    match trimmed.split_once('/') {
        Some((service, method)) => (service, method),
        None => {
            tracing::debug!(
                full_method = %full_method,
                "gRPC method name has no service delimiter, using empty labels"
            );
            ("", "")
        }
    }
}

/// Canonical gRPC name of a status code, used for `grpc_code`
pub fn code_label(code: Code) -> &'static str {
    match code {
        Code::Ok => "OK",
        Code::Cancelled => "Canceled",
        Code::Unknown => "Unknown",
        Code::InvalidArgument => "InvalidArgument",
        Code::DeadlineExceeded => "DeadlineExceeded",
        Code::NotFound => "NotFound",
        Code::AlreadyExists => "AlreadyExists",
        Code::PermissionDenied => "PermissionDenied",
        Code::ResourceExhausted => "ResourceExhausted",
        Code::FailedPrecondition => "FailedPrecondition",
        Code::Aborted => "Aborted",
        Code::OutOfRange => "OutOfRange",
        Code::Unimplemented => "Unimplemented",
        Code::Internal => "Internal",
        Code::Unavailable => "Unavailable",
        Code::DataLoss => "DataLoss",
        Code::Unauthenticated => "Unauthenticated",
    }
}
