//! Gridlink transport adapter
//!
//! A poll-driven request/response primitive for talking to scheduling
//! servers. Callers start a request, then repeatedly poll its handle without
//! blocking until it completes; an in-flight request can be abandoned at any
//! time without leaking the underlying connection.
//!
//! # Example
//!
//! ```no_run
//! use gridlink_client::{HttpRequest, HttpTransport, Transport, TransportPoll};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = HttpTransport::new(tokio::runtime::Handle::current());
//!     let handle = transport.start(HttpRequest::get("http://example.org/"))?;
//!
//!     loop {
//!         match transport.poll(handle) {
//!             TransportPoll::Pending(phase) => println!("still {phase}"),
//!             TransportPoll::Done(body) => {
//!                 println!("got {} bytes", body?.len());
//!                 break;
//!             }
//!         }
//!         tokio::time::sleep(std::time::Duration::from_millis(100)).await;
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod http;

pub use error::{Result, TransportError};
pub use http::HttpTransport;

/// Identifies one request started on a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle(pub u64);

impl std::fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A request to issue
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Vec<u8>>,
    pub content_type: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
            content_type: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Some(body),
            content_type: Some(content_type.into()),
        }
    }
}

/// Where an in-flight request currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Sending,
    Receiving,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Connecting,
            1 => Phase::Sending,
            _ => Phase::Receiving,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Connecting => write!(f, "connecting"),
            Phase::Sending => write!(f, "sending"),
            Phase::Receiving => write!(f, "receiving"),
        }
    }
}

/// Result of polling a request
#[derive(Debug, Clone, PartialEq)]
pub enum TransportPoll {
    /// Still running
    Pending(Phase),
    /// Finished; the handle is no longer valid after this is returned
    Done(Result<Vec<u8>>),
}

/// Asynchronous, non-blocking request primitive
///
/// Implementations enforce their own deadline and report it as
/// [`TransportError::Timeout`].
pub trait Transport: Send + Sync {
    /// Begins a request and returns immediately
    fn start(&self, request: HttpRequest) -> Result<RequestHandle>;

    /// Checks on a request without blocking
    ///
    /// Returns `Done` exactly once per handle; later polls report
    /// [`TransportError::UnknownRequest`].
    fn poll(&self, handle: RequestHandle) -> TransportPoll;

    /// Cancels a request and releases its resources
    ///
    /// Abandoning an unknown or already finished handle is a no-op.
    fn abandon(&self, handle: RequestHandle);
}
