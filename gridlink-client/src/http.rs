//! reqwest-backed transport
//!
//! Each request runs as a tokio task on the supplied runtime. The task writes
//! its progress into a shared phase cell and delivers the outcome over a
//! oneshot channel, which `poll` checks with `try_recv`.

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::{HttpRequest, Method, Phase, RequestHandle, Transport, TransportPoll};

struct InFlight {
    task: JoinHandle<()>,
    phase: Arc<AtomicU8>,
    outcome: oneshot::Receiver<Result<Vec<u8>>>,
}

/// HTTP transport driving reqwest futures on a tokio runtime
pub struct HttpTransport {
    client: Client,
    runtime: Handle,
    next_id: AtomicU64,
    in_flight: Mutex<HashMap<RequestHandle, InFlight>>,
}

impl HttpTransport {
    /// Create a transport with a default reqwest client
    pub fn new(runtime: Handle) -> Self {
        Self::with_client(runtime, Client::new())
    }

    /// Create a transport whose requests fail with `Timeout` after `timeout`
    pub fn with_timeout(runtime: Handle, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("gridlink/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(runtime, client))
    }

    /// Create a transport with a custom reqwest client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(runtime: Handle, client: Client) -> Self {
        Self {
            client,
            runtime,
            next_id: AtomicU64::new(1),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Number of requests started and not yet finished or abandoned
    pub fn in_flight(&self) -> usize {
        self.requests().len()
    }

    fn requests(&self) -> MutexGuard<'_, HashMap<RequestHandle, InFlight>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn execute(client: Client, request: HttpRequest, phase: Arc<AtomicU8>) -> Result<Vec<u8>> {
        let mut builder = match request.method {
            Method::Get => client.get(&request.url),
            Method::Post => client.post(&request.url),
        };
        if let Some(content_type) = request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        phase.store(Phase::Sending as u8, Ordering::Release);
        let response = builder.send().await?;
        phase.store(Phase::Receiving as u8, Ordering::Release);

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TransportError::status(status.as_u16(), error_text));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

impl Transport for HttpTransport {
    fn start(&self, request: HttpRequest) -> Result<RequestHandle> {
        let url = reqwest::Url::parse(&request.url).map_err(|e| TransportError::InvalidUrl {
            url: request.url.clone(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(TransportError::InvalidUrl {
                url: request.url,
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        let handle = RequestHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let phase = Arc::new(AtomicU8::new(Phase::Connecting as u8));
        let (tx, rx) = oneshot::channel();

        debug!("Starting request {} to {}", handle, request.url);

        let client = self.client.clone();
        let task_phase = Arc::clone(&phase);
        let task = self.runtime.spawn(async move {
            let outcome = Self::execute(client, request, task_phase).await;
            // Receiver is gone when the request was abandoned
            let _ = tx.send(outcome);
        });

        self.requests().insert(
            handle,
            InFlight {
                task,
                phase,
                outcome: rx,
            },
        );

        Ok(handle)
    }

    fn poll(&self, handle: RequestHandle) -> TransportPoll {
        let mut requests = self.requests();

        let Some(entry) = requests.get_mut(&handle) else {
            return TransportPoll::Done(Err(TransportError::UnknownRequest(handle.0)));
        };

        match entry.outcome.try_recv() {
            Ok(outcome) => {
                requests.remove(&handle);
                TransportPoll::Done(outcome)
            }
            Err(TryRecvError::Empty) => {
                TransportPoll::Pending(Phase::from_u8(entry.phase.load(Ordering::Acquire)))
            }
            Err(TryRecvError::Closed) => {
                requests.remove(&handle);
                TransportPoll::Done(Err(TransportError::Aborted))
            }
        }
    }

    fn abandon(&self, handle: RequestHandle) {
        if let Some(entry) = self.requests().remove(&handle) {
            debug!("Abandoning request {}", handle);
            entry.task.abort();
        }
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        for (_, entry) in self.requests().drain() {
            entry.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response and returns the URL to reach it
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut read = Vec::new();
            while !read.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                read.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{}/master", addr)
    }

    async fn wait_for(transport: &HttpTransport, handle: RequestHandle) -> Result<Vec<u8>> {
        for _ in 0..500 {
            if let TransportPoll::Done(outcome) = transport.poll(handle) {
                return outcome;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("request {} never finished", handle);
    }

    #[test]
    fn test_rejects_invalid_url() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let transport = HttpTransport::new(runtime.handle().clone());

        let err = transport.start(HttpRequest::get("not a url")).unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl { .. }));

        let err = transport
            .start(HttpRequest::get("ftp://example.org/file"))
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl { .. }));
        assert_eq!(transport.in_flight(), 0);
    }

    #[test]
    fn test_unknown_handle() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let transport = HttpTransport::new(runtime.handle().clone());

        assert_eq!(
            transport.poll(RequestHandle(42)),
            TransportPoll::Done(Err(TransportError::UnknownRequest(42)))
        );
        transport.abandon(RequestHandle(42));
    }

    #[tokio::test]
    async fn test_successful_get() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        let transport = HttpTransport::new(Handle::current());

        let handle = transport.start(HttpRequest::get(url)).unwrap();
        let body = wait_for(&transport, handle).await.unwrap();

        assert_eq!(body, b"hello");
        assert_eq!(transport.in_flight(), 0);
        assert!(matches!(
            transport.poll(handle),
            TransportPoll::Done(Err(TransportError::UnknownRequest(_)))
        ));
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let url = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbusy",
        )
        .await;
        let transport = HttpTransport::new(Handle::current());

        let handle = transport.start(HttpRequest::get(url)).unwrap();
        let err = wait_for(&transport, handle).await.unwrap_err();

        assert_eq!(err, TransportError::status(503, "busy"));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(Handle::current());
        let handle = transport
            .start(HttpRequest::get(format!("http://{}/", addr)))
            .unwrap();
        let err = wait_for(&transport, handle).await.unwrap_err();

        assert!(matches!(err, TransportError::Connect(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_abandon_releases_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let transport = HttpTransport::new(Handle::current());
        let handle = transport
            .start(HttpRequest::get(format!("http://{}/", addr)))
            .unwrap();
        assert_eq!(transport.in_flight(), 1);

        transport.abandon(handle);
        assert_eq!(transport.in_flight(), 0);
        assert!(matches!(
            transport.poll(handle),
            TransportPoll::Done(Err(TransportError::UnknownRequest(_)))
        ));
        drop(listener);
    }
}
