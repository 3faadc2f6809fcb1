//! Long-lived filtered stream session.
//!
//! `Session::open` registers a track filter with the service and starts a
//! reader task that frames the chunked body into lines, classifies each line
//! and forwards it over a bounded channel. The consumer pulls messages with
//! [`Messages::next`]; any clone of [`StopHandle`] can end the session from
//! another task.

pub mod framing;
pub mod oauth;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Credentials;
use crate::error::StreamError;
use crate::message::RawStreamMessage;
use framing::{Frame, LineBuffer};
use oauth::{percent_encode, OAuthSigner};

const CHANNEL_CAPACITY: usize = 256;
const READER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// What the session asks the service to deliver. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFilter {
    /// Keywords, OR-ed together by the service
    pub track: Vec<String>,
    pub stall_warnings: bool,
}

impl StreamFilter {
    pub fn new(track: Vec<String>, stall_warnings: bool) -> Self {
        Self {
            track,
            stall_warnings,
        }
    }

    /// Form parameters sent when registering the filter.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("track", self.track.join(",")),
            ("stall_warnings", self.stall_warnings.to_string()),
        ]
    }

    /// `application/x-www-form-urlencoded` body matching [`Self::params`].
    pub fn form_body(&self) -> String {
        self.params()
            .iter()
            .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// HTTP client bound to one set of credentials and one endpoint.
pub struct StreamClient {
    http: reqwest::Client,
    signer: OAuthSigner,
    endpoint: String,
}

impl StreamClient {
    pub fn new(credentials: Credentials, endpoint: impl Into<String>) -> Result<Self, StreamError> {
        // No overall timeout: the response body stays open for the whole run
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("tweetsink/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            signer: OAuthSigner::new(credentials),
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// An open stream. Dropping it without calling `stop` still tears down the
/// reader once the message receiver goes away.
pub struct Session {
    messages: Messages,
    stop: StopHandle,
}

impl Session {
    /// Authenticate, register the filter and start reading.
    pub async fn open(client: &StreamClient, filter: &StreamFilter) -> Result<Self, StreamError> {
        let params = filter.params();
        let signed: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let authorization = client.signer.sign("POST", &client.endpoint, &signed)?;

        info!(
            endpoint = %client.endpoint,
            track = ?filter.track,
            stall_warnings = filter.stall_warnings,
            "Opening filtered stream"
        );

        let response = client
            .http
            .post(&client.endpoint)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(filter.form_body())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let status = status.as_u16();
            return Err(match status {
                401 | 403 => StreamError::Authentication { status, message },
                _ => StreamError::Api { status, message },
            });
        }

        info!(status = status.as_u16(), "Stream connected");
        Ok(Self::from_byte_stream(response.bytes_stream()))
    }

    /// Run a session over any source of body chunks.
    pub fn from_byte_stream<S, B, E>(body: S) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let token = CancellationToken::new();
        let reader = tokio::spawn(read_body(body, tx, token.clone()));

        Self {
            messages: Messages {
                rx,
                token: token.clone(),
            },
            stop: StopHandle {
                token,
                stopped: Arc::new(AtomicBool::new(false)),
                reader: Arc::new(Mutex::new(Some(reader))),
            },
        }
    }

    pub fn messages(&mut self) -> &mut Messages {
        &mut self.messages
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub async fn stop(&self) {
        self.stop.stop().await
    }

    /// Split into the consuming half and the stopping half.
    pub fn into_parts(self) -> (Messages, StopHandle) {
        (self.messages, self.stop)
    }
}

/// Lazy, non-restartable sequence of stream messages.
pub struct Messages {
    rx: mpsc::Receiver<RawStreamMessage>,
    token: CancellationToken,
}

impl Messages {
    /// Next message in arrival order. `None` once the session is stopped or
    /// the remote end closed the stream. Buffered messages are discarded
    /// after a stop.
    pub async fn next(&mut self) -> Option<RawStreamMessage> {
        if self.token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            msg = self.rx.recv() => msg,
        }
    }
}

/// Ends a session. Cheap to clone; only the first `stop` does any work.
#[derive(Clone)]
pub struct StopHandle {
    token: CancellationToken,
    stopped: Arc<AtomicBool>,
    reader: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl StopHandle {
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Stream already stopped");
            return;
        }

        self.token.cancel();

        let reader = self.reader.lock().await.take();
        if let Some(mut reader) = reader {
            if tokio::time::timeout(READER_SHUTDOWN_TIMEOUT, &mut reader)
                .await
                .is_err()
            {
                warn!("Stream reader did not exit in time, aborting");
                reader.abort();
            }
        }

        info!("Stream stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Reader task: body chunks -> frames -> classified messages -> channel.
async fn read_body<S, B, E>(body: S, tx: mpsc::Sender<RawStreamMessage>, token: CancellationToken)
where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]> + Send,
    E: fmt::Display + Send,
{
    let mut body = Box::pin(body);
    let mut lines = LineBuffer::new();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Stream reader cancelled");
                return;
            }
            chunk = body.next() => chunk,
        };

        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                warn!(error = %e, "Stream transport error, closing session");
                return;
            }
            None => {
                info!(pending_bytes = lines.pending(), "Stream closed by remote");
                return;
            }
        };

        for frame in lines.push(bytes.as_ref()) {
            let msg = match frame {
                Frame::Line(line) => RawStreamMessage::parse(&line),
                Frame::KeepAlive => {
                    debug!("Received keep-alive");
                    continue;
                }
                Frame::Oversized(len) => RawStreamMessage::Malformed {
                    line: String::new(),
                    error: format!("line of {len} bytes exceeds limit"),
                },
            };

            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                sent = tx.send(msg) => {
                    if sent.is_err() {
                        debug!("Message receiver dropped, stopping reader");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn chunks(parts: Vec<&'static str>) -> impl Stream<Item = Result<&'static [u8], Infallible>> {
        futures::stream::iter(parts.into_iter().map(|p| Ok(p.as_bytes())))
    }

    #[test]
    fn test_filter_form_body() {
        let filter = StreamFilter::new(vec!["rustlang".into(), "cat dog".into()], true);
        assert_eq!(
            filter.form_body(),
            "track=rustlang%2Ccat%20dog&stall_warnings=true"
        );
    }

    #[tokio::test]
    async fn test_messages_in_arrival_order() {
        let mut session = Session::from_byte_stream(chunks(vec![
            "{\"limit\":{\"track\":1}}\r\n\r\n{\"sc",
            "rub_geo\":{}}\r\nnot json\r\n",
        ]));

        let messages = session.messages();
        assert_eq!(
            messages.next().await,
            Some(RawStreamMessage::Limit { track: 1 })
        );
        assert_eq!(
            messages.next().await,
            Some(RawStreamMessage::Other("scrub_geo".into()))
        );
        assert!(matches!(
            messages.next().await,
            Some(RawStreamMessage::Malformed { .. })
        ));
        assert_eq!(messages.next().await, None);
    }

    #[tokio::test]
    async fn test_stop_ends_pending_stream() {
        // A body that never yields anything
        let session = Session::from_byte_stream(futures::stream::pending::<
            Result<Vec<u8>, Infallible>,
        >());
        let (mut messages, stop) = session.into_parts();

        let consumer = tokio::spawn(async move {
            let mut count = 0;
            while messages.next().await.is_some() {
                count += 1;
            }
            count
        });

        stop.stop().await;
        let count = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should return promptly")
            .unwrap();
        assert_eq!(count, 0);
        assert!(stop.is_stopped());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let session = Session::from_byte_stream(futures::stream::pending::<
            Result<Vec<u8>, Infallible>,
        >());
        let a = session.stop_handle();
        let b = session.stop_handle();
        tokio::join!(a.stop(), b.stop());
        session.stop().await;
        assert!(a.is_stopped());
    }

    #[tokio::test]
    async fn test_no_items_after_stop() {
        let mut session = Session::from_byte_stream(chunks(vec![
            "{\"limit\":{\"track\":1}}\n{\"limit\":{\"track\":2}}\n",
        ]));
        // Let the reader buffer both messages
        tokio::task::yield_now().await;
        session.stop().await;
        assert_eq!(session.messages().next().await, None);
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let body = futures::stream::iter(vec![
            Ok(b"{\"limit\":{\"track\":3}}\n".to_vec()),
            Err("connection reset"),
        ]);
        let mut session = Session::from_byte_stream(body);
        assert_eq!(
            session.messages().next().await,
            Some(RawStreamMessage::Limit { track: 3 })
        );
        assert_eq!(session.messages().next().await, None);
    }
}
