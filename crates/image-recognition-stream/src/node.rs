//! Broker connection and serve loop.
//!
//! A [`StreamFunction`] collects the function name, the observed data keys
//! and the handler, then connects to the Zipper and performs the
//! handshake. The resulting [`Connection`] reads one frame at a time and
//! runs the handler for each observed data frame on a blocking worker
//! before reading the next.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, instrument, warn};

use image_recognition_common::{StreamError, ZipperConfig};

use crate::frame::{Frame, FrameCodec, Handshake};
use crate::handler::MessageHandler;

/// Default timeout for connecting and completing the handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default frame body limit.
const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// A stream function before it connects.
pub struct StreamFunction {
    name: String,
    addr: String,
    observed: Vec<u8>,
    handler: Option<Arc<dyn MessageHandler>>,
    connect_timeout: Duration,
    max_frame_bytes: usize,
}

impl StreamFunction {
    /// Create a stream function registering as `name` at `addr`.
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            observed: Vec::new(),
            handler: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// Create a stream function from the broker configuration.
    ///
    /// The configured data key is observed; the handler still has to be
    /// set.
    pub fn from_config(config: &ZipperConfig) -> Self {
        let mut sfn = Self::new(&config.function_name, &config.addr)
            .with_connect_timeout(config.connect_timeout())
            .with_max_frame_bytes(config.max_frame_bytes);
        sfn.observe_data_key(config.observe_data_key);
        sfn
    }

    /// Set the timeout for connecting and completing the handshake.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the largest accepted frame body.
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// Receive data frames tagged with `key`.
    pub fn observe_data_key(&mut self, key: u8) -> &mut Self {
        if !self.observed.contains(&key) {
            self.observed.push(key);
        }
        self
    }

    /// Data keys observed so far.
    pub fn observed(&self) -> &[u8] {
        &self.observed
    }

    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Install the message handler.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Registration`] if no data key is observed or
    /// a handler is already installed.
    pub fn set_handler(&mut self, handler: impl MessageHandler) -> Result<(), StreamError> {
        if self.observed.is_empty() {
            return Err(StreamError::registration(
                "No data keys observed; call observe_data_key first",
            ));
        }
        if self.handler.is_some() {
            return Err(StreamError::registration("Handler already set"));
        }

        self.handler = Some(Arc::new(handler));
        debug!(name = %self.name, observed = ?self.observed, "Handler registered");
        Ok(())
    }

    /// Connect to the broker and register.
    ///
    /// # Errors
    ///
    /// - [`StreamError::Registration`] if no handler is installed
    /// - [`StreamError::Connect`] if the TCP connection fails or times out
    /// - [`StreamError::Handshake`] if the broker refuses the function
    /// - [`StreamError::Closed`] if the broker hangs up mid-handshake
    #[instrument(skip(self), fields(name = %self.name, addr = %self.addr))]
    pub async fn connect(self) -> Result<Connection, StreamError> {
        let handler = self
            .handler
            .ok_or_else(|| StreamError::registration("No handler set"))?;

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                StreamError::connect(
                    &self.addr,
                    format!("timed out after {}ms", self.connect_timeout.as_millis()),
                )
            })?
            .map_err(|e| StreamError::connect(&self.addr, e.to_string()))?;

        stream.set_nodelay(true)?;
        let mut framed = Framed::new(stream, FrameCodec::new(self.max_frame_bytes));

        framed
            .send(Frame::Handshake(Handshake {
                name: self.name.clone(),
                observe: self.observed.clone(),
            }))
            .await?;

        let ack = tokio::time::timeout(self.connect_timeout, framed.next())
            .await
            .map_err(|_| StreamError::handshake("Timed out waiting for acknowledgment"))?;

        match ack {
            Some(Ok(Frame::HandshakeAck)) => {}
            Some(Ok(Frame::Goaway(reason))) => return Err(StreamError::handshake(reason)),
            Some(Ok(other)) => {
                return Err(StreamError::handshake(format!(
                    "Unexpected frame during handshake: {other:?}"
                )));
            }
            Some(Err(e)) => return Err(e),
            None => return Err(StreamError::Closed),
        }

        info!(observed = ?self.observed, "Connected to zipper");

        Ok(Connection {
            name: self.name,
            framed,
            observed: self.observed,
            handler,
        })
    }
}

impl std::fmt::Debug for StreamFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamFunction")
            .field("name", &self.name)
            .field("addr", &self.addr)
            .field("observed", &self.observed)
            .field("has_handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

/// An established broker connection.
pub struct Connection {
    name: String,
    framed: Framed<TcpStream, FrameCodec>,
    observed: Vec<u8>,
    handler: Arc<dyn MessageHandler>,
}

impl Connection {
    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serve data frames until the broker goes away or `shutdown` resolves.
    ///
    /// Returns the number of messages handled.
    ///
    /// # Errors
    ///
    /// Returns an error if a frame cannot be read or a reply cannot be
    /// written.
    #[instrument(skip_all, fields(name = %self.name))]
    pub async fn serve<F>(mut self, shutdown: F) -> Result<u64, StreamError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut handled = 0u64;

        loop {
            let next = tokio::select! {
                () = &mut shutdown => None,
                frame = self.framed.next() => Some(frame),
            };

            let Some(frame) = next else {
                info!("Shutdown signal received");
                if let Err(e) = self.framed.send(Frame::Goaway("shutdown".into())).await {
                    debug!(error = %e, "Failed to send goaway");
                }
                break;
            };

            match frame {
                Some(Ok(Frame::Data { tag, payload })) => {
                    if !self.observed.contains(&tag) {
                        debug!(tag, "Skipping unobserved data key");
                        continue;
                    }

                    let handler = Arc::clone(&self.handler);
                    let task = tokio::task::spawn_blocking(move || handler.handle(&payload));
                    let reply = match task.await {
                        Ok(reply) => reply,
                        Err(e) => {
                            error!(error = %e, "Handler task failed");
                            continue;
                        }
                    };

                    self.framed
                        .send(Frame::data(reply.status, reply.payload.unwrap_or_default()))
                        .await?;
                    handled += 1;
                }
                Some(Ok(Frame::Goaway(reason))) => {
                    info!(reason = %reason, "Zipper sent goaway");
                    break;
                }
                Some(Ok(other)) => warn!(frame = ?other, "Ignoring unexpected frame"),
                Some(Err(e)) => return Err(e),
                None => {
                    info!("Zipper closed the connection");
                    break;
                }
            }
        }

        info!(handled, "Stream function stopped");
        Ok(handled)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("observed", &self.observed)
            .finish_non_exhaustive()
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Reply;

    fn ack(_: &[u8]) -> Reply {
        Reply::ack(0x11)
    }

    #[test]
    fn test_observe_deduplicates() {
        let mut sfn = StreamFunction::new("image-recognition", "localhost:9900");
        sfn.observe_data_key(0x10)
            .observe_data_key(0x10)
            .observe_data_key(0x12);
        assert_eq!(sfn.observed(), &[0x10, 0x12]);
    }

    #[test]
    fn test_set_handler_requires_observed_key() {
        let mut sfn = StreamFunction::new("image-recognition", "localhost:9900");
        let result = sfn.set_handler(ack);
        assert!(matches!(result, Err(StreamError::Registration { .. })));
    }

    #[test]
    fn test_set_handler_once() {
        let mut sfn = StreamFunction::new("image-recognition", "localhost:9900");
        sfn.observe_data_key(0x10);
        assert!(sfn.set_handler(ack).is_ok());
        assert!(matches!(
            sfn.set_handler(ack),
            Err(StreamError::Registration { .. })
        ));
    }

    #[test]
    fn test_from_config() {
        let sfn = StreamFunction::from_config(&ZipperConfig::default());
        assert_eq!(sfn.name(), "image-recognition");
        assert_eq!(sfn.observed(), &[0x10]);
    }

    #[tokio::test]
    async fn test_connect_without_handler() {
        let mut sfn = StreamFunction::new("image-recognition", "127.0.0.1:1");
        sfn.observe_data_key(0x10);

        let result = sfn.connect().await;
        assert!(matches!(result, Err(StreamError::Registration { .. })));
    }
}
