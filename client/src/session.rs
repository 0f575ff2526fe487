//! One speak operation over the data plane.
//!
//! Lifecycle: `Idle → Connecting → Sending → Streaming → {Finished | Failed | Cancelled}`.
//! A session is consumed by [`StreamingSession::run`], so it can only ever be used once.

use std::time::Duration;

use reqwest::Url;
use soundboard_protocol::{decode_server_frame, ServerFrame};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, trace};

use crate::cancel::CancelToken;
use crate::error::{ClientError, Result};
use crate::models::{AudioChunk, EngineEvent, SpeakRequest};
use crate::options::ClientOptions;
use crate::transport::{
    Connector, DataPlane, Fragment, MessageAssembler, TransportError, WsConnector,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Sending,
    Streaming,
    Finished,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Finished | SessionState::Failed | SessionState::Cancelled
        )
    }
}

#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// The engine sent `finished` or closed the stream
    Finished { chunks: usize },
    Failed(ClientError),
    Cancelled,
}

impl SessionOutcome {
    pub fn state(&self) -> SessionState {
        match self {
            SessionOutcome::Finished { .. } => SessionState::Finished,
            SessionOutcome::Failed(_) => SessionState::Failed,
            SessionOutcome::Cancelled => SessionState::Cancelled,
        }
    }

    pub fn into_result(self) -> Result<usize> {
        match self {
            SessionOutcome::Finished { chunks } => Ok(chunks),
            SessionOutcome::Failed(err) => Err(err),
            SessionOutcome::Cancelled => Err(ClientError::Cancelled),
        }
    }
}

/// Receives what a session produces.
///
/// Nothing is delivered once the session's token has been cancelled, and no
/// chunk follows `on_outcome`.
pub trait SessionObserver: Send {
    /// Ownership of the buffer passes to the observer.
    fn on_chunk(&mut self, chunk: AudioChunk);

    /// Informational engine states such as "started"
    fn on_event(&mut self, _event: &EngineEvent) {}

    fn on_outcome(&mut self, _outcome: &SessionOutcome) {}
}

impl<F> SessionObserver for F
where
    F: FnMut(AudioChunk) + Send,
{
    fn on_chunk(&mut self, chunk: AudioChunk) {
        self(chunk)
    }
}

pub struct StreamingSession<C: Connector = WsConnector> {
    connector: C,
    url: Url,
    request: SpeakRequest,
    connect_timeout: Duration,
    receive_timeout: Duration,
    max_message_size: usize,
    cancel: CancelToken,
    state: SessionState,
}

impl StreamingSession<WsConnector> {
    pub fn new(options: &ClientOptions, request: SpeakRequest) -> Result<Self> {
        let connector = WsConnector::new().with_max_message_size(options.max_message_size);
        Self::with_connector(connector, options, request)
    }
}

impl<C: Connector> StreamingSession<C> {
    pub fn with_connector(connector: C, options: &ClientOptions, request: SpeakRequest) -> Result<Self> {
        request.validate()?;
        Ok(Self {
            connector,
            url: options.stream_url()?,
            request,
            connect_timeout: options.connect_timeout,
            receive_timeout: options.receive_timeout,
            max_message_size: options.max_message_size,
            cancel: CancelToken::new(),
            state: SessionState::Idle,
        })
    }

    pub fn request_id(&self) -> &str {
        self.request.request_id()
    }

    /// Token that aborts this session from anywhere, including before `run`.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Drives the session to a terminal outcome.
    ///
    /// The first terminal signal wins: `finished`, an `error` frame, a close,
    /// a local failure or cancellation. The observer's `on_outcome` is skipped
    /// when the session was cancelled.
    pub async fn run<O>(mut self, observer: &mut O) -> SessionOutcome
    where
        O: SessionObserver + ?Sized,
    {
        let request_id = self.request.request_id().to_string();
        info!(
            request_id = %request_id,
            text_len = self.request.text.len(),
            "speak started"
        );

        let outcome = match self.drive(observer).await {
            Ok(chunks) => SessionOutcome::Finished { chunks },
            Err(ClientError::Cancelled) => SessionOutcome::Cancelled,
            Err(err) if self.cancel.is_cancelled() => {
                debug!(request_id = %request_id, error = %err, "failure after cancel");
                SessionOutcome::Cancelled
            }
            Err(err) => SessionOutcome::Failed(err),
        };
        self.transition(outcome.state());

        match &outcome {
            SessionOutcome::Finished { chunks } => {
                info!(request_id = %request_id, chunks, "speak completed")
            }
            SessionOutcome::Failed(err) => {
                error!(request_id = %request_id, error = %err, "speak failed")
            }
            SessionOutcome::Cancelled => info!(request_id = %request_id, "speak cancelled"),
        }

        if !self.cancel.is_cancelled() {
            observer.on_outcome(&outcome);
        }
        outcome
    }

    async fn drive<O>(&mut self, observer: &mut O) -> Result<usize>
    where
        O: SessionObserver + ?Sized,
    {
        let cancel = self.cancel.clone();
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        self.transition(SessionState::Connecting);
        debug!(url = %self.url, "connecting stream");
        let connect_timeout = self.connect_timeout;
        let mut conn = cancel
            .or_cancel(async {
                match timeout(connect_timeout, self.connector.connect(&self.url)).await {
                    Ok(Ok(conn)) => Ok(conn),
                    Ok(Err(e)) => Err(ClientError::ConnectError(e.to_string())),
                    Err(_) => Err(ClientError::ConnectError(format!(
                        "handshake timed out after {connect_timeout:?}"
                    ))),
                }
            })
            .await?;

        let result = self.exchange(&mut conn, &cancel, observer).await;
        conn.close().await;
        result
    }

    async fn exchange<O>(
        &mut self,
        conn: &mut C::Connection,
        cancel: &CancelToken,
        observer: &mut O,
    ) -> Result<usize>
    where
        O: SessionObserver + ?Sized,
    {
        self.transition(SessionState::Sending);
        let frame = serde_json::to_string(&self.request.to_frame())
            .map_err(|e| ClientError::SendError(e.to_string()))?;
        cancel
            .or_cancel(async {
                conn.send_text(frame)
                    .await
                    .map_err(|e| ClientError::SendError(e.to_string()))
            })
            .await?;

        self.transition(SessionState::Streaming);
        let receive_timeout = self.receive_timeout;
        let mut assembler = MessageAssembler::new(self.max_message_size);
        let mut chunks = 0usize;
        let mut deadline = Instant::now() + receive_timeout;

        loop {
            let fragment = cancel
                .or_cancel(async {
                    match timeout_at(deadline, conn.next_fragment()).await {
                        Err(_) => Err(ClientError::ReceiveTimeout(receive_timeout)),
                        Ok(None) => Ok(None),
                        Ok(Some(Err(e @ TransportError::TooLarge(_)))) => {
                            Err(ClientError::ProtocolError(e.to_string()))
                        }
                        Ok(Some(Err(e))) => Err(ClientError::ConnectionLost(e.to_string())),
                        Ok(Some(Ok(fragment))) => Ok(Some(fragment)),
                    }
                })
                .await;
            // a cancel that raced this read wins over whatever the read produced
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }

            let (bytes, last) = match fragment? {
                Some(Fragment::Data { bytes, last }) => (bytes, last),
                Some(Fragment::Close(reason)) => {
                    assembler.discard();
                    debug!(reason = ?reason, "engine closed stream");
                    return Ok(chunks);
                }
                None => {
                    assembler.discard();
                    debug!("stream ended");
                    return Ok(chunks);
                }
            };

            let Some(message) = assembler.push(bytes, last)? else {
                continue;
            };
            deadline = Instant::now() + receive_timeout;

            let frame = decode_server_frame(&message)
                .map_err(|e| ClientError::ProtocolError(e.to_string()))?;
            match frame {
                Some(ServerFrame::AudioChunk { payload, .. }) => {
                    let pcm_data = payload
                        .decode_pcm()
                        .map_err(|e| ClientError::ProtocolError(e.to_string()))?;
                    if cancel.is_cancelled() {
                        return Err(ClientError::Cancelled);
                    }
                    chunks += 1;
                    observer.on_chunk(AudioChunk {
                        pcm_data,
                        sample_rate: payload.sample_rate,
                    });
                }
                Some(ServerFrame::State { payload, .. }) => {
                    debug!(
                        request_id = %self.request.request_id(),
                        state = %payload.state,
                        "engine state"
                    );
                    if cancel.is_cancelled() {
                        return Err(ClientError::Cancelled);
                    }
                    let finished = payload.is_finished();
                    observer.on_event(&EngineEvent {
                        state: payload.state,
                    });
                    if finished {
                        return Ok(chunks);
                    }
                }
                Some(ServerFrame::Error { payload, .. }) => {
                    return Err(ClientError::EngineError {
                        message: payload.message_or_default().to_string(),
                        code: payload.code,
                    });
                }
                None => trace!("ignoring unknown message type"),
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state.is_terminal() {
            return;
        }
        trace!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}
