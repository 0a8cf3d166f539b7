//! I/O adapters: recipe submission over HTTP and telemetry over STOMP/WebSocket.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use shared::{
    protocol::{MakeCoffeeRequest, MAKE_COFFEE_PATH},
    recipe::ValidRecipe,
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::stomp::{StompCommand, StompFrame};

const SUBSCRIPTION_ID: &str = "sub-0";
const FRAME_BUFFER: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_secs(5);

#[async_trait]
pub trait RecipeSubmitter: Send + Sync {
    async fn submit(&self, recipe: &ValidRecipe) -> Result<()>;
}

/// Posts validated recipes to `{api_base}/coffee/make`. No retries.
pub struct HttpRecipeSubmitter {
    http: Client,
    endpoint: String,
}

impl HttpRecipeSubmitter {
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self::with_client(http, api_base))
    }

    pub fn with_client(http: Client, api_base: &str) -> Self {
        Self {
            http,
            endpoint: format!("{}{MAKE_COFFEE_PATH}", api_base.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RecipeSubmitter for HttpRecipeSubmitter {
    async fn submit(&self, recipe: &ValidRecipe) -> Result<()> {
        let body = MakeCoffeeRequest::from(recipe);
        let res = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.endpoint))?;
        let status = res.status();
        res.error_for_status()
            .with_context(|| format!("server rejected production request ({status})"))?;
        info!(
            endpoint = %self.endpoint,
            total_weight = body.total_weight,
            "recipe: production request accepted"
        );
        Ok(())
    }
}

/// What a telemetry transport hands to its consumer, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    Connected,
    Frame(String),
    Disconnected(String),
}

/// Live subscription handle. Dropping it also tears the transport down.
pub struct TelemetryStream {
    frames: ReceiverStream<TransportSignal>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TelemetryStream {
    pub fn new(
        frames: mpsc::Receiver<TransportSignal>,
        shutdown: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            frames: ReceiverStream::new(frames),
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    /// A stream with nothing behind it to tear down.
    pub fn from_receiver(frames: mpsc::Receiver<TransportSignal>) -> Self {
        Self {
            frames: ReceiverStream::new(frames),
            shutdown: None,
            task: None,
        }
    }

    pub async fn next(&mut self) -> Option<TransportSignal> {
        self.frames.next().await
    }

    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(CLOSE_GRACE, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("telemetry: transport task ended abnormally: {err}"),
                Err(_) => {
                    warn!("telemetry: transport did not stop in time; aborting");
                    task.abort();
                }
            }
        }
    }
}

#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<TelemetryStream>;
}

/// STOMP 1.2 over a plain WebSocket, reconnecting after a fixed delay.
pub struct StompTelemetrySource {
    ws_url: Url,
    reconnect_delay: Duration,
}

impl StompTelemetrySource {
    pub fn new(ws_url: &str, reconnect_delay: Duration) -> Result<Self> {
        let ws_url = Url::parse(ws_url).with_context(|| format!("invalid websocket url: {ws_url}"))?;
        if !matches!(ws_url.scheme(), "ws" | "wss") {
            bail!("websocket url must start with ws:// or wss://, got {ws_url}");
        }
        Ok(Self {
            ws_url,
            reconnect_delay,
        })
    }
}

#[async_trait]
impl TelemetrySource for StompTelemetrySource {
    async fn subscribe(&self, topic: &str) -> Result<TelemetryStream> {
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_subscription(
            self.ws_url.clone(),
            topic.to_string(),
            self.reconnect_delay,
            frames_tx,
            shutdown_rx,
        ));
        Ok(TelemetryStream::new(frames_rx, shutdown_tx, task))
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum SessionEnd {
    Shutdown,
    ConsumerGone,
    RemoteClosed,
}

async fn run_subscription(
    ws_url: Url,
    topic: String,
    reconnect_delay: Duration,
    frames: mpsc::Sender<TransportSignal>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        let connected = tokio::select! {
            _ = &mut shutdown => return,
            connected = connect_stomp(&ws_url, &topic) => connected,
        };

        let reason = match connected {
            Ok(ws) => {
                info!(url = %ws_url, topic = %topic, attempt, "telemetry: subscribed");
                attempt = 0;
                match pump_frames(ws, &topic, &frames, &mut shutdown).await {
                    Ok(SessionEnd::Shutdown) | Ok(SessionEnd::ConsumerGone) => return,
                    Ok(SessionEnd::RemoteClosed) => "connection closed by broker".to_string(),
                    Err(err) => format!("{err:#}"),
                }
            }
            Err(err) => format!("{err:#}"),
        };

        warn!(
            url = %ws_url,
            attempt,
            retry_in_ms = reconnect_delay.as_millis() as u64,
            "telemetry: connection lost: {reason}"
        );
        if frames
            .send(TransportSignal::Disconnected(reason))
            .await
            .is_err()
        {
            return;
        }

        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }
}

async fn connect_stomp(ws_url: &Url, topic: &str) -> Result<WsStream> {
    let (mut ws, _) = connect_async(ws_url.as_str())
        .await
        .with_context(|| format!("failed to connect websocket: {ws_url}"))?;

    let host = ws_url.host_str().unwrap_or("localhost");
    ws.send(Message::Text(StompFrame::connect(host).encode()))
        .await
        .context("failed to send STOMP CONNECT")?;

    loop {
        let msg = ws
            .next()
            .await
            .ok_or_else(|| anyhow!("websocket closed before STOMP CONNECTED"))?
            .context("websocket receive failed during STOMP handshake")?;
        if let Message::Close(_) = msg {
            bail!("websocket closed before STOMP CONNECTED");
        }
        let Some(text) = message_text(msg)? else {
            continue;
        };
        match StompFrame::decode(&text)? {
            None => continue,
            Some(frame) if frame.command == StompCommand::Connected => {
                debug!(
                    version = frame.get_header("version").unwrap_or("?"),
                    "telemetry: STOMP session established"
                );
                break;
            }
            Some(frame) if frame.command == StompCommand::Error => {
                bail!("broker rejected STOMP CONNECT: {}", frame.error_summary());
            }
            Some(frame) => bail!("unexpected {} frame before CONNECTED", frame.command),
        }
    }

    ws.send(Message::Text(
        StompFrame::subscribe(SUBSCRIPTION_ID, topic).encode(),
    ))
    .await
    .context("failed to send STOMP SUBSCRIBE")?;
    Ok(ws)
}

async fn pump_frames(
    ws: WsStream,
    topic: &str,
    frames: &mpsc::Sender<TransportSignal>,
    shutdown: &mut oneshot::Receiver<()>,
) -> Result<SessionEnd> {
    let (mut sink, mut stream) = ws.split();
    if frames.send(TransportSignal::Connected).await.is_err() {
        return Ok(SessionEnd::ConsumerGone);
    }

    loop {
        let msg = tokio::select! {
            _ = &mut *shutdown => {
                for frame in [StompFrame::unsubscribe(SUBSCRIPTION_ID), StompFrame::disconnect()] {
                    if let Err(err) = sink.send(Message::Text(frame.encode())).await {
                        debug!("telemetry: teardown send failed: {err}");
                        break;
                    }
                }
                let _ = sink.close().await;
                info!(topic = %topic, "telemetry: unsubscribed");
                return Ok(SessionEnd::Shutdown);
            }
            msg = stream.next() => msg,
        };

        let msg = match msg {
            None | Some(Ok(Message::Close(_))) => return Ok(SessionEnd::RemoteClosed),
            Some(Err(err)) => return Err(err).context("websocket receive failed"),
            Some(Ok(msg)) => msg,
        };
        let text = match message_text(msg) {
            Ok(Some(text)) => text,
            Ok(None) => continue,
            Err(err) => {
                warn!("telemetry: dropping websocket frame: {err:#}");
                continue;
            }
        };

        let frame = match StompFrame::decode(&text) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(err) => {
                warn!("telemetry: dropping undecodable STOMP frame: {err}");
                continue;
            }
        };

        match frame.command {
            StompCommand::Message => {
                if frame.get_header("subscription") != Some(SUBSCRIPTION_ID) {
                    debug!(
                        destination = frame.get_header("destination").unwrap_or("?"),
                        "telemetry: ignoring frame for foreign subscription"
                    );
                    continue;
                }
                if frames.send(TransportSignal::Frame(frame.body)).await.is_err() {
                    return Ok(SessionEnd::ConsumerGone);
                }
            }
            StompCommand::Error => bail!("broker error: {}", frame.error_summary()),
            other => debug!(command = %other, "telemetry: ignoring STOMP frame"),
        }
    }
}

fn message_text(msg: Message) -> Result<Option<String>> {
    match msg {
        Message::Text(text) => Ok(Some(text)),
        Message::Binary(bytes) => String::from_utf8(bytes)
            .map(Some)
            .context("binary websocket frame is not UTF-8"),
        _ => Ok(None),
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
