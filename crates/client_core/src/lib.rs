use std::sync::Arc;

use anyhow::{anyhow, Result};
use shared::{
    protocol::TELEMETRY_TOPIC,
    recipe::{RecipeDraft, RecipeField, ValidRecipe},
    telemetry::MachineSnapshot,
};
use tokio::{
    sync::{broadcast, oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod error;
pub mod session;
pub mod stomp;
pub mod transport;

pub use error::DashboardError;
pub use session::{
    DashboardSession, COMMUNICATION_FAILURE_MESSAGE, MALFORMED_TELEMETRY_MESSAGE, START_MESSAGE,
};
pub use transport::{
    HttpRecipeSubmitter, RecipeSubmitter, StompTelemetrySource, TelemetrySource, TelemetryStream,
    TransportSignal,
};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A submission passed local checks; the next snapshot is the restarted log.
    RunStarted,
    SnapshotUpdated(MachineSnapshot),
    DraftUpdated(RecipeDraft),
    TelemetryConnected,
    TelemetryDisconnected(String),
    Error(String),
}

/// Owns the dashboard session and wires it to the submission and telemetry
/// collaborators. Every state change is published as a whole snapshot.
pub struct DashboardClient {
    submitter: Arc<dyn RecipeSubmitter>,
    telemetry: Arc<dyn TelemetrySource>,
    topic: String,
    session: Mutex<DashboardSession>,
    subscription: Mutex<Option<ActiveSubscription>>,
    events: broadcast::Sender<ClientEvent>,
}

struct ActiveSubscription {
    shutdown: oneshot::Sender<()>,
    pump: JoinHandle<()>,
}

impl DashboardClient {
    pub fn new(
        submitter: Arc<dyn RecipeSubmitter>,
        telemetry: Arc<dyn TelemetrySource>,
    ) -> Arc<Self> {
        Self::with_session(submitter, telemetry, TELEMETRY_TOPIC, DashboardSession::new())
    }

    pub fn with_session(
        submitter: Arc<dyn RecipeSubmitter>,
        telemetry: Arc<dyn TelemetrySource>,
        topic: impl Into<String>,
        session: DashboardSession,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            submitter,
            telemetry,
            topic: topic.into(),
            session: Mutex::new(session),
            subscription: Mutex::new(None),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> MachineSnapshot {
        self.session.lock().await.snapshot().clone()
    }

    pub async fn draft(&self) -> RecipeDraft {
        *self.session.lock().await.draft()
    }

    pub async fn is_processing(&self) -> bool {
        self.session.lock().await.is_processing()
    }

    pub async fn progress_percent(&self) -> f64 {
        self.session.lock().await.progress_percent()
    }

    pub async fn edit_field(&self, field: RecipeField, raw: &str) -> Result<f64, DashboardError> {
        let (value, draft) = {
            let mut guard = self.session.lock().await;
            let value = guard.edit_field(field, raw)?;
            (value, *guard.draft())
        };
        let _ = self.events.send(ClientEvent::DraftUpdated(draft));
        Ok(value)
    }

    pub async fn replace_draft(&self, draft: RecipeDraft) -> Result<(), DashboardError> {
        self.session.lock().await.replace_draft(draft)?;
        let _ = self.events.send(ClientEvent::DraftUpdated(draft));
        Ok(())
    }

    /// Subscribes to the telemetry topic and starts folding frames into the
    /// session. Fails if a subscription is already running.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.subscription.lock().await;
        if slot.is_some() {
            return Err(anyhow!("telemetry subscription already running"));
        }

        let mut stream = self.telemetry.subscribe(&self.topic).await?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let client = Arc::clone(self);
        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    signal = stream.next() => match signal {
                        Some(signal) => client.ingest(signal).await,
                        None => break,
                    },
                }
            }
            stream.close().await;
            debug!("telemetry: pump stopped");
        });

        info!(topic = %self.topic, "dashboard: telemetry subscription started");
        *slot = Some(ActiveSubscription {
            shutdown: shutdown_tx,
            pump,
        });
        Ok(())
    }

    /// Tears the subscription down. Accumulated snapshot state is kept.
    pub async fn stop(&self) {
        let Some(active) = self.subscription.lock().await.take() else {
            return;
        };
        let _ = active.shutdown.send(());
        if let Err(err) = active.pump.await {
            warn!("telemetry: pump task failed: {err}");
        }
        info!(topic = %self.topic, "dashboard: telemetry subscription stopped");
    }

    /// Validates the current draft and hands it to the submitter. The
    /// snapshot restarts as soon as the draft is accepted locally.
    pub async fn submit(&self) -> Result<ValidRecipe, DashboardError> {
        let recipe = {
            let mut guard = self.session.lock().await;
            let recipe = guard.begin_submission()?;
            let _ = self.events.send(ClientEvent::RunStarted);
            let _ = self
                .events
                .send(ClientEvent::SnapshotUpdated(guard.snapshot().clone()));
            recipe
        };

        info!(
            total_weight = recipe.total_weight_grams(),
            "dashboard: submitting production run"
        );
        let outcome = self.submitter.submit(&recipe).await;

        let mut guard = self.session.lock().await;
        match outcome {
            Ok(()) => {
                guard.finish_submission();
                Ok(recipe)
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn!("dashboard: production request failed: {reason}");
                guard.record_submit_failure(&reason);
                let _ = self
                    .events
                    .send(ClientEvent::SnapshotUpdated(guard.snapshot().clone()));
                let _ = self.events.send(ClientEvent::Error(reason.clone()));
                Err(DashboardError::CommunicationFailure(reason))
            }
        }
    }

    async fn ingest(&self, signal: TransportSignal) {
        match signal {
            TransportSignal::Frame(body) => {
                // Sent under the session lock: event order matches session order.
                let mut guard = self.session.lock().await;
                if let Err(err) = guard.ingest_frame(&body) {
                    warn!("telemetry: dropping frame: {err}");
                    let _ = self.events.send(ClientEvent::Error(err.to_string()));
                }
                let _ = self
                    .events
                    .send(ClientEvent::SnapshotUpdated(guard.snapshot().clone()));
            }
            TransportSignal::Connected => {
                info!(topic = %self.topic, "telemetry: connected");
                let _ = self.events.send(ClientEvent::TelemetryConnected);
            }
            TransportSignal::Disconnected(reason) => {
                warn!(topic = %self.topic, "telemetry: disconnected: {reason}");
                let _ = self
                    .events
                    .send(ClientEvent::TelemetryDisconnected(reason));
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
