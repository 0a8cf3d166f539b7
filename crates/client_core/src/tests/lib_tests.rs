use std::time::Duration;

use async_trait::async_trait;
use shared::{
    domain::{MotorId, ProcessStatus},
    error::ValidationError,
    protocol::MakeCoffeeRequest,
};
use tokio::sync::mpsc;

use super::*;

struct RecordingSubmitter {
    requests: Mutex<Vec<MakeCoffeeRequest>>,
    fail_with: Option<String>,
}

impl RecordingSubmitter {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            fail_with: None,
        })
    }

    fn failing(err: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            fail_with: Some(err.into()),
        })
    }
}

#[async_trait]
impl RecipeSubmitter for RecordingSubmitter {
    async fn submit(&self, recipe: &ValidRecipe) -> Result<()> {
        self.requests
            .lock()
            .await
            .push(MakeCoffeeRequest::from(recipe));
        if let Some(err) = &self.fail_with {
            return Err(anyhow!(err.clone()));
        }
        Ok(())
    }
}

struct ChannelTelemetrySource {
    frames: Mutex<Option<mpsc::Receiver<TransportSignal>>>,
    topics: Mutex<Vec<String>>,
}

impl ChannelTelemetrySource {
    fn new() -> (Arc<Self>, mpsc::Sender<TransportSignal>) {
        let (tx, rx) = mpsc::channel(64);
        let source = Arc::new(Self {
            frames: Mutex::new(Some(rx)),
            topics: Mutex::new(Vec::new()),
        });
        (source, tx)
    }
}

#[async_trait]
impl TelemetrySource for ChannelTelemetrySource {
    async fn subscribe(&self, topic: &str) -> Result<TelemetryStream> {
        self.topics.lock().await.push(topic.to_string());
        let rx = self
            .frames
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("already subscribed"))?;
        Ok(TelemetryStream::from_receiver(rx))
    }
}

fn frame(weight: f64, status: &str, motor: &str, message: Option<&str>) -> TransportSignal {
    let mut body = serde_json::json!({
        "currentWeight": weight,
        "status": status,
        "activeMotor": motor,
    });
    if let Some(message) = message {
        body["message"] = serde_json::Value::String(message.to_string());
    }
    TransportSignal::Frame(body.to_string())
}

async fn next_snapshot(rx: &mut broadcast::Receiver<ClientEvent>) -> MachineSnapshot {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("event");
        if let ClientEvent::SnapshotUpdated(snapshot) = event {
            return snapshot;
        }
    }
}

#[tokio::test]
async fn default_recipe_is_submitted_and_snapshot_restarts() {
    let submitter = RecordingSubmitter::ok();
    let (telemetry, _tx) = ChannelTelemetrySource::new();
    let client = DashboardClient::new(submitter.clone(), telemetry);
    let mut rx = client.subscribe_events();

    let recipe = client.submit().await.expect("submit");

    assert_eq!(recipe.as_draft(), &RecipeDraft::default());
    let requests = submitter.requests.lock().await;
    assert_eq!(
        *requests,
        vec![MakeCoffeeRequest {
            total_weight: 20.0,
            ra: 60.0,
            rb: 20.0,
            rc: 20.0,
            rpm: 1000.0,
            blend_time: 2.0,
        }]
    );
    let snapshot = next_snapshot(&mut rx).await;
    assert_eq!(snapshot.current_weight_grams, 0.0);
    assert_eq!(snapshot.log, vec![START_MESSAGE.to_string()]);
}

#[tokio::test]
async fn invalid_draft_never_reaches_submitter() {
    let submitter = RecordingSubmitter::ok();
    let (telemetry, _tx) = ChannelTelemetrySource::new();
    let client = DashboardClient::new(submitter.clone(), telemetry);

    client
        .edit_field(RecipeField::TotalWeight, "")
        .await
        .expect("editable");
    let err = client.submit().await.expect_err("zero weight");

    assert!(matches!(
        err,
        DashboardError::Invalid(ValidationError::InvalidWeight { .. })
    ));
    assert!(submitter.requests.lock().await.is_empty());
    assert!(client.snapshot().await.log.is_empty());
}

#[tokio::test]
async fn failed_submission_logs_once_and_keeps_status() {
    let submitter = RecordingSubmitter::failing("connection refused");
    let (telemetry, _tx) = ChannelTelemetrySource::new();
    let client = DashboardClient::new(submitter.clone(), telemetry);

    let err = client.submit().await.expect_err("backend down");

    match err {
        DashboardError::CommunicationFailure(reason) => {
            assert!(reason.contains("connection refused"))
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let snapshot = client.snapshot().await;
    assert_eq!(snapshot.status, ProcessStatus::Idle);
    assert_eq!(snapshot.log.len(), 2);
    assert_eq!(snapshot.log[0], START_MESSAGE);
    assert!(snapshot.log[1].starts_with(COMMUNICATION_FAILURE_MESSAGE));
    assert_eq!(submitter.requests.lock().await.len(), 1);
}

#[tokio::test]
async fn telemetry_frames_fold_into_snapshot_in_order() {
    let (telemetry, tx) = ChannelTelemetrySource::new();
    let client = DashboardClient::new(RecordingSubmitter::ok(), telemetry.clone());
    let mut rx = client.subscribe_events();
    client.start().await.expect("start");

    tx.send(frame(5.5, "GRINDING", "GRINDER", Some("grinding beans")))
        .await
        .expect("send");
    let snapshot = next_snapshot(&mut rx).await;
    assert_eq!(
        snapshot,
        MachineSnapshot {
            current_weight_grams: 5.5,
            status: ProcessStatus::Grinding,
            active_motor: MotorId::Grinder,
            log: vec!["grinding beans".to_string()],
        }
    );

    tx.send(frame(8.0, "BLENDING", "BLENDER", None))
        .await
        .expect("send");
    tx.send(frame(9.0, "BLENDING", "BLENDER", Some(">>> blending")))
        .await
        .expect("send");
    next_snapshot(&mut rx).await;
    let snapshot = next_snapshot(&mut rx).await;
    assert_eq!(snapshot.current_weight_grams, 9.0);
    assert_eq!(
        snapshot.log,
        vec!["grinding beans".to_string(), ">>> blending".to_string()]
    );
    assert!(client.is_processing().await);
    assert_eq!(*telemetry.topics.lock().await, vec!["/topic/scale".to_string()]);

    client.stop().await;
}

#[tokio::test]
async fn submission_refused_while_machine_is_processing() {
    let (telemetry, tx) = ChannelTelemetrySource::new();
    let submitter = RecordingSubmitter::ok();
    let client = DashboardClient::new(submitter.clone(), telemetry);
    let mut rx = client.subscribe_events();
    client.start().await.expect("start");

    tx.send(frame(1.0, "DISPENSING", "A", Some("hopper A open")))
        .await
        .expect("send");
    next_snapshot(&mut rx).await;

    assert!(matches!(client.submit().await, Err(DashboardError::Busy)));
    assert!(matches!(
        client.edit_field(RecipeField::RatioA, "70").await,
        Err(DashboardError::FormLocked)
    ));
    assert!(submitter.requests.lock().await.is_empty());

    tx.send(frame(20.0, "COMPLETED", "NONE", Some("배출 완료")))
        .await
        .expect("send");
    next_snapshot(&mut rx).await;
    client.submit().await.expect("idle again");

    client.stop().await;
}

#[tokio::test]
async fn malformed_frame_does_not_stop_the_session() {
    let (telemetry, tx) = ChannelTelemetrySource::new();
    let client = DashboardClient::new(RecordingSubmitter::ok(), telemetry);
    let mut rx = client.subscribe_events();
    client.start().await.expect("start");

    tx.send(TransportSignal::Frame("{\"status\":".to_string()))
        .await
        .expect("send");
    let snapshot = next_snapshot(&mut rx).await;
    assert_eq!(snapshot.log, vec![MALFORMED_TELEMETRY_MESSAGE.to_string()]);

    tx.send(frame(2.0, "DISPENSING", "B", Some("hopper B open")))
        .await
        .expect("send");
    let snapshot = next_snapshot(&mut rx).await;
    assert_eq!(snapshot.active_motor, MotorId::HopperB);
    assert_eq!(snapshot.log.len(), 2);

    client.stop().await;
}

#[tokio::test]
async fn transport_gap_keeps_accumulated_log() {
    let (telemetry, tx) = ChannelTelemetrySource::new();
    let client = DashboardClient::new(RecordingSubmitter::ok(), telemetry);
    let mut rx = client.subscribe_events();
    client.start().await.expect("start");

    tx.send(TransportSignal::Connected).await.expect("send");
    tx.send(frame(3.0, "DISPENSING", "C", Some("hopper C open")))
        .await
        .expect("send");
    next_snapshot(&mut rx).await;

    tx.send(TransportSignal::Disconnected("broker restarted".to_string()))
        .await
        .expect("send");
    tx.send(TransportSignal::Connected).await.expect("send");
    tx.send(frame(4.0, "GRINDING", "GRINDER", Some("grinding")))
        .await
        .expect("send");
    let snapshot = next_snapshot(&mut rx).await;

    assert_eq!(
        snapshot.log,
        vec!["hopper C open".to_string(), "grinding".to_string()]
    );
    client.stop().await;
}

#[tokio::test]
async fn start_twice_is_rejected_and_stop_is_idempotent() {
    let (telemetry, _tx) = ChannelTelemetrySource::new();
    let client = DashboardClient::new(RecordingSubmitter::ok(), telemetry);

    client.start().await.expect("first start");
    assert!(client.start().await.is_err());

    client.stop().await;
    client.stop().await;
}

#[tokio::test]
async fn replacing_the_draft_publishes_it() {
    let (telemetry, _tx) = ChannelTelemetrySource::new();
    let client = DashboardClient::new(RecordingSubmitter::ok(), telemetry);
    let mut rx = client.subscribe_events();

    let draft = RecipeDraft {
        total_weight_grams: 30.0,
        ..RecipeDraft::default()
    };
    client.replace_draft(draft).await.expect("replace");

    match rx.recv().await.expect("event") {
        ClientEvent::DraftUpdated(published) => assert_eq!(published, draft),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(client.draft().await.total_weight_grams, 30.0);
}

#[tokio::test]
async fn every_accepted_submit_announces_a_new_run() {
    let (telemetry, _tx) = ChannelTelemetrySource::new();
    let client = DashboardClient::new(RecordingSubmitter::ok(), telemetry);
    let mut rx = client.subscribe_events();

    client.submit().await.expect("first run");
    client.submit().await.expect("second run");

    for _ in 0..2 {
        assert!(matches!(rx.recv().await.expect("event"), ClientEvent::RunStarted));
        match rx.recv().await.expect("event") {
            ClientEvent::SnapshotUpdated(snapshot) => {
                assert_eq!(snapshot.log, vec![START_MESSAGE.to_string()])
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn rejected_draft_does_not_announce_a_run() {
    let (telemetry, _tx) = ChannelTelemetrySource::new();
    let client = DashboardClient::new(RecordingSubmitter::ok(), telemetry);
    client
        .edit_field(RecipeField::RatioA, "10")
        .await
        .expect("editable");
    let mut rx = client.subscribe_events();

    client.submit().await.expect_err("ratios sum to 50");

    assert!(rx.try_recv().is_err());
}
