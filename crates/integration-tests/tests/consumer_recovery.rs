//! Consumer lifecycle: startup failures, broker outages and shutdown

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{consumer, job_id, publisher, status, RunningConsumer, WAIT};
use workflow_mq_core::application::{Consumer, ConsumerConfig, ConsumerState, DeadLetterPolicy};
use workflow_mq_core::domain::{QueueDeclaration, ReceivedMessage, JOB_STATUS_QUEUE};
use workflow_mq_core::error::MqError;
use workflow_mq_core::port::handler::mocks::RecordingHandler;
use workflow_mq_core::port::{handler_fn, HandlerError, MessageHandler};
use workflow_mq_infra_memory::MemoryBroker;

async fn publish_statuses(broker: &MemoryBroker, ids: &[&str]) {
    let mut publisher = publisher(broker, 3);
    for id in ids {
        publisher.publish(&status(id), JOB_STATUS_QUEUE, None).await.unwrap();
    }
    publisher.close().await;
}

#[tokio::test]
async fn test_consumer_resumes_after_connection_loss() {
    let broker = MemoryBroker::new();
    publish_statuses(&broker, &["job-1", "job-2", "job-3"]).await;

    let handler = Arc::new(RecordingHandler::new());
    let mut running = RunningConsumer::spawn(
        consumer(&broker).bind(QueueDeclaration::job_status(), handler.clone()),
    );
    assert!(handler.wait_for(3, WAIT).await);
    running.wait_for_state(ConsumerState::Waiting).await;

    broker.kill_connections();
    publish_statuses(&broker, &["job-4", "job-5"]).await;

    assert!(handler.wait_for(5, WAIT).await);
    let stats = running.stop().await;

    // Acknowledged messages are not delivered again
    let received: Vec<String> = handler.handled().iter().map(job_id).collect();
    assert_eq!(received, vec!["job-1", "job-2", "job-3", "job-4", "job-5"]);
    assert!(stats.reconnects >= 1);
    assert_eq!(broker.queue_depth(JOB_STATUS_QUEUE), 0);
}

#[tokio::test]
async fn test_unacknowledged_message_is_redelivered_after_connection_loss() {
    let broker = MemoryBroker::new();
    publish_statuses(&broker, &["job-1", "job-2"]).await;

    let seen: Arc<Mutex<Vec<(String, bool)>>> = Arc::default();
    let killed = Arc::new(AtomicBool::new(false));
    let handler = {
        let broker = broker.clone();
        let seen = Arc::clone(&seen);
        let killed = Arc::clone(&killed);
        handler_fn(move |message: &ReceivedMessage| {
            seen.lock().unwrap().push((job_id(message), message.redelivered));
            // Drop the connection before the first message can be acked
            if !killed.swap(true, Ordering::SeqCst) {
                broker.kill_connections();
            }
            Ok(())
        })
    };

    let running =
        RunningConsumer::spawn(consumer(&broker).bind(QueueDeclaration::job_status(), handler));

    let deadline = tokio::time::Instant::now() + WAIT;
    while seen.lock().unwrap().len() < 3 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let stats = running.stop().await;

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            ("job-1".to_string(), false),
            ("job-1".to_string(), true),
            ("job-2".to_string(), false),
        ]
    );
    assert_eq!(stats.reconnects, 1);
    assert_eq!(broker.queue_depth(JOB_STATUS_QUEUE), 0);
    assert_eq!(broker.unacked_count(), 0);
}

#[tokio::test]
async fn test_consumer_survives_broker_restart() {
    let broker = MemoryBroker::new();
    let handler = Arc::new(RecordingHandler::new());
    let mut running = RunningConsumer::spawn(
        consumer(&broker).bind(QueueDeclaration::job_status(), handler.clone()),
    );
    running.wait_for_state(ConsumerState::Waiting).await;

    broker.restart();
    publish_statuses(&broker, &["after-restart"]).await;

    assert!(handler.wait_for(1, WAIT).await);
    let stats = running.stop().await;

    assert_eq!(job_id(&handler.handled()[0]), "after-restart");
    assert!(stats.reconnects >= 1);
}

#[tokio::test]
async fn test_consumer_waits_out_broker_outage() {
    let broker = MemoryBroker::new();
    let handler = Arc::new(RecordingHandler::new());
    let mut running = RunningConsumer::spawn(
        consumer(&broker).bind(QueueDeclaration::job_status(), handler.clone()),
    );
    running.wait_for_state(ConsumerState::Waiting).await;

    broker.set_online(false);
    running.wait_for_state(ConsumerState::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handler.calls(), 0);

    broker.set_online(true);
    publish_statuses(&broker, &["job-1"]).await;

    assert!(handler.wait_for(1, WAIT).await);
    let stats = running.stop().await;
    assert_eq!(stats.handled, 1);
    assert!(stats.reconnects >= 1);
}

#[tokio::test]
async fn test_startup_fails_when_broker_is_unreachable() {
    let broker = MemoryBroker::new();
    broker.set_online(false);
    let handler = Arc::new(RecordingHandler::new());

    let running = RunningConsumer::spawn(
        consumer(&broker).bind(QueueDeclaration::job_status(), handler.clone()),
    );
    let states = running.states.clone();
    let err = running.join().await.unwrap_err();

    assert!(matches!(err, MqError::BrokerUnavailable { attempts: 3, .. }));
    assert_eq!(broker.connect_attempts(), 3);
    assert_eq!(*states.borrow(), ConsumerState::Stopped);
}

#[tokio::test]
async fn test_invalid_configuration_fails_before_connecting() {
    let broker = MemoryBroker::new();

    let unbound = RunningConsumer::spawn(consumer(&broker));
    assert!(matches!(unbound.join().await, Err(MqError::Config(_))));

    let config = ConsumerConfig {
        dead_letter: DeadLetterPolicy::forward(JOB_STATUS_QUEUE),
        ..common::consumer_config()
    };
    let looping = RunningConsumer::spawn(
        Consumer::new(common::manager(&broker), config)
            .bind(QueueDeclaration::job_status(), Arc::new(RecordingHandler::new())),
    );
    assert!(matches!(looping.join().await, Err(MqError::Config(_))));

    let reserved = RunningConsumer::spawn(
        consumer(&broker).bind(
            QueueDeclaration::durable("amq.internal"),
            Arc::new(RecordingHandler::new()),
        ),
    );
    assert!(reserved.join().await.unwrap_err().is_config());

    assert_eq!(broker.connect_attempts(), 0);
}

#[tokio::test]
async fn test_shutdown_while_idle_closes_connection() {
    let broker = MemoryBroker::new();
    let mut running = RunningConsumer::spawn(
        consumer(&broker).bind(QueueDeclaration::job_status(), Arc::new(RecordingHandler::new())),
    );
    running.wait_for_state(ConsumerState::Waiting).await;
    assert_eq!(broker.open_connections(), 1);

    let states = running.states.clone();
    let stats = running.stop().await;

    assert_eq!(stats.handled, 0);
    assert_eq!(broker.open_connections(), 0);
    assert_eq!(*states.borrow(), ConsumerState::Stopped);
}

#[tokio::test]
async fn test_shutdown_during_outage_stops_reconnecting() {
    let broker = MemoryBroker::new();
    let mut running = RunningConsumer::spawn(
        consumer(&broker).bind(QueueDeclaration::job_status(), Arc::new(RecordingHandler::new())),
    );
    running.wait_for_state(ConsumerState::Waiting).await;

    broker.set_online(false);
    running.wait_for_state(ConsumerState::Disconnected).await;
    running.stop().await;

    let attempts = broker.connect_attempts();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.connect_attempts(), attempts);
}

struct SlowHandler {
    delay: Duration,
    finished: AtomicBool,
}

#[async_trait]
impl MessageHandler for SlowHandler {
    async fn handle(&self, _message: &ReceivedMessage) -> Result<(), HandlerError> {
        tokio::time::sleep(self.delay).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_shutdown_lets_in_flight_handler_finish() {
    let broker = MemoryBroker::new();
    publish_statuses(&broker, &["job-1"]).await;

    let handler = Arc::new(SlowHandler {
        delay: Duration::from_millis(200),
        finished: AtomicBool::new(false),
    });
    let mut running = RunningConsumer::spawn(
        consumer(&broker).bind(QueueDeclaration::job_status(), handler.clone()),
    );
    running.wait_for_state(ConsumerState::Dispatching).await;

    let stats = running.stop().await;

    assert!(handler.finished.load(Ordering::SeqCst));
    assert_eq!(stats.handled, 1);
    assert_eq!(broker.queue_depth(JOB_STATUS_QUEUE), 0);
    assert_eq!(broker.unacked_count(), 0);
}
