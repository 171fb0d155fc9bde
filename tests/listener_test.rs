//! Notification channel and worker wake-up tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use claimq::engine::{Worker, WorkerConfig};
use claimq::error::Error;
use claimq::listener::{Notification, Subscription};
use claimq::model::{Message, MessageState};
use claimq::task::{DelayedTask, RecordingTask, Task};
use common::{
    body, enqueue_many, eventually, test_db, test_db_with_max, unique_channel, unique_name,
};
use tokio::sync::mpsc;

fn forwarding_handler() -> (
    impl Fn(&Notification) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<Notification>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |n: &Notification| {
        let _ = tx.send(n.clone());
    };
    (handler, rx)
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn enqueue_notifies_subscriber_with_message_id() {
    let db = test_db().await;
    let channel = unique_channel("notify");

    let (handler, mut rx) = forwarding_handler();
    let mut subscription = Subscription::subscribe(db.pool(), channel.clone(), handler)
        .await
        .unwrap();
    assert!(subscription.is_active());

    let message = Message::new(unique_name("notify"), body()).unwrap();
    db.enqueue(&message, Some(&channel)).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("notification within timeout")
        .expect("handler still alive");

    assert_eq!(received.channel(), channel.name());
    assert_eq!(received.message_id(), Some(message.id()));

    subscription.shutdown().await;
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn subscription_leaves_single_connection_pool_free_for_claims() {
    let db = test_db_with_max(1).await;
    let queue = unique_name("tinypool");
    let channel = unique_channel("tinypool");

    let (handler, mut rx) = forwarding_handler();
    let mut subscription = Subscription::subscribe(db.pool(), channel.clone(), handler)
        .await
        .unwrap();

    let message = Message::new(&queue, body()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), db.enqueue(&message, Some(&channel)))
        .await
        .expect("enqueue should get the pool's only connection")
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("notification within timeout")
        .expect("handler still alive");

    let task = RecordingTask::new();
    let processed = tokio::time::timeout(
        Duration::from_secs(5),
        db.process_oldest_task_in(&queue, &task),
    )
    .await
    .expect("claim should get the pool's only connection")
    .unwrap();
    assert_eq!(processed.map(|m| m.id()), Some(message.id()));

    subscription.shutdown().await;
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn shutdown_is_idempotent() {
    let db = test_db().await;
    let mut subscription =
        Subscription::subscribe(db.pool(), unique_channel("idem"), |_: &Notification| {})
            .await
            .unwrap();

    subscription.shutdown().await;
    assert!(!subscription.is_active());
    subscription.shutdown().await;
    assert!(!subscription.is_active());
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn failed_enqueue_publishes_nothing() {
    let db = test_db().await;
    let channel = unique_channel("nopublish");
    let message = Message::new(unique_name("nopublish"), body()).unwrap();
    db.enqueue(&message, None).await.unwrap();

    let (handler, mut rx) = forwarding_handler();
    let mut subscription = Subscription::subscribe(db.pool(), channel.clone(), handler)
        .await
        .unwrap();

    let err = db.enqueue(&message, Some(&channel)).await.unwrap_err();
    assert!(matches!(err, Error::Persistence(_)), "got {err:?}");

    let nothing = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
    assert!(nothing.is_err(), "rolled-back enqueue must not notify");

    subscription.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore] // Requires running Postgres
async fn worker_wakes_on_notification() {
    let db = Arc::new(test_db().await);
    let queue = unique_name("wake");
    let channel = unique_channel("wake");

    let worker = Worker::new(
        Arc::clone(&db),
        Arc::new(RecordingTask::new()),
        WorkerConfig {
            queue_name: Some(queue.clone()),
            channel: Some(channel.clone()),
            // Long enough that only the notification can explain a prompt claim.
            poll_interval: Duration::from_secs(60),
            task_timeout: None,
        },
    );
    let running = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    // Give the worker time to LISTEN and finish its initial drain.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let message = Message::new(&queue, body()).unwrap();
    db.enqueue(&message, Some(&channel)).await.unwrap();

    let watched = &worker;
    let woke = eventually(Duration::from_secs(10), move || async move {
        watched.processed_count() == 1
    })
    .await;
    assert!(woke, "worker did not process the notified message");
    assert_eq!(worker.task().last_processed().map(|m| m.id()), Some(message.id()));

    worker.shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn timed_out_attempt_leaves_message_claimable() {
    let db = Arc::new(test_db().await);
    let queue = unique_name("timeout");
    let message = enqueue_many(&db, &queue, 1).await.remove(0);

    let slow = Worker::new(
        Arc::clone(&db),
        Arc::new(DelayedTask::new(Duration::from_secs(2), RecordingTask::new())),
        WorkerConfig {
            queue_name: Some(queue.clone()),
            task_timeout: Some(Duration::from_millis(200)),
            ..WorkerConfig::default()
        },
    );

    let err = slow.run_once().await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "got {err:?}");
    assert_eq!(
        db.get_message(message.id()).await.unwrap().state(),
        MessageState::Created
    );

    // The dropped transaction releases the row lock once its connection is
    // cleaned up by the pool.
    let task = RecordingTask::new();
    let (db_ref, queue_ref, task_ref) = (db.as_ref(), queue.as_str(), &task);
    let reclaimed = eventually(Duration::from_secs(10), move || async move {
        matches!(
            db_ref.process_oldest_task_in(queue_ref, task_ref).await,
            Ok(Some(_))
        )
    })
    .await;
    assert!(reclaimed, "message never became claimable again");
    assert_eq!(task.last_processed().map(|m| m.id()), Some(message.id()));
}
