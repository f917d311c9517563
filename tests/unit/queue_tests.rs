//! Unit tests for `ResponseQueue`: ordering, draining, bounded waits,
//! end-of-stream reporting, and overflow policies.

use std::sync::Arc;
use std::time::Duration;

use scpi_stdio::queue::{Channel, OverflowPolicy, Pop, ResponseQueue, StreamEnd};

#[tokio::test]
async fn pops_in_arrival_order() {
    let queue = ResponseQueue::new(Channel::Primary);
    queue.push("first".into());
    queue.push("second".into());

    assert_eq!(
        queue.pop_timeout(Duration::from_millis(50)).await,
        Pop::Line("first".into())
    );
    assert_eq!(
        queue.pop_timeout(Duration::from_millis(50)).await,
        Pop::Line("second".into())
    );
    assert!(queue.is_empty());
}

#[tokio::test]
async fn empty_line_is_delivered_not_mistaken_for_timeout() {
    let queue = ResponseQueue::new(Channel::Primary);
    queue.push(String::new());

    assert_eq!(
        queue.pop_timeout(Duration::from_millis(50)).await,
        Pop::Line(String::new())
    );
}

#[tokio::test]
async fn times_out_when_nothing_arrives() {
    let queue = ResponseQueue::new(Channel::Diagnostic);
    let window = Duration::from_millis(200);

    let started = tokio::time::Instant::now();
    let result = queue.pop_timeout(window).await;
    let elapsed = started.elapsed();

    assert_eq!(result, Pop::TimedOut);
    assert!(elapsed >= window, "returned early: {elapsed:?}");
    assert!(
        elapsed < window + Duration::from_millis(300),
        "returned late: {elapsed:?}"
    );
}

#[tokio::test]
async fn waiting_pop_wakes_on_push() {
    let queue = Arc::new(ResponseQueue::new(Channel::Primary));
    let producer = Arc::clone(&queue);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        producer.push("PONG".into());
    });

    let result = queue.pop_timeout(Duration::from_secs(2)).await;
    assert_eq!(result, Pop::Line("PONG".into()));
}

#[tokio::test]
async fn queued_lines_come_before_end_of_stream() {
    let queue = ResponseQueue::new(Channel::Primary);
    queue.push("last words".into());
    queue.finish(StreamEnd::Eof);

    assert_eq!(
        queue.pop_timeout(Duration::from_millis(50)).await,
        Pop::Line("last words".into())
    );
    assert_eq!(
        queue.pop_timeout(Duration::from_millis(50)).await,
        Pop::Ended(StreamEnd::Eof)
    );
}

#[tokio::test]
async fn ended_queue_reports_immediately() {
    let queue = ResponseQueue::new(Channel::Primary);
    queue.finish(StreamEnd::Failed("boom".into()));

    let started = tokio::time::Instant::now();
    let result = queue.pop_timeout(Duration::from_secs(5)).await;

    assert_eq!(result, Pop::Ended(StreamEnd::Failed("boom".into())));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn waiting_pop_wakes_on_finish() {
    let queue = Arc::new(ResponseQueue::new(Channel::Diagnostic));
    let producer = Arc::clone(&queue);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        producer.finish(StreamEnd::Eof);
    });

    let result = queue.pop_timeout(Duration::from_secs(2)).await;
    assert_eq!(result, Pop::Ended(StreamEnd::Eof));
}

#[tokio::test]
async fn finish_wakes_every_waiting_pop() {
    let queue = Arc::new(ResponseQueue::new(Channel::Primary));
    let first = Arc::clone(&queue);
    let second = Arc::clone(&queue);

    let a = tokio::spawn(async move {
        let started = tokio::time::Instant::now();
        (first.pop_timeout(Duration::from_secs(3)).await, started.elapsed())
    });
    let b = tokio::spawn(async move {
        let started = tokio::time::Instant::now();
        (second.pop_timeout(Duration::from_secs(3)).await, started.elapsed())
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    queue.finish(StreamEnd::Eof);

    let (ra, ea) = a.await.expect("first waiter");
    let (rb, eb) = b.await.expect("second waiter");
    assert_eq!(ra, Pop::Ended(StreamEnd::Eof));
    assert_eq!(rb, Pop::Ended(StreamEnd::Eof));
    assert!(ea < Duration::from_secs(1), "first waited {ea:?}");
    assert!(eb < Duration::from_secs(1), "second waited {eb:?}");
}

#[test]
fn skipped_total_only_grows() {
    let queue = ResponseQueue::new(Channel::Primary);
    assert_eq!(queue.skipped(), 0);

    queue.record_skipped(2);
    queue.record_skipped(1);

    assert_eq!(queue.skipped(), 2);
}

#[test]
fn first_end_wins() {
    let queue = ResponseQueue::new(Channel::Primary);
    queue.finish(StreamEnd::Eof);
    queue.finish(StreamEnd::Stopped);

    assert_eq!(queue.end(), Some(StreamEnd::Eof));
}

#[test]
fn pushes_after_end_are_ignored() {
    let queue = ResponseQueue::new(Channel::Primary);
    queue.finish(StreamEnd::Stopped);
    queue.push("late".into());

    assert_eq!(queue.len(), 0);
}

#[test]
fn drain_returns_everything_in_order_and_empties() {
    let queue = ResponseQueue::new(Channel::Primary);
    for n in 0..5 {
        queue.push(format!("line {n}"));
    }
    assert_eq!(queue.len(), 5);

    let drained = queue.drain();

    assert_eq!(
        drained,
        vec!["line 0", "line 1", "line 2", "line 3", "line 4"]
    );
    assert_eq!(queue.len(), 0);
    assert!(queue.drain().is_empty());
}

#[test]
fn try_pop_does_not_wait() {
    let queue = ResponseQueue::new(Channel::Primary);
    assert_eq!(queue.try_pop(), None);

    queue.push("x".into());
    assert_eq!(queue.try_pop().as_deref(), Some("x"));
}

#[test]
fn drop_oldest_evicts_front() {
    let queue = ResponseQueue::bounded(Channel::Primary, 2, OverflowPolicy::DropOldest);
    queue.push("a".into());
    queue.push("b".into());
    queue.push("c".into());

    assert_eq!(queue.drain(), vec!["b", "c"]);
    assert_eq!(queue.dropped(), 1);
}

#[test]
fn drop_newest_rejects_incoming() {
    let queue = ResponseQueue::bounded(Channel::Primary, 2, OverflowPolicy::DropNewest);
    queue.push("a".into());
    queue.push("b".into());
    queue.push("c".into());

    assert_eq!(queue.drain(), vec!["a", "b"]);
    assert_eq!(queue.dropped(), 1);
}

#[test]
fn unbounded_queue_never_drops() {
    let queue = ResponseQueue::new(Channel::Diagnostic);
    for n in 0..10_000 {
        queue.push(n.to_string());
    }

    assert_eq!(queue.len(), 10_000);
    assert_eq!(queue.dropped(), 0);
}

#[test]
fn channel_display_names_the_stream() {
    assert_eq!(Channel::Primary.to_string(), "stdout");
    assert_eq!(Channel::Diagnostic.to_string(), "stderr");
}
