//! Scaling tests for the broker with many sessions and publishers.
//!
//! Covers:
//! - Fan-out to hundreds of sessions
//! - Concurrent publishers with per-session ordering
//! - Subscribe/unsubscribe churn during publishing
//! - Drain of many sessions within the grace period

use book_catalog::{Book, BookId, Broker, BrokerConfig, Event, SessionState, BOOK_ADDED};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SESSION_COUNT: usize = 200;
const EVENT_COUNT: u64 = 500;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn make_event(publisher: u64, n: u64) -> Event {
    Event::book_added(Book {
        id: BookId(publisher * 1_000_000 + n),
        title: format!("p{}-{}", publisher, n),
        author: "Scaling".to_string(),
    })
}

/// Timing helper
struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    fn report_with_count(&self, count: usize) {
        let ms = self.start.elapsed().as_secs_f64() * 1000.0;
        println!(
            "  {} took {:.2}ms ({} items, {:.0} items/sec)",
            self.name,
            ms,
            count,
            if ms > 0.0 { count as f64 / (ms / 1000.0) } else { 0.0 }
        );
    }
}

#[test]
fn test_fan_out_to_many_sessions() {
    init_tracing();
    let broker = Broker::default();
    let sessions: Vec<_> = (0..SESSION_COUNT)
        .map(|_| broker.subscribe(BOOK_ADDED).unwrap())
        .collect();

    let timer = Timer::new("fan-out");
    for n in 0..EVENT_COUNT {
        assert_eq!(broker.publish(BOOK_ADDED, make_event(0, n)), SESSION_COUNT);
    }
    timer.report_with_count(SESSION_COUNT * EVENT_COUNT as usize);

    for session in &sessions {
        assert_eq!(session.queued(), EVENT_COUNT as usize);
        for n in 0..EVENT_COUNT {
            assert_eq!(session.try_recv().unwrap().payload.id, BookId(n));
        }
    }
    assert_eq!(
        broker.stats().enqueued,
        SESSION_COUNT as u64 * EVENT_COUNT
    );
}

#[test]
fn test_concurrent_publishers_keep_per_publisher_order() {
    init_tracing();
    let broker = Broker::default();
    let sessions: Vec<_> = (0..16)
        .map(|_| broker.subscribe(BOOK_ADDED).unwrap())
        .collect();

    let publishers: Vec<_> = (0..4u64)
        .map(|p| {
            let broker = broker.clone();
            thread::spawn(move || {
                for n in 0..EVENT_COUNT {
                    broker.publish(BOOK_ADDED, make_event(p, n));
                }
            })
        })
        .collect();
    for publisher in publishers {
        publisher.join().unwrap();
    }

    for session in &sessions {
        let mut last_seen: HashMap<u64, u64> = HashMap::new();
        let mut total = 0;
        while let Some(event) = session.try_recv() {
            let publisher = event.payload.id.0 / 1_000_000;
            let n = event.payload.id.0 % 1_000_000;
            if let Some(prev) = last_seen.insert(publisher, n) {
                assert!(n > prev, "publisher {} went backwards", publisher);
            }
            total += 1;
        }
        assert_eq!(total, 4 * EVENT_COUNT);
    }
}

#[test]
fn test_churn_while_publishing() {
    init_tracing();
    let broker = Broker::default();
    let publisher = {
        let broker = broker.clone();
        thread::spawn(move || {
            for n in 0..EVENT_COUNT {
                broker.publish(BOOK_ADDED, make_event(0, n));
            }
        })
    };

    for _ in 0..100 {
        let session = broker.subscribe(BOOK_ADDED).unwrap();
        broker.unsubscribe(session.id());
        broker.unsubscribe(session.id());
        while session.recv().is_some() {}
        assert_eq!(session.state(), SessionState::Closed);
    }
    publisher.join().unwrap();

    assert_eq!(broker.subscriber_count(BOOK_ADDED), 0);
    assert_eq!(broker.live_sessions(), 0);
}

#[test]
fn test_drain_many_sessions_within_grace() {
    init_tracing();
    let broker = Arc::new(
        Broker::new(BrokerConfig {
            drain_grace_ms: 2_000,
            ..Default::default()
        })
        .unwrap(),
    );
    let consumers: Vec<_> = (0..64)
        .map(|_| {
            let session = broker.subscribe(BOOK_ADDED).unwrap();
            thread::spawn(move || {
                let mut count = 0;
                while session.recv().is_some() {
                    count += 1;
                }
                count
            })
        })
        .collect();
    for n in 0..10 {
        broker.publish(BOOK_ADDED, make_event(0, n));
    }

    let timer = Timer::new("drain");
    let report = broker.drain();
    timer.report_with_count(64);

    assert_eq!(report.cancelled, 64);
    assert_eq!(report.closed, 64);
    assert_eq!(report.forced, 0);
    for consumer in consumers {
        assert_eq!(consumer.join().unwrap(), 10);
    }

    // Nothing issued after drain began is ever Active.
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(20) {
        assert!(broker.subscribe(BOOK_ADDED).is_err());
    }
}
