//! End-to-end delivery scenarios for subscription sessions over a shared bus.

use std::sync::Arc;
use std::time::Duration;

use parley_events::{EventBus, Message, SessionHub, Subscription, Topic};
use tokio::time::{sleep, timeout};

const PULL_TIMEOUT: Duration = Duration::from_secs(1);
const PENDING_WINDOW: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Note {
    id: &'static str,
    content: &'static str,
}

const fn note(id: &'static str, content: &'static str) -> Note {
    Note { id, content }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn general_channel_walkthrough() {
    let bus = EventBus::new();
    let topic = Topic::from("chan:general");
    let session = Arc::new(Subscription::open(&bus, topic.clone()));

    let waiting = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.next().await })
    };
    sleep(PENDING_WINDOW).await;
    let _ = bus.publish(&topic, note("1", "hi"));
    let first = timeout(PULL_TIMEOUT, waiting)
        .await
        .expect("pending pull resolved")
        .expect("puller task");
    assert_eq!(first, Ok(Some(note("1", "hi"))));

    let _ = bus.publish(&topic, note("2", "a"));
    let _ = bus.publish(&topic, note("3", "b"));
    let _ = bus.publish(&topic, note("4", "c"));
    assert_eq!(session.next().await, Ok(Some(note("2", "a"))));
    assert_eq!(session.next().await, Ok(Some(note("3", "b"))));
    assert_eq!(session.next().await, Ok(Some(note("4", "c"))));

    assert!(session.close());
    assert_eq!(session.next().await, Ok(None));
}

#[tokio::test]
async fn events_published_before_open_are_not_replayed() {
    let bus = EventBus::new();
    let topic = Topic::for_channel("general");
    let _ = bus.publish(&topic, note("0", "early"));
    let _ = bus.publish(&topic, note("1", "still early"));

    let session = Subscription::open(&bus, topic.clone());
    assert_eq!(session.try_next(), None);
    let _ = bus.publish(&topic, note("2", "on time"));
    assert_eq!(session.next().await, Ok(Some(note("2", "on time"))));
}

#[tokio::test]
async fn sessions_on_one_topic_progress_independently() {
    let bus = EventBus::new();
    let topic = Topic::for_channel("general");
    let fast = Subscription::open(&bus, topic.clone());
    let slow = Subscription::open(&bus, topic.clone());

    for n in 0..100_u32 {
        let delivery = bus.publish(&topic, n);
        assert_eq!(delivery.notified, 2);
        assert_eq!(fast.next().await, Ok(Some(n)));
    }
    assert_eq!(fast.buffered(), 0);
    assert_eq!(slow.buffered(), 100);
    for n in 0..100_u32 {
        assert_eq!(slow.next().await, Ok(Some(n)));
    }

    drop(fast);
    assert_eq!(bus.publish(&topic, 100).notified, 1);
    assert_eq!(slow.next().await, Ok(Some(100)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publishers_and_consumer_lose_nothing() {
    const PER_PUBLISHER: u32 = 250;

    let bus = EventBus::new();
    let topic = Topic::for_channel("busy");
    let session = Subscription::open(&bus, topic.clone());

    let publishers: Vec<_> = (0..2_u32)
        .map(|lane| {
            let bus = bus.clone();
            let topic = topic.clone();
            tokio::spawn(async move {
                for seq in 0..PER_PUBLISHER {
                    let _ = bus.publish(&topic, (lane, seq));
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    let mut last_seen = [None::<u32>; 2];
    for _ in 0..(2 * PER_PUBLISHER) {
        let (lane, seq) = timeout(PULL_TIMEOUT, session.next())
            .await
            .expect("event arrives")
            .expect("single puller")
            .expect("session open");
        let slot = &mut last_seen[lane as usize];
        assert!(slot.is_none_or(|prev| prev + 1 == seq), "lane {lane} out of order at {seq}");
        *slot = Some(seq);
    }
    for publisher in publishers {
        publisher.await.expect("publisher task");
    }
    assert_eq!(last_seen, [Some(PER_PUBLISHER - 1); 2]);
    assert_eq!(session.buffered(), 0);
}

#[tokio::test]
async fn hub_shutdown_sweep_closes_message_sessions() {
    let hub = SessionHub::<Message>::new();
    let general = hub.open(Topic::for_channel("general"));
    let random = hub.open(Topic::for_channel("random"));

    let message = Message::new("m-1", "general", "ada", "hello");
    let delivery = hub.publish(&Topic::for_channel("general"), message.clone());
    assert_eq!(delivery.notified, 1);
    assert_eq!(general.next().await, Ok(Some(message)));

    assert_eq!(hub.close_all(), 2);
    assert_eq!(general.next().await, Ok(None));
    assert_eq!(random.next().await, Ok(None));
    assert_eq!(hub.bus().topic_count(), 0);
}
