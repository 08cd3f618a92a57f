use courier_bus::{
    EventBus, EventBusConfig, Error, HandlerError, Message, ReplyError, ReplyFailure, WireValue,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Wait for the next value a callback pushed, failing the test after 5s
async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("channel closed")
}

fn bus() -> EventBus {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    EventBus::new(EventBusConfig::default())
}

#[tokio::test]
async fn request_reply_scenario() {
    let bus = bus();
    let server = bus.executor().unwrap();
    let client = bus.executor().unwrap();

    server
        .register_handler("test.echo", false, |msg| {
            assert_eq!(msg.body().get("k").and_then(WireValue::as_str), Some("v"));
            msg.reply(json!({ "ack": 1 }))?;
            Ok(())
        })
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .send_with_reply("test.echo", json!({ "k": "v" }), move |reply| {
            let _ = tx.send(reply);
        })
        .unwrap();

    let reply = next(&mut rx).await.unwrap();
    assert_eq!(reply.body().get("ack").and_then(WireValue::as_i64), Some(1));
    assert_eq!(reply.reply_address(), None);
}

#[tokio::test]
async fn request_future_resolves_with_reply() {
    let bus = bus();
    let server = bus.executor().unwrap();
    let client = bus.executor().unwrap();

    server
        .register_handler("math.double", false, |msg| {
            let n: i64 = msg.body_as()?;
            msg.reply(n * 2)?;
            Ok(())
        })
        .unwrap();

    let reply = client.request("math.double", 21i64, None).unwrap().await.unwrap();
    assert_eq!(reply.body_as::<i64>().unwrap(), 42);
}

#[tokio::test]
async fn reply_callback_fires_at_most_once() {
    let bus = bus();
    let server = bus.executor().unwrap();
    let client = bus.executor().unwrap();

    server
        .register_handler("twice", false, |msg| {
            msg.reply("first")?;
            msg.reply("second")?;
            Ok(())
        })
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let counter = calls.clone();
    client
        .send_with_reply("twice", "go", move |reply| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(reply);
        })
        .unwrap();

    let reply = next(&mut rx).await.unwrap();
    assert_eq!(reply.body().as_str(), Some("first"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn timeout_fires_once_and_not_early() {
    let bus = bus();
    let server = bus.executor().unwrap();
    let client = bus.executor().unwrap();

    let (held_tx, mut held_rx) = mpsc::unbounded_channel::<Message>();
    server
        .register_handler("silent", false, move |msg| {
            let _ = held_tx.send(msg);
            Ok(())
        })
        .unwrap();

    let timeout = Duration::from_millis(100);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let started = Instant::now();
    client
        .send_with_timeout("silent", "hello", timeout, move |reply| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(reply);
        })
        .unwrap();

    let err = next(&mut rx).await.unwrap_err();
    assert!(started.elapsed() >= timeout);
    assert_eq!(err.kind(), ReplyFailure::Timeout);

    // A reply after the timeout reaches nobody
    let held = next(&mut held_rx).await;
    held.reply("too late").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn default_reply_timeout_applies_when_omitted() {
    let bus = bus();
    bus.set_default_reply_timeout(Duration::from_millis(50));
    assert_eq!(bus.default_reply_timeout(), Duration::from_millis(50));

    let server = bus.executor().unwrap();
    let client = bus.executor().unwrap();
    server.register_handler("silent", false, |_| Ok(())).unwrap();

    let err = client.request("silent", 1, None).unwrap().await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn no_handlers_fails_immediately() {
    let bus = bus();
    let client = bus.executor().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let started = Instant::now();
    client
        .send_with_timeout("nowhere", "hello", Duration::from_secs(30), move |reply| {
            let _ = tx.send(reply);
        })
        .unwrap();

    let err: ReplyError = next(&mut rx).await.unwrap_err();
    assert_eq!(err.kind(), ReplyFailure::NoHandlers);
    assert_eq!(err.kind().as_int(), 1);
    assert!(started.elapsed() < Duration::from_secs(5));

    // The transient reply handler was cleaned up
    assert!(bus.registry().is_empty());
}

#[tokio::test]
async fn unregister_stops_delivery() {
    let bus = bus();
    let executor = bus.executor().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let first_tx = tx.clone();
    let first = executor
        .register_handler("news", false, move |_| {
            let _ = first_tx.send("first");
            Ok(())
        })
        .unwrap();
    executor
        .register_handler("news", false, move |_| {
            let _ = tx.send("second");
            Ok(())
        })
        .unwrap();

    executor.unregister_handler(&first).unwrap();
    assert!(matches!(
        executor.unregister_handler(&first),
        Err(Error::UnknownHandler(id)) if id == first
    ));

    for _ in 0..3 {
        executor.publish("news", "update").unwrap();
        executor.send("news", "update").unwrap();
    }
    for _ in 0..6 {
        assert_eq!(next(&mut rx).await, "second");
    }
}

#[tokio::test]
async fn unregister_skips_already_queued_deliveries() {
    let bus = bus();
    let executor = bus.executor().unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    let counter = ran.clone();
    let id = executor
        .register_handler("queued", false, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    // Nothing runs until this task yields, so the delivery is still queued
    executor.send("queued", "x").unwrap();
    executor.unregister_handler(&id).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    executor
        .execute(move || {
            let _ = tx.send(());
        })
        .unwrap();
    next(&mut rx).await;
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn three_deep_reply_chain() {
    let bus = bus();
    let server = bus.executor().unwrap();
    let client = bus.executor().unwrap();

    server
        .register_handler("chain", false, |msg| {
            assert_eq!(msg.body().as_i64(), Some(1));
            msg.reply_with_handler(2, |reply| {
                if let Ok(reply) = reply {
                    assert_eq!(reply.body().as_i64(), Some(3));
                    let _ = reply.reply(4);
                }
            })?;
            Ok(())
        })
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .send_with_reply("chain", 1, move |reply| {
            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            };
            assert_eq!(reply.body().as_i64(), Some(2));
            let _ = reply.reply_with_timeout(3, Duration::from_secs(5), move |last| {
                let _ = tx.send(last);
            });
        })
        .unwrap();

    let last = next(&mut rx).await.unwrap();
    assert_eq!(last.body().as_i64(), Some(4));
}

#[tokio::test]
async fn publish_reaches_every_handler() {
    let bus = bus();
    let executors = [bus.executor().unwrap(), bus.executor().unwrap()];
    let (tx, mut rx) = mpsc::unbounded_channel();

    for i in 0..10 {
        let tx = tx.clone();
        executors[i % 2]
            .register_handler("broadcast", false, move |msg| {
                let _ = tx.send((i, msg.body().as_str().map(str::to_owned)));
                Ok(())
            })
            .unwrap();
    }
    assert_eq!(bus.handler_count("broadcast"), 10);

    let publisher = bus.executor().unwrap();
    publisher.publish("broadcast", "hello").unwrap();

    let mut seen = Vec::new();
    for _ in 0..10 {
        let (i, body) = next(&mut rx).await;
        assert_eq!(body.as_deref(), Some("hello"));
        seen.push(i);
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn send_round_robins_over_handlers() {
    let bus = bus();
    let executor = bus.executor().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    for i in 0..3 {
        let tx = tx.clone();
        executor
            .register_handler("worker", false, move |_| {
                let _ = tx.send(i);
                Ok(())
            })
            .unwrap();
    }

    for _ in 0..6 {
        executor.send("worker", "job").unwrap();
    }
    let mut picks = Vec::new();
    for _ in 0..6 {
        picks.push(next(&mut rx).await);
    }
    assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
}

#[tokio::test]
async fn messages_arrive_in_send_order() {
    let bus = bus();
    let server = bus.executor().unwrap();
    let client = bus.executor().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    server
        .register_handler("ordered", false, move |msg| {
            let _ = tx.send(msg.body_as::<i64>()?);
            Ok(())
        })
        .unwrap();

    for i in 0..100i64 {
        client.send("ordered", i).unwrap();
    }
    for expected in 0..100i64 {
        assert_eq!(next(&mut rx).await, expected);
    }
}

#[tokio::test]
async fn recipient_failures_reach_the_sender() {
    let bus = bus();
    let server = bus.executor().unwrap();
    let client = bus.executor().unwrap();

    server
        .register_handler("fails.returned", false, |_| Err(HandlerError::new(42, "bad input")))
        .unwrap();
    server
        .register_handler("fails.explicit", false, |msg| {
            msg.fail(7, "nope")?;
            Ok(())
        })
        .unwrap();
    server
        .register_handler("fails.panics", false, |_| panic!("boom"))
        .unwrap();

    let err = client.request("fails.returned", 1, None).unwrap().await.unwrap_err();
    assert!(err.is_recipient_failure());
    assert_eq!(err.failure_code(), Some(42));
    assert_eq!(err.cause(), Some("bad input"));

    let err = client.request("fails.explicit", 1, None).unwrap().await.unwrap_err();
    assert_eq!(err.kind(), ReplyFailure::RecipientFailure);
    assert_eq!(err.failure_code(), Some(7));

    let err = client.request("fails.panics", 1, None).unwrap().await.unwrap_err();
    assert_eq!(err.failure_code(), Some(HandlerError::DEFAULT_CODE));
    assert!(err.cause().unwrap().contains("boom"));

    // The server executor survived the panic
    let (tx, mut rx) = mpsc::unbounded_channel();
    server
        .execute(move || {
            let _ = tx.send(());
        })
        .unwrap();
    next(&mut rx).await;
}

#[tokio::test]
async fn replies_may_be_null_and_uncorrelated_replies_are_ignored() {
    let bus = bus();
    let server = bus.executor().unwrap();
    let client = bus.executor().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    server
        .register_handler("nullable", false, move |msg| {
            let _ = tx.send(msg.reply_address().is_some());
            msg.reply(WireValue::Null)?;
            Ok(())
        })
        .unwrap();

    // Fire-and-forget: the handler's reply goes nowhere
    client.send("nullable", 1).unwrap();
    assert!(!next(&mut rx).await);

    let reply = client.request("nullable", 1, None).unwrap().await.unwrap();
    assert!(next(&mut rx).await);
    assert!(reply.body().is_null());
}

#[tokio::test]
async fn preconditions_are_synchronous_errors() {
    let bus = bus();
    let client = bus.executor().unwrap();

    assert!(matches!(client.send("", 1), Err(Error::MissingAddress)));
    assert!(matches!(client.send("a", WireValue::Null), Err(Error::MissingBody)));
    assert!(matches!(
        client.send_with_reply("", 1, |_| {}),
        Err(Error::MissingAddress)
    ));
    assert!(matches!(client.request("a", None::<i32>, None), Err(Error::MissingBody)));
}

#[tokio::test]
async fn closing_an_executor_tears_down_its_registrations() {
    let bus = bus();
    let server = bus.executor().unwrap();
    let client = bus.executor().unwrap();

    server.register_handler("svc", false, |_| Ok(())).unwrap();
    server.register_simple_handler(true, |_| Ok(())).unwrap();

    // Pending reply owned by the client, never answered
    let pending = client
        .request("svc", "hello", Some(Duration::from_secs(30)))
        .unwrap();
    assert_eq!(bus.registry().len(), 3);

    assert_eq!(client.close(), 1);
    let err = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.is_no_handlers());

    assert_eq!(server.close(), 2);
    assert_eq!(bus.handler_count("svc"), 0);
    assert!(bus.registry().is_empty());

    let other = bus.executor().unwrap();
    let err = other.request("svc", "hello", None).unwrap().await.unwrap_err();
    assert!(err.is_no_handlers());
}

#[tokio::test]
async fn local_only_handlers_are_not_advertised() {
    let bus = bus();
    let executor = bus.executor().unwrap();

    executor.register_handler("public", false, |_| Ok(())).unwrap();
    executor.register_handler("private", true, |_| Ok(())).unwrap();
    let inbox = executor.register_simple_handler(true, |_| Ok(())).unwrap();

    assert_eq!(bus.cluster_addresses(), vec!["public".to_string()]);
    assert!(bus.registry().addresses().contains(&inbox.to_string()));
}

#[tokio::test]
async fn simple_handler_is_reachable_by_its_id() {
    let bus = bus();
    let owner = bus.executor().unwrap();
    let other = bus.executor().unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let sink = received.clone();
    let id = owner
        .register_simple_handler(true, move |msg| {
            sink.lock().unwrap().push(msg.body().clone());
            let _ = tx.send(());
            Ok(())
        })
        .unwrap();

    other.send(id.as_str(), "direct").unwrap();
    next(&mut rx).await;
    assert_eq!(*received.lock().unwrap(), vec![WireValue::String("direct".into())]);
}
