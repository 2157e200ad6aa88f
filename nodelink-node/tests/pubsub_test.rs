// Tests for topic advertisement, subscription and local publishing
//
// These tests run nodes on a context wired to recording collaborators, so
// every delivery observed here went through the in-process path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nodelink_node::{Message, Node, NodeError};
use nodelink_test_utils::fixtures::messages::{Int32, StringMsg};
use nodelink_test_utils::{create_node_test_config, create_test_context, RecordedCall};
use tokio::time::timeout;

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn counting_subscriber(
    node: &Node,
    topic: &str,
    hits: &Arc<AtomicUsize>,
) -> nodelink_node::Result<()> {
    let hits = Arc::clone(hits);
    node.subscribe(topic, move |_: &str, _: &StringMsg| {
        hits.fetch_add(1, Ordering::SeqCst);
    })
}

/// INTENTION: N local subscribers each receive a publication exactly once,
/// subscribers of another topic receive nothing.
#[test]
fn test_publish_reaches_each_local_subscriber_once() {
    let test = create_test_context().unwrap();
    let publisher = Node::with_context(test.context.clone(), create_node_test_config());

    let subscribers: Vec<Node> = (0..3)
        .map(|_| Node::with_context(test.context.clone(), create_node_test_config()))
        .collect();
    let hits: Vec<Arc<AtomicUsize>> = subscribers.iter().map(|_| counter()).collect();
    for (node, hits) in subscribers.iter().zip(&hits) {
        counting_subscriber(node, "/chatter", hits).unwrap();
    }
    let other = counter();
    counting_subscriber(&subscribers[0], "/other", &other).unwrap();

    let chatter = publisher.advertise::<StringMsg>("/chatter").unwrap();
    let delivered = chatter.publish(&StringMsg::new("hello")).unwrap();

    assert_eq!(delivered, 3);
    for hits in &hits {
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
    assert_eq!(other.load(Ordering::SeqCst), 0);
    assert!(!test
        .transport_log
        .calls()
        .iter()
        .any(|call| matches!(call, RecordedCall::Publish(..))));
}

/// INTENTION: subscribing twice to one topic replaces the first callback.
#[test]
fn test_resubscribe_replaces_handler() {
    let test = create_test_context().unwrap();
    let node = Node::with_context(test.context.clone(), create_node_test_config());
    let first = counter();
    let second = counter();

    counting_subscriber(&node, "/chatter", &first).unwrap();
    counting_subscriber(&node, "/chatter", &second).unwrap();
    assert_eq!(node.subscribed_topics(), vec!["/chatter".to_string()]);

    node.advertise::<StringMsg>("/chatter").unwrap();
    assert_eq!(node.publish("/chatter", &StringMsg::new("once")).unwrap(), 1);

    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

/// INTENTION: unsubscribe and node drop only remove the owner's handlers.
#[test]
fn test_unsubscribe_and_drop_leave_other_nodes_intact() {
    let test = create_test_context().unwrap();
    let publisher = Node::with_context(test.context.clone(), create_node_test_config());
    let a = Node::with_context(test.context.clone(), create_node_test_config());
    let b = Node::with_context(test.context.clone(), create_node_test_config());
    let c = Node::with_context(test.context.clone(), create_node_test_config());
    let (hits_a, hits_b, hits_c) = (counter(), counter(), counter());
    counting_subscriber(&a, "/chatter", &hits_a).unwrap();
    counting_subscriber(&b, "/chatter", &hits_b).unwrap();
    counting_subscriber(&c, "/chatter", &hits_c).unwrap();
    let chatter = publisher.advertise::<StringMsg>("/chatter").unwrap();

    assert!(a.unsubscribe("/chatter").unwrap());
    assert!(!a.unsubscribe("/chatter").unwrap());
    assert_eq!(chatter.publish(&StringMsg::new("1")).unwrap(), 2);

    drop(b);
    assert_eq!(chatter.publish(&StringMsg::new("2")).unwrap(), 1);

    assert_eq!(hits_a.load(Ordering::SeqCst), 0);
    assert_eq!(hits_b.load(Ordering::SeqCst), 1);
    assert_eq!(hits_c.load(Ordering::SeqCst), 2);
    assert!(a.subscribed_topics().is_empty());
}

#[test]
fn test_publish_requires_matching_advertisement() {
    let test = create_test_context().unwrap();
    let node = Node::with_context(test.context.clone(), create_node_test_config());

    let err = node.publish("/chatter", &StringMsg::new("x")).unwrap_err();
    assert!(matches!(err, NodeError::TopicNotAdvertised(_)));

    node.advertise::<StringMsg>("/chatter").unwrap();
    let err = node.publish("/chatter", &Int32::new(1)).unwrap_err();
    assert!(matches!(err, NodeError::TypeMismatch { .. }));

    let err = node.advertise::<StringMsg>("/chatter").unwrap_err();
    assert!(matches!(err, NodeError::AlreadyAdvertised(_)));
}

#[test]
fn test_publisher_handle_invalid_after_unadvertise() {
    let test = create_test_context().unwrap();
    let node = Node::with_context(test.context.clone(), create_node_test_config());

    let chatter = node.advertise::<StringMsg>("/chatter").unwrap();
    assert!(chatter.is_valid());
    assert_eq!(chatter.topic(), "/chatter");
    assert_eq!(node.advertised_topics(), vec!["/chatter".to_string()]);

    assert!(node.unadvertise("/chatter").unwrap());
    assert!(!chatter.is_valid());
    assert!(matches!(
        chatter.publish(&StringMsg::new("late")),
        Err(NodeError::TopicNotAdvertised(_))
    ));
    assert!(!node.unadvertise("/chatter").unwrap());

    let calls = test.discovery_log.calls();
    assert!(calls
        .iter()
        .any(|call| matches!(call, RecordedCall::Advertise(ad) if ad.name == "/chatter")));
    assert!(calls
        .iter()
        .any(|call| matches!(call, RecordedCall::Unadvertise(_, name, _) if name == "/chatter")));
}

#[test]
fn test_dropping_node_invalidates_publisher() {
    let test = create_test_context().unwrap();
    let node = Node::with_context(test.context.clone(), create_node_test_config());
    let chatter = node.advertise::<StringMsg>("/chatter").unwrap();

    drop(node);

    assert!(!chatter.is_valid());
}

#[test]
fn test_invalid_names_are_rejected_before_any_change() {
    let test = create_test_context().unwrap();
    let node = Node::with_context(test.context.clone(), create_node_test_config());
    test.discovery_log.clear();

    for bad in ["", "/", "has space", "a//b", "bad~name"] {
        let err = node
            .subscribe(bad, |_: &str, _: &StringMsg| {})
            .unwrap_err();
        assert!(matches!(err, NodeError::NameInvalid(_)), "{bad:?}");
        assert!(node.advertise::<StringMsg>(bad).is_err());
    }

    assert!(test.context.subscriptions().is_empty());
    assert!(test.discovery_log.is_empty());
    assert!(node.advertised_topics().is_empty());
}

/// INTENTION: a subscriber of a different type is skipped, not miscast, and
/// a panicking subscriber does not keep others from receiving.
#[test]
fn test_faulty_subscribers_do_not_affect_others() {
    let test = create_test_context().unwrap();
    let node = Node::with_context(test.context.clone(), create_node_test_config());
    let typed = Node::with_context(test.context.clone(), create_node_test_config());
    let panicking = Node::with_context(test.context.clone(), create_node_test_config());
    let good = counter();
    let wrong_type = counter();

    counting_subscriber(&node, "/chatter", &good).unwrap();
    let wrong = Arc::clone(&wrong_type);
    typed
        .subscribe("/chatter", move |_: &str, _: &Int32| {
            wrong.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    panicking
        .subscribe("/chatter", |_: &str, _: &StringMsg| panic!("subscriber failed"))
        .unwrap();

    node.advertise::<StringMsg>("/chatter").unwrap();
    assert_eq!(node.publish("/chatter", &StringMsg::new("x")).unwrap(), 1);

    assert_eq!(good.load(Ordering::SeqCst), 1);
    assert_eq!(wrong_type.load(Ordering::SeqCst), 0);
}

/// INTENTION: bytes that do not decode abort only that delivery.
#[test]
fn test_inbound_decode_error_is_local_to_the_call() {
    let test = create_test_context().unwrap();
    let node = Node::with_context(test.context.clone(), create_node_test_config());
    let hits = counter();
    counting_subscriber(&node, "/chatter", &hits).unwrap();
    let msg_type = <StringMsg as Message>::type_name();

    let delivered = test
        .context
        .dispatch_message("/chatter", msg_type, &[0xff, 0xff, 0xff])
        .unwrap();
    assert_eq!(delivered, 0);

    let bytes = StringMsg::new("ok").encode().unwrap();
    assert_eq!(test.context.dispatch_message("/chatter", msg_type, &bytes).unwrap(), 1);
    assert_eq!(
        test.context
            .dispatch_message("/chatter", <Int32 as Message>::type_name(), &bytes)
            .unwrap(),
        0
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

/// INTENTION: a callback may call back into nodes on the same thread.
#[test]
fn test_subscriber_can_publish_from_callback() {
    let test = create_test_context().unwrap();
    let relay = Node::with_context(test.context.clone(), create_node_test_config());
    let sink = Node::with_context(test.context.clone(), create_node_test_config());
    let relayed = counter();

    let forward = relay.advertise::<StringMsg>("/relayed").unwrap();
    relay
        .subscribe("/input", move |_: &str, msg: &StringMsg| {
            forward.publish(msg).unwrap();
        })
        .unwrap();
    counting_subscriber(&sink, "/relayed", &relayed).unwrap();

    let input = sink.advertise::<StringMsg>("/input").unwrap();
    input.publish(&StringMsg::new("pass it on")).unwrap();

    assert_eq!(relayed.load(Ordering::SeqCst), 1);
}

/// INTENTION: subscribe and publish on disjoint topics from many threads
/// deliver everything without stalling.
#[test]
fn test_concurrent_subscribe_and_publish_on_disjoint_topics() {
    let test = create_test_context().unwrap();
    let started = Instant::now();

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let context = test.context.clone();
            thread::spawn(move || {
                let node = Node::with_context(context, create_node_test_config());
                let topic = format!("/worker/{i}");
                let hits = counter();
                counting_subscriber(&node, &topic, &hits).unwrap();
                let publisher = node.advertise::<StringMsg>(&topic).unwrap();
                for n in 0..200 {
                    assert_eq!(publisher.publish(&StringMsg::new(n.to_string())).unwrap(), 1);
                }
                hits.load(Ordering::SeqCst)
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), 200);
    }
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(test.context.subscriptions().is_empty());
}

#[tokio::test]
async fn test_interrupt_flag() {
    match timeout(Duration::from_secs(10), async {
        let test = create_test_context().unwrap();
        let node = Node::with_context(test.context.clone(), create_node_test_config());
        assert!(!node.interrupted());
        test.context.interrupt();
        assert!(node.interrupted());
    })
    .await
    {
        Ok(_) => (),
        Err(_) => panic!("Test timed out after 10 seconds"),
    }
}
