//! 跨节点扇出协议的集成测试：两个路由器实例挂在同一条模拟总线
//! 上，验证恰好一次送达、回声抑制、重复丢弃和扇出降级。

mod support;

use std::sync::Arc;

use application::{ApplicationError, QuotaDenied, QuotaSettings};
use domain::{MessageKind, MessageStore, UserTier};
use support::*;
use tokio::sync::mpsc;

#[tokio::test]
async fn cross_node_delivery_is_exactly_once_per_connection() {
    let hub = BusHub::new();
    let store = MemStore::new();
    let ab = conversation("alice", "bob");
    store.insert_profile(profile_with("alice", vec![ab.clone()]));
    store.insert_profile(profile_with("bob", vec![ab.clone()]));

    let mut node1 = make_node(&hub, Arc::clone(&store), QuotaSettings::default());
    let mut node2 = make_node(&hub, Arc::clone(&store), QuotaSettings::default());

    // Alice 两台设备在节点 1，Bob 一台设备在节点 2
    let (alice_dev1_tx, mut alice_dev1) = mpsc::unbounded_channel();
    let (alice_dev2_tx, mut alice_dev2) = mpsc::unbounded_channel();
    let (bob_tx, mut bob) = mpsc::unbounded_channel();
    node1.router.connect(&user("alice"), alice_dev1_tx).await.unwrap();
    node1.router.connect(&user("alice"), alice_dev2_tx).await.unwrap();
    node2.router.connect(&user("bob"), bob_tx).await.unwrap();

    let envelope = node1
        .router
        .send(&user("alice"), ab.clone(), MessageKind::Text, "hi".to_string())
        .await
        .unwrap();

    // 两个节点都消费总线积压（节点 1 收到的是自己的回声）
    node1.pump().await;
    node2.pump().await;

    // 发送者的每台设备恰好一次（回显 + 多端同步，回声被抑制）
    assert_eq!(alice_dev1.try_recv().unwrap().message_id, envelope.message_id);
    assert!(alice_dev1.try_recv().is_err());
    assert_eq!(alice_dev2.try_recv().unwrap().message_id, envelope.message_id);
    assert!(alice_dev2.try_recv().is_err());

    // 远端参与者恰好一次
    let received = bob.try_recv().unwrap();
    assert_eq!(received.message_id, envelope.message_id);
    assert_eq!(received.conversation_id, ab);
    assert_eq!(received.sender_id, user("alice"));
    assert_eq!(received.content, "hi");
    assert!(bob.try_recv().is_err());
}

#[tokio::test]
async fn duplicate_bus_delivery_is_dropped() {
    let hub = BusHub::new();
    let store = MemStore::new();
    let ab = conversation("alice", "bob");
    store.insert_profile(profile_with("bob", vec![ab.clone()]));

    let node1 = make_node(&hub, Arc::clone(&store), QuotaSettings::default());
    let node2 = make_node(&hub, Arc::clone(&store), QuotaSettings::default());

    let (bob_tx, mut bob) = mpsc::unbounded_channel();
    node2.router.connect(&user("bob"), bob_tx).await.unwrap();

    let (alice_tx, _alice) = mpsc::unbounded_channel();
    node1.router.connect(&user("alice"), alice_tx).await.unwrap();
    let envelope = node1
        .router
        .send(&user("alice"), ab, MessageKind::Text, "hi".to_string())
        .await
        .unwrap();

    // 至少一次语义：同一信封从总线到达两次
    node2.router.handle_bus_envelope(envelope.clone()).await;
    node2.router.handle_bus_envelope(envelope).await;

    assert!(bob.try_recv().is_ok());
    assert!(bob.try_recv().is_err(), "duplicate must be dropped");
}

#[tokio::test]
async fn bus_failure_degrades_to_local_delivery() {
    let hub = BusHub::new();
    let store = MemStore::new();
    let ab = conversation("alice", "bob");
    store.insert_profile(profile_with("alice", vec![ab.clone()]));
    store.insert_profile(profile_with("bob", vec![ab.clone()]));

    let node1 = make_node(&hub, Arc::clone(&store), QuotaSettings::default());
    let mut node2 = make_node(&hub, Arc::clone(&store), QuotaSettings::default());
    node1
        .fail_publish
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let (alice_tx, mut alice) = mpsc::unbounded_channel();
    let (bob_tx, mut bob) = mpsc::unbounded_channel();
    node1.router.connect(&user("alice"), alice_tx).await.unwrap();
    node2.router.connect(&user("bob"), bob_tx).await.unwrap();

    // 发布重试耗尽也不是发送错误
    let result = node1
        .router
        .send(&user("alice"), ab.clone(), MessageKind::Text, "hi".to_string())
        .await;
    assert!(result.is_ok());

    node2.pump().await;

    // 本地投递完成，远端没有实时收到
    assert!(alice.try_recv().is_ok());
    assert!(bob.try_recv().is_err());

    // 但消息仍然落库，Bob 重连后可以从历史补到
    wait_for("message persisted despite bus failure", || {
        store.message_count() == 1
    })
    .await;
    let history = store.history(&ab, 20).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "hi");
}

#[tokio::test]
async fn offline_recipient_recovers_via_history() {
    let hub = BusHub::new();
    let store = MemStore::new();
    let ab = conversation("alice", "bob");

    let node1 = make_node(&hub, Arc::clone(&store), QuotaSettings::default());

    let (alice_tx, _alice) = mpsc::unbounded_channel();
    node1.router.connect(&user("alice"), alice_tx).await.unwrap();

    // Bob 完全离线，零在线接收者也要落历史
    let envelope = node1
        .router
        .send(&user("alice"), ab.clone(), MessageKind::Text, "hi".to_string())
        .await
        .unwrap();

    wait_for("offline message persisted", || store.message_count() == 1).await;
    let history = store.history(&ab, 20).await.unwrap();
    assert_eq!(history[0].message_id, envelope.message_id);

    // 首条消息把会话登记到了双方名下
    wait_for("conversation registered for both sides", || {
        let profiles = store.profiles.lock().unwrap();
        ["alice", "bob"].iter().all(|u| {
            profiles
                .get(&user(u))
                .map(|p| p.conversations.contains(&ab))
                .unwrap_or(false)
        })
    })
    .await;
}

#[tokio::test]
async fn history_orders_by_ingress_timestamp_across_nodes() {
    let hub = BusHub::new();
    let store = MemStore::new();
    let ab = conversation("alice", "bob");

    let node1 = make_node(&hub, Arc::clone(&store), QuotaSettings::default());
    let node2 = make_node(&hub, Arc::clone(&store), QuotaSettings::default());

    let (alice_tx, _alice) = mpsc::unbounded_channel();
    let (bob_tx, _bob) = mpsc::unbounded_channel();
    node1.router.connect(&user("alice"), alice_tx).await.unwrap();
    node2.router.connect(&user("bob"), bob_tx).await.unwrap();

    let first = node1
        .router
        .send(&user("alice"), ab.clone(), MessageKind::Text, "first".to_string())
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let second = node2
        .router
        .send(&user("bob"), ab.clone(), MessageKind::Text, "second".to_string())
        .await
        .unwrap();

    assert!(first.timestamp_micros < second.timestamp_micros);

    wait_for("both messages persisted", || store.message_count() == 2).await;
    let history = store.history(&ab, 20).await.unwrap();
    assert_eq!(
        history.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
        vec!["first", "second"]
    );
}

#[tokio::test]
async fn remote_envelope_without_local_participants_is_noop() {
    let hub = BusHub::new();
    let store = MemStore::new();
    let ab = conversation("alice", "bob");

    let node1 = make_node(&hub, Arc::clone(&store), QuotaSettings::default());
    let node2 = make_node(&hub, Arc::clone(&store), QuotaSettings::default());

    let (alice_tx, _alice) = mpsc::unbounded_channel();
    node1.router.connect(&user("alice"), alice_tx).await.unwrap();
    let envelope = node1
        .router
        .send(&user("alice"), ab, MessageKind::Text, "hi".to_string())
        .await
        .unwrap();

    // 节点 2 没有任何本地参与者，处理远端信封是正常空操作，
    // 也不会重复落库
    wait_for("origin persisted", || store.message_count() == 1).await;
    node2.router.handle_bus_envelope(envelope).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(store.message_count(), 1);
}

#[tokio::test]
async fn sender_must_be_participant() {
    let hub = BusHub::new();
    let store = MemStore::new();
    let node = make_node(&hub, store, QuotaSettings::default());

    let (carol_tx, _carol) = mpsc::unbounded_channel();
    node.router.connect(&user("carol"), carol_tx).await.unwrap();

    let result = node
        .router
        .send(
            &user("carol"),
            conversation("alice", "bob"),
            MessageKind::Text,
            "hi".to_string(),
        )
        .await;
    assert!(matches!(result, Err(ApplicationError::NotParticipant)));
}

#[tokio::test]
async fn quota_denial_reaches_only_the_sender() {
    let hub = BusHub::new();
    let store = MemStore::new();
    let ab = conversation("alice", "bob");

    let node = make_node(
        &hub,
        Arc::clone(&store),
        QuotaSettings {
            max_free_messages: 1,
            ..QuotaSettings::default()
        },
    );

    let (alice_tx, mut alice) = mpsc::unbounded_channel();
    let (bob_tx, mut bob) = mpsc::unbounded_channel();
    node.router.connect(&user("alice"), alice_tx).await.unwrap();
    node.router.connect(&user("bob"), bob_tx).await.unwrap();

    assert!(node
        .router
        .send(&user("alice"), ab.clone(), MessageKind::Text, "one".to_string())
        .await
        .is_ok());
    let denied = node
        .router
        .send(&user("alice"), ab.clone(), MessageKind::Text, "two".to_string())
        .await;
    assert!(matches!(
        denied,
        Err(ApplicationError::QuotaDenied(QuotaDenied::MessageCeiling { .. }))
    ));

    // 被拒的发送没有产生任何投递
    assert!(alice.try_recv().is_ok());
    assert!(alice.try_recv().is_err());
    assert!(bob.try_recv().is_ok());
    assert!(bob.try_recv().is_err());
}

#[tokio::test]
async fn profile_read_failure_seeds_deny_safe() {
    let hub = BusHub::new();
    let store = MemStore::new();
    let ab = conversation("alice", "bob");
    store
        .fail_profile_reads
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let node = make_node(&hub, Arc::clone(&store), QuotaSettings::default());
    let (alice_tx, _alice) = mpsc::unbounded_channel();
    node.router.connect(&user("alice"), alice_tx).await.unwrap();

    // 档案读不到时宁可拒绝服务
    let result = node
        .router
        .send(&user("alice"), ab, MessageKind::Text, "hi".to_string())
        .await;
    assert!(matches!(result, Err(ApplicationError::QuotaDenied(_))));
}

#[tokio::test]
async fn premium_sender_is_not_counted() {
    let hub = BusHub::new();
    let store = MemStore::new();
    let ab = conversation("alice", "bob");
    let mut profile = profile_with("alice", vec![ab.clone()]);
    profile.tier = UserTier::Premium;
    store.insert_profile(profile);

    let node = make_node(
        &hub,
        Arc::clone(&store),
        QuotaSettings {
            max_free_messages: 1,
            ..QuotaSettings::default()
        },
    );
    let (alice_tx, _alice) = mpsc::unbounded_channel();
    node.router.connect(&user("alice"), alice_tx).await.unwrap();

    for i in 0..5 {
        node.router
            .send(&user("alice"), ab.clone(), MessageKind::Text, format!("m{i}"))
            .await
            .unwrap();
    }

    wait_for("premium messages persisted", || store.message_count() == 5).await;
    assert_eq!(store.stored_count_for(&user("alice")), 0);
}
