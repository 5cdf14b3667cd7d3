use super::*;

#[tokio::test]
async fn test_publish_subscribe() {
    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();

    bus.publish(WorkflowEvent::ModeSelected {
        session_id: "s1".into(),
        mode: Mode::Task,
        confidence: 0.9,
        reasoning: "imperative request".into(),
    });

    let event = rx.recv().await.unwrap();
    assert_eq!(event.session_id(), "s1");
    match event {
        WorkflowEvent::ModeSelected { mode, .. } => assert_eq!(mode, Mode::Task),
        _ => panic!("unexpected event type"),
    }
}

#[tokio::test]
async fn test_multiple_subscribers() {
    let bus = EventBus::new(16);
    let mut rx1 = bus.subscribe();
    let mut rx2 = bus.subscribe();

    assert_eq!(bus.subscriber_count(), 2);

    let count = bus.publish(WorkflowEvent::WorkflowComplete {
        session_id: "s1".into(),
        completed: 2,
        total: 2,
        success_rate: 100.0,
        duration_ms: 42,
    });
    assert_eq!(count, 2);

    let e1 = rx1.recv().await.unwrap();
    let e2 = rx2.recv().await.unwrap();
    assert_eq!(e1.session_id(), "s1");
    assert_eq!(e2.session_id(), "s1");
}

#[test]
fn test_event_serialization() {
    let event = WorkflowEvent::ItemExecuted {
        session_id: "s1".into(),
        item_id: "1".parse().unwrap(),
        success: true,
        summary: "wrote file".into(),
    };
    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains("\"type\":\"mcp_item_executed\""));
    assert!(json.contains("\"success\":true"));
}

#[test]
fn test_no_subscribers_does_not_error() {
    let bus = EventBus::new(4);
    let count = bus.publish(WorkflowEvent::WorkflowError {
        session_id: "s1".into(),
        item_id: None,
        reason: "cancelled".into(),
    });
    assert_eq!(count, 0);
}
