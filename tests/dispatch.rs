//! Dispatch pipeline integration tests

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    routing::put,
};
use tokio::net::TcpListener;
use whereis_gateway::dispatch::{DeliveryError, HttpPushNotifier, SmsResolver};
use whereis_gateway::{
    CommandCatalog, CommandDispatcher, Device, DeviceRepo, DispatchError, InvocationToken,
    PendingInvocations, PushNotifier,
};

mod common;
use common::{RecordingNotifier, create_test_device, setup_test_db};

/// Requests seen by the fake push endpoint as `(content-type, body)`
type Seen = Arc<Mutex<Vec<(String, String)>>>;

/// Serve a fake push endpoint answering every PUT with `status`
async fn push_endpoint(status: StatusCode) -> (String, Seen) {
    async fn receive(
        State((seen, status)): State<(Seen, StatusCode)>,
        headers: HeaderMap,
        body: Bytes,
    ) -> StatusCode {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = String::from_utf8_lossy(&body).into_owned();
        seen.lock().unwrap().push((content_type, body));
        status
    }

    let seen: Seen = Arc::default();
    let app = Router::new()
        .route("/push/{id}", put(receive))
        .with_state((seen.clone(), status));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/push/1"), seen)
}

fn device_at(endpoint: &str) -> Device {
    Device {
        id: 1,
        owner: "ann@example.com".to_string(),
        name: "phone".to_string(),
        endpoint: endpoint.to_string(),
        sms_pin_hash: None,
        latitude: 0.0,
        longitude: 0.0,
        updated_at: None,
    }
}

fn dispatcher(db: whereis_gateway::DbPool, notifier: Arc<RecordingNotifier>) -> Arc<CommandDispatcher> {
    Arc::new(CommandDispatcher::new(
        DeviceRepo::new(db),
        Arc::new(CommandCatalog::builtin()),
        Arc::new(PendingInvocations::new()),
        notifier,
    ))
}

#[tokio::test]
async fn test_http_push_sends_token_as_form() {
    let (endpoint, seen) = push_endpoint(StatusCode::OK).await;
    let notifier = HttpPushNotifier::new(Duration::from_secs(5)).unwrap();
    let token = InvocationToken::from(8_675_309);

    notifier.notify(&device_at(&endpoint), token).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].0.starts_with("application/x-www-form-urlencoded"));
    assert_eq!(seen[0].1, "version=8675309");
}

#[tokio::test]
async fn test_http_push_rejected_status() {
    let (endpoint, seen) = push_endpoint(StatusCode::GONE).await;
    let notifier = HttpPushNotifier::new(Duration::from_secs(5)).unwrap();

    let err = notifier
        .notify(&device_at(&endpoint), InvocationToken::from(1))
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::Status(StatusCode::GONE)));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_http_push_unreachable_endpoint() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let notifier = HttpPushNotifier::new(Duration::from_secs(5)).unwrap();
    let err = notifier
        .notify(&device_at(&format!("http://{addr}/push")), InvocationToken::from(1))
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::Transport(_)));
}

#[tokio::test]
async fn test_trigger_pushes_to_real_endpoint() {
    let (endpoint, seen) = push_endpoint(StatusCode::OK).await;
    let db = setup_test_db();
    let repo = DeviceRepo::new(db.clone());
    let device = repo
        .create(whereis_gateway::NewDevice {
            owner: "ann@example.com".to_string(),
            name: "phone".to_string(),
            endpoint,
            sms_pin: None,
        })
        .unwrap();
    repo.replace_commands(device.id, &[1]).unwrap();

    let dispatcher = CommandDispatcher::new(
        repo,
        Arc::new(CommandCatalog::builtin()),
        Arc::new(PendingInvocations::new()),
        Arc::new(HttpPushNotifier::new(Duration::from_secs(5)).unwrap()),
    );

    let token = dispatcher.trigger(&device, 1, None).await.unwrap();
    assert_eq!(seen.lock().unwrap()[0].1, format!("version={token}"));

    let context = dispatcher.retrieve(token).await.unwrap();
    assert_eq!(context.command_id, 1);
    assert!(context.arguments.is_empty());
}

#[tokio::test]
async fn test_sms_picks_device_by_pin() {
    let db = setup_test_db();
    let notifier = Arc::new(RecordingNotifier::default());
    let resolver = SmsResolver::new(dispatcher(db.clone(), notifier.clone()));

    create_test_device(&db, "ann@example.com", "laptop", Some("1111"), &[0]);
    let phone = create_test_device(&db, "ann@example.com", "phone", Some("2222"), &[0, 1]);
    create_test_device(&db, "ann@example.com", "tablet", None, &[0, 1]);

    let token = resolver
        .handle("  ann@example.com 2222 Ring \n")
        .await
        .unwrap();

    assert_eq!(notifier.sent(), vec![(phone.id, token)]);
}

#[tokio::test]
async fn test_sms_pin_scoped_to_identity() {
    let db = setup_test_db();
    let notifier = Arc::new(RecordingNotifier::default());
    let resolver = SmsResolver::new(dispatcher(db.clone(), notifier.clone()));

    create_test_device(&db, "bob@example.com", "phone", Some("2222"), &[0]);

    let result = resolver.handle("ann@example.com 2222 locate").await;
    assert!(matches!(result, Err(DispatchError::NoMatchingDevice)));
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn test_sms_command_must_be_linked() {
    let db = setup_test_db();
    let notifier = Arc::new(RecordingNotifier::default());
    let resolver = SmsResolver::new(dispatcher(db.clone(), notifier.clone()));

    create_test_device(&db, "ann@example.com", "phone", Some("2222"), &[0]);

    // "wipe" exists in the catalog but this device does not implement it
    for body in ["ann@example.com 2222 wipe", "ann@example.com 2222 selfdestruct"] {
        let result = resolver.handle(body).await;
        assert!(matches!(result, Err(DispatchError::UnknownCommand(_))), "{body}");
    }

    let result = resolver.handle("ann@example.com 2222").await;
    assert!(matches!(result, Err(DispatchError::MalformedMessage(_))));

    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn test_concurrent_triggers_get_distinct_tokens() {
    let db = setup_test_db();
    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = dispatcher(db.clone(), notifier.clone());
    let device = create_test_device(&db, "ann@example.com", "phone", None, &[0, 1, 2]);

    let triggers = (0..32).map(|i| {
        let dispatcher = dispatcher.clone();
        let device = device.clone();
        async move { dispatcher.trigger(&device, i % 3, None).await }
    });
    let tokens: Vec<InvocationToken> = futures::future::join_all(triggers)
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    let unique: HashSet<_> = tokens.iter().copied().collect();
    assert_eq!(unique.len(), tokens.len());
    assert_eq!(dispatcher.pending().len().await, 32);
    assert_eq!(notifier.sent().len(), 32);

    // Every token resolves to the command it was issued for
    for (i, token) in (0_i64..).zip(&tokens) {
        let context = dispatcher.retrieve(*token).await.unwrap();
        assert_eq!(context.command_id, i % 3);
    }
    assert!(dispatcher.pending().is_empty().await);
}
