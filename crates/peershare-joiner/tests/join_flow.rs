//! Integration tests for the joiner against a scripted host.
//!
//! The host side here speaks the wire protocol by hand over the in-memory
//! transport, so each test controls exactly which messages the joiner sees
//! and in what order.

use std::sync::Arc;
use std::time::Duration;

use peershare_core::discovery::{DiscoveryConfig, DiscoveryCoordinator};
use peershare_core::protocol::{decode, encode, HandshakeMessage};
use peershare_core::transport::memory::MemoryNetwork;
use peershare_core::transport::{
    BoundEndpoint, CallEvent, ChannelEvent, DataConnection, Incoming, IncomingCall, MediaStream,
    Transport,
};
use async_trait::async_trait;
use peershare_joiner::{
    JoinAttempt, JoinError, JoinFailure, JoinPrompt, JoinRequest, ScriptedPrompt,
    StatusTrackerConfig,
};
use tokio_test::assert_ok;

const HOST: &str = "HOSTCODEHOSTCODE23";

/// Host side of one joiner: the call it placed and the data connection the
/// host opened back.
struct ScriptedHost {
    call: IncomingCall,
    data: DataConnection,
}

impl ScriptedHost {
    async fn accept(bound: &mut BoundEndpoint) -> Self {
        let call = match bound.incoming.recv().await {
            Some(Incoming::Call(call)) => call,
            other => panic!("expected a call, got {other:?}"),
        };
        let data = bound
            .endpoint
            .connect(call.call.remote_id())
            .await
            .expect("connect back to joiner");
        Self { call, data }
    }

    fn send(&self, msg: HandshakeMessage) {
        let text = encode(&msg).expect("encode");
        self.data.channel.send(&text).expect("send to joiner");
    }

    async fn recv(&mut self) -> HandshakeMessage {
        match self.data.events.recv().await {
            Some(ChannelEvent::Data(payload)) => decode(&payload).expect("decode"),
            other => panic!("expected a message, got {other:?}"),
        }
    }

    fn close(&self) {
        self.data.channel.close();
        self.call.call.close();
    }
}

/// A user who opens the PIN dialog and walks away.
struct UnansweredPrompt;

#[async_trait]
impl JoinPrompt for UnansweredPrompt {
    async fn request_pin(&self, _message: &str) -> Option<String> {
        std::future::pending().await
    }
}

async fn host_on(network: &MemoryNetwork) -> BoundEndpoint {
    network.bind(Some(HOST)).await.expect("bind host code")
}

fn attempt(network: &MemoryNetwork, prompt: Arc<ScriptedPrompt>) -> JoinAttempt {
    JoinAttempt::new(Arc::new(network.clone()), prompt)
}

#[tokio::test]
async fn test_public_join_succeeds_when_host_stream_arrives() {
    // Arrange
    let network = MemoryNetwork::new();
    let mut bound = host_on(&network).await;
    let screen = MediaStream::new("screen");
    let host_stream = screen.clone();
    let host = tokio::spawn(async move {
        let mut host = ScriptedHost::accept(&mut bound).await;
        host.send(HandshakeMessage::NameRequest);
        let name = host.recv().await;
        host.send(HandshakeMessage::ApprovalPending);
        host.send(HandshakeMessage::ApprovalApproved);
        host.call.call.answer(host_stream).expect("answer");
        (bound, host, name)
    });
    let prompt = Arc::new(ScriptedPrompt::default());

    // Act
    let admission = attempt(&network, Arc::clone(&prompt))
        .run(JoinRequest::new(HOST).with_name("Dana").with_privacy(false))
        .await;

    // Assert
    let admission = assert_ok!(admission);
    assert_eq!(admission.stream(), &screen);
    assert_eq!(admission.host(), HOST);
    assert!(admission.is_connected());
    let (_bound, host, name) = host.await.expect("host task");
    assert_eq!(
        name,
        HandshakeMessage::NameResponse {
            name: Some("Dana".into())
        }
    );
    assert_eq!(host.call.call.remote_id(), admission.peer_id());
    assert_eq!(prompt.pin_requests(), 0);
}

#[tokio::test]
async fn test_share_link_target_reaches_the_host() {
    // Arrange
    let network = MemoryNetwork::new();
    let mut bound = host_on(&network).await;
    let host = tokio::spawn(async move {
        let host = ScriptedHost::accept(&mut bound).await;
        host.call.call.answer(MediaStream::new("screen")).expect("answer");
        (bound, host)
    });

    // Act
    let result = attempt(&network, Arc::new(ScriptedPrompt::default()))
        .run(JoinRequest::new(format!("https://peershare.app/?join={HOST}&utm=x")).with_privacy(false))
        .await;

    // Assert
    assert_ok!(result);
    let _ = host.await;
}

#[tokio::test]
async fn test_wrong_pin_is_reported_as_incorrect_pin() {
    // Arrange
    let network = MemoryNetwork::new();
    let mut bound = host_on(&network).await;
    let host = tokio::spawn(async move {
        let mut host = ScriptedHost::accept(&mut bound).await;
        host.send(HandshakeMessage::PinRequest);
        let reply = host.recv().await;
        host.send(HandshakeMessage::PinValidated { success: false });
        host.close();
        (bound, reply)
    });
    let prompt = Arc::new(ScriptedPrompt::default());

    // Act
    let result = attempt(&network, Arc::clone(&prompt))
        .run(JoinRequest::new(HOST).with_pin("0000").with_privacy(true))
        .await;

    // Assert
    let err = result.expect_err("wrong PIN must fail");
    assert_eq!(err.failure(), Some(&JoinFailure::WrongPin));
    assert_eq!(err.to_string(), "Incorrect PIN. Connection rejected.");
    let (_bound, reply) = host.await.expect("host task");
    assert_eq!(reply, HandshakeMessage::PinResponse { pin: "0000".into() });
    assert_eq!(prompt.failures(), vec![JoinFailure::WrongPin]);
}

#[tokio::test]
async fn test_unexpected_pin_request_prompts_the_user() {
    // Arrange
    let network = MemoryNetwork::new();
    let mut bound = host_on(&network).await;
    let host = tokio::spawn(async move {
        let mut host = ScriptedHost::accept(&mut bound).await;
        host.send(HandshakeMessage::PinRequest);
        let reply = host.recv().await;
        host.send(HandshakeMessage::PinValidated { success: true });
        host.send(HandshakeMessage::NameRequest);
        let _name = host.recv().await;
        host.send(HandshakeMessage::ApprovalDenied { reason: None });
        (bound, reply)
    });
    let prompt = Arc::new(ScriptedPrompt::answering(Some("4242")));

    // Act
    let result = attempt(&network, Arc::clone(&prompt))
        .run(JoinRequest::new(HOST).with_privacy(false))
        .await;

    // Assert
    let err = result.expect_err("denied join must fail");
    assert_eq!(err.failure(), Some(&JoinFailure::Denied));
    assert_eq!(prompt.pin_requests(), 1);
    let (_bound, reply) = host.await.expect("host task");
    assert_eq!(reply, HandshakeMessage::PinResponse { pin: "4242".into() });
}

#[tokio::test]
async fn test_cancelled_prompt_sends_empty_pin_and_fails() {
    // Arrange
    let network = MemoryNetwork::new();
    let mut bound = host_on(&network).await;
    let host = tokio::spawn(async move {
        let mut host = ScriptedHost::accept(&mut bound).await;
        host.send(HandshakeMessage::PinRequest);
        let reply = host.recv().await;
        (bound, reply)
    });

    // Act
    let result = attempt(&network, Arc::new(ScriptedPrompt::answering(None)))
        .run(JoinRequest::new(HOST).with_privacy(false))
        .await;

    // Assert
    let err = result.expect_err("cancelled PIN must fail");
    assert_eq!(err.failure(), Some(&JoinFailure::PinRequired));
    let (_bound, reply) = host.await.expect("host task");
    assert_eq!(reply, HandshakeMessage::PinResponse { pin: String::new() });
}

#[tokio::test]
async fn test_known_private_session_without_pin_never_calls_host() {
    // Arrange
    let network = MemoryNetwork::new();
    let _bound = host_on(&network).await;
    let prompt = Arc::new(ScriptedPrompt::answering(None));

    // Act
    let result = attempt(&network, Arc::clone(&prompt))
        .run(JoinRequest::new(HOST).with_privacy(true))
        .await;

    // Assert
    let err = result.expect_err("missing PIN must fail");
    assert_eq!(err.failure(), Some(&JoinFailure::PinRequired));
    assert_eq!(prompt.pin_requests(), 1);
    assert_eq!(network.peer_count(), 1, "no joiner identity was bound");
}

#[tokio::test]
async fn test_session_ended_denial_is_distinguished() {
    // Arrange
    let network = MemoryNetwork::new();
    let mut bound = host_on(&network).await;
    let host = tokio::spawn(async move {
        let mut host = ScriptedHost::accept(&mut bound).await;
        host.send(HandshakeMessage::NameRequest);
        let _name = host.recv().await;
        host.send(HandshakeMessage::ApprovalPending);
        host.send(HandshakeMessage::session_ended());
        bound
    });

    // Act
    let result = attempt(&network, Arc::new(ScriptedPrompt::default()))
        .run(JoinRequest::new(HOST).with_privacy(false))
        .await;

    // Assert
    let err = result.expect_err("ended session must fail");
    assert_eq!(err.to_string(), "The session has ended.");
    let _ = host.await;
}

#[tokio::test]
async fn test_unknown_code_is_host_unreachable() {
    let network = MemoryNetwork::new();

    let result = attempt(&network, Arc::new(ScriptedPrompt::default()))
        .run(JoinRequest::new("NOBODYHOMENOBODY23").with_privacy(false))
        .await;

    let err = result.expect_err("nobody holds the code");
    assert_eq!(err.failure(), Some(&JoinFailure::HostUnreachable));
    assert_eq!(network.peer_count(), 0, "joiner identity was released");
}

#[tokio::test]
async fn test_blank_target_is_rejected_before_connecting() {
    let network = MemoryNetwork::new();

    let result = attempt(&network, Arc::new(ScriptedPrompt::default()))
        .run(JoinRequest::new("   "))
        .await;

    assert!(matches!(result, Err(JoinError::InvalidTarget(_))));
}

#[tokio::test]
async fn test_host_hanging_up_before_admission_is_connection_lost() {
    // Arrange
    let network = MemoryNetwork::new();
    let mut bound = host_on(&network).await;
    let host = tokio::spawn(async move {
        let host = ScriptedHost::accept(&mut bound).await;
        host.call.call.close();
        bound
    });

    // Act
    let result = attempt(&network, Arc::new(ScriptedPrompt::default()))
        .run(JoinRequest::new(HOST).with_privacy(false))
        .await;

    // Assert
    let err = result.expect_err("hang-up must fail");
    assert_eq!(err.failure(), Some(&JoinFailure::ConnectionLost));
    let _ = host.await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_host_times_out_after_warnings() {
    // Arrange
    let network = MemoryNetwork::new();
    let mut bound = host_on(&network).await;
    let host = tokio::spawn(async move {
        let host = ScriptedHost::accept(&mut bound).await;
        (bound, host)
    });
    let prompt = Arc::new(ScriptedPrompt::default());

    // Act
    let started = tokio::time::Instant::now();
    let result = attempt(&network, Arc::clone(&prompt))
        .run(JoinRequest::new(HOST).with_privacy(false))
        .await;

    // Assert
    let err = result.expect_err("silent host must time out");
    assert_eq!(err.failure(), Some(&JoinFailure::TimedOut));
    assert!(started.elapsed() >= Duration::from_secs(300));
    assert_eq!(prompt.warnings(), vec![30, 10]);
    let status = prompt.last_status().expect("status updates were shown");
    assert!(status.contains("Time remaining: 1s"), "{status}");
    let _ = host.await;
}

#[tokio::test(start_paused = true)]
async fn test_countdown_ends_attempt_while_pin_prompt_is_open() {
    // Arrange
    let network = MemoryNetwork::new();
    let mut bound = host_on(&network).await;
    let host = tokio::spawn(async move {
        let host = ScriptedHost::accept(&mut bound).await;
        host.send(HandshakeMessage::PinRequest);
        (bound, host)
    });
    let short = StatusTrackerConfig {
        timeout: Duration::from_secs(5),
        ..StatusTrackerConfig::default()
    };
    let attempt = JoinAttempt::new(Arc::new(network.clone()), Arc::new(UnansweredPrompt))
        .with_status_config(short);

    // Act
    let result = tokio::time::timeout(
        Duration::from_secs(600),
        attempt.run(JoinRequest::new(HOST).with_privacy(false)),
    )
    .await
    .expect("attempt must finish while the prompt is open");

    // Assert
    let err = result.expect_err("countdown must end the attempt");
    assert_eq!(err.failure(), Some(&JoinFailure::TimedOut));
    let (_bound, mut host) = host.await.expect("host task");
    assert!(matches!(
        host.call.events.recv().await,
        Some(CallEvent::Closed) | None
    ));
}

#[tokio::test(start_paused = true)]
async fn test_host_hang_up_ends_attempt_while_pin_prompt_is_open() {
    // Arrange
    let network = MemoryNetwork::new();
    let mut bound = host_on(&network).await;
    let host = tokio::spawn(async move {
        let host = ScriptedHost::accept(&mut bound).await;
        host.send(HandshakeMessage::PinRequest);
        // The host gives up on the PIN.
        tokio::time::sleep(Duration::from_secs(10)).await;
        host.close();
        bound
    });
    let attempt = JoinAttempt::new(Arc::new(network.clone()), Arc::new(UnansweredPrompt));

    // Act
    let started = tokio::time::Instant::now();
    let result = attempt.run(JoinRequest::new(HOST).with_privacy(false)).await;

    // Assert
    let err = result.expect_err("hang-up must end the attempt");
    assert_eq!(err.failure(), Some(&JoinFailure::ConnectionLost));
    assert!(started.elapsed() < Duration::from_secs(300));
    let _ = host.await;
}

#[tokio::test]
async fn test_dropping_admission_hangs_up_on_host() {
    // Arrange
    let network = MemoryNetwork::new();
    let mut bound = host_on(&network).await;
    let host = tokio::spawn(async move {
        let host = ScriptedHost::accept(&mut bound).await;
        host.call.call.answer(MediaStream::new("screen")).expect("answer");
        (bound, host)
    });
    let admission = attempt(&network, Arc::new(ScriptedPrompt::default()))
        .run(JoinRequest::new(HOST).with_privacy(false))
        .await
        .expect("join");
    let (_bound, mut host) = host.await.expect("host task");

    // Act
    admission.leave();

    // Assert
    let mut saw_close = false;
    while let Some(event) = host.call.events.recv().await {
        if event == CallEvent::Closed {
            saw_close = true;
            break;
        }
    }
    assert!(saw_close);
}

#[tokio::test]
async fn test_privacy_is_resolved_through_discovery() {
    // Arrange
    let network = MemoryNetwork::new();
    let transport: Arc<dyn Transport> = Arc::new(network.clone());
    let hosting_side = DiscoveryCoordinator::new(Arc::clone(&transport), DiscoveryConfig::default());
    assert!(hosting_side.ensure_host().await.expect("elect"));
    hosting_side
        .register_session(HOST, Some("Studio"), true)
        .await
        .expect("register");
    let joining_side = Arc::new(DiscoveryCoordinator::new(
        Arc::clone(&transport),
        DiscoveryConfig::default(),
    ));
    let prompt = Arc::new(ScriptedPrompt::answering(None));
    let attempt = JoinAttempt::new(transport, prompt.clone()).with_discovery(joining_side);

    // Act
    let private = attempt.resolve_privacy(HOST).await;
    let unknown = attempt.resolve_privacy("SOMEOTHERCODE23456").await;
    let result = attempt.run(JoinRequest::new(HOST)).await;

    // Assert
    assert!(private);
    assert!(!unknown);
    let err = result.expect_err("private session without PIN");
    assert_eq!(err.failure(), Some(&JoinFailure::PinRequired));
    assert_eq!(prompt.pin_requests(), 1);
}
