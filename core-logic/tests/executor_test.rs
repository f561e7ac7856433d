use engage_core::testing::MockRemote;
use engage_core::{
    ActionError, AuthState, Identity, RemoteClient, RemoteError, RetryPolicy, SafeRequestExecutor,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn setup(policy: RetryPolicy) -> (Arc<MockRemote>, SafeRequestExecutor) {
    let mock = Arc::new(MockRemote::new());
    let exec = SafeRequestExecutor::new(Arc::new(Identity::authenticated("alice")), mock.clone(), policy);
    (mock, exec)
}

fn transient() -> RemoteError {
    RemoteError::Generic("connection reset by peer".into())
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_then_success_sleeps_backoff_between_attempts_only() {
    let policy = RetryPolicy::default()
        .with_min_spacing(Duration::ZERO)
        .with_backoff(Duration::from_secs(5));
    let (mock, exec) = setup(policy);
    mock.fail_next("user_follow", vec![transient(), transient()]);

    let started = Instant::now();
    let client = mock.clone();
    let result = exec
        .execute("user_follow", &CancellationToken::new(), || client.user_follow("id_bob"))
        .await;
    let elapsed = started.elapsed();

    assert!(result.is_ok());
    assert_eq!(mock.calls("user_follow"), 3);
    assert!(elapsed >= Duration::from_secs(10), "slept {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(15), "slept {:?}", elapsed);
    assert_eq!(mock.followed(), vec!["bob"]);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_rate_limit_exhausts_attempts_in_safe_mode() {
    let (mock, exec) = setup(RetryPolicy::default());
    mock.fail_always("media_like", RemoteError::RateLimited("429 Too Many Requests".into()));

    let started = Instant::now();
    let client = mock.clone();
    let result = exec
        .execute("media_like", &CancellationToken::new(), || client.media_like("m1"))
        .await;
    let elapsed = started.elapsed();

    match result {
        Err(ActionError::MaxAttemptsExceeded { attempts, last, .. }) => {
            assert_eq!(attempts, 3);
            assert!(last.is_rate_limited());
        }
        other => panic!("expected MaxAttemptsExceeded, got {:?}", other),
    }
    assert_eq!(mock.calls("media_like"), 3);
    assert!(elapsed >= Duration::from_secs(180), "slept {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(185), "slept {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_detected_from_message() {
    let policy = RetryPolicy::default().with_max_attempts(2);
    let (mock, exec) = setup(policy);
    mock.fail_next(
        "direct_send",
        vec![RemoteError::Generic("Please wait a few minutes before you try again.".into())],
    );

    let started = Instant::now();
    let client = mock.clone();
    let result = exec
        .execute("direct_send", &CancellationToken::new(), || client.direct_send("id_bob", "hi"))
        .await;

    assert!(result.is_ok());
    assert!(started.elapsed() >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_without_safe_mode_is_fatal() {
    let (mock, exec) = setup(RetryPolicy::default().with_safe_mode(false));
    mock.fail_always("user_follow", transient());

    let client = mock.clone();
    let result = exec
        .execute("user_follow", &CancellationToken::new(), || client.user_follow("id_bob"))
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, ActionError::Fatal { attempts: 3, .. }));
    assert!(err.is_dispatch_fatal());
}

#[tokio::test(start_paused = true)]
async fn test_unresolved_challenge_marks_identity() {
    let mock = Arc::new(MockRemote::new().with_unresolvable_challenge(transient()));
    let identity = Arc::new(Identity::authenticated("alice"));
    let exec = SafeRequestExecutor::new(identity.clone(), mock.clone(), RetryPolicy::default());
    mock.fail_next("user_follow", vec![RemoteError::ChallengeRequired]);

    let client = mock.clone();
    let result = exec
        .execute("user_follow", &CancellationToken::new(), || client.user_follow("id_bob"))
        .await;

    assert!(matches!(result, Err(ActionError::ChallengeUnresolved { .. })));
    assert_eq!(identity.auth_state(), AuthState::Challenged);
    assert_eq!(mock.calls("user_follow"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_two_factor_is_not_retried() {
    let (mock, exec) = setup(RetryPolicy::default());
    mock.fail_always("user_info", RemoteError::TwoFactorRequired);

    let client = mock.clone();
    let result = exec
        .execute("user_info", &CancellationToken::new(), || client.user_info("id_bob"))
        .await;

    assert!(matches!(result, Err(ActionError::ChallengeUnresolved { .. })));
    assert_eq!(mock.calls("user_info"), 1);
    assert!(!exec.identity().is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_min_spacing_between_successes() {
    let policy = RetryPolicy::default().with_min_spacing(Duration::from_secs(2));
    let (mock, exec) = setup(policy);
    let token = CancellationToken::new();
    let client = mock.clone();

    let started = Instant::now();
    exec.execute("media_like", &token, || client.media_like("m1")).await.unwrap();
    exec.execute("media_like", &token, || client.media_like("m2")).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(mock.liked(), vec!["m1", "m2"]);
}
