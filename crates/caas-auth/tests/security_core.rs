//! End-to-end scenarios across the security core: login, validation,
//! rotation, theft containment, session security, and MFA, all running
//! against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use caas_auth::config::MfaConfig;
use caas_auth::prelude::*;
use caas_auth::{
    AnomalyConfig, DeviceInfo, GeoLocation, MemoryEventPublisher, RenewalSkipReason,
    ReuseDetector, SecurityEventType, Severity,
};

struct Harness {
    config: AuthConfig,
    kv: Arc<InMemoryKvStore>,
    issuer: Arc<TokenIssuer>,
    validator: Arc<TokenValidator>,
    revocation: Arc<RevocationService>,
    refresh: Arc<RefreshService>,
    sessions: Arc<SessionStore>,
    metrics: Arc<SessionMetrics>,
    events: Arc<MemoryEventPublisher>,
}

fn harness() -> Harness {
    let config = AuthConfig::default();
    config.validate().expect("default config must validate");

    let kv = Arc::new(InMemoryKvStore::new());
    let key_provider = Arc::new(KeyProvider::with_platform_key(
        SigningKey::generate_rsa().unwrap(),
        config.jwt.enable_tenant_keys,
    ));

    let events = Arc::new(MemoryEventPublisher::new());
    let revocation = Arc::new(RevocationService::new(
        RevocationStore::new(kv.clone(), config.revocation.invalid_before_retention),
        events.clone(),
    ));

    let issuer = Arc::new(TokenIssuer::new(Arc::clone(&key_provider), &config));
    let validator = Arc::new(
        TokenValidator::new(Arc::clone(&key_provider), &config)
            .with_revocation(Arc::clone(&revocation)),
    );

    let token_store = Arc::new(RefreshTokenStore::new(kv.clone()));
    let families = Arc::new(FamilyTracker::new(
        kv.clone(),
        config.revocation.invalid_before_retention,
    ));
    let reuse = ReuseDetector::new(
        Arc::clone(&token_store),
        Arc::clone(&families),
        Arc::clone(&revocation),
    );
    let refresh = Arc::new(RefreshService::new(
        Arc::clone(&issuer),
        Arc::clone(&validator),
        token_store,
        families,
        reuse,
        RotationPolicy::from_config(&config.rotation).unwrap(),
        config.jwt.refresh_token_ttl,
    ));

    let metrics = Arc::new(SessionMetrics::new());
    let sessions = Arc::new(SessionStore::new(
        kv.clone(),
        config.session.clone(),
        Arc::clone(&metrics),
    ));

    Harness {
        config,
        kv,
        issuer,
        validator,
        revocation,
        refresh,
        sessions,
        metrics,
        events,
    }
}

fn login_request(user_id: &str, session_id: &str) -> IssueRequest {
    IssueRequest {
        user_id: user_id.to_string(),
        tenant_id: "tenant-1".to_string(),
        session_id: session_id.to_string(),
        device_id: Some("device-1".to_string()),
        scopes: vec!["chat:read".to_string(), "chat:write".to_string()],
    }
}

fn new_session(user_id: &str, device_id: &str, ip: &str, country: &str) -> NewSession {
    NewSession {
        user_id: user_id.to_string(),
        tenant_id: "tenant-1".to_string(),
        device_id: device_id.to_string(),
        device_info: DeviceInfo {
            device_type: "web".to_string(),
            os: "linux".to_string(),
            browser: Some("firefox".to_string()),
            user_agent: "Mozilla/5.0 Firefox/128.0".to_string(),
        },
        ip_address: ip.to_string(),
        location: Some(GeoLocation {
            country: country.to_string(),
            city: None,
        }),
        mfa_verified: false,
    }
}

// ---------------------------------------------------------------------------
// Token issuance and revocation facts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn login_token_verifies_until_a_fact_applies() {
    let h = harness();
    let pair = h.refresh.login(&login_request("user-1", "session-1")).await.unwrap();

    // Fresh token verifies.
    let claims = h
        .validator
        .validate(&pair.tokens.access_token, ValidateOptions::default())
        .await
        .unwrap();
    assert_eq!(claims.user_id, "user-1");
    assert_eq!(claims.session_id, "session-1");

    // Flagging the session kills it with the session reason.
    h.revocation
        .revoke_session_tokens(
            "session-1",
            "user-1",
            h.config.jwt.access_token_ttl,
            "admin_terminate",
            serde_json::json!({}),
        )
        .await
        .unwrap();

    let err = h
        .validator
        .validate(&pair.tokens.access_token, ValidateOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "revoked");
    assert!(err.to_string().contains("session_terminated"));
}

#[tokio::test]
async fn user_revocation_spares_tokens_issued_afterwards() {
    let h = harness();
    let before = h.refresh.login(&login_request("user-1", "session-1")).await.unwrap();

    h.revocation
        .revoke_user_tokens("user-1", "password_change", serde_json::json!({}))
        .await
        .unwrap();

    // The pre-revocation token is dead.
    let err = h
        .validator
        .validate(&before.tokens.access_token, ValidateOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("user_tokens_revoked"));

    // Wait for the next whole second so iat >= cutoff.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let after = h.refresh.login(&login_request("user-1", "session-2")).await.unwrap();
    assert!(h
        .validator
        .validate(&after.tokens.access_token, ValidateOptions::default())
        .await
        .is_ok());
}

#[tokio::test]
async fn revocation_events_reach_the_log() {
    let h = harness();
    h.revocation
        .revoke_token(
            "jti-1",
            "user-1",
            Duration::from_secs(900),
            "user_logout",
            serde_json::json!({}),
        )
        .await
        .unwrap();
    h.revocation
        .revoke_tenant_tokens("tenant-1", "tenant_offboarded", serde_json::json!({}))
        .await
        .unwrap();

    let events = h.events.published();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type.as_str(), "token.revoked");
    assert_eq!(events[1].event_type.as_str(), "tenant.tokens.revoked");
}

// ---------------------------------------------------------------------------
// Rotation and theft containment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn replayed_refresh_token_kills_the_whole_family() {
    let h = harness();

    // Login (family F, token T0), rotate (T0 used, T1 issued).
    let t0 = h.refresh.login(&login_request("user-1", "session-1")).await.unwrap();
    let t1 = h.refresh.refresh(&t0.tokens.refresh_token).await.unwrap();

    // Replay T0: reuse detected, revoke_family containment.
    let err = h.refresh.refresh(&t0.tokens.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::ReuseDetected { .. }));

    // T1's derived access token now fails with the user-wide reason.
    let err = h
        .validator
        .validate(&t1.tokens.access_token, ValidateOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("user_tokens_revoked"));

    // And T1's refresh token is burned too.
    let err = h.refresh.refresh(&t1.tokens.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::ReuseDetected { .. }));
}

#[tokio::test]
async fn concurrent_rotations_have_exactly_one_winner() {
    let h = harness();
    let t0 = h.refresh.login(&login_request("user-1", "session-1")).await.unwrap();
    let raw = t0.tokens.refresh_token;

    let (a, b) = tokio::join!(h.refresh.refresh(&raw), h.refresh.refresh(&raw));
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, AuthError::ReuseDetected { .. })));
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn renewal_cooldown_and_threshold_hold() {
    let mut config = AuthConfig::default();
    config.session.ttl = Duration::from_secs(2);
    config.session.renewal_threshold = Duration::from_secs(3600);
    config.session.renewal_cooldown = Duration::from_secs(60);

    let metrics = Arc::new(SessionMetrics::new());
    let store = Arc::new(SessionStore::new(
        Arc::new(InMemoryKvStore::new()),
        config.session.clone(),
        metrics,
    ));
    let renewal = SessionRenewal::new(Arc::clone(&store), config.session.clone());

    let session = store
        .create(new_session("user-1", "d-1", "198.51.100.7", "DE"))
        .await
        .unwrap();

    // First renewal within threshold succeeds; second hits the cooldown.
    assert!(renewal.renew(&session.id).await.unwrap().renewed);
    let second = renewal.renew(&session.id).await.unwrap();
    assert!(!second.renewed);
    assert_eq!(second.reason, Some(RenewalSkipReason::CooldownActive));
}

#[tokio::test]
async fn cleanup_decrements_gauge_exactly_once() {
    let mut config = AuthConfig::default();
    config.session.ttl = Duration::from_millis(30);

    let metrics = Arc::new(SessionMetrics::new());
    let store = Arc::new(SessionStore::new(
        Arc::new(InMemoryKvStore::new()),
        config.session.clone(),
        Arc::clone(&metrics),
    ));

    store
        .create(new_session("user-1", "d-1", "198.51.100.7", "DE"))
        .await
        .unwrap();
    store
        .create(new_session("user-2", "d-2", "198.51.100.8", "DE"))
        .await
        .unwrap();
    assert_eq!(metrics.active_sessions(), 2);

    tokio::time::sleep(Duration::from_millis(60)).await;

    let cleanup = SessionCleanup::new(Arc::clone(&store), config.session.cleanup_interval);
    assert_eq!(cleanup.cleanup_once().await.unwrap(), 2);
    assert_eq!(metrics.active_sessions(), 0);

    // Idempotent from any instance: nothing more to sweep, gauge stays.
    assert_eq!(cleanup.cleanup_once().await.unwrap(), 0);
    assert_eq!(metrics.active_sessions(), 0);
}

#[tokio::test]
async fn impossible_travel_emits_exactly_one_critical_event() {
    let h = harness();

    // Session created from Singapore at t0.
    let prior = h
        .sessions
        .create(new_session("user-1", "d-1", "203.0.113.7", "SG"))
        .await
        .unwrap();

    // Same user from the US half an hour later (same device, new IP).
    tokio::time::sleep(Duration::from_millis(10)).await;
    let current = h
        .sessions
        .create(new_session("user-1", "d-1", "198.51.100.9", "US"))
        .await
        .unwrap();

    assert_eq!(h.metrics.active_sessions(), 2);

    let detector = AnomalyDetector::new(AnomalyConfig::default());
    let events = detector.detect(&current, &[prior]);

    let travel: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == SecurityEventType::ImpossibleTravel)
        .collect();
    assert_eq!(travel.len(), 1);
    assert_eq!(travel[0].severity, Severity::Critical);
}

#[tokio::test]
async fn hijack_terminates_session_and_token_dies_with_it() {
    let h = harness();
    let session = h
        .sessions
        .create(new_session("user-1", "d-1", "203.0.113.7", "DE"))
        .await
        .unwrap();
    let pair = h.refresh.login(&login_request("user-1", &session.id)).await.unwrap();

    // IP and user agent both changed mid-session.
    let detector = HijackDetector::new();
    let events = detector.inspect(&session, "198.51.100.9", "curl/8.5.0");
    assert_eq!(events.len(), 1);
    assert_eq!(detector.strictest_action(&events), SessionAction::Terminate);

    // The handler terminates the session and writes the revocation fact.
    h.sessions.terminate(&session.id).await.unwrap();
    h.revocation
        .revoke_session_tokens(
            &session.id,
            "user-1",
            h.config.jwt.access_token_ttl,
            "hijack_detected",
            serde_json::json!({}),
        )
        .await
        .unwrap();

    assert!(!h.sessions.get(&session.id).await.unwrap().unwrap().is_active);
    let err = h
        .validator
        .validate(&pair.tokens.access_token, ValidateOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("session_terminated"));
}

// ---------------------------------------------------------------------------
// Revocation store maintenance
// ---------------------------------------------------------------------------

#[tokio::test]
async fn revocation_cleanup_is_idempotent() {
    let h = harness();

    // A fact that lost its TTL (non-atomic write gone wrong).
    h.kv.put("revoked:stuck", "1", None).await.unwrap();

    assert_eq!(h.revocation.cleanup().await.unwrap(), 1);
    assert_eq!(h.revocation.cleanup().await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// MFA
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mfa_flow_with_backup_code_and_exhaustion() {
    let h = harness();
    let verifier = Arc::new(MultiMethodVerifier::new(h.kv.clone()));
    let codes = verifier
        .backup_codes()
        .generate_codes("user-1", 4)
        .await
        .unwrap();

    let mfa = MfaChallengeService::new(h.kv.clone(), verifier.clone(), MfaConfig::default());
    let available = verifier.available_methods("user-1").await.unwrap();
    let challenge = mfa
        .create_challenge("user-1", "session-1", available)
        .await
        .unwrap();
    assert_eq!(challenge.method, MfaMethod::BackupCode);

    // Five wrong codes exhaust the budget...
    for _ in 0..5 {
        let outcome = mfa
            .verify_challenge(&challenge.id, MfaMethod::BackupCode, "wrong-code")
            .await
            .unwrap();
        assert!(!outcome.success);
    }
    // ...the sixth reports the ceiling and the record is gone.
    let outcome = mfa
        .verify_challenge(&challenge.id, MfaMethod::BackupCode, &codes[0])
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("Maximum attempts exceeded"));
    assert!(mfa.get_challenge(&challenge.id).await.unwrap().is_none());

    // A fresh challenge with a valid code verifies and marks the session.
    let challenge = mfa
        .create_challenge("user-1", "session-1", vec![MfaMethod::BackupCode])
        .await
        .unwrap();
    let outcome = mfa
        .verify_challenge(&challenge.id, MfaMethod::BackupCode, &codes[1])
        .await
        .unwrap();
    assert!(outcome.success);
}

// ---------------------------------------------------------------------------
// Issuer sanity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn service_tokens_are_issuable() {
    let h = harness();
    let token = h.issuer.issue_service_token("search-indexer").unwrap();
    assert_eq!(token.split('.').count(), 3);
}
