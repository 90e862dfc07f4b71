use reqwest::Method;

use super::*;
use crate::http::{HttpRequest, HttpTransport, RequestBody};
use crate::test_helpers::{ScriptedTransport, response, transport_error};

async fn run(
    limiter: &RateLimiter,
    transport: &ScriptedTransport,
    path: &str,
) -> Result<HttpResponse, Error> {
    let key = BucketKey::new(path);
    let request = HttpRequest::new(Method::GET, path, RequestBody::Empty);
    let request = &request;
    limiter.execute(&key, move || transport.execute(request)).await
}

fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
    response(200, pairs, "").headers
}

// =============================================================================
// HEADER PARSING
// =============================================================================

#[test]
fn parses_all_rate_limit_headers() {
    let parsed = RateLimitHeaders::parse(&headers(&[
        ("X-RateLimit-Remaining", "3"),
        ("X-RateLimit-Reset-After", "1.5"),
        ("X-RateLimit-Global", "true"),
        ("Retry-After", "2"),
    ]));
    assert_eq!(
        parsed,
        RateLimitHeaders {
            remaining: Some(3),
            reset_after: Some(Duration::from_millis(1500)),
            global: true,
            retry_after: Some(Duration::from_secs(2)),
        }
    );
}

#[test]
fn missing_headers_parse_to_default() {
    assert_eq!(RateLimitHeaders::parse(&HeaderMap::new()), RateLimitHeaders::default());
}

#[test]
fn garbage_values_are_ignored() {
    let parsed = RateLimitHeaders::parse(&headers(&[
        ("X-RateLimit-Remaining", "lots"),
        ("Retry-After", "-4"),
        ("X-RateLimit-Global", "yes"),
    ]));
    assert_eq!(parsed, RateLimitHeaders::default());
}

#[test]
fn reset_epoch_is_used_when_reset_after_is_absent() {
    let now = UNIX_EPOCH + Duration::from_secs(1_000);
    let parsed = RateLimitHeaders::parse_at(&headers(&[("X-RateLimit-Reset", "1002.5")]), now);
    assert_eq!(parsed.reset_after, Some(Duration::from_millis(2500)));
}

#[test]
fn reset_epoch_in_the_past_means_no_wait() {
    let now = UNIX_EPOCH + Duration::from_secs(1_000);
    let parsed = RateLimitHeaders::parse_at(&headers(&[("X-RateLimit-Reset", "990")]), now);
    assert_eq!(parsed.reset_after, Some(Duration::ZERO));
}

#[test]
fn reset_after_wins_over_reset_epoch() {
    let now = UNIX_EPOCH + Duration::from_secs(1_000);
    let parsed = RateLimitHeaders::parse_at(
        &headers(&[("X-RateLimit-Reset", "1100"), ("X-RateLimit-Reset-After", "0.25")]),
        now,
    );
    assert_eq!(parsed.reset_after, Some(Duration::from_millis(250)));
}

// =============================================================================
// ADMISSION
// =============================================================================

#[tokio::test(start_paused = true)]
async fn same_bucket_requests_run_one_at_a_time() {
    let limiter = RateLimiter::new(1);
    let transport = ScriptedTransport::with_latency(vec![], Duration::from_millis(100));

    let (a, b) = tokio::join!(
        run(&limiter, &transport, "/channels/1"),
        run(&limiter, &transport, "/channels/1"),
    );
    assert!(a.is_ok() && b.is_ok());

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].started >= calls[0].finished);
}

#[tokio::test(start_paused = true)]
async fn different_buckets_do_not_wait_on_each_other() {
    let limiter = RateLimiter::new(1);
    let transport = ScriptedTransport::with_latency(vec![], Duration::from_millis(100));

    let _ = tokio::join!(
        run(&limiter, &transport, "/channels/1"),
        run(&limiter, &transport, "/channels/2"),
    );

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].started, calls[1].started);
}

#[tokio::test(start_paused = true)]
async fn exhausted_bucket_waits_for_reset() {
    let limiter = RateLimiter::new(1);
    let transport = ScriptedTransport::new(vec![Ok(response(
        200,
        &[("X-RateLimit-Remaining", "0"), ("X-RateLimit-Reset-After", "2")],
        "",
    ))]);

    run(&limiter, &transport, "/a").await.unwrap();
    run(&limiter, &transport, "/a").await.unwrap();

    let calls = transport.calls();
    assert!(calls[1].started - calls[0].finished >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn remaining_quota_admits_immediately() {
    let limiter = RateLimiter::new(1);
    let transport = ScriptedTransport::new(vec![Ok(response(
        200,
        &[("X-RateLimit-Remaining", "1"), ("X-RateLimit-Reset-After", "5")],
        "",
    ))]);

    run(&limiter, &transport, "/a").await.unwrap();
    run(&limiter, &transport, "/a").await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls[1].started, calls[0].finished);
}

// =============================================================================
// 429 HANDLING
// =============================================================================

#[tokio::test(start_paused = true)]
async fn single_429_is_retried_after_retry_after() {
    let limiter = RateLimiter::new(1);
    let transport = ScriptedTransport::new(vec![
        Ok(response(429, &[("Retry-After", "1")], "slow down")),
        Ok(response(200, &[], "ok")),
    ]);

    let result = run(&limiter, &transport, "/a").await.unwrap();
    assert_eq!(result.status, StatusCode::OK);
    assert_eq!(result.body, "ok");

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].started - calls[0].finished >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn second_429_is_returned_to_the_caller() {
    let limiter = RateLimiter::new(1);
    let transport = ScriptedTransport::new(vec![
        Ok(response(429, &[("Retry-After", "1")], "")),
        Ok(response(429, &[("Retry-After", "1")], "still limited")),
        Ok(response(200, &[], "never reached")),
    ]);

    let result = run(&limiter, &transport, "/a").await.unwrap();
    assert_eq!(result.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(result.body, "still limited");
    assert_eq!(transport.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn zero_retries_returns_first_429() {
    let limiter = RateLimiter::new(0);
    let transport = ScriptedTransport::new(vec![Ok(response(429, &[("Retry-After", "1")], ""))]);

    let result = run(&limiter, &transport, "/a").await.unwrap();
    assert_eq!(result.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn bare_429_backs_off_for_default_interval() {
    let limiter = RateLimiter::new(1);
    let transport = ScriptedTransport::new(vec![Ok(response(429, &[], ""))]);

    run(&limiter, &transport, "/a").await.unwrap();

    let calls = transport.calls();
    assert!(calls[1].started - calls[0].finished >= DEFAULT_RETRY_AFTER);
}

#[tokio::test(start_paused = true)]
async fn global_429_blocks_every_bucket() {
    let limiter = RateLimiter::new(0);
    let transport = ScriptedTransport::new(vec![Ok(response(
        429,
        &[("Retry-After", "3"), ("X-RateLimit-Global", "true")],
        "",
    ))]);

    run(&limiter, &transport, "/a").await.unwrap();
    assert!(limiter.is_globally_limited());

    run(&limiter, &transport, "/b").await.unwrap();
    let calls = transport.calls();
    assert!(calls[1].started - calls[0].finished >= Duration::from_secs(3));
    assert!(!limiter.is_globally_limited());
}

#[tokio::test(start_paused = true)]
async fn bucket_429_leaves_other_buckets_alone() {
    let limiter = RateLimiter::new(0);
    let transport = ScriptedTransport::new(vec![Ok(response(429, &[("Retry-After", "3")], ""))]);

    run(&limiter, &transport, "/a").await.unwrap();
    assert!(!limiter.is_globally_limited());

    run(&limiter, &transport, "/b").await.unwrap();
    let calls = transport.calls();
    assert_eq!(calls[1].started, calls[0].finished);
}

// =============================================================================
// TRANSPORT FAILURE
// =============================================================================

#[tokio::test(start_paused = true)]
async fn transport_error_releases_bucket_untouched() {
    let limiter = RateLimiter::new(1);
    let transport = ScriptedTransport::new(vec![Err(transport_error()), Ok(response(200, &[], ""))]);

    let err = run(&limiter, &transport, "/a").await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(transport.calls().len(), 1);

    let bucket = limiter.bucket(&BucketKey::new("/a"));
    let state = bucket.try_lock().expect("bucket released");
    assert_eq!(state.remaining, None);
    assert_eq!(state.reset_at, None);
    drop(state);

    run(&limiter, &transport, "/a").await.unwrap();
    let calls = transport.calls();
    assert_eq!(calls[1].started, calls[0].finished);
}

#[tokio::test(start_paused = true)]
async fn permit_record_updates_bucket_state() {
    let limiter = RateLimiter::new(1);
    let key = BucketKey::new("/a");
    let now = Instant::now();

    let mut permit = limiter.acquire(&key).await;
    assert_eq!(permit.key(), &key);
    permit.record_at(
        StatusCode::OK,
        &RateLimitHeaders {
            remaining: Some(0),
            reset_after: Some(Duration::from_secs(4)),
            ..RateLimitHeaders::default()
        },
        now,
    );
    drop(permit);

    let bucket = limiter.bucket(&key);
    let state = bucket.try_lock().unwrap();
    assert_eq!(state.blocked_until(now), Some(now + Duration::from_secs(4)));
    assert_eq!(state.blocked_until(now + Duration::from_secs(4)), None);
}
