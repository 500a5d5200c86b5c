use super::*;

#[test]
fn allows_up_to_the_limit_then_blocks() {
    let limiter = RateLimiter::new();
    for _ in 0..5 {
        assert!(limiter.check("auth:1.2.3.4", 5, 60));
    }
    assert!(!limiter.check("auth:1.2.3.4", 5, 60));
}

#[test]
fn distinct_keys_do_not_share_a_window() {
    let limiter = RateLimiter::new();
    for _ in 0..5 {
        assert!(limiter.check("auth:1.2.3.4", 5, 60));
    }
    assert!(limiter.check("auth:5.6.7.8", 5, 60));
}

#[test]
fn retry_after_is_reported_when_blocked() {
    let limiter = RateLimiter::new();
    for _ in 0..2 {
        limiter.check("msg:session-1", 2, 60);
    }
    let info = limiter.check_with_info("msg:session-1", 2, 60);
    assert!(!info.allowed);
    assert!(info.retry_after_ms > 0);
}

#[test]
fn quota_levels_cross_soft_then_hard_threshold() {
    assert_eq!(QuotaGauges::check_level(79, 100, 0.8), QuotaLevel::Ok);
    assert_eq!(QuotaGauges::check_level(80, 100, 0.8), QuotaLevel::Soft);
    assert_eq!(QuotaGauges::check_level(100, 100, 0.8), QuotaLevel::Hard);
}

#[test]
fn concurrent_agent_gauge_tracks_connect_and_disconnect() {
    let gauges = QuotaGauges::new();
    assert_eq!(gauges.agent_connected("tenant-a"), 1);
    assert_eq!(gauges.agent_connected("tenant-a"), 2);
    gauges.agent_disconnected("tenant-a");
    assert_eq!(gauges.concurrent_agents("tenant-a"), 1);
}

#[test]
fn concurrent_agent_gauge_never_goes_negative() {
    let gauges = QuotaGauges::new();
    gauges.agent_disconnected("tenant-a");
    assert_eq!(gauges.concurrent_agents("tenant-a"), 0);
}
