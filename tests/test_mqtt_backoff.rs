use std::time::Duration;

use lumentree_bridge::mqtt::{reconnect_delay, ReconnectPolicy};

#[test]
fn delay_doubles_from_five_seconds() {
    assert_eq!(reconnect_delay(1), Duration::from_secs(5));
    assert_eq!(reconnect_delay(2), Duration::from_secs(10));
    assert_eq!(reconnect_delay(3), Duration::from_secs(20));
    assert_eq!(reconnect_delay(4), Duration::from_secs(40));
}

#[test]
fn delay_caps_at_sixty_seconds() {
    assert_eq!(reconnect_delay(5), Duration::from_secs(60));
    assert_eq!(reconnect_delay(10), Duration::from_secs(60));
    assert_eq!(reconnect_delay(100), Duration::from_secs(60));
}

#[test]
fn delay_never_decreases() {
    let mut previous = Duration::ZERO;
    for attempt in 1..=10 {
        let delay = reconnect_delay(attempt);
        assert!(delay >= previous);
        assert!(delay <= Duration::from_secs(60));
        previous = delay;
    }
}

#[test]
fn budget_allows_nine_retries_then_gives_up() {
    let mut policy = ReconnectPolicy::new();

    for _ in 0..9 {
        assert!(policy.next_delay().is_some());
    }

    // The tenth failed attempt spends the budget; there is no further
    // delay to wait out, the session stops here.
    assert_eq!(policy.next_delay(), None);
    assert_eq!(policy.attempts(), 10);
}

#[test]
fn budget_resets_on_successful_connect() {
    let mut policy = ReconnectPolicy::new();

    for _ in 0..5 {
        policy.next_delay();
    }

    policy.connected();
    assert_eq!(policy.attempts(), 0);
    assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
}
