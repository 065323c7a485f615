use arbor_types::{Clock, ManualClock, NowExpr, SystemClock};
use proptest::prelude::*;

// ── Clocks ────────────────────────────────────────────────────────

#[test]
fn manual_clock_moves_only_when_told() {
    let clock = ManualClock::new(1_000);
    assert_eq!(clock.now_millis(), 1_000);
    clock.advance(500);
    assert_eq!(clock.now_millis(), 1_500);
    clock.set(42);
    assert_eq!(clock.now_millis(), 42);
}

#[test]
fn system_clock_is_after_2020() {
    assert!(SystemClock.now_millis() > 1_577_836_800_000);
}

// ── NowExpr ───────────────────────────────────────────────────────

#[test]
fn plain_now() {
    let e = NowExpr::parse("now").unwrap();
    assert_eq!(e.offset_millis(), 0);
    assert_eq!(e.to_string(), "now");
}

#[test]
fn shifted_now() {
    assert_eq!(NowExpr::parse("now-5m").unwrap().offset_millis(), -300_000);
    assert_eq!(NowExpr::parse("now+1h").unwrap().offset_millis(), 3_600_000);
    assert_eq!(NowExpr::parse("now+2d").unwrap().offset_millis(), 172_800_000);
    assert_eq!(NowExpr::parse("now+10s").unwrap().offset_millis(), 10_000);
    assert_eq!(NowExpr::parse("now-250ms").unwrap().offset_millis(), -250);
}

#[test]
fn invalid_expressions() {
    assert!(NowExpr::parse("later").is_err());
    assert!(NowExpr::parse("now*3").is_err());
    assert!(NowExpr::parse("now+").is_err());
    assert!(NowExpr::parse("now+5y").is_err());
}

#[test]
fn detection() {
    assert!(NowExpr::is_now_expr("now"));
    assert!(NowExpr::is_now_expr("now-1d"));
    assert!(!NowExpr::is_now_expr("1700000000"));
}

#[test]
fn resolves_against_clock() {
    let clock = ManualClock::new(10_000);
    assert_eq!(NowExpr::parse("now-1s").unwrap().resolve(&clock), 9_000);
}

proptest! {
    #[test]
    fn display_parses_back(offset in -1_000_000_000i64..1_000_000_000) {
        let clock = ManualClock::new(0);
        let expr = NowExpr::parse(&format!("now{}{}ms", if offset < 0 { "-" } else { "+" }, offset.abs())).unwrap();
        let reparsed = NowExpr::parse(&expr.to_string()).unwrap();
        prop_assert_eq!(expr.resolve(&clock), reparsed.resolve(&clock));
    }
}
