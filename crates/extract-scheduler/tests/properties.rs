// Property checks for the recurrence resolver over generated specs and clocks.

use chrono::{DateTime, TimeZone, Utc};
use extract_core::{CronFields, IntervalUnit, RecurrenceSpec};
use extract_scheduler::{next_fire_time, validate, CronExpression};
use proptest::prelude::*;

// ─── Strategies ─────────────────────────────────────────────────────────────

fn arb_instant() -> impl Strategy<Value = DateTime<Utc>> {
    // 2000-01-01 .. 2090-01-01
    (946_684_800i64..3_786_825_600i64).prop_map(|s| Utc.timestamp_opt(s, 0).unwrap())
}

/// One field expression drawn from the grammar: `*`, `N`, `a-b`, `a/n`, `*/n`, lists.
fn arb_expr(lo: u32, hi: u32) -> impl Strategy<Value = String> {
    prop_oneof![
        Just("*".to_string()),
        (lo..=hi).prop_map(|v| v.to_string()),
        (lo..=hi, lo..=hi).prop_map(|(a, b)| format!("{}-{}", a.min(b), a.max(b))),
        (lo..=hi, 1..=hi.max(1)).prop_map(|(a, n)| format!("{a}/{n}")),
        (1..=hi.max(1)).prop_map(|n| format!("*/{n}")),
        prop::collection::vec(lo..=hi, 1..4).prop_map(|vs| {
            vs.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
        }),
    ]
}

fn arb_day() -> impl Strategy<Value = String> {
    prop_oneof![
        arb_expr(1, 28),
        Just("last".to_string()),
        Just("last fri".to_string()),
        Just("2nd mon".to_string()),
    ]
}

fn arb_cron() -> impl Strategy<Value = RecurrenceSpec> {
    (
        proptest::option::of(arb_expr(1, 12)),
        proptest::option::of(arb_day()),
        proptest::option::of(arb_expr(0, 6)),
        proptest::option::of(arb_expr(0, 23)),
        proptest::option::of(arb_expr(0, 59)),
        proptest::option::of(arb_expr(0, 59)),
    )
        .prop_map(|(month, day, weekday, hour, minute, second)| {
            RecurrenceSpec::Cron(CronFields {
                month,
                day,
                weekday,
                hour,
                minute,
                second,
                ..Default::default()
            })
        })
}

fn arb_unit() -> impl Strategy<Value = IntervalUnit> {
    prop::sample::select(vec![
        IntervalUnit::Week,
        IntervalUnit::Day,
        IntervalUnit::Hour,
        IntervalUnit::Minute,
        IntervalUnit::Second,
    ])
}

// ─── Properties ─────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn cron_next_fire_is_strictly_after_now_and_matches(
        spec in arb_cron(),
        now in arb_instant(),
        fired_before in any::<bool>(),
    ) {
        prop_assert!(validate(&spec).is_ok(), "generated spec rejected: {spec:?}");
        let last = fired_before.then_some(now);
        let next = next_fire_time(&spec, last, now).unwrap();

        if let (Some(next), RecurrenceSpec::Cron(fields)) = (next, &spec) {
            prop_assert!(next > now, "{next} is not after {now}");
            let expr = CronExpression::compile(fields).unwrap();
            prop_assert!(expr.matches_date(next.date_naive()), "{next} does not match {spec:?}");
        }
        prop_assert_eq!(next, next_fire_time(&spec, last, now).unwrap());
    }

    #[test]
    fn interval_next_fire_stays_inside_the_window(
        unit in arb_unit(),
        every in 1u32..=1_000,
        start in arb_instant(),
        last in proptest::option::of(arb_instant()),
        now in arb_instant(),
    ) {
        let spec = RecurrenceSpec::Interval { unit, every, start_date: start, end_date: None };
        if let Some(next) = next_fire_time(&spec, last, now).unwrap() {
            prop_assert!(next > now);
            prop_assert!(next >= start);
        }
    }

    #[test]
    fn any_interval_length_resolves_without_panicking(
        unit in arb_unit(),
        every in 1u32..=u32::MAX,
        now in arb_instant(),
    ) {
        let spec = RecurrenceSpec::Interval {
            unit,
            every,
            start_date: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
            end_date: None,
        };
        prop_assert!(validate(&spec).is_ok());
        let _ = next_fire_time(&spec, Some(now), now).unwrap();
        let _ = next_fire_time(&spec, None, now).unwrap();
    }
}
