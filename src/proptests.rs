use std::rc::Rc;

use proptest::prelude::*;
use proptest::test_runner::TestCaseResult;

use crate::{EventHandle, EventScheduler, ManualClock, ScheduledEvent, TimeSource};

#[derive(Debug, Clone)]
enum Op {
    Insert {
        interval: f64,
        offset_frac: f64,
        repeat_limit: u32,
    },
    Remove(usize),
    Add(usize),
    Dispose(usize),
    Advance(f64),
    Clear,
}

const MAX_OPS: usize = 64;

fn interval_strategy() -> impl Strategy<Value = f64> {
    // Zero exercises the inert path; the rest mix shared and coprime periods.
    prop_oneof![
        Just(0.0),
        Just(0.25),
        Just(0.5),
        Just(1.0),
        Just(1.5),
        Just(3.0),
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (interval_strategy(), 0.0f64..1.0, 0u32..4).prop_map(
            |(interval, offset_frac, repeat_limit)| Op::Insert {
                interval,
                offset_frac,
                repeat_limit,
            }
        ),
        1 => any::<usize>().prop_map(Op::Remove),
        1 => any::<usize>().prop_map(Op::Add),
        1 => any::<usize>().prop_map(Op::Dispose),
        4 => (0.0f64..4.0).prop_map(Op::Advance),
        1 => Just(Op::Clear),
    ]
}

fn check_list(s: &EventScheduler<u64>) -> TestCaseResult {
    let times: Vec<f64> = s
        .iter()
        .map(|(h, _)| s.next_fire_time(h).unwrap())
        .collect();

    prop_assert_eq!(times.len(), s.len());
    prop_assert!(
        times.windows(2).all(|w| w[0] <= w[1]),
        "list not sorted: {:?}",
        times
    );
    prop_assert!(times.iter().all(|t| t.is_finite()));
    prop_assert!(s.iter().all(|(_, ev)| !ev.is_complete()));
    prop_assert_eq!(s.peek_next_fire(), times.first().copied());
    Ok(())
}

fn run_ops(ops: Vec<Op>) -> TestCaseResult {
    let clock = Rc::new(ManualClock::new());
    let mut s: EventScheduler<u64> = EventScheduler::new(clock.clone());
    let mut handles: Vec<EventHandle> = Vec::new();
    let mut total_fired = 0u64;

    for op in ops {
        match op {
            Op::Insert {
                interval,
                offset_frac,
                repeat_limit,
            } => {
                let event = ScheduledEvent::new(interval, |_, _, fired: &mut u64| *fired += 1)
                    .with_offset(interval * offset_frac)
                    .with_repeat_limit(repeat_limit);
                let (h, _) = s.insert(event);
                handles.push(h);
            }
            Op::Remove(i) if !handles.is_empty() => {
                let h = handles[i % handles.len()];
                let was_linked = s.contains(h);
                prop_assert_eq!(s.remove(h), was_linked);
                prop_assert!(!s.contains(h));
            }
            Op::Add(i) if !handles.is_empty() => {
                let h = handles[i % handles.len()];
                let before = s.len();
                match s.add(h) {
                    Ok(_) => prop_assert!(s.len() == before || s.len() == before + 1),
                    Err(_) => prop_assert!(s.get(h).is_none()),
                }
            }
            Op::Dispose(i) if !handles.is_empty() => {
                let h = handles[i % handles.len()];
                s.dispose(h);
                prop_assert!(s.get(h).is_none());
            }
            Op::Advance(dt) => {
                clock.advance(dt);
                let mut fired = 0u64;
                let reported = s.update(&mut fired);
                prop_assert_eq!(reported as u64, fired);
                total_fired += fired;

                // Nothing left due after a tick
                if let Some(next) = s.peek_next_fire() {
                    prop_assert!(!(clock.total() > next));
                }
            }
            Op::Clear => {
                s.clear();
                prop_assert!(s.is_empty());
            }
            _ => {}
        }

        check_list(&s)?;
    }

    let counted: u64 = handles
        .iter()
        .filter_map(|&h| s.get(h))
        .map(|ev| ev.fired_count() as u64)
        .sum();
    prop_assert!(counted <= total_fired);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_list_stays_sorted(ops in proptest::collection::vec(op_strategy(), 1..MAX_OPS)) {
        run_ops(ops)?;
    }

    #[test]
    fn prop_catch_up_matches_grid(
        interval in prop_oneof![Just(0.25f64), Just(0.5), Just(1.0), Just(2.0)],
        offset_frac in 0.0f64..1.0,
        start in 0.0f64..10.0,
        elapsed in 0.0f64..20.0,
    ) {
        let clock = Rc::new(ManualClock::starting_at(start));
        let mut s: EventScheduler<u64> = EventScheduler::new(clock.clone());
        let offset = interval * offset_frac;
        let (h, _) = s.insert(
            ScheduledEvent::new(interval, |_, _, fired: &mut u64| *fired += 1).with_offset(offset),
        );
        let first = s.next_fire_time(h).unwrap();
        prop_assert!(first >= start - 1e-9);
        prop_assert!(first <= start + interval + 1e-9);

        clock.set(start + elapsed);
        let mut fired = 0u64;
        s.update(&mut fired);

        // One fire per grid point strictly before the reading
        let now = clock.total();
        let expected = if now > first {
            ((now - first) / interval).ceil() as u64
        } else {
            0
        };
        prop_assert!(fired.abs_diff(expected) <= 1, "fired {} expected {}", fired, expected);
        prop_assert!(!(now > s.next_fire_time(h).unwrap()));
    }
}
