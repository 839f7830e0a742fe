//! Property tests for the job store's universal invariants (spec §8).

use chrono::{Duration, Utc};
use proptest::prelude::*;
use quartzite::job::{ExecutionContext, Job};
use quartzite::{JobDetail, JobKey, JobStore, RepeatCount, Trigger, TriggerKey, TriggerState};
use std::sync::Arc;

struct Noop;
impl Job for Noop {
    fn execute(&self, _ctx: &mut ExecutionContext) -> quartzite::error::SchedulerResult<()> {
        Ok(())
    }
}

fn detail(name: &str) -> JobDetail {
    JobDetail::new(JobKey::new(name), Arc::new(Noop))
}

fn simple_trigger(name: &str, job: &str, start: chrono::DateTime<Utc>) -> Trigger {
    Trigger::simple(
        TriggerKey::new(name),
        JobKey::new(job),
        start,
        RepeatCount::Infinite,
        Duration::seconds(60),
    )
}

proptest! {
    /// Every waiting trigger's next_fire_time is present and the trigger is
    /// reachable through acquisition once that time has passed.
    #[test]
    fn waiting_triggers_always_carry_a_next_fire_time(offsets in proptest::collection::vec(-5_i64..5, 1..8)) {
        let store = JobStore::new();
        store.store_job(detail("j"), false).unwrap();
        let now = Utc::now();
        for (i, offset) in offsets.iter().enumerate() {
            let start = now + Duration::seconds(*offset);
            let key = format!("t{i}");
            store.store_trigger(simple_trigger(&key, "j", start), false).unwrap();
            let stored = store.retrieve_trigger(&TriggerKey::new(&key)).unwrap();
            if matches!(store.get_trigger_state(&TriggerKey::new(&key)), TriggerState::Normal) {
                prop_assert!(stored.next_fire_time().is_some());
            }
        }
    }

    /// Removing a trigger clears it from every read path simultaneously.
    #[test]
    fn removed_trigger_is_gone_from_every_index(name in "[a-z]{1,8}") {
        let store = JobStore::new();
        store.store_job(detail("j"), false).unwrap();
        let key = TriggerKey::new(&name);
        store.store_trigger(simple_trigger(&name, "j", Utc::now() + Duration::hours(1)), false).unwrap();
        prop_assert!(store.check_exists_trigger(&key));

        store.remove_trigger(&key);
        prop_assert!(!store.check_exists_trigger(&key));
        prop_assert!(store.retrieve_trigger(&key).is_none());
        prop_assert_eq!(store.get_trigger_state(&key), TriggerState::None);
        prop_assert!(!store.trigger_keys(&quartzite::GroupMatcher::any_group()).contains(&key));
    }

    /// pauseAll() followed by resumeAll() restores every trigger to
    /// whatever waiting/complete state it had before pausing.
    #[test]
    fn pause_all_then_resume_all_restores_original_states(count in 1_usize..6) {
        let store = JobStore::new();
        store.store_job(detail("j"), false).unwrap();
        let mut keys = Vec::new();
        for i in 0..count {
            let key = format!("t{i}");
            store.store_trigger(
                simple_trigger(&key, "j", Utc::now() + Duration::hours(1)),
                false,
            ).unwrap();
            keys.push(TriggerKey::new(&key));
        }
        let before: Vec<TriggerState> = keys.iter().map(|k| store.get_trigger_state(k)).collect();

        store.pause_all();
        for key in &keys {
            prop_assert_eq!(store.get_trigger_state(key), TriggerState::Paused);
        }

        store.resume_all();
        let after: Vec<TriggerState> = keys.iter().map(|k| store.get_trigger_state(k)).collect();
        prop_assert_eq!(before, after);
    }

    /// pauseTrigger is idempotent: calling it twice is the same as once.
    #[test]
    fn pause_trigger_twice_is_idempotent(name in "[a-z]{1,8}") {
        let store = JobStore::new();
        store.store_job(detail("j"), false).unwrap();
        let key = TriggerKey::new(&name);
        store.store_trigger(simple_trigger(&name, "j", Utc::now() + Duration::hours(1)), false).unwrap();

        store.pause_trigger(&key);
        let once = store.get_trigger_state(&key);
        store.pause_trigger(&key);
        let twice = store.get_trigger_state(&key);
        prop_assert_eq!(once, twice);
    }

    /// A simple trigger with repeat_count = 0 fires exactly once and then
    /// carries no further next_fire_time.
    #[test]
    fn zero_repeat_simple_trigger_fires_once_then_has_no_next_fire(offset_secs in 0_i64..3600) {
        let start = Utc::now() - Duration::seconds(offset_secs);
        let mut trigger = Trigger::simple(
            TriggerKey::new("once"),
            JobKey::new("j"),
            start,
            RepeatCount::Finite(0),
            Duration::seconds(30),
        );
        trigger.compute_first_fire_time(None);
        prop_assert_eq!(trigger.next_fire_time(), Some(start));
        trigger.triggered(None);
        prop_assert_eq!(trigger.next_fire_time(), None);
    }
}
