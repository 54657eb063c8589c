//! Per-tick behavior state machine for simulated workers.
//!
//! Probabilities are configured per worker-hour and applied per tick by
//! dividing by the seconds in an hour. The machine mutates the worker in
//! place and reports deferred follow-ups (reconnects) back to the engine,
//! which owns timer scheduling; the machine itself never spawns tasks.

use crate::config::{BehaviorConfig, BurstConfig, ConnectionDropConfig};
use crate::events::{EventBus, EventKind};
use crate::worker::{sample_duration, AttackKind, Worker};
use rand::rngs::StdRng;
use rand::Rng;
use std::time::{Duration, Instant};

/// Scale factor from per-hour probabilities to per-tick probabilities.
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Hash rate divisor producing the per-second share probability.
const SHARE_RATE_DIVISOR: f64 = 10_000_000.0;

/// Spontaneous attacks last between 30 s and 330 s.
const ATTACK_MIN: Duration = Duration::from_secs(30);
const ATTACK_SPAN_SECS: f64 = 300.0;

/// Follow-up actions the engine must schedule after a tick.
#[derive(Debug)]
pub(crate) enum Deferred {
    /// Restore connectivity for `worker_id` after `delay`.
    Reconnect { worker_id: String, delay: Duration },
}

/// Advance one active worker by one behavior tick.
pub(crate) fn tick_worker(
    worker: &mut Worker,
    behavior: &BehaviorConfig,
    rng: &mut StdRng,
    events: &EventBus,
    deferred: &mut Vec<Deferred>,
) {
    process_burst(worker, &behavior.burst, rng, events);
    process_drop(worker, &behavior.drops, rng, events, deferred);
    if worker.is_malicious {
        process_attack(worker, rng, events);
    }
    process_share(worker, &behavior.burst, rng);
}

fn process_burst(worker: &mut Worker, config: &BurstConfig, rng: &mut StdRng, events: &EventBus) {
    if worker.state.is_bursting {
        let elapsed = worker
            .state
            .burst_started
            .map(|t| t.elapsed())
            .unwrap_or(Duration::MAX);
        if elapsed >= worker.state.burst_duration {
            worker.state.is_bursting = false;
            worker.state.burst_started = None;
            events.publish(EventKind::BurstEnded, &worker.id, "burst window elapsed");
        }
        return;
    }

    if config.probability > 0.0 && rng.gen::<f64>() < config.probability / SECONDS_PER_HOUR {
        let duration = sample_duration(config.duration_range, rng);
        worker.state.is_bursting = true;
        worker.state.burst_started = Some(Instant::now());
        worker.state.burst_duration = duration;
        worker.stats.burst_events += 1;
        events.publish(
            EventKind::BurstStarted,
            &worker.id,
            format!("bursting for {:?}", duration),
        );
    }
}

fn process_drop(
    worker: &mut Worker,
    config: &ConnectionDropConfig,
    rng: &mut StdRng,
    events: &EventBus,
    deferred: &mut Vec<Deferred>,
) {
    if config.probability > 0.0 && rng.gen::<f64>() < config.probability / SECONDS_PER_HOUR {
        let delay = sample_duration(config.duration_range, rng);
        drop_worker(worker, events);
        deferred.push(Deferred::Reconnect {
            worker_id: worker.id.clone(),
            delay,
        });
    }
}

/// Mark a worker dropped. Shared by the tick machine and the trigger command.
pub(crate) fn drop_worker(worker: &mut Worker, events: &EventBus) {
    worker.state.is_disconnected = true;
    worker.is_active = false;
    worker.stats.drop_events += 1;
    events.publish(EventKind::WorkerDropped, &worker.id, "connection dropped");
}

fn process_attack(worker: &mut Worker, rng: &mut StdRng, events: &EventBus) {
    let Some(profile) = worker.attack.as_mut() else {
        return;
    };

    if profile.is_attacking {
        let elapsed = profile
            .attack_started
            .map(|t| t.elapsed())
            .unwrap_or(Duration::MAX);
        if elapsed >= profile.attack_duration {
            profile.is_attacking = false;
            profile.attack_started = None;
            events.publish(EventKind::AttackEnded, &worker.id, "attack window elapsed");
        }
        return;
    }

    let attack_types = profile.attack_types.clone();
    for attack in &attack_types {
        if rng.gen::<f64>() < attack.probability / SECONDS_PER_HOUR {
            let duration = ATTACK_MIN + Duration::from_secs_f64(rng.gen::<f64>() * ATTACK_SPAN_SECS);
            start_attack(worker, attack.kind, duration, events);
            break;
        }
    }
}

/// Put a malicious worker into the attacking state. Shared by the tick
/// machine and the trigger command; callers must have checked `is_malicious`.
pub(crate) fn start_attack(
    worker: &mut Worker,
    kind: AttackKind,
    duration: Duration,
    events: &EventBus,
) {
    let Some(profile) = worker.attack.as_mut() else {
        return;
    };
    profile.is_attacking = true;
    profile.attack_started = Some(Instant::now());
    profile.attack_duration = duration;
    worker.stats.attack_events += 1;
    events.publish(
        EventKind::AttackStarted,
        &worker.id,
        format!("{:?} attack for {:?}", kind, duration),
    );
}

fn process_share(worker: &mut Worker, burst: &BurstConfig, rng: &mut StdRng) {
    let mut share_rate = worker.hash_rate as f64 / SHARE_RATE_DIVISOR;
    if worker.state.is_bursting {
        share_rate *= burst.intensity_multiplier;
    }

    if rng.gen::<f64>() >= share_rate {
        return;
    }

    worker.state.shares_submitted += 1;
    worker.stats.total_shares += 1;

    let valid = !(worker.is_malicious && worker.is_attacking() && invalid_share_roll(worker, rng));
    if valid {
        worker.state.valid_shares += 1;
        worker.stats.valid_shares += 1;
    } else {
        worker.state.invalid_shares += 1;
        worker.stats.invalid_shares += 1;
    }
    worker.stats.last_share_time = Some(chrono::Utc::now());
}

fn invalid_share_roll(worker: &Worker, rng: &mut StdRng) -> bool {
    let Some(profile) = worker.attack.as_ref() else {
        return false;
    };
    profile
        .attack_types
        .iter()
        .filter(|a| a.kind == AttackKind::InvalidShares)
        .any(|a| rng.gen::<f64>() < a.intensity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttackTypeConfig, DurationRange, HashRateRange, WorkerTypeConfig};
    use crate::worker::NetworkProfile;
    use rand::SeedableRng;

    fn test_worker(malicious: bool, rng: &mut StdRng) -> Worker {
        let attack_types = [AttackTypeConfig {
            kind: AttackKind::InvalidShares,
            probability: 0.0,
            intensity: 1.0,
        }];
        Worker::from_type(
            "worker-1".to_string(),
            &WorkerTypeConfig::default(),
            HashRateRange::default(),
            NetworkProfile::sample(&Default::default(), rng),
            malicious.then_some(&attack_types[..]),
            rng,
        )
    }

    #[test]
    fn test_burst_expires_after_duration() {
        let mut rng = StdRng::seed_from_u64(1);
        let events = EventBus::new();
        let mut worker = test_worker(false, &mut rng);

        worker.state.is_bursting = true;
        worker.state.burst_started = Some(Instant::now() - Duration::from_secs(10));
        worker.state.burst_duration = Duration::from_secs(5);

        let config = BurstConfig::default();
        super::process_burst(&mut worker, &config, &mut rng, &events);
        assert!(!worker.state.is_bursting);
    }

    #[test]
    fn test_burst_starts_with_certain_probability() {
        let mut rng = StdRng::seed_from_u64(2);
        let events = EventBus::new();
        let mut worker = test_worker(false, &mut rng);

        // An hourly probability equal to the scale factor forces the roll.
        let config = BurstConfig {
            probability: SECONDS_PER_HOUR,
            duration_range: DurationRange::new(Duration::from_secs(5), Duration::from_secs(5)),
            intensity_multiplier: 2.0,
        };
        super::process_burst(&mut worker, &config, &mut rng, &events);
        assert!(worker.state.is_bursting);
        assert_eq!(worker.stats.burst_events, 1);
        assert_eq!(worker.state.burst_duration, Duration::from_secs(5));
    }

    #[test]
    fn test_drop_deactivates_and_defers_reconnect() {
        let mut rng = StdRng::seed_from_u64(3);
        let events = EventBus::new();
        let mut worker = test_worker(false, &mut rng);
        worker.is_active = true;

        let config = ConnectionDropConfig {
            probability: SECONDS_PER_HOUR,
            duration_range: DurationRange::new(Duration::from_secs(1), Duration::from_secs(1)),
        };
        let mut deferred = Vec::new();
        super::process_drop(&mut worker, &config, &mut rng, &events, &mut deferred);

        assert!(worker.state.is_disconnected);
        assert!(!worker.is_active);
        assert_eq!(worker.stats.drop_events, 1);
        assert_eq!(deferred.len(), 1);
    }

    #[test]
    fn test_attack_expires_after_duration() {
        let mut rng = StdRng::seed_from_u64(4);
        let events = EventBus::new();
        let mut worker = test_worker(true, &mut rng);

        start_attack(
            &mut worker,
            AttackKind::InvalidShares,
            Duration::from_secs(5),
            &events,
        );
        worker.attack.as_mut().unwrap().attack_started =
            Some(Instant::now() - Duration::from_secs(10));

        super::process_attack(&mut worker, &mut rng, &events);
        assert!(!worker.is_attacking());
    }

    #[test]
    fn test_attacking_worker_submits_invalid_shares() {
        let mut rng = StdRng::seed_from_u64(5);
        let events = EventBus::new();
        let mut worker = test_worker(true, &mut rng);
        worker.hash_rate = u64::MAX / 2; // force a share every tick
        start_attack(
            &mut worker,
            AttackKind::InvalidShares,
            Duration::from_secs(3600),
            &events,
        );

        let config = BurstConfig::default();
        for _ in 0..10 {
            super::process_share(&mut worker, &config, &mut rng);
        }
        // Intensity is 1.0, so every submitted share must be invalid.
        assert_eq!(worker.stats.total_shares, 10);
        assert_eq!(worker.stats.invalid_shares, 10);
        assert_eq!(worker.stats.valid_shares, 0);
    }

    #[test]
    fn test_honest_worker_submits_valid_shares() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut worker = test_worker(false, &mut rng);
        worker.hash_rate = u64::MAX / 2;

        let config = BurstConfig::default();
        for _ in 0..10 {
            super::process_share(&mut worker, &config, &mut rng);
        }
        assert_eq!(worker.stats.total_shares, 10);
        assert_eq!(worker.stats.valid_shares, 10);
        assert_eq!(worker.stats.invalid_shares, 0);
    }
}
