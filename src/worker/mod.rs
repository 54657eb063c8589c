//! Simulated mining workers.
//!
//! A [`Worker`] is a single emulated mining device: a hash rate, a hardware
//! class, a network link profile, optional malicious behavior, and the
//! runtime state the behavior machine in [`behavior`] advances every tick.
//! Workers are plain owned data; engines hand out deep clones so callers can
//! never alias engine-internal state.

pub mod behavior;
pub mod fleet;

use crate::config::{
    AttackTypeConfig, ConnectionQualityConfig, DurationRange, HashRateRange,
    NetworkConditionsConfig, WorkerTypeConfig,
};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Hardware class of a worker or a whole farm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FarmType {
    Asic,
    Gpu,
    Cpu,
    /// Heterogeneous farm; modeled with middle-of-the-road power numbers.
    Mixed,
}

impl FarmType {
    /// Nominal draw in watts per MH/s of hash rate.
    pub fn watts_per_mhs(&self) -> u32 {
        match self {
            FarmType::Asic => 100,
            FarmType::Gpu => 300,
            FarmType::Cpu => 500,
            FarmType::Mixed => 200,
        }
    }

    /// Nominal efficiency rating in [0, 1].
    pub fn efficiency_rating(&self) -> f64 {
        match self {
            FarmType::Asic => 0.95,
            FarmType::Gpu => 0.85,
            FarmType::Cpu => 0.70,
            FarmType::Mixed => 0.80,
        }
    }
}

impl fmt::Display for FarmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FarmType::Asic => "ASIC",
            FarmType::Gpu => "GPU",
            FarmType::Cpu => "CPU",
            FarmType::Mixed => "MIXED",
        };
        f.write_str(s)
    }
}

/// Link quality tier of a worker's simulated connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkQuality {
    Excellent,
    #[default]
    Good,
    Fair,
    Poor,
}

/// Kinds of attacks a malicious worker can run against the pool under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
    InvalidShares,
    ShareWithholding,
    DifficultyManipulation,
}

/// Static hardware characteristics plus thermal telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceProfile {
    /// Watts drawn while active.
    pub power_consumption: u32,
    pub efficiency_rating: f64,
    pub failure_rate: f64,
    /// Degrees Celsius.
    pub temperature: f64,
    /// RPM.
    pub fan_speed: u32,
}

/// Simulated network link characteristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub quality: LinkQuality,
    pub latency: Duration,
    pub packet_loss: f64,
    pub jitter: Duration,
    /// Bits per second.
    pub bandwidth_bps: u64,
}

impl NetworkProfile {
    /// Sample a profile from the configured quality distribution, or produce
    /// the stock "good" profile when no distribution is configured.
    pub(crate) fn sample(config: &NetworkConditionsConfig, rng: &mut StdRng) -> Self {
        if config.qualities.is_empty() {
            return Self {
                quality: LinkQuality::Good,
                latency: Duration::from_millis(50 + rng.gen_range(0..200)),
                packet_loss: 0.01,
                jitter: Duration::from_millis(5 + rng.gen_range(0..20)),
                bandwidth_bps: 1_000_000,
            };
        }

        let quality = select_quality(&config.qualities, rng);
        let range = config.latency_range;
        let span = range.max.saturating_sub(range.min);
        let latency = range.min + span.mul_f64(rng.gen::<f64>());

        Self {
            quality: quality.quality,
            latency,
            packet_loss: quality.packet_loss,
            jitter: quality.jitter,
            bandwidth_bps: 1_000_000 + rng.gen_range(0..9_000_000),
        }
    }

    /// Profile for a cluster-owned worker: the cluster's base latency with up
    /// to 20% positive jitter.
    pub(crate) fn for_cluster(base_latency: Duration, rng: &mut StdRng) -> Self {
        let base = if base_latency.is_zero() {
            Duration::from_millis(50)
        } else {
            base_latency
        };
        let latency = base + base.mul_f64(rng.gen::<f64>() * 0.2);

        Self {
            quality: LinkQuality::Good,
            latency,
            packet_loss: 0.01,
            jitter: Duration::from_millis(5 + rng.gen_range(0..15)),
            bandwidth_bps: 1_000_000 + rng.gen_range(0..9_000_000),
        }
    }
}

/// Malicious behavior profile. Present only on malicious workers.
#[derive(Debug, Clone)]
pub struct AttackProfile {
    pub attack_types: Vec<AttackTypeConfig>,
    pub is_attacking: bool,
    pub attack_started: Option<Instant>,
    pub attack_duration: Duration,
}

impl AttackProfile {
    /// Build from configured attack types, defaulting to a mild
    /// invalid-shares profile when none are configured.
    pub(crate) fn from_config(attack_types: &[AttackTypeConfig]) -> Self {
        let attack_types = if attack_types.is_empty() {
            vec![AttackTypeConfig {
                kind: AttackKind::InvalidShares,
                probability: 0.5,
                intensity: 0.2,
            }]
        } else {
            attack_types.to_vec()
        };
        Self {
            attack_types,
            is_attacking: false,
            attack_started: None,
            attack_duration: Duration::ZERO,
        }
    }
}

/// Mutable runtime state advanced by the behavior machine.
#[derive(Debug, Clone)]
pub struct WorkerState {
    pub is_bursting: bool,
    pub is_disconnected: bool,
    pub burst_started: Option<Instant>,
    pub burst_duration: Duration,
    pub last_seen: DateTime<Utc>,
    pub shares_submitted: u64,
    pub valid_shares: u64,
    pub invalid_shares: u64,
}

impl WorkerState {
    pub(crate) fn new() -> Self {
        Self {
            is_bursting: false,
            is_disconnected: false,
            burst_started: None,
            burst_duration: Duration::ZERO,
            last_seen: Utc::now(),
            shares_submitted: 0,
            valid_shares: 0,
            invalid_shares: 0,
        }
    }
}

/// Lifetime counters for one worker.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub total_shares: u64,
    pub valid_shares: u64,
    pub invalid_shares: u64,
    pub last_share_time: Option<DateTime<Utc>>,
    pub burst_events: u64,
    pub drop_events: u64,
    pub attack_events: u64,
}

/// A simulated mining worker.
///
/// Invariants: `hash_rate` changes only through an explicit update command,
/// and a disconnected worker is never active.
#[derive(Debug, Clone)]
pub struct Worker {
    pub id: String,
    pub kind: FarmType,
    pub hash_rate: u64,
    pub is_active: bool,
    pub is_malicious: bool,
    pub location: String,
    pub performance: PerformanceProfile,
    pub network: NetworkProfile,
    pub attack: Option<AttackProfile>,
    pub state: WorkerState,
    pub stats: WorkerStats,
}

impl Worker {
    /// Whether the worker is currently running an attack.
    pub fn is_attacking(&self) -> bool {
        self.attack.as_ref().map_or(false, |a| a.is_attacking)
    }

    /// Build a worker from a type distribution entry.
    pub(crate) fn from_type(
        id: String,
        type_cfg: &WorkerTypeConfig,
        range: HashRateRange,
        network: NetworkProfile,
        malicious_attack_types: Option<&[AttackTypeConfig]>,
        rng: &mut StdRng,
    ) -> Self {
        let hash_rate = sample_hash_rate(range, type_cfg.hash_rate_multiplier, rng);
        let attack = malicious_attack_types.map(AttackProfile::from_config);

        Self {
            id,
            kind: type_cfg.kind,
            hash_rate,
            is_active: false,
            is_malicious: attack.is_some(),
            location: String::new(),
            performance: PerformanceProfile {
                power_consumption: type_cfg.power_consumption,
                efficiency_rating: type_cfg.efficiency_rating,
                failure_rate: type_cfg.failure_rate,
                temperature: 20.0 + rng.gen::<f64>() * 60.0,
                fan_speed: 1000 + rng.gen_range(0..2000),
            },
            network,
            attack,
            state: WorkerState::new(),
            stats: WorkerStats::default(),
        }
    }
}

/// Sample a hash rate uniformly from `range` and scale it by `multiplier`.
pub(crate) fn sample_hash_rate(range: HashRateRange, multiplier: f64, rng: &mut StdRng) -> u64 {
    let range = effective_range(range);
    let span = range.max.saturating_sub(range.min);
    let base = range.min + (rng.gen::<f64>() * span as f64) as u64;
    (base as f64 * multiplier) as u64
}

/// A zeroed range means "unconfigured"; fall back to the stock 1-10 MH/s.
pub(crate) fn effective_range(range: HashRateRange) -> HashRateRange {
    if range.max == 0 {
        HashRateRange::default()
    } else {
        range
    }
}

/// Cumulative-probability sampling over the configured type distribution.
/// Falls back to a single 100% GPU population when unconfigured.
pub(crate) fn select_worker_type(types: &[WorkerTypeConfig], rng: &mut StdRng) -> WorkerTypeConfig {
    if types.is_empty() {
        return WorkerTypeConfig::default();
    }

    let roll: f64 = rng.gen();
    let mut cumulative = 0.0;
    for t in types {
        cumulative += t.percentage;
        if roll <= cumulative {
            return t.clone();
        }
    }
    types[0].clone()
}

fn select_quality(qualities: &[ConnectionQualityConfig], rng: &mut StdRng) -> ConnectionQualityConfig {
    let roll: f64 = rng.gen();
    let mut cumulative = 0.0;
    for q in qualities {
        cumulative += q.percentage;
        if roll <= cumulative {
            return q.clone();
        }
    }
    qualities[0].clone()
}

/// Sample a duration uniformly from `range`.
pub(crate) fn sample_duration(range: DurationRange, rng: &mut StdRng) -> Duration {
    let span = range.max.saturating_sub(range.min);
    range.min + span.mul_f64(rng.gen::<f64>())
}
