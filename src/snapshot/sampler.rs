use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::session::ClientId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoinRole {
    Main,
    Dual,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShareDelta {
    pub accepted: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    total: u64,
    reject: u64,
    observed_at: DateTime<Utc>,
}

/// Turns the cumulative share counters rigs report into per-pass deltas.
///
/// A sample older than `max_gap`, or counters lower than the stored sample
/// (kernel restart), yield a zero delta and become the new baseline.
#[derive(Debug)]
pub struct ShareSampler {
    samples: HashMap<(ClientId, CoinRole), Sample>,
    max_gap: Duration,
}

impl ShareSampler {
    pub fn new(max_gap: Duration) -> Self {
        Self {
            samples: HashMap::new(),
            max_gap,
        }
    }

    pub fn observe(
        &mut self,
        client_id: ClientId,
        role: CoinRole,
        total: u64,
        reject: u64,
        at: DateTime<Utc>,
    ) -> ShareDelta {
        let current = Sample {
            total,
            reject,
            observed_at: at,
        };
        let Some(previous) = self.samples.insert((client_id, role), current) else {
            return ShareDelta::default();
        };

        if at - previous.observed_at > self.max_gap {
            return ShareDelta::default();
        }
        match (
            total.checked_sub(previous.total),
            reject.checked_sub(previous.reject),
        ) {
            (Some(accepted), Some(rejected)) => ShareDelta { accepted, rejected },
            _ => ShareDelta::default(),
        }
    }

    /// Drops baselines of clients not observed within `max_gap` of `now`.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.samples.len();
        let max_gap = self.max_gap;
        self.samples
            .retain(|_, sample| now - sample.observed_at <= max_gap);
        before - self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
