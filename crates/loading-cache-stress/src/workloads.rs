use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, de};

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Workload {
    pub concurrency: usize,
    /// The number of distinct keys requested from the cache.
    pub keys: u64,
    /// How long the simulated loader takes for each key.
    #[serde(with = "humantime_serde")]
    pub load_time: Duration,
    /// The probability of a load failing, between `0` and `1`.
    #[serde(default, deserialize_with = "deserialize_probability")]
    pub failure_rate: f64,
}

fn deserialize_probability<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let probability = f64::deserialize(deserializer)?;
    // rejects NaN as well
    if (0.0..=1.0).contains(&probability) {
        Ok(probability)
    } else {
        Err(de::Error::invalid_value(
            de::Unexpected::Float(probability),
            &"a probability between 0 and 1",
        ))
    }
}

/// The error produced by the simulated loader.
#[derive(Debug, thiserror::Error)]
#[error("simulated failure loading key {0}")]
pub struct SimulatedFailure(pub u64);

impl Workload {
    /// Picks the next key to request.
    pub fn random_key(&self) -> u64 {
        rand::rng().random_range(0..self.keys.max(1))
    }

    /// Simulates the expensive computation of the value for `key`.
    pub async fn load(&self, key: u64) -> Result<u64, SimulatedFailure> {
        tokio::time::sleep(self.load_time).await;

        let failed =
            self.failure_rate > 0.0 && rand::rng().random_bool(self.failure_rate.min(1.0));
        if failed {
            Err(SimulatedFailure(key))
        } else {
            Ok(key.wrapping_mul(key))
        }
    }
}
