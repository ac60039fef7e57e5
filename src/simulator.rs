//! Sensor network simulator
//!
//! Generates realistic readings for every registered node when no physical
//! network is connected. It writes through the same ingest path as external
//! sensors, so the rest of the system cannot tell the difference; wiring up
//! a real LoRa gateway feed replaces this module without touching anything
//! else.
//!
//! The generated data follows realistic patterns including:
//! - Diurnal temperature drift with Gaussian noise
//! - Pressure/humidity anti-correlation, with occasional low-pressure
//!   episodes resembling cloudburst precursors
//! - Signal-strength jitter for sensor nodes (gateways have no radio uplink
//!   reading of their own, but report humidity)

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::models::{NodeReading, NodeType};
use crate::store::AppState;

/// Ticks a simulated low-pressure episode lasts once triggered
const EPISODE_TICKS: u32 = 30;

/// Background generator producing readings for all registered nodes
pub struct SensorSimulator {
    /// Interval between generation passes in milliseconds
    interval_ms: u64,
    /// Base ambient temperature (Celsius)
    base_temperature: f64,
    /// Base barometric pressure (hPa)
    base_pressure: f64,
    /// Base relative humidity (percentage)
    base_humidity: f64,
    /// Time drift factor for gradual changes
    drift_factor: f64,
    /// Remaining ticks of an active low-pressure episode
    episode_remaining: u32,
}

impl SensorSimulator {
    pub fn new(interval_ms: u64) -> Self {
        info!(interval_ms = interval_ms, "Initializing sensor simulator");

        Self {
            interval_ms,
            base_temperature: 26.0,
            base_pressure: 1010.0,
            base_humidity: 60.0,
            drift_factor: 0.0,
            episode_remaining: 0,
        }
    }

    /// Run the simulator continuously
    pub async fn run(mut self, state: Arc<RwLock<AppState>>) {
        info!("Starting sensor simulation loop");

        let mut tick_interval = interval(Duration::from_millis(self.interval_ms));
        let mut rng = rand::thread_rng();

        let temp_noise = Normal::new(0.0, 0.4).unwrap();
        let pressure_noise = Normal::new(0.0, 0.8).unwrap();
        let humidity_noise = Normal::new(0.0, 2.0).unwrap();
        let rssi_noise = Normal::new(0.0, 4.0).unwrap();

        let mut tick_count: u64 = 0;

        loop {
            tick_interval.tick().await;
            tick_count += 1;

            // Gradual diurnal drift
            self.drift_factor += 0.01;
            if self.drift_factor > std::f64::consts::PI * 2.0 {
                self.drift_factor = 0.0;
            }

            // Occasionally start a low-pressure episode
            if self.episode_remaining == 0 && rng.gen::<f64>() < 0.02 {
                self.episode_remaining = EPISODE_TICKS;
                warn!("Simulating low-pressure episode (cloudburst-like conditions)");
            }
            let episode_active = self.episode_remaining > 0;
            if episode_active {
                self.episode_remaining -= 1;
            }

            // Snapshot the registered nodes, then write sequentially
            let targets: Vec<(String, NodeType)> = {
                let state = state.read().await;
                state
                    .list_nodes()
                    .iter()
                    .map(|n| (n.metadata.id.clone(), n.metadata.node_type))
                    .collect()
            };

            for (node_id, node_type) in targets {
                let temp_drift = (self.drift_factor * 0.5).sin() * 3.0;
                let temperature = (self.base_temperature
                    + temp_drift
                    + temp_noise.sample(&mut rng))
                .clamp(-10.0, 48.0);

                // Pressure dips hard during an episode, mildly anti-correlated
                // with temperature otherwise
                let episode_drop = if episode_active {
                    rng.gen_range(25.0..45.0)
                } else {
                    0.0
                };
                let pressure = (self.base_pressure - temp_drift * 0.5 - episode_drop
                    + pressure_noise.sample(&mut rng))
                .clamp(850.0, 1060.0);

                // Humidity climbs as pressure falls
                let humidity_lift = if episode_active { 25.0 } else { -temp_drift * 2.0 };
                let humidity = (self.base_humidity
                    + humidity_lift
                    + humidity_noise.sample(&mut rng))
                .clamp(10.0, 100.0);

                let reading = match node_type {
                    NodeType::Sensor => NodeReading {
                        timestamp: Utc::now(),
                        temperature: Some(round1(temperature)),
                        pressure: Some(round1(pressure)),
                        humidity: None,
                        signal_strength: Some(
                            (-75.0f64 + rssi_noise.sample(&mut rng)).clamp(-120.0, -40.0).round(),
                        ),
                    },
                    NodeType::Gateway => NodeReading {
                        timestamp: Utc::now(),
                        temperature: Some(round1(temperature)),
                        pressure: Some(round1(pressure)),
                        humidity: Some(round1(humidity)),
                        signal_strength: None,
                    },
                };

                debug!(
                    tick = tick_count,
                    node_id = %node_id,
                    temperature = reading.temperature,
                    pressure = reading.pressure,
                    "Generated simulated reading"
                );

                let mut app_state = state.write().await;
                if let Err(e) = app_state.apply_reading(&node_id, reading) {
                    // Node deleted between snapshot and write
                    debug!(node_id = %node_id, error = %e, "Skipping removed node");
                }
            }

            // Slight baseline shift every so often
            if tick_count % 180 == 0 {
                self.base_temperature =
                    (self.base_temperature + rng.gen_range(-1.0..1.0)).clamp(18.0, 34.0);
                self.base_humidity =
                    (self.base_humidity + rng.gen_range(-5.0..5.0)).clamp(40.0, 80.0);

                info!(
                    new_base_temp = self.base_temperature,
                    new_base_humidity = self.base_humidity,
                    "Environmental baseline shift simulated"
                );
            }
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Generate a backdated history span for a node, oldest first. Used by the
/// bulk demo-history endpoint; readings are written sequentially by the
/// caller.
pub fn generate_demo_history(
    node_type: NodeType,
    hours: u32,
    interval_mins: u32,
    end: DateTime<Utc>,
) -> Vec<NodeReading> {
    let mut rng = rand::thread_rng();
    let temp_noise = Normal::new(0.0, 0.6).unwrap();
    let pressure_noise = Normal::new(0.0, 1.5).unwrap();
    let humidity_noise = Normal::new(0.0, 3.0).unwrap();
    let rssi_noise = Normal::new(0.0, 5.0).unwrap();

    let total = (hours as u64 * 60 / interval_mins.max(1) as u64) as usize;
    let mut readings = Vec::with_capacity(total);

    for i in 0..total {
        let age_mins = ((total - 1 - i) * interval_mins as usize) as i64;
        let timestamp = end - ChronoDuration::minutes(age_mins);

        // Hour-of-span phase for a plausible diurnal curve
        let phase = (i as f64 / total.max(1) as f64) * std::f64::consts::PI * 2.0;
        let temperature = (26.0 + phase.sin() * 4.0 + temp_noise.sample(&mut rng)).clamp(-10.0, 48.0);
        let pressure =
            (1010.0 - phase.sin() * 2.0 + pressure_noise.sample(&mut rng)).clamp(850.0, 1060.0);
        let humidity = (60.0 - phase.sin() * 8.0 + humidity_noise.sample(&mut rng)).clamp(10.0, 100.0);

        readings.push(match node_type {
            NodeType::Sensor => NodeReading {
                timestamp,
                temperature: Some(round1(temperature)),
                pressure: Some(round1(pressure)),
                humidity: None,
                signal_strength: Some((-75.0f64 + rssi_noise.sample(&mut rng)).clamp(-120.0, -40.0).round()),
            },
            NodeType::Gateway => NodeReading {
                timestamp,
                temperature: Some(round1(temperature)),
                pressure: Some(round1(pressure)),
                humidity: Some(round1(humidity)),
                signal_strength: None,
            },
        });
    }

    readings
}
