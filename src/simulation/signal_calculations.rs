//! Radio link budget used to derive communication ranges.
//!
//! A device declared with a radio strength instead of an explicit range gets
//! the distance at which a log-distance path loss model drops its signal to
//! the receiving limit (noise floor plus required SNR).
//!
//! Units: power in dBm, distance in world units (1 unit = 1 meter).

use serde::{Deserialize, Serialize};

/// Parameters defining the radio channel propagation model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathLossParameters {
    /// Path loss exponent (n).
    ///
    /// - n = 2.0: Free space
    /// - n = 2.7 to 3.5: Urban areas
    /// - n = 3.0 to 5.0: Indoor obstructed environments
    pub path_loss_exponent: f64,

    /// Path loss at the reference distance d₀ (1 meter) in dB.
    pub path_loss_at_reference_distance: f64,

    /// The thermal noise floor of the receiver in dBm.
    pub noise_floor: f64,

    /// Minimum SNR (dB) the receiver needs to decode a packet.
    #[serde(default = "default_snr_limit")]
    pub snr_limit: f64,
}

fn default_snr_limit() -> f64 {
    -7.5
}

/// Path loss (dB) at `distance` with the log-distance model
/// `PL(d) = PL(d₀) + 10 × n × log₁₀(d/d₀)`, d₀ = 1 m.
///
/// Distances under one meter return the reference loss.
pub fn calculate_path_loss(distance: f64, params: &PathLossParameters) -> f64 {
    if distance < 1.0 {
        return params.path_loss_at_reference_distance;
    }
    params.path_loss_at_reference_distance + 10.0 * params.path_loss_exponent * distance.log10()
}

/// Weakest signal the receiver still decodes.
pub fn calculate_receiving_limit(params: &PathLossParameters) -> f64 {
    params.noise_floor + params.snr_limit
}

/// Deterministic communication range for a transmitter of `tx_power_dbm`.
///
/// Solving `P_tx - PL(d) = RL` for d gives `d = 10^((P_tx - RL - PL0) / (10n))`.
/// A budget that cannot even cover the reference distance yields 0.
pub fn calculate_effective_distance(tx_power_dbm: f64, params: &PathLossParameters) -> f64 {
    let numerator = tx_power_dbm - calculate_receiving_limit(params) - params.path_loss_at_reference_distance;
    if numerator <= 0.0 {
        return 0.0;
    }
    10.0_f64.powf(numerator / (10.0 * params.path_loss_exponent))
}
