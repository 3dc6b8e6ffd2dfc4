use serde::{Deserialize, Serialize};

/// Acquisition parameters shared by every scan of a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
  /// Effective echo spacing in seconds.
  pub echo_space: f64,
  /// Echo-time difference of the fieldmap in milliseconds.
  pub te_diff: f64,
  /// Isotropic resolution the timeseries is resampled to, in mm.
  pub epi_resolution: f64,
  /// Repetition time in seconds.
  pub tr: f64,
  /// Highpass cutoff in Hz.
  pub highpass: f64,
  /// Lowpass cutoff in Hz.
  pub lowpass: f64,
  /// Number of leading volumes discarded before motion correction.
  pub vol_to_remove: u32,
}

impl AcquisitionConfig {
  /// Highpass filter sigma in volumes: `1 / (2 * TR * highpass)`.
  pub fn highpass_sigma(&self) -> f64 {
    1.0 / (2.0 * self.tr * self.highpass)
  }

  /// Lowpass filter sigma in volumes: `1 / (2 * TR * lowpass)`.
  pub fn lowpass_sigma(&self) -> f64 {
    1.0 / (2.0 * self.tr * self.lowpass)
  }
}
