//! Scan protocol table.
//!
//! The mapping from scan id to fieldmap and readout polarity is a property of
//! the acquisition protocol, not of the scan id's spelling. AP and PA runs of
//! one session share a fieldmap but need opposite polarity signs, so the
//! table is spelled out case by case and an unknown id is always an error.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ResolveError;

/// Sign of the phase-encode direction along y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhaseEncoding {
  #[serde(rename = "y")]
  Positive,
  #[serde(rename = "y-")]
  Negative,
}

impl PhaseEncoding {
  pub fn as_str(&self) -> &'static str {
    match self {
      PhaseEncoding::Positive => "y",
      PhaseEncoding::Negative => "y-",
    }
  }
}

impl fmt::Display for PhaseEncoding {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for PhaseEncoding {
  type Err = ResolveError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "y" => Ok(PhaseEncoding::Positive),
      "y-" => Ok(PhaseEncoding::Negative),
      other => Err(ResolveError::InvalidPhaseEncoding(other.to_string())),
    }
  }
}

/// Fieldmap and polarity of one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanMetadata {
  pub fieldmap_id: String,
  pub phase_encoding: PhaseEncoding,
}

impl ScanMetadata {
  pub fn new(fieldmap_id: impl Into<String>, phase_encoding: PhaseEncoding) -> Self {
    Self {
      fieldmap_id: fieldmap_id.into(),
      phase_encoding,
    }
  }
}

/// Exhaustive scan id → metadata table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanProtocol {
  entries: BTreeMap<String, ScanMetadata>,
}

impl ScanProtocol {
  pub fn new(entries: BTreeMap<String, ScanMetadata>) -> Self {
    Self { entries }
  }

  /// Session 2 resting-state protocol: two runs per readout direction, one
  /// gradient-echo fieldmap per run pair.
  pub fn lsd_resting() -> Self {
    let mut entries = BTreeMap::new();
    entries.insert(
      "ses-02_task-rest_acq-AP_run-01_bold".to_string(),
      ScanMetadata::new("ses-02_acq-GEfmap_run-01", PhaseEncoding::Negative),
    );
    entries.insert(
      "ses-02_task-rest_acq-PA_run-01_bold".to_string(),
      ScanMetadata::new("ses-02_acq-GEfmap_run-01", PhaseEncoding::Positive),
    );
    entries.insert(
      "ses-02_task-rest_acq-AP_run-02_bold".to_string(),
      ScanMetadata::new("ses-02_acq-GEfmap_run-02", PhaseEncoding::Negative),
    );
    entries.insert(
      "ses-02_task-rest_acq-PA_run-02_bold".to_string(),
      ScanMetadata::new("ses-02_acq-GEfmap_run-02", PhaseEncoding::Positive),
    );
    Self { entries }
  }

  /// Build a table from `(scan_id, fieldmap_id, polarity)` strings.
  pub fn from_entries<'a, I>(rows: I) -> Result<Self, ResolveError>
  where
    I: IntoIterator<Item = (&'a str, &'a str, &'a str)>,
  {
    let mut entries = BTreeMap::new();
    for (scan_id, fieldmap_id, polarity) in rows {
      entries.insert(
        scan_id.to_string(),
        ScanMetadata::new(fieldmap_id, polarity.parse()?),
      );
    }
    Ok(Self { entries })
  }

  pub fn resolve(&self, scan_id: &str) -> Result<&ScanMetadata, ResolveError> {
    self
      .entries
      .get(scan_id)
      .ok_or_else(|| ResolveError::UnknownScanIdentifier(scan_id.to_string()))
  }

  /// Resolve every scan up front so an unknown id fails before execution.
  pub fn validate<S: AsRef<str>>(&self, scans: &[S]) -> Result<(), ResolveError> {
    for scan in scans {
      self.resolve(scan.as_ref())?;
    }
    Ok(())
  }
}
