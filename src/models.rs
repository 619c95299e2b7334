use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::training_load;

/// A single heart-rate reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeartRateSample {
    /// Milliseconds, monotonic within a session (epoch millis for live and
    /// most imported sessions, offset millis for CSV imports)
    pub timestamp: i64,

    /// Heart rate in beats per minute
    pub heart_rate: u16,
}

impl HeartRateSample {
    pub fn new(timestamp: i64, heart_rate: u16) -> Self {
        Self {
            timestamp,
            heart_rate,
        }
    }
}

/// Three-level classification of a day's training load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Green,
    Yellow,
    Red,
}

impl RiskLevel {
    /// Stable storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Green => "GREEN",
            RiskLevel::Yellow => "YELLOW",
            RiskLevel::Red => "RED",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RiskLevel::Green => "Green (stable load)",
            RiskLevel::Yellow => "Yellow (elevated load)",
            RiskLevel::Red => "Red (high load)",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GREEN" => Ok(RiskLevel::Green),
            "YELLOW" => Ok(RiskLevel::Yellow),
            "RED" => Ok(RiskLevel::Red),
            _ => Err(format!("Unknown risk level: {}", s)),
        }
    }
}

/// One day's session record.
///
/// Score and risk are derived from the samples at construction and cannot be
/// set independently, so the two always agree with the scoring rules.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingDay {
    date: NaiveDate,
    samples: Vec<HeartRateSample>,
    training_score: Option<f64>,
    risk_level: Option<RiskLevel>,
}

impl TrainingDay {
    /// Build a scored day from its samples
    pub fn new(date: NaiveDate, samples: Vec<HeartRateSample>) -> Self {
        let score = training_load::score(&samples);
        Self {
            date,
            samples,
            training_score: Some(score),
            risk_level: Some(training_load::classify(score)),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn samples(&self) -> &[HeartRateSample] {
        &self.samples
    }

    pub fn training_score(&self) -> Option<f64> {
        self.training_score
    }

    pub fn risk_level(&self) -> Option<RiskLevel> {
        self.risk_level
    }

    /// Session length in minutes, from the sample span
    pub fn duration_minutes(&self) -> f64 {
        training_load::duration_minutes(&self.samples)
    }

    /// Mean heart rate, if any samples exist
    pub fn average_heart_rate(&self) -> Option<f64> {
        training_load::average_heart_rate(&self.samples)
    }

    pub fn into_samples(self) -> Vec<HeartRateSample> {
        self.samples
    }
}

/// Suggested intensity for the next session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionIntensity {
    Rest,
    Easy,
    Moderate,
    Hard,
}

impl std::fmt::Display for SessionIntensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionIntensity::Rest => "REST",
            SessionIntensity::Easy => "EASY",
            SessionIntensity::Moderate => "MODERATE",
            SessionIntensity::Hard => "HARD",
        };
        f.write_str(name)
    }
}

/// Recommendation derived on demand from the training history. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub intensity: SessionIntensity,
    pub title: String,
    pub explanation: String,
}
