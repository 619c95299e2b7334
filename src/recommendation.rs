//! Next-session recommendation from an acute:chronic workload ratio (ACWR).
//!
//! Acute load is the mean score of the last 7 scored days, chronic load the
//! mean of the last 28 (once at least 7 exist). The rule ladder below is
//! evaluated top to bottom and the first match wins; overlapping ranges are
//! intentional and resolved by that order.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{Recommendation, SessionIntensity, TrainingDay};

/// Days in the acute window
pub const ACUTE_WINDOW: usize = 7;

/// Days in the chronic window
pub const CHRONIC_WINDOW: usize = 28;

/// Scored days needed before the ratio model is trusted
pub const MIN_SCORED_DAYS: usize = 3;

/// Floor for the hard-session threshold
pub const HARD_SCORE_FLOOR: f64 = 50.0;

/// Hard-session threshold as a multiple of chronic load
pub const HARD_CHRONIC_FACTOR: f64 = 1.1;

/// A `(date, score)` pair from the history. Unscored days are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredDay {
    pub date: NaiveDate,
    pub score: Option<f64>,
}

impl ScoredDay {
    pub fn new(date: NaiveDate, score: Option<f64>) -> Self {
        Self { date, score }
    }
}

impl From<&TrainingDay> for ScoredDay {
    fn from(day: &TrainingDay) -> Self {
        Self::new(day.date(), day.training_score())
    }
}

/// Intermediate load figures the rules are evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSnapshot {
    /// Number of scored days in the whole history
    pub scored_days: usize,
    /// Mean score over the acute window
    pub acute: f64,
    /// Mean score over the chronic window (equals `acute` with < 7 days)
    pub chronic: f64,
    /// acute / chronic, or 1.0 without chronic load
    pub ratio: f64,
    /// Score at or above which a day counts as hard
    pub hard_threshold: f64,
    /// Hard days within the acute window
    pub hard_days: usize,
    /// Score of the most recent day
    pub last_score: f64,
}

impl WorkloadSnapshot {
    /// Compute the snapshot from chronologically sorted scores
    fn from_scores(scores: &[f64]) -> Option<Self> {
        let last = *scores.last()?;

        let last7 = &scores[scores.len().saturating_sub(ACUTE_WINDOW)..];
        let last28 = &scores[scores.len().saturating_sub(CHRONIC_WINDOW)..];

        let acute = mean(last7);
        let chronic = if last28.len() >= ACUTE_WINDOW {
            mean(last28)
        } else {
            acute
        };

        let ratio = if chronic > 0.0 { acute / chronic } else { 1.0 };
        let hard_threshold = (chronic * HARD_CHRONIC_FACTOR).max(HARD_SCORE_FLOOR);
        let hard_days = last7.iter().filter(|&&s| s >= hard_threshold).count();

        Some(Self {
            scored_days: scores.len(),
            acute,
            chronic,
            ratio,
            hard_threshold,
            hard_days,
            last_score: last,
        })
    }

    fn last_day_was_hard(&self) -> bool {
        self.last_score >= self.hard_threshold
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Build the workload snapshot for a history. `None` when nothing is scored.
pub fn analyze(history: &[ScoredDay]) -> Option<WorkloadSnapshot> {
    let mut scored: Vec<(NaiveDate, f64)> = history
        .iter()
        .filter_map(|day| day.score.map(|score| (day.date, score)))
        .collect();

    // Stable sort keeps same-day sessions in their recorded order
    scored.sort_by_key(|(date, _)| *date);

    let scores: Vec<f64> = scored.into_iter().map(|(_, score)| score).collect();
    WorkloadSnapshot::from_scores(&scores)
}

/// Recommendation for the next session from raw `(date, score)` pairs
pub fn recommend(history: &[ScoredDay]) -> Option<Recommendation> {
    let snapshot = analyze(history)?;
    let recommendation = apply_rules(&snapshot);

    tracing::debug!(
        scored_days = snapshot.scored_days,
        acute = snapshot.acute,
        chronic = snapshot.chronic,
        ratio = snapshot.ratio,
        hard_days = snapshot.hard_days,
        intensity = %recommendation.intensity,
        "Computed recommendation"
    );

    Some(recommendation)
}

/// Recommendation for the next session from the stored training history.
/// `None` means there is not enough data to say anything.
pub fn compute_recommendation(history: &[TrainingDay]) -> Option<Recommendation> {
    let scored: Vec<ScoredDay> = history.iter().map(ScoredDay::from).collect();
    recommend(&scored)
}

/// The ordered rule ladder
pub fn apply_rules(s: &WorkloadSnapshot) -> Recommendation {
    if s.scored_days < MIN_SCORED_DAYS {
        return startup_session();
    }

    if s.hard_days >= 3 && s.ratio >= 1.3 {
        return rest_day(s.hard_days);
    }

    if s.hard_days >= 2 || (1.1..=1.3).contains(&s.ratio) {
        return recovery_session();
    }

    if (0.8..=1.1).contains(&s.ratio) && s.hard_days <= 1 {
        return if s.last_day_was_hard() {
            easy_after_hard_day()
        } else {
            normal_session()
        };
    }

    if s.ratio < 0.8 && s.chronic > 0.0 {
        return if s.last_day_was_hard() {
            moderate_compromise()
        } else {
            hard_session()
        };
    }

    fallback_session()
}

fn build(intensity: SessionIntensity, title: &str, explanation: String) -> Recommendation {
    Recommendation {
        intensity,
        title: title.to_string(),
        explanation,
    }
}

fn startup_session() -> Recommendation {
    build(
        SessionIntensity::Easy,
        "Easy startup session",
        "Only a few sessions are logged so far. Start with an easy session so your normal \
         training load can be learned."
            .to_string(),
    )
}

fn rest_day(hard_days: usize) -> Recommendation {
    build(
        SessionIntensity::Rest,
        "Rest day recommended",
        format!(
            "You have had {} hard sessions in the last week and this week's load is above your \
             normal level. A rest day lowers the risk of overload.",
            hard_days
        ),
    )
}

fn recovery_session() -> Recommendation {
    build(
        SessionIntensity::Easy,
        "Easy recovery session",
        "Your load over the last week is above your normal level. An easy session (walk, light \
         jog, technique) helps you recover without stopping activity altogether."
            .to_string(),
    )
}

fn easy_after_hard_day() -> Recommendation {
    build(
        SessionIntensity::Easy,
        "Easy session after a hard day",
        "Your last session was tough. Even though your overall load is stable, follow it up \
         with a lighter session."
            .to_string(),
    )
}

fn normal_session() -> Recommendation {
    build(
        SessionIntensity::Moderate,
        "Normal training session",
        "Your load over the last week is close to your normal level and you have not done many \
         hard sessions. A moderate-intensity session is reasonable."
            .to_string(),
    )
}

fn moderate_compromise() -> Recommendation {
    build(
        SessionIntensity::Moderate,
        "Moderate session",
        "You have trained less than your normal level, but your last session was tough. A \
         moderate-intensity session is a good compromise."
            .to_string(),
    )
}

fn hard_session() -> Recommendation {
    build(
        SessionIntensity::Hard,
        "Time for a harder session",
        "Your load over the last week has been lower than usual. You should be able to handle \
         a tougher session, provided you feel fresh."
            .to_string(),
    )
}

fn fallback_session() -> Recommendation {
    build(
        SessionIntensity::Moderate,
        "Normal training session",
        "Your load looks neither extremely high nor low. A moderate-intensity session is a safe \
         choice."
            .to_string(),
    )
}
