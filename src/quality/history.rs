use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::types::{NO_IMPROVEMENTS, QualityResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
    InsufficientData,
    NoData,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Improving => "improving",
            Self::Declining => "declining",
            Self::Stable => "stable",
            Self::InsufficientData => "insufficient_data",
            Self::NoData => "no_data",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityTrend {
    pub average_score: f64,
    pub min_score: f64,
    pub max_score: f64,
    pub count: usize,
    pub trend: TrendDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCount {
    pub issue: String,
    pub occurrences: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub project_id: String,
    pub total_validations: usize,
    pub gate_pass_rate: f64,
    pub per_stage_averages: BTreeMap<String, f64>,
    pub top_recurring_issues: Vec<IssueCount>,
}

/// Per-project validation history, oldest first.
///
/// Append-only apart from dropping the oldest entries past `max_per_project`.
#[derive(Debug)]
pub(crate) struct QualityHistory {
    per_project: HashMap<String, VecDeque<QualityResult>>,
    max_per_project: usize,
}

impl QualityHistory {
    pub fn new(max_per_project: usize) -> Self {
        Self {
            per_project: HashMap::new(),
            max_per_project: max_per_project.max(1),
        }
    }

    pub fn record(&mut self, project_id: &str, result: QualityResult) {
        let entries = self.per_project.entry(project_id.to_string()).or_default();
        if entries.len() >= self.max_per_project {
            entries.pop_front();
        }
        entries.push_back(result);
    }

    pub fn results(&self, project_id: &str) -> impl Iterator<Item = &QualityResult> {
        self.per_project.get(project_id).into_iter().flatten()
    }

    pub fn len(&self, project_id: &str) -> usize {
        self.per_project.get(project_id).map_or(0, VecDeque::len)
    }

    pub fn trends(
        &self,
        project_id: &str,
        days: u32,
        now: DateTime<Utc>,
        delta: f64,
        min_samples: usize,
    ) -> QualityTrend {
        let since = Duration::try_days(i64::from(days))
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let scores: Vec<f64> = self
            .results(project_id)
            .filter(|r| r.timestamp >= since)
            .map(|r| r.overall_score)
            .collect();
        compute_trend(&scores, delta, min_samples)
    }

    pub fn report(&self, project_id: &str, top_issues: usize) -> QualityReport {
        let total = self.len(project_id);
        let mut passed = 0usize;
        let mut stage_totals: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        let mut issues: HashMap<String, usize> = HashMap::new();

        for result in self.results(project_id) {
            if result.passes_gate {
                passed += 1;
            }
            for (stage, score) in &result.stage_scores {
                let entry = stage_totals.entry(stage.clone()).or_default();
                entry.0 += score;
                entry.1 += 1;
            }
            for improvement in &result.improvements {
                if improvement != NO_IMPROVEMENTS {
                    *issues.entry(normalize_issue(improvement)).or_default() += 1;
                }
            }
        }

        let mut top: Vec<IssueCount> = issues
            .into_iter()
            .map(|(issue, occurrences)| IssueCount { issue, occurrences })
            .collect();
        top.sort_by(|a, b| {
            b.occurrences
                .cmp(&a.occurrences)
                .then_with(|| a.issue.cmp(&b.issue))
        });
        top.truncate(top_issues);

        QualityReport {
            project_id: project_id.to_string(),
            total_validations: total,
            gate_pass_rate: if total == 0 {
                0.0
            } else {
                passed as f64 / total as f64
            },
            per_stage_averages: stage_totals
                .into_iter()
                .map(|(stage, (sum, n))| (stage, sum / n as f64))
                .collect(),
            top_recurring_issues: top,
        }
    }
}

/// Compare the mean of the first half of `scores` with the second half.
pub fn compute_trend(scores: &[f64], delta: f64, min_samples: usize) -> QualityTrend {
    if scores.is_empty() {
        return QualityTrend {
            average_score: 0.0,
            min_score: 0.0,
            max_score: 0.0,
            count: 0,
            trend: TrendDirection::NoData,
        };
    }

    let mean = |s: &[f64]| s.iter().sum::<f64>() / s.len() as f64;
    let trend = if scores.len() < min_samples {
        TrendDirection::InsufficientData
    } else {
        let (first, second) = scores.split_at(scores.len() / 2);
        let change = mean(second) - mean(first);
        if change > delta {
            TrendDirection::Improving
        } else if change < -delta {
            TrendDirection::Declining
        } else {
            TrendDirection::Stable
        }
    };

    QualityTrend {
        average_score: mean(scores),
        min_score: scores.iter().copied().fold(f64::INFINITY, f64::min),
        max_score: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        count: scores.len(),
        trend,
    }
}

/// Collapse digit runs so "Resolve 2 TODO" and "Resolve 5 TODO" count as one issue.
fn normalize_issue(issue: &str) -> String {
    let mut normalized = String::with_capacity(issue.len());
    let mut in_digits = false;
    for c in issue.chars() {
        if c.is_ascii_digit() {
            if !in_digits {
                normalized.push('N');
            }
            in_digits = true;
        } else {
            in_digits = false;
            normalized.push(c);
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(score: f64, passes: bool, improvements: &[&str]) -> QualityResult {
        QualityResult::new(
            score,
            BTreeMap::from([("syntax".to_string(), score)]),
            passes,
            improvements.iter().map(|s| s.to_string()).collect(),
            vec![],
        )
    }

    #[test]
    fn test_trend_directions() {
        assert_eq!(compute_trend(&[], 0.05, 5).trend, TrendDirection::NoData);
        assert_eq!(
            compute_trend(&[0.5, 0.6], 0.05, 5).trend,
            TrendDirection::InsufficientData
        );
        assert_eq!(
            compute_trend(&[0.4, 0.5, 0.5, 0.8, 0.9], 0.05, 5).trend,
            TrendDirection::Improving
        );
        assert_eq!(
            compute_trend(&[0.9, 0.9, 0.5, 0.4, 0.4], 0.05, 5).trend,
            TrendDirection::Declining
        );
        let stable = compute_trend(&[0.7, 0.72, 0.7, 0.71, 0.7, 0.72], 0.05, 5);
        assert_eq!(stable.trend, TrendDirection::Stable);
        assert_eq!(stable.min_score, 0.7);
        assert_eq!(stable.max_score, 0.72);
    }

    #[test]
    fn test_history_is_capped_oldest_first() {
        let mut history = QualityHistory::new(3);
        for score in [0.1, 0.2, 0.3, 0.4] {
            history.record("p", result(score, false, &[]));
        }
        let scores: Vec<f64> = history.results("p").map(|r| r.overall_score).collect();
        assert_eq!(scores, vec![0.2, 0.3, 0.4]);
        assert_eq!(history.len("other"), 0);
    }

    #[test]
    fn test_trends_window_excludes_old_results() {
        let mut history = QualityHistory::new(100);
        let mut old = result(0.1, false, &[]);
        old.timestamp = Utc::now() - Duration::days(30);
        history.record("p", old);
        history.record("p", result(0.9, true, &[]));

        let trend = history.trends("p", 7, Utc::now(), 0.05, 5);
        assert_eq!(trend.count, 1);
        assert_eq!(trend.average_score, 0.9);
    }

    #[test]
    fn test_widest_window_covers_all_history() {
        let mut history = QualityHistory::new(100);
        let mut old = result(0.2, false, &[]);
        old.timestamp = Utc::now() - Duration::days(3650);
        history.record("p", old);
        history.record("p", result(0.8, true, &[]));

        let trend = history.trends("p", u32::MAX, Utc::now(), 0.05, 5);
        assert_eq!(trend.count, 2);
        assert_eq!(trend.trend, TrendDirection::InsufficientData);
    }

    #[test]
    fn test_report_groups_recurring_issues() {
        let mut history = QualityHistory::new(100);
        history.record("p", result(0.5, false, &["Resolve 2 TODO/FIXME marker(s)"]));
        history.record("p", result(0.6, false, &["Resolve 5 TODO/FIXME marker(s)", "Add tests"]));
        history.record("p", result(0.9, true, &[]));

        let report = history.report("p", 5);
        assert_eq!(report.total_validations, 3);
        assert!((report.gate_pass_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((report.per_stage_averages["syntax"] - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.top_recurring_issues[0].issue, "Resolve N TODO/FIXME marker(s)");
        assert_eq!(report.top_recurring_issues[0].occurrences, 2);
        assert_eq!(report.top_recurring_issues.len(), 2);
    }
}
