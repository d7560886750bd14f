// Result aggregation: per-option vote counts and percentages.

use serde::{Deserialize, Serialize};

use crate::poll::{OptionId, Poll, PollId};

/// Count and share of one option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionResult {
    pub option_id: OptionId,
    pub count: u64,
    /// Share of all recorded answers, 0.0..=100.0. Zero when nobody has
    /// answered yet.
    pub percentage: f64,
}

/// Derived view of the active poll's answers, one entry per option in the
/// poll's option order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultAggregate {
    pub poll_id: PollId,
    pub results: Vec<OptionResult>,
}

impl ResultAggregate {
    /// Build the aggregate for `poll` from per-option tallies.
    ///
    /// `counts[i]` is the number of answers for `poll.options[i]`.
    pub fn compute(poll: &Poll, counts: &[u64]) -> Self {
        let total: u64 = counts.iter().sum();

        let results = poll
            .options
            .iter()
            .zip(counts.iter().copied().chain(std::iter::repeat(0)))
            .map(|(option, count)| OptionResult {
                option_id: option.id.clone(),
                count,
                percentage: percentage(count, total),
            })
            .collect();

        ResultAggregate {
            poll_id: poll.id.clone(),
            results,
        }
    }

    /// Total number of answers recorded.
    pub fn total(&self) -> u64 {
        self.results.iter().map(|r| r.count).sum()
    }

    pub fn get(&self, option_id: &OptionId) -> Option<&OptionResult> {
        self.results.iter().find(|r| &r.option_id == option_id)
    }
}

fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    count as f64 / total as f64 * 100.0
}
