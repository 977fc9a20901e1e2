//! Reduction strategies that turn member responses into one response.
//!
//! Every strategy receives `(member_id, response)` pairs in completion order.
//! Where a strategy breaks ties by "first encountered" the winner therefore
//! depends on which member finished first.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use modelhub_kernel::{ModelError, ModelResponse, ModelResult};

/// Content prefix length that decides majority-vote groups.
pub const MAJORITY_PREFIX_CHARS: usize = 100;

/// How an ensemble reduces its members' responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleStrategy {
    /// Confidence weighted by normalized member weights; all contents concatenated
    #[default]
    WeightedAverage,
    /// Largest group of responses sharing a content prefix wins
    MajorityVote,
    /// Single most confident response wins
    BestModel,
}

impl EnsembleStrategy {
    /// Every strategy, in declaration order.
    pub const ALL: [EnsembleStrategy; 3] = [
        EnsembleStrategy::WeightedAverage,
        EnsembleStrategy::MajorityVote,
        EnsembleStrategy::BestModel,
    ];

    /// Wire name of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            EnsembleStrategy::WeightedAverage => "weighted_average",
            EnsembleStrategy::MajorityVote => "majority_vote",
            EnsembleStrategy::BestModel => "best_model",
        }
    }
}

impl fmt::Display for EnsembleStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnsembleStrategy {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EnsembleStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| ModelError::UnknownStrategy(s.to_string()))
    }
}

/// Reduce member responses with `strategy`.
///
/// `weights` must hold a weight for every member; missing entries count as 1.0.
pub(crate) fn combine(
    strategy: EnsembleStrategy,
    ensemble_name: &str,
    responses: &[(String, ModelResponse)],
    weights: &HashMap<String, f64>,
) -> ModelResult<ModelResponse> {
    if responses.is_empty() {
        return Err(ModelError::NoValidResponses(ensemble_name.to_string()));
    }

    Ok(match strategy {
        EnsembleStrategy::WeightedAverage => weighted_average(ensemble_name, responses, weights),
        EnsembleStrategy::MajorityVote => majority_vote(ensemble_name, responses),
        EnsembleStrategy::BestModel => best_model(ensemble_name, responses),
    })
}

fn mean_processing_time(responses: &[(String, ModelResponse)]) -> f64 {
    responses.iter().map(|(_, r)| r.processing_time).sum::<f64>() / responses.len() as f64
}

fn member_ids(responses: &[(String, ModelResponse)]) -> Vec<String> {
    responses.iter().map(|(id, _)| id.clone()).collect()
}

fn tagged(id: &str, response: &ModelResponse) -> String {
    format!("[{}] {}", id, response.content)
}

fn weighted_average(
    ensemble_name: &str,
    responses: &[(String, ModelResponse)],
    weights: &HashMap<String, f64>,
) -> ModelResponse {
    let weight_of = |id: &str| weights.get(id).copied().unwrap_or(1.0);
    let total_weight: f64 = responses.iter().map(|(id, _)| weight_of(id.as_str())).sum();

    let confidence: f64 = responses
        .iter()
        .map(|(id, response)| {
            let share = if total_weight > 0.0 {
                weight_of(id.as_str()) / total_weight
            } else {
                1.0 / responses.len() as f64
            };
            response.confidence * share
        })
        .sum();

    let content = responses
        .iter()
        .map(|(id, response)| tagged(id, response))
        .collect::<Vec<_>>()
        .join("\n\n");

    let used_weights: serde_json::Map<String, Value> = responses
        .iter()
        .map(|(id, _)| (id.clone(), json!(weight_of(id.as_str()))))
        .collect();

    ModelResponse::new(ensemble_name, content.trim())
        .with_confidence(confidence)
        .with_processing_time(mean_processing_time(responses))
        .with_metadata("strategy", EnsembleStrategy::WeightedAverage.as_str())
        .with_metadata("models_used", member_ids(responses))
        .with_metadata("weights", Value::Object(used_weights))
}

fn majority_vote(ensemble_name: &str, responses: &[(String, ModelResponse)]) -> ModelResponse {
    // Groups keep first-encounter order so the earliest group wins ties.
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    for (index, (_, response)) in responses.iter().enumerate() {
        let key: String = response.content.chars().take(MAJORITY_PREFIX_CHARS).collect();
        match groups.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, members)) => members.push(index),
            None => groups.push((key, vec![index])),
        }
    }

    let mut winner: &[usize] = &[];
    for (_, members) in &groups {
        if members.len() > winner.len() {
            winner = members.as_slice();
        }
    }

    let content = winner
        .iter()
        .map(|&i| tagged(&responses[i].0, &responses[i].1))
        .collect::<Vec<_>>()
        .join("\n\n");

    ModelResponse::new(ensemble_name, content)
        .with_confidence(winner.len() as f64 / responses.len() as f64)
        .with_processing_time(mean_processing_time(responses))
        .with_metadata("strategy", EnsembleStrategy::MajorityVote.as_str())
        .with_metadata("models_used", member_ids(responses))
        .with_metadata("group_size", winner.len())
        .with_metadata("total_models", responses.len())
}

fn best_model(ensemble_name: &str, responses: &[(String, ModelResponse)]) -> ModelResponse {
    let mut best = &responses[0];
    for candidate in &responses[1..] {
        if candidate.1.confidence > best.1.confidence {
            best = candidate;
        }
    }
    let (selected, response) = best;

    ModelResponse::new(ensemble_name, response.content.clone())
        .with_confidence(response.confidence)
        .with_processing_time(response.processing_time)
        .with_metadata("strategy", EnsembleStrategy::BestModel.as_str())
        .with_metadata("selected_model", selected.clone())
        .with_metadata("models_considered", member_ids(responses))
}
