//! Supported models and their pricing

use serde::Serialize;
use tracing::warn;

pub const DEFAULT_MODEL: &str = "claude-3-sonnet-20240229";

/// A model offered to clients, priced in USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub input_cost: f64,
    pub output_cost: f64,
    pub max_tokens: u32,
}

pub const MODELS: [ModelInfo; 4] = [
    ModelInfo {
        id: "claude-3-opus-20240229",
        name: "Claude 3 Opus",
        description: "Most capable model for complex tasks",
        input_cost: 15.0,
        output_cost: 75.0,
        max_tokens: 4096,
    },
    ModelInfo {
        id: "claude-3-sonnet-20240229",
        name: "Claude 3 Sonnet",
        description: "Balanced performance and speed",
        input_cost: 3.0,
        output_cost: 15.0,
        max_tokens: 4096,
    },
    ModelInfo {
        id: "claude-3-5-sonnet-20241022",
        name: "Claude 3.5 Sonnet",
        description: "Latest balanced model with improved capabilities",
        input_cost: 3.0,
        output_cost: 15.0,
        max_tokens: 8192,
    },
    ModelInfo {
        id: "claude-3-haiku-20240307",
        name: "Claude 3 Haiku",
        description: "Fastest model for simple tasks",
        input_cost: 0.25,
        output_cost: 1.25,
        max_tokens: 4096,
    },
];

pub fn find(model: &str) -> Option<&'static ModelInfo> {
    MODELS.iter().find(|m| m.id == model)
}

pub fn is_known(model: &str) -> bool {
    find(model).is_some()
}

/// Price of a request in USD, rounded to 6 decimal places
///
/// Unknown models cost nothing.
pub fn cost(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    let Some(info) = find(model) else {
        warn!(model, "Unknown model pricing");
        return 0.0;
    };

    let input = f64::from(input_tokens) / 1_000_000.0 * info.input_cost;
    let output = f64::from(output_tokens) / 1_000_000.0 * info.output_cost;
    ((input + output) * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model_is_in_catalog() {
        assert!(is_known(DEFAULT_MODEL));
        assert!(!is_known("gpt-4"));
    }

    #[test]
    fn test_cost() {
        // 1000 * 3/1M + 500 * 15/1M = 0.003 + 0.0075
        assert_eq!(cost("claude-3-sonnet-20240229", 1000, 500), 0.0105);
        assert_eq!(cost("claude-3-haiku-20240307", 1_000_000, 0), 0.25);
    }

    #[test]
    fn test_cost_rounds_to_six_decimals() {
        // 7 * 0.25/1M = 0.00000175
        assert_eq!(cost("claude-3-haiku-20240307", 7, 0), 0.000002);
    }

    #[test]
    fn test_unknown_model_costs_nothing() {
        assert_eq!(cost("unknown-model", 1000, 1000), 0.0);
    }

    #[test]
    fn test_models_serialize_camel_case() {
        let json = serde_json::to_value(MODELS[0]).unwrap();
        assert_eq!(json["inputCost"], 15.0);
        assert_eq!(json["maxTokens"], 4096);
    }
}
