//! Small shared helpers used across the config, models, and provider modules.

use crate::models::CompletionRequest;

/// `serde(with = "duration_serde")` for fields stored as a plain integer
/// count of seconds rather than a `{secs, nanos}` struct.
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Approximate (input, output) token counts for a request. Not a real
/// tokenizer: 4 characters of prompt/system text is treated as one token.
pub fn estimate_tokens(request: &CompletionRequest) -> (u32, u32) {
    let prompt_tokens = (request.prompt.len() as f64 / 4.0).ceil() as u32;
    let system_tokens = request
        .system_prompt
        .as_ref()
        .map(|s| (s.len() as f64 / 4.0).ceil() as u32)
        .unwrap_or(0);
    let input = (prompt_tokens + system_tokens).max(1);
    let output = if request.max_tokens > 0 {
        request.max_tokens
    } else {
        1000
    };
    (input, output)
}

/// Dollar estimate for `input`/`output` token counts at the given per-1K
/// rates. Self-hosted adapters pass `0.0` for both rates.
pub fn calculate_cost(input_tokens: u32, output_tokens: u32, input_per_1k: f64, output_per_1k: f64) -> f64 {
    (input_tokens as f64 / 1000.0) * input_per_1k + (output_tokens as f64 / 1000.0) * output_per_1k
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_uses_four_chars_per_token() {
        let req = CompletionRequest {
            prompt: "a".repeat(40),
            ..Default::default()
        };
        let (input, output) = estimate_tokens(&req);
        assert_eq!(input, 10);
        assert_eq!(output, 1000);
    }

    #[test]
    fn estimate_tokens_includes_system_prompt() {
        let req = CompletionRequest {
            prompt: "a".repeat(4),
            system_prompt: Some("b".repeat(8)),
            max_tokens: 256,
            ..Default::default()
        };
        let (input, output) = estimate_tokens(&req);
        assert_eq!(input, 3);
        assert_eq!(output, 256);
    }

    #[test]
    fn estimate_tokens_never_zero() {
        let req = CompletionRequest::default();
        let (input, _) = estimate_tokens(&req);
        assert!(input >= 1);
    }

    #[test]
    fn calculate_cost_is_linear() {
        let cost = calculate_cost(1000, 1000, 0.01, 0.03);
        assert!((cost - 0.04).abs() < 1e-9);
    }
}
