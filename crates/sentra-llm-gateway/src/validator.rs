//! Response validation to ensure safe outputs from LLM providers.
//!
//! This module provides comprehensive response validation to ensure that
//! LLM outputs are safe, appropriate, and meet security requirements.

use anyhow::Result;
use regex::Regex;
use tracing::{debug, warn};

use crate::LlmResponse;

/// Response validator that ensures safe outputs from LLM providers.
pub struct ResponseValidator {
    /// Patterns that indicate potentially harmful content
    harmful_patterns: Vec<HarmfulPattern>,
    /// Maximum allowed response length
    max_response_length: usize,
}

/// A pattern that indicates potentially harmful content in responses.
#[derive(Debug, Clone)]
struct HarmfulPattern {
    /// The regex pattern to match
    pattern: Regex,
    /// Human-readable description of what this pattern detects
    description: String,
    /// Whether to block the response entirely or just sanitize
    block_response: bool,
}

impl ResponseValidator {
    /// Create a new response validator with default security patterns.
    pub fn new() -> Self {
        let harmful_patterns = vec![
            // Executable code patterns
            HarmfulPattern {
                pattern: Regex::new(r"(?i)(system|exec|eval|subprocess|shell|cmd|powershell|bash|sh)\s*\(").unwrap(),
                description: "Executable code in response".to_string(),
                block_response: true,
            },
            // File system operations
            HarmfulPattern {
                pattern: Regex::new(r"(?i)(open|read|write|delete|rm|mv|cp|mkdir|rmdir)\s*\(").unwrap(),
                description: "File system operations in response".to_string(),
                block_response: true,
            },
        ];

        Self {
            harmful_patterns,
            max_response_length: 1_048_576, // 1MB max
        }
    }

    /// Validate a response to ensure it's safe and appropriate.
    pub fn validate(&self, response: LlmResponse) -> Result<LlmResponse> {
        debug!("Validating LLM response");

        let validated_content = response.content().to_string();
        let mut blocked_patterns = Vec::new();

        // Check for harmful patterns
        for pattern in &self.harmful_patterns {
            if pattern.pattern.is_match(&validated_content) && pattern.block_response {
                blocked_patterns.push(pattern.description.clone());
            }
        }

        // Block response if harmful patterns found
        if !blocked_patterns.is_empty() {
            warn!("Blocking response due to harmful patterns: {:?}", blocked_patterns);
            anyhow::bail!("Response blocked due to security concerns: {}", blocked_patterns.join(", "));
        }

        // Validate response length
        if validated_content.len() > self.max_response_length {
            anyhow::bail!("Response too long: {} characters", validated_content.len());
        }

        Ok(response)
    }

    /// Check if a response would be blocked (for testing).
    pub fn would_block(&self, content: &str) -> bool {
        self.harmful_patterns
            .iter()
            .any(|pattern| pattern.block_response && pattern.pattern.is_match(content))
    }
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LlmResponse, TokenUsage};
    use std::time::Duration;

    fn response(content: &str) -> LlmResponse {
        let usage = TokenUsage { prompt_tokens: 1, completion_tokens: 1, total_tokens: 2 };
        LlmResponse::new(content.to_string(), usage, "mock".to_string(), "mock-1".to_string(), Duration::from_millis(1)).unwrap()
    }

    #[test]
    fn validator_blocks_executable_code() {
        let validator = ResponseValidator::new();
        let result = validator.validate(response("system('rm -rf /')"));
        assert!(result.is_err());
    }

    #[test]
    fn validator_blocks_filesystem_operations() {
        let validator = ResponseValidator::new();
        let result = validator.validate(response("open('/etc/passwd')"));
        assert!(result.is_err());
    }

    #[test]
    fn validator_allows_safe_response() {
        let validator = ResponseValidator::new();
        let result = validator.validate(response("Here is a summary of the document."));
        assert!(result.is_ok());
    }

    #[test]
    fn validator_rejects_oversized_response() {
        let validator = ResponseValidator::new();
        let huge = "a".repeat(2_000_000);
        let result = validator.validate(response(&huge));
        assert!(result.is_err());
    }

    #[test]
    fn would_block_matches_validate_outcome() {
        let validator = ResponseValidator::new();
        assert!(validator.would_block("exec('rm -rf /')"));
        assert!(!validator.would_block("a normal sentence"));
    }
}
