use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::utils::excerpt_around;

/// Upper bound on the excerpt attached to a classified failure.
pub const EXCERPT_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureCategory {
    InvalidCredentials,
    InvalidModel,
    ContextOverflow,
    SummarizationFailure,
    EventLoopClosed,
    TruncatedResponse,
    EditFormatMismatch,
    RateLimit,
    Timeout,
    ConnectionRefused,
    ServiceUnavailable,
}

impl SignatureCategory {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid or missing API credentials",
            Self::InvalidModel => "invalid model id",
            Self::ContextOverflow => "context window exceeded",
            Self::SummarizationFailure => "chat summarization failed",
            Self::EventLoopClosed => "event loop closed mid-request",
            Self::TruncatedResponse => "model response was truncated",
            Self::EditFormatMismatch => "model output did not follow the edit format",
            Self::RateLimit => "rate limited by provider",
            Self::Timeout => "provider request timed out",
            Self::ConnectionRefused => "connection to provider refused",
            Self::ServiceUnavailable => "provider temporarily unavailable",
        }
    }
}

/// One row of a classification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureRule {
    pub pattern: &'static str,
    pub category: SignatureCategory,
    pub retryable: bool,
}

pub(super) const fn rule(
    pattern: &'static str,
    category: SignatureCategory,
    retryable: bool,
) -> SignatureRule {
    SignatureRule {
        pattern,
        category,
        retryable,
    }
}

/// Rules shared by every backend. Terminal user/config errors come first so a
/// transcript mentioning both a bad key and a retry is not retried.
pub const COMMON_RULES: &[SignatureRule] = &[
    rule(
        r"authenticationerror|invalid api key|incorrect api key|no api key|api key (?:is )?(?:missing|not (?:set|found|provided))|401 unauthorized",
        SignatureCategory::InvalidCredentials,
        false,
    ),
    rule(
        r"notfounderror|is not a valid model|unknown model|invalid model|no such model|model \S+ does not exist",
        SignatureCategory::InvalidModel,
        false,
    ),
    rule(
        r"context_length_exceeded|maximum context length|context window (?:exceeded|is full)",
        SignatureCategory::ContextOverflow,
        false,
    ),
    rule(
        r"ratelimiterror|rate limit (?:exceeded|reached)|(?:status|error|code|http)\W{0,3}429\b|error\W{0,3}too many requests",
        SignatureCategory::RateLimit,
        true,
    ),
    rule(
        r"timeouterror|(?:request|connection|read) timed out",
        SignatureCategory::Timeout,
        true,
    ),
    rule(
        r"connection refused|econnrefused|apiconnectionerror|connecterror",
        SignatureCategory::ConnectionRefused,
        true,
    ),
    rule(
        r"\b50[234]\W{0,3}(?:service unavailable|bad gateway|gateway timeout)|serviceunavailableerror|overloaded_error",
        SignatureCategory::ServiceUnavailable,
        true,
    ),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureMatch {
    pub category: SignatureCategory,
    pub retryable: bool,
    pub excerpt: String,
}

/// Ordered, first-match-wins classification table.
#[derive(Debug)]
pub struct SignatureTable {
    rules: Vec<(Regex, SignatureRule)>,
}

impl SignatureTable {
    /// Compile rule groups in order; patterns are matched case-insensitively.
    pub fn compile(groups: &[&[SignatureRule]]) -> Self {
        let rules = groups
            .iter()
            .flat_map(|group| group.iter())
            .filter_map(|rule| match Regex::new(&format!("(?i){}", rule.pattern)) {
                Ok(regex) => Some((regex, *rule)),
                Err(e) => {
                    warn!(pattern = rule.pattern, error = %e, "Skipping invalid signature pattern");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> impl Iterator<Item = &SignatureRule> {
        self.rules.iter().map(|(_, rule)| rule)
    }

    pub fn classify(&self, text: &str) -> Option<SignatureMatch> {
        self.rules.iter().find_map(|(regex, rule)| {
            regex.find(text).map(|m| SignatureMatch {
                category: rule.category,
                retryable: rule.retryable,
                excerpt: excerpt_around(text, m.start(), m.end(), EXCERPT_MAX_CHARS),
            })
        })
    }
}
