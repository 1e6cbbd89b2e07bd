//! Model resolution: caller-visible model ids map onto internal upstream
//! model ids through prioritized pattern rules.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::ProxyError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Regex,
    Contains,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMapping {
    pub external_pattern: String,
    pub internal_id: String,
    pub match_type: MatchType,
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ModelMapping {
    pub fn new(pattern: &str, internal_id: &str, match_type: MatchType, priority: i32) -> Self {
        Self {
            external_pattern: pattern.to_string(),
            internal_id: internal_id.to_string(),
            match_type,
            priority,
            enabled: true,
        }
    }
}

struct CompiledRule {
    mapping: ModelMapping,
    regex: Option<Regex>,
}

impl CompiledRule {
    fn matches(&self, input: &str) -> bool {
        match self.mapping.match_type {
            MatchType::Exact => self.mapping.external_pattern == input,
            MatchType::Regex => self.regex.as_ref().is_some_and(|re| re.is_match(input)),
            MatchType::Contains => input
                .to_lowercase()
                .contains(&self.mapping.external_pattern.to_lowercase()),
        }
    }
}

/// Compiled snapshot of the rule table, ordered by descending priority with
/// ties kept in the order the rules were given.
struct ResolverTable {
    rules: Vec<CompiledRule>,
}

impl ResolverTable {
    fn build(mappings: &[ModelMapping]) -> Self {
        let mut rules: Vec<CompiledRule> = mappings
            .iter()
            .filter(|m| m.enabled)
            .filter_map(|mapping| {
                let regex = match mapping.match_type {
                    MatchType::Regex => {
                        let pattern = anchor_whole_string(&mapping.external_pattern);
                        match Regex::new(&pattern) {
                            Ok(re) => Some(re),
                            Err(e) => {
                                warn!(
                                    "[Resolver] skipping invalid regex rule '{}': {}",
                                    mapping.external_pattern, e
                                );
                                return None;
                            }
                        }
                    }
                    _ => None,
                };
                Some(CompiledRule {
                    mapping: mapping.clone(),
                    regex,
                })
            })
            .collect();
        // Stable sort keeps the given order on priority ties.
        rules.sort_by_key(|r| std::cmp::Reverse(r.mapping.priority));
        Self { rules }
    }

    fn resolve(&self, input: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.matches(input))
            .map(|rule| rule.mapping.internal_id.as_str())
    }
}

fn anchor_whole_string(pattern: &str) -> String {
    let prefixed = pattern.starts_with('^');
    let suffixed = pattern.ends_with('$');
    match (prefixed, suffixed) {
        (true, true) => pattern.to_string(),
        _ => format!(
            "^(?:{})$",
            pattern.trim_start_matches('^').trim_end_matches('$')
        ),
    }
}

/// Request handlers take a snapshot at entry; the table swaps atomically on
/// reload so an in-flight request never sees a half-updated rule set.
pub struct ModelResolver {
    table: RwLock<Arc<ResolverTable>>,
}

impl ModelResolver {
    pub fn new(mappings: &[ModelMapping]) -> Self {
        Self {
            table: RwLock::new(Arc::new(ResolverTable::build(mappings))),
        }
    }

    pub async fn reload(&self, mappings: &[ModelMapping]) {
        let table = Arc::new(ResolverTable::build(mappings));
        *self.table.write().await = table;
    }

    pub async fn resolve(&self, input: &str) -> Result<String, ProxyError> {
        let table = self.table.read().await.clone();
        table
            .resolve(input)
            .map(String::from)
            .ok_or_else(|| ProxyError::UnsupportedModel(input.to_string()))
    }

    /// Externally visible model ids, for `/v1/models`.
    pub async fn external_ids(&self) -> Vec<String> {
        let table = self.table.read().await.clone();
        let mut ids: Vec<String> = table
            .rules
            .iter()
            .filter(|r| matches!(r.mapping.match_type, MatchType::Exact))
            .map(|r| r.mapping.external_pattern.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}
