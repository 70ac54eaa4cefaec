//! Pipeline Configuration
//!
//! Run-level knobs for the question pipeline. Loadable from JSON; every
//! field has a default so partial files are accepted.

use crate::error::{ForgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How a generator's self-reported `search` category is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryPolicy {
    /// Accept the declared category as-is
    TrustDeclared,
    /// Keep `search` only for retrieval-style questions without structured columns
    #[default]
    Reclassify,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Size of the final question list, targets included
    pub target_count: usize,
    pub min_advanced_analytics: usize,
    pub min_search: usize,
    /// Retry rounds after the initial round
    pub max_retries: u32,
    /// Initial pool is `target_count * initial_oversample`
    pub initial_oversample: usize,
    /// Lower bound on candidates requested per retry round
    pub min_retry_batch: usize,
    /// Share of analytics questions requested from the generator
    pub analytics_share: f64,
    pub category_policy: CategoryPolicy,
    /// Number of follow-up chains to build; 0 disables the stage
    pub follow_up_chains: usize,
    pub brief: DemoBrief,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_count: 12,
            min_advanced_analytics: 3,
            min_search: 3,
            max_retries: 3,
            initial_oversample: 2,
            min_retry_batch: 12,
            analytics_share: 0.7,
            category_policy: CategoryPolicy::default(),
            follow_up_chains: 0,
            brief: DemoBrief::default(),
        }
    }
}

/// Demo context woven into generation prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoBrief {
    pub company_name: String,
    pub industry: String,
    pub title: String,
    pub business_value: String,
    pub language: String,
}

impl Default for DemoBrief {
    fn default() -> Self {
        Self {
            company_name: "Demo Company".to_string(),
            industry: "Retail".to_string(),
            title: "Analytics Demo".to_string(),
            business_value: "Data-driven decision making".to_string(),
            language: "English".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// More retries, trusts no self-reported categories.
    pub fn strict() -> Self {
        Self {
            max_retries: 5,
            initial_oversample: 3,
            category_policy: CategoryPolicy::Reclassify,
            ..Self::default()
        }
    }

    /// Single retry, declared categories accepted.
    pub fn lenient() -> Self {
        Self {
            max_retries: 1,
            min_advanced_analytics: 2,
            min_search: 2,
            category_policy: CategoryPolicy::TrustDeclared,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_count == 0 {
            return Err(ForgeError::Config("target_count must be at least 1".to_string()));
        }
        if self.min_advanced_analytics + self.min_search > self.target_count {
            return Err(ForgeError::Config(format!(
                "quotas ({} advanced + {} search) exceed target_count {}",
                self.min_advanced_analytics, self.min_search, self.target_count
            )));
        }
        if self.initial_oversample == 0 {
            return Err(ForgeError::Config("initial_oversample must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.analytics_share) {
            return Err(ForgeError::Config(format!(
                "analytics_share must be within [0, 1], got {}",
                self.analytics_share
            )));
        }
        Ok(())
    }

    pub fn initial_request_count(&self) -> usize {
        self.target_count * self.initial_oversample
    }

    /// Candidates to request in a retry round when `needed` slots are open.
    pub fn retry_request_count(&self, needed: usize) -> usize {
        (needed * 2).max(self.min_retry_batch)
    }
}
