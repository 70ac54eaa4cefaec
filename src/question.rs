//! Question model
//!
//! A candidate or selected demo question with its declared metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Analytics,
    Search,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Basic,
    Intermediate,
    Advanced,
}

/// Where a question came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionSource {
    /// Produced by the text-generation service
    #[default]
    Generated,
    /// Mandatory question supplied by the user
    Target,
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "analytics" | "analytic" | "analysis" => Ok(Category::Analytics),
            "search" | "retrieval" => Ok(Category::Search),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" | "easy" | "simple" => Ok(Difficulty::Basic),
            "intermediate" | "medium" => Ok(Difficulty::Intermediate),
            "advanced" | "hard" | "complex" => Ok(Difficulty::Advanced),
            other => Err(format!("unknown difficulty '{}'", other)),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Analytics => write!(f, "analytics"),
            Category::Search => write!(f, "search"),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Basic => write!(f, "basic"),
            Difficulty::Intermediate => write!(f, "intermediate"),
            Difficulty::Advanced => write!(f, "advanced"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    pub category: Category,
    pub difficulty: Difficulty,
    /// `None` when the generator did not declare columns at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_columns: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_tables: Option<BTreeSet<String>>,
    #[serde(default)]
    pub source: QuestionSource,
    /// Generation round that produced the question (0 = initial)
    #[serde(default)]
    pub retry_attempt: u32,
}

impl Question {
    pub fn generated(text: impl Into<String>, category: Category, difficulty: Difficulty) -> Self {
        Self {
            text: text.into(),
            category,
            difficulty,
            referenced_columns: None,
            referenced_tables: None,
            source: QuestionSource::Generated,
            retry_attempt: 0,
        }
    }

    /// Wrap a mandatory user question. Targets default to intermediate analytics.
    pub fn target(text: impl Into<String>) -> Self {
        Self {
            source: QuestionSource::Target,
            ..Self::generated(text, Category::Analytics, Difficulty::Intermediate)
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.referenced_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.referenced_tables = Some(tables.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_retry_attempt(mut self, attempt: u32) -> Self {
        self.retry_attempt = attempt;
        self
    }

    /// Key used for duplicate detection: case and whitespace insensitive.
    pub fn dedup_key(&self) -> String {
        normalize_text(&self.text)
    }

    pub fn is_search(&self) -> bool {
        self.category == Category::Search
    }

    pub fn is_advanced_analytics(&self) -> bool {
        self.category == Category::Analytics && self.difficulty == Difficulty::Advanced
    }
}

pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Counts per difficulty and per category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionCounts {
    pub basic: usize,
    pub intermediate: usize,
    pub advanced: usize,
    pub analytics: usize,
    pub search: usize,
    pub advanced_analytics: usize,
}

impl DistributionCounts {
    pub fn of(questions: &[Question]) -> Self {
        let mut counts = Self::default();
        for q in questions {
            match q.difficulty {
                Difficulty::Basic => counts.basic += 1,
                Difficulty::Intermediate => counts.intermediate += 1,
                Difficulty::Advanced => counts.advanced += 1,
            }
            match q.category {
                Category::Analytics => counts.analytics += 1,
                Category::Search => counts.search += 1,
            }
            if q.is_advanced_analytics() {
                counts.advanced_analytics += 1;
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.analytics + self.search
    }
}

/// Render questions grouped by difficulty as markdown.
pub fn render_markdown(questions: &[Question]) -> String {
    let mut output = String::from("## Generated Questions\n\n");

    for (difficulty, heading) in [
        (Difficulty::Basic, "Basic"),
        (Difficulty::Intermediate, "Intermediate"),
        (Difficulty::Advanced, "Advanced"),
    ] {
        let group: Vec<&Question> = questions
            .iter()
            .filter(|q| q.difficulty == difficulty)
            .collect();
        if group.is_empty() {
            continue;
        }
        output.push_str(&format!("### {} Questions\n\n", heading));
        for (idx, q) in group.iter().enumerate() {
            let tag = if q.is_search() { " _(search)_" } else { "" };
            output.push_str(&format!("{}. {}{}\n", idx + 1, q.text, tag));
        }
        output.push('\n');
    }

    output
}
