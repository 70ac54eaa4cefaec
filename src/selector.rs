//! Distribution Selector
//!
//! Chooses a bounded subset of the validated pool that meets the minimum
//! advanced-analytics and search quotas, then fills the rest by complexity.

use crate::question::{Difficulty, Question};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotas {
    pub min_advanced_analytics: usize,
    pub min_search: usize,
}

impl Quotas {
    /// Quotas clamped to the slots actually available; advanced analytics first.
    pub fn effective(&self, capacity: usize) -> Quotas {
        let advanced = self.min_advanced_analytics.min(capacity);
        let search = self.min_search.min(capacity - advanced);
        Quotas {
            min_advanced_analytics: advanced,
            min_search: search,
        }
    }
}

/// How far a pool or selection is from the requested distribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionDeficit {
    pub advanced_analytics_short: usize,
    pub search_short: usize,
    pub total_short: usize,
}

impl DistributionDeficit {
    pub fn is_empty(&self) -> bool {
        self.advanced_analytics_short == 0 && self.search_short == 0 && self.total_short == 0
    }

    fn measure(questions: &[&Question], capacity: usize, quotas: Quotas) -> Self {
        let advanced = questions.iter().filter(|q| q.is_advanced_analytics()).count();
        let search = questions.iter().filter(|q| q.is_search()).count();
        Self {
            advanced_analytics_short: quotas.min_advanced_analytics.saturating_sub(advanced),
            search_short: quotas.min_search.saturating_sub(search),
            total_short: capacity.saturating_sub(questions.len()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub questions: Vec<Question>,
    pub deficit: DistributionDeficit,
}

pub struct DistributionSelector {
    quotas: Quotas,
}

impl DistributionSelector {
    pub fn new(quotas: Quotas) -> Self {
        Self { quotas }
    }

    /// Deficit of the whole pool against `capacity` slots.
    pub fn assess(&self, pool: &[Question], capacity: usize) -> DistributionDeficit {
        let unique = dedupe(pool);
        DistributionDeficit::measure(&unique, capacity, self.quotas.effective(capacity))
    }

    pub fn select(&self, pool: &[Question], capacity: usize) -> Selection {
        let quotas = self.quotas.effective(capacity);
        let unique = dedupe(pool);

        let mut advanced: Vec<&Question> = Vec::new();
        let mut intermediate: Vec<&Question> = Vec::new();
        let mut basic: Vec<&Question> = Vec::new();
        let mut search: Vec<&Question> = Vec::new();
        for q in unique {
            if q.is_search() {
                search.push(q);
            } else {
                match q.difficulty {
                    Difficulty::Advanced => advanced.push(q),
                    Difficulty::Intermediate => intermediate.push(q),
                    Difficulty::Basic => basic.push(q),
                }
            }
        }

        let take_advanced = advanced.len().min(quotas.min_advanced_analytics);
        let take_search = search.len().min(quotas.min_search);
        let mut remaining = capacity - take_advanced - take_search;

        let extra = |available: usize, remaining: &mut usize| {
            let n = available.min(*remaining);
            *remaining -= n;
            n
        };
        let extra_advanced = extra(advanced.len() - take_advanced, &mut remaining);
        let take_intermediate = extra(intermediate.len(), &mut remaining);
        let extra_search = extra(search.len() - take_search, &mut remaining);
        let take_basic = extra(basic.len(), &mut remaining);

        let chosen: Vec<&Question> = advanced
            .into_iter()
            .take(take_advanced + extra_advanced)
            .chain(intermediate.into_iter().take(take_intermediate))
            .chain(basic.into_iter().take(take_basic))
            .chain(search.into_iter().take(take_search + extra_search))
            .collect();

        let deficit = DistributionDeficit::measure(&chosen, capacity, quotas);
        Selection {
            questions: chosen.into_iter().cloned().collect(),
            deficit,
        }
    }
}

fn dedupe(pool: &[Question]) -> Vec<&Question> {
    let mut seen = HashSet::new();
    pool.iter().filter(|q| seen.insert(q.dedup_key())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::{Category, DistributionCounts};

    fn q(text: &str, category: Category, difficulty: Difficulty) -> Question {
        Question::generated(text, category, difficulty)
    }

    fn pool() -> Vec<Question> {
        let mut pool = Vec::new();
        for i in 0..4 {
            pool.push(q(&format!("adv {}", i), Category::Analytics, Difficulty::Advanced));
            pool.push(q(&format!("int {}", i), Category::Analytics, Difficulty::Intermediate));
            pool.push(q(&format!("basic {}", i), Category::Analytics, Difficulty::Basic));
            pool.push(q(&format!("search {}", i), Category::Search, Difficulty::Basic));
        }
        pool
    }

    fn selector() -> DistributionSelector {
        DistributionSelector::new(Quotas {
            min_advanced_analytics: 3,
            min_search: 3,
        })
    }

    #[test]
    fn test_selection_truncates_lowest_priority_first() {
        let selection = selector().select(&pool(), 12);
        let counts = DistributionCounts::of(&selection.questions);
        assert_eq!(selection.questions.len(), 12);
        assert_eq!(counts.advanced_analytics, 4);
        assert_eq!(counts.intermediate, 4);
        assert_eq!(counts.search, 4);
        assert_eq!(counts.analytics, 8);
        assert!(selection.deficit.is_empty());
        assert!(selection.questions[0].text.starts_with("adv"));
    }

    #[test]
    fn test_quotas_kept_under_tight_capacity() {
        let selection = selector().select(&pool(), 6);
        let counts = DistributionCounts::of(&selection.questions);
        assert_eq!(counts.advanced_analytics, 3);
        assert_eq!(counts.search, 3);
        assert!(selection.deficit.is_empty());
    }

    #[test]
    fn test_deficit_reported() {
        let thin = vec![
            q("adv", Category::Analytics, Difficulty::Advanced),
            q("basic", Category::Analytics, Difficulty::Basic),
            q("BASIC ", Category::Analytics, Difficulty::Basic),
        ];
        let selection = selector().select(&thin, 12);
        assert_eq!(selection.questions.len(), 2);
        assert_eq!(
            selection.deficit,
            DistributionDeficit {
                advanced_analytics_short: 2,
                search_short: 3,
                total_short: 10,
            }
        );
        assert_eq!(selector().assess(&thin, 12), selection.deficit);
    }

    #[test]
    fn test_effective_quotas_clamp_to_capacity() {
        let quotas = Quotas {
            min_advanced_analytics: 3,
            min_search: 3,
        };
        assert_eq!(
            quotas.effective(4),
            Quotas {
                min_advanced_analytics: 3,
                min_search: 1
            }
        );
        assert_eq!(quotas.effective(0).min_search, 0);
    }
}
