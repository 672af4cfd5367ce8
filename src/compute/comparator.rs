//! Cross-formula comparison over sealed runs.
//!
//! The report is a pure function of the runs handed in, so it can be
//! re-derived from run history at any time.

use std::collections::BTreeMap;

use crate::compute::stats;
use crate::schema::{
    ComparatorConfig, ComparisonReport, DomainId, DomainRanking, EvolutionRun, FamilyAggregate,
    FamilyId, FamilyScore, UniversalProperty,
};

/// Ranks families per domain and across domains.
#[derive(Debug, Clone)]
pub struct CrossFormulaComparator {
    config: ComparatorConfig,
    significance: f64,
}

impl CrossFormulaComparator {
    pub fn new(config: ComparatorConfig, significance: f64) -> Self {
        Self {
            config,
            significance,
        }
    }

    /// Build the comparison report.
    ///
    /// Runs with invalid statistics are excluded. When a (domain, family)
    /// pair has several runs the fittest one represents it.
    pub fn compare<'a, I>(&self, runs: I) -> ComparisonReport
    where
        I: IntoIterator<Item = &'a EvolutionRun>,
    {
        let mut table: BTreeMap<DomainId, BTreeMap<FamilyId, &EvolutionRun>> = BTreeMap::new();
        let mut excluded_runs = 0;

        for run in runs {
            if !run.is_countable() {
                excluded_runs += 1;
                continue;
            }
            let slot = table
                .entry(run.domain_id.clone())
                .or_default()
                .entry(run.family_id)
                .or_insert(run);
            if run.best_fitness() > slot.best_fitness() {
                *slot = run;
            }
        }

        let rankings = table
            .iter()
            .map(|(domain_id, families)| rank_domain(domain_id, families))
            .collect();
        let aggregates = self.aggregate(&table);
        let best_family = best_family(&aggregates);

        let total_domains = table.len();
        let universal_families = aggregates
            .iter()
            .filter(|a| total_domains > 0 && a.strong_domains * 2 > total_domains)
            .map(|a| a.family_id)
            .collect();

        ComparisonReport {
            rankings,
            aggregates,
            best_family,
            universal_families,
            universal_properties: self.universal_properties(&table),
            excluded_runs,
        }
    }

    fn aggregate(
        &self,
        table: &BTreeMap<DomainId, BTreeMap<FamilyId, &EvolutionRun>>,
    ) -> Vec<FamilyAggregate> {
        let mut per_family: BTreeMap<FamilyId, Vec<f64>> = BTreeMap::new();
        for families in table.values() {
            for (&family, run) in families {
                per_family.entry(family).or_default().push(run.best_fitness());
            }
        }

        per_family
            .into_iter()
            .map(|(family_id, fitness)| FamilyAggregate {
                family_id,
                mean_fitness: stats::mean(&fitness),
                domains: fitness.len(),
                strong_domains: fitness
                    .iter()
                    .filter(|&&f| f >= self.config.strong_fitness)
                    .count(),
            })
            .collect()
    }

    fn universal_properties(
        &self,
        table: &BTreeMap<DomainId, BTreeMap<FamilyId, &EvolutionRun>>,
    ) -> Vec<UniversalProperty> {
        // Majority is over every compared domain, not only those the family ran in.
        let total_domains = table.len();
        // (family, component index) -> (name, significant, valid correlations)
        let mut tally: BTreeMap<(FamilyId, usize), (String, usize, Vec<f64>)> = BTreeMap::new();

        for families in table.values() {
            for (&family, run) in families {
                for (i, screen) in run.feature_screen.iter().enumerate() {
                    let entry = tally
                        .entry((family, i))
                        .or_insert_with(|| (screen.component.clone(), 0, Vec::new()));
                    if screen.valid {
                        entry.2.push(screen.correlation);
                        if screen.p_value < self.significance {
                            entry.1 += 1;
                        }
                    }
                }
            }
        }

        tally
            .into_iter()
            .filter(|(_, (_, significant, _))| significant * 2 > total_domains)
            .map(|((family_id, _), (component, significant, correlations))| {
                UniversalProperty {
                    family_id,
                    component,
                    significant_domains: significant,
                    total_domains,
                    mean_correlation: stats::mean(&correlations),
                }
            })
            .collect()
    }
}

fn rank_domain(domain_id: &str, families: &BTreeMap<FamilyId, &EvolutionRun>) -> DomainRanking {
    let mut ranking: Vec<FamilyScore> = families
        .iter()
        .map(|(&family_id, run)| FamilyScore {
            family_id,
            best_fitness: run.best_fitness(),
            p_value: run.best_result.p_value,
        })
        .collect();
    // Stable sort over family order: ties keep the lower index first.
    ranking.sort_by(|a, b| b.best_fitness.total_cmp(&a.best_fitness));

    DomainRanking {
        domain_id: domain_id.to_string(),
        ranking,
    }
}

fn best_family(aggregates: &[FamilyAggregate]) -> Option<FamilyId> {
    let mut best: Option<&FamilyAggregate> = None;
    for aggregate in aggregates {
        if best.is_none_or(|b| aggregate.mean_fitness > b.mean_fitness) {
            best = Some(aggregate);
        }
    }
    best.map(|a| a.family_id)
}
