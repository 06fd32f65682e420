// ==========================================
// Soft constraints
// ==========================================
// Weighted penalties, lower is better. The cost functions here are the
// single definition of each term: full evaluation and the solvers'
// incremental deltas both call them.
// ==========================================

use super::{codes, Constraint, ConstraintOutcome, ScheduleView, Violation};
use crate::domain::types::{ConstraintKind, PreferenceKind};
use crate::engine::context::SchedulingContext;
use std::collections::BTreeMap;

/// Share of a preference weight charged when an undated PreferTemplate
/// wish is not met by one assignment.
const UNDATED_PREFER_FACTOR: f64 = 0.5;

/// Sum of squared deviations from the mean.
pub fn squared_deviation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean) * (v - mean)).sum()
}

/// Change of `squared_deviation` when one member with value `current`
/// (in a group of `n` summing to `sum`) grows by one.
pub fn squared_deviation_delta(current: f64, sum: f64, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * (current - sum / n) + 1.0 - 1.0 / n
}

/// Unweighted preference cost of placing person on (block, template).
pub fn preference_cost(ctx: &SchedulingContext, person: usize, block: usize, template: usize) -> f64 {
    let date = ctx.blocks[block].date;
    let template_id = ctx.templates[template].template_id.as_str();
    let mut cost = 0.0;

    for pref in ctx.preferences_of(person) {
        let date_matches = pref.date.map_or(true, |d| d == date);
        match pref.kind {
            PreferenceKind::AvoidTemplate => {
                if date_matches && pref.template_id.as_deref() == Some(template_id) {
                    cost += pref.weight;
                }
            }
            PreferenceKind::PreferTemplate => {
                if date_matches && pref.template_id.as_deref().map_or(false, |t| t != template_id) {
                    cost += if pref.date.is_some() {
                        pref.weight
                    } else {
                        pref.weight * UNDATED_PREFER_FACTOR
                    };
                }
            }
            PreferenceKind::DayOff => {
                if pref.date == Some(date) {
                    cost += pref.weight;
                }
            }
        }
    }
    cost
}

/// Continuity cost of pairing `template` with the template already held
/// in the other half of the same day.
pub fn continuity_cost(template: usize, sibling_template: Option<usize>) -> f64 {
    match sibling_template {
        Some(other) if other != template => 1.0,
        _ => 0.0,
    }
}

// ==========================================
// Template balance
// ==========================================
/// Convex penalty on deviation from the mean resident assignments per
/// eligible template. Steers every backend towards the least-used
/// template when several are equally eligible.
pub struct TemplateBalanceConstraint {
    pub weight: f64,
}

impl Constraint for TemplateBalanceConstraint {
    fn code(&self) -> &'static str {
        codes::TEMPLATE_BALANCE
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Soft
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn evaluate(&self, ctx: &SchedulingContext, view: &ScheduleView) -> ConstraintOutcome {
        let eligible = ctx.balance_templates();
        let counts: Vec<f64> = view
            .template_counts
            .iter()
            .enumerate()
            .filter(|(t, _)| eligible[*t])
            .map(|(_, c)| *c as f64)
            .collect();
        let penalty = squared_deviation(&counts);

        let mut out = ConstraintOutcome {
            violations: Vec::new(),
            penalty,
        };
        let total: f64 = counts.iter().sum();
        if total > 0.0 && !counts.is_empty() {
            let mean = total / counts.len() as f64;
            for (t, count) in view.template_counts.iter().enumerate() {
                let count = *count as f64;
                if eligible[t] && count > 2.0 * mean && count - mean >= 2.0 {
                    out.violations.push(
                        Violation::soft(
                            codes::TEMPLATE_BALANCE,
                            count - mean,
                            format!(
                                "{} holds {} of {} resident assignments (mean {:.1})",
                                ctx.templates[t].name, count, total, mean
                            ),
                        )
                        .template(ctx, t)
                        .limit(mean),
                    );
                }
            }
        }
        out
    }
}

// ==========================================
// Preference fulfilment
// ==========================================
pub struct PreferenceConstraint {
    pub weight: f64,
}

impl Constraint for PreferenceConstraint {
    fn code(&self) -> &'static str {
        codes::PREFERENCE
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Soft
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn evaluate(&self, ctx: &SchedulingContext, view: &ScheduleView) -> ConstraintOutcome {
        let mut out = ConstraintOutcome::default();
        for (i, pl) in view.placements.iter().enumerate() {
            let cost = preference_cost(ctx, pl.person, pl.block, pl.template);
            if cost > 0.0 {
                out.penalty += cost;
                out.violations.push(
                    Violation::soft(
                        codes::PREFERENCE,
                        cost,
                        format!("{} goes against a stated preference", ctx.describe(pl)),
                    )
                    .person(ctx, pl.person)
                    .block(ctx, pl.block)
                    .template(ctx, pl.template)
                    .placements(vec![i]),
                );
            }
        }
        out
    }
}

// ==========================================
// Continuity: same activity for both halves of a day
// ==========================================
pub struct ContinuityConstraint {
    pub weight: f64,
}

impl Constraint for ContinuityConstraint {
    fn code(&self) -> &'static str {
        codes::CONTINUITY
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Soft
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn evaluate(&self, ctx: &SchedulingContext, view: &ScheduleView) -> ConstraintOutcome {
        let mut out = ConstraintOutcome::default();
        for (&(p, b), idx) in &view.by_person_block {
            // count each day once, from its earlier half
            let Some(sibling) = ctx.sibling_block(b) else { continue };
            if sibling < b {
                continue;
            }
            let Some(other) = view.by_person_block.get(&(p, sibling)) else { continue };
            let here = view.placements[idx[0]].template;
            let there = view.placements[other[0]].template;
            let cost = continuity_cost(here, Some(there));
            if cost > 0.0 {
                out.penalty += cost;
                out.violations.push(
                    Violation::soft(
                        codes::CONTINUITY,
                        cost,
                        format!(
                            "{} switches from {} to {} on {}",
                            ctx.people[p].person_id,
                            ctx.templates[here].name,
                            ctx.templates[there].name,
                            ctx.blocks[b].date
                        ),
                    )
                    .person(ctx, p)
                    .on(ctx.blocks[b].date)
                    .placements(vec![idx[0], other[0]]),
                );
            }
        }
        out
    }
}

// ==========================================
// Fairness: weekend/call burden dispersion within each PGY cohort
// ==========================================
pub struct FairnessConstraint {
    pub weight: f64,
}

impl Constraint for FairnessConstraint {
    fn code(&self) -> &'static str {
        codes::FAIRNESS
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Soft
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn evaluate(&self, ctx: &SchedulingContext, view: &ScheduleView) -> ConstraintOutcome {
        let mut cohorts: BTreeMap<u8, Vec<f64>> = BTreeMap::new();
        for p in 0..ctx.people.len() {
            if let Some(level) = ctx.cohort_of(p) {
                cohorts.entry(level).or_default().push(view.burden[p] as f64);
            }
        }

        let mut out = ConstraintOutcome::default();
        for (level, burdens) in &cohorts {
            let dispersion = squared_deviation(burdens);
            out.penalty += dispersion;
            let max = burdens.iter().cloned().fold(0.0, f64::max);
            let min = burdens.iter().cloned().fold(f64::INFINITY, f64::min);
            if burdens.len() > 1 && max - min >= 3.0 {
                out.violations.push(Violation::soft(
                    codes::FAIRNESS,
                    max - min,
                    format!(
                        "PGY-{} weekend/call burden ranges from {} to {}",
                        level, min, max
                    ),
                ));
            }
        }
        out
    }
}
