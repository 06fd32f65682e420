// ==========================================
// Hard constraints
// ==========================================
// Any violation invalidates the candidate outright.
// ==========================================

use super::{codes, Constraint, ConstraintOutcome, ScheduleView, Violation};
use crate::domain::types::ConstraintKind;
use crate::engine::context::SchedulingContext;

const EPS: f64 = 1e-9;

/// Rolling windows of `len` days intersecting the scheduled range, as
/// inclusive (first_day, last_day) offsets from `history_start`. Windows
/// reach into the history before the range and the committed work after
/// it. A span shorter than `len` yields a single window over all of it.
pub(crate) fn rolling_windows(ctx: &SchedulingContext, len: usize) -> Vec<(usize, usize)> {
    let days = ctx.day_count();
    if len == 0 || days == 0 {
        return Vec::new();
    }
    if days < len {
        return vec![(0, days - 1)];
    }
    let lo = ctx.first_range_day().saturating_sub(len - 1);
    let hi = (days - len).min(ctx.last_range_day());
    (lo..=hi).map(|s| (s, s + len - 1)).collect()
}

// ==========================================
// One assignment per (Person, Block)
// ==========================================
pub struct DoubleBookingConstraint;

impl Constraint for DoubleBookingConstraint {
    fn code(&self) -> &'static str {
        codes::DOUBLE_BOOKING
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Hard
    }

    fn evaluate(&self, ctx: &SchedulingContext, view: &ScheduleView) -> ConstraintOutcome {
        let mut out = ConstraintOutcome::default();
        for (&(p, b), idx) in &view.by_person_block {
            if idx.len() > 1 {
                out.violations.push(
                    Violation::hard(
                        codes::DOUBLE_BOOKING,
                        (idx.len() - 1) as f64,
                        format!(
                            "{} holds {} assignments on {} {}",
                            ctx.people[p].person_id,
                            idx.len(),
                            ctx.blocks[b].date,
                            ctx.blocks[b].time_of_day
                        ),
                    )
                    .person(ctx, p)
                    .block(ctx, b)
                    .placements(idx.clone()),
                );
            }
        }
        out
    }
}

// ==========================================
// Coverage floor and capacity per (Block, Template)
// ==========================================
pub struct CoverageConstraint;

impl Constraint for CoverageConstraint {
    fn code(&self) -> &'static str {
        codes::COVERAGE
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Hard
    }

    fn evaluate(&self, ctx: &SchedulingContext, view: &ScheduleView) -> ConstraintOutcome {
        let mut out = ConstraintOutcome::default();
        let empty = super::Cell::default();

        for (b, block) in ctx.blocks.iter().enumerate() {
            for (t, template) in ctx.templates.iter().enumerate() {
                if !template.allows_time(block.time_of_day) {
                    continue;
                }
                let cell = view.cells.get(&(b, t)).unwrap_or(&empty);
                let residents = cell.residents() as u32;
                let occupants: Vec<usize> = cell
                    .interns
                    .iter()
                    .chain(cell.seniors.iter())
                    .chain(cell.faculty.iter())
                    .copied()
                    .collect();

                if residents < template.min_residents {
                    out.violations.push(
                        Violation::hard(
                            codes::COVERAGE,
                            (template.min_residents - residents) as f64,
                            format!(
                                "{} on {} {} has {} of {} required residents",
                                template.name, block.date, block.time_of_day, residents, template.min_residents
                            ),
                        )
                        .block(ctx, b)
                        .template(ctx, t)
                        .limit(template.min_residents as f64)
                        .placements(occupants.clone()),
                    );
                }
                if residents > template.max_residents {
                    out.violations.push(
                        Violation::hard(
                            codes::CAPACITY,
                            (residents - template.max_residents) as f64,
                            format!(
                                "{} on {} {} has {} residents, capacity {}",
                                template.name, block.date, block.time_of_day, residents, template.max_residents
                            ),
                        )
                        .block(ctx, b)
                        .template(ctx, t)
                        .limit(template.max_residents as f64)
                        .placements(occupants.clone()),
                    );
                }
                let faculty = cell.faculty.len() as u32;
                if faculty > template.faculty_capacity {
                    out.violations.push(
                        Violation::hard(
                            codes::CAPACITY,
                            (faculty - template.faculty_capacity) as f64,
                            format!(
                                "{} on {} {} has {} faculty, capacity {}",
                                template.name, block.date, block.time_of_day, faculty, template.faculty_capacity
                            ),
                        )
                        .block(ctx, b)
                        .template(ctx, t)
                        .limit(template.faculty_capacity as f64)
                        .placements(cell.faculty.clone()),
                    );
                }
            }
        }
        out
    }
}

// ==========================================
// Supervision ratio on clinical templates
// ==========================================
pub struct SupervisionConstraint;

impl Constraint for SupervisionConstraint {
    fn code(&self) -> &'static str {
        codes::SUPERVISION
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Hard
    }

    fn evaluate(&self, ctx: &SchedulingContext, view: &ScheduleView) -> ConstraintOutcome {
        let mut out = ConstraintOutcome::default();

        for (&(b, t), cell) in &view.cells {
            let template = &ctx.templates[t];
            if !template.is_clinical() {
                continue;
            }
            let faculty = cell.faculty.len() as u32;
            let block = &ctx.blocks[b];

            let intern_cap = faculty * template.supervision_ratio;
            let interns = cell.interns.len() as u32;
            if interns > intern_cap {
                let mut involved = cell.interns.clone();
                involved.extend(cell.faculty.iter().copied());
                out.violations.push(
                    Violation::hard(
                        codes::SUPERVISION,
                        (interns - intern_cap) as f64,
                        format!(
                            "{} on {} {}: {} PGY-1 with {} faculty (ratio 1:{})",
                            template.name, block.date, block.time_of_day, interns, faculty, template.supervision_ratio
                        ),
                    )
                    .block(ctx, b)
                    .template(ctx, t)
                    .limit(intern_cap as f64)
                    .placements(involved),
                );
            }

            if let Some(ratio) = template.senior_supervision_ratio {
                let senior_cap = faculty * ratio;
                let seniors = cell.seniors.len() as u32;
                if seniors > senior_cap {
                    let mut involved = cell.seniors.clone();
                    involved.extend(cell.faculty.iter().copied());
                    out.violations.push(
                        Violation::hard(
                            codes::SUPERVISION,
                            (seniors - senior_cap) as f64,
                            format!(
                                "{} on {} {}: {} senior residents with {} faculty (ratio 1:{})",
                                template.name, block.date, block.time_of_day, seniors, faculty, ratio
                            ),
                        )
                        .block(ctx, b)
                        .template(ctx, t)
                        .limit(senior_cap as f64)
                        .placements(involved),
                    );
                }
            }
        }
        out
    }
}

// ==========================================
// Duty hours: rolling window total <= weekly limit x weeks
// ==========================================
pub struct WorkHourConstraint;

impl Constraint for WorkHourConstraint {
    fn code(&self) -> &'static str {
        codes::WORK_HOUR_VIOLATION
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Hard
    }

    fn evaluate(&self, ctx: &SchedulingContext, view: &ScheduleView) -> ConstraintOutcome {
        let mut out = ConstraintOutcome::default();
        let limit = ctx.policy.hours_window_limit();
        let windows = rolling_windows(ctx, ctx.policy.hours_window_days() as usize);

        for p in 0..ctx.people.len() {
            if view.by_person[p].is_empty() {
                continue;
            }
            let hours = &view.daily_hours[p];
            let mut prefix = vec![0.0; hours.len() + 1];
            for (d, h) in hours.iter().enumerate() {
                prefix[d + 1] = prefix[d] + h;
            }

            let mut worst: Option<(f64, usize, usize, f64)> = None;
            let mut involved: Vec<usize> = Vec::new();
            for &(from, to) in &windows {
                let total = prefix[to + 1] - prefix[from];
                if total > limit + EPS {
                    let excess = total - limit;
                    if worst.map_or(true, |(e, ..)| excess > e + EPS) {
                        worst = Some((excess, from, to, total));
                    }
                    for i in view.person_placements_between(ctx, p, from, to) {
                        if !involved.contains(&i) {
                            involved.push(i);
                        }
                    }
                }
            }

            if let Some((excess, from, to, total)) = worst {
                let weeks = (to - from + 1) as f64 / 7.0;
                involved.sort_unstable();
                out.violations.push(
                    Violation::hard(
                        codes::WORK_HOUR_VIOLATION,
                        excess,
                        format!(
                            "{} works {:.1}h between {} and {} ({:.1}h/week, limit {:.0}h/week)",
                            ctx.people[p].person_id,
                            total,
                            ctx.date_of_day(from),
                            ctx.date_of_day(to),
                            total / weeks,
                            ctx.policy.max_weekly_hours
                        ),
                    )
                    .person(ctx, p)
                    .on(ctx.date_of_day(from))
                    .limit(limit)
                    .placements(involved),
                );
            }
        }
        out
    }
}

// ==========================================
// 1-in-7: every rolling window keeps the required days off
// ==========================================
pub struct RestDayConstraint;

impl Constraint for RestDayConstraint {
    fn code(&self) -> &'static str {
        codes::REST_VIOLATION
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Hard
    }

    fn evaluate(&self, ctx: &SchedulingContext, view: &ScheduleView) -> ConstraintOutcome {
        let mut out = ConstraintOutcome::default();
        let max_worked = ctx.policy.max_worked_days_per_rest_window() as usize;
        let windows = rolling_windows(ctx, ctx.policy.rest_window_days as usize);

        for p in 0..ctx.people.len() {
            if view.by_person[p].is_empty() {
                continue;
            }
            let worked: Vec<bool> = view.daily_hours[p].iter().map(|h| *h > EPS).collect();

            let mut worst: Option<(usize, usize, usize)> = None;
            let mut involved: Vec<usize> = Vec::new();
            for &(from, to) in &windows {
                let count = worked[from..=to].iter().filter(|w| **w).count();
                if count > max_worked {
                    if worst.map_or(true, |(c, ..)| count > c) {
                        worst = Some((count, from, to));
                    }
                    for i in view.person_placements_between(ctx, p, from, to) {
                        if !involved.contains(&i) {
                            involved.push(i);
                        }
                    }
                }
            }

            if let Some((count, from, to)) = worst {
                involved.sort_unstable();
                out.violations.push(
                    Violation::hard(
                        codes::REST_VIOLATION,
                        (count - max_worked) as f64,
                        format!(
                            "{} works {} of {} days between {} and {} (at most {})",
                            ctx.people[p].person_id,
                            count,
                            to - from + 1,
                            ctx.date_of_day(from),
                            ctx.date_of_day(to),
                            max_worked
                        ),
                    )
                    .person(ctx, p)
                    .on(ctx.date_of_day(from))
                    .limit(max_worked as f64)
                    .placements(involved),
                );
            }
        }
        out
    }
}

// ==========================================
// PGY / credential eligibility and time-of-day restriction
// ==========================================
pub struct EligibilityConstraint;

impl Constraint for EligibilityConstraint {
    fn code(&self) -> &'static str {
        codes::ELIGIBILITY
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Hard
    }

    fn evaluate(&self, ctx: &SchedulingContext, view: &ScheduleView) -> ConstraintOutcome {
        let mut out = ConstraintOutcome::default();
        for (i, pl) in view.placements.iter().enumerate() {
            let reason = match ctx.ineligibility(pl.person, pl.template) {
                Some(reason) => Some(reason.to_string()),
                None if !ctx.templates[pl.template].allows_time(ctx.blocks[pl.block].time_of_day) => Some(format!(
                    "{} does not run in the {} block",
                    ctx.templates[pl.template].name,
                    ctx.blocks[pl.block].time_of_day
                )),
                None => None,
            };
            if let Some(reason) = reason {
                out.violations.push(
                    Violation::hard(codes::ELIGIBILITY, 1.0, format!("{}: {}", ctx.describe(pl), reason))
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
// No assignment overlaps an absence
// ==========================================
pub struct AbsenceConstraint;

impl Constraint for AbsenceConstraint {
    fn code(&self) -> &'static str {
        codes::ABSENCE
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Hard
    }

    fn evaluate(&self, ctx: &SchedulingContext, view: &ScheduleView) -> ConstraintOutcome {
        let mut out = ConstraintOutcome::default();
        for (i, pl) in view.placements.iter().enumerate() {
            if !ctx.is_available(pl.person, pl.block) {
                out.violations.push(
                    Violation::hard(codes::ABSENCE, 1.0, format!("{} overlaps an absence", ctx.describe(pl)))
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
