// ==========================================
// ScheduleView - aggregates of one candidate schedule
// ==========================================
// Built once per evaluation and shared by every constraint.
// ==========================================

use crate::engine::context::{Placement, SchedulingContext};
use std::collections::BTreeMap;

/// Occupants of one (block, template) cell, as placement indices.
#[derive(Debug, Clone, Default)]
pub struct Cell {
    pub interns: Vec<usize>, // PGY-1
    pub seniors: Vec<usize>, // PGY-2+
    pub faculty: Vec<usize>,
}

impl Cell {
    pub fn residents(&self) -> usize {
        self.interns.len() + self.seniors.len()
    }
}

pub struct ScheduleView<'a> {
    pub placements: &'a [Placement],
    /// (person, block) -> placement indices
    pub by_person_block: BTreeMap<(usize, usize), Vec<usize>>,
    /// (block, template) -> occupants
    pub cells: BTreeMap<(usize, usize), Cell>,
    /// person -> placement indices, chronological
    pub by_person: Vec<Vec<usize>>,
    /// [person][day]: work outside the range plus placements
    pub daily_hours: Vec<Vec<f64>>,
    /// Resident placements per template
    pub template_counts: Vec<usize>,
    /// Weekend/call placements per person
    pub burden: Vec<u32>,
}

impl<'a> ScheduleView<'a> {
    pub fn build(ctx: &SchedulingContext, placements: &'a [Placement]) -> Self {
        let mut by_person_block: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
        let mut cells: BTreeMap<(usize, usize), Cell> = BTreeMap::new();
        let mut by_person = vec![Vec::new(); ctx.people.len()];
        let mut daily_hours: Vec<Vec<f64>> = (0..ctx.people.len())
            .map(|p| ctx.outside_hours(p).to_vec())
            .collect();
        let mut template_counts = vec![0usize; ctx.templates.len()];
        let mut burden = vec![0u32; ctx.people.len()];

        for (i, pl) in placements.iter().enumerate() {
            by_person_block.entry((pl.person, pl.block)).or_default().push(i);
            by_person[pl.person].push(i);
            daily_hours[pl.person][ctx.day_of_block(pl.block)] += ctx.hours_of(pl.template);

            let person = &ctx.people[pl.person];
            let cell = cells.entry((pl.block, pl.template)).or_default();
            if person.is_faculty() {
                cell.faculty.push(i);
            } else {
                if person.is_intern() {
                    cell.interns.push(i);
                } else {
                    cell.seniors.push(i);
                }
                template_counts[pl.template] += 1;
            }
            if ctx.is_burden(pl.block, pl.template) {
                burden[pl.person] += 1;
            }
        }

        for list in by_person.iter_mut() {
            list.sort_by_key(|&i| (placements[i].block, placements[i].template));
        }

        Self {
            placements,
            by_person_block,
            cells,
            by_person,
            daily_hours,
            template_counts,
            burden,
        }
    }

    /// Placement indices of a person whose block day lies in [from, to].
    pub fn person_placements_between(
        &self,
        ctx: &SchedulingContext,
        person: usize,
        from: usize,
        to: usize,
    ) -> Vec<usize> {
        self.by_person[person]
            .iter()
            .copied()
            .filter(|&i| {
                let day = ctx.day_of_block(self.placements[i].block);
                day >= from && day <= to
            })
            .collect()
    }
}
