// ==========================================
// AssignmentModel - decision variables shared by every backend
// ==========================================
// One variable per (person, block, template) candidate that passes the
// static filters (eligibility, availability, time of day, not already
// fixed). ModelState tracks the aggregates the hard rules and the
// objective need, so feasibility checks and objective deltas are O(1)
// per variable instead of a full registry evaluation.
// ==========================================

use crate::engine::constraints::{
    codes, continuity_cost, preference_cost, rolling_windows, squared_deviation_delta,
    ConstraintRegistry,
};
use crate::engine::context::{Placement, SchedulingContext};
use crate::engine::control::{SearchMonitor, StopReason};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};

const EPS: f64 = 1e-9;

/// Load term added to local cost so work spreads across the roster.
const LOAD_WEIGHT: f64 = 0.05;

/// Amplitude of the seeded perturbation used by randomized repair.
const NOISE: f64 = 1.0;

/// Why a placement exists; surfaces as rationale and confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Locked,
    Coverage,
    Supervision,
    Fill,
}

impl Origin {
    pub fn describe(&self) -> &'static str {
        match self {
            Origin::Locked => "locked input",
            Origin::Coverage => "required coverage",
            Origin::Supervision => "supervision for PGY-1",
            Origin::Fill => "workload balancing",
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Origin::Locked => 1.0,
            Origin::Coverage | Origin::Supervision => 0.95,
            Origin::Fill => 0.85,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Var {
    pub person: usize,
    pub block: usize,
    pub template: usize,
    pub day: usize,
    pub hours: f64,
    pub faculty: bool,
    pub intern: bool,
    /// Weighted preference cost, fixed per variable
    pub base_cost: f64,
}

impl Var {
    pub fn placement(&self) -> Placement {
        Placement::new(self.person, self.block, self.template)
    }
}

/// One unit of demand: a resident seat under a coverage floor, or a
/// faculty seat needed to supervise fixed PGY-1 residents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Seat {
    pub block: usize,
    pub template: usize,
    pub faculty: bool,
}

/// Decisions for one (person, block): pick at most one of `vars`.
#[derive(Debug, Clone)]
pub struct Group {
    pub person: usize,
    pub block: usize,
    pub vars: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Weights {
    balance: f64,
    preference: f64,
    continuity: f64,
    fairness: f64,
    reward: f64,
}

pub struct AssignmentModel {
    pub vars: Vec<Var>,
    pub fixed: Vec<Placement>,
    pub groups: Vec<Group>,
    cell_vars: BTreeMap<(usize, usize), Vec<usize>>,
    block_groups: Vec<Vec<usize>>,
    hours_windows: Vec<(usize, usize)>,
    rest_windows: Vec<(usize, usize)>,
    hours_windows_of_day: Vec<Vec<usize>>,
    rest_windows_of_day: Vec<Vec<usize>>,
    hours_limit: f64,
    max_worked: u32,
    balance_eligible: Vec<bool>,
    balance_count: usize,
    cohort_size: BTreeMap<u8, usize>,
    weights: Weights,
    fixed_objective: f64,
}

fn windows_by_day(windows: &[(usize, usize)], days: usize) -> Vec<Vec<usize>> {
    let mut of_day = vec![Vec::new(); days];
    for (w, &(from, to)) in windows.iter().enumerate() {
        for list in of_day.iter_mut().take(to + 1).skip(from) {
            list.push(w);
        }
    }
    of_day
}

impl AssignmentModel {
    pub fn build(ctx: &SchedulingContext, registry: &ConstraintRegistry) -> Self {
        let fixed = ctx.locked_placements();
        let fixed_busy: HashSet<(usize, usize)> = fixed.iter().map(|p| (p.person, p.block)).collect();

        let weights = Weights {
            balance: registry.weight_of(codes::TEMPLATE_BALANCE),
            preference: registry.weight_of(codes::PREFERENCE),
            continuity: registry.weight_of(codes::CONTINUITY),
            fairness: registry.weight_of(codes::FAIRNESS),
            reward: registry.coverage_reward(),
        };

        // faculty first, then seniors, then interns inside each block
        let mut person_order: Vec<usize> = (0..ctx.people.len()).collect();
        person_order.sort_by_key(|&p| {
            let person = &ctx.people[p];
            let rank = if person.is_faculty() {
                0
            } else if person.is_intern() {
                2
            } else {
                1
            };
            (rank, p)
        });

        let mut vars = Vec::new();
        let mut groups = Vec::new();
        let mut cell_vars: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
        let mut block_groups = vec![Vec::new(); ctx.blocks.len()];

        for b in 0..ctx.blocks.len() {
            for &p in &person_order {
                if fixed_busy.contains(&(p, b)) {
                    continue;
                }
                let person = &ctx.people[p];
                let mut group_vars = Vec::new();
                for t in 0..ctx.templates.len() {
                    if !ctx.is_candidate(p, b, t) {
                        continue;
                    }
                    let template = &ctx.templates[t];
                    let seats = if person.is_faculty() {
                        template.faculty_capacity
                    } else {
                        template.max_residents
                    };
                    if seats == 0 {
                        continue;
                    }
                    let v = vars.len();
                    vars.push(Var {
                        person: p,
                        block: b,
                        template: t,
                        day: ctx.day_of_block(b),
                        hours: ctx.hours_of(t),
                        faculty: person.is_faculty(),
                        intern: person.is_intern(),
                        base_cost: weights.preference * preference_cost(ctx, p, b, t),
                    });
                    cell_vars.entry((b, t)).or_default().push(v);
                    group_vars.push(v);
                }
                if !group_vars.is_empty() {
                    block_groups[b].push(groups.len());
                    groups.push(Group {
                        person: p,
                        block: b,
                        vars: group_vars,
                    });
                }
            }
        }

        let hours_windows = rolling_windows(ctx, ctx.policy.hours_window_days() as usize);
        let rest_windows = rolling_windows(ctx, ctx.policy.rest_window_days as usize);
        let hours_windows_of_day = windows_by_day(&hours_windows, ctx.day_count());
        let rest_windows_of_day = windows_by_day(&rest_windows, ctx.day_count());

        let balance_eligible = ctx.balance_templates();
        let balance_count = balance_eligible.iter().filter(|e| **e).count();
        let mut cohort_size = BTreeMap::new();
        for p in 0..ctx.people.len() {
            if let Some(level) = ctx.cohort_of(p) {
                *cohort_size.entry(level).or_insert(0) += 1;
            }
        }

        let fixed_objective = registry.evaluate(ctx, &fixed).objective;

        tracing::debug!(
            vars = vars.len(),
            groups = groups.len(),
            fixed = fixed.len(),
            "assignment model built"
        );

        Self {
            vars,
            fixed,
            groups,
            cell_vars,
            block_groups,
            hours_windows,
            rest_windows,
            hours_windows_of_day,
            rest_windows_of_day,
            hours_limit: ctx.policy.hours_window_limit(),
            max_worked: ctx.policy.max_worked_days_per_rest_window(),
            balance_eligible,
            balance_count,
            cohort_size,
            weights,
            fixed_objective,
        }
    }

    pub fn cell_vars(&self, block: usize, template: usize) -> &[usize] {
        self.cell_vars
            .get(&(block, template))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Group indices of one block, faculty first.
    pub fn groups_of_block(&self, block: usize) -> &[usize] {
        &self.block_groups[block]
    }

    /// Variables able to fill a seat.
    pub fn seat_candidates(&self, seat: &Seat) -> Vec<usize> {
        self.cell_vars(seat.block, seat.template)
            .iter()
            .copied()
            .filter(|&v| self.vars[v].faculty == seat.faculty)
            .collect()
    }

    /// Demand not met by fixed placements, one entry per missing seat,
    /// scarcest first (fewest candidates), then chronological.
    pub fn required_seats(&self, ctx: &SchedulingContext) -> Vec<Seat> {
        let state = ModelState::new(ctx, self);
        let mut seats: Vec<(usize, Seat)> = Vec::new();

        for (b, block) in ctx.blocks.iter().enumerate() {
            for (t, template) in ctx.templates.iter().enumerate() {
                if !template.allows_time(block.time_of_day) {
                    continue;
                }
                let cell = state.cell(b, t);
                let resident_seat = Seat {
                    block: b,
                    template: t,
                    faculty: false,
                };
                let missing = template.min_residents.saturating_sub(cell.residents());
                let scarcity = self.seat_candidates(&resident_seat).len();
                for _ in 0..missing {
                    seats.push((scarcity, resident_seat));
                }

                if template.is_clinical() {
                    let faculty_seat = Seat {
                        block: b,
                        template: t,
                        faculty: true,
                    };
                    let needed = cell
                        .faculty_needed(template.supervision_ratio, template.senior_supervision_ratio)
                        .saturating_sub(cell.faculty);
                    let scarcity = self.seat_candidates(&faculty_seat).len();
                    for _ in 0..needed {
                        seats.push((scarcity, faculty_seat));
                    }
                }
            }
        }
        // stable: equal scarcity keeps block/template order
        seats.sort_by_key(|(scarcity, seat)| (*scarcity, seat.block, seat.template, seat.faculty));
        seats.into_iter().map(|(_, seat)| seat).collect()
    }
}

// ==========================================
// ModelState - incremental aggregates of one partial schedule
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellCount {
    pub interns: u32,
    pub seniors: u32,
    pub faculty: u32,
}

impl CellCount {
    pub fn residents(&self) -> u32 {
        self.interns + self.seniors
    }

    /// Faculty required by the residents already present.
    pub fn faculty_needed(&self, ratio: u32, senior_ratio: Option<u32>) -> u32 {
        let for_interns = if self.interns == 0 {
            0
        } else if ratio == 0 {
            // unsupervisable; one seat so the gap is reported
            1
        } else {
            (self.interns + ratio - 1) / ratio
        };
        let for_seniors = match senior_ratio {
            Some(r) if r > 0 && self.seniors > 0 => (self.seniors + r - 1) / r,
            Some(0) if self.seniors > 0 => 1,
            _ => 0,
        };
        for_interns.max(for_seniors)
    }
}

#[derive(Clone)]
pub struct ModelState<'m> {
    pub ctx: &'m SchedulingContext,
    pub model: &'m AssignmentModel,
    selected: Vec<bool>,
    origin: Vec<Option<Origin>>,
    order: Vec<usize>,
    busy: HashMap<(usize, usize), usize>,
    cells: HashMap<(usize, usize), CellCount>,
    daily_hours: Vec<Vec<f64>>,
    window_hours: Vec<Vec<f64>>,
    window_worked: Vec<Vec<u32>>,
    template_counts: Vec<usize>,
    balance_total: usize,
    burden: Vec<u32>,
    cohort_sum: BTreeMap<u8, usize>,
    load: Vec<f64>,
    objective: f64,
}

impl<'m> ModelState<'m> {
    /// State holding only the fixed placements.
    pub fn new(ctx: &'m SchedulingContext, model: &'m AssignmentModel) -> Self {
        let people = ctx.people.len();
        let daily_hours: Vec<Vec<f64>> = (0..people).map(|p| ctx.outside_hours(p).to_vec()).collect();

        let window_hours = daily_hours
            .iter()
            .map(|days| {
                model
                    .hours_windows
                    .iter()
                    .map(|&(from, to)| days[from..=to].iter().sum())
                    .collect()
            })
            .collect();
        let window_worked = daily_hours
            .iter()
            .map(|days| {
                model
                    .rest_windows
                    .iter()
                    .map(|&(from, to)| days[from..=to].iter().filter(|h| **h > EPS).count() as u32)
                    .collect()
            })
            .collect();

        let mut state = Self {
            ctx,
            model,
            selected: vec![false; model.vars.len()],
            origin: vec![None; model.vars.len()],
            order: Vec::new(),
            busy: HashMap::new(),
            cells: HashMap::new(),
            daily_hours,
            window_hours,
            window_worked,
            template_counts: vec![0; ctx.templates.len()],
            balance_total: 0,
            burden: vec![0; people],
            cohort_sum: BTreeMap::new(),
            load: vec![0.0; people],
            objective: model.fixed_objective,
        };
        for pl in &model.fixed {
            state.apply(*pl, true);
        }
        state
    }

    // ==========================================
    // Queries
    // ==========================================

    pub fn objective(&self) -> f64 {
        self.objective
    }

    pub fn is_selected(&self, v: usize) -> bool {
        self.selected[v]
    }

    pub fn is_busy(&self, person: usize, block: usize) -> bool {
        self.busy.contains_key(&(person, block))
    }

    pub fn cell(&self, block: usize, template: usize) -> CellCount {
        self.cells.get(&(block, template)).copied().unwrap_or_default()
    }

    pub fn load(&self, person: usize) -> f64 {
        self.load[person]
    }

    pub fn template_count(&self, template: usize) -> usize {
        self.template_counts[template]
    }

    /// Selected variables in the order they were added.
    pub fn selected_vars(&self) -> Vec<usize> {
        self.order.clone()
    }

    pub fn origin_of(&self, v: usize) -> Option<Origin> {
        self.origin[v]
    }

    pub fn placement_count(&self) -> usize {
        self.model.fixed.len() + self.order.len()
    }

    /// Fixed plus selected placements with their origin.
    pub fn annotated_placements(&self) -> Vec<(Placement, Origin)> {
        self.model
            .fixed
            .iter()
            .map(|p| (*p, Origin::Locked))
            .chain(
                self.order
                    .iter()
                    .map(|&v| (self.model.vars[v].placement(), self.origin[v].unwrap_or(Origin::Fill))),
            )
            .collect()
    }

    /// Every seat from `required_seats` is met in the current state.
    pub fn seat_met(&self, seat: &Seat) -> bool {
        let template = &self.ctx.templates[seat.template];
        let cell = self.cell(seat.block, seat.template);
        if seat.faculty {
            cell.faculty >= cell.faculty_needed(template.supervision_ratio, template.senior_supervision_ratio)
        } else {
            cell.residents() >= template.min_residents
        }
    }

    // ==========================================
    // Hard rules for one more variable
    // ==========================================

    /// Would adding `v` break a hard rule? Returns the violated code.
    pub fn hard_check(&self, v: usize) -> Result<(), &'static str> {
        let var = &self.model.vars[v];
        if self.busy.contains_key(&(var.person, var.block)) {
            return Err(codes::DOUBLE_BOOKING);
        }

        let template = &self.ctx.templates[var.template];
        let cell = self.cell(var.block, var.template);
        if var.faculty {
            if cell.faculty + 1 > template.faculty_capacity {
                return Err(codes::CAPACITY);
            }
        } else if cell.residents() + 1 > template.max_residents {
            return Err(codes::CAPACITY);
        }

        let p = var.person;
        for &w in &self.model.hours_windows_of_day[var.day] {
            if self.window_hours[p][w] + var.hours > self.model.hours_limit + EPS {
                return Err(codes::WORK_HOUR_VIOLATION);
            }
        }
        if self.daily_hours[p][var.day] <= EPS {
            for &w in &self.model.rest_windows_of_day[var.day] {
                if self.window_worked[p][w] + 1 > self.model.max_worked {
                    return Err(codes::REST_VIOLATION);
                }
            }
        }

        if template.is_clinical() && !var.faculty {
            if var.intern {
                if cell.interns + 1 > cell.faculty * template.supervision_ratio {
                    return Err(codes::SUPERVISION);
                }
            } else if let Some(ratio) = template.senior_supervision_ratio {
                if cell.seniors + 1 > cell.faculty * ratio {
                    return Err(codes::SUPERVISION);
                }
            }
        }
        Ok(())
    }

    // ==========================================
    // Objective
    // ==========================================

    /// Objective change if `v` were added now.
    pub fn delta(&self, v: usize) -> f64 {
        let var = &self.model.vars[v];
        let w = &self.model.weights;
        let mut d = var.base_cost - w.reward;

        if w.continuity > 0.0 {
            if let Some(sibling) = self.ctx.sibling_block(var.block) {
                if let Some(&other) = self.busy.get(&(var.person, sibling)) {
                    d += w.continuity * continuity_cost(var.template, Some(other));
                }
            }
        }

        if !var.faculty && w.balance > 0.0 && self.model.balance_eligible[var.template] {
            d += w.balance
                * squared_deviation_delta(
                    self.template_counts[var.template] as f64,
                    self.balance_total as f64,
                    self.model.balance_count,
                );
        }

        if w.fairness > 0.0 && self.ctx.is_burden(var.block, var.template) {
            if let Some(level) = self.ctx.cohort_of(var.person) {
                let size = self.model.cohort_size.get(&level).copied().unwrap_or(0);
                let sum = self.cohort_sum.get(&level).copied().unwrap_or(0);
                d += w.fairness * squared_deviation_delta(self.burden[var.person] as f64, sum as f64, size);
            }
        }
        d
    }

    /// Greedy score: objective delta plus a load spread term.
    pub fn local_cost(&self, v: usize) -> f64 {
        self.delta(v) + LOAD_WEIGHT * self.load[self.model.vars[v].person]
    }

    // ==========================================
    // Mutation
    // ==========================================

    pub fn add(&mut self, v: usize, origin: Origin) {
        if self.selected[v] {
            return;
        }
        let d = self.delta(v);
        self.apply(self.model.vars[v].placement(), true);
        self.objective += d;
        self.selected[v] = true;
        self.origin[v] = Some(origin);
        self.order.push(v);
    }

    pub fn remove(&mut self, v: usize) {
        if !self.selected[v] {
            return;
        }
        self.apply(self.model.vars[v].placement(), false);
        self.objective -= self.delta(v);
        self.selected[v] = false;
        self.origin[v] = None;
        self.order.retain(|&x| x != v);
    }

    fn apply(&mut self, pl: Placement, add: bool) {
        let ctx = self.ctx;
        let day = ctx.day_of_block(pl.block);
        let hours = ctx.hours_of(pl.template);
        let sign = if add { 1.0 } else { -1.0 };
        let p = pl.person;

        let was_worked = self.daily_hours[p][day] > EPS;
        self.daily_hours[p][day] += sign * hours;
        let now_worked = self.daily_hours[p][day] > EPS;
        for &w in &self.model.hours_windows_of_day[day] {
            self.window_hours[p][w] += sign * hours;
        }
        if was_worked != now_worked {
            for &w in &self.model.rest_windows_of_day[day] {
                if now_worked {
                    self.window_worked[p][w] += 1;
                } else {
                    self.window_worked[p][w] = self.window_worked[p][w].saturating_sub(1);
                }
            }
        }
        self.load[p] += sign * hours;

        let person = &ctx.people[p];
        let cell = self.cells.entry((pl.block, pl.template)).or_default();
        let slot = if person.is_faculty() {
            &mut cell.faculty
        } else if person.is_intern() {
            &mut cell.interns
        } else {
            &mut cell.seniors
        };
        if add {
            *slot += 1;
        } else {
            *slot = slot.saturating_sub(1);
        }

        if person.is_resident() {
            if add {
                self.template_counts[pl.template] += 1;
            } else {
                self.template_counts[pl.template] = self.template_counts[pl.template].saturating_sub(1);
            }
            if self.model.balance_eligible[pl.template] {
                if add {
                    self.balance_total += 1;
                } else {
                    self.balance_total = self.balance_total.saturating_sub(1);
                }
            }
        }

        if ctx.is_burden(pl.block, pl.template) {
            if add {
                self.burden[p] += 1;
            } else {
                self.burden[p] = self.burden[p].saturating_sub(1);
            }
            if let Some(level) = ctx.cohort_of(p) {
                let sum = self.cohort_sum.entry(level).or_insert(0);
                if add {
                    *sum += 1;
                } else {
                    *sum = sum.saturating_sub(1);
                }
            }
        }

        if add {
            self.busy.insert((p, pl.block), pl.template);
        } else {
            self.busy.remove(&(p, pl.block));
        }
    }

    // ==========================================
    // Placement helpers shared by the heuristics
    // ==========================================

    /// Add `v` if hard-feasible. A PGY-1 on a clinical template without
    /// spare supervision pulls in the cheapest feasible faculty of the
    /// same cell first. Returns every variable added (empty on failure).
    pub fn try_place(&mut self, v: usize, origin: Origin) -> Vec<usize> {
        match self.hard_check(v) {
            Ok(()) => {
                self.add(v, origin);
                vec![v]
            }
            Err(code) if code == codes::SUPERVISION => {
                let model = self.model;
                let var = &model.vars[v];
                let mut supervisors: Vec<(f64, usize)> = self
                    .model
                    .cell_vars(var.block, var.template)
                    .iter()
                    .copied()
                    .filter(|&f| model.vars[f].faculty && self.hard_check(f).is_ok())
                    .map(|f| (self.local_cost(f), f))
                    .collect();
                supervisors.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

                for (_, f) in supervisors {
                    self.add(f, Origin::Supervision);
                    if self.hard_check(v).is_ok() {
                        self.add(v, origin);
                        return vec![f, v];
                    }
                    self.remove(f);
                }
                Vec::new()
            }
            Err(_) => Vec::new(),
        }
    }

    fn noisy(cost: f64, rng: &mut Option<&mut StdRng>) -> f64 {
        match rng {
            Some(rng) => cost + rng.gen_range(0.0..NOISE),
            None => cost,
        }
    }

    /// Seat candidates ordered by (cost, template load, person).
    pub fn ranked_candidates(&self, seat: &Seat, rng: &mut Option<&mut StdRng>) -> Vec<usize> {
        let mut ranked: Vec<(f64, usize, usize, usize)> = self
            .model
            .seat_candidates(seat)
            .into_iter()
            .filter(|&v| !self.is_busy(self.model.vars[v].person, seat.block))
            .map(|v| {
                let var = &self.model.vars[v];
                (Self::noisy(self.local_cost(v), rng), self.template_counts[var.template], var.person, v)
            })
            .collect();
        ranked.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });
        ranked.into_iter().map(|(.., v)| v).collect()
    }

    /// Fill seats in order, one candidate each. Returns the seats left
    /// empty.
    pub fn fill_seats(
        &mut self,
        seats: &[Seat],
        monitor: &mut SearchMonitor<'_>,
        mut rng: Option<&mut StdRng>,
    ) -> Result<Vec<Seat>, StopReason> {
        let mut unfilled = Vec::new();
        for seat in seats {
            if let Some(reason) = monitor.tick(Some(self.objective)) {
                return Err(reason);
            }
            if self.seat_met(seat) {
                continue;
            }
            let origin = if seat.faculty {
                Origin::Supervision
            } else {
                Origin::Coverage
            };
            let placed = self
                .ranked_candidates(seat, &mut rng)
                .into_iter()
                .any(|v| !self.try_place(v, origin).is_empty());
            if !placed {
                unfilled.push(*seat);
            }
        }
        Ok(unfilled)
    }

    /// Give idle people work where it lowers the objective. Within a
    /// block, faculty go first, then the least loaded people; each takes
    /// its cheapest feasible template, ties to the least used one.
    pub fn fill_idle(
        &mut self,
        blocks: &[usize],
        monitor: &mut SearchMonitor<'_>,
        mut rng: Option<&mut StdRng>,
    ) -> Result<(), StopReason> {
        let model = self.model;
        for &b in blocks {
            let mut order: Vec<usize> = model.groups_of_block(b).to_vec();
            order.sort_by(|&x, &y| {
                let gx = &model.groups[x];
                let gy = &model.groups[y];
                let fx = !model.vars[gx.vars[0]].faculty;
                let fy = !model.vars[gy.vars[0]].faculty;
                fx.cmp(&fy)
                    .then(self.load[gx.person].total_cmp(&self.load[gy.person]))
                    .then(gx.person.cmp(&gy.person))
            });

            for g in order {
                if let Some(reason) = monitor.tick(Some(self.objective)) {
                    return Err(reason);
                }
                let group = &model.groups[g];
                if self.is_busy(group.person, b) {
                    continue;
                }
                let mut best: Option<(f64, usize, usize)> = None;
                for &v in &group.vars {
                    if self.hard_check(v).is_err() {
                        continue;
                    }
                    let var = &model.vars[v];
                    let occupancy = if var.faculty {
                        self.cell(b, var.template).faculty as usize
                    } else {
                        self.template_counts[var.template]
                    };
                    let cost = Self::noisy(self.local_cost(v), &mut rng);
                    let better = match best {
                        None => true,
                        Some((c, occ, bv)) => cost
                            .total_cmp(&c)
                            .then(occupancy.cmp(&occ))
                            .then(var.template.cmp(&model.vars[bv].template))
                            .is_lt(),
                    };
                    if better {
                        best = Some((cost, occupancy, v));
                    }
                }
                if let Some((cost, _, v)) = best {
                    if cost < 0.0 {
                        self.add(v, Origin::Fill);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faculty_needed_rounds_up() {
        let cell = CellCount {
            interns: 3,
            seniors: 0,
            faculty: 0,
        };
        assert_eq!(cell.faculty_needed(2, None), 2);
        assert_eq!(cell.faculty_needed(4, None), 1);
        assert_eq!(cell.faculty_needed(0, None), 1);
        assert_eq!(CellCount::default().faculty_needed(2, Some(3)), 0);

        let seniors = CellCount {
            interns: 0,
            seniors: 4,
            faculty: 1,
        };
        assert_eq!(seniors.faculty_needed(2, Some(3)), 2);
    }

    #[test]
    fn test_origin_confidence_orders() {
        assert!(Origin::Locked.confidence() > Origin::Coverage.confidence());
        assert!(Origin::Coverage.confidence() > Origin::Fill.confidence());
        assert_eq!(Origin::Supervision.describe(), "supervision for PGY-1");
    }
}
