#![forbid(unsafe_code)]
//! Dynamic programming join order optimizer.
//!
//! Every scope of the query graph is solved bottom up: base patterns become
//! single-relation problems seeded with index scans, OPTIONAL, UNION and
//! GJOIN groups are solved recursively and enter as opaque relations, and
//! larger problems are assembled from disjoint solved pairs connected by a
//! join description. Each problem keeps only non-dominated candidates: the
//! cheapest plan per output ordering plus an unordered plan if it is cheaper
//! than all of those.

use std::collections::BTreeSet;
use std::ptr;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::query::bitset::BitSet;
use crate::query::costs::CostModel;
use crate::query::graph::{Edge, Filter, Node, QueryGraph, SubQuery, TableFunction};
use crate::query::plan::{Plan, PlanId, PlanOp, PlanTree, ScanInfo};
use crate::query::StatisticsProvider;
use crate::storage::DataOrder;
use crate::types::{Result, Slot, VarId};

/// Planner settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Operator cost constants.
    pub costs: CostModel,
    /// Largest number of relations joined in one scope, capped at 64.
    pub max_relations: usize,
    /// Forbid executors from skipping ahead on sorted inputs.
    pub disable_skipping: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            costs: CostModel::default(),
            max_relations: BitSet::MAX_WIDTH,
            disable_skipping: false,
        }
    }
}

/// Plan generator.
#[derive(Clone, Debug, Default)]
pub struct PlanGen {
    config: PlannerConfig,
}

impl PlanGen {
    /// Creates a generator with `config`.
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Active settings.
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Finds the cheapest plan for `query`.
    ///
    /// `Ok(None)` means the query cannot be planned, for example because a
    /// scope joins more relations than a [`BitSet`] holds. Edges must have
    /// been derived with [`QueryGraph::construct_edges`] beforehand.
    pub fn translate<'q>(
        &self,
        db: &dyn StatisticsProvider,
        query: &'q QueryGraph,
    ) -> Result<Option<PlanTree<'q>>> {
        let mut ctx = Context {
            db,
            graph: query,
            costs: &self.config.costs,
            max_width: self.config.max_relations.min(BitSet::MAX_WIDTH),
            plans: Vec::new(),
        };
        let candidates = match ctx.translate(query.query(), false)? {
            Some(candidates) => candidates,
            None => {
                debug!(arena = ctx.plans.len(), "plangen.translate.no_plan");
                return Ok(None);
            }
        };
        let Some(mut best) = ctx.cheapest(&candidates) else {
            return Ok(None);
        };
        if query.duplicate_handling().needs_grouping() {
            let input = ctx.plans[best.index()];
            best = ctx.push(Plan::unary(
                PlanOp::HashGroupify,
                best,
                input.cardinality,
                input.costs,
                None,
            ));
        }
        let tree = PlanTree::extract(&ctx.plans, best, self.config.disable_skipping);
        debug!(
            candidates = candidates.len(),
            arena = ctx.plans.len(),
            operators = tree.len(),
            costs = tree.root_plan().costs,
            cardinality = tree.root_plan().cardinality,
            "plangen.translate.done"
        );
        Ok(Some(tree))
    }
}

/// One dynamic programming subproblem.
#[derive(Debug)]
struct Problem {
    relations: BitSet,
    plans: Vec<PlanId>,
}

impl Problem {
    fn new(relations: BitSet) -> Self {
        Self {
            relations,
            plans: Vec::new(),
        }
    }
}

/// A way to join two relation sets.
#[derive(Debug)]
struct JoinDescription<'q> {
    left: BitSet,
    right: BitSet,
    ordering: Option<VarId>,
    selectivity: f64,
    table_function: Option<&'q TableFunction>,
}

impl JoinDescription<'_> {
    fn connects(&self, left: BitSet, right: BitSet) -> bool {
        self.left.subset_of(left) && self.right.subset_of(right)
    }
}

/// Pattern being turned into scans.
struct Pattern<'q> {
    query: &'q SubQuery,
    node: &'q Node,
    relation: usize,
}

impl<'q> Pattern<'q> {
    fn info(&self, order: DataOrder) -> ScanInfo<'q> {
        ScanInfo {
            order,
            relation: self.relation,
            node: self.node,
        }
    }
}

/// State of one `translate` call.
struct Context<'q, 'd> {
    db: &'d dyn StatisticsProvider,
    graph: &'q QueryGraph,
    costs: &'d CostModel,
    max_width: usize,
    plans: Vec<Plan<'q>>,
}

impl<'q> Context<'q, '_> {
    fn push(&mut self, plan: Plan<'q>) -> PlanId {
        self.plans.push(plan);
        PlanId((self.plans.len() - 1) as u32)
    }

    fn plan(&self, id: PlanId) -> Plan<'q> {
        self.plans[id.index()]
    }

    /// Inserts `id` into `list` unless an existing candidate dominates it,
    /// dropping the candidates it dominates.
    fn add_plan(&self, list: &mut Vec<PlanId>, id: PlanId) {
        let new = self.plan(id);
        let mut index = 0;
        while index < list.len() {
            let old = self.plan(list[index]);
            let remove = if new.ordering.is_some() {
                if old.ordering == new.ordering {
                    if old.costs <= new.costs {
                        return;
                    }
                    true
                } else {
                    old.ordering.is_none() && old.costs >= new.costs
                }
            } else {
                if old.costs <= new.costs {
                    return;
                }
                old.ordering.is_none()
            };
            if remove {
                list.remove(index);
            } else {
                index += 1;
            }
        }
        list.insert(0, id);
    }

    /// Lowest cost, then lowest cardinality.
    fn cheapest(&self, candidates: &[PlanId]) -> Option<PlanId> {
        let mut best: Option<PlanId> = None;
        for &id in candidates {
            let plan = self.plan(id);
            let better = match best.map(|b| self.plan(b)) {
                None => true,
                Some(current) => {
                    plan.costs < current.costs
                        || (plan.costs == current.costs && plan.cardinality < current.cardinality)
                }
            };
            if better {
                best = Some(id);
            }
        }
        best
    }

    fn cardinality(&self, order: DataOrder, constants: [Option<u32>; 3]) -> Result<u64> {
        let [c1, c2, c3] = constants;
        let (s, p, o) = order.unpermute(c1, c2, c3);
        self.db.cardinality(s, p, o)
    }

    fn pages_for(pages: u64, scanned: u64, full: u64) -> u64 {
        if full == 0 {
            return 1;
        }
        1 + (pages as f64 * (scanned as f64 / full as f64)) as u64
    }

    fn filter(&mut self, input: PlanId, filter: &'q Filter) -> PlanId {
        let plan = self.plan(input);
        self.push(Plan::unary(
            PlanOp::Filter(filter),
            input,
            plan.cardinality * 0.5,
            plan.costs + self.costs.filter(plan.cardinality),
            plan.ordering,
        ))
    }

    /// Wraps a fresh scan in every filter it can evaluate, filters on the
    /// output ordering first.
    fn build_filters(&mut self, query: &'q SubQuery, scan: PlanId, values: [Option<VarId>; 3]) -> PlanId {
        let ordering_only: FxHashSet<VarId> = self.plan(scan).ordering.into_iter().collect();
        let all: FxHashSet<VarId> = values.into_iter().flatten().collect();
        let mut plan = scan;
        for filter in &query.filters {
            if filter.is_applicable(&ordering_only) {
                plan = self.filter(plan, filter);
            }
        }
        for filter in &query.filters {
            if filter.is_applicable(&all) && !filter.is_applicable(&ordering_only) {
                plan = self.filter(plan, filter);
            }
        }
        plan
    }

    fn index_scan(
        &mut self,
        pattern: &Pattern<'q>,
        order: DataOrder,
        slots: [Slot; 3],
        out: &mut Vec<PlanId>,
    ) -> Result<()> {
        let [v1, v2, v3] = slots;
        let constants = slots.map(Slot::constant);
        let cardinality = self.cardinality(order, constants)?;
        let (scanned, ordering) = match (v1.var(), v2.var()) {
            (None, None) => (cardinality, v3.var()),
            (None, Some(var)) => (
                self.cardinality(order, [constants[0], constants[1], None])?,
                Some(var),
            ),
            (Some(var), _) => (self.cardinality(order, [constants[0], None, None])?, Some(var)),
        };
        let pages = Self::pages_for(
            self.db.facts_pages(order),
            scanned,
            self.db.facts_cardinality(order),
        );
        let costs = self.costs.seek_btree() + self.costs.scan(pages);
        let scan = self.push(Plan::leaf(
            PlanOp::IndexScan(pattern.info(order)),
            cardinality as f64,
            costs,
            ordering,
        ));
        let plan = self.build_filters(pattern.query, scan, slots.map(Slot::var));
        self.add_plan(out, plan);
        Ok(())
    }

    fn aggregated_scan(
        &mut self,
        pattern: &Pattern<'q>,
        order: DataOrder,
        v1: Slot,
        v2: Slot,
        out: &mut Vec<PlanId>,
    ) -> Result<()> {
        // A constant after a variable cannot be used as a key prefix.
        if v2.is_const() && !v1.is_const() {
            return Ok(());
        }
        let full = self.db.facts_cardinality(order);
        let scanned = self
            .cardinality(order, [v1.constant(), v2.constant(), None])?
            .min(full)
            .max(1);
        let ordering = if v1.is_const() { v2.var() } else { v1.var() };
        let pages = Self::pages_for(self.db.aggregated_pages(order), scanned, full);
        let costs = self.costs.seek_btree() + self.costs.scan(pages);
        let scan = self.push(Plan::leaf(
            PlanOp::AggregatedIndexScan(pattern.info(order)),
            scanned as f64,
            costs,
            ordering,
        ));
        let plan = self.build_filters(pattern.query, scan, [v1.var(), v2.var(), None]);
        self.add_plan(out, plan);
        Ok(())
    }

    fn fully_aggregated_scan(
        &mut self,
        pattern: &Pattern<'q>,
        order: DataOrder,
        v1: Slot,
        out: &mut Vec<PlanId>,
    ) -> Result<()> {
        let full = self.db.facts_cardinality(order);
        let scanned = self
            .cardinality(order, [v1.constant(), None, None])?
            .min(full)
            .max(1);
        let pages = Self::pages_for(self.db.fully_aggregated_pages(order), scanned, full);
        let costs = self.costs.seek_btree() + self.costs.scan(pages);
        let scan = self.push(Plan::leaf(
            PlanOp::FullyAggregatedIndexScan(pattern.info(order)),
            scanned as f64,
            costs,
            v1.var(),
        ));
        let plan = self.build_filters(pattern.query, scan, [v1.var(), None, None]);
        self.add_plan(out, plan);
        Ok(())
    }

    /// Access paths for one triple pattern.
    fn build_scan(&mut self, query: &'q SubQuery, node: &'q Node, relation: usize) -> Result<Problem> {
        let graph = self.graph;
        let unused = |slot: Slot| slot.var().is_some_and(|v| graph.is_unused(node, v));
        let (s, p, o) = (node.subject, node.predicate, node.object);
        let (unused_s, unused_p, unused_o) = (unused(s), unused(p), unused(o));
        let pattern = Pattern {
            query,
            node,
            relation,
        };
        let mut plans = Vec::new();

        if usize::from(unused_s) + usize::from(unused_p) + usize::from(unused_o) >= 2 {
            if !unused_s {
                self.fully_aggregated_scan(&pattern, DataOrder::Spo, s, &mut plans)?;
            } else if !unused_o {
                self.fully_aggregated_scan(&pattern, DataOrder::Osp, o, &mut plans)?;
            } else {
                self.fully_aggregated_scan(&pattern, DataOrder::Pso, p, &mut plans)?;
            }
        } else {
            let orders = [
                (DataOrder::Spo, [s, p, o], unused_o),
                (DataOrder::Sop, [s, o, p], unused_p),
                (DataOrder::Ops, [o, p, s], unused_s),
                (DataOrder::Osp, [o, s, p], unused_p),
                (DataOrder::Pso, [p, s, o], unused_o),
                (DataOrder::Pos, [p, o, s], unused_s),
            ];
            for (order, slots, aggregate) in orders {
                if aggregate {
                    self.aggregated_scan(&pattern, order, slots[0], slots[1], &mut plans)?;
                } else {
                    self.index_scan(&pattern, order, slots, &mut plans)?;
                }
            }
        }
        Ok(Problem {
            relations: BitSet::single(relation),
            plans,
        })
    }

    fn join_info(&self, query: &SubQuery, edge: &Edge, from: usize, to: usize) -> Result<JoinDescription<'q>> {
        let nodes = query.nodes.len();
        let mut selectivity = if edge.from < nodes && edge.to < nodes {
            self.db
                .join_selectivity(query.nodes[edge.from].slots(), query.nodes[edge.to].slots())?
        } else {
            1.0
        };
        // Only the first shared variable is tracked as a merge key.
        let ordering = edge.common.first().copied();
        if ordering.is_none() {
            selectivity = -1.0;
        }
        Ok(JoinDescription {
            left: BitSet::single(from),
            right: BitSet::single(to),
            ordering,
            selectivity,
            table_function: None,
        })
    }

    fn hash_join(&mut self, build: PlanId, probe: PlanId, selectivity: f64, clamp: bool) -> PlanId {
        let (b, p) = (self.plan(build), self.plan(probe));
        let mut cardinality = b.cardinality * p.cardinality * selectivity;
        if clamp && cardinality < 1.0 {
            cardinality = 1.0;
        }
        let costs = b.costs + p.costs + self.costs.hash_join(b.cardinality, p.cardinality);
        self.push(Plan::binary(PlanOp::HashJoin, build, probe, cardinality, costs, None))
    }

    /// Physical joins of every left candidate with every right candidate.
    fn combine(
        &mut self,
        query: &SubQuery,
        left: &Problem,
        right: &Problem,
        out: &mut Vec<PlanId>,
        selectivity: f64,
        orderings: &[VarId],
    ) {
        let has_optional = !query.optional.is_empty();
        let has_gjoins = !query.gjoins.is_empty();
        for &lid in &left.plans {
            for &rid in &right.plans {
                let (l, r) = (self.plan(lid), self.plan(rid));
                if let Some(key) = l.ordering.filter(|k| r.ordering == Some(*k) && orderings.contains(k)) {
                    let cardinality = (l.cardinality * r.cardinality * selectivity).max(1.0);
                    let costs = l.costs + r.costs + self.costs.merge_join(l.cardinality, r.cardinality);
                    let id = self.push(Plan::binary(
                        PlanOp::MergeJoin(key),
                        lid,
                        rid,
                        cardinality,
                        costs,
                        Some(key),
                    ));
                    self.add_plan(out, id);
                }
                if has_gjoins {
                    let a = self.hash_join(lid, rid, selectivity, false);
                    self.add_plan(out, a);
                    let b = self.hash_join(rid, lid, selectivity, false);
                    self.add_plan(out, b);
                } else if selectivity >= 0.0 && !has_optional {
                    let a = self.hash_join(lid, rid, selectivity, true);
                    self.add_plan(out, a);
                    let b = self.hash_join(rid, lid, selectivity, true);
                    self.add_plan(out, b);
                } else {
                    let cardinality = (l.cardinality * r.cardinality).max(1.0);
                    let costs = l.costs + r.costs + l.cardinality * r.costs;
                    let id = self.push(Plan::binary(
                        PlanOp::NestedLoopJoin,
                        lid,
                        rid,
                        cardinality,
                        costs,
                        l.ordering,
                    ));
                    self.add_plan(out, id);
                }
            }
        }
    }

    /// Solves one scope. With `core` set only patterns and table functions
    /// take part; nested groups are left to the caller.
    fn translate(&mut self, query: &'q SubQuery, core: bool) -> Result<Option<Vec<PlanId>>> {
        let optional_mode = !core && !query.optional.is_empty();
        let functions = query.table_functions.len();
        let singleton_needed = if core {
            query.nodes.is_empty() && functions > 0
        } else {
            query.nodes.len() + query.optional.len() + query.unions.len() + query.gjoins.len() == 0
                && functions > 0
        };
        let width = if core {
            query.nodes.len() + functions + usize::from(singleton_needed)
        } else {
            query.relation_count()
        };
        if width > self.max_width {
            debug!(width, limit = self.max_width, "plangen.scope.too_wide");
            return Ok(None);
        }

        let mut seeds: Vec<Problem> = Vec::new();
        if optional_mode {
            match self.build_optional(query, 0)? {
                Some(problem) => seeds.push(problem),
                None => return Ok(None),
            }
        } else {
            for (relation, node) in query.nodes.iter().enumerate() {
                seeds.push(self.build_scan(query, node, relation)?);
            }
        }
        if !core {
            for group in &query.unions {
                match self.build_union(group.as_slice(), seeds.len())? {
                    Some(problem) => seeds.push(problem),
                    None => return Ok(None),
                }
            }
            for group in &query.gjoins {
                match self.build_gjoin(group.as_slice(), seeds.len())? {
                    Some(problem) => seeds.push(problem),
                    None => return Ok(None),
                }
            }
        }
        let function_ids = seeds.len();
        for id in function_ids..function_ids + functions {
            seeds.push(Problem::new(BitSet::single(id)));
        }
        let singleton_id = seeds.len();
        if singleton_needed {
            let plan = self.push(Plan::leaf(PlanOp::Singleton, 1.0, 0.0, None));
            seeds.push(Problem {
                relations: BitSet::single(singleton_id),
                plans: vec![plan],
            });
        }

        // Edge endpoints count nodes, optionals, unions, gjoins in turn.
        let optional_ofs = query.nodes.len();
        let union_ofs = optional_ofs + query.optional.len();
        let relation_of = |index: usize| -> Option<usize> {
            if core {
                (index < optional_ofs).then_some(index)
            } else if optional_mode {
                Some(if index < union_ofs { 0 } else { 1 + index - union_ofs })
            } else {
                Some(index)
            }
        };

        let mut joins = Vec::new();
        for edge in &query.edges {
            let (Some(from), Some(to)) = (relation_of(edge.from), relation_of(edge.to)) else {
                continue;
            };
            if from != to {
                joins.push(self.join_info(query, edge, from, to)?);
            }
        }
        for (index, function) in query.table_functions.iter().enumerate() {
            let input = function.input_variables();
            let mut left = BitSet::new();
            for (node_index, node) in query.nodes.iter().enumerate() {
                if input.is_empty() || node.variables().any(|v| input.contains(&v)) {
                    if let Some(id) = relation_of(node_index) {
                        left.set(id);
                    }
                }
            }
            if singleton_needed && input.is_empty() {
                left.set(singleton_id);
            }
            for (other_index, other) in query.table_functions.iter().enumerate() {
                if other.output.iter().any(|v| input.contains(v)) {
                    left.set(function_ids + other_index);
                }
            }
            joins.push(JoinDescription {
                left,
                right: BitSet::single(function_ids + index),
                ordering: None,
                selectivity: 1.0,
                table_function: Some(function),
            });
        }

        let Some(top) = self.solve(query, seeds, &joins) else {
            return Ok(None);
        };
        if top.is_empty() {
            return Ok(None);
        }
        if core || query.filters.is_empty() {
            return Ok(Some(top));
        }
        Ok(Some(
            top.into_iter()
                .map(|id| self.add_remaining_filters(query, id))
                .collect(),
        ))
    }

    /// Fills the table level by level and returns the candidates covering
    /// every relation.
    fn solve(&mut self, query: &'q SubQuery, seeds: Vec<Problem>, joins: &[JoinDescription<'q>]) -> Option<Vec<PlanId>> {
        let n = seeds.len();
        if n == 0 {
            return None;
        }
        let mut dp: Vec<Vec<Problem>> = (0..n).map(|_| Vec::new()).collect();
        dp[0] = seeds;
        let mut orderings: Vec<VarId> = Vec::new();
        for index in 1..n {
            let (lower, upper) = dp.split_at_mut(index);
            let target = &mut upper[0];
            let mut lookup: FxHashMap<BitSet, usize> = FxHashMap::default();
            for index2 in 0..index {
                for left in &lower[index2] {
                    for right in &lower[index - index2 - 1] {
                        if left.relations.overlaps_with(right.relations) {
                            continue;
                        }
                        let mut slot = None;
                        let mut selectivity = 1.0;
                        for (position, join) in joins.iter().enumerate() {
                            if !join.connects(left.relations, right.relations) {
                                continue;
                            }
                            if left.plans.is_empty() {
                                break;
                            }
                            let relations = left.relations.union_with(right.relations);
                            let problem = *lookup.entry(relations).or_insert_with(|| {
                                target.push(Problem::new(relations));
                                target.len() - 1
                            });
                            if let Some(function) = join.table_function {
                                for &input in &left.plans {
                                    let plan = self.plan(input);
                                    let id = self.push(Plan::unary(
                                        PlanOp::TableFunction(function),
                                        input,
                                        plan.cardinality,
                                        plan.costs + self.costs.table_function(plan.cardinality),
                                        plan.ordering,
                                    ));
                                    self.add_plan(&mut target[problem].plans, id);
                                }
                                break;
                            }
                            orderings.clear();
                            orderings.extend(
                                joins[position..]
                                    .iter()
                                    .filter(|j| {
                                        j.table_function.is_none()
                                            && (j.connects(left.relations, right.relations)
                                                || j.connects(right.relations, left.relations))
                                    })
                                    .filter_map(|j| j.ordering),
                            );
                            selectivity = join.selectivity;
                            slot = Some(problem);
                            break;
                        }
                        if let Some(problem) = slot {
                            let mut plans = std::mem::take(&mut target[problem].plans);
                            self.combine(query, left, right, &mut plans, selectivity, &orderings);
                            target[problem].plans = plans;
                        }
                    }
                }
            }
        }
        dp.pop()
            .and_then(|level| level.into_iter().next())
            .map(|problem| problem.plans)
    }

    fn find_filters(&self, id: PlanId, out: &mut Vec<&'q Filter>) {
        let plan = self.plan(id);
        match plan.op {
            PlanOp::Union
            | PlanOp::MergeUnion
            | PlanOp::IndexScan(_)
            | PlanOp::AggregatedIndexScan(_)
            | PlanOp::FullyAggregatedIndexScan(_)
            | PlanOp::Singleton => {}
            PlanOp::Filter(filter) => {
                out.push(filter);
                if let Some(left) = plan.left {
                    self.find_filters(left, out);
                }
            }
            PlanOp::NestedLoopJoin
            | PlanOp::MergeJoin(_)
            | PlanOp::HashOptional
            | PlanOp::HashJoin
            | PlanOp::HashGroupify
            | PlanOp::TableFunction(_) => {
                for child in [plan.left, plan.right].into_iter().flatten() {
                    self.find_filters(child, out);
                }
            }
        }
    }

    /// Applies the scope's filters that no scan could evaluate.
    fn add_remaining_filters(&mut self, query: &'q SubQuery, id: PlanId) -> PlanId {
        let mut applied = Vec::new();
        self.find_filters(id, &mut applied);
        let mut plan = id;
        for filter in &query.filters {
            if applied.iter().any(|f| ptr::eq(*f, filter)) {
                continue;
            }
            let input = self.plan(plan);
            plan = self.push(Plan::unary(
                PlanOp::Filter(filter),
                plan,
                input.cardinality,
                input.costs,
                input.ordering,
            ));
        }
        plan
    }

    fn singleton(&mut self) -> PlanId {
        self.push(Plan::leaf(PlanOp::Singleton, 1.0, 0.0, None))
    }

    /// Solves the non-optional part of `query` and chains one left outer
    /// join per OPTIONAL group onto it.
    fn build_optional(&mut self, query: &'q SubQuery, relation: usize) -> Result<Option<Problem>> {
        let base = if query.nodes.is_empty() && query.table_functions.is_empty() {
            self.singleton()
        } else {
            match self.translate(query, true)? {
                Some(candidates) => match self.cheapest(&candidates) {
                    Some(best) => best,
                    None => return Ok(None),
                },
                None => return Ok(None),
            }
        };
        let mut parts = Vec::with_capacity(query.optional.len());
        for optional in &query.optional {
            let Some(candidates) = self.translate(optional, false)? else {
                return Ok(None);
            };
            let Some(best) = self.cheapest(&candidates) else {
                return Ok(None);
            };
            parts.push(best);
        }
        let cardinality = self.plan(base).cardinality;
        let mut costs = self.plan(base).costs;
        let mut last = base;
        for part in parts {
            costs += self.plan(part).costs;
            last = self.push(Plan::binary(PlanOp::HashOptional, last, part, cardinality, costs, None));
        }
        Ok(Some(Problem {
            relations: BitSet::single(relation),
            plans: vec![last],
        }))
    }

    /// Right-nested chain `op(p0, op(p1, ... op(pn-1, pn)))`.
    fn chain(&mut self, op: PlanOp<'q>, parts: &[PlanId], cardinality: f64, costs: f64, ordering: Option<VarId>) -> Option<PlanId> {
        let (&last, rest) = parts.split_last()?;
        let mut acc = last;
        for &part in rest.iter().rev() {
            acc = self.push(Plan::binary(op, part, acc, cardinality, costs, ordering));
        }
        Some(acc)
    }

    fn solve_branches(&mut self, group: &'q [SubQuery]) -> Result<Option<(Vec<PlanId>, Vec<Vec<PlanId>>)>> {
        let mut best = Vec::with_capacity(group.len());
        let mut solutions = Vec::with_capacity(group.len());
        for branch in group {
            let Some(candidates) = self.translate(branch, false)? else {
                return Ok(None);
            };
            let Some(cheapest) = self.cheapest(&candidates) else {
                return Ok(None);
            };
            best.push(cheapest);
            solutions.push(candidates);
        }
        Ok(Some((best, solutions)))
    }

    fn build_union(&mut self, group: &'q [SubQuery], relation: usize) -> Result<Option<Problem>> {
        if group.len() < 2 {
            return Ok(None);
        }
        let Some((parts, solutions)) = self.solve_branches(group)? else {
            return Ok(None);
        };
        let cardinality: f64 = parts.iter().map(|&p| self.plan(p).cardinality).sum();
        let costs: f64 = parts.iter().map(|&p| self.plan(p).costs).sum();
        let mut plans = Vec::new();
        if let Some(union) = self.chain(PlanOp::Union, &parts, cardinality, costs, None) {
            self.add_plan(&mut plans, union);
        }

        // A single variable shared with the rest of the query allows an
        // order preserving merge of sorted branches.
        let outside = self.graph.collect_variables(Some(group));
        let mut inside = BTreeSet::new();
        for branch in group {
            branch.collect_variables(&mut inside, None);
        }
        let common: Vec<VarId> = outside.intersection(&inside).copied().collect();
        if let &[var] = common.as_slice() {
            let sorted: Option<Vec<PlanId>> = solutions
                .iter()
                .map(|candidates| {
                    candidates
                        .iter()
                        .copied()
                        .find(|&p| self.plan(p).ordering == Some(var))
                })
                .collect();
            if let Some(sorted) = sorted {
                let merge_costs: f64 = sorted.iter().map(|&p| self.plan(p).costs).sum();
                if let Some(merge) =
                    self.chain(PlanOp::MergeUnion, &sorted, cardinality, merge_costs, Some(var))
                {
                    self.add_plan(&mut plans, merge);
                }
            }
        }
        Ok(Some(Problem {
            relations: BitSet::single(relation),
            plans,
        }))
    }

    fn build_gjoin(&mut self, group: &'q [SubQuery], relation: usize) -> Result<Option<Problem>> {
        if group.len() != 2 {
            return Ok(None);
        }
        let Some((parts, _)) = self.solve_branches(group)? else {
            return Ok(None);
        };
        let (l, r) = (self.plan(parts[0]), self.plan(parts[1]));
        let join = self.push(Plan::binary(
            PlanOp::HashJoin,
            parts[0],
            parts[1],
            l.cardinality + r.cardinality,
            l.costs + r.costs,
            None,
        ));
        Ok(Some(Problem {
            relations: BitSet::single(relation),
            plans: vec![join],
        }))
    }
}
