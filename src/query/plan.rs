#![forbid(unsafe_code)]
//! Physical plans produced by [`PlanGen`](crate::query::PlanGen).

use std::fmt::{self, Write as _};
use std::hash::Hasher;
use std::ops::Index;

use serde::Serialize;
use xxhash_rust::xxh64::Xxh64;

use crate::query::graph::{Filter, Node, TableFunction};
use crate::storage::DataOrder;
use crate::types::VarId;

/// Index of a plan inside its arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlanId(pub(crate) u32);

impl PlanId {
    /// Position in the arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Pattern accessed by a scan.
#[derive(Clone, Copy, Debug)]
pub struct ScanInfo<'q> {
    /// Physical order scanned.
    pub order: DataOrder,
    /// Relation index inside the enclosing scope.
    pub relation: usize,
    /// Pattern the scan answers.
    pub node: &'q Node,
}

/// Operator of one plan node.
#[derive(Clone, Copy, Debug)]
pub enum PlanOp<'q> {
    /// Range scan over a facts tree.
    IndexScan(ScanInfo<'q>),
    /// Range scan over an aggregated tree.
    AggregatedIndexScan(ScanInfo<'q>),
    /// Range scan over a fully aggregated tree.
    FullyAggregatedIndexScan(ScanInfo<'q>),
    /// Filter applied to the left input.
    Filter(&'q Filter),
    /// Nested loop join.
    NestedLoopJoin,
    /// Merge join on a shared sort variable.
    MergeJoin(VarId),
    /// Hash join building on the left input.
    HashJoin,
    /// Left outer join for OPTIONAL.
    HashOptional,
    /// Concatenation of union branches.
    Union,
    /// Order preserving union.
    MergeUnion,
    /// Table function called for every left row.
    TableFunction(&'q TableFunction),
    /// Duplicate elimination or counting.
    HashGroupify,
    /// Single empty tuple.
    Singleton,
}

impl PlanOp<'_> {
    /// Operator name as shown in explain output.
    pub fn name(&self) -> &'static str {
        match self {
            PlanOp::IndexScan(_) => "IndexScan",
            PlanOp::AggregatedIndexScan(_) => "AggregatedIndexScan",
            PlanOp::FullyAggregatedIndexScan(_) => "FullyAggregatedIndexScan",
            PlanOp::Filter(_) => "Filter",
            PlanOp::NestedLoopJoin => "NestedLoopJoin",
            PlanOp::MergeJoin(_) => "MergeJoin",
            PlanOp::HashJoin => "HashJoin",
            PlanOp::HashOptional => "HashOptional",
            PlanOp::Union => "Union",
            PlanOp::MergeUnion => "MergeUnion",
            PlanOp::TableFunction(_) => "TableFunction",
            PlanOp::HashGroupify => "HashGroupify",
            PlanOp::Singleton => "Singleton",
        }
    }

    /// Scan details for the three scan operators.
    pub fn scan(&self) -> Option<&ScanInfo<'_>> {
        match self {
            PlanOp::IndexScan(info)
            | PlanOp::AggregatedIndexScan(info)
            | PlanOp::FullyAggregatedIndexScan(info) => Some(info),
            _ => None,
        }
    }
}

/// One node of a plan tree.
#[derive(Clone, Copy, Debug)]
pub struct Plan<'q> {
    /// Operator.
    pub op: PlanOp<'q>,
    /// First input.
    pub left: Option<PlanId>,
    /// Second input.
    pub right: Option<PlanId>,
    /// Estimated output rows.
    pub cardinality: f64,
    /// Estimated total cost.
    pub costs: f64,
    /// Variable the output is sorted by.
    pub ordering: Option<VarId>,
}

impl<'q> Plan<'q> {
    pub(crate) fn leaf(op: PlanOp<'q>, cardinality: f64, costs: f64, ordering: Option<VarId>) -> Self {
        Self {
            op,
            left: None,
            right: None,
            cardinality,
            costs,
            ordering,
        }
    }

    pub(crate) fn unary(op: PlanOp<'q>, input: PlanId, cardinality: f64, costs: f64, ordering: Option<VarId>) -> Self {
        Self {
            left: Some(input),
            ..Self::leaf(op, cardinality, costs, ordering)
        }
    }

    pub(crate) fn binary(
        op: PlanOp<'q>,
        left: PlanId,
        right: PlanId,
        cardinality: f64,
        costs: f64,
        ordering: Option<VarId>,
    ) -> Self {
        Self {
            left: Some(left),
            right: Some(right),
            ..Self::leaf(op, cardinality, costs, ordering)
        }
    }
}

/// Explain node representing an operator with its annotations.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExplainNode {
    /// Operator name.
    pub op: String,
    /// Operator annotations.
    pub props: Vec<ExplainProp>,
    /// Input operators.
    pub inputs: Vec<ExplainNode>,
}

/// Single annotation of an [`ExplainNode`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExplainProp {
    /// Annotation key.
    pub key: String,
    /// Annotation value.
    pub value: String,
}

impl ExplainProp {
    fn new(key: &str, value: impl ToString) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

impl ExplainNode {
    fn render(&self, depth: usize, out: &mut String) -> fmt::Result {
        write!(out, "{:width$}{}", "", self.op, width = depth * 2)?;
        for prop in &self.props {
            write!(out, " {}={}", prop.key, prop.value)?;
        }
        out.push('\n');
        for input in &self.inputs {
            input.render(depth + 1, out)?;
        }
        Ok(())
    }
}

impl fmt::Display for ExplainNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render(0, &mut out)?;
        f.write_str(&out)
    }
}

/// Best plan of a query, stored as a compact arena.
#[derive(Clone, Debug)]
pub struct PlanTree<'q> {
    plans: Vec<Plan<'q>>,
    root: PlanId,
    disable_skipping: bool,
}

impl<'q> PlanTree<'q> {
    /// Copies the tree below `root` out of a planning arena.
    pub(crate) fn extract(arena: &[Plan<'q>], root: PlanId, disable_skipping: bool) -> Self {
        let mut plans = Vec::new();
        let root = copy(arena, root, &mut plans);
        Self {
            plans,
            root,
            disable_skipping,
        }
    }

    /// Root operator.
    pub fn root(&self) -> PlanId {
        self.root
    }

    /// Root plan node.
    pub fn root_plan(&self) -> &Plan<'q> {
        &self[self.root]
    }

    /// Number of operators.
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Always false; a tree has a root.
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Every operator, children before parents.
    pub fn iter(&self) -> impl Iterator<Item = &Plan<'q>> {
        self.plans.iter()
    }

    /// Whether executors may skip ahead on sorted inputs.
    pub fn skipping_enabled(&self) -> bool {
        !self.disable_skipping
    }

    /// Indented listing, one operator per line.
    pub fn print(&self) -> String {
        let mut out = String::new();
        self.print_into(self.root, 0, &mut out);
        out
    }

    fn print_into(&self, id: PlanId, indent: usize, out: &mut String) {
        let plan = &self[id];
        let _ = writeln!(
            out,
            "{:indent$}{} cardinality={} costs={}",
            "",
            plan.op.name(),
            plan.cardinality,
            plan.costs,
        );
        for child in [plan.left, plan.right].into_iter().flatten() {
            self.print_into(child, indent + 1, out);
        }
    }

    /// Structured explain tree.
    pub fn explain(&self) -> ExplainNode {
        self.explain_node(self.root)
    }

    fn explain_node(&self, id: PlanId) -> ExplainNode {
        let plan = &self[id];
        let mut props = vec![
            ExplainProp::new("cardinality", plan.cardinality),
            ExplainProp::new("costs", plan.costs),
        ];
        if let Some(ordering) = plan.ordering {
            props.push(ExplainProp::new("ordering", ordering));
        }
        match plan.op {
            PlanOp::IndexScan(info)
            | PlanOp::AggregatedIndexScan(info)
            | PlanOp::FullyAggregatedIndexScan(info) => {
                props.push(ExplainProp::new("order", info.order));
                props.push(ExplainProp::new("relation", info.relation));
            }
            PlanOp::MergeJoin(var) => props.push(ExplainProp::new("on", var)),
            PlanOp::TableFunction(function) => {
                props.push(ExplainProp::new("function", &function.name))
            }
            _ => {}
        }
        ExplainNode {
            op: plan.op.name().to_string(),
            props,
            inputs: [plan.left, plan.right]
                .into_iter()
                .flatten()
                .map(|child| self.explain_node(child))
                .collect(),
        }
    }

    /// Deterministic hash of the plan shape and estimates.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Xxh64::new(0);
        hash_explain(&self.explain(), &mut hasher);
        hasher.finish()
    }
}

impl<'q> Index<PlanId> for PlanTree<'q> {
    type Output = Plan<'q>;

    fn index(&self, id: PlanId) -> &Plan<'q> {
        &self.plans[id.index()]
    }
}

fn copy<'q>(arena: &[Plan<'q>], id: PlanId, out: &mut Vec<Plan<'q>>) -> PlanId {
    let mut plan = arena[id.index()];
    plan.left = plan.left.map(|child| copy(arena, child, out));
    plan.right = plan.right.map(|child| copy(arena, child, out));
    out.push(plan);
    PlanId((out.len() - 1) as u32)
}

fn hash_explain(node: &ExplainNode, hasher: &mut Xxh64) {
    hasher.write(node.op.as_bytes());
    for prop in &node.props {
        hasher.write(prop.key.as_bytes());
        hasher.write(prop.value.as_bytes());
    }
    hasher.write_u64(node.inputs.len() as u64);
    for input in &node.inputs {
        hash_explain(input, hasher);
    }
}
