#![forbid(unsafe_code)]
//! Query graph handed to the optimizer by semantic analysis.
//!
//! A [`QueryGraph`] owns one root [`SubQuery`]. Sub-queries nest through
//! OPTIONAL, UNION and GJOIN groups to arbitrary depth. Join edges are never
//! authored directly; [`QueryGraph::construct_edges`] derives them from
//! shared variables at every nesting level.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::ptr;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::types::{Result, Slot, TristoreError, VarId};

/// One triple pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    /// Subject slot.
    pub subject: Slot,
    /// Predicate slot.
    pub predicate: Slot,
    /// Object slot.
    pub object: Slot,
}

impl Node {
    /// Builds a pattern from its three slots.
    pub fn new(subject: Slot, predicate: Slot, object: Slot) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }

    /// Slots in subject, predicate, object order.
    pub fn slots(&self) -> [Slot; 3] {
        [self.subject, self.predicate, self.object]
    }

    /// Variables bound by this pattern, in slot order.
    pub fn variables(&self) -> impl Iterator<Item = VarId> {
        self.slots().into_iter().filter_map(Slot::var)
    }

    /// Whether the two patterns share a variable.
    pub fn can_join(&self, other: &Node) -> bool {
        self.variables().any(|v| other.variables().any(|w| v == w))
    }
}

/// Implicit join between two entities of one [`SubQuery`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Lower entity index.
    pub from: usize,
    /// Higher entity index.
    pub to: usize,
    /// Shared variables, ascending.
    pub common: Vec<VarId>,
}

/// Two-argument operators.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Plus,
    Minus,
    Mul,
    Div,
}

/// One-argument operators.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Plus,
    Minus,
}

/// SPARQL built-in calls.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Builtin {
    Str,
    Lang,
    LangMatches,
    Datatype,
    Bound,
    SameTerm,
    IsIri,
    IsBlank,
    IsLiteral,
    Regex,
    In,
}

impl Builtin {
    /// Accepted argument counts.
    pub fn arity(self) -> RangeInclusive<usize> {
        match self {
            Builtin::Str
            | Builtin::Lang
            | Builtin::Datatype
            | Builtin::Bound
            | Builtin::IsIri
            | Builtin::IsBlank
            | Builtin::IsLiteral => 1..=1,
            Builtin::LangMatches | Builtin::SameTerm => 2..=2,
            Builtin::Regex => 2..=3,
            Builtin::In => 1..=usize::MAX,
        }
    }
}

/// Filter expression tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Comparison, arithmetic or logical connective.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Filter>,
        /// Right operand.
        right: Box<Filter>,
    },
    /// Negation or sign.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        arg: Box<Filter>,
    },
    /// Constant literal, with its dictionary id when it is known.
    Literal {
        /// Dictionary id.
        #[serde(default)]
        id: Option<u32>,
        /// Lexical form.
        value: String,
    },
    /// Variable reference.
    Variable(VarId),
    /// Constant IRI.
    Iri {
        /// Dictionary id.
        #[serde(default)]
        id: Option<u32>,
        /// IRI text.
        value: String,
    },
    /// Unbound value.
    Null,
    /// Extension function call.
    Function {
        /// Function IRI.
        iri: String,
        /// Argument list.
        #[serde(default)]
        args: Vec<Filter>,
    },
    /// Built-in call.
    Builtin {
        /// Called built-in.
        op: Builtin,
        /// Argument list.
        args: Vec<Filter>,
    },
}

impl Filter {
    /// Shorthand for a binary node.
    pub fn binary(op: BinaryOp, left: Filter, right: Filter) -> Self {
        Filter::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Direct sub-expressions.
    pub fn children(&self) -> SmallVec<[&Filter; 3]> {
        match self {
            Filter::Binary { left, right, .. } => SmallVec::from_slice(&[&**left, &**right]),
            Filter::Unary { arg, .. } => SmallVec::from_slice(&[&**arg]),
            Filter::Function { args, .. } | Filter::Builtin { args, .. } => args.iter().collect(),
            Filter::Literal { .. } | Filter::Variable(_) | Filter::Iri { .. } | Filter::Null => {
                SmallVec::new()
            }
        }
    }

    /// Whether every variable the expression reads is in `variables`.
    pub fn is_applicable(&self, variables: &FxHashSet<VarId>) -> bool {
        match self {
            Filter::Variable(id) => variables.contains(id),
            _ => self.children().iter().all(|c| c.is_applicable(variables)),
        }
    }

    /// Whether the expression reads `var`.
    pub fn mentions(&self, var: VarId) -> bool {
        match self {
            Filter::Variable(id) => *id == var,
            _ => self.children().iter().any(|c| c.mentions(var)),
        }
    }

    /// Adds every variable read by the expression to `out`.
    pub fn collect_variables(&self, out: &mut BTreeSet<VarId>) {
        if let Filter::Variable(id) = self {
            out.insert(*id);
        }
        for child in self.children() {
            child.collect_variables(out);
        }
    }

    fn validate(&self) -> Result<()> {
        if let Filter::Builtin { op, args } = self {
            if !op.arity().contains(&args.len()) {
                return Err(TristoreError::InvalidOwned(format!(
                    "{op:?} called with {} arguments",
                    args.len()
                )));
            }
        }
        self.children().iter().try_for_each(|c| c.validate())
    }
}

/// Argument of a [`TableFunction`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    /// Variable providing the value, if any.
    #[serde(default)]
    pub id: Option<VarId>,
    /// Constant value.
    #[serde(default)]
    pub value: String,
}

/// Call of an external function producing bindings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFunction {
    /// Function name.
    pub name: String,
    /// Inputs.
    #[serde(default)]
    pub input: Vec<Argument>,
    /// Variables bound by the call.
    #[serde(default)]
    pub output: Vec<VarId>,
}

impl TableFunction {
    /// Variables the call reads.
    pub fn input_variables(&self) -> FxHashSet<VarId> {
        self.input.iter().filter_map(|a| a.id).collect()
    }
}

/// One graph pattern scope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubQuery {
    /// Triple patterns.
    pub nodes: Vec<Node>,
    /// Derived by [`QueryGraph::construct_edges`].
    pub edges: Vec<Edge>,
    /// Filters evaluated in this scope.
    pub filters: Vec<Filter>,
    /// OPTIONAL groups, in source order.
    pub optional: Vec<SubQuery>,
    /// UNION groups, each a list of alternatives.
    pub unions: Vec<Vec<SubQuery>>,
    /// GJOIN groups, each a pair of branches.
    pub gjoins: Vec<Vec<SubQuery>>,
    /// Table function calls.
    pub table_functions: Vec<TableFunction>,
}

fn intersection(a: &BTreeSet<VarId>, b: &BTreeSet<VarId>) -> Vec<VarId> {
    a.intersection(b).copied().collect()
}

impl SubQuery {
    /// Recomputes edges here and below. Returns every variable bound in
    /// this scope, nested groups included.
    pub fn construct_edges(&mut self) -> BTreeSet<VarId> {
        let mut bindings: Vec<BTreeSet<VarId>> = self
            .nodes
            .iter()
            .map(|n| n.variables().collect())
            .collect();
        let optional_ofs = bindings.len();
        for optional in &mut self.optional {
            bindings.push(optional.construct_edges());
        }
        let union_ofs = bindings.len();
        for group in &mut self.unions {
            let mut vars = BTreeSet::new();
            for part in group.iter_mut() {
                vars.extend(part.construct_edges());
            }
            bindings.push(vars);
        }
        let gjoin_ofs = bindings.len();
        for group in &mut self.gjoins {
            let mut vars = BTreeSet::new();
            for part in group.iter_mut() {
                vars.extend(part.construct_edges());
            }
            bindings.push(vars);
        }

        // Class ranges in the fixed pairing order.
        let classes = [
            0..optional_ofs,
            optional_ofs..union_ofs,
            union_ofs..gjoin_ofs,
            gjoin_ofs..bindings.len(),
        ];
        let mut edges = Vec::new();
        for (ci, first) in classes.iter().enumerate() {
            for from in first.clone() {
                for second in &classes[ci..] {
                    for to in second.clone() {
                        if to <= from {
                            continue;
                        }
                        let common = intersection(&bindings[from], &bindings[to]);
                        if !common.is_empty() {
                            edges.push(Edge { from, to, common });
                        }
                    }
                }
            }
        }
        self.edges = edges;
        bindings.into_iter().flatten().collect()
    }

    /// Whether `var` appears nowhere in this scope except in `node` itself.
    pub fn is_unused(&self, node: &Node, var: VarId) -> bool {
        if self.filters.iter().any(|f| f.mentions(var)) {
            return false;
        }
        if self
            .nodes
            .iter()
            .any(|n| !ptr::eq(n, node) && n.variables().any(|v| v == var))
        {
            return false;
        }
        self.optional.iter().all(|q| q.is_unused(node, var))
            && self.unions.iter().flatten().all(|q| q.is_unused(node, var))
            && self.gjoins.iter().flatten().all(|q| q.is_unused(node, var))
    }

    /// Adds every variable of this scope to `out`, skipping the group
    /// `except` wherever it is nested.
    pub fn collect_variables(&self, out: &mut BTreeSet<VarId>, except: Option<&[SubQuery]>) {
        for filter in &self.filters {
            filter.collect_variables(out);
        }
        for node in &self.nodes {
            out.extend(node.variables());
        }
        for optional in &self.optional {
            optional.collect_variables(out, except);
        }
        let skip = |group: &Vec<SubQuery>| except.is_some_and(|e| ptr::eq(group.as_slice(), e));
        for group in self.unions.iter().chain(&self.gjoins) {
            if skip(group) {
                continue;
            }
            for part in group {
                part.collect_variables(out, except);
            }
        }
    }

    /// Number of entities taking part in this scope's join ordering.
    pub fn relation_count(&self) -> usize {
        let entities = self.nodes.len() + self.optional.len() + self.unions.len() + self.gjoins.len();
        let singleton = usize::from(entities == 0 && !self.table_functions.is_empty());
        entities + self.table_functions.len() + singleton
    }

    fn validate(&self) -> Result<()> {
        self.filters.iter().try_for_each(Filter::validate)?;
        if self.unions.iter().any(|g| g.len() < 2) {
            return Err(TristoreError::Invalid("union needs at least two branches"));
        }
        if self.gjoins.iter().any(|g| g.len() != 2) {
            return Err(TristoreError::Invalid("gjoin needs exactly two branches"));
        }
        self.optional
            .iter()
            .chain(self.unions.iter().flatten())
            .chain(self.gjoins.iter().flatten())
            .try_for_each(SubQuery::validate)
    }
}

/// Result duplicate semantics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateHandling {
    /// Keep every solution.
    #[default]
    AllDuplicates,
    /// Count duplicates.
    CountDuplicates,
    /// Duplicates may be dropped.
    ReducedDuplicates,
    /// Drop duplicates.
    NoDuplicates,
    /// Show duplicate counts.
    ShowDuplicates,
}

impl DuplicateHandling {
    /// Whether the result must be grouped.
    pub fn needs_grouping(self) -> bool {
        matches!(
            self,
            DuplicateHandling::CountDuplicates
                | DuplicateHandling::NoDuplicates
                | DuplicateHandling::ShowDuplicates
        )
    }
}

/// ORDER BY entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Sort variable.
    pub id: VarId,
    /// Sort descending.
    #[serde(default)]
    pub descending: bool,
}

fn unlimited() -> u32 {
    u32::MAX
}

/// Complete query: root scope plus output modifiers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryGraph {
    #[serde(default)]
    query: SubQuery,
    #[serde(default)]
    projection: Vec<VarId>,
    #[serde(default)]
    duplicate_handling: DuplicateHandling,
    #[serde(default)]
    order: Vec<Order>,
    #[serde(default = "unlimited")]
    limit: u32,
    #[serde(default)]
    known_empty_result: bool,
}

impl Default for QueryGraph {
    fn default() -> Self {
        Self {
            query: SubQuery::default(),
            projection: Vec::new(),
            duplicate_handling: DuplicateHandling::default(),
            order: Vec::new(),
            limit: unlimited(),
            known_empty_result: false,
        }
    }
}

impl QueryGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph with `query` as its root scope.
    pub fn with_query(query: SubQuery) -> Self {
        Self {
            query,
            ..Self::default()
        }
    }

    /// Resets to the empty state, modifiers included.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Derives join edges at every nesting level.
    pub fn construct_edges(&mut self) {
        self.query.construct_edges();
    }

    /// Checks structural invariants the optimizer relies on.
    pub fn validate(&self) -> Result<()> {
        self.query.validate()
    }

    /// Root scope.
    pub fn query(&self) -> &SubQuery {
        &self.query
    }

    /// Mutable root scope.
    pub fn query_mut(&mut self) -> &mut SubQuery {
        &mut self.query
    }

    /// Appends an output variable.
    pub fn add_projection(&mut self, id: VarId) {
        self.projection.push(id);
    }

    /// Output variables.
    pub fn projection(&self) -> &[VarId] {
        &self.projection
    }

    /// Sets duplicate semantics.
    pub fn set_duplicate_handling(&mut self, mode: DuplicateHandling) {
        self.duplicate_handling = mode;
    }

    /// Duplicate semantics.
    pub fn duplicate_handling(&self) -> DuplicateHandling {
        self.duplicate_handling
    }

    /// Appends an ORDER BY entry.
    pub fn add_order(&mut self, order: Order) {
        self.order.push(order);
    }

    /// ORDER BY entries.
    pub fn order(&self) -> &[Order] {
        &self.order
    }

    /// Sets the result limit.
    pub fn set_limit(&mut self, limit: u32) {
        self.limit = limit;
    }

    /// Result limit, `u32::MAX` when unlimited.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Records that the result is statically empty.
    pub fn mark_as_known_empty(&mut self) {
        self.known_empty_result = true;
    }

    /// Whether the result is statically empty.
    pub fn known_empty(&self) -> bool {
        self.known_empty_result
    }

    /// Whether `var` is unused outside `node`, projection included.
    pub fn is_unused(&self, node: &Node, var: VarId) -> bool {
        !self.projection.contains(&var) && self.query.is_unused(node, var)
    }

    /// Projection plus every variable of the graph outside `except`.
    pub fn collect_variables(&self, except: Option<&[SubQuery]>) -> BTreeSet<VarId> {
        let mut out: BTreeSet<VarId> = self.projection.iter().copied().collect();
        self.query.collect_variables(&mut out, except);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::collection::vec;
    use proptest::prelude::*;

    fn var(n: u32) -> Slot {
        Slot::Var(VarId(n))
    }

    fn c(n: u32) -> Slot {
        Slot::Const(n)
    }

    #[test]
    fn can_join_ignores_constants() {
        let a = Node::new(var(0), c(1), var(2));
        let b = Node::new(var(2), c(1), c(0));
        let d = Node::new(c(0), c(1), var(3));
        assert!(a.can_join(&b));
        assert!(!a.can_join(&d));
    }

    #[test]
    fn edges_cover_nested_groups() {
        let mut query = SubQuery {
            nodes: vec![
                Node::new(var(0), c(10), var(1)),
                Node::new(var(1), c(11), var(0)),
            ],
            optional: vec![SubQuery {
                nodes: vec![Node::new(var(0), c(12), var(5))],
                ..SubQuery::default()
            }],
            unions: vec![vec![
                SubQuery {
                    nodes: vec![Node::new(var(5), c(13), var(6))],
                    ..SubQuery::default()
                },
                SubQuery {
                    nodes: vec![Node::new(var(1), c(14), var(7))],
                    ..SubQuery::default()
                },
            ]],
            ..SubQuery::default()
        };
        let vars = query.construct_edges();
        assert_eq!(vars.len(), 5);
        assert_eq!(
            query.edges,
            vec![
                Edge {
                    from: 0,
                    to: 1,
                    common: vec![VarId(0), VarId(1)],
                },
                Edge {
                    from: 0,
                    to: 2,
                    common: vec![VarId(0)],
                },
                Edge {
                    from: 0,
                    to: 3,
                    common: vec![VarId(1)],
                },
                Edge {
                    from: 1,
                    to: 2,
                    common: vec![VarId(0)],
                },
                Edge {
                    from: 1,
                    to: 3,
                    common: vec![VarId(1)],
                },
                Edge {
                    from: 2,
                    to: 3,
                    common: vec![VarId(5)],
                },
            ]
        );
        assert!(query.unions[0][0].edges.is_empty());
    }

    #[test]
    fn gjoin_edges_use_their_own_offset() {
        let branch = |s: u32| SubQuery {
            nodes: vec![Node::new(var(s), c(1), var(9))],
            ..SubQuery::default()
        };
        let mut query = SubQuery {
            nodes: vec![Node::new(var(0), c(1), c(2))],
            unions: vec![vec![branch(3), branch(4)]],
            gjoins: vec![vec![branch(0), branch(8)]],
            ..SubQuery::default()
        };
        query.construct_edges();
        let pairs: Vec<_> = query.edges.iter().map(|e| (e.from, e.to)).collect();
        assert_eq!(pairs, vec![(0, 2), (1, 2)]);
    }

    #[test]
    fn unused_checks_projection_filters_and_nesting() {
        let mut graph = QueryGraph::new();
        *graph.query_mut() = SubQuery {
            nodes: vec![
                Node::new(var(0), c(1), var(1)),
                Node::new(var(2), c(1), var(3)),
            ],
            filters: vec![Filter::binary(
                BinaryOp::Equal,
                Filter::Variable(VarId(3)),
                Filter::Literal {
                    id: None,
                    value: "x".into(),
                },
            )],
            optional: vec![SubQuery {
                nodes: vec![Node::new(var(1), c(5), c(6))],
                ..SubQuery::default()
            }],
            ..SubQuery::default()
        };
        graph.add_projection(VarId(2));
        let node = graph.query().nodes[0];
        let first = &graph.query().nodes[0];
        let second = &graph.query().nodes[1];
        assert!(graph.is_unused(first, VarId(0)));
        assert!(!graph.is_unused(first, VarId(1)));
        assert!(!graph.is_unused(second, VarId(2)));
        assert!(!graph.is_unused(second, VarId(3)));
        // A copy is a different node, so its own variables count as uses.
        assert!(!graph.is_unused(&node, VarId(0)));
    }

    #[test]
    fn collect_variables_skips_the_given_union() {
        let mut query = SubQuery {
            nodes: vec![Node::new(var(0), c(1), var(1))],
            unions: vec![vec![
                SubQuery {
                    nodes: vec![Node::new(var(0), c(2), var(2))],
                    ..SubQuery::default()
                },
                SubQuery {
                    nodes: vec![Node::new(var(0), c(3), var(3))],
                    ..SubQuery::default()
                },
            ]],
            ..SubQuery::default()
        };
        query.construct_edges();
        let graph = QueryGraph::with_query(query);
        let union = graph.query().unions[0].as_slice();
        let outside = graph.collect_variables(Some(union));
        assert_eq!(outside, [VarId(0), VarId(1)].into_iter().collect());
        assert_eq!(graph.collect_variables(None).len(), 4);
    }

    #[test]
    fn clear_resets_modifiers() {
        let mut graph = QueryGraph::new();
        graph.add_projection(VarId(1));
        graph.set_limit(10);
        graph.set_duplicate_handling(DuplicateHandling::NoDuplicates);
        graph.mark_as_known_empty();
        graph.add_order(Order {
            id: VarId(1),
            descending: true,
        });
        graph.clear();
        assert_eq!(graph, QueryGraph::new());
        assert_eq!(graph.limit(), u32::MAX);
    }

    #[test]
    fn validation_rejects_malformed_groups() {
        let mut graph = QueryGraph::new();
        graph.query_mut().gjoins.push(vec![SubQuery::default()]);
        assert!(graph.validate().is_err());
        graph.clear();
        graph.query_mut().filters.push(Filter::Builtin {
            op: Builtin::Regex,
            args: vec![Filter::Variable(VarId(0))],
        });
        assert!(graph.validate().is_err());
    }

    #[test]
    fn json_round_trip() {
        let json = r#"{
            "query": {
                "nodes": [{"subject": {"var": 0}, "predicate": {"const": 7}, "object": {"const": 9}}],
                "filters": [{"builtin": {"op": "bound", "args": [{"variable": 0}]}}]
            },
            "projection": [0],
            "duplicate_handling": "no_duplicates"
        }"#;
        let graph: QueryGraph = serde_json::from_str(json).unwrap();
        assert_eq!(graph.limit(), u32::MAX);
        assert_eq!(graph.query().nodes[0].predicate, c(7));
        assert!(graph.duplicate_handling().needs_grouping());
        let again: QueryGraph =
            serde_json::from_str(&serde_json::to_string(&graph).unwrap()).unwrap();
        assert_eq!(again, graph);
    }

    fn slot() -> impl Strategy<Value = Slot> {
        prop_oneof![(0u32..6).prop_map(var), (0u32..4).prop_map(c)]
    }

    fn node() -> impl Strategy<Value = Node> {
        (slot(), slot(), slot()).prop_map(|(s, p, o)| Node::new(s, p, o))
    }

    fn expr(depth: u32) -> BoxedStrategy<Filter> {
        let leaf = prop_oneof![
            (0u32..6).prop_map(|v| Filter::Variable(VarId(v))),
            Just(Filter::Null),
        ];
        if depth == 0 {
            return leaf.boxed();
        }
        prop_oneof![
            leaf,
            (expr(depth - 1), expr(depth - 1))
                .prop_map(|(l, r)| Filter::binary(BinaryOp::And, l, r)),
            vec(expr(depth - 1), 0..3).prop_map(|args| Filter::Function {
                iri: "f".into(),
                args
            }),
        ]
        .boxed()
    }

    proptest! {
        #[test]
        fn edges_match_variable_intersections(nodes in vec(node(), 0..7)) {
            let mut query = SubQuery { nodes: nodes.clone(), ..SubQuery::default() };
            query.construct_edges();
            for i in 0..nodes.len() {
                for j in i + 1..nodes.len() {
                    let a: BTreeSet<_> = nodes[i].variables().collect();
                    let b: BTreeSet<_> = nodes[j].variables().collect();
                    let common = intersection(&a, &b);
                    let found: Vec<_> = query.edges.iter().filter(|e| e.from == i && e.to == j).collect();
                    if common.is_empty() {
                        prop_assert!(found.is_empty());
                    } else {
                        prop_assert_eq!(found.len(), 1);
                        prop_assert_eq!(&found[0].common, &common);
                    }
                }
            }
        }

        #[test]
        fn applicability_is_monotone(
            filter in expr(3),
            small in vec(0u32..6, 0..6),
            extra in vec(0u32..6, 0..6),
        ) {
            let small: FxHashSet<VarId> = small.into_iter().map(VarId).collect();
            let mut large = small.clone();
            large.extend(extra.into_iter().map(VarId));
            if filter.is_applicable(&small) {
                prop_assert!(filter.is_applicable(&large));
            }
        }
    }
}
