#![allow(missing_docs)]

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;
use tristore::primitives::buffer::BufferOptions;
use tristore::query::{DuplicateHandling, Node, PlanOp, PlanTree, SubQuery};
use tristore::storage::Triple;
use tristore::types::{Result, Slot, VarId};
use tristore::{Database, DatabaseBuilder, PlanGen, PlannerConfig, QueryGraph};

const SEED: u64 = 0x91a4_6e;
const NAME: u32 = 1_000;
const KNOWS: u32 = 1_001;
const LIVES_IN: u32 = 1_002;

fn var(n: u32) -> Slot {
    Slot::Var(VarId(n))
}

fn c(n: u32) -> Slot {
    Slot::Const(n)
}

fn options() -> BufferOptions {
    BufferOptions {
        buffer_size: 128,
        page_size: 1024,
        ..BufferOptions::default()
    }
}

fn triples() -> Vec<Triple> {
    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let mut out = Vec::new();
    for person in 0..300u32 {
        out.push((person, NAME, 10_000 + person));
        for _ in 0..rng.gen_range(0..6) {
            out.push((person, KNOWS, rng.gen_range(0..300)));
        }
        if rng.gen_bool(0.3) {
            out.push((person, LIVES_IN, 20_000 + rng.gen_range(0..12)));
        }
    }
    out
}

fn build(dir: &tempfile::TempDir) -> Result<Database> {
    DatabaseBuilder::new()
        .buffer_options(options())
        .build(dir.path().join("plans.db"), triples())
}

fn graph(query: SubQuery, projection: &[u32]) -> QueryGraph {
    let mut graph = QueryGraph::with_query(query);
    for &v in projection {
        graph.add_projection(VarId(v));
    }
    graph.construct_edges();
    graph
}

fn count(tree: &PlanTree<'_>, name: &str) -> usize {
    tree.iter().filter(|plan| plan.op.name() == name).count()
}

fn plan<'q>(db: &Database, graph: &'q QueryGraph) -> Result<PlanTree<'q>> {
    graph.validate()?;
    Ok(PlanGen::default()
        .translate(db, graph)?
        .expect("query should be plannable"))
}

#[test]
fn single_pattern_estimate_is_exact() -> Result<()> {
    let dir = tempdir()?;
    let db = build(&dir)?;
    let graph = graph(
        SubQuery {
            nodes: vec![Node::new(var(0), c(KNOWS), var(1))],
            ..SubQuery::default()
        },
        &[0, 1],
    );
    let tree = plan(&db, &graph)?;
    let root = tree.root_plan();
    assert!(matches!(root.op, PlanOp::IndexScan(_)), "{}", tree.print());
    let knows = triples().iter().filter(|t| t.1 == KNOWS).count();
    assert_eq!(root.cardinality, knows as f64);
    assert!(root.costs > 0.0);
    Ok(())
}

#[test]
fn star_join_scans_each_pattern_once() -> Result<()> {
    let dir = tempdir()?;
    let db = build(&dir)?;
    let graph = graph(
        SubQuery {
            nodes: vec![
                Node::new(var(0), c(NAME), var(1)),
                Node::new(var(0), c(KNOWS), var(2)),
                Node::new(var(2), c(LIVES_IN), var(3)),
            ],
            ..SubQuery::default()
        },
        &[1, 3],
    );
    let tree = plan(&db, &graph)?;
    let scans = tree.iter().filter(|plan| plan.op.scan().is_some()).count();
    assert_eq!(scans, 3, "{}", tree.print());
    let joins = count(&tree, "MergeJoin") + count(&tree, "HashJoin") + count(&tree, "NestedLoopJoin");
    assert_eq!(joins, 2);
    let root = tree.root_plan();
    assert!(root.cardinality >= 1.0);
    for plan in tree.iter() {
        for child in [plan.left, plan.right].into_iter().flatten() {
            assert!(plan.costs >= tree[child].costs);
        }
    }
    Ok(())
}

#[test]
fn optional_scope_yields_hash_optional() -> Result<()> {
    let dir = tempdir()?;
    let db = build(&dir)?;
    let graph = graph(
        SubQuery {
            nodes: vec![Node::new(var(0), c(NAME), var(1))],
            optional: vec![SubQuery {
                nodes: vec![Node::new(var(0), c(LIVES_IN), var(2))],
                ..SubQuery::default()
            }],
            ..SubQuery::default()
        },
        &[1, 2],
    );
    let tree = plan(&db, &graph)?;
    let root = tree.root_plan();
    assert!(matches!(root.op, PlanOp::HashOptional), "{}", tree.print());
    let left = root.left.map(|id| tree[id]);
    assert_eq!(left.map(|p| p.cardinality), Some(300.0));
    Ok(())
}

#[test]
fn union_branches_are_combined() -> Result<()> {
    let dir = tempdir()?;
    let db = build(&dir)?;
    let branch = |p| SubQuery {
        nodes: vec![Node::new(var(0), c(p), var(1))],
        ..SubQuery::default()
    };
    let graph = graph(
        SubQuery {
            unions: vec![vec![branch(NAME), branch(LIVES_IN)]],
            ..SubQuery::default()
        },
        &[0, 1],
    );
    let tree = plan(&db, &graph)?;
    assert_eq!(count(&tree, "Union") + count(&tree, "MergeUnion"), 1, "{}", tree.print());
    assert!(tree.root_plan().cardinality >= 300.0);
    Ok(())
}

#[test]
fn distinct_results_are_grouped() -> Result<()> {
    let dir = tempdir()?;
    let db = build(&dir)?;
    let mut graph = graph(
        SubQuery {
            nodes: vec![Node::new(var(0), c(KNOWS), var(1))],
            ..SubQuery::default()
        },
        &[1],
    );
    graph.set_duplicate_handling(DuplicateHandling::NoDuplicates);
    let tree = plan(&db, &graph)?;
    assert!(matches!(tree.root_plan().op, PlanOp::HashGroupify));
    Ok(())
}

#[test]
fn scopes_wider_than_the_limit_have_no_plan() -> Result<()> {
    let dir = tempdir()?;
    let db = build(&dir)?;
    let graph = graph(
        SubQuery {
            nodes: (0..3)
                .map(|i| Node::new(var(i), c(KNOWS), var(i + 1)))
                .collect(),
            ..SubQuery::default()
        },
        &[0, 3],
    );
    let narrow = PlanGen::new(PlannerConfig {
        max_relations: 2,
        ..PlannerConfig::default()
    });
    assert!(narrow.translate(&db, &graph)?.is_none());
    assert!(PlanGen::default().translate(&db, &graph)?.is_some());
    Ok(())
}

#[test]
fn fingerprint_is_stable_across_reopen() -> Result<()> {
    let dir = tempdir()?;
    let graph = graph(
        SubQuery {
            nodes: vec![
                Node::new(var(0), c(KNOWS), var(1)),
                Node::new(var(1), c(NAME), var(2)),
            ],
            ..SubQuery::default()
        },
        &[0, 2],
    );
    let (first, second) = {
        let db = build(&dir)?;
        let first = plan(&db, &graph)?.fingerprint();
        (first, plan(&db, &graph)?.fingerprint())
    };
    assert_eq!(first, second);

    let db = Database::open(dir.path().join("plans.db"), options())?;
    assert_eq!(plan(&db, &graph)?.fingerprint(), first);
    Ok(())
}
