#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;
use tristore::primitives::buffer::BufferOptions;
use tristore::query::StatisticsProvider;
use tristore::storage::{DataOrder, Database, DatabaseBuilder, PredicateSetOptions, Triple};
use tristore::types::{Result, Slot, VarId};

const TRIPLES: usize = 3_000;
const SEED: u64 = 0x5eed_7215;

fn options() -> BufferOptions {
    BufferOptions {
        buffer_size: 64,
        page_size: 1024,
        ..BufferOptions::default()
    }
}

fn random_triples() -> BTreeSet<Triple> {
    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let mut triples = BTreeSet::new();
    while triples.len() < TRIPLES {
        triples.insert((
            rng.gen_range(0..250),
            rng.gen_range(1_000..1_012),
            rng.gen_range(0..400),
        ));
    }
    triples
}

fn build(dir: &tempfile::TempDir, triples: &BTreeSet<Triple>) -> Result<Database> {
    DatabaseBuilder::new()
        .buffer_options(options())
        .build(dir.path().join("segments.db"), triples.iter().copied())
}

#[test]
fn every_order_scans_its_permutation() -> Result<()> {
    let dir = tempdir()?;
    let triples = random_triples();
    let db = build(&dir, &triples)?;
    assert_eq!(db.triples(), TRIPLES as u64);

    for order in DataOrder::ALL {
        let mut expected: Vec<Triple> = triples
            .iter()
            .map(|&(s, p, o)| order.permute(s, p, o))
            .collect();
        expected.sort_unstable();
        let facts = db.get_facts(order);
        let scanned = facts.scan()?.collect::<Result<Vec<_>>>()?;
        assert_eq!(scanned, expected, "order {}", order.name());
        assert!(facts.pages() > 1, "order {} fits one page", order.name());
        assert_eq!(facts.cardinality(), TRIPLES as u64);

        let (a, b, c) = expected[expected.len() / 2];
        let from = facts.scan_from(a, b, c)?.next().transpose()?;
        assert_eq!(from, Some((a, b, c)));
    }
    Ok(())
}

#[test]
fn aggregated_counts_match_brute_force() -> Result<()> {
    let dir = tempdir()?;
    let triples = random_triples();
    let db = build(&dir, &triples)?;

    for order in DataOrder::ALL {
        let mut pairs: BTreeMap<(u32, u32), u32> = BTreeMap::new();
        let mut leading: BTreeMap<u32, u32> = BTreeMap::new();
        for &(s, p, o) in &triples {
            let (v1, v2, _) = order.permute(s, p, o);
            *pairs.entry((v1, v2)).or_default() += 1;
            *leading.entry(v1).or_default() += 1;
        }

        let aggregated = db.get_aggregated_facts(order);
        let entries = aggregated.scan()?.collect::<Result<Vec<_>>>()?;
        assert_eq!(entries.len(), pairs.len());
        for (entry, (&(v1, v2), &count)) in entries.iter().zip(&pairs) {
            assert_eq!((entry.v1, entry.v2, entry.count), (v1, v2, count));
        }
        assert_eq!(aggregated.level2_groups(), pairs.len() as u64);
        assert_eq!(aggregated.level1_groups(), leading.len() as u64);

        let fully = db.get_fully_aggregated_facts(order);
        for (&v1, &count) in leading.iter().step_by(7) {
            assert_eq!(fully.lookup(v1)?, Some(count));
        }
        assert_eq!(fully.level1_groups(), leading.len() as u64);
    }
    Ok(())
}

#[test]
fn exact_statistics_answer_pattern_cardinalities() -> Result<()> {
    let dir = tempdir()?;
    let triples = random_triples();
    let db = build(&dir, &triples)?;

    let count = |f: &dyn Fn(&Triple) -> bool| triples.iter().filter(|t| f(t)).count() as u64;
    let &(s, p, o) = triples.iter().nth(TRIPLES / 3).unwrap();
    assert_eq!(db.cardinality(None, None, None)?, TRIPLES as u64);
    assert_eq!(db.cardinality(Some(s), None, None)?, count(&|t| t.0 == s));
    assert_eq!(db.cardinality(None, Some(p), None)?, count(&|t| t.1 == p));
    assert_eq!(db.cardinality(None, None, Some(o))?, count(&|t| t.2 == o));
    assert_eq!(
        db.cardinality(Some(s), Some(p), None)?,
        count(&|t| t.0 == s && t.1 == p)
    );
    assert_eq!(
        db.cardinality(None, Some(p), Some(o))?,
        count(&|t| t.1 == p && t.2 == o)
    );
    assert_eq!(db.cardinality(Some(s), Some(p), Some(o))?, 1);
    // Unknown constants still estimate one match.
    assert_eq!(db.cardinality(Some(9_999), None, None)?, 1);

    Ok(())
}

#[test]
fn join_selectivity_matches_counted_joins() -> Result<()> {
    let dir = tempdir()?;
    let triples = random_triples();
    let db = build(&dir, &triples)?;
    let var = |n| Slot::Var(VarId(n));

    let mut by_subject: BTreeMap<u32, u64> = BTreeMap::new();
    for t in &triples {
        *by_subject.entry(t.0).or_default() += 1;
    }
    let p = 1_004;
    let with_p: Vec<&Triple> = triples.iter().filter(|t| t.1 == p).collect();
    let joined = |key: &dyn Fn(&Triple) -> u32| -> u64 {
        with_p
            .iter()
            .map(|t| by_subject.get(&key(t)).copied().unwrap_or(0))
            .sum()
    };
    let cross = with_p.len() as f64 * db.triples() as f64;

    // ?x p ?y . ?x ?a ?b
    let subject_subject = db.join_selectivity([var(0), Slot::Const(p), var(1)], [var(0), var(2), var(3)])?;
    let exact = joined(&|t| t.0);
    assert!(exact > 0);
    assert_eq!((subject_subject * cross).round() as u64, exact, "{subject_subject}");

    // ?x p ?y . ?y ?a ?b
    let object_subject = db.join_selectivity([var(0), Slot::Const(p), var(1)], [var(1), var(2), var(3)])?;
    let exact = joined(&|t| t.2);
    assert!(exact > 0);
    assert_eq!((object_subject * cross).round() as u64, exact, "{object_subject}");

    // Argument order does not change the estimate.
    let swapped = db.join_selectivity([var(1), var(2), var(3)], [var(0), Slot::Const(p), var(1)])?;
    assert!((swapped - object_subject).abs() < 1e-12, "{swapped} vs {object_subject}");
    Ok(())
}

#[test]
fn reopen_preserves_statistics_and_predicate_sets() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("segments.db");
    let triples = random_triples();
    let (stats, sets) = {
        let db = build(&dir, &triples)?;
        let stats: Vec<_> = DataOrder::ALL.iter().map(|&o| db.get_facts(o).stats()).collect();
        (stats, db.get_predicate_sets().get_statistics())
    };
    assert!(sets.count > 50);

    let db = Database::open(&path, options())?;
    let reopened: Vec<_> = DataOrder::ALL.iter().map(|&o| db.get_facts(o).stats()).collect();
    assert_eq!(reopened, stats);
    assert_eq!(db.get_predicate_sets().get_statistics(), sets);

    let p = 1_003;
    let with_p: Vec<&Triple> = triples.iter().filter(|t| t.1 == p).collect();
    let subjects = with_p.iter().map(|t| t.0).collect::<BTreeSet<_>>().len() as u64;
    let (distinct, cardinality) = db.get_predicate_sets().get_star_cardinality(&[p]);
    assert_eq!(distinct, subjects);
    assert!((cardinality - with_p.len() as f64).abs() < 1e-6, "{cardinality}");
    Ok(())
}

#[test]
fn predicate_sets_are_capped() -> Result<()> {
    let dir = tempdir()?;
    let db = DatabaseBuilder::new()
        .buffer_options(options())
        .predicate_set_options(PredicateSetOptions { max_sets: 50 })
        .build(dir.path().join("capped.db"), random_triples())?;
    let sets = db.get_predicate_sets().get_statistics();
    assert_eq!(sets.count, 50);
    assert!(sets.entries >= sets.count);
    Ok(())
}
