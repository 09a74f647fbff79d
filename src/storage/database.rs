#![forbid(unsafe_code)]

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::primitives::buffer::{BufferManager, BufferOptions, FilePartition, Partition};
use crate::query::StatisticsProvider;
use crate::storage::aggregated::{self, AggregatedFactsSegment};
use crate::storage::btree::{Tree, TreeInfo};
use crate::storage::catalog::{Catalog, SegmentInfo, SegmentKind, CATALOG_PAGE};
use crate::storage::exact_stats::{CardinalitySources, ExactStatisticsLayout, ExactStatisticsSegment};
use crate::storage::facts::{FactsSegment, Triple};
use crate::storage::fully_aggregated::FullyAggregatedFactsSegment;
use crate::storage::predicate_set::{PredicateSetOptions, PredicateSetSegment};
use crate::storage::{DataOrder, SegmentStats};
use crate::types::page::PageHeader;
use crate::types::{PageId, PartitionId, Result, Slot, TristoreError};

/// An opened triple store: every segment of one partition file.
pub struct Database {
    buffer: Arc<BufferManager>,
    partition: Arc<dyn Partition>,
    catalog: Catalog,
    facts: Vec<FactsSegment>,
    aggregated: Vec<Arc<AggregatedFactsSegment>>,
    fully_aggregated: Vec<Arc<FullyAggregatedFactsSegment>>,
    statistics: ExactStatisticsSegment,
    predicate_sets: PredicateSetSegment,
}

fn stats_of(info: &SegmentInfo) -> Result<SegmentStats> {
    match info.values[..] {
        [level1_groups, level2_groups, cardinality] => Ok(SegmentStats {
            pages: info.pages,
            level1_groups,
            level2_groups,
            cardinality,
        }),
        _ => Err(TristoreError::Corruption("segment statistics")),
    }
}

fn info_of(kind: SegmentKind, slot: usize, tree: &TreeInfo, stats: &SegmentStats) -> SegmentInfo {
    SegmentInfo {
        kind,
        slot: slot as u8,
        root: tree.root,
        pages: tree.pages,
        values: vec![stats.level1_groups, stats.level2_groups, stats.cardinality],
    }
}

impl Database {
    /// Opens the database stored at `path`.
    pub fn open(path: impl AsRef<Path>, options: BufferOptions) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TristoreError::NotFound);
        }
        let partition: Arc<dyn Partition> =
            Arc::new(FilePartition::open(path, PartitionId(0), options.page_size)?);
        let buffer = Arc::new(BufferManager::new(options, None)?);
        Self::open_with(buffer, partition)
    }

    /// Opens the database held by `partition`.
    pub fn open_with(buffer: Arc<BufferManager>, partition: Arc<dyn Partition>) -> Result<Self> {
        if partition.size() == 0 {
            return Err(TristoreError::NotFound);
        }
        {
            let guard = buffer.read_page_shared(&partition, CATALOG_PAGE)?;
            let header = PageHeader::decode(&guard)?;
            if header.page_size as usize != partition.page_size() {
                return Err(TristoreError::Config(format!(
                    "database uses {} byte pages, configured {}",
                    header.page_size,
                    partition.page_size()
                )));
            }
        }
        let catalog = Catalog::read(&buffer, &partition)?;
        let tree = |root: PageId| Tree::open(buffer.clone(), partition.clone(), root);

        let mut facts = Vec::with_capacity(6);
        let mut aggregated = Vec::with_capacity(6);
        for order in DataOrder::ALL {
            let slot = order.index() as u8;
            let info = catalog.find(SegmentKind::Facts, slot)?;
            facts.push(FactsSegment::open(tree(info.root), stats_of(info)?));
            let info = catalog.find(SegmentKind::Aggregated, slot)?;
            aggregated.push(Arc::new(AggregatedFactsSegment::open(
                tree(info.root),
                stats_of(info)?,
            )));
        }
        let mut fully_aggregated = Vec::with_capacity(3);
        for slot in 0..3u8 {
            let info = catalog.find(SegmentKind::FullyAggregated, slot)?;
            fully_aggregated.push(Arc::new(FullyAggregatedFactsSegment::open(
                tree(info.root),
                stats_of(info)?,
            )));
        }

        let mut trees = Vec::with_capacity(6);
        for slot in 0..6u8 {
            let info = catalog.find(SegmentKind::ExactStatistics, slot)?;
            trees.push(TreeInfo {
                root: info.root,
                first_leaf: info.root,
                leaves: 0,
                pages: info.pages,
            });
        }
        let globals = &catalog.find(SegmentKind::ExactStatistics, 0)?.values;
        if globals.len() != 10 {
            return Err(TristoreError::Corruption("exact statistics globals"));
        }
        let mut c0 = [0u64; 9];
        c0.copy_from_slice(&globals[..9]);
        let layout = ExactStatisticsLayout {
            trees: [trees[0], trees[1], trees[2], trees[3], trees[4], trees[5]],
            c0,
            total: globals[9],
        };
        let fully = |order: DataOrder| fully_aggregated[order.index() / 2].clone();
        let sources = CardinalitySources {
            subject_predicate: aggregated[DataOrder::Spo.index()].clone(),
            subject_object: aggregated[DataOrder::Sop.index()].clone(),
            predicate_object: aggregated[DataOrder::Pos.index()].clone(),
            subject: fully(DataOrder::Spo),
            predicate: fully(DataOrder::Pso),
            object: fully(DataOrder::Ops),
        };
        let statistics =
            ExactStatisticsSegment::open(buffer.clone(), partition.clone(), &layout, sources);

        let sets = catalog.find(SegmentKind::PredicateSets, 0)?;
        let predicate_sets = PredicateSetSegment::load(&buffer, &partition, sets.root)?;

        info!(
            triples = catalog.triples,
            pages = partition.size(),
            "database.open"
        );
        Ok(Self {
            buffer,
            partition,
            catalog,
            facts,
            aggregated,
            fully_aggregated,
            statistics,
            predicate_sets,
        })
    }

    /// Triples of one order.
    pub fn get_facts(&self, order: DataOrder) -> &FactsSegment {
        &self.facts[order.index()]
    }

    /// `(v1, v2, count)` table of one order.
    pub fn get_aggregated_facts(&self, order: DataOrder) -> &AggregatedFactsSegment {
        &self.aggregated[order.index()]
    }

    /// `(v1, count)` table keyed by the leading component of `order`.
    pub fn get_fully_aggregated_facts(&self, order: DataOrder) -> &FullyAggregatedFactsSegment {
        &self.fully_aggregated[order.index() / 2]
    }

    /// Exact statistics.
    pub fn get_exact_statistics(&self) -> &ExactStatisticsSegment {
        &self.statistics
    }

    /// Characteristic predicate sets.
    pub fn get_predicate_sets(&self) -> &PredicateSetSegment {
        &self.predicate_sets
    }

    /// Number of distinct triples.
    pub fn triples(&self) -> u64 {
        self.catalog.triples
    }

    /// Segment directory.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Buffer manager serving this database.
    pub fn buffer(&self) -> &Arc<BufferManager> {
        &self.buffer
    }

    /// Pages allocated in the partition.
    pub fn pages(&self) -> u64 {
        self.partition.size()
    }
}

impl StatisticsProvider for Database {
    fn cardinality(&self, s: Option<u32>, p: Option<u32>, o: Option<u32>) -> Result<u64> {
        self.statistics.get_cardinality(s, p, o)
    }

    fn join_selectivity(&self, left: [Slot; 3], right: [Slot; 3]) -> Result<f64> {
        self.statistics.get_join_selectivity(left, right)
    }

    fn facts_pages(&self, order: DataOrder) -> u64 {
        self.get_facts(order).pages()
    }

    fn facts_cardinality(&self, order: DataOrder) -> u64 {
        self.get_facts(order).cardinality()
    }

    fn aggregated_pages(&self, order: DataOrder) -> u64 {
        self.get_aggregated_facts(order).pages()
    }

    fn fully_aggregated_pages(&self, order: DataOrder) -> u64 {
        self.get_fully_aggregated_facts(order).pages()
    }
}

/// Bulk loader producing a fresh [`Database`].
#[derive(Clone, Debug, Default)]
pub struct DatabaseBuilder {
    buffer: BufferOptions,
    predicate_sets: PredicateSetOptions,
}

impl DatabaseBuilder {
    /// Builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides buffer manager options.
    pub fn buffer_options(mut self, options: BufferOptions) -> Self {
        self.buffer = options;
        self
    }

    /// Overrides predicate set limits.
    pub fn predicate_set_options(mut self, options: PredicateSetOptions) -> Self {
        self.predicate_sets = options;
        self
    }

    /// Loads `triples` (subject, predicate, object) into a new file at `path`.
    pub fn build(
        &self,
        path: impl AsRef<Path>,
        triples: impl IntoIterator<Item = Triple>,
    ) -> Result<Database> {
        let partition: Arc<dyn Partition> = Arc::new(FilePartition::open(
            path.as_ref(),
            PartitionId(0),
            self.buffer.page_size,
        )?);
        if partition.size() != 0 {
            return Err(TristoreError::Invalid("database file is not empty"));
        }
        let buffer = Arc::new(BufferManager::new(self.buffer.clone(), None)?);
        self.build_into(&buffer, &partition, triples)?;
        Database::open_with(buffer, partition)
    }

    fn build_into(
        &self,
        buffer: &BufferManager,
        partition: &Arc<dyn Partition>,
        triples: impl IntoIterator<Item = Triple>,
    ) -> Result<()> {
        let mut spo: Vec<Triple> = triples.into_iter().collect();
        spo.sort_unstable();
        spo.dedup();

        let catalog_page = partition.grow(1)?;
        debug_assert_eq!(catalog_page, CATALOG_PAGE);
        let mut catalog = Catalog {
            triples: spo.len() as u64,
            segments: Vec::new(),
        };

        for order in DataOrder::ALL {
            let mut rows: Vec<Triple> = spo
                .iter()
                .map(|&(s, p, o)| order.permute(s, p, o))
                .collect();
            rows.sort_unstable();
            let slot = order.index();
            let (tree, stats) = FactsSegment::build(buffer, partition, &rows)?;
            catalog
                .segments
                .push(info_of(SegmentKind::Facts, slot, &tree, &stats));
            let (tree, stats) = AggregatedFactsSegment::build(buffer, partition, &rows)?;
            catalog
                .segments
                .push(info_of(SegmentKind::Aggregated, slot, &tree, &stats));
            if order.leading() == order {
                let (tree, stats) = FullyAggregatedFactsSegment::build(buffer, partition, &rows)?;
                catalog
                    .segments
                    .push(info_of(SegmentKind::FullyAggregated, slot / 2, &tree, &stats));
            }
        }

        let layout = ExactStatisticsSegment::build(buffer, partition, &spo)?;
        for (slot, tree) in layout.trees.iter().enumerate() {
            let values = if slot == 0 {
                layout.c0.iter().copied().chain([layout.total]).collect()
            } else {
                Vec::new()
            };
            catalog.segments.push(SegmentInfo {
                kind: SegmentKind::ExactStatistics,
                slot: slot as u8,
                root: tree.root,
                pages: tree.pages,
                values,
            });
        }

        let sets = PredicateSetSegment::compute(
            aggregated::aggregate(&spo).into_iter().map(Ok),
            &self.predicate_sets,
        )?;
        let (first, pages) = sets.store(buffer, partition)?;
        catalog.segments.push(SegmentInfo {
            kind: SegmentKind::PredicateSets,
            slot: 0,
            root: first,
            pages,
            values: Vec::new(),
        });

        catalog.write(buffer, partition)?;
        buffer.flush_all()?;
        info!(
            triples = catalog.triples,
            pages = partition.size(),
            "database.build"
        );
        Ok(())
    }
}
