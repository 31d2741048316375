//! The preparation pipeline and its memo.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crime_fr_models::{EnrichedRecord, derive_department, rate_per_mille};
use crime_fr_source::cache::SourceCache;
use crime_fr_source::communes::{CommuneTable, load_commune_file};
use crime_fr_source::config::DashboardConfig;
use crime_fr_source::crime::{CrimeTable, load_crime_file, resolve_crime_source};
use crime_fr_source::population::{PopulationTable, load_population_file};

use crate::query::PrepareQuery;
use crate::views::{FilterOptions, filter_options};
use crate::{PipelineError, ensure_renderable};

/// A prepared table, shared read-only between the memo and callers.
pub type PreparedTable = Arc<[EnrichedRecord]>;

/// The three loaded source tables.
#[derive(Debug, Clone)]
pub struct Sources {
    /// Crime events.
    pub crime: Arc<CrimeTable>,
    /// Commune reference.
    pub communes: Arc<CommuneTable>,
    /// Population.
    pub population: Arc<PopulationTable>,
}

impl Sources {
    /// Returns `true` if both hold the very same loaded tables.
    #[must_use]
    pub fn same_tables(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.crime, &other.crime)
            && Arc::ptr_eq(&self.communes, &other.communes)
            && Arc::ptr_eq(&self.population, &other.population)
    }
}

struct MemoEntry {
    sources: Sources,
    rows: PreparedTable,
}

/// Owns the configuration, the source cache, and the memo of prepared
/// tables.
pub struct Pipeline {
    config: DashboardConfig,
    cache: SourceCache,
    memo: Mutex<HashMap<PrepareQuery, MemoEntry>>,
    computations: AtomicUsize,
}

impl Pipeline {
    /// Creates a pipeline with empty caches.
    #[must_use]
    pub fn new(config: DashboardConfig) -> Self {
        Self {
            config,
            cache: SourceCache::new(),
            memo: Mutex::new(HashMap::new()),
            computations: AtomicUsize::new(0),
        }
    }

    /// The configuration this pipeline reads from.
    #[must_use]
    pub const fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// The source table cache.
    #[must_use]
    pub const fn cache(&self) -> &SourceCache {
        &self.cache
    }

    /// Number of times a prepared table was actually computed (memo
    /// misses).
    #[must_use]
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }

    /// Loads (or fetches from cache) the three source tables.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Source`] if any table is missing or
    /// malformed.
    pub fn sources(&self) -> Result<Sources, PipelineError> {
        let crime_path = resolve_crime_source(&self.config.crime_candidates())?;
        let crime = self.cache.crime.get_or_load(&crime_path, load_crime_file)?;

        let communes = self
            .cache
            .communes
            .get_or_load(&self.config.communes_path(), load_commune_file)?;

        let population_config = &self.config.population;
        let population = self
            .cache
            .population
            .get_or_load(&self.config.population_path(), |path| {
                load_population_file(
                    path,
                    population_config.format,
                    population_config.extrapolate_until,
                )
            })?;

        Ok(Sources {
            crime,
            communes,
            population,
        })
    }

    /// Produces the enriched table for `query`.
    ///
    /// Identical (normalized) queries over unchanged source tables return
    /// the memoized table. An empty table is a valid result.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Source`] if a source table cannot be
    /// loaded.
    pub fn prepare(&self, query: &PrepareQuery) -> Result<PreparedTable, PipelineError> {
        let query = query.clone().normalized();
        let sources = self.sources()?;

        {
            let memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = memo.get(&query)
                && entry.sources.same_tables(&sources)
            {
                log::trace!("memo hit: {query:?}");
                return Ok(Arc::clone(&entry.rows));
            }
        }

        let rows: PreparedTable = enrich(&sources, &query).into();
        self.computations.fetch_add(1, Ordering::Relaxed);
        log::debug!("prepared {} rows for {query:?}", rows.len());

        let capacity = self.config.pipeline.memo_capacity;
        if capacity > 0 {
            let mut memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries built on replaced tables can never hit again and pin
            // the old tables in memory.
            memo.retain(|_, entry| entry.sources.same_tables(&sources));
            if memo.len() >= capacity && !memo.contains_key(&query) {
                memo.clear();
            }
            memo.insert(
                query,
                MemoEntry {
                    sources,
                    rows: Arc::clone(&rows),
                },
            );
        }

        Ok(rows)
    }

    /// Like [`Self::prepare`], but refuses tables above the configured row
    /// ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::TooManyRows`] above the ceiling, or any
    /// error from [`Self::prepare`].
    pub fn prepare_renderable(&self, query: &PrepareQuery) -> Result<PreparedTable, PipelineError> {
        let rows = self.prepare(query)?;
        ensure_renderable(rows.len(), self.config.pipeline.max_rows)?;
        Ok(rows)
    }

    /// Choices offered by the dashboard's filter controls.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Source`] if a source table cannot be
    /// loaded.
    pub fn filter_options(&self) -> Result<FilterOptions, PipelineError> {
        Ok(filter_options(&self.sources()?))
    }

    /// Commune names containing `term`, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Source`] if the commune reference cannot be
    /// loaded.
    pub fn search_communes(&self, term: &str) -> Result<Vec<String>, PipelineError> {
        let communes = self
            .cache
            .communes
            .get_or_load(&self.config.communes_path(), load_commune_file)?;
        Ok(communes
            .search(term)
            .into_iter()
            .map(str::to_owned)
            .collect())
    }

    /// Drops every cached source table and prepared result.
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Joins, filters, and derives the enriched table from loaded sources.
///
/// Steps run in a fixed order: commune name join, department derivation,
/// year filter, commune filter, department filter, population join, rate.
/// `query` is used as given; callers normally pass a
/// [`PrepareQuery::normalized`] value.
#[must_use]
pub fn enrich(sources: &Sources, query: &PrepareQuery) -> Vec<EnrichedRecord> {
    let year = query.year_filter();
    let mut departments: HashMap<&str, Option<&str>> = HashMap::new();

    sources
        .crime
        .records
        .iter()
        .map(|record| (record, sources.communes.name_of(&record.commune_code)))
        .map(|(record, name)| {
            let code = record.commune_code.as_str();
            let department = *departments
                .entry(code)
                .or_insert_with(|| derive_department(code));
            (record, name, department)
        })
        .filter(|(record, ..)| year.is_none_or(|y| record.year == Some(y)))
        .filter(|(_, name, _)| {
            query
                .communes
                .as_ref()
                .is_none_or(|wanted| name.is_some_and(|n| wanted.contains(n)))
        })
        .filter(|(.., department)| {
            query
                .department
                .as_deref()
                .is_none_or(|wanted| *department == Some(wanted))
        })
        .map(|(record, name, department)| {
            let population = record
                .year
                .and_then(|y| sources.population.lookup(&record.commune_code, y));
            let inhabitants = population.and_then(|p| p.population);

            EnrichedRecord {
                commune_code: record.commune_code.clone(),
                commune_name: name.map(str::to_owned),
                department: department.map(str::to_owned),
                year: record.year,
                indicator: record.indicator.clone(),
                count: record.count,
                source_rate_per_mille: record.rate_per_mille,
                population: inhabitants,
                population_origin: population.map(|p| p.origin),
                rate_per_mille: rate_per_mille(record.count, inhabitants),
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};

    use crime_fr_models::{CommuneRef, CrimeRecord, PopulationOrigin, PopulationRecord};
    use crime_fr_source::SourceError;
    use crime_fr_source::parsing::CoercionReport;
    use crime_fr_source::population::PopulationFormat;

    use super::*;

    fn crime(code: &str, year: i32, indicator: &str, count: f64) -> CrimeRecord {
        CrimeRecord {
            commune_code: code.to_owned(),
            year: Some(year),
            indicator: indicator.to_owned(),
            count: Some(count),
            rate_per_mille: None,
        }
    }

    fn commune(code: &str, name: &str) -> CommuneRef {
        CommuneRef {
            commune_code: code.to_owned(),
            commune_name: name.to_owned(),
        }
    }

    fn population(code: &str, year: i32, value: f64) -> PopulationRecord {
        PopulationRecord {
            commune_code: code.to_owned(),
            year,
            population: Some(value),
            origin: PopulationOrigin::Measured,
        }
    }

    fn sources(
        crime: Vec<CrimeRecord>,
        communes: Vec<CommuneRef>,
        population: Vec<PopulationRecord>,
    ) -> Sources {
        Sources {
            crime: Arc::new(CrimeTable {
                path: PathBuf::from("crime.csv"),
                records: crime,
                report: CoercionReport::default(),
            }),
            communes: Arc::new(CommuneTable::from_records(communes)),
            population: Arc::new(PopulationTable::from_records(population)),
        }
    }

    #[test]
    fn missing_population_gives_null_rate_not_a_dropped_row() {
        let sources = sources(
            vec![
                crime("75056", 2023, "Vols", 2100.0),
                crime("97411", 2023, "Vols", 30.0),
            ],
            vec![commune("75056", "Paris"), commune("97411", "Saint-Denis")],
            vec![
                population("75056", 2023, 2_100_000.0),
                population("97411", 2022, 150_000.0),
            ],
        );

        let rows = enrich(&sources, &PrepareQuery::for_year(2023));

        assert_eq!(rows.len(), 2);
        let paris = rows.iter().find(|r| r.commune_code == "75056").unwrap();
        let reunion = rows.iter().find(|r| r.commune_code == "97411").unwrap();

        assert_eq!(paris.department.as_deref(), Some("75"));
        assert!((paris.rate_per_mille.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(paris.population_origin, Some(PopulationOrigin::Measured));

        assert_eq!(reunion.department.as_deref(), Some("974"));
        assert_eq!(reunion.commune_name.as_deref(), Some("Saint-Denis"));
        assert_eq!(reunion.population, None);
        assert_eq!(reunion.population_origin, None);
        assert_eq!(reunion.rate_per_mille, None);
    }

    #[test]
    fn unknown_commune_name_filter_is_empty_not_an_error() {
        let sources = sources(
            vec![crime("75056", 2023, "Vols", 10.0)],
            vec![commune("75056", "Paris")],
            vec![],
        );
        let rows = enrich(
            &sources,
            &PrepareQuery::for_year(2023).with_communes(["Lyon"]),
        );
        assert!(rows.is_empty());
    }

    #[test]
    fn commune_filter_matches_names_exactly() {
        let sources = sources(
            vec![
                crime("75056", 2023, "Vols", 10.0),
                crime("13055", 2023, "Vols", 5.0),
            ],
            vec![commune("75056", "Paris"), commune("13055", "Marseille")],
            vec![],
        );
        let rows = enrich(
            &sources,
            &PrepareQuery::for_year(2023).with_communes(["paris"]),
        );
        assert!(rows.is_empty());

        let rows = enrich(
            &sources,
            &PrepareQuery::for_year(2023).with_communes(["Paris"]),
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].commune_code, "75056");
    }

    #[test]
    fn unnamed_crime_rows_survive_the_reference_join() {
        let sources = sources(vec![crime("99999", 2023, "Vols", 1.0)], vec![], vec![]);
        let rows = enrich(&sources, &PrepareQuery::for_year(2023));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].commune_name, None);
        assert_eq!(rows[0].department.as_deref(), Some("99"));
    }

    #[test]
    fn department_filter_uses_derived_codes() {
        let sources = sources(
            vec![
                crime("2A004", 2023, "Vols", 15.0),
                crime("20004", 2023, "Vols", 1.0),
                crime("97411", 2023, "Vols", 30.0),
                crime("97100", 2023, "Vols", 3.0),
            ],
            vec![],
            vec![],
        );

        let corsica = enrich(
            &sources,
            &PrepareQuery::for_year(2023).with_department("2A").normalized(),
        );
        assert_eq!(corsica.len(), 1);
        assert_eq!(corsica[0].commune_code, "2A004");

        let reunion = enrich(
            &sources,
            &PrepareQuery::for_year(2023).with_department("974"),
        );
        assert_eq!(reunion.len(), 1);
        assert_eq!(reunion[0].commune_code, "97411");

        let prefix_only = enrich(&sources, &PrepareQuery::for_year(2023).with_department("97"));
        assert!(prefix_only.is_empty());
    }

    #[test]
    fn year_filter_skips_rows_with_unparsed_year_unless_all_years() {
        let mut undated = crime("75056", 2023, "Vols", 1.0);
        undated.year = None;
        let sources = sources(
            vec![
                crime("75056", 2022, "Vols", 1.0),
                crime("75056", 2023, "Vols", 1.0),
                undated,
            ],
            vec![],
            vec![],
        );

        assert_eq!(enrich(&sources, &PrepareQuery::for_year(2023)).len(), 1);
        assert_eq!(enrich(&sources, &PrepareQuery::all_years()).len(), 3);
    }

    #[test]
    fn zero_and_negative_population_give_null_rate() {
        let sources = sources(
            vec![
                crime("75056", 2023, "Vols", 10.0),
                crime("69123", 2023, "Vols", 10.0),
            ],
            vec![],
            vec![
                population("75056", 2023, 0.0),
                population("69123", 2023, -5.0),
            ],
        );
        let rows = enrich(&sources, &PrepareQuery::for_year(2023));
        assert!(rows.iter().all(|r| r.rate_per_mille.is_none()));
        assert!(rows.iter().all(|r| r.population.is_some()));
    }

    /// On-disk fixture shared with the view and export tests.
    pub(crate) struct Fixture {
        pub dir: PathBuf,
        pub config: DashboardConfig,
    }

    pub(crate) const CRIME_FIXTURE: &str = "\
CODGEO_2025;annee;indicateur;nombre
75056;2023;Vols;2100
97411;2023;Vols;30
75056;2023;Cambriolages;420
2A004;2023;Vols;15
69123;2023;Cambriolages;abc
75056;2022;Vols;1900
97411;2022;Cambriolages;12
";

    pub(crate) const COMMUNES_FIXTURE: &str = "\
COM,LIBELLE
75056,Paris
97411,Saint-Denis
2A004,Ajaccio
";

    pub(crate) const POPULATION_FIXTURE: &str = "\
codgeo,annee,Population
75056,2023,2100000
75056,2022,2150000
97411,2022,150000
2A004,2023,75000
";

    pub(crate) const WIDE_POPULATION_FIXTURE: &str = "\
codgeo,libgeo,p21_pop,p22_pop
75056,Paris,2133111,2113705
97411,Saint-Denis,153810,155367
";

    impl Fixture {
        pub(crate) fn new() -> Self {
            let dir = std::env::temp_dir()
                .join(format!("crime_fr_pipeline_{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&dir).unwrap();
            write_gzip(&dir.join("crime.csv.gz"), CRIME_FIXTURE);
            std::fs::write(dir.join("communes.csv"), COMMUNES_FIXTURE).unwrap();
            std::fs::write(dir.join("population.csv"), POPULATION_FIXTURE).unwrap();

            let mut config = DashboardConfig::embedded().unwrap();
            config.data_dir.clone_from(&dir);
            config.crime.candidates = vec!["missing.csv.gz".to_owned(), "crime.csv.gz".to_owned()];
            config.communes.file = "communes.csv".to_owned();
            config.population.file = "population.csv".to_owned();

            Self { dir, config }
        }

        /// Same crime and commune files, with a wide population file
        /// measured through 2022 and carried forward to 2023.
        pub(crate) fn with_wide_population() -> Self {
            let mut fixture = Self::new();
            std::fs::write(fixture.dir.join("population_wide.csv"), WIDE_POPULATION_FIXTURE)
                .unwrap();
            fixture.config.population.file = "population_wide.csv".to_owned();
            fixture.config.population.format = PopulationFormat::Wide;
            fixture.config.population.extrapolate_until = Some(2023);
            fixture
        }

        pub(crate) fn pipeline(&self) -> Pipeline {
            Pipeline::new(self.config.clone())
        }
    }

    fn write_gzip(path: &Path, contents: &str) {
        use std::io::Write as _;

        let file = std::fs::File::create(path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(contents.as_bytes()).unwrap();
        encoder.finish().unwrap();
    }

    #[test]
    fn prepare_is_idempotent_and_memoized() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline();
        let query = PrepareQuery::for_year(2023);

        let first = pipeline.prepare(&query).unwrap();
        let second = pipeline.prepare(&query).unwrap();

        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pipeline.computations(), 1);
        assert_eq!(pipeline.cache().loads(), 3);
    }

    #[test]
    fn sources_are_loaded_once_across_queries() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline();

        pipeline.prepare(&PrepareQuery::for_year(2023)).unwrap();
        pipeline.prepare(&PrepareQuery::all_years()).unwrap();
        pipeline.filter_options().unwrap();

        assert_eq!(pipeline.cache().crime.loads(), 1);
        assert_eq!(pipeline.cache().loads(), 3);
        assert_eq!(pipeline.computations(), 2);
    }

    #[test]
    fn yearly_totals_round_trip_against_raw_records() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline();

        let rows = pipeline.prepare(&PrepareQuery::for_year(2023)).unwrap();
        let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
        for row in rows.iter() {
            *totals.entry(row.indicator.as_str()).or_default() += row.count.unwrap_or(0.0);
        }

        // Vols: 2100 + 30 + 15; Cambriolages: 420 (Lyon's count is unparseable).
        let expected = BTreeMap::from([("Cambriolages", 420.0), ("Vols", 2145.0)]);
        assert_eq!(totals, expected);
        assert_eq!(rows.len(), 5);
    }

    #[test]
    fn lyon_filter_on_disk_is_empty() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline();
        let rows = pipeline
            .prepare(&PrepareQuery::for_year(2023).with_communes(["Lyon"]))
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn missing_crime_source_names_every_candidate() {
        let fixture = Fixture::new();
        std::fs::remove_file(fixture.dir.join("crime.csv.gz")).unwrap();
        let pipeline = fixture.pipeline();

        match pipeline.prepare(&PrepareQuery::for_year(2023)) {
            Err(PipelineError::Source(SourceError::MissingSource { candidates })) => {
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("expected MissingSource, got {other:?}"),
        }
    }

    #[test]
    fn row_ceiling_is_enforced() {
        let fixture = Fixture::new();
        let mut config = fixture.config.clone();
        config.pipeline.max_rows = 2;
        let pipeline = Pipeline::new(config);

        assert!(matches!(
            pipeline.prepare_renderable(&PrepareQuery::for_year(2023)),
            Err(PipelineError::TooManyRows { rows: 5, max: 2 })
        ));
        assert!(
            pipeline
                .prepare_renderable(&PrepareQuery::for_year(2023).with_communes(["Ajaccio"]))
                .is_ok()
        );
    }

    #[test]
    fn clear_cache_forces_reload_and_recompute() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline();
        let query = PrepareQuery::for_year(2022);

        pipeline.prepare(&query).unwrap();
        pipeline.clear_cache();
        pipeline.prepare(&query).unwrap();

        assert_eq!(pipeline.cache().crime.loads(), 2);
        assert_eq!(pipeline.computations(), 2);
    }

    #[test]
    fn replaced_source_file_releases_the_old_table() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline();

        pipeline.prepare(&PrepareQuery::for_year(2023)).unwrap();
        pipeline.prepare(&PrepareQuery::for_year(2022)).unwrap();
        let old_crime = Arc::downgrade(&pipeline.sources().unwrap().crime);

        let path = fixture.dir.join("crime.csv.gz");
        write_gzip(&path, CRIME_FIXTURE);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(3600))
            .unwrap();

        pipeline.prepare(&PrepareQuery::for_year(2023)).unwrap();

        assert_eq!(pipeline.cache().crime.loads(), 2);
        assert!(old_crime.upgrade().is_none());
        assert_eq!(pipeline.computations(), 3);
    }

    #[test]
    fn wide_population_past_last_measured_year_is_flagged_extrapolated() {
        let fixture = Fixture::with_wide_population();
        let pipeline = fixture.pipeline();

        let rows = pipeline.prepare(&PrepareQuery::all_years()).unwrap();
        let origin_of = |code: &str, year: i32| {
            rows.iter()
                .find(|r| r.commune_code == code && r.year == Some(year))
                .and_then(|r| r.population_origin)
        };

        assert_eq!(origin_of("75056", 2022), Some(PopulationOrigin::Measured));
        assert_eq!(origin_of("75056", 2023), Some(PopulationOrigin::Extrapolated));
        assert_eq!(origin_of("97411", 2023), Some(PopulationOrigin::Extrapolated));
        assert_eq!(origin_of("2A004", 2023), None);

        let paris = rows
            .iter()
            .find(|r| r.commune_code == "75056" && r.year == Some(2023) && r.indicator == "Vols")
            .unwrap();
        assert_eq!(paris.population, Some(2_113_705.0));
        assert!((paris.rate_per_mille.unwrap() - 2100.0 / 2113.705).abs() < 1e-9);
    }

    #[test]
    fn search_uses_the_reference_table() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline();
        assert_eq!(pipeline.search_communes("SAINT").unwrap(), vec!["Saint-Denis"]);
        assert!(pipeline.search_communes("lyon").unwrap().is_empty());
    }
}
