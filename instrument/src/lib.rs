//! Run recording for allocation simulations.
//!
//! A `tracing` subscriber turns every event at INFO or more severe into a row
//! of a table named after the event's target. Columns appear in the order
//! fields are first seen; rows that lack a field get a zero value.
//!
//! # Usage
//!
//! ```ignore
//! // In allocation code:
//! tracing::info!(target: "build", year, parcel_id, units_added, source);
//!
//! // In a test or binary:
//! let mut rec = instrument::RunRecorder::new("data/runs", "baseline", 50, 2018..=2050);
//! // ... run simulation ...
//! let builds = &rec.take()?["build"];
//! rec.persist()?; // writes data/runs/baseline_seed50_2018-2050/*.parquet
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use polars::prelude::*;
pub use polars;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Metadata, Subscriber};

// === COLUMNS ===

/// Values of one recorded field.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

/// A single field value as seen by the visitor.
#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    Str(String),
}

impl FieldValue {
    fn to_text(&self) -> String {
        match self {
            FieldValue::U64(v) => v.to_string(),
            FieldValue::I64(v) => v.to_string(),
            FieldValue::F64(v) => v.to_string(),
            FieldValue::Bool(v) => v.to_string(),
            FieldValue::Str(v) => v.clone(),
        }
    }
}

impl ColumnData {
    fn empty_like(value: &FieldValue, rows: usize) -> Self {
        match value {
            FieldValue::U64(_) => ColumnData::U64(vec![0; rows]),
            FieldValue::I64(_) => ColumnData::I64(vec![0; rows]),
            FieldValue::F64(_) => ColumnData::F64(vec![0.0; rows]),
            FieldValue::Bool(_) => ColumnData::Bool(vec![false; rows]),
            FieldValue::Str(_) => ColumnData::Str(vec![String::new(); rows]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::U64(v) => v.len(),
            ColumnData::I64(v) => v.len(),
            ColumnData::F64(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match self {
            ColumnData::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<&[u64]> {
        match self {
            ColumnData::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&[String]> {
        match self {
            ColumnData::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Push `value`, coercing it to the column's type.
    ///
    /// Integers widen into signed and float columns; anything goes into a
    /// string column. Values that cannot be coerced push the zero value.
    fn push(&mut self, value: FieldValue) {
        match (self, value) {
            (ColumnData::U64(v), FieldValue::U64(x)) => v.push(x),
            (ColumnData::U64(v), FieldValue::I64(x)) => v.push(u64::try_from(x).unwrap_or(0)),
            (ColumnData::U64(v), _) => v.push(0),
            (ColumnData::I64(v), FieldValue::I64(x)) => v.push(x),
            (ColumnData::I64(v), FieldValue::U64(x)) => v.push(i64::try_from(x).unwrap_or(i64::MAX)),
            (ColumnData::I64(v), _) => v.push(0),
            (ColumnData::F64(v), FieldValue::F64(x)) => v.push(x),
            (ColumnData::F64(v), FieldValue::I64(x)) => v.push(x as f64),
            (ColumnData::F64(v), FieldValue::U64(x)) => v.push(x as f64),
            (ColumnData::F64(v), _) => v.push(0.0),
            (ColumnData::Bool(v), FieldValue::Bool(x)) => v.push(x),
            (ColumnData::Bool(v), _) => v.push(false),
            (ColumnData::Str(v), value) => v.push(value.to_text()),
        }
    }

    fn pad_to(&mut self, rows: usize) {
        let missing = rows.saturating_sub(self.len());
        if missing == 0 {
            return;
        }
        match self {
            ColumnData::U64(v) => v.extend(std::iter::repeat_n(0, missing)),
            ColumnData::I64(v) => v.extend(std::iter::repeat_n(0, missing)),
            ColumnData::F64(v) => v.extend(std::iter::repeat_n(0.0, missing)),
            ColumnData::Bool(v) => v.extend(std::iter::repeat_n(false, missing)),
            ColumnData::Str(v) => v.extend(std::iter::repeat_n(String::new(), missing)),
        }
    }
}

// === TABLES ===

/// Rows recorded under one tracing target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTable {
    names: Vec<String>,
    columns: Vec<ColumnData>,
    rows: usize,
}

impl EventTable {
    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// Column names in first-seen order.
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| &self.columns[idx])
    }

    fn push_row(&mut self, fields: Vec<(&'static str, FieldValue)>) {
        for (name, value) in fields {
            let idx = match self.names.iter().position(|n| n == name) {
                Some(idx) => idx,
                None => {
                    self.names.push(name.to_string());
                    self.columns.push(ColumnData::empty_like(&value, self.rows));
                    self.columns.len() - 1
                }
            };
            // A field repeated within one event keeps its first value.
            if self.columns[idx].len() == self.rows {
                self.columns[idx].push(value);
            }
        }
        self.rows += 1;
        for col in &mut self.columns {
            col.pad_to(self.rows);
        }
    }

    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let columns: Vec<Column> = self
            .names
            .iter()
            .zip(&self.columns)
            .map(|(name, col)| match col {
                ColumnData::U64(v) => Column::new(name.into(), v),
                ColumnData::I64(v) => Column::new(name.into(), v),
                ColumnData::F64(v) => Column::new(name.into(), v),
                ColumnData::Bool(v) => Column::new(name.into(), v),
                ColumnData::Str(v) => Column::new(name.into(), v),
            })
            .collect();
        DataFrame::new(columns)
    }
}

/// Every table recorded on this thread, keyed by target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tables {
    pub tables: BTreeMap<String, EventTable>,
}

impl Tables {
    pub fn get(&self, target: &str) -> Option<&EventTable> {
        self.tables.get(target)
    }

    pub fn to_dataframes(&self) -> PolarsResult<BTreeMap<String, DataFrame>> {
        self.tables
            .iter()
            .map(|(name, table)| Ok((name.clone(), table.to_dataframe()?)))
            .collect()
    }
}

thread_local! {
    static TABLES: RefCell<Tables> = RefCell::default();
}

// === SUBSCRIBER ===

#[derive(Default)]
struct RowVisitor {
    fields: Vec<(&'static str, FieldValue)>,
}

impl Visit for RowVisitor {
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.push((field.name(), FieldValue::U64(value)));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.push((field.name(), FieldValue::I64(value)));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.push((field.name(), FieldValue::F64(value)));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.push((field.name(), FieldValue::Bool(value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.push((field.name(), FieldValue::Str(value.to_string())));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.fields.push((field.name(), FieldValue::Str(format!("{value:?}"))));
    }
}

/// Collects INFO-and-above events into per-target tables. Spans are ignored.
pub struct TableSubscriber;

impl Subscriber for TableSubscriber {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event() && *metadata.level() <= tracing::Level::INFO
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let mut visitor = RowVisitor::default();
        event.record(&mut visitor);
        let level = event.metadata().level().as_str();
        visitor.fields.push(("level", FieldValue::Str(level.to_string())));

        let target = event.metadata().target().to_string();
        TABLES.with(|t| {
            t.borrow_mut()
                .tables
                .entry(target)
                .or_default()
                .push_row(visitor.fields);
        });
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

/// Install `TableSubscriber` as the global default. Later calls are no-ops.
pub fn install_subscriber() {
    let _ = tracing::subscriber::set_global_default(TableSubscriber);
}

/// Take every table recorded on this thread, leaving it empty.
pub fn drain() -> Tables {
    TABLES.with(|t| std::mem::take(&mut *t.borrow_mut()))
}

pub fn clear() {
    TABLES.with(|t| *t.borrow_mut() = Tables::default());
}

// === PERSISTENCE ===

fn io_error(e: std::io::Error) -> PolarsError {
    PolarsError::IO {
        error: e.into(),
        msg: None,
    }
}

/// Write each frame as `{dir}/{name}.parquet`.
pub fn save_parquet(dfs: &mut BTreeMap<String, DataFrame>, dir: &Path) -> PolarsResult<()> {
    std::fs::create_dir_all(dir).map_err(io_error)?;
    for (name, df) in dfs.iter_mut() {
        let file = std::fs::File::create(dir.join(format!("{name}.parquet"))).map_err(io_error)?;
        ParquetWriter::new(file).finish(df)?;
    }
    Ok(())
}

/// Directory-safe version of a scenario name.
fn sanitize(name: &str) -> String {
    let s: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(60)
        .collect();
    if s.is_empty() { "run".to_string() } else { s }
}

/// Records one simulation run and writes it only when asked.
///
/// Creating a recorder clears this thread's tables and installs the
/// subscriber. Nothing touches the filesystem until `persist`.
pub struct RunRecorder {
    run_dir: PathBuf,
    run_name: String,
    dfs: Option<BTreeMap<String, DataFrame>>,
}

impl RunRecorder {
    /// Runs land in `{parent}/{scenario}_seed{seed}_{start}-{end}/`.
    pub fn new(
        parent: impl Into<PathBuf>,
        scenario: &str,
        seed: u64,
        years: RangeInclusive<u32>,
    ) -> Self {
        let run_name = format!(
            "{}_seed{}_{}-{}",
            sanitize(scenario),
            seed,
            years.start(),
            years.end()
        );
        let run_dir = parent.into().join(&run_name);
        clear();
        install_subscriber();
        Self {
            run_dir,
            run_name,
            dfs: None,
        }
    }

    /// Drain recorded tables into DataFrames. Later calls return the same frames.
    pub fn take(&mut self) -> PolarsResult<&BTreeMap<String, DataFrame>> {
        if self.dfs.is_none() {
            self.dfs = Some(drain().to_dataframes()?);
        }
        Ok(self.dfs.get_or_insert_with(BTreeMap::new))
    }

    /// Write every table plus a `_ready` marker. Returns the run directory.
    pub fn persist(&mut self) -> PolarsResult<&Path> {
        self.take()?;
        let dfs = self.dfs.get_or_insert_with(BTreeMap::new);
        save_parquet(dfs, &self.run_dir)?;
        std::fs::File::create(self.run_dir.join("_ready")).map_err(io_error)?;
        Ok(&self.run_dir)
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}
