//! Data collection for simulation runs: structured `tracing` events become
//! rows of column-oriented tables, one table per event target.
//!
//! The collector is a [`tracing_subscriber::Layer`], so it stacks with the
//! usual `fmt` logging layer on a registry. The schema emerges from the
//! recorded events: the first event carrying a field creates its column.
//!
//! # Usage
//!
//! ```ignore
//! // In simulation code:
//! tracing::info!(target: "step", step, deals, average_price);
//!
//! // In the binary or a test:
//! use tracing_subscriber::prelude::*;
//! tracing_subscriber::registry()
//!     .with(instrument::DataFrameLayer::for_targets(["step", "deal"]))
//!     .init();
//! // ... run simulation ...
//! let tables = instrument::drain_to_dataframes();
//! let steps = &tables["step"];
//! ```

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber, info, warn};
use tracing_subscriber::layer::{Context, Layer};

// === Tables ===

/// A column of typed values.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedColumn {
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

impl TypedColumn {
    pub fn len(&self) -> usize {
        match self {
            TypedColumn::U64(v) => v.len(),
            TypedColumn::I64(v) => v.len(),
            TypedColumn::F64(v) => v.len(),
            TypedColumn::Bool(v) => v.len(),
            TypedColumn::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extend with default values until the column holds `rows` values.
    fn pad_to(&mut self, rows: usize) {
        let missing = rows.saturating_sub(self.len());
        if missing == 0 {
            return;
        }
        match self {
            TypedColumn::U64(v) => v.extend(std::iter::repeat_n(0, missing)),
            TypedColumn::I64(v) => v.extend(std::iter::repeat_n(0, missing)),
            TypedColumn::F64(v) => v.extend(std::iter::repeat_n(0.0, missing)),
            TypedColumn::Bool(v) => v.extend(std::iter::repeat_n(false, missing)),
            TypedColumn::Str(v) => v.extend(std::iter::repeat_n(String::new(), missing)),
        }
    }
}

/// A single field value of a recorded event.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    Str(String),
}

impl FieldValue {
    fn new_column(&self, rows: usize) -> TypedColumn {
        let mut column = match self {
            FieldValue::U64(_) => TypedColumn::U64(Vec::with_capacity(rows + 1)),
            FieldValue::I64(_) => TypedColumn::I64(Vec::with_capacity(rows + 1)),
            FieldValue::F64(_) => TypedColumn::F64(Vec::with_capacity(rows + 1)),
            FieldValue::Bool(_) => TypedColumn::Bool(Vec::with_capacity(rows + 1)),
            FieldValue::Str(_) => TypedColumn::Str(Vec::with_capacity(rows + 1)),
        };
        column.pad_to(rows);
        column
    }

    /// Append to a column, converting where the column's type differs from
    /// the value's. Values that cannot be converted are dropped (the row is
    /// padded with the default later).
    fn push_into(self, column: &mut TypedColumn) {
        match (column, self) {
            (TypedColumn::U64(v), FieldValue::U64(x)) => v.push(x),
            (TypedColumn::I64(v), FieldValue::I64(x)) => v.push(x),
            (TypedColumn::I64(v), FieldValue::U64(x)) => v.push(x as i64),
            (TypedColumn::U64(v), FieldValue::I64(x)) if x >= 0 => v.push(x as u64),
            (TypedColumn::F64(v), FieldValue::F64(x)) => v.push(x),
            (TypedColumn::F64(v), FieldValue::U64(x)) => v.push(x as f64),
            (TypedColumn::F64(v), FieldValue::I64(x)) => v.push(x as f64),
            (TypedColumn::Bool(v), FieldValue::Bool(x)) => v.push(x),
            (TypedColumn::Str(v), FieldValue::Str(x)) => v.push(x),
            (TypedColumn::Str(v), other) => v.push(other.to_string()),
            _ => {}
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::U64(x) => write!(f, "{}", x),
            FieldValue::I64(x) => write!(f, "{}", x),
            FieldValue::F64(x) => write!(f, "{}", x),
            FieldValue::Bool(x) => write!(f, "{}", x),
            FieldValue::Str(x) => f.write_str(x),
        }
    }
}

/// A table with dynamically-typed columns, kept in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct DynamicTable {
    pub columns: HashMap<String, TypedColumn>,
    order: Vec<String>,
    pub row_count: usize,
}

impl DynamicTable {
    /// Column names in the order they first appeared.
    pub fn column_names(&self) -> &[String] {
        &self.order
    }

    pub fn column(&self, name: &str) -> Option<&TypedColumn> {
        self.columns.get(name)
    }

    /// Append one row. Columns missing from the row get a default value.
    pub fn push_row(&mut self, fields: Vec<(String, FieldValue)>) {
        let rows = self.row_count;
        for (name, value) in fields {
            if !self.columns.contains_key(&name) {
                self.order.push(name.clone());
                self.columns.insert(name.clone(), value.new_column(rows));
            }
            if let Some(column) = self.columns.get_mut(&name) {
                if column.len() == rows {
                    value.push_into(column);
                }
            }
        }
        self.row_count += 1;
        for column in self.columns.values_mut() {
            column.pad_to(self.row_count);
        }
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::U64(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::I64(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::F64(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

/// Collection of tables, keyed by tracing target.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub tables: HashMap<String, DynamicTable>,
}

impl Recorder {
    pub fn table(&self, name: &str) -> Option<&DynamicTable> {
        self.tables.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

thread_local! {
    static RECORDER: RefCell<Recorder> = RefCell::default();
}

/// Collects the fields of one event, in emission order.
#[derive(Default)]
struct RowVisitor {
    fields: Vec<(String, FieldValue)>,
}

impl RowVisitor {
    fn push(&mut self, field: &Field, value: FieldValue) {
        self.fields.push((field.name().to_string(), value));
    }
}

impl Visit for RowVisitor {
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, FieldValue::U64(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, FieldValue::I64(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, FieldValue::F64(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, FieldValue::Bool(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, FieldValue::Str(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.push(field, FieldValue::Str(format!("{:?}", value)));
    }
}

// === Layer ===

/// Tracing layer that appends info-level events to the thread-local
/// [`Recorder`], one table per event target.
///
/// Filtering happens in `on_event` rather than `enabled`, so events this
/// layer ignores still reach the other layers of the subscriber.
#[derive(Debug, Clone, Default)]
pub struct DataFrameLayer {
    /// `None` records every target.
    targets: Option<HashSet<String>>,
}

impl DataFrameLayer {
    /// Record every info-level event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record only events with one of these targets.
    pub fn for_targets<I, T>(targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            targets: Some(targets.into_iter().map(Into::into).collect()),
        }
    }

    pub fn records(&self, target: &str) -> bool {
        self.targets.as_ref().is_none_or(|t| t.contains(target))
    }
}

impl<S: Subscriber> Layer<S> for DataFrameLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > Level::INFO || !self.records(metadata.target()) {
            return;
        }

        let mut visitor = RowVisitor::default();
        event.record(&mut visitor);

        RECORDER.with(|r| {
            r.borrow_mut()
                .tables
                .entry(metadata.target().to_string())
                .or_default()
                .push_row(visitor.fields);
        });
    }
}

/// Take all recorded data from this thread's recorder.
pub fn drain() -> Recorder {
    RECORDER.with(|r| std::mem::take(&mut *r.borrow_mut()))
}

/// Discard all recorded data on this thread.
pub fn clear() {
    RECORDER.with(|r| *r.borrow_mut() = Recorder::default());
}

// === Polars Integration ===

use polars::prelude::*;

impl DynamicTable {
    /// Convert this table to a polars DataFrame, columns in first-seen order.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let columns = self
            .order
            .iter()
            .filter_map(|name| self.columns.get(name).map(|col| (name, col)))
            .map(|(name, col)| match col {
                TypedColumn::U64(v) => Column::new(name.as_str().into(), v),
                TypedColumn::I64(v) => Column::new(name.as_str().into(), v),
                TypedColumn::F64(v) => Column::new(name.as_str().into(), v),
                TypedColumn::Bool(v) => Column::new(name.as_str().into(), v),
                TypedColumn::Str(v) => Column::new(name.as_str().into(), v),
            })
            .collect::<Vec<Column>>();
        DataFrame::new(columns)
    }
}

impl Recorder {
    /// Convert every table to a DataFrame. Tables that fail to convert are
    /// logged and left out.
    pub fn to_dataframes(&self) -> HashMap<String, DataFrame> {
        self.tables
            .iter()
            .filter_map(|(name, table)| match table.to_dataframe() {
                Ok(df) => Some((name.clone(), df)),
                Err(e) => {
                    warn!(target: "instrument", table = %name, error = %e, "dropping table");
                    None
                }
            })
            .collect()
    }
}

/// Drain this thread's recorder and convert to DataFrames, keyed by table name.
pub fn drain_to_dataframes() -> HashMap<String, DataFrame> {
    drain().to_dataframes()
}

fn io_error(e: std::io::Error) -> PolarsError {
    PolarsError::IO {
        error: e.into(),
        msg: None,
    }
}

/// Write each DataFrame to `{dir}/{name}.parquet`.
pub fn save_parquet(dfs: &mut HashMap<String, DataFrame>, dir: &Path) -> PolarsResult<()> {
    std::fs::create_dir_all(dir).map_err(io_error)?;
    for (name, df) in dfs.iter_mut() {
        let file = std::fs::File::create(dir.join(format!("{}.parquet", name))).map_err(io_error)?;
        ParquetWriter::new(file).finish(df)?;
    }
    Ok(())
}

/// Write each DataFrame to `{dir}/{name}.csv`, with a header row.
pub fn save_csv(dfs: &mut HashMap<String, DataFrame>, dir: &Path) -> PolarsResult<()> {
    std::fs::create_dir_all(dir).map_err(io_error)?;
    for (name, df) in dfs.iter_mut() {
        let mut file = std::fs::File::create(dir.join(format!("{}.csv", name))).map_err(io_error)?;
        CsvWriter::new(&mut file).include_header(true).finish(df)?;
    }
    Ok(())
}

// === Scoped runs ===

/// Civil date (year, month, day) from days since the unix epoch.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}

/// `YYYYMMDD_HHMMSS` in UTC, for run directory names.
fn timestamp_str(t: std::time::SystemTime) -> String {
    let secs = t
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let (year, month, day) = civil_from_days(secs.div_euclid(86_400));
    let of_day = secs.rem_euclid(86_400);
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}",
        year,
        month,
        day,
        of_day / 3600,
        (of_day % 3600) / 60,
        of_day % 60
    )
}

/// Keep alphanumerics, `-` and `_`; everything else becomes `_`. At most 60 chars.
fn sanitize(name: &str) -> String {
    name.chars()
        .take(60)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// RAII guard for one recorded run.
///
/// Clears this thread's recorder on creation. On drop, writes every table as
/// parquet into a timestamped directory `{parent}/{timestamp}_{name}/`,
/// followed by an empty `_ready` sentinel once all files are complete.
/// Call [`ScopedRecorder::get`] to inspect the tables before that.
///
/// The guard only collects; a [`DataFrameLayer`] must be installed for
/// events to be recorded.
pub struct ScopedRecorder {
    run_dir: PathBuf,
    run_name: String,
    dfs: Option<HashMap<String, DataFrame>>,
}

impl ScopedRecorder {
    pub fn new(parent: impl Into<PathBuf>, name: &str) -> Self {
        let run_name = format!("{}_{}", timestamp_str(std::time::SystemTime::now()), sanitize(name));
        let run_dir = parent.into().join(&run_name);
        clear();
        Self {
            run_dir,
            run_name,
            dfs: None,
        }
    }

    /// Drain recorded data on first call; later calls return the same tables.
    pub fn get(&mut self) -> &HashMap<String, DataFrame> {
        self.dfs.get_or_insert_with(drain_to_dataframes)
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

impl Drop for ScopedRecorder {
    fn drop(&mut self) {
        let mut dfs = self.dfs.take().unwrap_or_else(drain_to_dataframes);
        if dfs.is_empty() {
            return;
        }
        if let Err(e) = save_parquet(&mut dfs, &self.run_dir) {
            warn!(target: "instrument", run = %self.run_name, error = %e, "failed to write parquet");
            return;
        }
        match std::fs::File::create(self.run_dir.join("_ready")) {
            Ok(_) => info!(
                target: "instrument",
                tables = dfs.len(),
                dir = %self.run_dir.display(),
                "recorded run written"
            ),
            Err(e) => warn!(target: "instrument", run = %self.run_name, error = %e, "failed to write _ready sentinel"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::subscriber::with_default;
    use tracing_subscriber::prelude::*;

    fn recording<F: FnOnce()>(layer: DataFrameLayer, f: F) -> Recorder {
        clear();
        with_default(tracing_subscriber::registry().with(layer), f);
        drain()
    }

    #[test]
    fn test_rows_are_padded() {
        let mut table = DynamicTable::default();
        table.push_row(vec![("step".into(), 1u64.into()), ("price".into(), 10.0.into())]);
        table.push_row(vec![("step".into(), 2u64.into()), ("deals".into(), 5u64.into())]);

        assert_eq!(table.row_count, 2);
        assert_eq!(table.column_names(), ["step", "price", "deals"]);
        assert_eq!(table.column("price"), Some(&TypedColumn::F64(vec![10.0, 0.0])));
        assert_eq!(table.column("deals"), Some(&TypedColumn::U64(vec![0, 5])));
    }

    #[test]
    fn test_mismatched_types_convert() {
        let mut table = DynamicTable::default();
        table.push_row(vec![("value".into(), 1.5.into())]);
        table.push_row(vec![("value".into(), 3u64.into())]);
        table.push_row(vec![("value".into(), true.into())]);
        assert_eq!(table.column("value"), Some(&TypedColumn::F64(vec![1.5, 3.0, 0.0])));
    }

    #[test]
    fn test_layer_records_by_target() {
        let recorder = recording(DataFrameLayer::new(), || {
            tracing::info!(target: "step", step = 1u64, average_price = 10.5f64, name = "Centrum");
            tracing::info!(target: "step", step = 2u64, average_price = 20.5f64);
            tracing::info!(target: "deal", step = 2u64, price = 99.0f64);
            tracing::debug!(target: "step", step = 3u64);
        });

        let steps = recorder.table("step").unwrap();
        assert_eq!(steps.row_count, 2, "debug events are not recorded");
        assert_eq!(steps.column("step"), Some(&TypedColumn::U64(vec![1, 2])));
        assert_eq!(
            steps.column("name"),
            Some(&TypedColumn::Str(vec!["Centrum".to_string(), String::new()]))
        );
        assert_eq!(recorder.table("deal").unwrap().row_count, 1);
    }

    #[test]
    fn test_layer_target_filter() {
        let recorder = recording(DataFrameLayer::for_targets(["step"]), || {
            tracing::info!(target: "step", step = 1u64);
            tracing::info!(target: "borough", step = 1u64);
            tracing::info!("plain log line");
        });
        assert_eq!(recorder.tables.len(), 1);
        assert!(recorder.table("step").is_some());
    }

    #[test]
    fn test_to_dataframe_keeps_column_order() {
        let recorder = recording(DataFrameLayer::new(), || {
            tracing::info!(target: "borough", step = 1u64, name = "West", moves = 3u64, pressure = -0.5f64);
        });
        let df = recorder.table("borough").unwrap().to_dataframe().unwrap();
        let names: Vec<&str> = df.get_column_names().into_iter().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["step", "name", "moves", "pressure"]);
        assert_eq!(df.height(), 1);
    }

    #[test]
    fn test_timestamp_format() {
        let t = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_709_210_096);
        // 2024-02-29 12:34:56 UTC
        assert_eq!(timestamp_str(t), "20240229_123456");
        assert_eq!(timestamp_str(std::time::UNIX_EPOCH), "19700101_000000");
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("run 1/growth=0.02"), "run_1_growth_0_02");
        assert_eq!(sanitize(&"x".repeat(100)).len(), 60);
    }

    #[test]
    fn test_scoped_recorder_writes_parquet() {
        let parent = std::env::temp_dir().join(format!("instrument-test-{}", std::process::id()));
        let run_dir = with_default(tracing_subscriber::registry().with(DataFrameLayer::new()), || {
            let mut rec = ScopedRecorder::new(&parent, "scoped");
            tracing::info!(target: "step", step = 1u64, deals = 2u64);
            assert_eq!(rec.get()["step"].height(), 1);
            rec.run_dir().to_path_buf()
        });
        assert!(run_dir.join("step.parquet").exists());
        assert!(run_dir.join("_ready").exists());
        let _ = std::fs::remove_dir_all(&parent);
    }
}
