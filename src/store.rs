use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::config::StorageConfig;
use crate::models::{CardMetadata, DateTag, PriceHistory, PriceHistoryRow};
use crate::utils::error::{AppError, Result};

const BOM: &[u8] = b"\xEF\xBB\xBF";
const INDEX_COLUMN: &str = "index";
const NAME_COLUMN: &str = "card_name";
const IMAGE_COLUMN: &str = "img_src";
const METADATA_HEADER: [&str; 4] = [INDEX_COLUMN, "rarity", NAME_COLUMN, IMAGE_COLUMN];

/// CSV persistence for the price history and the metadata snapshot.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    price_path: PathBuf,
    metadata_path: PathBuf,
}

/// Exclusive claim on the dataset, released on drop.
#[derive(Debug)]
pub struct DatasetLock {
    path: PathBuf,
    file: File,
}

impl DatasetStore {
    pub fn new(price_path: impl Into<PathBuf>, metadata_path: impl Into<PathBuf>) -> Self {
        Self {
            price_path: price_path.into(),
            metadata_path: metadata_path.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.price_history_path, &config.metadata_path)
    }

    pub fn price_path(&self) -> &Path {
        &self.price_path
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    pub fn lock(&self) -> Result<DatasetLock> {
        let mut lock_path = self.price_path.clone().into_os_string();
        lock_path.push(".lock");
        DatasetLock::acquire(PathBuf::from(lock_path))
    }

    /// Prior price history, or an empty table when none has been saved yet.
    ///
    /// A file that exists but cannot be read is an error rather than an empty
    /// baseline; saving over it would drop every earlier row.
    pub fn load(&self) -> Result<PriceHistory> {
        let Some(content) = read_optional(&self.price_path)? else {
            tracing::info!("{} not found. Starting a new price history", self.price_path.display());
            return Ok(PriceHistory::new());
        };
        if content.is_empty() {
            return Ok(PriceHistory::new());
        }

        let mut reader = csv::ReaderBuilder::new().from_reader(content.as_slice());
        let headers = reader.headers()?.clone();

        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| self.dataset_error(1, format!("missing column '{}'", name)))
        };
        let index_col = column(INDEX_COLUMN)?;
        let name_col = column(NAME_COLUMN)?;
        let image_col = column(IMAGE_COLUMN)?;

        let mut date_cols = Vec::new();
        for (i, header) in headers.iter().enumerate() {
            match DateTag::from_column(header) {
                Some(date) => date_cols.push((i, date)),
                None if [INDEX_COLUMN, NAME_COLUMN, IMAGE_COLUMN].contains(&header) => {}
                None => tracing::warn!("Ignoring unknown column '{}' in {}", header, self.price_path.display()),
            }
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            let field = |i: usize| record.get(i).unwrap_or_default().to_string();

            let mut prices = Vec::with_capacity(date_cols.len());
            for (i, date) in &date_cols {
                let cell = record.get(*i).unwrap_or_default();
                let price = parse_price_cell(cell).ok_or_else(|| {
                    self.dataset_error(line, format!("bad value '{}' in {}", cell, date.column_name()))
                })?;
                prices.push(price);
            }

            rows.push(PriceHistoryRow::new(field(index_col), field(name_col), field(image_col), prices));
        }

        let dates = date_cols.into_iter().map(|(_, date)| date).collect();
        let history = PriceHistory::from_parts(dates, rows).map_err(|message| self.dataset_error(1, message))?;

        tracing::debug!(
            "Loaded {} rows across {} dates from {}",
            history.len(),
            history.dates().len(),
            self.price_path.display()
        );
        Ok(history)
    }

    /// Last saved metadata snapshot; empty when none exists.
    pub fn load_metadata(&self) -> Result<Vec<CardMetadata>> {
        let Some(content) = read_optional(&self.metadata_path)? else {
            return Ok(Vec::new());
        };
        let mut reader = csv::ReaderBuilder::new().from_reader(content.as_slice());
        let records = reader.deserialize().collect::<std::result::Result<Vec<CardMetadata>, _>>()?;
        Ok(records)
    }

    /// Write both artifacts to temporary files next to their targets, then
    /// move them into place. Nothing visible changes unless both were written.
    pub fn save(&self, history: &PriceHistory, metadata: &[CardMetadata]) -> Result<()> {
        let price_file = write_temp(&self.price_path, |w| write_history(w, history))?;
        let metadata_file = write_temp(&self.metadata_path, |w| write_metadata(w, metadata))?;

        // The snapshot goes first: if the history cannot be moved into place,
        // the previous history is still intact.
        metadata_file.persist(&self.metadata_path)?;
        price_file.persist(&self.price_path)?;

        tracing::info!(
            "Updated data saved to {} with {} rows and {} date columns",
            self.price_path.display(),
            history.len(),
            history.dates().len()
        );
        tracing::info!("Base card info saved to {}", self.metadata_path.display());
        Ok(())
    }

    fn dataset_error(&self, line: u64, message: String) -> AppError {
        AppError::Dataset {
            path: self.price_path.display().to_string(),
            line,
            message,
        }
    }
}

impl DatasetLock {
    /// Take an OS advisory lock on `path`. The lock dies with the process, so
    /// a file left behind by a crashed or killed run does not block later runs.
    pub fn acquire(path: PathBuf) -> Result<Self> {
        ensure_parent(&path)?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(AppError::DatasetLocked {
                    path: path.display().to_string(),
                });
            }
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }

        // Holder PID, for whoever finds the run stuck.
        if let Err(e) = file.set_len(0).and_then(|_| writeln!(file, "{}", std::process::id())) {
            tracing::warn!("Failed to record owner in dataset lock {}: {}", path.display(), e);
        }

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DatasetLock {
    fn drop(&mut self) {
        // The file stays in place; removing it would let a waiting run lock an unlinked inode.
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to release dataset lock {}: {}", self.path.display(), e);
        }
    }
}

/// File contents without a leading BOM, or `None` if the file does not exist.
fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(mut bytes) => {
            if bytes.starts_with(BOM) {
                bytes.drain(..BOM.len());
            }
            Ok(Some(bytes))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Empty and NA-style cells are absent; integral floats from older exports are accepted.
fn parse_price_cell(cell: &str) -> Option<Option<u64>> {
    let cell = cell.trim();
    if cell.is_empty() || matches!(cell, "<NA>" | "NaN" | "nan") {
        return Some(None);
    }
    if let Ok(price) = cell.parse::<u64>() {
        return Some(Some(price));
    }
    match cell.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64 => {
            Some(Some(value as u64))
        }
        _ => None,
    }
}

fn ensure_parent(path: &Path) -> Result<PathBuf> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;
    Ok(parent)
}

fn write_temp<F>(target: &Path, write: F) -> Result<NamedTempFile>
where
    F: FnOnce(&mut NamedTempFile) -> Result<()>,
{
    let dir = ensure_parent(target)?;
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(BOM)?;
    write(&mut file)?;
    file.flush()?;
    file.as_file().sync_all()?;
    Ok(file)
}

fn write_history<W: Write>(writer: W, history: &PriceHistory) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header = vec![INDEX_COLUMN.to_string(), NAME_COLUMN.to_string(), IMAGE_COLUMN.to_string()];
    header.extend(history.dates().iter().map(DateTag::column_name));
    wtr.write_record(&header)?;

    for row in history.rows() {
        let mut record = vec![row.position_index.clone(), row.display_name.clone(), row.image_ref.clone()];
        record.extend(
            row.prices()
                .iter()
                .map(|price| price.map(|p| p.to_string()).unwrap_or_default()),
        );
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

fn write_metadata<W: Write>(writer: W, metadata: &[CardMetadata]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(METADATA_HEADER)?;
    for record in metadata {
        wtr.write_record([
            &record.position_index,
            &record.category,
            &record.display_name,
            &record.image_ref,
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
