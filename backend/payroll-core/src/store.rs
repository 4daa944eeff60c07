// src/store.rs
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::cells::{coerce_string, CellValue};

pub type Grid = Vec<Vec<CellValue>>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Table not found: {0}")]
    TableNotFound(String),
    #[error("Table already exists: {0}")]
    TableExists(String),
    #[error("Workbook I/O error ({context}): {source}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
    #[error("Workbook JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),
}

// --- Storage Port ---

/// Named, ordered, rectangular tables. Rows and columns are 0-based.
pub trait TableStore {
    /// Table names in presentation order.
    fn table_names(&self) -> Vec<String>;

    fn has_table(&self, name: &str) -> bool {
        self.table_names().iter().any(|n| n == name)
    }

    /// Appends a new, empty table.
    fn create_table(&mut self, name: &str) -> Result<(), StoreError>;
    fn rename_table(&mut self, from: &str, to: &str) -> Result<(), StoreError>;

    /// Every populated row, padded to the widest row.
    fn read_all(&self, name: &str) -> Result<Grid, StoreError>;
    /// Count of rows up to and including the last non-blank row.
    fn last_row(&self, name: &str) -> Result<usize, StoreError>;

    /// Removes all content and cell formatting.
    fn clear(&mut self, name: &str) -> Result<(), StoreError>;
    fn clear_range(
        &mut self,
        name: &str,
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    ) -> Result<(), StoreError>;
    fn write_range(&mut self, name: &str, row: usize, col: usize, values: &[Vec<CellValue>]) -> Result<(), StoreError>;

    fn set_frozen_rows(&mut self, name: &str, rows: usize) -> Result<(), StoreError>;
    fn set_row_bold(&mut self, name: &str, row: usize) -> Result<(), StoreError>;
    fn set_column_width(&mut self, name: &str, col: usize, width: u32) -> Result<(), StoreError>;
    fn set_number_format(
        &mut self,
        name: &str,
        col: usize,
        first_row: usize,
        row_count: usize,
        pattern: &str,
    ) -> Result<(), StoreError>;

    /// Moves a table to `position`, clamped to the end.
    fn move_table(&mut self, name: &str, position: usize) -> Result<(), StoreError>;
}

// --- In-Memory Workbook ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberFormat {
    pub first_row: usize,
    pub row_count: usize,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub rows: Grid,
    #[serde(default)]
    pub frozen_rows: usize,
    #[serde(default)]
    pub bold_rows: BTreeSet<usize>,
    #[serde(default)]
    pub column_widths: BTreeMap<usize, u32>,
    #[serde(default)]
    pub number_formats: BTreeMap<usize, NumberFormat>,
}

impl Table {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn trim_trailing_blank_rows(&mut self) {
        while self
            .rows
            .last()
            .is_some_and(|row| row.iter().all(CellValue::is_blank))
        {
            self.rows.pop();
        }
    }
}

/// A workbook held in memory. Serializes to a JSON document of ordered tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Workbook {
    #[serde(default)]
    pub tables: Vec<Table>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, StoreError> {
        self.tables
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
    }

    fn position(&self, name: &str) -> Result<usize, StoreError> {
        self.tables
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
    }
}

impl TableStore for Workbook {
    fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    fn has_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    fn create_table(&mut self, name: &str) -> Result<(), StoreError> {
        if self.has_table(name) {
            return Err(StoreError::TableExists(name.to_string()));
        }
        debug!("Creating table '{}'", name);
        self.tables.push(Table::new(name));
        Ok(())
    }

    fn rename_table(&mut self, from: &str, to: &str) -> Result<(), StoreError> {
        if self.has_table(to) {
            return Err(StoreError::TableExists(to.to_string()));
        }
        self.table_mut(from)?.name = to.to_string();
        Ok(())
    }

    fn read_all(&self, name: &str) -> Result<Grid, StoreError> {
        let table = self
            .table(name)
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))?;
        let width = table.rows.iter().map(Vec::len).max().unwrap_or(0);
        Ok(table
            .rows
            .iter()
            .map(|row| {
                let mut padded = row.clone();
                padded.resize(width, CellValue::Empty);
                padded
            })
            .collect())
    }

    fn last_row(&self, name: &str) -> Result<usize, StoreError> {
        let table = self
            .table(name)
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))?;
        Ok(table
            .rows
            .iter()
            .rposition(|row| !row.iter().all(CellValue::is_blank))
            .map_or(0, |i| i + 1))
    }

    fn clear(&mut self, name: &str) -> Result<(), StoreError> {
        let table = self.table_mut(name)?;
        table.rows.clear();
        table.bold_rows.clear();
        table.number_formats.clear();
        Ok(())
    }

    fn clear_range(
        &mut self,
        name: &str,
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    ) -> Result<(), StoreError> {
        let table = self.table_mut(name)?;
        for r in table.rows.iter_mut().skip(row).take(rows) {
            for c in r.iter_mut().skip(col).take(cols) {
                *c = CellValue::Empty;
            }
        }
        table.trim_trailing_blank_rows();
        Ok(())
    }

    fn write_range(&mut self, name: &str, row: usize, col: usize, values: &[Vec<CellValue>]) -> Result<(), StoreError> {
        let table = self.table_mut(name)?;
        for (offset, source) in values.iter().enumerate() {
            let r = row + offset;
            if table.rows.len() <= r {
                table.rows.resize(r + 1, Vec::new());
            }
            let target = &mut table.rows[r];
            if target.len() < col + source.len() {
                target.resize(col + source.len(), CellValue::Empty);
            }
            for (c, value) in source.iter().enumerate() {
                target[col + c] = value.clone();
            }
        }
        table.trim_trailing_blank_rows();
        Ok(())
    }

    fn set_frozen_rows(&mut self, name: &str, rows: usize) -> Result<(), StoreError> {
        self.table_mut(name)?.frozen_rows = rows;
        Ok(())
    }

    fn set_row_bold(&mut self, name: &str, row: usize) -> Result<(), StoreError> {
        self.table_mut(name)?.bold_rows.insert(row);
        Ok(())
    }

    fn set_column_width(&mut self, name: &str, col: usize, width: u32) -> Result<(), StoreError> {
        self.table_mut(name)?.column_widths.insert(col, width);
        Ok(())
    }

    fn set_number_format(
        &mut self,
        name: &str,
        col: usize,
        first_row: usize,
        row_count: usize,
        pattern: &str,
    ) -> Result<(), StoreError> {
        self.table_mut(name)?.number_formats.insert(
            col,
            NumberFormat {
                first_row,
                row_count,
                pattern: pattern.to_string(),
            },
        );
        Ok(())
    }

    fn move_table(&mut self, name: &str, position: usize) -> Result<(), StoreError> {
        let from = self.position(name)?;
        let table = self.tables.remove(from);
        let to = position.min(self.tables.len());
        self.tables.insert(to, table);
        Ok(())
    }
}

// --- File-Backed Workbook ---

/// A [`Workbook`] persisted as pretty-printed JSON.
#[derive(Debug)]
pub struct WorkbookFile {
    path: PathBuf,
    workbook: Workbook,
}

impl WorkbookFile {
    /// Loads the workbook at `path`, or starts an empty one if the file is absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let workbook = if path.exists() {
            let json = fs::read_to_string(&path).map_err(|source| StoreError::Io {
                source,
                context: format!("reading {}", path.display()),
            })?;
            let workbook: Workbook = serde_json::from_str(&json)?;
            info!(
                "Workbook loaded from {} ({} tables)",
                path.display(),
                workbook.tables.len()
            );
            workbook
        } else {
            info!("Workbook file {} not found. Starting empty.", path.display());
            Workbook::new()
        };
        Ok(Self { path, workbook })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn workbook(&self) -> &Workbook {
        &self.workbook
    }

    pub fn workbook_mut(&mut self) -> &mut Workbook {
        &mut self.workbook
    }

    pub fn save(&self) -> Result<(), StoreError> {
        write_workbook_json(&self.path, &self.to_json()?)
    }

    /// The document `save` writes.
    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(&self.workbook)?)
    }
}

/// Blocking write of a serialized workbook.
pub fn write_workbook_json(path: &Path, json: &str) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        source,
        context: format!("writing {}", path.display()),
    };
    let mut file = File::create(path).map_err(io_err)?;
    file.write_all(json.as_bytes()).map_err(io_err)?;
    debug!("Workbook saved to {}", path.display());
    Ok(())
}

// --- CSV Export ---

/// Writes a table's cells as CSV, one record per row.
pub fn export_csv<S: TableStore + ?Sized, W: Write>(store: &S, table: &str, writer: W) -> Result<usize, StoreError> {
    let grid = store.read_all(table)?;
    let mut csv_writer = csv::WriterBuilder::new().flexible(true).from_writer(writer);
    for row in &grid {
        csv_writer.write_record(row.iter().map(coerce_string))?;
    }
    csv_writer.flush().map_err(|source| StoreError::Io {
        source,
        context: format!("flushing CSV for {}", table),
    })?;
    Ok(grid.len())
}
