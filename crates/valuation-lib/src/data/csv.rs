//! CSV listings with a header row

use super::{DataSource, TrainingSet};
use crate::error::DataError;
use crate::models::{LabeledRow, RawPropertyRecord};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

/// Columns every training file must carry; any others are ignored
pub const REQUIRED_COLUMNS: [&str; 9] = [
    "type",
    "sector",
    "net_usable_area",
    "net_area",
    "n_rooms",
    "n_bathroom",
    "latitude",
    "longitude",
    "price",
];

/// Training CSV plus an optional evaluation CSV
#[derive(Debug, Clone)]
pub struct CsvDataSource {
    train_path: PathBuf,
    holdout_path: Option<PathBuf>,
}

impl CsvDataSource {
    pub fn new(train_path: impl Into<PathBuf>) -> Self {
        Self {
            train_path: train_path.into(),
            holdout_path: None,
        }
    }

    pub fn with_holdout(mut self, path: impl Into<PathBuf>) -> Self {
        self.holdout_path = Some(path.into());
        self
    }
}

impl DataSource for CsvDataSource {
    fn load(&self) -> Result<TrainingSet, DataError> {
        let train = read_rows(&self.train_path)?;
        let holdout = self.holdout_path.as_deref().map(read_rows).transpose()?;

        info!(
            path = %self.train_path.display(),
            train_rows = train.len(),
            holdout_rows = holdout.as_ref().map_or(0, Vec::len),
            "Training data loaded"
        );
        Ok(TrainingSet { train, holdout })
    }

    fn describe(&self) -> String {
        match &self.holdout_path {
            Some(holdout) => format!("{} + {}", self.train_path.display(), holdout.display()),
            None => self.train_path.display().to_string(),
        }
    }
}

fn read_rows(path: &Path) -> Result<Vec<LabeledRow>, DataError> {
    let mut reader = ::csv::ReaderBuilder::new()
        .trim(::csv::Trim::All)
        .flexible(false)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;

    let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();
    let mut columns = [0usize; REQUIRED_COLUMNS.len()];
    for (slot, name) in columns.iter_mut().zip(REQUIRED_COLUMNS) {
        *slot = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| DataError::MissingColumn {
                path: path.to_path_buf(),
                column: name,
            })?;
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| csv_error(path, e))?;
        let cell = |i: usize| -> Option<Value> {
            record
                .get(columns[i])
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
        };
        rows.push(LabeledRow {
            record: RawPropertyRecord {
                property_type: cell(0),
                sector: cell(1),
                net_usable_area: cell(2),
                net_area: cell(3),
                n_rooms: cell(4),
                n_bathroom: cell(5),
                latitude: cell(6),
                longitude: cell(7),
            },
            price: cell(8),
        });
    }
    Ok(rows)
}

fn csv_error(path: &Path, source: ::csv::Error) -> DataError {
    let io = match source.kind() {
        ::csv::ErrorKind::Io(io) => Some(std::io::Error::new(io.kind(), io.to_string())),
        _ => None,
    };
    match io {
        Some(source) => DataError::Io {
            path: path.to_path_buf(),
            source,
        },
        None => DataError::Csv {
            path: path.to_path_buf(),
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_reads_rows_and_ignores_extra_columns() {
        let file = write_csv(
            "id,type,sector,net_usable_area,net_area,n_rooms,n_bathroom,latitude,longitude,price\n\
             1,departamento,vitacura,140,170,4,4,-33.40,-70.55,16000\n\
             2,casa, la reina ,101,101,3,2,-33.44,-70.55,12000\n",
        );
        let set = CsvDataSource::new(file.path()).load().unwrap();
        assert_eq!(set.train.len(), 2);
        assert!(set.holdout.is_none());

        let row = &set.train[1];
        assert_eq!(row.record.property_type, Some(Value::from("casa")));
        assert_eq!(row.record.sector, Some(Value::from("la reina")));
        assert_eq!(row.price, Some(Value::from("12000")));
    }

    #[test]
    fn test_empty_cells_become_missing() {
        let file = write_csv(
            "type,sector,net_usable_area,net_area,n_rooms,n_bathroom,latitude,longitude,price\n\
             casa,nunoa,,80,3,2,-33.45,-70.6,9000\n",
        );
        let set = CsvDataSource::new(file.path()).load().unwrap();
        assert!(set.train[0].record.net_usable_area.is_none());
        assert!(set.train[0].record.net_area.is_some());
    }

    #[test]
    fn test_missing_column() {
        let file = write_csv("type,sector,net_area\ncasa,nunoa,80\n");
        let err = CsvDataSource::new(file.path()).load().unwrap_err();
        assert!(matches!(err, DataError::MissingColumn { column: "net_usable_area", .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = CsvDataSource::new("/nonexistent/train.csv").load().unwrap_err();
        assert!(matches!(err, DataError::Io { .. }));
    }

    #[test]
    fn test_holdout_file() {
        let header = "type,sector,net_usable_area,net_area,n_rooms,n_bathroom,latitude,longitude,price\n";
        let train = write_csv(&format!("{header}casa,nunoa,80,80,3,2,-33.45,-70.6,9000\n"));
        let test = write_csv(&format!(
            "{header}casa,nunoa,80,80,3,2,-33.45,-70.6,9000\ncasa,nunoa,90,90,3,2,-33.45,-70.6,9500\n"
        ));
        let source = CsvDataSource::new(train.path()).with_holdout(test.path());
        let set = source.load().unwrap();
        assert_eq!(set.total_rows(), 3);
        assert_eq!(set.holdout.map(|h| h.len()), Some(2));
    }
}
