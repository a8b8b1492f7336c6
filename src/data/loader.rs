use crate::data::error::DataError;
use crate::types::readings_frame::{ReadingsFrame, ReadingsSchema};
use log::{info, warn};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use tokio::{fs, task};

/// Reads one or more CSV exports of the monitoring network and merges them into
/// a single [`ReadingsFrame`].
///
/// Every file must carry a header row with the columns named by the
/// [`ReadingsSchema`]. Extra columns are dropped and the kept columns are cast
/// to canonical types so that files whose station ids happen to parse as
/// integers still concatenate.
pub struct ReadingsLoader {
    schema: ReadingsSchema,
}

impl Default for ReadingsLoader {
    fn default() -> Self {
        Self::new(ReadingsSchema::default())
    }
}

impl ReadingsLoader {
    pub fn new(schema: ReadingsSchema) -> ReadingsLoader {
        ReadingsLoader { schema }
    }

    /// Loads and concatenates all `paths` in the given order.
    pub async fn load_csv_files(&self, paths: &[PathBuf]) -> Result<ReadingsFrame, DataError> {
        if paths.is_empty() {
            return Err(DataError::NoFiles);
        }

        let mut frames = Vec::with_capacity(paths.len());
        for path in paths {
            let df = self.read_csv(path).await?;
            info!("Loaded {} readings from {:?}", df.height(), path);
            frames.push(self.normalise(df.lazy()));
        }

        let merged = concat(frames, UnionArgs::default())?;
        Ok(ReadingsFrame::with_schema(merged, self.schema.clone()))
    }

    /// Parses a single CSV file on the blocking pool.
    async fn read_csv(&self, path: &Path) -> Result<DataFrame, DataError> {
        fs::metadata(path)
            .await
            .map_err(|e| DataError::CsvReadIo(path.to_path_buf(), e))?;

        let path_buf = path.to_path_buf();
        task::spawn_blocking(move || {
            let df = CsvReadOptions::default()
                .with_has_header(true)
                .try_into_reader_with_file_path(Some(path_buf.clone()))
                .map_err(|e| DataError::CsvReadPolars(path_buf.clone(), e))?
                .finish()
                .map_err(|e| DataError::CsvReadPolars(path_buf.clone(), e))?;
            if df.height() == 0 {
                warn!("CSV file {:?} contains no rows", path_buf);
            }
            Ok::<DataFrame, DataError>(df)
        })
        .await?
    }

    fn normalise(&self, frame: LazyFrame) -> LazyFrame {
        let s = &self.schema;
        frame.select([
            col(s.station_id.as_str()).cast(DataType::String),
            col(s.date.as_str()).cast(DataType::String),
            col(s.ozone.as_str()).cast(DataType::Float64),
            col(s.longitude.as_str()).cast(DataType::Float64),
            col(s.latitude.as_str()).cast(DataType::Float64),
        ])
    }
}
