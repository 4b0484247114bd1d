use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::PipelineError;
use crate::record::{EnrichedRecord, RawRecord};

pub const DEFAULT_DATA_DIR: &str = "data";
const RAW_FILE: &str = "raw_output.json";
const ENRICHED_FILE: &str = "output.json";
const CACHE_FILE: &str = "geocode_cache.json";

/// Locations of the three files handed between stages.
#[derive(Debug, Clone)]
pub struct DataFiles {
    pub raw: PathBuf,
    pub enriched: PathBuf,
    pub cache: PathBuf,
}

impl DataFiles {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            raw: dir.join(RAW_FILE),
            enriched: dir.join(ENRICHED_FILE),
            cache: dir.join(CACHE_FILE),
        }
    }
}

/// Serialize `value` as pretty JSON, replacing `path` in one rename.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    {
        let mut out = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut out, value)?;
        out.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PipelineError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

pub fn save_raw(path: &Path, records: &[RawRecord]) -> Result<(), PipelineError> {
    write_json(path, records)
}

/// Load the crawl output. A missing file means the crawl never ran.
pub fn load_raw(path: &Path) -> Result<Vec<RawRecord>, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    read_json(path)
}

pub fn save_enriched(path: &Path, records: &[EnrichedRecord]) -> Result<(), PipelineError> {
    write_json(path, records)
}

pub fn load_enriched(path: &Path) -> Result<Vec<EnrichedRecord>, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    read_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(contractor: &str) -> RawRecord {
        RawRecord {
            contractor: contractor.into(),
            street: "1 MAIN ST".into(),
            city: "ALBANY".into(),
            zip: "12207".into(),
            ..Default::default()
        }
    }

    #[test]
    fn raw_round_trip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let files = DataFiles::in_dir(dir.path().join("nested"));

        save_raw(&files.raw, &[record("A"), record("B")]).unwrap();
        save_raw(&files.raw, &[record("C")]).unwrap();

        let back = load_raw(&files.raw).unwrap();
        assert_eq!(back, vec![record("C")]);
        assert!(!files.raw.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_raw_is_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let files = DataFiles::in_dir(dir.path());
        let err = load_raw(&files.raw).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput { .. }));
    }

    #[test]
    fn raw_file_is_a_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let files = DataFiles::in_dir(dir.path());
        save_raw(&files.raw, &[record("A")]).unwrap();
        let value: serde_json::Value = read_json(&files.raw).unwrap();
        assert_eq!(value[0]["contractor"], "A");
        assert_eq!(value[0]["zip"], "12207");
    }
}
