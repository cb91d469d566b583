//! Metadata file readers.
//!
//! The file extension selects a [`DatasetFormat`]; each format has its own
//! parser, and all of them funnel records through the same output-path
//! derivation and duplicate handling.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Component, Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{CaptionRecord, DatasetError, DuplicatePolicy};

/// Extension given to every embedding artifact, replacing the media extension.
pub const EMBEDDING_EXTENSION: &str = "safetensors";

/// Supported metadata file layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    /// Comma-separated values with a header row.
    Csv,
    /// A single JSON array of objects.
    Json,
    /// One JSON object per line.
    JsonLines,
}

impl DatasetFormat {
    /// Pick the format from the file extension (case-sensitive).
    pub fn from_path(path: &Path) -> Result<Self, DatasetError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("csv") => Ok(Self::Csv),
            Some("json") => Ok(Self::Json),
            Some("jsonl") => Ok(Self::JsonLines),
            _ => Err(DatasetError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::JsonLines => "jsonl",
        }
    }

    /// Parse `path` with this format's reader.
    pub fn parse(
        self,
        path: &Path,
        caption_key: &str,
        media_key: &str,
        policy: DuplicatePolicy,
    ) -> Result<Vec<CaptionRecord>, DatasetError> {
        let mut records = RecordSet::new(media_key, policy);
        match self {
            Self::Csv => read_csv(path, caption_key, media_key, &mut records)?,
            Self::Json => read_json(path, caption_key, media_key, &mut records)?,
            Self::JsonLines => read_jsonl(path, caption_key, media_key, &mut records)?,
        }
        Ok(records.into_records())
    }
}

impl std::fmt::Display for DatasetFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load every caption in `path`, keyed by derived output path, in file order.
///
/// Fails on the first record that lacks either key; no partial result is returned.
pub fn load_caption_records(
    path: &Path,
    caption_key: &str,
    media_key: &str,
    policy: DuplicatePolicy,
) -> Result<Vec<CaptionRecord>, DatasetError> {
    let format = DatasetFormat::from_path(path)?;
    let records = format.parse(path, caption_key, media_key, policy)?;
    debug!(path = %path.display(), %format, count = records.len(), "caption records loaded");
    Ok(records)
}

/// Map a media path to its artifact path: trim whitespace, normalize, swap the extension.
///
/// `clips/a.mp4`, `./clips/a.mp4` and `clips//a.mp4` all become
/// `clips/a.safetensors`. Fails with a reason for paths containing `..` or
/// with no file name (empty, `.`, `/`).
pub fn derive_output_path(media_path: &str) -> Result<String, &'static str> {
    let mut normalized = PathBuf::new();
    for component in Path::new(media_path.trim()).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => return Err("path must not contain `..`"),
            other => normalized.push(other),
        }
    }
    if normalized.file_name().is_none() {
        return Err("path has no file name");
    }
    Ok(normalized
        .with_extension(EMBEDDING_EXTENSION)
        .to_string_lossy()
        .into_owned())
}

/// Ordered output-path -> caption mapping under construction.
struct RecordSet {
    records: Vec<CaptionRecord>,
    /// output path -> (position in `records`, source record number)
    positions: HashMap<String, (usize, usize)>,
    media_key: String,
    policy: DuplicatePolicy,
    seen: usize,
}

impl RecordSet {
    fn new(media_key: &str, policy: DuplicatePolicy) -> Self {
        Self {
            records: Vec::new(),
            positions: HashMap::new(),
            media_key: media_key.to_string(),
            policy,
            seen: 0,
        }
    }

    fn insert(
        &mut self,
        media_path: &str,
        caption: String,
        record: impl FnOnce() -> String,
    ) -> Result<(), DatasetError> {
        let source_index = self.seen;
        self.seen += 1;

        let output_path = derive_output_path(media_path).map_err(|reason| DatasetError::InvalidField {
            key: self.media_key.clone(),
            record: record(),
            reason: reason.into(),
        })?;

        match self.positions.get(&output_path) {
            Some(&(position, first)) => match self.policy {
                DuplicatePolicy::Warn => {
                    warn!(
                        output_path = %output_path,
                        first,
                        second = source_index,
                        "duplicate output path, keeping the later caption"
                    );
                    self.records[position].prompt = caption;
                }
                DuplicatePolicy::Error => {
                    return Err(DatasetError::DuplicateOutputPath {
                        output_path,
                        first,
                        second: source_index,
                    });
                }
            },
            None => {
                self.positions
                    .insert(output_path.clone(), (self.records.len(), source_index));
                self.records.push(CaptionRecord {
                    output_path,
                    prompt: caption,
                });
            }
        }
        Ok(())
    }

    fn into_records(self) -> Vec<CaptionRecord> {
        self.records
    }
}

fn open(path: &Path) -> Result<File, DatasetError> {
    File::open(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_csv(
    path: &Path,
    caption_key: &str,
    media_key: &str,
    records: &mut RecordSet,
) -> Result<(), DatasetError> {
    // Flexible so a short row surfaces as a missing field rather than a length error.
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(open(path)?);
    let headers = reader.headers()?.clone();

    let column = |key: &str| {
        headers
            .iter()
            .position(|h| h == key)
            .ok_or_else(|| DatasetError::MissingField {
                key: key.to_string(),
                record: format!("CSV header {:?}", headers.iter().collect::<Vec<_>>()),
            })
    };
    let caption_col = column(caption_key)?;
    let media_col = column(media_key)?;

    for (row_no, row) in reader.records().enumerate() {
        let row = row?;
        let describe = || {
            let fields: Map<String, Value> = headers
                .iter()
                .zip(row.iter())
                .map(|(h, v)| (h.to_string(), Value::String(v.to_string())))
                .collect();
            format!("row {}: {}", row_no + 1, Value::Object(fields))
        };

        let caption = row.get(caption_col).ok_or_else(|| DatasetError::MissingField {
            key: caption_key.to_string(),
            record: describe(),
        })?;
        let media = row.get(media_col).ok_or_else(|| DatasetError::MissingField {
            key: media_key.to_string(),
            record: describe(),
        })?;

        records.insert(media, caption.to_string(), describe)?;
    }
    Ok(())
}

fn read_json(
    path: &Path,
    caption_key: &str,
    media_key: &str,
    records: &mut RecordSet,
) -> Result<(), DatasetError> {
    let reader = BufReader::new(open(path)?);
    let data: Value = serde_json::from_reader(reader).map_err(|source| DatasetError::Json {
        path: path.to_path_buf(),
        line: source.line(),
        source,
    })?;

    let Value::Array(entries) = data else {
        return Err(DatasetError::MalformedStructure {
            path: path.to_path_buf(),
            detail: "JSON file must contain a list of objects".into(),
        });
    };

    for (i, entry) in entries.iter().enumerate() {
        let Value::Object(entry) = entry else {
            return Err(DatasetError::MalformedStructure {
                path: path.to_path_buf(),
                detail: format!("entry {i} is not an object: {entry}"),
            });
        };
        let (caption, media) = extract_fields(entry, caption_key, media_key)?;
        records.insert(media, caption.to_string(), || describe_object(entry))?;
    }
    Ok(())
}

fn read_jsonl(
    path: &Path,
    caption_key: &str,
    media_key: &str,
    records: &mut RecordSet,
) -> Result<(), DatasetError> {
    let reader = BufReader::new(open(path)?);
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }

        let entry: Value = serde_json::from_str(&line).map_err(|source| DatasetError::Json {
            path: path.to_path_buf(),
            line: line_no + 1,
            source,
        })?;
        let Value::Object(entry) = entry else {
            return Err(DatasetError::MalformedStructure {
                path: path.to_path_buf(),
                detail: format!("line {} is not a JSON object", line_no + 1),
            });
        };
        let (caption, media) = extract_fields(&entry, caption_key, media_key)?;
        records.insert(media, caption.to_string(), || describe_object(&entry))?;
    }
    Ok(())
}

/// Pull the caption and media path out of a JSON record, caption first.
fn extract_fields<'a>(
    entry: &'a Map<String, Value>,
    caption_key: &str,
    media_key: &str,
) -> Result<(&'a str, &'a str), DatasetError> {
    let field = |key: &str| -> Result<&'a str, DatasetError> {
        let value = entry.get(key).ok_or_else(|| DatasetError::MissingField {
            key: key.to_string(),
            record: describe_object(entry),
        })?;
        value.as_str().ok_or_else(|| DatasetError::InvalidField {
            key: key.to_string(),
            record: describe_object(entry),
            reason: "expected a string".into(),
        })
    };
    Ok((field(caption_key)?, field(media_key)?))
}

fn describe_object(entry: &Map<String, Value>) -> String {
    Value::Object(entry.clone()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension() {
        assert_eq!(DatasetFormat::from_path(Path::new("a/meta.csv")).unwrap(), DatasetFormat::Csv);
        assert_eq!(DatasetFormat::from_path(Path::new("meta.json")).unwrap(), DatasetFormat::Json);
        assert_eq!(
            DatasetFormat::from_path(Path::new("meta.jsonl")).unwrap(),
            DatasetFormat::JsonLines
        );
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        for name in ["meta.txt", "meta", "meta.CSV", "meta.parquet"] {
            let err = DatasetFormat::from_path(Path::new(name)).unwrap_err();
            assert!(
                matches!(err, DatasetError::UnsupportedFormat { .. }),
                "{name} should be unsupported, got {err:?}"
            );
        }
    }

    #[test]
    fn output_path_swaps_extension() {
        assert_eq!(derive_output_path("a/b.mp4").unwrap(), "a/b.safetensors");
        assert_eq!(derive_output_path("  clips/x.mov \n").unwrap(), "clips/x.safetensors");
        assert_eq!(derive_output_path("noext").unwrap(), "noext.safetensors");
        assert_eq!(derive_output_path("a/b.tar.gz").unwrap(), "a/b.tar.safetensors");
    }

    #[test]
    fn output_path_is_normalized() {
        for media in ["a/b.mp4", "./a/b.mp4", "a//b.mp4", "a/./b.mp4", "a/b.mp4/"] {
            assert_eq!(derive_output_path(media).unwrap(), "a/b.safetensors", "{media}");
        }
    }

    #[test]
    fn output_path_requires_file_name() {
        assert_eq!(derive_output_path("").unwrap_err(), "path has no file name");
        assert_eq!(derive_output_path("   ").unwrap_err(), "path has no file name");
        assert_eq!(derive_output_path(".").unwrap_err(), "path has no file name");
        assert_eq!(derive_output_path("/").unwrap_err(), "path has no file name");
    }

    #[test]
    fn output_path_rejects_parent_components() {
        assert!(derive_output_path("..").is_err());
        assert!(derive_output_path("a/../b.mp4").is_err());
        assert!(derive_output_path("../outside.mp4").is_err());
    }

    #[test]
    fn equivalent_paths_collide() {
        let mut set = RecordSet::new("media_path", DuplicatePolicy::Error);
        set.insert("a/b.mp4", "first".into(), String::new).unwrap();
        let err = set.insert("./a//b.mp4", "second".into(), String::new).unwrap_err();
        assert!(matches!(err, DatasetError::DuplicateOutputPath { ref output_path, .. } if output_path == "a/b.safetensors"));
    }

    #[test]
    fn duplicates_keep_first_position_and_last_caption() {
        let mut set = RecordSet::new("media_path", DuplicatePolicy::Warn);
        set.insert("a.mp4", "first".into(), String::new).unwrap();
        set.insert("b.mp4", "other".into(), String::new).unwrap();
        set.insert("a.mov", "second".into(), String::new).unwrap();

        let records = set.into_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].output_path, "a.safetensors");
        assert_eq!(records[0].prompt, "second");
        assert_eq!(records[1].prompt, "other");
    }

    #[test]
    fn duplicates_rejected_under_error_policy() {
        let mut set = RecordSet::new("media_path", DuplicatePolicy::Error);
        set.insert("a.mp4", "first".into(), String::new).unwrap();
        let err = set.insert("a.mov", "second".into(), String::new).unwrap_err();
        match err {
            DatasetError::DuplicateOutputPath {
                output_path,
                first,
                second,
            } => {
                assert_eq!(output_path, "a.safetensors");
                assert_eq!((first, second), (0, 1));
            }
            other => panic!("expected DuplicateOutputPath, got {other:?}"),
        }
    }
}
