use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, Trim};

use crate::{Dataset, Result, TabularError};

/// Parse a headered CSV file. The dataset name defaults to the file name.
pub fn read_csv(path: impl AsRef<Path>, name: Option<&str>) -> Result<Dataset> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| TabularError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let name = name.map(str::to_string).unwrap_or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset".to_string())
    });
    read_csv_from(file, name)
}

/// Parse headered CSV from any reader.
pub fn read_csv_from<R: Read>(reader: R, name: impl Into<String>) -> Result<Dataset> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();

    let mut records = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        // Blank lines come through as a single empty field.
        if rec.len() == 1 && rec.get(0).map(str::is_empty).unwrap_or(false) && headers.len() > 1 {
            continue;
        }
        records.push(rec.iter().map(str::to_string).collect());
    }

    Dataset::from_records(name, headers, records)
}
