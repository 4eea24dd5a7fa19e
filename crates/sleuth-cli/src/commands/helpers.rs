// Input plumbing shared by the command handlers.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use miette::{IntoDiagnostic, WrapErr};

use sleuth_trace::metadata::Metadata;
use sleuth_trace::reader::JsonLinesReader;

/// Open the event log at `path`, or stdin for `-`.
pub(crate) fn open_trace(path: &Path) -> miette::Result<JsonLinesReader<Box<dyn BufRead>>> {
    let input: Box<dyn BufRead> = if path == Path::new("-") {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = File::open(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("cannot open trace {}", path.display()))?;
        Box::new(BufReader::new(file))
    };
    Ok(JsonLinesReader::new(input))
}

/// Load the metadata document, or start from empty metadata.
pub(crate) fn load_metadata(path: Option<&Path>) -> miette::Result<Metadata> {
    let Some(path) = path else {
        return Ok(Metadata::new());
    };
    let source = std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("cannot read metadata {}", path.display()))?;
    Metadata::from_json_str(&source)
        .into_diagnostic()
        .wrap_err_with(|| format!("invalid metadata in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sleuth_trace::event::{LocationId, ThreadId};
    use std::io::Write;

    #[test]
    fn missing_metadata_path_gives_empty_metadata() {
        let meta = load_metadata(None).expect("empty metadata");
        assert_eq!(meta, Metadata::new());
    }

    #[test]
    fn metadata_file_is_parsed() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{"locations": {{"4": "Queue.put:31"}}, "threads": {{"2": "producer"}}}}"#
        )
        .expect("write metadata");
        let meta = load_metadata(Some(file.path())).expect("valid metadata");
        assert_eq!(meta.location_signature(LocationId(4)), "Queue.put:31");
        assert_eq!(meta.thread_name(ThreadId(2)), "producer");
    }

    #[test]
    fn malformed_metadata_is_reported() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "not json").expect("write metadata");
        let err = load_metadata(Some(file.path())).expect_err("must fail");
        assert!(err.to_string().contains("invalid metadata"));
    }

    #[test]
    fn missing_trace_file_is_reported() {
        let err = open_trace(Path::new("/nonexistent/trace.jsonl"))
            .err()
            .expect("must fail");
        assert!(err.to_string().contains("cannot open trace"));
    }
}
