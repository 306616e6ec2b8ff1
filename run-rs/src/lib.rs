//! Run environment for the outbreak model.
//!
//! A run is described by a single document, either JSON on stdin or a TOML
//! file on disk, with three sections:
//!
//! ```toml
//! [input]          # model parameters, plus `seed` and `replicate`
//! seed = 42
//!
//! [model.files]    # named input tables
//! reports = "data/reports.csv"
//!
//! [output]         # `spec = "filesystem"` with a `dir`, anything else is stdout
//! spec = "filesystem"
//! dir = "out"
//! ```
mod error;

pub use error::{RunError, RunResult};

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Where output tables end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Directory(PathBuf),
    Stdout,
}

pub struct RunContext<P = ()> {
    input_json: serde_json::Map<String, Value>,
    pub params: Option<P>,
    pub seed: u64,
    pub replicate: u64,
    pub files: HashMap<String, PathBuf>,
    destination: Destination,
}

impl RunContext {
    /// Decodes a run document. Relative file paths are resolved against
    /// `base_dir` when one is given.
    pub fn from_document(data: Value, base_dir: Option<&Path>) -> Self {
        let mut input_json = data
            .get("input")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let seed = input_json
            .remove("seed")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let replicate = input_json
            .remove("replicate")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let files = data
            .get("model")
            .and_then(|m| m.get("files"))
            .and_then(|f| f.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(name, v)| {
                        let path = PathBuf::from(v.as_str()?);
                        let path = match base_dir {
                            Some(base) if path.is_relative() => base.join(path),
                            _ => path,
                        };
                        Some((name.clone(), path))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let destination = resolve_destination(data.get("output").unwrap_or(&Value::Null));

        Self {
            input_json,
            params: None,
            seed,
            replicate,
            files,
            destination,
        }
    }

    pub fn from_json_str(raw: &str) -> RunResult<Self> {
        if raw.trim().is_empty() {
            return Err(RunError::EmptyInput);
        }
        let data: Value = serde_json::from_str(raw)?;
        Ok(Self::from_document(data, None))
    }

    pub fn from_stdin() -> RunResult<Self> {
        let mut raw = String::new();
        io::stdin().read_to_string(&mut raw)?;
        Self::from_json_str(&raw)
    }

    pub fn from_toml_str(raw: &str, base_dir: Option<&Path>) -> RunResult<Self> {
        let doc: toml::Value = toml::from_str(raw)?;
        let data = serde_json::to_value(doc)?;
        Ok(Self::from_document(data, base_dir))
    }

    pub fn from_toml_path(path: &Path) -> RunResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| RunError::io(path, e))?;
        Self::from_toml_str(&raw, path.parent())
    }

    /// Attaches the typed model parameters decoded from the `input` section.
    pub fn with_params<P: DeserializeOwned>(self) -> RunResult<RunContext<P>> {
        let params = serde_json::from_value(Value::Object(self.input_json.clone()))
            .map_err(|e| RunError::MissingInput(e.to_string()))?;
        Ok(RunContext {
            input_json: self.input_json,
            params: Some(params),
            seed: self.seed,
            replicate: self.replicate,
            files: self.files,
            destination: self.destination,
        })
    }
}

fn resolve_destination(output: &Value) -> Destination {
    let filesystem_dir = |section: &Value| {
        if section.get("spec").and_then(|v| v.as_str()) == Some("filesystem") {
            section.get("dir").and_then(|v| v.as_str()).map(PathBuf::from)
        } else {
            None
        }
    };

    if output.get("spec").is_some() {
        return filesystem_dir(output).map_or(Destination::Stdout, Destination::Directory);
    }

    // Profiled output: prefer the `default` profile, else the first one.
    output
        .get("profile")
        .and_then(|v| v.as_object())
        .and_then(|profiles| profiles.get("default").or_else(|| profiles.values().next()))
        .and_then(filesystem_dir)
        .map_or(Destination::Stdout, Destination::Directory)
}

impl<P> RunContext<P> {
    pub fn input_json(&self) -> &serde_json::Map<String, Value> {
        &self.input_json
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn output_dir(&self) -> Option<&Path> {
        match &self.destination {
            Destination::Directory(dir) => Some(dir),
            Destination::Stdout => None,
        }
    }

    pub fn file(&self, name: &str) -> RunResult<&Path> {
        self.files
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| RunError::MissingFile(name.to_string()))
    }

    /// Decodes every row of the named CSV input.
    pub fn read_csv<T: DeserializeOwned>(&self, name: &str) -> RunResult<Vec<T>> {
        let path = self.file(name)?;
        let mut reader = csv::Reader::from_path(path)?;
        let rows = reader.deserialize().collect::<Result<Vec<T>, _>>()?;
        debug!("read {} rows from {}", rows.len(), path.display());
        Ok(rows)
    }

    /// Hex-encoded SHA-256 of the named input file.
    pub fn fingerprint(&self, name: &str) -> RunResult<String> {
        let path = self.file(name)?;
        let bytes = fs::read(path).map_err(|e| RunError::io(path, e))?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    fn sink(&self, filename: &str) -> RunResult<Box<dyn Write>> {
        match &self.destination {
            Destination::Directory(dir) => {
                fs::create_dir_all(dir).map_err(|e| RunError::io(dir, e))?;
                let path = dir.join(filename);
                let file = fs::File::create(&path).map_err(|e| RunError::io(&path, e))?;
                Ok(Box::new(io::BufWriter::new(file)))
            }
            Destination::Stdout => Ok(Box::new(io::stdout())),
        }
    }

    pub fn write(&self, filename: &str, data: &[u8]) -> RunResult<()> {
        let mut sink = self.sink(filename)?;
        sink.write_all(data)?;
        sink.flush()?;
        Ok(())
    }

    /// Writes typed rows as a CSV table; the header comes from the row's
    /// field names.
    pub fn write_csv<S: Serialize>(&self, filename: &str, rows: &[S]) -> RunResult<()> {
        let mut wtr = csv::Writer::from_writer(self.sink(filename)?);
        for row in rows {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        debug!("wrote {} rows to {}", rows.len(), filename);
        Ok(())
    }

    /// Writes an untyped table, for outputs whose columns are only known at
    /// run time.
    pub fn write_table(
        &self,
        filename: &str,
        headers: &[String],
        rows: &[Vec<String>],
    ) -> RunResult<()> {
        let mut wtr = csv::Writer::from_writer(self.sink(filename)?);
        wtr.write_record(headers)?;
        for row in rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_json<S: Serialize>(&self, filename: &str, value: &S) -> RunResult<()> {
        let mut data = serde_json::to_vec_pretty(value)?;
        data.push(b'\n');
        self.write(filename, &data)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_from_document_basic() {
        let data = json!({
            "input": {
                "seed": 42,
                "replicate": 1,
                "window": 7
            },
            "model": {
                "files": {
                    "reports": "/tmp/reports.csv"
                }
            },
            "output": {
                "spec": "filesystem",
                "dir": "/tmp/output"
            }
        });
        let ctx = RunContext::from_document(data, None);
        assert_eq!(ctx.seed, 42);
        assert_eq!(ctx.replicate, 1);
        assert_eq!(ctx.input_json().get("window").unwrap().as_u64(), Some(7));
        assert!(!ctx.input_json().contains_key("seed"));
        assert!(!ctx.input_json().contains_key("replicate"));
        assert_eq!(
            ctx.file("reports").unwrap(),
            Path::new("/tmp/reports.csv")
        );
        assert_eq!(ctx.output_dir(), Some(Path::new("/tmp/output")));
    }

    #[test]
    fn test_with_params() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Params {
            mean_si: f64,
        }
        let ctx = RunContext::from_json_str(r#"{"input": {"seed": 3, "mean_si": 5.2}}"#)
            .unwrap()
            .with_params::<Params>()
            .unwrap();
        assert_eq!(ctx.params, Some(Params { mean_si: 5.2 }));
        assert_eq!(ctx.seed, 3);
    }

    #[test]
    fn test_with_params_rejects_wrong_shape() {
        #[derive(Deserialize, Debug)]
        #[allow(dead_code)]
        struct Params {
            mean_si: f64,
        }
        let ctx = RunContext::from_json_str(r#"{"input": {"mean_si": "long"}}"#).unwrap();
        assert!(matches!(
            ctx.with_params::<Params>(),
            Err(RunError::MissingInput(_))
        ));
    }

    #[test]
    fn test_empty_document() {
        assert!(matches!(
            RunContext::from_json_str("  \n"),
            Err(RunError::EmptyInput)
        ));
    }

    #[test]
    fn test_output_dir_profiled() {
        let data = json!({
            "output": {
                "profile": {
                    "default": {
                        "spec": "filesystem",
                        "dir": "/tmp/profiled"
                    }
                }
            }
        });
        let ctx = RunContext::from_document(data, None);
        assert_eq!(ctx.output_dir(), Some(Path::new("/tmp/profiled")));
    }

    #[test]
    fn test_stdout_destination() {
        let ctx = RunContext::from_document(json!({"output": {"spec": "stdout"}}), None);
        assert_eq!(ctx.destination(), &Destination::Stdout);
        assert_eq!(ctx.output_dir(), None);
    }

    #[test]
    fn test_defaults() {
        let ctx = RunContext::from_document(json!({}), None);
        assert_eq!(ctx.seed, 0);
        assert_eq!(ctx.replicate, 0);
        assert!(ctx.input_json().is_empty());
        assert!(ctx.files.is_empty());
        assert!(matches!(ctx.file("reports"), Err(RunError::MissingFile(_))));
    }

    #[test]
    fn test_toml_relative_files() {
        let raw = r#"
            [input]
            seed = 9

            [model.files]
            reports = "data/reports.csv"
            absolute = "/srv/reports.csv"

            [output]
            spec = "filesystem"
            dir = "out"
        "#;
        let ctx = RunContext::from_toml_str(raw, Some(Path::new("/runs/a"))).unwrap();
        assert_eq!(ctx.seed, 9);
        assert_eq!(
            ctx.file("reports").unwrap(),
            Path::new("/runs/a/data/reports.csv")
        );
        assert_eq!(ctx.file("absolute").unwrap(), Path::new("/srv/reports.csv"));
    }

    #[test]
    fn test_write_and_read_csv() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Row {
            day: u32,
            cases: u64,
        }
        let dir = tempfile::tempdir().unwrap();
        let data = json!({
            "model": {"files": {"table": dir.path().join("table.csv")}},
            "output": {"spec": "filesystem", "dir": dir.path()}
        });
        let ctx = RunContext::from_document(data, None);
        let rows = vec![Row { day: 0, cases: 3 }, Row { day: 1, cases: 5 }];
        ctx.write_csv("table.csv", &rows).unwrap();

        let written = fs::read_to_string(dir.path().join("table.csv")).unwrap();
        assert_eq!(written, "day,cases\n0,3\n1,5\n");
        assert_eq!(ctx.read_csv::<Row>("table").unwrap(), rows);
        assert_eq!(ctx.fingerprint("table").unwrap().len(), 64);
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let data = json!({"output": {"spec": "filesystem", "dir": dir.path().join("nested")}});
        let ctx = RunContext::from_document(data, None);
        ctx.write_json("summary.json", &json!({"r": 1.5})).unwrap();
        let written = fs::read_to_string(dir.path().join("nested/summary.json")).unwrap();
        let value: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["r"], 1.5);
    }
}
