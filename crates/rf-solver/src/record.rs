//! Optional per-iteration diagnostic dumps.
//!
//! Each post-check writes one JSON document to
//! `<root>/Step_NNN/iteration_NNN/fields.json`. The files are for post-hoc
//! debugging only; nothing reads them back.

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::{SolverError, SolverResult};

/// Cell fields around one line search.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IterationFields {
    #[serde(rename = "Res_undamped")]
    pub res_undamped: Vec<f64>,
    #[serde(rename = "Dp_damped")]
    pub dp_damped: Vec<f64>,
    #[serde(rename = "Dp_undamped")]
    pub dp_undamped: Vec<f64>,
    #[serde(rename = "Pold")]
    pub p_old: Vec<f64>,
    #[serde(rename = "Pnew_damped")]
    pub p_new_damped: Vec<f64>,
    #[serde(rename = "Snew_damped")]
    pub s_new_damped: Vec<f64>,
    #[serde(rename = "Sold")]
    pub s_old: Vec<f64>,
    #[serde(rename = "dS")]
    pub ds: Vec<f64>,
    pub damping_factor: f64,
}

pub struct IterationRecorder {
    root: PathBuf,
}

impl IterationRecorder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, step: usize, iteration: usize) -> PathBuf {
        self.root
            .join(format!("Step_{step:03}"))
            .join(format!("iteration_{iteration:03}"))
            .join("fields.json")
    }

    pub fn record(
        &self,
        step: usize,
        iteration: usize,
        fields: &IterationFields,
    ) -> SolverResult<PathBuf> {
        let path = self.path_for(step, iteration);
        let io_err = |source| SolverError::RecordIo {
            path: path.clone(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let file = fs::File::create(&path).map_err(io_err)?;
        serde_json::to_writer_pretty(BufWriter::new(file), fields)?;
        tracing::trace!(path = %path.display(), "recorded line-search fields");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_keyed_directory_tree() {
        let root = std::env::temp_dir().join(format!("rf-record-{}", std::process::id()));
        let recorder = IterationRecorder::new(&root);
        let fields = IterationFields {
            res_undamped: vec![1.0],
            dp_damped: vec![0.5],
            dp_undamped: vec![1.0],
            p_old: vec![9e4],
            p_new_damped: vec![8.95e4],
            s_new_damped: vec![0.8],
            s_old: vec![0.82],
            ds: vec![-0.02],
            damping_factor: 0.5,
        };
        let path = recorder.record(3, 12, &fields).unwrap();
        assert!(path.ends_with("Step_003/iteration_012/fields.json"));
        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["DampingFactor"], 0.5);
        assert_eq!(value["Res_undamped"][0], 1.0);
        assert!(value.get("dS").is_some());
        std::fs::remove_dir_all(&root).unwrap();
    }
}
