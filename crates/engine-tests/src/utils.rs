use engine_config::{env::EnvVars, graph::parse_graph, settings::validated::EngineSettingsBuilder};
use engine_runtime::context::EngineContext;
use model::graph::definition::GraphDefinition;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

pub fn write_file(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(&path, body).expect("write test file");
    debug!(path = %path.display(), bytes = body.len(), "test file written");
    path
}

/// Parses a JSON graph with `${DATA}` pointing at `dir`.
pub fn graph(json: &str, dir: &Path) -> GraphDefinition {
    let mut vars = HashMap::new();
    vars.insert("DATA".to_string(), dir.display().to_string());
    let graph = parse_graph(json, &EnvVars::from_map(vars), "test").expect("valid graph");
    debug!(graph = %graph.name, steps = graph.steps.len(), "test graph parsed");
    graph
}

/// Engine with small RowSets so backpressure is exercised.
pub fn engine() -> EngineContext {
    EngineContext::new(EngineSettingsBuilder::new().rowset_size(2).build())
}

/// Data records of a delimited file with a header line.
pub fn records(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::Reader::from_path(path).expect("open csv");
    reader
        .records()
        .map(|r| {
            r.expect("csv record")
                .iter()
                .map(str::to_string)
                .collect()
        })
        .collect()
}

/// First column of every data record, as integers.
pub fn ids(path: &Path) -> Vec<i64> {
    records(path)
        .iter()
        .map(|r| r[0].parse().expect("integer id"))
        .collect()
}

pub fn column(path: &Path, name: &str) -> Vec<String> {
    let mut reader = csv::Reader::from_path(path).expect("open csv");
    let index = reader
        .headers()
        .expect("header")
        .iter()
        .position(|h| h == name)
        .expect("column present");
    reader
        .records()
        .map(|r| r.expect("csv record")[index].to_string())
        .collect()
}
