use crate::{env::EnvVars, settings::error::SettingsError};
use model::graph::definition::GraphDefinition;
use std::{fs, path::Path};
use tracing::info;

/// Reads a JSON graph definition, expands `${VAR}` references and validates
/// its structure.
pub fn load_graph(path: impl AsRef<Path>, env: &EnvVars) -> Result<GraphDefinition, SettingsError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let graph = parse_graph(&raw, env, &path.display().to_string())?;
    info!(
        graph = %graph.name,
        steps = graph.steps.len(),
        hops = graph.hops.len(),
        "Loaded graph definition"
    );
    Ok(graph)
}

pub fn parse_graph(raw: &str, env: &EnvVars, origin: &str) -> Result<GraphDefinition, SettingsError> {
    let expanded = env.substitute(raw)?;
    let graph: GraphDefinition =
        serde_json::from_str(&expanded).map_err(|source| SettingsError::Parse {
            path: origin.to_string(),
            source,
        })?;
    graph.validate()?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::error::GraphError;
    use std::io::Write;

    const GRAPH: &str = r#"{
        "name": "copy",
        "steps": [
            { "name": "in", "type": "text-file-input", "config": { "path": "${DATA}/in.csv" } },
            { "name": "out", "type": "text-file-output", "config": { "path": "${DATA}/out.csv" } }
        ],
        "hops": [ { "from": "in", "to": "out" } ]
    }"#;

    #[test]
    fn loads_and_expands_graph_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(GRAPH.as_bytes()).unwrap();

        let mut env = EnvVars::default();
        env.set("DATA", "/srv");
        let graph = load_graph(file.path(), &env).unwrap();

        assert_eq!(graph.name, "copy");
        assert_eq!(graph.steps[0].config["path"], "/srv/in.csv");
    }

    #[test]
    fn reports_missing_variables_and_invalid_graphs() {
        assert!(matches!(
            parse_graph(GRAPH, &EnvVars::default(), "inline"),
            Err(SettingsError::UndefinedVariables(_))
        ));

        let cyclic = r#"{ "name": "c",
            "steps": [ { "name": "a", "type": "dummy" }, { "name": "b", "type": "dummy" } ],
            "hops": [ { "from": "a", "to": "b" }, { "from": "b", "to": "a" } ] }"#;
        assert!(matches!(
            parse_graph(cyclic, &EnvVars::default(), "inline"),
            Err(SettingsError::Graph(GraphError::Unreachable(_)))
        ));
    }
}
