use crate::{
    error::StepError,
    io::StepIo,
    step::{Flow, Step, StepContext},
    steps::parse_config,
};
use async_trait::async_trait;
use model::{graph::definition::StepDefinition, records::row::Row};
use serde::Deserialize;
use std::{
    fs::File,
    path::{Path, PathBuf},
};
use tracing::info;

fn default_delimiter() -> char {
    ','
}

fn default_header() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextFileOutputConfig {
    pub path: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_header")]
    pub header: bool,
}

/// Writes rows as delimited text and passes them on.
///
/// Copies write to separate files: `orders.csv` becomes `orders_0.csv`,
/// `orders_1.csv` and so on. In a cluster the number is the global copy,
/// and an unpartitioned output gets the worker name instead.
pub struct TextFileOutput {
    config: TextFileOutputConfig,
    writer: Option<csv::Writer<File>>,
    path: PathBuf,
    header_written: bool,
}

impl TextFileOutput {
    pub fn from_definition(definition: &StepDefinition) -> Result<Self, StepError> {
        let config: TextFileOutputConfig = parse_config(definition)?;
        if !config.delimiter.is_ascii() {
            return Err(StepError::Config(format!(
                "delimiter '{}' is not a single-byte character",
                config.delimiter
            )));
        }
        Ok(Self {
            path: config.path.clone(),
            config,
            writer: None,
            header_written: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn copy_path(path: &Path, copy: u32) -> PathBuf {
    suffixed(path, &copy.to_string())
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{suffix}"),
    };
    path.with_file_name(name)
}

#[async_trait]
impl Step for TextFileOutput {
    async fn init(&mut self, ctx: &StepContext) -> Result<(), StepError> {
        let partitioned = ctx.partitions.is_some_and(|r| r.total > 1);
        if ctx.copies > 1 || partitioned {
            self.path = copy_path(&self.config.path, ctx.global_copy());
        } else if let Some(worker) = &ctx.worker {
            self.path = suffixed(&self.config.path, worker);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let writer = csv::WriterBuilder::new()
            .delimiter(self.config.delimiter as u8)
            .from_path(&self.path)?;
        self.writer = Some(writer);
        info!(step = %ctx.name, copy = ctx.copy, path = %self.path.display(), "Opened text output");
        Ok(())
    }

    async fn process_row(&mut self, row: Option<&Row>, io: &mut StepIo) -> Result<Flow, StepError> {
        let Some(row) = row else {
            return Ok(Flow::EndOfInput);
        };
        let Some(writer) = self.writer.as_mut() else {
            return Err(StepError::Failed("text output used before init".to_string()));
        };

        if self.config.header && !self.header_written {
            writer.write_record(row.schema().names())?;
            self.header_written = true;
        }
        writer.write_record(row.values().iter().map(|v| v.to_string()))?;
        io.metrics().increment_output(1);

        io.emit(row.clone()).await?;
        Ok(Flow::Continue)
    }

    async fn flush(&mut self, _io: &mut StepIo) -> Result<(), StepError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    async fn dispose(&mut self) {
        self.writer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::testing::{capture, context, drain};
    use model::core::{
        data_type::DataType,
        schema::{Field, Schema},
        value::Value,
    };
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn copy_paths_keep_extension() {
        assert_eq!(copy_path(Path::new("/out/orders.csv"), 1), PathBuf::from("/out/orders_1.csv"));
        assert_eq!(copy_path(Path::new("dump"), 0), PathBuf::from("dump_0"));
    }

    #[tokio::test]
    async fn writes_header_rows_and_passes_through() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let def = StepDefinition::new("write", "text-file-output").config(json!({ "path": path }));
        let mut step = TextFileOutput::from_definition(&def).unwrap();
        step.init(&context(&def)).await.unwrap();

        let schema = Schema::new(vec![
            Field::new("id", DataType::Integer),
            Field::new("note", DataType::String),
        ])
        .unwrap()
        .into_ref();
        let (mut io, sets) = capture("write", &["next"]);
        for (id, note) in [(1, "a"), (2, "")] {
            let row = Row::new(schema.clone(), vec![Value::Int(id), Value::String(note.into())]).unwrap();
            step.process_row(Some(&row), &mut io).await.unwrap();
        }
        step.flush(&mut io).await.unwrap();
        step.dispose().await;

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id,note\n1,a\n2,\n");
        assert_eq!(drain(&sets[0]).len(), 2);
        assert_eq!(io.metrics().snapshot().lines_output, 2);
    }
}
