use crate::{
    error::{RowError, StepError},
    io::StepIo,
    step::{Flow, Step, StepContext},
    steps::parse_config,
};
use async_trait::async_trait;
use csv::StringRecord;
use engine_core::playlist::Playlist;
use model::{
    core::{
        data_type::DataType,
        schema::{Field, Schema, SchemaRef},
        value::Value,
    },
    graph::definition::StepDefinition,
    records::row::Row,
};
use serde::Deserialize;
use std::{fs::File, path::PathBuf, sync::Arc};
use tracing::{info, trace};

fn default_delimiter() -> char {
    ','
}

fn default_header() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextFileInputConfig {
    pub path: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_header")]
    pub header: bool,
    /// Declared fields; when empty every header column is read as a string.
    #[serde(default)]
    pub fields: Vec<Field>,
    /// Name used in replay side files. Defaults to the file name.
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub part: Option<String>,
}

/// Reads delimited text, one row per record.
///
/// Data records are numbered from 1 (the header is not counted); the replay
/// playlist is asked about each number before the record is parsed. With
/// several copies, copy `c` takes the records whose number minus one is
/// `c` modulo the copy count.
pub struct TextFileInput {
    config: TextFileInputConfig,
    source_id: String,
    reader: Option<csv::Reader<File>>,
    record: StringRecord,
    schema: Option<SchemaRef>,
    raw_schema: Option<SchemaRef>,
    playlist: Option<Arc<dyn Playlist>>,
    line: u64,
    copy: u64,
    copies: u64,
}

impl TextFileInput {
    pub fn from_definition(definition: &StepDefinition) -> Result<Self, StepError> {
        let config: TextFileInputConfig = parse_config(definition)?;
        if !config.delimiter.is_ascii() {
            return Err(StepError::Config(format!(
                "delimiter '{}' is not a single-byte character",
                config.delimiter
            )));
        }
        let source_id = config.source_id.clone().unwrap_or_else(|| {
            config
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| config.path.display().to_string())
        });
        Ok(Self {
            config,
            source_id,
            reader: None,
            record: StringRecord::new(),
            schema: None,
            raw_schema: None,
            playlist: None,
            line: 0,
            copy: 0,
            copies: 1,
        })
    }

    fn parse(&self) -> Result<Row, StepError> {
        let (Some(schema), Some(raw_schema)) = (&self.schema, &self.raw_schema) else {
            return Err(StepError::Failed("text input used before init".to_string()));
        };

        let width = schema.len();
        let raw_values: Vec<Value> = (0..width)
            .map(|i| {
                self.record
                    .get(i)
                    .map(|s| Value::String(s.to_string()))
                    .unwrap_or(Value::Null)
            })
            .collect();
        let raw_row = Row::new(raw_schema.clone(), raw_values)?;

        if self.record.len() != width {
            return Err(RowError::new(
                "field-count",
                format!(
                    "line {}: expected {width} fields, found {}",
                    self.line,
                    self.record.len()
                ),
            )
            .with_row(raw_row)
            .into());
        }

        let mut values = Vec::with_capacity(width);
        for (value, field) in raw_row.values().iter().zip(schema.fields()) {
            match value.convert_to(field.data_type) {
                Ok(converted) => values.push(converted),
                Err(e) => {
                    return Err(RowError::new("conversion", e.to_string())
                        .field(field.name.clone())
                        .with_row(raw_row)
                        .into());
                }
            }
        }
        Ok(Row::new(schema.clone(), values)?)
    }
}

#[async_trait]
impl Step for TextFileInput {
    async fn init(&mut self, ctx: &StepContext) -> Result<(), StepError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.config.delimiter as u8)
            .has_headers(self.config.header)
            .flexible(true)
            .from_path(&self.config.path)?;

        let fields = if self.config.fields.is_empty() {
            if !self.config.header {
                return Err(StepError::Config(
                    "fields must be declared when the file has no header".to_string(),
                ));
            }
            reader
                .headers()?
                .iter()
                .map(|name| Field::new(name, DataType::String))
                .collect()
        } else {
            self.config.fields.clone()
        };
        if fields.is_empty() {
            return Err(StepError::Config(format!(
                "no fields found in {}",
                self.config.path.display()
            )));
        }

        let raw_fields = fields
            .iter()
            .map(|f| Field::new(f.name.clone(), DataType::String))
            .collect();
        self.raw_schema = Some(Schema::new(raw_fields)?.into_ref());
        self.schema = Some(Schema::new(fields)?.into_ref());
        self.reader = Some(reader);
        self.playlist = Some(ctx.playlist.clone());
        self.copy = u64::from(ctx.copy);
        self.copies = u64::from(ctx.copies.max(1));

        info!(
            step = %ctx.name,
            copy = ctx.copy,
            path = %self.config.path.display(),
            source = %self.source_id,
            "Opened text input"
        );
        Ok(())
    }

    async fn process_row(&mut self, _row: Option<&Row>, io: &mut StepIo) -> Result<Flow, StepError> {
        let (Some(reader), Some(playlist)) = (self.reader.as_mut(), self.playlist.as_ref()) else {
            return Err(StepError::Failed("text input used before init".to_string()));
        };

        loop {
            if !reader.read_record(&mut self.record)? {
                return Ok(Flow::EndOfInput);
            }
            self.line += 1;
            if (self.line - 1) % self.copies != self.copy {
                continue;
            }
            if !playlist.is_processing_needed(&self.source_id, self.config.part.as_deref(), self.line)? {
                trace!(source = %self.source_id, line = self.line, "already processed, skipped");
                continue;
            }
            break;
        }

        io.metrics().increment_input(1);
        let row = self.parse()?;
        io.emit(row).await?;
        Ok(Flow::Continue)
    }

    async fn dispose(&mut self) {
        self.reader = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::testing::{capture, context, context_with, drain};
    use engine_core::playlist::ReplayPlaylist;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn definition(path: &std::path::Path) -> StepDefinition {
        StepDefinition::new("read", "text-file-input").config(json!({
            "path": path,
            "source_id": "orders",
            "fields": [
                { "name": "id", "type": "integer" },
                { "name": "name", "type": "string" }
            ]
        }))
    }

    async fn read_all(step: &mut TextFileInput, io: &mut StepIo) -> Vec<StepError> {
        let mut errors = Vec::new();
        loop {
            match step.process_row(None, io).await {
                Ok(Flow::EndOfInput) => break,
                Ok(Flow::Continue) => {}
                Err(e) => errors.push(e),
            }
        }
        errors
    }

    #[tokio::test]
    async fn reads_typed_rows_and_reports_bad_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("orders.csv");
        fs::write(&path, "id,name\n1,a\nx,b\n3\n4,d\n").unwrap();

        let def = definition(&path);
        let mut step = TextFileInput::from_definition(&def).unwrap();
        step.init(&context(&def)).await.unwrap();
        let (mut io, sets) = capture("read", &["out"]);

        let errors = read_all(&mut step, &mut io).await;
        let ids: Vec<i64> = drain(&sets[0])
            .iter()
            .filter_map(|r| r.get(0).and_then(Value::as_i64))
            .collect();
        assert_eq!(ids, vec![1, 4]);
        assert_eq!(io.metrics().snapshot().lines_input, 4);

        assert_eq!(errors.len(), 2);
        match &errors[0] {
            StepError::Row(e) => {
                assert_eq!(e.code, "conversion");
                assert_eq!(e.field.as_deref(), Some("id"));
                let raw = e.row.as_ref().unwrap();
                assert_eq!(raw.get(0), Some(&Value::String("x".into())));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(&errors[1], StepError::Row(e) if e.code == "field-count"));
    }

    #[tokio::test]
    async fn replay_skips_lines_recorded_as_succeeded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("orders.csv");
        fs::write(&path, "id,name\n1,a\n2,b\n3,c\n4,d\n5,e\n").unwrap();
        let replay = dir.path().join("replay");
        fs::create_dir(&replay).unwrap();
        fs::write(replay.join("orders.line"), "1\n2\n3\n").unwrap();
        fs::write(replay.join("orders.error"), "2\n").unwrap();

        let def = definition(&path);
        let mut step = TextFileInput::from_definition(&def).unwrap();
        step.init(&context_with(&def, Arc::new(ReplayPlaylist::new(&replay))))
            .await
            .unwrap();
        let (mut io, sets) = capture("read", &["out"]);

        assert!(read_all(&mut step, &mut io).await.is_empty());
        let ids: Vec<i64> = drain(&sets[0])
            .iter()
            .filter_map(|r| r.get(0).and_then(Value::as_i64))
            .collect();
        assert_eq!(ids, vec![2, 4, 5]);
    }

    #[tokio::test]
    async fn header_defines_string_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.csv");
        fs::write(&path, "a;b\n1;2\n").unwrap();

        let def = StepDefinition::new("read", "text-file-input")
            .config(json!({ "path": path, "delimiter": ";" }));
        let mut step = TextFileInput::from_definition(&def).unwrap();
        step.init(&context(&def)).await.unwrap();
        let (mut io, sets) = capture("read", &["out"]);
        read_all(&mut step, &mut io).await;

        let rows = drain(&sets[0]);
        assert_eq!(rows[0].schema().names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(rows[0].get(1), Some(&Value::String("2".into())));
    }
}
