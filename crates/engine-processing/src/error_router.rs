use crate::{
    error::{RowError, StepError},
    io::StepIo,
};
use model::{
    core::{
        data_type::DataType,
        schema::{Field, SchemaRef},
        value::Value,
    },
    graph::definition::ErrorHandling,
    records::row::Row,
};
use std::sync::Arc;
use tracing::{debug, warn};

pub const ERROR_FIELDS: [&str; 5] = [
    "error_step",
    "error_count",
    "error_code",
    "error_description",
    "error_field",
];

/// Diverts failed rows to a step's error hop and enforces its error budget.
pub struct ErrorRouter {
    step: String,
    policy: ErrorHandling,
    schemas: Option<(SchemaRef, SchemaRef)>,
}

impl ErrorRouter {
    pub fn new(step: impl Into<String>, policy: ErrorHandling) -> Self {
        Self {
            step: step.into(),
            policy,
            schemas: None,
        }
    }

    /// Handles one row-level error.
    ///
    /// The error is counted first, then routed, then the thresholds are
    /// checked. Without an error hop every row error is fatal.
    pub async fn route(
        &mut self,
        io: &mut StepIo,
        input: Option<&Row>,
        error: RowError,
    ) -> Result<(), StepError> {
        let errors = io.metrics().increment_errors(1);

        if !io.has_error_hop() {
            return Err(StepError::Row(error));
        }

        match error.row.as_ref().or(input) {
            Some(row) => {
                let error_row = self.error_row(row, &error)?;
                io.emit_error(error_row).await?;
                io.metrics().increment_rejected(1);
                debug!(step = %self.step, %error, "row routed to error hop");
            }
            None => warn!(step = %self.step, %error, "row error without a row, nothing routed"),
        }

        let snapshot = io.metrics().snapshot();
        self.check_threshold(errors, snapshot.lines_read + snapshot.lines_input)
    }

    fn check_threshold(&self, errors: u64, rows: u64) -> Result<(), StepError> {
        let limit = match (self.policy.max_errors, self.policy.max_percent_errors) {
            (Some(max), _) => Some(max),
            // A percentage alone replaces the fail-on-first-error default.
            (None, Some(_)) => None,
            (None, None) => Some(0),
        };
        if let Some(max) = limit.filter(|max| errors > *max) {
            return Err(StepError::ThresholdExceeded {
                errors,
                detail: format!("at most {max} tolerated"),
            });
        }

        if let Some(percent) = self.policy.max_percent_errors {
            let measurable = rows > 0 && rows >= self.policy.min_rows_for_percent;
            if measurable && errors * 100 > u64::from(percent) * rows {
                return Err(StepError::ThresholdExceeded {
                    errors,
                    detail: format!("more than {percent}% of {rows} rows"),
                });
            }
        }
        Ok(())
    }

    fn error_row(&mut self, row: &Row, error: &RowError) -> Result<Row, StepError> {
        let schema = self.error_schema(row.schema())?;
        let mut values = row.values().to_vec();
        values.extend([
            Value::String(self.step.clone()),
            Value::Int(1),
            Value::String(error.code.clone()),
            Value::String(error.description.clone()),
            error.field.clone().map(Value::String).unwrap_or(Value::Null),
        ]);
        Ok(Row::new(schema, values)?)
    }

    fn error_schema(&mut self, base: &SchemaRef) -> Result<SchemaRef, StepError> {
        if let Some((cached_base, extended)) = &self.schemas {
            if Arc::ptr_eq(cached_base, base) || **cached_base == **base {
                return Ok(extended.clone());
            }
        }

        let types = [
            DataType::String,
            DataType::Integer,
            DataType::String,
            DataType::String,
            DataType::String,
        ];
        let extra = ERROR_FIELDS
            .iter()
            .zip(types)
            .map(|(name, data_type)| Field::new(*name, data_type));
        let extended = base.extend(extra)?.into_ref();
        self.schemas = Some((base.clone(), extended.clone()));
        Ok(extended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::OutputHop;
    use engine_core::{
        metrics::StepMetrics,
        partition::Partitioner,
        rowset::{Fetched, RowSet, StepCopy},
    };
    use model::{core::schema::Schema, graph::definition::Distribution};
    use tokio_util::sync::CancellationToken;

    fn input(id: i64) -> Row {
        let schema = Schema::new(vec![Field::new("id", DataType::Integer)])
            .unwrap()
            .into_ref();
        Row::new(schema, vec![Value::Int(id)]).unwrap()
    }

    fn io_with_error_hop() -> (StepIo, Arc<RowSet>) {
        let rowset = Arc::new(RowSet::new(
            StepCopy::new("parse", 0),
            StepCopy::new("rejects", 0),
            32,
            CancellationToken::new(),
        ));
        let io = StepIo::new(StepCopy::new("parse", 0), StepMetrics::new()).with_error_hop(
            OutputHop::new(
                "rejects",
                vec![rowset.clone()],
                Partitioner::new(&Distribution::RoundRobin, 1, None),
            ),
        );
        (io, rowset)
    }

    #[tokio::test]
    async fn error_row_carries_original_values_and_details() {
        let (mut io, rowset) = io_with_error_hop();
        let mut router = ErrorRouter::new(
            "parse",
            ErrorHandling {
                max_errors: Some(5),
                ..Default::default()
            },
        );

        let error = RowError::new("conversion", "not a number").field("amount");
        router.route(&mut io, Some(&input(7)), error).await.unwrap();

        let Fetched::Row(row) = rowset.try_get() else {
            panic!("expected an error row");
        };
        assert_eq!(row.get(0), Some(&Value::Int(7)));
        assert_eq!(row.get_by_name("error_step"), Some(&Value::String("parse".into())));
        assert_eq!(row.get_by_name("error_count"), Some(&Value::Int(1)));
        assert_eq!(row.get_by_name("error_field"), Some(&Value::String("amount".into())));
        assert_eq!(io.metrics().snapshot().lines_rejected, 1);
    }

    #[tokio::test]
    async fn tolerates_exactly_max_errors() {
        let (mut io, _rowset) = io_with_error_hop();
        let mut router = ErrorRouter::new(
            "parse",
            ErrorHandling {
                max_errors: Some(2),
                ..Default::default()
            },
        );

        for id in 0..2 {
            router
                .route(&mut io, Some(&input(id)), RowError::new("bad", "bad row"))
                .await
                .unwrap();
        }
        let third = router
            .route(&mut io, Some(&input(2)), RowError::new("bad", "bad row"))
            .await;
        assert!(matches!(third, Err(StepError::ThresholdExceeded { errors: 3, .. })));
    }

    #[tokio::test]
    async fn without_error_hop_first_error_is_fatal() {
        let mut io = StepIo::new(StepCopy::new("parse", 0), StepMetrics::new());
        let mut router = ErrorRouter::new("parse", ErrorHandling::default());
        let result = router
            .route(&mut io, Some(&input(1)), RowError::new("bad", "bad row"))
            .await;
        assert!(matches!(result, Err(StepError::Row(_))));
        assert_eq!(io.metrics().errors(), 1);
    }

    #[test]
    fn percentage_applies_after_minimum_rows() {
        let router = ErrorRouter::new(
            "parse",
            ErrorHandling {
                max_errors: None,
                max_percent_errors: Some(10),
                min_rows_for_percent: 50,
            },
        );
        assert!(router.check_threshold(20, 40).is_ok());
        assert!(router.check_threshold(5, 50).is_ok());
        assert!(router.check_threshold(6, 50).is_err());
    }
}
