use crate::{
    error::StepError,
    io::StepIo,
    step::{Flow, Step, StepContext},
};
use async_trait::async_trait;
use model::records::row::Row;

/// Passes every row through unchanged.
pub struct Dummy;

#[async_trait]
impl Step for Dummy {
    async fn init(&mut self, _ctx: &StepContext) -> Result<(), StepError> {
        Ok(())
    }

    async fn process_row(&mut self, row: Option<&Row>, io: &mut StepIo) -> Result<Flow, StepError> {
        match row {
            Some(row) => {
                io.emit(row.clone()).await?;
                Ok(Flow::Continue)
            }
            None => Ok(Flow::EndOfInput),
        }
    }
}
