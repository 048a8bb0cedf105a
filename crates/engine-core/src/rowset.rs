use crate::error::RowSetError;
use model::{core::schema::SchemaRef, records::row::Row};
use std::{
    fmt,
    sync::{
        Arc, Mutex, OnceLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Identifies one runtime copy of a step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepCopy {
    pub step: Arc<str>,
    pub copy: u32,
}

impl StepCopy {
    pub fn new(step: impl Into<Arc<str>>, copy: u32) -> Self {
        Self {
            step: step.into(),
            copy,
        }
    }
}

impl fmt::Display for StepCopy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.step, self.copy)
    }
}

/// Result of handing a row to a [`RowSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Accepted,
    /// The consumer closed its end; the row was not delivered to it.
    Closed,
    /// The run was aborted while waiting for space.
    Stopped,
}

/// Result of reading from a [`RowSet`].
#[derive(Debug, PartialEq)]
pub enum Fetched {
    Row(Row),
    /// Buffer drained and the producer marked the set done.
    EndOfStream,
    /// The run was aborted.
    Stopped,
    /// Nothing available yet (only from the non-blocking and timed reads).
    Pending,
}

/// Bounded FIFO between exactly one producer copy and one consumer copy.
///
/// The fixed capacity is the engine's backpressure: `put` waits while the
/// buffer is full, `get` waits while it is empty and not done. Both return
/// early once the run's abort token fires.
pub struct RowSet {
    origin: StepCopy,
    destination: StepCopy,
    capacity: usize,
    len: AtomicUsize,
    done: AtomicBool,
    closed: AtomicBool,
    schema: OnceLock<SchemaRef>,
    tx: Mutex<Option<mpsc::Sender<Row>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Row>>,
    abort: CancellationToken,
}

impl RowSet {
    pub fn new(
        origin: StepCopy,
        destination: StepCopy,
        capacity: usize,
        abort: CancellationToken,
    ) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            origin,
            destination,
            capacity,
            len: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            schema: OnceLock::new(),
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            abort,
        }
    }

    pub fn origin(&self) -> &StepCopy {
        &self.origin
    }

    pub fn destination(&self) -> &StepCopy {
        &self.destination
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Best-effort number of buffered rows.
    pub fn size(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Schema of the rows travelling through this set, once the first row arrived.
    pub fn schema(&self) -> Option<&SchemaRef> {
        self.schema.get()
    }

    /// Appends a row, waiting for space while the buffer is full.
    pub async fn put(&self, row: Row) -> Result<PutOutcome, RowSetError> {
        self.check_schema(row.schema())?;

        let tx = self
            .sender()
            .ok_or_else(|| RowSetError::AlreadyDone(self.to_string()))?;

        tokio::select! {
            biased;
            _ = self.abort.cancelled() => Ok(PutOutcome::Stopped),
            permit = tx.reserve() => match permit {
                Ok(permit) => {
                    self.len.fetch_add(1, Ordering::AcqRel);
                    permit.send(row);
                    trace!(rowset = %self, "row accepted");
                    Ok(PutOutcome::Accepted)
                }
                Err(_) => Ok(PutOutcome::Closed),
            },
        }
    }

    /// Takes the next row, waiting while the buffer is empty and not done.
    pub async fn get(&self) -> Fetched {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            _ = self.abort.cancelled() => Fetched::Stopped,
            msg = rx.recv() => self.received(msg),
        }
    }

    /// Like [`RowSet::get`] but gives up after `wait`, returning `Pending`.
    pub async fn get_timeout(&self, wait: Duration) -> Fetched {
        match tokio::time::timeout(wait, self.get()).await {
            Ok(fetched) => fetched,
            Err(_) => Fetched::Pending,
        }
    }

    /// Non-blocking read.
    pub fn try_get(&self) -> Fetched {
        if self.abort.is_cancelled() {
            return Fetched::Stopped;
        }
        let Ok(mut rx) = self.rx.try_lock() else {
            return Fetched::Pending;
        };
        match rx.try_recv() {
            Ok(row) => self.received(Some(row)),
            Err(mpsc::error::TryRecvError::Empty) => Fetched::Pending,
            Err(mpsc::error::TryRecvError::Disconnected) => Fetched::EndOfStream,
        }
    }

    /// Signals that the producer has no more rows. Idempotent.
    pub fn mark_done(&self) {
        let sender = self
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if sender.is_some() {
            self.done.store(true, Ordering::Release);
            debug!(rowset = %self, "marked done");
        }
    }

    /// Consumer side shutdown: further puts report `Closed` and buffered
    /// rows are discarded.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut rx = self.rx.lock().await;
        rx.close();
        while rx.try_recv().is_ok() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        debug!(rowset = %self, "closed by consumer");
    }

    fn sender(&self) -> Option<mpsc::Sender<Row>> {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn received(&self, msg: Option<Row>) -> Fetched {
        match msg {
            Some(row) => {
                self.len.fetch_sub(1, Ordering::AcqRel);
                Fetched::Row(row)
            }
            None => Fetched::EndOfStream,
        }
    }

    fn check_schema(&self, schema: &SchemaRef) -> Result<(), RowSetError> {
        let published = self.schema.get_or_init(|| schema.clone());
        if Arc::ptr_eq(published, schema) || **published == **schema {
            Ok(())
        } else {
            Err(RowSetError::SchemaMismatch(self.to_string()))
        }
    }
}

impl fmt::Display for RowSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.origin, self.destination)
    }
}

impl fmt::Debug for RowSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowSet")
            .field("origin", &self.origin)
            .field("destination", &self.destination)
            .field("capacity", &self.capacity)
            .field("size", &self.size())
            .field("done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::core::{
        data_type::DataType,
        schema::{Field, Schema},
        value::Value,
    };

    fn schema() -> SchemaRef {
        Schema::new(vec![Field::new("id", DataType::Integer)])
            .unwrap()
            .into_ref()
    }

    fn row(schema: &SchemaRef, id: i64) -> Row {
        Row::new(schema.clone(), vec![Value::Int(id)]).unwrap()
    }

    fn rowset(capacity: usize, abort: CancellationToken) -> Arc<RowSet> {
        Arc::new(RowSet::new(
            StepCopy::new("a", 0),
            StepCopy::new("b", 0),
            capacity,
            abort,
        ))
    }

    fn id_of(fetched: Fetched) -> i64 {
        match fetched {
            Fetched::Row(r) => r.get(0).and_then(Value::as_i64).unwrap(),
            other => panic!("expected row, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn preserves_fifo_order_then_end_of_stream() {
        let rs = rowset(4, CancellationToken::new());
        let s = schema();

        let producer = {
            let rs = rs.clone();
            let s = s.clone();
            tokio::spawn(async move {
                for id in 1..=20 {
                    assert_eq!(rs.put(row(&s, id)).await.unwrap(), PutOutcome::Accepted);
                }
                rs.mark_done();
            })
        };

        let mut seen = Vec::new();
        loop {
            match rs.get().await {
                Fetched::Row(r) => seen.push(r.get(0).and_then(Value::as_i64).unwrap()),
                Fetched::EndOfStream => break,
                other => panic!("unexpected {other:?}"),
            }
        }
        producer.await.unwrap();

        assert_eq!(seen, (1..=20).collect::<Vec<_>>());
        assert_eq!(rs.get().await, Fetched::EndOfStream);
    }

    #[tokio::test]
    async fn full_buffer_blocks_until_one_get() {
        let rs = rowset(2, CancellationToken::new());
        let s = schema();
        rs.put(row(&s, 1)).await.unwrap();
        rs.put(row(&s, 2)).await.unwrap();
        assert!(rs.is_full());

        let blocked = {
            let rs = rs.clone();
            let s = s.clone();
            tokio::spawn(async move { rs.put(row(&s, 3)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        assert_eq!(id_of(rs.get().await), 1);
        let outcome = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, PutOutcome::Accepted);
        assert_eq!(rs.size(), 2);
    }

    #[tokio::test]
    async fn abort_wakes_blocked_put_and_get() {
        let abort = CancellationToken::new();
        let full = rowset(1, abort.clone());
        let empty = rowset(1, abort.clone());
        let s = schema();
        full.put(row(&s, 1)).await.unwrap();

        let put = {
            let full = full.clone();
            let s = s.clone();
            tokio::spawn(async move { full.put(row(&s, 2)).await })
        };
        let get = {
            let empty = empty.clone();
            tokio::spawn(async move { empty.get().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        abort.cancel();

        assert_eq!(put.await.unwrap().unwrap(), PutOutcome::Stopped);
        assert_eq!(get.await.unwrap(), Fetched::Stopped);
    }

    #[tokio::test]
    async fn mark_done_is_idempotent_and_rejects_late_puts() {
        let rs = rowset(2, CancellationToken::new());
        let s = schema();
        rs.put(row(&s, 1)).await.unwrap();
        rs.mark_done();
        rs.mark_done();
        assert!(rs.is_done());

        assert!(matches!(
            rs.put(row(&s, 2)).await,
            Err(RowSetError::AlreadyDone(_))
        ));
        assert_eq!(id_of(rs.get().await), 1);
        assert_eq!(rs.get().await, Fetched::EndOfStream);
    }

    #[tokio::test]
    async fn closed_consumer_releases_producer() {
        let rs = rowset(1, CancellationToken::new());
        let s = schema();
        rs.put(row(&s, 1)).await.unwrap();

        let put = {
            let rs = rs.clone();
            let s = s.clone();
            tokio::spawn(async move { rs.put(row(&s, 2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        rs.close().await;

        assert_eq!(put.await.unwrap().unwrap(), PutOutcome::Closed);
        assert!(rs.is_empty());
    }

    #[tokio::test]
    async fn timed_and_non_blocking_reads() {
        let rs = rowset(2, CancellationToken::new());
        assert_eq!(rs.try_get(), Fetched::Pending);
        assert_eq!(
            rs.get_timeout(Duration::from_millis(10)).await,
            Fetched::Pending
        );

        let s = schema();
        rs.put(row(&s, 7)).await.unwrap();
        assert_eq!(id_of(rs.try_get()), 7);
    }

    #[tokio::test]
    async fn rejects_rows_of_a_different_shape() {
        let rs = rowset(2, CancellationToken::new());
        rs.put(row(&schema(), 1)).await.unwrap();

        let other = Schema::new(vec![Field::new("name", DataType::String)])
            .unwrap()
            .into_ref();
        let odd = Row::new(other, vec![Value::String("x".into())]).unwrap();
        assert!(matches!(
            rs.put(odd).await,
            Err(RowSetError::SchemaMismatch(_))
        ));
    }
}
