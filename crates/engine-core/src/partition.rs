use crate::error::PartitionError;
use model::{
    core::{schema::SchemaRef, value::Value},
    graph::{assignment::PartitionRange, definition::Distribution},
    records::row::Row,
};
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64;

/// Which of a hop's RowSets a row goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    One(usize),
    /// The row belongs to a partition owned by another worker.
    Skip,
}

/// Picks output RowSets for one outgoing hop of one producer copy.
#[derive(Debug)]
pub struct Partitioner {
    targets: usize,
    mode: Mode,
}

#[derive(Debug)]
enum Mode {
    CopyToAll,
    RoundRobin {
        next: usize,
    },
    Keyed {
        fields: Vec<String>,
        resolved: Option<(SchemaRef, Vec<usize>)>,
        window: Option<PartitionRange>,
    },
}

impl Partitioner {
    /// `targets` is the number of RowSets this producer copy has on the hop.
    /// For keyed hops, `window` restricts this copy to a slice of the
    /// cluster-wide partitions.
    pub fn new(distribution: &Distribution, targets: usize, window: Option<PartitionRange>) -> Self {
        let mode = match distribution {
            Distribution::CopyToAll => Mode::CopyToAll,
            Distribution::RoundRobin => Mode::RoundRobin { next: 0 },
            Distribution::KeyPartitioned { fields } => Mode::Keyed {
                fields: fields.clone(),
                resolved: None,
                window,
            },
        };
        Self { targets, mode }
    }

    pub fn targets(&self) -> usize {
        self.targets
    }

    pub fn select(&mut self, row: &Row) -> Result<Target, PartitionError> {
        if self.targets == 0 {
            return Ok(Target::Skip);
        }

        match &mut self.mode {
            Mode::CopyToAll => Ok(Target::All),
            Mode::RoundRobin { next } => {
                let chosen = *next;
                *next = (chosen + 1) % self.targets;
                Ok(Target::One(chosen))
            }
            Mode::Keyed {
                fields,
                resolved,
                window,
            } => {
                let indexes = key_indexes(resolved, fields.as_slice(), row.schema())?;
                let key: Vec<&Value> = indexes
                    .iter()
                    .filter_map(|&i| row.get(i))
                    .collect();

                match window {
                    Some(range) => {
                        let p = partition_of(&key, range.total);
                        if range.contains(p) {
                            Ok(Target::One((p - range.start) as usize))
                        } else {
                            Ok(Target::Skip)
                        }
                    }
                    None => Ok(Target::One(partition_of(&key, self.targets as u32) as usize)),
                }
            }
        }
    }
}

fn key_indexes<'a>(
    resolved: &'a mut Option<(SchemaRef, Vec<usize>)>,
    fields: &[String],
    schema: &SchemaRef,
) -> Result<&'a [usize], PartitionError> {
    let stale = match resolved {
        Some((cached, _)) => !Arc::ptr_eq(cached, schema),
        None => true,
    };
    if stale {
        let indexes = fields
            .iter()
            .map(|f| {
                schema
                    .index_of(f)
                    .ok_or_else(|| PartitionError::MissingKeyField(f.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        *resolved = Some((schema.clone(), indexes));
    }
    Ok(resolved.as_ref().map(|(_, ix)| ix.as_slice()).unwrap_or(&[]))
}

/// Maps a key to a partition in `[0, partitions)`.
///
/// A single integer key maps to itself modulo `partitions`; anything else is
/// hashed with xxh3 over a type-tagged encoding. Pure: the same key and
/// partition count always give the same answer.
pub fn partition_of(key: &[&Value], partitions: u32) -> u32 {
    if partitions <= 1 {
        return 0;
    }
    if let [Value::Int(v)] = key {
        return v.rem_euclid(i64::from(partitions)) as u32;
    }
    (xxh3_64(&key_bytes(key)) % u64::from(partitions)) as u32
}

fn key_bytes(key: &[&Value]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key.len() * 9);
    for value in key {
        match value {
            Value::Int(v) => {
                buf.push(1);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::Float(v) => {
                buf.push(2);
                buf.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            Value::String(s) => {
                buf.push(3);
                buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            Value::Boolean(b) => {
                buf.push(4);
                buf.push(u8::from(*b));
            }
            Value::Bytes(b) => {
                buf.push(5);
                buf.extend_from_slice(&(b.len() as u64).to_le_bytes());
                buf.extend_from_slice(b);
            }
            Value::Date(d) => {
                buf.push(6);
                buf.extend_from_slice(d.format("%Y-%m-%d").to_string().as_bytes());
            }
            Value::Timestamp(ts) => {
                buf.push(7);
                buf.extend_from_slice(&ts.timestamp_micros().to_le_bytes());
            }
            Value::Null => buf.push(0),
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::core::{
        data_type::DataType,
        schema::{Field, Schema},
    };

    fn rows(ids: &[i64]) -> Vec<Row> {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Integer),
            Field::new("name", DataType::String),
        ])
        .unwrap()
        .into_ref();
        ids.iter()
            .map(|id| {
                Row::new(
                    schema.clone(),
                    vec![Value::Int(*id), Value::String(format!("n{id}"))],
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn integer_keys_partition_by_modulo() {
        let mut p = Partitioner::new(
            &Distribution::KeyPartitioned {
                fields: vec!["id".into()],
            },
            2,
            None,
        );
        let chosen: Vec<Target> = rows(&[1, 2, 3, 4])
            .iter()
            .map(|r| p.select(r).unwrap())
            .collect();
        assert_eq!(
            chosen,
            vec![Target::One(1), Target::One(0), Target::One(1), Target::One(0)]
        );
        assert_eq!(partition_of(&[&Value::Int(-3)], 2), 1);
    }

    #[test]
    fn keyed_selection_is_deterministic() {
        let key = [&Value::String("customer-42".into()), &Value::Int(7)];
        let first = partition_of(&key, 5);
        for _ in 0..100 {
            assert_eq!(partition_of(&key, 5), first);
        }
        assert!(first < 5);
    }

    #[test]
    fn round_robin_visits_every_target_once_per_window() {
        let mut p = Partitioner::new(&Distribution::RoundRobin, 3, None);
        let picked: Vec<Target> = rows(&[1, 2, 3, 4, 5, 6, 7])
            .iter()
            .map(|r| p.select(r).unwrap())
            .collect();

        for window in picked.windows(3) {
            let mut seen: Vec<usize> = window
                .iter()
                .map(|t| match t {
                    Target::One(i) => *i,
                    other => panic!("unexpected {other:?}"),
                })
                .collect();
            seen.sort_unstable();
            assert_eq!(seen, vec![0, 1, 2]);
        }
    }

    #[test]
    fn missing_key_field_is_an_error() {
        let mut p = Partitioner::new(
            &Distribution::KeyPartitioned {
                fields: vec!["region".into()],
            },
            2,
            None,
        );
        assert_eq!(
            p.select(&rows(&[1])[0]).unwrap_err(),
            PartitionError::MissingKeyField("region".into())
        );
    }

    #[test]
    fn window_keeps_only_owned_partitions() {
        let window = PartitionRange {
            start: 2,
            end: 4,
            total: 4,
        };
        let mut p = Partitioner::new(
            &Distribution::KeyPartitioned {
                fields: vec!["id".into()],
            },
            2,
            Some(window),
        );
        let chosen: Vec<Target> = rows(&[1, 2, 3, 4, 6])
            .iter()
            .map(|r| p.select(r).unwrap())
            .collect();
        assert_eq!(
            chosen,
            vec![
                Target::Skip,
                Target::One(0),
                Target::One(1),
                Target::Skip,
                Target::One(0)
            ]
        );
    }

    #[test]
    fn copy_to_all_targets_everything() {
        let mut p = Partitioner::new(&Distribution::CopyToAll, 4, None);
        assert_eq!(p.select(&rows(&[1])[0]).unwrap(), Target::All);
    }
}
