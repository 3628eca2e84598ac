use alloy::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{Address, B256},
    rpc::types::Filter,
};
use std::sync::Arc;

use super::abi::EventSpec;
use super::{codec, EventRecord, RawLog};
use crate::error::{BindError, Result};

/// What to look for: an event, a block range, and per indexed field the
/// accepted values (OR within a field, AND across fields).
#[derive(Debug, Clone, Default)]
pub struct LogFilterSpec {
    pub event: String,
    pub from_block: Option<u64>,
    /// Inclusive; `None` means up to the latest block
    pub to_block: Option<u64>,
    /// One entry per indexed field in declaration order. An empty entry
    /// matches anything; missing trailing entries are unconstrained.
    pub indexed: Vec<Vec<DynSolValue>>,
}

impl LogFilterSpec {
    pub fn new(event: &str) -> Self {
        Self {
            event: event.to_string(),
            ..Self::default()
        }
    }

    pub fn from_block(mut self, block: u64) -> Self {
        self.from_block = Some(block);
        self
    }

    pub fn to_block(mut self, block: u64) -> Self {
        self.to_block = Some(block);
        self
    }

    pub fn range(self, from: u64, to: u64) -> Self {
        self.from_block(from).to_block(to)
    }

    /// Constrain the next indexed field to any of `values`.
    pub fn indexed(mut self, values: Vec<DynSolValue>) -> Self {
        self.indexed.push(values);
        self
    }

    /// Leave the next indexed field unconstrained.
    pub fn any(mut self) -> Self {
        self.indexed.push(Vec::new());
        self
    }
}

/// Transport-level log filter: topic position `i` accepts any hash in
/// `topics[i]`, an empty set accepts anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub topics: Vec<Vec<B256>>,
}

impl LogQuery {
    pub fn build(address: Address, event: &EventSpec, spec: &LogFilterSpec) -> Result<Self> {
        if let (Some(from), Some(to)) = (spec.from_block, spec.to_block) {
            if from > to {
                return Err(BindError::Encoding(format!(
                    "invalid block range [{}, {}]",
                    from, to
                )));
            }
        }

        let indexed: Vec<_> = event.indexed_fields().collect();
        if spec.indexed.len() > indexed.len() {
            return Err(BindError::Encoding(format!(
                "event '{}' has {} indexed fields, got {} constraints",
                event.name,
                indexed.len(),
                spec.indexed.len()
            )));
        }

        let mut topics = Vec::with_capacity(spec.indexed.len() + 1);
        if !event.anonymous {
            topics.push(vec![event.selector]);
        }
        for (field, accepted) in indexed.iter().zip(&spec.indexed) {
            let set = accepted
                .iter()
                .map(|value| codec::encode_topic(&field.ty, value))
                .collect::<Result<Vec<_>>>()
                .map_err(|e| {
                    BindError::Encoding(format!("filter on '{}': {}", field.name, e))
                })?;
            topics.push(set);
        }
        while topics.last().is_some_and(|set| set.is_empty()) {
            topics.pop();
        }

        Ok(Self {
            address,
            from_block: spec.from_block,
            to_block: spec.to_block,
            topics,
        })
    }

    pub fn to_filter(&self) -> Filter {
        let mut filter = Filter::new().address(self.address);
        if let Some(from) = self.from_block {
            filter = filter.from_block(from);
        }
        if let Some(to) = self.to_block {
            filter = filter.to_block(to);
        }

        for (position, set) in self.topics.iter().enumerate() {
            if set.is_empty() {
                continue;
            }
            let set = set.clone();
            filter = match position {
                0 => filter.event_signature(set),
                1 => filter.topic1(set),
                2 => filter.topic2(set),
                _ => filter.topic3(set),
            };
        }
        filter
    }

    pub fn matches(&self, log: &RawLog) -> bool {
        if log.address != self.address {
            return false;
        }
        if self.from_block.is_some_and(|from| log.block_number < from) {
            return false;
        }
        if self.to_block.is_some_and(|to| log.block_number > to) {
            return false;
        }
        self.topics.iter().enumerate().all(|(position, set)| {
            set.is_empty()
                || log
                    .topics
                    .get(position)
                    .is_some_and(|topic| set.contains(topic))
        })
    }
}

/// Decodes raw logs of one event into `EventRecord`s.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    event: Arc<EventSpec>,
    body_types: Arc<Vec<DynSolType>>,
}

impl EventDecoder {
    pub fn new(event: EventSpec) -> Self {
        let body_types = event.body_types();
        Self {
            event: Arc::new(event),
            body_types: Arc::new(body_types),
        }
    }

    pub fn event(&self) -> &EventSpec {
        &self.event
    }

    /// Decode a log. A wrong signature topic, a topic count that does not
    /// match the indexed fields, or a short data section all fail the whole
    /// record.
    pub fn decode(&self, log: &RawLog) -> Result<EventRecord> {
        let event = &*self.event;
        let topics = if event.anonymous {
            &log.topics[..]
        } else {
            match log.topics.first() {
                Some(topic) if *topic == event.selector => &log.topics[1..],
                Some(topic) => {
                    return Err(BindError::Decoding(format!(
                        "event signature mismatch for '{}': log topic 0x{:x}",
                        event.name, topic
                    )))
                }
                None => {
                    return Err(BindError::Decoding(format!(
                        "log for '{}' has no topics",
                        event.name
                    )))
                }
            }
        };

        let indexed_count = event.indexed_fields().count();
        if topics.len() != indexed_count {
            return Err(BindError::Decoding(format!(
                "event '{}' expects {} indexed topics, log has {}",
                event.name,
                indexed_count,
                topics.len()
            )));
        }

        let body = codec::decode_values(&log.data, &self.body_types)
            .map_err(|e| BindError::Decoding(format!("event '{}' data: {}", event.name, e)))?;

        let mut topic_values = topics.iter();
        let mut body_values = body.into_iter();
        let mut fields = Vec::with_capacity(event.fields.len());
        for field in &event.fields {
            let value = if field.indexed {
                let topic = topic_values
                    .next()
                    .ok_or_else(|| BindError::Decoding("missing indexed topic".into()))?;
                codec::decode_topic(&field.ty, topic)?
            } else {
                body_values
                    .next()
                    .ok_or_else(|| BindError::Decoding("missing event data field".into()))?
            };
            fields.push((field.name.clone(), value));
        }

        Ok(EventRecord {
            event: event.name.clone(),
            fields,
            raw: log.clone(),
        })
    }
}
