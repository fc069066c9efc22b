//! Acknowledgement routing
//!
//! A consumer reads from its primary input and from the retry handler's input
//! at the same time. Every consumed message remembers which input it came from
//! so that acknowledgements reach the backend that delivered it.

use messaging::{AcknowledgeableInput, Input, Message};
use std::sync::Arc;
use tracing::error;

/// An input together with its optional acknowledgement capability.
#[derive(Clone)]
pub struct ConsumerInput {
    input: Arc<dyn Input>,
    acknowledger: Option<Arc<dyn AcknowledgeableInput>>,
}

impl ConsumerInput {
    /// Input without acknowledgement support.
    pub fn new(input: Arc<dyn Input>) -> Self {
        Self {
            input,
            acknowledger: None,
        }
    }

    /// Input whose consumed messages are acknowledged back to it.
    pub fn acknowledgeable<T>(input: Arc<T>) -> Self
    where
        T: Input + AcknowledgeableInput + 'static,
    {
        Self {
            input: input.clone(),
            acknowledger: Some(input),
        }
    }

    pub fn input(&self) -> &Arc<dyn Input> {
        &self.input
    }

    pub fn acknowledger(&self) -> Option<&Arc<dyn AcknowledgeableInput>> {
        self.acknowledger.as_ref()
    }

    /// True if both values wrap the same input instance.
    pub fn same_input(&self, other: &ConsumerInput) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.input), Arc::as_ptr(&other.input))
    }
}

/// Which source a consumed message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Source {
    Input,
    Retry,
}

/// A consumed message bound to the input that delivered it.
#[derive(Clone)]
pub struct ConsumerData {
    pub msg: Message,
    pub src: Source,
    pub input: ConsumerInput,
    /// Constituent of an aggregate. Only the aggregate itself is acknowledged.
    pub aggregated: bool,
}

impl ConsumerData {
    pub fn new(msg: Message, src: Source, input: ConsumerInput) -> Self {
        Self {
            msg,
            src,
            input,
            aggregated: false,
        }
    }

    /// Constituent of this aggregate, sharing its source.
    pub fn constituent(&self, msg: Message) -> Self {
        Self {
            msg,
            src: self.src,
            input: self.input.clone(),
            aggregated: true,
        }
    }
}

/// Sends ack decisions back to the originating inputs.
#[derive(Debug, Clone)]
pub struct Acknowledger {
    consumer: String,
}

impl Acknowledger {
    pub fn new(consumer: impl Into<String>) -> Self {
        Self {
            consumer: consumer.into(),
        }
    }

    pub async fn acknowledge(&self, data: &ConsumerData, ack: bool) {
        if data.aggregated {
            return;
        }

        let Some(acknowledger) = data.input.acknowledger() else {
            return;
        };

        if let Err(e) = acknowledger.ack(&data.msg, ack).await {
            error!(
                consumer = %self.consumer,
                source = %data.src,
                ack,
                error = %e,
                "could not acknowledge the message"
            );
        }
    }

    /// Acknowledge a batch with one `ack_batch` call per originating input.
    ///
    /// `acks[i]` is the decision for `batch[i]`; missing decisions count as nacks.
    pub async fn acknowledge_batch(&self, batch: &[ConsumerData], acks: &[bool]) {
        let mut groups: Vec<(ConsumerInput, Vec<Message>, Vec<bool>)> = Vec::new();

        for (i, data) in batch.iter().enumerate() {
            if data.aggregated || data.input.acknowledger().is_none() {
                continue;
            }

            let ack = acks.get(i).copied().unwrap_or(false);

            match groups.iter_mut().find(|(input, _, _)| input.same_input(&data.input)) {
                Some((_, msgs, decisions)) => {
                    msgs.push(data.msg.clone());
                    decisions.push(ack);
                }
                None => groups.push((data.input.clone(), vec![data.msg.clone()], vec![ack])),
            }
        }

        for (input, msgs, decisions) in groups {
            let Some(acknowledger) = input.acknowledger() else {
                continue;
            };

            if let Err(e) = acknowledger.ack_batch(&msgs, &decisions).await {
                error!(
                    consumer = %self.consumer,
                    batch_size = msgs.len(),
                    error = %e,
                    "could not acknowledge the batch"
                );
            }
        }
    }
}
