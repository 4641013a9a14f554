//! Ingestion pipeline: a bounded MPSC queue drained by a batching consumer.

// Re-export public types
pub use self::consumer::{
    Consumer, ConsumerConfig, ConsumerMetrics, ConsumerState, DeadLetter, ErrorStrategy, LogFn,
    LogLevel,
};
pub use self::queue::{EnqueueError, QueueCallbacks, SwappedBuffer, WriteQueue};

pub mod consumer;
pub mod queue;
