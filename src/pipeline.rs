//! Observation pipeline: block polling, chunk fetching, the delay queue and the
//! transaction workers that resolve candidates into confirmed messages.

pub mod backoff;
pub mod block_poller;
pub mod chunk_fetcher;
pub mod delay_queue;
pub mod event_reporter;
pub mod job;
pub mod observation;
pub mod tx_processor;


pub use backoff::RetryBackoff;
pub use block_poller::{BlockPoller, BlockPollerParams};
pub use chunk_fetcher::{ChunkFetcher, ChunkFetcherParams, ChunkOutcome, SharedChunkReceiver};
pub use delay_queue::DelayQueue;
pub use event_reporter::{event_channel, EventReporter, EventReporterParams, EventSender, WatcherEvent};
pub use job::{ChunkDescriptor, ProcessingJob};
pub use observation::{
    ObservationRequestError, ObservationRequestHandler, ObservationRequestHandlerParams,
};
pub use tx_processor::{TxOutcome, TxProcessor, TxProcessorParams};
