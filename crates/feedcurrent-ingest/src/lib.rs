pub mod batch_writer;
pub mod consumer;
pub mod source;
pub mod stats;

pub use batch_writer::BatchWriter;
pub use consumer::StreamConsumer;
pub use source::{
    Action, BlockDecoder, CommitMessage, DecodeError, FirehoseMessage, FirehoseSource,
    JsonMapBlockDecoder, NullFirehoseSource, Op,
};
pub use stats::{ConsumerStats, StatsSnapshot};

pub const LOG_TARGET: &str = "feedcurrent::ingest";
