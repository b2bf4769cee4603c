pub mod progress;

pub use progress::{
    format_bytes, format_speed, ProgressReader, ProgressSink, TracingProgressSink, TransferProgress,
};
