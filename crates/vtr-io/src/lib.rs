//! Output pipeline: `TimedBuffer`, the `Sink`/`Source` hierarchies, the
//! fan-in/fan-out `IoHub`, and the `Formatter`/`Substitutor`.

pub mod format;
pub mod hub;
pub mod sink;
pub mod source;
pub mod timed_buffer;

pub use format::{Formatter, Substitutor};
pub use hub::IoHub;
pub use sink::{BufSink, FdSink, FileSink, Observer, SharedSink, Sink};
pub use source::{FileSource, SocketSource, Source};
#[cfg(target_os = "linux")]
pub use source::KMsgSource;
pub use timed_buffer::{TimedBuffer, TimedLine};
