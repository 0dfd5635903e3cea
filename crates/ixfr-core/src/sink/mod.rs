// # Delta Sinks
//
// Implementations of the DeltaSink trait.
//
// - `JsonLinesSink`: append-only JSON lines file, readable by the report tool
// - `TracingSink`: structured log events
// - `ChannelSink`: bounded channel to the embedding program
// - `MqttSink`: one MQTT message per changed record
// - `FanoutSink`: several of the above at once

pub mod channel;
pub mod fanout;
pub mod json_lines;
pub mod mqtt;
pub mod tracing_sink;

pub use channel::{ChannelSink, SinkMessage};
pub use fanout::FanoutSink;
pub use json_lines::{ChangeLine, FailureLine, JsonLinesSink, LogLine, SummaryLine};
pub use mqtt::{MqttSink, PublishedChange};
pub use tracing_sink::TracingSink;
