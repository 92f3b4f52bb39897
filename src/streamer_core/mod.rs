pub mod buffer;
pub mod config;
pub mod ingestor;
pub mod trade_parser;
pub mod transport;

pub use buffer::IngestionBuffer;
pub use config::{BufferConfig, ConfigError, RuntimeConfig};
pub use ingestor::{
    IngestError, IngestionSummary, IngestorConfig, IngestorHandle, IngestorState, StreamIngestor,
};
pub use trade_parser::{parse_trade_message, ParseError};
pub use transport::{Connector, MessageStream, TransportError, WsConnector};
