pub mod api;
pub mod history;
pub mod parser;

pub use api::{abort_channel, AbortHandle, ClientError, QueryClient, StreamCallbacks};
pub use history::{HistoryEntry, HistoryRepository, MemoryHistory};
pub use parser::{ParseEvent, ParsePhase, StreamParser};
