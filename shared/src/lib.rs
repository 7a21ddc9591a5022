pub mod account;
pub mod events;
pub mod history;
pub mod location;
pub mod presence;

pub use account::*;
pub use events::*;
pub use history::{HistoryDebug, HistoryRange, HistoryResponse};
pub use location::*;
