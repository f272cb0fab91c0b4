mod event;
mod holding;
mod id;
mod quote;

pub use event::{EntityKey, UpdateEvent};
pub use holding::HoldingRecord;
pub use id::Id;
pub use quote::{MarketState, Quote};
