//! wishboard/crates/services/src/lib.rs
//!
//! The real-time synchronization core: mutation services, the approval
//! dedup ledger and the per-board broadcast hub.

pub mod approvals;
pub mod boards;
pub mod broadcast;
pub mod items;

pub use approvals::ClapLedger;
pub use boards::BoardService;
pub use broadcast::{BoardTurn, BroadcastHub, ChannelId, Subscription};
pub use items::ItemService;
