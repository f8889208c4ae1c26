//! # Domain Models
//!
//! These structs represent the core entities of a wishboard.
//! Boards and items use UUID v7 for time-ordered identification; approval
//! records are keyed by their `(item, client)` natural key.

mod board;
mod clap;
mod item;
mod viewer;

pub use board::{Board, BoardGate, BoardView};
pub use clap::ApprovalRecord;
pub use item::{Item, ItemPatch, NewItem, Starter, IDEA_MAX_CHARS, WHO_MAX_CHARS};
pub use viewer::{Viewer, ViewerRole};
