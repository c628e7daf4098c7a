//! Background Tasks Module
//!
//! Contains the background task that removes expired entries.
//!
//! # Tasks
//! - Sweeper: sleeps until the next item is due, then removes what expired

mod sweeper;

pub(crate) use sweeper::{spawn_sweeper, SweeperControl};
