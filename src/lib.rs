pub mod app;
pub mod comet;
pub mod config;
pub mod copy;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod layout;
pub mod output;
pub mod replay;
pub mod store;
