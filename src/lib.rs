pub mod platform;
pub(crate) mod common;

pub mod store;

pub mod diag;
pub mod hexrec;
pub mod listing;

pub mod module;

pub mod builder;
pub mod worker;

pub mod cli;
