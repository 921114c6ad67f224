// palaver-common: shared types and utilities for the Palaver workspace

pub mod event;
pub mod protocol;
