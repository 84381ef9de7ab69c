//! contextdocs: a two-tier cache for library documentation fetched to enrich
//! coding-assistant prompts.

pub mod cache;
pub mod config;
pub mod error;
pub mod infra;
