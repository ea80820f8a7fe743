//! Job-search mail tracker: syncs mailboxes, extracts job-search facts from
//! each message, and serves a dashboard over the stored records.

pub mod config;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod extraction;
pub mod llm;
pub mod mail;
mod models;
pub mod poller;
mod schema;
pub mod service;
pub mod store;
pub mod sync;

pub use service::JobMailService;
