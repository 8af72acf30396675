//! `herald-store` — transactional persistence for broadcast campaigns and
//! their outbox rows.
//!
//! # Overview
//!
//! A campaign is authored as `draft`, queued by an operator, lifted by the
//! worker (which materializes one outbox row per recipient), dispatched in
//! leased batches, and finally completed once no deliverable rows remain.
//! All state lives in two SQLite tables; every mutation that touches both a
//! row and its campaign runs in one transaction so counters never drift
//! from row states.
//!
//! The store is safe under concurrent gateway handlers and a worker tick
//! racing each other: row leases (`locked_until`) gate re-claims, and the
//! completion check is a single conditional UPDATE.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::{CampaignStore, CLAIM_LEASE_SECS, MAX_ERROR_LEN};
pub use types::{
    AdminAction, AudienceType, Campaign, CampaignPatch, CampaignStatus, ClaimedMessage,
    MessageStatus, NewCampaign, OutboxMessage,
};
