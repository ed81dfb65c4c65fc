//! # DocVault
//!
//! A document integrity and recovery engine.
//!
//! DocVault stores document content in two tiers (a primary object store
//! and a local cache), tracks a SHA-256 checksum and an immutable version
//! ledger for every document, and detects and repairs missing or corrupted
//! content automatically. Corrupt bytes are never served: every read can be
//! digest-audited and fails closed on mismatch.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌───────────────┐
//! │   CLI    │──▶│    Gateway     │──▶│ Primary (S3/FS)│
//! │   (dv)   │   │ verify + route │   ├───────────────┤
//! └──────────┘   └──────┬────────┘   │ Cache (local) │
//! ┌──────────┐          │            └───────────────┘
//! │   HTTP   │──────────┤
//! └──────────┘          ▼
//!                ┌─────────────┐
//!                │   SQLite    │  versions · events · retry queue
//!                └──────┬──────┘
//!                       ▼
//!                ┌─────────────┐
//!                │  Recovery   │  refetch · restore · backoff
//!                └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dv init                        # create the metadata store
//! dv commit report.pdf           # store version 1
//! dv commit report.pdf --document <id>   # append a version
//! dv verify                      # digest-check everything
//! dv scan                        # flag and enqueue broken documents
//! dv retry process               # run due recovery attempts
//! dv report --csv                # fleet health as CSV
//! dv serve                       # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Engine error taxonomy |
//! | [`tier`] | Storage tier trait |
//! | [`tier_fs`] | Local-directory tier backend |
//! | [`tier_s3`] | S3-compatible tier backend |
//! | [`gateway`] | Tiered reads and writes, fail-closed audit |
//! | [`checksum`] | SHA-256 verification |
//! | [`versions`] | Immutable version ledger |
//! | [`locks`] | Per-document single-flight locks |
//! | [`recovery`] | Scan, repair, and retry queue |
//! | [`audit`] | Append-only event log |
//! | [`report`] | Health snapshots and CSV export |
//! | [`server`] | JSON HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod audit;
pub mod checksum;
pub mod config;
pub mod db;
pub mod documents;
pub mod error;
pub mod gateway;
pub mod locks;
pub mod migrate;
pub mod models;
pub mod recovery;
pub mod report;
pub mod server;
pub mod tier;
pub mod tier_fs;
pub mod tier_s3;
pub mod versions;
