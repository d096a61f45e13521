//! # Notion Harness
//!
//! A page-hierarchy cache and multi-strategy search layer over a Notion
//! workspace, exposed to AI tools as MCP tools and a JSON HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │   Notion    │──▶│  PageCache  │──▶│ SearchEngine │
//! │ (Workspace) │   │ (hierarchy) │   │ api+path+body│
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                 ┌──────────┐         ┌──────────┐
//!                 │   CLI    │         │ MCP/HTTP │
//!                 └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export NOTION_TOKEN=secret_...
//! notion-harness refresh                 # build the hierarchy cache
//! notion-harness search "q4 planning"
//! notion-harness ask "what is the vpn setup?"
//! notion-harness serve stdio             # MCP server for Claude/Cursor
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Page records, remote objects, search hits |
//! | [`blocks`] | Content blocks and markdown conversion |
//! | [`remote`] | Workspace trait, Notion client, in-memory fake |
//! | [`hierarchy`] | Immutable hierarchy snapshots |
//! | [`cache`] | Snapshot lifecycle and single-flight rebuilds |
//! | [`scoring`] | Scoring policy and hit merging |
//! | [`classify`] | Content-search query classifier |
//! | [`search`] | Multi-strategy search engine |
//! | [`present`] | Result presentation |
//! | [`ask`] | Question answering with citations |
//! | [`write`] | Page creation and update |
//! | [`tools`] | Tool trait and registry |
//! | [`server`] | JSON HTTP transport |
//! | [`mcp`] | MCP stdio transport |

pub mod ask;
pub mod blocks;
pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod mcp;
pub mod models;
pub mod present;
pub mod remote;
pub mod scoring;
pub mod search;
pub mod server;
pub mod tools;
pub mod write;
