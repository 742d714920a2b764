//! # Image Derivatives
//!
//! On-demand crops and resizes of stored originals. Every original is stored
//! once under a random content hash; every derivative is a named
//! `(size, aspect)` variant of it, built the first time it is requested and
//! cached on disk under a deterministic, sharded path.
//!
//! # Architecture
//!
//! ```text
//! request path ─▶ paths::parse_request_path ─▶ repository lookup
//!                                                   │
//!               presets ─▶ imaging::plan_derivative ◀┘
//!                                   │
//!                      ImageBackend::render (still or per frame)
//!                                   │
//!                  atomic write ─▶ response::Response
//! ```
//!
//! The manager decides *what* to build; the backend only executes a list of
//! [`imaging::Operation`]s. Planning is pure arithmetic, so the geometry is
//! tested without decoding a single pixel, and the manager is tested against
//! a recording mock backend.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | `config.toml` loading, validation, merging onto stock defaults |
//! | [`model`] | Records and presets shared with the repository |
//! | [`presets`] | Lazily loaded aspect and size catalogs |
//! | [`paths`] | Sharded file naming, URLs, request-path parsing |
//! | [`imaging`] | Crop/resize planner, codec backend trait, `image`-crate backend, placeholders |
//! | [`repository`] | Persistence contract plus in-memory and JSON-file implementations |
//! | [`manager`] | Derivative generation and the ingest/clone/crop/rotate/delete lifecycle |
//! | [`response`] | Generator result mapped to body-or-file plus content type |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Hash-Addressed, Sharded Layout
//!
//! File names are `{hash}_{size}_{aspect}.{type}` below one directory per
//! shard level (`2:8` by default). The name alone is unique; shards only bound
//! directory sizes. Because the layout is deterministic, any static file server
//! can serve cached derivatives and only misses reach [`manager`].
//!
//! ## Still vs. Animated
//!
//! Animated GIFs run the same operation list as stills, applied to every frame
//! with frame delays and infinite looping preserved. The choice is made once
//! per call from the record's `animated` flag.
//!
//! ## Placeholders Never Touch Disk
//!
//! With `mock_image` enabled, missing originals render a blank image of the
//! right type. Those renders are returned in memory and never cached, so a
//! development checkout cannot poison the derivative cache.

pub mod config;
pub mod imaging;
pub mod manager;
pub mod model;
pub mod output;
pub mod paths;
pub mod presets;
pub mod repository;
pub mod response;
