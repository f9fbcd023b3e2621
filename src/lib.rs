/// gridwx_service: hourly grid weather archive ingestion.
///
/// # Module structure
///
/// ```text
/// gridwx_service
/// ├── model       — shared data types (GridPoint, WeatherRecord, EgressNode, variable list)
/// ├── config      — service configuration loader (gridwx.toml)
/// ├── logging     — tracing subscriber setup
/// ├── db          — PostgreSQL connection and table validation
/// ├── grid        — grid CSV loader and point chunking
/// ├── windows     — calendar-year fetch windows, injectable clock
/// ├── ingest
/// │   ├── archive  — archive API: URL construction, failure classification, JSON decoding
/// │   ├── forecast — recent single-station samples
/// │   └── fixtures (test only) — representative API response payloads
/// ├── normalize   — columnar series → flat hourly records
/// ├── egress      — proxy controller discovery and egress rotation
/// ├── sink        — conflict-skip batch writes
/// ├── checkpoint  — optional resume state (--resume)
/// ├── pipeline    — fetch-retry state machine and the sequential run loop
/// └── stats       — ingestion coverage summary
/// ```

/// Public modules
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod egress;
pub mod grid;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod sink;
pub mod stats;
pub mod windows;
