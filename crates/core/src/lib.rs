//! Core scanning and analysis pipeline for soft-liquidation positions.
//!
//! Per network: resolve a date window to blocks, walk the range in adaptive
//! chunks, normalize controller logs into domain events, and reconstruct
//! per-borrower position epochs (open, soft-liquidated, closed, reopened).
//! The output is a [`report::NetworkReport`] serialized to JSON and CSV.

pub mod analyzer;
pub mod config;
pub mod epoch;
pub mod report;
pub mod runner;
pub mod scanner;
pub mod u256_math;

pub use analyzer::{AnalysisResult, PositionLifecycleAnalyzer};
pub use config::{ControllerDescriptor, NetworkDescriptor, ScanTargets};
pub use epoch::PositionEpoch;
pub use report::{NetworkReport, ReportSummary, SkippedController};
pub use runner::NetworkRunner;
pub use scanner::{CancelFlag, ChunkedLogScanner, PartialScanResult, ScannerConfig};
