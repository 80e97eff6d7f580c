//! Flow orchestration for kbot.
//!
//! Ties the build client, downloader, and report crates into the two
//! end-to-end flows the binaries drive: fetching a kernel build's artifacts
//! and mailing a test report.

pub mod pipeline;

pub use pipeline::{
    FetchConfig, FetchResult, MailConfig, MailOutcome, fetch_kernel, send_report,
};
