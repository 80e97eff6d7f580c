//! Test-result reporting: parse JUnit-style result files, compose the
//! owner report, and deliver it over SMTP.
//!
//! The flow is `junit::scan` → `compose::compose` → `mail::build_message` →
//! `mail::send`.

pub mod compose;
pub mod junit;
pub mod mail;

pub use compose::{ComposeOptions, Report, compose};
pub use junit::{
    FileNameMeta, ResultContents, parse_file_name, parse_result_file, parse_results, result_files,
    scan,
};
pub use mail::{build_message, parse_relay, send};
