//! Report composition: subject, body, and addressing for the owner email.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use kbot_shared::{KbotError, Result, TestFileMeta, TestType};
use regex::Regex;

/// Domain part of an address, including the `@`.
static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@[\w.]+").expect("domain regex"));

/// Placeholder for properties missing from a result file.
const MISSING: &str = "N/A";

/// A report ready to be mailed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub subject: String,
    pub body: String,
    pub from: String,
    pub to: String,
    pub cc: String,
}

/// Inputs that do not come from the result files.
#[derive(Debug, Clone)]
pub struct ComposeOptions<'a> {
    /// Sender address; also CC'd and the source of the recipient's domain.
    pub sender: &'a str,
    /// Prefix of the build task URL; the task id is appended.
    pub task_url: &'a str,
    /// Hypervisor platform code, looked up in `platforms`.
    pub platform_code: &'a str,
    /// Platform code to subject label.
    pub platforms: &'a BTreeMap<String, String>,
}

/// `PASS` when no case failed, `FAIL` otherwise.
pub fn verdict(meta: &TestFileMeta) -> &'static str {
    if meta.passed() { "PASS" } else { "FAIL" }
}

/// One numbered result block.
pub fn render_block(seq: usize, meta: &TestFileMeta) -> String {
    format!(
        "{seq}: {verdict}\n    Platform: {hv}\n    Firmware Type: {firmware}\n    \
         Total Cases: {total}\n    Total Failed Cases: {failed}\n    Failed Cases: {cases}\n",
        verdict = verdict(meta),
        hv = meta.hv,
        firmware = meta.firmware.as_deref().unwrap_or(MISSING),
        total = meta.total,
        failed = meta.total_failed,
        cases = meta.failed_cases.join(", "),
    )
}

/// All blocks of one test type, numbered from 1.
pub fn render_section(metadata: &[TestFileMeta], test_type: TestType) -> String {
    metadata
        .iter()
        .filter(|meta| meta.test_type == test_type)
        .enumerate()
        .fold(String::new(), |mut out, (i, meta)| {
            out.push_str(&render_block(i + 1, meta));
            out
        })
}

/// Owner address: the owner name at the sender's domain.
pub fn recipient(owner: &str, sender: &str) -> Result<String> {
    let domain = DOMAIN_RE.find(sender).ok_or_else(|| {
        KbotError::validation(format!("sender address {sender:?} has no domain"))
    })?;
    Ok(format!("{owner}{}", domain.as_str()))
}

/// Subject label for a hypervisor platform code.
pub fn platform_label<'a>(code: &str, platforms: &'a BTreeMap<String, String>) -> Result<&'a str> {
    platforms
        .get(code)
        .map(String::as_str)
        .ok_or_else(|| KbotError::UnknownHypervisorCode {
            code: code.to_string(),
        })
}

/// Compose the owner report. Owner, task id, and kernel come from the first entry.
pub fn compose(metadata: &[TestFileMeta], opts: &ComposeOptions<'_>) -> Result<Report> {
    let first = metadata.first().ok_or_else(|| KbotError::NoResults {
        path: Default::default(),
    })?;
    let kernel = first.kernel.as_deref().unwrap_or(MISSING);

    let body = format!(
        "Hey {owner},\n\n\
         Your brew task[1] compiled kernel {kernel} just triggered 3rd automation test.\n\n\
         Smoking Test Report:\n\
         {smoking}\n\
         Functional Test Report:\n\
         {functional}\n\
         If you need more help, feel free to contact us by sending email to \
         3rd-qe-list@redhat.com. Thanks for using 3rd QE downstream kernel CI.\n\n\
         [1] {task}{id}\n\
         [2] Some of the failed cases might not be caused by your code change.\n\n\n\
         Regards,\n\
         3rd QE Team",
        owner = first.owner,
        smoking = render_section(metadata, TestType::Smoke),
        functional = render_section(metadata, TestType::Functional),
        task = opts.task_url,
        id = first.id,
    );

    let label = platform_label(opts.platform_code, opts.platforms)?;

    Ok(Report {
        subject: format!("[3rd CI Report] {kernel} on {label}"),
        body,
        from: opts.sender.to_string(),
        to: recipient(&first.owner, opts.sender)?,
        cc: opts.sender.to_string(),
    })
}
