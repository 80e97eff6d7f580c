//! JUnit result file scanning.
//!
//! A result file name encodes who ran what where:
//! `<hypervisor key>-[smoke-]<owner>-<id>.xml`. The body is a JUnit
//! document with `kernel.version` / `firmware.version` properties.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kbot_shared::{KbotError, Result, TestFileMeta, TestType};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, info, instrument};

/// Extension of result files.
pub const RESULT_EXTENSION: &str = ".xml";

/// Token marking a smoke run in a result file name.
const SMOKE_TOKEN: &str = "smoke";

const KERNEL_PROPERTY: &str = "kernel.version";
const FIRMWARE_PROPERTY: &str = "firmware.version";

/// Failure messages read `Test <case> Failed.`
const FAILURE_PREFIX_LEN: usize = 5;
const FAILURE_SUFFIX_LEN: usize = 8;

// ---------------------------------------------------------------------------
// File names
// ---------------------------------------------------------------------------

/// What a result file name says about the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameMeta {
    pub id: String,
    pub owner: String,
    pub test_type: TestType,
    /// Display name when the key is known, otherwise the raw key.
    pub hv: String,
}

/// Parse a result file stem (name without extension).
///
/// The last token is the id and the one before it the owner. A `smoke` token
/// marks a smoke run whose hypervisor key is everything before the last three
/// tokens; otherwise everything before the last two.
pub fn parse_file_name(stem: &str, hypervisors: &BTreeMap<String, String>) -> Result<FileNameMeta> {
    let tokens: Vec<&str> = stem.split('-').collect();
    let [.., owner, id] = tokens.as_slice() else {
        return Err(KbotError::parse(format!(
            "result file name {stem:?} needs at least an owner and an id"
        )));
    };

    let (test_type, keep) = if tokens.contains(&SMOKE_TOKEN) {
        (TestType::Smoke, tokens.len().saturating_sub(3))
    } else {
        (TestType::Functional, tokens.len() - 2)
    };
    let key = tokens[..keep].join("-");
    let hv = hypervisors.get(&key).cloned().unwrap_or(key);

    Ok(FileNameMeta {
        id: id.to_string(),
        owner: owner.to_string(),
        test_type,
        hv,
    })
}

// ---------------------------------------------------------------------------
// File contents
// ---------------------------------------------------------------------------

/// What a result file body says about the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultContents {
    pub kernel: Option<String>,
    pub firmware: Option<String>,
    pub total: usize,
    pub failed_cases: Vec<String>,
}

/// Case name from a failure message such as `Test CDmount Failed.`
pub fn failure_case_name(message: &str) -> String {
    let chars: Vec<char> = message.chars().collect();
    let end = chars.len().saturating_sub(FAILURE_SUFFIX_LEN);
    if end <= FAILURE_PREFIX_LEN {
        return String::new();
    }
    chars[FAILURE_PREFIX_LEN..end].iter().collect()
}

/// Element path below the test suite, or `None` outside any suite.
///
/// The suite is the document root, or each `<testsuite>` child of a
/// `<testsuites>` root.
fn suite_relative(path: &[String]) -> Option<&[String]> {
    match path {
        [root, suite, rest @ ..] if root == "testsuites" && suite == "testsuite" => Some(rest),
        [root, ..] if root == "testsuites" => None,
        [_, rest @ ..] => Some(rest),
        [] => None,
    }
}

fn is_property(path: &[String]) -> bool {
    matches!(suite_relative(path), Some([a, b]) if a == "properties" && b == "property")
}

fn is_failure(path: &[String]) -> bool {
    matches!(suite_relative(path), Some([a, b]) if a == "testcase" && b == "failure")
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

/// Collect properties, case count, and failed case names from a JUnit document.
pub fn parse_results(xml: &str) -> Result<ResultContents> {
    let mut reader = Reader::from_str(xml);
    let mut contents = ResultContents::default();
    let mut path: Vec<String> = Vec::new();
    // Text of the <failure> element currently open, with its depth.
    let mut failure: Option<(usize, String)> = None;
    let mut saw_root = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| KbotError::parse(format!("invalid XML: {e}")))?;
        match event {
            Event::Start(start) => {
                saw_root = true;
                path.push(local_name(&start));
                visit(&start, &path, &mut contents)?;
                if is_failure(&path) {
                    failure = Some((path.len(), String::new()));
                }
            }
            Event::Empty(start) => {
                saw_root = true;
                path.push(local_name(&start));
                visit(&start, &path, &mut contents)?;
                if is_failure(&path) {
                    contents.failed_cases.push(failure_case_name(""));
                }
                path.pop();
            }
            Event::Text(text) => {
                if let Some((depth, buf)) = failure.as_mut() {
                    if *depth == path.len() {
                        let text = text
                            .unescape()
                            .map_err(|e| KbotError::parse(format!("bad failure text: {e}")))?;
                        buf.push_str(&text);
                    }
                }
            }
            Event::CData(data) => {
                if let Some((depth, buf)) = failure.as_mut() {
                    if *depth == path.len() {
                        buf.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
            }
            Event::End(_) => {
                if failure.as_ref().is_some_and(|(depth, _)| *depth == path.len()) {
                    if let Some((_, message)) = failure.take() {
                        contents.failed_cases.push(failure_case_name(&message));
                    }
                }
                path.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(KbotError::parse("result file has no root element"));
    }
    if !path.is_empty() {
        return Err(KbotError::parse("result file is truncated"));
    }

    Ok(contents)
}

/// Handle an opening (or self-closing) element at `path`.
fn visit(start: &BytesStart<'_>, path: &[String], contents: &mut ResultContents) -> Result<()> {
    if path.last().is_some_and(|name| name == "testcase") {
        contents.total += 1;
    }

    if is_property(path) {
        let mut name = None;
        let mut value = None;
        for attr in start.attributes() {
            let attr = attr.map_err(|e| KbotError::parse(format!("bad attribute: {e}")))?;
            let text = attr
                .unescape_value()
                .map_err(|e| KbotError::parse(format!("bad attribute value: {e}")))?
                .into_owned();
            match attr.key.local_name().as_ref() {
                b"name" => name = Some(text),
                b"value" => value = Some(text),
                _ => {}
            }
        }
        match name.as_deref() {
            Some(KERNEL_PROPERTY) => contents.kernel = value,
            Some(FIRMWARE_PROPERTY) => contents.firmware = value,
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Directory scan
// ---------------------------------------------------------------------------

/// Parse one result file into its metadata.
pub fn parse_result_file(path: &Path, hypervisors: &BTreeMap<String, String>) -> Result<TestFileMeta> {
    let malformed = |e: KbotError| match e {
        KbotError::Parse { message } => KbotError::MalformedResult {
            path: path.to_path_buf(),
            message,
        },
        other => other,
    };

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = parse_file_name(&stem, hypervisors).map_err(malformed)?;

    let xml = std::fs::read_to_string(path).map_err(|e| KbotError::io(path, e))?;
    let contents = parse_results(&xml).map_err(malformed)?;

    Ok(TestFileMeta {
        id: name.id,
        owner: name.owner,
        test_type: name.test_type,
        hv: name.hv,
        kernel: contents.kernel,
        firmware: contents.firmware,
        total: contents.total,
        total_failed: contents.failed_cases.len(),
        failed_cases: contents.failed_cases,
    })
}

/// Result files directly inside `dir`, sorted by name.
pub fn result_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| KbotError::io(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| KbotError::io(dir, e))?;
        let path = entry.path();
        let is_result = path.is_file()
            && path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().ends_with(RESULT_EXTENSION));
        if is_result {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Scan `dir` for result files and parse each one.
#[instrument(skip(hypervisors), fields(dir = %dir.display()))]
pub fn scan(dir: &Path, hypervisors: &BTreeMap<String, String>) -> Result<Vec<TestFileMeta>> {
    let files = result_files(dir)?;
    info!(?files, "JUnit XML files");

    files
        .iter()
        .map(|file| {
            let meta = parse_result_file(file, hypervisors)?;
            debug!(?meta, "test info");
            Ok(meta)
        })
        .collect()
}
