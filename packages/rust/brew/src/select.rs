//! Pure selection and extraction rules over hub data.
//!
//! Everything here is lexical and side-effect free so the matching contracts
//! can be tested without a hub.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{Duration, NaiveDateTime};
use kbot_shared::{BugId, ChangelogEntry, KbotError, Result, SubTask};
use regex::Regex;

/// Changelog dates lag build start times (e.g. kernel-3.10.0-512.el7 was
/// logged on 2016-09-30 12:00:00 but started on 2016-10-01 03:27:46).
const CHANGELOG_LAG_DAYS: i64 = 3;

/// Layout of the `since` argument sent to `getChangelogEntries`.
pub const SINCE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Seven consecutive digits.
static BUG_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]{7}").expect("bug id regex"));

/// Architectures that ship on every target.
const ARCH_INDEPENDENT: &str = "noarch";

/// Earliest changelog date considered for a build started at `start_time`.
pub fn changelog_since(start_time: NaiveDateTime) -> NaiveDateTime {
    start_time - Duration::days(CHANGELOG_LAG_DAYS)
}

/// First entry dated at or after `since` whose author line mentions `version`.
pub fn select_changelog<'a>(
    entries: &'a [ChangelogEntry],
    version: &str,
    since: NaiveDateTime,
) -> Option<&'a ChangelogEntry> {
    entries
        .iter()
        .find(|entry| entry.date >= since && entry.author.contains(version))
}

/// Every non-overlapping run of seven digits in `text`.
pub fn extract_bug_ids(text: &str) -> BTreeSet<BugId> {
    BUG_ID_RE
        .find_iter(text)
        .map(|m| BugId(m.as_str().to_string()))
        .collect()
}

/// The single sub-task of `task_id` building for `arch`.
pub fn select_sub_task<'a>(task_id: i64, sub_tasks: &'a [SubTask], arch: &str) -> Result<&'a SubTask> {
    let mut matching = sub_tasks.iter().filter(|t| t.arch == arch);
    match (matching.next(), matching.count()) {
        (Some(task), 0) => Ok(task),
        (Some(_), rest) => Err(KbotError::AmbiguousSubTask {
            task_id,
            arch: arch.to_string(),
            count: rest + 1,
        }),
        (None, _) => Err(KbotError::NoMatchingSubTask {
            task_id,
            arch: arch.to_string(),
        }),
    }
}

/// The build name plus its `kernel-core` and `kernel-modules` spellings.
///
/// Newer kernels split the main package, so `kernel-4.18.0-80.el8` also ships
/// as `kernel-core-4.18.0-80.el8` and `kernel-modules-4.18.0-80.el8`.
pub fn name_variants(name: &str) -> Vec<String> {
    let mut variants = vec![name.to_string()];
    for split in ["kernel-core", "kernel-modules"] {
        let variant = name.replace("kernel", split);
        if !variants.contains(&variant) {
            variants.push(variant);
        }
    }
    variants
}

/// Architecture token of an RPM file name (`foo-1.0-1.x86_64.rpm` → `x86_64`).
pub fn artifact_arch(artifact: &str) -> Option<&str> {
    let stem = artifact.strip_suffix(".rpm")?;
    stem.rsplit_once('.').map(|(_, arch)| arch)
}

/// Artifacts matching `name` or one of its variants, built for `arch`.
///
/// Result order follows `artifacts`. Files without an RPM architecture
/// suffix are kept.
pub fn match_artifacts<'a>(name: &str, artifacts: &'a [String], arch: &str) -> Vec<&'a str> {
    let variants = name_variants(name);
    artifacts
        .iter()
        .map(String::as_str)
        .filter(|artifact| variants.iter().any(|v| artifact.contains(v.as_str())))
        .filter(|artifact| match artifact_arch(artifact) {
            Some(found) => found == arch || found == ARCH_INDEPENDENT,
            None => true,
        })
        .collect()
}

/// Last artifact containing exactly `name`.
pub fn last_matching_artifact<'a>(name: &str, artifacts: &'a [String]) -> Option<&'a str> {
    artifacts
        .iter()
        .rev()
        .map(String::as_str)
        .find(|artifact| artifact.contains(name))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::records::parse_timestamp;

    const NAME: &str = "kernel-3.10.0-825.el7";

    fn entry(date: &str, author: &str, text: &str) -> ChangelogEntry {
        ChangelogEntry {
            date: parse_timestamp(date).unwrap(),
            text: text.into(),
            author: author.into(),
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn since_is_three_days_before_start() {
        let start = parse_timestamp("2016-10-01 03:27:46.300467").unwrap();
        assert_eq!(
            changelog_since(start).format(SINCE_FORMAT).to_string(),
            "2016-09-28 03:27:46"
        );
    }

    #[test]
    fn select_changelog_matches_version_in_author() {
        let since = parse_timestamp("2017-12-23 12:00:00").unwrap();
        let entries = vec![
            entry("2017-12-26 12:00:00", "Rafael Aquini <aquini@redhat.com> [3.10.0-826.el7]", "newer"),
            entry("2017-12-26 12:00:00", "Rafael Aquini <aquini@redhat.com> [3.10.0-825.el7]", "ours"),
        ];
        let found = select_changelog(&entries, "3.10.0-825", since).unwrap();
        assert_eq!(found.text, "ours");
        assert!(select_changelog(&entries, "4.18.0", since).is_none());
    }

    #[test]
    fn select_changelog_skips_entries_before_since() {
        let since = parse_timestamp("2017-12-23 12:00:00").unwrap();
        let entries = vec![
            entry("2017-12-01 12:00:00", "A [3.10.0-825.el7]", "too old"),
            entry("2017-12-23 12:00:00", "A [3.10.0-825.el7]", "boundary"),
        ];
        assert_eq!(select_changelog(&entries, "3.10.0", since).unwrap().text, "boundary");
        assert!(select_changelog(&entries[..1], "3.10.0", since).is_none());
    }

    #[test]
    fn bug_ids_from_changelog_text() {
        let text = "- [scsi] lpfc: Fix crash after bad bar setup (Dick Kennedy) [1441965]\n\
                    - [net] fix leak (Jane) [1521092 1441965]\n\
                    - [fs] commit 123456 is too short\n";
        let ids: Vec<String> = extract_bug_ids(text).into_iter().map(|b| b.0).collect();
        assert_eq!(ids, vec!["1441965", "1521092"]);
    }

    #[test]
    fn long_digit_runs_split_left_to_right() {
        let ids: Vec<String> = extract_bug_ids("12345678901234").into_iter().map(|b| b.0).collect();
        assert_eq!(ids, vec!["1234567", "8901234"]);
        assert!(extract_bug_ids("123456").is_empty());
    }

    #[test]
    fn select_sub_task_by_arch() {
        let tasks = vec![
            SubTask { id: 1, arch: "x86_64".into() },
            SubTask { id: 2, arch: "i686".into() },
        ];
        assert_eq!(select_sub_task(10, &tasks, "x86_64").unwrap().id, 1);
        assert!(matches!(
            select_sub_task(10, &tasks, "s390x"),
            Err(KbotError::NoMatchingSubTask { task_id: 10, .. })
        ));

        let dup = vec![tasks[0].clone(), SubTask { id: 3, arch: "x86_64".into() }];
        assert!(matches!(
            select_sub_task(10, &dup, "x86_64"),
            Err(KbotError::AmbiguousSubTask { count: 2, .. })
        ));
    }

    #[test]
    fn variants_of_kernel_name() {
        assert_eq!(
            name_variants(NAME),
            vec![
                "kernel-3.10.0-825.el7",
                "kernel-core-3.10.0-825.el7",
                "kernel-modules-3.10.0-825.el7",
            ]
        );
        // Names without "kernel" have no variants.
        assert_eq!(name_variants("qemu-kvm-1.5.3"), vec!["qemu-kvm-1.5.3"]);
    }

    #[test]
    fn match_artifacts_keeps_core_and_modules() {
        let artifacts = strings(&[
            "kernel-3.10.0-825.el7.x86_64.rpm",
            "kernel-core-3.10.0-825.el7.x86_64.rpm",
            "kernel-modules-3.10.0-825.el7.x86_64.rpm",
            "kernel-devel-3.10.0-825.el7.x86_64.rpm",
            "kernel-doc-3.10.0-825.el7.noarch.rpm",
            "kernel-3.10.0-825.el7.i686.rpm",
            "kernel-abi-whitelists-3.10.0-825.el7.noarch.rpm",
        ]);
        assert_eq!(
            match_artifacts(NAME, &artifacts, "x86_64"),
            vec![
                "kernel-3.10.0-825.el7.x86_64.rpm",
                "kernel-core-3.10.0-825.el7.x86_64.rpm",
                "kernel-modules-3.10.0-825.el7.x86_64.rpm",
            ]
        );
    }

    #[test]
    fn artifact_arch_token() {
        assert_eq!(artifact_arch("kernel-3.10.0-825.el7.x86_64.rpm"), Some("x86_64"));
        assert_eq!(artifact_arch("kernel-3.10.0-825.el7.tar.xz"), None);
    }

    #[test]
    fn legacy_match_takes_last() {
        let artifacts = strings(&[
            "kernel-3.10.0-825.el7.x86_64.rpm",
            "kernel-core-3.10.0-825.el7.x86_64.rpm",
            "kernel-debuginfo-3.10.0-825.el7.x86_64.rpm",
            "kernel-3.10.0-825.el7.src.rpm",
            "perf-3.10.0-825.el7.x86_64.rpm",
        ]);
        assert_eq!(
            last_matching_artifact(NAME, &artifacts),
            Some("kernel-3.10.0-825.el7.src.rpm")
        );
        assert_eq!(last_matching_artifact("kernel-9", &artifacts), None);
    }

    proptest! {
        #[test]
        fn bug_ids_are_exactly_the_embedded_runs(
            ids in proptest::collection::vec(1_000_000u32..10_000_000, 0..8),
            sep in "[a-z \\[\\]\n-]{1,6}",
        ) {
            let text = ids.iter().map(u32::to_string).collect::<Vec<_>>().join(&sep);
            let found = extract_bug_ids(&text);
            let expected: BTreeSet<BugId> = ids.iter().map(|i| BugId(i.to_string())).collect();
            prop_assert_eq!(&found, &expected);
            prop_assert_eq!(extract_bug_ids(&text), found);
        }

        #[test]
        fn matched_artifacts_contain_a_name_variant(
            artifacts in proptest::collection::vec("(kernel|kernel-core|kernel-devel|perf)-3\\.10\\.0-8[0-9]{2}\\.el7\\.(x86_64|i686|noarch)\\.rpm", 0..12),
        ) {
            let variants = name_variants(NAME);
            for artifact in match_artifacts(NAME, &artifacts, "x86_64") {
                prop_assert!(variants.iter().any(|v| artifact.contains(v.as_str())));
                prop_assert!(!artifact.ends_with(".i686.rpm"));
            }
        }
    }
}
