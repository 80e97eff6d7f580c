//! Decoding of hub replies into kbot domain types.

use chrono::NaiveDateTime;
use kbot_shared::{Build, ChangelogEntry, KbotError, Result, SubTask};

use crate::xmlrpc::Value;

/// Timestamp layouts the hub is known to emit.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y%m%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Parse a hub timestamp such as `2017-12-13 10:21:22.163979`.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| KbotError::parse(format!("unrecognized timestamp {raw:?}")))
}

fn field<'a>(value: &'a Value, key: &str) -> Result<&'a Value> {
    value
        .get(key)
        .ok_or_else(|| KbotError::parse(format!("hub reply is missing field {key:?}")))
}

fn str_field(value: &Value, key: &str) -> Result<String> {
    field(value, key)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| KbotError::parse(format!("field {key:?} is not a string")))
}

fn int_field(value: &Value, key: &str) -> Result<i64> {
    field(value, key)?
        .as_i64()
        .ok_or_else(|| KbotError::parse(format!("field {key:?} is not an integer")))
}

fn list<'a>(value: &'a Value, what: &str) -> Result<&'a [Value]> {
    value
        .as_array()
        .ok_or_else(|| KbotError::parse(format!("expected a list of {what}")))
}

/// Decode a `getBuild` reply. A nil reply means the hub has no such build.
pub(crate) fn build_from_value(name: &str, value: &Value) -> Result<Build> {
    if value.is_nil() {
        return Err(KbotError::UnknownBuild {
            name: name.to_string(),
        });
    }

    // Builds that never started (imports) only carry a creation time.
    let started = match value.get("start_time").and_then(Value::as_str) {
        Some(raw) => raw.to_string(),
        None => str_field(value, "creation_time")?,
    };

    Ok(Build {
        id: int_field(value, "id")?,
        package_name: str_field(value, "package_name")
            .or_else(|_| str_field(value, "name"))?,
        nvr: str_field(value, "nvr").unwrap_or_else(|_| name.to_string()),
        version: str_field(value, "version")?,
        release: str_field(value, "release")?,
        owner: str_field(value, "owner_name")?,
        task_id: value.get("task_id").and_then(Value::as_i64),
        start_time: parse_timestamp(&started)?,
    })
}

/// Decode a `listTags` reply into tag names.
pub(crate) fn tag_names(value: &Value) -> Result<Vec<String>> {
    list(value, "tags")?
        .iter()
        .map(|tag| str_field(tag, "name"))
        .collect()
}

/// Decode a `getChangelogEntries` reply.
pub(crate) fn changelog_entries(value: &Value) -> Result<Vec<ChangelogEntry>> {
    list(value, "changelog entries")?
        .iter()
        .map(|entry| {
            Ok(ChangelogEntry {
                date: parse_timestamp(&str_field(entry, "date")?)?,
                text: str_field(entry, "text")?,
                author: str_field(entry, "author")?,
            })
        })
        .collect()
}

/// Decode a `getTaskChildren` reply.
pub(crate) fn sub_tasks(value: &Value) -> Result<Vec<SubTask>> {
    list(value, "sub-tasks")?
        .iter()
        .map(|task| {
            Ok(SubTask {
                id: int_field(task, "id")?,
                arch: str_field(task, "arch")?,
            })
        })
        .collect()
}

/// Pull the `rpms` list out of a `getTaskResult` reply.
pub(crate) fn task_rpms(value: &Value) -> Result<Vec<String>> {
    list(field(value, "rpms")?, "rpms")?
        .iter()
        .map(|rpm| {
            rpm.as_str()
                .map(str::to_string)
                .ok_or_else(|| KbotError::parse("rpm entry is not a string"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn record(pairs: &[(&str, Value)]) -> Value {
        Value::Struct(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn timestamps_with_and_without_fraction() {
        let a = parse_timestamp("2017-12-13 10:21:22.163979").unwrap();
        let b = parse_timestamp("2017-12-13 10:21:22").unwrap();
        assert_eq!(a.format("%Y-%m-%d %H:%M:%S").to_string(), "2017-12-13 10:21:22");
        assert_eq!(a.date(), b.date());
        assert!(parse_timestamp("20171226T12:00:00").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn build_from_hub_record() {
        let value = record(&[
            ("id", Value::Int(632394)),
            ("package_name", "kernel".into()),
            ("nvr", "kernel-3.10.0-821.el7".into()),
            ("version", "3.10.0".into()),
            ("release", "821.el7".into()),
            ("owner_name", "raquini".into()),
            ("task_id", Value::Int(14744635)),
            ("start_time", "2017-12-13 10:21:22.163979".into()),
        ]);
        let build = build_from_value("kernel-3.10.0-821.el7", &value).unwrap();
        assert_eq!(build.version, "3.10.0");
        assert_eq!(build.owner, "raquini");
        assert_eq!(build.task_id, Some(14744635));
    }

    #[test]
    fn nil_build_is_unknown() {
        let err = build_from_value("kernel-0", &Value::Nil).unwrap_err();
        assert!(matches!(err, KbotError::UnknownBuild { ref name } if name == "kernel-0"));
    }

    #[test]
    fn build_missing_version_is_parse_error() {
        let value = record(&[("id", Value::Int(1))]);
        assert!(matches!(
            build_from_value("kernel", &value),
            Err(KbotError::Parse { .. })
        ));
    }

    #[test]
    fn task_result_rpms() {
        let value = record(&[(
            "rpms",
            Value::Array(vec!["tasks/1/kernel-3.10.0-825.el7.x86_64.rpm".into()]),
        )]);
        assert_eq!(
            task_rpms(&value).unwrap(),
            vec!["tasks/1/kernel-3.10.0-825.el7.x86_64.rpm".to_string()]
        );
        assert!(task_rpms(&record(&[])).is_err());
    }
}
