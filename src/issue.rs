use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use uuid::Uuid;

/// An issue is whatever JSON the plugin reports, plus two server-stamped
/// fields. Both are stamped at intake time, never by the plugin.
pub fn stamp_issues(mut issues: Vec<Value>) -> Vec<Value> {
    // Stamp Date on every issue first, then Id, mirroring the two-pass
    // stamping order of the system this was distilled from. Functionally
    // either order produces the same fields, but keeping two passes avoids
    // quietly depending on stamp order if one field's generation is ever
    // made to depend on the other.
    for issue in issues.iter_mut() {
        stamp_date(issue);
    }
    for issue in issues.iter_mut() {
        stamp_id(issue);
    }
    issues
}

fn stamp_date(issue: &mut Value) {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    if let Value::Object(map) = issue {
        map.insert("Date".to_string(), Value::String(now));
    }
}

fn stamp_id(issue: &mut Value) {
    let id = Uuid::new_v4().to_string();
    if let Value::Object(map) = issue {
        map.insert("Id".to_string(), Value::String(id));
    }
}

/// Sentinel `since` value used when a client has not yet polled for results.
/// Predates any real issue, so the first poll returns everything.
pub const SENTINEL_SINCE: &str = "1975-09-23T00:00:00.000000Z";

/// Filters issues to those with `Date` strictly greater than `since`, and
/// returns the maximum `Date` seen (or `since` unchanged if nothing newer).
/// ISO-8601 timestamps in this fixed microsecond format compare correctly
/// as plain strings.
pub fn issues_since<'a>(issues: &'a [Value], since: &str) -> (Vec<&'a Value>, String) {
    let mut max_date = since.to_string();
    let mut out = Vec::new();
    for issue in issues {
        if let Some(date) = issue.get("Date").and_then(Value::as_str) {
            if date > since {
                out.push(issue);
                if date > max_date.as_str() {
                    max_date = date.to_string();
                }
            }
        }
    }
    (out, max_date)
}
