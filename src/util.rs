//! Small utility helpers used across modules.

use chrono::{DateTime, Utc};

/// Lowercase and turn each whitespace run into a single '-'.
/// Anything other than letters and digits (path separators, quotes, control
/// characters) is dropped so the slug is always a single path segment.
pub fn slugify(s: &str) -> String {
  s.split_whitespace()
    .map(|part| {
      part
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect::<String>()
    })
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join("-")
}

/// ISO-8601 UTC with millisecond precision, e.g. `2026-10-18T09:30:00.000Z`.
pub fn iso_millis(at: DateTime<Utc>) -> String {
  at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut end = max;
  while !s.is_char_boundary(end) {
    end -= 1;
  }
  format!("{}… ({} bytes total)", &s[..end], s.len())
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn slugify_collapses_whitespace() {
    assert_eq!(slugify("Asha  Rao"), "asha-rao");
    assert_eq!(slugify(" Mary\tJane  O'Neil "), "mary-jane-oneil");
    assert_eq!(slugify("User"), "user");
  }

  #[test]
  fn slugify_drops_path_characters() {
    assert_eq!(slugify("Asha/Rao"), "asharao");
    assert_eq!(slugify("..\\Asha / Rao"), "asha-rao");
    assert_eq!(slugify("Ana\u{0}\"Bell\""), "anabell");
    assert_eq!(slugify("José Núñez"), "josé-núñez");
    assert_eq!(slugify("../.."), "");
  }

  #[test]
  fn iso_millis_format() {
    let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
    assert_eq!(iso_millis(at), "2026-01-02T03:04:05.000Z");
  }

  #[test]
  fn trunc_respects_char_boundaries() {
    assert_eq!(trunc_for_log("short", 10), "short");
    let t = trunc_for_log("ééééé", 3);
    assert!(t.starts_with("é…"));
    assert!(t.ends_with("(10 bytes total)"));
  }
}
