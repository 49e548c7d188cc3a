//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Log-safe truncation for large strings (model output, prompts).
/// Cuts on a char boundary so multi-byte text never panics.
pub fn trunc_for_log(s: &str, max_chars: usize) -> String {
  let total = s.chars().count();
  if total <= max_chars {
    s.to_string()
  } else {
    let head: String = s.chars().take(max_chars).collect();
    format!("{}… ({} chars total)", head, total)
  }
}

/// Seconds rendered as `HH:MM:SS`.
pub fn format_clock(seconds: u32) -> String {
  let hours = seconds / 3600;
  let minutes = (seconds % 3600) / 60;
  let secs = seconds % 60;
  format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fill_template_replaces_every_occurrence() {
    let out = fill_template("{a} and {b}, again {a}", &[("a", "x"), ("b", "y")]);
    assert_eq!(out, "x and y, again x");
  }

  #[test]
  fn fill_template_leaves_unknown_keys() {
    assert_eq!(fill_template("{missing}", &[("a", "x")]), "{missing}");
  }

  #[test]
  fn trunc_for_log_respects_char_boundaries() {
    let s = "日本語のテキスト";
    let out = trunc_for_log(s, 3);
    assert!(out.starts_with("日本語…"));
    assert!(out.contains("8 chars total"));
    assert_eq!(trunc_for_log("short", 10), "short");
  }

  #[test]
  fn format_clock_pads_fields() {
    assert_eq!(format_clock(0), "00:00:00");
    assert_eq!(format_clock(3599), "00:59:59");
    assert_eq!(format_clock(3600 + 61), "01:01:01");
  }
}
