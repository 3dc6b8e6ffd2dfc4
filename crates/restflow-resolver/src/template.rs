//! Path templates with `{name}` placeholders.
//!
//! ```text
//! {subject}/func/{subject}_{scan_id}.nii.gz
//! ```
//!
//! A placeholder is an identifier wrapped in single braces. Anything else,
//! including a lone brace, is copied through unchanged.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ResolveError;

/// Placeholder name → value.
pub type Bindings = BTreeMap<String, String>;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Placeholder names in order of first appearance, without duplicates.
pub fn placeholders(template: &str) -> Vec<String> {
  let mut names: Vec<String> = Vec::new();
  for caps in PLACEHOLDER.captures_iter(template) {
    let name = &caps[1];
    if !names.iter().any(|n| n == name) {
      names.push(name.to_string());
    }
  }
  names
}

/// Render a template against the given bindings.
///
/// Fails on the first placeholder without a binding.
pub fn render(template: &str, bindings: &Bindings) -> Result<String, ResolveError> {
  let mut rendered = String::with_capacity(template.len());
  let mut last = 0;

  for caps in PLACEHOLDER.captures_iter(template) {
    let Some(whole) = caps.get(0) else {
      continue;
    };
    let name = &caps[1];
    let value = bindings
      .get(name)
      .ok_or_else(|| ResolveError::UnresolvedPlaceholder {
        placeholder: name.to_string(),
        template: template.to_string(),
      })?;

    rendered.push_str(&template[last..whole.start()]);
    rendered.push_str(value);
    last = whole.end();
  }

  rendered.push_str(&template[last..]);
  Ok(rendered)
}
