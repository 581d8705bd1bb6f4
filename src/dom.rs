use anyhow::{Context, Result};
use headless_chrome::Tab;
use std::sync::Arc;

use crate::types::{ELEMENT_TEXT_MAX_CHARS, PageElement, PageState, VISIBLE_TEXT_MAX_CHARS};

/// JavaScript injected into the page to describe it as JSON.
/// NON-DESTRUCTIVE: leaves styles and layout alone. The only write is a
/// `data-eid` attribute on each interactive element.
///
/// The script:
///   1. Skips script, style, noscript, svg elements (does NOT remove them).
///   2. Walks the visible DOM tree (max depth 15).
///   3. Stamps interactive elements (a, button, input, textarea, select)
///      with `data-eid="eN"` and collects their id, eid, trimmed text and href.
///   4. Returns `JSON.stringify({url, title, visible_text, elements})`.
const SNAPSHOT_JS: &str = r#"
(() => {
  const SKIP = new Set(['SCRIPT','STYLE','NOSCRIPT','SVG','LINK']);
  const INTERACTIVE = ['a','button','input','textarea','select'];
  const elements = [];
  let next = 0;

  function isVisible(el) {
    if (el.offsetParent === null && el.tagName !== 'BODY' && el.tagName !== 'HTML') return false;
    const s = getComputedStyle(el);
    return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0';
  }

  function walk(node, depth) {
    if (depth > 15) return;
    for (const child of node.children) {
      if (SKIP.has(child.tagName)) continue;
      if (!isVisible(child)) continue;
      const tag = child.tagName.toLowerCase();
      if (INTERACTIVE.includes(tag)) {
        const text = (tag === 'input' || tag === 'textarea')
          ? (child.placeholder || child.name || '')
          : (child.textContent || '');
        const eid = 'e' + (next++);
        child.setAttribute('data-eid', eid);
        elements.push({
          tag,
          id: child.id || null,
          eid,
          text: text.trim().replace(/\s+/g, ' ').slice(0, __ELEMENT_MAX__),
          href: tag === 'a' ? (child.href || null) : null,
        });
      }
      walk(child, depth + 1);
    }
  }

  walk(document.body, 0);
  return JSON.stringify({
    url: window.location.href,
    title: document.title || '',
    visible_text: (document.body ? document.body.innerText : '').slice(0, __TEXT_MAX__),
    elements,
  });
})()
"#;

fn snapshot_script() -> String {
    SNAPSHOT_JS
        .replace("__ELEMENT_MAX__", &ELEMENT_TEXT_MAX_CHARS.to_string())
        .replace("__TEXT_MAX__", &VISIBLE_TEXT_MAX_CHARS.to_string())
}

/// Capture the current page as a [`PageState`].
pub fn capture_page_state(tab: &Arc<Tab>) -> Result<PageState> {
    let result = tab
        .evaluate(&snapshot_script(), false)
        .context("page snapshot script failed")?;
    let raw = result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .context("page snapshot returned no value")?;
    parse_snapshot(&raw)
}

/// Parse the snapshot JSON, enforcing text limits on the Rust side too.
pub fn parse_snapshot(raw: &str) -> Result<PageState> {
    let mut state: PageState = serde_json::from_str(raw).context("malformed page snapshot")?;
    state.visible_text = truncate_chars(&state.visible_text, VISIBLE_TEXT_MAX_CHARS);
    for element in &mut state.elements {
        element.text = truncate_chars(&element.text, ELEMENT_TEXT_MAX_CHARS);
        normalize_empty(element);
    }
    Ok(state)
}

/// Get the current page URL.
pub fn get_current_url(tab: &Arc<Tab>) -> String {
    tab.get_url()
}

fn normalize_empty(element: &mut PageElement) {
    if element.id.as_deref().is_some_and(str::is_empty) {
        element.id = None;
    }
    if element.href.as_deref().is_some_and(str::is_empty) {
        element.href = None;
    }
    if element.eid.as_deref().is_some_and(str::is_empty) {
        element.eid = None;
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
