//! In-page scripts evaluated by the Chromium driver.
//!
//! Each script resolves a [`Locator`] chain in the target document and then runs a
//! small body against `__els` (the matches) and `__offset` (the frame origin).
//!
//! Child frames are the `iframe`/`frame` elements of the top document, indexed in
//! DOM order, and are entered through `contentDocument`. Frames nested inside a
//! child frame are not listed. A cross-origin frame has no readable document, so
//! every locator in it resolves to zero elements.

use serde_json::json;

use crate::driver::{DomOperation, FrameTarget, Locator};
use crate::error::{AdapterError, AdapterErrorKind};

/// `frameIndex` uses the same iframe ordering as [`FRAMES_SCRIPT`].
const RESOLVE_TEMPLATE: &str = r#"(() => {
  const chain = __CHAIN__;
  const frameIndex = __FRAME__;
  const isXPath = (s) => s.startsWith('xpath=') || s.startsWith('/') || s.startsWith('(');
  const queryAll = (scope, selector) => {
    if (isXPath(selector)) {
      const expr = selector.startsWith('xpath=') ? selector.slice(6) : selector;
      const doc = scope.ownerDocument || scope;
      const snap = doc.evaluate(expr, scope, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
      const out = [];
      for (let i = 0; i < snap.snapshotLength; i++) out.push(snap.snapshotItem(i));
      return out;
    }
    const m = selector.match(/^(.*):has-text\((["'])([\s\S]*)\2\)$/);
    if (m) {
      const base = m[1].trim() || '*';
      const needle = m[3].replace(/\\(["'\\])/g, '$1').toLowerCase();
      return Array.from(scope.querySelectorAll(base)).filter((el) =>
        (el.innerText || el.textContent || '').replace(/\s+/g, ' ').trim().toLowerCase().includes(needle));
    }
    return Array.from(scope.querySelectorAll(selector));
  };
  let root = document;
  let __offset = { x: 0, y: 0 };
  if (frameIndex !== null) {
    const frame = document.querySelectorAll('iframe, frame')[frameIndex];
    let doc = null;
    try { doc = frame ? frame.contentDocument : null; } catch (e) { doc = null; }
    if (doc) {
      const r = frame.getBoundingClientRect();
      __offset = { x: r.left, y: r.top };
    }
    root = doc;
  }
  let __els = root ? [root] : [];
  for (const link of chain) {
    let found = [];
    for (const scope of __els) found = found.concat(queryAll(scope, link.selector));
    found = Array.from(new Set(found));
    if (link.nth !== null) found = found[link.nth] ? [found[link.nth]] : [];
    __els = found;
  }
  __BODY__
})()"#;

const COUNT_BODY: &str = "return { count: __els.length };";

const STATE_BODY: &str = r#"const el = __els[0];
  if (!el) return { attached: false, visible: false, enabled: false, box: null };
  const rect = el.getBoundingClientRect();
  const view = el.ownerDocument.defaultView || window;
  const style = view.getComputedStyle(el);
  const visible = rect.width > 0 && rect.height > 0 && style.visibility !== 'hidden' && style.display !== 'none';
  const enabled = !(el.disabled === true || el.getAttribute('aria-disabled') === 'true');
  return { attached: true, visible, enabled,
    box: { x: rect.left + __offset.x, y: rect.top + __offset.y, width: rect.width, height: rect.height } };"#;

const TEXT_BODY: &str =
    "const el = __els[0]; return { text: el ? (el.innerText || el.textContent || '') : null };";

const PERFORM_BODY: &str = r#"const el = __els[0];
  if (!el) return { ok: false, reason: 'not-found' };
  const op = __OP__;
  if (el.scrollIntoView) el.scrollIntoView({ block: 'center', inline: 'center' });
  const fire = (name) => el.dispatchEvent(new Event(name, { bubbles: true }));
  switch (op.kind) {
    case 'click': el.click(); break;
    case 'dblclick':
      el.dispatchEvent(new MouseEvent('dblclick', { bubbles: true, cancelable: true }));
      break;
    case 'focus': el.focus(); break;
    case 'fill':
      el.focus();
      if ('value' in el) { el.value = op.value; } else { el.textContent = op.value; }
      fire('input'); fire('change');
      break;
    case 'select': {
      const opts = Array.from(el.options || []);
      const hit = opts.find((o) => o.value === op.value)
        || opts.find((o) => (o.label || o.text || '').trim() === op.value);
      if (!hit) return { ok: false, reason: 'option-not-found' };
      el.value = hit.value;
      fire('input'); fire('change');
      break;
    }
    case 'event':
      if (op.value === 'focus') el.focus();
      if (op.value === 'blur') el.blur();
      if (op.value.startsWith('mouse')) {
        el.dispatchEvent(new MouseEvent(op.value, { bubbles: true, cancelable: true }));
      } else {
        fire(op.value);
      }
      break;
    default: return { ok: false, reason: 'unsupported' };
  }
  return { ok: true };"#;

const FRAMES_SCRIPT: &str = r#"(() => ({
  main: window.location.href,
  frames: Array.from(document.querySelectorAll('iframe, frame')).map((f) => {
    try { return (f.contentWindow && f.contentWindow.location.href) || f.src || ''; }
    catch (e) { return f.src || ''; }
  })
}))()"#;

pub(crate) fn frames_script() -> &'static str {
    FRAMES_SCRIPT
}

fn encode(value: &impl serde::Serialize) -> Result<String, AdapterError> {
    serde_json::to_string(value).map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("failed to encode script argument: {}", err))
    })
}

fn resolve_with(locator: &Locator, body: &str) -> Result<String, AdapterError> {
    let chain: Vec<_> = locator
        .chain()
        .into_iter()
        .map(|link| json!({ "selector": link.selector, "nth": link.nth }))
        .collect();
    let frame = match &locator.chain()[0].frame {
        FrameTarget::Main => "null".to_string(),
        FrameTarget::Child(index) => index.to_string(),
    };
    Ok(RESOLVE_TEMPLATE
        .replace("__CHAIN__", &encode(&chain)?)
        .replace("__FRAME__", &frame)
        .replace("__BODY__", body))
}

pub(crate) fn count(locator: &Locator) -> Result<String, AdapterError> {
    resolve_with(locator, COUNT_BODY)
}

pub(crate) fn element_state(locator: &Locator) -> Result<String, AdapterError> {
    resolve_with(locator, STATE_BODY)
}

pub(crate) fn inner_text(locator: &Locator) -> Result<String, AdapterError> {
    resolve_with(locator, TEXT_BODY)
}

/// Script for a DOM operation. `Type` only focuses; the text is sent as key input.
pub(crate) fn perform(locator: &Locator, op: &DomOperation) -> Result<String, AdapterError> {
    let payload = match op {
        DomOperation::Click => json!({ "kind": "click", "value": "" }),
        DomOperation::DoubleClick => json!({ "kind": "dblclick", "value": "" }),
        DomOperation::Type(_) => json!({ "kind": "focus", "value": "" }),
        DomOperation::Fill(value) => json!({ "kind": "fill", "value": value }),
        DomOperation::SelectOption(value) => json!({ "kind": "select", "value": value }),
        DomOperation::DispatchEvent(name) => json!({ "kind": "event", "value": name }),
    };
    let body = PERFORM_BODY.replace("__OP__", &encode(&payload)?);
    resolve_with(locator, &body)
}

/// Wrap a caller-supplied expression so it runs against the given frame's window.
pub(crate) fn in_frame(frame: &FrameTarget, script: &str) -> Result<String, AdapterError> {
    match frame {
        FrameTarget::Main => Ok(script.to_string()),
        FrameTarget::Child(index) => Ok(format!(
            "(() => {{ const f = document.querySelectorAll('iframe, frame')[{index}]; \
             if (!f || !f.contentWindow) return null; \
             return f.contentWindow.eval({source}); }})()",
            index = index,
            source = encode(&script)?
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_script_embeds_chain_and_frame() {
        let locator = Locator::new("#grid tr")
            .in_frame(FrameTarget::Child(2))
            .nth(1)
            .child("td");
        let script = count(&locator).unwrap();
        assert!(script.contains(r##""selector":"#grid tr""##));
        assert!(script.contains(r#""nth":1"#));
        assert!(script.contains(r#""nth":null"#));
        assert!(script.contains("const frameIndex = 2;"));
        assert!(script.contains("return { count: __els.length };"));
        assert!(!script.contains("__BODY__"));
    }

    #[test]
    fn perform_script_escapes_values() {
        let script = perform(
            &Locator::new("input[name=\"q\"]"),
            &DomOperation::Fill("say \"hi\"".to_string()),
        )
        .unwrap();
        assert!(script.contains(r#""value":"say \"hi\"""#));
        assert!(script.contains(r#""kind":"fill""#));
    }

    #[test]
    fn frame_indices_match_the_frame_listing() {
        let frame_query = "document.querySelectorAll('iframe, frame')";
        assert!(FRAMES_SCRIPT.contains(frame_query));
        let script = count(&Locator::new("button").in_frame(FrameTarget::Child(0))).unwrap();
        assert!(script.contains(&format!("{}[frameIndex]", frame_query)));
        // Unreadable documents leave no scope to query.
        assert!(script.contains("let __els = root ? [root] : [];"));
    }

    #[test]
    fn main_frame_script_is_untouched() {
        assert_eq!(in_frame(&FrameTarget::Main, "1 + 1").unwrap(), "1 + 1");
        let wrapped = in_frame(&FrameTarget::Child(0), "document.title").unwrap();
        assert!(wrapped.contains("eval(\"document.title\")"));
    }
}
