//! Deterministic in-memory page.
//!
//! Elements match a selector when the selector string is listed in their
//! `selectors`; there is no CSS engine. Every query and operation is appended to
//! an inspectable log.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use flowreplay_core_types::BoundingBox;

use crate::driver::{DomOperation, ElementState, FrameInfo, FrameTarget, Locator, PageDriver};
use crate::error::{AdapterError, AdapterErrorKind};

#[derive(Clone, Debug)]
pub struct FakeElement {
    pub selectors: Vec<String>,
    pub text: String,
    pub visible: bool,
    pub enabled: bool,
    pub bounding_box: Option<BoundingBox>,
    pub options: Vec<String>,
    pub children: Vec<FakeElement>,
}

impl FakeElement {
    pub fn new(selectors: &[&str]) -> Self {
        Self {
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            text: String::new(),
            visible: true,
            enabled: true,
            bounding_box: None,
            options: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn with_box(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.bounding_box = Some(BoundingBox::new(x, y, width, height));
        self
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_child(mut self, child: FakeElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn key(&self) -> String {
        self.selectors.first().cloned().unwrap_or_default()
    }

    fn matches(&self, selector: &str) -> bool {
        self.selectors.iter().any(|s| s == selector)
    }

    fn collect<'a>(&'a self, selector: &str, out: &mut Vec<&'a FakeElement>) {
        for child in &self.children {
            if child.matches(selector) {
                out.push(child);
            }
            child.collect(selector, out);
        }
    }
}

#[derive(Default)]
struct FakeFrame {
    url: String,
    root: Vec<FakeElement>,
}

#[derive(Default)]
struct FakeState {
    url: String,
    frames: Vec<FakeFrame>,
    log: Vec<String>,
    values: HashMap<String, String>,
    failing_urls: Vec<String>,
}

pub struct FakePage {
    state: Mutex<FakeState>,
}

impl Default for FakePage {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePage {
    pub fn new() -> Self {
        let state = FakeState {
            url: "about:blank".to_string(),
            frames: vec![FakeFrame {
                url: "about:blank".to_string(),
                root: Vec::new(),
            }],
            ..FakeState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Add an element to the main document.
    pub fn with_element(self, element: FakeElement) -> Self {
        self.state.lock().frames[0].root.push(element);
        self
    }

    /// Add a child frame; its index is the order of insertion.
    pub fn with_frame(self, url: &str, elements: Vec<FakeElement>) -> Self {
        self.state.lock().frames.push(FakeFrame {
            url: url.to_string(),
            root: elements,
        });
        self
    }

    pub fn failing_navigation(self, url: &str) -> Self {
        self.state.lock().failing_urls.push(url.to_string());
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    /// Operations only (`click #a`, `fill #b=text`), without query noise.
    pub fn actions(&self) -> Vec<String> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|entry| !entry.starts_with("count ") && !entry.starts_with("state "))
            .cloned()
            .collect()
    }

    pub fn value_of(&self, selector: &str) -> Option<String> {
        self.state.lock().values.get(selector).cloned()
    }

    fn frame_index(target: &FrameTarget) -> usize {
        match target {
            FrameTarget::Main => 0,
            FrameTarget::Child(index) => index + 1,
        }
    }

    fn resolve<'a>(state: &'a FakeState, locator: &Locator) -> Vec<&'a FakeElement> {
        let chain = locator.chain();
        let Some(frame) = state.frames.get(Self::frame_index(&chain[0].frame)) else {
            return Vec::new();
        };

        let mut scopes: Option<Vec<&FakeElement>> = None;
        for link in chain {
            let mut found = Vec::new();
            match &scopes {
                None => {
                    for element in &frame.root {
                        if element.matches(&link.selector) {
                            found.push(element);
                        }
                        element.collect(&link.selector, &mut found);
                    }
                }
                Some(parents) => {
                    for parent in parents {
                        parent.collect(&link.selector, &mut found);
                    }
                }
            }
            if let Some(n) = link.nth {
                found = found.into_iter().skip(n).take(1).collect();
            }
            scopes = Some(found);
        }
        scopes.unwrap_or_default()
    }

    fn with_target<T>(
        &self,
        locator: &Locator,
        f: impl FnOnce(&FakeElement) -> T,
    ) -> Result<T, AdapterError> {
        let state = self.state.lock();
        match Self::resolve(&state, locator).first() {
            Some(element) => Ok(f(element)),
            None => Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                .with_hint(locator.to_string())),
        }
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn navigate(&self, url: &str) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        state.log.push(format!("navigate {}", url));
        if state.failing_urls.iter().any(|u| u == url) {
            return Err(AdapterError::new(AdapterErrorKind::Navigation).with_hint(url.to_string()));
        }
        state.url = url.to_string();
        state.frames[0].url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AdapterError> {
        Ok(self.state.lock().url.clone())
    }

    async fn frames(&self) -> Result<Vec<FrameInfo>, AdapterError> {
        let state = self.state.lock();
        Ok(state
            .frames
            .iter()
            .enumerate()
            .map(|(index, frame)| FrameInfo {
                target: if index == 0 {
                    FrameTarget::Main
                } else {
                    FrameTarget::Child(index - 1)
                },
                url: frame.url.clone(),
            })
            .collect())
    }

    async fn count(&self, locator: &Locator) -> Result<usize, AdapterError> {
        let mut state = self.state.lock();
        state.log.push(format!("count {} {}", locator.frame, locator));
        Ok(Self::resolve(&state, locator).len())
    }

    async fn element_state(&self, locator: &Locator) -> Result<ElementState, AdapterError> {
        let mut state = self.state.lock();
        state.log.push(format!("state {} {}", locator.frame, locator));
        Ok(match Self::resolve(&state, locator).first() {
            Some(element) => ElementState {
                attached: true,
                visible: element.visible,
                enabled: element.enabled,
                bounding_box: element.bounding_box,
            },
            None => ElementState::detached(),
        })
    }

    async fn inner_text(&self, locator: &Locator) -> Result<Option<String>, AdapterError> {
        let state = self.state.lock();
        Ok(Self::resolve(&state, locator)
            .first()
            .map(|element| element.text.clone()))
    }

    async fn perform(&self, locator: &Locator, op: &DomOperation) -> Result<(), AdapterError> {
        let (key, options) = self.with_target(locator, |el| (el.key(), el.options.clone()))?;
        let mut state = self.state.lock();
        let entry = match op {
            DomOperation::Type(text) | DomOperation::Fill(text) => {
                state.values.insert(key.clone(), text.clone());
                format!("{} {}={}", op.name(), key, text)
            }
            DomOperation::SelectOption(option) => {
                if !options.iter().any(|o| o == option) {
                    return Err(AdapterError::new(AdapterErrorKind::OptionNotFound)
                        .with_hint(option.clone()));
                }
                state.values.insert(key.clone(), option.clone());
                format!("select {}={}", key, option)
            }
            DomOperation::DispatchEvent(name) => format!("event {} {}", name, key),
            DomOperation::Click | DomOperation::DoubleClick => format!("{} {}", op.name(), key),
        };
        state.log.push(entry);
        Ok(())
    }

    async fn press_key(&self, _frame: &FrameTarget, key: &str) -> Result<(), AdapterError> {
        self.state.lock().log.push(format!("press {}", key));
        Ok(())
    }

    async fn evaluate(&self, _frame: &FrameTarget, script: &str) -> Result<Value, AdapterError> {
        let mut state = self.state.lock();
        state.log.push(format!("evaluate {}", script));
        if script.trim() == "window.location.href" {
            return Ok(Value::String(state.url.clone()));
        }
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_page() -> FakePage {
        let row = |name: &str| {
            FakeElement::new(&["#grid tr"])
                .with_child(FakeElement::new(&["td:nth-of-type(1)"]).with_text(name))
        };
        FakePage::new()
            .with_element(
                FakeElement::new(&["#grid"])
                    .with_child(row("alpha"))
                    .with_child(row("beta")),
            )
            .with_frame(
                "https://ex.test/embed",
                vec![FakeElement::new(&["#inner"])],
            )
    }

    #[tokio::test]
    async fn scoped_queries_stay_inside_the_row() {
        let page = grid_page();
        let rows = Locator::new("#grid tr");
        assert_eq!(page.count(&rows).await.unwrap(), 2);

        let cell = rows.clone().nth(1).child("td:nth-of-type(1)");
        assert_eq!(page.inner_text(&cell).await.unwrap().as_deref(), Some("beta"));
        assert_eq!(page.count(&rows.child("td:nth-of-type(1)")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn frames_are_isolated() {
        let page = grid_page();
        let inner = Locator::new("#inner");
        assert_eq!(page.count(&inner).await.unwrap(), 0);
        let framed = inner.in_frame(FrameTarget::Child(0));
        assert_eq!(page.count(&framed).await.unwrap(), 1);
        let frames = page.frames().await.unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].url, "https://ex.test/embed");
    }

    #[tokio::test]
    async fn operations_are_logged() {
        let page = FakePage::new()
            .with_element(FakeElement::new(&["#q"]))
            .with_element(FakeElement::new(&["#pick"]).with_options(&["a", "b"]));
        page.perform(&Locator::new("#q"), &DomOperation::Fill("hello".into()))
            .await
            .unwrap();
        let err = page
            .perform(&Locator::new("#pick"), &DomOperation::SelectOption("z".into()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::OptionNotFound);
        assert_eq!(page.value_of("#q").as_deref(), Some("hello"));
        assert_eq!(page.actions(), vec!["fill #q=hello".to_string()]);
    }
}
