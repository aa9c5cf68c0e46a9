use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use flowreplay_core_types::BoundingBox;

use crate::error::AdapterError;

/// Which document a locator is evaluated in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameTarget {
    #[default]
    Main,
    /// Index into the page's `iframe, frame` elements, in document order.
    Child(usize),
}

impl fmt::Display for FrameTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameTarget::Main => f.write_str("main"),
            FrameTarget::Child(index) => write!(f, "frame[{}]", index),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub target: FrameTarget,
    pub url: String,
}

/// Lazy element query, resolved by the driver on every use.
///
/// Selectors are CSS, CSS with a trailing `:has-text("...")`, or XPath (leading `/`,
/// `(` or `xpath=`). A locator with a parent is evaluated inside every match of
/// the parent, so `row.child("td")` reads the cells of that row only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Locator {
    pub frame: FrameTarget,
    pub selector: String,
    pub nth: Option<usize>,
    pub parent: Option<Box<Locator>>,
}

impl Locator {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            frame: FrameTarget::Main,
            selector: selector.into(),
            nth: None,
            parent: None,
        }
    }

    pub fn in_frame(mut self, frame: FrameTarget) -> Self {
        if let Some(parent) = self.parent.take() {
            self.parent = Some(Box::new(parent.in_frame(frame.clone())));
        }
        self.frame = frame;
        self
    }

    pub fn nth(mut self, index: usize) -> Self {
        self.nth = Some(index);
        self
    }

    pub fn first(self) -> Self {
        self.nth(0)
    }

    pub fn child(&self, selector: impl Into<String>) -> Locator {
        Locator {
            frame: self.frame.clone(),
            selector: selector.into(),
            nth: None,
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Links of the query from the outermost scope inwards.
    pub fn chain(&self) -> Vec<&Locator> {
        let mut links = Vec::new();
        let mut current = Some(self);
        while let Some(link) = current {
            links.push(link);
            current = link.parent.as_deref();
        }
        links.reverse();
        links
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .chain()
            .into_iter()
            .map(|link| match link.nth {
                Some(n) => format!("{} >> nth={}", link.selector, n),
                None => link.selector.clone(),
            })
            .collect();
        write!(f, "{}", parts.join(" >> "))
    }
}

pub fn is_xpath(selector: &str) -> bool {
    let trimmed = selector.trim_start();
    trimmed.starts_with('/') || trimmed.starts_with('(') || trimmed.starts_with("xpath=")
}

/// Snapshot of the element a locator currently resolves to.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementState {
    pub attached: bool,
    pub visible: bool,
    pub enabled: bool,
    pub bounding_box: Option<BoundingBox>,
}

impl ElementState {
    pub fn detached() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomOperation {
    Click,
    DoubleClick,
    /// Focus then insert text as keyboard input.
    Type(String),
    /// Replace the value and fire `input`/`change`.
    Fill(String),
    /// Select by option value, falling back to the visible label.
    SelectOption(String),
    DispatchEvent(String),
}

impl DomOperation {
    pub fn name(&self) -> &'static str {
        match self {
            DomOperation::Click => "click",
            DomOperation::DoubleClick => "dblclick",
            DomOperation::Type(_) => "type",
            DomOperation::Fill(_) => "fill",
            DomOperation::SelectOption(_) => "select",
            DomOperation::DispatchEvent(_) => "event",
        }
    }
}

/// Capabilities the replay engine needs from a browser automation provider.
///
/// Element-level calls act on the `nth` match of the locator, or the first match
/// when no index is set.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), AdapterError>;

    async fn current_url(&self) -> Result<String, AdapterError>;

    /// All frames of the page, main frame first.
    async fn frames(&self) -> Result<Vec<FrameInfo>, AdapterError>;

    async fn count(&self, locator: &Locator) -> Result<usize, AdapterError>;

    async fn element_state(&self, locator: &Locator) -> Result<ElementState, AdapterError>;

    async fn inner_text(&self, locator: &Locator) -> Result<Option<String>, AdapterError>;

    async fn perform(&self, locator: &Locator, op: &DomOperation) -> Result<(), AdapterError>;

    async fn press_key(&self, frame: &FrameTarget, key: &str) -> Result<(), AdapterError>;

    async fn evaluate(&self, frame: &FrameTarget, script: &str) -> Result<Value, AdapterError>;
}
