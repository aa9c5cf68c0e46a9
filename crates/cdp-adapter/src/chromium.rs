
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, InsertTextParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use flowreplay_core_types::BoundingBox;

use crate::driver::{DomOperation, ElementState, FrameInfo, FrameTarget, Locator, PageDriver};
use crate::error::{AdapterError, AdapterErrorKind};
use crate::script;

/// [`PageDriver`] over one Chromium tab reached through the DevTools protocol.
///
/// Element queries run as page scripts so CSS, `:has-text` and XPath selectors
/// behave identically in the main document and in same-origin child frames.
/// [`PageDriver::frames`] lists only frames of the top document, and queries inside
/// a cross-origin frame match nothing.
pub struct ChromiumPage {
    page: Page,
    _browser: Browser,
    handler: JoinHandle<()>,
}

impl ChromiumPage {
    /// Attach to a running browser by its `ws://.../devtools/browser/...` url and
    /// take its first tab, opening a blank one if none exists.
    pub async fn connect(ws_url: &str) -> Result<Self, AdapterError> {
        let (browser, mut handler) = Browser::connect(ws_url)
            .await
            .map_err(AdapterError::cdp)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "cdp handler event error");
                }
            }
        });

        let pages = browser.pages().await.map_err(AdapterError::cdp)?;
        let page = match pages.into_iter().next() {
            Some(page) => page,
            None => browser
                .new_page("about:blank")
                .await
                .map_err(AdapterError::cdp)?,
        };
        info!(ws_url, "attached to browser");

        Ok(Self {
            page,
            _browser: browser,
            handler,
        })
    }

    async fn eval(&self, source: String) -> Result<Value, AdapterError> {
        let params = EvaluateParams::builder()
            .expression(source)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(|err| AdapterError::new(AdapterErrorKind::Internal).with_hint(err))?;
        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::Script).with_hint(err.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn key_event(&self, kind: DispatchKeyEventType, key: &str) -> Result<(), AdapterError> {
        let mut builder = DispatchKeyEventParams::builder().r#type(kind).key(key);
        match named_key(key) {
            Some((code, text)) => {
                builder = builder.code(key).windows_virtual_key_code(code);
                if let Some(text) = text {
                    builder = builder.text(text);
                }
            }
            None => builder = builder.text(key),
        }
        let params = builder
            .build()
            .map_err(|err| AdapterError::new(AdapterErrorKind::Internal).with_hint(err))?;
        self.page.execute(params).await.map_err(AdapterError::cdp)?;
        Ok(())
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

fn named_key(key: &str) -> Option<(i64, Option<&'static str>)> {
    let entry = match key {
        "Enter" => (13, Some("\r")),
        "Tab" => (9, Some("\t")),
        "Escape" => (27, None),
        "Backspace" => (8, None),
        "Delete" => (46, None),
        "ArrowUp" => (38, None),
        "ArrowDown" => (40, None),
        "ArrowLeft" => (37, None),
        "ArrowRight" => (39, None),
        "Space" => (32, Some(" ")),
        _ => return None,
    };
    Some(entry)
}

#[derive(Deserialize)]
struct CountReply {
    count: usize,
}

#[derive(Deserialize)]
struct StateReply {
    attached: bool,
    visible: bool,
    enabled: bool,
    #[serde(rename = "box")]
    bounding_box: Option<BoundingBox>,
}

#[derive(Deserialize)]
struct TextReply {
    text: Option<String>,
}

#[derive(Deserialize)]
struct PerformReply {
    ok: bool,
    reason: Option<String>,
}

#[derive(Deserialize)]
struct FramesReply {
    main: String,
    frames: Vec<String>,
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T, AdapterError> {
    serde_json::from_value(value).map_err(|err| {
        AdapterError::new(AdapterErrorKind::Script)
            .with_hint(format!("unexpected {} reply: {}", what, err))
    })
}

#[async_trait]
impl PageDriver for ChromiumPage {
    async fn navigate(&self, url: &str) -> Result<(), AdapterError> {
        self.page.goto(url).await.map_err(|err| {
            AdapterError::new(AdapterErrorKind::Navigation).with_hint(format!("{}: {}", url, err))
        })?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AdapterError> {
        let url = self.page.url().await.map_err(AdapterError::cdp)?;
        Ok(url.unwrap_or_default())
    }

    async fn frames(&self) -> Result<Vec<FrameInfo>, AdapterError> {
        let reply: FramesReply = decode(self.eval(script::frames_script().to_string()).await?, "frames")?;
        let mut frames = vec![FrameInfo {
            target: FrameTarget::Main,
            url: reply.main,
        }];
        frames.extend(reply.frames.into_iter().enumerate().map(|(index, url)| FrameInfo {
            target: FrameTarget::Child(index),
            url,
        }));
        Ok(frames)
    }

    async fn count(&self, locator: &Locator) -> Result<usize, AdapterError> {
        let reply: CountReply = decode(self.eval(script::count(locator)?).await?, "count")?;
        Ok(reply.count)
    }

    async fn element_state(&self, locator: &Locator) -> Result<ElementState, AdapterError> {
        let reply: StateReply = decode(self.eval(script::element_state(locator)?).await?, "state")?;
        Ok(ElementState {
            attached: reply.attached,
            visible: reply.visible,
            enabled: reply.enabled,
            bounding_box: reply.bounding_box,
        })
    }

    async fn inner_text(&self, locator: &Locator) -> Result<Option<String>, AdapterError> {
        let reply: TextReply = decode(self.eval(script::inner_text(locator)?).await?, "text")?;
        Ok(reply.text)
    }

    async fn perform(&self, locator: &Locator, op: &DomOperation) -> Result<(), AdapterError> {
        let reply: PerformReply = decode(self.eval(script::perform(locator, op)?).await?, op.name())?;
        if !reply.ok {
            let reason = reply.reason.unwrap_or_default();
            let kind = match reason.as_str() {
                "not-found" => AdapterErrorKind::TargetNotFound,
                "option-not-found" => AdapterErrorKind::OptionNotFound,
                _ => AdapterErrorKind::Script,
            };
            return Err(AdapterError::new(kind).with_hint(format!("{} on {}", op.name(), locator)));
        }

        if let DomOperation::Type(text) = op {
            self.page
                .execute(InsertTextParams::new(text.clone()))
                .await
                .map_err(AdapterError::cdp)?;
        }
        Ok(())
    }

    async fn press_key(&self, frame: &FrameTarget, key: &str) -> Result<(), AdapterError> {
        if *frame != FrameTarget::Main {
            warn!(%frame, key, "key events are delivered to the focused frame");
        }
        self.key_event(DispatchKeyEventType::KeyDown, key).await?;
        self.key_event(DispatchKeyEventType::KeyUp, key).await
    }

    async fn evaluate(&self, frame: &FrameTarget, source: &str) -> Result<Value, AdapterError> {
        self.eval(script::in_frame(frame, source)?).await
    }
}
