use cdp_adapter::{FrameInfo, FrameTarget, PageDriver};
use tracing::debug;
use url::Url;

use crate::errors::ActionError;

fn without_query(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.split(['?', '#']).next().unwrap_or(raw).to_string(),
    }
}

/// Pick the frame a step was recorded in: exact url match ignoring the query,
/// then substring match, then the main frame.
pub fn match_frame(frames: &[FrameInfo], frame_url: Option<&str>) -> FrameTarget {
    let Some(wanted) = frame_url.map(str::trim).filter(|u| !u.is_empty()) else {
        return FrameTarget::Main;
    };
    let wanted_base = without_query(wanted);

    if let Some(frame) = frames
        .iter()
        .find(|frame| without_query(&frame.url) == wanted_base)
    {
        return frame.target.clone();
    }
    if let Some(frame) = frames
        .iter()
        .find(|frame| !frame.url.is_empty() && frame.url.contains(wanted))
    {
        return frame.target.clone();
    }
    FrameTarget::Main
}

pub async fn resolve_frame(
    driver: &dyn PageDriver,
    frame_url: Option<&str>,
) -> Result<FrameTarget, ActionError> {
    if frame_url.map_or(true, |u| u.trim().is_empty()) {
        return Ok(FrameTarget::Main);
    }
    let frames = driver.frames().await?;
    let target = match_frame(&frames, frame_url);
    debug!(frame_url, %target, "resolved recorded frame");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames() -> Vec<FrameInfo> {
        vec![
            FrameInfo {
                target: FrameTarget::Main,
                url: "https://app.test/home".into(),
            },
            FrameInfo {
                target: FrameTarget::Child(0),
                url: "https://widgets.test/chat?session=1".into(),
            },
            FrameInfo {
                target: FrameTarget::Child(1),
                url: "https://pay.test/form?id=9".into(),
            },
        ]
    }

    #[test]
    fn exact_match_ignores_query() {
        let target = match_frame(&frames(), Some("https://pay.test/form?id=3"));
        assert_eq!(target, FrameTarget::Child(1));
    }

    #[test]
    fn substring_match_then_main() {
        assert_eq!(
            match_frame(&frames(), Some("widgets.test/chat")),
            FrameTarget::Child(0)
        );
        assert_eq!(
            match_frame(&frames(), Some("https://elsewhere.test")),
            FrameTarget::Main
        );
        assert_eq!(match_frame(&frames(), None), FrameTarget::Main);
    }
}
