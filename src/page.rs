use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

/// How to find one element on the rendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: &str) -> Self {
        Locator::Css(selector.to_string())
    }

    pub fn xpath(expression: &str) -> Self {
        Locator::XPath(expression.to_string())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => write!(f, "css `{selector}`"),
            Locator::XPath(expression) => write!(f, "xpath `{expression}`"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleElement {
    pub text: String,
    pub outer_html: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealOutcome {
    Revealed,
    /// No clickable "load more" control appeared in time: the list is
    /// fully disclosed.
    Unavailable,
}

/// A live rendering of one campaign page.
///
/// Timeouts are not errors: `wait_until_visible` returns `None` and
/// `reveal_more` returns `Unavailable`. An `Err` means the automation
/// itself broke.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn current_markup(&self) -> anyhow::Result<String>;

    async fn reveal_more(&self) -> anyhow::Result<RevealOutcome>;

    async fn wait_until_visible(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> anyhow::Result<Option<VisibleElement>>;

    /// Tries each locator in turn and returns the first element found.
    async fn wait_for_any(
        &self,
        locators: &[Locator],
        timeout: Duration,
    ) -> anyhow::Result<Option<VisibleElement>> {
        for locator in locators {
            if let Some(element) = self.wait_until_visible(locator, timeout).await? {
                return Ok(Some(element));
            }
            tracing::debug!(%locator, "element not visible before timeout");
        }
        Ok(None)
    }
}
