// Everything the sweep needs from a browser.
//
// The core never sees DOM handles. Elements are addressed positionally
// (`index`-th match of a selector, optionally scoped to a parent), so they
// go stale when the list reflows. A ref can carry the handle its row must
// still show; the actuator checks it in the same step that acts on the element.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sweep_common::{normalize_handle, InteractionError};

pub type ActuatorResult<T> = std::result::Result<T, InteractionError>;

/// Positional reference to an element on the current page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementRef {
    pub selector: String,
    pub index: usize,
    /// Only matches whose text contains this label are counted.
    pub label: Option<String>,
    pub within: Option<Box<ElementRef>>,
    /// Identity the element must still show when it is resolved.
    pub expect: Option<RowIdentity>,
}

/// A row is still the expected account when one of `fields` reads `handle`,
/// or its text mentions `@handle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowIdentity {
    pub handle: String,
    pub fields: Vec<String>,
}

impl RowIdentity {
    pub fn matches(&self, field_values: &[Option<String>], text: &str) -> bool {
        field_values
            .iter()
            .flatten()
            .any(|v| normalize_handle(v) == self.handle)
            || self.mentioned_in(text)
    }

    /// `@handle` appears in `text` as a whole token.
    fn mentioned_in(&self, text: &str) -> bool {
        let needle = format!("@{}", self.handle);
        text.match_indices(&needle).any(|(at, _)| {
            !text[at + needle.len()..].starts_with(is_handle_char)
        })
    }
}

fn is_handle_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// One list item read in a single page load: its full text, and the text of
/// the first descendant matching each requested field selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RowSnapshot {
    pub text: String,
    pub fields: Vec<Option<String>>,
}

impl ElementRef {
    pub fn nth(selector: &str, index: usize) -> Self {
        Self {
            selector: selector.to_string(),
            index,
            label: None,
            within: None,
            expect: None,
        }
    }

    /// Require the element to still show `handle` when it is acted on.
    pub fn showing(mut self, handle: &str, fields: &[&str]) -> Self {
        self.expect = Some(RowIdentity {
            handle: handle.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        });
        self
    }

    pub fn child(parent: &ElementRef, selector: &str, label: Option<&str>, index: usize) -> Self {
        Self {
            selector: selector.to_string(),
            index,
            label: label.map(String::from),
            within: Some(Box::new(parent.clone())),
            expect: None,
        }
    }
}

#[async_trait]
pub trait Actuator: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> ActuatorResult<()>;

    async fn current_url(&self) -> ActuatorResult<String>;

    /// Wait until something matches `selector`. Expiry is `InteractionError::Timeout`.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> ActuatorResult<()>;

    /// All matches of `selector` (within `scope` if given) whose text contains `label`.
    async fn find_all(
        &self,
        scope: Option<&ElementRef>,
        selector: &str,
        label: Option<&str>,
    ) -> ActuatorResult<Vec<ElementRef>>;

    /// Every item matching `item_selector`, in document order, read in one
    /// pass so texts and fields always belong to the same row.
    async fn rows(
        &self,
        item_selector: &str,
        field_selectors: &[&str],
    ) -> ActuatorResult<Vec<RowSnapshot>>;

    /// Visible text of the whole page.
    async fn page_text(&self) -> ActuatorResult<String>;

    /// Click `element`. A ref whose row no longer shows its expected identity
    /// fails with `StaleReference` and nothing is clicked.
    async fn click(&self, element: &ElementRef) -> ActuatorResult<()>;

    async fn scroll_into_view(&self, element: &ElementRef) -> ActuatorResult<()>;

    /// Scroll `container` (or the window) to the end so lazy items render.
    /// Returns how many `item_selector` matches are loaded afterwards; later
    /// calls see at least that many.
    async fn scroll_to_end(
        &self,
        container: Option<&str>,
        item_selector: &str,
    ) -> ActuatorResult<usize>;

    /// Serialized authenticated session (cookies).
    async fn export_session(&self) -> ActuatorResult<String>;

    async fn import_session(&self, blob: &str) -> ActuatorResult<()>;
}
