// --- Browserless actuator ---
//
// Browserless /function calls are stateless: every call gets a fresh page.
// The actuator keeps the session (cookies, current URL, how far the list was
// scrolled) on this side and replays it at the start of each call, then runs
// the single requested operation. A ref that names the handle its row must
// show is checked inside that same call, so a reflow between calls fails as
// stale instead of acting on the wrong row.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use browserless_client::{BrowserlessClient, BrowserlessError, LaunchOptions};
use sweep_common::{Config, InteractionError};

use crate::actuator::{Actuator, ActuatorResult, ElementRef, RowSnapshot};

/// Headroom on top of the interaction timeout for session replay.
const REPLAY_HEADROOM: Duration = Duration::from_secs(90);

const SCRIPT: &str = r#"
export default async function ({ page, context }) {
  const { url, cookies, scroll, op, timeoutMs } = context;
  const reply = (data) => ({ data, type: "application/json" });
  const fail = (kind, message) => reply({ error: { kind, message } });
  const stale = (message) => Object.assign(new Error(message), { name: "StaleReference" });

  const scrollEnd = (sel) => {
    const c = sel && document.querySelector(sel);
    if (c) c.scrollTop = c.scrollHeight;
    else window.scrollTo(0, document.body.scrollHeight);
  };
  const pause = (ms) => new Promise((r) => setTimeout(r, ms));

  const textOf = (h) => h.evaluate((n) => n.innerText || n.textContent || "");
  const norm = (s) => (s || "").trim().replace(/^@/, "").trim();
  const escape = (s) => s.replace(/[.*+?^${}()|[\]\\]/g, "\\$&");

  const matches = async (root, selector, label) => {
    const found = [];
    for (const h of await root.$$(selector)) {
      if (!label || (await textOf(h)).includes(label)) found.push(h);
    }
    return found;
  };

  const shows = async (el, expect) => {
    for (const f of expect.fields) {
      const v = await el.$eval(f, (n) => n.innerText || n.textContent || "").catch(() => null);
      if (v && norm(v) === expect.handle) return true;
    }
    const mention = new RegExp("@" + escape(expect.handle) + "(?![A-Za-z0-9_.])");
    return mention.test(await textOf(el));
  };

  const resolve = async (ref) => {
    let root = page;
    if (ref.within) {
      root = await resolve(ref.within);
      if (!root) return null;
    }
    const el = (await matches(root, ref.selector, ref.label))[ref.index] || null;
    if (el && ref.expect && !(await shows(el, ref.expect))) {
      throw stale(ref.selector + " #" + ref.index + " no longer shows @" + ref.expect.handle);
    }
    return el;
  };

  try {
    if (cookies && cookies.length) await page.setCookie(...cookies);

    const target = op.kind === "navigate" ? op.url : url;
    if (target) await page.goto(target, { waitUntil: "domcontentloaded", timeout: timeoutMs });

    // Fresh page: scroll back down until the rows seen so far are loaded again.
    if (op.kind !== "navigate" && scroll && scroll.min > 0) {
      let last = -1;
      let stable = 0;
      while (stable < 3) {
        const n = (await page.$$(scroll.item)).length;
        if (n >= scroll.min) break;
        if (n === last) stable++;
        else { stable = 0; last = n; }
        await page.evaluate(scrollEnd, scroll.container || null);
        await pause(1000);
      }
    }

    let result = null;
    switch (op.kind) {
      case "navigate":
      case "export_session":
        break;
      case "current_url":
        result = page.url();
        break;
      case "wait_for":
        await page.waitForSelector(op.selector, { timeout: timeoutMs });
        break;
      case "find_all": {
        const root = op.scope ? await resolve(op.scope) : page;
        if (!root) return fail("not_found", "scope element not found");
        result = (await matches(root, op.selector, op.label)).length;
        break;
      }
      case "rows":
        result = await page.$$eval(
          op.item,
          (items, fields) => items.map((i) => {
            const read = (n) => (n ? (n.innerText || n.textContent || "") : null);
            return { text: read(i) || "", fields: fields.map((f) => read(i.querySelector(f))) };
          }),
          op.fields,
        );
        break;
      case "page_text":
        result = await page.evaluate(() => document.body.innerText || "");
        break;
      case "click":
      case "scroll_into_view": {
        const el = await resolve(op.element);
        if (!el) return fail("not_found", "element not found");
        if (op.kind === "click") await el.click();
        else await el.evaluate((n) => n.scrollIntoView({ block: "center" }));
        break;
      }
      case "scroll_to_end":
        await page.evaluate(scrollEnd, op.container || null);
        await pause(500);
        result = (await page.$$(op.item)).length;
        break;
      default:
        return fail("backend", "unknown operation " + op.kind);
    }

    return reply({ result, cookies: await page.cookies(), url: page.url() });
  } catch (e) {
    const name = e && e.name;
    const kind = name === "TimeoutError" ? "timeout" : name === "StaleReference" ? "stale" : "backend";
    return fail(kind, String((e && e.message) || e));
  }
}
"#;

/// One operation, tagged the way the script dispatches on it.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Op<'a> {
    Navigate {
        url: &'a str,
    },
    CurrentUrl,
    WaitFor {
        selector: &'a str,
    },
    FindAll {
        scope: Option<&'a ElementRef>,
        selector: &'a str,
        label: Option<&'a str>,
    },
    Rows {
        item: &'a str,
        fields: &'a [&'a str],
    },
    PageText,
    Click {
        element: &'a ElementRef,
    },
    ScrollIntoView {
        element: &'a ElementRef,
    },
    ScrollToEnd {
        container: Option<&'a str>,
        item: &'a str,
    },
    ExportSession,
}

impl Op<'_> {
    fn describe(&self) -> String {
        match self {
            Op::Navigate { url } => format!("navigate to {url}"),
            Op::WaitFor { selector } => format!("wait for {selector}"),
            Op::FindAll { selector, .. } => format!("find {selector}"),
            Op::Rows { item, .. } => format!("read {item}"),
            Op::ScrollToEnd { item, .. } => format!("scroll for more {item}"),
            Op::Click { element } => format!("click {}", element.selector),
            Op::ScrollIntoView { element } => format!("scroll to {}", element.selector),
            other => format!("{other:?}"),
        }
    }
}

/// How far the list was scrolled, so a fresh page can be brought back to it.
#[derive(Debug, Clone, Default, Serialize)]
struct ScrollState {
    container: Option<String>,
    item: String,
    min: usize,
}

impl ScrollState {
    /// Raise the replay depth to `loaded` items of `item`.
    fn reached(
        previous: Option<&ScrollState>,
        container: Option<String>,
        item: &str,
        loaded: usize,
    ) -> Self {
        let min = match previous {
            Some(sc) if sc.item == item => sc.min.max(loaded),
            _ => loaded,
        };
        Self {
            container,
            item: item.to_string(),
            min,
        }
    }
}

/// Runs the script against a fresh browser page.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, context: &Value) -> Result<Value, BrowserlessError>;
}

#[async_trait]
impl ScriptRunner for BrowserlessClient {
    async fn run(&self, context: &Value) -> Result<Value, BrowserlessError> {
        self.function(SCRIPT, context).await
    }
}

#[derive(Debug, Clone, Default)]
struct Session {
    url: Option<String>,
    cookies: Vec<Value>,
    scroll: Option<ScrollState>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    cookies: Option<Vec<Value>>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<ReplyError>,
}

#[derive(Debug, Deserialize)]
struct ReplyError {
    kind: String,
    message: String,
}

pub struct BrowserlessActuator {
    runner: Box<dyn ScriptRunner>,
    timeout: Duration,
    session: Mutex<Session>,
}

impl BrowserlessActuator {
    pub fn new(config: &Config) -> Result<Self, BrowserlessError> {
        let launch = LaunchOptions {
            headless: config.headless,
            ..LaunchOptions::default()
        };
        let client = BrowserlessClient::new(
            &config.browserless_url,
            config.browserless_token.as_deref(),
            launch,
            config.interaction_timeout + REPLAY_HEADROOM,
        )?;
        info!(
            base_url = config.browserless_url.as_str(),
            headless = config.headless,
            "Using Browserless actuator"
        );
        Ok(Self::with_runner(Box::new(client), config.interaction_timeout))
    }

    pub fn with_runner(runner: Box<dyn ScriptRunner>, timeout: Duration) -> Self {
        Self {
            runner,
            timeout,
            session: Mutex::new(Session::default()),
        }
    }

    fn snapshot(&self) -> ActuatorResult<Session> {
        self.session
            .lock()
            .map(|s| s.clone())
            .map_err(|_| InteractionError::Backend("session lock poisoned".to_string()))
    }

    fn update(&self, apply: impl FnOnce(&mut Session)) -> ActuatorResult<()> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| InteractionError::Backend("session lock poisoned".to_string()))?;
        apply(&mut session);
        Ok(())
    }

    async fn call(&self, op: Op<'_>, timeout: Duration) -> ActuatorResult<Value> {
        let session = self.snapshot()?;
        let what = op.describe();
        debug!(op = what.as_str(), "Browserless call");

        let context = json!({
            "url": session.url,
            "cookies": session.cookies,
            "scroll": session.scroll,
            "op": op,
            "timeoutMs": timeout.as_millis() as u64,
        });

        let value = self
            .runner
            .run(&context)
            .await
            .map_err(|e| map_client_error(e, timeout, &what))?;
        let reply: Reply = Self::decode(value)?;

        if let Some(error) = reply.error {
            return Err(map_reply_error(error, timeout, &what));
        }

        self.update(|s| {
            if let Some(cookies) = reply.cookies {
                s.cookies = cookies;
            }
            if let Some(url) = reply.url {
                s.url = Some(url);
            }
        })?;
        Ok(reply.result)
    }

    fn decode<T: serde::de::DeserializeOwned>(value: Value) -> ActuatorResult<T> {
        serde_json::from_value(value)
            .map_err(|e| InteractionError::Backend(format!("unexpected reply: {e}")))
    }
}

fn map_client_error(err: BrowserlessError, timeout: Duration, what: &str) -> InteractionError {
    match err {
        BrowserlessError::Timeout => InteractionError::Timeout {
            after: timeout,
            what: what.to_string(),
        },
        BrowserlessError::Api { status: 408, .. } => InteractionError::Timeout {
            after: timeout,
            what: what.to_string(),
        },
        other => InteractionError::Backend(other.to_string()),
    }
}

fn map_reply_error(err: ReplyError, timeout: Duration, what: &str) -> InteractionError {
    match err.kind.as_str() {
        "timeout" => InteractionError::Timeout {
            after: timeout,
            what: what.to_string(),
        },
        "not_found" => InteractionError::ElementNotFound(format!("{what}: {}", err.message)),
        "stale" => InteractionError::StaleReference(err.message),
        _ => InteractionError::Backend(err.message),
    }
}

/// Refs for `count` matches, in the shape the script resolves them.
fn refs_for(
    scope: Option<&ElementRef>,
    selector: &str,
    label: Option<&str>,
    count: usize,
) -> Vec<ElementRef> {
    (0..count)
        .map(|index| match scope {
            Some(parent) => ElementRef::child(parent, selector, label, index),
            None => ElementRef {
                label: label.map(String::from),
                ..ElementRef::nth(selector, index)
            },
        })
        .collect()
}

#[async_trait]
impl Actuator for BrowserlessActuator {
    async fn navigate(&self, url: &str, timeout: Duration) -> ActuatorResult<()> {
        self.call(Op::Navigate { url }, timeout).await?;
        // `call` already recorded where the page landed after redirects.
        self.update(|s| s.scroll = None)
    }

    async fn current_url(&self) -> ActuatorResult<String> {
        Self::decode(self.call(Op::CurrentUrl, self.timeout).await?)
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> ActuatorResult<()> {
        self.call(Op::WaitFor { selector }, timeout).await?;
        Ok(())
    }

    async fn find_all(
        &self,
        scope: Option<&ElementRef>,
        selector: &str,
        label: Option<&str>,
    ) -> ActuatorResult<Vec<ElementRef>> {
        let op = Op::FindAll {
            scope,
            selector,
            label,
        };
        let count: usize = Self::decode(self.call(op, self.timeout).await?)?;
        Ok(refs_for(scope, selector, label, count))
    }

    async fn rows(
        &self,
        item_selector: &str,
        field_selectors: &[&str],
    ) -> ActuatorResult<Vec<RowSnapshot>> {
        let op = Op::Rows {
            item: item_selector,
            fields: field_selectors,
        };
        let rows: Vec<RowSnapshot> = Self::decode(self.call(op, self.timeout).await?)?;

        // Later calls replay the scroll until at least this many items exist.
        let loaded = rows.len();
        self.update(|s| {
            let container = s.scroll.as_ref().and_then(|sc| sc.container.clone());
            s.scroll = Some(ScrollState::reached(
                s.scroll.as_ref(),
                container,
                item_selector,
                loaded,
            ));
        })?;
        Ok(rows)
    }

    async fn page_text(&self) -> ActuatorResult<String> {
        Self::decode(self.call(Op::PageText, self.timeout).await?)
    }

    async fn click(&self, element: &ElementRef) -> ActuatorResult<()> {
        self.call(Op::Click { element }, self.timeout).await?;
        // The clicked row may drop out of the list.
        self.update(|s| {
            if let Some(scroll) = s.scroll.as_mut() {
                scroll.min = scroll.min.saturating_sub(1);
            }
        })
    }

    async fn scroll_into_view(&self, element: &ElementRef) -> ActuatorResult<()> {
        self.call(Op::ScrollIntoView { element }, self.timeout).await?;
        Ok(())
    }

    async fn scroll_to_end(
        &self,
        container: Option<&str>,
        item_selector: &str,
    ) -> ActuatorResult<usize> {
        let op = Op::ScrollToEnd {
            container,
            item: item_selector,
        };
        let loaded: usize = Self::decode(self.call(op, self.timeout).await?)?;
        self.update(|s| {
            s.scroll = Some(ScrollState::reached(
                s.scroll.as_ref(),
                container.map(String::from),
                item_selector,
                loaded,
            ));
        })?;
        Ok(loaded)
    }

    async fn export_session(&self) -> ActuatorResult<String> {
        if self.snapshot()?.url.is_some() {
            self.call(Op::ExportSession, self.timeout).await?;
        }
        let cookies = self.snapshot()?.cookies;
        serde_json::to_string(&cookies)
            .map_err(|e| InteractionError::Backend(format!("session encode failed: {e}")))
    }

    async fn import_session(&self, blob: &str) -> ActuatorResult<()> {
        let cookies: Vec<Value> = serde_json::from_str(blob)
            .map_err(|e| InteractionError::Backend(format!("session blob is not a cookie list: {e}")))?;
        info!(cookies = cookies.len(), "Imported session cookies");
        self.update(|s| s.cookies = cookies)
    }
}
