use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use canteen_core::extract::MenuSession;
use canteen_core::extract::snapshot::{PageSnapshot, RawDetail};
use canteen_core::models::MenuInfo;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

const LIST_VARIANTS: &str = r"
return Array.from(document.querySelectorAll('.k10-menu-selector__options-li')).map((el) => ({
  identifier: el.getAttribute('data-menu-identifier') || '',
  name: (el.textContent || '').trim(),
}));
";

const SELECT_VARIANT: &str = r#"
const option = document.querySelector(
  `.k10-menu-selector__options-li[data-menu-identifier="${CSS.escape(arguments[0])}"]`
);
if (!option) return false;
option.click();
return true;
"#;

const SNAPSHOT: &str = r"
const text = (el) => (el ? (el.textContent || '').trim() : null);
return {
  days: Array.from(document.querySelectorAll('.k10-course.k10-course_level_1')).map((day) => ({
    name: text(day.querySelector('.k10-course__name')),
    categories: Array.from(day.querySelectorAll('.k10-course.k10-course_level_2')).map((cat) => ({
      name: text(cat.querySelector('.k10-course__name')),
      items: Array.from(cat.querySelectorAll('.k10-recipe.k10-recipe_menu-item')).map((item) => {
        const modal = item.querySelector('.k10-recipe-modal');
        return {
          id: modal ? modal.getAttribute('data-recipe-id') : null,
          name: text(item.querySelector('.k10-recipe__name')),
          labels: item.getAttribute('data-labels'),
        };
      }),
    })),
  })),
};
";

const OPEN_DETAIL: &str = r#"
const modal = document.querySelector(`.k10-recipe-modal[data-recipe-id="${CSS.escape(arguments[0])}"]`);
if (!modal) return false;
if (typeof window.$ !== 'undefined') {
  window.$(modal).modal('show');
} else {
  modal.classList.add('show', 'in');
  modal.setAttribute('style', 'display: block;');
  const backdrop = document.createElement('div');
  backdrop.className = 'modal-backdrop fade in';
  document.body.appendChild(backdrop);
}
return true;
"#;

const DETAIL_VISIBLE: &str = r"
return document.querySelector('.k10-recipe-modal.show') !== null;
";

const READ_DETAIL: &str = r#"
const modal = document.querySelector(`.k10-recipe-modal[data-recipe-id="${CSS.escape(arguments[0])}"]`);
if (!modal) return null;
const text = (sel) => {
  const el = modal.querySelector(sel);
  return el ? (el.textContent || '').trim() : null;
};
const allergen = (group) =>
  text(`.k10-recipe-modal__allergens_${group} .k10-recipe-modal__allergens_value`);
return {
  ingredients: text('.k10-w-recipe__ingredient'),
  suitableFor: allergen('suitable'),
  contains: allergen('contains'),
  mayContain: allergen('may'),
  nutrients: Array.from(
    modal.querySelectorAll('.k10-recipe-modal__nutrients-table tr[data-nutr-name]')
  ).map((row) => {
    const cell = row.querySelector('.k10-recipe-modal__td_val');
    return {
      name: row.getAttribute('data-nutr-name') || '',
      value: cell ? (cell.textContent || '').trim() : '',
    };
  }),
};
"#;

const CLOSE_DETAIL: &str = r"
const button = document.querySelector('.k10-recipe-modal.show .close');
if (button) {
  button.click();
  return;
}
const modal = document.querySelector('.k10-recipe-modal.show');
if (modal) modal.classList.remove('show');
const backdrop = document.querySelector('.modal-backdrop');
if (backdrop) backdrop.remove();
";

#[derive(Deserialize)]
struct Reply<T> {
    value: T,
}

#[derive(Deserialize)]
struct ErrorValue {
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewSession {
    session_id: String,
}

/// A headless browser session driven over the W3C WebDriver protocol
/// (chromedriver, geckodriver, selenium).
///
/// The blocking [`MenuSession`] methods run on the current tokio runtime, so
/// the pipeline must be driven from `spawn_blocking`.
pub struct WebDriverSession {
    client: reqwest::Client,
    rt: tokio::runtime::Handle,
    endpoint: String,
    session_id: Option<String>,
}

impl WebDriverSession {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("canteen/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            rt: tokio::runtime::Handle::current(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            session_id: None,
        })
    }

    fn session_path(&self, suffix: &str) -> Result<String> {
        let id = self
            .session_id
            .as_deref()
            .context("No WebDriver session is open")?;
        Ok(format!("/session/{id}{suffix}"))
    }

    async fn command<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T> {
        let url = format!("{}{path}", self.endpoint);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let resp = request
            .send()
            .await
            .with_context(|| format!("Failed to reach WebDriver at {}", self.endpoint))?;

        let status = resp.status();
        let bytes = resp.bytes().await.context("Failed to read WebDriver response")?;
        decode_reply(status, &bytes)
    }

    async fn start_session(&self) -> Result<String> {
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": ["--headless=new", "--disable-gpu"] }
                }
            }
        });
        let session: NewSession = self
            .command(Method::POST, "/session", Some(capabilities))
            .await
            .context("Failed to start WebDriver session")?;
        Ok(session.session_id)
    }

    async fn execute<T: DeserializeOwned>(&self, script: &str, args: Vec<Value>) -> Result<T> {
        let path = self.session_path("/execute/sync")?;
        self.command(
            Method::POST,
            &path,
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    async fn wait_visible(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.execute::<bool>(DETAIL_VISIBLE, vec![]).await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("Detail overlay not visible after {}ms", timeout.as_millis());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn decode_reply<T: DeserializeOwned>(status: reqwest::StatusCode, bytes: &[u8]) -> Result<T> {
    if !status.is_success() {
        if let Ok(reply) = serde_json::from_slice::<Reply<ErrorValue>>(bytes) {
            bail!("WebDriver error ({status}): {} {}", reply.value.error, reply.value.message);
        }
        bail!("WebDriver returned {status}");
    }
    let reply: Reply<T> =
        serde_json::from_slice(bytes).context("Failed to parse WebDriver response")?;
    Ok(reply.value)
}

impl MenuSession for WebDriverSession {
    fn open(&mut self, url: &str) -> Result<()> {
        if self.session_id.is_none() {
            let id = self.rt.block_on(self.start_session())?;
            debug!(session = %id, "webdriver session started");
            self.session_id = Some(id);
        }
        let path = self.session_path("/url")?;
        self.rt
            .block_on(self.command::<Value>(Method::POST, &path, Some(json!({ "url": url }))))
            .with_context(|| format!("Failed to navigate to {url}"))?;
        Ok(())
    }

    fn list_variants(&mut self) -> Result<Vec<MenuInfo>> {
        self.rt.block_on(self.execute(LIST_VARIANTS, vec![]))
    }

    fn select_variant(&mut self, identifier: &str) -> Result<()> {
        let clicked: bool = self
            .rt
            .block_on(self.execute(SELECT_VARIANT, vec![json!(identifier)]))?;
        if !clicked {
            bail!("Menu option '{identifier}' not found on page");
        }
        Ok(())
    }

    fn snapshot(&mut self) -> Result<PageSnapshot> {
        self.rt.block_on(self.execute(SNAPSHOT, vec![]))
    }

    fn open_detail(&mut self, item_id: &str) -> Result<()> {
        let found: bool = self
            .rt
            .block_on(self.execute(OPEN_DETAIL, vec![json!(item_id)]))?;
        if !found {
            bail!("No detail overlay for item '{item_id}'");
        }
        Ok(())
    }

    fn wait_for_detail(&mut self, _item_id: &str, timeout: Duration) -> Result<()> {
        self.rt.block_on(self.wait_visible(timeout))
    }

    fn read_detail(&mut self, item_id: &str) -> Result<Option<RawDetail>> {
        self.rt
            .block_on(self.execute(READ_DETAIL, vec![json!(item_id)]))
    }

    fn close_detail(&mut self) -> Result<()> {
        self.rt
            .block_on(self.execute::<Value>(CLOSE_DETAIL, vec![]))?;
        Ok(())
    }

    fn pause(&mut self, duration: Duration) {
        self.rt.block_on(tokio::time::sleep(duration));
    }

    fn close(&mut self) -> Result<()> {
        let Some(id) = self.session_id.take() else {
            return Ok(());
        };
        self.rt
            .block_on(self.command::<Value>(Method::DELETE, &format!("/session/{id}"), None))
            .context("Failed to end WebDriver session")?;
        debug!(session = %id, "webdriver session closed");
        Ok(())
    }
}
