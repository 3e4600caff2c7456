use crate::config::BrowserConfig;
use crate::scrapers::interception::TapSender;
use crate::scrapers::traits::BrowserDriver;
use crate::scrapers::types::AdvanceMethod;
use anyhow::{Context, Result};
use headless_chrome::protocol::cdp::Network::events::ResponseReceivedEventParams;
use headless_chrome::protocol::cdp::Network::GetResponseBodyReturnObject;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const TAP_HANDLER: &str = "observation-tap";

const REVEAL_GALLERY_JS: &str = r#"
(() => {
    const control = document.querySelector("li[class*='photo-'] span.all-photos");
    if (!control) return false;
    control.click();
    return true;
})()
"#;

const NEXT_PHOTO_JS: &str = r#"
(() => {
    let next = document.querySelector("button.rotate-btn.rotate-arr-r")
        || document.querySelector("button[class*='rotate'][class*='arr-r']")
        || document.querySelector("button[aria-label*='наступн']");
    if (!next) {
        next = Array.from(document.querySelectorAll("button"))
            .find(b => b.textContent.includes("→"));
    }
    if (!next || next.disabled) return false;
    next.click();
    return true;
})()
"#;

const GALLERY_SELECTOR: &str = ".gallery-container, .photo-gallery, [class*='gallery']";

/// Headless Chrome session used to enrich listings
pub struct ChromeBrowser {
    // Dropping the browser shuts Chrome down.
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeBrowser {
    /// Launch Chrome and open the single working tab
    pub fn launch(config: &BrowserConfig, user_agent: &str) -> Result<Self> {
        info!("🚀 Launching Chrome (headless: {})...", config.headless);

        let user_agent_arg = format!("--user-agent={user_agent}");
        let args = vec![
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-notifications"),
            OsStr::new("--disable-extensions"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new(user_agent_arg.as_str()),
        ];

        let options = LaunchOptions::default_builder()
            .headless(config.headless)
            .window_size(Some((config.window_width, config.window_height)))
            .idle_browser_timeout(Duration::from_secs(600))
            .args(args)
            .build()
            .context("Failed to build launch options")?;

        let browser = Browser::new(options).context("Failed to launch Chrome browser")?;
        let tab = browser.new_tab().context("Failed to open browser tab")?;
        tab.set_default_timeout(Duration::from_secs(15));

        info!("✅ Chrome ready");
        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    fn eval_bool(&self, script: &str) -> Result<bool> {
        let result = self.tab.evaluate(script, false)?;
        Ok(result
            .value
            .and_then(|value| value.as_bool())
            .unwrap_or(false))
    }

    fn press_arrow_right(&self) -> Result<()> {
        let _ = self.tab.evaluate("document.body && document.body.focus()", false);
        self.tab.press_key("ArrowRight")?;
        Ok(())
    }
}

impl BrowserDriver for ChromeBrowser {
    fn attach_tap(&mut self, sender: TapSender) -> Result<()> {
        self.tab
            .register_response_handling(
                TAP_HANDLER,
                Box::new(
                    move |params: ResponseReceivedEventParams,
                          _fetch_body: &dyn Fn() -> Result<GetResponseBodyReturnObject>| {
                        sender.observe(params.response.url);
                    },
                ),
            )
            .context("Failed to enable network observation")?;
        Ok(())
    }

    fn navigate(&mut self, url: &str) -> Result<()> {
        self.tab.navigate_to(url)?;
        self.tab.wait_until_navigated()?;
        Ok(())
    }

    fn reveal_gallery(&mut self) -> Result<bool> {
        self.eval_bool(REVEAL_GALLERY_JS)
    }

    fn advance(&mut self, method: AdvanceMethod) -> Result<bool> {
        match method {
            AdvanceMethod::NextButton => self.eval_bool(NEXT_PHOTO_JS),
            AdvanceMethod::ArrowKey => {
                self.press_arrow_right()?;
                Ok(true)
            }
            AdvanceMethod::GalleryClickKey => {
                let gallery = match self.tab.find_element(GALLERY_SELECTOR) {
                    Ok(element) => element,
                    Err(_) => {
                        debug!("Gallery container not found");
                        return Ok(false);
                    }
                };
                gallery.click()?;
                self.press_arrow_right()?;
                Ok(true)
            }
        }
    }
}
