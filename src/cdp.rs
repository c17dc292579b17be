//! Chrome DevTools Protocol surface implementation

use crate::error::{Error, Result};
use crate::surface::{Clip, ConsoleMessage, RenderSurface, ScriptResult, SurfaceConfig};
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

const CONSOLE_BINDING: &str = "__slidecap_console";

/// Headless Chrome surface (uses the `headless_chrome` crate)
///
/// Launches one browser with a single tab. Every slide is written into a
/// fresh `about:blank` document of that tab.
pub struct CdpSurface {
    browser: Browser,
    tab: Arc<Tab>,
    config: SurfaceConfig,
}

impl CdpSurface {
    fn eval_value(&self, expression: &str, await_promise: bool) -> Result<serde_json::Value> {
        let remote = self
            .tab
            .evaluate(expression, await_promise)
            .map_err(|e| Error::ScriptError(format!("Evaluation failed: {}", e)))?;
        Ok(remote.value.unwrap_or(serde_json::Value::Null))
    }

    fn forward_console(&self) {
        let handler = Arc::new(move |payload: serde_json::Value| {
            // the page posts a JSON string
            let msg = match payload.as_str() {
                Some(s) => serde_json::from_str::<serde_json::Value>(s).unwrap_or(serde_json::Value::Null),
                None => payload,
            };
            let level = msg.get("level").and_then(|l| l.as_str()).unwrap_or("log").to_string();
            let text = match msg.get("args").and_then(|a| a.as_array()) {
                Some(args) => args
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .collect::<Vec<_>>()
                    .join(" "),
                None => String::new(),
            };
            ConsoleMessage { level, text }.log();
        });

        let _ = self
            .tab
            .expose_function(CONSOLE_BINDING, handler)
            .map_err(|e| warn!("Failed to expose console binding: {}", e))
            .ok();

        let wrapper = r#"(function(){
            const bind = window.{{BINDING}};
            if (!bind) return;
            ['log','info','warn','error','debug'].forEach(function(k){
                const orig = console[k];
                console[k] = function(...args){
                    try{ bind(JSON.stringify({ level:k, args: args.map(a=>String(a)) })); }catch(e){}
                    try{ orig.apply(console, args); }catch(e){}
                };
            });
        })();"#
            .replace("{{BINDING}}", CONSOLE_BINDING);

        let _ = self
            .tab
            .call_method(Page::AddScriptToEvaluateOnNewDocument {
                source: wrapper,
                world_name: None,
                include_command_line_api: None,
                run_immediately: None,
            })
            .map_err(|e| warn!("Failed to inject console wrapper: {}", e))
            .ok();
    }
}

/// JSON string literal for embedding arbitrary text in an expression
fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

impl RenderSurface for CdpSurface {
    fn new(config: SurfaceConfig) -> Result<Self>
    where
        Self: Sized,
    {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(config.sandbox)
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::InitializationError(format!("Failed to create tab: {}", e)))?;

        tab.set_default_timeout(Duration::from_millis(config.timeout_ms));
        tab.set_user_agent(&config.user_agent, None, None)
            .map_err(|e| Error::InitializationError(format!("Failed to set user agent: {}", e)))?;

        let surface = Self { browser, tab, config };
        if surface.config.forward_console {
            surface.forward_console();
        }
        Ok(surface)
    }

    fn mount(&mut self, html: &str) -> Result<()> {
        self.reset()?;

        let script = r#"new Promise(function(resolve){
            document.open();
            document.write({{HTML}});
            document.close();
            if (document.readyState === 'complete') { resolve(true); return; }
            window.addEventListener('load', function(){ resolve(true); });
            setTimeout(function(){ resolve(false); }, {{TIMEOUT}});
        })"#
            .replace("{{HTML}}", &js_string(html))
            .replace("{{TIMEOUT}}", &self.config.timeout_ms.to_string());

        let loaded = self
            .eval_value(&script, true)
            .map_err(|e| Error::RenderError(format!("Failed to mount document: {}", e)))?;
        if loaded != serde_json::Value::Bool(true) {
            debug!("document load did not complete within {}ms", self.config.timeout_ms);
        }
        Ok(())
    }

    fn navigate(&mut self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(|e| Error::NetworkError(format!("Navigation failed: {}", e)))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| Error::NetworkError(format!("Wait for navigation failed: {}", e)))?;
        Ok(())
    }

    fn execute_script(&mut self, source: &str) -> Result<ScriptResult> {
        // Inserted as a real <script> so declarations land in the global
        // scope; exceptions are reported through the window error event.
        let wrapper = r#"(function(src){
            var err = null;
            function onError(e){ err = String((e.error && e.error.stack) || e.message); }
            window.addEventListener('error', onError);
            var s = document.createElement('script');
            s.text = src;
            (document.head || document.documentElement).appendChild(s);
            window.removeEventListener('error', onError);
            return JSON.stringify(err === null ? { ok: true } : { ok: false, error: err });
        })({{SOURCE}})"#
            .replace("{{SOURCE}}", &js_string(source));

        let value = self.eval_value(&wrapper, false)?;
        let parsed = value
            .as_str()
            .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok())
            .unwrap_or(serde_json::Value::Null);

        match parsed.get("error").and_then(|e| e.as_str()) {
            Some(err) => Ok(ScriptResult::thrown(err)),
            None => Ok(ScriptResult::ok("null")),
        }
    }

    fn evaluate(&mut self, expression: &str) -> Result<ScriptResult> {
        let value = self.eval_value(expression, true)?;
        let value = match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(ScriptResult::ok(value))
    }

    fn wait_for_fonts(&mut self, timeout_ms: u64) -> Result<()> {
        let script = r#"Promise.race([
            (document.fonts ? document.fonts.ready : Promise.resolve()).then(function(){ return true; }),
            new Promise(function(r){ setTimeout(function(){ r(false); }, {{TIMEOUT}}); })
        ])"#
            .replace("{{TIMEOUT}}", &timeout_ms.to_string());

        if self.eval_value(&script, true)? != serde_json::Value::Bool(true) {
            debug!("fonts not ready after {}ms, continuing", timeout_ms);
        }
        Ok(())
    }

    fn element_clip(&mut self, selector: &str) -> Result<Option<Clip>> {
        let script = r#"(function(){
            var el = document.querySelector({{SELECTOR}});
            if (!el) return null;
            var r = el.getBoundingClientRect();
            return JSON.stringify({ x: r.left + window.scrollX, y: r.top + window.scrollY, width: r.width, height: r.height });
        })()"#
            .replace("{{SELECTOR}}", &js_string(selector));

        let value = self.eval_value(&script, false)?;
        let Some(raw) = value.as_str() else {
            return Ok(None);
        };
        let rect: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| Error::RenderError(format!("Bad bounding box for {}: {}", selector, e)))?;
        let num = |k: &str| rect.get(k).and_then(|v| v.as_f64()).unwrap_or(0.0);
        if num("width") <= 0.0 || num("height") <= 0.0 {
            return Ok(None);
        }
        Ok(Some(Clip {
            x: num("x"),
            y: num("y"),
            width: num("width"),
            height: num("height"),
            scale: 1.0,
        }))
    }

    fn capture_png(&mut self, clip: Clip) -> Result<Vec<u8>> {
        let viewport = Page::Viewport {
            x: clip.x,
            y: clip.y,
            width: clip.width,
            height: clip.height,
            scale: clip.scale,
        };
        self.tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, Some(viewport), true)
            .map_err(|e| Error::RenderError(format!("Screenshot failed: {}", e)))
    }

    fn reset(&mut self) -> Result<()> {
        self.navigate("about:blank")
            .map_err(|e| Error::RenderError(format!("Failed to reset surface: {}", e)))
    }

    fn close(self) -> Result<()> {
        // Drop the tab before the browser so the child process exits promptly
        drop(self.tab);
        drop(self.browser);
        Ok(())
    }
}
