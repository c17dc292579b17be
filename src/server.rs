//! HTTP render service.
//!
//! `POST /render` renders a URL or a markup string into a single PNG or PDF.
//! Request handling lives in [`RenderService::handle`], which is independent
//! of the transport; [`serve`] drives it from a `tiny_http` accept loop.

use crate::assemble::{Assembler, FailurePolicy};
use crate::async_api::SurfaceWorker;
use crate::capture::{CaptureResult, CaptureState};
use crate::error::{Error, Result};
use crate::rendering::Screenshot;
use crate::surface::{Clip, RenderSurface, SurfaceConfig};
use crate::{OutputFormat, Viewport};
use futures::future::BoxFuture;
use log::{error, info, warn};
use serde::Deserialize;
use std::io::Read;
use std::marker::PhantomData;
use std::time::Duration;

/// Largest accepted request body
pub const BODY_LIMIT: usize = 5 * 1024 * 1024;

const FREEZE_STYLE: &str = "*{animation:none !important;transition:none !important;}";

/// Service settings, read from flags or the environment
#[derive(Debug, Clone, clap::Args)]
pub struct ServiceConfig {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,
    /// Required value of the X-API-Key header; empty disables the check
    #[arg(long, env = "API_KEY")]
    pub api_key: Option<String>,
    /// Comma-separated origins; `*` or empty allows all
    #[arg(long, env = "ALLOWED_ORIGINS", default_value = "*")]
    pub allowed_origins: String,
    /// Run Chrome without its sandbox (needed in most containers)
    #[arg(long, env = "NO_SANDBOX")]
    pub no_sandbox: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            api_key: None,
            allowed_origins: "*".to_string(),
            no_sandbox: false,
        }
    }
}

impl ServiceConfig {
    /// Surface settings for each render
    pub fn surface_config(&self) -> SurfaceConfig {
        SurfaceConfig {
            sandbox: !self.no_sandbox,
            ..Default::default()
        }
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        let list: Vec<&str> = self
            .allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .collect();
        self.allowed_origins.trim() == "*" || list.is_empty() || list.contains(&origin)
    }

    fn key_accepted(&self, key: Option<&str>) -> bool {
        match self.api_key.as_deref() {
            None | Some("") => true,
            Some(expected) => key == Some(expected),
        }
    }
}

fn default_format() -> String {
    "png".to_string()
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_scale() -> f64 {
    2.0
}
fn default_wait() -> u64 {
    1000
}

/// JSON body of `POST /render`
#[derive(Debug, Clone, Deserialize)]
pub struct RenderRequest {
    pub url: Option<String>,
    pub html: Option<String>,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default = "default_wait")]
    pub wait: u64,
    pub selector: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSource {
    Url(String),
    Html(String),
}

/// A validated render request
#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    pub source: PageSource,
    /// `Png` means a single PNG image here, not an archive
    pub format: OutputFormat,
    pub viewport: Viewport,
    pub scale: f64,
    pub wait_ms: u64,
    pub selector: String,
}

impl RenderRequest {
    /// Validate into a job; the error is the client-facing message
    pub fn into_job(self) -> std::result::Result<RenderJob, &'static str> {
        let source = match (self.html.filter(|h| !h.is_empty()), self.url) {
            (Some(html), _) => PageSource::Html(html),
            (None, Some(url)) if is_http_url(&url) => PageSource::Url(url),
            _ => return Err("invalid url or html"),
        };
        let format = match self.format.as_str() {
            "png" => OutputFormat::Png,
            "pdf" => OutputFormat::Pdf,
            _ => return Err("invalid format"),
        };
        if self.width == 0 || self.height == 0 || !(self.scale.is_finite() && self.scale > 0.0) {
            return Err("invalid dimensions");
        }
        Ok(RenderJob {
            source,
            format,
            viewport: Viewport {
                width: self.width,
                height: self.height,
            },
            scale: self.scale,
            wait_ms: self.wait,
            selector: self.selector.unwrap_or_else(|| format!("#{}", crate::stage::CAPTURE_ROOT)),
        })
    }
}

fn is_http_url(value: &str) -> bool {
    url::Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Renders one page for the service
pub trait PageRenderer: Send + Sync {
    fn render<'a>(&'a self, job: &'a RenderJob) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// Renderer that launches a fresh surface of type `S` per request
pub struct SurfaceRenderer<S> {
    base: SurfaceConfig,
    _surface: PhantomData<fn() -> S>,
}

impl<S> SurfaceRenderer<S> {
    pub fn new(base: SurfaceConfig) -> Self {
        Self {
            base,
            _surface: PhantomData,
        }
    }
}

impl<S: RenderSurface + 'static> SurfaceRenderer<S> {
    async fn snapshot(&self, worker: &SurfaceWorker, job: &RenderJob) -> Result<Vec<u8>> {
        match &job.source {
            PageSource::Html(html) => worker.mount(html).await?,
            PageSource::Url(url) => worker.navigate(url).await?,
        }
        tokio::time::sleep(Duration::from_millis(job.wait_ms)).await;
        worker.wait_for_fonts(job.wait_ms.max(1000)).await?;

        let freeze = r#"(function(){
            var s = document.createElement('style');
            s.textContent = {{CSS}};
            (document.head || document.documentElement).appendChild(s);
            return true;
        })()"#
            .replace("{{CSS}}", &serde_json::Value::String(FREEZE_STYLE.into()).to_string());
        worker.evaluate(&freeze).await?;

        let clip = match worker.element_clip(&job.selector).await? {
            Some(found) => Clip { scale: job.scale, ..found },
            None => Clip::viewport(job.viewport, job.scale),
        };
        worker.capture(clip).await
    }
}

impl<S: RenderSurface + 'static> PageRenderer for SurfaceRenderer<S> {
    fn render<'a>(&'a self, job: &'a RenderJob) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let config = SurfaceConfig {
                viewport: job.viewport,
                ..self.base.clone()
            };
            let worker = SurfaceWorker::launch::<S>(config).await?;
            let png = self.snapshot(&worker, job).await;
            if let Err(e) = worker.close().await {
                warn!("failed to close render surface: {}", e);
            }
            let png = png?;

            match job.format {
                OutputFormat::Png => Ok(png),
                OutputFormat::Pdf => {
                    let page = (job.viewport.width as f64, job.viewport.height as f64);
                    let result = CaptureResult {
                        index: 1,
                        outcome: Screenshot::from_png(png),
                        warnings: Vec::new(),
                        trace: vec![CaptureState::Captured],
                    };
                    let run = Assembler::new(OutputFormat::Pdf, page, [255, 255, 255], FailurePolicy::Strict)
                        .assemble(vec![result])?;
                    Ok(run.into_buffer())
                }
            }
        })
    }
}

/// Transport-independent reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpReply {
    fn json(status: u16, value: serde_json::Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: value.to_string().into_bytes(),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, serde_json::json!({ "error": message }))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub struct RenderService<R> {
    config: ServiceConfig,
    renderer: R,
}

impl<R: PageRenderer> RenderService<R> {
    pub fn new(config: ServiceConfig, renderer: R) -> Self {
        Self { config, renderer }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub async fn handle(
        &self,
        method: &str,
        path: &str,
        origin: Option<&str>,
        api_key: Option<&str>,
        body: &[u8],
    ) -> HttpReply {
        let origin = origin.filter(|o| !o.is_empty());
        if let Some(o) = origin {
            if !self.config.origin_allowed(o) {
                return HttpReply::error(403, "origin not allowed");
            }
        }

        let mut reply = self.route(method, path, api_key, body).await;
        reply
            .headers
            .push(("Access-Control-Allow-Origin".into(), origin.unwrap_or("*").to_string()));
        reply
            .headers
            .push(("Access-Control-Allow-Headers".into(), "Content-Type, X-API-Key".into()));
        reply
            .headers
            .push(("Access-Control-Allow-Methods".into(), "POST, OPTIONS, GET".into()));
        reply
    }

    async fn route(&self, method: &str, path: &str, api_key: Option<&str>, body: &[u8]) -> HttpReply {
        let path = path.split('?').next().unwrap_or(path);
        match (method, path) {
            ("OPTIONS", _) => HttpReply {
                status: 204,
                headers: Vec::new(),
                body: Vec::new(),
            },
            ("GET", "/health") => HttpReply::json(200, serde_json::json!({ "ok": true })),
            ("POST", "/render") => self.render(api_key, body).await,
            _ => HttpReply::error(404, "not found"),
        }
    }

    async fn render(&self, api_key: Option<&str>, body: &[u8]) -> HttpReply {
        if !self.config.key_accepted(api_key) {
            return HttpReply::error(401, "unauthorized");
        }
        if body.len() > BODY_LIMIT {
            return HttpReply::error(413, "request entity too large");
        }
        let request: RenderRequest = match serde_json::from_slice(body) {
            Ok(r) => r,
            Err(e) => {
                warn!("rejecting render request: {}", e);
                return HttpReply::error(400, "invalid json");
            }
        };
        let job = match request.into_job() {
            Ok(job) => job,
            Err(message) => return HttpReply::error(400, message),
        };

        match self.renderer.render(&job).await {
            Ok(bytes) => {
                let (content_type, filename) = match job.format {
                    OutputFormat::Png => ("image/png", "slide.png"),
                    OutputFormat::Pdf => ("application/pdf", "slide.pdf"),
                };
                HttpReply {
                    status: 200,
                    headers: vec![
                        ("Content-Type".into(), content_type.into()),
                        ("Content-Disposition".into(), format!("inline; filename=\"{}\"", filename)),
                    ],
                    body: bytes,
                }
            }
            Err(e) => {
                error!("render failed: {}", e);
                HttpReply::error(500, "render failed")
            }
        }
    }
}

struct Incoming {
    request: tiny_http::Request,
    body: std::io::Result<Vec<u8>>,
}

fn header_value(request: &tiny_http::Request, name: &str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str().to_string())
}

/// Serve `service` until the listener shuts down
pub async fn serve<R: PageRenderer>(service: RenderService<R>) -> Result<()> {
    let addr = format!("0.0.0.0:{}", service.config.port);
    let server = tiny_http::Server::http(&addr)
        .map_err(|e| Error::InitializationError(format!("Failed to bind {}: {}", addr, e)))?;
    info!("render api listening on {}", service.config.port);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Incoming>();
    std::thread::spawn(move || {
        for mut request in server.incoming_requests() {
            // one byte over the limit is enough to reject
            let mut body = Vec::new();
            let read = request
                .as_reader()
                .take(BODY_LIMIT as u64 + 1)
                .read_to_end(&mut body)
                .map(|_| body);
            if tx.send(Incoming { request, body: read }).is_err() {
                break;
            }
        }
    });

    while let Some(Incoming { request, body }) = rx.recv().await {
        let method = request.method().as_str().to_string();
        let path = request.url().to_string();
        let origin = header_value(&request, "Origin");
        let api_key = header_value(&request, "X-API-Key");

        let reply = match body {
            Ok(body) => {
                service
                    .handle(&method, &path, origin.as_deref(), api_key.as_deref(), &body)
                    .await
            }
            Err(e) => {
                warn!("failed to read request body: {}", e);
                HttpReply::error(400, "unreadable body")
            }
        };
        info!("{} {} -> {}", method, path, reply.status);

        let mut response = tiny_http::Response::from_data(reply.body).with_status_code(reply.status);
        for (name, value) in &reply.headers {
            if let Ok(header) = tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes()) {
                response.add_header(header);
            }
        }
        if let Err(e) = request.respond(response) {
            warn!("failed to send response: {}", e);
        }
    }
    Ok(())
}
