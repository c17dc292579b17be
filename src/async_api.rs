use crate::error::{Error, Result};
use crate::surface::{Clip, RenderSurface, ScriptResult, SurfaceConfig};
use std::sync::mpsc::{self, Sender};
use std::thread;
use tokio::sync::oneshot;

enum Command {
    Mount(String, oneshot::Sender<Result<()>>),
    Navigate(String, oneshot::Sender<Result<()>>),
    Execute(String, oneshot::Sender<Result<ScriptResult>>),
    Evaluate(String, oneshot::Sender<Result<ScriptResult>>),
    WaitForFonts(u64, oneshot::Sender<Result<()>>),
    ElementClip(String, oneshot::Sender<Result<Option<Clip>>>),
    Capture(Clip, oneshot::Sender<Result<Vec<u8>>>),
    Reset(oneshot::Sender<Result<()>>),
    Close(oneshot::Sender<Result<()>>),
}

/// An async-friendly surface handle backed by a dedicated worker thread.
///
/// The worker thread owns a synchronous [`RenderSurface`] and executes
/// commands sent from async tasks, so callers get an async interface without
/// the surface having to be `Send`. Commands are executed strictly in the
/// order they are sent.
#[derive(Clone)]
pub struct SurfaceWorker {
    cmd_tx: Sender<Command>,
}

impl SurfaceWorker {
    /// Spawn a worker that builds its surface with `factory` on the worker
    /// thread. Resolves once the surface is ready or failed to start.
    pub async fn spawn<S, F>(factory: F) -> Result<Self>
    where
        S: RenderSurface + 'static,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = oneshot::channel::<Result<()>>();

        thread::spawn(move || {
            let mut surface = match factory() {
                Ok(s) => s,
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };
            let _ = init_tx.send(Ok(()));

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Command::Mount(html, resp) => {
                        let _ = resp.send(surface.mount(&html));
                    }
                    Command::Navigate(url, resp) => {
                        let _ = resp.send(surface.navigate(&url));
                    }
                    Command::Execute(source, resp) => {
                        let _ = resp.send(surface.execute_script(&source));
                    }
                    Command::Evaluate(expr, resp) => {
                        let _ = resp.send(surface.evaluate(&expr));
                    }
                    Command::WaitForFonts(timeout_ms, resp) => {
                        let _ = resp.send(surface.wait_for_fonts(timeout_ms));
                    }
                    Command::ElementClip(selector, resp) => {
                        let _ = resp.send(surface.element_clip(&selector));
                    }
                    Command::Capture(clip, resp) => {
                        let _ = resp.send(surface.capture_png(clip));
                    }
                    Command::Reset(resp) => {
                        let _ = resp.send(surface.reset());
                    }
                    Command::Close(resp) => {
                        let _ = resp.send(surface.close());
                        return;
                    }
                }
            }
            // every handle dropped without an explicit close
            let _ = surface.close();
        });

        init_rx
            .await
            .map_err(|e| Error::Other(format!("Worker init canceled: {}", e)))??;

        Ok(Self { cmd_tx })
    }

    /// Spawn a worker owning a surface of type `S` built from `config`
    pub async fn launch<S>(config: SurfaceConfig) -> Result<Self>
    where
        S: RenderSurface + 'static,
    {
        Self::spawn(move || S::new(config)).await
    }

    async fn request<T>(&self, name: &str, make: impl FnOnce(oneshot::Sender<Result<T>>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .map_err(|_| Error::Other(format!("{} failed: surface worker has stopped", name)))?;
        rx.await
            .map_err(|e| Error::Other(format!("{} canceled: {}", name, e)))?
    }

    /// Replace the surface document with `html`
    pub async fn mount(&self, html: &str) -> Result<()> {
        let html = html.to_string();
        self.request("Mount", |tx| Command::Mount(html, tx)).await
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.request("Navigate", |tx| Command::Navigate(url, tx)).await
    }

    /// Run a classic script in the page
    pub async fn execute(&self, source: &str) -> Result<ScriptResult> {
        let source = source.to_string();
        self.request("Execute", |tx| Command::Execute(source, tx)).await
    }

    /// Evaluate an expression and return its serialized value
    pub async fn evaluate(&self, expression: &str) -> Result<ScriptResult> {
        let expression = expression.to_string();
        self.request("Evaluate", |tx| Command::Evaluate(expression, tx)).await
    }

    pub async fn wait_for_fonts(&self, timeout_ms: u64) -> Result<()> {
        self.request("WaitForFonts", |tx| Command::WaitForFonts(timeout_ms, tx)).await
    }

    pub async fn element_clip(&self, selector: &str) -> Result<Option<Clip>> {
        let selector = selector.to_string();
        self.request("ElementClip", |tx| Command::ElementClip(selector, tx)).await
    }

    /// Snapshot `clip` as PNG bytes
    pub async fn capture(&self, clip: Clip) -> Result<Vec<u8>> {
        self.request("Capture", |tx| Command::Capture(clip, tx)).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.request("Reset", Command::Reset).await
    }

    /// Shutdown the background worker and close the surface.
    pub async fn close(self) -> Result<()> {
        self.request("Close", Command::Close).await
    }
}
