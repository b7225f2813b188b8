//! Application Shell
//!
//! Ties an [`EngineContext`] to a [`LayerStack`]. The OS window and event
//! loop are owned by the embedding frontend, which forwards events through
//! [`Application::on_event`] and calls [`Application::run_frame`] once per
//! redraw.
//!
//! ```rust,ignore
//! let mut app = Application::new(ctx);
//! app.push_layer(Box::new(GraphicsLayer::default()))?;
//!
//! while app.is_running() {
//!     for event in window.poll_events() {
//!         app.on_event(&event);
//!     }
//!     app.run_frame()?;
//! }
//! app.shutdown();
//! ```

pub mod event;
pub mod layer;

pub use event::{Event, KeyCode};
pub use layer::{Layer, LayerStack};

use crate::engine::EngineContext;
use crate::errors::Result;
use crate::renderer::device::GpuDevice;

pub struct Application<D: GpuDevice> {
    ctx: EngineContext<D>,
    layers: LayerStack<D>,
    running: bool,
}

impl<D: GpuDevice> Application<D> {
    #[must_use]
    pub fn new(ctx: EngineContext<D>) -> Self {
        Self {
            ctx,
            layers: LayerStack::new(),
            running: true,
        }
    }

    pub fn push_layer(&mut self, layer: Box<dyn Layer<D>>) -> Result<()> {
        self.layers.push_layer(&mut self.ctx, layer)
    }

    pub fn push_overlay(&mut self, layer: Box<dyn Layer<D>>) -> Result<()> {
        self.layers.push_overlay(&mut self.ctx, layer)
    }

    /// Applies engine-level handling, then offers the event to the layers.
    ///
    /// A resize updates the screen size (and tracked render targets) before
    /// the layers see it. If a render target group fails to resize the error
    /// is logged; the layers depending on it report it from their update.
    pub fn on_event(&mut self, event: &Event) -> bool {
        match *event {
            Event::Resized { width, height } => {
                if let Err(e) = self.ctx.set_screen_size(width, height) {
                    log::error!("Resize to {width}x{height} failed: {e}");
                }
            }
            Event::Quit => {
                log::info!("Quit requested");
                self.running = false;
            }
            Event::KeyPressed(_) | Event::KeyReleased(_) => {}
        }
        self.layers.dispatch_event(&mut self.ctx, event)
    }

    /// One iteration of the frame loop: wait for a free frame slot, update
    /// every layer, then hand the frame to the GPU.
    pub fn run_frame(&mut self) -> Result<()> {
        let frame = self.ctx.begin_frame();
        let result = self.layers.update(&mut self.ctx, frame);
        self.ctx.end_frame();
        result
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub fn context(&self) -> &EngineContext<D> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut EngineContext<D> {
        &mut self.ctx
    }

    #[must_use]
    pub fn layers(&self) -> &LayerStack<D> {
        &self.layers
    }

    /// Detaches every layer and tears the engine down.
    pub fn shutdown(mut self) {
        self.layers.clear(&mut self.ctx);
        self.ctx.shutdown();
    }
}
