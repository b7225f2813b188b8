//! Layer System
//!
//! A [`Layer`] is one independently attachable piece of per-frame work, such
//! as a sample renderer or a debug overlay. The [`LayerStack`] keeps regular
//! layers below overlays:
//!
//! ```text
//! index:  0        1        2          3
//!        [layer]  [layer] | [overlay] [overlay]
//!                         ^ overlay_start
//! ```
//!
//! Updates run bottom to top; events travel top to bottom and stop at the
//! first layer that handles them.

use crate::app::event::Event;
use crate::engine::EngineContext;
use crate::errors::{Result, SirMetalError};
use crate::renderer::device::GpuDevice;
use crate::renderer::frame::FrameInfo;

pub trait Layer<D: GpuDevice> {
    fn name(&self) -> &str;

    /// Called once when the layer is pushed. Allocate GPU resources here.
    fn on_attach(&mut self, ctx: &mut EngineContext<D>) -> Result<()>;

    fn on_detach(&mut self, _ctx: &mut EngineContext<D>) {}

    /// Records the layer's work for `frame`. An error skips the rest of this
    /// layer's frame; other layers still run.
    fn on_update(&mut self, ctx: &mut EngineContext<D>, frame: FrameInfo) -> Result<()>;

    /// Returns `true` when the event was consumed.
    fn on_event(&mut self, _ctx: &mut EngineContext<D>, _event: &Event) -> bool {
        false
    }

    /// Drops CPU-side state before the layer is destroyed.
    fn clear(&mut self) {}
}

pub struct LayerStack<D: GpuDevice> {
    layers: Vec<Box<dyn Layer<D>>>,
    overlay_start: usize,
}

impl<D: GpuDevice> Default for LayerStack<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: GpuDevice> LayerStack<D> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            overlay_start: 0,
        }
    }

    /// Attaches `layer` and inserts it below every overlay.
    pub fn push_layer(&mut self, ctx: &mut EngineContext<D>, mut layer: Box<dyn Layer<D>>) -> Result<()> {
        layer.on_attach(ctx)?;
        log::debug!("Attached layer '{}'", layer.name());
        self.layers.insert(self.overlay_start, layer);
        self.overlay_start += 1;
        Ok(())
    }

    /// Attaches `layer` on top of the stack.
    pub fn push_overlay(&mut self, ctx: &mut EngineContext<D>, mut layer: Box<dyn Layer<D>>) -> Result<()> {
        layer.on_attach(ctx)?;
        log::debug!("Attached overlay '{}'", layer.name());
        self.layers.push(layer);
        Ok(())
    }

    /// Detaches and returns the first layer or overlay called `name`.
    pub fn remove(&mut self, ctx: &mut EngineContext<D>, name: &str) -> Option<Box<dyn Layer<D>>> {
        let index = self.layers.iter().position(|l| l.name() == name)?;
        if index < self.overlay_start {
            self.overlay_start -= 1;
        }
        let mut layer = self.layers.remove(index);
        layer.on_detach(ctx);
        Some(layer)
    }

    /// Runs every layer bottom to top. All layers run even if one fails; the
    /// first failure is returned.
    pub fn update(&mut self, ctx: &mut EngineContext<D>, frame: FrameInfo) -> Result<()> {
        let mut first_error: Option<SirMetalError> = None;
        for layer in &mut self.layers {
            if let Err(e) = layer.on_update(ctx, frame) {
                log::error!("Layer '{}' skipped frame {}: {e}", layer.name(), frame.index);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Offers `event` to each layer from the top. Returns `true` if a layer
    /// consumed it.
    pub fn dispatch_event(&mut self, ctx: &mut EngineContext<D>, event: &Event) -> bool {
        self.layers
            .iter_mut()
            .rev()
            .any(|layer| layer.on_event(ctx, event))
    }

    /// Detaches and clears every layer, top first.
    pub fn clear(&mut self, ctx: &mut EngineContext<D>) {
        while let Some(mut layer) = self.layers.pop() {
            layer.on_detach(ctx);
            layer.clear();
        }
        self.overlay_start = 0;
    }

    /// Layer names, bottom to top.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}
