use smallvec::{SmallVec, smallvec};

use crate::renderer::config::MAX_RENDER_TARGETS;
use crate::renderer::context::RenderContext;
use crate::renderer::context::state::{BoundColor, PendingResolve, SlotView};
use crate::renderer::device::{Device, ImageId, ViewDesc, ViewDimension, ViewId, ViewKind};
use crate::renderer::error::{RenderError, Result};
use crate::renderer::format::Format;
use crate::renderer::resources::texture::{Texture, TextureShape};

/// One color output. Without a texture, slot 0 falls back to the swapchain
/// back buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorTarget<'a> {
    pub texture: Option<&'a Texture>,
    pub clear: bool,
    pub color: [f32; 4],
}

impl<'a> ColorTarget<'a> {
    pub fn new(texture: &'a Texture) -> Self {
        Self {
            texture: Some(texture),
            ..Default::default()
        }
    }

    pub fn swapchain() -> Self {
        Self::default()
    }

    pub fn clear(mut self, color: [f32; 4]) -> Self {
        self.clear = true;
        self.color = color;
        self
    }
}

/// The depth output. Without a texture the swapchain's depth buffer is used.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthTarget<'a> {
    pub texture: Option<&'a Texture>,
    pub clear: bool,
    pub depth: f32,
}

impl<'a> DepthTarget<'a> {
    pub fn new(texture: &'a Texture) -> Self {
        Self {
            texture: Some(texture),
            ..Default::default()
        }
    }

    pub fn swapchain() -> Self {
        Self::default()
    }

    pub fn clear(mut self, depth: f32) -> Self {
        self.clear = true;
        self.depth = depth;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct RenderTargetBindings<'a> {
    pub colors: SmallVec<[ColorTarget<'a>; MAX_RENDER_TARGETS]>,
    pub depth: DepthTarget<'a>,
}

impl<'a> RenderTargetBindings<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn color(mut self, target: ColorTarget<'a>) -> Self {
        self.colors.push(target);
        self
    }

    pub fn depth(mut self, target: DepthTarget<'a>) -> Self {
        self.depth = target;
        self
    }
}

/// The image a target view is built over
struct TargetSource {
    /// Multisample dual if there is one, else the primary image
    render: ImageId,
    resolve: Option<PendingResolve>,
    format: Format,
}

fn target_source(texture: &Texture, want_depth: bool) -> Result<TargetSource> {
    let Some(inner) = &texture.inner else {
        return Err(RenderError::usage("invalid render target texture"));
    };
    let info = &inner.info;
    if info.shape != TextureShape::TwoD {
        return Err(RenderError::usage(format!(
            "{:?} textures cannot be render targets",
            info.shape
        )));
    }
    if !info.render_target {
        return Err(RenderError::usage(
            "texture was not created as a render target",
        ));
    }
    if info.format.is_depth() != want_depth {
        return Err(RenderError::usage(format!(
            "{:?} cannot be bound as a {} target",
            info.format,
            if want_depth { "depth" } else { "color" }
        )));
    }

    let primary = inner.kind.image();
    Ok(match inner.kind.multisample() {
        Some(dual) => TargetSource {
            render: dual,
            // Depth resolves are not supported
            resolve: (!want_depth).then_some(PendingResolve {
                src: dual,
                dst: primary,
                format: info.format,
            }),
            format: info.format,
        },
        None => TargetSource {
            render: primary,
            resolve: None,
            format: info.format,
        },
    })
}

impl<D: Device> RenderContext<D> {
    /// Installs a new output set, clearing targets as requested.
    ///
    /// Fails if targets are already bound. All texture slots are unbound
    /// first so no texture is both read and written.
    pub fn set_render_targets(&mut self, targets: &RenderTargetBindings<'_>) -> Result<()> {
        if self.state.render_targets_bound() {
            return Err(RenderError::RenderTargetsAlreadyBound);
        }
        if targets.colors.len() > MAX_RENDER_TARGETS {
            return Err(RenderError::SlotOutOfRange {
                kind: "render target",
                slot: targets.colors.len() as u32 - 1,
                max: MAX_RENDER_TARGETS as u32,
            });
        }

        self.unbind_all_textures();

        if let Err(e) = self.install_targets(targets) {
            if let Err(release) = self.state.release_render_targets(&mut self.device, false) {
                log::error!("Failed to release render targets after a bind error: {}", release);
            }
            return Err(e);
        }
        Ok(())
    }

    fn install_targets(&mut self, targets: &RenderTargetBindings<'_>) -> Result<()> {
        self.build_target_views(targets)?;

        let views: SmallVec<[Option<ViewId>; MAX_RENDER_TARGETS]> = self
            .state
            .colors
            .iter()
            .map(|color| color.map(|color| color.target.view))
            .collect();
        let depth = self.state.depth.map(|depth| depth.view);
        self.device.set_render_targets(&views, depth)?;

        log::trace!("Bound {} color slots", views.len());
        Ok(())
    }

    fn build_target_views(&mut self, targets: &RenderTargetBindings<'_>) -> Result<()> {
        let swapchain_only: SmallVec<[ColorTarget<'_>; 1]> = smallvec![ColorTarget::swapchain()];
        let colors = if targets.colors.is_empty() {
            &swapchain_only[..]
        } else {
            &targets.colors[..]
        };

        for (slot, target) in colors.iter().enumerate() {
            let source = match target.texture.filter(|texture| texture.is_valid()) {
                Some(texture) => target_source(texture, false)?,
                None if slot == 0 => TargetSource {
                    render: self.device.back_buffer()?,
                    resolve: None,
                    format: self.device.back_buffer_format(),
                },
                None => {
                    log::trace!("Color slot {} left empty", slot);
                    self.state.colors.push(None);
                    continue;
                }
            };

            let view = self.create_target_view(source.render, ViewKind::RenderTarget, source.format)?;
            self.state.colors.push(Some(BoundColor {
                target: SlotView {
                    view,
                    image: source.render,
                },
                resolve: source.resolve,
            }));
            if target.clear {
                self.device.clear_render_target(view, target.color)?;
            }
        }

        let depth_texture = match targets.depth.texture.filter(|texture| texture.is_valid()) {
            Some(texture) => texture,
            None => &self.swapchain_depth,
        };
        let source = target_source(depth_texture, true)?;
        let view = self.create_target_view(source.render, ViewKind::DepthStencil, source.format)?;
        self.state.depth = Some(SlotView {
            view,
            image: source.render,
        });
        if targets.depth.clear {
            self.device.clear_depth_stencil(view, targets.depth.depth)?;
        }
        Ok(())
    }

    fn create_target_view(&mut self, image: ImageId, kind: ViewKind, format: Format) -> Result<ViewId> {
        self.device.create_view(
            image,
            &ViewDesc {
                kind,
                dimension: ViewDimension::D2,
                format,
            },
        )
    }

    /// Unbinds the output set, resolving multisampled color targets into
    /// their primary images. A no-op when nothing is bound.
    ///
    /// The views are released even when a resolve fails.
    pub fn unset_render_targets(&mut self) -> Result<()> {
        if !self.state.render_targets_bound() {
            log::trace!("unset_render_targets with nothing bound");
            return Ok(());
        }
        self.state.release_render_targets(&mut self.device, true)
    }
}
