use std::sync::Arc;
use std::time::Instant;

use color_eyre::Result;
use glam::Vec4;
use ember::renderer::{
    ColorTarget, DepthTarget, Device, Format, RenderConfig, RenderContext, RenderTargetBindings, Texture,
    TextureDesc, VulkanDevice,
};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, StartCause, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

const MSAA_SAMPLES: u32 = 4;
const CLEAR_FROM: Vec4 = Vec4::new(0.05, 0.1, 0.3, 1.0);
const CLEAR_TO: Vec4 = Vec4::new(0.6, 0.2, 0.3, 1.0);

/// Offscreen multisampled color and depth, resolved every frame
struct Scene {
    color: Texture,
    depth: Texture,
}

pub struct App {
    event_loop: Option<EventLoop<()>>,
    window: Option<Arc<Window>>,
    context: Option<RenderContext<VulkanDevice>>,
    scene: Option<Scene>,
    config: RenderConfig,

    // State
    start_time: Instant,
    vsync: bool,
    request_redraws: bool,
    close_requested: bool,
    error: Option<color_eyre::Report>,
}

impl App {
    pub fn new() -> Result<Self> {
        let event_loop = EventLoop::new()?;
        let config = RenderConfig::default();

        Ok(Self {
            event_loop: Some(event_loop),
            window: None,
            context: None,
            scene: None,
            vsync: config.vsync,
            config,

            start_time: Instant::now(),
            request_redraws: true,
            close_requested: false,
            error: None,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        let Some(event_loop) = self.event_loop.take() else {
            return Ok(());
        };
        event_loop.run_app(self)?;
        self.shutdown();

        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = Window::default_attributes().with_title(self.config.app_name.clone());
        let window = Arc::new(event_loop.create_window(attributes)?);
        let size = window.inner_size();

        let device = VulkanDevice::new(window.as_ref(), (size.width, size.height), &self.config)?;
        let mut context = RenderContext::new(device, self.config.clone())?;
        let scene = create_scene(&mut context)?;

        self.window = Some(window);
        self.context = Some(context);
        self.scene = Some(scene);
        Ok(())
    }

    fn draw(&mut self) -> Result<()> {
        let (Some(context), Some(scene)) = (self.context.as_mut(), self.scene.as_mut()) else {
            return Ok(());
        };

        let (width, height) = context.swap_chain_size();
        context.ensure_texture_size(&mut scene.color, width, height)?;
        context.ensure_texture_size(&mut scene.depth, width, height)?;

        let t = self.start_time.elapsed().as_secs_f32();
        let clear = CLEAR_FROM.lerp(CLEAR_TO, 0.5 + 0.5 * t.sin()).to_array();

        // Multisampled pass, resolved into the scene color on unset
        context.set_render_targets(
            &RenderTargetBindings::new()
                .color(ColorTarget::new(&scene.color).clear(clear))
                .depth(DepthTarget::new(&scene.depth).clear(1.0)),
        )?;
        context.unset_render_targets()?;

        context.set_render_targets(
            &RenderTargetBindings::new()
                .color(ColorTarget::swapchain().clear(clear))
                .depth(DepthTarget::swapchain().clear(1.0)),
        )?;
        context.unset_render_targets()?;

        context.present(self.vsync)?;
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if let Some(context) = self.context.as_mut() {
            context.ensure_swap_chain_size(width, height)?;
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        let Some(mut context) = self.context.take() else {
            return;
        };
        if let Some(scene) = self.scene.take() {
            context.destroy_texture(scene.color);
            context.destroy_texture(scene.depth);
        }
        drop(context.shutdown());
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: color_eyre::Report) {
        log::error!("{e:?}");
        self.error = Some(e);
        event_loop.exit();
    }
}

fn create_scene(context: &mut RenderContext<VulkanDevice>) -> Result<Scene> {
    let (width, height) = context.swap_chain_size();
    let format = context.device().back_buffer_format();
    let color = context.create_texture(
        &TextureDesc::new_2d(width, height)
            .format(format)
            .samples(MSAA_SAMPLES)
            .render_target(),
    )?;
    let depth = context.create_texture(
        &TextureDesc::new_2d(width, height)
            .format(Format::D32Float)
            .samples(MSAA_SAMPLES)
            .render_target(),
    )?;
    Ok(Scene { color, depth })
}

impl ApplicationHandler for App {
    fn new_events(&mut self, _event_loop: &ActiveEventLoop, cause: StartCause) {
        if cause == StartCause::Init {
            self.start_time = Instant::now();
        }
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.context.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if self.window.as_ref().is_none_or(|window| window.id() != window_id) {
            return;
        }

        let result = match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
                Ok(())
            }
            WindowEvent::Resized(size) => self.resize(size.width, size.height),
            WindowEvent::RedrawRequested => self.draw(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: key,
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                match key.as_ref() {
                    Key::Character("r") => {
                        self.request_redraws = !self.request_redraws;
                        log::info!("request_redraws: {}", self.request_redraws);
                    }
                    Key::Character("v") => {
                        self.vsync = !self.vsync;
                        log::info!("vsync: {}", self.vsync);
                    }
                    Key::Named(NamedKey::Escape) => {
                        self.close_requested = true;
                    }
                    _ => {}
                }
                Ok(())
            }
            _ => Ok(()),
        };

        if let Err(e) = result {
            self.fail(event_loop, e);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.request_redraws {
            if let Some(window) = &self.window {
                window.request_redraw();
            }
        }

        if self.close_requested {
            event_loop.exit();
        }
    }
}
