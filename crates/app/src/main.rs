//! Penumbra demo.
//!
//! A lit floor with a grid of spheres, a sun and a ring of orbiting point
//! lights, each casting cube shadows. Escape or closing the window exits.

use std::time::Duration;

use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::{Window, WindowId};

use penumbra_core::{RendererConfig, Timer};
use penumbra_renderer::{FrameStatus, Renderer};
use penumbra_resources::{CubeFaces, MaterialTextures, primitives};
use penumbra_scene::{DirectionalLight, LightList, MeshHandle, PointLight, SceneUniforms};

const ORBITING_LIGHTS: usize = 6;
const STATS_INTERVAL: Duration = Duration::from_secs(1);

struct DemoScene {
    floor: MeshHandle,
    spheres: Vec<(MeshHandle, Vec3)>,
}

impl DemoScene {
    fn load(renderer: &mut Renderer) -> Result<Self> {
        let floor_material = renderer.create_material(&MaterialTextures::flat([180, 180, 170, 255], 0.0, 0.8))?;
        let floor = renderer.upload_mesh(&primitives::plane(24.0, 6.0)?, floor_material)?;

        let sphere = primitives::uv_sphere(0.6, 32, 16)?;
        let mut spheres = Vec::new();
        for row in 0..3 {
            for col in 0..5 {
                let metallic = col as f32 / 4.0;
                let roughness = 0.15 + row as f32 * 0.35;
                let material =
                    renderer.create_material(&MaterialTextures::flat([200, 90, 60, 255], metallic, roughness))?;
                let mesh = renderer.upload_mesh(&sphere, material)?;
                let position = Vec3::new(col as f32 * 1.8 - 3.6, 0.6, row as f32 * 1.8 - 1.8);
                spheres.push((mesh, position));
            }
        }
        info!("Demo scene: {} meshes", spheres.len() + 1);
        Ok(Self { floor, spheres })
    }

    fn lights(&self, time: f32) -> LightList {
        let mut lights = LightList::new();
        for i in 0..ORBITING_LIGHTS {
            let phase = time * 0.5 + i as f32 * std::f32::consts::TAU / ORBITING_LIGHTS as f32;
            let hue = i as f32 / ORBITING_LIGHTS as f32;
            let color = Vec3::new(
                1.0 + 4.0 * hue,
                3.0,
                5.0 - 4.0 * hue,
            );
            let position = Vec3::new(phase.cos() * 5.0, 1.5 + (phase * 2.0).sin() * 0.5, phase.sin() * 5.0);
            if let Err(e) = lights.push(PointLight::new(position, color)) {
                warn!("Dropping light {}: {}", i, e);
            }
        }
        lights
    }

    fn scene(&self, time: f32, aspect: f32) -> SceneUniforms {
        let eye = Vec3::new((time * 0.1).sin() * 9.0, 5.0, (time * 0.1).cos() * 9.0);
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let projection = Mat4::perspective_rh(60f32.to_radians(), aspect, 0.1, 100.0);
        SceneUniforms::new(view, projection)
            .with_ambient(Vec3::splat(0.02))
            .with_directional(
                DirectionalLight {
                    direction: Vec3::new(-0.5, -1.0, -0.4),
                    color: Vec3::new(1.2, 1.1, 0.9),
                },
                Vec3::ZERO,
                12.0,
            )
    }

    fn draw(&self, renderer: &mut Renderer, time: f32) -> Result<()> {
        renderer.draw_model(self.floor, Mat4::IDENTITY)?;
        for (index, (mesh, position)) in self.spheres.iter().enumerate() {
            let bob = (time + index as f32 * 0.7).sin() * 0.15;
            renderer.draw_model(*mesh, Mat4::from_translation(*position + Vec3::Y * bob))?;
        }
        Ok(())
    }
}

/// Field order matters: the renderer drops before the window it draws to.
struct App {
    renderer: Option<Renderer>,
    scene: Option<DemoScene>,
    window: Option<Window>,
    config: RendererConfig,
    clock: Timer,
    stats: Timer,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            renderer: None,
            scene: None,
            window: None,
            config,
            clock: Timer::new(),
            stats: Timer::new(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = event_loop.create_window(attributes).context("creating window")?;

        let size = window.inner_size();
        let config = RendererConfig {
            width: size.width.max(1),
            height: size.height.max(1),
            ..self.config.clone()
        };
        let sky = CubeFaces::gradient_sky(
            config.environment_resolution,
            Vec3::new(0.25, 0.45, 0.9),
            Vec3::new(0.85, 0.8, 0.75),
            Vec3::new(0.2, 0.18, 0.15),
        );
        let mut renderer = Renderer::create(
            window.display_handle()?.as_raw(),
            window.window_handle()?.as_raw(),
            config,
            &sky,
        )
        .context("creating renderer")?;
        let scene = DemoScene::load(&mut renderer).context("loading demo scene")?;

        info!("Initialization complete, entering main loop");
        self.renderer = Some(renderer);
        self.scene = Some(scene);
        self.window = Some(window);
        Ok(())
    }

    fn frame(&mut self) -> Result<()> {
        let (Some(renderer), Some(scene), Some(window)) =
            (self.renderer.as_mut(), self.scene.as_ref(), self.window.as_ref())
        else {
            return Ok(());
        };

        if renderer.begin_frame()? == FrameStatus::Skipped {
            return Ok(());
        }
        let time = self.clock.elapsed_secs();
        let size = window.inner_size();
        let aspect = size.width.max(1) as f32 / size.height.max(1) as f32;

        scene.draw(renderer, time)?;
        renderer.end_frame(&scene.scene(time, aspect), &scene.lights(time))?;

        self.stats.tick();
        if let Some(stats) = self.stats.report(STATS_INTERVAL) {
            info!(
                "{} frames, {:.1} fps, {:.2} ms/frame",
                stats.frames, stats.fps, stats.frame_ms
            );
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            error!("Startup failed: {:?}", e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape) =>
            {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.frame() {
                    error!("Frame failed: {:?}", e);
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.scene = None;
        self.renderer = None;
    }
}

fn main() -> Result<()> {
    penumbra_core::init_logging();
    let config = RendererConfig::from_env()?;
    info!("Starting {} ({}x{})", config.title, config.width, config.height);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}
