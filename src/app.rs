//! Application state holding the wgpu graphics context
//!
//! Renders the mirrored camera feed fullscreen, alpha-blends the overlay
//! canvas on top, and draws a small egui status panel. Fatal session
//! errors (camera, models) are surfaced here and the render path keeps
//! running so the message stays visible.

use std::sync::Arc;
use std::time::Instant;

use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::camera::CameraCapture;
use crate::config::AppConfig;
use crate::face::FaceLandmarkDetector;
use crate::mask::{MaskCatalog, MaskCategory, MaskLoader};
use crate::overlay::OverlaySession;

type Session = OverlaySession<FaceLandmarkDetector, MaskLoader>;

/// Main application state
pub struct App {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,

    // Camera capture
    app_config: AppConfig,
    camera: Option<CameraCapture>,
    camera_texture: Option<wgpu::Texture>,
    video_bind_group: Option<wgpu::BindGroup>,
    last_camera_frame: u64,
    seen_first_frame: bool,

    // Overlay session (detector + loader + compositor)
    session: Option<Session>,
    overlay_texture: Option<wgpu::Texture>,
    overlay_bind_group: Option<wgpu::BindGroup>,

    // Render pipelines (shared texture+sampler bind group layout)
    texture_bind_group_layout: wgpu::BindGroupLayout,
    video_pipeline: wgpu::RenderPipeline,
    overlay_pipeline: wgpu::RenderPipeline,
    sampler: wgpu::Sampler,

    // First unrecoverable error; shown until exit
    fatal_error: Option<String>,

    // egui integration
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,

    // Frame timing
    fps: f64,
    last_fps_update: Instant,
    frames_since_update: u64,
}

impl App {
    /// Create a new App with an initialized wgpu context and a running
    /// overlay session
    pub async fn new(window: Arc<Window>, app_config: AppConfig) -> Self {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .expect("Failed to create surface");

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .expect("Failed to find suitable GPU adapter");

        log::info!("Using GPU: {}", adapter.get_info().name);
        log::info!("Backend: {:?}", adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("MaskCam Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .expect("Failed to create device");

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&device, &config);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        // One layout serves both passes: a sampled texture + sampler
        let texture_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Texture Bind Group Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Fullscreen Pipeline Layout"),
            bind_group_layouts: &[&texture_bind_group_layout],
            push_constant_ranges: &[],
        });

        let video_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Video Mirror Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/video_mirror.wgsl").into()),
        });
        let overlay_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Overlay Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/overlay.wgsl").into()),
        });

        let video_pipeline = Self::fullscreen_pipeline(
            &device,
            &pipeline_layout,
            &video_shader,
            surface_format,
            wgpu::BlendState::REPLACE,
            "Video Pipeline",
        );
        // The overlay carries straight alpha from the CPU canvas
        let overlay_pipeline = Self::fullscreen_pipeline(
            &device,
            &pipeline_layout,
            &overlay_shader,
            surface_format,
            wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::SrcAlpha,
                    dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                    operation: wgpu::BlendOperation::Add,
                },
            },
            "Overlay Pipeline",
        );

        // egui
        let egui_ctx = egui::Context::default();
        let mut style = (*egui_ctx.style()).clone();
        style.visuals.window_shadow = egui::epaint::Shadow::NONE;
        egui_ctx.set_style(style);
        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );
        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);

        // Session collaborators; failures here are fatal and surfaced,
        // never retried
        let mut fatal_error = None;

        let camera = match CameraCapture::new(
            app_config.camera_index,
            app_config.capture_width,
            app_config.capture_height,
        ) {
            Ok(capture) => Some(capture),
            Err(e) => {
                log::error!("Camera unavailable: {}", e);
                fatal_error = Some(format!(
                    "Camera unavailable: {}. Check that it is connected and not in use.",
                    e
                ));
                None
            }
        };

        let session = match Self::start_session(&app_config) {
            Ok(session) => Some(session),
            Err(e) => {
                log::error!("Could not start overlay session: {}", e);
                if fatal_error.is_none() {
                    fatal_error = Some(e);
                }
                None
            }
        };

        let now = Instant::now();

        Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            app_config,
            camera,
            camera_texture: None,
            video_bind_group: None,
            last_camera_frame: 0,
            seen_first_frame: false,
            session,
            overlay_texture: None,
            overlay_bind_group: None,
            texture_bind_group_layout,
            video_pipeline,
            overlay_pipeline,
            sampler,
            fatal_error,
            egui_ctx,
            egui_state,
            egui_renderer,
            fps: 0.0,
            last_fps_update: now,
            frames_since_update: 0,
        }
    }

    fn start_session(app_config: &AppConfig) -> Result<Session, String> {
        let detector = FaceLandmarkDetector::new()
            .map_err(|e| format!("Face detection unavailable: {}", e))?;
        let loader = MaskLoader::new()?;
        let catalog = MaskCatalog::default_set(&app_config.masks_dir);
        Ok(OverlaySession::new(
            catalog,
            detector,
            loader,
            app_config.placement,
        ))
    }

    fn fullscreen_pipeline(
        device: &wgpu::Device,
        layout: &wgpu::PipelineLayout,
        shader: &wgpu::ShaderModule,
        format: wgpu::TextureFormat,
        blend: wgpu::BlendState,
        label: &str,
    ) -> wgpu::RenderPipeline {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(blend),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }

    /// Handle a window event, returning true if egui consumed it
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(&self.window, event);
        response.consumed
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    /// User clicked: cycle to a new random mask. Ignored after a fatal
    /// error.
    pub fn switch_mask(&mut self) {
        if self.fatal_error.is_some() {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.switch_mask();
        }
    }

    /// Switch to a different camera from the UI
    pub fn connect_camera(&mut self, camera_index: u32) {
        log::info!("Connecting to camera {}", camera_index);
        self.camera = None;
        self.camera_texture = None;
        self.video_bind_group = None;
        self.seen_first_frame = false;
        self.last_camera_frame = 0;

        match CameraCapture::new(
            camera_index,
            self.app_config.capture_width,
            self.app_config.capture_height,
        ) {
            Ok(capture) => {
                self.camera = Some(capture);
                self.fatal_error = None;
            }
            Err(e) => {
                self.fatal_error = Some(format!("Camera unavailable: {}", e));
            }
        }
    }

    /// Per-tick update: pull the newest camera frame, upload it, and run
    /// the overlay session's state machine
    pub fn update(&mut self) {
        // A capture thread that died is a session-fatal condition
        if let Some(failure) = self.camera.as_ref().and_then(|c| c.failure()) {
            if self.fatal_error.is_none() {
                self.fatal_error = Some(failure);
            }
        }

        let frame = self.camera.as_ref().and_then(|c| c.latest_frame());

        if let Some(frame) = &frame {
            if frame.frame_number > self.last_camera_frame || !self.seen_first_frame {
                self.last_camera_frame = frame.frame_number;
                self.seen_first_frame = true;
                self.upload_video_frame(frame);
            }
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };

        let detection_frame = frame.map(|f| crate::face::detector::DetectionFrame {
            data: f.data,
            width: f.width,
            height: f.height,
        });
        if session.tick(detection_frame) {
            // Canvas redrawn; push it to the overlay texture
            let (width, height, pixels) = {
                let canvas = session.canvas();
                (canvas.width(), canvas.height(), canvas.pixels().to_vec())
            };
            self.upload_overlay(width, height, &pixels);
        }
    }

    fn upload_video_frame(&mut self, frame: &crate::camera::CameraFrame) {
        let needs_new_texture = match &self.camera_texture {
            None => true,
            Some(tex) => {
                let size = tex.size();
                size.width != frame.width || size.height != frame.height
            }
        };

        if needs_new_texture {
            log::info!("Creating video texture: {}x{}", frame.width, frame.height);
            let (texture, bind_group) = self.create_sampled_texture(
                frame.width,
                frame.height,
                "Video Texture",
            );
            self.camera_texture = Some(texture);
            self.video_bind_group = Some(bind_group);
        }

        if let Some(texture) = &self.camera_texture {
            Self::write_rgba_texture(&self.queue, texture, &frame.data, frame.width, frame.height);
        }
    }

    fn upload_overlay(&mut self, width: u32, height: u32, pixels: &[u8]) {
        let needs_new_texture = match &self.overlay_texture {
            None => true,
            Some(tex) => {
                let size = tex.size();
                size.width != width || size.height != height
            }
        };

        if needs_new_texture {
            log::info!("Creating overlay texture: {}x{}", width, height);
            let (texture, bind_group) =
                self.create_sampled_texture(width, height, "Overlay Texture");
            self.overlay_texture = Some(texture);
            self.overlay_bind_group = Some(bind_group);
        }

        if let Some(texture) = &self.overlay_texture {
            Self::write_rgba_texture(&self.queue, texture, pixels, width, height);
        }
    }

    fn create_sampled_texture(
        &self,
        width: u32,
        height: u32,
        label: &str,
    ) -> (wgpu::Texture, wgpu::BindGroup) {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.texture_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        (texture, bind_group)
    }

    fn write_rgba_texture(
        queue: &wgpu::Queue,
        texture: &wgpu::Texture,
        data: &[u8],
        width: u32,
        height: u32,
    ) {
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Render a frame: mirrored video, overlay, status UI
    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Video Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some(video_bind_group) = &self.video_bind_group {
                render_pass.set_pipeline(&self.video_pipeline);
                render_pass.set_bind_group(0, video_bind_group, &[]);
                render_pass.draw(0..3, 0..1);
            }

            if let Some(overlay_bind_group) = &self.overlay_bind_group {
                render_pass.set_pipeline(&self.overlay_pipeline);
                render_pass.set_bind_group(0, overlay_bind_group, &[]);
                render_pass.draw(0..3, 0..1);
            }
        }

        self.render_ui(&mut encoder, &view);

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        self.update_fps();
        Ok(())
    }

    fn render_ui(&mut self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
        let raw_input = self.egui_state.take_egui_input(&self.window);

        let fps = self.fps;
        let fatal_error = self.fatal_error.clone();
        let waiting_for_video = self.fatal_error.is_none() && !self.seen_first_frame;
        let camera_frames = self.camera.as_ref().map(|c| c.frame_count()).unwrap_or(0);
        let available_cameras = if self.camera.is_none() {
            CameraCapture::list_cameras()
        } else {
            Vec::new()
        };
        let mask_label = match self.session.as_ref() {
            Some(session) => match session.current_entry() {
                Some(entry) => {
                    let name = entry
                        .path
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let category = match entry.category {
                        MaskCategory::Glasses => "glasses",
                        MaskCategory::Crown => "crown",
                    };
                    if session.is_loading_mask() {
                        format!("{} ({}) — loading", name, category)
                    } else if session.has_mask_image() {
                        format!("{} ({})", name, category)
                    } else {
                        format!("{} ({}) — failed to load", name, category)
                    }
                }
                None => "none (click to pick one)".to_string(),
            },
            None => "unavailable".to_string(),
        };

        let mut connect_camera_index: Option<u32> = None;

        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            egui::TopBottomPanel::top("status").show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label("MaskCam");
                    ui.separator();
                    ui.label(format!("FPS: {:.1}", fps));
                    ui.separator();
                    ui.label(format!("Frames: {}", camera_frames));
                    ui.separator();
                    ui.label(format!("Mask: {}", mask_label));
                    ui.separator();
                    ui.label("Click anywhere to switch masks");
                });
            });

            if let Some(message) = &fatal_error {
                egui::Area::new(egui::Id::new("fatal"))
                    .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
                    .show(ctx, |ui| {
                        egui::Frame::popup(ui.style()).show(ui, |ui| {
                            ui.heading("Session error");
                            ui.label(message);
                            if !available_cameras.is_empty() {
                                ui.separator();
                                ui.label("Try another camera:");
                                for cam in &available_cameras {
                                    if ui.button(format!("{}: {}", cam.index, cam.name)).clicked()
                                    {
                                        connect_camera_index = Some(cam.index);
                                    }
                                }
                            }
                        });
                    });
            } else if waiting_for_video {
                egui::Area::new(egui::Id::new("loading"))
                    .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
                    .show(ctx, |ui| {
                        ui.heading("Starting camera...");
                    });
            }
        });

        if let Some(index) = connect_camera_index {
            self.connect_camera(index);
        }

        self.egui_state
            .handle_platform_output(&self.window, full_output.platform_output);

        let paint_jobs = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, image_delta);
        }

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: self.window.scale_factor() as f32,
        };

        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            encoder,
            &paint_jobs,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("egui Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let render_pass_static: &mut wgpu::RenderPass<'static> =
                unsafe { std::mem::transmute(&mut render_pass) };

            self.egui_renderer
                .render(render_pass_static, &paint_jobs, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }

    fn update_fps(&mut self) {
        self.frames_since_update += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f64();
        if elapsed >= 1.0 {
            self.fps = self.frames_since_update as f64 / elapsed;
            self.frames_since_update = 0;
            self.last_fps_update = now;
        }
    }
}
