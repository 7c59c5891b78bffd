//! Headless probe for the deferred renderer core
//!
//! Brings the core up on the first available GPU without a window: loads an
//! optional config file (TOML or RON), uploads a synthetic scene, finalizes the
//! parameter buffers, builds and runs one shadow map per light, fills the buffers
//! for one frame and creates the pass signals.
//! Everything it learns is logged; set `RUST_LOG=debug` for per-resource detail.
//!
//! ```text
//! scene_probe [config.toml|config.ron]
//! ```

use ash::vk;
use deferred_core::config::{Config, ConfigError};
use deferred_core::foundation::logging;
use deferred_core::foundation::math::MAT4_SIZE;
use deferred_core::prelude::*;
use deferred_core::render::passes::{ShadowScene, Signal};
use deferred_core::render::vulkan::{DepthPipeline, DescriptorSet, RenderPass, ShaderModule, DEGENERATE_VERTEX_SPIRV};
use thiserror::Error;

const MODEL_COUNT: u32 = 3;
const LIGHT_COUNT: u32 = 2;

#[derive(Error, Debug)]
enum ProbeError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("vulkan: {0}")]
    Vulkan(#[from] VulkanError),

    #[error("{0}")]
    Mismatch(String),
}

/// A row of unit quads, one mesh per model, indices already offset into the shared vertex array
fn synthetic_scene() -> (Vec<Vertex>, Vec<u32>, Vec<ModelDraw>) {
    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    let mut models = Vec::new();

    for model in 0..MODEL_COUNT {
        let base = u32::try_from(vertices.len()).unwrap_or(u32::MAX);
        let first_index = u32::try_from(indices.len()).unwrap_or(u32::MAX);

        for (x, y) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            vertices.push(Vertex {
                position: [x, y, 0.0],
                tex_coord: [x + 0.5, y + 0.5],
                normal: [0.0, 0.0, 1.0],
                tangent: [1.0, 0.0, 0.0],
                bitangent: [0.0, 1.0, 0.0],
            });
        }
        indices.extend([0, 1, 2, 2, 3, 0].iter().map(|i| base + i));

        let offset = Vec3::new(model as f32 * 2.0 - 2.0, 0.0, 0.0);
        models.push(ModelDraw::new(
            Mat4::new_translation(&offset),
            vec![MeshRange { index_count: 6, first_index }],
        ));
    }

    (vertices, indices, models)
}

/// Shadow maps plus the pipeline objects and sets they were recorded against
struct ShadowMaps {
    maps: Vec<ShadowMap>,
    _sets: Vec<DescriptorSet>,
    _pipeline: DepthPipeline,
    _render_pass: RenderPass,
    _pool: std::sync::Arc<DescriptorPool>,
}

impl std::ops::Deref for ShadowMaps {
    type Target = [ShadowMap];

    fn deref(&self) -> &[ShadowMap] {
        &self.maps
    }
}

fn build_shadow_maps(
    context: &std::sync::Arc<VulkanContext>,
    settings: &ShadowSettings,
    buffers: &BufferManager,
    models: &[ModelDraw],
    lights: &[Vec3],
) -> Result<ShadowMaps, ProbeError> {
    let (Some(geometry), Some(parameters)) = (buffers.geometry(), buffers.parameters()) else {
        return Err(ProbeError::Mismatch("shadow maps need geometry and finalized parameters".to_string()));
    };
    let strategy = parameters.strategy();
    let extent = vk::Extent2D { width: settings.resolution, height: settings.resolution };
    let light_count = u32::try_from(lights.len()).unwrap_or(u32::MAX);

    let pool = DescriptorPool::new(context, light_count + 2)?;
    let render_pass = RenderPass::depth_only(context)?;
    let shader = ShaderModule::from_spirv(context, DEGENERATE_VERTEX_SPIRV)?;
    let pipeline = DepthPipeline::new(context, &render_pass, &shader, &pool, strategy, extent)?;

    let mut sets = Vec::new();
    let mut dynamic_set = |region: ParameterRegion| -> Result<vk::DescriptorSet, ProbeError> {
        let buffer = parameters
            .buffer(region)
            .ok_or_else(|| ProbeError::Mismatch(format!("no buffer holds {:?}", region)))?;
        let set = pool.allocate_dynamic_uniform_set(buffer, MAT4_SIZE as u64)?;
        let handle = set.handle();
        sets.push(set);
        Ok(handle)
    };
    let binding = match strategy {
        UniformStrategy::GlobalPacked => ShadowUniformBinding::GlobalPacked {
            dynamic_set: dynamic_set(ParameterRegion::ModelWorld)?,
        },
        UniformStrategy::Individual => ShadowUniformBinding::Individual {
            shadow_set: dynamic_set(ParameterRegion::ShadowViewProjection)?,
            model_set: dynamic_set(ParameterRegion::ModelWorld)?,
        },
        UniformStrategy::PushConstants => ShadowUniformBinding::PushConstants,
    };

    let scene = ShadowScene { geometry, parameters, binding, models };
    let mut maps = Vec::with_capacity(lights.len());
    for (index, light) in (0u32..).zip(lights) {
        let map = ShadowMap::new(
            context,
            settings,
            &pool,
            ShadowPipeline::new(&render_pass, &pipeline),
            &scene,
            index,
            *light,
        )?;
        log::info!("Shadow map {}: {} draws, light {:?}", index, map.draw_count(), light);
        maps.push(map);
    }

    Ok(ShadowMaps {
        maps,
        _sets: sets,
        _pipeline: pipeline,
        _render_pass: render_pass,
        _pool: pool,
    })
}

fn load_config() -> Result<CoreConfig, ProbeError> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading configuration from {}", path);
            CoreConfig::load_from_file(&path)?
        }
        None => CoreConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn run() -> Result<(), ProbeError> {
    let config = load_config()?;
    log::info!(
        "Upload path {:?}, uniform strategy {:?}, shadow resolution {}",
        config.buffers.upload,
        config.buffers.uniforms,
        config.shadow.resolution
    );

    let context = VulkanContext::new(&config)?;
    log::info!(
        "Device {} (min uniform offset alignment {} bytes)",
        context.physical_device().name(),
        context.min_uniform_buffer_offset_alignment()
    );

    let (vertices, indices, models) = synthetic_scene();
    let mut buffers = BufferManager::new(context.clone(), config.buffers);

    let geometry = buffers.create_geometry_buffers(&vertices, &indices)?;
    let (vertex_bytes, index_bytes) = geometry.read_back()?;
    if vertex_bytes != bytemuck::cast_slice::<Vertex, u8>(&vertices)
        || index_bytes != bytemuck::cast_slice::<u32, u8>(&indices)
    {
        return Err(ProbeError::Mismatch("geometry read back differs from the uploaded data".to_string()));
    }
    log::info!("Geometry round trip verified ({} + {} bytes)", vertex_bytes.len(), index_bytes.len());

    let scene = SceneSize::new(MODEL_COUNT, LIGHT_COUNT, LIGHT_COUNT);
    let parameters = buffers.finalize(scene)?;
    let layout = *parameters.layout();
    for region in ParameterRegion::ALL {
        let span = layout.span(region);
        log::info!("  {:?}: base {} bytes, {} elements", region, span.base, span.count);
    }
    log::info!("Stride {} bytes, packed size {} bytes", layout.stride(), layout.packed_size());

    let lights = [Vec3::new(0.0, 0.0, 1.0), Vec3::new(1.0, 0.5, 0.5).normalize()];
    let shadow_maps = build_shadow_maps(&context, &config.shadow, &buffers, &models, &lights)?;

    if let Some(parameters) = buffers.parameters_mut() {
        for (index, model) in (0u32..).zip(&models) {
            parameters.write_matrix(ParameterRegion::ModelWorld, index, &model.world_matrix)?;
        }
        for (index, map) in (0u32..).zip(shadow_maps.iter()) {
            map.write_view_projection(parameters)?;
            parameters.write_matrix(ParameterRegion::LightViewProjection, index, &map.view_projection_matrix())?;
        }
        parameters.flush()?;

        if parameters.strategy() != UniformStrategy::PushConstants {
            parameters.write_globals(&Mat4::identity(), &Mat4::zeros())?;
            log::info!(
                "Model 1 dynamic offset {} bytes",
                parameters.dynamic_offset(ParameterRegion::ModelWorld, 1)?
            );
        }
    }

    let command_buffers: Vec<_> = shadow_maps.iter().map(ShadowMap::command_buffer).collect();
    context.submit_and_wait(&command_buffers)?;
    log::info!("Rendered {} shadow maps", shadow_maps.len());
    drop(shadow_maps);

    let sync = PassSynchronization::new(context)?;
    for signal in [Signal::ImageAcquired, Signal::ShadowDone, Signal::GeometryDone, Signal::LightingDone] {
        log::debug!("{:?} semaphore {:?}", signal, sync.semaphore(signal));
    }
    for pass in Pass::ALL {
        log::info!("{:?} waits on {:?} and signals {:?}", pass, pass.wait_signal(), pass.completion_signal());
    }
    log::debug!("Present waits on {:?}", sync.present_wait_semaphore());

    log::info!("Probe finished");
    Ok(())
}

fn main() {
    logging::init();

    if let Err(e) = run() {
        log::error!("scene_probe failed: {}", e);
        std::process::exit(1);
    }
}
