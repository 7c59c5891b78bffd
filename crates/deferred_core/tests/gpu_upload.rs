//! GPU integration tests
//!
//! Each test builds a headless context and skips when no Vulkan device is
//! available, so the suite passes on machines without a GPU. Shadow maps are
//! built with a vertex shader that collapses every triangle, so draws run but
//! cover no texels.
//!
//! ```bash
//! cargo test -p deferred_core --test gpu_upload -- --nocapture
//! ```

use std::sync::Arc;

use ash::vk;
use deferred_core::foundation::logging;
use deferred_core::foundation::math::MAT4_SIZE;
use deferred_core::prelude::*;
use deferred_core::render::passes::{ShadowMapState, ShadowScene, Signal, SignalState};
use deferred_core::render::vulkan::{DepthPipeline, RenderPass, ShaderModule, DEGENERATE_VERTEX_SPIRV};

fn headless_context() -> Option<Arc<VulkanContext>> {
    logging::init_for_tests();

    let config = CoreConfig {
        enable_validation: false,
        ..CoreConfig::default()
    };
    match VulkanContext::new(&config) {
        Ok(context) => Some(context),
        Err(e) => {
            eprintln!("Vulkan device not available ({e}), skipping");
            None
        }
    }
}

fn test_geometry() -> (Vec<Vertex>, Vec<u32>) {
    let vertices: Vec<Vertex> = (0..37)
        .map(|i| {
            let f = i as f32;
            Vertex {
                position: [f, f * 0.5, -f],
                tex_coord: [f / 37.0, 1.0 - f / 37.0],
                normal: [0.0, 1.0, 0.0],
                tangent: [1.0, 0.0, 0.0],
                bitangent: [0.0, 0.0, f],
            }
        })
        .collect();
    let indices: Vec<u32> = (0..37).rev().chain(0..14).collect();
    (vertices, indices)
}

fn buffer_config(upload: UploadPath, uniforms: UniformStrategy) -> BufferConfig {
    BufferConfig { upload, uniforms }
}

#[test]
fn test_staged_and_direct_uploads_match() {
    let Some(context) = headless_context() else { return };
    let (vertices, indices) = test_geometry();

    let mut read_backs = Vec::new();
    for upload in [UploadPath::Staged, UploadPath::Direct] {
        let mut buffers = BufferManager::new(context.clone(), buffer_config(upload, UniformStrategy::GlobalPacked));
        let geometry = buffers.create_geometry_buffers(&vertices, &indices).unwrap();

        assert_eq!(geometry.upload_path(), upload);
        assert_eq!(geometry.vertex_count(), 37);
        assert_eq!(geometry.index_count(), 51);
        read_backs.push(geometry.read_back().unwrap());
    }

    let (staged_vertices, staged_indices) = &read_backs[0];
    let (direct_vertices, direct_indices) = &read_backs[1];
    assert_eq!(staged_vertices, direct_vertices);
    assert_eq!(staged_indices, direct_indices);
    assert_eq!(staged_vertices.as_slice(), bytemuck::cast_slice::<Vertex, u8>(&vertices));
    assert_eq!(staged_indices.as_slice(), bytemuck::cast_slice::<u32, u8>(&indices));
}

#[test]
fn test_empty_geometry_rejected() {
    let Some(context) = headless_context() else { return };
    let mut buffers = BufferManager::new(context, BufferConfig::default());

    let result = buffers.create_geometry_buffers(&[], &[0, 1, 2]);
    assert!(matches!(result, Err(VulkanError::InvalidSceneSize { .. })));
}

#[test]
fn test_finalize_per_strategy() {
    let Some(context) = headless_context() else { return };
    let alignment = context.min_uniform_buffer_offset_alignment();
    let scene = SceneSize::new(4, 2, 2);

    for strategy in [UniformStrategy::GlobalPacked, UniformStrategy::Individual, UniformStrategy::PushConstants] {
        let mut buffers = BufferManager::new(context.clone(), buffer_config(UploadPath::Direct, strategy));
        let parameters = buffers.finalize(scene).unwrap();

        let stride = parameters.stride();
        assert_eq!(stride % alignment.max(1), 0);
        assert!(stride >= 64);

        match strategy {
            UniformStrategy::GlobalPacked => {
                assert_eq!(parameters.dynamic_size(), 10 * stride);
                assert_eq!(parameters.static_buffers().len(), 1);
                let model = parameters.buffer(ParameterRegion::ModelWorld);
                assert_eq!(model, parameters.buffer(ParameterRegion::LightData));
                assert_eq!(parameters.dynamic_offset(ParameterRegion::ModelWorld, 1).unwrap() as u64, 3 * stride);
            }
            UniformStrategy::Individual => {
                assert_eq!(parameters.dynamic_size(), 10 * stride);
                assert_eq!(parameters.static_buffers().len(), 2);
                assert_ne!(
                    parameters.buffer(ParameterRegion::ModelWorld),
                    parameters.buffer(ParameterRegion::LightData)
                );
                assert_eq!(parameters.dynamic_offset(ParameterRegion::ModelWorld, 1).unwrap() as u64, stride);
            }
            UniformStrategy::PushConstants => {
                assert_eq!(parameters.dynamic_size(), 0);
                assert!(parameters.buffer(ParameterRegion::ModelWorld).is_none());
                assert!(parameters.dynamic_offset(ParameterRegion::ModelWorld, 0).is_err());
            }
        }

        let parameters = buffers.parameters_mut().unwrap();
        parameters.write_matrix(ParameterRegion::ModelWorld, 3, &Mat4::identity()).unwrap();
        let globals = parameters.write_globals(&Mat4::identity(), &Mat4::zeros());
        if strategy == UniformStrategy::PushConstants {
            assert!(matches!(globals, Err(VulkanError::InvalidOperation { .. })));
        } else {
            globals.unwrap();
        }
        parameters.flush().unwrap();

        assert!(matches!(buffers.finalize(scene), Err(VulkanError::InvalidOperation { .. })));
    }
}

#[test]
fn test_zero_counts_rejected_before_allocation() {
    let Some(context) = headless_context() else { return };
    let mut buffers = BufferManager::new(context, buffer_config(UploadPath::Staged, UniformStrategy::Individual));

    let result = buffers.finalize(SceneSize::new(3, 0, 1));
    assert!(matches!(
        result,
        Err(VulkanError::InvalidSceneSize { strategy: UniformStrategy::Individual, .. })
    ));
    assert!(buffers.parameters().is_none());

    // A rejected scene does not consume the one finalize call
    assert!(buffers.finalize(SceneSize::new(3, 1, 1)).is_ok());
}

#[test]
fn test_sync_set_refuses_out_of_order_submission() {
    let Some(context) = headless_context() else { return };
    let mut sync = PassSynchronization::new(context).unwrap();

    let handles: Vec<_> = [
        Signal::ImageAcquired,
        Signal::ShadowDone,
        Signal::GeometryDone,
        Signal::LightingDone,
        Signal::CompositeDone,
    ]
    .into_iter()
    .map(|signal| sync.semaphore(signal))
    .collect();
    for (i, a) in handles.iter().enumerate() {
        for b in &handles[i + 1..] {
            assert_ne!(a, b);
        }
    }
    assert_eq!(sync.present_wait_semaphore(), sync.semaphore(Signal::CompositeDone));

    let result = sync.submit_pass(Pass::Lighting, &[]);
    assert!(matches!(
        result,
        Err(VulkanError::PassOrderViolation { pass: Pass::Lighting, waiting_on: Signal::GeometryDone })
    ));
}

#[test]
fn test_frame_start_and_early_present() {
    let Some(context) = headless_context() else { return };
    let mut sync = PassSynchronization::new(context).unwrap();

    let acquire = sync.acquire_signal();
    assert_eq!(acquire, sync.semaphore(Signal::ImageAcquired));
    assert_eq!(sync.sequencer().state(Signal::ImageAcquired), SignalState::Signaled);

    let result = sync.frame_presented();
    assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
}

fn shadow_models() -> (Vec<Vertex>, Vec<u32>, Vec<ModelDraw>) {
    let vertices: Vec<Vertex> = (0..8).map(|i| Vertex::at([i as f32, 0.0, (i % 3) as f32])).collect();
    let indices: Vec<u32> = vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4, 1, 5, 6];
    let models = vec![
        ModelDraw::new(
            Mat4::identity(),
            vec![MeshRange { index_count: 6, first_index: 0 }, MeshRange { index_count: 3, first_index: 12 }],
        ),
        ModelDraw::new(
            Mat4::new_translation(&Vec3::new(10.0, 0.0, 0.0)),
            vec![MeshRange { index_count: 6, first_index: 6 }],
        ),
    ];
    (vertices, indices, models)
}

fn small_shadow_settings() -> ShadowSettings {
    ShadowSettings {
        resolution: 64,
        ..ShadowSettings::default()
    }
}

#[test]
fn test_shadow_map_builds_for_each_binding() {
    let Some(context) = headless_context() else { return };
    let (vertices, indices, models) = shadow_models();
    let settings = small_shadow_settings();
    let extent = vk::Extent2D { width: settings.resolution, height: settings.resolution };

    let pool = DescriptorPool::new(&context, 8).unwrap();
    let render_pass = RenderPass::depth_only(&context).unwrap();
    let shader = ShaderModule::from_spirv(&context, DEGENERATE_VERTEX_SPIRV).unwrap();

    for strategy in [UniformStrategy::PushConstants, UniformStrategy::GlobalPacked] {
        let mut buffers = BufferManager::new(context.clone(), buffer_config(UploadPath::Staged, strategy));
        buffers.create_geometry_buffers(&vertices, &indices).unwrap();
        buffers.finalize(SceneSize::new(2, 2, 2)).unwrap();

        let pipeline = DepthPipeline::new(&context, &render_pass, &shader, &pool, strategy, extent).unwrap();

        let dynamic_set = match strategy {
            UniformStrategy::GlobalPacked => {
                let buffer = buffers.parameters().unwrap().buffer(ParameterRegion::ModelWorld).unwrap();
                Some(pool.allocate_dynamic_uniform_set(buffer, MAT4_SIZE as u64).unwrap())
            }
            _ => None,
        };
        let binding = match &dynamic_set {
            Some(set) => ShadowUniformBinding::GlobalPacked { dynamic_set: set.handle() },
            None => ShadowUniformBinding::PushConstants,
        };

        let scene = ShadowScene {
            geometry: buffers.geometry().unwrap(),
            parameters: buffers.parameters().unwrap(),
            binding,
            models: &models,
        };
        let light = Vec3::new(0.0, 0.0, 1.0);
        let map = ShadowMap::new(
            &context,
            &settings,
            &pool,
            ShadowPipeline::new(&render_pass, &pipeline),
            &scene,
            1,
            light,
        )
        .unwrap();

        assert_eq!(map.state(), ShadowMapState::Recorded);
        assert_eq!(map.draw_count(), 3);
        assert_eq!(map.shadow_index(), 1);
        assert_ne!(map.depth_image(), vk::Image::null());
        assert_ne!(map.depth_view(), vk::ImageView::null());
        assert_ne!(map.sampler(), vk::Sampler::null());
        assert_ne!(map.framebuffer(), vk::Framebuffer::null());
        assert_ne!(map.descriptor_set(), vk::DescriptorSet::null());
        assert_ne!(map.command_buffer(), vk::CommandBuffer::null());

        let parameters = buffers.parameters_mut().unwrap();
        map.write_view_projection(parameters).unwrap();
        let stored = parameters.matrix(ParameterRegion::ShadowViewProjection, 1).unwrap();
        assert_eq!(stored, ShadowProjection::from(&settings).view_projection_matrix(light));

        // The recorded sequence is submittable more than once
        context.submit_and_wait(&[map.command_buffer(), map.command_buffer()]).unwrap();
    }
}

#[test]
fn test_shadow_map_rejects_zero_resolution() {
    let Some(context) = headless_context() else { return };
    let (vertices, indices, models) = shadow_models();

    let mut buffers = BufferManager::new(context.clone(), buffer_config(UploadPath::Direct, UniformStrategy::PushConstants));
    buffers.create_geometry_buffers(&vertices, &indices).unwrap();
    buffers.finalize(SceneSize::new(2, 1, 1)).unwrap();

    let pool = DescriptorPool::new(&context, 2).unwrap();
    let render_pass = RenderPass::depth_only(&context).unwrap();
    let shader = ShaderModule::from_spirv(&context, DEGENERATE_VERTEX_SPIRV).unwrap();
    let extent = vk::Extent2D { width: 1, height: 1 };
    let pipeline =
        DepthPipeline::new(&context, &render_pass, &shader, &pool, UniformStrategy::PushConstants, extent).unwrap();

    let scene = ShadowScene {
        geometry: buffers.geometry().unwrap(),
        parameters: buffers.parameters().unwrap(),
        binding: ShadowUniformBinding::PushConstants,
        models: &models,
    };
    let settings = ShadowSettings {
        resolution: 0,
        ..ShadowSettings::default()
    };
    let result = ShadowMap::new(
        &context,
        &settings,
        &pool,
        ShadowPipeline::new(&render_pass, &pipeline),
        &scene,
        0,
        Vec3::new(0.0, 0.0, 1.0),
    );
    assert!(matches!(result, Err(VulkanError::InvalidSettings(_))));
}

#[test]
fn test_shadow_map_drop_waits_for_pending_submission() {
    let Some(context) = headless_context() else { return };
    let (vertices, indices, models) = shadow_models();
    let settings = small_shadow_settings();
    let extent = vk::Extent2D { width: settings.resolution, height: settings.resolution };

    let mut buffers = BufferManager::new(context.clone(), buffer_config(UploadPath::Staged, UniformStrategy::PushConstants));
    buffers.create_geometry_buffers(&vertices, &indices).unwrap();
    buffers.finalize(SceneSize::new(2, 1, 1)).unwrap();

    let pool = DescriptorPool::new(&context, 2).unwrap();
    let render_pass = RenderPass::depth_only(&context).unwrap();
    let shader = ShaderModule::from_spirv(&context, DEGENERATE_VERTEX_SPIRV).unwrap();
    let pipeline =
        DepthPipeline::new(&context, &render_pass, &shader, &pool, UniformStrategy::PushConstants, extent).unwrap();

    let scene = ShadowScene {
        geometry: buffers.geometry().unwrap(),
        parameters: buffers.parameters().unwrap(),
        binding: ShadowUniformBinding::PushConstants,
        models: &models,
    };
    let map = ShadowMap::new(
        &context,
        &settings,
        &pool,
        ShadowPipeline::new(&render_pass, &pipeline),
        &scene,
        0,
        Vec3::new(0.5, 0.2, 1.0).normalize(),
    )
    .unwrap();

    // Queue work that reads the map's framebuffer, then release it without waiting
    context.submit(&[map.command_buffer()]).unwrap();
    drop(map);

    drop(buffers);
    context.wait_idle().unwrap();
}
