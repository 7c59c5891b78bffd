//! Parameter buffer layout
//!
//! Pure arithmetic for the per-element parameter regions: the aligned stride, the
//! base offset of each region inside the packed buffer, and the dynamic offset of
//! any element. Nothing here touches the device, so every rule is unit-tested.

use serde::{Deserialize, Serialize};

use crate::foundation::math::MAT4_SIZE;
use crate::render::vulkan::{VulkanError, VulkanResult};

/// How per-draw transforms reach the shaders, fixed for the renderer's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum UniformStrategy {
    /// One buffer per logical region, each bound with its own dynamic offset
    Individual,
    /// One static buffer plus one dynamic buffer holding all four regions back to back
    #[default]
    GlobalPacked,
    /// No parameter buffers; model, view and projection are pushed inline per draw
    PushConstants,
}

impl UniformStrategy {
    /// Whether the strategy allocates parameter buffers
    pub fn uses_buffers(self) -> bool {
        !matches!(self, Self::PushConstants)
    }
}

/// Element counts the parameter buffers are sized for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SceneSize {
    /// Number of models, one world matrix each
    pub models: u32,
    /// Number of lights, one light-space matrix and one data block each
    pub lights: u32,
    /// Number of shadow maps, one view-projection each
    pub shadow_maps: u32,
}

impl SceneSize {
    /// Scene with the given counts
    pub const fn new(models: u32, lights: u32, shadow_maps: u32) -> Self {
        Self { models, lights, shadow_maps }
    }

    /// Reject counts the strategy cannot build buffers for
    ///
    /// Buffer-backed strategies need every count to be non-zero, since a zero-sized
    /// buffer cannot be created. Push constants accept anything.
    pub fn validate_for(&self, strategy: UniformStrategy) -> VulkanResult<()> {
        if !strategy.uses_buffers() {
            return Ok(());
        }

        let zero = [
            ("models", self.models),
            ("lights", self.lights),
            ("shadow_maps", self.shadow_maps),
        ]
        .into_iter()
        .find(|&(_, count)| count == 0);

        match zero {
            Some((name, _)) => Err(VulkanError::InvalidSceneSize {
                strategy,
                reason: format!("{name} must be at least 1"),
            }),
            None => Ok(()),
        }
    }
}

/// One of the four per-element parameter regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterRegion {
    /// Light view-projection used while rendering each shadow map
    ShadowViewProjection,
    /// Model world matrices
    ModelWorld,
    /// Light-space world-view-projection used by the lighting pass
    LightViewProjection,
    /// Encoded light data
    LightData,
}

impl ParameterRegion {
    /// Every region in packed order
    pub const ALL: [Self; 4] = [
        Self::ShadowViewProjection,
        Self::ModelWorld,
        Self::LightViewProjection,
        Self::LightData,
    ];

    const fn slot(self) -> usize {
        match self {
            Self::ShadowViewProjection => 0,
            Self::ModelWorld => 1,
            Self::LightViewProjection => 2,
            Self::LightData => 3,
        }
    }

    /// Element count of this region in `scene`
    pub const fn count(self, scene: SceneSize) -> u32 {
        match self {
            Self::ShadowViewProjection => scene.shadow_maps,
            Self::ModelWorld => scene.models,
            Self::LightViewProjection | Self::LightData => scene.lights,
        }
    }
}

/// Round `size` up to the next multiple of `alignment`
///
/// An alignment of 0 leaves the size unchanged.
pub const fn align_up(size: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return size;
    }
    size.div_ceil(alignment) * alignment
}

/// Stride of one matrix element for a device's minimum uniform offset alignment
pub const fn parameter_stride(min_alignment: u64) -> u64 {
    align_up(MAT4_SIZE as u64, min_alignment)
}

/// Position of one region inside the packed buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSpan {
    /// Byte offset of element 0
    pub base: u64,
    /// Number of elements
    pub count: u32,
}

impl RegionSpan {
    /// One past the last byte of the region
    pub const fn end(&self, stride: u64) -> u64 {
        self.base + self.count as u64 * stride
    }
}

/// Stride and region placement for one finalized scene
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterLayout {
    stride: u64,
    scene: SceneSize,
    spans: [RegionSpan; 4],
}

impl ParameterLayout {
    /// Lay the four regions out back to back in packed order
    pub fn new(scene: SceneSize, min_alignment: u64) -> Self {
        let stride = parameter_stride(min_alignment);

        let mut spans = [RegionSpan { base: 0, count: 0 }; 4];
        let mut base = 0;
        for region in ParameterRegion::ALL {
            let span = RegionSpan { base, count: region.count(scene) };
            base = span.end(stride);
            spans[region.slot()] = span;
        }

        Self { stride, scene, spans }
    }

    /// Aligned distance between consecutive elements
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Counts the layout was built for
    pub fn scene(&self) -> SceneSize {
        self.scene
    }

    /// Placement of `region` inside the packed buffer
    pub fn span(&self, region: ParameterRegion) -> RegionSpan {
        self.spans[region.slot()]
    }

    /// Size in bytes of one region on its own
    pub fn region_size(&self, region: ParameterRegion) -> u64 {
        u64::from(self.span(region).count) * self.stride
    }

    /// Size in bytes of the packed buffer holding every region
    pub fn packed_size(&self) -> u64 {
        self.span(ParameterRegion::LightData).end(self.stride)
    }

    /// Byte offset of `index` relative to the start of its region
    pub fn element_offset(&self, region: ParameterRegion, index: u32) -> VulkanResult<u64> {
        let span = self.span(region);
        if index >= span.count {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{region:?} index {index} out of range (count {})", span.count),
            });
        }
        Ok(u64::from(index) * self.stride)
    }

    /// Byte offset of `index` inside the packed buffer
    pub fn packed_offset(&self, region: ParameterRegion, index: u32) -> VulkanResult<u64> {
        Ok(self.span(region).base + self.element_offset(region, index)?)
    }
}

/// Narrow a byte offset to the `u32` Vulkan takes for dynamic offsets
pub fn to_dynamic_offset(offset: u64) -> VulkanResult<u32> {
    u32::try_from(offset).map_err(|_| VulkanError::InvalidOperation {
        reason: format!("dynamic offset {offset} exceeds u32"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_is_aligned_and_covers_element() {
        for alignment in [1u64, 4, 16, 32, 64, 100, 128, 256, 1000] {
            for size in [1u64, 4, 63, 64, 65, 128, 200] {
                let stride = align_up(size, alignment);
                assert_eq!(stride % alignment, 0, "size {size} alignment {alignment}");
                assert!(stride >= size);
                assert!(stride < size + alignment);
            }
        }
    }

    #[test]
    fn test_parameter_stride_for_common_alignments() {
        assert_eq!(parameter_stride(16), 64);
        assert_eq!(parameter_stride(64), 64);
        assert_eq!(parameter_stride(256), 256);
        assert_eq!(parameter_stride(0), 64);
    }

    #[test]
    fn test_packed_offsets_follow_region_order() {
        let layout = ParameterLayout::new(SceneSize::new(3, 2, 1), 256);
        let stride = layout.stride();

        assert_eq!(layout.span(ParameterRegion::ShadowViewProjection).base, 0);
        assert_eq!(layout.span(ParameterRegion::ModelWorld).base, stride);
        assert_eq!(layout.span(ParameterRegion::LightViewProjection).base, 4 * stride);
        assert_eq!(layout.span(ParameterRegion::LightData).base, 6 * stride);
        assert_eq!(layout.packed_size(), (1 + 3 + 2 * 2) * stride);
    }

    #[test]
    fn test_regions_are_ordered_and_disjoint() {
        for shadow_maps in 1..4 {
            for models in 1..5 {
                for lights in 1..4 {
                    let layout = ParameterLayout::new(SceneSize::new(models, lights, shadow_maps), 64);
                    let stride = layout.stride();

                    let shadow = layout.span(ParameterRegion::ShadowViewProjection);
                    let model = layout.span(ParameterRegion::ModelWorld);
                    let light_vp = layout.span(ParameterRegion::LightViewProjection);
                    let light_data = layout.span(ParameterRegion::LightData);

                    assert_eq!(shadow.base, 0);
                    assert!(shadow.base < model.base);
                    assert!(model.base < light_vp.base);
                    assert!(light_vp.base < light_data.base);

                    assert!(shadow.end(stride) <= model.base);
                    assert!(model.end(stride) <= light_vp.base);
                    assert!(light_vp.end(stride) <= light_data.base);
                    assert_eq!(
                        layout.packed_size(),
                        u64::from(shadow_maps + models + 2 * lights) * stride
                    );
                }
            }
        }
    }

    #[test]
    fn test_element_offsets() {
        let layout = ParameterLayout::new(SceneSize::new(4, 1, 2), 256);

        assert_eq!(layout.element_offset(ParameterRegion::ModelWorld, 3).unwrap(), 768);
        assert_eq!(layout.packed_offset(ParameterRegion::ModelWorld, 0).unwrap(), 512);
        assert_eq!(layout.packed_offset(ParameterRegion::ModelWorld, 3).unwrap(), 512 + 768);
        assert_eq!(layout.packed_offset(ParameterRegion::ShadowViewProjection, 1).unwrap(), 256);
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        let layout = ParameterLayout::new(SceneSize::new(2, 1, 1), 64);

        assert!(layout.element_offset(ParameterRegion::ModelWorld, 2).is_err());
        assert!(layout.packed_offset(ParameterRegion::LightData, 1).is_err());
    }

    #[test]
    fn test_zero_counts_rejected_for_buffer_strategies() {
        let empty_lights = SceneSize::new(2, 0, 1);

        for strategy in [UniformStrategy::Individual, UniformStrategy::GlobalPacked] {
            let result = empty_lights.validate_for(strategy);
            assert!(matches!(
                result,
                Err(VulkanError::InvalidSceneSize { strategy: s, .. }) if s == strategy
            ));
        }

        assert!(empty_lights.validate_for(UniformStrategy::PushConstants).is_ok());
        assert!(SceneSize::new(1, 1, 1).validate_for(UniformStrategy::GlobalPacked).is_ok());
    }

    #[test]
    fn test_dynamic_offset_narrowing() {
        assert_eq!(to_dynamic_offset(512).unwrap(), 512);
        assert!(to_dynamic_offset(u64::from(u32::MAX) + 1).is_err());
    }
}
