//! Pass Synchronization Set
//!
//! Five binary semaphores enforce the per-frame order
//! acquire → shadow → geometry → lighting → composite → present. Each pass waits
//! on the signal of the step before it and signals its own on completion.
//!
//! The GPU cannot report an ordering mistake, it just hangs or reads stale data,
//! so submissions are also checked against a CPU-side [`PassSequencer`] that
//! simulates the signal states of the current frame.

use ash::vk;
use std::sync::Arc;

use crate::render::vulkan::{Semaphore, VulkanContext, VulkanError, VulkanResult};

/// Render passes in frame order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    /// Depth-only shadow map rendering
    Shadow,
    /// G-buffer fill
    Geometry,
    /// Deferred lighting
    Lighting,
    /// Final composite
    Composite,
}

impl Pass {
    /// Every pass in frame order
    pub const ALL: [Self; 4] = [Self::Shadow, Self::Geometry, Self::Lighting, Self::Composite];

    /// Signal the pass waits on before its attachment-writing stages
    pub const fn wait_signal(self) -> Signal {
        match self {
            Self::Shadow => Signal::ImageAcquired,
            Self::Geometry => Signal::ShadowDone,
            Self::Lighting => Signal::GeometryDone,
            Self::Composite => Signal::LightingDone,
        }
    }

    /// Signal the pass produces on completion
    pub const fn completion_signal(self) -> Signal {
        match self {
            Self::Shadow => Signal::ShadowDone,
            Self::Geometry => Signal::GeometryDone,
            Self::Lighting => Signal::LightingDone,
            Self::Composite => Signal::CompositeDone,
        }
    }

    /// Pipeline stages that may not start before the wait signal arrives
    pub fn wait_stage(self) -> vk::PipelineStageFlags {
        match self {
            Self::Shadow => {
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
            }
            Self::Geometry => {
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            }
            Self::Lighting | Self::Composite => {
                vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            }
        }
    }
}

/// The five pass-boundary signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Swapchain image is ready to be rendered into
    ImageAcquired,
    /// Shadow maps are written
    ShadowDone,
    /// G-buffer is written
    GeometryDone,
    /// Lighting result is written
    LightingDone,
    /// Frame is ready to present
    CompositeDone,
}

impl Signal {
    /// Every signal in frame order
    pub const ALL: [Self; 5] = [
        Self::ImageAcquired,
        Self::ShadowDone,
        Self::GeometryDone,
        Self::LightingDone,
        Self::CompositeDone,
    ];

    const fn slot(self) -> usize {
        match self {
            Self::ImageAcquired => 0,
            Self::ShadowDone => 1,
            Self::GeometryDone => 2,
            Self::LightingDone => 3,
            Self::CompositeDone => 4,
        }
    }
}

/// Simulated state of a binary signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalState {
    /// Nothing pending
    #[default]
    Unsignaled,
    /// Produced and not yet consumed
    Signaled,
}

/// CPU-side model of the five signals for ordering checks
#[derive(Debug, Clone, Default)]
pub struct PassSequencer {
    states: [SignalState; 5],
}

impl PassSequencer {
    /// All signals unsignaled
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `signal`
    pub fn state(&self, signal: Signal) -> SignalState {
        self.states[signal.slot()]
    }

    /// Record that the presentation engine will signal image-acquired
    pub fn image_acquired(&mut self) {
        self.states[Signal::ImageAcquired.slot()] = SignalState::Signaled;
    }

    /// Fail if `pass` would wait on a signal nothing has produced
    pub fn check(&self, pass: Pass) -> VulkanResult<()> {
        let waiting_on = pass.wait_signal();
        match self.state(waiting_on) {
            SignalState::Signaled => Ok(()),
            SignalState::Unsignaled => Err(VulkanError::PassOrderViolation { pass, waiting_on }),
        }
    }

    /// Consume the wait signal of `pass` and produce its completion signal
    ///
    /// Leaves every state untouched when the order is violated.
    pub fn submit(&mut self, pass: Pass) -> VulkanResult<()> {
        self.check(pass)?;
        self.states[pass.wait_signal().slot()] = SignalState::Unsignaled;
        self.states[pass.completion_signal().slot()] = SignalState::Signaled;
        Ok(())
    }

    /// Consume composite-done for presentation
    pub fn present(&mut self) -> VulkanResult<()> {
        let slot = Signal::CompositeDone.slot();
        if self.states[slot] == SignalState::Unsignaled {
            return Err(VulkanError::InvalidOperation {
                reason: "present requested before the composite pass signaled".to_string(),
            });
        }
        self.states[slot] = SignalState::Unsignaled;
        Ok(())
    }
}

/// The five pass-boundary semaphores and the submission order they enforce
pub struct PassSynchronization {
    context: Arc<VulkanContext>,
    sequencer: PassSequencer,
    semaphores: [Semaphore; 5],
}

impl PassSynchronization {
    /// Create the five semaphores, all unsignaled
    pub fn new(context: Arc<VulkanContext>) -> VulkanResult<Self> {
        let semaphores = [
            Semaphore::new(&context)?,
            Semaphore::new(&context)?,
            Semaphore::new(&context)?,
            Semaphore::new(&context)?,
            Semaphore::new(&context)?,
        ];

        log::debug!("Created pass synchronization set ({} semaphores)", semaphores.len());

        Ok(Self {
            context,
            sequencer: PassSequencer::new(),
            semaphores,
        })
    }

    /// Semaphore backing `signal`
    pub fn semaphore(&self, signal: Signal) -> vk::Semaphore {
        self.semaphores[signal.slot()].handle()
    }

    /// Semaphore to hand to image acquisition; marks the frame as started
    pub fn acquire_signal(&mut self) -> vk::Semaphore {
        self.sequencer.image_acquired();
        self.semaphore(Signal::ImageAcquired)
    }

    /// Submit `command_buffers` for `pass`, waiting on its predecessor and signaling its completion
    ///
    /// Fails with `PassOrderViolation` without touching the queue if the predecessor
    /// has not been submitted this frame.
    pub fn submit_pass(&mut self, pass: Pass, command_buffers: &[vk::CommandBuffer]) -> VulkanResult<()> {
        self.sequencer.check(pass)?;

        let wait_semaphores = [self.semaphore(pass.wait_signal())];
        let wait_stages = [pass.wait_stage()];
        let signal_semaphores = [self.semaphore(pass.completion_signal())];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.context.device()
                .queue_submit(self.context.queue(), &[submit_info.build()], vk::Fence::null())
                .map_err(VulkanError::Api)?;
        }

        log::trace!("Submitted {:?} pass ({} command buffers)", pass, command_buffers.len());
        self.sequencer.submit(pass)
    }

    /// Semaphore presentation must wait on
    pub fn present_wait_semaphore(&self) -> vk::Semaphore {
        self.semaphore(Signal::CompositeDone)
    }

    /// Record that presentation consumed composite-done, closing the frame
    pub fn frame_presented(&mut self) -> VulkanResult<()> {
        self.sequencer.present()
    }

    /// Simulated signal states of the current frame
    pub fn sequencer(&self) -> &PassSequencer {
        &self.sequencer
    }
}

impl Drop for PassSynchronization {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::error!("Device wait failed before destroying pass semaphores: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_frame_in_order() {
        let mut sequencer = PassSequencer::new();
        sequencer.image_acquired();

        for pass in Pass::ALL {
            sequencer.submit(pass).unwrap();
        }
        sequencer.present().unwrap();

        for signal in Signal::ALL {
            assert_eq!(sequencer.state(signal), SignalState::Unsignaled);
        }
    }

    #[test]
    fn test_lighting_before_geometry_is_refused() {
        let mut sequencer = PassSequencer::new();
        sequencer.image_acquired();
        sequencer.submit(Pass::Shadow).unwrap();

        let result = sequencer.submit(Pass::Lighting);
        assert!(matches!(
            result,
            Err(VulkanError::PassOrderViolation { pass: Pass::Lighting, waiting_on: Signal::GeometryDone })
        ));

        // The refused submission changed nothing
        assert_eq!(sequencer.state(Signal::ShadowDone), SignalState::Signaled);
        assert_eq!(sequencer.state(Signal::LightingDone), SignalState::Unsignaled);

        sequencer.submit(Pass::Geometry).unwrap();
        assert!(sequencer.submit(Pass::Lighting).is_ok());
    }

    #[test]
    fn test_shadow_waits_for_acquire() {
        let mut sequencer = PassSequencer::new();
        assert!(matches!(
            sequencer.submit(Pass::Shadow),
            Err(VulkanError::PassOrderViolation { pass: Pass::Shadow, waiting_on: Signal::ImageAcquired })
        ));
    }

    #[test]
    fn test_signal_is_consumed_once() {
        let mut sequencer = PassSequencer::new();
        sequencer.image_acquired();
        sequencer.submit(Pass::Shadow).unwrap();
        sequencer.submit(Pass::Geometry).unwrap();

        assert!(sequencer.submit(Pass::Geometry).is_err());
    }

    #[test]
    fn test_present_requires_composite() {
        let mut sequencer = PassSequencer::new();
        assert!(sequencer.present().is_err());
    }

    #[test]
    fn test_signal_chain_is_linear() {
        assert_eq!(Pass::Shadow.wait_signal(), Signal::ImageAcquired);
        for pair in Pass::ALL.windows(2) {
            assert_eq!(pair[1].wait_signal(), pair[0].completion_signal());
        }
        assert_eq!(Pass::Composite.completion_signal(), Signal::CompositeDone);
    }

    #[test]
    fn test_wait_stages_cover_attachment_writes() {
        assert!(Pass::Shadow.wait_stage().contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert!(Pass::Geometry.wait_stage().contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
        assert!(Pass::Composite.wait_stage().contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
    }
}
