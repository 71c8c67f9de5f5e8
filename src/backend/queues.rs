// Queue family roles
//
// One pass over the families: first graphics, first transfer-only and
// first present-capable family win.

use ash::vk;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueAssignment {
    pub graphics: u32,
    pub present: u32,
    pub transfer: u32,
}

impl QueueAssignment {
    /// Resolve every role from the family flags.
    ///
    /// `supports_present` is only asked about families while the present
    /// role is still open. Transfer falls back to the graphics family when
    /// no transfer-without-graphics family exists.
    pub fn resolve(
        families: &[vk::QueueFlags],
        mut supports_present: impl FnMut(u32) -> EngineResult<bool>,
    ) -> EngineResult<Self> {
        let mut graphics = None;
        let mut transfer = None;
        let mut present = None;

        for (index, flags) in families.iter().enumerate() {
            let index = index as u32;

            if graphics.is_none() && flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics = Some(index);
            }
            if transfer.is_none()
                && flags.contains(vk::QueueFlags::TRANSFER)
                && !flags.contains(vk::QueueFlags::GRAPHICS)
            {
                transfer = Some(index);
            }
            if present.is_none() && supports_present(index)? {
                present = Some(index);
            }

            if graphics.is_some() && transfer.is_some() && present.is_some() {
                break;
            }
        }

        let graphics = graphics.ok_or_else(|| {
            EngineError::IncompleteQueueFamilies("no graphics queue family".into())
        })?;
        let present = present.ok_or_else(|| {
            EngineError::IncompleteQueueFamilies("no queue family can present to the surface".into())
        })?;

        Ok(Self {
            graphics,
            present,
            transfer: transfer.unwrap_or(graphics),
        })
    }

    pub fn has_dedicated_transfer(&self) -> bool {
        self.transfer != self.graphics
    }

    /// Distinct families in role order (graphics, present, transfer).
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(3);
        for family in [self.graphics, self.present, self.transfer] {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}
