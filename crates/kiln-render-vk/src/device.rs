// SPDX-License-Identifier: CEPL-1.0
//! Device capability model: queue roles, the per-device identity used to
//! key the pipeline cache, and the surface snapshot the swapchain is sized from.

use ash::vk;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueRole {
    Graphics,
    Presentation,
    Transfer,
    Compute,
    VideoDecode,
}

impl QueueRole {
    pub const ALL: [QueueRole; 5] = [
        QueueRole::Graphics,
        QueueRole::Presentation,
        QueueRole::Transfer,
        QueueRole::Compute,
        QueueRole::VideoDecode,
    ];

    /// Scheduling priority requested for a queue serving this role.
    pub fn priority(self) -> f32 {
        match self {
            QueueRole::Graphics | QueueRole::Presentation | QueueRole::Transfer => 1.0,
            QueueRole::VideoDecode => 0.75,
            QueueRole::Compute => 0.5,
        }
    }
}

/// Everything a persisted pipeline cache must match to be reused.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u32,
    pub device_id: u32,
    pub driver_version: u32,
    pub cache_uuid: [u8; vk::UUID_SIZE],
}

impl DeviceIdentity {
    pub fn from_properties(props: &vk::PhysicalDeviceProperties) -> Self {
        Self {
            vendor_id: props.vendor_id,
            device_id: props.device_id,
            driver_version: props.driver_version,
            cache_uuid: props.pipeline_cache_uuid,
        }
    }
}

/// Surface capabilities as last queried. Refreshed on every swapchain recreation.
#[derive(Clone, Debug, Default)]
pub struct SurfaceSnapshot {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Queue family chosen for each role on one physical device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub presentation: u32,
    pub transfer: u32,
    pub compute: Option<u32>,
    pub video_decode: Option<u32>,
}

impl QueueFamilies {
    /// Picks families from `props`. `presents(i)` reports surface support of family `i`.
    ///
    /// Presentation prefers the graphics family, transfer prefers a
    /// transfer-only family and compute prefers a family without graphics.
    pub fn find(
        props: &[vk::QueueFamilyProperties],
        presents: impl Fn(u32) -> bool,
    ) -> Option<Self> {
        let usable = |flags| families_with(props, flags);
        let graphics = usable(vk::QueueFlags::GRAPHICS).next()?.0;
        let presentation = if presents(graphics) {
            graphics
        } else {
            usable(vk::QueueFlags::empty())
                .map(|(i, _)| i)
                .find(|&i| presents(i))?
        };
        let transfer = usable(vk::QueueFlags::TRANSFER)
            .find(|(_, f)| !f.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE))
            .map(|(i, _)| i)
            .unwrap_or(graphics);
        let compute = usable(vk::QueueFlags::COMPUTE)
            .find(|(_, f)| !f.contains(vk::QueueFlags::GRAPHICS))
            .or_else(|| usable(vk::QueueFlags::COMPUTE).next())
            .map(|(i, _)| i);
        let video_decode = usable(vk::QueueFlags::VIDEO_DECODE_KHR).next().map(|(i, _)| i);

        Some(Self {
            graphics,
            presentation,
            transfer,
            compute,
            video_decode,
        })
    }

    pub fn family(&self, role: QueueRole) -> Option<u32> {
        match role {
            QueueRole::Graphics => Some(self.graphics),
            QueueRole::Presentation => Some(self.presentation),
            QueueRole::Transfer => Some(self.transfer),
            QueueRole::Compute => self.compute,
            QueueRole::VideoDecode => self.video_decode,
        }
    }

    pub fn assignments(&self) -> Vec<(QueueRole, u32)> {
        QueueRole::ALL
            .into_iter()
            .filter_map(|role| self.family(role).map(|family| (role, family)))
            .collect()
    }
}

fn families_with(
    props: &[vk::QueueFamilyProperties],
    flags: vk::QueueFlags,
) -> impl Iterator<Item = (u32, vk::QueueFlags)> + '_ {
    props
        .iter()
        .enumerate()
        .filter(move |(_, p)| p.queue_count > 0 && p.queue_flags.contains(flags))
        .map(|(i, p)| (i as u32, p.queue_flags))
}

/// One `VkDeviceQueueCreateInfo` worth of intent.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueFamilyPlan {
    pub family: u32,
    pub priority: f32,
    /// Roles served by queue 0 of this family.
    pub roles: Vec<QueueRole>,
}

/// Groups roles by family: one queue per distinct family, shared by every
/// role that landed on it, at the highest priority among those roles.
/// Plans come out ordered by family index.
pub fn plan_queue_families(assignments: &[(QueueRole, u32)]) -> Vec<QueueFamilyPlan> {
    let mut sorted = assignments.to_vec();
    sorted.sort_by_key(|&(role, family)| (family, role));

    let mut plans: Vec<QueueFamilyPlan> = Vec::new();
    for (role, family) in sorted {
        match plans.last_mut() {
            Some(plan) if plan.family == family => {
                if !plan.roles.contains(&role) {
                    plan.roles.push(role);
                    plan.priority = plan.priority.max(role.priority());
                }
            }
            _ => plans.push(QueueFamilyPlan {
                family,
                priority: role.priority(),
                roles: vec![role],
            }),
        }
    }
    plans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn single_family_serves_every_role_from_one_queue() {
        let plans = plan_queue_families(&[
            (QueueRole::Graphics, 0),
            (QueueRole::Presentation, 0),
            (QueueRole::Transfer, 0),
            (QueueRole::Compute, 0),
        ]);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].family, 0);
        assert_eq!(plans[0].priority, 1.0);
        assert_eq!(plans[0].roles.len(), 4);
    }

    #[test]
    fn families_are_sorted_and_bucketed() {
        let plans = plan_queue_families(&[
            (QueueRole::Compute, 2),
            (QueueRole::Graphics, 0),
            (QueueRole::Transfer, 1),
            (QueueRole::VideoDecode, 2),
            (QueueRole::Presentation, 0),
        ]);
        let families: Vec<u32> = plans.iter().map(|p| p.family).collect();
        assert_eq!(families, vec![0, 1, 2]);
        assert_eq!(
            plans[0].roles,
            vec![QueueRole::Graphics, QueueRole::Presentation]
        );
        assert_eq!(plans[2].roles, vec![QueueRole::Compute, QueueRole::VideoDecode]);
        assert_eq!(plans[2].priority, 0.75);
    }

    #[test]
    fn lone_compute_family_gets_low_priority() {
        let plans = plan_queue_families(&[(QueueRole::Graphics, 0), (QueueRole::Compute, 3)]);
        assert_eq!(plans[1].priority, 0.5);
    }

    #[test]
    fn prefers_dedicated_transfer_and_async_compute() {
        let props = [
            family(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                16,
            ),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 8),
            family(vk::QueueFlags::TRANSFER, 2),
        ];
        let families = QueueFamilies::find(&props, |i| i == 0).unwrap();
        assert_eq!(families.graphics, 0);
        assert_eq!(families.presentation, 0);
        assert_eq!(families.transfer, 2);
        assert_eq!(families.compute, Some(1));
        assert_eq!(families.video_decode, None);
        assert_eq!(families.assignments().len(), 4);
    }

    #[test]
    fn falls_back_to_graphics_family_for_transfer() {
        let props = [family(vk::QueueFlags::GRAPHICS, 1)];
        let families = QueueFamilies::find(&props, |_| true).unwrap();
        assert_eq!(families.transfer, 0);
        assert_eq!(families.compute, None);
    }

    #[test]
    fn presentation_can_live_elsewhere() {
        let props = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let families = QueueFamilies::find(&props, |i| i == 1).unwrap();
        assert_eq!(families.presentation, 1);
    }

    #[test]
    fn empty_families_are_skipped() {
        let props = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let families = QueueFamilies::find(&props, |_| true).unwrap();
        assert_eq!(families.graphics, 1);
        assert!(QueueFamilies::find(&props[..1], |_| true).is_none());
    }
}
