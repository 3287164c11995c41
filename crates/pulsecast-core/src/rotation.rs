//! Block rotation of instances and templates
//!
//! Recipient `i` goes to `items[(i / switch_every) % len]`: each item serves a
//! contiguous block of `switch_every` recipients before the next one takes
//! over. A block size of one is plain round robin.

/// Index selected for `position`, or `None` when there is nothing to pick from
pub fn rotation_index(position: usize, switch_every: usize, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    Some((position / switch_every.max(1)) % len)
}

/// Instance and template rotation for one campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rotator {
    instance_switch_count: usize,
    message_rotation_count: usize,
}

impl Rotator {
    /// Non-positive counts are treated as one
    pub fn new(instance_switch_count: i32, message_rotation_count: i32) -> Self {
        Self {
            instance_switch_count: instance_switch_count.max(1) as usize,
            message_rotation_count: message_rotation_count.max(1) as usize,
        }
    }

    pub fn instance_for<'a, T>(&self, position: usize, instances: &'a [T]) -> Option<&'a T> {
        rotation_index(position, self.instance_switch_count, instances.len())
            .and_then(|index| instances.get(index))
    }

    pub fn template_for<'a, T>(&self, position: usize, templates: &'a [T]) -> Option<&'a T> {
        rotation_index(position, self.message_rotation_count, templates.len())
            .and_then(|index| templates.get(index))
    }
}
