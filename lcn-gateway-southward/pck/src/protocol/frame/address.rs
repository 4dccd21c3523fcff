use std::fmt;

/// Bus address of a single module or of a module group.
///
/// Segment `0` denotes the segment the gateway is attached to. Once the local
/// segment id is known, [`LcnAddr::physical_segment_id`] maps between the
/// logical segment and the value written on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LcnAddr {
    pub segment_id: i32,
    pub id: i32,
    pub is_group: bool,
}

impl LcnAddr {
    #[inline]
    pub const fn module(segment_id: i32, id: i32) -> Self {
        Self {
            segment_id,
            id,
            is_group: false,
        }
    }

    #[inline]
    pub const fn group(segment_id: i32, id: i32) -> Self {
        Self {
            segment_id,
            id,
            is_group: true,
        }
    }

    /// Segment id as written in an address header.
    ///
    /// Modules of the local segment are addressed with segment `0`.
    #[inline]
    pub fn physical_segment_id(&self, local_seg_id: i32) -> i32 {
        if self.segment_id == local_seg_id {
            0
        } else {
            self.segment_id
        }
    }

    /// Resolves a module address received on the wire.
    #[inline]
    pub fn logical(wire_segment_id: i32, id: i32, local_seg_id: i32) -> Self {
        let segment_id = if wire_segment_id == 0 {
            local_seg_id.max(0)
        } else {
            wire_segment_id
        };
        Self::module(segment_id, id)
    }
}

impl fmt::Display for LcnAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:03}{:03}",
            if self.is_group { "G" } else { "M" },
            self.segment_id,
            self.id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_segment_is_written_as_zero() {
        let addr = LcnAddr::module(5, 10);
        assert_eq!(addr.physical_segment_id(5), 0);
        assert_eq!(addr.physical_segment_id(0), 5);
        assert_eq!(addr.physical_segment_id(-1), 5);
    }

    #[test]
    fn wire_segment_zero_resolves_to_local() {
        assert_eq!(LcnAddr::logical(0, 7, 5), LcnAddr::module(5, 7));
        assert_eq!(LcnAddr::logical(0, 7, -1), LcnAddr::module(0, 7));
        assert_eq!(LcnAddr::logical(12, 7, 5), LcnAddr::module(12, 7));
    }

    #[test]
    fn group_and_module_differ() {
        assert_ne!(LcnAddr::module(0, 3), LcnAddr::group(0, 3));
        assert_eq!(LcnAddr::group(3, 3).to_string(), "G003003");
    }
}
