//! Logical stage addresses.
//!
//! A dual-module MCS2 controller drives six channels. It is exposed as two
//! logical 3-axis stages whose addresses are the physical locator plus a
//! channel-group suffix:
//!
//! ```text
//! usb:sn:MCS2-00001234_Ch1-3   -> channels 0, 1, 2 (owns the session)
//! usb:sn:MCS2-00001234_Ch4-6   -> channels 3, 4, 5 (borrows it)
//! ```

use crate::session::Ownership;
use daq_core::error::{StageError, StageResult};
use daq_core::stage::Axis;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which half of a controller a logical stage drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelGroup {
    /// Channels 1-3, the primary group.
    Ch1To3,
    /// Channels 4-6, the secondary group.
    Ch4To6,
}

impl ChannelGroup {
    /// Both groups, primary first.
    pub const ALL: [ChannelGroup; 2] = [ChannelGroup::Ch1To3, ChannelGroup::Ch4To6];

    /// Address suffix, including the leading underscore.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Ch1To3 => "_Ch1-3",
            Self::Ch4To6 => "_Ch4-6",
        }
    }

    /// Logical axes to channel indices for this group.
    pub fn mapping(&self) -> AxisMapping {
        match self {
            Self::Ch1To3 => AxisMapping::new([0, 1, 2]),
            Self::Ch4To6 => AxisMapping::new([3, 4, 5]),
        }
    }

    /// The primary group opens and closes the physical session.
    pub fn ownership(&self) -> Ownership {
        match self {
            Self::Ch1To3 => Ownership::Owner,
            Self::Ch4To6 => Ownership::Borrower,
        }
    }

    /// Logical address of this group on `locator`.
    pub fn address_for(&self, locator: &str) -> String {
        format!("{locator}{}", self.suffix())
    }
}

/// Fixed assignment of logical axes to physical channel indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AxisMapping {
    channels: [u32; 3],
}

impl AxisMapping {
    fn new(channels: [u32; 3]) -> Self {
        Self { channels }
    }

    /// Channel index driving `axis`.
    pub fn channel(&self, axis: Axis) -> u32 {
        match axis {
            Axis::X => self.channels[0],
            Axis::Y => self.channels[1],
            Axis::Z => self.channels[2],
        }
    }

    /// `(axis, channel index)` pairs in X, Y, Z order.
    pub fn iter(&self) -> impl Iterator<Item = (Axis, u32)> + '_ {
        Axis::ALL.into_iter().map(move |axis| (axis, self.channel(axis)))
    }
}

/// Parsed logical stage address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StageAddress {
    raw: String,
    locator: String,
    group: ChannelGroup,
}

impl StageAddress {
    /// Parse an address. Fails with [`StageError::InvalidAddress`] when the
    /// address has no channel-group suffix or nothing in front of it.
    pub fn parse(address: &str) -> StageResult<Self> {
        let invalid = |reason: &str| StageError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let (locator, group) = ChannelGroup::ALL
            .iter()
            .find_map(|group| {
                address
                    .strip_suffix(group.suffix())
                    .map(|locator| (locator, *group))
            })
            .ok_or_else(|| invalid("expected a '_Ch1-3' or '_Ch4-6' suffix"))?;

        if locator.is_empty() {
            return Err(invalid("missing device locator before the channel suffix"));
        }

        Ok(Self {
            raw: address.to_string(),
            locator: locator.to_string(),
            group,
        })
    }

    /// The full address string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Physical locator (address without the channel-group suffix).
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Channel group from the suffix.
    pub fn group(&self) -> ChannelGroup {
        self.group
    }

    /// Axis mapping of the group.
    pub fn mapping(&self) -> AxisMapping {
        self.group.mapping()
    }

    /// Whether this stage owns or borrows the controller session.
    pub fn ownership(&self) -> Ownership {
        self.group.ownership()
    }
}

impl FromStr for StageAddress {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for StageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
