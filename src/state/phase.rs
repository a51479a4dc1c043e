/// Phase definitions for the crawl driver
///
/// The driver moves through the region hierarchy one level at a time and
/// records each move here so an invalid jump is caught instead of silently
/// corrupting progress.
use std::fmt;

/// Current phase of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverPhase {
    /// Nothing started yet
    Idle,

    /// An unfinished run for the same crawl identity is being picked up
    Resuming,

    /// Listing the top-level districts
    WalkingDistricts,

    /// Listing the counties of one district
    WalkingCounties,

    /// Fetching listing pages of one county
    PagingListing,

    /// Fetching detail pages for listing stubs
    ExtractingDetail,

    /// Stopped by a cancellation request; progress is checkpointed
    Paused,

    /// Every county was processed (or there was nothing to walk)
    Done,
}

impl DriverPhase {
    /// Returns true if the run cannot make further progress in this process
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Paused)
    }

    /// Returns true if the driver may move from `self` to `next`
    ///
    /// `Paused` is reachable from any non-terminal phase. Staying in the same
    /// phase is allowed for the county, paging and detail phases, which repeat
    /// per county, page and stub.
    pub fn can_transition(&self, next: DriverPhase) -> bool {
        use DriverPhase::*;

        if next == Paused {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Idle, Resuming)
                | (Idle, WalkingDistricts)
                | (Resuming, WalkingDistricts)
                | (WalkingDistricts, WalkingCounties)
                | (WalkingDistricts, Done)
                | (WalkingCounties, WalkingCounties)
                | (WalkingCounties, PagingListing)
                | (WalkingCounties, Done)
                | (PagingListing, PagingListing)
                | (PagingListing, ExtractingDetail)
                | (PagingListing, WalkingCounties)
                | (PagingListing, Done)
                | (ExtractingDetail, ExtractingDetail)
                | (ExtractingDetail, PagingListing)
                | (ExtractingDetail, WalkingCounties)
                | (ExtractingDetail, Done)
        )
    }

    /// Converts the phase to its stored string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Resuming => "resuming",
            Self::WalkingDistricts => "walking_districts",
            Self::WalkingCounties => "walking_counties",
            Self::PagingListing => "paging_listing",
            Self::ExtractingDetail => "extracting_detail",
            Self::Paused => "paused",
            Self::Done => "done",
        }
    }

    /// Parses a phase from its stored string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "resuming" => Some(Self::Resuming),
            "walking_districts" => Some(Self::WalkingDistricts),
            "walking_counties" => Some(Self::WalkingCounties),
            "paging_listing" => Some(Self::PagingListing),
            "extracting_detail" => Some(Self::ExtractingDetail),
            "paused" => Some(Self::Paused),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    /// Returns all phases
    pub fn all_phases() -> Vec<Self> {
        vec![
            Self::Idle,
            Self::Resuming,
            Self::WalkingDistricts,
            Self::WalkingCounties,
            Self::PagingListing,
            Self::ExtractingDetail,
            Self::Paused,
            Self::Done,
        ]
    }
}

impl fmt::Display for DriverPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
