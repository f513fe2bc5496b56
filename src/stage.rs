//! Application lifecycle stages and the transition rule.
//!
//! Ordinary stages form a strict rank order and a record only ever moves
//! forward along it. Rejected and Withdrawn sit outside the order: they
//! absorb everything (including a record already at Offer) and, once
//! reached, are sticky against any non-terminal guess.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle stage of an application record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Applied,
    InReview,
    OaAssessment,
    PhoneScreen,
    InterviewScheduled,
    Interviewed,
    Offer,
    Rejected,
    Withdrawn,
}

/// Outcome of applying an incoming stage guess to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The record's stage changes to the incoming stage.
    Advance(Stage),
    /// The record's stage stays put. The contributing event is still
    /// recorded for audit and its notes appended.
    Hold,
}

impl Stage {
    /// Rank within the forward ordering. Terminal stages have no rank.
    pub fn rank(self) -> Option<u8> {
        match self {
            Self::Applied => Some(0),
            Self::InReview => Some(1),
            Self::OaAssessment => Some(2),
            Self::PhoneScreen => Some(3),
            Self::InterviewScheduled => Some(4),
            Self::Interviewed => Some(5),
            Self::Offer => Some(6),
            Self::Rejected | Self::Withdrawn => None,
        }
    }

    /// Rejected and Withdrawn are absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Withdrawn)
    }

    /// Apply the transition rule: terminal guesses always win, terminal
    /// records are sticky, and ordinary stages never regress.
    pub fn apply(current: Stage, incoming: Stage) -> Transition {
        if incoming.is_terminal() {
            return Transition::Advance(incoming);
        }
        if current.is_terminal() {
            return Transition::Hold;
        }
        match (incoming.rank(), current.rank()) {
            (Some(n), Some(c)) if n > c => Transition::Advance(incoming),
            _ => Transition::Hold,
        }
    }

    /// Canonical wire label, shared with the classifier prompt contract.
    pub fn label(self) -> &'static str {
        match self {
            Self::Applied => "Applied",
            Self::InReview => "In Review",
            Self::OaAssessment => "OA/Assessment",
            Self::PhoneScreen => "Phone Screen",
            Self::InterviewScheduled => "Interview Scheduled",
            Self::Interviewed => "Interviewed",
            Self::Offer => "Offer",
            Self::Rejected => "Rejected",
            Self::Withdrawn => "Withdrawn",
        }
    }

    /// All stages, in rank order with terminals last.
    pub fn all() -> [Stage; 9] {
        [
            Self::Applied,
            Self::InReview,
            Self::OaAssessment,
            Self::PhoneScreen,
            Self::InterviewScheduled,
            Self::Interviewed,
            Self::Offer,
            Self::Rejected,
            Self::Withdrawn,
        ]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::all()
            .into_iter()
            .find(|stage| stage.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown stage label: '{s}'"))
    }
}
