use serde::{Deserialize, Serialize};

/// Carriageway side a range applies to. `Both` counts as left and right at once.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Left,
    Right,
    Both,
}

impl Side {
    /// The concrete sides this side stands for.
    pub fn expand(self) -> &'static [Side] {
        match self {
            Side::Left => &[Side::Left],
            Side::Right => &[Side::Right],
            Side::Both => &[Side::Left, Side::Right],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "LEFT",
            Side::Right => "RIGHT",
            Side::Both => "BOTH",
        }
    }

    pub fn parse(s: &str) -> Option<Side> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LEFT" => Some(Side::Left),
            "RIGHT" => Some(Side::Right),
            "BOTH" => Some(Side::Both),
            _ => None,
        }
    }
}

/// Inspection entry status. Declaration order is the workflow order.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Pending,
    Scheduled,
    Submitted,
    InProgress,
    Approved,
}

impl EntryStatus {
    pub fn priority(self) -> u8 {
        match self {
            EntryStatus::Pending => 1,
            EntryStatus::Scheduled => 2,
            EntryStatus::Submitted => 3,
            EntryStatus::InProgress => 4,
            EntryStatus::Approved => 5,
        }
    }

    /// Scheduled or later counts toward prerequisite coverage.
    pub fn is_workflow_satisfied(self) -> bool {
        self.priority() >= EntryStatus::Scheduled.priority()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Pending => "PENDING",
            EntryStatus::Scheduled => "SCHEDULED",
            EntryStatus::Submitted => "SUBMITTED",
            EntryStatus::InProgress => "IN_PROGRESS",
            EntryStatus::Approved => "APPROVED",
        }
    }

    pub fn parse(s: &str) -> Option<EntryStatus> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(EntryStatus::Pending),
            "SCHEDULED" => Some(EntryStatus::Scheduled),
            "SUBMITTED" => Some(EntryStatus::Submitted),
            "IN_PROGRESS" => Some(EntryStatus::InProgress),
            "APPROVED" => Some(EntryStatus::Approved),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Measure {
    Linear,
    Point,
}

impl Measure {
    pub fn as_str(self) -> &'static str {
        match self {
            Measure::Linear => "LINEAR",
            Measure::Point => "POINT",
        }
    }

    pub fn parse(s: &str) -> Option<Measure> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LINEAR" => Some(Measure::Linear),
            "POINT" => Some(Measure::Point),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_order_matches_priority() {
        let all = [
            EntryStatus::Pending,
            EntryStatus::Scheduled,
            EntryStatus::Submitted,
            EntryStatus::InProgress,
            EntryStatus::Approved,
        ];
        for pair in all.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].priority() < pair[1].priority());
        }
        assert!(!EntryStatus::Pending.is_workflow_satisfied());
        assert!(EntryStatus::Scheduled.is_workflow_satisfied());
        assert!(EntryStatus::Approved.is_workflow_satisfied());
    }

    #[test]
    fn side_both_expands_to_left_and_right() {
        assert_eq!(Side::Both.expand(), &[Side::Left, Side::Right]);
        assert_eq!(Side::Left.expand(), &[Side::Left]);
    }

    #[test]
    fn vocabulary_round_trips_through_serde() {
        assert_eq!(serde_json::to_string(&EntryStatus::InProgress).unwrap(), "\"IN_PROGRESS\"");
        assert_eq!(serde_json::to_string(&Side::Both).unwrap(), "\"BOTH\"");
        assert_eq!(serde_json::to_string(&Measure::Point).unwrap(), "\"POINT\"");
        assert_eq!(EntryStatus::parse("in_progress"), Some(EntryStatus::InProgress));
        assert_eq!(Side::parse(" right "), Some(Side::Right));
        assert_eq!(Measure::parse("curve"), None);
    }
}
