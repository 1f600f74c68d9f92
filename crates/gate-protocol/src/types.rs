use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A gate actuator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateAction {
    /// Opens both leaves.
    Full,
    /// Opens a single leaf far enough for a person.
    Pedestrian,
    Left,
    Right,
}

impl GateAction {
    pub const ALL: [GateAction; 4] = [
        GateAction::Full,
        GateAction::Pedestrian,
        GateAction::Left,
        GateAction::Right,
    ];

    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Pedestrian => "pedestrian",
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    /// Maps the action as the operator sees it to the action the actuator expects.
    ///
    /// The actuator's left/right are defined from the inside. Viewed from the
    /// outside the leaves are mirrored, so the two swap.
    pub fn for_side(self, side: ViewingSide) -> Self {
        match (side, self) {
            (ViewingSide::Outside, Self::Left) => Self::Right,
            (ViewingSide::Outside, Self::Right) => Self::Left,
            (_, action) => action,
        }
    }
}

impl fmt::Display for GateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown action name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown gate action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for GateAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GateAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// Which side of the gate the operator is standing on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewingSide {
    #[default]
    Inside,
    Outside,
}

impl ViewingSide {
    /// Returns the other side.
    pub fn toggled(self) -> Self {
        match self {
            Self::Inside => Self::Outside,
            Self::Outside => Self::Inside,
        }
    }
}
