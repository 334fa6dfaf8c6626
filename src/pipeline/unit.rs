use serde::{Deserialize, Serialize};

/// Where a unit is in its lifecycle.
///
/// Units move `Pending → Retrieving → Standardizing → QualityChecking →
/// Storing → Succeeded`, or to `Failed` from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStage {
    Pending,
    Retrieving,
    Standardizing,
    QualityChecking,
    Storing,
    Succeeded,
    Failed,
}

impl UnitStage {
    /// The stage after this one on the success path.
    pub fn next(self) -> Option<UnitStage> {
        match self {
            UnitStage::Pending => Some(UnitStage::Retrieving),
            UnitStage::Retrieving => Some(UnitStage::Standardizing),
            UnitStage::Standardizing => Some(UnitStage::QualityChecking),
            UnitStage::QualityChecking => Some(UnitStage::Storing),
            UnitStage::Storing => Some(UnitStage::Succeeded),
            UnitStage::Succeeded | UnitStage::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UnitStage::Succeeded | UnitStage::Failed)
    }
}

impl std::fmt::Display for UnitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitStage::Pending => write!(f, "pending"),
            UnitStage::Retrieving => write!(f, "retrieving"),
            UnitStage::Standardizing => write!(f, "standardizing"),
            UnitStage::QualityChecking => write!(f, "quality_checking"),
            UnitStage::Storing => write!(f, "storing"),
            UnitStage::Succeeded => write!(f, "succeeded"),
            UnitStage::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_path() {
        let mut stage = UnitStage::Pending;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            stage = next;
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                UnitStage::Pending,
                UnitStage::Retrieving,
                UnitStage::Standardizing,
                UnitStage::QualityChecking,
                UnitStage::Storing,
                UnitStage::Succeeded,
            ]
        );
        assert!(stage.is_terminal());
        assert!(UnitStage::Failed.next().is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(UnitStage::QualityChecking.to_string(), "quality_checking");
        assert_eq!(UnitStage::Failed.to_string(), "failed");
    }
}
