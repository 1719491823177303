use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Device viewport a screen is rendered at.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct Viewport {
    #[garde(range(min = 1, max = 10000))]
    pub width: u32,

    #[garde(range(min = 1, max = 10000))]
    pub height: u32,

    #[garde(length(min = 1, max = 100))]
    pub name: String,
}

impl Viewport {
    /// Lowercase, dash-separated form of the name for filenames.
    pub fn slug(&self) -> String {
        self.name
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join("-")
    }
}

/// Screens captured for every viewport.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, EnumString, EnumIter, Display, PartialEq, Eq,
    PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ScreenType {
    AppLoad,
    ContentLoad,
    Dashboard,
}

impl ScreenType {
    /// Selector the page exposes once this screen is ready.
    pub fn ready_selector(self) -> &'static str {
        match self {
            Self::AppLoad => "[data-testid=\"app-loaded\"]",
            Self::ContentLoad => "[data-testid=\"content-loaded\"]",
            Self::Dashboard => "[data-testid=\"dashboard\"]",
        }
    }

    /// Extra time to let lazy content render after the selector appears.
    pub fn settle_ms(self) -> u64 {
        match self {
            Self::AppLoad => 0,
            Self::ContentLoad => 2000,
            Self::Dashboard => 3000,
        }
    }
}

/// Where a saved screenshot lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactRef {
    pub path: String,
    pub filename: String,
    pub width: u32,
    pub height: u32,
}

/// Outcome of capturing one (viewport, screen type) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureResult {
    pub viewport_id: String,
    pub screen_type: ScreenType,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempt_count: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureCounts {
    pub success: usize,
    pub failed: usize,
    pub total: usize,
}

/// Result matrix of a `capture_all` run, keyed by viewport id then screen type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureReport {
    pub timestamp: DateTime<Utc>,
    pub captures: BTreeMap<String, BTreeMap<ScreenType, CaptureResult>>,
    pub summary: CaptureCounts,
}

impl CaptureReport {
    pub fn from_results(timestamp: DateTime<Utc>, results: Vec<CaptureResult>) -> Self {
        let mut captures: BTreeMap<String, BTreeMap<ScreenType, CaptureResult>> = BTreeMap::new();
        let mut summary = CaptureCounts::default();

        for result in results {
            summary.total += 1;
            if result.success {
                summary.success += 1;
            } else {
                summary.failed += 1;
            }
            captures
                .entry(result.viewport_id.clone())
                .or_default()
                .insert(result.screen_type, result);
        }

        Self {
            timestamp,
            captures,
            summary,
        }
    }

    pub fn results(&self) -> impl Iterator<Item = &CaptureResult> {
        self.captures.values().flat_map(BTreeMap::values)
    }

    /// Artifacts of successful captures only.
    pub fn artifacts(&self) -> Vec<ArtifactRef> {
        self.results()
            .filter_map(|r| r.artifact.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(viewport: &str, screen: ScreenType, success: bool) -> CaptureResult {
        CaptureResult {
            viewport_id: viewport.to_string(),
            screen_type: screen,
            success,
            artifact: None,
            error: (!success).then(|| "navigation timeout".to_string()),
            attempt_count: if success { 1 } else { 3 },
        }
    }

    #[test]
    fn test_viewport_slug() {
        let vp = Viewport {
            width: 402,
            height: 874,
            name: "iPhone 16 Pro".to_string(),
        };
        assert_eq!(vp.slug(), "iphone-16-pro");
    }

    #[test]
    fn test_viewport_validation_rejects_zero_width() {
        let vp = Viewport {
            width: 0,
            height: 874,
            name: "Broken".to_string(),
        };
        assert!(vp.validate().is_err());
    }

    #[test]
    fn test_report_counts() {
        let report = CaptureReport::from_results(
            Utc::now(),
            vec![
                result("iphone16pro", ScreenType::AppLoad, true),
                result("iphone16pro", ScreenType::Dashboard, false),
                result("iphone16promax", ScreenType::AppLoad, true),
            ],
        );
        assert_eq!(
            report.summary,
            CaptureCounts {
                success: 2,
                failed: 1,
                total: 3
            }
        );
        assert_eq!(report.captures.len(), 2);
        assert_eq!(report.captures["iphone16pro"].len(), 2);
    }

    #[test]
    fn test_screen_type_serializes_kebab_case() {
        assert_eq!(ScreenType::ContentLoad.to_string(), "content-load");
        assert_eq!("app-load".parse::<ScreenType>().unwrap(), ScreenType::AppLoad);
    }
}
