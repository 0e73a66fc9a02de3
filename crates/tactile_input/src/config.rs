//! Input engine configuration
//!
//! Thresholds and scheduler priorities are platform policy, so they are
//! injected here rather than hard-coded in the devices.

use serde::{Deserialize, Serialize};

use crate::scheduler::Priority;

/// Configuration for one input context
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Maximum time between presses counted as one multi-click (ms)
    pub double_click_time_ms: u64,
    /// Maximum distance between presses counted as one multi-click
    pub double_click_distance: f32,
    /// Priority of the staging-area drain continuation
    pub input_priority: Priority,
    /// Priority of focus/capture reevaluation after tree changes
    pub reevaluate_priority: Priority,
    /// Priority of the deferred mouse resynchronization
    pub synchronize_priority: Priority,
    /// Capacity of the stylus handoff queue
    pub stylus_queue_capacity: usize,
    /// Translate unhandled pen packets into mouse reports
    pub promote_pen_to_mouse: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl InputConfig {
    /// Desktop defaults
    pub fn standard() -> Self {
        Self {
            double_click_time_ms: 500,
            double_click_distance: 4.0,
            input_priority: Priority::Input,
            reevaluate_priority: Priority::Loaded,
            synchronize_priority: Priority::Input,
            stylus_queue_capacity: 256,
            promote_pen_to_mouse: true,
        }
    }

    /// Deterministic settings for tests
    pub fn testing() -> Self {
        Self {
            double_click_time_ms: 300,
            double_click_distance: 5.0,
            ..Self::standard()
        }
    }

    /// Set the multi-click time window
    pub fn double_click_time_ms(mut self, ms: u64) -> Self {
        self.double_click_time_ms = ms;
        self
    }

    /// Set the multi-click distance window
    pub fn double_click_distance(mut self, distance: f32) -> Self {
        self.double_click_distance = distance;
        self
    }

    /// Set the drain continuation priority
    pub fn input_priority(mut self, priority: Priority) -> Self {
        self.input_priority = priority;
        self
    }

    /// Set the reevaluation priority
    pub fn reevaluate_priority(mut self, priority: Priority) -> Self {
        self.reevaluate_priority = priority;
        self
    }

    /// Set the deferred resynchronization priority
    pub fn synchronize_priority(mut self, priority: Priority) -> Self {
        self.synchronize_priority = priority;
        self
    }

    /// Set how many stylus reports may wait for the UI thread
    pub fn stylus_queue_capacity(mut self, capacity: usize) -> Self {
        self.stylus_queue_capacity = capacity;
        self
    }

    /// Set whether pen packets are promoted to mouse input
    pub fn promote_pen_to_mouse(mut self, promote: bool) -> Self {
        self.promote_pen_to_mouse = promote;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: InputConfig =
            serde_json::from_str(r#"{ "double_click_time_ms": 250, "reevaluate_priority": "Render" }"#)
                .unwrap();
        assert_eq!(config.double_click_time_ms, 250);
        assert_eq!(config.reevaluate_priority, Priority::Render);
        assert_eq!(config.double_click_distance, 4.0);
        assert!(config.promote_pen_to_mouse);
    }

    #[test]
    fn test_builder_setters_chain() {
        let config = InputConfig::standard()
            .double_click_time_ms(400)
            .stylus_queue_capacity(8)
            .promote_pen_to_mouse(false);
        assert_eq!(config.double_click_time_ms, 400);
        assert_eq!(config.stylus_queue_capacity, 8);
        assert!(!config.promote_pen_to_mouse);
    }
}
