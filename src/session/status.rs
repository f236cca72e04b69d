//! # Status and API Payloads
//!
//! JSON shapes exchanged with the host.
//!
//! | Payload | Direction | Example |
//! |---------|-----------|---------|
//! | [`StatusEvent`] | push | `{"type":"controller_status","active":true,"controller_id":"/dev/input/event5"}` |
//! | [`ApiCommand`] | request | `{"command":"activate","controller_id":"/dev/input/event5"}` |
//! | [`ApiResponse`] | reply | `{"success":false,"error":"Printer is not operational"}` |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::control_loop::LoopPhase;
use crate::controller::gamepad::ControllerInfo;
use crate::error::BridgeError;

/// Pushed when a session starts and when it ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "controller_status")]
pub struct StatusEvent {
    pub active: bool,
    pub controller_id: Option<String>,
}

impl StatusEvent {
    pub fn active(controller_id: &str) -> Self {
        Self {
            active: true,
            controller_id: Some(controller_id.to_string()),
        }
    }

    pub fn inactive() -> Self {
        Self {
            active: false,
            controller_id: None,
        }
    }
}

/// Host request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ApiCommand {
    Activate {
        #[serde(default)]
        controller_id: Option<String>,
    },
    Deactivate,
    Refresh,
    List,
    Status,
}

/// Structured reply; failures never escape as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controllers: Option<Vec<ControllerInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusReport>,
}

impl ApiResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            controllers: None,
            status: None,
        }
    }

    pub fn failure(error: &BridgeError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::ok()
        }
    }

    #[must_use]
    pub fn with_controllers(mut self, controllers: Vec<ControllerInfo>) -> Self {
        self.controllers = Some(controllers);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusReport) -> Self {
        self.status = Some(status);
        self
    }
}

impl From<crate::error::Result<()>> for ApiResponse {
    fn from(result: crate::error::Result<()>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::failure(&e),
        }
    }
}

/// Snapshot returned by the `status` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub active: bool,
    pub controller_id: Option<String>,
    pub phase: LoopPhase,
    pub started_at: Option<DateTime<Utc>>,
    pub x: f64,
    pub y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub drawing: bool,
    pub connected: bool,
    pub printing: bool,
    pub dry_run: bool,
}
