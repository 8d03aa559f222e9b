//! Worker-reported service state.

use serde::{Deserialize, Serialize};

/// Status values reported by the shipped workers.
///
/// Values 0-5 are reserved for the runtime and these shared codes; workers
/// are free to report larger values of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusValue {
    Ok = 1,
    Error = 2,
}

impl StatusValue {
    pub fn code(self) -> i64 {
        self as i64
    }
}

impl From<StatusValue> for i64 {
    fn from(v: StatusValue) -> Self {
        v.code()
    }
}

/// A worker's self-reported snapshot: the control flags plus an optional
/// worker-defined status value and human-readable detail.
///
/// Owned exclusively by the worker; the connector only ever holds a cached
/// copy replaced wholesale on each STATE message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireState", from = "WireState")]
pub struct ServiceState {
    pub enabled: bool,
    pub shutting_down: bool,
    pub value: Option<i64>,
    pub msg: Option<String>,
}

impl ServiceState {
    pub fn idle() -> Self {
        Self {
            enabled: false,
            shutting_down: false,
            value: None,
            msg: None,
        }
    }

    /// True once the terminal shutdown flag has been observed.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "enable={} shutdown={}",
            self.enabled, self.shutting_down
        )?;
        if let Some(value) = self.value {
            write!(f, " value={value}")?;
        }
        if let Some(msg) = &self.msg {
            write!(f, " msg={msg:?}")?;
        }
        Ok(())
    }
}

/// Wire layout: `{"service": {"enable": .., "shutdown": ..}, "value": .., "msg": ..}`.
#[derive(Serialize, Deserialize)]
struct WireState {
    service: WireFlags,
    value: Option<i64>,
    msg: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WireFlags {
    enable: bool,
    shutdown: bool,
}

impl From<ServiceState> for WireState {
    fn from(s: ServiceState) -> Self {
        WireState {
            service: WireFlags {
                enable: s.enabled,
                shutdown: s.shutting_down,
            },
            value: s.value,
            msg: s.msg,
        }
    }
}

impl From<WireState> for ServiceState {
    fn from(w: WireState) -> Self {
        ServiceState {
            enabled: w.service.enable,
            shutting_down: w.service.shutdown,
            value: w.value,
            msg: w.msg,
        }
    }
}
