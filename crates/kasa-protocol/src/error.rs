//! Error types shared by every layer.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Error codes returned by SMART (Tapo-style) devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmartErrorCode {
    Success,

    // Transport errors
    SessionTimeoutError,
    MultiRequestFailedError,
    HttpTransportFailedError,
    LoginFailedError,
    HandShakeFailedError,
    TransportNotAvailableError,
    CmdCommandCancelError,
    NullTransportError,

    // Common method errors
    CommonFailedError,
    UnspecificError,
    UnknownMethodError,
    JsonDecodeFailError,
    JsonEncodeFailError,
    AesDecodeFailError,
    RequestLenErrorError,
    CloudFailedError,
    ParamsError,
    InvalidPublicKeyError,
    SessionParamError,

    // Method specific errors
    QuickSetupError,
    DeviceError,
    DeviceNextEventError,
    FirmwareError,
    FirmwareVerErrorError,
    LoginError,
    TimeError,
    TimeSysError,
    TimeSaveError,
    WirelessError,
    WirelessUnsupportedError,
    ScheduleError,
    ScheduleFullError,
    ScheduleConflictError,
    ScheduleSaveError,
    ScheduleIndexError,
    CountdownError,
    CountdownConflictError,
    CountdownSaveError,
    AntitheftError,
    AntitheftConflictError,
    AntitheftSaveError,
    AccountError,
    StatError,
    StatSaveError,
    DstError,
    DstSaveError,

    /// Any code this library does not know about.
    InternalUnknownError,
}

use SmartErrorCode::*;

const CODE_TABLE: &[(SmartErrorCode, i64, &str)] = &[
    (Success, 0, "SUCCESS"),
    (SessionTimeoutError, 9999, "SESSION_TIMEOUT_ERROR"),
    (MultiRequestFailedError, 1200, "MULTI_REQUEST_FAILED_ERROR"),
    (HttpTransportFailedError, 1112, "HTTP_TRANSPORT_FAILED_ERROR"),
    (LoginFailedError, 1111, "LOGIN_FAILED_ERROR"),
    (HandShakeFailedError, 1100, "HAND_SHAKE_FAILED_ERROR"),
    (TransportNotAvailableError, 1002, "TRANSPORT_NOT_AVAILABLE_ERROR"),
    (CmdCommandCancelError, 1001, "CMD_COMMAND_CANCEL_ERROR"),
    (NullTransportError, 1000, "NULL_TRANSPORT_ERROR"),
    (CommonFailedError, -1, "COMMON_FAILED_ERROR"),
    (UnspecificError, -1001, "UNSPECIFIC_ERROR"),
    (UnknownMethodError, -1002, "UNKNOWN_METHOD_ERROR"),
    (JsonDecodeFailError, -1003, "JSON_DECODE_FAIL_ERROR"),
    (JsonEncodeFailError, -1004, "JSON_ENCODE_FAIL_ERROR"),
    (AesDecodeFailError, -1005, "AES_DECODE_FAIL_ERROR"),
    (RequestLenErrorError, -1006, "REQUEST_LEN_ERROR_ERROR"),
    (CloudFailedError, -1007, "CLOUD_FAILED_ERROR"),
    (ParamsError, -1008, "PARAMS_ERROR"),
    (InvalidPublicKeyError, -1010, "INVALID_PUBLIC_KEY_ERROR"),
    (SessionParamError, -1101, "SESSION_PARAM_ERROR"),
    (QuickSetupError, -1201, "QUICK_SETUP_ERROR"),
    (DeviceError, -1301, "DEVICE_ERROR"),
    (DeviceNextEventError, -1302, "DEVICE_NEXT_EVENT_ERROR"),
    (FirmwareError, -1401, "FIRMWARE_ERROR"),
    (FirmwareVerErrorError, -1402, "FIRMWARE_VER_ERROR_ERROR"),
    (LoginError, -1501, "LOGIN_ERROR"),
    (TimeError, -1601, "TIME_ERROR"),
    (TimeSysError, -1602, "TIME_SYS_ERROR"),
    (TimeSaveError, -1603, "TIME_SAVE_ERROR"),
    (WirelessError, -1701, "WIRELESS_ERROR"),
    (WirelessUnsupportedError, -1702, "WIRELESS_UNSUPPORTED_ERROR"),
    (ScheduleError, -1801, "SCHEDULE_ERROR"),
    (ScheduleFullError, -1802, "SCHEDULE_FULL_ERROR"),
    (ScheduleConflictError, -1803, "SCHEDULE_CONFLICT_ERROR"),
    (ScheduleSaveError, -1804, "SCHEDULE_SAVE_ERROR"),
    (ScheduleIndexError, -1805, "SCHEDULE_INDEX_ERROR"),
    (CountdownError, -1901, "COUNTDOWN_ERROR"),
    (CountdownConflictError, -1902, "COUNTDOWN_CONFLICT_ERROR"),
    (CountdownSaveError, -1903, "COUNTDOWN_SAVE_ERROR"),
    (AntitheftError, -2001, "ANTITHEFT_ERROR"),
    (AntitheftConflictError, -2002, "ANTITHEFT_CONFLICT_ERROR"),
    (AntitheftSaveError, -2003, "ANTITHEFT_SAVE_ERROR"),
    (AccountError, -2101, "ACCOUNT_ERROR"),
    (StatError, -2201, "STAT_ERROR"),
    (StatSaveError, -2202, "STAT_SAVE_ERROR"),
    (DstError, -2301, "DST_ERROR"),
    (DstSaveError, -2302, "DST_SAVE_ERROR"),
    (InternalUnknownError, -100_000, "INTERNAL_UNKNOWN_ERROR"),
];

impl SmartErrorCode {
    /// Map a raw device code; unknown codes become `InternalUnknownError`.
    pub fn from_code(code: i64) -> Self {
        CODE_TABLE
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(variant, _, _)| *variant)
            .unwrap_or(InternalUnknownError)
    }

    /// Read `error_code` from a response object.
    ///
    /// A response without the field is treated as `InternalUnknownError`.
    pub fn from_response(response: &Value) -> Self {
        response
            .get("error_code")
            .and_then(Value::as_i64)
            .map(Self::from_code)
            .unwrap_or(InternalUnknownError)
    }

    fn entry(self) -> (i64, &'static str) {
        CODE_TABLE
            .iter()
            .find(|(variant, _, _)| *variant == self)
            .map(|(_, code, name)| (*code, *name))
            .unwrap_or((-100_000, "INTERNAL_UNKNOWN_ERROR"))
    }

    pub fn code(self) -> i64 {
        self.entry().0
    }

    pub fn name(self) -> &'static str {
        self.entry().1
    }

    /// Errors after which the same request may succeed on a fresh session.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            TransportNotAvailableError | HttpTransportFailedError | UnspecificError | SessionTimeoutError
        )
    }

    pub fn is_authentication(self) -> bool {
        matches!(
            self,
            LoginError | LoginFailedError | AesDecodeFailError | HandShakeFailedError
        )
    }
}

impl fmt::Display for SmartErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

#[derive(Debug, Error)]
pub enum KasaError {
    #[error("{0}")]
    Kasa(String),
    #[error("{message}")]
    Device {
        message: String,
        code: Option<SmartErrorCode>,
    },
    #[error("{message}")]
    Authentication {
        message: String,
        code: Option<SmartErrorCode>,
    },
    /// Transient failure; protocols retry after a backoff.
    #[error("{message}")]
    Retryable {
        message: String,
        code: Option<SmartErrorCode>,
    },
    /// Connection dropped; protocols retry immediately.
    #[error("{0}")]
    Connection(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{message}")]
    UnsupportedDevice {
        message: String,
        discovery_result: Option<Value>,
    },
    #[error("{0}")]
    InvalidValue(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KasaError {
    pub fn kasa(message: impl Into<String>) -> Self {
        Self::Kasa(message.into())
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
            code: None,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            code: None,
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedDevice {
            message: message.into(),
            discovery_result: None,
        }
    }

    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue(message.into())
    }

    /// Build the error matching a failed SMART response code.
    pub fn from_smart_code(message: String, code: SmartErrorCode) -> Self {
        if code.is_retryable() {
            Self::Retryable {
                message,
                code: Some(code),
            }
        } else if code.is_authentication() {
            Self::Authentication {
                message,
                code: Some(code),
            }
        } else {
            Self::Device {
                message,
                code: Some(code),
            }
        }
    }

    pub fn error_code(&self) -> Option<SmartErrorCode> {
        match self {
            Self::Device { code, .. }
            | Self::Authentication { code, .. }
            | Self::Retryable { code, .. } => *code,
            _ => None,
        }
    }
}

pub type Result<T, E = KasaError> = std::result::Result<T, E>;
