pub mod favorites;
pub mod files;
pub mod index;
pub mod search;
pub mod server;

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 200,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            code: 400,
            message: message.to_string(),
            data: None,
        }
    }

    /// Error that still carries a usable payload / 带数据的错误响应
    pub fn error_with(message: &str, data: T) -> Self {
        Self {
            code: 400,
            message: message.to_string(),
            data: Some(data),
        }
    }
}
