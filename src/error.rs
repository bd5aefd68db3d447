use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/**
 * 引擎错误类型 - 使用 miette 提供用户友好的错误诊断
 *
 * 错误分类遵循扫描流水线的传播规则：
 * - 配置/注册错误在启动时致命
 * - 地址解析错误对单次 parse/open 调用致命
 * - 解码错误按扫描器实例隔离，记录日志后继续兄弟实例
 * - 资源护栏触发只是跳过对象，属于警告而非错误
 */
#[derive(Error, Debug, Diagnostic)]
pub enum AppError {
    #[error("IO error: {0}")]
    #[diagnostic(code(engine::io_error))]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(engine::config_error),
        help("Fix the scanner/driver registration table or the engine config before restarting")
    )]
    Config(String),

    #[error("Address syntax error in {input:?}: {message}")]
    #[diagnostic(
        code(engine::address_syntax),
        help("Virtual addresses are `root|<specifier><params>|...`, e.g. `img0|Z50:1000`")
    )]
    AddressSyntax { message: String, input: String },

    #[error("Unknown address specifier '{0}'")]
    #[diagnostic(
        code(engine::unknown_specifier),
        help("Register a driver for this specifier before opening the address")
    )]
    UnknownSpecifier(char),

    #[error("Decode error: {message}")]
    #[diagnostic(
        code(engine::decode_error),
        help("The container data is malformed or truncated; the object is left without children")
    )]
    Decode {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("Resource guard tripped: {0}")]
    #[diagnostic(code(engine::resource_guard))]
    ResourceGuard(String),

    #[error("Storage error: {0}")]
    #[diagnostic(
        code(engine::storage_error),
        help("Check the case store backend and its schema integrity")
    )]
    Storage(String),

    #[error("Cancelled: {0}")]
    #[diagnostic(code(engine::cancelled))]
    Cancelled(String),

    #[error("Not found: {0}")]
    #[diagnostic(code(engine::not_found))]
    NotFound(String),

    #[error("Validation error: {0}")]
    #[diagnostic(
        code(engine::validation_error),
        help("Check that your input meets the required format and constraints")
    )]
    Validation(String),

    #[error("Internal error: {0}")]
    #[diagnostic(code(engine::internal_error))]
    Internal(String),
}

impl AppError {
    /**
     * 为错误添加上下文信息
     */
    pub fn with_context(self, context: impl Into<String>) -> Self {
        let context = context.into();
        match self {
            AppError::Decode { message, path } => AppError::Decode {
                message: format!("{}: {}", context, message),
                path,
            },
            AppError::Storage(message) => AppError::Storage(format!("{}: {}", context, message)),
            other => other,
        }
    }

    /**
     * 创建配置错误（启动/注册阶段致命）
     */
    pub fn config_error(message: impl Into<String>) -> Self {
        AppError::Config(message.into())
    }

    /**
     * 创建地址语法错误
     */
    pub fn address_syntax(message: impl Into<String>, input: impl Into<String>) -> Self {
        AppError::AddressSyntax {
            message: message.into(),
            input: input.into(),
        }
    }

    /**
     * 创建解码错误
     */
    pub fn decode_error(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        AppError::Decode {
            message: message.into(),
            path,
        }
    }

    /**
     * 创建存储错误
     */
    pub fn storage_error(message: impl Into<String>) -> Self {
        AppError::Storage(message.into())
    }

    /**
     * 创建未找到错误
     */
    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    /**
     * 创建验证错误
     */
    pub fn validation_error(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    /// 判断该错误是否按扫描器实例隔离（解码错误不打断兄弟实例）
    pub fn is_instance_isolated(&self) -> bool {
        matches!(self, AppError::Decode { .. })
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
