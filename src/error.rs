use std::convert::From;
use toml;

#[derive(Debug)]
pub enum Error {
    IOError(std::io::Error),
    SetLoggerError(log::SetLoggerError),
    TOMLDeError(toml::de::Error),
    CsvError(csv::Error),
    JsonError(serde_json::Error),
    PopenError(subprocess::PopenError),
    SyscommandTimeoutError {
        stdout: Option<String>,
        stderr: Option<String>,
    },
    SyscommandOutputLimitExceededError(usize),
    LlamaCliError {
        code: i32,
        stderr: String,
    },
    InvalidToken(&'static str),
    RawError(String),
}

impl std::error::Error for Error {}
impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IOError(e) => {
                write!(f, "[IOError] {e}")
            }
            Error::SetLoggerError(e) => {
                write!(f, "[SetLoggerError] {e}")
            }
            Error::TOMLDeError(e) => {
                write!(f, "[TOMLDeError] {e}")
            }
            Error::CsvError(e) => {
                write!(f, "[CsvError] {e}")
            }
            Error::JsonError(e) => {
                write!(f, "[JsonError] {e}")
            }
            Error::PopenError(e) => {
                write!(f, "[PopenError] {e}")
            }
            Error::SyscommandTimeoutError { .. } => {
                write!(f, "[SyscommandTimeoutError]")
            }
            Error::SyscommandOutputLimitExceededError(s) => {
                write!(f, "[SyscommandOutputLimitExceededError] limit: {s}")
            }
            Error::LlamaCliError { code, stderr } => {
                write!(f, "[LlamaCliError] exit code {code}: {}", stderr.trim())
            }
            Error::InvalidToken(reason) => {
                write!(f, "[InvalidToken] {reason}")
            }
            Error::RawError(s) => {
                write!(f, "{s}")
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IOError(e)
    }
}

impl From<log::SetLoggerError> for Error {
    fn from(e: log::SetLoggerError) -> Self {
        Error::SetLoggerError(e)
    }
}

impl From<fern::InitError> for Error {
    fn from(e: fern::InitError) -> Self {
        match e {
            fern::InitError::Io(e) => Self::from(e),
            fern::InitError::SetLoggerError(e) => Self::from(e),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::TOMLDeError(e)
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::CsvError(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::JsonError(e)
    }
}

impl From<subprocess::PopenError> for Error {
    fn from(e: subprocess::PopenError) -> Self {
        Error::PopenError(e)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::RawError(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::RawError(String::from(s))
    }
}

impl Error {
    pub fn err_string<T>(s: String) -> Result<T, Self> {
        Err(Self::from(s))
    }
    pub fn err_str<T>(s: &str) -> Result<T, Self> {
        Err(Self::from(s))
    }
}
