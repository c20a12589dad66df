#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Notify(#[from] iphelper::error::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Config(#[from] toml::de::Error),
    #[cfg(not(target_os = "windows"))]
    #[error("{0} is only available on Windows")]
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
