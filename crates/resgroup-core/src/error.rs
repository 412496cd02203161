use thiserror::Error;

use crate::cgroup::CgroupError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Cgroup error: {0}")]
    Cgroup(#[from] CgroupError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
