use thiserror::Error;

pub mod video;

pub type Result<T> = core::result::Result<T, Error>;

/// Video container error.
#[derive(Error, PartialEq, Clone, Debug)]
pub enum Error {
    #[error("video {0} could not be opened")]
    VideoNotOpened(String),
    #[error("video {0} has no decodable frame")]
    VideoEmpty(String),
    #[error("failed to seek to frame {0}")]
    SeekFailed(u32),
    #[error("frame could not be decoded")]
    ReadFailed,

    #[error("video backend error {0}: {1}")]
    Backend(i32, String),
}

impl From<opencv::Error> for Error {
    fn from(error: opencv::Error) -> Self {
        Error::Backend(error.code, error.message)
    }
}
