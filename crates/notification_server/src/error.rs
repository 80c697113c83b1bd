use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Dbus connection error")]
    DbusError(#[from] zbus::Error),
    #[error("storage error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("caller is not allowed to {0}")]
    AccessDenied(&'static str),
    #[error("notification service has shut down")]
    ServiceGone,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for zbus::fdo::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::AccessDenied(what) => zbus::fdo::Error::AccessDenied(format!("Caller is not allowed to {}", what)),
            other => zbus::fdo::Error::Failed(other.to_string()),
        }
    }
}
