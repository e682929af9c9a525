//! Common types used by the various KeyServer components.
pub mod error;
pub mod pem;


pub use self::error::Error;

//------------ Response Aliases ----------------------------------------------

pub type KeyServerEmptyResult = std::result::Result<(), self::error::Error>;
pub type KeyServerResult<T> = std::result::Result<T, self::error::Error>;
