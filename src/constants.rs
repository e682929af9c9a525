//! Various KeyServer-wide constants.


//------------ Binary Names -------------------------------------------------

/// The friendly name of the `keyserver` binary.
pub const KEYSERVER_APP: &str = "KeyServer";

/// The friendly name of the `keyserverc` binary.
pub const KEYSERVER_CLIENT_APP: &str = "KeyServer Client";


//------------ Environment Variables ----------------------------------------

/// The environment variable with the log level.
///
/// The variable should contain the name of a [`log::LevelFilter`]. It will
/// be overwritten by the config file and the command line. The default is
/// “info.”
pub const KEYSERVER_ENV_LOG_LEVEL: &str = "KEYSERVER_LOG_LEVEL";

/// The environment variable with the path to the CA key.
pub const KEYSERVER_ENV_CA_KEY: &str = "KEYSERVER_CA_KEY";


//------------ Protocol ------------------------------------------------------

/// The byte terminating the identity in a request.
pub const REQUEST_TERMINATOR: u8 = 0;

/// The maximum number of undelimited request bytes we buffer.
///
/// A connection that has sent more than this without a terminator is
/// closed.
pub const MAX_REQUEST_LEN: usize = 4096;

/// The size of a single read from a connection.
pub const READ_CHUNK_SIZE: usize = 1024;

/// The PEM header that starts the certificate part of a response.
pub const CERTIFICATE_PEM_HEADER: &str = "-----BEGIN CERTIFICATE-----";


//------------ Issuance ------------------------------------------------------

/// The attribute name used for the identity in the subject name.
pub const SUBJECT_ATTRIBUTE: &str = "CN";

/// The number of random bits in a certificate serial number.
pub const SERIAL_NUMBER_BITS: i32 = 160;

/// How far into the past a new certificate becomes valid, in seconds.
pub const NOT_BEFORE_BACKDATE_SECS: u32 = 60;

/// The latest not-after time a certificate can carry, 9999-12-31 23:59:59Z.
pub const MAX_NOT_AFTER: i64 = 253_402_300_799;


//------------ Defaults ------------------------------------------------------

/// The default port to listen on.
pub const DEFAULT_PORT: u16 = 9000;

/// The default issuer name.
pub const DEFAULT_ISSUER: &str = "CN=KeyServer CA";

/// The default size of generated RSA keys.
pub const DEFAULT_KEY_BITS: u32 = 8192;

/// The accepted range for the size of generated RSA keys.
pub const MIN_KEY_BITS: u32 = 1024;
pub const MAX_KEY_BITS: u32 = 16384;

/// The default certificate validity, in days.
pub const DEFAULT_VALIDITY_DAYS: u32 = 3650;

/// The default multiplexer poll timeout, in milliseconds.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 250;

/// The default log file.
pub const DEFAULT_LOG_FILE: &str = "./keyserver.log";

/// The default file for `keyserverc gen-ca-key`.
pub const DEFAULT_CA_KEY_FILE: &str = "ca.key";

/// The default client connect host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
