//! Wire names and defaults shared by the store and the refresh exchange

/// JSON field carrying the access token, on disk and from the issuer
pub const ACCESS_TOKEN_FIELD: &str = "accessToken";

/// JSON field carrying the refresh token, on disk, in the refresh request
/// body and (optionally) in the issuer response
pub const REFRESH_TOKEN_FIELD: &str = "refreshToken";

/// Default credential file name when none is configured
pub const DEFAULT_CREDENTIALS_FILE: &str = "credentials.json";

/// Default bound on a single refresh exchange, in seconds
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;
